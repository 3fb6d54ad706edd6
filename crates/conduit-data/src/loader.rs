//! Resolution pipeline: parse a pack file, resolve item references, build
//! the engine's conduit type registry.
//!
//! Formats are detected by file extension (`.ron`, `.json`, `.toml`). All
//! resolution failures are explicit [`DataLoadError`] values; a pack either
//! loads completely or not at all.

use crate::schema::{ModuleConfigData, PackFile};
use conduit_core::id::ItemTypeId;
use conduit_core::module::{ConduitSet, ConduitType};
use conduit_core::modules::{
    Booster, Extractor, FaceRestrictor, Inserter, ItemFilter, Merger, RoundRobinSplitter,
    VoidSink,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

// ===========================================================================
// Errors
// ===========================================================================

/// Errors that can occur during pack loading.
#[derive(Debug, thiserror::Error)]
pub enum DataLoadError {
    /// The file has an extension we don't support.
    #[error("unsupported format for file: {file}")]
    UnsupportedFormat { file: PathBuf },

    /// A deserialization error occurred.
    #[error("parse error: {detail}")]
    Parse { detail: String },

    /// Two items or two conduit types share a name.
    #[error("duplicate name '{name}'")]
    DuplicateName { name: String },

    /// A module referenced an item name the pack doesn't declare.
    #[error("unresolved item reference '{name}' in conduit '{conduit}'")]
    UnresolvedItem { name: String, conduit: String },

    /// An I/O error occurred.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

// ===========================================================================
// Format detection
// ===========================================================================

/// Supported data file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Ron,
    Json,
    Toml,
}

/// Detect the format of a file based on its extension.
pub fn detect_format(path: &Path) -> Result<Format, DataLoadError> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("ron") => Ok(Format::Ron),
        Some("json") => Ok(Format::Json),
        Some("toml") => Ok(Format::Toml),
        _ => Err(DataLoadError::UnsupportedFormat {
            file: path.to_path_buf(),
        }),
    }
}

// ===========================================================================
// Resolved pack
// ===========================================================================

/// A fully resolved pack: the item name table (index = `ItemTypeId`) and
/// the conduit type registry ready to hand to `PipeNetwork::new`.
#[derive(Debug)]
pub struct PackData {
    pub item_names: Vec<String>,
    pub set: ConduitSet,
}

impl PackData {
    /// Look up an item id by its declared name.
    pub fn item_id(&self, name: &str) -> Option<ItemTypeId> {
        self.item_names
            .iter()
            .position(|n| n == name)
            .map(|i| ItemTypeId(i as u32))
    }
}

// ===========================================================================
// Loading
// ===========================================================================

/// Read and resolve a pack file from disk.
pub fn load_pack_file(path: &Path) -> Result<PackData, DataLoadError> {
    let format = detect_format(path)?;
    let source = std::fs::read_to_string(path)?;
    parse_pack(&source, format)
}

/// Parse and resolve a pack from source text in the given format.
pub fn parse_pack(source: &str, format: Format) -> Result<PackData, DataLoadError> {
    let pack: PackFile = match format {
        Format::Ron => ron::from_str(source).map_err(|e| DataLoadError::Parse {
            detail: e.to_string(),
        })?,
        Format::Json => serde_json::from_str(source).map_err(|e| DataLoadError::Parse {
            detail: e.to_string(),
        })?,
        Format::Toml => toml::from_str(source).map_err(|e| DataLoadError::Parse {
            detail: e.to_string(),
        })?,
    };
    resolve(pack)
}

/// Resolve names to ids and instantiate module objects.
fn resolve(pack: PackFile) -> Result<PackData, DataLoadError> {
    // Item table: declaration order is the id numbering; duplicates would
    // make later references ambiguous.
    let mut item_ids: BTreeMap<&str, ItemTypeId> = BTreeMap::new();
    for (i, name) in pack.items.iter().enumerate() {
        if item_ids.insert(name, ItemTypeId(i as u32)).is_some() {
            return Err(DataLoadError::DuplicateName { name: name.clone() });
        }
    }

    let mut set = ConduitSet::new();
    let mut seen_conduits: Vec<&str> = Vec::new();

    for conduit in &pack.conduits {
        if seen_conduits.contains(&conduit.name.as_str()) {
            return Err(DataLoadError::DuplicateName {
                name: conduit.name.clone(),
            });
        }
        seen_conduits.push(&conduit.name);

        let resolve_item = |name: &str| -> Result<ItemTypeId, DataLoadError> {
            item_ids
                .get(name)
                .copied()
                .ok_or_else(|| DataLoadError::UnresolvedItem {
                    name: name.to_owned(),
                    conduit: conduit.name.clone(),
                })
        };

        let mut ty = ConduitType::new(&conduit.name);
        for module in &conduit.modules {
            ty = match module {
                ModuleConfigData::Splitter => ty.with_module(Box::new(RoundRobinSplitter)),
                ModuleConfigData::Merger { output } => {
                    ty.with_module(Box::new(Merger::new(*output)))
                }
                ModuleConfigData::Filter { allowed } => {
                    let mut map = BTreeMap::new();
                    for rule in allowed {
                        let ids: Vec<ItemTypeId> = rule
                            .items
                            .iter()
                            .map(|n| resolve_item(n))
                            .collect::<Result<_, _>>()?;
                        map.entry(rule.direction)
                            .or_insert_with(Vec::new)
                            .extend(ids);
                    }
                    ty.with_module(Box::new(ItemFilter::new(map)))
                }
                ModuleConfigData::Extractor {
                    interval,
                    stack_size,
                } => ty.with_module(Box::new(Extractor {
                    interval: *interval,
                    stack_size: *stack_size,
                })),
                ModuleConfigData::Inserter { filter } => {
                    let filter = filter.as_deref().map(|n| resolve_item(n)).transpose()?;
                    ty.with_module(Box::new(Inserter::accepting(filter)))
                }
                ModuleConfigData::Booster { requires_signal } => ty.with_module(Box::new(Booster {
                    requires_signal: *requires_signal,
                })),
                ModuleConfigData::VoidSink => ty.with_module(Box::new(VoidSink)),
                ModuleConfigData::FaceRestrictor { open } => {
                    ty.with_module(Box::new(FaceRestrictor::along(open.clone())))
                }
            };
        }
        set.register(ty);
    }

    Ok(PackData {
        item_names: pack.items,
        set,
    })
}

// ===========================================================================
// Tests
// ===========================================================================
