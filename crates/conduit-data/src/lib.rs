//! Conduit Data -- data-file loading for conduit packs.
//!
//! A pack declares item type names and conduit types (module bundles with
//! tuning) in RON, JSON, or TOML. The loader resolves names to engine ids
//! and produces a [`ConduitSet`](conduit_core::module::ConduitSet) ready to
//! hand to `PipeNetwork::new`.

pub mod loader;
pub mod schema;

pub use loader::{DataLoadError, Format, PackData, detect_format, load_pack_file, parse_pack};
