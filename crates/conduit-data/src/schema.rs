//! Serde data file structs for conduit pack definitions.
//!
//! These define the on-disk format for item types and conduit types
//! (module bundles with tuning). They are deserialized from RON, JSON, or
//! TOML and resolved into engine types by the loader. Item references are
//! by name; the loader resolves them to ids. Directions deserialize through
//! the engine's own `Direction` type (`"pos_x"`, `"neg_y"`, ...).

use conduit_core::grid::Direction;
use serde::Deserialize;

/// The root of a conduit pack file.
#[derive(Debug, Clone, Deserialize)]
pub struct PackFile {
    /// Item type names. Index order becomes the `ItemTypeId` numbering.
    #[serde(default)]
    pub items: Vec<String>,
    /// Conduit type definitions, in registration order.
    pub conduits: Vec<ConduitTypeData>,
}

/// One conduit type: a name plus its attached modules, in attachment
/// (= precedence) order.
#[derive(Debug, Clone, Deserialize)]
pub struct ConduitTypeData {
    pub name: String,
    #[serde(default)]
    pub modules: Vec<ModuleConfigData>,
}

/// One module attachment. Tagged by `kind` so the same shape works across
/// RON, JSON, and TOML.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModuleConfigData {
    /// Round-robin distribution across open exits.
    Splitter,
    /// Funnel everything toward one output; refuse backflow from it.
    Merger { output: Direction },
    /// Per-direction item allow-lists (item names resolved by the loader).
    Filter {
        #[serde(default)]
        allowed: Vec<FilterRuleData>,
    },
    /// Pull from adjacent inventories on a cadence.
    Extractor {
        #[serde(default = "default_extract_interval")]
        interval: u64,
        #[serde(default = "default_extract_stack")]
        stack_size: u32,
    },
    /// Open the conduit to machine-side insertion, optionally filtered.
    Inserter {
        #[serde(default)]
        filter: Option<String>,
    },
    /// Raise the speed ceiling and accelerate items.
    Booster {
        #[serde(default)]
        requires_signal: bool,
    },
    /// Destroy everything that reaches the midpoint.
    VoidSink,
    /// Only connect through the listed faces.
    FaceRestrictor { open: Vec<Direction> },
}

/// One filter rule: a direction and the item names it admits. Rules for
/// the same direction merge.
#[derive(Debug, Clone, Deserialize)]
pub struct FilterRuleData {
    pub direction: Direction,
    pub items: Vec<String>,
}

fn default_extract_interval() -> u64 {
    8
}

fn default_extract_stack() -> u32 {
    16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ron_pack_parses() {
        // Module entries use RON map syntax: the `kind` tag is resolved
        // through serde's self-describing path, which wants a map.
        let src = r#"
            (
                items: ["ingot", "cog"],
                conduits: [
                    (name: "duct", modules: []),
                    (name: "boost_duct", modules: [
                        { "kind": "booster", "requires_signal": true },
                    ]),
                ],
            )
        "#;
        let pack: PackFile = ron::from_str(src).expect("ron parse");
        assert_eq!(pack.items, vec!["ingot", "cog"]);
        assert_eq!(pack.conduits.len(), 2);
        assert!(matches!(
            pack.conduits[1].modules[0],
            ModuleConfigData::Booster {
                requires_signal: true
            }
        ));
    }

    #[test]
    fn json_pack_parses() {
        let src = r#"{
            "items": ["ingot"],
            "conduits": [
                {"name": "sorter", "modules": [
                    {"kind": "filter", "allowed": [
                        {"direction": "pos_x", "items": ["ingot"]}
                    ]}
                ]}
            ]
        }"#;
        let pack: PackFile = serde_json::from_str(src).expect("json parse");
        let ModuleConfigData::Filter { allowed } = &pack.conduits[0].modules[0] else {
            panic!("expected filter");
        };
        assert_eq!(allowed[0].direction, Direction::PosX);
        assert_eq!(allowed[0].items, vec!["ingot"]);
    }

    #[test]
    fn toml_pack_parses_with_defaults() {
        let src = r#"
            items = ["ingot"]

            [[conduits]]
            name = "intake"

            [[conduits.modules]]
            kind = "extractor"
        "#;
        let pack: PackFile = toml::from_str(src).expect("toml parse");
        let ModuleConfigData::Extractor {
            interval,
            stack_size,
        } = pack.conduits[0].modules[0]
        else {
            panic!("expected extractor");
        };
        assert_eq!(interval, 8);
        assert_eq!(stack_size, 16);
    }

    #[test]
    fn unknown_module_kind_is_a_parse_error() {
        let src = r#"{"conduits": [{"name": "x", "modules": [{"kind": "teleporter"}]}]}"#;
        assert!(serde_json::from_str::<PackFile>(src).is_err());
    }
}
