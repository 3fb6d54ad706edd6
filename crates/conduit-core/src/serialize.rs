//! Versioned persistence for whole-network state.
//!
//! Snapshots are binary (`bitcode`) with a magic/version header validated
//! before decoding the payload. The conduit type registry holds trait
//! objects and is never serialized: loading takes the registry the host
//! rebuilt at startup and revalidates every node against it. Out-of-range
//! persisted values (a type id past the registry, a speed below the floor)
//! are clamped to the nearest valid value — a corrupted or future-version
//! save degrades, it never crashes.

use crate::engine::PipeNetwork;
use crate::fixed::{Fixed64, MIN_ITEM_SPEED};
use crate::id::ConduitTypeId;
use crate::module::ConduitSet;
use crate::node::PipeNode;
use crate::sim::{SimSide, SimState};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Magic number identifying a conduit network snapshot.
pub const SNAPSHOT_MAGIC: u32 = 0xC0D0_0001;

/// Current format version. Increment when breaking the wire format.
pub const FORMAT_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors that can occur during serialization.
#[derive(Debug, thiserror::Error)]
pub enum SerializeError {
    #[error("bitcode encoding failed: {0}")]
    Encode(String),
}

/// Errors that can occur during deserialization.
#[derive(Debug, thiserror::Error)]
pub enum DeserializeError {
    #[error("invalid magic number: expected 0x{:08X}, got 0x{:08X}", SNAPSHOT_MAGIC, .0)]
    InvalidMagic(u32),
    #[error("unsupported format version: expected {}, got {}", FORMAT_VERSION, .0)]
    UnsupportedVersion(u32),
    #[error("snapshot from future version {0} (this build supports up to {FORMAT_VERSION})")]
    FutureVersion(u32),
    #[error("bitcode decoding failed: {0}")]
    Decode(String),
}

// ---------------------------------------------------------------------------
// Snapshot header
// ---------------------------------------------------------------------------

/// Header carried by every snapshot. Enables format detection and version
/// checking before trusting the payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotHeader {
    pub magic: u32,
    pub version: u32,
    pub step: u64,
}

impl SnapshotHeader {
    pub fn new(step: u64) -> Self {
        Self {
            magic: SNAPSHOT_MAGIC,
            version: FORMAT_VERSION,
            step,
        }
    }

    pub fn validate(&self) -> Result<(), DeserializeError> {
        if self.magic != SNAPSHOT_MAGIC {
            return Err(DeserializeError::InvalidMagic(self.magic));
        }
        if self.version > FORMAT_VERSION {
            return Err(DeserializeError::FutureVersion(self.version));
        }
        if self.version < FORMAT_VERSION {
            return Err(DeserializeError::UnsupportedVersion(self.version));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Network snapshot
// ---------------------------------------------------------------------------

/// The serializable portion of a network. Excludes the event bus, the sync
/// tracker, queued mutations, and the type registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct NetworkSnapshot {
    header: SnapshotHeader,
    sim_state: SimState,
    nodes: Vec<PipeNode>,
}

impl PipeNetwork {
    /// Serialize this network to a versioned binary snapshot.
    pub fn save(&self) -> Result<Vec<u8>, SerializeError> {
        let snapshot = NetworkSnapshot {
            header: SnapshotHeader::new(self.sim_state.step),
            sim_state: self.sim_state.clone(),
            // Sweep order, so the byte stream is deterministic.
            nodes: self
                .positions()
                .filter_map(|p| self.node_at(p).cloned())
                .collect(),
        };
        bitcode::serialize(&snapshot).map_err(|e| SerializeError::Encode(e.to_string()))
    }

    /// Rebuild a network from a snapshot, the host-reconstructed type
    /// registry, and the side this copy will run as.
    pub fn load(
        data: &[u8],
        types: ConduitSet,
        side: SimSide,
    ) -> Result<PipeNetwork, DeserializeError> {
        let snapshot: NetworkSnapshot =
            bitcode::deserialize(data).map_err(|e| DeserializeError::Decode(e.to_string()))?;
        snapshot.header.validate()?;

        let mut network = PipeNetwork::new(types, side);
        network.sim_state = snapshot.sim_state;

        let type_count = network.types.len() as u32;
        for mut node in snapshot.nodes {
            // Clamp out-of-range persisted values instead of rejecting the
            // save: an unknown type id maps to the last registered type, a
            // sub-floor speed to the floor, negative progress to zero.
            if node.conduit_type.0 >= type_count && type_count > 0 {
                node.conduit_type = ConduitTypeId(type_count - 1);
            }
            for item in &mut node.items {
                item.speed = item.speed.max(MIN_ITEM_SPEED);
                item.progress = item.progress.max(Fixed64::ZERO);
            }
            let position = node.position;
            if network.index.contains_key(&position) {
                continue;
            }
            let id = network.nodes.insert(node);
            network.index.insert(position, id);
        }

        network.last_state_hash = network.state_hash();
        Ok(network)
    }
}

/// Decode just the header of a serialized snapshot (the whole payload is
/// decoded — bitcode has no partial reads — but only the header returns).
pub fn read_snapshot_header(data: &[u8]) -> Result<SnapshotHeader, DeserializeError> {
    let snapshot: NetworkSnapshot =
        bitcode::deserialize(data).map_err(|e| DeserializeError::Decode(e.to_string()))?;
    Ok(snapshot.header)
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{Direction, GridPos};
    use crate::test_utils::*;

    fn pos(x: i32, y: i32, z: i32) -> GridPos {
        GridPos::new(x, y, z)
    }

    fn populated_network() -> (PipeNetwork, GridWorld) {
        let mut network = basic_network();
        let mut world = GridWorld::new();
        place_line(&mut network, &mut world, pos(0, 0, 0), 4);
        network.step(&mut world);
        network.force_insert(
            &mut world,
            pos(0, 0, 0),
            Direction::NegX,
            payload(ingot(), 5),
        );
        step_n(&mut network, &mut world, 3);
        (network, world)
    }

    // -----------------------------------------------------------------------
    // Test 1: round trip preserves the state hash
    // -----------------------------------------------------------------------
    #[test]
    fn save_load_round_trip() {
        let (network, _world) = populated_network();
        let data = network.save().expect("save");

        let restored =
            PipeNetwork::load(&data, basic_set(), SimSide::Authoritative).expect("load");
        assert_eq!(restored.node_count(), network.node_count());
        assert_eq!(restored.sim_state.step, network.sim_state.step);
        assert_eq!(restored.state_hash(), network.state_hash());
    }

    // -----------------------------------------------------------------------
    // Test 2: a loaded network keeps simulating identically
    // -----------------------------------------------------------------------
    #[test]
    fn loaded_network_continues_in_lockstep() {
        let (mut network, mut world) = populated_network();
        let data = network.save().expect("save");
        let mut restored =
            PipeNetwork::load(&data, basic_set(), SimSide::Authoritative).expect("load");
        let mut world2 = world.clone();

        for step in 0..40 {
            network.step(&mut world);
            restored.step(&mut world2);
            assert_eq!(
                network.state_hash(),
                restored.state_hash(),
                "divergence at step {step}"
            );
        }
    }

    // -----------------------------------------------------------------------
    // Test 3: header validation
    // -----------------------------------------------------------------------
    #[test]
    fn header_validation() {
        assert!(SnapshotHeader::new(0).validate().is_ok());

        let bad_magic = SnapshotHeader {
            magic: 0xDEAD_BEEF,
            version: FORMAT_VERSION,
            step: 0,
        };
        assert!(matches!(
            bad_magic.validate(),
            Err(DeserializeError::InvalidMagic(0xDEAD_BEEF))
        ));

        let future = SnapshotHeader {
            magic: SNAPSHOT_MAGIC,
            version: FORMAT_VERSION + 1,
            step: 0,
        };
        assert!(matches!(
            future.validate(),
            Err(DeserializeError::FutureVersion(_))
        ));
    }

    // -----------------------------------------------------------------------
    // Test 4: garbage input is a Decode error, not a panic
    // -----------------------------------------------------------------------
    #[test]
    fn garbage_input_is_an_error() {
        let result = PipeNetwork::load(&[1, 2, 3, 4], basic_set(), SimSide::Authoritative);
        assert!(matches!(result, Err(DeserializeError::Decode(_))));
    }

    // -----------------------------------------------------------------------
    // Test 5: out-of-range persisted values are clamped on load
    // -----------------------------------------------------------------------
    #[test]
    fn out_of_range_values_clamp_on_load() {
        let (mut network, mut world) = populated_network();

        // Corrupt in-memory state, save, reload.
        {
            let id = network.index[&pos(0, 0, 0)];
            let node = &mut network.nodes[id];
            node.conduit_type = ConduitTypeId(9999);
            node.items[0].speed = Fixed64::from_num(-3);
            node.items[0].progress = Fixed64::from_num(-1);
        }
        let data = network.save().expect("save");
        let set = basic_set();
        let highest = ConduitTypeId(set.len() as u32 - 1);
        let restored = PipeNetwork::load(&data, set, SimSide::Authoritative).expect("load");

        let node = restored.node_at(pos(0, 0, 0)).unwrap();
        assert_eq!(node.conduit_type, highest);
        assert_eq!(node.items[0].speed, MIN_ITEM_SPEED);
        assert_eq!(node.items[0].progress, Fixed64::ZERO);

        // And the clamped network still steps.
        let mut restored = restored;
        restored.step(&mut world);
    }

    // -----------------------------------------------------------------------
    // Test 6: header peek
    // -----------------------------------------------------------------------
    #[test]
    fn header_peek() {
        let (network, _world) = populated_network();
        let data = network.save().expect("save");
        let header = read_snapshot_header(&data).expect("header");
        assert_eq!(header.magic, SNAPSHOT_MAGIC);
        assert_eq!(header.version, FORMAT_VERSION);
        assert_eq!(header.step, network.sim_state.step);
    }
}
