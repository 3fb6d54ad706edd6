//! Mirror replication and desync diagnosis.
//!
//! The authoritative network marks nodes whose observable state changed;
//! [`take_sync_snapshots`] drains those marks into [`NodeSnapshot`]s, which
//! the game layer ships to mirror copies and applies with
//! [`apply_snapshots`]. Between snapshots a mirror predicts by running the
//! same deterministic step procedure. [`diff_networks`] produces a
//! structured report when two copies are suspected of disagreeing.

use crate::engine::PipeNetwork;
use crate::grid::GridPos;
use crate::id::ConduitTypeId;
use crate::item::TravelingItem;
use crate::module::ModuleStateMap;
use crate::node::PipeNode;
use crate::serialize::{DeserializeError, SerializeError};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Node snapshots
// ---------------------------------------------------------------------------

/// The replicable observable state of one node. The connection cache itself
/// is not shipped — a mirror rebuilds it from its own topology every step —
/// but the packed mask is, so a freshly applied snapshot doesn't fire a
/// spurious connections-changed hook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub position: GridPos,
    pub conduit_type: ConduitTypeId,
    pub items: Vec<TravelingItem>,
    pub connections_mask: u16,
    pub module_state: ModuleStateMap,
}

impl NodeSnapshot {
    pub fn of(node: &PipeNode) -> Self {
        Self {
            position: node.position,
            conduit_type: node.conduit_type,
            items: node.items.clone(),
            connections_mask: node.connections_mask,
            module_state: node.module_state.clone(),
        }
    }
}

/// Drain the network's pending-sync marks into one snapshot per changed
/// node. Marks for since-removed nodes drop out silently (the removal
/// itself replicates as a command, not a snapshot).
pub fn take_sync_snapshots(network: &mut PipeNetwork) -> Vec<NodeSnapshot> {
    network
        .sync
        .drain()
        .into_iter()
        .filter_map(|position| network.node_at(position).map(NodeSnapshot::of))
        .collect()
}

/// Apply one snapshot to a mirror copy: overwrite the node's observable
/// state, creating the node if the mirror doesn't have it yet.
pub fn apply_snapshot(network: &mut PipeNetwork, snapshot: &NodeSnapshot) {
    if let Some(&id) = network.index.get(&snapshot.position) {
        let node = &mut network.nodes[id];
        node.conduit_type = snapshot.conduit_type;
        node.items = snapshot.items.clone();
        node.connections_mask = snapshot.connections_mask;
        node.module_state = snapshot.module_state.clone();
    } else {
        let mut node = PipeNode::new(snapshot.position, snapshot.conduit_type);
        node.items = snapshot.items.clone();
        node.connections_mask = snapshot.connections_mask;
        node.module_state = snapshot.module_state.clone();
        let id = network.nodes.insert(node);
        network.index.insert(snapshot.position, id);
    }
}

/// Apply a batch of snapshots in order.
pub fn apply_snapshots(network: &mut PipeNetwork, snapshots: &[NodeSnapshot]) {
    for snapshot in snapshots {
        apply_snapshot(network, snapshot);
    }
}

// ---------------------------------------------------------------------------
// Wire codec
// ---------------------------------------------------------------------------

/// Encode a snapshot batch for the wire.
pub fn encode_sync_batch(snapshots: &[NodeSnapshot]) -> Result<Vec<u8>, SerializeError> {
    bitcode::serialize(snapshots).map_err(|e| SerializeError::Encode(e.to_string()))
}

/// Decode a snapshot batch from the wire.
pub fn decode_sync_batch(data: &[u8]) -> Result<Vec<NodeSnapshot>, DeserializeError> {
    bitcode::deserialize(data).map_err(|e| DeserializeError::Decode(e.to_string()))
}

// ---------------------------------------------------------------------------
// State diff
// ---------------------------------------------------------------------------

/// Difference between two network copies at the node level.
#[derive(Debug, Clone)]
pub enum NodeDiff {
    /// Node exists only in network A.
    OnlyInA(GridPos),
    /// Node exists only in network B.
    OnlyInB(GridPos),
    /// Node exists in both but observable state differs.
    StateMismatch {
        position: GridPos,
        description: String,
    },
}

/// Full structured diff between two network copies.
#[derive(Debug, Clone)]
pub struct NetworkDiff {
    pub is_identical: bool,
    pub step_matches: bool,
    pub node_diffs: Vec<NodeDiff>,
}

/// Compare two copies node by node. Intended for desync debugging, so the
/// mismatch descriptions name the first divergent aspect rather than trying
/// to be exhaustive.
pub fn diff_networks(a: &PipeNetwork, b: &PipeNetwork) -> NetworkDiff {
    let step_matches = a.sim_state.step == b.sim_state.step;
    let mut node_diffs = Vec::new();

    for position in a.positions() {
        match (a.node_at(position), b.node_at(position)) {
            (Some(node_a), Some(node_b)) => {
                if let Some(description) = describe_mismatch(node_a, node_b) {
                    node_diffs.push(NodeDiff::StateMismatch {
                        position,
                        description,
                    });
                }
            }
            (Some(_), None) => node_diffs.push(NodeDiff::OnlyInA(position)),
            _ => {}
        }
    }
    for position in b.positions() {
        if a.node_at(position).is_none() {
            node_diffs.push(NodeDiff::OnlyInB(position));
        }
    }

    NetworkDiff {
        is_identical: step_matches && node_diffs.is_empty(),
        step_matches,
        node_diffs,
    }
}

fn describe_mismatch(a: &PipeNode, b: &PipeNode) -> Option<String> {
    if a.conduit_type != b.conduit_type {
        return Some(format!(
            "conduit types differ: {:?} vs {:?}",
            a.conduit_type, b.conduit_type
        ));
    }
    if a.connections_mask != b.connections_mask {
        return Some(format!(
            "connection masks differ: {:#06x} vs {:#06x}",
            a.connections_mask, b.connections_mask
        ));
    }
    if a.items != b.items {
        return Some(format!(
            "item lists differ: {} vs {} items",
            a.items.len(),
            b.items.len()
        ));
    }
    if a.module_state != b.module_state {
        return Some("module state differs".to_owned());
    }
    None
}

// ===========================================================================
// Tests
// ===========================================================================
