//! Tracks which nodes changed observably since the last replication point.
//!
//! The authoritative network marks a node whenever its externally-observable
//! state (item list, chosen directions, module state, connection mask)
//! mutates; mirror replication drains the set and ships one snapshot per
//! marked node. Positions are stored in a `BTreeSet` so the drain order is
//! deterministic.

use crate::grid::GridPos;
use std::collections::BTreeSet;

/// Per-step set of nodes pending replication to mirror copies.
#[derive(Debug, Clone, Default)]
pub struct SyncTracker {
    pending: BTreeSet<GridPos>,
}

impl SyncTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a node's observable state as changed.
    pub fn mark(&mut self, position: GridPos) {
        self.pending.insert(position);
    }

    /// Whether anything is waiting to be replicated.
    pub fn is_dirty(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn is_marked(&self, position: GridPos) -> bool {
        self.pending.contains(&position)
    }

    /// The pending set, in ascending position order.
    pub fn pending(&self) -> impl Iterator<Item = GridPos> + '_ {
        self.pending.iter().copied()
    }

    /// Take the pending set, leaving the tracker clean.
    pub fn drain(&mut self) -> Vec<GridPos> {
        let drained: Vec<GridPos> = self.pending.iter().copied().collect();
        self.pending.clear();
        drained
    }

    /// Discard all pending marks without replicating (world teardown).
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}
