//! Per-node connection classification and the packed change-detection mask.
//!
//! The cache is rebuilt from live topology queries every step and compared
//! against the previous step's packed mask to detect changes cheaply. It is
//! purely a cache: the world and the node arena stay authoritative.

use crate::grid::Direction;
use serde::{Deserialize, Serialize};

/// What a node sees one step away in a given direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionKind {
    /// Nothing item-accepting there (or the query failed).
    #[default]
    None,
    /// Another conduit segment.
    Pipe,
    /// An item-accepting terminal.
    Inventory,
}

impl ConnectionKind {
    /// Two-bit encoding used in the packed mask.
    fn bits(self) -> u16 {
        match self {
            ConnectionKind::None => 0b00,
            ConnectionKind::Pipe => 0b01,
            ConnectionKind::Inventory => 0b10,
        }
    }
}

/// The six-direction connection cache of one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ConnectionCache {
    kinds: [ConnectionKind; 6],
}

impl ConnectionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kind(&self, direction: Direction) -> ConnectionKind {
        self.kinds[direction.index()]
    }

    pub fn set(&mut self, direction: Direction, kind: ConnectionKind) {
        self.kinds[direction.index()] = kind;
    }

    /// Pack all six classifications into a bitmask (2 bits per direction,
    /// low bits = `Direction::NegX`). Equal masks mean identical topology.
    pub fn mask(&self) -> u16 {
        let mut mask = 0u16;
        for dir in Direction::ALL {
            mask |= self.kinds[dir.index()].bits() << (dir.index() * 2);
        }
        mask
    }

    /// Directions with any connection at all, in identifier order.
    pub fn open_directions(&self) -> Vec<Direction> {
        Direction::ALL
            .into_iter()
            .filter(|d| self.kind(*d) != ConnectionKind::None)
            .collect()
    }

    /// True if no direction connects to anything.
    pub fn is_isolated(&self) -> bool {
        self.kinds.iter().all(|k| *k == ConnectionKind::None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_cache_is_isolated() {
        let cache = ConnectionCache::new();
        assert!(cache.is_isolated());
        assert_eq!(cache.mask(), 0);
        assert!(cache.open_directions().is_empty());
    }

    #[test]
    fn set_and_read_back() {
        let mut cache = ConnectionCache::new();
        cache.set(Direction::PosX, ConnectionKind::Pipe);
        cache.set(Direction::NegY, ConnectionKind::Inventory);
        assert_eq!(cache.kind(Direction::PosX), ConnectionKind::Pipe);
        assert_eq!(cache.kind(Direction::NegY), ConnectionKind::Inventory);
        assert_eq!(cache.kind(Direction::PosZ), ConnectionKind::None);
    }

    #[test]
    fn mask_distinguishes_kind_not_just_presence() {
        let mut a = ConnectionCache::new();
        a.set(Direction::PosX, ConnectionKind::Pipe);
        let mut b = ConnectionCache::new();
        b.set(Direction::PosX, ConnectionKind::Inventory);
        assert_ne!(a.mask(), b.mask());
    }

    #[test]
    fn mask_distinguishes_direction() {
        let mut a = ConnectionCache::new();
        a.set(Direction::NegX, ConnectionKind::Pipe);
        let mut b = ConnectionCache::new();
        b.set(Direction::PosZ, ConnectionKind::Pipe);
        assert_ne!(a.mask(), b.mask());
    }

    #[test]
    fn open_directions_in_identifier_order() {
        let mut cache = ConnectionCache::new();
        cache.set(Direction::PosZ, ConnectionKind::Pipe);
        cache.set(Direction::NegX, ConnectionKind::Inventory);
        cache.set(Direction::PosY, ConnectionKind::Pipe);
        assert_eq!(
            cache.open_directions(),
            vec![Direction::NegX, Direction::PosY, Direction::PosZ]
        );
    }

    #[test]
    fn full_cache_mask_round_trips_equality() {
        let mut a = ConnectionCache::new();
        let mut b = ConnectionCache::new();
        for dir in Direction::ALL {
            a.set(dir, ConnectionKind::Pipe);
            b.set(dir, ConnectionKind::Pipe);
        }
        assert_eq!(a.mask(), b.mask());
        assert_eq!(a, b);
    }
}
