//! The 3D integer grid conduits are placed on.
//!
//! Positions order lexicographically (x, then y, then z); the network relies
//! on this for its deterministic whole-network sweep. Directions carry a
//! stable index used for connection masks and for candidate ordering in
//! routing decisions.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// GridPos
// ---------------------------------------------------------------------------

/// An integer grid coordinate. One node may exist per occupied cell.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct GridPos {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl GridPos {
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// The neighboring cell one step in `direction`.
    pub fn neighbor(self, direction: Direction) -> Self {
        let (dx, dy, dz) = direction.offset();
        Self::new(self.x + dx, self.y + dy, self.z + dz)
    }
}

// ---------------------------------------------------------------------------
// Direction
// ---------------------------------------------------------------------------

/// One of the six axis-aligned unit directions.
///
/// The declaration order is the canonical identifier order: wherever a set of
/// directions must be enumerated deterministically (routing candidates,
/// connection masks), it is this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    NegX,
    PosX,
    NegY,
    PosY,
    NegZ,
    PosZ,
}

impl Direction {
    /// All six directions in identifier order.
    pub const ALL: [Direction; 6] = [
        Direction::NegX,
        Direction::PosX,
        Direction::NegY,
        Direction::PosY,
        Direction::NegZ,
        Direction::PosZ,
    ];

    /// Stable index in `0..6`, matching the order of [`Direction::ALL`].
    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    /// The direction from a stable index. Inverse of [`Direction::index`].
    pub fn from_index(index: usize) -> Option<Direction> {
        Direction::ALL.get(index).copied()
    }

    /// The opposing direction on the same axis.
    pub fn opposite(self) -> Direction {
        match self {
            Direction::NegX => Direction::PosX,
            Direction::PosX => Direction::NegX,
            Direction::NegY => Direction::PosY,
            Direction::PosY => Direction::NegY,
            Direction::NegZ => Direction::PosZ,
            Direction::PosZ => Direction::NegZ,
        }
    }

    /// Unit offset of this direction as an (x, y, z) triple.
    pub fn offset(self) -> (i32, i32, i32) {
        match self {
            Direction::NegX => (-1, 0, 0),
            Direction::PosX => (1, 0, 0),
            Direction::NegY => (0, -1, 0),
            Direction::PosY => (0, 1, 0),
            Direction::NegZ => (0, 0, -1),
            Direction::PosZ => (0, 0, 1),
        }
    }
}
