//! Simulation identity and state hashing.
//!
//! A network instance is either the authoritative copy or a mirror. Both run
//! the same per-node step procedure; the side only controls when finished
//! items leave a segment and whether failures materialize as world entities.

use crate::fixed::{Fixed64, MIRROR_CULL_POINT, SEGMENT_END, Ticks};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Simulation side
// ---------------------------------------------------------------------------

/// Which copy of the network this instance is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SimSide {
    /// Owns item state. Hands items off exactly at the segment end and
    /// spawns dropped payloads as world entities.
    Authoritative,
    /// A predictive copy reconciled by snapshot replication. Keeps finished
    /// items a little past the segment end for presentation continuity and
    /// never spawns anything in the world.
    Mirror,
}

impl SimSide {
    /// Progress at which an item is removed from its segment on this side.
    pub fn removal_threshold(self) -> Fixed64 {
        match self {
            SimSide::Authoritative => SEGMENT_END,
            SimSide::Mirror => MIRROR_CULL_POINT,
        }
    }

    /// Whether this side materializes drops as free world entities.
    pub fn spawns_drops(self) -> bool {
        matches!(self, SimSide::Authoritative)
    }
}

// ---------------------------------------------------------------------------
// Simulation state
// ---------------------------------------------------------------------------

/// Mutable simulation state tracked by the network.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimState {
    /// Global step counter, incremented once per whole-network step.
    pub step: Ticks,
}

impl SimState {
    pub fn new() -> Self {
        Self::default()
    }
}

// ---------------------------------------------------------------------------
// State hash
// ---------------------------------------------------------------------------

/// A deterministic hash of observable network state for desync detection.
///
/// Uses FNV-1a (64-bit) for speed and simplicity. Not cryptographic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateHash(pub u64);

impl StateHash {
    const FNV_OFFSET: u64 = 0xcbf29ce484222325;
    const FNV_PRIME: u64 = 0x100000001b3;

    pub fn new() -> Self {
        Self(Self::FNV_OFFSET)
    }

    pub fn write(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.0 ^= b as u64;
            self.0 = self.0.wrapping_mul(Self::FNV_PRIME);
        }
    }

    pub fn write_u64(&mut self, v: u64) {
        self.write(&v.to_le_bytes());
    }

    pub fn write_u32(&mut self, v: u32) {
        self.write(&v.to_le_bytes());
    }

    pub fn write_u16(&mut self, v: u16) {
        self.write(&v.to_le_bytes());
    }

    pub fn write_i32(&mut self, v: i32) {
        self.write(&v.to_le_bytes());
    }

    pub fn write_fixed64(&mut self, v: Fixed64) {
        self.write(&v.to_bits().to_le_bytes());
    }

    pub fn finish(self) -> u64 {
        self.0
    }
}

impl Default for StateHash {
    fn default() -> Self {
        Self::new()
    }
}
