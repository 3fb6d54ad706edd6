//! The deterministic router: seeded direction selection for multi-candidate
//! routing decisions.
//!
//! Every simulation copy must pick the same exit for the same decision
//! without exchanging random state. Instead of drawing from a shared RNG
//! (whose draw order diverges the moment two copies process nodes
//! differently), each decision derives its own seed from the decision's
//! identity — grid position, global step counter, arrival direction — and
//! runs it through a SplitMix64 finalizer. Same inputs, same exit, on every
//! copy, always.

use crate::fixed::Ticks;
use crate::grid::{Direction, GridPos};
use serde::{Deserialize, Serialize};

/// SplitMix64 finalizer: a well-mixed 64-bit permutation.
#[inline]
fn mix(mut z: u64) -> u64 {
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// The seed identifying one routing decision.
///
/// Mixing happens per field so that nearby positions and consecutive steps
/// land far apart in seed space.
pub fn route_seed(position: GridPos, step: Ticks, arrival: Direction) -> u64 {
    let mut seed = 0x9E37_79B9_7F4A_7C15u64;
    seed = mix(seed ^ (position.x as u32 as u64));
    seed = mix(seed ^ (position.y as u32 as u64));
    seed = mix(seed ^ (position.z as u32 as u64));
    seed = mix(seed ^ step);
    mix(seed ^ arrival.index() as u64)
}

/// Select one candidate by seed. Returns `None` only for an empty slice;
/// a single candidate is returned directly without consuming randomness.
pub fn select(seed: u64, candidates: &[Direction]) -> Option<Direction> {
    match candidates.len() {
        0 => None,
        1 => Some(candidates[0]),
        n => Some(candidates[(seed % n as u64) as usize]),
    }
}

// ---------------------------------------------------------------------------
// Decision-scoped stream
// ---------------------------------------------------------------------------

/// A SplitMix64 stream for decisions that need more than one draw
/// (e.g. a module splitting a stack across several exits). Seed it from
/// [`route_seed`]; never carry it across decisions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirRng {
    state: u64,
}

impl DirRng {
    pub fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    /// Next value in the sequence.
    pub fn next_u64(&mut self) -> u64 {
        self.state = self.state.wrapping_add(0x9E37_79B9_7F4A_7C15);
        mix(self.state)
    }

    /// Uniform index in `0..bound`. Returns 0 for a zero bound.
    pub fn next_index(&mut self, bound: usize) -> usize {
        if bound == 0 {
            return 0;
        }
        (self.next_u64() % bound as u64) as usize
    }
}

// ===========================================================================
// Tests
// ===========================================================================
