//! Deterministic fixed-point arithmetic and the transport tuning constants.
//!
//! All simulation math runs on Q32.32 fixed-point so that every copy of the
//! network (authoritative or mirror) computes bit-identical item positions
//! and speeds. `f64` appears only at initialization and display boundaries.

use fixed::types::{I16F16, I32F32};

/// Q32.32 fixed-point: 32 integer bits, 32 fractional bits.
pub type Fixed64 = I32F32;

/// Q16.16 fixed-point for compact storage (payload metadata values).
pub type Fixed32 = I16F16;

/// Steps are the atomic unit of simulation time.
pub type Ticks = u64;

// ---------------------------------------------------------------------------
// Transport tuning constants
// ---------------------------------------------------------------------------
// Tunable, not structural: routing and handoff logic must not depend on the
// exact values, only on the orderings (floor < base < boosted, 0.5 < 1 < cull).

/// Speed ceiling for a segment with no speed-reporting module, in blocks/step.
pub const BASE_MAX_SPEED: Fixed64 = Fixed64::lit("0.16");

/// Speed ceiling for acceleration-capable segments (4x base).
pub const BOOSTED_MAX_SPEED: Fixed64 = Fixed64::lit("0.64");

/// Per-step linear speed gain while a boost module is active.
pub const BOOST_ACCELERATION: Fixed64 = Fixed64::lit("0.005");

/// Fraction of current speed shed per step when above the target speed.
pub const BASE_DRAG: Fixed64 = Fixed64::lit("0.005");

/// Items never move slower than this; the floor keeps congested lines
/// draining instead of stalling forever.
pub const MIN_ITEM_SPEED: Fixed64 = Fixed64::lit("0.02");

/// Progress at which the one-and-only routing decision for a segment is made.
pub const ROUTE_DECISION_POINT: Fixed64 = Fixed64::lit("0.5");

/// Progress at which the authoritative side hands an item to the neighbor.
pub const SEGMENT_END: Fixed64 = Fixed64::lit("1");

/// Progress past which a mirror copy finally culls an item it kept around
/// for presentation continuity. Cosmetic only; never affects routing.
pub const MIRROR_CULL_POINT: Fixed64 = Fixed64::lit("1.3");

/// Virtual capacity of one node: the sum of payload quantities it may hold.
pub const NODE_CAPACITY: u32 = 320;

// ---------------------------------------------------------------------------
// Boundary conversions
// ---------------------------------------------------------------------------

/// Convert an f64 to Fixed64. Use only for initialization, never in sim loop.
#[inline]
pub fn f64_to_fixed64(v: f64) -> Fixed64 {
    Fixed64::from_num(v)
}

/// Convert Fixed64 to f64. Use only for display, never in sim loop.
#[inline]
pub fn fixed64_to_f64(v: Fixed64) -> f64 {
    v.to_num::<f64>()
}
