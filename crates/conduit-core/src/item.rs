//! Payloads and the items that carry them through segments.
//!
//! A [`TravelingItem`] is pure state plus one physics operation,
//! [`advance`](TravelingItem::advance). Everything else that happens to an
//! item (routing, handoff, dropping) is orchestrated by the network.

use crate::fixed::{BASE_MAX_SPEED, Fixed64, MIN_ITEM_SPEED, SEGMENT_END};
use crate::grid::Direction;
use crate::id::{ItemTypeId, PropertyId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ---------------------------------------------------------------------------
// Payload
// ---------------------------------------------------------------------------

/// An item type, a quantity, and an opaque metadata blob.
///
/// The engine never interprets `metadata`; it travels with the payload and
/// survives splits, handoffs, and persistence untouched. Game code reads and
/// writes it through processors and modules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    pub item_type: ItemTypeId,
    pub quantity: u32,
    #[serde(default)]
    pub metadata: BTreeMap<PropertyId, Fixed64>,
}

impl Payload {
    pub fn new(item_type: ItemTypeId, quantity: u32) -> Self {
        Self {
            item_type,
            quantity,
            metadata: BTreeMap::new(),
        }
    }

    pub fn set_meta(&mut self, id: PropertyId, value: Fixed64) {
        self.metadata.insert(id, value);
    }

    pub fn get_meta(&self, id: PropertyId) -> Option<Fixed64> {
        self.metadata.get(&id).copied()
    }

    /// Split off up to `quantity` units into a new payload carrying the same
    /// metadata. Returns `None` (and leaves `self` untouched) when asked for
    /// zero or when this payload is empty.
    #[must_use = "the split-off payload must be placed somewhere"]
    pub fn split_off(&mut self, quantity: u32) -> Option<Payload> {
        let taken = quantity.min(self.quantity);
        if taken == 0 {
            return None;
        }
        self.quantity -= taken;
        Some(Payload {
            item_type: self.item_type,
            quantity: taken,
            metadata: self.metadata.clone(),
        })
    }
}

// ---------------------------------------------------------------------------
// TravelingItem
// ---------------------------------------------------------------------------

/// One payload in transit through one segment.
///
/// `progress` runs 0 (just entered) to 1 (far end); a mirror copy briefly
/// lets it exceed 1 for presentation continuity. `direction` is the current
/// direction of travel: entry face to center before the midpoint decision,
/// center to exit face after it. `routed` guards the one-decision-per-segment
/// invariant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TravelingItem {
    pub payload: Payload,
    pub progress: Fixed64,
    pub direction: Direction,
    pub speed: Fixed64,
    pub routed: bool,
}

impl TravelingItem {
    /// An item just accepted into a segment, entering through the face the
    /// payload came from and traveling inward at the base speed. Plain
    /// segments hold this speed; boosted ones raise it, drag lowers it.
    pub fn new(payload: Payload, direction: Direction) -> Self {
        Self {
            payload,
            progress: Fixed64::ZERO,
            direction,
            speed: BASE_MAX_SPEED,
            routed: false,
        }
    }

    /// Same, but preserving the speed the item carried in its previous
    /// segment (used on pipe-to-pipe handoff).
    pub fn with_speed(payload: Payload, direction: Direction, speed: Fixed64) -> Self {
        Self {
            speed: speed.max(MIN_ITEM_SPEED),
            ..Self::new(payload, direction)
        }
    }

    /// Advance one step of segment physics. Returns `true` once the item has
    /// reached the far end (`progress >= 1`).
    ///
    /// The asymmetry is deliberate: speeding up requires an active boost
    /// (`can_accelerate`), while slowing down is unconditional drag.
    /// Above the target, the item sheds the larger of the module's linear
    /// rate and a `drag` fraction of its current speed, so overspeeding
    /// items converge even on segments with no accelerating module.
    /// Speed never falls below [`MIN_ITEM_SPEED`].
    pub fn advance(
        &mut self,
        target_speed: Fixed64,
        acceleration: Fixed64,
        drag: Fixed64,
        can_accelerate: bool,
    ) -> bool {
        if self.speed < target_speed {
            if can_accelerate {
                self.speed = (self.speed + acceleration).min(target_speed);
            }
        } else if self.speed > target_speed {
            let shed = acceleration.max(self.speed * drag);
            self.speed = (self.speed - shed).max(target_speed);
        }
        if self.speed < MIN_ITEM_SPEED {
            self.speed = MIN_ITEM_SPEED;
        }
        self.progress += self.speed;
        self.progress >= SEGMENT_END
    }
}

// ===========================================================================
// Tests
// ===========================================================================
