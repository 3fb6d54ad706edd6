//! Typed, buffered simulation events.
//!
//! Phases record events as they mutate node state; the buffer is drained in
//! batch after the step (UI, audio, analytics). Event kinds can be
//! suppressed ahead of time, in which case recording is free. The buffer is
//! bounded; overflow drops the newest events rather than growing without
//! limit mid-step.

use crate::fixed::Ticks;
use crate::grid::{Direction, GridPos};
use crate::id::ItemTypeId;

// ---------------------------------------------------------------------------
// Event types
// ---------------------------------------------------------------------------

/// A simulation event. All events carry the step at which they occurred.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    // -- Routing --
    ItemRouted {
        position: GridPos,
        chosen: Direction,
        step: Ticks,
    },
    ItemDropped {
        position: GridPos,
        item_type: ItemTypeId,
        quantity: u32,
        step: Ticks,
    },
    ItemDiscarded {
        position: GridPos,
        item_type: ItemTypeId,
        quantity: u32,
        step: Ticks,
    },
    ItemSplit {
        position: GridPos,
        pieces: u32,
        step: Ticks,
    },

    // -- Transfer --
    ItemHandedOff {
        from: GridPos,
        to: GridPos,
        quantity: u32,
        step: Ticks,
    },
    ItemDelivered {
        position: GridPos,
        into: Direction,
        quantity: u32,
        step: Ticks,
    },
    InsertRejected {
        position: GridPos,
        from: Direction,
        quantity: u32,
        step: Ticks,
    },

    // -- Topology --
    ConnectionsChanged {
        position: GridPos,
        mask: u16,
        step: Ticks,
    },
    NodePlaced {
        position: GridPos,
        step: Ticks,
    },
    NodeRemoved {
        position: GridPos,
        step: Ticks,
    },
}

/// Discriminant of [`Event`], used for suppression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    ItemRouted,
    ItemDropped,
    ItemDiscarded,
    ItemSplit,
    ItemHandedOff,
    ItemDelivered,
    InsertRejected,
    ConnectionsChanged,
    NodePlaced,
    NodeRemoved,
}

impl EventKind {
    const COUNT: usize = 10;

    fn index(self) -> usize {
        self as usize
    }
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::ItemRouted { .. } => EventKind::ItemRouted,
            Event::ItemDropped { .. } => EventKind::ItemDropped,
            Event::ItemDiscarded { .. } => EventKind::ItemDiscarded,
            Event::ItemSplit { .. } => EventKind::ItemSplit,
            Event::ItemHandedOff { .. } => EventKind::ItemHandedOff,
            Event::ItemDelivered { .. } => EventKind::ItemDelivered,
            Event::InsertRejected { .. } => EventKind::InsertRejected,
            Event::ConnectionsChanged { .. } => EventKind::ConnectionsChanged,
            Event::NodePlaced { .. } => EventKind::NodePlaced,
            Event::NodeRemoved { .. } => EventKind::NodeRemoved,
        }
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Bounded buffer of simulation events with per-kind suppression.
#[derive(Debug)]
pub struct EventBus {
    buffer: Vec<Event>,
    capacity: usize,
    suppressed: [bool; EventKind::COUNT],
    /// Events rejected because the buffer was full (not suppression).
    overflowed: u64,
}

impl EventBus {
    pub const DEFAULT_CAPACITY: usize = 4096;

    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: Vec::new(),
            capacity,
            suppressed: [false; EventKind::COUNT],
            overflowed: 0,
        }
    }

    /// Record an event unless its kind is suppressed or the buffer is full.
    pub fn record(&mut self, event: Event) {
        if self.suppressed[event.kind().index()] {
            return;
        }
        if self.buffer.len() >= self.capacity {
            self.overflowed += 1;
            return;
        }
        self.buffer.push(event);
    }

    /// Suppress a kind: subsequent records of it are free no-ops.
    pub fn suppress(&mut self, kind: EventKind) {
        self.suppressed[kind.index()] = true;
    }

    pub fn unsuppress(&mut self, kind: EventKind) {
        self.suppressed[kind.index()] = false;
    }

    pub fn is_suppressed(&self, kind: EventKind) -> bool {
        self.suppressed[kind.index()]
    }

    /// Take all buffered events, leaving the buffer empty.
    pub fn drain(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.buffer)
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// How many events were lost to the capacity bound so far.
    pub fn overflow_count(&self) -> u64 {
        self.overflowed
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

// ===========================================================================
// Tests
// ===========================================================================
