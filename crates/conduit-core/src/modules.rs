//! The representative module set conduit types are assembled from.
//!
//! Every module here is a stateless strategy object: tuning constants live
//! in its fields, per-node mutable state (cursors) lives in the node's
//! [`ModuleStateMap`](crate::module::ModuleStateMap) under the module's
//! name. State blobs read from saves are clamped at the point of use, so a
//! corrupted cursor can skew one decision but never crash or desync the
//! simulation.

use crate::fixed::{BOOST_ACCELERATION, BOOSTED_MAX_SPEED, Fixed64, Ticks};
use crate::grid::Direction;
use crate::id::ItemTypeId;
use crate::item::{Payload, TravelingItem};
use crate::module::{ConduitModule, ModuleContext};
use crate::route::RoutePlan;
use crate::topology::ConnectionKind;
use std::collections::BTreeMap;

// ---------------------------------------------------------------------------
// RoundRobinSplitter
// ---------------------------------------------------------------------------

/// Distributes successive items evenly across the candidate exits.
///
/// The cursor persists in node state and resets when the node's topology
/// changes, so a rebuilt junction starts its rotation from the first exit
/// again.
#[derive(Debug, Clone, Copy, Default)]
pub struct RoundRobinSplitter;

impl RoundRobinSplitter {
    const STATE_KEY: &'static str = "splitter";
}

impl ConduitModule for RoundRobinSplitter {
    fn name(&self) -> &'static str {
        "splitter"
    }

    fn route(
        &self,
        ctx: &mut ModuleContext<'_>,
        _item: &TravelingItem,
        candidates: &[Direction],
    ) -> RoutePlan {
        if candidates.len() <= 1 {
            return RoutePlan::Pass;
        }
        // Modulo doubles as the clamp for out-of-range persisted cursors.
        let cursor = ctx.state.load_u32(Self::STATE_KEY).unwrap_or(0) as usize % candidates.len();
        let chosen = candidates[cursor];
        ctx.state
            .store_u32(Self::STATE_KEY, ((cursor + 1) % candidates.len()) as u32);
        RoutePlan::Reroute(vec![chosen])
    }

    fn on_connections_changed(&self, ctx: &mut ModuleContext<'_>, _open: &[Direction]) {
        ctx.state.store_u32(Self::STATE_KEY, 0);
    }
}

// ---------------------------------------------------------------------------
// Merger
// ---------------------------------------------------------------------------

/// Funnels every stream into one designated output and refuses backflow
/// from it. This is the one-way conduit: items may enter through any face
/// except the output.
#[derive(Debug, Clone, Copy)]
pub struct Merger {
    pub output: Direction,
}

impl Merger {
    pub fn new(output: Direction) -> Self {
        Self { output }
    }
}

impl ConduitModule for Merger {
    fn name(&self) -> &'static str {
        "merger"
    }

    fn route(
        &self,
        _ctx: &mut ModuleContext<'_>,
        _item: &TravelingItem,
        candidates: &[Direction],
    ) -> RoutePlan {
        if candidates.contains(&self.output) {
            RoutePlan::Reroute(vec![self.output])
        } else {
            RoutePlan::Pass
        }
    }

    fn can_accept(&self, _ctx: &ModuleContext<'_>, from: Direction, _payload: &Payload) -> bool {
        from != self.output
    }
}

// ---------------------------------------------------------------------------
// ItemFilter
// ---------------------------------------------------------------------------

/// Per-direction item allow-lists. A direction with an entry admits only
/// the listed item types; a direction without one admits anything. Items
/// admissible nowhere fall out of the candidate set entirely (and the
/// normalized empty Reroute becomes a Drop).
#[derive(Debug, Clone, Default)]
pub struct ItemFilter {
    pub allowed: BTreeMap<Direction, Vec<ItemTypeId>>,
}

impl ItemFilter {
    pub fn new(allowed: BTreeMap<Direction, Vec<ItemTypeId>>) -> Self {
        Self { allowed }
    }

    fn admits(&self, direction: Direction, item: ItemTypeId) -> bool {
        match self.allowed.get(&direction) {
            Some(list) => list.contains(&item),
            None => true,
        }
    }
}

impl ConduitModule for ItemFilter {
    fn name(&self) -> &'static str {
        "item_filter"
    }

    fn route(
        &self,
        _ctx: &mut ModuleContext<'_>,
        item: &TravelingItem,
        candidates: &[Direction],
    ) -> RoutePlan {
        let admitted: Vec<Direction> = candidates
            .iter()
            .copied()
            .filter(|d| self.admits(*d, item.payload.item_type))
            .collect();
        if admitted.len() == candidates.len() {
            // Nothing narrowed; let later modules (or the default) decide.
            RoutePlan::Pass
        } else {
            RoutePlan::Reroute(admitted)
        }
    }
}

// ---------------------------------------------------------------------------
// Extractor
// ---------------------------------------------------------------------------

/// Pulls stacks out of adjacent inventories on a fixed cadence and injects
/// them into the node as traveling items, never past the node's free
/// capacity.
#[derive(Debug, Clone, Copy)]
pub struct Extractor {
    /// Steps between extraction attempts.
    pub interval: Ticks,
    /// Largest stack pulled per inventory per attempt.
    pub stack_size: u32,
}

impl Default for Extractor {
    fn default() -> Self {
        Self {
            interval: 8,
            stack_size: 16,
        }
    }
}

impl ConduitModule for Extractor {
    fn name(&self) -> &'static str {
        "extractor"
    }

    fn on_tick(&self, ctx: &mut ModuleContext<'_>) {
        if ctx.step % self.interval.max(1) != 0 {
            return;
        }
        for dir in Direction::ALL {
            if ctx.connections.kind(dir) != ConnectionKind::Inventory {
                continue;
            }
            let already: u32 = ctx.spawned.iter().map(|it| it.payload.quantity).sum();
            let room = ctx.free_capacity.saturating_sub(already);
            if room == 0 {
                break;
            }
            let quota = self.stack_size.min(room);
            if let Some(payload) =
                ctx.world
                    .try_extract(ctx.position.neighbor(dir), dir.opposite(), quota)
            {
                // Enters through the inventory face, traveling inward.
                ctx.spawned
                    .push(TravelingItem::new(payload, dir.opposite()));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Inserter
// ---------------------------------------------------------------------------

/// Opens the node to insertion from inventory-classified directions
/// (machines pushing their output into the line), optionally restricted to
/// one item type.
#[derive(Debug, Clone, Copy, Default)]
pub struct Inserter {
    pub filter: Option<ItemTypeId>,
}

impl Inserter {
    pub fn accepting(filter: Option<ItemTypeId>) -> Self {
        Self { filter }
    }
}

impl ConduitModule for Inserter {
    fn name(&self) -> &'static str {
        "inserter"
    }

    fn permits_inventory_ingress(&self) -> bool {
        true
    }

    fn can_accept(&self, _ctx: &ModuleContext<'_>, _from: Direction, payload: &Payload) -> bool {
        match self.filter {
            Some(item) => payload.item_type == item,
            None => true,
        }
    }
}

// ---------------------------------------------------------------------------
// Booster
// ---------------------------------------------------------------------------

/// Raises the segment's speed ceiling and actively accelerates items,
/// optionally only while a control signal is present.
#[derive(Debug, Clone, Copy)]
pub struct Booster {
    pub requires_signal: bool,
}

impl Booster {
    /// A booster that is always on.
    pub fn unconditional() -> Self {
        Self {
            requires_signal: false,
        }
    }

    /// A booster gated on the world's signal state at the node.
    pub fn signal_gated() -> Self {
        Self {
            requires_signal: true,
        }
    }
}

impl ConduitModule for Booster {
    fn name(&self) -> &'static str {
        "booster"
    }

    fn max_speed(&self) -> Option<Fixed64> {
        Some(BOOSTED_MAX_SPEED)
    }

    fn acceleration(&self, ctx: &ModuleContext<'_>) -> Fixed64 {
        if self.requires_signal && !ctx.world.has_signal(ctx.position) {
            Fixed64::ZERO
        } else {
            BOOST_ACCELERATION
        }
    }
}

// ---------------------------------------------------------------------------
// VoidSink
// ---------------------------------------------------------------------------

/// Destroys every item that reaches the midpoint. The silent end of a line.
#[derive(Debug, Clone, Copy, Default)]
pub struct VoidSink;

impl ConduitModule for VoidSink {
    fn name(&self) -> &'static str {
        "void_sink"
    }

    fn route(
        &self,
        _ctx: &mut ModuleContext<'_>,
        _item: &TravelingItem,
        _candidates: &[Direction],
    ) -> RoutePlan {
        RoutePlan::Discard
    }
}

// ---------------------------------------------------------------------------
// FaceRestrictor
// ---------------------------------------------------------------------------

/// Limits which faces the conduit connects through at all (structural
/// variants that only couple along an axis). Unlisted faces are cached as
/// unconnected: nothing routes to them and nothing inserts through them.
#[derive(Debug, Clone)]
pub struct FaceRestrictor {
    pub open: Vec<Direction>,
}

impl FaceRestrictor {
    pub fn along(open: Vec<Direction>) -> Self {
        Self { open }
    }
}

impl ConduitModule for FaceRestrictor {
    fn name(&self) -> &'static str {
        "face_restrictor"
    }

    fn connects(&self, direction: Direction) -> bool {
        self.open.contains(&direction)
    }
}

// ===========================================================================
// Tests
// ===========================================================================
