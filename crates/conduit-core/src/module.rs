//! The module system: composable behaviors that customize a conduit type.
//!
//! A conduit type is a named, ordered list of modules. The engine never
//! branches on conduit type — it only asks the attached modules capability
//! questions (speed ceilings, routing decisions, ingress rules, topology
//! filters) and aggregates the answers with the rules in [`Behavior`].
//!
//! Modules are stateless strategy objects shared by every node of their
//! conduit type. Anything mutable and per-node lives in the owning node's
//! [`ModuleStateMap`], keyed by the module's name; a module instance holding
//! per-node data in its own fields would bleed state across the whole
//! network.

use crate::fixed::{BASE_DRAG, BASE_MAX_SPEED, Fixed64, Ticks};
use crate::grid::{Direction, GridPos};
use crate::id::ConduitTypeId;
use crate::item::{Payload, TravelingItem};
use crate::route::RoutePlan;
use crate::sim::SimSide;
use crate::topology::ConnectionCache;
use crate::world::PipeWorld;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ---------------------------------------------------------------------------
// Per-node module state
// ---------------------------------------------------------------------------

/// Namespaced per-node state blobs, one entry per module, persisted with the
/// node. Values are opaque byte blobs; the typed helpers cover the common
/// little-endian encodings.
///
/// Readers must treat a missing or short blob as "no state yet" and clamp
/// out-of-range values at the point of use — a corrupted or future-version
/// save must never crash the simulation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleStateMap {
    entries: BTreeMap<String, Vec<u8>>,
}

impl ModuleStateMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&[u8]> {
        self.entries.get(key).map(Vec::as_slice)
    }

    pub fn set(&mut self, key: &str, blob: Vec<u8>) {
        self.entries.insert(key.to_owned(), blob);
    }

    pub fn remove(&mut self, key: &str) {
        self.entries.remove(key);
    }

    /// Read a little-endian u32 blob. `None` for missing or malformed data.
    pub fn load_u32(&self, key: &str) -> Option<u32> {
        let blob = self.get(key)?;
        let bytes: [u8; 4] = blob.try_into().ok()?;
        Some(u32::from_le_bytes(bytes))
    }

    pub fn store_u32(&mut self, key: &str, value: u32) {
        self.set(key, value.to_le_bytes().to_vec());
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

// ---------------------------------------------------------------------------
// ModuleContext
// ---------------------------------------------------------------------------

/// Context handed to module hooks: where the node is, when it is, and the
/// mutable surfaces a module may touch.
pub struct ModuleContext<'a> {
    /// Grid position of the node being processed.
    pub position: GridPos,
    /// Global step counter.
    pub step: Ticks,
    /// Which simulation copy is running the hook.
    pub side: SimSide,
    /// Units of payload the node can still accept this step.
    pub free_capacity: u32,
    /// The node's current connection classification.
    pub connections: &'a ConnectionCache,
    /// The node's per-module state blobs.
    pub state: &'a mut ModuleStateMap,
    /// The world boundary (inventories, signals, free entities).
    pub world: &'a mut dyn PipeWorld,
    /// Items a hook wants injected into the node after it returns
    /// (extraction output). The engine applies capacity rules to them.
    pub spawned: &'a mut Vec<TravelingItem>,
}

// ---------------------------------------------------------------------------
// ConduitModule trait
// ---------------------------------------------------------------------------

/// A composable capability of a conduit type. All methods default to no-ops
/// or neutral answers, so a module only overrides what it customizes.
pub trait ConduitModule: std::fmt::Debug + Send + Sync {
    /// Stable name; also the key of this module's entry in the node state
    /// map, so it must be unique within a conduit type.
    fn name(&self) -> &'static str;

    /// Speed ceiling this module grants, if any. The largest ceiling among
    /// attached modules wins; [`BASE_MAX_SPEED`] applies when none report.
    fn max_speed(&self) -> Option<Fixed64> {
        None
    }

    /// Per-step speed gain this module provides in the current context
    /// (zero = not an accelerator, or boost currently unavailable).
    fn acceleration(&self, ctx: &ModuleContext<'_>) -> Fixed64 {
        let _ = ctx;
        Fixed64::ZERO
    }

    /// Drag override. The first module reporting one wins; [`BASE_DRAG`]
    /// applies when none report.
    fn drag(&self) -> Option<Fixed64> {
        None
    }

    /// Routing decision for an item at the segment midpoint. `candidates`
    /// is the topology-derived default set (open directions minus the entry
    /// face, identifier order). Return [`RoutePlan::Pass`] to defer.
    fn route(
        &self,
        ctx: &mut ModuleContext<'_>,
        item: &TravelingItem,
        candidates: &[Direction],
    ) -> RoutePlan {
        let _ = (ctx, item, candidates);
        RoutePlan::Pass
    }

    /// Whether the node may accept `payload` arriving through its `from`
    /// face. All attached modules must agree; the engine has already
    /// enforced capacity and basic topology.
    fn can_accept(&self, ctx: &ModuleContext<'_>, from: Direction, payload: &Payload) -> bool {
        let _ = (ctx, from, payload);
        true
    }

    /// Whether this conduit may connect toward `direction` at all. All
    /// attached modules must agree; a refused direction is cached as
    /// unconnected and never routed to.
    fn connects(&self, direction: Direction) -> bool {
        let _ = direction;
        true
    }

    /// Whether insertion from inventory-classified directions is permitted
    /// (machines pushing into the pipe). Off by default.
    fn permits_inventory_ingress(&self) -> bool {
        false
    }

    /// Called once per node per step, before items advance.
    fn on_tick(&self, ctx: &mut ModuleContext<'_>) {
        let _ = ctx;
    }

    /// Called when the node's connection mask changed this step, before any
    /// item is processed, so routing state (cursors, remembered exits) can
    /// be re-validated against `open` — the new connected-direction list.
    fn on_connections_changed(&self, ctx: &mut ModuleContext<'_>, open: &[Direction]) {
        let _ = (ctx, open);
    }
}

// ---------------------------------------------------------------------------
// Behavior aggregation
// ---------------------------------------------------------------------------

/// A conduit's effective physics parameters for one step, derived from its
/// attached modules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Behavior {
    pub max_speed: Fixed64,
    pub acceleration: Fixed64,
    pub drag: Fixed64,
    pub can_accelerate: bool,
}

impl Behavior {
    /// Aggregation rules:
    ///
    /// - `max_speed`: largest reported ceiling, else [`BASE_MAX_SPEED`]
    /// - `acceleration`: first module reporting nonzero, else zero
    /// - `drag`: first module overriding, else [`BASE_DRAG`]
    /// - `can_accelerate`: true iff the aggregated acceleration is nonzero
    ///
    /// "First" means attachment order — the documented precedence contract
    /// when several modules answer the same question.
    pub fn aggregate(modules: &[Box<dyn ConduitModule>], ctx: &ModuleContext<'_>) -> Behavior {
        let max_speed = modules
            .iter()
            .filter_map(|m| m.max_speed())
            .max()
            .unwrap_or(BASE_MAX_SPEED);
        let acceleration = modules
            .iter()
            .map(|m| m.acceleration(ctx))
            .find(|a| *a > Fixed64::ZERO)
            .unwrap_or(Fixed64::ZERO);
        let drag = modules
            .iter()
            .filter_map(|m| m.drag())
            .next()
            .unwrap_or(BASE_DRAG);
        Behavior {
            max_speed,
            acceleration,
            drag,
            can_accelerate: acceleration > Fixed64::ZERO,
        }
    }

    /// The base behavior of a bare conduit with no modules attached.
    pub fn base() -> Behavior {
        Behavior {
            max_speed: BASE_MAX_SPEED,
            acceleration: Fixed64::ZERO,
            drag: BASE_DRAG,
            can_accelerate: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Conduit types and the frozen registry
// ---------------------------------------------------------------------------

/// A named conduit type: an ordered bundle of modules. The order is the
/// precedence order for every first-wins aggregation rule.
#[derive(Debug)]
pub struct ConduitType {
    pub name: String,
    pub modules: Vec<Box<dyn ConduitModule>>,
}

impl ConduitType {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            modules: Vec::new(),
        }
    }

    /// Builder-style module attachment.
    pub fn with_module(mut self, module: Box<dyn ConduitModule>) -> Self {
        self.modules.push(module);
        self
    }
}

/// The immutable set of conduit types a network is built from. Registered
/// once at startup; ids are indices into registration order.
#[derive(Debug, Default)]
pub struct ConduitSet {
    types: Vec<ConduitType>,
}

impl ConduitSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, conduit_type: ConduitType) -> ConduitTypeId {
        let id = ConduitTypeId(self.types.len() as u32);
        self.types.push(conduit_type);
        id
    }

    pub fn get(&self, id: ConduitTypeId) -> Option<&ConduitType> {
        self.types.get(id.0 as usize)
    }

    pub fn by_name(&self, name: &str) -> Option<(ConduitTypeId, &ConduitType)> {
        self.types
            .iter()
            .enumerate()
            .find(|(_, t)| t.name == name)
            .map(|(i, t)| (ConduitTypeId(i as u32), t))
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

// ===========================================================================
// Tests
// ===========================================================================
