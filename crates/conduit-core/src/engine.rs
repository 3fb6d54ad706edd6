//! The network orchestrator: owns the node arena and runs the five-phase
//! step pipeline.
//!
//! # Architecture
//!
//! The `PipeNetwork` owns:
//! - A node arena ([`SlotMap`]) plus a position index (`BTreeMap`) that
//!   fixes the deterministic sweep order
//! - The frozen [`ConduitSet`] of types (module bundles)
//! - A [`SimState`] (step counter) and a [`SimSide`]
//! - An [`EventBus`] and a [`SyncTracker`] for mirror replication
//!
//! # Five-Phase Step
//!
//! Each `step()` runs, against a [`PipeWorld`]:
//! 1. **Mutations** -- apply queued place/remove requests
//! 2. **Topology** -- rebuild every connection cache; fire
//!    connections-changed hooks and module ticks
//! 3. **Advance** -- move items, make midpoint routing decisions
//! 4. **Transfer** -- hand finished items to neighbor pipes and terminals
//! 5. **Bookkeeping** -- bump the step counter, recompute the state hash
//!
//! All mutation of a node happens inside that node's own phase slice or via
//! its insertion routine, which a neighbor's transfer invokes synchronously
//! — the simulation is single-threaded and cooperative.

use crate::dirty::SyncTracker;
use crate::event::{Event, EventBus};
use crate::fixed::{BASE_MAX_SPEED, Fixed64, ROUTE_DECISION_POINT};
use crate::grid::{Direction, GridPos};
use crate::id::{ConduitTypeId, NodeId};
use crate::item::{Payload, TravelingItem};
use crate::module::{Behavior, ConduitSet, ModuleContext};
use crate::node::PipeNode;
use crate::route::RoutePlan;
use crate::router::{route_seed, select};
use crate::sim::{SimSide, SimState, StateHash};
use crate::topology::{ConnectionCache, ConnectionKind};
use crate::world::PipeWorld;
use slotmap::SlotMap;
use std::collections::BTreeMap;

// ---------------------------------------------------------------------------
// Queued mutations
// ---------------------------------------------------------------------------

/// A topology mutation to be applied at the next step boundary.
#[derive(Debug, Clone)]
enum Mutation {
    Place {
        position: GridPos,
        conduit_type: ConduitTypeId,
    },
    Remove {
        position: GridPos,
    },
}

/// Result of applying queued mutations.
#[derive(Debug, Default)]
pub struct MutationResult {
    pub placed: Vec<(GridPos, NodeId)>,
    pub removed: Vec<GridPos>,
    /// Place requests refused (cell occupied or unknown conduit type) and
    /// remove requests for empty cells.
    pub rejected: Vec<GridPos>,
}

// ---------------------------------------------------------------------------
// Insert outcome
// ---------------------------------------------------------------------------

/// The result of offering a payload to a node. Never an error: the caller
/// owns whatever was rejected (hold it or drop it).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InsertOutcome {
    pub accepted: u32,
    pub rejected: u32,
}

impl InsertOutcome {
    fn refused(quantity: u32) -> Self {
        Self {
            accepted: 0,
            rejected: quantity,
        }
    }
}

// ---------------------------------------------------------------------------
// PipeNetwork
// ---------------------------------------------------------------------------

/// One independently-ticking copy of the conduit network.
#[derive(Debug)]
pub struct PipeNetwork {
    /// The frozen conduit type registry.
    pub(crate) types: ConduitSet,

    /// Which copy this is; controls handoff thresholds and drop spawning.
    pub(crate) side: SimSide,

    /// Step counter.
    pub sim_state: SimState,

    /// Buffered simulation events.
    pub event_bus: EventBus,

    /// Node arena.
    pub(crate) nodes: SlotMap<NodeId, PipeNode>,

    /// Position index; its ascending order is the deterministic sweep order.
    pub(crate) index: BTreeMap<GridPos, NodeId>,

    /// Nodes with observable changes pending mirror replication.
    pub(crate) sync: SyncTracker,

    /// Queued topology mutations.
    mutations: Vec<Mutation>,

    /// The most recently computed state hash.
    pub(crate) last_state_hash: u64,
}

impl PipeNetwork {
    pub fn new(types: ConduitSet, side: SimSide) -> Self {
        Self {
            types,
            side,
            sim_state: SimState::new(),
            event_bus: EventBus::default(),
            nodes: SlotMap::with_key(),
            index: BTreeMap::new(),
            sync: SyncTracker::new(),
            mutations: Vec::new(),
            last_state_hash: 0,
        }
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn side(&self) -> SimSide {
        self.side
    }

    pub fn types(&self) -> &ConduitSet {
        &self.types
    }

    pub fn node_count(&self) -> usize {
        self.index.len()
    }

    pub fn node_at(&self, position: GridPos) -> Option<&PipeNode> {
        self.index.get(&position).map(|id| &self.nodes[*id])
    }

    /// Occupied positions in sweep order.
    pub fn positions(&self) -> impl Iterator<Item = GridPos> + '_ {
        self.index.keys().copied()
    }

    /// Redstone-style congestion signal of the node at `position`.
    pub fn comparator_output(&self, position: GridPos) -> Option<u8> {
        self.node_at(position).map(PipeNode::comparator_output)
    }

    /// The state hash computed at the end of the last step.
    pub fn last_state_hash(&self) -> u64 {
        self.last_state_hash
    }

    /// Hash every piece of observable state: positions, topology masks,
    /// items, module state, and the step counter. Two copies in agreement
    /// hash identically.
    pub fn state_hash(&self) -> u64 {
        let mut hash = StateHash::new();
        hash.write_u64(self.sim_state.step);
        for (position, id) in &self.index {
            let node = &self.nodes[*id];
            hash.write_i32(position.x);
            hash.write_i32(position.y);
            hash.write_i32(position.z);
            hash.write_u32(node.conduit_type.0);
            hash.write_u16(node.connections_mask);
            hash.write_u32(node.items.len() as u32);
            for item in &node.items {
                hash.write_u32(item.payload.item_type.0);
                hash.write_u32(item.payload.quantity);
                hash.write_fixed64(item.progress);
                hash.write_fixed64(item.speed);
                hash.write_u32(item.direction.index() as u32);
                hash.write_u32(item.routed as u32);
            }
        }
        hash.finish()
    }

    // -----------------------------------------------------------------------
    // Topology mutations
    // -----------------------------------------------------------------------

    /// Queue a conduit placement. Applied at the next step boundary (or by
    /// an explicit [`apply_mutations`](Self::apply_mutations) call).
    pub fn queue_place(&mut self, position: GridPos, conduit_type: ConduitTypeId) {
        self.mutations.push(Mutation::Place {
            position,
            conduit_type,
        });
    }

    /// Queue a conduit removal. The node's items are converted to dropped
    /// world entities when the mutation applies.
    pub fn queue_remove(&mut self, position: GridPos) {
        self.mutations.push(Mutation::Remove { position });
    }

    /// Apply all queued mutations atomically.
    pub fn apply_mutations(&mut self, world: &mut dyn PipeWorld) -> MutationResult {
        let mut result = MutationResult::default();
        let step = self.sim_state.step;
        for mutation in std::mem::take(&mut self.mutations) {
            match mutation {
                Mutation::Place {
                    position,
                    conduit_type,
                } => {
                    if self.index.contains_key(&position) || self.types.get(conduit_type).is_none()
                    {
                        result.rejected.push(position);
                        continue;
                    }
                    let id = self.nodes.insert(PipeNode::new(position, conduit_type));
                    self.index.insert(position, id);
                    self.sync.mark(position);
                    self.event_bus.record(Event::NodePlaced { position, step });
                    result.placed.push((position, id));
                }
                Mutation::Remove { position } => {
                    let Some(id) = self.index.remove(&position) else {
                        result.rejected.push(position);
                        continue;
                    };
                    let node = self.nodes.remove(id).expect("index and arena in sync");
                    for item in node.items {
                        if self.side.spawns_drops() {
                            self.event_bus.record(Event::ItemDropped {
                                position,
                                item_type: item.payload.item_type,
                                quantity: item.payload.quantity,
                                step,
                            });
                            world.spawn_free_entity(position, item.payload);
                        }
                    }
                    self.event_bus.record(Event::NodeRemoved { position, step });
                    result.removed.push(position);
                }
            }
        }
        result
    }

    // -----------------------------------------------------------------------
    // Ingress
    // -----------------------------------------------------------------------

    /// Offer a payload to the node at `position`, arriving through its
    /// `from` face. Subject to capacity, topology, and module acceptance.
    /// The public entry point for external producers; neighbor handoff
    /// goes through the same routine internally.
    pub fn insert(
        &mut self,
        world: &mut dyn PipeWorld,
        position: GridPos,
        from: Direction,
        payload: Payload,
    ) -> InsertOutcome {
        self.insert_item(world, position, from, payload, BASE_MAX_SPEED, false)
    }

    /// Insert bypassing topology and module checks — the entry point for
    /// non-conduit producers. Capacity still binds; the rejected remainder
    /// stays with the caller.
    pub fn force_insert(
        &mut self,
        world: &mut dyn PipeWorld,
        position: GridPos,
        from: Direction,
        payload: Payload,
    ) -> InsertOutcome {
        self.insert_item(world, position, from, payload, BASE_MAX_SPEED, true)
    }

    /// The single mutation entry point for item ingress.
    fn insert_item(
        &mut self,
        world: &mut dyn PipeWorld,
        position: GridPos,
        from: Direction,
        payload: Payload,
        speed: Fixed64,
        forced: bool,
    ) -> InsertOutcome {
        let quantity = payload.quantity;
        let step = self.sim_state.step;
        let side = self.side;

        let Some(&id) = self.index.get(&position) else {
            return InsertOutcome::refused(quantity);
        };
        let Some(ty) = self.types.get(self.nodes[id].conduit_type) else {
            return InsertOutcome::refused(quantity);
        };
        let node = &mut self.nodes[id];

        if !forced {
            // Topology: pipes always may push in; terminals only when a
            // module opens inventory ingress.
            let permitted = match node.connections.kind(from) {
                ConnectionKind::Pipe => true,
                ConnectionKind::Inventory => {
                    ty.modules.iter().any(|m| m.permits_inventory_ingress())
                }
                ConnectionKind::None => false,
            };
            if !permitted {
                self.event_bus.record(Event::InsertRejected {
                    position,
                    from,
                    quantity,
                    step,
                });
                return InsertOutcome::refused(quantity);
            }
        }

        let free = node.free_capacity();
        let PipeNode {
            items,
            connections,
            module_state,
            ..
        } = node;

        if !forced {
            let mut spawned = Vec::new();
            let ctx = ModuleContext {
                position,
                step,
                side,
                free_capacity: free,
                connections,
                state: module_state,
                world: &mut *world,
                spawned: &mut spawned,
            };
            if !ty.modules.iter().all(|m| m.can_accept(&ctx, from, &payload)) {
                drop(ctx);
                self.event_bus.record(Event::InsertRejected {
                    position,
                    from,
                    quantity,
                    step,
                });
                return InsertOutcome::refused(quantity);
            }
        }

        let accepted = quantity.min(free);
        if accepted == 0 {
            self.event_bus.record(Event::InsertRejected {
                position,
                from,
                quantity,
                step,
            });
            return InsertOutcome::refused(quantity);
        }

        let mut payload = payload;
        payload.quantity = accepted;
        items.push(TravelingItem::with_speed(payload, from.opposite(), speed));
        self.sync.mark(position);

        InsertOutcome {
            accepted,
            rejected: quantity - accepted,
        }
    }

    // -----------------------------------------------------------------------
    // The step pipeline
    // -----------------------------------------------------------------------

    /// Advance the whole network by one step.
    pub fn step(&mut self, world: &mut dyn PipeWorld) {
        // Phase 1: mutations.
        self.apply_mutations(world);

        let sweep: Vec<(GridPos, NodeId)> = self.index.iter().map(|(p, id)| (*p, *id)).collect();

        // Phase 2: topology refresh + module ticks.
        for &(position, id) in &sweep {
            self.refresh_topology_and_tick(world, position, id);
        }

        // Phase 3: physics + routing.
        let mut transfers: Vec<(GridPos, TravelingItem)> = Vec::new();
        for &(position, id) in &sweep {
            self.advance_node(world, position, id, &mut transfers);
        }

        // Phase 4: segment-end transfer (authoritative only; the mirror
        // culls silently in phase 3).
        for (from, item) in transfers {
            self.transfer(world, from, item);
        }

        // Phase 5: bookkeeping.
        self.sim_state.step += 1;
        self.last_state_hash = self.state_hash();
    }

    /// Rebuild one node's connection cache, fire the connections-changed
    /// hook on change, then run module ticks. Runs before any item
    /// processing so same-step routing already sees the new topology.
    fn refresh_topology_and_tick(
        &mut self,
        world: &mut dyn PipeWorld,
        position: GridPos,
        id: NodeId,
    ) {
        let step = self.sim_state.step;
        let side = self.side;
        let Some(ty) = self.types.get(self.nodes[id].conduit_type) else {
            return;
        };

        // Classify all six directions from live state. A direction refused
        // by any module on either endpoint stays unconnected.
        let mut cache = ConnectionCache::new();
        for dir in Direction::ALL {
            if !ty.modules.iter().all(|m| m.connects(dir)) {
                continue;
            }
            let neighbor = position.neighbor(dir);
            let kind = if let Some(&nid) = self.index.get(&neighbor) {
                let back_open = self
                    .types
                    .get(self.nodes[nid].conduit_type)
                    .map(|t| t.modules.iter().all(|m| m.connects(dir.opposite())))
                    .unwrap_or(false);
                if back_open {
                    ConnectionKind::Pipe
                } else {
                    ConnectionKind::None
                }
            } else {
                world.classify_neighbor(position, dir)
            };
            cache.set(dir, kind);
        }

        let node = &mut self.nodes[id];
        let mask = cache.mask();
        let changed = mask != node.connections_mask;
        node.connections = cache;
        node.connections_mask = mask;

        let free = node.free_capacity();
        let mut spawned = Vec::new();
        {
            let PipeNode {
                connections,
                module_state,
                ..
            } = node;
            let mut ctx = ModuleContext {
                position,
                step,
                side,
                free_capacity: free,
                connections,
                state: module_state,
                world: &mut *world,
                spawned: &mut spawned,
            };
            if changed {
                let open = ctx.connections.open_directions();
                for module in &ty.modules {
                    module.on_connections_changed(&mut ctx, &open);
                }
            }
            for module in &ty.modules {
                module.on_tick(&mut ctx);
            }
        }

        if changed {
            self.event_bus.record(Event::ConnectionsChanged {
                position,
                mask,
                step,
            });
            self.sync.mark(position);
        }

        self.absorb_spawned(world, position, id, spawned);
    }

    /// Fold module-injected items (extraction output) into the node.
    /// Capacity binds; an over-eager module's excess spills to the world
    /// instead of vanishing or overfilling the node.
    fn absorb_spawned(
        &mut self,
        world: &mut dyn PipeWorld,
        position: GridPos,
        id: NodeId,
        spawned: Vec<TravelingItem>,
    ) {
        if spawned.is_empty() {
            return;
        }
        let side = self.side;
        let node = &mut self.nodes[id];
        for mut item in spawned {
            let take = node.acceptable_quantity(item.payload.quantity);
            if take == 0 {
                if side.spawns_drops() {
                    world.spawn_free_entity(position, item.payload);
                }
                continue;
            }
            let excess = item.payload.quantity - take;
            if excess > 0 {
                if let Some(spill) = item.payload.split_off(excess) {
                    if side.spawns_drops() {
                        world.spawn_free_entity(position, spill);
                    }
                }
            }
            node.items.push(item);
            self.sync.mark(position);
        }
    }

    /// Advance every item of one node and resolve midpoint routing. Items
    /// that finished the segment are moved into `transfers` (authoritative)
    /// or culled (mirror).
    fn advance_node(
        &mut self,
        world: &mut dyn PipeWorld,
        position: GridPos,
        id: NodeId,
        transfers: &mut Vec<(GridPos, TravelingItem)>,
    ) {
        let step = self.sim_state.step;
        let side = self.side;
        let Some(ty) = self.types.get(self.nodes[id].conduit_type) else {
            return;
        };
        let node = &mut self.nodes[id];
        let free = node.free_capacity();
        let removal = side.removal_threshold();

        let PipeNode {
            items,
            connections,
            module_state,
            ..
        } = node;

        let mut spawned = Vec::new();
        let mut ctx = ModuleContext {
            position,
            step,
            side,
            free_capacity: free,
            connections,
            state: module_state,
            world: &mut *world,
            spawned: &mut spawned,
        };
        let behavior = Behavior::aggregate(&ty.modules, &ctx);

        // Split results are parked here so they are not advanced twice in
        // the same sweep.
        let mut split_in: Vec<TravelingItem> = Vec::new();
        let mut changed = false;

        let mut i = 0;
        while i < items.len() {
            items[i].advance(
                behavior.max_speed,
                behavior.acceleration,
                behavior.drag,
                behavior.can_accelerate,
            );

            // Exactly one routing decision per traversal, at the first
            // midpoint crossing.
            if !items[i].routed && items[i].progress >= ROUTE_DECISION_POINT {
                let arrival = items[i].direction;
                let entry_face = arrival.opposite();
                let candidates: Vec<Direction> = Direction::ALL
                    .into_iter()
                    .filter(|d| {
                        *d != entry_face && ctx.connections.kind(*d) != ConnectionKind::None
                    })
                    .collect();
                let default = if candidates.is_empty() {
                    RoutePlan::Drop
                } else {
                    RoutePlan::Reroute(candidates.clone())
                };

                let mut plan = RoutePlan::Pass;
                for module in &ty.modules {
                    plan = module.route(&mut ctx, &items[i], &candidates);
                    if plan != RoutePlan::Pass {
                        break;
                    }
                }

                match plan.normalize(default) {
                    RoutePlan::Pass => unreachable!("normalize never yields Pass"),
                    RoutePlan::Drop => {
                        let item = items.remove(i);
                        self.event_bus.record(Event::ItemDropped {
                            position,
                            item_type: item.payload.item_type,
                            quantity: item.payload.quantity,
                            step,
                        });
                        if side.spawns_drops() {
                            ctx.world.spawn_free_entity(position, item.payload);
                        }
                        changed = true;
                        continue;
                    }
                    RoutePlan::Discard => {
                        let item = items.remove(i);
                        self.event_bus.record(Event::ItemDiscarded {
                            position,
                            item_type: item.payload.item_type,
                            quantity: item.payload.quantity,
                            step,
                        });
                        changed = true;
                        continue;
                    }
                    RoutePlan::Reroute(set) => {
                        let chosen = select(route_seed(position, step, arrival), &set)
                            .expect("normalized reroute set is non-empty");
                        items[i].direction = chosen;
                        items[i].routed = true;
                        self.event_bus.record(Event::ItemRouted {
                            position,
                            chosen,
                            step,
                        });
                        changed = true;
                    }
                    RoutePlan::Split(list) => {
                        if list.len() == 1 && list[0] == items[i] {
                            // A plain confirmation: the single returned item
                            // is the input; it continues straight.
                            items[i].routed = true;
                        } else {
                            let original = items.remove(i);
                            self.event_bus.record(Event::ItemSplit {
                                position,
                                pieces: list.len() as u32,
                                step,
                            });
                            for mut piece in list {
                                piece.progress = original.progress;
                                piece.speed = original.speed;
                                piece.routed = true;
                                split_in.push(piece);
                            }
                            changed = true;
                            continue;
                        }
                        changed = true;
                    }
                }
            }

            if items[i].progress >= removal {
                let item = items.remove(i);
                if side == SimSide::Authoritative {
                    transfers.push((position, item));
                }
                changed = true;
                continue;
            }

            i += 1;
        }

        for piece in split_in {
            if piece.progress >= removal {
                if side == SimSide::Authoritative {
                    transfers.push((position, piece));
                }
            } else {
                items.push(piece);
            }
        }

        if changed {
            self.sync.mark(position);
        }

        self.absorb_spawned(world, position, id, spawned);
    }

    /// Hand a finished item to whatever sits past the segment end in its
    /// direction of travel: a neighbor pipe (subject to that node's own
    /// acceptance rules), a terminal, or — failing both — the ground.
    fn transfer(&mut self, world: &mut dyn PipeWorld, from: GridPos, item: TravelingItem) {
        let step = self.sim_state.step;
        let target = from.neighbor(item.direction);
        let kind = self
            .node_at(from)
            .map(|n| n.connections.kind(item.direction))
            .unwrap_or(ConnectionKind::None);

        let remainder = match kind {
            ConnectionKind::Pipe => {
                let quantity = item.payload.quantity;
                let outcome = self.insert_item(
                    world,
                    target,
                    item.direction.opposite(),
                    item.payload.clone(),
                    item.speed,
                    false,
                );
                if outcome.accepted > 0 {
                    self.event_bus.record(Event::ItemHandedOff {
                        from,
                        to: target,
                        quantity: outcome.accepted,
                        step,
                    });
                }
                let mut payload = item.payload;
                payload.quantity = quantity - outcome.accepted;
                payload
            }
            ConnectionKind::Inventory => {
                let accepted =
                    world.try_insert_inventory(target, &item.payload, item.direction.opposite());
                if accepted > 0 {
                    self.event_bus.record(Event::ItemDelivered {
                        position: from,
                        into: item.direction,
                        quantity: accepted,
                        step,
                    });
                }
                let mut payload = item.payload;
                payload.quantity -= accepted;
                payload
            }
            ConnectionKind::None => item.payload,
        };

        if remainder.quantity > 0 {
            self.event_bus.record(Event::ItemDropped {
                position: from,
                item_type: remainder.item_type,
                quantity: remainder.quantity,
                step,
            });
            world.spawn_free_entity(from, remainder);
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixed::NODE_CAPACITY;
    use crate::module::{ConduitModule, ConduitSet, ConduitType};
    use crate::modules::{Extractor, Inserter, RoundRobinSplitter, VoidSink};
    use crate::test_utils::*;

    fn pos(x: i32, y: i32, z: i32) -> GridPos {
        GridPos::new(x, y, z)
    }

    // -----------------------------------------------------------------------
    // Test 1: place and remove through the mutation queue
    // -----------------------------------------------------------------------
    #[test]
    fn place_and_remove_nodes() {
        let mut network = basic_network();
        let mut world = GridWorld::new();
        let duct = network.types().by_name("duct").unwrap().0;

        network.queue_place(pos(0, 0, 0), duct);
        network.queue_place(pos(1, 0, 0), duct);
        // Duplicate cell is rejected.
        network.queue_place(pos(0, 0, 0), duct);
        let result = network.apply_mutations(&mut world);

        assert_eq!(result.placed.len(), 2);
        assert_eq!(result.rejected, vec![pos(0, 0, 0)]);
        assert_eq!(network.node_count(), 2);

        network.queue_remove(pos(1, 0, 0));
        let result = network.apply_mutations(&mut world);
        assert_eq!(result.removed, vec![pos(1, 0, 0)]);
        assert_eq!(network.node_count(), 1);
    }

    // -----------------------------------------------------------------------
    // Test 2: removing a node drops its items on the ground
    // -----------------------------------------------------------------------
    #[test]
    fn removal_drops_contained_items() {
        let mut network = basic_network();
        let mut world = GridWorld::new();
        place_line(&mut network, &mut world, pos(0, 0, 0), 2);
        network.step(&mut world);

        let outcome = network.insert(
            &mut world,
            pos(1, 0, 0),
            Direction::NegX,
            payload(ingot(), 12),
        );
        assert_eq!(outcome.accepted, 12);

        network.queue_remove(pos(1, 0, 0));
        network.apply_mutations(&mut world);

        assert_eq!(world.dropped_total(), 12);
        assert_eq!(network.node_at(pos(1, 0, 0)), None);
    }

    // -----------------------------------------------------------------------
    // Test 3: topology cache classifies pipes and terminals
    // -----------------------------------------------------------------------
    #[test]
    fn topology_cache_reflects_neighbors() {
        let mut network = basic_network();
        let mut world = GridWorld::new();
        world.add_bin(pos(0, 1, 0), 100);
        place_line(&mut network, &mut world, pos(0, 0, 0), 2);

        network.step(&mut world);

        let node = network.node_at(pos(0, 0, 0)).unwrap();
        assert_eq!(
            node.connections.kind(Direction::PosX),
            ConnectionKind::Pipe
        );
        assert_eq!(
            node.connections.kind(Direction::PosY),
            ConnectionKind::Inventory
        );
        assert_eq!(
            node.connections.kind(Direction::NegX),
            ConnectionKind::None
        );
    }

    // -----------------------------------------------------------------------
    // Test 4: over-capacity insertion accepts exactly the free space
    // -----------------------------------------------------------------------
    #[test]
    fn insertion_respects_capacity() {
        let mut network = basic_network();
        let mut world = GridWorld::new();
        place_line(&mut network, &mut world, pos(0, 0, 0), 2);
        network.step(&mut world);

        // Fill to capacity - 5.
        let outcome = network.force_insert(
            &mut world,
            pos(0, 0, 0),
            Direction::NegX,
            payload(ingot(), NODE_CAPACITY - 5),
        );
        assert_eq!(outcome.accepted, NODE_CAPACITY - 5);

        // A 10-unit payload yields 5 accepted, 5 rejected.
        let outcome = network.force_insert(
            &mut world,
            pos(0, 0, 0),
            Direction::NegX,
            payload(ingot(), 10),
        );
        assert_eq!(outcome, InsertOutcome { accepted: 5, rejected: 5 });

        // Nothing fits any more.
        let outcome =
            network.force_insert(&mut world, pos(0, 0, 0), Direction::NegX, payload(ingot(), 1));
        assert_eq!(outcome, InsertOutcome { accepted: 0, rejected: 1 });
        assert_eq!(
            network.node_at(pos(0, 0, 0)).unwrap().total_quantity(),
            NODE_CAPACITY
        );
    }

    // -----------------------------------------------------------------------
    // Test 5: plain insert refuses unconnected and terminal directions
    // -----------------------------------------------------------------------
    #[test]
    fn insert_topology_rules() {
        let mut set = ConduitSet::new();
        set.register(ConduitType::new("duct"));
        set.register(ConduitType::new("intake").with_module(Box::new(Inserter::accepting(None))));
        let mut network = PipeNetwork::new(set, SimSide::Authoritative);
        let mut world = GridWorld::new();
        world.add_bin(pos(0, 1, 0), 100);
        world.add_bin(pos(1, 1, 0), 100);

        let duct = network.types().by_name("duct").unwrap().0;
        let intake = network.types().by_name("intake").unwrap().0;
        network.queue_place(pos(0, 0, 0), duct);
        network.queue_place(pos(1, 0, 0), intake);
        network.apply_mutations(&mut world);
        network.step(&mut world);

        // No connection at all on -X: refused.
        let refused = network.insert(
            &mut world,
            pos(0, 0, 0),
            Direction::NegX,
            payload(ingot(), 1),
        );
        assert_eq!(refused.accepted, 0);

        // Terminal-side ingress needs an inserter module.
        let refused = network.insert(
            &mut world,
            pos(0, 0, 0),
            Direction::PosY,
            payload(ingot(), 1),
        );
        assert_eq!(refused.accepted, 0);
        let accepted = network.insert(
            &mut world,
            pos(1, 0, 0),
            Direction::PosY,
            payload(ingot(), 1),
        );
        assert_eq!(accepted.accepted, 1);

        // Forced insertion bypasses both.
        let forced = network.force_insert(
            &mut world,
            pos(0, 0, 0),
            Direction::NegX,
            payload(ingot(), 1),
        );
        assert_eq!(forced.accepted, 1);
    }

    // -----------------------------------------------------------------------
    // Test 6: straight-through segment routes to the only exit and hands off
    // -----------------------------------------------------------------------
    #[test]
    fn straight_through_segment() {
        let mut network = basic_network();
        let mut world = GridWorld::new();
        place_line(&mut network, &mut world, pos(0, 0, 0), 3);
        network.step(&mut world);

        // Nothing sits at x=-1, so a producer-style forced insert feeds the
        // line from its open end.
        network.force_insert(
            &mut world,
            pos(0, 0, 0),
            Direction::NegX,
            payload(ingot(), 1),
        );

        // Run until the item must have crossed into the second segment.
        step_n(&mut network, &mut world, 12);

        let first = network.node_at(pos(0, 0, 0)).unwrap();
        let second = network.node_at(pos(1, 0, 0)).unwrap();
        assert_eq!(first.items.len(), 0, "item must have left the first node");
        assert_eq!(second.items.len(), 1, "item must be in the second node");
        assert_eq!(second.items[0].direction, Direction::PosX);
        assert_eq!(world.dropped_total(), 0);
    }

    // -----------------------------------------------------------------------
    // Test 7: dead end drops at the routing point
    // -----------------------------------------------------------------------
    #[test]
    fn dead_end_drops_item() {
        let mut network = basic_network();
        let mut world = GridWorld::new();
        let duct = network.types().by_name("duct").unwrap().0;
        network.queue_place(pos(0, 0, 0), duct);
        network.apply_mutations(&mut world);
        network.step(&mut world);

        network.force_insert(
            &mut world,
            pos(0, 0, 0),
            Direction::NegX,
            payload(ingot(), 3),
        );
        step_n(&mut network, &mut world, 6);

        assert_eq!(network.node_at(pos(0, 0, 0)).unwrap().items.len(), 0);
        assert_eq!(world.dropped.len(), 1);
        assert_eq!(world.dropped_total(), 3);
        assert_eq!(world.dropped[0].0, pos(0, 0, 0));
    }

    // -----------------------------------------------------------------------
    // Test 8: the routing decision runs exactly once per traversal
    // -----------------------------------------------------------------------
    #[derive(Debug)]
    struct RouteCounter;
    impl ConduitModule for RouteCounter {
        fn name(&self) -> &'static str {
            "route_counter"
        }
        fn route(
            &self,
            ctx: &mut ModuleContext<'_>,
            _item: &TravelingItem,
            _candidates: &[Direction],
        ) -> RoutePlan {
            let count = ctx.state.load_u32("route_counter").unwrap_or(0);
            ctx.state.store_u32("route_counter", count + 1);
            RoutePlan::Pass
        }
    }

    #[test]
    fn single_routing_decision_per_traversal() {
        let mut set = ConduitSet::new();
        set.register(ConduitType::new("counted").with_module(Box::new(RouteCounter)));
        let mut network = PipeNetwork::new(set, SimSide::Authoritative);
        let mut world = GridWorld::new();
        let counted = network.types().by_name("counted").unwrap().0;
        for x in 0..2 {
            network.queue_place(pos(x, 0, 0), counted);
        }
        network.apply_mutations(&mut world);
        network.step(&mut world);

        network.force_insert(
            &mut world,
            pos(0, 0, 0),
            Direction::NegX,
            payload(ingot(), 1),
        );
        // A full traversal of the first segment plus some slack.
        step_n(&mut network, &mut world, 12);

        let first = network.node_at(pos(0, 0, 0)).unwrap();
        assert_eq!(first.module_state.load_u32("route_counter"), Some(1));
    }

    // -----------------------------------------------------------------------
    // Test 9: delivery into a terminal at the segment end
    // -----------------------------------------------------------------------
    #[test]
    fn delivery_into_terminal() {
        let mut network = basic_network();
        let mut world = GridWorld::new();
        let duct = network.types().by_name("duct").unwrap().0;
        network.queue_place(pos(0, 0, 0), duct);
        network.apply_mutations(&mut world);
        world.add_bin(pos(1, 0, 0), 100);
        network.step(&mut world);

        network.force_insert(
            &mut world,
            pos(0, 0, 0),
            Direction::NegX,
            payload(cog(), 7),
        );
        step_n(&mut network, &mut world, 12);

        assert_eq!(world.bin_quantity(pos(1, 0, 0), cog()), 7);
        assert_eq!(world.dropped_total(), 0);
        assert_eq!(network.node_at(pos(0, 0, 0)).unwrap().items.len(), 0);
    }

    // -----------------------------------------------------------------------
    // Test 10: partial terminal acceptance drops the remainder
    // -----------------------------------------------------------------------
    #[test]
    fn partial_delivery_drops_remainder() {
        let mut network = basic_network();
        let mut world = GridWorld::new();
        let duct = network.types().by_name("duct").unwrap().0;
        network.queue_place(pos(0, 0, 0), duct);
        network.apply_mutations(&mut world);
        world.add_bin(pos(1, 0, 0), 4);
        network.step(&mut world);

        network.force_insert(
            &mut world,
            pos(0, 0, 0),
            Direction::NegX,
            payload(cog(), 10),
        );
        step_n(&mut network, &mut world, 12);

        assert_eq!(world.bin_quantity(pos(1, 0, 0), cog()), 4);
        assert_eq!(world.dropped_total(), 6);
    }

    // -----------------------------------------------------------------------
    // Test 11: void sink discards without spawning anything
    // -----------------------------------------------------------------------
    #[test]
    fn void_sink_discards_silently() {
        let mut set = ConduitSet::new();
        set.register(ConduitType::new("void").with_module(Box::new(VoidSink)));
        let mut network = PipeNetwork::new(set, SimSide::Authoritative);
        let mut world = GridWorld::new();
        let void = network.types().by_name("void").unwrap().0;
        network.queue_place(pos(0, 0, 0), void);
        network.apply_mutations(&mut world);
        network.step(&mut world);

        network.force_insert(
            &mut world,
            pos(0, 0, 0),
            Direction::NegX,
            payload(ingot(), 5),
        );
        step_n(&mut network, &mut world, 6);

        assert_eq!(network.node_at(pos(0, 0, 0)).unwrap().items.len(), 0);
        assert_eq!(world.dropped_total(), 0);
    }

    // -----------------------------------------------------------------------
    // Test 12: extractor conduit pulls from a bin and ships items out
    // -----------------------------------------------------------------------
    #[test]
    fn extractor_conduit_end_to_end() {
        let mut set = ConduitSet::new();
        set.register(ConduitType::new("duct"));
        set.register(ConduitType::new("intake").with_module(Box::new(Extractor {
            interval: 1,
            stack_size: 4,
        })));
        let mut network = PipeNetwork::new(set, SimSide::Authoritative);
        let mut world = GridWorld::new();

        // bin <- intake -> duct -> duct ... and a sink bin at the far end.
        world.add_bin(pos(-1, 0, 0), 1000);
        world.stock(pos(-1, 0, 0), ingot(), 40);
        world.add_bin(pos(3, 0, 0), 1000);

        let duct = network.types().by_name("duct").unwrap().0;
        let intake = network.types().by_name("intake").unwrap().0;
        network.queue_place(pos(0, 0, 0), intake);
        network.queue_place(pos(1, 0, 0), duct);
        network.queue_place(pos(2, 0, 0), duct);
        network.apply_mutations(&mut world);

        step_n(&mut network, &mut world, 400);

        assert_eq!(world.bin_quantity(pos(-1, 0, 0), ingot()), 0);
        assert_eq!(world.bin_quantity(pos(3, 0, 0), ingot()), 40);
        assert_eq!(world.dropped_total(), 0);
    }

    // -----------------------------------------------------------------------
    // Test 13: splitter junction spreads items across branches
    // -----------------------------------------------------------------------
    #[test]
    fn splitter_junction_spreads_items() {
        let mut set = ConduitSet::new();
        set.register(ConduitType::new("duct"));
        set.register(ConduitType::new("split").with_module(Box::new(RoundRobinSplitter)));
        let mut network = PipeNetwork::new(set, SimSide::Authoritative);
        let mut world = GridWorld::new();

        let duct = network.types().by_name("duct").unwrap().0;
        let split = network.types().by_name("split").unwrap().0;

        // A cross: splitter at origin with three outgoing branches, each
        // ending in a bin.
        network.queue_place(pos(0, 0, 0), split);
        network.queue_place(pos(1, 0, 0), duct);
        network.queue_place(pos(0, 1, 0), duct);
        network.queue_place(pos(0, 0, 1), duct);
        network.apply_mutations(&mut world);
        world.add_bin(pos(2, 0, 0), 1000);
        world.add_bin(pos(0, 2, 0), 1000);
        world.add_bin(pos(0, 0, 2), 1000);

        network.step(&mut world);

        // Feed ten single-unit items, pacing them so each is routed before
        // the next enters.
        for _ in 0..10 {
            network.force_insert(
                &mut world,
                pos(0, 0, 0),
                Direction::NegX,
                payload(ingot(), 1),
            );
            step_n(&mut network, &mut world, 8);
        }
        // Let every in-flight item finish both segments.
        step_n(&mut network, &mut world, 300);

        let mut counts = [
            world.bin_total(pos(2, 0, 0)),
            world.bin_total(pos(0, 2, 0)),
            world.bin_total(pos(0, 0, 2)),
        ];
        counts.sort_unstable();
        assert_eq!(counts, [3, 3, 4], "round robin spreads 10 items 4/3/3");
        assert_eq!(world.dropped_total(), 0);
    }

    // -----------------------------------------------------------------------
    // Test 14: comparator output tracks congestion
    // -----------------------------------------------------------------------
    #[test]
    fn comparator_reflects_fill() {
        let mut network = basic_network();
        let mut world = GridWorld::new();
        let duct = network.types().by_name("duct").unwrap().0;
        network.queue_place(pos(0, 0, 0), duct);
        network.apply_mutations(&mut world);

        assert_eq!(network.comparator_output(pos(0, 0, 0)), Some(0));
        assert_eq!(network.comparator_output(pos(9, 9, 9)), None);

        network.force_insert(
            &mut world,
            pos(0, 0, 0),
            Direction::NegX,
            payload(ingot(), NODE_CAPACITY / 2),
        );
        assert_eq!(network.comparator_output(pos(0, 0, 0)), Some(7));
    }

    // -----------------------------------------------------------------------
    // Test 15: two authoritative copies stay in lockstep
    // -----------------------------------------------------------------------
    #[test]
    fn identical_copies_stay_in_lockstep() {
        let build = || {
            let mut network = basic_network();
            let mut world = GridWorld::new();
            place_line(&mut network, &mut world, pos(0, 0, 0), 4);
            world.add_bin(pos(4, 0, 0), 1000);
            (network, world)
        };
        let (mut a, mut world_a) = build();
        let (mut b, mut world_b) = build();

        for step in 0..120u32 {
            if step % 10 == 0 {
                a.force_insert(
                    &mut world_a,
                    pos(0, 0, 0),
                    Direction::NegX,
                    payload(ingot(), 2),
                );
                b.force_insert(
                    &mut world_b,
                    pos(0, 0, 0),
                    Direction::NegX,
                    payload(ingot(), 2),
                );
            }
            a.step(&mut world_a);
            b.step(&mut world_b);
            assert_eq!(a.last_state_hash(), b.last_state_hash(), "desync at {step}");
        }
    }

    // -----------------------------------------------------------------------
    // Test 16: boosted items outrun plain ones
    // -----------------------------------------------------------------------
    #[test]
    fn boosted_line_is_faster() {
        let run = |type_name: &str| -> u32 {
            let mut network = basic_network();
            let mut world = GridWorld::new();
            let ty = network.types().by_name(type_name).unwrap().0;
            for x in 0..6 {
                network.queue_place(pos(x, 0, 0), ty);
            }
            network.apply_mutations(&mut world);
            world.add_bin(pos(6, 0, 0), 1000);
            network.step(&mut world);
            network.force_insert(
                &mut world,
                pos(0, 0, 0),
                Direction::NegX,
                payload(ingot(), 1),
            );
            let mut steps = 0;
            while world.bin_total(pos(6, 0, 0)) == 0 {
                network.step(&mut world);
                steps += 1;
                assert!(steps < 1000, "item never arrived");
            }
            steps
        };

        let plain = run("duct");
        let boosted = run("boost_duct");
        assert!(
            boosted < plain,
            "boost line ({boosted} steps) must beat plain line ({plain} steps)"
        );
    }
}
