//! Shared test helpers for unit tests, integration tests, and benchmarks.
//!
//! Gated behind `#[cfg(any(test, feature = "test-utils"))]` so these helpers
//! are available to unit tests, the `tests/` suites, and benchmarks (via the
//! `test-utils` feature).

use crate::engine::PipeNetwork;
use crate::fixed::Fixed64;
use crate::grid::{Direction, GridPos};
use crate::id::ItemTypeId;
use crate::item::Payload;
use crate::module::{ConduitSet, ConduitType};
use crate::modules::{Booster, RoundRobinSplitter};
use crate::sim::SimSide;
use crate::topology::ConnectionKind;
use crate::world::PipeWorld;
use std::collections::{BTreeMap, BTreeSet};

// ===========================================================================
// Fixed-point helper
// ===========================================================================

pub fn fixed(v: f64) -> Fixed64 {
    Fixed64::from_num(v)
}

// ===========================================================================
// Item type constructors
// ===========================================================================

pub fn ingot() -> ItemTypeId {
    ItemTypeId(0)
}
pub fn cog() -> ItemTypeId {
    ItemTypeId(1)
}
pub fn dust() -> ItemTypeId {
    ItemTypeId(2)
}
pub fn crystal() -> ItemTypeId {
    ItemTypeId(3)
}

pub fn payload(item: ItemTypeId, quantity: u32) -> Payload {
    Payload::new(item, quantity)
}

// ===========================================================================
// GridWorld: a mock world collaborator
// ===========================================================================

/// A simple terminal: one pool of items with a capacity.
#[derive(Debug, Clone, Default)]
pub struct Bin {
    pub contents: BTreeMap<ItemTypeId, u32>,
    pub capacity: u32,
}

impl Bin {
    pub fn total(&self) -> u32 {
        self.contents.values().sum()
    }
}

/// In-memory world: bins at fixed cells, a dropped-entity log, and a set of
/// signal-powered cells. Pipe cells are resolved by the network itself, so
/// `classify_neighbor` only ever answers Inventory-or-nothing.
#[derive(Debug, Clone, Default)]
pub struct GridWorld {
    pub bins: BTreeMap<GridPos, Bin>,
    pub dropped: Vec<(GridPos, Payload)>,
    pub signals: BTreeSet<GridPos>,
}

impl GridWorld {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_bin(&mut self, position: GridPos, capacity: u32) {
        self.bins.insert(
            position,
            Bin {
                contents: BTreeMap::new(),
                capacity,
            },
        );
    }

    pub fn stock(&mut self, position: GridPos, item: ItemTypeId, quantity: u32) {
        let bin = self
            .bins
            .get_mut(&position)
            .expect("stocking a cell with no bin");
        *bin.contents.entry(item).or_insert(0) += quantity;
    }

    pub fn set_signal(&mut self, position: GridPos, powered: bool) {
        if powered {
            self.signals.insert(position);
        } else {
            self.signals.remove(&position);
        }
    }

    pub fn bin_quantity(&self, position: GridPos, item: ItemTypeId) -> u32 {
        self.bins
            .get(&position)
            .and_then(|b| b.contents.get(&item).copied())
            .unwrap_or(0)
    }

    pub fn bin_total(&self, position: GridPos) -> u32 {
        self.bins.get(&position).map(Bin::total).unwrap_or(0)
    }

    /// Total quantity across every dropped entity.
    pub fn dropped_total(&self) -> u32 {
        self.dropped.iter().map(|(_, p)| p.quantity).sum()
    }
}

impl PipeWorld for GridWorld {
    fn classify_neighbor(&self, position: GridPos, direction: Direction) -> ConnectionKind {
        if self.bins.contains_key(&position.neighbor(direction)) {
            ConnectionKind::Inventory
        } else {
            ConnectionKind::None
        }
    }

    fn try_insert_inventory(
        &mut self,
        position: GridPos,
        payload: &Payload,
        _from: Direction,
    ) -> u32 {
        let Some(bin) = self.bins.get_mut(&position) else {
            return 0;
        };
        let space = bin.capacity.saturating_sub(bin.total());
        let accepted = payload.quantity.min(space);
        if accepted > 0 {
            *bin.contents.entry(payload.item_type).or_insert(0) += accepted;
        }
        accepted
    }

    fn try_extract(
        &mut self,
        position: GridPos,
        _from: Direction,
        max_quantity: u32,
    ) -> Option<Payload> {
        let bin = self.bins.get_mut(&position)?;
        let (&item, &have) = bin.contents.iter().find(|&(_, &q)| q > 0)?;
        let taken = have.min(max_quantity);
        if taken == 0 {
            return None;
        }
        *bin.contents.get_mut(&item).unwrap() -= taken;
        Some(Payload::new(item, taken))
    }

    fn spawn_free_entity(&mut self, position: GridPos, payload: Payload) {
        self.dropped.push((position, payload));
    }

    fn has_signal(&self, position: GridPos) -> bool {
        self.signals.contains(&position)
    }
}

// ===========================================================================
// Conduit sets and networks
// ===========================================================================

/// A minimal conduit set: "duct" (bare), "boost_duct" (always-on booster),
/// "split_duct" (round-robin splitter).
pub fn basic_set() -> ConduitSet {
    let mut set = ConduitSet::new();
    set.register(ConduitType::new("duct"));
    set.register(ConduitType::new("boost_duct").with_module(Box::new(Booster::unconditional())));
    set.register(ConduitType::new("split_duct").with_module(Box::new(RoundRobinSplitter)));
    set
}

/// An authoritative network over [`basic_set`].
pub fn basic_network() -> PipeNetwork {
    PipeNetwork::new(basic_set(), SimSide::Authoritative)
}

/// Place a straight run of `length` "duct" nodes along +X starting at
/// `start`, applying mutations immediately.
pub fn place_line(network: &mut PipeNetwork, world: &mut GridWorld, start: GridPos, length: i32) {
    let duct = network.types().by_name("duct").expect("basic set").0;
    for i in 0..length {
        network.queue_place(GridPos::new(start.x + i, start.y, start.z), duct);
    }
    network.apply_mutations(world);
}

/// Step the network `n` times against `world`.
pub fn step_n(network: &mut PipeNetwork, world: &mut GridWorld, n: u32) {
    for _ in 0..n {
        network.step(world);
    }
}
