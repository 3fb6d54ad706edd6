//! The boundary to everything outside the pipe network.
//!
//! Block placement, inventories, free-entity spawning, and signal state are
//! independent subsystems; the engine reaches them only through this trait.
//! A failed or absent collaborator simply looks like `ConnectionKind::None`
//! or a zero-acceptance insert — never an error inside the simulation.

use crate::grid::{Direction, GridPos};
use crate::item::Payload;
use crate::topology::ConnectionKind;

/// World collaborator interface consumed by [`PipeNetwork`](crate::engine::PipeNetwork).
///
/// `position` arguments are always the cell being talked about (the terminal
/// cell for inventory calls, the node cell for drops and signal queries).
pub trait PipeWorld {
    /// Classify what occupies the cell one step from `position` in
    /// `direction`, ignoring conduits (the network resolves pipe-to-pipe
    /// connectivity from its own arena). Return
    /// [`ConnectionKind::Inventory`] for item-accepting terminals and
    /// [`ConnectionKind::None`] otherwise.
    fn classify_neighbor(&self, position: GridPos, direction: Direction) -> ConnectionKind;

    /// Offer `payload` to the terminal at `position`, arriving from `from`
    /// (the terminal-side face). Returns the quantity accepted, which may be
    /// anywhere in `0..=payload.quantity` under the terminal's own
    /// slot-acceptance rules.
    fn try_insert_inventory(&mut self, position: GridPos, payload: &Payload, from: Direction)
    -> u32;

    /// Pull up to `max_quantity` units out of the terminal at `position`
    /// through its `from` face. Returns `None` when nothing can be
    /// extracted.
    fn try_extract(
        &mut self,
        position: GridPos,
        from: Direction,
        max_quantity: u32,
    ) -> Option<Payload>;

    /// Materialize a payload as a free entity at `position`. Called for
    /// every Drop outcome and for undeliverable remainders.
    fn spawn_free_entity(&mut self, position: GridPos, payload: Payload);

    /// Whether a control signal is present at `position`. Signal-gated
    /// modules (boost conduits) consult this; the default is unpowered.
    fn has_signal(&self, _position: GridPos) -> bool {
        false
    }
}
