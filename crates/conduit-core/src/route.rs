//! The closed set of outcomes a routing decision can produce.
//!
//! Modules return a [`RoutePlan`]; the network normalizes it before
//! execution so that structurally invalid plans (empty candidate sets,
//! empty split lists) degrade to the benign outcome instead of faulting.

use crate::grid::Direction;
use crate::item::TravelingItem;

/// The decision for one item crossing a segment midpoint.
#[derive(Debug, Clone, PartialEq)]
pub enum RoutePlan {
    /// Defer to the next module, or to the topology-derived default.
    Pass,
    /// Eject the item into the world as a free entity.
    Drop,
    /// Destroy the item silently.
    Discard,
    /// Continue toward one of these candidate directions.
    Reroute(Vec<Direction>),
    /// Replace the item with this list (partial delivery, stack splitting).
    Split(Vec<TravelingItem>),
}

impl RoutePlan {
    /// Enforce the normalization invariant:
    ///
    /// - `Reroute([])` becomes `Drop`
    /// - `Split([])` becomes `Discard`
    /// - `Pass` becomes the topology-derived `default`
    ///
    /// The returned plan is never `Pass`, and any `Reroute`/`Split` it
    /// carries is non-empty (assuming `default` itself is normalized, which
    /// the network guarantees by constructing it as `Reroute(non-empty)` or
    /// `Drop`).
    pub fn normalize(self, default: RoutePlan) -> RoutePlan {
        match self {
            RoutePlan::Pass => default,
            RoutePlan::Reroute(candidates) if candidates.is_empty() => RoutePlan::Drop,
            RoutePlan::Split(items) if items.is_empty() => RoutePlan::Discard,
            other => other,
        }
    }
}
