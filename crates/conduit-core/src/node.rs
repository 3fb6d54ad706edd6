//! One placed conduit segment: its in-flight items, connection cache, and
//! per-module state.

use crate::fixed::NODE_CAPACITY;
use crate::grid::GridPos;
use crate::id::ConduitTypeId;
use crate::item::TravelingItem;
use crate::module::ModuleStateMap;
use crate::topology::ConnectionCache;
use serde::{Deserialize, Serialize};

/// In-memory state of one occupied grid cell.
///
/// `items` is an unordered collection — items move independently and their
/// position in the list carries no meaning. `connections` and
/// `connections_mask` are caches rebuilt every step; they are persisted only
/// so a freshly loaded node doesn't report a spurious topology change on its
/// first step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipeNode {
    pub position: GridPos,
    pub conduit_type: ConduitTypeId,
    pub items: Vec<TravelingItem>,
    pub connections: ConnectionCache,
    pub connections_mask: u16,
    pub module_state: ModuleStateMap,
}

impl PipeNode {
    pub fn new(position: GridPos, conduit_type: ConduitTypeId) -> Self {
        Self {
            position,
            conduit_type,
            items: Vec::new(),
            connections: ConnectionCache::new(),
            connections_mask: 0,
            module_state: ModuleStateMap::new(),
        }
    }

    /// Sum of payload quantities across all contained items.
    pub fn total_quantity(&self) -> u32 {
        self.items.iter().map(|it| it.payload.quantity).sum()
    }

    /// Units of payload this node can still accept under its virtual
    /// capacity.
    pub fn free_capacity(&self) -> u32 {
        NODE_CAPACITY.saturating_sub(self.total_quantity())
    }

    /// How much of a `quantity`-unit payload would fit right now.
    pub fn acceptable_quantity(&self, quantity: u32) -> u32 {
        quantity.min(self.free_capacity())
    }

    /// Redstone-style fill signal in `0..=15`: zero only when empty,
    /// otherwise at least 1, scaling with fill toward capacity.
    pub fn comparator_output(&self) -> u8 {
        let total = self.total_quantity();
        if total == 0 {
            return 0;
        }
        let scaled = (total as u64 * 15 / NODE_CAPACITY as u64) as u8;
        scaled.clamp(1, 15)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::Direction;
    use crate::id::ItemTypeId;
    use crate::item::Payload;

    fn node_with(quantities: &[u32]) -> PipeNode {
        let mut node = PipeNode::new(GridPos::new(0, 0, 0), ConduitTypeId(0));
        for &q in quantities {
            node.items.push(TravelingItem::new(
                Payload::new(ItemTypeId(0), q),
                Direction::PosX,
            ));
        }
        node
    }

    #[test]
    fn fresh_node_is_empty() {
        let node = node_with(&[]);
        assert_eq!(node.total_quantity(), 0);
        assert_eq!(node.free_capacity(), NODE_CAPACITY);
        assert_eq!(node.comparator_output(), 0);
    }

    #[test]
    fn quantities_sum_across_items() {
        let node = node_with(&[10, 20, 5]);
        assert_eq!(node.total_quantity(), 35);
        assert_eq!(node.free_capacity(), NODE_CAPACITY - 35);
    }

    #[test]
    fn acceptable_quantity_is_partial_at_the_boundary() {
        let node = node_with(&[NODE_CAPACITY - 5]);
        assert_eq!(node.acceptable_quantity(10), 5);
        assert_eq!(node.acceptable_quantity(3), 3);

        let full = node_with(&[NODE_CAPACITY]);
        assert_eq!(full.acceptable_quantity(1), 0);
    }

    #[test]
    fn comparator_nonzero_when_occupied() {
        // One unit in a 320-unit node still reads as 1.
        let node = node_with(&[1]);
        assert_eq!(node.comparator_output(), 1);
    }

    #[test]
    fn comparator_full_scale() {
        let node = node_with(&[NODE_CAPACITY]);
        assert_eq!(node.comparator_output(), 15);

        let half = node_with(&[NODE_CAPACITY / 2]);
        assert_eq!(half.comparator_output(), 7);
    }
}
