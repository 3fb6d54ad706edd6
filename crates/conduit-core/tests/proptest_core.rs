//! Property-based tests for the conduit network engine.
//!
//! Uses proptest to generate random insert sequences, physics parameter
//! sequences, and router inputs, then verify the structural invariants the
//! engine promises.

use conduit_core::engine::PipeNetwork;
use conduit_core::fixed::{Fixed64, MIN_ITEM_SPEED, NODE_CAPACITY};
use conduit_core::grid::{Direction, GridPos};
use conduit_core::id::ItemTypeId;
use conduit_core::item::{Payload, TravelingItem};
use conduit_core::router::{route_seed, select};
use conduit_core::sim::SimSide;
use conduit_core::test_utils::*;
use proptest::prelude::*;

// ===========================================================================
// Generators
// ===========================================================================

fn arb_direction() -> impl Strategy<Value = Direction> {
    (0..6usize).prop_map(|i| Direction::from_index(i).unwrap())
}

fn arb_position() -> impl Strategy<Value = GridPos> {
    (-100..100i32, -100..100i32, -100..100i32).prop_map(|(x, y, z)| GridPos::new(x, y, z))
}

/// A non-empty candidate set of distinct directions, identifier order.
fn arb_candidates() -> impl Strategy<Value = Vec<Direction>> {
    (1u8..64).prop_map(|bits| {
        Direction::ALL
            .into_iter()
            .filter(|d| bits & (1 << d.index()) != 0)
            .collect()
    })
}

// ===========================================================================
// Properties
// ===========================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Capacity conservation: however payloads are offered, accepted +
    /// rejected always equals offered and the node never exceeds its
    /// virtual capacity.
    #[test]
    fn capacity_never_exceeded(quantities in proptest::collection::vec(1u32..60, 1..40)) {
        let mut network = basic_network();
        let mut world = GridWorld::new();
        place_line(&mut network, &mut world, GridPos::new(0, 0, 0), 1);

        let mut total_accepted = 0u32;
        for (i, q) in quantities.iter().enumerate() {
            let outcome = network.force_insert(
                &mut world,
                GridPos::new(0, 0, 0),
                Direction::NegX,
                Payload::new(ItemTypeId(i as u32 % 4), *q),
            );
            prop_assert_eq!(outcome.accepted + outcome.rejected, *q);
            total_accepted += outcome.accepted;

            let node = network.node_at(GridPos::new(0, 0, 0)).unwrap();
            prop_assert!(node.total_quantity() <= NODE_CAPACITY);
            prop_assert_eq!(node.total_quantity(), total_accepted);
        }
    }

    /// The speed floor holds and progress is monotone under arbitrary
    /// physics parameters.
    #[test]
    fn physics_bounds(
        params in proptest::collection::vec(
            (0.0f64..1.0, 0.0f64..0.1, 0.0f64..0.1, proptest::bool::ANY),
            1..200,
        )
    ) {
        let mut item = TravelingItem::new(Payload::new(ItemTypeId(0), 1), Direction::PosX);
        let mut last_progress = item.progress;
        for (target, accel, drag, can_accelerate) in params {
            let target = Fixed64::from_num(target);
            item.advance(
                target,
                Fixed64::from_num(accel),
                Fixed64::from_num(drag),
                can_accelerate,
            );
            prop_assert!(item.speed >= MIN_ITEM_SPEED, "floor violated: {}", item.speed);
            prop_assert!(item.progress > last_progress, "progress must be monotone");
            last_progress = item.progress;
        }
    }

    /// Acceleration never overshoots a target at or above the current
    /// speed, and never fires without the capability.
    #[test]
    fn acceleration_clamps_to_target(
        start in 0.02f64..0.5,
        target_delta in 0.0f64..0.5,
        accel in 0.001f64..0.1,
        steps in 1u32..100,
    ) {
        let mut item = TravelingItem::new(Payload::new(ItemTypeId(0), 1), Direction::PosX);
        item.speed = Fixed64::from_num(start);
        let target = Fixed64::from_num(start + target_delta);

        let mut held = item.speed;
        for _ in 0..steps {
            item.advance(target, Fixed64::from_num(accel), Fixed64::from_num(0.005), true);
            prop_assert!(item.speed <= target);
            prop_assert!(item.speed >= held, "speed must not fall below the target path");
            held = item.speed;
        }

        // Without the capability the speed never rises.
        let mut fixed_item = TravelingItem::new(Payload::new(ItemTypeId(0), 1), Direction::PosX);
        fixed_item.speed = Fixed64::from_num(start);
        fixed_item.advance(target, Fixed64::from_num(accel), Fixed64::from_num(0.005), false);
        prop_assert!(fixed_item.speed <= Fixed64::from_num(start));
    }

    /// Router determinism and membership over arbitrary decision inputs.
    #[test]
    fn router_deterministic_and_in_bounds(
        position in arb_position(),
        step in 0u64..1_000_000,
        arrival in arb_direction(),
        candidates in arb_candidates(),
    ) {
        let seed = route_seed(position, step, arrival);
        let a = select(seed, &candidates);
        let b = select(route_seed(position, step, arrival), &candidates);
        prop_assert_eq!(a, b);
        prop_assert!(candidates.contains(&a.unwrap()));
    }

    /// Serialize round-trip: load(save(n)) has the same state hash, for
    /// arbitrary line lengths and run lengths.
    #[test]
    fn serialize_round_trip(length in 1i32..8, inserts in 0u32..6, steps in 0u32..40) {
        let mut network = basic_network();
        let mut world = GridWorld::new();
        place_line(&mut network, &mut world, GridPos::new(0, 0, 0), length);
        world.add_bin(GridPos::new(length, 0, 0), 10_000);
        network.step(&mut world);

        for _ in 0..inserts {
            network.force_insert(
                &mut world,
                GridPos::new(0, 0, 0),
                Direction::NegX,
                Payload::new(ItemTypeId(1), 2),
            );
            network.step(&mut world);
        }
        step_n(&mut network, &mut world, steps);

        let data = network.save().expect("save");
        let restored = PipeNetwork::load(&data, basic_set(), SimSide::Authoritative)
            .expect("load");
        prop_assert_eq!(restored.state_hash(), network.state_hash());
    }
}
