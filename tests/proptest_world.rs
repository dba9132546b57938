//! Property tests for structural mutation: random sequences of component
//! add/remove/destroy operations must preserve basic World invariants.

use archon_ecs::prelude::*;
use proptest::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Pos {
    x: f32,
    y: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Vel {
    dx: f32,
    dy: f32,
}

#[derive(Debug, Clone)]
enum WorldOp {
    SpawnPos(f32, f32),
    SpawnPosVel(f32, f32, f32, f32),
    Destroy(usize),
    InsertVel(usize, f32, f32),
    RemoveVel(usize),
}

fn finite_f32() -> impl Strategy<Value = f32> {
    (-1_000_000i32..1_000_000i32).prop_map(|v| v as f32 * 0.01)
}

fn world_op_strategy() -> impl Strategy<Value = WorldOp> {
    prop_oneof![
        (finite_f32(), finite_f32()).prop_map(|(x, y)| WorldOp::SpawnPos(x, y)),
        (finite_f32(), finite_f32(), finite_f32(), finite_f32())
            .prop_map(|(x, y, dx, dy)| WorldOp::SpawnPosVel(x, y, dx, dy)),
        (0..100usize).prop_map(WorldOp::Destroy),
        (0..100usize, finite_f32(), finite_f32()).prop_map(|(i, dx, dy)| WorldOp::InsertVel(i, dx, dy)),
        (0..100usize).prop_map(WorldOp::RemoveVel),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(2000))]

    #[test]
    fn random_ops_preserve_entity_count_and_liveness(ops in prop::collection::vec(world_op_strategy(), 1..50)) {
        let mut world = World::new();
        world.register_component::<Pos>("Pos").unwrap();
        world.register_component::<Vel>("Vel").unwrap();

        let mut alive: Vec<EntityId> = Vec::new();

        for op in ops {
            match op {
                WorldOp::SpawnPos(x, y) => {
                    let e = world.create_entity();
                    world.add_component(e, Pos { x, y }).unwrap();
                    alive.push(e);
                }
                WorldOp::SpawnPosVel(x, y, dx, dy) => {
                    let e = world.create_entity();
                    world.add_component(e, Pos { x, y }).unwrap();
                    world.add_component(e, Vel { dx, dy }).unwrap();
                    alive.push(e);
                }
                WorldOp::Destroy(idx) => {
                    if !alive.is_empty() {
                        let idx = idx % alive.len();
                        let e = alive.remove(idx);
                        world.destroy_entity(e).unwrap();
                    }
                }
                WorldOp::InsertVel(idx, dx, dy) => {
                    if !alive.is_empty() {
                        let idx = idx % alive.len();
                        let _ = world.add_component(alive[idx], Vel { dx, dy });
                    }
                }
                WorldOp::RemoveVel(idx) => {
                    if !alive.is_empty() {
                        let idx = idx % alive.len();
                        let _ = world.remove_component::<Vel>(alive[idx]);
                    }
                }
            }

            prop_assert_eq!(world.entity_count() as usize, alive.len());
            for &e in &alive {
                prop_assert!(world.is_alive(e));
            }
        }
    }

    /// A destroyed entity's old ID must read as dead forever, even once its
    /// index is recycled by a later create_entity (spec.md §4.4's generation
    /// counter).
    #[test]
    fn stale_ids_detected_after_destroy_and_recycle(
        spawn_count in 1..20usize,
        destroy_indices in prop::collection::vec(0..20usize, 1..10),
    ) {
        let mut world = World::new();
        world.register_component::<Pos>("Pos").unwrap();

        let mut entities: Vec<EntityId> = Vec::new();
        for i in 0..spawn_count {
            let e = world.create_entity();
            world.add_component(e, Pos { x: i as f32, y: 0.0 }).unwrap();
            entities.push(e);
        }

        let mut stale_ids: Vec<EntityId> = Vec::new();
        for &idx in &destroy_indices {
            if !entities.is_empty() {
                let idx = idx % entities.len();
                let e = entities.remove(idx);
                world.destroy_entity(e).unwrap();
                stale_ids.push(e);
            }
        }

        for _ in 0..stale_ids.len() {
            let e = world.create_entity();
            world.add_component(e, Pos { x: 999.0, y: 999.0 }).unwrap();
            entities.push(e);
        }

        for &stale in &stale_ids {
            prop_assert!(!world.is_alive(stale));
            prop_assert!(world.get_component::<Pos>(stale).is_err());
        }

        for &e in &entities {
            prop_assert!(world.is_alive(e));
            prop_assert!(world.get_component::<Pos>(e).is_ok());
        }
    }

    /// Adding then removing a component must leave every other component's
    /// value untouched across the resulting chunk migrations.
    #[test]
    fn migration_preserves_other_component_data(
        initial_x in finite_f32(),
        initial_y in finite_f32(),
        vel_dx in finite_f32(),
        vel_dy in finite_f32(),
        do_remove in proptest::bool::ANY,
    ) {
        let mut world = World::new();
        world.register_component::<Pos>("Pos").unwrap();
        world.register_component::<Vel>("Vel").unwrap();

        let e = world.create_entity();
        world.add_component(e, Pos { x: initial_x, y: initial_y }).unwrap();
        world.add_component(e, Vel { dx: vel_dx, dy: vel_dy }).unwrap();

        let pos = *world.get_component::<Pos>(e).unwrap();
        prop_assert_eq!(pos.x, initial_x);
        prop_assert_eq!(pos.y, initial_y);

        if do_remove {
            world.remove_component::<Vel>(e).unwrap();
            let pos = *world.get_component::<Pos>(e).unwrap();
            prop_assert_eq!(pos.x, initial_x);
            prop_assert_eq!(pos.y, initial_y);
            prop_assert!(!world.has_component::<Vel>(e).unwrap());
        }
    }
}
