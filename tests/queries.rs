//! Integration tests for the query engine (spec.md §4.6).

use archon_ecs::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Position {
    x: f32,
    y: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Velocity {
    x: f32,
    y: f32,
}

struct Frozen;

fn setup() -> World {
    let mut world = World::new();
    world.register_component::<Position>("Position").unwrap();
    world.register_component::<Velocity>("Velocity").unwrap();
    world.register_tag::<Frozen>("Frozen").unwrap();
    world
}

#[test]
fn query_follows_stable_insertion_order_across_chunks() {
    let mut world = setup();
    let a = world.create_entity();
    world.add_component(a, Position { x: 0.0, y: 0.0 }).unwrap();
    let b = world.create_entity();
    world.add_component(b, Position { x: 1.0, y: 1.0 }).unwrap();
    world.add_component(b, Velocity { x: 1.0, y: 0.0 }).unwrap();
    let c = world.create_entity();
    world.add_component(c, Position { x: 2.0, y: 2.0 }).unwrap();

    let pos_id = world.schema().component_id::<Position>().unwrap();
    let entities = world.query().with_component_id(pos_id).entities();
    assert_eq!(entities, vec![a, b, c]);
}

#[test]
fn excluded_tag_removes_matching_entities_only() {
    let mut world = setup();
    let a = world.create_entity();
    world.add_component(a, Position { x: 0.0, y: 0.0 }).unwrap();
    let b = world.create_entity();
    world.add_component(b, Position { x: 1.0, y: 1.0 }).unwrap();
    world.add_tag::<Frozen>(b).unwrap();

    let pos_id = world.schema().component_id::<Position>().unwrap();
    let frozen_id = world.schema().tag_id::<Frozen>().unwrap();
    let entities = world.query().with_component_id(pos_id).without_tag_id(frozen_id).entities();
    assert_eq!(entities, vec![a]);
}

#[test]
fn typed_query_mut_only_visits_rows_with_every_required_component() {
    let mut world = setup();
    let e1 = world.create_entity();
    world.add_component(e1, Position { x: 0.0, y: 0.0 }).unwrap();
    world.add_component(e1, Velocity { x: 2.0, y: 3.0 }).unwrap();
    let e2 = world.create_entity();
    world.add_component(e2, Position { x: 10.0, y: 10.0 }).unwrap();

    let mut touched = Vec::new();
    for (id, (pos, vel)) in world.query_mut::<(&mut Position, &Velocity)>() {
        pos.x += vel.x;
        pos.y += vel.y;
        touched.push(id);
    }

    assert_eq!(touched, vec![e1]);
    assert_eq!(world.get_component::<Position>(e1).unwrap(), &Position { x: 2.0, y: 3.0 });
    assert_eq!(world.get_component::<Position>(e2).unwrap(), &Position { x: 10.0, y: 10.0 });
}

#[test]
fn query_builder_iter_combines_with_required_definition() {
    let mut world = setup();
    let e = world.create_entity();
    world.add_component(e, Position { x: 1.0, y: 1.0 }).unwrap();
    world.add_component(e, Velocity { x: 1.0, y: 1.0 }).unwrap();
    let frozen_id = world.schema().tag_id::<Frozen>().unwrap();
    world.add_tag::<Frozen>(e).unwrap();

    let results: Vec<_> = world.query().with_tag_id(frozen_id).iter::<(&Position,)>().collect();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].0, e);
}
