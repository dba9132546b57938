//! Archetype-based Entity Component System: entities are stored in
//! per-Definition chunks (one row-packed byte buffer per unique set of
//! component/array/tag types), with generational entity IDs for immediate
//! stale-reference detection.
//!
//! # Quick Start
//!
//! ```
//! use archon_ecs::prelude::*;
//!
//! #[derive(Debug, Clone, Copy, PartialEq)]
//! struct Position { x: f32, y: f32 }
//!
//! #[derive(Debug, Clone, Copy, PartialEq)]
//! struct Velocity { x: f32, y: f32 }
//!
//! let mut world = World::new();
//! world.register_component::<Position>("Position").unwrap();
//! world.register_component::<Velocity>("Velocity").unwrap();
//!
//! let e = world.create_entity();
//! world.add_component(e, Position { x: 0.0, y: 0.0 }).unwrap();
//! world.add_component(e, Velocity { x: 1.0, y: 0.0 }).unwrap();
//!
//! assert_eq!(world.get_component::<Position>(e).unwrap(), &Position { x: 0.0, y: 0.0 });
//! ```

pub mod arrays;
pub mod bitmask;
pub mod chunk;
pub mod chunk_map;
pub mod definition;
pub mod entity;
pub mod error;
pub mod operation;
#[allow(unsafe_code)]
pub mod query;
pub mod schema;
pub mod snapshot;
#[allow(unsafe_code)]
pub mod world;

pub use error::WorldError;

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::bitmask::BitMask;
    pub use crate::definition::Definition;
    pub use crate::entity::EntityId;
    pub use crate::operation::{EntityRef, Instruction, Operation, OperationReport};
    pub use crate::query::{Query, QueryBuilder, QueryItem};
    pub use crate::schema::{ArrayId, ComponentId, Schema, TagId};
    pub use crate::snapshot::{capture_world, decode_schema, decode_world, encode_schema, encode_world, restore_world, SchemaSnapshot, WorldSnapshot};
    pub use crate::world::World;
    pub use crate::WorldError;
}

#[cfg(test)]
mod tests {
    use crate::prelude::*;
    use serde_json::json;

    #[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
    struct Position {
        x: f32,
        y: f32,
    }

    #[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
    struct Velocity {
        x: f32,
        y: f32,
    }

    struct Dead;

    fn setup_world() -> World {
        let mut world = World::new();
        world.register_component::<Position>("Position").unwrap();
        world.register_component::<Velocity>("Velocity").unwrap();
        world.register_tag::<Dead>("Dead").unwrap();
        world
    }

    #[test]
    fn create_entities_with_components_and_query_back() {
        let mut world = setup_world();
        let e1 = world.create_entity();
        world.add_component(e1, Position { x: 1.0, y: 2.0 }).unwrap();
        world.add_component(e1, Velocity { x: 3.0, y: 4.0 }).unwrap();
        let e2 = world.create_entity();
        world.add_component(e2, Position { x: 10.0, y: 20.0 }).unwrap();

        let results: Vec<_> = world.query_mut::<(&Position, &Velocity)>().map(|(e, _)| e).collect();
        assert_eq!(results, vec![e1]);
    }

    #[test]
    fn destroy_entity_then_verify_gone() {
        let mut world = setup_world();
        let e = world.create_entity();
        world.add_component(e, Position { x: 0.0, y: 0.0 }).unwrap();
        world.destroy_entity(e).unwrap();
        assert!(!world.is_alive(e));
        assert!(world.get_component::<Position>(e).is_err());
        assert_eq!(world.entity_count(), 0);
    }

    #[test]
    fn add_component_triggers_migration() {
        let mut world = setup_world();
        let e = world.create_entity();
        world.add_component(e, Position { x: 1.0, y: 2.0 }).unwrap();
        let chunk_count_before = world.chunk_count();

        world.add_component(e, Velocity { x: 5.0, y: 6.0 }).unwrap();

        assert!(world.has_component::<Velocity>(e).unwrap());
        assert_eq!(world.get_component::<Position>(e).unwrap(), &Position { x: 1.0, y: 2.0 });
        assert!(world.chunk_count() > chunk_count_before);
    }

    #[test]
    fn remove_component_triggers_migration() {
        let mut world = setup_world();
        let e = world.create_entity();
        world.add_component(e, Position { x: 1.0, y: 2.0 }).unwrap();
        world.add_component(e, Velocity { x: 3.0, y: 4.0 }).unwrap();

        world.remove_component::<Velocity>(e).unwrap();

        assert!(!world.has_component::<Velocity>(e).unwrap());
        assert_eq!(world.get_component::<Position>(e).unwrap(), &Position { x: 1.0, y: 2.0 });
    }

    #[test]
    fn get_component_mut_writes_through() {
        let mut world = setup_world();
        let e = world.create_entity();
        world.add_component(e, Position { x: 0.0, y: 0.0 }).unwrap();
        let pos = world.get_component_mut::<Position>(e).unwrap();
        pos.x = 42.0;
        pos.y = 99.0;
        assert_eq!(world.get_component::<Position>(e).unwrap(), &Position { x: 42.0, y: 99.0 });
    }

    #[test]
    fn query_excludes_entities_missing_required_component() {
        let mut world = setup_world();
        for i in 0..5 {
            let e = world.create_entity();
            world.add_component(e, Position { x: i as f32, y: 0.0 }).unwrap();
        }
        let count = world.query_mut::<(&Position, &Velocity)>().count();
        assert_eq!(count, 0);
    }

    #[test]
    fn mutable_query_modifies_components_in_place() {
        let mut world = setup_world();
        let e = world.create_entity();
        world.add_component(e, Position { x: 0.0, y: 0.0 }).unwrap();
        world.add_component(e, Velocity { x: 1.0, y: 2.0 }).unwrap();

        for (_entity, (pos, vel)) in world.query_mut::<(&mut Position, &Velocity)>() {
            pos.x += vel.x;
            pos.y += vel.y;
        }

        assert_eq!(world.get_component::<Position>(e).unwrap(), &Position { x: 1.0, y: 2.0 });
    }

    #[test]
    fn scale_10k_entities() {
        let mut world = setup_world();
        let mut entities = Vec::with_capacity(10_000);
        for i in 0..10_000u32 {
            let e = world.create_entity();
            world
                .add_component(e, Position { x: i as f32, y: i as f32 * 2.0 })
                .unwrap();
            world.add_component(e, Velocity { x: 1.0, y: -1.0 }).unwrap();
            entities.push(e);
        }

        let count = world.query_mut::<(&Position, &Velocity)>().count();
        assert_eq!(count, 10_000);

        for (_entity, (vel,)) in world.query_mut::<(&mut Velocity,)>() {
            vel.x *= 2.0;
            vel.y *= 2.0;
        }
        assert_eq!(world.get_component::<Velocity>(entities[0]).unwrap(), &Velocity { x: 2.0, y: -2.0 });

        for e in entities.iter().take(5_000) {
            world.destroy_entity(*e).unwrap();
        }
        let count = world.query_mut::<(&Position, &Velocity)>().count();
        assert_eq!(count, 5_000);
        assert_eq!(world.entity_count(), 5_000);
    }

    #[test]
    fn stale_entity_destroy_returns_error() {
        let mut world = setup_world();
        let e = world.create_entity();
        world.destroy_entity(e).unwrap();
        assert!(world.destroy_entity(e).is_err());
    }

    #[test]
    fn add_component_overwrites_existing_value() {
        let mut world = setup_world();
        let e = world.create_entity();
        world.add_component(e, Position { x: 1.0, y: 2.0 }).unwrap();
        world.add_component(e, Position { x: 99.0, y: 100.0 }).unwrap();
        assert_eq!(world.get_component::<Position>(e).unwrap(), &Position { x: 99.0, y: 100.0 });
    }

    #[test]
    fn hierarchy_and_disabled_tag_exclude_from_query() {
        let mut world = setup_world();
        let parent = world.create_entity();
        let child = world.create_entity();
        world.add_component(child, Position { x: 1.0, y: 1.0 }).unwrap();
        world.set_parent(child, Some(parent)).unwrap();
        world.set_enabled(parent, false).unwrap();

        let visible: Vec<_> = world
            .query()
            .with_component_id(world.schema().component_id::<Position>().unwrap())
            .exclude_disabled()
            .entities();
        assert!(visible.is_empty());
    }

    #[test]
    fn operation_replay_creates_and_links_entities() {
        let mut world = setup_world();
        world.register_component_json::<Position>("Position").unwrap();

        let mut op = Operation::new();
        op.push_create_entity(1);
        op.push_add_component("Position", json!({"x": 3.0, "y": 4.0}));

        let report = op.replay_into(&mut world);
        assert_eq!(report.failed_count, 0);
        assert_eq!(world.entity_count(), 1);
    }
}
