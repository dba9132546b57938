//! Crate error taxonomy (spec.md §7).
//!
//! Grounded in the teacher's `EcsError` (`nomai-ecs/src/lib.rs`), which uses
//! `thiserror` struct-style variants. All variants are recoverable: nothing
//! in this crate panics in a release build on a caller-reachable error path.

use crate::entity::EntityId;
use thiserror::Error;

/// Errors returned by fallible [`crate::world::World`] and [`crate::schema::Schema`]
/// operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WorldError {
    /// A type index has no Schema entry.
    #[error("type is not registered")]
    NotRegistered,

    /// Registration would exceed 256 slots in a kind.
    #[error("registration would exceed the 256-slot capacity for this type kind")]
    TooManyTypes,

    /// Entity ID is free, zero, or was never issued.
    #[error("no such entity: {entity:?}")]
    NoSuchEntity {
        /// The entity handle that was looked up.
        entity: EntityId,
    },

    /// The entity's chunk does not carry the requested component.
    #[error("entity {entity:?} is missing the requested component")]
    MissingComponent {
        /// The entity that was queried.
        entity: EntityId,
    },

    /// The entity's chunk does not carry the requested array.
    #[error("entity {entity:?} is missing the requested array")]
    MissingArray {
        /// The entity that was queried.
        entity: EntityId,
    },

    /// `set_parent` would create a cycle in the hierarchy.
    #[error("setting this parent would create a cycle in the entity hierarchy")]
    CycleInHierarchy,

    /// A `BitMask` index or chunk row was out of bounds.
    #[error("index out of range")]
    OutOfRange,

    /// A local reference index (`rint`) did not resolve to a live reference.
    #[error("no such reference: {rint}")]
    NoSuchReference {
        /// The local reference handle that failed to resolve.
        rint: u32,
    },
}
