//! Type registry: maps user types to dense small-integer IDs within three
//! independent 256-capacity spaces (components, arrays, tags) and stores
//! their sizes and stable type hashes.
//!
//! Grounded in the teacher's `ComponentRegistry`, which
//! this generalizes from a single component-ID space to three independent
//! kinds, matching spec.md §4.2.

use crate::bitmask::CAPACITY;
use crate::error::WorldError;
use serde::{Deserialize, Serialize};
use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;

/// Dense ID within the component-type space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ComponentId(pub(crate) u8);

/// Dense ID within the array-type space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ArrayId(pub(crate) u8);

/// Dense ID within the tag-type space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TagId(pub(crate) u8);

macro_rules! impl_type_id {
    ($t:ty) => {
        impl $t {
            /// The raw `u8` index of this ID within its space.
            #[inline]
            pub fn index(&self) -> u8 {
                self.0
            }
        }
        impl fmt::Display for $t {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}
impl_type_id!(ComponentId);
impl_type_id!(ArrayId);
impl_type_id!(TagId);

/// Per-type bookkeeping: name, stable hash, byte size (0 for tags), and the
/// in-process `TypeId` used by the typed facade to skip name lookups on the
/// hot path.
#[derive(Debug, Clone)]
pub struct TypeInfo {
    pub name: String,
    pub size: u16,
    pub type_hash: u64,
    pub rust_type: Option<TypeId>,
}

/// One of the three 256-slot ID spaces. Shared machinery behind
/// [`Schema`]'s component/array/tag registries.
#[derive(Debug, Default)]
struct TypeTable {
    infos: Vec<TypeInfo>,
    by_hash: HashMap<u64, u8>,
    by_rust_type: HashMap<TypeId, u8>,
    by_name: HashMap<String, u8>,
}

impl TypeTable {
    fn stable_hash(name: &str) -> u64 {
        let digest = blake3::hash(name.as_bytes());
        let bytes = digest.as_bytes();
        u64::from_le_bytes(bytes[0..8].try_into().unwrap())
    }

    fn register(
        &mut self,
        name: &str,
        size: u16,
        rust_type: Option<TypeId>,
    ) -> Result<u8, WorldError> {
        let hash = Self::stable_hash(name);
        if let Some(&existing) = self.by_hash.get(&hash) {
            #[cfg(debug_assertions)]
            {
                let info = &self.infos[existing as usize];
                debug_assert_eq!(
                    info.size, size,
                    "double registration of `{name}` with a different size"
                );
            }
            return Ok(existing);
        }
        if self.infos.len() >= CAPACITY {
            return Err(WorldError::TooManyTypes);
        }
        let id = self.infos.len() as u8;
        self.infos.push(TypeInfo {
            name: name.to_owned(),
            size,
            type_hash: hash,
            rust_type,
        });
        self.by_hash.insert(hash, id);
        self.by_name.insert(name.to_owned(), id);
        if let Some(rt) = rust_type {
            self.by_rust_type.insert(rt, id);
        }
        Ok(id)
    }

    fn clear(&mut self) {
        self.infos.clear();
        self.by_hash.clear();
        self.by_rust_type.clear();
        self.by_name.clear();
    }
}

/// Per-World registry of component/array/tag types. Every `World` owns its
/// own `Schema`; there is no process-wide type registry (spec.md §9's
/// "Global type registry" redesign flag).
#[derive(Debug, Default)]
pub struct Schema {
    components: TypeTable,
    arrays: TypeTable,
    tags: TypeTable,
}

impl Schema {
    /// Creates an empty schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a component type of size `size_of::<T>()`. Idempotent:
    /// re-registering the same Rust type returns the existing ID.
    pub fn register_component<T: 'static>(&mut self, name: &str) -> Result<ComponentId, WorldError> {
        let size = std::mem::size_of::<T>() as u16;
        self.components
            .register(name, size, Some(TypeId::of::<T>()))
            .map(ComponentId)
    }

    /// Registers an array element type of size `size_of::<T>()`.
    pub fn register_array<T: 'static>(&mut self, name: &str) -> Result<ArrayId, WorldError> {
        let size = std::mem::size_of::<T>() as u16;
        self.arrays
            .register(name, size, Some(TypeId::of::<T>()))
            .map(ArrayId)
    }

    /// Registers a zero-sized tag type.
    pub fn register_tag<T: 'static>(&mut self, name: &str) -> Result<TagId, WorldError> {
        self.tags
            .register(name, 0, Some(TypeId::of::<T>()))
            .map(TagId)
    }

    /// Registers a tag by name only, without an associated Rust type. Used
    /// for the builtin `Disabled` tag and for dynamically-named tags loaded
    /// from a snapshot.
    pub fn register_named_tag(&mut self, name: &str) -> Result<TagId, WorldError> {
        self.tags.register(name, 0, None).map(TagId)
    }

    /// Looks up a previously registered component type by its Rust type.
    pub fn component_id<T: 'static>(&self) -> Option<ComponentId> {
        self.components
            .by_rust_type
            .get(&TypeId::of::<T>())
            .map(|&i| ComponentId(i))
    }

    /// Looks up a previously registered array type by its Rust type.
    pub fn array_id<T: 'static>(&self) -> Option<ArrayId> {
        self.arrays
            .by_rust_type
            .get(&TypeId::of::<T>())
            .map(|&i| ArrayId(i))
    }

    /// Looks up a previously registered tag type by its Rust type.
    pub fn tag_id<T: 'static>(&self) -> Option<TagId> {
        self.tags
            .by_rust_type
            .get(&TypeId::of::<T>())
            .map(|&i| TagId(i))
    }

    /// Looks up a tag by registered name (used for the builtin `Disabled` tag
    /// and snapshot restoration).
    pub fn tag_by_name(&self, name: &str) -> Option<TagId> {
        self.tags.by_name.get(name).map(|&i| TagId(i))
    }

    /// Looks up a component by registered name (used by the type-erased
    /// Operation replay path, which only has a name, not a Rust type).
    pub fn component_by_name(&self, name: &str) -> Option<ComponentId> {
        self.components.by_name.get(name).map(|&i| ComponentId(i))
    }

    /// Looks up an array type by registered name.
    pub fn array_by_name(&self, name: &str) -> Option<ArrayId> {
        self.arrays.by_name.get(name).map(|&i| ArrayId(i))
    }

    /// Byte size of a registered component.
    pub fn component_size(&self, id: ComponentId) -> Option<u16> {
        self.components.infos.get(id.0 as usize).map(|i| i.size)
    }

    /// Byte size of a registered array element type.
    pub fn array_size(&self, id: ArrayId) -> Option<u16> {
        self.arrays.infos.get(id.0 as usize).map(|i| i.size)
    }

    /// Whether `id` has been registered as a component.
    pub fn has_component(&self, id: ComponentId) -> bool {
        (id.0 as usize) < self.components.infos.len()
    }

    /// Whether `id` has been registered as an array type.
    pub fn has_array(&self, id: ArrayId) -> bool {
        (id.0 as usize) < self.arrays.infos.len()
    }

    /// Whether `id` has been registered as a tag.
    pub fn has_tag(&self, id: TagId) -> bool {
        (id.0 as usize) < self.tags.infos.len()
    }

    /// Number of registered component types.
    pub fn component_count(&self) -> usize {
        self.components.infos.len()
    }

    /// Number of registered array types.
    pub fn array_count(&self) -> usize {
        self.arrays.infos.len()
    }

    /// Number of registered tag types.
    pub fn tag_count(&self) -> usize {
        self.tags.infos.len()
    }

    /// Type info for a registered component.
    pub fn component_info(&self, id: ComponentId) -> Option<&TypeInfo> {
        self.components.infos.get(id.0 as usize)
    }

    /// Type info for a registered array type.
    pub fn array_info(&self, id: ArrayId) -> Option<&TypeInfo> {
        self.arrays.infos.get(id.0 as usize)
    }

    /// Type info for a registered tag.
    pub fn tag_info(&self, id: TagId) -> Option<&TypeInfo> {
        self.tags.infos.get(id.0 as usize)
    }

    /// Clears all three registries. Re-registration after `clear` reuses the
    /// 0-based order of registration calls (spec.md §4.2's ordering
    /// contract), since IDs are always assigned by current `infos.len()`.
    pub fn clear(&mut self) {
        self.components.clear();
        self.arrays.clear();
        self.tags.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_is_idempotent() {
        let mut schema = Schema::new();
        let a = schema.register_component::<u32>("u32").unwrap();
        let b = schema.register_component::<u32>("u32").unwrap();
        assert_eq!(a, b);
        assert_eq!(schema.component_count(), 1);
    }

    #[test]
    fn distinct_types_get_distinct_ids() {
        let mut schema = Schema::new();
        let a = schema.register_component::<u32>("u32").unwrap();
        let b = schema.register_component::<u64>("u64").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn too_many_types_after_256() {
        let mut schema = Schema::new();
        for i in 0..256 {
            schema.register_named_tag(&format!("tag{i}")).unwrap();
        }
        let err = schema.register_named_tag("tag256").unwrap_err();
        assert!(matches!(err, WorldError::TooManyTypes));
    }

    #[test]
    fn tags_have_zero_size() {
        let mut schema = Schema::new();
        let id = schema.register_tag::<()>("marker").unwrap();
        assert_eq!(schema.tag_info(id).unwrap().size, 0);
    }

    #[test]
    fn clear_resets_registration_order() {
        let mut schema = Schema::new();
        let a1 = schema.register_component::<u32>("a").unwrap();
        let _b1 = schema.register_component::<u64>("b").unwrap();
        schema.clear();
        let a2 = schema.register_component::<u64>("a").unwrap();
        assert_eq!(a1.index(), a2.index());
    }
}
