//! The World: orchestrates entity lifecycle and structural mutations by
//! migrating rows between chunks (spec.md §4.5).
//!
//! The migration algorithm (extract source row location, resolve the
//! destination chunk via the `ChunkMap`, move the row, patch the slot table)
//! follows the same extract-then-insert shape as the teacher's
//! `World::insert_component`/`remove_component`
//! (`nomai-ecs/src/world.rs`), generalized here to move whole rows (not one
//! component at a time) and to use [`ChunkMap`]'s dedicated
//! `get_or_create_with_added_component`-style helpers instead of a bare
//! `HashMap<Vec<ComponentTypeId>, ArchetypeId>`.

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, trace};

use crate::arrays::ArrayStore;
use crate::chunk_map::{ChunkId, ChunkMap};
use crate::definition::Definition;
use crate::entity::{EntityId, Slot, SlotState, SlotTable};
use crate::error::WorldError;
use crate::schema::{ArrayId, ComponentId, Schema, TagId};

const BUILTIN_DISABLED_TAG: &str = "__builtin_disabled";

type JsonDecoder = fn(&serde_json::Value) -> Result<Vec<u8>, WorldError>;

fn decode_json<T: Copy + DeserializeOwned>(value: &serde_json::Value) -> Result<Vec<u8>, WorldError> {
    let typed: T = serde_json::from_value(value.clone()).map_err(|_| WorldError::OutOfRange)?;
    let bytes = unsafe { std::slice::from_raw_parts(&typed as *const T as *const u8, std::mem::size_of::<T>()) };
    Ok(bytes.to_vec())
}

/// Owns a population of entities and the chunks/arrays/references that back
/// them. Single-owner, not thread-safe (spec.md §5).
///
/// `component_decoders`/`array_decoders` back the type-erased Operation
/// replay path (spec.md §4.7): [`World::register_component_json`] records how
/// to turn a `serde_json::Value` payload back into raw bytes for a named
/// type, the same role the teacher's deserializer registry plays in
/// `command.rs`'s `set_component_by_name`.
pub struct World {
    pub(crate) schema: Schema,
    pub(crate) chunks: ChunkMap,
    slots: SlotTable,
    arrays: ArrayStore,
    references: Vec<EntityId>,
    disabled_tag: TagId,
    component_decoders: HashMap<String, JsonDecoder>,
    array_decoders: HashMap<String, JsonDecoder>,
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl World {
    /// Creates an empty World with a fresh, private Schema (spec.md §9:
    /// "every World owns its own Schema; there is no global mutable state").
    pub fn new() -> Self {
        let mut schema = Schema::new();
        let disabled_tag = schema
            .register_named_tag(BUILTIN_DISABLED_TAG)
            .expect("schema starts empty; builtin tag registration cannot fail");
        let chunks = ChunkMap::new(&schema);
        World {
            schema,
            chunks,
            slots: SlotTable::new(),
            arrays: ArrayStore::default(),
            references: Vec::new(),
            disabled_tag,
            component_decoders: HashMap::new(),
            array_decoders: HashMap::new(),
        }
    }

    /// The tag used by [`crate::query::Query::exclude_disabled`].
    pub(crate) fn disabled_tag(&self) -> TagId {
        self.disabled_tag
    }

    // -- registration --------------------------------------------------

    /// Registers a component type. Idempotent by Rust type.
    pub fn register_component<T: Copy + 'static>(&mut self, name: &str) -> Result<ComponentId, WorldError> {
        self.schema.register_component::<T>(name)
    }

    /// Registers an array element type. Idempotent by Rust type.
    pub fn register_array<T: Copy + 'static>(&mut self, name: &str) -> Result<ArrayId, WorldError> {
        self.schema.register_array::<T>(name)
    }

    /// Registers a tag type. Idempotent by Rust type.
    pub fn register_tag<T: 'static>(&mut self, name: &str) -> Result<TagId, WorldError> {
        self.schema.register_tag::<T>(name)
    }

    /// Read-only access to the schema (lookups, introspection, snapshotting).
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Read-only access to the array side table, used by the snapshot codec
    /// to dump every entity's arrays.
    pub(crate) fn arrays_store(&self) -> &ArrayStore {
        &self.arrays
    }

    /// Raw reference slots, used by the snapshot codec alongside each slot's
    /// `reference_start`/`reference_count` span.
    pub(crate) fn references_raw(&self) -> &[EntityId] {
        &self.references
    }

    /// Registers a component type and records how to decode a JSON payload
    /// into its raw bytes, so it can be targeted by name from an
    /// [`crate::operation::Operation`] instruction stream.
    pub fn register_component_json<T: Copy + Serialize + DeserializeOwned + 'static>(
        &mut self,
        name: &str,
    ) -> Result<ComponentId, WorldError> {
        let id = self.schema.register_component::<T>(name)?;
        self.component_decoders.insert(name.to_owned(), decode_json::<T>);
        Ok(id)
    }

    /// Registers an array element type and records how to decode a JSON
    /// payload into its raw bytes, for `CreateArray`/`SetArrayElement`
    /// Operation instructions.
    pub fn register_array_json<T: Copy + Serialize + DeserializeOwned + 'static>(
        &mut self,
        name: &str,
    ) -> Result<ArrayId, WorldError> {
        let id = self.schema.register_array::<T>(name)?;
        self.array_decoders.insert(name.to_owned(), decode_json::<T>);
        Ok(id)
    }

    fn decode_component_json(&self, name: &str, value: &serde_json::Value) -> Result<(ComponentId, Vec<u8>), WorldError> {
        let id = self.schema.component_by_name(name).ok_or(WorldError::NotRegistered)?;
        let decode = self.component_decoders.get(name).ok_or(WorldError::NotRegistered)?;
        Ok((id, decode(value)?))
    }

    fn decode_array_json(&self, name: &str, value: &serde_json::Value) -> Result<(ArrayId, Vec<u8>), WorldError> {
        let id = self.schema.array_by_name(name).ok_or(WorldError::NotRegistered)?;
        let decode = self.array_decoders.get(name).ok_or(WorldError::NotRegistered)?;
        Ok((id, decode(value)?))
    }

    /// Type-erased `add_component`, resolving the component by registered
    /// name and its value from a JSON payload (used by Operation replay).
    pub fn add_component_json(&mut self, id: EntityId, name: &str, value: &serde_json::Value) -> Result<(), WorldError> {
        let (component_id, bytes) = self.decode_component_json(name, value)?;
        self.add_component_bytes(id, component_id, &bytes)
    }

    /// Type-erased `remove_component`, resolving the component by name.
    pub fn remove_component_by_name(&mut self, id: EntityId, name: &str) -> Result<(), WorldError> {
        let component_id = self.schema.component_by_name(name).ok_or(WorldError::NotRegistered)?;
        self.remove_component_by_id(id, component_id)
    }

    /// Type-erased component write that does not migrate: fails with
    /// [`WorldError::MissingComponent`] if `id` does not already carry the
    /// component (used for `SetComponent`, which per spec.md §4.7 only
    /// overwrites an existing value rather than inserting one).
    pub fn set_component_json(&mut self, id: EntityId, name: &str, value: &serde_json::Value) -> Result<(), WorldError> {
        let (component_id, bytes) = self.decode_component_json(name, value)?;
        let slot = *self.slots.get(id)?;
        if !self.chunks.get(slot.chunk).definition().cmask.contains(component_id.index()) {
            return Err(WorldError::MissingComponent { entity: id });
        }
        unsafe {
            self.chunks
                .get_mut(slot.chunk)
                .set_component_bytes(slot.row as usize, component_id, bytes.as_ptr());
        }
        Ok(())
    }

    pub(crate) fn add_component_bytes(&mut self, id: EntityId, component_id: ComponentId, bytes: &[u8]) -> Result<(), WorldError> {
        let slot = *self.slots.get(id)?;
        let src_def = *self.chunks.get(slot.chunk).definition();
        let row = if src_def.cmask.contains(component_id.index()) {
            slot.row as usize
        } else {
            let dst_chunk = self
                .chunks
                .get_or_create_with_added_component(slot.chunk, component_id, &self.schema);
            self.migrate_row(id, slot.chunk, dst_chunk)?
        };
        let chunk = self.chunks.get_mut(self.slots.get(id)?.chunk);
        unsafe { chunk.set_component_bytes(row, component_id, bytes.as_ptr()) };
        Ok(())
    }

    fn remove_component_by_id(&mut self, id: EntityId, component_id: ComponentId) -> Result<(), WorldError> {
        let slot = *self.slots.get(id)?;
        let src_def = *self.chunks.get(slot.chunk).definition();
        if !src_def.cmask.contains(component_id.index()) {
            return Ok(());
        }
        let dst_chunk = self
            .chunks
            .get_or_create_with_removed_component(slot.chunk, component_id, &self.schema);
        self.migrate_row(id, slot.chunk, dst_chunk)?;
        Ok(())
    }

    /// Type-erased `create_array`, resolving the element type by name and
    /// its initial contents from a JSON array payload (or zero-filled, if
    /// `value` is `None`).
    pub fn create_array_json(
        &mut self,
        id: EntityId,
        name: &str,
        len: usize,
        value: Option<&serde_json::Value>,
    ) -> Result<(), WorldError> {
        let array_id = self.schema.array_by_name(name).ok_or(WorldError::NotRegistered)?;
        let element_size = self.schema.array_size(array_id).ok_or(WorldError::NotRegistered)? as usize;
        let slot = *self.slots.get(id)?;
        let already_present = self.chunks.get(slot.chunk).definition().amask.contains(array_id.index());
        if !already_present {
            let dst = self.chunks.get_or_create_with_added_array(slot.chunk, array_id, &self.schema);
            self.migrate_row(id, slot.chunk, dst)?;
            self.slots.get_mut(id)?.contains_arrays = true;
        }
        self.arrays.create(id, array_id, element_size, len);
        if let Some(value) = value {
            let (_, bytes) = self.decode_array_json(name, value)?;
            self.arrays.set_elements(id, array_id, 0, bytes.len() / element_size.max(1), &bytes);
        }
        Ok(())
    }

    /// Raw-bytes array creation, bypassing the JSON decoder registry. Used by
    /// the snapshot codec to restore an array side-table entry whose bytes
    /// are already in the type's native layout.
    pub(crate) fn create_array_raw(
        &mut self,
        id: EntityId,
        array_id: ArrayId,
        element_size: usize,
        bytes: &[u8],
    ) -> Result<(), WorldError> {
        let slot = *self.slots.get(id)?;
        let already_present = self.chunks.get(slot.chunk).definition().amask.contains(array_id.index());
        if !already_present {
            let dst = self.chunks.get_or_create_with_added_array(slot.chunk, array_id, &self.schema);
            self.migrate_row(id, slot.chunk, dst)?;
            self.slots.get_mut(id)?.contains_arrays = true;
        }
        let len = if element_size == 0 { 0 } else { bytes.len() / element_size };
        let dst = self.arrays.create(id, array_id, element_size, len);
        dst.copy_from_slice(bytes);
        Ok(())
    }

    /// Type-erased `destroy_array`, resolving the element type by name.
    pub fn destroy_array_by_name(&mut self, id: EntityId, name: &str) -> Result<(), WorldError> {
        let array_id = self.schema.array_by_name(name).ok_or(WorldError::NotRegistered)?;
        let slot = *self.slots.get(id)?;
        if !self.chunks.get(slot.chunk).definition().amask.contains(array_id.index()) {
            return Ok(());
        }
        let dst = self.chunks.get_or_create_with_removed_array(slot.chunk, array_id, &self.schema);
        self.migrate_row(id, slot.chunk, dst)?;
        self.arrays.destroy(id, array_id);
        let new_def = *self.chunks.get(dst).definition();
        self.slots.get_mut(id)?.contains_arrays = !new_def.amask.is_empty();
        Ok(())
    }

    /// Type-erased `resize_array`, resolving the element type by name.
    pub fn resize_array_by_name(&mut self, id: EntityId, name: &str, new_len: usize) -> Result<(), WorldError> {
        let array_id = self.schema.array_by_name(name).ok_or(WorldError::NotRegistered)?;
        self.slots.get(id)?;
        self.arrays
            .resize(id, array_id, new_len)
            .map(|_| ())
            .ok_or(WorldError::MissingArray { entity: id })
    }

    /// Type-erased `set_array_element`, resolving the element type by name
    /// and the new element values from a JSON payload.
    pub fn set_array_element_json(
        &mut self,
        id: EntityId,
        name: &str,
        index: usize,
        count: usize,
        value: &serde_json::Value,
    ) -> Result<(), WorldError> {
        self.slots.get(id)?;
        let (array_id, bytes) = self.decode_array_json(name, value)?;
        self.arrays
            .set_elements(id, array_id, index, count, &bytes)
            .ok_or(WorldError::OutOfRange)
    }

    /// Whether tag `name` is currently carried by `id`'s chunk.
    pub fn has_tag_by_name(&self, id: EntityId, name: &str) -> Result<bool, WorldError> {
        let tag_id = self.schema.tag_by_name(name).ok_or(WorldError::NotRegistered)?;
        let slot = self.slots.get(id)?;
        Ok(self.chunks.get(slot.chunk).definition().tmask.contains(tag_id.index()))
    }

    /// Type-erased `add_tag`, resolving the tag by registered name.
    pub fn add_tag_by_name(&mut self, id: EntityId, name: &str) -> Result<(), WorldError> {
        let tag_id = self.schema.tag_by_name(name).ok_or(WorldError::NotRegistered)?;
        self.add_tag_by_id(id, tag_id)
    }

    /// Type-erased `remove_tag`, resolving the tag by registered name.
    pub fn remove_tag_by_name(&mut self, id: EntityId, name: &str) -> Result<(), WorldError> {
        let tag_id = self.schema.tag_by_name(name).ok_or(WorldError::NotRegistered)?;
        self.remove_tag_by_id(id, tag_id)
    }

    // -- entity lifecycle ------------------------------------------------

    /// Creates a new entity with no components/arrays/tags, in the default
    /// chunk.
    pub fn create_entity(&mut self) -> EntityId {
        let id = self.slots.allocate();
        let row = self.chunks.get_mut(ChunkId::DEFAULT).add_entity(id);
        let slot = self.slots.get_mut(id).expect("just allocated");
        slot.chunk = ChunkId::DEFAULT;
        slot.row = row as u32;
        trace!(entity = ?id, "created entity");
        id
    }

    /// Destroys `id`: detaches it from its parent, recursively destroys its
    /// children, frees its arrays and references, removes its chunk row, and
    /// recycles its slot.
    pub fn destroy_entity(&mut self, id: EntityId) -> Result<(), WorldError> {
        self.slots.get(id)?;
        // Collect descendants first (depth-first) so the recursive destroy
        // does not have to reconcile a moving sibling list mid-traversal.
        let mut stack = vec![id];
        let mut to_destroy = Vec::new();
        while let Some(e) = stack.pop() {
            to_destroy.push(e);
            let mut child = self.slots.get(e)?.first_child;
            while !child.is_none() {
                stack.push(child);
                child = self.slots.get(child)?.next_sibling;
            }
        }
        self.detach_from_parent(id)?;
        // Destroy in any order; rows are independent of each other.
        for e in to_destroy.into_iter().rev() {
            self.destroy_single(e)?;
        }
        Ok(())
    }

    fn destroy_single(&mut self, id: EntityId) -> Result<(), WorldError> {
        let slot = *self.slots.get(id)?;
        self.arrays.destroy_all_for(id);
        if slot.reference_count > 0 {
            for i in 0..slot.reference_count {
                self.references[(slot.reference_start + i) as usize] = EntityId::NONE;
            }
        }
        if let Some(swapped) = self.chunks.get_mut(slot.chunk).remove_at(slot.row as usize) {
            let swapped_slot = self.slots.get_mut(swapped)?;
            swapped_slot.row = slot.row;
        }
        self.slots.deallocate(id);
        debug!(entity = ?id, "destroyed entity");
        Ok(())
    }

    /// Number of currently live entities.
    pub fn entity_count(&self) -> u32 {
        self.slots.live_count()
    }

    /// Number of interned chunks (including the default chunk).
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Whether `id` refers to a currently live entity.
    pub fn is_alive(&self, id: EntityId) -> bool {
        self.slots.is_alive(id)
    }

    pub(crate) fn slot(&self, id: EntityId) -> Result<&Slot, WorldError> {
        self.slots.get(id)
    }

    // -- components --------------------------------------------------------

    /// Adds or overwrites component `T` on `id`. Migrates `id`'s row to a new
    /// chunk if it did not already carry `T` (spec.md §4.5's migration
    /// algorithm).
    pub fn add_component<T: Copy + 'static>(&mut self, id: EntityId, value: T) -> Result<(), WorldError> {
        let component_id = self.schema.component_id::<T>().ok_or(WorldError::NotRegistered)?;
        let slot = *self.slots.get(id)?;
        let src_def = *self.chunks.get(slot.chunk).definition();
        if src_def.cmask.contains(component_id.index()) {
            unsafe {
                self.chunks
                    .get_mut(slot.chunk)
                    .set_component_bytes(slot.row as usize, component_id, &value as *const T as *const u8);
            }
            return Ok(());
        }
        let dst_chunk = self
            .chunks
            .get_or_create_with_added_component(slot.chunk, component_id, &self.schema);
        let new_row = self.migrate_row(id, slot.chunk, dst_chunk)?;
        unsafe {
            self.chunks
                .get_mut(dst_chunk)
                .set_component_bytes(new_row, component_id, &value as *const T as *const u8);
        }
        Ok(())
    }

    /// Removes component `T` from `id`, migrating its row to the chunk
    /// without `T`. A no-op (returns `Ok`) if the entity never had it.
    pub fn remove_component<T: Copy + 'static>(&mut self, id: EntityId) -> Result<(), WorldError> {
        let component_id = self.schema.component_id::<T>().ok_or(WorldError::NotRegistered)?;
        let slot = *self.slots.get(id)?;
        let src_def = *self.chunks.get(slot.chunk).definition();
        if !src_def.cmask.contains(component_id.index()) {
            return Ok(());
        }
        let dst_chunk = self
            .chunks
            .get_or_create_with_removed_component(slot.chunk, component_id, &self.schema);
        self.migrate_row(id, slot.chunk, dst_chunk)?;
        Ok(())
    }

    /// Reads component `T` on `id`.
    pub fn get_component<T: Copy + 'static>(&self, id: EntityId) -> Result<&T, WorldError> {
        let component_id = self.schema.component_id::<T>().ok_or(WorldError::NotRegistered)?;
        let slot = self.slots.get(id)?;
        let chunk = self.chunks.get(slot.chunk);
        let ptr = chunk
            .component_ptr(slot.row as usize, component_id)
            .ok_or(WorldError::MissingComponent { entity: id })?;
        Ok(unsafe { &*(ptr as *const T) })
    }

    /// Mutably accesses component `T` on `id`.
    pub fn get_component_mut<T: Copy + 'static>(&mut self, id: EntityId) -> Result<&mut T, WorldError> {
        let component_id = self.schema.component_id::<T>().ok_or(WorldError::NotRegistered)?;
        let slot = *self.slots.get(id)?;
        let chunk = self.chunks.get_mut(slot.chunk);
        let ptr = chunk
            .component_ptr_mut(slot.row as usize, component_id)
            .ok_or(WorldError::MissingComponent { entity: id })?;
        Ok(unsafe { &mut *(ptr as *mut T) })
    }

    /// Whether `id`'s chunk carries component `T`.
    pub fn has_component<T: Copy + 'static>(&self, id: EntityId) -> Result<bool, WorldError> {
        let component_id = self.schema.component_id::<T>().ok_or(WorldError::NotRegistered)?;
        let slot = self.slots.get(id)?;
        Ok(self.chunks.get(slot.chunk).definition().cmask.contains(component_id.index()))
    }

    // -- tags ---------------------------------------------------------------

    /// Adds tag `T` to `id`, migrating its row. A no-op if already present.
    pub fn add_tag<T: 'static>(&mut self, id: EntityId) -> Result<(), WorldError> {
        let tag_id = self.schema.tag_id::<T>().ok_or(WorldError::NotRegistered)?;
        self.add_tag_by_id(id, tag_id)
    }

    /// Removes tag `T` from `id`, migrating its row. A no-op if absent.
    pub fn remove_tag<T: 'static>(&mut self, id: EntityId) -> Result<(), WorldError> {
        let tag_id = self.schema.tag_id::<T>().ok_or(WorldError::NotRegistered)?;
        self.remove_tag_by_id(id, tag_id)
    }

    /// Whether `id`'s chunk carries tag `T`.
    pub fn has_tag<T: 'static>(&self, id: EntityId) -> Result<bool, WorldError> {
        let tag_id = self.schema.tag_id::<T>().ok_or(WorldError::NotRegistered)?;
        let slot = self.slots.get(id)?;
        Ok(self.chunks.get(slot.chunk).definition().tmask.contains(tag_id.index()))
    }

    pub(crate) fn add_tag_by_id(&mut self, id: EntityId, tag_id: TagId) -> Result<(), WorldError> {
        let slot = *self.slots.get(id)?;
        if self.chunks.get(slot.chunk).definition().tmask.contains(tag_id.index()) {
            return Ok(());
        }
        let dst = self.chunks.get_or_create_with_added_tag(slot.chunk, tag_id, &self.schema);
        self.migrate_row(id, slot.chunk, dst)?;
        Ok(())
    }

    pub(crate) fn remove_tag_by_id(&mut self, id: EntityId, tag_id: TagId) -> Result<(), WorldError> {
        let slot = *self.slots.get(id)?;
        if !self.chunks.get(slot.chunk).definition().tmask.contains(tag_id.index()) {
            return Ok(());
        }
        let dst = self.chunks.get_or_create_with_removed_tag(slot.chunk, tag_id, &self.schema);
        self.migrate_row(id, slot.chunk, dst)?;
        Ok(())
    }

    // -- arrays ---------------------------------------------------------

    /// Creates a per-entity array of `len` zero-initialized `T` elements,
    /// migrating `id`'s row (the array's presence is part of its Definition).
    pub fn create_array<T: Copy + 'static>(&mut self, id: EntityId, len: usize) -> Result<(), WorldError> {
        let array_id = self.schema.array_id::<T>().ok_or(WorldError::NotRegistered)?;
        let slot = *self.slots.get(id)?;
        let already_present = self.chunks.get(slot.chunk).definition().amask.contains(array_id.index());
        if !already_present {
            let dst = self.chunks.get_or_create_with_added_array(slot.chunk, array_id, &self.schema);
            self.migrate_row(id, slot.chunk, dst)?;
            self.slots.get_mut(id)?.contains_arrays = true;
        }
        self.arrays.create(id, array_id, std::mem::size_of::<T>(), len);
        Ok(())
    }

    /// Destroys the per-entity array of type `T`, migrating `id`'s row.
    pub fn destroy_array<T: Copy + 'static>(&mut self, id: EntityId) -> Result<(), WorldError> {
        let array_id = self.schema.array_id::<T>().ok_or(WorldError::NotRegistered)?;
        let slot = *self.slots.get(id)?;
        if !self.chunks.get(slot.chunk).definition().amask.contains(array_id.index()) {
            return Ok(());
        }
        let dst = self.chunks.get_or_create_with_removed_array(slot.chunk, array_id, &self.schema);
        self.migrate_row(id, slot.chunk, dst)?;
        self.arrays.destroy(id, array_id);
        let new_def = *self.chunks.get(dst).definition();
        self.slots.get_mut(id)?.contains_arrays = !new_def.amask.is_empty();
        Ok(())
    }

    /// Resizes the per-entity array of type `T`.
    pub fn resize_array<T: Copy + 'static>(&mut self, id: EntityId, new_len: usize) -> Result<(), WorldError> {
        let array_id = self.schema.array_id::<T>().ok_or(WorldError::NotRegistered)?;
        self.slots.get(id)?;
        self.arrays
            .resize(id, array_id, new_len)
            .map(|_| ())
            .ok_or(WorldError::MissingArray { entity: id })
    }

    /// Reads the per-entity array of type `T` as a typed slice.
    pub fn get_array<T: Copy + 'static>(&self, id: EntityId) -> Result<&[T], WorldError> {
        let array_id = self.schema.array_id::<T>().ok_or(WorldError::NotRegistered)?;
        self.slots.get(id)?;
        let bytes = self.arrays.get(id, array_id).ok_or(WorldError::MissingArray { entity: id })?;
        Ok(unsafe { std::slice::from_raw_parts(bytes.as_ptr() as *const T, bytes.len() / std::mem::size_of::<T>()) })
    }

    /// Overwrites `count` elements of the per-entity array of type `T`
    /// starting at `index`.
    pub fn set_array_element<T: Copy + 'static>(
        &mut self,
        id: EntityId,
        index: usize,
        values: &[T],
    ) -> Result<(), WorldError> {
        let array_id = self.schema.array_id::<T>().ok_or(WorldError::NotRegistered)?;
        self.slots.get(id)?;
        let bytes = unsafe {
            std::slice::from_raw_parts(values.as_ptr() as *const u8, std::mem::size_of_val(values))
        };
        self.arrays
            .set_elements(id, array_id, index, values.len(), bytes)
            .ok_or(WorldError::OutOfRange)
    }

    // -- hierarchy --------------------------------------------------------

    /// Sets `child`'s parent to `parent` (or detaches it if `None`), rejecting
    /// moves that would create a cycle.
    pub fn set_parent(&mut self, child: EntityId, parent: Option<EntityId>) -> Result<(), WorldError> {
        self.slots.get(child)?;
        if let Some(p) = parent {
            self.slots.get(p)?;
            if p == child || self.is_ancestor(p, child)? {
                return Err(WorldError::CycleInHierarchy);
            }
        }
        self.detach_from_parent(child)?;
        if let Some(p) = parent {
            let first = self.slots.get(p)?.first_child;
            {
                let child_slot = self.slots.get_mut(child)?;
                child_slot.parent = p;
                child_slot.next_sibling = first;
                child_slot.prev_sibling = EntityId::NONE;
            }
            if !first.is_none() {
                self.slots.get_mut(first)?.prev_sibling = child;
            }
            let parent_slot = self.slots.get_mut(p)?;
            parent_slot.first_child = child;
            parent_slot.child_count += 1;
            let ancestor_disabled = self.effective_disabled(self.slots.get(p)?.state);
            self.mark_subtree_depth_outdated(child)?;
            self.reconcile_disabled_state(child, ancestor_disabled)?;
        }
        Ok(())
    }

    /// `true` iff `ancestor` appears somewhere above `node` in the hierarchy.
    fn is_ancestor(&self, node: EntityId, ancestor: EntityId) -> Result<bool, WorldError> {
        let mut current = self.slots.get(node)?.parent;
        while !current.is_none() {
            if current == ancestor {
                return Ok(true);
            }
            current = self.slots.get(current)?.parent;
        }
        Ok(false)
    }

    fn detach_from_parent(&mut self, child: EntityId) -> Result<(), WorldError> {
        let (parent, prev, next) = {
            let slot = self.slots.get(child)?;
            (slot.parent, slot.prev_sibling, slot.next_sibling)
        };
        if parent.is_none() {
            return Ok(());
        }
        if prev.is_none() {
            self.slots.get_mut(parent)?.first_child = next;
        } else {
            self.slots.get_mut(prev)?.next_sibling = next;
        }
        if !next.is_none() {
            self.slots.get_mut(next)?.prev_sibling = prev;
        }
        let slot = self.slots.get_mut(child)?;
        slot.parent = EntityId::NONE;
        slot.next_sibling = EntityId::NONE;
        slot.prev_sibling = EntityId::NONE;
        self.slots.get_mut(parent)?.child_count -= 1;
        Ok(())
    }

    /// Marks `id` and every descendant's cached depth stale, since reparenting
    /// `id` changes the depth of everything below it too.
    fn mark_subtree_depth_outdated(&mut self, id: EntityId) -> Result<(), WorldError> {
        self.slots.get_mut(id)?.depth_outdated = true;
        let mut child = self.slots.get(id)?.first_child;
        while !child.is_none() {
            let next = self.slots.get(child)?.next_sibling;
            self.mark_subtree_depth_outdated(child)?;
            child = next;
        }
        Ok(())
    }

    /// Depth of `id` in the hierarchy (root entities have depth 0), recomputed
    /// lazily from the parent chain (spec.md §4.5).
    pub fn depth(&mut self, id: EntityId) -> Result<i32, WorldError> {
        let slot = *self.slots.get(id)?;
        if !slot.depth_outdated {
            return Ok(slot.depth);
        }
        let depth = if slot.parent.is_none() {
            0
        } else {
            self.depth(slot.parent)? + 1
        };
        let slot = self.slots.get_mut(id)?;
        slot.depth = depth;
        slot.depth_outdated = false;
        Ok(depth)
    }

    // -- enabled / disabled state --------------------------------------

    fn effective_disabled(&self, state: SlotState) -> bool {
        matches!(state, SlotState::Disabled | SlotState::DisabledByAncestor)
    }

    /// Explicitly enables or disables `id`, propagating `DisabledByAncestor`
    /// to descendants that were not themselves explicitly disabled (spec.md
    /// §4.5, testable scenario 4).
    pub fn set_enabled(&mut self, id: EntityId, enabled: bool) -> Result<(), WorldError> {
        let parent = self.slots.get(id)?.parent;
        let ancestor_disabled = if parent.is_none() {
            false
        } else {
            self.effective_disabled(self.slots.get(parent)?.state)
        };
        let old_state = self.slots.get(id)?.state;
        let old_effective = self.effective_disabled(old_state);
        let new_state = if !enabled {
            SlotState::Disabled
        } else if ancestor_disabled {
            SlotState::DisabledByAncestor
        } else {
            SlotState::Enabled
        };
        let new_effective = self.effective_disabled(new_state);
        self.slots.get_mut(id)?.state = new_state;
        if old_effective != new_effective {
            let tag = self.disabled_tag;
            if new_effective {
                self.add_tag_by_id(id, tag)?;
            } else {
                self.remove_tag_by_id(id, tag)?;
            }
        }
        self.cascade_disabled_to_children(id, new_effective)?;
        Ok(())
    }

    /// Whether `id` is currently enabled (neither explicitly disabled nor
    /// disabled by an ancestor).
    pub fn is_enabled(&self, id: EntityId) -> Result<bool, WorldError> {
        Ok(matches!(self.slots.get(id)?.state, SlotState::Enabled))
    }

    /// Applies `ancestor_disabled` to `id`'s non-explicitly-disabled
    /// descendants, without touching subtrees rooted at an explicitly
    /// disabled descendant (they already carry the tag and stay disabled
    /// regardless of their own ancestors' state).
    fn reconcile_disabled_state(&mut self, id: EntityId, ancestor_disabled: bool) -> Result<(), WorldError> {
        let state = self.slots.get(id)?.state;
        if state == SlotState::Disabled {
            return Ok(());
        }
        let old_effective = self.effective_disabled(state);
        let new_state = if ancestor_disabled {
            SlotState::DisabledByAncestor
        } else {
            SlotState::Enabled
        };
        let new_effective = self.effective_disabled(new_state);
        self.slots.get_mut(id)?.state = new_state;
        if old_effective != new_effective {
            let tag = self.disabled_tag;
            if new_effective {
                self.add_tag_by_id(id, tag)?;
            } else {
                self.remove_tag_by_id(id, tag)?;
            }
        }
        self.cascade_disabled_to_children(id, new_effective)
    }

    fn cascade_disabled_to_children(&mut self, id: EntityId, ancestor_disabled: bool) -> Result<(), WorldError> {
        let mut child = self.slots.get(id)?.first_child;
        while !child.is_none() {
            let next = self.slots.get(child)?.next_sibling;
            self.reconcile_disabled_state(child, ancestor_disabled)?;
            child = next;
        }
        Ok(())
    }

    // -- references ---------------------------------------------------------

    /// Adds a local reference from `src` to `target`, returning a stable
    /// 1-based `rint` handle.
    pub fn add_reference(&mut self, src: EntityId, target: EntityId) -> Result<u32, WorldError> {
        self.slots.get(target)?;
        let slot = *self.slots.get(src)?;
        let at_tail = (slot.reference_start + slot.reference_count) as usize == self.references.len();
        if slot.reference_count == 0 || at_tail {
            if slot.reference_count == 0 {
                let start = self.references.len() as u32;
                self.references.push(target);
                let slot = self.slots.get_mut(src)?;
                slot.reference_start = start;
                slot.reference_count = 1;
            } else {
                self.references.push(target);
                self.slots.get_mut(src)?.reference_count += 1;
            }
        } else {
            // Relocate this entity's span to the tail so it stays contiguous.
            let old_start = slot.reference_start as usize;
            let old_count = slot.reference_count as usize;
            let mut span: Vec<EntityId> = self.references[old_start..old_start + old_count].to_vec();
            span.push(target);
            let new_start = self.references.len() as u32;
            self.references.extend(span);
            let slot = self.slots.get_mut(src)?;
            slot.reference_start = new_start;
            slot.reference_count += 1;
        }
        Ok(self.slots.get(src)?.reference_count)
    }

    /// Resolves a local reference `rint` on `src` to its target entity.
    pub fn get_reference(&self, src: EntityId, rint: u32) -> Result<EntityId, WorldError> {
        let slot = self.slots.get(src)?;
        if rint == 0 || rint > slot.reference_count {
            return Err(WorldError::NoSuchReference { rint });
        }
        let target = self.references[(slot.reference_start + rint - 1) as usize];
        if target.is_none() {
            return Err(WorldError::NoSuchReference { rint });
        }
        Ok(target)
    }

    /// Tombstones local reference `rint` on `src`. Other references on the
    /// same entity remain valid (spec.md §8's reference-stability law).
    pub fn remove_reference(&mut self, src: EntityId, rint: u32) -> Result<(), WorldError> {
        let slot = *self.slots.get(src)?;
        if rint == 0 || rint > slot.reference_count {
            return Err(WorldError::NoSuchReference { rint });
        }
        self.references[(slot.reference_start + rint - 1) as usize] = EntityId::NONE;
        Ok(())
    }

    // -- internal: row migration ---------------------------------------

    /// Moves `id`'s row from `src` to `dst`, patching both `id`'s slot and
    /// the slot of whatever entity got swapped into the vacated source row.
    /// All-or-nothing: both chunks are resolved and the entity validated
    /// before any data moves (spec.md §7's "no half-migrated rows" policy).
    fn migrate_row(&mut self, id: EntityId, src: ChunkId, dst: ChunkId) -> Result<usize, WorldError> {
        if src == dst {
            return Ok(self.slots.get(id)?.row as usize);
        }
        let src_row = self.slots.get(id)?.row as usize;
        let (src_chunk, dst_chunk) = self.chunks.get_pair_mut(src, dst);
        let (new_row, swapped) = src_chunk.move_row_to(src_row, dst_chunk, id);
        if let Some(swapped_entity) = swapped {
            self.slots.get_mut(swapped_entity)?.row = src_row as u32;
        }
        let slot = self.slots.get_mut(id)?;
        slot.chunk = dst;
        slot.row = new_row as u32;
        trace!(entity = ?id, from = ?src, to = ?dst, "migrated row");
        Ok(new_row)
    }

    pub(crate) fn chunk_definition(&self, chunk: ChunkId) -> &Definition {
        self.chunks.get(chunk).definition()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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

    fn world_with_position_velocity() -> World {
        let mut world = World::new();
        world.register_component::<Position>("Position").unwrap();
        world.register_component::<Velocity>("Velocity").unwrap();
        world
    }

    #[test]
    fn add_component_migrates_and_preserves_existing() {
        let mut world = world_with_position_velocity();
        let e = world.create_entity();
        world.add_component(e, Position { x: 1.0, y: 2.0 }).unwrap();
        assert_eq!(world.get_component::<Position>(e).unwrap(), &Position { x: 1.0, y: 2.0 });
        world.add_component(e, Velocity { x: 3.0, y: 4.0 }).unwrap();
        assert_eq!(world.get_component::<Position>(e).unwrap(), &Position { x: 1.0, y: 2.0 });
        assert_eq!(world.get_component::<Velocity>(e).unwrap(), &Velocity { x: 3.0, y: 4.0 });
    }

    #[test]
    fn remove_then_add_returns_to_equivalent_chunk() {
        let mut world = world_with_position_velocity();
        let e = world.create_entity();
        world.add_component(e, Position { x: 1.0, y: 1.0 }).unwrap();
        let chunk_before = world.slot(e).unwrap().chunk;
        world.add_component(e, Velocity { x: 0.0, y: 0.0 }).unwrap();
        world.remove_component::<Velocity>(e).unwrap();
        let chunk_after = world.slot(e).unwrap().chunk;
        assert_eq!(chunk_before, chunk_after);
    }

    #[test]
    fn swap_with_last_updates_swapped_slot_row() {
        let mut world = world_with_position_velocity();
        let entities: Vec<_> = (0..5)
            .map(|i| {
                let e = world.create_entity();
                world.add_component(e, Position { x: i as f32, y: 0.0 }).unwrap();
                e
            })
            .collect();
        world.destroy_entity(entities[1]).unwrap();
        assert_eq!(world.slot(entities[4]).unwrap().row, 1);
    }

    #[test]
    fn set_parent_rejects_cycle() {
        let mut world = World::new();
        let a = world.create_entity();
        let b = world.create_entity();
        world.set_parent(b, Some(a)).unwrap();
        let err = world.set_parent(a, Some(b)).unwrap_err();
        assert_eq!(err, WorldError::CycleInHierarchy);
    }

    #[test]
    fn disabling_parent_propagates_to_children() {
        let mut world = World::new();
        let parent = world.create_entity();
        let child = world.create_entity();
        world.set_parent(child, Some(parent)).unwrap();
        world.set_enabled(parent, false).unwrap();
        assert!(!world.is_enabled(child).unwrap());
        world.set_enabled(parent, true).unwrap();
        assert!(world.is_enabled(child).unwrap());
    }

    #[test]
    fn explicitly_disabled_child_stays_disabled_after_parent_reenabled() {
        let mut world = World::new();
        let parent = world.create_entity();
        let child = world.create_entity();
        world.set_parent(child, Some(parent)).unwrap();
        world.set_enabled(parent, false).unwrap();
        world.set_enabled(child, false).unwrap();
        world.set_enabled(parent, true).unwrap();
        assert!(!world.is_enabled(child).unwrap());
    }

    #[test]
    fn reference_round_trip_and_stability() {
        let mut world = World::new();
        let a = world.create_entity();
        let b = world.create_entity();
        let c = world.create_entity();
        let rint_b = world.add_reference(a, b).unwrap();
        let rint_c = world.add_reference(a, c).unwrap();
        assert_eq!(world.get_reference(a, rint_b).unwrap(), b);
        world.remove_reference(a, rint_b).unwrap();
        assert!(world.get_reference(a, rint_b).is_err());
        assert_eq!(world.get_reference(a, rint_c).unwrap(), c);
    }

    #[test]
    fn destroy_entity_frees_arrays_and_detaches_children() {
        let mut world = World::new();
        world.register_array::<u32>("u32s").unwrap();
        let parent = world.create_entity();
        let child = world.create_entity();
        world.set_parent(child, Some(parent)).unwrap();
        world.create_array::<u32>(parent, 4).unwrap();
        world.destroy_entity(parent).unwrap();
        assert!(!world.is_alive(parent));
        assert!(!world.is_alive(child));
    }

    #[test]
    fn array_create_destroy_round_trip_restores_chunk() {
        let mut world = World::new();
        world.register_array::<u32>("u32s").unwrap();
        let e = world.create_entity();
        let chunk_before = world.slot(e).unwrap().chunk;
        world.create_array::<u32>(e, 2).unwrap();
        world.destroy_array::<u32>(e).unwrap();
        assert_eq!(world.slot(e).unwrap().chunk, chunk_before);
    }
}
