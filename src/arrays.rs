//! Per-entity array store: variable-length element buffers independent of
//! chunk columns (spec.md §3, §4.5).
//!
//! Keyed by `(EntityId, ArrayId)` rather than carried inside the chunk row,
//! so migrating a row between chunks never needs to touch array bytes — only
//! the slot's `contains_arrays` flag and the chunk's `amask` bit change.

use std::collections::HashMap;

use crate::entity::EntityId;
use crate::schema::ArrayId;

struct ArrayBuffer {
    bytes: Vec<u8>,
    element_size: usize,
    len: usize,
}

impl ArrayBuffer {
    fn new(element_size: usize, len: usize) -> Self {
        ArrayBuffer {
            bytes: vec![0u8; element_size * len],
            element_size,
            len,
        }
    }
}

/// Side table of per-entity array buffers.
#[derive(Default)]
pub struct ArrayStore {
    entries: HashMap<(EntityId, ArrayId), ArrayBuffer>,
}

impl ArrayStore {
    /// Creates a new array of `len` zero-initialized elements for `entity`.
    /// Returns the fresh buffer's bytes. Overwrites any existing array of
    /// the same type on the same entity.
    pub fn create(&mut self, entity: EntityId, id: ArrayId, element_size: usize, len: usize) -> &mut [u8] {
        let buffer = ArrayBuffer::new(element_size, len);
        self.entries.insert((entity, id), buffer);
        &mut self.entries.get_mut(&(entity, id)).unwrap().bytes
    }

    /// Removes the array, if present.
    pub fn destroy(&mut self, entity: EntityId, id: ArrayId) -> bool {
        self.entries.remove(&(entity, id)).is_some()
    }

    /// Removes every array belonging to `entity` (used on entity destroy).
    pub fn destroy_all_for(&mut self, entity: EntityId) {
        self.entries.retain(|(e, _), _| *e != entity);
    }

    /// Whether `entity` currently owns an array of type `id`.
    pub fn contains(&self, entity: EntityId, id: ArrayId) -> bool {
        self.entries.contains_key(&(entity, id))
    }

    /// Read-only view of the array's bytes, if present.
    pub fn get(&self, entity: EntityId, id: ArrayId) -> Option<&[u8]> {
        self.entries.get(&(entity, id)).map(|b| b.bytes.as_slice())
    }

    /// Mutable view of the array's bytes, if present.
    pub fn get_mut(&mut self, entity: EntityId, id: ArrayId) -> Option<&mut [u8]> {
        self.entries.get_mut(&(entity, id)).map(|b| b.bytes.as_mut_slice())
    }

    /// Element count of the array, if present.
    pub fn len_of(&self, entity: EntityId, id: ArrayId) -> Option<usize> {
        self.entries.get(&(entity, id)).map(|b| b.len)
    }

    /// Resizes the array to `new_len` elements, zero-extending growth and
    /// truncating shrinkage.
    pub fn resize(&mut self, entity: EntityId, id: ArrayId, new_len: usize) -> Option<&mut [u8]> {
        let buffer = self.entries.get_mut(&(entity, id))?;
        buffer.bytes.resize(buffer.element_size * new_len, 0);
        buffer.len = new_len;
        Some(buffer.bytes.as_mut_slice())
    }

    /// Iterates every `(entity, array type, element size, bytes)` entry, used
    /// by the World snapshot codec to dump the array side table.
    pub fn iter(&self) -> impl Iterator<Item = (EntityId, ArrayId, usize, &[u8])> {
        self.entries
            .iter()
            .map(|(&(e, id), buf)| (e, id, buf.element_size, buf.bytes.as_slice()))
    }

    /// Overwrites `count` contiguous elements starting at `index` with bytes
    /// from `src`, which must hold exactly `count * element_size` bytes.
    pub fn set_elements(
        &mut self,
        entity: EntityId,
        id: ArrayId,
        index: usize,
        count: usize,
        src: &[u8],
    ) -> Option<()> {
        let buffer = self.entries.get_mut(&(entity, id))?;
        if index + count > buffer.len {
            return None;
        }
        let start = index * buffer.element_size;
        let span = count * buffer.element_size;
        if src.len() != span {
            return None;
        }
        buffer.bytes[start..start + span].copy_from_slice(src);
        Some(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ArrayId;

    #[test]
    fn create_then_read() {
        let mut store = ArrayStore::default();
        let e = EntityId::new(1, 0);
        let id = ArrayId(0);
        store.create(e, id, 4, 3);
        assert_eq!(store.len_of(e, id), Some(3));
        assert_eq!(store.get(e, id).unwrap().len(), 12);
    }

    #[test]
    fn destroy_removes_entry() {
        let mut store = ArrayStore::default();
        let e = EntityId::new(1, 0);
        let id = ArrayId(0);
        store.create(e, id, 4, 1);
        assert!(store.destroy(e, id));
        assert!(store.get(e, id).is_none());
    }

    #[test]
    fn resize_zero_extends() {
        let mut store = ArrayStore::default();
        let e = EntityId::new(1, 0);
        let id = ArrayId(0);
        store.create(e, id, 1, 1);
        store.set_elements(e, id, 0, 1, &[7]).unwrap();
        store.resize(e, id, 3);
        let bytes = store.get(e, id).unwrap();
        assert_eq!(bytes, &[7, 0, 0]);
    }

    #[test]
    fn set_elements_out_of_range_fails() {
        let mut store = ArrayStore::default();
        let e = EntityId::new(1, 0);
        let id = ArrayId(0);
        store.create(e, id, 1, 2);
        assert!(store.set_elements(e, id, 1, 2, &[1, 2]).is_none());
    }
}
