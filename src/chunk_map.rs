//! Open-addressed interning table: [`Definition`] → unique [`Chunk`]
//! (spec.md §4.4).
//!
//! Chunk storage itself lives in a plain `Vec<Chunk>` indexed by [`ChunkId`],
//! which also gives query iteration its "internal order" (spec.md §4.6):
//! insertion order, stable across iterations as long as nothing mutates the
//! map in between. A separate open-addressed probe table maps a
//! `Definition`'s hash to a `ChunkId` and is rebuilt on resize; it never
//! itself determines enumeration order.

use std::hash::{Hash, Hasher};

use crate::chunk::Chunk;
use crate::definition::Definition;
use crate::schema::{ArrayId, ComponentId, Schema, TagId};

const INITIAL_CAPACITY: usize = 32;
const GROWTH_FACTOR: usize = 4;

/// Identifies a chunk within a [`ChunkMap`]; indexes into its backing `Vec`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkId(pub(crate) u32);

impl ChunkId {
    /// Sentinel used by free slot-table entries; never a valid chunk index.
    pub const INVALID: ChunkId = ChunkId(u32::MAX);

    /// The default chunk (empty Definition) is always interned first.
    pub const DEFAULT: ChunkId = ChunkId(0);

    /// Raw index, used by the snapshot codec.
    pub fn index(&self) -> u32 {
        self.0
    }
}

#[derive(Clone, Copy)]
enum Slot {
    Empty,
    Occupied { definition: Definition, chunk: ChunkId },
}

fn hash_definition(definition: &Definition) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    definition.hash(&mut hasher);
    hasher.finish()
}

/// Interns one [`Chunk`] per distinct [`Definition`].
pub struct ChunkMap {
    chunks: Vec<Chunk>,
    table: Vec<Slot>,
    count: usize,
}

impl ChunkMap {
    /// Creates a map with the pre-created default chunk at [`ChunkId::DEFAULT`].
    pub fn new(schema: &Schema) -> Self {
        let mut map = ChunkMap {
            chunks: Vec::new(),
            table: vec![Slot::Empty; INITIAL_CAPACITY],
            count: 0,
        };
        let default_chunk = Chunk::new(Definition::EMPTY, schema);
        map.chunks.push(default_chunk);
        map.insert_index(Definition::EMPTY, ChunkId(0));
        map
    }

    fn mask(&self) -> usize {
        self.table.len() - 1
    }

    fn probe(&self, definition: &Definition) -> Option<usize> {
        let hash = hash_definition(definition);
        let mask = self.mask();
        let mut index = (hash as usize) & mask;
        for _ in 0..self.table.len() {
            match &self.table[index] {
                Slot::Empty => return Some(index),
                Slot::Occupied { definition: d, .. } if d == definition => return Some(index),
                Slot::Occupied { .. } => index = (index + 1) & mask,
            }
        }
        None
    }

    fn insert_index(&mut self, definition: Definition, chunk: ChunkId) {
        if self.count + 1 >= self.table.len() - 1 {
            self.grow();
        }
        let slot = self.probe(&definition).expect("table has free capacity after grow");
        self.table[slot] = Slot::Occupied { definition, chunk };
        self.count += 1;
    }

    fn grow(&mut self) {
        let new_capacity = self.table.len() * GROWTH_FACTOR;
        let old_table = std::mem::replace(&mut self.table, vec![Slot::Empty; new_capacity]);
        self.count = 0;
        for slot in old_table {
            if let Slot::Occupied { definition, chunk } = slot {
                let index = self.probe(&definition).expect("freshly grown table has room");
                self.table[index] = Slot::Occupied { definition, chunk };
                self.count += 1;
            }
        }
    }

    /// Looks up the chunk for `definition` without creating one.
    pub fn find(&self, definition: &Definition) -> Option<ChunkId> {
        let hash = hash_definition(definition);
        let mask = self.mask();
        let mut index = (hash as usize) & mask;
        for _ in 0..self.table.len() {
            match &self.table[index] {
                Slot::Empty => return None,
                Slot::Occupied { definition: d, chunk } if d == definition => return Some(*chunk),
                Slot::Occupied { .. } => index = (index + 1) & mask,
            }
        }
        None
    }

    /// Returns the interned chunk for `definition`, creating it if absent.
    pub fn get_or_create(&mut self, definition: Definition, schema: &Schema) -> ChunkId {
        if definition.is_empty() {
            return ChunkId::DEFAULT;
        }
        if let Some(id) = self.find(&definition) {
            return id;
        }
        let id = ChunkId(self.chunks.len() as u32);
        self.chunks.push(Chunk::new(definition, schema));
        self.insert_index(definition, id);
        id
    }

    /// Convenience for migrations: the destination chunk after adding
    /// component `id` to `src`'s Definition.
    pub fn get_or_create_with_added_component(
        &mut self,
        src: ChunkId,
        id: ComponentId,
        schema: &Schema,
    ) -> ChunkId {
        let def = self.chunks[src.0 as usize].definition().with_component(id);
        self.get_or_create(def, schema)
    }

    /// Convenience for migrations: the destination chunk after removing
    /// component `id` from `src`'s Definition.
    pub fn get_or_create_with_removed_component(
        &mut self,
        src: ChunkId,
        id: ComponentId,
        schema: &Schema,
    ) -> ChunkId {
        let def = self.chunks[src.0 as usize].definition().without_component(id);
        self.get_or_create(def, schema)
    }

    /// Destination chunk after adding array type `id`.
    pub fn get_or_create_with_added_array(
        &mut self,
        src: ChunkId,
        id: ArrayId,
        schema: &Schema,
    ) -> ChunkId {
        let def = self.chunks[src.0 as usize].definition().with_array(id);
        self.get_or_create(def, schema)
    }

    /// Destination chunk after removing array type `id`.
    pub fn get_or_create_with_removed_array(
        &mut self,
        src: ChunkId,
        id: ArrayId,
        schema: &Schema,
    ) -> ChunkId {
        let def = self.chunks[src.0 as usize].definition().without_array(id);
        self.get_or_create(def, schema)
    }

    /// Destination chunk after adding tag `id`.
    pub fn get_or_create_with_added_tag(&mut self, src: ChunkId, id: TagId, schema: &Schema) -> ChunkId {
        let def = self.chunks[src.0 as usize].definition().with_tag(id);
        self.get_or_create(def, schema)
    }

    /// Destination chunk after removing tag `id`.
    pub fn get_or_create_with_removed_tag(
        &mut self,
        src: ChunkId,
        id: TagId,
        schema: &Schema,
    ) -> ChunkId {
        let def = self.chunks[src.0 as usize].definition().without_tag(id);
        self.get_or_create(def, schema)
    }

    /// Immutable access to a chunk.
    #[inline]
    pub fn get(&self, id: ChunkId) -> &Chunk {
        &self.chunks[id.0 as usize]
    }

    /// Mutable access to a chunk.
    #[inline]
    pub fn get_mut(&mut self, id: ChunkId) -> &mut Chunk {
        &mut self.chunks[id.0 as usize]
    }

    /// Mutable access to two distinct chunks at once, as needed for row
    /// migration. Panics if `a == b`.
    pub fn get_pair_mut(&mut self, a: ChunkId, b: ChunkId) -> (&mut Chunk, &mut Chunk) {
        assert_ne!(a.0, b.0, "get_pair_mut requires distinct chunk ids");
        if a.0 < b.0 {
            let (left, right) = self.chunks.split_at_mut(b.0 as usize);
            (&mut left[a.0 as usize], &mut right[0])
        } else {
            let (left, right) = self.chunks.split_at_mut(a.0 as usize);
            (&mut right[0], &mut left[b.0 as usize])
        }
    }

    /// Iterates all interned chunks in stable internal (insertion) order,
    /// each paired with its `ChunkId`.
    pub fn iter(&self) -> impl Iterator<Item = (ChunkId, &Chunk)> {
        self.chunks
            .iter()
            .enumerate()
            .map(|(i, chunk)| (ChunkId(i as u32), chunk))
    }

    /// Number of interned chunks, including the default chunk.
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// Disposes all non-default chunks and resets occupancy, retaining the
    /// default chunk at [`ChunkId::DEFAULT`].
    pub fn clear(&mut self, schema: &Schema) {
        self.chunks.truncate(1);
        self.chunks[0] = Chunk::new(Definition::EMPTY, schema);
        self.table = vec![Slot::Empty; INITIAL_CAPACITY];
        self.count = 0;
        self.insert_index(Definition::EMPTY, ChunkId(0));
    }
}
