//! Binary persistence (spec.md §6).
//!
//! Two independent codecs live here. [`encode_schema`]/[`decode_schema`]
//! implement the mandatory Schema block exactly as spec.md §6 lays it out
//! byte-for-byte, so it can be checked against another implementation's
//! output. [`capture_world`]/[`restore_world`] implement the "design-level,
//! optional" full-World snapshot on top of [`bincode`], which is present in
//! the teacher's workspace `Cargo.toml` but unused by `nomai-ecs` itself —
//! there is no in-pack example of its call pattern to imitate, so the derive
//! usage below follows bincode 2's documented API rather than a grounded
//! example.
//!
//! The World snapshot only covers what spec.md §6 names: chunk contents,
//! the array side table, and the reference vector. Hierarchy and
//! enabled/disabled state are not part of the wire format; restoring a
//! snapshot that contained disabled or parented entities will recreate their
//! components and tags (including the builtin disabled tag bit) but not the
//! `SlotState`/sibling-list bookkeeping layered on top of it.

use std::collections::HashMap;

use crate::bitmask::BitMask;
use crate::entity::EntityId;
use crate::error::WorldError;
use crate::schema::{ArrayId, ComponentId, Schema, TagId};
use crate::world::World;

const MAX_TYPES: usize = crate::bitmask::CAPACITY;

/// Total byte length of the Schema block (spec.md §6): 3 count bytes, a
/// 32-byte tag mask, a 1024-byte size table, and a 3072-byte hash table.
pub const SCHEMA_SNAPSHOT_LEN: usize = 3 + 32 + 1024 + 3072;

/// Decoded form of the Schema block. Unlike [`Schema`] itself, this carries
/// no Rust `TypeId` bindings or names — only what the binary format stores.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaSnapshot {
    pub component_count: u8,
    pub array_count: u8,
    pub tag_count: u8,
    pub tags_mask: BitMask,
    pub component_sizes: [u16; MAX_TYPES],
    pub array_sizes: [u16; MAX_TYPES],
    pub component_hashes: [u64; MAX_TYPES],
    pub array_hashes: [u64; MAX_TYPES],
    pub tag_hashes: [u64; MAX_TYPES],
}

/// Packs `schema` into the exact spec.md §6 byte layout.
pub fn encode_schema(schema: &Schema) -> Vec<u8> {
    let mut out = Vec::with_capacity(SCHEMA_SNAPSHOT_LEN);
    out.push(schema.component_count() as u8);
    out.push(schema.array_count() as u8);
    out.push(schema.tag_count() as u8);

    let tags_mask = BitMask::from_indices(0..schema.tag_count() as u8);
    out.extend_from_slice(&tags_mask.to_bytes());

    for i in 0..MAX_TYPES as u16 {
        let size = schema.component_size(ComponentId(i as u8)).unwrap_or(0);
        out.extend_from_slice(&size.to_le_bytes());
    }
    for i in 0..MAX_TYPES as u16 {
        let size = schema.array_size(ArrayId(i as u8)).unwrap_or(0);
        out.extend_from_slice(&size.to_le_bytes());
    }

    for i in 0..MAX_TYPES as u16 {
        let hash = schema.component_info(ComponentId(i as u8)).map(|t| t.type_hash).unwrap_or(0);
        out.extend_from_slice(&hash.to_le_bytes());
    }
    for i in 0..MAX_TYPES as u16 {
        let hash = schema.array_info(ArrayId(i as u8)).map(|t| t.type_hash).unwrap_or(0);
        out.extend_from_slice(&hash.to_le_bytes());
    }
    for i in 0..MAX_TYPES as u16 {
        let hash = schema.tag_info(TagId(i as u8)).map(|t| t.type_hash).unwrap_or(0);
        out.extend_from_slice(&hash.to_le_bytes());
    }

    debug_assert_eq!(out.len(), SCHEMA_SNAPSHOT_LEN);
    out
}

/// Inverse of [`encode_schema`].
pub fn decode_schema(bytes: &[u8]) -> Result<SchemaSnapshot, WorldError> {
    if bytes.len() != SCHEMA_SNAPSHOT_LEN {
        return Err(WorldError::OutOfRange);
    }
    let component_count = bytes[0];
    let array_count = bytes[1];
    let tag_count = bytes[2];

    let mut tags_mask_bytes = [0u8; 32];
    tags_mask_bytes.copy_from_slice(&bytes[3..35]);
    let tags_mask = BitMask::from_bytes(&tags_mask_bytes);

    let mut cursor = 35;
    let read_u16_table = |cursor: &mut usize| -> [u16; MAX_TYPES] {
        let mut table = [0u16; MAX_TYPES];
        for slot in table.iter_mut() {
            let mut buf = [0u8; 2];
            buf.copy_from_slice(&bytes[*cursor..*cursor + 2]);
            *slot = u16::from_le_bytes(buf);
            *cursor += 2;
        }
        table
    };
    let component_sizes = read_u16_table(&mut cursor);
    let array_sizes = read_u16_table(&mut cursor);

    let read_u64_table = |cursor: &mut usize| -> [u64; MAX_TYPES] {
        let mut table = [0u64; MAX_TYPES];
        for slot in table.iter_mut() {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(&bytes[*cursor..*cursor + 8]);
            *slot = u64::from_le_bytes(buf);
            *cursor += 8;
        }
        table
    };
    let component_hashes = read_u64_table(&mut cursor);
    let array_hashes = read_u64_table(&mut cursor);
    let tag_hashes = read_u64_table(&mut cursor);

    Ok(SchemaSnapshot {
        component_count,
        array_count,
        tag_count,
        tags_mask,
        component_sizes,
        array_sizes,
        component_hashes,
        array_hashes,
        tag_hashes,
    })
}

#[derive(Debug, Clone, bincode::Encode, bincode::Decode)]
struct ChunkSnapshot {
    cmask: [u8; 32],
    amask: [u8; 32],
    tmask: [u8; 32],
    entity_ids: Vec<u32>,
    component_columns: Vec<u8>,
}

#[derive(Debug, Clone, bincode::Encode, bincode::Decode)]
struct ArrayEntrySnapshot {
    entity_index: u32,
    array_id: u8,
    element_size: u16,
    bytes: Vec<u8>,
}

#[derive(Debug, Clone, bincode::Encode, bincode::Decode)]
struct ReferenceEntrySnapshot {
    entity_index: u32,
    target_index: u32,
}

/// Full-World binary snapshot (spec.md §6, design-level/optional): the
/// Schema block plus every chunk's rows, the array side table, and the
/// reference vector.
#[derive(Debug, Clone, bincode::Encode, bincode::Decode)]
pub struct WorldSnapshot {
    schema_block: Vec<u8>,
    chunks: Vec<ChunkSnapshot>,
    arrays: Vec<ArrayEntrySnapshot>,
    references: Vec<ReferenceEntrySnapshot>,
}

/// Captures `world`'s current state into a [`WorldSnapshot`].
pub fn capture_world(world: &World) -> WorldSnapshot {
    let schema_block = encode_schema(world.schema());

    let mut chunks = Vec::new();
    for (_chunk_id, chunk) in world.chunks.iter() {
        let definition = chunk.definition();
        let entity_ids: Vec<u32> = chunk.entities().iter().map(|e| e.index()).collect();
        let count = chunk.len();

        let mut component_columns = Vec::new();
        for bit in definition.cmask.iter() {
            let comp_id = ComponentId(bit);
            let size = world.schema().component_size(comp_id).unwrap_or(0) as usize;
            for row in 0..count {
                if let Some(ptr) = chunk.component_ptr(row, comp_id) {
                    let slice = unsafe { std::slice::from_raw_parts(ptr, size) };
                    component_columns.extend_from_slice(slice);
                }
            }
        }

        chunks.push(ChunkSnapshot {
            cmask: definition.cmask.to_bytes(),
            amask: definition.amask.to_bytes(),
            tmask: definition.tmask.to_bytes(),
            entity_ids,
            component_columns,
        });
    }

    let arrays = world
        .arrays_store()
        .iter()
        .map(|(entity, array_id, element_size, bytes)| ArrayEntrySnapshot {
            entity_index: entity.index(),
            array_id: array_id.index(),
            element_size: element_size as u16,
            bytes: bytes.to_vec(),
        })
        .collect();

    let mut references = Vec::new();
    for (_chunk_id, chunk) in world.chunks.iter() {
        for &entity in chunk.entities() {
            let Ok(slot) = world.slot(entity) else { continue };
            for i in 0..slot.reference_count {
                let target = world.references_raw()[(slot.reference_start + i) as usize];
                if !target.is_none() {
                    references.push(ReferenceEntrySnapshot {
                        entity_index: entity.index(),
                        target_index: target.index(),
                    });
                }
            }
        }
    }

    WorldSnapshot {
        schema_block,
        chunks,
        arrays,
        references,
    }
}

/// Restores `snapshot` into `world`, which must already have every
/// component/array/tag type the snapshot references registered under the
/// same names (the Schema block is not used to re-register types; it is
/// only there for cross-checking). Returns a map from the snapshot's stored
/// entity index to the freshly allocated [`EntityId`], since restore always
/// allocates new generations rather than reusing the original ones.
pub fn restore_world(world: &mut World, snapshot: &WorldSnapshot) -> Result<HashMap<u32, EntityId>, WorldError> {
    let mut remap: HashMap<u32, EntityId> = HashMap::new();

    for chunk_snapshot in &snapshot.chunks {
        let mut cmask_bytes = [0u8; 32];
        cmask_bytes.copy_from_slice(&chunk_snapshot.cmask);
        let cmask = BitMask::from_bytes(&cmask_bytes);
        let mut tmask_bytes = [0u8; 32];
        tmask_bytes.copy_from_slice(&chunk_snapshot.tmask);
        let tmask = BitMask::from_bytes(&tmask_bytes);

        let count = chunk_snapshot.entity_ids.len();
        let mut row_ids = Vec::with_capacity(count);
        for &old_index in &chunk_snapshot.entity_ids {
            let new_id = world.create_entity();
            remap.insert(old_index, new_id);
            row_ids.push(new_id);
        }

        let mut cursor = 0usize;
        for bit in cmask.iter() {
            let comp_id = ComponentId(bit);
            let size = world.schema().component_size(comp_id).ok_or(WorldError::NotRegistered)? as usize;
            for &row_entity in &row_ids {
                let bytes = &chunk_snapshot.component_columns[cursor..cursor + size];
                world.add_component_bytes(row_entity, comp_id, bytes)?;
                cursor += size;
            }
        }

        for bit in tmask.iter() {
            let tag_id = TagId(bit);
            for &row_entity in &row_ids {
                world.add_tag_by_id(row_entity, tag_id)?;
            }
        }
    }

    for entry in &snapshot.arrays {
        let new_id = *remap.get(&entry.entity_index).ok_or(WorldError::OutOfRange)?;
        world.create_array_raw(new_id, ArrayId(entry.array_id), entry.element_size as usize, &entry.bytes)?;
    }

    for entry in &snapshot.references {
        let src = *remap.get(&entry.entity_index).ok_or(WorldError::OutOfRange)?;
        let target = *remap.get(&entry.target_index).ok_or(WorldError::OutOfRange)?;
        world.add_reference(src, target)?;
    }

    Ok(remap)
}

/// Encodes a [`WorldSnapshot`] to bytes via `bincode`'s standard config.
pub fn encode_world(snapshot: &WorldSnapshot) -> Vec<u8> {
    bincode::encode_to_vec(snapshot, bincode::config::standard())
        .expect("WorldSnapshot fields are all bincode-encodable")
}

/// Decodes bytes produced by [`encode_world`].
pub fn decode_world(bytes: &[u8]) -> Result<WorldSnapshot, WorldError> {
    bincode::decode_from_slice(bytes, bincode::config::standard())
        .map(|(snapshot, _)| snapshot)
        .map_err(|_| WorldError::OutOfRange)
}
