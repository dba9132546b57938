//! Entity identity and the per-entity slot table.
//!
//! `EntityId` packs a generation counter into the high bits of a `u64`,
//! following the teacher's `nomai-ecs/src/entity.rs`. spec.md §3 asks for a
//! plain 32-bit non-zero entity ID with free-list recycling; spec.md §9's
//! open question explicitly endorses adding a generation subfield "to detect
//! use-after-free" as a correctness improvement, which is what the packed
//! `u64` here provides while still exposing the bare 32-bit index via
//! [`EntityId::index`].
//!
//! The [`Slot`] table extends the teacher's simpler `EntityLocation` with the
//! hierarchy and reference bookkeeping spec.md §3 requires (parent, depth,
//! state, child list, reference span).

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::chunk_map::ChunkId;
use crate::error::WorldError;

/// Entity index 0 is reserved as "none" (spec.md §3).
pub const NONE_INDEX: u32 = 0;

/// A stable entity handle: a 32-bit index plus a 32-bit generation counter.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityId(u64);

impl EntityId {
    /// The reserved "no entity" handle (index 0, generation 0).
    pub const NONE: EntityId = EntityId(0);

    pub(crate) fn new(index: u32, generation: u32) -> Self {
        EntityId(((generation as u64) << 32) | index as u64)
    }

    /// The raw 32-bit index component (spec.md §3's "32-bit non-zero
    /// integer" entity ID, before the added generation subfield).
    #[inline]
    pub fn index(&self) -> u32 {
        (self.0 & 0xFFFF_FFFF) as u32
    }

    /// The generation counter, bumped every time this index is recycled.
    #[inline]
    pub fn generation(&self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// Whether this handle is the reserved "none" sentinel.
    #[inline]
    pub fn is_none(&self) -> bool {
        self.index() == NONE_INDEX
    }

    /// Packs this handle into its raw `u64` representation.
    pub fn to_raw(self) -> u64 {
        self.0
    }

    /// Unpacks a raw `u64` representation produced by [`EntityId::to_raw`].
    pub fn from_raw(raw: u64) -> Self {
        EntityId(raw)
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index(), self.generation())
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Lifecycle state of a slot, tracking both explicit `setEnabled` calls and
/// ancestor propagation (spec.md §3, §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlotState {
    /// The index is on the free list; all other fields are meaningless.
    Free,
    /// Alive and enabled.
    Enabled,
    /// Alive but explicitly disabled via `setEnabled(id, false)`.
    Disabled,
    /// Alive, not explicitly disabled, but an ancestor is disabled.
    DisabledByAncestor,
}

/// Per-entity bookkeeping: chunk location, hierarchy, and reference span.
///
/// Children are tracked via an intrusive sibling list (`first_child`,
/// `next_sibling`, `prev_sibling`) rather than a `Vec<EntityId>` per parent,
/// so `setParent` is O(1) instead of O(children).
#[derive(Debug, Clone, Copy)]
pub struct Slot {
    pub(crate) state: SlotState,
    pub(crate) generation: u32,
    pub(crate) chunk: ChunkId,
    pub(crate) row: u32,
    pub(crate) parent: EntityId,
    pub(crate) first_child: EntityId,
    pub(crate) next_sibling: EntityId,
    pub(crate) prev_sibling: EntityId,
    pub(crate) child_count: u32,
    pub(crate) depth: i32,
    pub(crate) depth_outdated: bool,
    pub(crate) contains_arrays: bool,
    pub(crate) reference_start: u32,
    pub(crate) reference_count: u32,
    pub(crate) next_free: u32,
}

impl Slot {
    fn free(next_free: u32) -> Self {
        Slot {
            state: SlotState::Free,
            generation: 0,
            chunk: ChunkId::INVALID,
            row: 0,
            parent: EntityId::NONE,
            first_child: EntityId::NONE,
            next_sibling: EntityId::NONE,
            prev_sibling: EntityId::NONE,
            child_count: 0,
            depth: 0,
            depth_outdated: false,
            contains_arrays: false,
            reference_start: 0,
            reference_count: 0,
            next_free,
        }
    }

    /// `true` if this entity (or a visible ancestor) is disabled.
    pub fn is_effectively_enabled(&self) -> bool {
        matches!(self.state, SlotState::Enabled)
    }
}

/// The entity slot table: maps entity index to [`Slot`], with a free list for
/// recycling. Capacity is bounded by `u32::MAX - 1` (spec.md §6).
#[derive(Debug, Default)]
pub struct SlotTable {
    slots: Vec<Slot>,
    free_head: Option<u32>,
    live_count: u32,
}

impl SlotTable {
    /// Creates a slot table with index 0 permanently reserved as "none".
    pub fn new() -> Self {
        let mut table = SlotTable {
            slots: vec![Slot::free(u32::MAX)],
            free_head: None,
            live_count: 0,
        };
        table.slots[0].state = SlotState::Free;
        table
    }

    /// Allocates a fresh entity index (recycling from the free list,
    /// bumping its generation), returning the full handle.
    pub fn allocate(&mut self) -> EntityId {
        if let Some(index) = self.free_head {
            let slot = &mut self.slots[index as usize];
            self.free_head = (slot.next_free != u32::MAX).then_some(slot.next_free);
            slot.generation = slot.generation.wrapping_add(1);
            slot.state = SlotState::Enabled;
            self.live_count += 1;
            return EntityId::new(index, slot.generation);
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot::free(u32::MAX));
        let slot = &mut self.slots[index as usize];
        slot.state = SlotState::Enabled;
        self.live_count += 1;
        EntityId::new(index, slot.generation)
    }

    /// Returns `true` iff `id` refers to a currently live entity with a
    /// matching generation.
    pub fn is_alive(&self, id: EntityId) -> bool {
        if id.is_none() {
            return false;
        }
        match self.slots.get(id.index() as usize) {
            Some(slot) => slot.generation == id.generation() && slot.state != SlotState::Free,
            None => false,
        }
    }

    /// Looks up the slot for `id`, failing with [`WorldError::NoSuchEntity`]
    /// if it is not alive.
    pub fn get(&self, id: EntityId) -> Result<&Slot, WorldError> {
        if self.is_alive(id) {
            Ok(&self.slots[id.index() as usize])
        } else {
            Err(WorldError::NoSuchEntity { entity: id })
        }
    }

    /// Mutable version of [`SlotTable::get`].
    pub fn get_mut(&mut self, id: EntityId) -> Result<&mut Slot, WorldError> {
        if self.is_alive(id) {
            Ok(&mut self.slots[id.index() as usize])
        } else {
            Err(WorldError::NoSuchEntity { entity: id })
        }
    }

    /// Unchecked slot access by raw index, used internally once an index is
    /// already known to be valid (e.g. while walking a sibling list).
    pub(crate) fn slot_at(&self, index: u32) -> &Slot {
        &self.slots[index as usize]
    }

    pub(crate) fn slot_at_mut(&mut self, index: u32) -> &mut Slot {
        &mut self.slots[index as usize]
    }

    /// Frees `id`'s slot, returning it to the free list. The caller is
    /// responsible for detaching hierarchy/references/chunk row first.
    pub fn deallocate(&mut self, id: EntityId) {
        let index = id.index();
        let next_free = self.free_head.unwrap_or(u32::MAX);
        let slot = &mut self.slots[index as usize];
        *slot = Slot::free(next_free);
        self.free_head = Some(index);
        self.live_count -= 1;
    }

    /// Number of currently live entities.
    pub fn live_count(&self) -> u32 {
        self.live_count
    }

    /// Total slots ever allocated (including freed ones still in the
    /// vector), used by the snapshot codec to size its buffers.
    pub fn capacity(&self) -> u32 {
        self.slots.len() as u32
    }

    pub(crate) fn entity_handle(&self, index: u32) -> EntityId {
        EntityId::new(index, self.slots[index as usize].generation)
    }
}
