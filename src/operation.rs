//! The deferred Operation/Instruction stream: a serialized buffer of
//! structural-mutation opcodes that can be replayed against a [`World`]
//! later, possibly more than once (spec.md §4.7).
//!
//! Regrounds the teacher's `CommandBuffer`/`Command`/`apply()` FIFO-buffer
//! shape (`nomai-ecs/src/command.rs`) in the spec's closed opcode set and its
//! selection-cursor semantics. Unlike the teacher's buffer, which is cleared
//! and consumed by `apply`, an `Operation` is a reusable, serializable value:
//! `replay_into` takes `&self`, so the same instruction stream can be shipped
//! across a boundary and replayed on equivalent Worlds with identical
//! outcomes (spec.md §4.7's determinism requirement).

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::entity::EntityId;
use crate::error::WorldError;
use crate::world::World;

/// A selection-cursor or `SetParent`/`AddReference` target: either an
/// absolute entity handle, or an offset into the entities created so far
/// during this replay (`0` = the entity created most recently).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityRef {
    /// An absolute, already-known entity handle.
    Id(EntityId),
    /// `offset` entities back from the most recently created one.
    CreatedOffset(u32),
}

impl EntityRef {
    fn resolve(&self, created: &[EntityId]) -> Option<EntityId> {
        match self {
            EntityRef::Id(id) => Some(*id),
            EntityRef::CreatedOffset(offset) => {
                let len = created.len();
                let offset = *offset as usize;
                if offset < len {
                    Some(created[len - 1 - offset])
                } else {
                    None
                }
            }
        }
    }
}

/// One opcode in the closed set of spec.md §4.7. Component/array payloads
/// use `serde_json::Value` (the ambient-stack choice for this crate) rather
/// than the spec's abstract `payloadPtr`, the same substitution the teacher
/// makes for `CommandKind::SetComponent`'s `value` field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Instruction {
    /// Creates `count` entities and replaces the selection with exactly
    /// those new entities.
    CreateEntity { count: u32 },
    /// Destroys every entity currently in the selection.
    DestroySelection,
    /// Empties the selection without destroying anything.
    ClearSelection,
    /// Narrows the selection to the single entity `id`.
    SelectEntity { id: EntityId },
    /// Narrows the selection to a single entity created earlier in this
    /// replay (`offset == 0` is the most recently created one).
    SelectPreviouslyCreated { offset: u32 },
    /// Sets or clears the parent of every entity in the selection.
    SetParent { parent: Option<EntityRef> },
    /// Adds (or overwrites) component `type_name` on every selected entity.
    AddComponent {
        type_name: String,
        payload: serde_json::Value,
    },
    /// Removes component `type_name` from every selected entity.
    RemoveComponent { type_name: String },
    /// Overwrites component `type_name` on every selected entity; unlike
    /// `AddComponent`, fails entities that do not already carry it.
    SetComponent {
        type_name: String,
        payload: serde_json::Value,
    },
    /// Adds tag `type_name` to every selected entity.
    AddTag { type_name: String },
    /// Removes tag `type_name` from every selected entity.
    RemoveTag { type_name: String },
    /// Creates a `length`-element array of type `type_name` on every
    /// selected entity, optionally seeded from a JSON array payload.
    CreateArray {
        type_name: String,
        length: usize,
        payload: Option<serde_json::Value>,
    },
    /// Destroys the array of type `type_name` on every selected entity.
    DestroyArray { type_name: String },
    /// Resizes the array of type `type_name` on every selected entity.
    ResizeArray { type_name: String, new_length: usize },
    /// Overwrites `count` elements of array `type_name` starting at `index`
    /// on every selected entity.
    SetArrayElement {
        type_name: String,
        index: usize,
        count: usize,
        payload: serde_json::Value,
    },
    /// Adds a reference from every selected entity to `target`.
    AddReference { target: EntityRef },
    /// Tombstones local reference `rint` on every selected entity.
    RemoveReference { rint: u32 },
}

/// Summary of a [`Operation::replay_into`] call. Mirrors the teacher's
/// `ApplyReport`: instructions targeting stale or never-issued entities are
/// logged as warnings and skipped rather than aborting the whole replay.
#[derive(Debug, Clone, Default)]
pub struct OperationReport {
    /// Number of instructions that applied successfully.
    pub success_count: usize,
    /// Number of instructions skipped due to an error.
    pub failed_count: usize,
}

#[derive(Default)]
struct ReplayState {
    created: Vec<EntityId>,
    selection: Vec<EntityId>,
}

/// An insertion-ordered buffer of [`Instruction`]s. Build with the `push_*`
/// methods, then replay against one or more Worlds with
/// [`Operation::replay_into`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Operation {
    instructions: Vec<Instruction>,
}

impl Operation {
    /// Creates an empty instruction stream.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a raw instruction. The `push_*` convenience methods below
    /// cover the closed opcode set; this is an escape hatch for callers that
    /// already hold a constructed `Instruction` (e.g. deserialized from a
    /// snapshot).
    pub fn push(&mut self, instruction: Instruction) {
        self.instructions.push(instruction);
    }

    /// Queues `CreateEntity(count)`.
    pub fn push_create_entity(&mut self, count: u32) {
        self.push(Instruction::CreateEntity { count });
    }

    /// Queues `DestroySelection`.
    pub fn push_destroy_selection(&mut self) {
        self.push(Instruction::DestroySelection);
    }

    /// Queues `ClearSelection`.
    pub fn push_clear_selection(&mut self) {
        self.push(Instruction::ClearSelection);
    }

    /// Queues `SelectEntity(id)`.
    pub fn push_select_entity(&mut self, id: EntityId) {
        self.push(Instruction::SelectEntity { id });
    }

    /// Queues `SelectPreviouslyCreated(offset)`.
    pub fn push_select_previously_created(&mut self, offset: u32) {
        self.push(Instruction::SelectPreviouslyCreated { offset });
    }

    /// Queues `SetParent(id|offset)`. `parent == None` detaches.
    pub fn push_set_parent(&mut self, parent: Option<EntityRef>) {
        self.push(Instruction::SetParent { parent });
    }

    /// Queues `AddComponent(typeId, payloadPtr)`.
    pub fn push_add_component(&mut self, type_name: impl Into<String>, payload: serde_json::Value) {
        self.push(Instruction::AddComponent {
            type_name: type_name.into(),
            payload,
        });
    }

    /// Queues `RemoveComponent(typeId)`.
    pub fn push_remove_component(&mut self, type_name: impl Into<String>) {
        self.push(Instruction::RemoveComponent {
            type_name: type_name.into(),
        });
    }

    /// Queues `SetComponent(typeId, payloadPtr)`.
    pub fn push_set_component(&mut self, type_name: impl Into<String>, payload: serde_json::Value) {
        self.push(Instruction::SetComponent {
            type_name: type_name.into(),
            payload,
        });
    }

    /// Queues `AddTag(typeId)`.
    pub fn push_add_tag(&mut self, type_name: impl Into<String>) {
        self.push(Instruction::AddTag {
            type_name: type_name.into(),
        });
    }

    /// Queues `RemoveTag(typeId)`.
    pub fn push_remove_tag(&mut self, type_name: impl Into<String>) {
        self.push(Instruction::RemoveTag {
            type_name: type_name.into(),
        });
    }

    /// Queues `CreateArray(typeId, length, payloadPtr?)`.
    pub fn push_create_array(
        &mut self,
        type_name: impl Into<String>,
        length: usize,
        payload: Option<serde_json::Value>,
    ) {
        self.push(Instruction::CreateArray {
            type_name: type_name.into(),
            length,
            payload,
        });
    }

    /// Queues `DestroyArray(typeId)`.
    pub fn push_destroy_array(&mut self, type_name: impl Into<String>) {
        self.push(Instruction::DestroyArray {
            type_name: type_name.into(),
        });
    }

    /// Queues `ResizeArray(typeId, newLength)`.
    pub fn push_resize_array(&mut self, type_name: impl Into<String>, new_length: usize) {
        self.push(Instruction::ResizeArray {
            type_name: type_name.into(),
            new_length,
        });
    }

    /// Queues `SetArrayElement(typeId, index, payloadPtr, count)`.
    pub fn push_set_array_element(
        &mut self,
        type_name: impl Into<String>,
        index: usize,
        count: usize,
        payload: serde_json::Value,
    ) {
        self.push(Instruction::SetArrayElement {
            type_name: type_name.into(),
            index,
            count,
            payload,
        });
    }

    /// Queues `AddReference(id|offset)`.
    pub fn push_add_reference(&mut self, target: EntityRef) {
        self.push(Instruction::AddReference { target });
    }

    /// Queues `RemoveReference(rint)`.
    pub fn push_remove_reference(&mut self, rint: u32) {
        self.push(Instruction::RemoveReference { rint });
    }

    /// All queued instructions, in replay order.
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Number of queued instructions.
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    /// Whether the stream is empty.
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Replays every instruction against `world` in strict sequential order
    /// (spec.md §5's "Operation replay is strictly sequential"). Does not
    /// consume or mutate `self`, so the same `Operation` can be replayed
    /// against multiple equivalent Worlds and is expected to produce
    /// identical outcomes (spec.md §4.7).
    pub fn replay_into(&self, world: &mut World) -> OperationReport {
        let mut state = ReplayState::default();
        let mut report = OperationReport::default();
        for instruction in &self.instructions {
            match apply_one(instruction, world, &mut state) {
                Ok(()) => report.success_count += 1,
                Err(err) => {
                    report.failed_count += 1;
                    warn!(?err, ?instruction, "skipped instruction during Operation replay");
                }
            }
        }
        report
    }
}

fn apply_one(instruction: &Instruction, world: &mut World, state: &mut ReplayState) -> Result<(), WorldError> {
    match instruction {
        Instruction::CreateEntity { count } => {
            let mut fresh = Vec::with_capacity(*count as usize);
            for _ in 0..*count {
                let e = world.create_entity();
                state.created.push(e);
                fresh.push(e);
            }
            state.selection = fresh;
            Ok(())
        }
        Instruction::DestroySelection => {
            for e in std::mem::take(&mut state.selection) {
                world.destroy_entity(e)?;
            }
            Ok(())
        }
        Instruction::ClearSelection => {
            state.selection.clear();
            Ok(())
        }
        Instruction::SelectEntity { id } => {
            if !world.is_alive(*id) {
                return Err(WorldError::NoSuchEntity { entity: *id });
            }
            state.selection = vec![*id];
            Ok(())
        }
        Instruction::SelectPreviouslyCreated { offset } => {
            let len = state.created.len();
            let offset = *offset as usize;
            if offset >= len {
                return Err(WorldError::OutOfRange);
            }
            state.selection = vec![state.created[len - 1 - offset]];
            Ok(())
        }
        Instruction::SetParent { parent } => {
            let resolved = match parent {
                Some(r) => Some(r.resolve(&state.created).ok_or(WorldError::OutOfRange)?),
                None => None,
            };
            for e in &state.selection {
                world.set_parent(*e, resolved)?;
            }
            Ok(())
        }
        Instruction::AddComponent { type_name, payload } => {
            for e in &state.selection {
                world.add_component_json(*e, type_name, payload)?;
            }
            Ok(())
        }
        Instruction::RemoveComponent { type_name } => {
            for e in &state.selection {
                world.remove_component_by_name(*e, type_name)?;
            }
            Ok(())
        }
        Instruction::SetComponent { type_name, payload } => {
            for e in &state.selection {
                world.set_component_json(*e, type_name, payload)?;
            }
            Ok(())
        }
        Instruction::AddTag { type_name } => {
            for e in &state.selection {
                world.add_tag_by_name(*e, type_name)?;
            }
            Ok(())
        }
        Instruction::RemoveTag { type_name } => {
            for e in &state.selection {
                world.remove_tag_by_name(*e, type_name)?;
            }
            Ok(())
        }
        Instruction::CreateArray { type_name, length, payload } => {
            for e in &state.selection {
                world.create_array_json(*e, type_name, *length, payload.as_ref())?;
            }
            Ok(())
        }
        Instruction::DestroyArray { type_name } => {
            for e in &state.selection {
                world.destroy_array_by_name(*e, type_name)?;
            }
            Ok(())
        }
        Instruction::ResizeArray { type_name, new_length } => {
            for e in &state.selection {
                world.resize_array_by_name(*e, type_name, *new_length)?;
            }
            Ok(())
        }
        Instruction::SetArrayElement { type_name, index, count, payload } => {
            for e in &state.selection {
                world.set_array_element_json(*e, type_name, *index, *count, payload)?;
            }
            Ok(())
        }
        Instruction::AddReference { target } => {
            let resolved = target.resolve(&state.created).ok_or(WorldError::OutOfRange)?;
            for e in &state.selection {
                world.add_reference(*e, resolved)?;
            }
            Ok(())
        }
        Instruction::RemoveReference { rint } => {
            for e in &state.selection {
                world.remove_reference(*e, *rint)?;
            }
            Ok(())
        }
    }
}
