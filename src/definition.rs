//! A chunk's signature: the triple of component/array/tag [`BitMask`]s that
//! uniquely identifies it within a [`crate::chunk_map::ChunkMap`].

use crate::bitmask::BitMask;
use crate::schema::{ArrayId, ComponentId, TagId};
use serde::{Deserialize, Serialize};

/// `(cmask, amask, tmask)` — spec.md §3's Definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Definition {
    pub cmask: BitMask,
    pub amask: BitMask,
    pub tmask: BitMask,
}

impl Definition {
    /// The empty Definition, naming the default chunk.
    pub const EMPTY: Definition = Definition {
        cmask: BitMask::EMPTY,
        amask: BitMask::EMPTY,
        tmask: BitMask::EMPTY,
    };

    /// Whether all three masks are empty.
    pub fn is_empty(&self) -> bool {
        self.cmask.is_empty() && self.amask.is_empty() && self.tmask.is_empty()
    }

    /// Returns a copy with the given component bit set.
    pub fn with_component(mut self, id: ComponentId) -> Self {
        self.cmask.set(id.index());
        self
    }

    /// Returns a copy with the given component bit cleared.
    pub fn without_component(mut self, id: ComponentId) -> Self {
        self.cmask.clear(id.index());
        self
    }

    /// Returns a copy with the given array bit set.
    pub fn with_array(mut self, id: ArrayId) -> Self {
        self.amask.set(id.index());
        self
    }

    /// Returns a copy with the given array bit cleared.
    pub fn without_array(mut self, id: ArrayId) -> Self {
        self.amask.clear(id.index());
        self
    }

    /// Returns a copy with the given tag bit set.
    pub fn with_tag(mut self, id: TagId) -> Self {
        self.tmask.set(id.index());
        self
    }

    /// Returns a copy with the given tag bit cleared.
    pub fn without_tag(mut self, id: TagId) -> Self {
        self.tmask.clear(id.index());
        self
    }

    /// `true` iff `self` carries every type named in `required` and none of
    /// the types named in `excluded`, matching spec.md §4.6's Query
    /// predicate.
    pub fn matches(&self, required: &Definition, excluded: &Definition) -> bool {
        self.cmask.contains_all(&required.cmask)
            && self.amask.contains_all(&required.amask)
            && self.tmask.contains_all(&required.tmask)
            && !self.cmask.contains_any(&excluded.cmask)
            && !self.amask.contains_any(&excluded.amask)
            && !self.tmask.contains_any(&excluded.tmask)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_definition_is_empty() {
        assert!(Definition::EMPTY.is_empty());
        assert!(Definition::default().is_empty());
    }

    #[test]
    fn with_and_without_round_trip() {
        let def = Definition::EMPTY.with_component(ComponentId(3));
        assert!(!def.is_empty());
        assert!(def.without_component(ComponentId(3)).is_empty());
    }

    #[test]
    fn matches_required_and_excluded() {
        let def = Definition::EMPTY
            .with_component(ComponentId(0))
            .with_component(ComponentId(1));
        let required = Definition::EMPTY.with_component(ComponentId(0));
        let excluded = Definition::EMPTY.with_component(ComponentId(2));
        assert!(def.matches(&required, &excluded));

        let excluded_hit = Definition::EMPTY.with_component(ComponentId(1));
        assert!(!def.matches(&required, &excluded_hit));
    }
}
