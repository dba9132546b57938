//! Query engine: iterates entities whose chunk [`Definition`] satisfies a
//! required/excluded mask pair (spec.md §4.6).
//!
//! Grounded in the teacher's `QueryItem`/`Query` tuple-fetch traits
//! (`nomai-ecs/src/query.rs`) and its `World::query`/`query_mut` split that
//! uses Rust's borrow checker (`&self` vs `&mut self`) to make `&mut T`
//! fetches sound without runtime borrow tracking. Generalized here from a
//! fixed list of required component type IDs to a full required/excluded
//! [`Definition`] (components, arrays, and tags all participate), matching
//! spec.md §4.6's predicate. Enumeration order follows [`ChunkMap::iter`]'s
//! stable internal (insertion) order, as spec.md requires.

use crate::chunk_map::ChunkId;
use crate::definition::Definition;
use crate::entity::EntityId;
use crate::schema::{ArrayId, ComponentId, TagId};
use crate::world::World;

/// One element of a query fetch tuple: `&T` (read) or `&mut T` (write).
pub trait QueryItem {
    type Item<'w>;
    const MUTABLE: bool;
    fn component_id(world: &World) -> Option<ComponentId>;
    fn fetch(world: &World, chunk: ChunkId, row: usize) -> Self::Item<'_>;
}

impl<T: Copy + 'static> QueryItem for &T {
    type Item<'w> = &'w T;
    const MUTABLE: bool = false;

    fn component_id(world: &World) -> Option<ComponentId> {
        world.schema().component_id::<T>()
    }

    fn fetch(world: &World, chunk: ChunkId, row: usize) -> Self::Item<'_> {
        let id = Self::component_id(world).expect("query validated this component is registered");
        let ptr = world
            .chunks
            .get(chunk)
            .component_ptr(row, id)
            .expect("query only visits chunks whose Definition contains this component");
        unsafe { &*(ptr as *const T) }
    }
}

// Safety: only reachable through `World::query_mut`, which takes `&mut
// World` and so guarantees no other borrow of `world` is alive; the cast
// from `*const World` to `*mut World` is sound under that exclusivity,
// mirroring the teacher's `&mut T` `QueryItem` impl.
impl<T: Copy + 'static> QueryItem for &mut T {
    type Item<'w> = &'w mut T;
    const MUTABLE: bool = true;

    fn component_id(world: &World) -> Option<ComponentId> {
        world.schema().component_id::<T>()
    }

    fn fetch(world: &World, chunk: ChunkId, row: usize) -> Self::Item<'_> {
        let id = Self::component_id(world).expect("query validated this component is registered");
        unsafe {
            let world_ptr = world as *const World as *mut World;
            let ptr = (*world_ptr)
                .chunks
                .get_mut(chunk)
                .component_ptr_mut(row, id)
                .expect("query only visits chunks whose Definition contains this component");
            &mut *(ptr as *mut T)
        }
    }
}

/// A tuple of [`QueryItem`]s fetched together per matching row.
pub trait Query {
    type Item<'w>;
    const HAS_MUTABLE: bool;
    fn required(world: &World) -> Definition;
    fn validate_no_access_conflicts(world: &World);
    fn fetch_row(world: &World, chunk: ChunkId, row: usize) -> Self::Item<'_>;
}

fn check_conflicts(ids: &[(bool, Option<ComponentId>)]) {
    let mut mutable_ids = Vec::new();
    let mut read_ids = Vec::new();
    for &(is_mut, id) in ids {
        let Some(id) = id else { continue };
        if is_mut {
            assert!(
                !mutable_ids.contains(&id),
                "query contains duplicate mutable access to the same component"
            );
            assert!(
                !read_ids.contains(&id),
                "query contains overlapping read and mutable access to the same component"
            );
            mutable_ids.push(id);
        } else {
            assert!(
                !mutable_ids.contains(&id),
                "query contains overlapping read and mutable access to the same component"
            );
            read_ids.push(id);
        }
    }
}

macro_rules! impl_query_tuple {
    ($($t:ident),+) => {
        impl<$($t: QueryItem),+> Query for ($($t,)+) {
            type Item<'w> = ($($t::Item<'w>,)+);
            const HAS_MUTABLE: bool = { let mut m = false; $(m = m || $t::MUTABLE;)+ m };

            fn required(world: &World) -> Definition {
                let mut def = Definition::EMPTY;
                $(
                    if let Some(id) = $t::component_id(world) {
                        def = def.with_component(id);
                    }
                )+
                def
            }

            fn validate_no_access_conflicts(world: &World) {
                let ids = [$(($t::MUTABLE, $t::component_id(world))),+];
                check_conflicts(&ids);
            }

            #[allow(non_snake_case)]
            fn fetch_row(world: &World, chunk: ChunkId, row: usize) -> Self::Item<'_> {
                ($($t::fetch(world, chunk, row),)+)
            }
        }
    };
}

impl_query_tuple!(A);
impl_query_tuple!(A, B);
impl_query_tuple!(A, B, C);
impl_query_tuple!(A, B, C, D);

/// Builds a required/excluded [`Definition`] pair before iterating.
///
/// `with_*`/`without_*` narrow the match; `exclude_disabled` is a
/// convenience over the builtin `Disabled` tag maintained by
/// [`World::set_enabled`].
pub struct QueryBuilder<'w> {
    world: &'w World,
    required: Definition,
    excluded: Definition,
}

impl<'w> QueryBuilder<'w> {
    pub(crate) fn new(world: &'w World) -> Self {
        QueryBuilder {
            world,
            required: Definition::EMPTY,
            excluded: Definition::EMPTY,
        }
    }

    pub fn with_component_id(mut self, id: ComponentId) -> Self {
        self.required = self.required.with_component(id);
        self
    }

    pub fn without_component_id(mut self, id: ComponentId) -> Self {
        self.excluded = self.excluded.with_component(id);
        self
    }

    pub fn with_array_id(mut self, id: ArrayId) -> Self {
        self.required = self.required.with_array(id);
        self
    }

    pub fn without_array_id(mut self, id: ArrayId) -> Self {
        self.excluded = self.excluded.with_array(id);
        self
    }

    pub fn with_tag_id(mut self, id: TagId) -> Self {
        self.required = self.required.with_tag(id);
        self
    }

    pub fn without_tag_id(mut self, id: TagId) -> Self {
        self.excluded = self.excluded.with_tag(id);
        self
    }

    /// Excludes entities that are disabled, either explicitly or via an
    /// ancestor (spec.md §4.5's `Disabled` builtin tag).
    pub fn exclude_disabled(mut self) -> Self {
        self.excluded = self.excluded.with_tag(self.world.disabled_tag());
        self
    }

    /// The `Definition` every matching chunk must satisfy.
    pub fn required(&self) -> Definition {
        self.required
    }

    /// The `Definition` no matching chunk may satisfy any bit of.
    pub fn excluded(&self) -> Definition {
        self.excluded
    }

    /// Collects every live entity across all chunks matching this query's
    /// required/excluded masks, in stable internal order.
    pub fn entities(&self) -> Vec<EntityId> {
        let mut out = Vec::new();
        for (_, chunk) in self.world.chunks.iter() {
            if chunk.definition().matches(&self.required, &self.excluded) {
                out.extend_from_slice(chunk.entities());
            }
        }
        out
    }

    /// Runs a typed, read-only fetch over all matching rows. Panics if `Q`
    /// contains a `&mut T` item; use [`World::query_mut`] for those.
    pub fn iter<Q: Query>(&self) -> QueryIter<'w, Q> {
        assert!(
            !Q::HAS_MUTABLE,
            "QueryBuilder::iter cannot be used with &mut T items; use World::query_mut"
        );
        let combined_required = union_definition(self.required, Q::required(self.world));
        QueryIter::new(self.world, combined_required, self.excluded)
    }
}

fn union_definition(a: Definition, b: Definition) -> Definition {
    Definition {
        cmask: a.cmask | b.cmask,
        amask: a.amask | b.amask,
        tmask: a.tmask | b.tmask,
    }
}

/// Iterator over `(EntityId, Q::Item)` for every row whose chunk matches a
/// required/excluded `Definition` pair.
pub struct QueryIter<'w, Q: Query> {
    world: &'w World,
    required: Definition,
    excluded: Definition,
    chunk_cursor: usize,
    row_cursor: usize,
    _marker: std::marker::PhantomData<Q>,
}

impl<'w, Q: Query> QueryIter<'w, Q> {
    fn new(world: &'w World, required: Definition, excluded: Definition) -> Self {
        QueryIter {
            world,
            required,
            excluded,
            chunk_cursor: 0,
            row_cursor: 0,
            _marker: std::marker::PhantomData,
        }
    }
}

impl<'w, Q: Query> Iterator for QueryIter<'w, Q> {
    type Item = (EntityId, Q::Item<'w>);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.chunk_cursor >= self.world.chunk_count() {
                return None;
            }
            let chunk_id = ChunkId(self.chunk_cursor as u32);
            let chunk = self.world.chunks.get(chunk_id);
            if !chunk.definition().matches(&self.required, &self.excluded) {
                self.chunk_cursor += 1;
                self.row_cursor = 0;
                continue;
            }
            if self.row_cursor < chunk.len() {
                let entity = chunk.entities()[self.row_cursor];
                let item = Q::fetch_row(self.world, chunk_id, self.row_cursor);
                self.row_cursor += 1;
                return Some((entity, item));
            }
            self.chunk_cursor += 1;
            self.row_cursor = 0;
        }
    }
}

impl World {
    /// Starts building a query over this world's entities.
    pub fn query(&self) -> QueryBuilder<'_> {
        QueryBuilder::new(self)
    }

    /// Runs a typed, mutable fetch over every row whose chunk carries every
    /// component named in `Q`. Takes `&mut self`, which is what makes the
    /// `&mut T` fetches in [`QueryItem`] sound.
    pub fn query_mut<Q: Query>(&mut self) -> QueryIter<'_, Q> {
        Q::validate_no_access_conflicts(self);
        let required = Q::required(self);
        QueryIter::new(self, required, Definition::EMPTY)
    }
}
