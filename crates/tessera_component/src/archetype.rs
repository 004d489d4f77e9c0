//! Archetype tables and the archetype store.
//!
//! An archetype groups every entity that has exactly the same sorted set of
//! ids. Data-carrying ids get one [`Column`] each, index-aligned with the
//! entity list. Columns sit behind a `RefCell` so query batches can hand out
//! typed views of several columns at once while aliasing is still checked at
//! runtime.
//!
//! Each archetype caches its transition edges: for an id, the archetype
//! reached by adding or removing it.

use std::cell::{Ref, RefCell, RefMut};
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::column::Column;
use crate::entity::Entity;
use crate::id::Id;

/// Dense index of an archetype inside a world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ArchetypeId(pub u32);

impl ArchetypeId {
    /// The archetype with no ids. New entities start here.
    pub const EMPTY: ArchetypeId = ArchetypeId(0);

    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for ArchetypeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "archetype#{}", self.0)
    }
}

/// Cached transitions for one id.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Edge {
    pub add: Option<ArchetypeId>,
    pub remove: Option<ArchetypeId>,
}

/// A table of entities sharing one id set.
#[derive(Debug)]
pub struct Archetype {
    id: ArchetypeId,
    ids: Vec<Id>,
    /// Column slot for each entry of `ids`, `None` for tags.
    column_of: Vec<Option<usize>>,
    columns: Vec<RefCell<Column>>,
    entities: Vec<Entity>,
    edges: HashMap<Id, Edge>,
}

impl Archetype {
    /// Creates an empty table. `sizes[i]` is the value size of `ids[i]`;
    /// zero means the id carries no data.
    ///
    /// # Panics
    ///
    /// Panics if `ids` is not strictly sorted or `sizes` has another length.
    #[must_use]
    pub fn new(id: ArchetypeId, ids: Vec<Id>, sizes: &[usize]) -> Self {
        assert!(ids.windows(2).all(|w| w[0] < w[1]), "archetype type must be sorted and unique");
        assert_eq!(ids.len(), sizes.len());
        let mut columns = Vec::new();
        let column_of = ids
            .iter()
            .zip(sizes)
            .map(|(&cid, &size)| {
                (size > 0).then(|| {
                    columns.push(RefCell::new(Column::new(cid, size)));
                    columns.len() - 1
                })
            })
            .collect();
        Self {
            id,
            ids,
            column_of,
            columns,
            entities: Vec::new(),
            edges: HashMap::new(),
        }
    }

    #[must_use]
    pub fn id(&self) -> ArchetypeId {
        self.id
    }

    /// Sorted id set of this archetype.
    #[must_use]
    pub fn ids(&self) -> &[Id] {
        &self.ids
    }

    #[must_use]
    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    #[must_use]
    pub fn has(&self, id: Id) -> bool {
        self.ids.binary_search(&id).is_ok()
    }

    /// Position of `id` in the type.
    #[must_use]
    pub fn type_index(&self, id: Id) -> Option<usize> {
        self.ids.binary_search(&id).ok()
    }

    /// Column slot holding the values of `id`.
    #[must_use]
    pub fn column_index(&self, id: Id) -> Option<usize> {
        self.type_index(id).and_then(|i| self.column_of[i])
    }

    #[must_use]
    pub fn column(&self, id: Id) -> Option<&RefCell<Column>> {
        self.column_index(id).map(|c| &self.columns[c])
    }

    /// All columns, in type order.
    #[must_use]
    pub fn columns(&self) -> &[RefCell<Column>] {
        &self.columns
    }

    /// Exclusive access to a column without a runtime borrow.
    pub fn column_mut(&mut self, id: Id) -> Option<&mut Column> {
        self.column_index(id).map(|c| self.columns[c].get_mut())
    }

    /// Shared borrow of one row of `id`.
    pub fn try_row(&self, id: Id, row: usize) -> Option<Result<Ref<'_, [u8]>, std::cell::BorrowError>> {
        let cell = self.column(id)?;
        Some(cell.try_borrow().map(|col| Ref::map(col, |c| c.row(row))))
    }

    /// Exclusive borrow of one row of `id`.
    pub fn try_row_mut(
        &self,
        id: Id,
        row: usize,
    ) -> Option<Result<RefMut<'_, [u8]>, std::cell::BorrowMutError>> {
        let cell = self.column(id)?;
        Some(cell.try_borrow_mut().map(|col| RefMut::map(col, |c| c.row_mut(row))))
    }

    /// Appends `entity` with zero-filled values and returns its row.
    pub fn push(&mut self, entity: Entity) -> usize {
        let row = self.entities.len();
        self.entities.push(entity);
        for column in &mut self.columns {
            let pushed = column.get_mut().push_zeroed();
            debug_assert_eq!(pushed, row);
        }
        row
    }

    /// Removes `row` by swapping in the last row. Values are relocated
    /// bitwise. Returns the entity that now occupies `row`, if any.
    pub fn swap_remove(&mut self, row: usize) -> Option<Entity> {
        self.entities.swap_remove(row);
        for column in &mut self.columns {
            column.get_mut().swap_remove(row);
        }
        self.entities.get(row).copied()
    }

    /// Cached transition for `id`.
    #[must_use]
    pub fn edge(&self, id: Id) -> Edge {
        self.edges.get(&id).copied().unwrap_or_default()
    }

    pub fn set_add_edge(&mut self, id: Id, to: ArchetypeId) {
        self.edges.entry(id).or_default().add = Some(to);
    }

    pub fn set_remove_edge(&mut self, id: Id, to: ArchetypeId) {
        self.edges.entry(id).or_default().remove = Some(to);
    }

    /// Type of the archetype reached by adding `id`.
    #[must_use]
    pub fn type_with(&self, id: Id) -> Vec<Id> {
        let mut ids = self.ids.clone();
        if let Err(pos) = ids.binary_search(&id) {
            ids.insert(pos, id);
        }
        ids
    }

    /// Type of the archetype reached by removing `id`.
    #[must_use]
    pub fn type_without(&self, id: Id) -> Vec<Id> {
        let mut ids = self.ids.clone();
        if let Ok(pos) = ids.binary_search(&id) {
            ids.remove(pos);
        }
        ids
    }
}

/// All archetypes of a world, indexed by id and by type.
#[derive(Debug)]
pub struct Archetypes {
    tables: Vec<Archetype>,
    by_type: HashMap<Vec<Id>, ArchetypeId>,
}

impl Archetypes {
    /// Creates the store with the empty archetype in slot 0.
    #[must_use]
    pub fn new() -> Self {
        let mut by_type = HashMap::new();
        by_type.insert(Vec::new(), ArchetypeId::EMPTY);
        Self {
            tables: vec![Archetype::new(ArchetypeId::EMPTY, Vec::new(), &[])],
            by_type,
        }
    }

    /// Archetype with exactly this sorted type.
    #[must_use]
    pub fn find(&self, ids: &[Id]) -> Option<ArchetypeId> {
        self.by_type.get(ids).copied()
    }

    /// Inserts a new archetype. The caller checks [`Self::find`] first.
    pub fn insert(&mut self, ids: Vec<Id>, sizes: &[usize]) -> ArchetypeId {
        let id = ArchetypeId(u32::try_from(self.tables.len()).unwrap_or(u32::MAX));
        self.by_type.insert(ids.clone(), id);
        self.tables.push(Archetype::new(id, ids, sizes));
        id
    }

    #[must_use]
    pub fn get(&self, id: ArchetypeId) -> &Archetype {
        &self.tables[id.index()]
    }

    pub fn get_mut(&mut self, id: ArchetypeId) -> &mut Archetype {
        &mut self.tables[id.index()]
    }

    /// Mutable access to two distinct archetypes.
    ///
    /// # Panics
    ///
    /// Panics if `a == b`.
    pub fn pair_mut(&mut self, a: ArchetypeId, b: ArchetypeId) -> (&mut Archetype, &mut Archetype) {
        assert_ne!(a, b, "pair_mut needs two distinct archetypes");
        let (ai, bi) = (a.index(), b.index());
        if ai < bi {
            let (left, right) = self.tables.split_at_mut(bi);
            (&mut left[ai], &mut right[0])
        } else {
            let (left, right) = self.tables.split_at_mut(ai);
            (&mut right[0], &mut left[bi])
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Archetype> {
        self.tables.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Archetype> {
        self.tables.iter_mut()
    }
}

impl Default for Archetypes {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: u64) -> Id {
        Id::from_raw(raw)
    }

    #[test]
    fn test_empty_archetype_is_slot_zero() {
        let store = Archetypes::new();
        assert_eq!(store.find(&[]), Some(ArchetypeId::EMPTY));
        assert!(store.get(ArchetypeId::EMPTY).ids().is_empty());
    }

    #[test]
    fn test_columns_only_for_data_ids() {
        let table = Archetype::new(ArchetypeId(1), vec![id(1), id(2), id(3)], &[4, 0, 8]);
        assert!(table.column(id(1)).is_some());
        assert!(table.column(id(2)).is_none());
        assert_eq!(table.column_index(id(3)), Some(1));
        assert_eq!(table.columns().len(), 2);
        assert!(table.has(id(2)));
        assert!(!table.has(id(4)));
    }

    #[test]
    fn test_push_and_swap_remove_keep_columns_aligned() {
        let mut table = Archetype::new(ArchetypeId(1), vec![id(1)], &[4]);
        let a = Entity::new(1, 0);
        let b = Entity::new(2, 0);
        let c = Entity::new(3, 0);
        for (e, v) in [(a, 10u32), (b, 20), (c, 30)] {
            let row = table.push(e);
            table.column_mut(id(1)).unwrap().as_slice_mut::<u32>().unwrap()[row] = v;
        }
        assert_eq!(table.swap_remove(0), Some(c));
        assert_eq!(table.entities(), &[c, b]);
        let values = table.column(id(1)).unwrap().borrow().as_slice::<u32>().unwrap().to_vec();
        assert_eq!(values, vec![30, 20]);
        assert_eq!(table.swap_remove(1), None);
    }

    #[test]
    fn test_row_borrows_are_checked() {
        let mut table = Archetype::new(ArchetypeId(1), vec![id(5)], &[4]);
        table.push(Entity::new(1, 0));
        let shared = table.try_row(id(5), 0).unwrap().unwrap();
        assert!(table.try_row_mut(id(5), 0).unwrap().is_err());
        drop(shared);
        assert!(table.try_row_mut(id(5), 0).unwrap().is_ok());
    }

    #[test]
    fn test_type_with_and_without() {
        let table = Archetype::new(ArchetypeId(1), vec![id(2), id(6)], &[0, 0]);
        assert_eq!(table.type_with(id(4)), vec![id(2), id(4), id(6)]);
        assert_eq!(table.type_with(id(2)), vec![id(2), id(6)]);
        assert_eq!(table.type_without(id(6)), vec![id(2)]);
    }

    #[test]
    fn test_edges_are_cached() {
        let mut store = Archetypes::new();
        let next = store.insert(vec![id(3)], &[0]);
        store.get_mut(ArchetypeId::EMPTY).set_add_edge(id(3), next);
        store.get_mut(next).set_remove_edge(id(3), ArchetypeId::EMPTY);
        assert_eq!(store.get(ArchetypeId::EMPTY).edge(id(3)).add, Some(next));
        assert_eq!(store.get(next).edge(id(3)).remove, Some(ArchetypeId::EMPTY));
        assert_eq!(store.get(next).edge(id(9)), Edge::default());
    }

    #[test]
    fn test_pair_mut_returns_requested_order() {
        let mut store = Archetypes::new();
        let one = store.insert(vec![id(1)], &[0]);
        let (a, b) = store.pair_mut(one, ArchetypeId::EMPTY);
        assert_eq!(a.id(), one);
        assert_eq!(b.id(), ArchetypeId::EMPTY);
    }
}
