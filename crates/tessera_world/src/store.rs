//! Structural changes.
//!
//! Adding or removing an id moves the entity to the archetype with the new
//! type. The move is the only place where values are created, relocated and
//! destroyed, so the lifecycle hooks and the observers all run from here.
//! Every operation validates its input first; an `Err` leaves the world as
//! it was.

use std::cell::Ref;
use std::sync::Arc;

use tracing::{debug, trace, warn};

use tessera_component::{ArchetypeId, Component, Entity, EntityLocation, Id, Tag, TypeHooks};

use crate::builtin::{self, CHILD_OF, DEPENDS_ON, IS_A, PHASE, PREFAB, WILDCARD};
use crate::error::{Result, WorldError};
use crate::world::{IdRecord, World};

/// Callback run when an id is added to, set on, or removed from an entity.
pub type Observer = Arc<dyn Fn(&World, Entity, Id) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObserverKind {
    /// After the id was added and its value initialised.
    Add,
    /// After a value was written with `set`.
    Set,
    /// Before the id is removed, while the value is still readable.
    Remove,
}

#[derive(Default)]
pub(crate) struct Observers {
    on_add: Vec<Observer>,
    on_set: Vec<Observer>,
    on_remove: Vec<Observer>,
}

impl Observers {
    fn list(&self, kind: ObserverKind) -> &[Observer] {
        match kind {
            ObserverKind::Add => &self.on_add,
            ObserverKind::Set => &self.on_set,
            ObserverKind::Remove => &self.on_remove,
        }
    }

    fn list_mut(&mut self, kind: ObserverKind) -> &mut Vec<Observer> {
        match kind {
            ObserverKind::Add => &mut self.on_add,
            ObserverKind::Set => &mut self.on_set,
            ObserverKind::Remove => &mut self.on_remove,
        }
    }
}

/// Returns `true` if `pattern` has a wildcard in any position.
pub(crate) fn is_wildcard(pattern: Id) -> bool {
    pattern.references(WILDCARD.index()) && !pattern.is_override()
}

/// Matches a concrete id against a pattern that may contain wildcards.
/// Override markers only match themselves.
pub(crate) fn id_matches(pattern: Id, id: Id) -> bool {
    if pattern == id {
        return true;
    }
    if id.is_override() || pattern.is_override() {
        return false;
    }
    let wildcard = WILDCARD.index();
    if pattern.is_pair() {
        if !id.is_pair() {
            return false;
        }
        let (pf, ps) = pattern.pair_parts();
        let (f, s) = id.pair_parts();
        (pf == wildcard || pf == f) && (ps == wildcard || ps == s)
    } else {
        pattern.as_entity() == Some(WILDCARD)
    }
}

fn relocate(dst: &mut [u8], src: &mut [u8], hooks: Option<&TypeHooks>) {
    let Some(hooks) = hooks else {
        dst.copy_from_slice(src);
        return;
    };
    if let Some(move_) = &hooks.move_ {
        move_(dst, src);
    } else if let Some(copy) = &hooks.copy {
        copy(dst, src);
        if let Some(dtor) = &hooks.dtor {
            dtor(src);
        }
    } else {
        dst.copy_from_slice(src);
    }
}

impl World {
    /// Creates an entity with no ids.
    pub fn entity(&mut self) -> Entity {
        let entity = self.spawn_empty();
        trace!(entity = %entity, "spawned entity");
        entity
    }

    pub(crate) fn location(&self, entity: Entity) -> Result<EntityLocation> {
        self.entities
            .location(entity)
            .ok_or(WorldError::StaleEntity(entity))
    }

    /// Every entity an id names must be alive.
    pub(crate) fn validate_id(&self, id: Id) -> Result<()> {
        let alive = if id.is_pair() {
            let (first, second) = id.pair_parts();
            self.entities.alive_at(first).is_some() && self.entities.alive_at(second).is_some()
        } else {
            id.without_override()
                .as_entity()
                .is_some_and(|e| self.entities.is_alive(e))
        };
        if alive { Ok(()) } else { Err(WorldError::UnknownId(id)) }
    }

    // -- Value types --

    fn data_component(&self, index: u32) -> Option<Entity> {
        let entity = self.entities.alive_at(index)?;
        self.components
            .info(entity)
            .filter(|info| !info.is_tag())
            .map(|info| info.entity)
    }

    fn pair_default(&self, id: Id, prefer_second: bool) -> Option<Entity> {
        let (first, second) = id.pair_parts();
        let (first, second) = (self.data_component(first), self.data_component(second));
        if prefer_second {
            second.or(first)
        } else {
            first.or(second)
        }
    }

    /// Component whose layout the values of `id` use, `None` for tags.
    pub(crate) fn data_type(&self, id: Id) -> Option<Entity> {
        self.data_type_hint(id, false)
    }

    fn data_type_hint(&self, id: Id, prefer_second: bool) -> Option<Entity> {
        if id.is_override() {
            return None;
        }
        if id.is_pair() {
            return match self.id_records.get(&id) {
                Some(record) => record.data,
                None => self.pair_default(id, prefer_second),
            };
        }
        id.as_entity()
            .filter(|&e| self.components.info(e).is_some_and(|info| !info.is_tag()))
    }

    /// Fixes the value type of a pair the first time it is used. Returns
    /// `true` if a record was created.
    fn ensure_record(&mut self, id: Id, prefer_second: bool) -> bool {
        if !id.is_pair() || id.is_override() || self.id_records.contains_key(&id) {
            return false;
        }
        let data = self.pair_default(id, prefer_second);
        self.id_records.insert(id, IdRecord { data });
        true
    }

    pub(crate) fn value_size(&self, id: Id) -> usize {
        self.data_type(id)
            .and_then(|e| self.components.info(e))
            .map_or(0, |info| info.size)
    }

    pub(crate) fn hooks_of(&self, id: Id) -> Option<&TypeHooks> {
        self.data_type(id)
            .and_then(|e| self.components.info(e))
            .map(|info| &info.hooks)
    }

    /// Checks that `T` is the stored type of `id`.
    pub(crate) fn check_type<T: Component>(&self, id: Id) -> Result<()> {
        self.check_type_hint::<T>(id, false)
    }

    fn check_type_hint<T: Component>(&self, id: Id, prefer_second: bool) -> Result<()> {
        let expected = self.registered::<T>(T::type_name())?;
        match self.data_type_hint(id, prefer_second) {
            None => Err(WorldError::NoData(self.id_string(id))),
            Some(data) if data == expected => Ok(()),
            Some(data) => Err(WorldError::TypeMismatch {
                id: self.id_string(id),
                expected: self
                    .components
                    .info(data)
                    .map_or_else(|| data.to_string(), |info| info.name.clone()),
                requested: T::type_name().to_owned(),
            }),
        }
    }

    // -- Archetype graph --

    pub(crate) fn ensure_archetype(&mut self, ids: Vec<Id>) -> Result<ArchetypeId> {
        if let Some(found) = self.archetypes.find(&ids) {
            return Ok(found);
        }
        if let Some(builtin) = self.builtin_archetypes {
            if self.archetypes.len().saturating_sub(builtin) >= self.config.max_archetypes {
                return Err(WorldError::ArchetypeLimit(self.config.max_archetypes));
            }
        }
        let sizes: Vec<usize> = ids.iter().map(|&id| self.value_size(id)).collect();
        let created = self.archetypes.insert(ids, &sizes);
        debug!(archetype = %created, r#type = %self.archetype_string(created), "created archetype");
        Ok(created)
    }

    fn destination_with(&mut self, from: ArchetypeId, id: Id) -> Result<ArchetypeId> {
        if let Some(to) = self.archetypes.get(from).edge(id).add {
            return Ok(to);
        }
        let ids = self.archetypes.get(from).type_with(id);
        let to = self.ensure_archetype(ids)?;
        self.archetypes.get_mut(from).set_add_edge(id, to);
        self.archetypes.get_mut(to).set_remove_edge(id, from);
        Ok(to)
    }

    fn destination_without(&mut self, from: ArchetypeId, id: Id) -> Result<ArchetypeId> {
        if let Some(to) = self.archetypes.get(from).edge(id).remove {
            return Ok(to);
        }
        let ids = self.archetypes.get(from).type_without(id);
        let to = self.ensure_archetype(ids)?;
        self.archetypes.get_mut(from).set_remove_edge(id, to);
        self.archetypes.get_mut(to).set_add_edge(id, from);
        Ok(to)
    }

    /// Moves `entity` from `from` to the archetype `to`.
    ///
    /// Values of ids present in both types are relocated, values of removed
    /// ids are destroyed, values of added ids are copied from an inherited
    /// value, constructed, or left zeroed, in that order of preference.
    pub(crate) fn move_entity(&mut self, entity: Entity, from: EntityLocation, to: ArchetypeId) {
        if from.archetype == to {
            return;
        }
        let src_ids = self.archetypes.get(from.archetype).ids().to_vec();
        let dst_ids = self.archetypes.get(to).ids().to_vec();
        let removed: Vec<Id> = src_ids
            .iter()
            .copied()
            .filter(|id| dst_ids.binary_search(id).is_err())
            .collect();
        let added: Vec<Id> = dst_ids
            .iter()
            .copied()
            .filter(|id| src_ids.binary_search(id).is_err())
            .collect();

        for &id in &removed {
            self.emit(ObserverKind::Remove, entity, id);
        }

        let hooks: Vec<(Id, Option<TypeHooks>)> = src_ids
            .iter()
            .map(|&id| (id, self.hooks_of(id).cloned()))
            .collect();
        let (src, dst) = self.archetypes.pair_mut(from.archetype, to);
        let row = dst.push(entity);
        for (id, hooks) in &hooks {
            let Some(src_column) = src.column_mut(*id) else {
                continue;
            };
            let src_bytes = src_column.row_mut(from.row);
            match dst.column_mut(*id) {
                Some(dst_column) => relocate(dst_column.row_mut(row), src_bytes, hooks.as_ref()),
                None => {
                    if let Some(dtor) = hooks.as_ref().and_then(|h| h.dtor.as_ref()) {
                        dtor(src_bytes);
                    }
                }
            }
        }
        if let Some(moved) = src.swap_remove(from.row) {
            self.entities.set_location(moved, from);
        }
        self.entities
            .set_location(entity, EntityLocation { archetype: to, row });

        self.relations.update(entity, &removed, &added);
        self.structure_changed(entity, &removed, &added);

        for &id in &added {
            if self.archetypes.get(to).column(id).is_some() {
                self.init_value(entity, id, to, row);
            }
        }
        for &id in &added {
            self.emit(ObserverKind::Add, entity, id);
        }
        trace!(entity = %entity, from = %from.archetype, to = %to, "moved entity");
    }

    fn structure_changed(&mut self, entity: Entity, removed: &[Id], added: &[Id]) {
        let touches = |pred: &dyn Fn(Id) -> bool| removed.iter().chain(added).any(|&id| pred(id));
        let is_relation = |relation: Entity| move |id: Id| id.is_pair() && id.first() == relation.index();
        if touches(&is_relation(IS_A)) || !self.relations.sources(IS_A, entity).is_empty() {
            self.inherit_cache.get_mut().clear();
        }
        if touches(&|id| id == Id::entity(PHASE)) || touches(&is_relation(DEPENDS_ON)) {
            self.pipeline_dirty = true;
        }
    }

    fn init_value(&mut self, entity: Entity, id: Id, archetype: ArchetypeId, row: usize) {
        let hooks = self.hooks_of(id).cloned();
        let inherited = if builtin::is_inheritable(id) {
            self.inherited_source(entity, id)
                .and_then(|base| self.read_bytes(base, id))
        } else {
            None
        };
        let Some(column) = self.archetypes.get_mut(archetype).column_mut(id) else {
            return;
        };
        let dst = column.row_mut(row);
        match (inherited, hooks) {
            (Some(src), Some(TypeHooks { copy: Some(copy), .. })) => copy(dst, &src),
            (Some(src), _) => dst.copy_from_slice(&src),
            (None, Some(TypeHooks { ctor: Some(ctor), .. })) => ctor(dst),
            (None, _) => {}
        }
    }

    /// Copy of the value `entity` owns for `id`.
    pub(crate) fn read_bytes(&self, entity: Entity, id: Id) -> Option<Vec<u8>> {
        let loc = self.entities.location(entity)?;
        let row = self.archetypes.get(loc.archetype).try_row(id, loc.row)?.ok()?;
        Some(row.to_vec())
    }

    // -- Observers --

    pub(crate) fn emit(&self, kind: ObserverKind, entity: Entity, id: Id) {
        let Some(observers) = self.observers.get(&id) else {
            return;
        };
        for observer in observers.list(kind) {
            observer(self, entity, id);
        }
    }

    /// Registers an observer for `id`.
    pub fn observe(
        &mut self,
        kind: ObserverKind,
        id: Id,
        observer: impl Fn(&World, Entity, Id) + Send + Sync + 'static,
    ) -> Result<()> {
        self.validate_id(id)?;
        self.observers
            .entry(id)
            .or_default()
            .list_mut(kind)
            .push(Arc::new(observer));
        Ok(())
    }

    pub fn on_add<T: Component>(&mut self, f: impl Fn(&World, Entity, Id) + Send + Sync + 'static) -> Result<()> {
        let id = Id::entity(self.component_id::<T>()?);
        self.observe(ObserverKind::Add, id, f)
    }

    pub fn on_set<T: Component>(&mut self, f: impl Fn(&World, Entity, Id) + Send + Sync + 'static) -> Result<()> {
        let id = Id::entity(self.component_id::<T>()?);
        self.observe(ObserverKind::Set, id, f)
    }

    pub fn on_remove<T: Component>(&mut self, f: impl Fn(&World, Entity, Id) + Send + Sync + 'static) -> Result<()> {
        let id = Id::entity(self.component_id::<T>()?);
        self.observe(ObserverKind::Remove, id, f)
    }

    // -- Id level operations --

    /// Adds `id` to `entity`. Adding an id the entity already owns does
    /// nothing. Adding `(ChildOf, parent)` replaces any previous parent.
    pub fn add_id(&mut self, entity: Entity, id: Id) -> Result<()> {
        self.add_id_with(entity, id, false)
    }

    fn add_id_with(&mut self, entity: Entity, id: Id, prefer_second: bool) -> Result<()> {
        let loc = self.location(entity)?;
        self.validate_id(id)?;
        if is_wildcard(id) {
            return Err(WorldError::UnknownId(id));
        }
        let is_child_of = |i: &Id| i.is_pair() && !i.is_override() && i.first() == CHILD_OF.index();
        let current = self.archetypes.get(loc.archetype);
        if current.has(id) {
            return Ok(());
        }
        let replaces_parent = is_child_of(&id) && current.ids().iter().any(is_child_of);
        self.check_acyclic(entity, id)?;
        let recorded = self.ensure_record(id, prefer_second);

        let to = if replaces_parent {
            let mut ids: Vec<Id> = self
                .archetypes
                .get(loc.archetype)
                .ids()
                .iter()
                .copied()
                .filter(|i| !is_child_of(i))
                .collect();
            if let Err(pos) = ids.binary_search(&id) {
                ids.insert(pos, id);
            }
            self.ensure_archetype(ids)
        } else {
            self.destination_with(loc.archetype, id)
        };
        let to = match to {
            Ok(to) => to,
            Err(err) => {
                if recorded {
                    self.id_records.remove(&id);
                }
                return Err(err);
            }
        };
        let instantiates = id.is_pair() && !id.is_override() && id.first() == IS_A.index();
        let children_before = instantiates.then(|| self.children(entity));
        self.move_entity(entity, loc, to);

        if let Err(err) = self.after_add(entity, id) {
            self.undo_add(entity, loc.archetype, children_before.as_deref());
            return Err(err);
        }
        Ok(())
    }

    /// Instantiates `IsA` bases and propagates the `Prefab` tag to children.
    fn after_add(&mut self, entity: Entity, id: Id) -> Result<()> {
        if id.is_pair() && !id.is_override() && id.first() == IS_A.index() {
            if let Some(base) = self.entities.alive_at(id.second()) {
                self.instantiate(entity, base)?;
            }
        }
        // children of prefabs are prefabs
        let prefab = Id::entity(PREFAB);
        if id.is_pair() && !id.is_override() && id.first() == CHILD_OF.index() {
            if let Some(parent) = self.entities.alive_at(id.second()) {
                if self.owns_id(parent, prefab)? && !self.owns_id(entity, prefab)? {
                    self.add_id(entity, prefab)?;
                }
            }
        }
        Ok(())
    }

    /// Moves `entity` back to the archetype it had before a failed add and,
    /// for an instantiation, deletes the children that add created.
    fn undo_add(&mut self, entity: Entity, from: ArchetypeId, children_before: Option<&[Entity]>) {
        if let Ok(now) = self.location(entity) {
            self.move_entity(entity, now, from);
        }
        let Some(children_before) = children_before else {
            return;
        };
        for child in self.children(entity) {
            if children_before.contains(&child) {
                continue;
            }
            if let Err(err) = self.delete_with(child, true) {
                warn!(entity = %entity, child = %child, error = %err, "could not undo instantiated child");
            }
        }
    }

    /// Removes `id`, or every id matching a wildcard pattern, from `entity`.
    /// Removing an absent id does nothing; an id naming a dead entity fails
    /// with `UnknownId` as it does for `add_id`.
    pub fn remove_id(&mut self, entity: Entity, id: Id) -> Result<()> {
        let loc = self.location(entity)?;
        self.validate_id(id)?;
        let current = self.archetypes.get(loc.archetype);
        let to = if is_wildcard(id) {
            let kept: Vec<Id> = current.ids().iter().copied().filter(|&i| !id_matches(id, i)).collect();
            if kept.len() == current.ids().len() {
                return Ok(());
            }
            self.ensure_archetype(kept)?
        } else {
            if !current.has(id) {
                return Ok(());
            }
            self.destination_without(loc.archetype, id)?
        };
        self.move_entity(entity, loc, to);
        Ok(())
    }

    /// Writes a value for `id`, adding the id first if needed.
    pub fn set_id(&mut self, entity: Entity, id: Id, value: &[u8]) -> Result<()> {
        self.set_id_with(entity, id, value, false)
    }

    fn set_id_with(&mut self, entity: Entity, id: Id, value: &[u8], prefer_second: bool) -> Result<()> {
        self.location(entity)?;
        self.validate_id(id)?;
        let size = self
            .data_type_hint(id, prefer_second)
            .and_then(|e| self.components.info(e))
            .map_or(0, |info| info.size);
        if size == 0 {
            return Err(WorldError::NoData(self.id_string(id)));
        }
        if value.len() != size {
            return Err(WorldError::TypeMismatch {
                id: self.id_string(id),
                expected: format!("{size} bytes"),
                requested: format!("{} bytes", value.len()),
            });
        }
        self.add_id_with(entity, id, prefer_second)?;

        let copy = self.hooks_of(id).and_then(|h| h.copy.clone());
        let loc = self.location(entity)?;
        if let Some(column) = self.archetypes.get_mut(loc.archetype).column_mut(id) {
            let dst = column.row_mut(loc.row);
            match copy {
                Some(copy) => copy(dst, value),
                None => dst.copy_from_slice(value),
            }
        }
        self.emit(ObserverKind::Set, entity, id);
        Ok(())
    }

    /// Bytes of the value of `id` on `entity`, own or inherited.
    pub fn get_id(&self, entity: Entity, id: Id) -> Result<Option<Ref<'_, [u8]>>> {
        let loc = self.location(entity)?;
        self.validate_id(id)?;
        if self.value_size(id) == 0 {
            return Err(WorldError::NoData(self.id_string(id)));
        }
        if let Some(own) = self.own_row(loc, id)? {
            return Ok(Some(own));
        }
        if !builtin::is_inheritable(id) {
            return Ok(None);
        }
        match self.inherited_source(entity, id) {
            Some(base) => self.own_row(self.location(base)?, id),
            None => Ok(None),
        }
    }

    fn own_row(&self, loc: EntityLocation, id: Id) -> Result<Option<Ref<'_, [u8]>>> {
        match self.archetypes.get(loc.archetype).try_row(id, loc.row) {
            None => Ok(None),
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(_)) => Err(WorldError::BorrowConflict(self.id_string(id))),
        }
    }

    /// Mutable bytes of a value `entity` owns. Inherited values are not
    /// returned; add the id to the instance to override them.
    pub fn get_id_mut(&mut self, entity: Entity, id: Id) -> Result<Option<&mut [u8]>> {
        let loc = self.location(entity)?;
        self.validate_id(id)?;
        if self.value_size(id) == 0 {
            return Err(WorldError::NoData(self.id_string(id)));
        }
        Ok(self
            .archetypes
            .get_mut(loc.archetype)
            .column_mut(id)
            .map(|column| column.row_mut(loc.row)))
    }

    /// Returns `true` if `entity` owns an id matching `id`.
    pub fn owns_id(&self, entity: Entity, id: Id) -> Result<bool> {
        let loc = self.location(entity)?;
        let archetype = self.archetypes.get(loc.archetype);
        Ok(if is_wildcard(id) {
            archetype.ids().iter().any(|&i| id_matches(id, i))
        } else {
            archetype.has(id)
        })
    }

    /// Returns `true` if `entity` owns or inherits an id matching `id`.
    pub fn has_id(&self, entity: Entity, id: Id) -> Result<bool> {
        if self.owns_id(entity, id)? {
            return Ok(true);
        }
        Ok(self.find_inherited(entity, id).is_some())
    }

    /// The entity's sorted type.
    pub fn type_of(&self, entity: Entity) -> Result<Vec<Id>> {
        let loc = self.location(entity)?;
        Ok(self.archetypes.get(loc.archetype).ids().to_vec())
    }

    // -- Deletion --

    /// Deletes `entity`.
    ///
    /// Children are deleted or orphaned according to
    /// [`ChildCleanup`](crate::ChildCleanup). Every id that references a
    /// deleted entity is removed from every other entity, destructors run,
    /// and the handles become stale. The archetypes the survivors move to are
    /// checked against the limit before anything changes.
    pub fn delete(&mut self, entity: Entity) -> Result<()> {
        let cascade = self.config.child_cleanup == crate::ChildCleanup::Cascade;
        self.delete_with(entity, cascade)
    }

    pub(crate) fn delete_with(&mut self, entity: Entity, cascade: bool) -> Result<()> {
        self.location(entity)?;
        // children before their parents
        let mut doomed = Vec::new();
        if cascade {
            doomed = self.descendants(entity);
            doomed.reverse();
        }
        doomed.push(entity);

        let plan = self.reference_plan(&doomed);
        self.check_archetype_budget(plan.iter().map(|(_, kept)| kept.as_slice()))?;
        for (other, kept) in plan {
            let loc = self.location(other)?;
            let to = self.ensure_archetype(kept)?;
            self.move_entity(other, loc, to);
        }
        for e in doomed {
            self.destroy(e)?;
        }
        Ok(())
    }

    /// For every entity outside `doomed` that has an id naming a doomed
    /// entity, the type it keeps once those ids are stripped.
    fn reference_plan(&self, doomed: &[Entity]) -> Vec<(Entity, Vec<Id>)> {
        let refers = |id: Id| {
            doomed.iter().any(|e| {
                if id.is_pair() {
                    id.references(e.index())
                } else {
                    id.without_override() == Id::entity(*e)
                }
            })
        };
        let mut plan = Vec::new();
        for archetype in self.archetypes.iter() {
            if archetype.is_empty() || !archetype.ids().iter().any(|&id| refers(id)) {
                continue;
            }
            let kept: Vec<Id> = archetype.ids().iter().copied().filter(|&id| !refers(id)).collect();
            plan.extend(
                archetype
                    .entities()
                    .iter()
                    .filter(|&&e| !doomed.contains(&e))
                    .map(|&e| (e, kept.clone())),
            );
        }
        plan
    }

    /// Fails if creating the missing archetypes among `types` would exceed
    /// the archetype limit.
    fn check_archetype_budget<'a>(&self, types: impl Iterator<Item = &'a [Id]>) -> Result<()> {
        let Some(builtin) = self.builtin_archetypes else {
            return Ok(());
        };
        let mut missing: Vec<&[Id]> = types.filter(|ids| self.archetypes.find(ids).is_none()).collect();
        missing.sort_unstable();
        missing.dedup();
        let created = self.archetypes.len().saturating_sub(builtin);
        if created + missing.len() > self.config.max_archetypes {
            return Err(WorldError::ArchetypeLimit(self.config.max_archetypes));
        }
        Ok(())
    }

    /// Drops the row of `entity` and frees its handle. Nothing may still
    /// reference it.
    fn destroy(&mut self, entity: Entity) -> Result<()> {
        let loc = self.location(entity)?;
        let ids = self.archetypes.get(loc.archetype).ids().to_vec();
        for &id in &ids {
            self.emit(ObserverKind::Remove, entity, id);
        }
        let dtors: Vec<_> = ids
            .iter()
            .filter_map(|&id| Some((id, self.hooks_of(id)?.dtor.clone()?)))
            .collect();
        let archetype = self.archetypes.get_mut(loc.archetype);
        for (id, dtor) in dtors {
            if let Some(column) = archetype.column_mut(id) {
                dtor(column.row_mut(loc.row));
            }
        }
        if let Some(moved) = archetype.swap_remove(loc.row) {
            self.entities.set_location(moved, loc);
        }
        self.relations.update(entity, &ids, &[]);
        self.structure_changed(entity, &ids, &[]);
        self.entities.free(entity);
        self.forget(entity);
        debug!(entity = %entity, "deleted entity");
        Ok(())
    }

    fn forget(&mut self, entity: Entity) {
        let index = entity.index();
        self.names.remove(entity);
        self.components.forget(entity);
        self.id_records.retain(|id, _| !id.references(index));
        self.observers.retain(|id, _| !id.references(index));
        if let Some(key) = self.system_keys.remove(&entity) {
            self.systems.remove(key);
            self.pipeline_dirty = true;
        }
        self.inherit_cache.get_mut().clear();
    }

    // -- Typed access --

    pub fn add<T: Component>(&mut self, entity: Entity) -> Result<()> {
        let id = Id::entity(self.component_id::<T>()?);
        self.add_id(entity, id)
    }

    pub fn remove<T: Component>(&mut self, entity: Entity) -> Result<()> {
        self.location(entity)?;
        let id = Id::entity(self.registered::<T>(T::type_name())?);
        self.remove_id(entity, id)
    }

    pub fn set<T: Component>(&mut self, entity: Entity, value: T) -> Result<()> {
        let id = Id::entity(self.component_id::<T>()?);
        self.set_id(entity, id, bytemuck::bytes_of(&value))
    }

    /// The value of `T` on `entity`, own or inherited.
    pub fn get<T: Component>(&self, entity: Entity) -> Result<Option<Ref<'_, T>>> {
        let id = Id::entity(self.registered::<T>(T::type_name())?);
        self.get_typed(entity, id, false)
    }

    /// Mutable access to an owned `T`.
    pub fn get_mut<T: Component>(&mut self, entity: Entity) -> Result<Option<&mut T>> {
        let id = Id::entity(self.registered::<T>(T::type_name())?);
        self.get_typed_mut(entity, id, false)
    }

    pub fn has<T: Component>(&self, entity: Entity) -> Result<bool> {
        match self.components.lookup_type(std::any::TypeId::of::<T>()) {
            Some(c) => self.has_id(entity, Id::entity(c)),
            None => self.location(entity).map(|_| false),
        }
    }

    pub fn owns<T: Component>(&self, entity: Entity) -> Result<bool> {
        match self.components.lookup_type(std::any::TypeId::of::<T>()) {
            Some(c) => self.owns_id(entity, Id::entity(c)),
            None => self.location(entity).map(|_| false),
        }
    }

    pub fn add_tag<T: Tag>(&mut self, entity: Entity) -> Result<()> {
        let id = Id::entity(self.tag_id::<T>()?);
        self.add_id(entity, id)
    }

    pub fn remove_tag<T: Tag>(&mut self, entity: Entity) -> Result<()> {
        self.location(entity)?;
        let id = Id::entity(self.registered::<T>(T::type_name())?);
        self.remove_id(entity, id)
    }

    pub fn has_tag<T: Tag>(&self, entity: Entity) -> Result<bool> {
        match self.components.lookup_type(std::any::TypeId::of::<T>()) {
            Some(c) => self.has_id(entity, Id::entity(c)),
            None => self.location(entity).map(|_| false),
        }
    }

    // -- Pairs --

    pub fn add_pair(&mut self, entity: Entity, relation: Entity, target: Entity) -> Result<()> {
        self.add_id(entity, Id::pair(relation, target))
    }

    /// Removes a pair; either side may be [`WILDCARD`].
    pub fn remove_pair(&mut self, entity: Entity, relation: Entity, target: Entity) -> Result<()> {
        self.remove_id(entity, Id::pair(relation, target))
    }

    pub fn has_pair(&self, entity: Entity, relation: Entity, target: Entity) -> Result<bool> {
        self.has_id(entity, Id::pair(relation, target))
    }

    pub fn owns_pair(&self, entity: Entity, relation: Entity, target: Entity) -> Result<bool> {
        self.owns_id(entity, Id::pair(relation, target))
    }

    /// Sets `(T, target)` with a value of the relation type `T`.
    pub fn set_pair<T: Component>(&mut self, entity: Entity, target: Entity, value: T) -> Result<()> {
        let relation = self.component_id::<T>()?;
        let id = Id::pair(relation, target);
        self.validate_id(id)?;
        self.check_type_hint::<T>(id, false)?;
        self.set_id_with(entity, id, bytemuck::bytes_of(&value), false)
    }

    pub fn get_pair<T: Component>(&self, entity: Entity, target: Entity) -> Result<Option<Ref<'_, T>>> {
        let relation = self.registered::<T>(T::type_name())?;
        self.get_typed(entity, Id::pair(relation, target), false)
    }

    /// Sets `(relation, T)` with a value of the target type `T`.
    pub fn set_second<T: Component>(&mut self, entity: Entity, relation: Entity, value: T) -> Result<()> {
        let target = self.component_id::<T>()?;
        let id = Id::pair(relation, target);
        self.validate_id(id)?;
        self.check_type_hint::<T>(id, true)?;
        self.set_id_with(entity, id, bytemuck::bytes_of(&value), true)
    }

    pub fn get_second<T: Component>(&self, entity: Entity, relation: Entity) -> Result<Option<Ref<'_, T>>> {
        let target = self.registered::<T>(T::type_name())?;
        self.get_typed(entity, Id::pair(relation, target), true)
    }

    pub fn get_second_mut<T: Component>(&mut self, entity: Entity, relation: Entity) -> Result<Option<&mut T>> {
        let target = self.registered::<T>(T::type_name())?;
        self.get_typed_mut(entity, Id::pair(relation, target), true)
    }

    fn get_typed<T: Component>(&self, entity: Entity, id: Id, prefer_second: bool) -> Result<Option<Ref<'_, T>>> {
        self.location(entity)?;
        self.check_type_hint::<T>(id, prefer_second)?;
        if !self.id_records.contains_key(&id) && id.is_pair() {
            // never added anywhere
            return Ok(None);
        }
        let Some(bytes) = self.get_id(entity, id)? else {
            return Ok(None);
        };
        Ref::filter_map(bytes, |b| bytemuck::try_from_bytes::<T>(b).ok())
            .map(Some)
            .map_err(|_| self.layout_mismatch::<T>(id))
    }

    fn get_typed_mut<T: Component>(
        &mut self,
        entity: Entity,
        id: Id,
        prefer_second: bool,
    ) -> Result<Option<&mut T>> {
        self.location(entity)?;
        self.check_type_hint::<T>(id, prefer_second)?;
        if !self.id_records.contains_key(&id) && id.is_pair() {
            return Ok(None);
        }
        let mismatch = self.layout_mismatch::<T>(id);
        match self.get_id_mut(entity, id)? {
            None => Ok(None),
            Some(bytes) => bytemuck::try_from_bytes_mut::<T>(bytes)
                .map(Some)
                .map_err(|_| mismatch),
        }
    }

    fn layout_mismatch<T: Component>(&self, id: Id) -> WorldError {
        WorldError::TypeMismatch {
            id: self.id_string(id),
            expected: format!("{} bytes", self.value_size(id)),
            requested: T::type_name().to_owned(),
        }
    }
}
