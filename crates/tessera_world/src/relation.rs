//! Relationships: hierarchy, inheritance, prefab instantiation and slots.

use std::collections::{HashMap, HashSet};

use tessera_component::{Component, Entity, Id};

use crate::builtin::{self, CHILD_OF, DEPENDS_ON, IS_A, SLOT_OF};
use crate::error::{Result, WorldError};
use crate::store::{id_matches, is_wildcard};
use crate::world::World;

/// Reverse index of pairs: for a relation and a target, the entities that
/// have `(relation, target)`, in insertion order.
#[derive(Debug, Default)]
pub(crate) struct RelationIndex {
    by_relation: HashMap<u32, HashMap<u32, Vec<Entity>>>,
}

impl RelationIndex {
    /// Applies a type change of `entity`.
    pub fn update(&mut self, entity: Entity, removed: &[Id], added: &[Id]) {
        for id in removed.iter().filter(|id| id.is_pair() && !id.is_override()) {
            let (relation, target) = id.pair_parts();
            let Some(targets) = self.by_relation.get_mut(&relation) else {
                continue;
            };
            if let Some(sources) = targets.get_mut(&target) {
                sources.retain(|&e| e != entity);
                if sources.is_empty() {
                    targets.remove(&target);
                }
            }
            if targets.is_empty() {
                self.by_relation.remove(&relation);
            }
        }
        for id in added.iter().filter(|id| id.is_pair() && !id.is_override()) {
            let (relation, target) = id.pair_parts();
            self.by_relation
                .entry(relation)
                .or_default()
                .entry(target)
                .or_default()
                .push(entity);
        }
    }

    /// Entities with `(relation, target)`.
    pub fn sources(&self, relation: Entity, target: Entity) -> &[Entity] {
        self.by_relation
            .get(&relation.index())
            .and_then(|targets| targets.get(&target.index()))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

impl World {
    /// Makes `entity` a child of `parent`, replacing any previous parent.
    pub fn child_of(&mut self, entity: Entity, parent: Entity) -> Result<()> {
        self.add_pair(entity, CHILD_OF, parent)
    }

    #[must_use]
    pub fn parent(&self, entity: Entity) -> Option<Entity> {
        self.get_target(entity, CHILD_OF, 0)
    }

    #[must_use]
    pub fn is_child_of(&self, entity: Entity, parent: Entity) -> bool {
        self.parent(entity) == Some(parent)
    }

    /// Direct children, in the order they were parented.
    #[must_use]
    pub fn children(&self, entity: Entity) -> Vec<Entity> {
        self.relations.sources(CHILD_OF, entity).to_vec()
    }

    /// Every descendant, depth first.
    #[must_use]
    pub fn descendants(&self, entity: Entity) -> Vec<Entity> {
        let mut out = Vec::new();
        let mut stack: Vec<Entity> = self.children(entity).into_iter().rev().collect();
        while let Some(next) = stack.pop() {
            out.push(next);
            stack.extend(self.children(next).into_iter().rev());
        }
        out
    }

    /// Makes `entity` an instance of `base`. Children of `base` are
    /// instantiated under `entity`, overrides are copied, slots resolved.
    pub fn is_a(&mut self, entity: Entity, base: Entity) -> Result<()> {
        self.add_pair(entity, IS_A, base)
    }

    /// Direct `IsA` bases, in type order.
    #[must_use]
    pub fn bases(&self, entity: Entity) -> Vec<Entity> {
        self.targets(entity, IS_A)
    }

    /// Entities with `(IsA, base)`.
    #[must_use]
    pub fn instances(&self, base: Entity) -> Vec<Entity> {
        self.relations.sources(IS_A, base).to_vec()
    }

    /// Orders `entity` after `target` in the pipeline.
    pub fn depends_on(&mut self, entity: Entity, target: Entity) -> Result<()> {
        self.add_pair(entity, DEPENDS_ON, target)
    }

    /// Targets of `relation` on `entity`, in type order.
    #[must_use]
    pub fn targets(&self, entity: Entity, relation: Entity) -> Vec<Entity> {
        let Some(loc) = self.entities.location(entity) else {
            return Vec::new();
        };
        self.archetypes
            .get(loc.archetype)
            .ids()
            .iter()
            .filter(|id| id.is_pair() && !id.is_override() && id.first() == relation.index())
            .filter_map(|id| self.entities.alive_at(id.second()))
            .collect()
    }

    /// The `nth` target of `relation` on `entity`.
    #[must_use]
    pub fn get_target(&self, entity: Entity, relation: Entity, nth: usize) -> Option<Entity> {
        self.targets(entity, relation).into_iter().nth(nth)
    }

    /// Entities that have `(relation, target)`.
    #[must_use]
    pub fn sources(&self, relation: Entity, target: Entity) -> Vec<Entity> {
        self.relations.sources(relation, target).to_vec()
    }

    /// Marks `T` on a prefab so that instances get their own copy of the
    /// prefab's value instead of sharing it.
    pub fn add_override<T: Component>(&mut self, prefab: Entity) -> Result<()> {
        let id = Id::entity(self.component_id::<T>()?);
        self.add_id(prefab, id.with_override())
    }

    /// Gives `entity` a private copy of the `T` it inherits. Does nothing
    /// if `entity` already owns a `T`.
    pub fn override_component<T: Component>(&mut self, entity: Entity) -> Result<()> {
        let id = Id::entity(self.component_id::<T>()?);
        self.add_id(entity, id)
    }

    /// Sets `T` on a prefab and marks it as overridden in instances.
    pub fn set_override<T: Component>(&mut self, prefab: Entity, value: T) -> Result<()> {
        self.set(prefab, value)?;
        self.add_override::<T>(prefab)
    }

    /// Rejects `(IsA|DependsOn|ChildOf, target)` on `entity` if `target`
    /// already reaches `entity` through the same relation.
    pub(crate) fn check_acyclic(&self, entity: Entity, id: Id) -> Result<()> {
        if !id.is_pair() || id.is_override() {
            return Ok(());
        }
        let (relation, target) = id.pair_parts();
        if ![IS_A, DEPENDS_ON, CHILD_OF].iter().any(|r| r.index() == relation) {
            return Ok(());
        }
        let (Some(relation), Some(target)) = (
            self.entities.alive_at(relation),
            self.entities.alive_at(target),
        ) else {
            return Ok(());
        };
        if self.reaches(target, relation, entity) {
            return Err(WorldError::Cycle {
                entity: self.full_path(entity),
                relation: self.full_path(relation),
                target: self.full_path(target),
            });
        }
        Ok(())
    }

    fn reaches(&self, from: Entity, relation: Entity, goal: Entity) -> bool {
        let mut seen = HashSet::new();
        let mut stack = vec![from];
        while let Some(next) = stack.pop() {
            if next == goal {
                return true;
            }
            if seen.insert(next) {
                stack.extend(self.targets(next, relation));
            }
        }
        false
    }

    /// Base that provides `id` to `entity`: bases in type order, depth first.
    /// `entity` itself is not considered.
    pub(crate) fn inherited_source(&self, entity: Entity, id: Id) -> Option<Entity> {
        let cached = self.inherit_cache.borrow().get(&(entity, id)).copied();
        if let Some(hit) = cached {
            return hit;
        }
        let found = self.bases(entity).into_iter().find_map(|base| {
            let owns = self
                .entities
                .location(base)
                .is_some_and(|loc| self.archetypes.get(loc.archetype).has(id));
            if owns {
                Some(base)
            } else {
                self.inherited_source(base, id)
            }
        });
        self.inherit_cache.borrow_mut().insert((entity, id), found);
        found
    }

    /// First inheritable id matching `pattern` on a base of `entity`, with
    /// the base that owns it.
    pub(crate) fn find_inherited(&self, entity: Entity, pattern: Id) -> Option<(Id, Entity)> {
        if !is_wildcard(pattern) {
            if !builtin::is_inheritable(pattern) {
                return None;
            }
            return self.inherited_source(entity, pattern).map(|base| (pattern, base));
        }
        for base in self.bases(entity) {
            let Some(loc) = self.entities.location(base) else {
                continue;
            };
            let own = self
                .archetypes
                .get(loc.archetype)
                .ids()
                .iter()
                .copied()
                .find(|&id| id_matches(pattern, id) && builtin::is_inheritable(id));
            if let Some(id) = own {
                return Some((id, base));
            }
            if let Some(found) = self.find_inherited(base, pattern) {
                return Some(found);
            }
        }
        None
    }

    /// Runs after `(IsA, base)` was added to `instance`.
    pub(crate) fn instantiate(&mut self, instance: Entity, base: Entity) -> Result<()> {
        for id in self.overrides_of(base) {
            if !self.owns_id(instance, id)? {
                self.add_id(instance, id)?;
            }
        }

        for child in self.children(base) {
            let copy = self.entity();
            if let Some(name) = self.names.get(child).map(str::to_owned) {
                self.names.insert(copy, &name);
            }
            if let Err(err) = self.attach_instance_child(copy, instance, child) {
                self.delete_with(copy, true)?;
                return Err(err);
            }
        }

        for descendant in self.descendants(instance) {
            for slot in self.bases(descendant) {
                if self.owns_pair(slot, SLOT_OF, base)? {
                    self.add_pair(instance, slot, descendant)?;
                }
            }
        }
        Ok(())
    }

    fn attach_instance_child(&mut self, copy: Entity, instance: Entity, child: Entity) -> Result<()> {
        self.add_pair(copy, CHILD_OF, instance)?;
        self.add_pair(copy, IS_A, child)
    }

    /// Ids marked with the override role on `base` or its own bases.
    fn overrides_of(&self, base: Entity) -> Vec<Id> {
        let mut out = Vec::new();
        let mut stack = vec![base];
        let mut seen = HashSet::new();
        while let Some(next) = stack.pop() {
            if !seen.insert(next) {
                continue;
            }
            if let Some(loc) = self.entities.location(next) {
                let marked: Vec<Id> = self
                    .archetypes
                    .get(loc.archetype)
                    .ids()
                    .iter()
                    .filter(|id| id.is_override())
                    .map(|id| id.without_override())
                    .collect();
                for id in marked {
                    if !out.contains(&id) {
                        out.push(id);
                    }
                }
            }
            stack.extend(self.bases(next));
        }
        out
    }
}
