//! Entity names and dotted paths.
//!
//! A name is unique per parent in practice but not enforced; lookups return
//! the first entity named so in the scope. Paths join names along the
//! `ChildOf` chain with `.`.

use std::collections::HashMap;

use tessera_component::{Entity, Id};

use crate::builtin::PREFAB;
use crate::error::{Result, WorldError};
use crate::world::World;

#[derive(Debug, Default)]
pub(crate) struct Names {
    by_entity: HashMap<Entity, String>,
    by_name: HashMap<String, Vec<Entity>>,
}

impl Names {
    pub fn insert(&mut self, entity: Entity, name: &str) {
        self.remove(entity);
        self.by_entity.insert(entity, name.to_owned());
        self.by_name.entry(name.to_owned()).or_default().push(entity);
    }

    pub fn remove(&mut self, entity: Entity) {
        let Some(old) = self.by_entity.remove(&entity) else {
            return;
        };
        if let Some(list) = self.by_name.get_mut(&old) {
            list.retain(|&e| e != entity);
            if list.is_empty() {
                self.by_name.remove(&old);
            }
        }
    }

    pub fn get(&self, entity: Entity) -> Option<&str> {
        self.by_entity.get(&entity).map(String::as_str)
    }

    pub fn candidates(&self, name: &str) -> &[Entity] {
        self.by_name.get(name).map(Vec::as_slice).unwrap_or_default()
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains('.') {
        return Err(WorldError::InvalidName(name.to_owned()));
    }
    Ok(())
}

impl World {
    /// Names `entity`. Names are single path segments.
    pub fn set_name(&mut self, entity: Entity, name: &str) -> Result<()> {
        self.location(entity)?;
        validate_name(name)?;
        self.names.insert(entity, name);
        Ok(())
    }

    #[must_use]
    pub fn name(&self, entity: Entity) -> Option<&str> {
        self.names.get(entity)
    }

    /// Dotted path from the root, `#<index>` for unnamed segments.
    #[must_use]
    pub fn full_path(&self, entity: Entity) -> String {
        let mut segments = Vec::new();
        let mut next = Some(entity);
        while let Some(current) = next {
            segments.push(match self.names.get(current) {
                Some(name) => name.to_owned(),
                None => format!("#{}", current.index()),
            });
            next = self.parent(current);
        }
        segments.reverse();
        segments.join(".")
    }

    fn lookup_child(&self, scope: Option<Entity>, name: &str) -> Option<Entity> {
        self.names
            .candidates(name)
            .iter()
            .copied()
            .find(|&e| self.parent(e) == scope)
    }

    /// Resolves a dotted path, starting at the root.
    #[must_use]
    pub fn lookup(&self, path: &str) -> Option<Entity> {
        let mut scope = None;
        for segment in path.split('.') {
            scope = Some(self.lookup_child(scope, segment)?);
        }
        scope
    }

    /// Resolves a dotted path, creating every missing segment as a named
    /// child of the previous one.
    pub fn entity_named(&mut self, path: &str) -> Result<Entity> {
        let segments: Vec<&str> = path.split('.').collect();
        for segment in &segments {
            validate_name(segment)?;
        }
        let mut scope: Option<Entity> = None;
        for segment in segments {
            let entity = match self.lookup_child(scope, segment) {
                Some(found) => found,
                None => {
                    let created = self.entity();
                    self.names.insert(created, segment);
                    if let Some(parent) = scope {
                        self.child_of(created, parent)?;
                    }
                    created
                }
            };
            scope = Some(entity);
        }
        scope.ok_or_else(|| WorldError::InvalidName(path.to_owned()))
    }

    /// Creates or finds a named entity and marks it as a prefab.
    pub fn prefab(&mut self, path: &str) -> Result<Entity> {
        let entity = self.entity_named(path)?;
        self.add_id(entity, Id::entity(PREFAB))?;
        Ok(entity)
    }
}
