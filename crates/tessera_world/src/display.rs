//! Human readable ids and types.

use tessera_component::{ArchetypeId, Entity, Id};

use crate::error::Result;
use crate::world::World;

impl World {
    fn index_string(&self, index: u32) -> String {
        match self.entities.alive_at(index) {
            Some(entity) => self.full_path(entity),
            None => format!("#{index}"),
        }
    }

    /// `Position`, `(ChildOf,Sun)`, `OVERRIDE|Hull`.
    #[must_use]
    pub fn id_string(&self, id: Id) -> String {
        if id.is_override() {
            return format!("OVERRIDE|{}", self.id_string(id.without_override()));
        }
        if id.is_pair() {
            let (first, second) = id.pair_parts();
            return format!("({},{})", self.index_string(first), self.index_string(second));
        }
        match id.as_entity() {
            Some(entity) if self.entities.is_alive(entity) => self.full_path(entity),
            _ => format!("#{}", id.first()),
        }
    }

    /// Comma separated type of `entity`.
    pub fn type_string(&self, entity: Entity) -> Result<String> {
        let loc = self.location(entity)?;
        Ok(self.archetype_string(loc.archetype))
    }

    pub(crate) fn archetype_string(&self, archetype: ArchetypeId) -> String {
        self.archetypes
            .get(archetype)
            .ids()
            .iter()
            .map(|&id| self.id_string(id))
            .collect::<Vec<_>>()
            .join(", ")
    }
}
