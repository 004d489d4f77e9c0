//! Entity handles and the generational entity index.
//!
//! An [`Entity`] is a lightweight `u64` handle: the low 32 bits hold the slot
//! index, the next 16 bits hold a generation counter. When an entity is
//! deleted its index is recycled with a bumped generation, so stale handles
//! can be detected instead of silently aliasing a newer entity.

use serde::{Deserialize, Serialize};

use crate::archetype::ArchetypeId;
use crate::id::Id;

const INDEX_MASK: u64 = 0xFFFF_FFFF;
const GENERATION_SHIFT: u32 = 32;
const GENERATION_MASK: u64 = 0xFFFF << GENERATION_SHIFT;

/// A generational entity handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Entity(u64);

impl Entity {
    /// The null / invalid entity sentinel. Index 0 is never allocated.
    pub const NULL: Entity = Entity(0);

    /// Build a handle from an index and a generation.
    #[must_use]
    pub const fn new(index: u32, generation: u16) -> Self {
        Self(((generation as u64) << GENERATION_SHIFT) | index as u64)
    }

    /// Reinterpret a raw `u64` as an entity handle. Role bits are dropped.
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw & (INDEX_MASK | GENERATION_MASK))
    }

    /// Returns the raw `u64` handle.
    #[must_use]
    pub const fn to_raw(self) -> u64 {
        self.0
    }

    /// Slot index of this entity.
    #[must_use]
    pub const fn index(self) -> u32 {
        (self.0 & INDEX_MASK) as u32
    }

    /// Generation of this handle.
    #[must_use]
    pub const fn generation(self) -> u16 {
        ((self.0 & GENERATION_MASK) >> GENERATION_SHIFT) as u16
    }

    /// Returns `true` if this is not [`Entity::NULL`].
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.index() != 0
    }
}

impl std::fmt::Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}v{}", self.index(), self.generation())
    }
}

/// Where an entity's row lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityLocation {
    /// The archetype holding the entity.
    pub archetype: ArchetypeId,
    /// Row inside that archetype.
    pub row: usize,
}

#[derive(Debug, Clone)]
struct EntityRecord {
    generation: u16,
    location: Option<EntityLocation>,
}

/// Generational index of all entities in a world.
///
/// Slot 0 is reserved so that [`Entity::NULL`] never resolves. Freed slots are
/// kept on a free list and handed out again with the generation already
/// bumped at free time.
#[derive(Debug)]
pub struct EntityIndex {
    records: Vec<EntityRecord>,
    free: Vec<u32>,
    alive: usize,
}

impl EntityIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: vec![EntityRecord {
                generation: 0,
                location: None,
            }],
            free: Vec::new(),
            alive: 0,
        }
    }

    /// Allocates a handle placed at `location`.
    pub fn allocate(&mut self, location: EntityLocation) -> Entity {
        self.alive += 1;
        if let Some(index) = self.free.pop() {
            let record = &mut self.records[index as usize];
            record.location = Some(location);
            return Entity::new(index, record.generation);
        }
        if self.records.len() == Id::INVALID_RELATION as usize {
            // never handed out: pairs use it for relations that do not fit
            self.records.push(EntityRecord {
                generation: 0,
                location: None,
            });
        }
        let index = u32::try_from(self.records.len()).unwrap_or(u32::MAX);
        assert!(index < u32::MAX, "entity index space exhausted");
        self.records.push(EntityRecord {
            generation: 0,
            location: Some(location),
        });
        Entity::new(index, 0)
    }

    /// Frees a live handle. Returns `false` if the handle was not alive.
    pub fn free(&mut self, entity: Entity) -> bool {
        if !self.is_alive(entity) {
            return false;
        }
        let record = &mut self.records[entity.index() as usize];
        record.location = None;
        record.generation = record.generation.wrapping_add(1);
        self.free.push(entity.index());
        self.alive -= 1;
        true
    }

    /// Returns `true` if `entity` refers to a live slot with a matching generation.
    #[must_use]
    pub fn is_alive(&self, entity: Entity) -> bool {
        self.records
            .get(entity.index() as usize)
            .is_some_and(|r| r.location.is_some() && r.generation == entity.generation())
    }

    /// Returns the live handle currently occupying `index`, if any.
    #[must_use]
    pub fn alive_at(&self, index: u32) -> Option<Entity> {
        let record = self.records.get(index as usize)?;
        record.location?;
        Some(Entity::new(index, record.generation))
    }

    /// Location of a live entity.
    #[must_use]
    pub fn location(&self, entity: Entity) -> Option<EntityLocation> {
        let record = self.records.get(entity.index() as usize)?;
        if record.generation != entity.generation() {
            return None;
        }
        record.location
    }

    /// Updates the location of a live entity.
    pub fn set_location(&mut self, entity: Entity, location: EntityLocation) {
        if let Some(record) = self.records.get_mut(entity.index() as usize)
            && record.generation == entity.generation()
        {
            record.location = Some(location);
        }
    }

    /// Number of live entities.
    #[must_use]
    pub fn alive_count(&self) -> usize {
        self.alive
    }

    /// Iterates all live handles in index order.
    pub fn iter_alive(&self) -> impl Iterator<Item = Entity> + '_ {
        self.records
            .iter()
            .enumerate()
            .skip(1)
            .filter(|(_, r)| r.location.is_some())
            .map(|(i, r)| Entity::new(i as u32, r.generation))
    }
}

impl Default for EntityIndex {
    fn default() -> Self {
        Self::new()
    }
}
