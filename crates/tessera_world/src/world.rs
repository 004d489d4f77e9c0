//! The [`World`]: owner of every entity, archetype, component and system.
//!
//! Structural operations live in `store`, relationships in `relation`, names
//! in `names`, queries in `query`, and the scheduler in `system`, `pipeline`
//! and `tick`. This module holds the state and the lifecycle.

use std::cell::RefCell;
use std::collections::HashMap;
use std::ffi::OsString;

use serde::Serialize;
use slotmap::SlotMap;
use tracing::{debug, info};

use tessera_component::{
    ArchetypeId, Archetypes, Component, ComponentDesc, ComponentHooks, ComponentRegistry, Entity,
    EntityIndex, EntityLocation, Id, Tag, TypeHooks,
};

use crate::builtin::{self, ComponentLayout};
use crate::config::WorldConfig;
use crate::error::{Result, WorldError};
use crate::names::Names;
use crate::relation::RelationIndex;
use crate::store::Observers;
use crate::system::{SystemKey, SystemSlot};
use crate::tick::FrameTime;

/// Which type a pair id stores, fixed on first use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct IdRecord {
    /// Component whose layout and hooks the values use; `None` for tags.
    pub data: Option<Entity>,
}

/// Snapshot of world statistics.
#[derive(Debug, Clone, Serialize)]
pub struct WorldInfo {
    pub tick: u64,
    pub delta_time: f32,
    pub world_time: f64,
    pub entity_count: usize,
    pub archetype_count: usize,
    pub component_count: usize,
    pub system_count: usize,
}

/// An ECS world.
///
/// All state is owned here; nothing is shared between worlds. A world is
/// `Send` but must be driven from one thread at a time.
pub struct World {
    pub(crate) config: WorldConfig,
    pub(crate) entities: EntityIndex,
    pub(crate) archetypes: Archetypes,
    pub(crate) components: ComponentRegistry,
    pub(crate) id_records: HashMap<Id, IdRecord>,
    pub(crate) observers: HashMap<Id, Observers>,
    pub(crate) relations: RelationIndex,
    pub(crate) names: Names,
    /// Memoised `(entity, id) -> owning base` lookups through `IsA`.
    pub(crate) inherit_cache: RefCell<HashMap<(Entity, Id), Option<Entity>>>,
    pub(crate) systems: SlotMap<SystemKey, SystemSlot>,
    pub(crate) system_keys: HashMap<Entity, SystemKey>,
    pub(crate) next_system_order: u64,
    pub(crate) pipeline: Vec<SystemKey>,
    pub(crate) pipeline_dirty: bool,
    pub(crate) time: FrameTime,
    pub(crate) quit_requested: bool,
    pub(crate) exit_code: i32,
    /// Archetypes created by bootstrap, exempt from the archetype limit.
    /// `None` while bootstrapping.
    pub(crate) builtin_archetypes: Option<usize>,
    finished: bool,
}

impl World {
    /// Creates a world with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(WorldConfig::default())
    }

    /// Creates a world with `config`. Invalid values are replaced by their
    /// defaults with a warning; use [`WorldConfig::validate`] to reject them.
    #[must_use]
    pub fn with_config(config: WorldConfig) -> Self {
        let mut world = Self {
            config: config.sanitized(),
            entities: EntityIndex::new(),
            archetypes: Archetypes::new(),
            components: ComponentRegistry::new(),
            id_records: HashMap::new(),
            observers: HashMap::new(),
            relations: RelationIndex::default(),
            names: Names::default(),
            inherit_cache: RefCell::new(HashMap::new()),
            systems: SlotMap::with_key(),
            system_keys: HashMap::new(),
            next_system_order: 0,
            pipeline: Vec::new(),
            pipeline_dirty: true,
            time: FrameTime::default(),
            quit_requested: false,
            exit_code: 0,
            builtin_archetypes: None,
            finished: false,
        };
        if let Err(err) = world.bootstrap() {
            panic!("world bootstrap failed: {err}");
        }
        world.builtin_archetypes = Some(world.archetypes.len());
        info!(
            threads = world.config.threads,
            target_fps = world.config.target_fps,
            dashboard = world.config.dashboard,
            "world initialised"
        );
        world
    }

    /// Creates a world configured from an argument vector such as
    /// `std::env::args()`. See [`WorldConfig::from_args`].
    pub fn init_with_args<I, T>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        Ok(Self::with_config(WorldConfig::from_args(args)?))
    }

    fn bootstrap(&mut self) -> Result<()> {
        for (expected, name) in builtin::BUILTINS {
            let entity = self.spawn_empty();
            assert_eq!(entity, expected, "builtin `{name}` allocated out of order");
            self.names.insert(entity, name);
        }
        self.components
            .insert(builtin::COMPONENT, ComponentDesc::of::<ComponentLayout>());
        self.set(builtin::COMPONENT, layout_of(8, 4))?;

        let phase = Id::entity(builtin::PHASE);
        for p in builtin::PHASES {
            self.add_id(p, phase)?;
        }
        for pair in builtin::PHASES.windows(2) {
            self.add_pair(pair[1], builtin::DEPENDS_ON, pair[0])?;
        }
        Ok(())
    }

    /// Allocates an entity in the empty archetype.
    pub(crate) fn spawn_empty(&mut self) -> Entity {
        let row = self.archetypes.get(ArchetypeId::EMPTY).len();
        let entity = self.entities.allocate(EntityLocation {
            archetype: ArchetypeId::EMPTY,
            row,
        });
        self.archetypes.get_mut(ArchetypeId::EMPTY).push(entity);
        entity
    }

    #[must_use]
    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    /// Runs every destructor hook and returns the exit code set by
    /// [`World::quit_with`].
    pub fn fini(mut self) -> i32 {
        self.teardown();
        self.exit_code
    }

    fn teardown(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        let mut destroyed = 0usize;
        let ids: Vec<Vec<Id>> = self.archetypes.iter().map(|a| a.ids().to_vec()).collect();
        for (index, type_ids) in ids.into_iter().enumerate() {
            for id in type_ids {
                let Some(dtor) = self.hooks_of(id).and_then(|h| h.dtor.clone()) else {
                    continue;
                };
                let archetype = self
                    .archetypes
                    .get_mut(ArchetypeId(index as u32));
                if let Some(column) = archetype.column_mut(id) {
                    for row in 0..column.len() {
                        dtor(column.row_mut(row));
                        destroyed += 1;
                    }
                }
            }
        }
        info!(
            entities = self.entities.alive_count(),
            destroyed,
            exit_code = self.exit_code,
            "world finished"
        );
    }

    // -- Component registration --

    /// Registers a Rust component type. Idempotent.
    pub fn register_component<T: Component>(&mut self) -> Result<Entity> {
        self.register(ComponentDesc::of::<T>())
    }

    /// Registers a Rust component type with lifecycle hooks.
    ///
    /// Registering an already registered type replaces its hooks.
    pub fn register_component_with<T: Component>(&mut self, hooks: ComponentHooks<T>) -> Result<Entity> {
        self.register(ComponentDesc::of::<T>().with_hooks(hooks.into_type_hooks()))
    }

    /// Registers a component by name and layout, without a Rust type.
    pub fn register_component_raw(
        &mut self,
        name: &str,
        size: usize,
        align: usize,
        hooks: TypeHooks,
    ) -> Result<Entity> {
        self.register(ComponentDesc::raw(name, size, align).with_hooks(hooks))
    }

    /// Registers a Rust tag type.
    pub fn register_tag<T: Tag>(&mut self) -> Result<Entity> {
        self.register(ComponentDesc::tag::<T>())
    }

    /// Registers a tag by name.
    pub fn register_tag_named(&mut self, name: &str) -> Result<Entity> {
        self.register(ComponentDesc::raw(name, 0, 1))
    }

    pub(crate) fn register(&mut self, desc: ComponentDesc) -> Result<Entity> {
        if let Some(existing) = self.components.resolve(&desc)? {
            return Ok(existing);
        }
        let (size, align) = (desc.size, desc.align);
        let (entity, spawned) = match self.lookup(&desc.name) {
            Some(e) if self.reusable_as_component(e, size) => (e, false),
            _ => {
                let e = self.spawn_empty();
                self.names.insert(e, &desc.name);
                (e, true)
            }
        };
        // registry entry only once the layout is stored
        if let Err(err) = self.set(entity, layout_of(size, align)) {
            if spawned {
                self.delete(entity)?;
            }
            return Err(err);
        }
        debug!(name = %desc.name, size, align, entity = %entity, "registered component");
        self.components.insert(entity, desc);
        Ok(entity)
    }

    /// A named root entity can back a component unless it is already used
    /// as a plain id and the component carries data.
    fn reusable_as_component(&self, entity: Entity, size: usize) -> bool {
        if self.components.info(entity).is_some() || self.parent(entity).is_some() {
            return false;
        }
        size == 0 || !self.archetypes.iter().any(|a| a.has(Id::entity(entity)))
    }

    /// Entity of a Rust component type, registering it on first use.
    pub fn component_id<T: Component>(&mut self) -> Result<Entity> {
        match self.components.lookup_type(std::any::TypeId::of::<T>()) {
            Some(e) => Ok(e),
            None => self.register_component::<T>(),
        }
    }

    /// Entity of a Rust tag type, registering it on first use.
    pub fn tag_id<T: Tag>(&mut self) -> Result<Entity> {
        match self.components.lookup_type(std::any::TypeId::of::<T>()) {
            Some(e) => Ok(e),
            None => self.register_tag::<T>(),
        }
    }

    /// Entity of a registered Rust type, without registering.
    pub(crate) fn registered<T: 'static>(&self, name: &'static str) -> Result<Entity> {
        self.components
            .lookup_type(std::any::TypeId::of::<T>())
            .ok_or(WorldError::UnregisteredType(name))
    }

    /// Replaces the lifecycle hooks of a registered component.
    pub fn set_hooks<T: Component>(&mut self, hooks: ComponentHooks<T>) -> Result<()> {
        let entity = self.component_id::<T>()?;
        self.components.set_hooks(entity, hooks.into_type_hooks())?;
        Ok(())
    }

    // -- Introspection --

    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.entities.alive_count()
    }

    #[must_use]
    pub fn archetype_count(&self) -> usize {
        self.archetypes.len()
    }

    #[must_use]
    pub fn is_alive(&self, entity: Entity) -> bool {
        self.entities.is_alive(entity)
    }

    /// Every live entity, builtins included, in index order.
    pub fn iter_entities(&self) -> impl Iterator<Item = Entity> + '_ {
        self.entities.iter_alive()
    }

    /// The live handle for an entity index, if any.
    #[must_use]
    pub fn entity_at(&self, index: u32) -> Option<Entity> {
        self.entities.alive_at(index)
    }

    #[must_use]
    pub fn info(&self) -> WorldInfo {
        WorldInfo {
            tick: self.time.tick,
            delta_time: self.time.delta_time,
            world_time: self.time.world_time,
            entity_count: self.entities.alive_count(),
            archetype_count: self.archetypes.len(),
            component_count: self.components.len(),
            system_count: self.systems.len(),
        }
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for World {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl std::fmt::Debug for World {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("World")
            .field("entities", &self.entities.alive_count())
            .field("archetypes", &self.archetypes.len())
            .field("components", &self.components.len())
            .field("systems", &self.systems.len())
            .finish()
    }
}

fn layout_of(size: usize, align: usize) -> ComponentLayout {
    ComponentLayout {
        size: size as u32,
        align: align as u32,
    }
}
