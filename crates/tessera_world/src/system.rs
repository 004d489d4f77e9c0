//! Systems: a query plus a callback, registered as an entity of a phase.

use std::ops::Deref;

use tessera_component::{Entity, Id};
use tessera_query::QueryDescriptor;
use tracing::{info, trace, warn};

use crate::builtin::{DEPENDS_ON, DISABLED, ON_UPDATE, PHASE, SYSTEM};
use crate::commands::Commands;
use crate::error::{Result, WorldError};
use crate::query::{Batch, Query};
use crate::world::World;

slotmap::new_key_type! {
    pub(crate) struct SystemKey;
}

/// Called once per matching batch.
pub type SystemCallback = Box<dyn FnMut(&mut SystemIter<'_, '_>) + Send>;

#[derive(Debug, Clone)]
enum QuerySource {
    Empty,
    Expr(String),
    Descriptor(QueryDescriptor),
}

/// Everything needed to register a system.
pub struct SystemDesc {
    name: String,
    phase: Entity,
    query: QuerySource,
    interval: Option<f32>,
    callback: SystemCallback,
}

impl SystemDesc {
    /// A system in `OnUpdate` without terms. An empty name creates an
    /// anonymous system entity.
    pub fn new(name: &str, callback: impl FnMut(&mut SystemIter<'_, '_>) + Send + 'static) -> Self {
        Self {
            name: name.to_owned(),
            phase: ON_UPDATE,
            query: QuerySource::Empty,
            interval: None,
            callback: Box::new(callback),
        }
    }

    #[must_use]
    pub fn phase(mut self, phase: Entity) -> Self {
        self.phase = phase;
        self
    }

    /// Query in the expression language, e.g. `Position, [in] Velocity`.
    #[must_use]
    pub fn expr(mut self, expr: &str) -> Self {
        self.query = QuerySource::Expr(expr.to_owned());
        self
    }

    #[must_use]
    pub fn descriptor(mut self, desc: QueryDescriptor) -> Self {
        self.query = QuerySource::Descriptor(desc);
        self
    }

    /// Runs the system at most once per `seconds` of frame time.
    #[must_use]
    pub fn interval(mut self, seconds: f32) -> Self {
        self.interval = Some(seconds);
        self
    }
}

impl std::fmt::Debug for SystemDesc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemDesc")
            .field("name", &self.name)
            .field("phase", &self.phase)
            .field("query", &self.query)
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

pub(crate) struct SystemRunner {
    query: Query,
    callback: SystemCallback,
}

pub(crate) struct SystemSlot {
    pub entity: Entity,
    pub name: String,
    pub phase: Entity,
    pub interval: Option<f32>,
    /// Frame time accumulated since the system last ran.
    pub accumulated: f32,
    pub enabled: bool,
    /// Registration order, used within a phase.
    pub order: u64,
    /// `None` while the system is running.
    runner: Option<SystemRunner>,
}

/// What a system callback sees: one batch, plus the frame's command queue.
///
/// Dereferences to [`Batch`] for entity and field access.
pub struct SystemIter<'a, 'w> {
    batch: Batch<'w>,
    commands: &'a mut Commands,
    system: Entity,
    delta_time: f32,
    delta_system_time: f32,
    skip: bool,
}

impl<'a, 'w> SystemIter<'a, 'w> {
    /// Structural changes, applied after the system returns.
    pub fn commands(&mut self) -> &mut Commands {
        self.commands
    }

    #[must_use]
    pub fn system(&self) -> Entity {
        self.system
    }

    /// Time elapsed since the previous frame.
    #[must_use]
    pub fn delta_time(&self) -> f32 {
        self.delta_time
    }

    /// Time elapsed since this system last ran.
    #[must_use]
    pub fn delta_system_time(&self) -> f32 {
        self.delta_system_time
    }

    /// Skips the remaining batches of this run.
    pub fn skip_remaining(&mut self) {
        self.skip = true;
    }
}

impl<'w> Deref for SystemIter<'_, 'w> {
    type Target = Batch<'w>;

    fn deref(&self) -> &Batch<'w> {
        &self.batch
    }
}

impl World {
    /// Registers a system and returns its entity.
    ///
    /// The phase entity receives the `Phase` tag if it does not have it yet.
    /// Registering a name that already names a system replaces it.
    pub fn system(&mut self, desc: SystemDesc) -> Result<Entity> {
        let query = match desc.query {
            QuerySource::Empty => self.query_from(QueryDescriptor::new())?,
            QuerySource::Expr(expr) => self.query(&expr)?,
            QuerySource::Descriptor(d) => self.query_from(d)?,
        };
        self.location(desc.phase)?;
        if let Some(interval) = desc.interval {
            if !(interval > 0.0 && interval.is_finite()) {
                return Err(WorldError::Config(format!("system interval must be positive, got {interval}")));
            }
        }

        let entity = if desc.name.is_empty() {
            self.entity()
        } else {
            self.entity_named(&desc.name)?
        };
        if !self.owns_id(desc.phase, Id::entity(PHASE))? {
            self.add_id(desc.phase, Id::entity(PHASE))?;
        }
        self.add_id(entity, Id::entity(SYSTEM))?;
        self.add_pair(entity, DEPENDS_ON, desc.phase)?;
        self.add_id(entity, Id::entity(desc.phase))?;

        if let Some(old) = self.system_keys.remove(&entity) {
            self.systems.remove(old);
        }
        let order = self.next_system_order;
        self.next_system_order += 1;
        let name = self.full_path(entity);
        let key = self.systems.insert(SystemSlot {
            entity,
            name,
            phase: desc.phase,
            interval: desc.interval,
            accumulated: 0.0,
            enabled: true,
            order,
            runner: Some(SystemRunner {
                query,
                callback: desc.callback,
            }),
        });
        self.system_keys.insert(entity, key);
        self.pipeline_dirty = true;
        info!(
            system = %self.full_path(entity),
            phase = %self.full_path(desc.phase),
            "registered system"
        );
        Ok(entity)
    }

    fn system_key(&self, system: Entity) -> Result<SystemKey> {
        self.location(system)?;
        self.system_keys
            .get(&system)
            .copied()
            .ok_or(WorldError::NotASystem(system))
    }

    /// Enables or disables a system. Disabled systems carry the `Disabled` tag.
    pub fn enable_system(&mut self, system: Entity, enabled: bool) -> Result<()> {
        let key = self.system_key(system)?;
        if let Some(slot) = self.systems.get_mut(key) {
            slot.enabled = enabled;
        }
        let disabled = Id::entity(DISABLED);
        if enabled {
            self.remove_id(system, disabled)
        } else {
            self.add_id(system, disabled)
        }
    }

    #[must_use]
    pub fn is_system_enabled(&self, system: Entity) -> bool {
        self.system_keys
            .get(&system)
            .and_then(|&key| self.systems.get(key))
            .is_some_and(|slot| slot.enabled)
    }

    /// Runs one system immediately, outside the pipeline. Disabled systems
    /// run too.
    pub fn run_system(&mut self, system: Entity, delta_time: f32) -> Result<()> {
        let key = self.system_key(system)?;
        if let Some(slot) = self.systems.get_mut(key) {
            slot.accumulated = 0.0;
        }
        self.run_system_key(key, delta_time, delta_time);
        Ok(())
    }

    /// Runs a pipeline entry, honouring its enabled flag and interval.
    pub(crate) fn run_scheduled(&mut self, key: SystemKey, delta_time: f32) {
        let Some(slot) = self.systems.get_mut(key) else {
            return;
        };
        slot.accumulated += delta_time;
        if !slot.enabled {
            return;
        }
        if slot.interval.is_some_and(|interval| slot.accumulated < interval) {
            return;
        }
        let delta_system_time = std::mem::take(&mut slot.accumulated);
        self.run_system_key(key, delta_time, delta_system_time);
    }

    fn run_system_key(&mut self, key: SystemKey, delta_time: f32, delta_system_time: f32) {
        let Some(slot) = self.systems.get_mut(key) else {
            return;
        };
        let system = slot.entity;
        let Some(mut runner) = slot.runner.take() else {
            warn!(system = %slot.name, "system is already running");
            return;
        };

        let mut commands = Commands::new();
        let mut batches = 0usize;
        {
            let world: &World = self;
            for batch in runner.query.iter(world) {
                batches += 1;
                let mut it = SystemIter {
                    batch,
                    commands: &mut commands,
                    system,
                    delta_time,
                    delta_system_time,
                    skip: false,
                };
                (runner.callback)(&mut it);
                if it.skip {
                    break;
                }
            }
        }
        if let Some(slot) = self.systems.get_mut(key) {
            trace!(system = %slot.name, batches, commands = commands.len(), "ran system");
            slot.runner = Some(runner);
        }
        if let Err(err) = self.apply(&mut commands) {
            warn!(system = %system, error = %err, "system commands failed");
        }
    }
}
