//! Deferred structural changes.
//!
//! Systems see the world through a shared borrow, so they record changes in
//! a [`Commands`] queue instead. The queue is applied when the system
//! returns; later systems in the same frame observe the result.

use std::any::TypeId;

use tessera_component::{Component, ComponentDesc, Entity, Id, Tag};
use tracing::{debug, warn};

use crate::builtin::{CHILD_OF, IS_A};
use crate::error::{Result, WorldError};
use crate::world::World;

/// An id known up front, a Rust type registered when the queue is applied,
/// or a Rust type that must already be registered by then.
#[derive(Debug, Clone)]
enum IdRef {
    Id(Id),
    Type(ComponentDesc),
    Registered(TypeId, &'static str),
}

#[derive(Debug, Clone)]
enum Op {
    Add(IdRef),
    Remove(IdRef),
    Set(IdRef, Vec<u8>),
}

#[derive(Debug, Clone)]
enum Command {
    Spawn(Spawn),
    Delete(Entity),
    Apply(Entity, Op),
    Name(Entity, String),
    Quit(i32),
}

/// A new entity, built up and created when the queue is applied.
#[derive(Debug, Clone, Default)]
pub struct Spawn {
    name: Option<String>,
    ops: Vec<Op>,
}

impl Spawn {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn named(mut self, name: &str) -> Self {
        self.name = Some(name.to_owned());
        self
    }

    #[must_use]
    pub fn add_id(mut self, id: Id) -> Self {
        self.ops.push(Op::Add(IdRef::Id(id)));
        self
    }

    #[must_use]
    pub fn add<T: Component>(mut self) -> Self {
        self.ops.push(Op::Add(IdRef::Type(ComponentDesc::of::<T>())));
        self
    }

    #[must_use]
    pub fn add_tag<T: Tag>(mut self) -> Self {
        self.ops.push(Op::Add(IdRef::Type(ComponentDesc::tag::<T>())));
        self
    }

    #[must_use]
    pub fn set<T: Component>(mut self, value: T) -> Self {
        self.ops.push(Op::Set(
            IdRef::Type(ComponentDesc::of::<T>()),
            bytemuck::bytes_of(&value).to_vec(),
        ));
        self
    }

    #[must_use]
    pub fn set_id(mut self, id: Id, value: &[u8]) -> Self {
        self.ops.push(Op::Set(IdRef::Id(id), value.to_vec()));
        self
    }

    #[must_use]
    pub fn add_pair(self, relation: Entity, target: Entity) -> Self {
        self.add_id(Id::pair(relation, target))
    }

    #[must_use]
    pub fn child_of(self, parent: Entity) -> Self {
        self.add_pair(CHILD_OF, parent)
    }

    #[must_use]
    pub fn is_a(self, base: Entity) -> Self {
        self.add_pair(IS_A, base)
    }
}

/// A queue of structural changes.
#[derive(Debug, Clone, Default)]
pub struct Commands {
    queue: Vec<Command>,
}

impl Commands {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawn(&mut self, spawn: Spawn) -> &mut Self {
        self.queue.push(Command::Spawn(spawn));
        self
    }

    pub fn delete(&mut self, entity: Entity) -> &mut Self {
        self.queue.push(Command::Delete(entity));
        self
    }

    fn op(&mut self, entity: Entity, op: Op) -> &mut Self {
        self.queue.push(Command::Apply(entity, op));
        self
    }

    pub fn add_id(&mut self, entity: Entity, id: Id) -> &mut Self {
        self.op(entity, Op::Add(IdRef::Id(id)))
    }

    pub fn remove_id(&mut self, entity: Entity, id: Id) -> &mut Self {
        self.op(entity, Op::Remove(IdRef::Id(id)))
    }

    pub fn set_id(&mut self, entity: Entity, id: Id, value: &[u8]) -> &mut Self {
        self.op(entity, Op::Set(IdRef::Id(id), value.to_vec()))
    }

    pub fn add<T: Component>(&mut self, entity: Entity) -> &mut Self {
        self.op(entity, Op::Add(IdRef::Type(ComponentDesc::of::<T>())))
    }

    pub fn remove<T: Component>(&mut self, entity: Entity) -> &mut Self {
        self.op(entity, Op::Remove(IdRef::Registered(TypeId::of::<T>(), T::type_name())))
    }

    pub fn set<T: Component>(&mut self, entity: Entity, value: T) -> &mut Self {
        let bytes = bytemuck::bytes_of(&value).to_vec();
        self.op(entity, Op::Set(IdRef::Type(ComponentDesc::of::<T>()), bytes))
    }

    pub fn add_tag<T: Tag>(&mut self, entity: Entity) -> &mut Self {
        self.op(entity, Op::Add(IdRef::Type(ComponentDesc::tag::<T>())))
    }

    pub fn remove_tag<T: Tag>(&mut self, entity: Entity) -> &mut Self {
        self.op(entity, Op::Remove(IdRef::Registered(TypeId::of::<T>(), T::type_name())))
    }

    pub fn add_pair(&mut self, entity: Entity, relation: Entity, target: Entity) -> &mut Self {
        self.add_id(entity, Id::pair(relation, target))
    }

    pub fn remove_pair(&mut self, entity: Entity, relation: Entity, target: Entity) -> &mut Self {
        self.remove_id(entity, Id::pair(relation, target))
    }

    pub fn child_of(&mut self, entity: Entity, parent: Entity) -> &mut Self {
        self.add_pair(entity, CHILD_OF, parent)
    }

    pub fn set_name(&mut self, entity: Entity, name: &str) -> &mut Self {
        self.queue.push(Command::Name(entity, name.to_owned()));
        self
    }

    /// Requests the frame loop to stop after the current frame.
    pub fn quit(&mut self) -> &mut Self {
        self.quit_with(0)
    }

    pub fn quit_with(&mut self, code: i32) -> &mut Self {
        self.queue.push(Command::Quit(code));
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

impl World {
    /// Applies and drains a command queue in order.
    ///
    /// A failing command does not stop the ones after it; the first error is
    /// returned once the queue is empty.
    pub fn apply(&mut self, commands: &mut Commands) -> Result<()> {
        let count = commands.len();
        let mut first_err = None;
        for command in commands.queue.drain(..) {
            if let Err(err) = self.apply_one(command) {
                warn!(error = %err, "deferred command failed");
                first_err.get_or_insert(err);
            }
        }
        if count > 0 {
            debug!(count, "applied commands");
        }
        first_err.map_or(Ok(()), Err)
    }

    fn apply_one(&mut self, command: Command) -> Result<()> {
        match command {
            Command::Spawn(spawn) => {
                let entity = self.entity();
                if let Some(name) = spawn.name {
                    self.set_name(entity, &name)?;
                }
                for op in spawn.ops {
                    self.apply_op(entity, op)?;
                }
                Ok(())
            }
            Command::Delete(entity) => self.delete(entity),
            Command::Apply(entity, op) => self.apply_op(entity, op),
            Command::Name(entity, name) => self.set_name(entity, &name),
            Command::Quit(code) => {
                self.quit_with(code);
                Ok(())
            }
        }
    }

    fn apply_op(&mut self, entity: Entity, op: Op) -> Result<()> {
        match op {
            Op::Add(id) => {
                let id = self.resolve_id_ref(id)?;
                self.add_id(entity, id)
            }
            Op::Set(id, value) => {
                let id = self.resolve_id_ref(id)?;
                self.set_id(entity, id, &value)
            }
            Op::Remove(id) => {
                self.location(entity)?;
                let id = self.resolve_id_ref(id)?;
                self.remove_id(entity, id)
            }
        }
    }

    fn resolve_id_ref(&mut self, id: IdRef) -> Result<Id> {
        match id {
            IdRef::Id(id) => Ok(id),
            IdRef::Type(desc) => Ok(Id::entity(self.register(desc)?)),
            IdRef::Registered(type_id, name) => self
                .components
                .lookup_type(type_id)
                .map(Id::entity)
                .ok_or(WorldError::UnregisteredType(name)),
        }
    }
}
