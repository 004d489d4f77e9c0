//! # tessera_world
//!
//! The runtime of the tessera ECS.
//!
//! This crate provides:
//!
//! - [`World`]: entities, components, tags and pairs stored in archetypes.
//! - Relationships: `ChildOf` hierarchies, `IsA` inheritance with prefab
//!   instantiation and slots, and user-defined relations.
//! - [`Query`]: compiled queries iterated in per-archetype [`Batch`]es.
//! - [`Commands`]: deferred structural changes.
//! - Systems ([`SystemDesc`]) scheduled over a `DependsOn` graph of phases
//!   and driven by [`World::progress`].
//! - [`WorldConfig`]: tunables, parsed from program arguments.

pub mod builtin;
mod commands;
mod config;
mod display;
mod error;
mod names;
mod pipeline;
mod query;
mod relation;
mod store;
mod system;
mod tick;
mod world;

pub use commands::{Commands, Spawn};
pub use config::{ChildCleanup, WorldConfig};
pub use error::{Result, WorldError};
pub use query::{Batch, Query, QueryIter};
pub use store::{Observer, ObserverKind};
pub use system::{SystemCallback, SystemDesc, SystemIter};
pub use world::{World, WorldInfo};

pub use tessera_component::{
    component, tag, Component, ComponentHooks, Entity, Id, Tag, TypeHooks,
};
pub use tessera_query::{Field, InOut, Oper, QueryDescriptor, Term, TermSource, Traversal};
