//! # tessera_component
//!
//! Storage primitives of the tessera ECS.
//!
//! This crate provides:
//!
//! - [`Id`]: the 64-bit identifier space (entities, tags, pairs, roles).
//! - [`Entity`] / [`EntityIndex`]: generational handles and their locations.
//! - [`Component`] / [`Tag`]: the contracts Rust types implement.
//! - [`ComponentRegistry`]: name and type keyed component descriptors.
//! - [`Column`]: aligned type-erased value storage.
//! - [`Archetype`] / [`Archetypes`]: tables of entities sharing an id set.

pub mod archetype;
pub mod column;
pub mod component;
pub mod entity;
pub mod error;
pub mod id;

pub use archetype::{Archetype, ArchetypeId, Archetypes, Edge};
pub use column::Column;
pub use component::{
    Component, ComponentDesc, ComponentHooks, ComponentInfo, ComponentRegistry, CopyHook,
    MoveHook, Tag, TypeHooks, ValueHook, MAX_ALIGN,
};
pub use entity::{Entity, EntityIndex, EntityLocation};
pub use error::ComponentError;
pub use id::Id;
