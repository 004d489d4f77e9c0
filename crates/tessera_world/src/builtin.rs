//! Builtin entities.
//!
//! Every world creates these at fixed indices, in this order, before anything
//! else, so they can be used as constants.

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};
use tessera_component::{Component, Entity, Id};

/// Data stored on every component entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable, Serialize, Deserialize)]
#[repr(C)]
pub struct ComponentLayout {
    pub size: u32,
    pub align: u32,
}

impl Component for ComponentLayout {
    fn type_name() -> &'static str {
        "Component"
    }
}

pub const COMPONENT: Entity = Entity::new(1, 0);
/// Matches any id in a pair position (`*`).
pub const WILDCARD: Entity = Entity::new(2, 0);
/// Hierarchy. Exclusive: an entity has at most one parent.
pub const CHILD_OF: Entity = Entity::new(3, 0);
/// Inheritance. Acyclic.
pub const IS_A: Entity = Entity::new(4, 0);
/// Marks a prefab child as a slot of a prefab ancestor.
pub const SLOT_OF: Entity = Entity::new(5, 0);
/// Ordering between phases. Acyclic.
pub const DEPENDS_ON: Entity = Entity::new(6, 0);
pub const PHASE: Entity = Entity::new(7, 0);
/// Entities with this tag are skipped by queries that do not mention it.
pub const PREFAB: Entity = Entity::new(8, 0);
/// Entities with this tag are skipped by queries that do not mention it.
pub const DISABLED: Entity = Entity::new(9, 0);
pub const SYSTEM: Entity = Entity::new(10, 0);

pub const ON_LOAD: Entity = Entity::new(11, 0);
pub const POST_LOAD: Entity = Entity::new(12, 0);
pub const PRE_UPDATE: Entity = Entity::new(13, 0);
pub const ON_UPDATE: Entity = Entity::new(14, 0);
pub const ON_VALIDATE: Entity = Entity::new(15, 0);
pub const POST_UPDATE: Entity = Entity::new(16, 0);
pub const PRE_STORE: Entity = Entity::new(17, 0);
pub const ON_STORE: Entity = Entity::new(18, 0);

/// Builtins in creation order, with their names.
pub(crate) const BUILTINS: [(Entity, &str); 18] = [
    (COMPONENT, "Component"),
    (WILDCARD, "*"),
    (CHILD_OF, "ChildOf"),
    (IS_A, "IsA"),
    (SLOT_OF, "SlotOf"),
    (DEPENDS_ON, "DependsOn"),
    (PHASE, "Phase"),
    (PREFAB, "Prefab"),
    (DISABLED, "Disabled"),
    (SYSTEM, "System"),
    (ON_LOAD, "OnLoad"),
    (POST_LOAD, "PostLoad"),
    (PRE_UPDATE, "PreUpdate"),
    (ON_UPDATE, "OnUpdate"),
    (ON_VALIDATE, "OnValidate"),
    (POST_UPDATE, "PostUpdate"),
    (PRE_STORE, "PreStore"),
    (ON_STORE, "OnStore"),
];

/// The default pipeline, in order.
pub(crate) const PHASES: [Entity; 8] = [
    ON_LOAD,
    POST_LOAD,
    PRE_UPDATE,
    ON_UPDATE,
    ON_VALIDATE,
    POST_UPDATE,
    PRE_STORE,
    ON_STORE,
];

/// Returns `false` for ids an entity never inherits through `IsA`: the
/// `Prefab` and `Disabled` tags, hierarchy and inheritance pairs, and
/// override markers.
#[must_use]
pub(crate) fn is_inheritable(id: Id) -> bool {
    if id.is_override() {
        return false;
    }
    if id.is_pair() {
        let relation = id.first();
        return ![CHILD_OF, IS_A, SLOT_OF].iter().any(|e| e.index() == relation);
    }
    ![PREFAB, DISABLED].iter().any(|e| e.index() == id.first())
}
