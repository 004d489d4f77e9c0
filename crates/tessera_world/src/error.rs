//! World-level error type.

use tessera_component::{ComponentError, Entity, Id};
use tessera_query::ParseError;

/// Errors returned by [`World`](crate::World) operations.
///
/// Every structural error is reported before the world is mutated.
#[derive(Debug, thiserror::Error)]
pub enum WorldError {
    /// The handle's generation does not match a live entity.
    #[error("stale entity handle {0}")]
    StaleEntity(Entity),

    /// The id refers to nothing alive in this world.
    #[error("unknown id {0}")]
    UnknownId(Id),

    /// The id is a tag; it has no value to read or write.
    #[error("id {0} carries no data")]
    NoData(String),

    /// The requested Rust type does not match the stored value type.
    #[error("type mismatch on {id}: expected `{expected}`, requested `{requested}`")]
    TypeMismatch {
        id: String,
        expected: String,
        requested: String,
    },

    /// The relationship would make an acyclic relation cyclic.
    #[error("adding ({relation}, {target}) to {entity} creates a cycle")]
    Cycle {
        entity: String,
        relation: String,
        target: String,
    },

    /// A name in a query expression or path lookup did not resolve.
    #[error("unresolved name `{0}`")]
    UnresolvedName(String),

    /// Names are non-empty and contain no `.`.
    #[error("invalid entity name `{0}`")]
    InvalidName(String),

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// Creating another archetype would exceed the configured limit.
    #[error("archetype limit of {0} reached")]
    ArchetypeLimit(usize),

    #[error("field index {index} out of range (query has {count} fields)")]
    FieldOutOfRange { index: usize, count: usize },

    /// An optional or negated field has no value in this batch.
    #[error("field {0} is not set in this batch")]
    FieldNotSet(usize),

    /// Mutable access to a shared (inherited or fixed source) or `[in]` field.
    #[error("field {0} is read-only")]
    ReadOnlyField(usize),

    /// The column is already borrowed incompatibly.
    #[error("column of {0} is already borrowed")]
    BorrowConflict(String),

    #[error("type `{0}` is not registered in this world")]
    UnregisteredType(&'static str),

    #[error("{0} is not a system")]
    NotASystem(Entity),

    /// Invalid world arguments.
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Component(#[from] ComponentError),

    #[error("query parse error: {0}")]
    Parse(#[from] ParseError),
}

pub type Result<T, E = WorldError> = std::result::Result<T, E>;
