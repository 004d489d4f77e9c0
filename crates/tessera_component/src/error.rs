//! Errors raised by the component registry and column views.

use thiserror::Error;

/// Errors produced while registering or accessing component data.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ComponentError {
    /// A name was registered again with a different size or alignment.
    #[error(
        "component `{name}` already registered as {existing_size}/{existing_align} (size/align), got {size}/{align}"
    )]
    DuplicateRegistration {
        name: String,
        existing_size: usize,
        existing_align: usize,
        size: usize,
        align: usize,
    },

    /// The declared layout cannot be stored in a column.
    #[error("component `{name}` has an invalid layout (size {size}, align {align}): {reason}")]
    InvalidLayout {
        name: String,
        size: usize,
        align: usize,
        reason: &'static str,
    },

    /// A typed view was requested with a type that does not match the column.
    #[error("type mismatch on `{name}`: column holds {expected}-byte values, requested {found}")]
    TypeMismatch {
        name: String,
        expected: usize,
        found: usize,
    },

    /// No component is registered under that name.
    #[error("unknown component `{0}`")]
    UnknownComponent(String),
}
