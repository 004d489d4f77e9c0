//! Abstract syntax tree of a query expression.

use serde::{Deserialize, Serialize};

use crate::term::{InOut, Oper, Traversal};

/// A reference to an entity by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RefExpr {
    /// Dot-separated path, e.g. `Sun.Earth`.
    Name(String),
    /// `*`
    Wildcard,
    /// `$This`
    This,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermExpr {
    pub first: RefExpr,
    pub second: Option<RefExpr>,
    pub source: RefExpr,
    pub traversal: Traversal,
    pub line: usize,
    pub col: usize,
}

/// A comma-separated item: one term or an `||` chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldExpr {
    pub oper: Oper,
    pub inout: InOut,
    pub terms: Vec<TermExpr>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryExpr {
    pub fields: Vec<FieldExpr>,
}
