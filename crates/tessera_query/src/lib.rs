//! # tessera_query
//!
//! The query expression language and the resolved term model.
//!
//! - [`parse`] turns text such as `"Position, ?Velocity, (ChildOf, *)"` into a
//!   [`QueryExpr`] of named references.
//! - [`QueryDescriptor`] is the id-level form a world compiles into a query,
//!   either resolved from a [`QueryExpr`] or built directly in code.

pub mod ast;
pub mod lexer;
pub mod parser;
pub mod term;

pub use ast::{FieldExpr, QueryExpr, RefExpr, TermExpr};
pub use lexer::LexError;
pub use parser::{ParseError, Parser};
pub use term::{Field, InOut, Oper, QueryDescriptor, Term, TermSource, Traversal};

/// Parses a query expression.
pub fn parse(input: &str) -> Result<QueryExpr, ParseError> {
    Parser::parse(input)
}
