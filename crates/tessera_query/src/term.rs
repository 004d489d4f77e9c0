//! Resolved query terms.
//!
//! A [`QueryDescriptor`] is the id-level form of a query: a list of
//! [`Field`]s, each one or more alternative [`Term`]s. Text expressions are
//! resolved into this form by the world; code can also build it directly.

use serde::{Deserialize, Serialize};
use tessera_component::{Entity, Id};

/// Access mode of a field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum InOut {
    #[default]
    Default,
    In,
    Out,
    InOut,
    /// Matched but never read or written.
    None,
}

impl InOut {
    /// Fields that are only read.
    #[must_use]
    pub fn is_read_only(self) -> bool {
        matches!(self, InOut::In | InOut::None)
    }
}

/// How a field participates in matching.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Oper {
    #[default]
    And,
    Optional,
    Not,
}

/// Where a term looks for its id.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Traversal {
    /// The matched entity itself.
    #[default]
    SelfOnly,
    /// Only `IsA` ancestors.
    Up,
    /// The entity first, then its `IsA` ancestors.
    SelfUp,
}

impl Traversal {
    #[must_use]
    pub fn includes_self(self) -> bool {
        matches!(self, Traversal::SelfOnly | Traversal::SelfUp)
    }

    #[must_use]
    pub fn includes_up(self) -> bool {
        matches!(self, Traversal::Up | Traversal::SelfUp)
    }
}

/// The entity a term is evaluated against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TermSource {
    /// The entity being iterated.
    #[default]
    This,
    /// A fixed entity.
    Entity(Entity),
}

/// One id to look up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Term {
    pub id: Id,
    pub source: TermSource,
    pub traversal: Traversal,
}

impl Term {
    #[must_use]
    pub fn new(id: Id) -> Self {
        Self {
            id,
            source: TermSource::This,
            traversal: Traversal::SelfOnly,
        }
    }
}

/// One column of query results: a term, or an or-chain of terms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub oper: Oper,
    pub inout: InOut,
    pub terms: Vec<Term>,
}

impl Field {
    /// A required field on the iterated entity.
    #[must_use]
    pub fn new(id: Id) -> Self {
        Self {
            oper: Oper::And,
            inout: InOut::Default,
            terms: vec![Term::new(id)],
        }
    }

    /// A field satisfied by any one of `ids`.
    #[must_use]
    pub fn any_of(ids: impl IntoIterator<Item = Id>) -> Self {
        Self {
            oper: Oper::And,
            inout: InOut::Default,
            terms: ids.into_iter().map(Term::new).collect(),
        }
    }

    #[must_use]
    pub fn oper(mut self, oper: Oper) -> Self {
        self.oper = oper;
        self
    }

    #[must_use]
    pub fn inout(mut self, inout: InOut) -> Self {
        self.inout = inout;
        self
    }

    /// Also match through `IsA` ancestors.
    #[must_use]
    pub fn up(mut self) -> Self {
        for term in &mut self.terms {
            term.traversal = Traversal::SelfUp;
        }
        self
    }

    /// Read the value from a fixed entity.
    #[must_use]
    pub fn from(mut self, entity: Entity) -> Self {
        for term in &mut self.terms {
            term.source = TermSource::Entity(entity);
        }
        self
    }

    /// Returns `true` for or-chains.
    #[must_use]
    pub fn is_or(&self) -> bool {
        self.terms.len() > 1
    }
}

/// Id-level description of a query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryDescriptor {
    pub fields: Vec<Field>,
}

impl QueryDescriptor {
    #[must_use]
    pub fn new() -> Self {
        Self { fields: Vec::new() }
    }

    /// Add a required field.
    #[must_use]
    pub fn with(self, id: Id) -> Self {
        self.field(Field::new(id))
    }

    /// Add a read-only field.
    #[must_use]
    pub fn read(self, id: Id) -> Self {
        self.field(Field::new(id).inout(InOut::In))
    }

    /// Add a field the query writes.
    #[must_use]
    pub fn write(self, id: Id) -> Self {
        self.field(Field::new(id).inout(InOut::InOut))
    }

    /// Add an optional field.
    #[must_use]
    pub fn optional(self, id: Id) -> Self {
        self.field(Field::new(id).oper(Oper::Optional))
    }

    /// Exclude archetypes with `id`.
    #[must_use]
    pub fn without(self, id: Id) -> Self {
        self.field(Field::new(id).oper(Oper::Not))
    }

    /// Add an or-chain.
    #[must_use]
    pub fn any_of(self, ids: impl IntoIterator<Item = Id>) -> Self {
        self.field(Field::any_of(ids))
    }

    #[must_use]
    pub fn field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    /// Every id referenced by any term.
    pub fn ids(&self) -> impl Iterator<Item = Id> + '_ {
        self.fields.iter().flat_map(|f| f.terms.iter().map(|t| t.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: u64) -> Id {
        Id::from_raw(raw)
    }

    #[test]
    fn test_builder_collects_fields_in_order() {
        let desc = QueryDescriptor::new()
            .read(id(1))
            .write(id(2))
            .optional(id(3))
            .without(id(4))
            .any_of([id(5), id(6)]);
        assert_eq!(desc.fields.len(), 5);
        assert_eq!(desc.fields[0].inout, InOut::In);
        assert_eq!(desc.fields[2].oper, Oper::Optional);
        assert_eq!(desc.fields[3].oper, Oper::Not);
        assert!(desc.fields[4].is_or());
        assert_eq!(desc.ids().count(), 6);
    }

    #[test]
    fn test_field_modifiers_apply_to_all_terms() {
        let game = Entity::new(9, 0);
        let field = Field::any_of([id(1), id(2)]).up().from(game);
        assert!(field
            .terms
            .iter()
            .all(|t| t.traversal == Traversal::SelfUp && t.source == TermSource::Entity(game)));
    }

    #[test]
    fn test_traversal_flags() {
        assert!(Traversal::SelfOnly.includes_self());
        assert!(!Traversal::SelfOnly.includes_up());
        assert!(!Traversal::Up.includes_self());
        assert!(Traversal::SelfUp.includes_up());
    }
}
