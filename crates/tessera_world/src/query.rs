//! Queries: matching archetypes against a [`QueryDescriptor`] and iterating
//! the matches in batches.
//!
//! A query remembers which archetypes matched and only examines archetypes
//! created since the last iteration. Queries whose terms traverse `IsA`
//! upwards depend on other entities' types and are re-evaluated every time.
//!
//! A [`Batch`] covers one archetype. Field values are column slices borrowed
//! through the archetype's `RefCell`s; values read from another entity (an
//! inherited or fixed-source field) are a single-element slice.

use std::any::TypeId;
use std::cell::{Ref, RefMut};
use std::sync::Arc;

use tessera_component::{Archetype, ArchetypeId, Component, Entity, Id};
use tessera_query::{Field, Oper, QueryDescriptor, QueryExpr, RefExpr, Term, TermExpr, TermSource};
use tracing::debug;

use crate::builtin::{self, DISABLED, IS_A, PREFAB, WILDCARD};
use crate::error::{Result, WorldError};
use crate::store::{id_matches, is_wildcard};
use crate::world::World;

/// How one field matched in a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FieldMatch {
    /// Concrete id that matched; the first term's id when not set.
    pub id: Id,
    /// Entity the value is read from, `None` for the batch's own rows.
    pub source: Option<Entity>,
    pub set: bool,
}

/// A compiled query.
#[derive(Debug, Clone)]
pub struct Query {
    desc: Arc<QueryDescriptor>,
    matched: Vec<ArchetypeId>,
    scanned: usize,
    cached: bool,
    iterates_this: bool,
    match_prefab: bool,
    match_disabled: bool,
}

impl Query {
    #[must_use]
    pub fn descriptor(&self) -> &QueryDescriptor {
        &self.desc
    }

    #[must_use]
    pub fn field_count(&self) -> usize {
        self.desc.fields.len()
    }

    /// Iterates the matching batches of `world`.
    pub fn iter<'w>(&mut self, world: &'w World) -> QueryIter<'w> {
        let candidates = if !self.iterates_this {
            Vec::new()
        } else if self.cached {
            self.refresh(world);
            self.matched.clone()
        } else {
            world
                .archetypes
                .iter()
                .filter(|a| world.archetype_matches(self, a))
                .map(Archetype::id)
                .collect()
        };
        QueryIter {
            world,
            desc: Arc::clone(&self.desc),
            candidates,
            next: 0,
            singleton: !self.iterates_this,
            peeked: None,
        }
    }

    fn refresh(&mut self, world: &World) {
        let total = world.archetypes.len();
        for index in self.scanned..total {
            let archetype = world.archetypes.get(ArchetypeId(index as u32));
            if world.archetype_matches(self, archetype) {
                self.matched.push(archetype.id());
            }
        }
        self.scanned = total;
    }

    /// Number of matching entities.
    pub fn count(&mut self, world: &World) -> usize {
        self.iter(world).map(|batch| batch.count()).sum()
    }

    /// Matching entities, batch by batch.
    pub fn entities(&mut self, world: &World) -> Vec<Entity> {
        self.iter(world)
            .flat_map(|batch| batch.entities().to_vec())
            .collect()
    }
}

/// Iterator over the batches of a query.
pub struct QueryIter<'w> {
    world: &'w World,
    desc: Arc<QueryDescriptor>,
    candidates: Vec<ArchetypeId>,
    next: usize,
    singleton: bool,
    peeked: Option<Batch<'w>>,
}

impl<'w> QueryIter<'w> {
    /// Returns `true` if another batch follows.
    pub fn has_next(&mut self) -> bool {
        if self.peeked.is_none() {
            self.peeked = self.advance();
        }
        self.peeked.is_some()
    }

    fn advance(&mut self) -> Option<Batch<'w>> {
        if self.singleton {
            self.singleton = false;
            let fields = self.world.match_fields(&self.desc, None)?;
            return Some(Batch::new(self.world, None, Arc::clone(&self.desc), fields));
        }
        while let Some(&id) = self.candidates.get(self.next) {
            self.next += 1;
            let archetype = self.world.archetypes.get(id);
            if archetype.is_empty() {
                continue;
            }
            if let Some(fields) = self.world.match_fields(&self.desc, Some(archetype)) {
                return Some(Batch::new(self.world, Some(archetype), Arc::clone(&self.desc), fields));
            }
        }
        None
    }
}

impl<'w> Iterator for QueryIter<'w> {
    type Item = Batch<'w>;

    fn next(&mut self) -> Option<Self::Item> {
        self.peeked.take().or_else(|| self.advance())
    }
}

/// Matching entities of one archetype, with typed access to each field.
pub struct Batch<'w> {
    world: &'w World,
    archetype: Option<&'w Archetype>,
    desc: Arc<QueryDescriptor>,
    fields: Vec<FieldMatch>,
}

impl<'w> Batch<'w> {
    fn new(
        world: &'w World,
        archetype: Option<&'w Archetype>,
        desc: Arc<QueryDescriptor>,
        fields: Vec<FieldMatch>,
    ) -> Self {
        Self {
            world,
            archetype,
            desc,
            fields,
        }
    }

    #[must_use]
    pub fn world(&self) -> &'w World {
        self.world
    }

    /// Rows in this batch; `0` for queries without `$this` terms.
    #[must_use]
    pub fn count(&self) -> usize {
        self.archetype.map_or(0, Archetype::len)
    }

    #[must_use]
    pub fn entities(&self) -> &'w [Entity] {
        self.archetype.map(Archetype::entities).unwrap_or_default()
    }

    #[must_use]
    pub fn entity(&self, row: usize) -> Option<Entity> {
        self.entities().get(row).copied()
    }

    #[must_use]
    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    fn field_match(&self, index: usize) -> Result<&FieldMatch> {
        self.fields.get(index).ok_or(WorldError::FieldOutOfRange {
            index,
            count: self.fields.len(),
        })
    }

    fn source_row(&self, index: usize, m: &FieldMatch) -> Result<(&'w Archetype, Option<usize>)> {
        match m.source {
            None => Ok((self.archetype.ok_or(WorldError::FieldNotSet(index))?, None)),
            Some(source) => {
                let loc = self.world.location(source)?;
                Ok((self.world.archetypes.get(loc.archetype), Some(loc.row)))
            }
        }
    }

    /// Values of field `index`, one per row, or a single shared value when
    /// the field is read from another entity.
    pub fn field<T: Component>(&self, index: usize) -> Result<Ref<'w, [T]>> {
        let m = *self.field_match(index)?;
        if !m.set {
            return Err(WorldError::FieldNotSet(index));
        }
        self.world.check_type::<T>(m.id)?;
        let (archetype, row) = self.source_row(index, &m)?;
        let cell = archetype
            .column(m.id)
            .ok_or_else(|| WorldError::NoData(self.world.id_string(m.id)))?;
        let column = cell
            .try_borrow()
            .map_err(|_| WorldError::BorrowConflict(self.world.id_string(m.id)))?;
        let values = Ref::filter_map(column, |c| c.as_slice::<T>().ok())
            .map_err(|_| self.mismatch::<T>(m.id))?;
        Ok(match row {
            Some(row) => Ref::map(values, |v| &v[row..=row]),
            None => values,
        })
    }

    /// Mutable values of field `index`. Shared and `[in]` fields are
    /// read-only.
    pub fn field_mut<T: Component>(&self, index: usize) -> Result<RefMut<'w, [T]>> {
        let m = *self.field_match(index)?;
        if !m.set {
            return Err(WorldError::FieldNotSet(index));
        }
        if m.source.is_some() || self.desc.fields[index].inout.is_read_only() {
            return Err(WorldError::ReadOnlyField(index));
        }
        self.world.check_type::<T>(m.id)?;
        let archetype = self.archetype.ok_or(WorldError::FieldNotSet(index))?;
        let cell = archetype
            .column(m.id)
            .ok_or_else(|| WorldError::NoData(self.world.id_string(m.id)))?;
        let column = cell
            .try_borrow_mut()
            .map_err(|_| WorldError::BorrowConflict(self.world.id_string(m.id)))?;
        RefMut::filter_map(column, |c| c.as_slice_mut::<T>().ok())
            .map_err(|_| self.mismatch::<T>(m.id))
    }

    fn mismatch<T: Component>(&self, id: Id) -> WorldError {
        WorldError::TypeMismatch {
            id: self.world.id_string(id),
            expected: format!("{} bytes", self.world.value_size(id)),
            requested: T::type_name().to_owned(),
        }
    }

    /// Returns `false` for optional fields that did not match and for
    /// negated fields.
    #[must_use]
    pub fn field_is_set(&self, index: usize) -> bool {
        self.fields.get(index).is_some_and(|m| m.set)
    }

    /// Concrete id that matched field `index`.
    #[must_use]
    pub fn field_id(&self, index: usize) -> Option<Id> {
        self.fields.get(index).map(|m| m.id)
    }

    /// Returns `true` if field `index` matched the component `T`. Useful to
    /// tell which alternative of an or-chain matched.
    #[must_use]
    pub fn field_is<T: Component>(&self, index: usize) -> bool {
        let Some(component) = self.world.components.lookup_type(TypeId::of::<T>()) else {
            return false;
        };
        self.fields
            .get(index)
            .is_some_and(|m| m.set && m.id == Id::entity(component))
    }

    /// Returns `true` if field `index` is stored in this batch's rows.
    #[must_use]
    pub fn field_is_self(&self, index: usize) -> bool {
        self.fields.get(index).is_some_and(|m| m.set && m.source.is_none())
    }

    /// Entity a shared field is read from.
    #[must_use]
    pub fn field_source(&self, index: usize) -> Option<Entity> {
        self.fields.get(index).and_then(|m| m.source)
    }

    /// Type of the batch's archetype.
    #[must_use]
    pub fn table_string(&self) -> String {
        self.archetype
            .map(|a| self.world.archetype_string(a.id()))
            .unwrap_or_default()
    }
}

/// Concrete id in `archetype` matching `pattern`.
fn find_in(archetype: &Archetype, pattern: Id) -> Option<Id> {
    if is_wildcard(pattern) {
        archetype.ids().iter().copied().find(|&id| id_matches(pattern, id))
    } else {
        archetype.has(pattern).then_some(pattern)
    }
}

impl World {
    /// Parses and compiles a query expression.
    pub fn query(&self, expr: &str) -> Result<Query> {
        let ast = tessera_query::parse(expr)?;
        let desc = self.resolve_query(&ast)?;
        self.query_from(desc)
    }

    /// Compiles a descriptor built in code.
    pub fn query_from(&self, desc: QueryDescriptor) -> Result<Query> {
        for (index, field) in desc.fields.iter().enumerate() {
            if field.terms.is_empty() {
                return Err(WorldError::InvalidQuery(format!("field {index} has no terms")));
            }
            if field.is_or() && field.oper != Oper::And {
                return Err(WorldError::InvalidQuery(format!(
                    "field {index}: alternatives cannot be optional or negated"
                )));
            }
            for term in &field.terms {
                self.validate_id(term.id)?;
                if let TermSource::Entity(source) = term.source {
                    self.location(source)?;
                }
            }
        }
        let mentions = |e: Entity| desc.ids().any(|id| id == Id::entity(e));
        let this_terms = || {
            desc.fields
                .iter()
                .flat_map(|f| f.terms.iter())
                .filter(|t| t.source == TermSource::This)
        };
        let query = Query {
            match_prefab: mentions(PREFAB),
            match_disabled: mentions(DISABLED),
            iterates_this: this_terms().next().is_some(),
            cached: !this_terms().any(|t| t.traversal.includes_up()),
            desc: Arc::new(desc),
            matched: Vec::new(),
            scanned: 0,
        };
        debug!(fields = query.field_count(), cached = query.cached, "compiled query");
        Ok(query)
    }

    fn resolve_query(&self, expr: &QueryExpr) -> Result<QueryDescriptor> {
        let mut desc = QueryDescriptor::new();
        for field in &expr.fields {
            let terms = field
                .terms
                .iter()
                .map(|term| self.resolve_term(term))
                .collect::<Result<Vec<_>>>()?;
            desc = desc.field(Field {
                oper: field.oper,
                inout: field.inout,
                terms,
            });
        }
        Ok(desc)
    }

    fn resolve_ref(&self, reference: &RefExpr, term: &TermExpr) -> Result<Entity> {
        match reference {
            RefExpr::Wildcard => Ok(WILDCARD),
            RefExpr::Name(name) => self
                .lookup(name)
                .ok_or_else(|| WorldError::UnresolvedName(name.clone())),
            RefExpr::This => Err(WorldError::InvalidQuery(format!(
                "{}:{}: $this is only valid as a source",
                term.line, term.col
            ))),
        }
    }

    fn resolve_term(&self, term: &TermExpr) -> Result<Term> {
        let first = self.resolve_ref(&term.first, term)?;
        let id = match &term.second {
            None => Id::entity(first),
            Some(second) => Id::pair(first, self.resolve_ref(second, term)?),
        };
        let source = match &term.source {
            RefExpr::This => TermSource::This,
            RefExpr::Wildcard => {
                return Err(WorldError::InvalidQuery(format!(
                    "{}:{}: wildcard source",
                    term.line, term.col
                )));
            }
            reference => TermSource::Entity(self.resolve_ref(reference, term)?),
        };
        Ok(Term {
            id,
            source,
            traversal: term.traversal,
        })
    }

    /// Structural match of the `$this` fields against an archetype.
    fn archetype_matches(&self, query: &Query, archetype: &Archetype) -> bool {
        if !query.match_prefab && archetype.has(Id::entity(PREFAB)) {
            return false;
        }
        if !query.match_disabled && archetype.has(Id::entity(DISABLED)) {
            return false;
        }
        query.desc.fields.iter().all(|field| {
            if field.terms.iter().any(|t| t.source != TermSource::This) {
                return true;
            }
            let hit = field
                .terms
                .iter()
                .any(|t| self.match_term(t, Some(archetype)).is_some());
            match field.oper {
                Oper::And => hit,
                Oper::Not => !hit,
                Oper::Optional => true,
            }
        })
    }

    /// Evaluates every field; `None` if the batch does not match.
    pub(crate) fn match_fields(
        &self,
        desc: &QueryDescriptor,
        archetype: Option<&Archetype>,
    ) -> Option<Vec<FieldMatch>> {
        let mut out = Vec::with_capacity(desc.fields.len());
        for field in &desc.fields {
            let hit = field
                .terms
                .iter()
                .find_map(|term| self.match_term(term, archetype));
            let unset = FieldMatch {
                id: field.terms[0].id,
                source: None,
                set: false,
            };
            match (field.oper, hit) {
                (Oper::Not, Some(_)) | (Oper::And, None) => return None,
                (Oper::Not | Oper::Optional, None) => out.push(unset),
                (_, Some((id, source))) => out.push(FieldMatch {
                    id,
                    source,
                    set: true,
                }),
            }
        }
        Some(out)
    }

    fn match_term(&self, term: &Term, archetype: Option<&Archetype>) -> Option<(Id, Option<Entity>)> {
        let (archetype, source) = match term.source {
            TermSource::This => (archetype?, None),
            TermSource::Entity(entity) => {
                let loc = self.entities.location(entity)?;
                (self.archetypes.get(loc.archetype), Some(entity))
            }
        };
        if term.traversal.includes_self() {
            if let Some(id) = find_in(archetype, term.id) {
                return Some((id, source));
            }
        }
        if !term.traversal.includes_up() {
            return None;
        }
        let bases = archetype
            .ids()
            .iter()
            .filter(|id| id.is_pair() && !id.is_override() && id.first() == IS_A.index())
            .filter_map(|id| self.entities.alive_at(id.second()));
        for base in bases {
            let own = self.entities.location(base).and_then(|loc| {
                let base_type = self.archetypes.get(loc.archetype);
                base_type
                    .ids()
                    .iter()
                    .copied()
                    .find(|&id| id_matches(term.id, id) && builtin::is_inheritable(id))
            });
            if let Some(id) = own {
                return Some((id, Some(base)));
            }
            if let Some((id, owner)) = self.find_inherited(base, term.id) {
                return Some((id, Some(owner)));
            }
        }
        None
    }
}
