//! The 64-bit identifier space.
//!
//! Every thing an entity can "have" is an [`Id`]: a plain entity used as a
//! component or tag, a relationship pair `(relation, target)`, or one of those
//! carrying a role flag such as [`Id::OVERRIDE`].
//!
//! ```text
//!  63     56 55                 32 31                  0
//! +--------+---------------------+---------------------+
//! | roles  | generation / first  |   index / second    |
//! +--------+---------------------+---------------------+
//! ```
//!
//! For plain ids bits 32..48 hold the entity generation. For pairs the whole
//! 24-bit middle field holds the relation's index and the low 32 bits the
//! target's index; generations are not part of pair ids. A relation whose
//! index does not fit in 24 bits is stored as [`Id::INVALID_RELATION`], an
//! index the entity index never allocates, so such pairs name no live
//! entity instead of aliasing a smaller one.

use serde::{Deserialize, Serialize};

use crate::entity::Entity;

/// A component, tag, pair or role-flagged identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Id(u64);

impl Id {
    /// Mask covering all role bits.
    pub const ROLE_MASK: u64 = 0xFF << 56;
    /// Role bit marking a relationship pair.
    pub const PAIR: u64 = 1 << 63;
    /// Role bit marking an id whose value is copied into inheriting entities.
    pub const OVERRIDE: u64 = 1 << 62;

    const LOW_MASK: u64 = 0xFFFF_FFFF;
    const FIRST_MASK: u64 = 0x00FF_FFFF;

    /// Relation index of pairs whose relation does not fit in 24 bits.
    pub const INVALID_RELATION: u32 = 0x00FF_FFFF;

    /// Reinterpret a raw value.
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw `u64`.
    #[must_use]
    pub const fn to_raw(self) -> u64 {
        self.0
    }

    /// Id of a plain entity used as component or tag.
    #[must_use]
    pub const fn entity(entity: Entity) -> Self {
        Self(entity.to_raw())
    }

    /// Encode `(relation, target)`.
    ///
    /// Relation indices are limited to 24 bits; larger ones encode as
    /// [`Id::INVALID_RELATION`].
    #[must_use]
    pub const fn pair(relation: Entity, target: Entity) -> Self {
        Self::pair_from_indices(relation.index(), target.index())
    }

    /// Like [`Id::pair`], but `None` when the relation index does not fit.
    #[must_use]
    pub const fn try_pair(relation: Entity, target: Entity) -> Option<Self> {
        if relation.index() >= Self::INVALID_RELATION {
            None
        } else {
            Some(Self::pair(relation, target))
        }
    }

    /// Encode a pair from raw indices.
    #[must_use]
    pub const fn pair_from_indices(first: u32, second: u32) -> Self {
        let first = if first >= Self::INVALID_RELATION {
            Self::INVALID_RELATION
        } else {
            first
        };
        Self(Self::PAIR | ((first as u64) << 32) | second as u64)
    }

    /// Returns `true` for relationship pairs.
    #[must_use]
    pub const fn is_pair(self) -> bool {
        self.0 & Self::PAIR != 0
    }

    /// Returns `true` when the override role is set.
    #[must_use]
    pub const fn is_override(self) -> bool {
        self.0 & Self::OVERRIDE != 0
    }

    /// Returns `true` when any role bit is set.
    #[must_use]
    pub const fn has_role(self) -> bool {
        self.0 & Self::ROLE_MASK != 0
    }

    /// Relation index of a pair, or the entity index of a plain id.
    #[must_use]
    pub const fn first(self) -> u32 {
        if self.is_pair() {
            ((self.0 >> 32) & Self::FIRST_MASK) as u32
        } else {
            (self.0 & Self::LOW_MASK) as u32
        }
    }

    /// Target index of a pair, or 0 for plain ids.
    #[must_use]
    pub const fn second(self) -> u32 {
        // branch-free: multiply by 0/1 depending on the pair bit
        ((self.0 & Self::LOW_MASK) * (self.0 >> 63)) as u32
    }

    /// `(relation index, target index)` of a pair.
    #[must_use]
    pub const fn pair_parts(self) -> (u32, u32) {
        (((self.0 >> 32) & Self::FIRST_MASK) as u32, (self.0 & Self::LOW_MASK) as u32)
    }

    /// Strips all role bits, keeping the entity (or pair payload) bits.
    #[must_use]
    pub const fn strip_flags(self) -> u64 {
        self.0 & !Self::ROLE_MASK
    }

    /// Same id without role bits, re-marked as a pair when it was one.
    #[must_use]
    pub const fn without_override(self) -> Self {
        Self(self.0 & !Self::OVERRIDE)
    }

    /// Same id with the override role.
    #[must_use]
    pub const fn with_override(self) -> Self {
        Self(self.0 | Self::OVERRIDE)
    }

    /// The plain entity this id refers to, if it is not a pair.
    #[must_use]
    pub const fn as_entity(self) -> Option<Entity> {
        if self.has_role() {
            None
        } else {
            Some(Entity::from_raw(self.0))
        }
    }

    /// Returns `true` if the id references the entity index `index` in any
    /// position (plain, relation or target).
    #[must_use]
    pub const fn references(self, index: u32) -> bool {
        if self.is_pair() {
            let (first, second) = self.pair_parts();
            first == index || second == index
        } else {
            (self.0 & Self::LOW_MASK) as u32 == index
        }
    }

    /// Human readable role prefix, `""` for ids without roles.
    #[must_use]
    pub const fn role_str(self) -> &'static str {
        if self.is_override() {
            "OVERRIDE"
        } else if self.is_pair() {
            "PAIR"
        } else {
            ""
        }
    }
}

impl From<Entity> for Id {
    fn from(entity: Entity) -> Self {
        Self::entity(entity)
    }
}

impl std::fmt::Display for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_override() {
            write!(f, "OVERRIDE|")?;
        }
        if self.is_pair() {
            let (first, second) = self.pair_parts();
            write!(f, "({first},{second})")
        } else {
            write!(f, "{}", self.first())
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn test_plain_id_is_not_pair() {
        let id = Id::entity(Entity::new(5, 3));
        assert!(!id.is_pair());
        assert_eq!(id.first(), 5);
        assert_eq!(id.second(), 0);
        assert_eq!(id.as_entity(), Some(Entity::new(5, 3)));
    }

    #[test]
    fn test_pair_drops_generations() {
        let id = Id::pair(Entity::new(4, 9), Entity::new(7, 2));
        assert!(id.is_pair());
        assert_eq!(id.pair_parts(), (4, 7));
        assert_eq!(id, Id::pair(Entity::new(4, 0), Entity::new(7, 0)));
        assert_eq!(id.as_entity(), None);
    }

    #[test]
    fn test_pair_order_matters() {
        let a = Entity::new(1, 0);
        let b = Entity::new(2, 0);
        assert_ne!(Id::pair(a, b), Id::pair(b, a));
    }

    #[test]
    fn test_override_role_roundtrip() {
        let id = Id::entity(Entity::new(11, 0));
        let flagged = id.with_override();
        assert!(flagged.is_override());
        assert!(!flagged.is_pair());
        assert_eq!(flagged.role_str(), "OVERRIDE");
        assert_eq!(flagged.without_override(), id);
        assert_eq!(flagged.strip_flags(), id.to_raw());
    }

    #[test]
    fn test_wide_relation_does_not_alias() {
        let wide = Entity::new(0x0100_0004, 0);
        let target = Entity::new(9, 0);
        let id = Id::pair(wide, target);
        assert_eq!(id.first(), Id::INVALID_RELATION);
        assert_ne!(id, Id::pair(Entity::new(4, 0), target));
        assert_eq!(id.second(), 9);
        assert_eq!(Id::try_pair(wide, target), None);
        assert_eq!(Id::try_pair(Entity::new(4, 0), target), Some(Id::pair(Entity::new(4, 0), target)));
        assert_eq!(Id::pair(Entity::new(Id::INVALID_RELATION, 0), target).first(), Id::INVALID_RELATION);
    }

    #[test]
    fn test_references() {
        let id = Id::pair_from_indices(3, 8);
        assert!(id.references(3));
        assert!(id.references(8));
        assert!(!id.references(4));
        assert!(Id::entity(Entity::new(4, 1)).references(4));
    }

    proptest! {
        #[test]
        fn prop_pair_parts_roundtrip(first in 1u32..0x00FF_FFFF, second in 1u32..u32::MAX) {
            let id = Id::pair_from_indices(first, second);
            prop_assert!(id.is_pair());
            prop_assert_eq!(id.pair_parts(), (first, second));
            prop_assert_eq!(id.first(), first);
            prop_assert_eq!(id.second(), second);
        }

        #[test]
        fn prop_strip_flags_clears_roles(index in 1u32..u32::MAX, generation in any::<u16>()) {
            let id = Id::entity(Entity::new(index, generation)).with_override();
            prop_assert_eq!(id.strip_flags() & Id::ROLE_MASK, 0);
            prop_assert_eq!(Entity::from_raw(id.strip_flags()), Entity::new(index, generation));
        }
    }
}
