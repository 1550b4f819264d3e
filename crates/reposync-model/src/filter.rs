//! Structural record filters.
//!
//! The engine composes filters out of these variants; translating a user's
//! rule string into a `Filter` is the job of the rule parser, which hands
//! the compiled filter plus its original string form to the run
//! configuration. Repositories translate the structure into their native
//! query language.

use serde::{Deserialize, Serialize};

use crate::id::ContentId;

/// A filter over records of a repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Filter {
    /// Every sub-filter must match.
    And(Vec<Filter>),
    /// At least one sub-filter must match.
    Or(Vec<Filter>),
    /// The sub-filter must not match.
    Not(Box<Filter>),
    /// Records of the given object type.
    TypeIs(i64),
    /// Records modified strictly after the timestamp.
    UpdatedAfter(i64),
    /// Records modified at or before the timestamp.
    UpdatedAtOrBefore(i64),
    /// Records belonging to the given channel.
    ChannelIs(i64),
    /// Records whose id is one of the given set.
    IdIn(Vec<ContentId>),
    /// An attribute equals a text value.
    AttributeEquals {
        /// Attribute name.
        attribute: String,
        /// Value to compare against.
        value: String,
    },
    /// Pre-compiled user rule carried opaquely to the repository.
    Raw(String),
}

impl Filter {
    /// Conjunction of `self` and `other`, flattening nested `And`s.
    #[must_use]
    pub fn and(self, other: Filter) -> Filter {
        match self {
            Filter::And(mut filters) => {
                filters.push(other);
                Filter::And(filters)
            }
            first => Filter::And(vec![first, other]),
        }
    }

    /// Disjunction of `self` and `other`.
    #[must_use]
    pub fn or(self, other: Filter) -> Filter {
        match self {
            Filter::Or(mut filters) => {
                filters.push(other);
                Filter::Or(filters)
            }
            first => Filter::Or(vec![first, other]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_and_flattens() {
        let f = Filter::TypeIs(1)
            .and(Filter::UpdatedAfter(100))
            .and(Filter::ChannelIs(5));
        match f {
            Filter::And(parts) => assert_eq!(parts.len(), 3),
            other => panic!("expected And, got {other:?}"),
        }
    }

    #[test]
    fn test_or_keeps_operands() {
        let f = Filter::TypeIs(1).or(Filter::IdIn(vec![ContentId::new(1, 2)]));
        match f {
            Filter::Or(parts) => assert_eq!(parts.len(), 2),
            other => panic!("expected Or, got {other:?}"),
        }
    }
}
