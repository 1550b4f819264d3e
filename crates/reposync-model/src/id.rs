//! Portable record identifiers.
//!
//! A record is addressed by the composite key `"{type_id}.{object_id}"`.
//! The canonical string form is what gets persisted in link attributes and
//! what every ordered scan sorts by, so the ordering of `ContentId` is the
//! lexicographic ordering of that string.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Composite identifier of a record: object type plus object id.
///
/// Links between records are stored in this portable form so that a record
/// copied to another repository keeps pointing at the right peer regardless
/// of physical row ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentId {
    type_id: i64,
    object_id: i64,
}

impl ContentId {
    /// Create a content id from its two parts.
    #[must_use]
    pub fn new(type_id: i64, object_id: i64) -> Self {
        Self { type_id, object_id }
    }

    /// The object type portion of the key.
    #[must_use]
    pub fn type_id(&self) -> i64 {
        self.type_id
    }

    /// The per-type object id portion of the key.
    #[must_use]
    pub fn object_id(&self) -> i64 {
        self.object_id
    }

    /// Canonical `"{type_id}.{object_id}"` form.
    #[must_use]
    pub fn canonical(&self) -> String {
        format!("{}.{}", self.type_id, self.object_id)
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.type_id, self.object_id)
    }
}

/// Error parsing a content id string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed content id '{0}', expected '<type>.<object>'")]
pub struct ParseContentIdError(pub String);

impl FromStr for ContentId {
    type Err = ParseContentIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (type_part, object_part) = s
            .split_once('.')
            .ok_or_else(|| ParseContentIdError(s.to_string()))?;
        let type_id = type_part
            .parse::<i64>()
            .map_err(|_| ParseContentIdError(s.to_string()))?;
        let object_id = object_part
            .parse::<i64>()
            .map_err(|_| ParseContentIdError(s.to_string()))?;
        Ok(Self { type_id, object_id })
    }
}

impl TryFrom<String> for ContentId {
    type Error = ParseContentIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ContentId> for String {
    fn from(id: ContentId) -> Self {
        id.canonical()
    }
}

// Ordering follows the canonical string form, not the numeric parts. Scans
// and merge joins on both sides of a sync sort by the persisted string, so
// the in-memory ordering must agree with `ORDER BY` on that column.
impl Ord for ContentId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.canonical().cmp(&other.canonical())
    }
}

impl PartialOrd for ContentId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
