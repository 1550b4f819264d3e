//! Records and attribute values.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::id::ContentId;

/// A single attribute value.
///
/// Multivalue attributes hold an ordered `Vec<AttrValue>`; the position in
/// that vector is the persisted sort order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttrValue {
    /// Text value, short or long.
    Text(String),
    /// Integer value; 32-bit attribute kinds are widened to i64 in memory.
    Long(i64),
    /// Floating point.
    Double(f64),
    /// Timestamp as epoch seconds.
    Date(i64),
    /// Raw bytes.
    Binary(Vec<u8>),
    /// Link to another record in portable form.
    Link(ContentId),
    /// Explicit null, kept to preserve multivalue positions.
    Null,
}

impl AttrValue {
    /// Text payload, if this is a text value.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Link target, if this is a link value.
    #[must_use]
    pub fn as_link(&self) -> Option<&ContentId> {
        match self {
            Self::Link(id) => Some(id),
            _ => None,
        }
    }

    /// Binary payload, if this is a binary value.
    #[must_use]
    pub fn as_binary(&self) -> Option<&[u8]> {
        match self {
            Self::Binary(b) => Some(b),
            _ => None,
        }
    }
}

impl From<&str> for AttrValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<i64> for AttrValue {
    fn from(v: i64) -> Self {
        Self::Long(v)
    }
}

impl From<ContentId> for AttrValue {
    fn from(id: ContentId) -> Self {
        Self::Link(id)
    }
}

/// A typed record owned by a repository.
///
/// Mutable while a sync batch rewrites its link attributes and stamps its
/// timestamp; treated as immutable once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Composite identity of the record.
    pub id: ContentId,
    /// Attribute name to ordered values. A BTreeMap keeps attribute
    /// iteration deterministic, which the detail-row ordering relies on.
    #[serde(default)]
    pub attributes: BTreeMap<String, Vec<AttrValue>>,
    /// Last modification timestamp in the owning repository.
    pub update_timestamp: i64,
    /// Channel the record belongs to (multi-channel repositories only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<i64>,
    /// Channelset the record belongs to (multi-channel repositories only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_set_id: Option<i64>,
}

impl Record {
    /// Create an empty record with the given identity and timestamp.
    #[must_use]
    pub fn new(id: ContentId, update_timestamp: i64) -> Self {
        Self {
            id,
            attributes: BTreeMap::new(),
            update_timestamp,
            channel_id: None,
            channel_set_id: None,
        }
    }

    /// Set a single-valued attribute, replacing prior values.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<AttrValue>) {
        self.attributes.insert(name.into(), vec![value.into()]);
    }

    /// Set a multivalue attribute, replacing prior values.
    pub fn set_all(&mut self, name: impl Into<String>, values: Vec<AttrValue>) {
        self.attributes.insert(name.into(), values);
    }

    /// Builder-style `set`.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        self.set(name, value);
        self
    }

    /// All values of an attribute, empty when absent.
    #[must_use]
    pub fn values(&self, name: &str) -> &[AttrValue] {
        self.attributes.get(name).map_or(&[], Vec::as_slice)
    }

    /// First value of an attribute.
    #[must_use]
    pub fn first(&self, name: &str) -> Option<&AttrValue> {
        self.attributes.get(name).and_then(|v| v.first())
    }

    /// Rewrite every value of the named attribute through `f`.
    ///
    /// Used by the data synchronizer to turn in-repository link values into
    /// portable content ids before storing.
    pub fn rewrite_values<F>(&mut self, name: &str, mut f: F)
    where
        F: FnMut(AttrValue) -> AttrValue,
    {
        if let Some(values) = self.attributes.remove(name) {
            let rewritten = values.into_iter().map(&mut f).collect();
            self.attributes.insert(name.to_string(), rewritten);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> Record {
        Record::new(ContentId::new(10007, 1), 1000)
    }

    #[test]
    fn test_set_and_get() {
        let mut r = record();
        r.set("name", "index.html");
        r.set("size", 4096i64);

        assert_eq!(r.first("name").unwrap().as_text(), Some("index.html"));
        assert_eq!(r.values("size"), &[AttrValue::Long(4096)]);
        assert!(r.values("missing").is_empty());
        assert!(r.first("missing").is_none());
    }

    #[test]
    fn test_multivalue_keeps_order() {
        let mut r = record();
        r.set_all(
            "tags",
            vec!["b".into(), "a".into(), "c".into()],
        );
        let tags: Vec<_> = r.values("tags").iter().filter_map(AttrValue::as_text).collect();
        assert_eq!(tags, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_rewrite_values() {
        let mut r = record();
        r.set("folder", ContentId::new(10002, 7));
        r.rewrite_values("folder", |v| match v {
            AttrValue::Link(id) => AttrValue::Text(id.canonical()),
            other => other,
        });
        assert_eq!(r.first("folder").unwrap().as_text(), Some("10002.7"));
    }
}
