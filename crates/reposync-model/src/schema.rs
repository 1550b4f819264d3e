//! Schema-level types: object types, attribute types, and the comparison
//! policy used when diffing two repositories.

use serde::{Deserialize, Serialize};

/// An object type in a repository, analogous to a table.
///
/// Identity is `type_id`; `name` is informational and may differ between
/// repositories without constituting a schema change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectType {
    /// Numeric type identifier, stable across repositories.
    pub type_id: i64,
    /// Human-readable type name.
    pub name: String,
    /// Whether records of this type are excluded from versioning.
    #[serde(default)]
    pub exclude_versioning: bool,
}

impl ObjectType {
    /// Create a new object type.
    #[must_use]
    pub fn new(type_id: i64, name: impl Into<String>) -> Self {
        Self {
            type_id,
            name: name.into(),
            exclude_versioning: false,
        }
    }
}

/// The value kind of an attribute type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeKind {
    /// Short text, stored inline.
    Text,
    /// Reference to another record, persisted as a portable content id.
    LinkObject,
    /// 32-bit integer.
    Integer,
    /// Raw bytes, stored inline.
    Binary,
    /// Unbounded text, stored in detail rows.
    LongText,
    /// Unbounded bytes, stored in detail rows.
    Blob,
    /// Reverse side of a link attribute on another type.
    ForeignLink,
    /// 64-bit integer.
    Long,
    /// Floating point.
    Double,
    /// Timestamp value.
    Date,
}

impl AttributeKind {
    /// Whether values of this kind are large objects that must never be
    /// materialized wholesale during a sync.
    #[must_use]
    pub fn is_lob(&self) -> bool {
        matches!(self, Self::LongText | Self::Blob | Self::Binary)
    }

    /// Stable string form used in catalogs and logs.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::LinkObject => "link_object",
            Self::Integer => "integer",
            Self::Binary => "binary",
            Self::LongText => "long_text",
            Self::Blob => "blob",
            Self::ForeignLink => "foreign_link",
            Self::Long => "long",
            Self::Double => "double",
            Self::Date => "date",
        }
    }
}

impl std::fmt::Display for AttributeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for AttributeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "link_object" => Ok(Self::LinkObject),
            "integer" => Ok(Self::Integer),
            "binary" => Ok(Self::Binary),
            "long_text" => Ok(Self::LongText),
            "blob" => Ok(Self::Blob),
            "foreign_link" => Ok(Self::ForeignLink),
            "long" => Ok(Self::Long),
            "double" => Ok(Self::Double),
            "date" => Ok(Self::Date),
            _ => Err(format!("unknown attribute kind: {s}")),
        }
    }
}

/// An attribute type attached to an object type, analogous to a column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeType {
    /// The object type this attribute belongs to.
    pub owner_type_id: i64,
    /// Attribute name, unique within the owner type.
    pub name: String,
    /// Value kind.
    pub kind: AttributeKind,
    /// Whether the attribute holds multiple ordered values.
    #[serde(default)]
    pub multivalue: bool,
    /// Whether a denormalized copy is kept inline on the main record row.
    #[serde(default)]
    pub optimized: bool,
    /// Name of the inline quick column when `optimized`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quick_column: Option<String>,
    /// Target object type for `LinkObject` attributes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linked_type_id: Option<i64>,
    /// Name of the forward link attribute for `ForeignLink` attributes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub foreign_link_attribute: Option<String>,
    /// Optional filter rule restricting a foreign link.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub foreign_link_rule: Option<String>,
    /// Whether this attribute is excluded from versioning.
    #[serde(default)]
    pub exclude_versioning: bool,
    /// Whether values are stored in the filesystem instead of the database.
    #[serde(default)]
    pub filesystem: bool,
}

impl AttributeType {
    /// Create a plain attribute type with everything else defaulted.
    #[must_use]
    pub fn new(owner_type_id: i64, name: impl Into<String>, kind: AttributeKind) -> Self {
        Self {
            owner_type_id,
            name: name.into(),
            kind,
            multivalue: false,
            optimized: false,
            quick_column: None,
            linked_type_id: None,
            foreign_link_attribute: None,
            foreign_link_rule: None,
            exclude_versioning: false,
            filesystem: false,
        }
    }

    /// Mark the attribute as multivalue.
    #[must_use]
    pub fn multivalue(mut self) -> Self {
        self.multivalue = true;
        self
    }

    /// Mark the attribute as optimized into the given quick column.
    #[must_use]
    pub fn optimized(mut self, quick_column: impl Into<String>) -> Self {
        self.optimized = true;
        self.quick_column = Some(quick_column.into());
        self
    }

    /// Set the linked object type for a link attribute.
    #[must_use]
    pub fn linked_to(mut self, type_id: i64) -> Self {
        self.linked_type_id = Some(type_id);
        self
    }

    /// A foreign link is the reverse side of a link attribute and is always
    /// multivalue, whatever the flag says.
    #[must_use]
    pub fn is_multivalue(&self) -> bool {
        self.multivalue || self.foreign_link_attribute.is_some()
    }

    /// Validate the internal invariants of this attribute type.
    ///
    /// `optimized` and `filesystem` are mutually exclusive, and a foreign
    /// link attribute name is only meaningful on `ForeignLink` kinds.
    pub fn validate(&self) -> Result<(), String> {
        if self.optimized && self.filesystem {
            return Err(format!(
                "attribute '{}' cannot be both optimized and filesystem-backed",
                self.name
            ));
        }
        if self.optimized && self.quick_column.is_none() {
            return Err(format!(
                "optimized attribute '{}' is missing its quick column name",
                self.name
            ));
        }
        if self.foreign_link_attribute.is_some() && self.kind != AttributeKind::ForeignLink {
            return Err(format!(
                "attribute '{}' carries a foreign link attribute but is of kind {}",
                self.name, self.kind
            ));
        }
        Ok(())
    }
}

/// Policy governing attribute-type equality when two repositories are diffed.
///
/// Passed once into the schema differ and the LOB synchronizer instead of
/// threading individual booleans through every call site.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaComparisonPolicy {
    /// When set, differences in the `optimized` flag and quick column name
    /// are not treated as schema changes; the LOB synchronizer instead
    /// recomputes target quick columns after writing detail rows.
    #[serde(default)]
    pub ignore_optimized: bool,
}

impl SchemaComparisonPolicy {
    /// Policy that compares every field.
    #[must_use]
    pub fn strict() -> Self {
        Self {
            ignore_optimized: false,
        }
    }

    /// Policy that ignores optimized-flag differences.
    #[must_use]
    pub fn ignoring_optimized() -> Self {
        Self {
            ignore_optimized: true,
        }
    }

    /// Compare two attribute types under this policy.
    #[must_use]
    pub fn attributes_equal(&self, a: &AttributeType, b: &AttributeType) -> bool {
        if self.ignore_optimized {
            let mut a = a.clone();
            let mut b = b.clone();
            a.optimized = false;
            a.quick_column = None;
            b.optimized = false;
            b.quick_column = None;
            a == b
        } else {
            a == b
        }
    }
}
