//! Schema diffing between two repositories.

use serde::{Deserialize, Serialize};

use reposync_model::schema::{AttributeType, ObjectType, SchemaComparisonPolicy};

/// One object type with its attribute types attached, as read from a
/// repository catalog at the start of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeSchema {
    /// The object type.
    pub object_type: ObjectType,
    /// Its attribute types.
    pub attributes: Vec<AttributeType>,
}

impl TypeSchema {
    /// Create a type schema.
    #[must_use]
    pub fn new(object_type: ObjectType, attributes: Vec<AttributeType>) -> Self {
        Self {
            object_type,
            attributes,
        }
    }

    fn attribute(&self, name: &str) -> Option<&AttributeType> {
        self.attributes.iter().find(|a| a.name == name)
    }
}

/// A changed attribute type: what the target currently has and what the
/// source says it should be.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeModification {
    /// Definition currently in the target.
    pub current: AttributeType,
    /// Definition in the source.
    pub desired: AttributeType,
}

impl AttributeModification {
    /// Whether applying this modification changes physical structure.
    ///
    /// Kind, cardinality, storage placement, and quick columns are
    /// physical; versioning flags and foreign-link metadata are not.
    #[must_use]
    pub fn is_structural(&self) -> bool {
        self.current.kind != self.desired.kind
            || self.current.multivalue != self.desired.multivalue
            || self.current.optimized != self.desired.optimized
            || self.current.quick_column != self.desired.quick_column
            || self.current.filesystem != self.desired.filesystem
            || self.current.linked_type_id != self.desired.linked_type_id
    }
}

/// Attribute-level changes of one object type present on both sides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeChange {
    /// The object type both sides share.
    pub type_id: i64,
    /// Attributes the target is missing.
    pub added: Vec<AttributeType>,
    /// Attributes only the target has.
    pub removed: Vec<AttributeType>,
    /// Attributes whose definitions differ.
    pub modified: Vec<AttributeModification>,
}

impl TypeChange {
    /// Whether this change carries anything at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty()
    }
}

/// The full difference between two repository schemas.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaDiff {
    /// Types the target is missing, with their attributes.
    pub added_types: Vec<TypeSchema>,
    /// Types only the target has.
    pub removed_types: Vec<ObjectType>,
    /// Types on both sides whose attributes differ.
    pub modified_types: Vec<TypeChange>,
}

impl SchemaDiff {
    /// Whether the schemas already agree.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added_types.is_empty()
            && self.removed_types.is_empty()
            && self.modified_types.is_empty()
    }

    /// Whether applying this diff requires altering or dropping physical
    /// structure. Creating new types and adding attributes does not.
    #[must_use]
    pub fn requires_structural_change(&self) -> bool {
        !self.removed_types.is_empty()
            || self.modified_types.iter().any(|tc| {
                !tc.removed.is_empty() || tc.modified.iter().any(AttributeModification::is_structural)
            })
    }
}

/// Computes the set of added, removed, and modified object types and, per
/// type, attribute types between two catalogs.
pub struct SchemaDiffer {
    policy: SchemaComparisonPolicy,
}

impl SchemaDiffer {
    /// Create a differ under the given comparison policy.
    #[must_use]
    pub fn new(policy: SchemaComparisonPolicy) -> Self {
        Self { policy }
    }

    /// Diff `source` against `target`. Object type membership is by type
    /// id; attribute membership is by name within a type; attribute
    /// equality follows the comparison policy.
    #[must_use]
    pub fn diff(&self, source: &[TypeSchema], target: &[TypeSchema]) -> SchemaDiff {
        let mut diff = SchemaDiff::default();

        for src in source {
            match target
                .iter()
                .find(|t| t.object_type.type_id == src.object_type.type_id)
            {
                None => diff.added_types.push(src.clone()),
                Some(tgt) => {
                    let change = self.diff_type(src, tgt);
                    if !change.is_empty() {
                        diff.modified_types.push(change);
                    }
                }
            }
        }

        for tgt in target {
            if !source
                .iter()
                .any(|s| s.object_type.type_id == tgt.object_type.type_id)
            {
                diff.removed_types.push(tgt.object_type.clone());
            }
        }

        diff
    }

    fn diff_type(&self, src: &TypeSchema, tgt: &TypeSchema) -> TypeChange {
        let mut change = TypeChange {
            type_id: src.object_type.type_id,
            added: Vec::new(),
            removed: Vec::new(),
            modified: Vec::new(),
        };

        for attr in &src.attributes {
            match tgt.attribute(&attr.name) {
                None => change.added.push(attr.clone()),
                Some(existing) => {
                    if !self.policy.attributes_equal(attr, existing) {
                        change.modified.push(AttributeModification {
                            current: existing.clone(),
                            desired: attr.clone(),
                        });
                    }
                }
            }
        }

        for attr in &tgt.attributes {
            if src.attribute(&attr.name).is_none() {
                change.removed.push(attr.clone());
            }
        }

        change
    }
}
