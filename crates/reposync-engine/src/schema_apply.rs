//! Applying a schema diff to the target repository.

use tracing::{info, warn};

use reposync_repo::traits::ContentRepository;

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::schema_diff::SchemaDiff;
use crate::summary::SyncCounters;

/// Applies a [`SchemaDiff`] to the target.
///
/// New object types and new attribute types are always created. Anything
/// that alters or drops physical structure requires
/// `allow_structural_change`; without it the run fails before any data
/// moves, leaving the target schema untouched.
pub struct SchemaApplier<'a> {
    target: &'a dyn ContentRepository,
    allow_structural_change: bool,
    dry_run: bool,
}

impl<'a> SchemaApplier<'a> {
    /// Create an applier for the target under the run configuration.
    #[must_use]
    pub fn new(target: &'a dyn ContentRepository, config: &SyncConfig) -> Self {
        Self {
            target,
            allow_structural_change: config.allow_structural_change,
            dry_run: config.dry_run,
        }
    }

    /// Apply the diff, accumulating schema counters.
    pub async fn apply(&self, diff: &SchemaDiff, counters: &mut SyncCounters) -> SyncResult<()> {
        if diff.is_empty() {
            return Ok(());
        }

        if diff.requires_structural_change() && !self.allow_structural_change {
            return Err(SyncError::StructuralChangeRequired {
                detail: describe_structural_change(diff),
            });
        }

        for added in &diff.added_types {
            info!(
                type_id = added.object_type.type_id,
                name = %added.object_type.name,
                attributes = added.attributes.len(),
                "Creating object type"
            );
            if !self.dry_run {
                self.target.create_object_type(&added.object_type).await?;
                for attr in &added.attributes {
                    self.target.add_attribute_type(attr).await?;
                }
            }
            counters.types_added += 1;
            counters.attributes_added += added.attributes.len() as u64;
        }

        for change in &diff.modified_types {
            for attr in &change.added {
                info!(type_id = change.type_id, attribute = %attr.name, "Adding attribute type");
                if !self.dry_run {
                    self.target.add_attribute_type(attr).await?;
                }
                counters.attributes_added += 1;
            }
            for modification in &change.modified {
                info!(
                    type_id = change.type_id,
                    attribute = %modification.desired.name,
                    structural = modification.is_structural(),
                    "Altering attribute type"
                );
                if !self.dry_run {
                    self.target
                        .alter_attribute_type(&modification.desired)
                        .await?;
                }
                counters.attributes_modified += 1;
            }
            for attr in &change.removed {
                warn!(type_id = change.type_id, attribute = %attr.name, "Dropping attribute type");
                if !self.dry_run {
                    self.target
                        .drop_attribute_type(attr.owner_type_id, &attr.name)
                        .await?;
                }
                counters.attributes_removed += 1;
            }
            counters.types_modified += 1;
        }

        for removed in &diff.removed_types {
            warn!(type_id = removed.type_id, name = %removed.name, "Dropping object type");
            if !self.dry_run {
                self.target.drop_object_type(removed.type_id).await?;
            }
            counters.types_removed += 1;
        }

        Ok(())
    }
}

fn describe_structural_change(diff: &SchemaDiff) -> String {
    let mut parts = Vec::new();
    for removed in &diff.removed_types {
        parts.push(format!("drop object type {}", removed.type_id));
    }
    for change in &diff.modified_types {
        for attr in &change.removed {
            parts.push(format!(
                "drop attribute {}.{}",
                change.type_id, attr.name
            ));
        }
        for modification in change.modified.iter().filter(|m| m.is_structural()) {
            parts.push(format!(
                "alter attribute {}.{}",
                change.type_id, modification.desired.name
            ));
        }
    }
    parts.join(", ")
}
