//! Run configuration.

use serde::{Deserialize, Serialize};

use reposync_model::channel::Channel;
use reposync_model::filter::Filter;
use reposync_model::id::ContentId;
use reposync_model::schema::SchemaComparisonPolicy;

use crate::error::{SyncError, SyncResult};

/// A compiled user filter rule.
///
/// The rule parser (an external collaborator) turns the operator's rule
/// string into a structural [`Filter`]; the engine keeps the original text
/// only to compare it against the rule persisted with the watermark.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterRule {
    /// The rule exactly as the operator wrote it.
    pub text: String,
    /// The compiled filter.
    pub filter: Filter,
}

impl FilterRule {
    /// Create a rule from its text and compiled form.
    #[must_use]
    pub fn new(text: impl Into<String>, filter: Filter) -> Self {
        Self {
            text: text.into(),
            filter,
        }
    }
}

/// Configuration for one synchronization run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Optional user rule restricting which records sync.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule: Option<FilterRule>,
    /// Execute every read pass but write nothing, for previewing counters.
    #[serde(default)]
    pub dry_run: bool,
    /// Accept a source with no object types or no attribute types.
    #[serde(default)]
    pub allow_empty_source: bool,
    /// Permit schema changes that alter or drop physical structure.
    #[serde(default)]
    pub allow_structural_change: bool,
    /// Delete target records missing from the source even when a rule is
    /// configured.
    #[serde(default)]
    pub delete_missing: bool,
    /// Run the source side inside a transaction.
    #[serde(default)]
    pub source_transaction: bool,
    /// Run the target side inside a transaction.
    #[serde(default = "default_true")]
    pub target_transaction: bool,
    /// Records fetched and upserted per page. Together with
    /// `obsoletion_batch_size` this is the main memory knob; lower it when
    /// a run exhausts memory on wide records.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Candidate records checked per obsoletion page.
    #[serde(default = "default_obsoletion_batch_size")]
    pub obsoletion_batch_size: usize,
    /// Attribute equality policy for schema diffing.
    #[serde(default)]
    pub comparison: SchemaComparisonPolicy,
    /// Records to resync regardless of their timestamps.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub force_resync_ids: Vec<ContentId>,
    /// Channel tree to synchronize; absent for single-channel repositories.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels: Option<Channel>,
}

fn default_true() -> bool {
    true
}

fn default_batch_size() -> usize {
    100
}

fn default_obsoletion_batch_size() -> usize {
    1000
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            rule: None,
            dry_run: false,
            allow_empty_source: false,
            allow_structural_change: false,
            delete_missing: false,
            source_transaction: false,
            target_transaction: default_true(),
            batch_size: default_batch_size(),
            obsoletion_batch_size: default_obsoletion_batch_size(),
            comparison: SchemaComparisonPolicy::default(),
            force_resync_ids: Vec::new(),
            channels: None,
        }
    }
}

impl SyncConfig {
    /// Validate the configuration before anything opens.
    pub fn validate(&self) -> SyncResult<()> {
        if self.batch_size == 0 {
            return Err(SyncError::configuration("batch_size must be at least 1"));
        }
        if self.obsoletion_batch_size == 0 {
            return Err(SyncError::configuration(
                "obsoletion_batch_size must be at least 1",
            ));
        }
        if let Some(ref rule) = self.rule {
            if rule.text.trim().is_empty() {
                return Err(SyncError::configuration(
                    "filter rule text must not be blank; omit the rule instead",
                ));
            }
        }
        Ok(())
    }

    /// The rule text for watermark comparison.
    #[must_use]
    pub fn rule_text(&self) -> Option<&str> {
        self.rule.as_ref().map(|r| r.text.as_str())
    }

    /// Whether obsolete target records get deleted this run.
    ///
    /// Deletion runs by default; configuring a rule narrows the run's view
    /// of the repository, so deletion then requires the explicit flag.
    #[must_use]
    pub fn obsoletion_enabled(&self) -> bool {
        self.delete_missing || self.rule.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.obsoletion_batch_size, 1000);
        assert!(config.target_transaction);
        assert!(!config.source_transaction);
        assert!(!config.dry_run);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let config = SyncConfig {
            batch_size: 0,
            ..SyncConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_blank_rule_rejected() {
        let config = SyncConfig {
            rule: Some(FilterRule::new("  ", Filter::TypeIs(1))),
            ..SyncConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_obsoletion_gating() {
        let mut config = SyncConfig::default();
        assert!(config.obsoletion_enabled());

        config.rule = Some(FilterRule::new("object.folder == 7", Filter::TypeIs(1)));
        assert!(!config.obsoletion_enabled());

        config.delete_missing = true;
        assert!(config.obsoletion_enabled());
    }
}
