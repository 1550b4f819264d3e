//! The synchronization engine.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use reposync_model::schema::AttributeType;
use reposync_repo::traits::{ContentRepository, Watermark};

use crate::channel::{ChannelScope, ChannelWalker};
use crate::config::SyncConfig;
use crate::data_sync::DataSynchronizer;
use crate::error::{SyncError, SyncResult};
use crate::lob::{log_plan, LobPlan};
use crate::obsoletion::ObsoletionDetector;
use crate::registry::Registry;
use crate::schema_apply::SchemaApplier;
use crate::schema_diff::{SchemaDiffer, TypeSchema};
use crate::summary::{SyncCounters, SyncSummary};
use crate::transform::RecordTransform;

/// Orchestrates one source-to-target synchronization run.
///
/// A run either commits the target's entire change set or rolls all of it
/// back; there is no partial commit. Runs are idempotent and resumable
/// through the persisted watermark.
pub struct SyncEngine<'a> {
    registry: &'a Registry,
    config: SyncConfig,
}

impl<'a> SyncEngine<'a> {
    /// Create an engine over the registry's repositories.
    #[must_use]
    pub fn new(registry: &'a Registry, config: SyncConfig) -> Self {
        Self { registry, config }
    }

    /// Execute the run.
    pub async fn run(&self) -> SyncResult<SyncSummary> {
        self.config.validate()?;

        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let clock = Instant::now();

        info!(
            %run_id,
            source = %self.registry.source.display_name(),
            target = %self.registry.target.display_name(),
            dry_run = self.config.dry_run,
            "Synchronization run started"
        );

        // Pre-flight: an empty source with no override means a
        // misconfigured connection, not an instruction to empty the target.
        let source_types = load_schema(self.registry.source.as_ref()).await?;
        self.guard_empty_source(&source_types)?;

        if self.config.source_transaction {
            self.registry.source.begin().await?;
        }
        if self.config.target_transaction {
            self.registry.target.begin().await?;
        }

        match self.run_inner(&source_types).await {
            Ok(counters) => {
                if self.config.target_transaction {
                    if let Err(e) = self.registry.target.commit().await {
                        let _ = self.registry.source.rollback().await;
                        return Err(e.into());
                    }
                }
                if self.config.source_transaction {
                    self.registry.source.commit().await?;
                }

                let completed_at = Utc::now();
                let summary = SyncSummary {
                    run_id,
                    dry_run: self.config.dry_run,
                    counters,
                    duration_ms: clock.elapsed().as_millis() as u64,
                    started_at,
                    completed_at,
                };
                info!(
                    %run_id,
                    upserted = counters.upserted,
                    deleted = counters.deleted,
                    duration_ms = summary.duration_ms,
                    "Synchronization run finished"
                );
                Ok(summary)
            }
            Err(e) => {
                // Roll back whatever was opened and propagate the original
                // error unmodified.
                if let Err(rollback_err) = self.registry.target.rollback().await {
                    warn!(error = %rollback_err, "Target rollback failed");
                }
                if let Err(rollback_err) = self.registry.source.rollback().await {
                    warn!(error = %rollback_err, "Source rollback failed");
                }
                Err(e)
            }
        }
    }

    fn guard_empty_source(&self, source_types: &[TypeSchema]) -> SyncResult<()> {
        if self.config.allow_empty_source {
            return Ok(());
        }
        if source_types.is_empty() {
            return Err(SyncError::EmptySource {
                message: "no object types defined; pass allow_empty_source to proceed".to_string(),
            });
        }
        if source_types.iter().all(|t| t.attributes.is_empty()) {
            return Err(SyncError::EmptySource {
                message: "no attribute types defined; pass allow_empty_source to proceed"
                    .to_string(),
            });
        }
        Ok(())
    }

    async fn run_inner(&self, source_types: &[TypeSchema]) -> SyncResult<SyncCounters> {
        let source = self.registry.source.as_ref();
        let target = self.registry.target.as_ref();
        let mut counters = SyncCounters::default();
        let rule_text = self.config.rule_text().map(str::to_string);

        // Watermark and rule comparison decide incremental versus full.
        let stored = target.get_watermark(None).await?;
        let watermark_ts = match &stored {
            Some(watermark) => {
                let effective = watermark.effective_timestamp(rule_text.as_deref());
                if effective == 0 && watermark.timestamp != 0 {
                    info!(
                        stored_rule = watermark.rule.as_deref().unwrap_or(""),
                        current_rule = rule_text.as_deref().unwrap_or(""),
                        "Filter rule changed since last sync, forcing full resync"
                    );
                }
                effective
            }
            None => 0,
        };
        let new_watermark = source.last_modified().await?;

        // Schema first; data never moves across a stale schema.
        let target_types = load_schema(target).await?;
        let differ = SchemaDiffer::new(self.config.comparison);
        let diff = differ.diff(source_types, &target_types);
        let schema_changed = !diff.is_empty();
        SchemaApplier::new(target, &self.config)
            .apply(&diff, &mut counters)
            .await?;

        // Fast path: the source says nothing changed since the watermark.
        if new_watermark != 0 && new_watermark == watermark_ts {
            info!(
                watermark = watermark_ts,
                "Source unchanged since last run, skipping data synchronization"
            );
            return Ok(counters);
        }

        // The applier just rewrote parts of the target catalog; the LOB
        // plans must see the post-change definitions.
        let target_types = if schema_changed && !self.config.dry_run {
            load_schema(target).await?
        } else {
            target_types
        };
        let target_attrs: HashMap<i64, &[AttributeType]> = target_types
            .iter()
            .map(|t| (t.object_type.type_id, t.attributes.as_slice()))
            .collect();

        let mut lob_plans = HashMap::new();
        for schema in source_types {
            let type_id = schema.object_type.type_id;
            let empty: &[AttributeType] = &[];
            let plan = LobPlan::for_type(
                type_id,
                &schema.attributes,
                target_attrs.get(&type_id).copied().unwrap_or(empty),
                &self.config.comparison,
            );
            if let Some(plan) = plan {
                log_plan(&plan);
                lob_plans.insert(type_id, plan);
            }
        }

        let mut runner = ScopeRunner {
            source,
            target,
            transform: self.registry.transform.clone(),
            config: &self.config,
            source_types,
            lob_plans,
            counters,
        };

        match self.config.channels {
            Some(ref tree) => {
                ChannelWalker::new(
                    source,
                    target,
                    rule_text.clone(),
                    new_watermark,
                    self.config.dry_run,
                )
                .walk(tree, &mut runner)
                .await?;
            }
            None => {
                runner.sync_scope(None, watermark_ts).await?;
            }
        }
        let counters = runner.counters;

        if !self.config.dry_run {
            target.repair_id_counters().await?;
            target
                .set_watermark(None, &Watermark::new(new_watermark, rule_text))
                .await?;
        }

        Ok(counters)
    }
}

async fn load_schema(repo: &dyn ContentRepository) -> SyncResult<Vec<TypeSchema>> {
    let object_types = repo.load_object_types().await?;
    let mut schemas = Vec::with_capacity(object_types.len());
    for object_type in object_types {
        let attributes = repo.load_attribute_types(object_type.type_id).await?;
        schemas.push(TypeSchema::new(object_type, attributes));
    }
    Ok(schemas)
}

/// Everything needed to synchronize one scope (the whole repository, or a
/// single channel).
struct ScopeRunner<'a> {
    source: &'a dyn ContentRepository,
    target: &'a dyn ContentRepository,
    transform: Option<Arc<dyn RecordTransform>>,
    config: &'a SyncConfig,
    source_types: &'a [TypeSchema],
    lob_plans: HashMap<i64, LobPlan>,
    counters: SyncCounters,
}

impl ScopeRunner<'_> {
    async fn sync_scope(&mut self, channel: Option<i64>, watermark_ts: i64) -> SyncResult<()> {
        let data = DataSynchronizer::new(
            self.source,
            self.target,
            self.transform.clone(),
            self.config,
        );
        for schema in self.source_types {
            let plan = self.lob_plans.get(&schema.object_type.type_id).cloned();
            data.sync_type(
                schema,
                plan.as_ref(),
                watermark_ts,
                channel,
                &mut self.counters,
            )
            .await?;
        }

        if self.config.obsoletion_enabled() {
            let detector = ObsoletionDetector::new(self.source, self.target, self.config);
            for schema in self.source_types {
                detector
                    .sync_type(
                        schema.object_type.type_id,
                        watermark_ts,
                        channel,
                        &mut self.counters,
                    )
                    .await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ChannelScope for ScopeRunner<'_> {
    async fn sync_channel(&mut self, channel_id: i64, watermark_ts: i64) -> SyncResult<()> {
        self.sync_scope(Some(channel_id), watermark_ts).await
    }
}
