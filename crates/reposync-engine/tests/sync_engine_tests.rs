//! End-to-end engine tests over the in-memory repository.

mod common;

use std::sync::Arc;

use async_trait::async_trait;
use common::MemoryRepository;

use reposync_engine::config::{FilterRule, SyncConfig};
use reposync_engine::engine::SyncEngine;
use reposync_engine::error::{SyncError, SyncResult};
use reposync_engine::registry::Registry;
use reposync_engine::summary::SyncSummary;
use reposync_engine::transform::{RecordTransform, TransformError};
use reposync_model::channel::Channel;
use reposync_model::filter::Filter;
use reposync_model::id::ContentId;
use reposync_model::record::{AttrValue, Record};
use reposync_model::schema::{AttributeKind, AttributeType, ObjectType};

const FOLDER: i64 = 10002;
const PAGE: i64 = 10007;

fn folder_attrs() -> Vec<AttributeType> {
    vec![AttributeType::new(FOLDER, "name", AttributeKind::Text)]
}

fn page_attrs() -> Vec<AttributeType> {
    vec![
        AttributeType::new(PAGE, "name", AttributeKind::Text),
        AttributeType::new(PAGE, "folder", AttributeKind::LinkObject).linked_to(FOLDER),
        AttributeType::new(PAGE, "content", AttributeKind::LongText),
    ]
}

async fn seeded_source() -> Arc<MemoryRepository> {
    let source = MemoryRepository::new("source");
    source
        .add_type(ObjectType::new(FOLDER, "folder"), folder_attrs())
        .await;
    source
        .add_type(ObjectType::new(PAGE, "page"), page_attrs())
        .await;

    source
        .put_record(Record::new(ContentId::new(FOLDER, 1), 100).with("name", "root"))
        .await;
    let mut page = Record::new(ContentId::new(PAGE, 1), 200).with("name", "index");
    page.set("folder", AttrValue::Long(1));
    source.put_record(page).await;
    source
        .put_lob(
            &ContentId::new(PAGE, 1),
            "content",
            0,
            AttrValue::Text("<html>hello</html>".to_string()),
        )
        .await;
    source
}

async fn run_engine(
    source: &Arc<MemoryRepository>,
    target: &Arc<MemoryRepository>,
    config: SyncConfig,
) -> SyncResult<SyncSummary> {
    let registry = Registry::new(source.clone(), target.clone());
    SyncEngine::new(&registry, config).run().await
}

#[tokio::test]
async fn test_initial_sync_converges() {
    let source = seeded_source().await;
    let target = MemoryRepository::new("target");

    let summary = run_engine(&source, &target, SyncConfig::default())
        .await
        .unwrap();

    assert_eq!(summary.upserted(), 2);
    assert_eq!(summary.deleted(), 0);
    assert_eq!(summary.counters.types_added, 2);
    assert_eq!(summary.counters.attributes_added, 4);

    // Records arrived with their source timestamps.
    let page = target.record(&ContentId::new(PAGE, 1)).await.unwrap();
    assert_eq!(page.update_timestamp, 200);
    assert_eq!(page.first("name").unwrap().as_text(), Some("index"));

    // The link attribute was rewritten to a portable content id.
    assert_eq!(
        page.first("folder"),
        Some(&AttrValue::Link(ContentId::new(FOLDER, 1)))
    );

    // The large value came through the LOB pass.
    assert_eq!(
        target
            .lob_value(&ContentId::new(PAGE, 1), "content", 0)
            .await,
        Some(AttrValue::Text("<html>hello</html>".to_string()))
    );

    // The watermark is the source's last-modification timestamp.
    let watermark = target.watermark(None).await.unwrap();
    assert_eq!(watermark.timestamp, 200);
    assert_eq!(watermark.rule, None);
}

#[tokio::test]
async fn test_second_run_is_noop() {
    let source = seeded_source().await;
    let target = MemoryRepository::new("target");

    run_engine(&source, &target, SyncConfig::default())
        .await
        .unwrap();
    let second = run_engine(&source, &target, SyncConfig::default())
        .await
        .unwrap();

    assert!(second.counters.is_noop());
}

#[tokio::test]
async fn test_modified_record_syncs_incrementally() {
    let source = seeded_source().await;
    let target = MemoryRepository::new("target");
    run_engine(&source, &target, SyncConfig::default())
        .await
        .unwrap();

    source
        .put_record(Record::new(ContentId::new(PAGE, 1), 300).with("name", "index-v2"))
        .await;

    let summary = run_engine(&source, &target, SyncConfig::default())
        .await
        .unwrap();
    // Only the modified record crossed, not the whole repository.
    assert_eq!(summary.upserted(), 1);
    let page = target.record(&ContentId::new(PAGE, 1)).await.unwrap();
    assert_eq!(page.first("name").unwrap().as_text(), Some("index-v2"));
    assert_eq!(target.watermark(None).await.unwrap().timestamp, 300);
}

#[tokio::test]
async fn test_obsoletion_deletes_when_no_rule() {
    let source = seeded_source().await;
    let target = MemoryRepository::new("target");
    run_engine(&source, &target, SyncConfig::default())
        .await
        .unwrap();

    source.remove_record(&ContentId::new(PAGE, 1), 300).await;

    let summary = run_engine(&source, &target, SyncConfig::default())
        .await
        .unwrap();
    assert_eq!(summary.deleted(), 1);
    assert!(target.record(&ContentId::new(PAGE, 1)).await.is_none());
    // The LOB rows went with the record.
    assert_eq!(
        target
            .lob_value(&ContentId::new(PAGE, 1), "content", 0)
            .await,
        None
    );
}

fn name_rule(text: &str) -> FilterRule {
    FilterRule::new(
        text,
        Filter::AttributeEquals {
            attribute: "name".to_string(),
            value: "index".to_string(),
        },
    )
}

#[tokio::test]
async fn test_obsoletion_respects_rule_without_delete_flag() {
    let source = seeded_source().await;
    let target = MemoryRepository::new("target");
    let config = SyncConfig {
        rule: Some(name_rule("object.name == \"index\"")),
        ..SyncConfig::default()
    };
    run_engine(&source, &target, config.clone()).await.unwrap();
    assert!(target.record(&ContentId::new(PAGE, 1)).await.is_some());

    source.remove_record(&ContentId::new(PAGE, 1), 300).await;

    // A rule without the delete flag leaves the stale record in place.
    let summary = run_engine(&source, &target, config.clone()).await.unwrap();
    assert_eq!(summary.deleted(), 0);
    assert!(target.record(&ContentId::new(PAGE, 1)).await.is_some());

    // The delete flag turns obsoletion back on.
    source.set_last_modified(400).await;
    let config = SyncConfig {
        delete_missing: true,
        ..config
    };
    let summary = run_engine(&source, &target, config).await.unwrap();
    assert_eq!(summary.deleted(), 1);
    assert!(target.record(&ContentId::new(PAGE, 1)).await.is_none());
}

#[tokio::test]
async fn test_rule_change_forces_full_resync() {
    let source = seeded_source().await;
    let target = MemoryRepository::new("target");
    let config = SyncConfig {
        rule: Some(name_rule("object.name == \"index\"")),
        ..SyncConfig::default()
    };
    let first = run_engine(&source, &target, config.clone()).await.unwrap();
    assert_eq!(first.upserted(), 1);

    // Same rule, unchanged source: the fast path skips everything.
    let unchanged = run_engine(&source, &target, config).await.unwrap();
    assert!(unchanged.counters.is_noop());

    // Same compiled filter, different rule text: the watermark is treated
    // as zero and every matching record is re-evaluated.
    let config = SyncConfig {
        rule: Some(name_rule("object.name=='index'")),
        ..SyncConfig::default()
    };
    let resynced = run_engine(&source, &target, config).await.unwrap();
    assert_eq!(resynced.upserted(), 1);
}

#[tokio::test]
async fn test_schema_change_gated_without_flag() {
    let source = seeded_source().await;
    let target = MemoryRepository::new("target");
    target
        .add_type(ObjectType::new(FOLDER, "folder"), folder_attrs())
        .await;
    // Target disagrees on the kind of "content".
    let mut attrs = page_attrs();
    if let Some(a) = attrs.iter_mut().find(|a| a.name == "content") {
        a.kind = AttributeKind::Text;
    }
    target.add_type(ObjectType::new(PAGE, "page"), attrs).await;

    let err = run_engine(&source, &target, SyncConfig::default())
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::StructuralChangeRequired { .. }));
    assert_eq!(err.exit_code(), 4);

    // The target schema is untouched and no data moved.
    let attrs = target.attribute_types(PAGE).await;
    let content = attrs.iter().find(|a| a.name == "content").unwrap();
    assert_eq!(content.kind, AttributeKind::Text);
    assert_eq!(target.record_count().await, 0);

    // With the flag the same run goes through.
    let config = SyncConfig {
        allow_structural_change: true,
        ..SyncConfig::default()
    };
    let summary = run_engine(&source, &target, config).await.unwrap();
    assert_eq!(summary.counters.attributes_modified, 1);
    let attrs = target.attribute_types(PAGE).await;
    let content = attrs.iter().find(|a| a.name == "content").unwrap();
    assert_eq!(content.kind, AttributeKind::LongText);
    assert_eq!(target.record_count().await, 2);
}

#[tokio::test]
async fn test_dry_run_writes_nothing() {
    let source = seeded_source().await;
    let target = MemoryRepository::new("target");
    let config = SyncConfig {
        dry_run: true,
        ..SyncConfig::default()
    };

    let summary = run_engine(&source, &target, config).await.unwrap();

    // Counters report what would happen; nothing is persisted.
    assert_eq!(summary.upserted(), 2);
    assert_eq!(summary.counters.types_added, 2);
    assert_eq!(target.record_count().await, 0);
    assert_eq!(target.object_type_count().await, 0);
    assert!(target.watermark(None).await.is_none());
}

#[tokio::test]
async fn test_force_resync_includes_unchanged_records() {
    let source = seeded_source().await;
    let target = MemoryRepository::new("target");
    run_engine(&source, &target, SyncConfig::default())
        .await
        .unwrap();

    // One genuinely new record, plus a forced resync of an old one.
    source
        .put_record(Record::new(ContentId::new(PAGE, 2), 400).with("name", "news"))
        .await;
    let config = SyncConfig {
        force_resync_ids: vec![ContentId::new(PAGE, 1)],
        ..SyncConfig::default()
    };

    let summary = run_engine(&source, &target, config).await.unwrap();
    assert_eq!(summary.upserted(), 2);
}

#[tokio::test]
async fn test_empty_source_guard() {
    let source = MemoryRepository::new("source");
    let target = MemoryRepository::new("target");

    let err = run_engine(&source, &target, SyncConfig::default())
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::EmptySource { .. }));
    assert_eq!(err.exit_code(), 3);

    let config = SyncConfig {
        allow_empty_source: true,
        ..SyncConfig::default()
    };
    let summary = run_engine(&source, &target, config).await.unwrap();
    assert!(summary.counters.is_noop());
}

struct RenameTransform;

#[async_trait]
impl RecordTransform for RenameTransform {
    async fn transform(&self, record: &mut Record) -> Result<(), TransformError> {
        record.rewrite_values("name", |v| match v {
            AttrValue::Text(s) => AttrValue::Text(format!("copy-{s}")),
            other => other,
        });
        Ok(())
    }
}

#[tokio::test]
async fn test_record_transform_applied_before_store() {
    let source = seeded_source().await;
    let target = MemoryRepository::new("target");
    let registry =
        Registry::new(source.clone(), target.clone()).with_transform(Arc::new(RenameTransform));

    SyncEngine::new(&registry, SyncConfig::default())
        .run()
        .await
        .unwrap();

    let page = target.record(&ContentId::new(PAGE, 1)).await.unwrap();
    assert_eq!(page.first("name").unwrap().as_text(), Some("copy-index"));
}

struct FailingTransform;

#[async_trait]
impl RecordTransform for FailingTransform {
    async fn transform(&self, record: &mut Record) -> Result<(), TransformError> {
        if record.id.type_id() == PAGE {
            return Err(TransformError::new("rejected"));
        }
        Ok(())
    }
}

#[tokio::test]
async fn test_failed_run_rolls_back_target() {
    let source = seeded_source().await;
    let target = MemoryRepository::new("target");
    let registry =
        Registry::new(source.clone(), target.clone()).with_transform(Arc::new(FailingTransform));
    // One record per batch so the folder batch is already written when the
    // page batch fails.
    let config = SyncConfig {
        batch_size: 1,
        ..SyncConfig::default()
    };

    let err = SyncEngine::new(&registry, config).run().await.unwrap_err();
    assert!(matches!(err, SyncError::Transform { .. }));

    // Nothing stuck: the folder upsert and the schema changes rolled back
    // with the transaction, and no watermark was written.
    assert_eq!(target.record_count().await, 0);
    assert_eq!(target.object_type_count().await, 0);
    assert!(target.watermark(None).await.is_none());
}

#[tokio::test]
async fn test_channel_tree_syncs_per_channel() {
    let source = MemoryRepository::new("source");
    source
        .add_type(ObjectType::new(PAGE, "page"), page_attrs())
        .await;
    let mut master_page = Record::new(ContentId::new(PAGE, 1), 100).with("name", "master-home");
    master_page.channel_id = Some(1);
    source.put_record(master_page).await;
    let mut child_page = Record::new(ContentId::new(PAGE, 2), 150).with("name", "child-home");
    child_page.channel_id = Some(2);
    source.put_record(child_page).await;

    let target = MemoryRepository::new("target");
    let config = SyncConfig {
        channels: Some(Channel::new(1, "master").with_child(Channel::new(2, "branch"))),
        ..SyncConfig::default()
    };

    let summary = run_engine(&source, &target, config).await.unwrap();
    assert_eq!(summary.upserted(), 2);

    let master = target.record(&ContentId::new(PAGE, 1)).await.unwrap();
    assert_eq!(master.channel_id, Some(1));
    let child = target.record(&ContentId::new(PAGE, 2)).await.unwrap();
    assert_eq!(child.channel_id, Some(2));

    // Every channel tracked its own watermark.
    assert_eq!(target.watermark(Some(1)).await.unwrap().timestamp, 150);
    assert_eq!(target.watermark(Some(2)).await.unwrap().timestamp, 150);
}

#[tokio::test]
async fn test_obsoletion_pages_through_deletions() {
    let source = MemoryRepository::new("source");
    source
        .add_type(ObjectType::new(PAGE, "page"), page_attrs())
        .await;
    let target = MemoryRepository::new("target");
    for i in 0..10 {
        source
            .put_record(Record::new(ContentId::new(PAGE, i), 100 + i).with("name", "p"))
            .await;
    }
    run_engine(&source, &target, SyncConfig::default())
        .await
        .unwrap();

    // Drop every other record from the source, then page obsoletion with a
    // batch smaller than the candidate set.
    for i in [1, 3, 5, 7, 9] {
        source.remove_record(&ContentId::new(PAGE, i), 500).await;
    }
    let config = SyncConfig {
        obsoletion_batch_size: 3,
        ..SyncConfig::default()
    };

    let summary = run_engine(&source, &target, config).await.unwrap();
    assert_eq!(summary.deleted(), 5);
    assert_eq!(target.record_count().await, 5);
    for i in [0, 2, 4, 6, 8] {
        assert!(target.record(&ContentId::new(PAGE, i)).await.is_some());
    }
}
