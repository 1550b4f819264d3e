//! In-memory content repository for engine tests.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;

use reposync_model::filter::Filter;
use reposync_model::id::ContentId;
use reposync_model::record::{AttrValue, Record};
use reposync_model::schema::{AttributeType, ObjectType};
use reposync_repo::cursor::{RowSource, VecSource};
use reposync_repo::error::{RepoError, RepoResult};
use reposync_repo::rows::{DetailKey, DetailOp, DetailOpCounts, DetailRow, QuickRow};
use reposync_repo::traits::{
    AttrValueRef, ContentRepository, LobStore, RecordStore, TransactionControl, TypeCatalog,
    Watermark, WatermarkStore,
};

type DetailMapKey = (String, String, i32);

#[derive(Debug, Clone, Default)]
struct State {
    types: Vec<ObjectType>,
    attributes: HashMap<i64, Vec<AttributeType>>,
    records: BTreeMap<String, Record>,
    detail: BTreeMap<DetailMapKey, AttrValue>,
    quick: BTreeMap<(String, String), AttrValue>,
    watermarks: HashMap<Option<i64>, Watermark>,
    last_modified: i64,
}

struct Inner {
    state: State,
    snapshot: Option<State>,
    current_channel: Option<i64>,
}

/// A fully in-memory [`ContentRepository`] with snapshot-based transactions.
pub struct MemoryRepository {
    name: String,
    inner: Mutex<Inner>,
}

impl MemoryRepository {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            inner: Mutex::new(Inner {
                state: State::default(),
                snapshot: None,
                current_channel: None,
            }),
        })
    }

    pub async fn add_type(&self, object_type: ObjectType, attributes: Vec<AttributeType>) {
        let mut inner = self.inner.lock().await;
        inner
            .state
            .attributes
            .insert(object_type.type_id, attributes);
        inner.state.types.push(object_type);
    }

    /// Store a record directly, bumping the repository's last-modification
    /// timestamp the way real bookkeeping would.
    pub async fn put_record(&self, record: Record) {
        let mut inner = self.inner.lock().await;
        inner.state.last_modified = inner.state.last_modified.max(record.update_timestamp);
        inner.state.records.insert(record.id.canonical(), record);
    }

    /// Remove a record, leaving a higher last-modification timestamp so the
    /// deletion is visible to watermark comparison.
    pub async fn remove_record(&self, id: &ContentId, new_last_modified: i64) {
        let mut inner = self.inner.lock().await;
        let canonical = id.canonical();
        inner.state.records.remove(&canonical);
        inner
            .state
            .detail
            .retain(|(content_id, _, _), _| content_id != &canonical);
        inner.state.last_modified = inner.state.last_modified.max(new_last_modified);
    }

    pub async fn put_lob(&self, id: &ContentId, attribute: &str, sort_order: i32, value: AttrValue) {
        let mut inner = self.inner.lock().await;
        inner
            .state
            .detail
            .insert((id.canonical(), attribute.to_string(), sort_order), value);
    }

    pub async fn set_quick(&self, id: &ContentId, column: &str, value: AttrValue) {
        let mut inner = self.inner.lock().await;
        inner
            .state
            .quick
            .insert((id.canonical(), column.to_string()), value);
    }

    pub async fn set_last_modified(&self, timestamp: i64) {
        self.inner.lock().await.state.last_modified = timestamp;
    }

    pub async fn record(&self, id: &ContentId) -> Option<Record> {
        self.inner
            .lock()
            .await
            .state
            .records
            .get(&id.canonical())
            .cloned()
    }

    pub async fn record_count(&self) -> usize {
        self.inner.lock().await.state.records.len()
    }

    pub async fn lob_value(&self, id: &ContentId, attribute: &str, sort_order: i32) -> Option<AttrValue> {
        self.inner
            .lock()
            .await
            .state
            .detail
            .get(&(id.canonical(), attribute.to_string(), sort_order))
            .cloned()
    }

    pub async fn quick_value(&self, id: &ContentId, column: &str) -> Option<AttrValue> {
        self.inner
            .lock()
            .await
            .state
            .quick
            .get(&(id.canonical(), column.to_string()))
            .cloned()
    }

    pub async fn detail_keys(&self) -> Vec<DetailMapKey> {
        self.inner.lock().await.state.detail.keys().cloned().collect()
    }

    pub async fn watermark(&self, channel: Option<i64>) -> Option<Watermark> {
        self.inner
            .lock()
            .await
            .state
            .watermarks
            .get(&channel)
            .cloned()
    }

    pub async fn object_type_count(&self) -> usize {
        self.inner.lock().await.state.types.len()
    }

    pub async fn attribute_types(&self, type_id: i64) -> Vec<AttributeType> {
        self.inner
            .lock()
            .await
            .state
            .attributes
            .get(&type_id)
            .cloned()
            .unwrap_or_default()
    }
}

fn matches(record: &Record, filter: &Filter) -> bool {
    match filter {
        Filter::And(filters) => filters.iter().all(|f| matches(record, f)),
        Filter::Or(filters) => filters.iter().any(|f| matches(record, f)),
        Filter::Not(inner) => !matches(record, inner),
        Filter::TypeIs(type_id) => record.id.type_id() == *type_id,
        Filter::UpdatedAfter(ts) => record.update_timestamp > *ts,
        Filter::UpdatedAtOrBefore(ts) => record.update_timestamp <= *ts,
        Filter::ChannelIs(channel) => record.channel_id == Some(*channel),
        Filter::IdIn(ids) => ids.contains(&record.id),
        Filter::AttributeEquals { attribute, value } => record
            .values(attribute)
            .iter()
            .any(|v| v.as_text() == Some(value.as_str())),
        // The in-memory store has no SQL; raw rules are not used in tests.
        Filter::Raw(_) => false,
    }
}

#[async_trait]
impl RecordStore for MemoryRepository {
    async fn scan(&self, filter: &Filter, offset: u64, limit: u64) -> RepoResult<Vec<Record>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .state
            .records
            .values()
            .filter(|r| matches(r, filter))
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn list_ids(
        &self,
        filter: &Filter,
        offset: u64,
        limit: u64,
    ) -> RepoResult<Vec<ContentId>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .state
            .records
            .values()
            .filter(|r| matches(r, filter))
            .skip(offset as usize)
            .take(limit as usize)
            .map(|r| r.id.clone())
            .collect())
    }

    async fn count(&self, filter: &Filter) -> RepoResult<u64> {
        let inner = self.inner.lock().await;
        Ok(inner
            .state
            .records
            .values()
            .filter(|r| matches(r, filter))
            .count() as u64)
    }

    async fn upsert_batch(&self, records: &[Record]) -> RepoResult<()> {
        let mut inner = self.inner.lock().await;
        let channel = inner.current_channel;
        for record in records {
            let mut record = record.clone();
            record.channel_id = record.channel_id.or(channel);
            inner.state.records.insert(record.id.canonical(), record);
        }
        Ok(())
    }

    async fn delete_batch(&self, ids: &[ContentId]) -> RepoResult<u64> {
        let mut inner = self.inner.lock().await;
        let mut removed = 0;
        for id in ids {
            let canonical = id.canonical();
            if inner.state.records.remove(&canonical).is_some() {
                removed += 1;
            }
            inner
                .state
                .detail
                .retain(|(content_id, _, _), _| content_id != &canonical);
            inner
                .state
                .quick
                .retain(|(content_id, _), _| content_id != &canonical);
        }
        Ok(removed)
    }

    async fn last_modified(&self) -> RepoResult<i64> {
        Ok(self.inner.lock().await.state.last_modified)
    }

    async fn repair_id_counters(&self) -> RepoResult<()> {
        Ok(())
    }
}

#[async_trait]
impl TypeCatalog for MemoryRepository {
    async fn load_object_types(&self) -> RepoResult<Vec<ObjectType>> {
        let mut types = self.inner.lock().await.state.types.clone();
        types.sort_by_key(|t| t.type_id);
        Ok(types)
    }

    async fn load_attribute_types(&self, type_id: i64) -> RepoResult<Vec<AttributeType>> {
        Ok(self
            .inner
            .lock()
            .await
            .state
            .attributes
            .get(&type_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn create_object_type(&self, object_type: &ObjectType) -> RepoResult<()> {
        let mut inner = self.inner.lock().await;
        inner
            .state
            .attributes
            .entry(object_type.type_id)
            .or_default();
        inner.state.types.push(object_type.clone());
        Ok(())
    }

    async fn drop_object_type(&self, type_id: i64) -> RepoResult<()> {
        let mut inner = self.inner.lock().await;
        inner.state.types.retain(|t| t.type_id != type_id);
        inner.state.attributes.remove(&type_id);
        let doomed: Vec<String> = inner
            .state
            .records
            .values()
            .filter(|r| r.id.type_id() == type_id)
            .map(|r| r.id.canonical())
            .collect();
        for canonical in doomed {
            inner.state.records.remove(&canonical);
            inner
                .state
                .detail
                .retain(|(content_id, _, _), _| content_id != &canonical);
        }
        Ok(())
    }

    async fn add_attribute_type(&self, attribute: &AttributeType) -> RepoResult<()> {
        let mut inner = self.inner.lock().await;
        inner
            .state
            .attributes
            .entry(attribute.owner_type_id)
            .or_default()
            .push(attribute.clone());
        Ok(())
    }

    async fn alter_attribute_type(&self, attribute: &AttributeType) -> RepoResult<()> {
        let mut inner = self.inner.lock().await;
        let attrs = inner
            .state
            .attributes
            .entry(attribute.owner_type_id)
            .or_default();
        match attrs.iter_mut().find(|a| a.name == attribute.name) {
            Some(existing) => {
                *existing = attribute.clone();
                Ok(())
            }
            None => Err(RepoError::query_failed(format!(
                "no such attribute: {}",
                attribute.name
            ))),
        }
    }

    async fn drop_attribute_type(&self, owner_type_id: i64, name: &str) -> RepoResult<()> {
        let mut inner = self.inner.lock().await;
        if let Some(attrs) = inner.state.attributes.get_mut(&owner_type_id) {
            attrs.retain(|a| a.name != name);
        }
        let doomed: Vec<String> = inner
            .state
            .records
            .values()
            .filter(|r| r.id.type_id() == owner_type_id)
            .map(|r| r.id.canonical())
            .collect();
        inner
            .state
            .detail
            .retain(|(content_id, attr, _), _| !(doomed.contains(content_id) && attr == name));
        Ok(())
    }
}

#[async_trait]
impl WatermarkStore for MemoryRepository {
    async fn get_watermark(&self, channel: Option<i64>) -> RepoResult<Option<Watermark>> {
        Ok(self
            .inner
            .lock()
            .await
            .state
            .watermarks
            .get(&channel)
            .cloned())
    }

    async fn set_watermark(&self, channel: Option<i64>, watermark: &Watermark) -> RepoResult<()> {
        self.inner
            .lock()
            .await
            .state
            .watermarks
            .insert(channel, watermark.clone());
        Ok(())
    }
}

#[async_trait]
impl LobStore for MemoryRepository {
    async fn open_quick_source(
        &self,
        _type_id: i64,
        ids: &[ContentId],
        columns: &[String],
    ) -> RepoResult<Box<dyn RowSource<QuickRow>>> {
        let inner = self.inner.lock().await;
        let mut canonical: Vec<(String, ContentId)> =
            ids.iter().map(|id| (id.canonical(), id.clone())).collect();
        canonical.sort_by(|a, b| a.0.cmp(&b.0));

        let mut rows = Vec::new();
        for (key, id) in canonical {
            if !inner.state.records.contains_key(&key) {
                continue;
            }
            let values = columns
                .iter()
                .map(|column| {
                    let value = inner
                        .state
                        .quick
                        .get(&(key.clone(), column.clone()))
                        .cloned()
                        .unwrap_or(AttrValue::Null);
                    (column.clone(), value)
                })
                .collect();
            rows.push(QuickRow { id, values });
        }
        Ok(Box::new(VecSource::new(rows)))
    }

    async fn open_detail_source(
        &self,
        ids: &[ContentId],
        attributes: &[String],
    ) -> RepoResult<Box<dyn RowSource<DetailRow>>> {
        let inner = self.inner.lock().await;
        let id_set: Vec<String> = ids.iter().map(ContentId::canonical).collect();
        let mut rows: Vec<DetailRow> = inner
            .state
            .detail
            .iter()
            .filter(|((content_id, attr, _), _)| {
                id_set.contains(content_id) && attributes.contains(attr)
            })
            .map(|((content_id, attr, sort_order), value)| {
                let id: ContentId = content_id.parse().expect("canonical id in store");
                DetailRow::new(DetailKey::new(id, attr.clone(), *sort_order), value.clone())
            })
            .collect();
        rows.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(Box::new(VecSource::new(rows)))
    }

    async fn apply_detail_ops(&self, ops: &[DetailOp]) -> RepoResult<DetailOpCounts> {
        let mut inner = self.inner.lock().await;
        let mut counts = DetailOpCounts::default();
        for op in ops {
            match op {
                DetailOp::Update(row) => {
                    inner.state.detail.insert(
                        (
                            row.key.id.canonical(),
                            row.key.attribute.clone(),
                            row.key.sort_order,
                        ),
                        row.value.clone(),
                    );
                    counts.updated += 1;
                }
                DetailOp::Insert(row) => {
                    inner.state.detail.insert(
                        (
                            row.key.id.canonical(),
                            row.key.attribute.clone(),
                            row.key.sort_order,
                        ),
                        row.value.clone(),
                    );
                    counts.inserted += 1;
                }
                DetailOp::Delete(key) => {
                    inner.state.detail.remove(&(
                        key.id.canonical(),
                        key.attribute.clone(),
                        key.sort_order,
                    ));
                    counts.deleted += 1;
                }
            }
        }
        Ok(counts)
    }

    async fn update_quick_row(
        &self,
        id: &ContentId,
        values: &[(String, AttrValueRef<'_>)],
    ) -> RepoResult<()> {
        let mut inner = self.inner.lock().await;
        for (column, value) in values {
            inner
                .state
                .quick
                .insert((id.canonical(), column.clone()), (*value).clone());
        }
        Ok(())
    }

    async fn recompute_quick_column(
        &self,
        ids: &[ContentId],
        attribute: &AttributeType,
    ) -> RepoResult<()> {
        let column = attribute
            .quick_column
            .clone()
            .ok_or_else(|| RepoError::InvalidConfiguration {
                message: "attribute has no quick column".to_string(),
            })?;
        let mut inner = self.inner.lock().await;
        for id in ids {
            let value = inner
                .state
                .detail
                .get(&(id.canonical(), attribute.name.clone(), 0))
                .cloned()
                .unwrap_or(AttrValue::Null);
            inner
                .state
                .quick
                .insert((id.canonical(), column.clone()), value);
        }
        Ok(())
    }
}

#[async_trait]
impl TransactionControl for MemoryRepository {
    async fn begin(&self) -> RepoResult<()> {
        let mut inner = self.inner.lock().await;
        if inner.snapshot.is_some() {
            return Err(RepoError::Transaction {
                message: "transaction already open".to_string(),
                source: None,
            });
        }
        inner.snapshot = Some(inner.state.clone());
        Ok(())
    }

    async fn commit(&self) -> RepoResult<()> {
        self.inner.lock().await.snapshot = None;
        Ok(())
    }

    async fn rollback(&self) -> RepoResult<()> {
        let mut inner = self.inner.lock().await;
        if let Some(snapshot) = inner.snapshot.take() {
            inner.state = snapshot;
        }
        Ok(())
    }
}

#[async_trait]
impl ContentRepository for MemoryRepository {
    fn display_name(&self) -> &str {
        &self.name
    }

    async fn set_current_channel(&self, channel: Option<i64>) -> RepoResult<()> {
        self.inner.lock().await.current_channel = channel;
        Ok(())
    }
}
