//! PostgreSQL-backed content repository.
//!
//! One repository instance owns exactly one database session for its whole
//! life; every statement, including transaction control, runs on that
//! pinned connection so an open transaction covers all record and schema
//! writes of a run.

use async_trait::async_trait;
use sqlx::postgres::PgConnectOptions;
use sqlx::{Connection, PgConnection, Row};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, instrument};

use reposync_model::filter::Filter;
use reposync_model::id::ContentId;
use reposync_model::record::Record;
use reposync_model::schema::{AttributeKind, AttributeType, ObjectType};

use crate::error::{RepoError, RepoResult};
use crate::traits::{
    ContentRepository, RecordStore, TransactionControl, TypeCatalog, Watermark, WatermarkStore,
};

use super::sql::{
    bind_params, escape_identifier, filter_to_sql, quick_column_sql_type, SqlParam,
};

/// Connection settings for a PostgreSQL repository.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct PgRepoConfig {
    /// Database host.
    pub host: String,
    /// Database port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Database name.
    pub database: String,
    /// Login user.
    pub username: String,
    /// Login password.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

fn default_port() -> u16 {
    5432
}

impl PgRepoConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> RepoResult<()> {
        if self.host.trim().is_empty() {
            return Err(RepoError::InvalidConfiguration {
                message: "host must not be empty".to_string(),
            });
        }
        if self.database.trim().is_empty() {
            return Err(RepoError::InvalidConfiguration {
                message: "database must not be empty".to_string(),
            });
        }
        if self.username.trim().is_empty() {
            return Err(RepoError::InvalidConfiguration {
                message: "username must not be empty".to_string(),
            });
        }
        Ok(())
    }

    /// Copy with the password blanked, for logging.
    #[must_use]
    pub fn redacted(&self) -> Self {
        Self {
            password: self.password.as_ref().map(|_| "***".to_string()),
            ..self.clone()
        }
    }

    fn connect_options(&self) -> PgConnectOptions {
        let mut options = PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .database(&self.database)
            .username(&self.username);
        if let Some(ref password) = self.password {
            options = options.password(password);
        }
        options
    }
}

pub(crate) struct SessionInner {
    pub(crate) conn: PgConnection,
    pub(crate) tx_open: bool,
}

/// The pinned database session shared by the repository and its row
/// sources. Paged LOB queries multiplex on this session between write
/// statements, which keeps reads inside the open transaction's visibility.
pub(crate) struct PgSession {
    pub(crate) inner: Mutex<SessionInner>,
}

/// A content repository stored in PostgreSQL.
pub struct PgRepository {
    pub(crate) session: Arc<PgSession>,
    display_name: String,
    current_channel: RwLock<Option<i64>>,
    schema_cache: RwLock<HashMap<i64, Arc<Vec<AttributeType>>>>,
}

impl std::fmt::Debug for PgRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgRepository")
            .field("display_name", &self.display_name)
            .finish()
    }
}

impl PgRepository {
    /// Connect to the repository, pinning one session.
    pub async fn connect(config: &PgRepoConfig) -> RepoResult<Self> {
        config.validate()?;

        let display_name = format!(
            "postgres: {}@{}/{}",
            config.username, config.host, config.database
        );

        debug!(host = %config.host, database = %config.database, "Connecting to repository");

        let conn = PgConnection::connect_with(&config.connect_options())
            .await
            .map_err(|e| {
                RepoError::connection_failed_with_source(
                    format!(
                        "failed to connect to {}:{}/{}",
                        config.host, config.port, config.database
                    ),
                    e,
                )
            })?;

        info!(repository = %display_name, "Repository session established");

        Ok(Self {
            session: Arc::new(PgSession {
                inner: Mutex::new(SessionInner {
                    conn,
                    tx_open: false,
                }),
            }),
            display_name,
            current_channel: RwLock::new(None),
            schema_cache: RwLock::new(HashMap::new()),
        })
    }

    /// Attribute types of one object type, cached for the repository's life
    /// and invalidated on every schema mutation.
    pub(crate) async fn attribute_types_cached(
        &self,
        type_id: i64,
    ) -> RepoResult<Arc<Vec<AttributeType>>> {
        if let Some(cached) = self.schema_cache.read().await.get(&type_id) {
            return Ok(cached.clone());
        }
        let loaded = Arc::new(self.load_attribute_types(type_id).await?);
        self.schema_cache
            .write()
            .await
            .insert(type_id, loaded.clone());
        Ok(loaded)
    }

    async fn invalidate_schema_cache(&self) {
        self.schema_cache.write().await.clear();
    }

    async fn upsert_one(
        &self,
        inner: &mut SessionInner,
        record: &Record,
        attrs: &[AttributeType],
        channel: Option<i64>,
    ) -> RepoResult<()> {
        let content_id = record.id.canonical();

        sqlx::query(
            r"
            INSERT INTO record (content_id, type_id, object_id, update_timestamp, channel_id, channel_set_id)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (content_id) DO UPDATE SET
                update_timestamp = EXCLUDED.update_timestamp,
                channel_id = EXCLUDED.channel_id,
                channel_set_id = EXCLUDED.channel_set_id
            ",
        )
        .bind(&content_id)
        .bind(record.id.type_id())
        .bind(record.id.object_id())
        .bind(record.update_timestamp)
        .bind(record.channel_id.or(channel))
        .bind(record.channel_set_id)
        .execute(&mut inner.conn)
        .await
        .map_err(|e| RepoError::query_failed_with_source("upserting record row", e))?;

        // Replace the non-LOB detail rows wholesale; LOB rows belong to the
        // dedicated merge pass and must survive this rewrite.
        let skip_names: Vec<String> = attrs
            .iter()
            .filter(|a| {
                a.kind.is_lob() || a.kind == AttributeKind::ForeignLink || a.filesystem
            })
            .map(|a| a.name.clone())
            .collect();

        sqlx::query(
            r"
            DELETE FROM record_attribute
            WHERE content_id = $1 AND NOT (name = ANY($2))
            ",
        )
        .bind(&content_id)
        .bind(&skip_names)
        .execute(&mut inner.conn)
        .await
        .map_err(|e| RepoError::query_failed_with_source("clearing detail rows", e))?;

        for (name, values) in &record.attributes {
            if skip_names.iter().any(|s| s == name) {
                continue;
            }
            for (sort_order, value) in values.iter().enumerate() {
                let cols = super::sql::encode_value(value);
                sqlx::query(
                    r"
                    INSERT INTO record_attribute
                        (content_id, name, sort_order, value_text, value_long,
                         value_double, value_date, value_blob, value_link)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                    ",
                )
                .bind(&content_id)
                .bind(name)
                .bind(sort_order as i32)
                .bind(cols.text)
                .bind(cols.long)
                .bind(cols.double)
                .bind(cols.date)
                .bind(cols.blob)
                .bind(cols.link)
                .execute(&mut inner.conn)
                .await
                .map_err(|e| RepoError::query_failed_with_source("inserting detail row", e))?;
            }
        }

        // Denormalized copies for optimized non-LOB attributes.
        let quick: Vec<&AttributeType> = attrs
            .iter()
            .filter(|a| a.optimized && !a.kind.is_lob() && a.quick_column.is_some())
            .collect();
        if !quick.is_empty() {
            let mut sets = Vec::new();
            let mut params: Vec<SqlParam> = Vec::new();
            for at in &quick {
                let column = at.quick_column.as_deref().unwrap_or_default();
                match record.first(&at.name).and_then(super::sql::param_for_value) {
                    Some(param) => {
                        params.push(param);
                        sets.push(format!(
                            "\"{}\" = ${}",
                            escape_identifier(column),
                            params.len()
                        ));
                    }
                    None => sets.push(format!("\"{}\" = NULL", escape_identifier(column))),
                }
            }
            let sql = format!(
                "UPDATE record SET {} WHERE content_id = ${}",
                sets.join(", "),
                params.len() + 1
            );
            params.push(SqlParam::Text(content_id.clone()));
            bind_params!(sqlx::query(&sql), &params)
                .execute(&mut inner.conn)
                .await
                .map_err(|e| RepoError::query_failed_with_source("updating quick columns", e))?;
        }

        Ok(())
    }
}

#[async_trait]
impl RecordStore for PgRepository {
    #[instrument(skip(self, filter), fields(repository = %self.display_name))]
    async fn scan(&self, filter: &Filter, offset: u64, limit: u64) -> RepoResult<Vec<Record>> {
        let mut params = Vec::new();
        let predicate = filter_to_sql(filter, &mut params)?;
        let sql = format!(
            "SELECT r.content_id, r.update_timestamp, r.channel_id, r.channel_set_id \
             FROM record r WHERE {predicate} \
             ORDER BY r.content_id LIMIT ${} OFFSET ${}",
            params.len() + 1,
            params.len() + 2
        );
        params.push(SqlParam::Long(limit as i64));
        params.push(SqlParam::Long(offset as i64));

        let mut inner = self.session.inner.lock().await;
        let rows = bind_params!(sqlx::query(&sql), &params)
            .fetch_all(&mut inner.conn)
            .await
            .map_err(|e| RepoError::query_failed_with_source("scanning records", e))?;

        let mut records = Vec::with_capacity(rows.len());
        let mut ids = Vec::with_capacity(rows.len());
        for row in &rows {
            let canonical: String = row
                .try_get("content_id")
                .map_err(|e| RepoError::query_failed_with_source("reading content_id", e))?;
            let id: ContentId = canonical
                .parse()
                .map_err(|e: reposync_model::id::ParseContentIdError| {
                    RepoError::malformed_row(e.to_string())
                })?;
            let mut record = Record::new(
                id,
                row.try_get("update_timestamp")
                    .map_err(|e| RepoError::query_failed_with_source("reading timestamp", e))?,
            );
            record.channel_id = row
                .try_get("channel_id")
                .map_err(|e| RepoError::query_failed_with_source("reading channel_id", e))?;
            record.channel_set_id = row
                .try_get("channel_set_id")
                .map_err(|e| RepoError::query_failed_with_source("reading channel_set_id", e))?;
            ids.push(canonical);
            records.push(record);
        }

        if records.is_empty() {
            return Ok(records);
        }

        // Attach the non-LOB attribute values. LOB values stay behind; the
        // dedicated merge pass copies them without materializing pages of
        // large payloads here.
        let detail_rows = sqlx::query(
            r"
            SELECT ra.content_id, ra.name, ra.sort_order, ra.value_text, ra.value_long,
                   ra.value_double, ra.value_date, ra.value_blob, ra.value_link
            FROM record_attribute ra
            WHERE ra.content_id = ANY($1)
              AND NOT EXISTS (
                  SELECT 1 FROM attribute_type at
                  JOIN record r ON r.content_id = ra.content_id
                  WHERE at.owner_type_id = r.type_id
                    AND at.name = ra.name
                    AND at.kind IN ('long_text', 'blob', 'binary'))
            ORDER BY ra.content_id, ra.name, ra.sort_order
            ",
        )
        .bind(&ids)
        .fetch_all(&mut inner.conn)
        .await
        .map_err(|e| RepoError::query_failed_with_source("fetching detail rows", e))?;

        let mut by_id: HashMap<String, &mut Record> = records
            .iter_mut()
            .map(|r| {
                let key = r.id.canonical();
                (key, r)
            })
            .collect();
        for row in &detail_rows {
            let canonical: String = row
                .try_get("content_id")
                .map_err(|e| RepoError::query_failed_with_source("reading content_id", e))?;
            let name: String = row
                .try_get("name")
                .map_err(|e| RepoError::query_failed_with_source("reading name", e))?;
            let value = super::sql::decode_value(row)?;
            if let Some(record) = by_id.get_mut(&canonical) {
                record.attributes.entry(name).or_default().push(value);
            }
        }

        Ok(records)
    }

    async fn list_ids(
        &self,
        filter: &Filter,
        offset: u64,
        limit: u64,
    ) -> RepoResult<Vec<ContentId>> {
        let mut params = Vec::new();
        let predicate = filter_to_sql(filter, &mut params)?;
        let sql = format!(
            "SELECT r.content_id FROM record r WHERE {predicate} \
             ORDER BY r.content_id LIMIT ${} OFFSET ${}",
            params.len() + 1,
            params.len() + 2
        );
        params.push(SqlParam::Long(limit as i64));
        params.push(SqlParam::Long(offset as i64));

        let mut inner = self.session.inner.lock().await;
        let rows = bind_params!(sqlx::query(&sql), &params)
            .fetch_all(&mut inner.conn)
            .await
            .map_err(|e| RepoError::query_failed_with_source("listing ids", e))?;

        rows.iter()
            .map(|row| {
                let canonical: String = row
                    .try_get("content_id")
                    .map_err(|e| RepoError::query_failed_with_source("reading content_id", e))?;
                canonical
                    .parse()
                    .map_err(|e: reposync_model::id::ParseContentIdError| {
                        RepoError::malformed_row(e.to_string())
                    })
            })
            .collect()
    }

    async fn count(&self, filter: &Filter) -> RepoResult<u64> {
        let mut params = Vec::new();
        let predicate = filter_to_sql(filter, &mut params)?;
        let sql = format!("SELECT COUNT(*) AS total FROM record r WHERE {predicate}");

        let mut inner = self.session.inner.lock().await;
        let row = bind_params!(sqlx::query(&sql), &params)
            .fetch_one(&mut inner.conn)
            .await
            .map_err(|e| RepoError::query_failed_with_source("counting records", e))?;
        let total: i64 = row
            .try_get("total")
            .map_err(|e| RepoError::query_failed_with_source("reading count", e))?;
        Ok(total as u64)
    }

    #[instrument(skip(self, records), fields(repository = %self.display_name, batch = records.len()))]
    async fn upsert_batch(&self, records: &[Record]) -> RepoResult<()> {
        if records.is_empty() {
            return Ok(());
        }

        let type_ids: BTreeSet<i64> = records.iter().map(|r| r.id.type_id()).collect();
        let mut catalogs = HashMap::new();
        for type_id in type_ids {
            catalogs.insert(type_id, self.attribute_types_cached(type_id).await?);
        }
        let channel = *self.current_channel.read().await;

        let mut inner = self.session.inner.lock().await;
        for record in records {
            let attrs = catalogs.get(&record.id.type_id()).ok_or_else(|| {
                RepoError::TypeNotFound {
                    type_id: record.id.type_id(),
                }
            })?;
            self.upsert_one(&mut inner, record, attrs, channel).await?;
        }
        Ok(())
    }

    async fn delete_batch(&self, ids: &[ContentId]) -> RepoResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let canonical: Vec<String> = ids.iter().map(ContentId::canonical).collect();

        let mut inner = self.session.inner.lock().await;
        sqlx::query("DELETE FROM record_attribute WHERE content_id = ANY($1)")
            .bind(&canonical)
            .execute(&mut inner.conn)
            .await
            .map_err(|e| RepoError::query_failed_with_source("deleting detail rows", e))?;
        let result = sqlx::query("DELETE FROM record WHERE content_id = ANY($1)")
            .bind(&canonical)
            .execute(&mut inner.conn)
            .await
            .map_err(|e| RepoError::query_failed_with_source("deleting records", e))?;
        Ok(result.rows_affected())
    }

    async fn last_modified(&self) -> RepoResult<i64> {
        let mut inner = self.session.inner.lock().await;
        let row = sqlx::query(
            r"
            SELECT COALESCE(
                (SELECT int_value FROM sync_status WHERE name = 'repository.lastmodified'),
                (SELECT COALESCE(MAX(update_timestamp), 0) FROM record)) AS ts
            ",
        )
        .fetch_one(&mut inner.conn)
        .await
        .map_err(|e| RepoError::query_failed_with_source("reading last modification", e))?;
        row.try_get("ts")
            .map_err(|e| RepoError::query_failed_with_source("reading ts", e))
    }

    async fn repair_id_counters(&self) -> RepoResult<()> {
        let mut inner = self.session.inner.lock().await;
        sqlx::query(
            r"
            SELECT setval(
                pg_get_serial_sequence('record_attribute', 'id'),
                GREATEST((SELECT COALESCE(MAX(id), 0) FROM record_attribute), 1))
            ",
        )
        .execute(&mut inner.conn)
        .await
        .map_err(|e| RepoError::query_failed_with_source("repairing id counters", e))?;
        Ok(())
    }
}

#[async_trait]
impl TypeCatalog for PgRepository {
    async fn load_object_types(&self) -> RepoResult<Vec<ObjectType>> {
        let mut inner = self.session.inner.lock().await;
        let rows = sqlx::query(
            "SELECT type_id, name, exclude_versioning FROM object_type ORDER BY type_id",
        )
        .fetch_all(&mut inner.conn)
        .await
        .map_err(|e| RepoError::query_failed_with_source("loading object types", e))?;

        rows.iter()
            .map(|row| {
                Ok(ObjectType {
                    type_id: row
                        .try_get("type_id")
                        .map_err(|e| RepoError::query_failed_with_source("reading type_id", e))?,
                    name: row
                        .try_get("name")
                        .map_err(|e| RepoError::query_failed_with_source("reading name", e))?,
                    exclude_versioning: row.try_get("exclude_versioning").map_err(|e| {
                        RepoError::query_failed_with_source("reading exclude_versioning", e)
                    })?,
                })
            })
            .collect()
    }

    async fn load_attribute_types(&self, type_id: i64) -> RepoResult<Vec<AttributeType>> {
        let mut inner = self.session.inner.lock().await;
        let rows = sqlx::query(
            r"
            SELECT owner_type_id, name, kind, multivalue, optimized, quick_column,
                   linked_type_id, foreign_link_attribute, foreign_link_rule,
                   exclude_versioning, filesystem
            FROM attribute_type WHERE owner_type_id = $1 ORDER BY name
            ",
        )
        .bind(type_id)
        .fetch_all(&mut inner.conn)
        .await
        .map_err(|e| RepoError::query_failed_with_source("loading attribute types", e))?;

        rows.iter()
            .map(|row| {
                let kind_str: String = row
                    .try_get("kind")
                    .map_err(|e| RepoError::query_failed_with_source("reading kind", e))?;
                let kind: AttributeKind = kind_str
                    .parse()
                    .map_err(|e: String| RepoError::malformed_row(e))?;
                Ok(AttributeType {
                    owner_type_id: row.try_get("owner_type_id").map_err(|e| {
                        RepoError::query_failed_with_source("reading owner_type_id", e)
                    })?,
                    name: row
                        .try_get("name")
                        .map_err(|e| RepoError::query_failed_with_source("reading name", e))?,
                    kind,
                    multivalue: row
                        .try_get("multivalue")
                        .map_err(|e| RepoError::query_failed_with_source("reading multivalue", e))?,
                    optimized: row
                        .try_get("optimized")
                        .map_err(|e| RepoError::query_failed_with_source("reading optimized", e))?,
                    quick_column: row.try_get("quick_column").map_err(|e| {
                        RepoError::query_failed_with_source("reading quick_column", e)
                    })?,
                    linked_type_id: row.try_get("linked_type_id").map_err(|e| {
                        RepoError::query_failed_with_source("reading linked_type_id", e)
                    })?,
                    foreign_link_attribute: row.try_get("foreign_link_attribute").map_err(|e| {
                        RepoError::query_failed_with_source("reading foreign_link_attribute", e)
                    })?,
                    foreign_link_rule: row.try_get("foreign_link_rule").map_err(|e| {
                        RepoError::query_failed_with_source("reading foreign_link_rule", e)
                    })?,
                    exclude_versioning: row.try_get("exclude_versioning").map_err(|e| {
                        RepoError::query_failed_with_source("reading exclude_versioning", e)
                    })?,
                    filesystem: row
                        .try_get("filesystem")
                        .map_err(|e| RepoError::query_failed_with_source("reading filesystem", e))?,
                })
            })
            .collect()
    }

    #[instrument(skip(self), fields(repository = %self.display_name, type_id = object_type.type_id))]
    async fn create_object_type(&self, object_type: &ObjectType) -> RepoResult<()> {
        let mut inner = self.session.inner.lock().await;
        sqlx::query(
            "INSERT INTO object_type (type_id, name, exclude_versioning) VALUES ($1, $2, $3)",
        )
        .bind(object_type.type_id)
        .bind(&object_type.name)
        .bind(object_type.exclude_versioning)
        .execute(&mut inner.conn)
        .await
        .map_err(|e| RepoError::query_failed_with_source("creating object type", e))?;
        drop(inner);
        self.invalidate_schema_cache().await;
        Ok(())
    }

    #[instrument(skip(self), fields(repository = %self.display_name))]
    async fn drop_object_type(&self, type_id: i64) -> RepoResult<()> {
        let quick_columns: Vec<String> = self
            .attribute_types_cached(type_id)
            .await?
            .iter()
            .filter_map(|a| a.quick_column.clone())
            .collect();

        let mut inner = self.session.inner.lock().await;
        sqlx::query(
            r"
            DELETE FROM record_attribute ra USING record r
            WHERE r.content_id = ra.content_id AND r.type_id = $1
            ",
        )
        .bind(type_id)
        .execute(&mut inner.conn)
        .await
        .map_err(|e| RepoError::query_failed_with_source("dropping detail rows", e))?;
        sqlx::query("DELETE FROM record WHERE type_id = $1")
            .bind(type_id)
            .execute(&mut inner.conn)
            .await
            .map_err(|e| RepoError::query_failed_with_source("dropping records", e))?;
        sqlx::query("DELETE FROM attribute_type WHERE owner_type_id = $1")
            .bind(type_id)
            .execute(&mut inner.conn)
            .await
            .map_err(|e| RepoError::query_failed_with_source("dropping attribute types", e))?;
        sqlx::query("DELETE FROM object_type WHERE type_id = $1")
            .bind(type_id)
            .execute(&mut inner.conn)
            .await
            .map_err(|e| RepoError::query_failed_with_source("dropping object type", e))?;

        for column in quick_columns {
            let sql = format!(
                "ALTER TABLE record DROP COLUMN IF EXISTS \"{}\"",
                escape_identifier(&column)
            );
            sqlx::query(&sql)
                .execute(&mut inner.conn)
                .await
                .map_err(|e| RepoError::query_failed_with_source("dropping quick column", e))?;
        }
        drop(inner);
        self.invalidate_schema_cache().await;
        Ok(())
    }

    #[instrument(skip(self, attribute), fields(repository = %self.display_name, name = %attribute.name))]
    async fn add_attribute_type(&self, attribute: &AttributeType) -> RepoResult<()> {
        let mut inner = self.session.inner.lock().await;
        sqlx::query(
            r"
            INSERT INTO attribute_type
                (owner_type_id, name, kind, multivalue, optimized, quick_column,
                 linked_type_id, foreign_link_attribute, foreign_link_rule,
                 exclude_versioning, filesystem)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ",
        )
        .bind(attribute.owner_type_id)
        .bind(&attribute.name)
        .bind(attribute.kind.as_str())
        .bind(attribute.multivalue)
        .bind(attribute.optimized)
        .bind(&attribute.quick_column)
        .bind(attribute.linked_type_id)
        .bind(&attribute.foreign_link_attribute)
        .bind(&attribute.foreign_link_rule)
        .bind(attribute.exclude_versioning)
        .bind(attribute.filesystem)
        .execute(&mut inner.conn)
        .await
        .map_err(|e| RepoError::query_failed_with_source("adding attribute type", e))?;

        if let Some(ref column) = attribute.quick_column {
            let sql = format!(
                "ALTER TABLE record ADD COLUMN IF NOT EXISTS \"{}\" {}",
                escape_identifier(column),
                quick_column_sql_type(attribute.kind)
            );
            sqlx::query(&sql)
                .execute(&mut inner.conn)
                .await
                .map_err(|e| RepoError::query_failed_with_source("adding quick column", e))?;
        }
        drop(inner);
        self.invalidate_schema_cache().await;
        Ok(())
    }

    #[instrument(skip(self, attribute), fields(repository = %self.display_name, name = %attribute.name))]
    async fn alter_attribute_type(&self, attribute: &AttributeType) -> RepoResult<()> {
        let old = self
            .attribute_types_cached(attribute.owner_type_id)
            .await?
            .iter()
            .find(|a| a.name == attribute.name)
            .cloned();

        let mut inner = self.session.inner.lock().await;
        sqlx::query(
            r"
            UPDATE attribute_type SET
                kind = $3, multivalue = $4, optimized = $5, quick_column = $6,
                linked_type_id = $7, foreign_link_attribute = $8,
                foreign_link_rule = $9, exclude_versioning = $10, filesystem = $11
            WHERE owner_type_id = $1 AND name = $2
            ",
        )
        .bind(attribute.owner_type_id)
        .bind(&attribute.name)
        .bind(attribute.kind.as_str())
        .bind(attribute.multivalue)
        .bind(attribute.optimized)
        .bind(&attribute.quick_column)
        .bind(attribute.linked_type_id)
        .bind(&attribute.foreign_link_attribute)
        .bind(&attribute.foreign_link_rule)
        .bind(attribute.exclude_versioning)
        .bind(attribute.filesystem)
        .execute(&mut inner.conn)
        .await
        .map_err(|e| RepoError::query_failed_with_source("altering attribute type", e))?;

        // Reshape the quick column when its name or value type changed.
        let old_column = old.as_ref().and_then(|a| a.quick_column.clone());
        let old_kind = old.as_ref().map(|a| a.kind);
        if old_column != attribute.quick_column || old_kind != Some(attribute.kind) {
            if let Some(column) = old_column {
                let sql = format!(
                    "ALTER TABLE record DROP COLUMN IF EXISTS \"{}\"",
                    escape_identifier(&column)
                );
                sqlx::query(&sql)
                    .execute(&mut inner.conn)
                    .await
                    .map_err(|e| {
                        RepoError::query_failed_with_source("dropping old quick column", e)
                    })?;
            }
            if let Some(ref column) = attribute.quick_column {
                let sql = format!(
                    "ALTER TABLE record ADD COLUMN IF NOT EXISTS \"{}\" {}",
                    escape_identifier(column),
                    quick_column_sql_type(attribute.kind)
                );
                sqlx::query(&sql)
                    .execute(&mut inner.conn)
                    .await
                    .map_err(|e| {
                        RepoError::query_failed_with_source("adding new quick column", e)
                    })?;
            }
        }
        drop(inner);
        self.invalidate_schema_cache().await;
        Ok(())
    }

    #[instrument(skip(self), fields(repository = %self.display_name))]
    async fn drop_attribute_type(&self, owner_type_id: i64, name: &str) -> RepoResult<()> {
        let quick_column = self
            .attribute_types_cached(owner_type_id)
            .await?
            .iter()
            .find(|a| a.name == name)
            .and_then(|a| a.quick_column.clone());

        let mut inner = self.session.inner.lock().await;
        sqlx::query(
            r"
            DELETE FROM record_attribute ra USING record r
            WHERE r.content_id = ra.content_id AND r.type_id = $1 AND ra.name = $2
            ",
        )
        .bind(owner_type_id)
        .bind(name)
        .execute(&mut inner.conn)
        .await
        .map_err(|e| RepoError::query_failed_with_source("dropping attribute detail rows", e))?;
        sqlx::query("DELETE FROM attribute_type WHERE owner_type_id = $1 AND name = $2")
            .bind(owner_type_id)
            .bind(name)
            .execute(&mut inner.conn)
            .await
            .map_err(|e| RepoError::query_failed_with_source("dropping attribute type", e))?;

        if let Some(column) = quick_column {
            let sql = format!(
                "ALTER TABLE record DROP COLUMN IF EXISTS \"{}\"",
                escape_identifier(&column)
            );
            sqlx::query(&sql)
                .execute(&mut inner.conn)
                .await
                .map_err(|e| RepoError::query_failed_with_source("dropping quick column", e))?;
        }
        drop(inner);
        self.invalidate_schema_cache().await;
        Ok(())
    }
}

#[async_trait]
impl WatermarkStore for PgRepository {
    async fn get_watermark(&self, channel: Option<i64>) -> RepoResult<Option<Watermark>> {
        let key = watermark_key(channel);
        let mut inner = self.session.inner.lock().await;
        let row = sqlx::query("SELECT int_value, string_value FROM sync_status WHERE name = $1")
            .bind(&key)
            .fetch_optional(&mut inner.conn)
            .await
            .map_err(|e| RepoError::query_failed_with_source("reading watermark", e))?;
        row.map(|row| {
            Ok(Watermark {
                timestamp: row
                    .try_get("int_value")
                    .map_err(|e| RepoError::query_failed_with_source("reading int_value", e))?,
                rule: row
                    .try_get("string_value")
                    .map_err(|e| RepoError::query_failed_with_source("reading string_value", e))?,
            })
        })
        .transpose()
    }

    async fn set_watermark(&self, channel: Option<i64>, watermark: &Watermark) -> RepoResult<()> {
        let key = watermark_key(channel);
        let mut inner = self.session.inner.lock().await;
        sqlx::query(
            r"
            INSERT INTO sync_status (name, int_value, string_value)
            VALUES ($1, $2, $3)
            ON CONFLICT (name) DO UPDATE SET
                int_value = EXCLUDED.int_value,
                string_value = EXCLUDED.string_value
            ",
        )
        .bind(&key)
        .bind(watermark.timestamp)
        .bind(&watermark.rule)
        .execute(&mut inner.conn)
        .await
        .map_err(|e| RepoError::query_failed_with_source("persisting watermark", e))?;
        Ok(())
    }
}

fn watermark_key(channel: Option<i64>) -> String {
    match channel {
        Some(channel) => format!("sync.watermark.{channel}"),
        None => "sync.watermark".to_string(),
    }
}

#[async_trait]
impl TransactionControl for PgRepository {
    async fn begin(&self) -> RepoResult<()> {
        let mut inner = self.session.inner.lock().await;
        if inner.tx_open {
            return Err(RepoError::Transaction {
                message: "transaction already open".to_string(),
                source: None,
            });
        }
        sqlx::query("BEGIN")
            .execute(&mut inner.conn)
            .await
            .map_err(|e| RepoError::transaction_with_source("failed to begin transaction", e))?;
        inner.tx_open = true;
        debug!(repository = %self.display_name, "Transaction started");
        Ok(())
    }

    async fn commit(&self) -> RepoResult<()> {
        let mut inner = self.session.inner.lock().await;
        if !inner.tx_open {
            return Ok(());
        }
        sqlx::query("COMMIT")
            .execute(&mut inner.conn)
            .await
            .map_err(|e| RepoError::transaction_with_source("failed to commit transaction", e))?;
        inner.tx_open = false;
        info!(repository = %self.display_name, "Transaction committed");
        Ok(())
    }

    async fn rollback(&self) -> RepoResult<()> {
        let mut inner = self.session.inner.lock().await;
        if !inner.tx_open {
            return Ok(());
        }
        sqlx::query("ROLLBACK")
            .execute(&mut inner.conn)
            .await
            .map_err(|e| RepoError::transaction_with_source("failed to roll back transaction", e))?;
        inner.tx_open = false;
        tracing::warn!(repository = %self.display_name, "Transaction rolled back");
        Ok(())
    }
}

#[async_trait]
impl ContentRepository for PgRepository {
    fn display_name(&self) -> &str {
        &self.display_name
    }

    async fn set_current_channel(&self, channel: Option<i64>) -> RepoResult<()> {
        *self.current_channel.write().await = channel;
        Ok(())
    }
}
