//! Ordered row sources and instruction application for the LOB passes.
//!
//! Each source pages with keyset continuation: one bounded query per page,
//! continuing strictly after the previous page's last key. No database-side
//! cursor stays open between pages, and pages run on the repository's
//! pinned session so they see the run's own uncommitted writes.

use async_trait::async_trait;
use sqlx::Row;
use std::sync::Arc;
use tracing::{debug, instrument};

use reposync_model::id::ContentId;
use reposync_model::schema::AttributeType;

use crate::cursor::RowSource;
use crate::error::{RepoError, RepoResult};
use crate::rows::{DetailKey, DetailOp, DetailOpCounts, DetailRow, QuickRow};
use crate::traits::{AttrValueRef, ContentRepository, LobStore};

use super::repository::{PgRepository, PgSession};
use super::sql::{
    bind_params, decode_dynamic_column, decode_value, encode_value, escape_identifier,
    param_for_value, value_column_for_kind, SqlParam,
};

/// Rows fetched per keyset page during LOB passes. Bounds peak memory to
/// one page of values per open source.
const LOB_PAGE_SIZE: i64 = 50;

pub(crate) struct PgQuickSource {
    session: Arc<PgSession>,
    ids: Vec<String>,
    columns: Vec<String>,
    last_id: Option<String>,
}

impl PgQuickSource {
    pub(crate) fn new(session: Arc<PgSession>, ids: Vec<String>, columns: Vec<String>) -> Self {
        Self {
            session,
            ids,
            columns,
            last_id: None,
        }
    }
}

#[async_trait]
impl RowSource<QuickRow> for PgQuickSource {
    async fn next_page(&mut self) -> RepoResult<Vec<QuickRow>> {
        let column_list = self
            .columns
            .iter()
            .map(|c| format!("\"{}\"", escape_identifier(c)))
            .collect::<Vec<_>>()
            .join(", ");
        let continuation = if self.last_id.is_some() {
            " AND content_id > $2"
        } else {
            ""
        };
        let sql = format!(
            "SELECT content_id, {column_list} FROM record \
             WHERE content_id = ANY($1){continuation} \
             ORDER BY content_id LIMIT {LOB_PAGE_SIZE}"
        );

        let mut inner = self.session.inner.lock().await;
        let mut query = sqlx::query(&sql).bind(&self.ids);
        if let Some(ref last) = self.last_id {
            query = query.bind(last);
        }
        let rows = query
            .fetch_all(&mut inner.conn)
            .await
            .map_err(|e| RepoError::query_failed_with_source("paging quick rows", e))?;
        drop(inner);

        let mut page = Vec::with_capacity(rows.len());
        for row in &rows {
            let canonical: String = row
                .try_get("content_id")
                .map_err(|e| RepoError::query_failed_with_source("reading content_id", e))?;
            let id: ContentId = canonical
                .parse()
                .map_err(|e: reposync_model::id::ParseContentIdError| {
                    RepoError::malformed_row(e.to_string())
                })?;
            let values = self
                .columns
                .iter()
                .map(|c| (c.clone(), decode_dynamic_column(row, c)))
                .collect();
            self.last_id = Some(canonical);
            page.push(QuickRow { id, values });
        }
        Ok(page)
    }
}

pub(crate) struct PgDetailSource {
    session: Arc<PgSession>,
    ids: Vec<String>,
    attributes: Vec<String>,
    last_key: Option<(String, String, i32)>,
    /// Set after a server rejected the row-tuple comparison; the expanded
    /// boolean predicate works everywhere.
    compat_predicate: bool,
}

impl PgDetailSource {
    pub(crate) fn new(session: Arc<PgSession>, ids: Vec<String>, attributes: Vec<String>) -> Self {
        Self {
            session,
            ids,
            attributes,
            last_key: None,
            compat_predicate: false,
        }
    }

    async fn fetch_page(&mut self) -> Result<Vec<sqlx::postgres::PgRow>, sqlx::Error> {
        let sql = detail_page_sql(self.last_key.is_some(), self.compat_predicate);
        let mut inner = self.session.inner.lock().await;
        let mut query = sqlx::query(&sql).bind(&self.ids).bind(&self.attributes);
        if let Some((ref id, ref name, sort_order)) = self.last_key {
            query = query.bind(id).bind(name).bind(sort_order);
        }
        query.fetch_all(&mut inner.conn).await
    }
}

#[async_trait]
impl RowSource<DetailRow> for PgDetailSource {
    async fn next_page(&mut self) -> RepoResult<Vec<DetailRow>> {
        let rows = match self.fetch_page().await {
            Ok(rows) => rows,
            // Some servers speaking the postgres protocol reject row-tuple
            // comparison; retry the page with the expanded predicate and
            // stay on it for the rest of this source's life.
            Err(e) if !self.compat_predicate && self.last_key.is_some() => {
                debug!(error = %e, "Row-tuple continuation rejected, using expanded predicate");
                self.compat_predicate = true;
                self.fetch_page().await.map_err(|e| {
                    RepoError::query_failed_with_source("paging detail rows", e)
                })?
            }
            Err(e) => {
                return Err(RepoError::query_failed_with_source("paging detail rows", e));
            }
        };

        let mut page = Vec::with_capacity(rows.len());
        for row in &rows {
            let canonical: String = row
                .try_get("content_id")
                .map_err(|e| RepoError::query_failed_with_source("reading content_id", e))?;
            let name: String = row
                .try_get("name")
                .map_err(|e| RepoError::query_failed_with_source("reading name", e))?;
            let sort_order: i32 = row
                .try_get("sort_order")
                .map_err(|e| RepoError::query_failed_with_source("reading sort_order", e))?;
            let id: ContentId = canonical
                .parse()
                .map_err(|e: reposync_model::id::ParseContentIdError| {
                    RepoError::malformed_row(e.to_string())
                })?;
            let value = decode_value(row)?;
            self.last_key = Some((canonical, name.clone(), sort_order));
            page.push(DetailRow::new(DetailKey::new(id, name, sort_order), value));
        }
        Ok(page)
    }
}

#[async_trait]
impl LobStore for PgRepository {
    async fn open_quick_source(
        &self,
        _type_id: i64,
        ids: &[ContentId],
        columns: &[String],
    ) -> RepoResult<Box<dyn RowSource<QuickRow>>> {
        Ok(Box::new(PgQuickSource::new(
            self.session.clone(),
            ids.iter().map(ContentId::canonical).collect(),
            columns.to_vec(),
        )))
    }

    async fn open_detail_source(
        &self,
        ids: &[ContentId],
        attributes: &[String],
    ) -> RepoResult<Box<dyn RowSource<DetailRow>>> {
        Ok(Box::new(PgDetailSource::new(
            self.session.clone(),
            ids.iter().map(ContentId::canonical).collect(),
            attributes.to_vec(),
        )))
    }

    #[instrument(skip(self, ops), fields(repository = %self.display_name(), ops = ops.len()))]
    async fn apply_detail_ops(&self, ops: &[DetailOp]) -> RepoResult<DetailOpCounts> {
        let mut counts = DetailOpCounts::default();
        let mut inner = self.session.inner.lock().await;
        for op in ops {
            match op {
                DetailOp::Update(row) => {
                    let cols = encode_value(&row.value);
                    sqlx::query(
                        r"
                        UPDATE record_attribute SET
                            value_text = $4, value_long = $5, value_double = $6,
                            value_date = $7, value_blob = $8, value_link = $9
                        WHERE content_id = $1 AND name = $2 AND sort_order = $3
                        ",
                    )
                    .bind(row.key.id.canonical())
                    .bind(&row.key.attribute)
                    .bind(row.key.sort_order)
                    .bind(cols.text)
                    .bind(cols.long)
                    .bind(cols.double)
                    .bind(cols.date)
                    .bind(cols.blob)
                    .bind(cols.link)
                    .execute(&mut inner.conn)
                    .await
                    .map_err(|e| RepoError::query_failed_with_source("updating detail row", e))?;
                    counts.updated += 1;
                }
                DetailOp::Insert(row) => {
                    let cols = encode_value(&row.value);
                    sqlx::query(
                        r"
                        INSERT INTO record_attribute
                            (content_id, name, sort_order, value_text, value_long,
                             value_double, value_date, value_blob, value_link)
                        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                        ",
                    )
                    .bind(row.key.id.canonical())
                    .bind(&row.key.attribute)
                    .bind(row.key.sort_order)
                    .bind(cols.text)
                    .bind(cols.long)
                    .bind(cols.double)
                    .bind(cols.date)
                    .bind(cols.blob)
                    .bind(cols.link)
                    .execute(&mut inner.conn)
                    .await
                    .map_err(|e| RepoError::query_failed_with_source("inserting detail row", e))?;
                    counts.inserted += 1;
                }
                DetailOp::Delete(key) => {
                    sqlx::query(
                        "DELETE FROM record_attribute \
                         WHERE content_id = $1 AND name = $2 AND sort_order = $3",
                    )
                    .bind(key.id.canonical())
                    .bind(&key.attribute)
                    .bind(key.sort_order)
                    .execute(&mut inner.conn)
                    .await
                    .map_err(|e| RepoError::query_failed_with_source("deleting detail row", e))?;
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
        if values.is_empty() {
            return Ok(());
        }
        let mut sets = Vec::new();
        let mut params: Vec<SqlParam> = Vec::new();
        for (column, value) in values {
            match param_for_value(value) {
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
        params.push(SqlParam::Text(id.canonical()));

        let mut inner = self.session.inner.lock().await;
        bind_params!(sqlx::query(&sql), &params)
            .execute(&mut inner.conn)
            .await
            .map_err(|e| RepoError::query_failed_with_source("updating quick row", e))?;
        Ok(())
    }

    async fn recompute_quick_column(
        &self,
        ids: &[ContentId],
        attribute: &AttributeType,
    ) -> RepoResult<()> {
        let quick_column =
            attribute
                .quick_column
                .as_deref()
                .ok_or_else(|| RepoError::InvalidConfiguration {
                    message: format!(
                        "attribute '{}' has no quick column to recompute",
                        attribute.name
                    ),
                })?;
        let value_column = value_column_for_kind(attribute.kind);
        let sql = format!(
            "UPDATE record r SET \"{}\" = (\
                 SELECT ra.{value_column} FROM record_attribute ra \
                 WHERE ra.content_id = r.content_id AND ra.name = $1 \
                   AND ra.sort_order = 0 LIMIT 1) \
             WHERE r.content_id = ANY($2)",
            escape_identifier(quick_column)
        );
        let canonical: Vec<String> = ids.iter().map(ContentId::canonical).collect();

        let mut inner = self.session.inner.lock().await;
        sqlx::query(&sql)
            .bind(&attribute.name)
            .bind(&canonical)
            .execute(&mut inner.conn)
            .await
            .map_err(|e| RepoError::query_failed_with_source("recomputing quick column", e))?;
        Ok(())
    }
}

/// SQL for one detail-row page, with or without keyset continuation, in
/// row-tuple or expanded-predicate form.
fn detail_page_sql(continue_after_key: bool, compat_predicate: bool) -> String {
    let continuation = match (continue_after_key, compat_predicate) {
        (false, _) => "",
        (true, false) => " AND (content_id, name, sort_order) > ($3, $4, $5)",
        (true, true) => {
            " AND (content_id > $3 OR (content_id = $3 AND (name > $4 \
             OR (name = $4 AND sort_order > $5))))"
        }
    };
    format!(
        "SELECT content_id, name, sort_order, value_text, value_long, value_double, \
                value_date, value_blob, value_link \
         FROM record_attribute \
         WHERE content_id = ANY($1) AND name = ANY($2){continuation} \
         ORDER BY content_id, name, sort_order LIMIT {LOB_PAGE_SIZE}"
    )
}
