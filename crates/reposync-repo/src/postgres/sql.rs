//! Filter-to-SQL translation and value codecs for the PostgreSQL backend.

use sqlx::postgres::PgRow;
use sqlx::Row;

use reposync_model::filter::Filter;
use reposync_model::id::ContentId;
use reposync_model::record::AttrValue;
use reposync_model::schema::AttributeKind;

use crate::error::{RepoError, RepoResult};

/// A positional query parameter.
#[derive(Debug, Clone)]
pub enum SqlParam {
    /// Text parameter.
    Text(String),
    /// 64-bit integer parameter.
    Long(i64),
    /// Floating point parameter.
    Double(f64),
    /// Byte array parameter.
    Bytes(Vec<u8>),
    /// text[] parameter, used for id sets.
    TextArray(Vec<String>),
}

/// Bind all collected parameters onto a query in order.
macro_rules! bind_params {
    ($query:expr, $params:expr) => {{
        let mut q = $query;
        for p in $params {
            q = match p {
                $crate::postgres::sql::SqlParam::Text(v) => q.bind(v),
                $crate::postgres::sql::SqlParam::Long(v) => q.bind(v),
                $crate::postgres::sql::SqlParam::Double(v) => q.bind(v),
                $crate::postgres::sql::SqlParam::Bytes(v) => q.bind(v),
                $crate::postgres::sql::SqlParam::TextArray(v) => q.bind(v),
            };
        }
        q
    }};
}
pub(crate) use bind_params;

/// Escape a SQL identifier for embedding between double quotes.
pub fn escape_identifier(identifier: &str) -> String {
    identifier.replace('"', "\"\"")
}

/// Convert a [`Filter`] to a SQL predicate over the `record` table (aliased
/// `r`), collecting positional parameters.
///
/// `Raw` fragments come from the trusted rule compiler and are embedded
/// verbatim; nothing user-controlled reaches this function unparsed.
pub fn filter_to_sql(filter: &Filter, params: &mut Vec<SqlParam>) -> RepoResult<String> {
    Ok(match filter {
        Filter::And(filters) => {
            let clauses = filters
                .iter()
                .map(|f| filter_to_sql(f, params))
                .collect::<RepoResult<Vec<_>>>()?;
            format!("({})", clauses.join(" AND "))
        }
        Filter::Or(filters) => {
            let clauses = filters
                .iter()
                .map(|f| filter_to_sql(f, params))
                .collect::<RepoResult<Vec<_>>>()?;
            format!("({})", clauses.join(" OR "))
        }
        Filter::Not(inner) => {
            format!("NOT {}", filter_to_sql(inner, params)?)
        }
        Filter::TypeIs(type_id) => {
            params.push(SqlParam::Long(*type_id));
            format!("r.type_id = ${}", params.len())
        }
        Filter::UpdatedAfter(ts) => {
            params.push(SqlParam::Long(*ts));
            format!("r.update_timestamp > ${}", params.len())
        }
        Filter::UpdatedAtOrBefore(ts) => {
            params.push(SqlParam::Long(*ts));
            format!("r.update_timestamp <= ${}", params.len())
        }
        Filter::ChannelIs(channel) => {
            params.push(SqlParam::Long(*channel));
            format!("r.channel_id = ${}", params.len())
        }
        Filter::IdIn(ids) => {
            if ids.is_empty() {
                // An empty id set matches nothing.
                return Ok("FALSE".to_string());
            }
            params.push(SqlParam::TextArray(
                ids.iter().map(ContentId::canonical).collect(),
            ));
            format!("r.content_id = ANY(${})", params.len())
        }
        Filter::AttributeEquals { attribute, value } => {
            params.push(SqlParam::Text(attribute.clone()));
            let name_idx = params.len();
            params.push(SqlParam::Text(value.clone()));
            let value_idx = params.len();
            format!(
                "EXISTS (SELECT 1 FROM record_attribute fa \
                 WHERE fa.content_id = r.content_id AND fa.name = ${name_idx} \
                 AND fa.value_text = ${value_idx})"
            )
        }
        Filter::Raw(fragment) => format!("({fragment})"),
    })
}

/// Which `record_attribute` value column a kind is stored in.
pub fn value_column_for_kind(kind: AttributeKind) -> &'static str {
    match kind {
        AttributeKind::Text | AttributeKind::LongText => "value_text",
        AttributeKind::Integer | AttributeKind::Long => "value_long",
        AttributeKind::Double => "value_double",
        AttributeKind::Date => "value_date",
        AttributeKind::Binary | AttributeKind::Blob => "value_blob",
        AttributeKind::LinkObject | AttributeKind::ForeignLink => "value_link",
    }
}

/// The SQL column type for a quick column holding values of a kind.
pub fn quick_column_sql_type(kind: AttributeKind) -> &'static str {
    match kind {
        AttributeKind::Text | AttributeKind::LongText | AttributeKind::LinkObject
        | AttributeKind::ForeignLink => "TEXT",
        AttributeKind::Integer | AttributeKind::Long | AttributeKind::Date => "BIGINT",
        AttributeKind::Double => "DOUBLE PRECISION",
        AttributeKind::Binary | AttributeKind::Blob => "BYTEA",
    }
}

/// Split an attribute value into the five nullable value columns
/// `(text, long, double, date_, blob, link)` for binding.
pub struct ValueColumns {
    pub text: Option<String>,
    pub long: Option<i64>,
    pub double: Option<f64>,
    pub date: Option<i64>,
    pub blob: Option<Vec<u8>>,
    pub link: Option<String>,
}

/// Encode a value for the detail-row value columns.
pub fn encode_value(value: &AttrValue) -> ValueColumns {
    let mut cols = ValueColumns {
        text: None,
        long: None,
        double: None,
        date: None,
        blob: None,
        link: None,
    };
    match value {
        AttrValue::Text(s) => cols.text = Some(s.clone()),
        AttrValue::Long(v) => cols.long = Some(*v),
        AttrValue::Double(v) => cols.double = Some(*v),
        AttrValue::Date(v) => cols.date = Some(*v),
        AttrValue::Binary(b) => cols.blob = Some(b.clone()),
        AttrValue::Link(id) => cols.link = Some(id.canonical()),
        AttrValue::Null => {}
    }
    cols
}

/// Parameter for a single attribute value, `None` meaning SQL NULL.
pub fn param_for_value(value: &AttrValue) -> Option<SqlParam> {
    match value {
        AttrValue::Text(s) => Some(SqlParam::Text(s.clone())),
        AttrValue::Long(v) | AttrValue::Date(v) => Some(SqlParam::Long(*v)),
        AttrValue::Double(v) => Some(SqlParam::Double(*v)),
        AttrValue::Binary(b) => Some(SqlParam::Bytes(b.clone())),
        AttrValue::Link(id) => Some(SqlParam::Text(id.canonical())),
        AttrValue::Null => None,
    }
}

/// Decode a detail row's value columns back into an [`AttrValue`].
///
/// Exactly one column is non-null for a stored value; all-null means an
/// explicit null placeholder in a multivalue sequence.
pub fn decode_value(row: &PgRow) -> RepoResult<AttrValue> {
    if let Some(link) = row
        .try_get::<Option<String>, _>("value_link")
        .map_err(|e| RepoError::query_failed_with_source("reading value_link", e))?
    {
        let id = link
            .parse::<ContentId>()
            .map_err(|e| RepoError::malformed_row(e.to_string()))?;
        return Ok(AttrValue::Link(id));
    }
    if let Some(text) = row
        .try_get::<Option<String>, _>("value_text")
        .map_err(|e| RepoError::query_failed_with_source("reading value_text", e))?
    {
        return Ok(AttrValue::Text(text));
    }
    if let Some(v) = row
        .try_get::<Option<i64>, _>("value_long")
        .map_err(|e| RepoError::query_failed_with_source("reading value_long", e))?
    {
        return Ok(AttrValue::Long(v));
    }
    if let Some(v) = row
        .try_get::<Option<f64>, _>("value_double")
        .map_err(|e| RepoError::query_failed_with_source("reading value_double", e))?
    {
        return Ok(AttrValue::Double(v));
    }
    if let Some(v) = row
        .try_get::<Option<i64>, _>("value_date")
        .map_err(|e| RepoError::query_failed_with_source("reading value_date", e))?
    {
        return Ok(AttrValue::Date(v));
    }
    if let Some(b) = row
        .try_get::<Option<Vec<u8>>, _>("value_blob")
        .map_err(|e| RepoError::query_failed_with_source("reading value_blob", e))?
    {
        return Ok(AttrValue::Binary(b));
    }
    Ok(AttrValue::Null)
}

/// Decode a dynamically-named column into an [`AttrValue`], trying each
/// representation in turn the way quick columns are typed.
pub fn decode_dynamic_column(row: &PgRow, column: &str) -> AttrValue {
    if let Ok(Some(v)) = row.try_get::<Option<String>, _>(column) {
        return AttrValue::Text(v);
    }
    if let Ok(Some(v)) = row.try_get::<Option<i64>, _>(column) {
        return AttrValue::Long(v);
    }
    if let Ok(Some(v)) = row.try_get::<Option<f64>, _>(column) {
        return AttrValue::Double(v);
    }
    if let Ok(Some(v)) = row.try_get::<Option<Vec<u8>>, _>(column) {
        return AttrValue::Binary(v);
    }
    AttrValue::Null
}
