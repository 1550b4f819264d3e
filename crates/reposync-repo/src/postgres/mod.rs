//! PostgreSQL backend.
//!
//! Physical model, one schema per repository:
//!
//! ```sql
//! CREATE TABLE object_type (
//!     type_id            BIGINT PRIMARY KEY,
//!     name               TEXT NOT NULL,
//!     exclude_versioning BOOLEAN NOT NULL DEFAULT FALSE
//! );
//!
//! CREATE TABLE attribute_type (
//!     owner_type_id          BIGINT NOT NULL,
//!     name                   TEXT NOT NULL,
//!     kind                   TEXT NOT NULL,
//!     multivalue             BOOLEAN NOT NULL DEFAULT FALSE,
//!     optimized              BOOLEAN NOT NULL DEFAULT FALSE,
//!     quick_column           TEXT,
//!     linked_type_id         BIGINT,
//!     foreign_link_attribute TEXT,
//!     foreign_link_rule      TEXT,
//!     exclude_versioning     BOOLEAN NOT NULL DEFAULT FALSE,
//!     filesystem             BOOLEAN NOT NULL DEFAULT FALSE,
//!     PRIMARY KEY (owner_type_id, name)
//! );
//!
//! CREATE TABLE record (
//!     content_id       TEXT PRIMARY KEY,
//!     type_id          BIGINT NOT NULL,
//!     object_id        BIGINT NOT NULL,
//!     update_timestamp BIGINT NOT NULL,
//!     channel_id       BIGINT,
//!     channel_set_id   BIGINT
//!     -- plus one quick column per optimized attribute, managed by the
//!     -- schema applier
//! );
//!
//! CREATE TABLE record_attribute (
//!     id           BIGSERIAL PRIMARY KEY,
//!     content_id   TEXT NOT NULL,
//!     name         TEXT NOT NULL,
//!     sort_order   INTEGER NOT NULL,
//!     value_text   TEXT,
//!     value_long   BIGINT,
//!     value_double DOUBLE PRECISION,
//!     value_date   BIGINT,
//!     value_blob   BYTEA,
//!     value_link   TEXT,
//!     UNIQUE (content_id, name, sort_order)
//! );
//!
//! CREATE TABLE sync_status (
//!     name         TEXT PRIMARY KEY,
//!     int_value    BIGINT NOT NULL DEFAULT 0,
//!     string_value TEXT
//! );
//! ```
//!
//! Every statement of a run, reads included, goes through the single pinned
//! session, so an open transaction covers everything and paged reads see
//! the run's own writes.

mod lob;
mod repository;
pub(crate) mod sql;

pub use repository::{PgRepoConfig, PgRepository};
