//! # reposync domain model
//!
//! Schema, record, filter, and channel types shared by the repository layer
//! and the synchronization engine.
//!
//! ## Crate Organization
//!
//! - [`id`] - Portable record identifiers (`ContentId`)
//! - [`schema`] - Object/attribute types and the comparison policy
//! - [`record`] - Records and attribute values
//! - [`filter`] - Structural record filters
//! - [`channel`] - Channel trees for multi-channel repositories

pub mod channel;
pub mod filter;
pub mod id;
pub mod record;
pub mod schema;

/// Prelude module for convenient imports.
///
/// ```
/// use reposync_model::prelude::*;
/// ```
pub mod prelude {
    pub use crate::channel::Channel;
    pub use crate::filter::Filter;
    pub use crate::id::{ContentId, ParseContentIdError};
    pub use crate::record::{AttrValue, Record};
    pub use crate::schema::{
        AttributeKind, AttributeType, ObjectType, SchemaComparisonPolicy,
    };
}
