#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
//! Schema-driven access control and request validation for document
//! resources.
//!
//! The engine interprets [`gatekit_schema`] definitions per request:
//! writes run every field through its declared validators and resolvers
//! in dependency order, reads are compiled by [`gatekit_query`] and
//! scoped to the acting principal before the store sees them. The store
//! and the encryption backend stay behind async seams; the directory of
//! groups, tiers and users sits behind a read-through cache.

pub mod context;
pub mod directory;
pub mod error;
pub mod permission;
pub mod pipeline;
pub mod store;

mod requires;
mod resolve;
mod validate;

pub use context::{Caller, RequestContext, SearchRequest, is_absent};
pub use directory::{
    ADMIN_GROUP, ANONYMOUS_GROUP, BASIC_TIER, Directory, DirectoryBackend, DirectoryConfig,
    DirectoryError, DirectoryKey, GroupRecord, PUBLIC_GROUP, TierRecord, UNLIMITED_TIER,
    UserRecord,
};
pub use error::Error;
pub use permission::PermissionEngine;
pub use pipeline::{ResourcePipeline, Services};
pub use store::{Document, DocumentStore, EncryptError, Encryptor, StoreError};
