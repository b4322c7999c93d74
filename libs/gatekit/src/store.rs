//! Store and encryption seams.
//!
//! The engine never talks to a concrete database. It hands compiled
//! [`StoreQuery`] plans and validated documents to a [`DocumentStore`],
//! and plaintext of `encrypted` fields to an [`Encryptor`]. Both seams
//! are async traits implemented by the embedding application.

use async_trait::async_trait;
use gatekit_query::{FilterNode, StoreQuery};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

/// A stored document: a JSON object keyed by store-native field names.
pub type Document = Map<String, Value>;

/// Infrastructure faults from the document store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("malformed document: {0}")]
    Malformed(String),
}

/// Async seam to the document store.
///
/// `find` executes a compiled read plan (filter, sort, cursor bound,
/// direction, projection, limit). `update` applies a validated diff to
/// one document and returns the stored result, or `None` when the
/// document vanished between load and write.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn find(&self, resource: &str, query: &StoreQuery) -> Result<Vec<Document>, StoreError>;

    async fn find_one(
        &self,
        resource: &str,
        filter: &FilterNode,
    ) -> Result<Option<Document>, StoreError>;

    async fn insert(&self, resource: &str, document: Document) -> Result<Document, StoreError>;

    async fn update(
        &self,
        resource: &str,
        id: Uuid,
        changes: Document,
    ) -> Result<Option<Document>, StoreError>;

    async fn remove(&self, resource: &str, filter: &FilterNode) -> Result<bool, StoreError>;
}

/// Failure from the encryption seam, surfaced as a server error.
#[derive(Debug, Error)]
#[error("encryption failed: {0}")]
pub struct EncryptError(pub String);

/// Opaque encryption seam for fields flagged `encrypted`.
#[async_trait]
pub trait Encryptor: Send + Sync {
    async fn encrypt(&self, plaintext: &str) -> Result<String, EncryptError>;
}
