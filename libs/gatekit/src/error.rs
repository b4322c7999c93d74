//! Engine error type.

use thiserror::Error;

use crate::directory::DirectoryError;
use crate::store::{EncryptError, StoreError};

/// Errors surfaced by the write and read pipelines.
///
/// Field-level failures carry the offending field's path. Infrastructure
/// faults (store, directory, encryption) are preserved as sources rather
/// than flattened into strings.
#[derive(Debug, Error)]
pub enum Error {
    /// A field failed type, shape, enum or length validation.
    #[error("invalid field '{field}': {reason}")]
    InvalidField { field: String, reason: String },

    /// A required field is absent from the payload.
    #[error("missing required field '{0}'")]
    MissingField(String),

    /// The read request failed filter/sort/cursor/projection validation.
    #[error(transparent)]
    Query(#[from] gatekit_query::Error),

    /// No acting principal where one is required.
    #[error("unauthorized")]
    Unauthorized,

    /// The target document does not exist, or its identity is malformed.
    #[error("not found")]
    NotFound,

    /// Required server-side configuration is missing or inconsistent.
    #[error("invalid server state: {0}")]
    InvalidServerState(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Directory(#[from] DirectoryError),
}

impl Error {
    pub(crate) fn invalid_field(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

impl From<EncryptError> for Error {
    fn from(err: EncryptError) -> Self {
        Self::InvalidServerState(err.to_string())
    }
}
