//! Per-request state threaded through the pipeline.

use gatekit_query::{QueryRequest, StoreQuery};
use gatekit_schema::SchemaMetadataProvider;
use serde_json::Value;
use uuid::Uuid;

use crate::error::Error;
use crate::store::Document;

/// The authenticated principal acting on a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub id: Uuid,
    pub email: String,
    pub groups: Vec<Uuid>,
}

impl Caller {
    #[must_use]
    pub fn new(id: Uuid, email: impl Into<String>) -> Self {
        Self {
            id,
            email: email.into(),
            groups: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_groups(mut self, groups: Vec<Uuid>) -> Self {
        self.groups = groups;
        self
    }

    #[must_use]
    pub fn is_member(&self, group: Uuid) -> bool {
        self.groups.contains(&group)
    }
}

/// Raw read-request inputs, exactly as received.
#[derive(Debug, Default, Clone)]
pub struct SearchRequest {
    pub filter: Option<Value>,
    pub sort: Option<Value>,
    pub cursor: Option<Value>,
    pub fields: Option<Value>,
    pub direction: Option<i64>,
    pub count: Option<u64>,
}

impl SearchRequest {
    #[must_use]
    pub fn as_query(&self) -> QueryRequest<'_> {
        QueryRequest {
            filter: self.filter.as_ref(),
            sort: self.sort.as_ref(),
            cursor: self.cursor.as_ref(),
            fields: self.fields.as_ref(),
            direction: self.direction,
            count: self.count,
        }
    }
}

/// Mutable request context. Inputs are filled by the transport layer;
/// the pipeline stamps `found`, `validated` and `query` as it runs.
#[derive(Debug, Default)]
pub struct RequestContext {
    pub caller: Option<Caller>,
    /// Write payload for create and update.
    pub payload: Document,
    /// Server-trusted overrides, consulted by resolvers before the payload.
    pub overrides: Document,
    /// Raw identity of the target document, unparsed.
    pub id: Option<String>,
    /// Read-path inputs.
    pub search: SearchRequest,
    /// Stored document loaded during update.
    pub found: Option<Document>,
    /// Validated write diff produced by create or update.
    pub validated: Option<Document>,
    /// Compiled read plan produced by find.
    pub query: Option<StoreQuery>,
}

impl RequestContext {
    #[must_use]
    pub fn create(caller: Option<Caller>, payload: Document) -> Self {
        Self {
            caller,
            payload,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn update(caller: Option<Caller>, id: impl Into<String>, payload: Document) -> Self {
        Self {
            caller,
            payload,
            id: Some(id.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn search(caller: Option<Caller>, search: SearchRequest) -> Self {
        Self {
            caller,
            search,
            ..Self::default()
        }
    }

    /// Context for operations addressing one document by id (remove,
    /// fetch-by-id).
    #[must_use]
    pub fn target(caller: Option<Caller>, id: impl Into<String>) -> Self {
        Self {
            caller,
            id: Some(id.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn submitted(&self, field: &str) -> Option<&Value> {
        self.payload.get(field)
    }

    #[must_use]
    pub fn override_value(&self, field: &str) -> Option<&Value> {
        self.overrides.get(field)
    }

    #[must_use]
    pub fn stored(&self) -> Option<&Document> {
        self.found.as_ref()
    }

    #[must_use]
    pub fn stored_value(&self, field: &str) -> Option<&Value> {
        self.found.as_ref().and_then(|doc| doc.get(field))
    }
}

/// Per-field view handed to validators and resolvers. `payload` is the
/// working payload as of the field's dependency layer.
#[derive(Clone, Copy)]
pub(crate) struct FieldCx<'a> {
    pub(crate) field: &'a str,
    pub(crate) schema: &'a dyn SchemaMetadataProvider,
    pub(crate) caller: Option<&'a Caller>,
    pub(crate) payload: &'a Document,
    pub(crate) overrides: &'a Document,
    pub(crate) stored: Option<&'a Document>,
    pub(crate) updating: bool,
}

impl<'a> FieldCx<'a> {
    pub(crate) fn invalid(&self, reason: impl Into<String>) -> Error {
        Error::invalid_field(self.field, reason)
    }

    pub(crate) fn submitted(&self) -> Option<&'a Value> {
        self.payload.get(self.field)
    }

    pub(crate) fn sibling(&self, field: &str) -> Option<&'a Value> {
        self.payload.get(field)
    }

    pub(crate) fn stored_value(&self) -> Option<&'a Value> {
        self.stored.and_then(|doc| doc.get(self.field))
    }

    pub(crate) fn stored_field(&self, field: &str) -> Option<&'a Value> {
        self.stored.and_then(|doc| doc.get(field))
    }

    pub(crate) fn override_value(&self) -> Option<&'a Value> {
        self.overrides.get(self.field)
    }
}

/// A value counts as absent when missing, null, an empty string or an
/// empty array.
#[must_use]
pub fn is_absent(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(text)) => text.is_empty(),
        Some(Value::Array(items)) => items.is_empty(),
        Some(_) => false,
    }
}
