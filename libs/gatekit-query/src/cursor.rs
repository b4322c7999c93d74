//! Cursor parsing and validation for keyset pagination.
//!
//! A cursor carries the sort-key values of the last document seen, under a
//! single `min` or `max` bound. Its field set must equal the normalized
//! sort's field set exactly, and every value must fit its field's kind and
//! is cast to the store's canonical representation. Both the structured
//! `{min: {...}}`/`{max: {...}}` object form and an opaque base64url token
//! form are accepted.

use chrono::{DateTime, SecondsFormat, Utc};
use gatekit_schema::{FieldDescriptor, FieldKind, SchemaMetadataProvider, SortKey};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::Error;

/// Which side of the sort order the cursor bounds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CursorBound {
    Min,
    Max,
}

impl CursorBound {
    #[must_use]
    pub fn key(self) -> &'static str {
        match self {
            Self::Min => "min",
            Self::Max => "max",
        }
    }
}

/// Validated keyset cursor, values ordered by the normalized sort.
#[derive(Clone, Debug, PartialEq)]
pub struct Cursor {
    bound: CursorBound,
    fields: Vec<(String, Value)>,
}

impl Cursor {
    #[must_use]
    pub fn new(bound: CursorBound, fields: Vec<(String, Value)>) -> Self {
        Self { bound, fields }
    }

    #[must_use]
    pub fn bound(&self) -> CursorBound {
        self.bound
    }

    #[must_use]
    pub fn fields(&self) -> &[(String, Value)] {
        &self.fields
    }

    fn body(&self) -> Map<String, Value> {
        let mut body = Map::new();
        for (field, value) in &self.fields {
            body.insert(field.clone(), value.clone());
        }
        body
    }

    /// Structured wire form, `{"min": {...}}` or `{"max": {...}}`.
    #[must_use]
    pub fn to_json(&self) -> Value {
        let mut wire = Map::new();
        wire.insert(self.bound.key().to_owned(), Value::Object(self.body()));
        Value::Object(wire)
    }

    /// Encode to an opaque base64url token.
    ///
    /// # Errors
    ///
    /// Returns a JSON serialization error if encoding fails.
    pub fn encode(&self) -> serde_json::Result<String> {
        let mut wire = Map::new();
        wire.insert("v".to_owned(), Value::from(1));
        wire.insert(self.bound.key().to_owned(), Value::Object(self.body()));
        serde_json::to_vec(&Value::Object(wire)).map(|bytes| base64_url::encode(&bytes))
    }
}

/// Validate a raw cursor against the normalized sort.
///
/// `id` keys rename to the identity field. The cursor's field set must
/// equal the sort's field set; each value is validated and cast per the
/// field's kind (identifiers parse as UUIDs, timestamps normalize to
/// RFC 3339 UTC with millisecond precision).
///
/// # Errors
///
/// Returns [`Error::InvalidCursor`] for a malformed token, a missing or
/// stray bound key, a field set differing from the sort, or a value that
/// does not fit its field's kind.
pub fn parse_cursor(
    raw: Option<&Value>,
    sort: &[SortKey],
    schema: &dyn SchemaMetadataProvider,
) -> Result<Option<Cursor>, Error> {
    let Some(raw) = raw else {
        return Ok(None);
    };

    let decoded;
    let raw = match raw {
        Value::String(token) => {
            decoded = decode_token(token)?;
            &decoded
        }
        other => other,
    };
    let Value::Object(map) = raw else {
        return Err(Error::InvalidCursor(
            "expected an object or a token".to_owned(),
        ));
    };

    let (bound, body) = match (map.get("min"), map.get("max")) {
        (Some(body), None) if map.len() == 1 => (CursorBound::Min, body),
        (None, Some(body)) if map.len() == 1 => (CursorBound::Max, body),
        (Some(_), Some(_)) => {
            return Err(Error::InvalidCursor(
                "cannot carry both min and max".to_owned(),
            ));
        }
        _ => {
            return Err(Error::InvalidCursor(
                "must carry exactly one of min or max".to_owned(),
            ));
        }
    };
    let Value::Object(body) = body else {
        return Err(Error::InvalidCursor("bound must be an object".to_owned()));
    };

    let identity = schema.identity_field();
    if body.contains_key("id") && body.contains_key(identity) {
        return Err(Error::InvalidCursor(format!(
            "carries both 'id' and '{identity}'"
        )));
    }

    for key in body.keys() {
        let canonical = if key == "id" { identity } else { key.as_str() };
        if !sort.iter().any(|k| k.field == canonical) {
            return Err(Error::InvalidCursor(format!(
                "'{key}' is not part of the sort"
            )));
        }
    }

    let mut fields = Vec::with_capacity(sort.len());
    for key in sort {
        let supplied = if key.field == identity {
            body.get(identity).or_else(|| body.get("id"))
        } else {
            body.get(&key.field)
        };
        let Some(value) = supplied else {
            return Err(Error::InvalidCursor(format!("missing '{}'", key.field)));
        };
        let cast = if key.field == identity {
            cast_value(&key.field, FieldKind::Reference, value)?
        } else {
            match schema.field(&key.field).map(FieldDescriptor::kind) {
                Some(kind) => cast_value(&key.field, kind, value)?,
                None => value.clone(),
            }
        };
        fields.push((key.field.clone(), cast));
    }

    Ok(Some(Cursor { bound, fields }))
}

/// Validate one bound value and cast it to canonical form.
fn cast_value(field: &str, kind: FieldKind, value: &Value) -> Result<Value, Error> {
    let invalid = || Error::InvalidCursor(format!("'{field}' carries an invalid value"));
    match kind {
        FieldKind::Reference => {
            let id = value
                .as_str()
                .and_then(|s| Uuid::parse_str(s).ok())
                .ok_or_else(invalid)?;
            Ok(Value::String(id.to_string()))
        }
        FieldKind::Timestamp => {
            let instant = if let Some(ms) = value.as_i64() {
                DateTime::from_timestamp_millis(ms).ok_or_else(invalid)?
            } else {
                let text = value.as_str().ok_or_else(invalid)?;
                DateTime::parse_from_rfc3339(text)
                    .map_err(|_| invalid())?
                    .with_timezone(&Utc)
            };
            Ok(Value::String(
                instant.to_rfc3339_opts(SecondsFormat::Millis, true),
            ))
        }
        FieldKind::String => {
            let text = value.as_str().ok_or_else(invalid)?;
            if text.is_empty() {
                return Err(invalid());
            }
            Ok(value.clone())
        }
        FieldKind::Number => {
            if value.is_number() {
                Ok(value.clone())
            } else {
                Err(invalid())
            }
        }
        FieldKind::Boolean => {
            if value.is_boolean() {
                Ok(value.clone())
            } else {
                Err(invalid())
            }
        }
        FieldKind::Array | FieldKind::Object => Err(invalid()),
    }
}

fn decode_token(token: &str) -> Result<Value, Error> {
    let bytes = base64_url::decode(token)
        .map_err(|_| Error::InvalidCursor("malformed token".to_owned()))?;
    let value: Value = serde_json::from_slice(&bytes)
        .map_err(|_| Error::InvalidCursor("malformed token payload".to_owned()))?;
    let Value::Object(mut map) = value else {
        return Err(Error::InvalidCursor("malformed token payload".to_owned()));
    };
    if map.remove("v").as_ref().and_then(Value::as_u64) == Some(1) {
        Ok(Value::Object(map))
    } else {
        Err(Error::InvalidCursor("unsupported token version".to_owned()))
    }
}

// base64url helpers (no padding)
mod base64_url {
    use base64::Engine;

    pub fn encode(bytes: &[u8]) -> String {
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
    }

    pub fn decode(s: &str) -> Result<Vec<u8>, base64::DecodeError> {
        base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(s)
    }
}
