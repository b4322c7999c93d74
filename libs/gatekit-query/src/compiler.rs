//! Read-plan compilation.
//!
//! [`QueryCompiler`] turns a raw page request into a [`StoreQuery`] the
//! store can execute, rejecting anything the schema's metadata does not
//! serve. Filter compilation is exposed separately from [`QueryCompiler::plan`]
//! so a permission clause can be attached to the filter in between.

use gatekit_schema::{SchemaMetadataProvider, SortKey};
use serde_json::Value;

use crate::Error;
use crate::cursor::{Cursor, parse_cursor};
use crate::filter::{FilterNode, compile_filter};
use crate::limits::PageLimits;
use crate::sort::{match_index, normalize_sort};

/// Traversal direction relative to the sort order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Direction {
    #[default]
    Forward,
    Backward,
}

impl Direction {
    /// Resolve the requested direction. A direction may only be given
    /// together with a cursor.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidDirection`] when a direction is requested
    /// without a cursor, or when the value is not `1` or `-1`.
    pub fn resolve(requested: Option<i64>, has_cursor: bool) -> Result<Self, Error> {
        match (requested, has_cursor) {
            (None, _) => Ok(Self::Forward),
            (Some(_), false) => Err(Error::InvalidDirection(
                "specified without a cursor".to_owned(),
            )),
            (Some(1), true) => Ok(Self::Forward),
            (Some(-1), true) => Ok(Self::Backward),
            (Some(other), true) => Err(Error::InvalidDirection(format!(
                "must be 1 or -1, got {other}"
            ))),
        }
    }

    #[must_use]
    pub fn is_backward(self) -> bool {
        matches!(self, Self::Backward)
    }
}

/// Raw page request, as received from the caller.
#[derive(Clone, Copy, Debug, Default)]
pub struct QueryRequest<'a> {
    pub filter: Option<&'a Value>,
    pub sort: Option<&'a Value>,
    pub cursor: Option<&'a Value>,
    pub fields: Option<&'a Value>,
    pub direction: Option<i64>,
    pub count: Option<u64>,
}

/// Compiled read plan, ready for the store.
#[derive(Clone, Debug, PartialEq)]
pub struct StoreQuery {
    pub filter: Option<FilterNode>,
    pub sort: Vec<SortKey>,
    pub cursor: Option<Cursor>,
    pub direction: Direction,
    pub projection: Option<Vec<String>>,
    pub limit: u64,
}

impl StoreQuery {
    /// Sort order the store should walk, with every key reversed when
    /// traversing backward.
    #[must_use]
    pub fn effective_sort(&self) -> Vec<SortKey> {
        if self.direction.is_backward() {
            self.sort
                .iter()
                .map(|key| SortKey::new(&key.field, key.dir.reverse()))
                .collect()
        } else {
            self.sort.clone()
        }
    }
}

/// Compiles page requests against a schema's query metadata.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryCompiler {
    limits: PageLimits,
}

impl QueryCompiler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_limits(limits: PageLimits) -> Self {
        Self { limits }
    }

    /// Compile the caller's filter.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidFilter`] when the filter names an
    /// unqueryable field or uses a shape the field does not allow.
    pub fn filter(
        &self,
        raw: Option<&Value>,
        schema: &dyn SchemaMetadataProvider,
    ) -> Result<Option<FilterNode>, Error> {
        compile_filter(raw, schema)
    }

    /// Compile everything after the filter: sort, index match, cursor,
    /// direction, projection and page size, in that order. The first
    /// violation aborts the plan.
    ///
    /// # Errors
    ///
    /// Returns the corresponding [`Error`] variant for the first stage
    /// that rejects the request.
    pub fn plan(
        &self,
        filter: Option<FilterNode>,
        request: &QueryRequest<'_>,
        schema: &dyn SchemaMetadataProvider,
    ) -> Result<StoreQuery, Error> {
        let sort = normalize_sort(request.sort, schema)?;
        match_index(&sort, schema)?;
        let cursor = parse_cursor(request.cursor, &sort, schema)?;
        let direction = Direction::resolve(request.direction, cursor.is_some())?;
        let projection = validate_projection(request.fields, schema)?;
        let limit = self.limits.resolve(request.count)?;
        Ok(StoreQuery {
            filter,
            sort,
            cursor,
            direction,
            projection,
            limit,
        })
    }
}

/// Validate the requested field projection. Every key must be a declared
/// field (or the identity) valued exactly `1`; `id` renames to the
/// identity field.
///
/// # Errors
///
/// Returns [`Error::InvalidProjection`] for a non-object value, an
/// undeclared field, or a value other than `1`.
pub fn validate_projection(
    raw: Option<&Value>,
    schema: &dyn SchemaMetadataProvider,
) -> Result<Option<Vec<String>>, Error> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    let Value::Object(map) = raw else {
        return Err(Error::InvalidProjection("expected an object".to_owned()));
    };
    if map.is_empty() {
        return Ok(None);
    }

    let identity = schema.identity_field();
    let mut fields = Vec::with_capacity(map.len());
    for (key, value) in map {
        if value.as_u64() != Some(1) {
            return Err(Error::InvalidProjection(format!(
                "'{key}' must be set to 1"
            )));
        }
        let canonical = if key == "id" || key == identity {
            identity
        } else if schema.field(key).is_some() {
            key.as_str()
        } else {
            return Err(Error::InvalidProjection(format!(
                "'{key}' is not a known field"
            )));
        };
        if !fields.iter().any(|f| f == canonical) {
            fields.push(canonical.to_owned());
        }
    }
    Ok(Some(fields))
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use gatekit_schema::{CompoundIndex, FieldDescriptor, FieldKind, ResourceSchema, SortDir};
    use serde_json::json;
    use uuid::Uuid;

    fn schema() -> ResourceSchema {
        ResourceSchema::builder("listings")
            .field(
                FieldDescriptor::builder("title", FieldKind::String)
                    .searchable()
                    .build(),
            )
            .field(
                FieldDescriptor::builder("price", FieldKind::Number)
                    .sortable()
                    .build(),
            )
            .field(
                FieldDescriptor::builder("updatedAt", FieldKind::Timestamp)
                    .sortable()
                    .build(),
            )
            .index(CompoundIndex::of(&[
                ("updatedAt", SortDir::Desc),
                ("_id", SortDir::Desc),
            ]))
            .index(CompoundIndex::of(&[
                ("price", SortDir::Asc),
                ("_id", SortDir::Asc),
            ]))
            .build()
            .unwrap()
    }

    #[test]
    fn test_direction_requires_cursor() {
        let err = Direction::resolve(Some(1), false).unwrap_err();
        assert!(matches!(err, Error::InvalidDirection(m) if m.contains("without a cursor")));
    }

    #[test]
    fn test_direction_values() {
        assert_eq!(Direction::resolve(None, false).unwrap(), Direction::Forward);
        assert_eq!(Direction::resolve(Some(1), true).unwrap(), Direction::Forward);
        assert_eq!(
            Direction::resolve(Some(-1), true).unwrap(),
            Direction::Backward
        );
        let err = Direction::resolve(Some(0), true).unwrap_err();
        assert!(matches!(err, Error::InvalidDirection(m) if m.contains("1 or -1")));
    }

    #[test]
    fn test_projection_renames_and_dedupes() {
        let raw = json!({"title": 1, "id": 1, "_id": 1});
        let fields = validate_projection(Some(&raw), &schema()).unwrap().unwrap();
        assert_eq!(fields, ["title", "_id"]);
    }

    #[test]
    fn test_projection_rejects_exclusions_and_unknowns() {
        let err = validate_projection(Some(&json!({"title": 0})), &schema()).unwrap_err();
        assert!(matches!(err, Error::InvalidProjection(m) if m.contains("set to 1")));

        let err = validate_projection(Some(&json!({"secret": 1})), &schema()).unwrap_err();
        assert!(matches!(err, Error::InvalidProjection(m) if m.contains("secret")));
    }

    #[test]
    fn test_empty_projection_means_no_projection() {
        assert_eq!(validate_projection(Some(&json!({})), &schema()).unwrap(), None);
    }

    #[test]
    fn test_plan_defaults() {
        let compiler = QueryCompiler::new();
        let plan = compiler
            .plan(None, &QueryRequest::default(), &schema())
            .unwrap();
        assert_eq!(
            plan.sort,
            vec![SortKey::desc("updatedAt"), SortKey::desc("_id")]
        );
        assert_eq!(plan.direction, Direction::Forward);
        assert_eq!(plan.limit, 20);
        assert!(plan.cursor.is_none());
        assert!(plan.projection.is_none());
    }

    #[test]
    fn test_plan_rejects_unindexed_sort() {
        let sort = json!({"price": -1, "updatedAt": 1});
        let request = QueryRequest {
            sort: Some(&sort),
            ..QueryRequest::default()
        };
        let err = QueryCompiler::new()
            .plan(None, &request, &schema())
            .unwrap_err();
        assert!(matches!(err, Error::InvalidSort(_)));
    }

    #[test]
    fn test_plan_with_cursor_and_direction() {
        let id = Uuid::new_v4().to_string();
        let sort = json!({"price": 1});
        let cursor = json!({"max": {"price": 150, "id": id}});
        let request = QueryRequest {
            sort: Some(&sort),
            cursor: Some(&cursor),
            direction: Some(-1),
            count: Some(50),
            ..QueryRequest::default()
        };
        let plan = QueryCompiler::new().plan(None, &request, &schema()).unwrap();
        assert_eq!(plan.direction, Direction::Backward);
        assert_eq!(plan.limit, 50);
        assert_eq!(
            plan.effective_sort(),
            vec![SortKey::desc("price"), SortKey::desc("_id")]
        );
    }

    #[test]
    fn test_plan_surfaces_count_violations() {
        let request = QueryRequest {
            count: Some(150),
            ..QueryRequest::default()
        };
        let err = QueryCompiler::new()
            .plan(None, &request, &schema())
            .unwrap_err();
        assert!(matches!(err, Error::InvalidCount(_)));
    }
}
