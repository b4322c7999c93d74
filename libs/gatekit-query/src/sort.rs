//! Sort normalization and compound-index matching.
//!
//! Normalization yields an ordered key list ending in the identity field,
//! so every page walk follows a strict total order. The list must then be
//! served by a declared compound index, in declared or fully reversed
//! direction.

use gatekit_schema::{SchemaMetadataProvider, SortDir, SortKey};
use serde_json::Value;

use crate::Error;

/// Normalize a raw sort object.
///
/// An absent or empty sort falls back to the schema's default. `id` renames
/// to the identity field, which is always sortable; every other key must
/// name a field flagged sortable, with the integer direction `1` or `-1`.
/// When the identity field is missing it is appended as the final
/// tiebreaker, taking the last explicit key's direction.
///
/// # Errors
///
/// Returns [`Error::InvalidSort`] when the sort is not an object, a
/// direction is not `1`/`-1`, a key is unknown, not sortable, or appears
/// twice after renaming.
pub fn normalize_sort(
    raw: Option<&Value>,
    schema: &dyn SchemaMetadataProvider,
) -> Result<Vec<SortKey>, Error> {
    let Some(raw) = raw else {
        return Ok(schema.default_sort());
    };
    let Value::Object(map) = raw else {
        return Err(Error::InvalidSort("expected an object".to_owned()));
    };
    if map.is_empty() {
        return Ok(schema.default_sort());
    }

    let identity = schema.identity_field();
    let mut keys: Vec<SortKey> = Vec::with_capacity(map.len() + 1);
    for (field, value) in map {
        let dir = value
            .as_i64()
            .and_then(SortDir::from_int)
            .ok_or_else(|| Error::InvalidSort(format!("'{field}' direction must be 1 or -1")))?;
        let name = if field == "id" || field == identity {
            identity
        } else {
            let Some(descriptor) = schema.field(field) else {
                return Err(Error::InvalidSort(format!("unknown field '{field}'")));
            };
            if !descriptor.sortable() {
                return Err(Error::InvalidSort(format!("'{field}' is not sortable")));
            }
            field.as_str()
        };
        if keys.iter().any(|k| k.field == name) {
            return Err(Error::InvalidSort(format!("duplicate key '{name}'")));
        }
        keys.push(SortKey::new(name, dir));
    }

    if !keys.iter().any(|k| k.field == identity) {
        let dir = keys.last().map_or(SortDir::Desc, |k| k.dir);
        keys.push(SortKey::new(identity, dir));
    }
    Ok(keys)
}

/// Reject sort orders no declared compound index can serve.
///
/// # Errors
///
/// Returns [`Error::InvalidSort`] when no index matches the order or its
/// full reverse.
pub fn match_index(sort: &[SortKey], schema: &dyn SchemaMetadataProvider) -> Result<(), Error> {
    if schema
        .compound_indexes()
        .iter()
        .any(|index| index.supports(sort))
    {
        Ok(())
    } else {
        Err(Error::InvalidSort(
            "no compound index serves the requested order".to_owned(),
        ))
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use gatekit_schema::{CompoundIndex, FieldDescriptor, FieldKind, ResourceSchema};
    use serde_json::json;

    fn schema() -> ResourceSchema {
        ResourceSchema::builder("listings")
            .field(
                FieldDescriptor::builder("updatedAt", FieldKind::Timestamp)
                    .sortable()
                    .build(),
            )
            .field(
                FieldDescriptor::builder("name", FieldKind::String)
                    .sortable()
                    .build(),
            )
            .field(
                FieldDescriptor::builder("title", FieldKind::String)
                    .searchable()
                    .build(),
            )
            .index(CompoundIndex::of(&[
                ("updatedAt", SortDir::Desc),
                ("_id", SortDir::Desc),
            ]))
            .index(CompoundIndex::of(&[
                ("name", SortDir::Asc),
                ("_id", SortDir::Asc),
            ]))
            .build()
            .unwrap()
    }

    #[test]
    fn test_absent_sort_uses_default() {
        let keys = normalize_sort(None, &schema()).unwrap();
        assert_eq!(keys, vec![SortKey::desc("updatedAt"), SortKey::desc("_id")]);
    }

    #[test]
    fn test_empty_sort_uses_default() {
        let keys = normalize_sort(Some(&json!({})), &schema()).unwrap();
        assert_eq!(keys, vec![SortKey::desc("updatedAt"), SortKey::desc("_id")]);
    }

    #[test]
    fn test_appends_identity_with_last_direction() {
        let keys = normalize_sort(Some(&json!({"updatedAt": 1})), &schema()).unwrap();
        assert_eq!(keys, vec![SortKey::asc("updatedAt"), SortKey::asc("_id")]);

        let keys = normalize_sort(Some(&json!({"name": -1})), &schema()).unwrap();
        assert_eq!(keys, vec![SortKey::desc("name"), SortKey::desc("_id")]);
    }

    #[test]
    fn test_identity_appears_exactly_once() {
        let keys = normalize_sort(Some(&json!({"id": -1, "updatedAt": 1})), &schema()).unwrap();
        let identity_keys = keys.iter().filter(|k| k.field == "_id").count();
        assert_eq!(identity_keys, 1);
        assert_eq!(keys[0], SortKey::desc("_id"));
    }

    #[test]
    fn test_id_renames_and_dedupes() {
        let err = normalize_sort(Some(&json!({"id": 1, "_id": 1})), &schema()).unwrap_err();
        assert!(matches!(err, Error::InvalidSort(m) if m.contains("duplicate")));
    }

    #[test]
    fn test_rejects_bad_direction() {
        for bad in [
            json!({"updatedAt": 0}),
            json!({"updatedAt": 2}),
            json!({"updatedAt": "desc"}),
        ] {
            let err = normalize_sort(Some(&bad), &schema()).unwrap_err();
            assert!(matches!(err, Error::InvalidSort(_)));
        }
    }

    #[test]
    fn test_rejects_unsortable_field() {
        // Searchable but not sortable.
        let err = normalize_sort(Some(&json!({"title": 1})), &schema()).unwrap_err();
        assert!(matches!(err, Error::InvalidSort(m) if m.contains("not sortable")));
    }

    #[test]
    fn test_rejects_unknown_field() {
        let err = normalize_sort(Some(&json!({"missing": 1})), &schema()).unwrap_err();
        assert!(matches!(err, Error::InvalidSort(m) if m.contains("unknown")));
    }

    #[test]
    fn test_match_index_accepts_declared_and_reversed() {
        let schema = schema();
        assert!(match_index(&[SortKey::desc("updatedAt"), SortKey::desc("_id")], &schema).is_ok());
        assert!(match_index(&[SortKey::asc("updatedAt"), SortKey::asc("_id")], &schema).is_ok());
    }

    #[test]
    fn test_match_index_rejects_unindexed_order() {
        let schema = schema();
        let err = match_index(
            &[SortKey::asc("name"), SortKey::desc("_id")],
            &schema,
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidSort(_)));
    }
}
