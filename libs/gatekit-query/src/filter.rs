//! Filter validation and compilation.
//!
//! A raw filter is an object of `field: condition` pairs. Conditions are
//! literals, `{$in: [...]}` sets, or `{$lte, $gte}` range pairs; fields
//! carrying an element-match query shape additionally accept an object over
//! the shape's allowed keys with `$or`/`$and` combinators. Structure is
//! strict, values are not: a literal that would fail the field's own
//! validator still passes through — filters are advisory predicates, and
//! the injected permission clause bounds what they can reach.

use gatekit_schema::{FieldDescriptor, SchemaMetadataProvider};
use serde_json::{Map, Value, json};

use crate::Error;

/// Compiled, store-agnostic filter tree.
#[derive(Clone, Debug, PartialEq)]
pub enum FilterNode {
    Eq {
        field: String,
        value: Value,
    },
    In {
        field: String,
        values: Vec<Value>,
    },
    Range {
        field: String,
        lte: Option<Value>,
        gte: Option<Value>,
    },
    /// Array-element match; `inner` is expressed over element keys.
    ElemMatch {
        field: String,
        inner: Box<FilterNode>,
    },
    And(Vec<FilterNode>),
    Or(Vec<FilterNode>),
}

impl FilterNode {
    #[must_use]
    pub fn eq(field: &str, value: Value) -> Self {
        Self::Eq {
            field: field.to_owned(),
            value,
        }
    }

    /// Conjunction of `self` and `other`, flattening nested conjunctions.
    #[must_use]
    pub fn and(self, other: Self) -> Self {
        match (self, other) {
            (Self::And(mut left), Self::And(right)) => {
                left.extend(right);
                Self::And(left)
            }
            (Self::And(mut left), right) => {
                left.push(right);
                Self::And(left)
            }
            (left, Self::And(mut right)) => {
                right.insert(0, left);
                Self::And(right)
            }
            (left, right) => Self::And(vec![left, right]),
        }
    }

    /// Store-native JSON form of this tree.
    #[must_use]
    pub fn to_json(&self) -> Value {
        match self {
            Self::Eq { field, value } => json!({ (field.clone()): value }),
            Self::In { field, values } => json!({ (field.clone()): { "$in": values } }),
            Self::Range { field, lte, gte } => {
                let mut bounds = Map::new();
                if let Some(lte) = lte {
                    bounds.insert("$lte".to_owned(), lte.clone());
                }
                if let Some(gte) = gte {
                    bounds.insert("$gte".to_owned(), gte.clone());
                }
                json!({ (field.clone()): bounds })
            }
            Self::ElemMatch { field, inner } => {
                json!({ (field.clone()): { "$elemMatch": inner.to_json() } })
            }
            Self::And(children) => match children.as_slice() {
                [single] => single.to_json(),
                _ => json!({ "$and": children.iter().map(Self::to_json).collect::<Vec<_>>() }),
            },
            Self::Or(children) => match children.as_slice() {
                [single] => single.to_json(),
                _ => json!({ "$or": children.iter().map(Self::to_json).collect::<Vec<_>>() }),
            },
        }
    }
}

/// Validate and compile a raw filter object.
///
/// `id` keys are renamed to the schema's identity field, which is always
/// filterable; every other key must name a field flagged searchable or
/// sortable. Absent or empty filters compile to `None`.
///
/// # Errors
///
/// Returns [`Error::InvalidFilter`] when the filter is not an object, names
/// an unknown or unfilterable field, or uses an unsupported operator.
pub fn compile_filter(
    raw: Option<&Value>,
    schema: &dyn SchemaMetadataProvider,
) -> Result<Option<FilterNode>, Error> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    let Value::Object(map) = raw else {
        return Err(Error::InvalidFilter("expected an object".to_owned()));
    };
    if map.is_empty() {
        return Ok(None);
    }

    let identity = schema.identity_field();
    let mut clauses = Vec::with_capacity(map.len());
    for (key, value) in map {
        let clause = if key == "id" || key == identity {
            compile_clause(identity, None, value)?
        } else {
            let Some(descriptor) = schema.field(key) else {
                return Err(Error::InvalidFilter(format!("unknown field '{key}'")));
            };
            if !descriptor.searchable() && !descriptor.sortable() {
                return Err(Error::InvalidFilter(format!("'{key}' is not filterable")));
            }
            compile_clause(key, Some(descriptor), value)?
        };
        clauses.push(clause);
    }

    Ok(Some(match clauses.len() {
        1 => clauses.remove(0),
        _ => FilterNode::And(clauses),
    }))
}

fn compile_clause(
    field: &str,
    descriptor: Option<&FieldDescriptor>,
    value: &Value,
) -> Result<FilterNode, Error> {
    if let Value::Object(condition) = value {
        // A member set wins over range bounds when both are present.
        if let Some(members) = condition.get("$in") {
            let Value::Array(items) = members else {
                return Err(Error::InvalidFilter(format!(
                    "'{field}' member set must be an array"
                )));
            };
            return Ok(FilterNode::In {
                field: field.to_owned(),
                values: items.clone(),
            });
        }

        if condition.contains_key("$lte") || condition.contains_key("$gte") {
            for key in condition.keys() {
                if key != "$lte" && key != "$gte" {
                    return Err(Error::InvalidFilter(format!(
                        "'{field}' mixes range bounds with '{key}'"
                    )));
                }
            }
            return Ok(FilterNode::Range {
                field: field.to_owned(),
                lte: condition.get("$lte").cloned(),
                gte: condition.get("$gte").cloned(),
            });
        }

        if let Some(shape) = descriptor.and_then(FieldDescriptor::query) {
            let inner = compile_element(field, value, &shape.allowed)?;
            return Ok(FilterNode::ElemMatch {
                field: field.to_owned(),
                inner: Box::new(inner),
            });
        }

        if let Some(key) = condition.keys().find(|k| k.starts_with('$')) {
            return Err(Error::InvalidFilter(format!(
                "unsupported operator '{key}' on '{field}'"
            )));
        }
        // Plain object literal: equality, value passed through untouched.
    }

    Ok(FilterNode::Eq {
        field: field.to_owned(),
        value: value.clone(),
    })
}

/// Element-match body over the shape's allowed keys.
fn compile_element(field: &str, value: &Value, allowed: &[String]) -> Result<FilterNode, Error> {
    let Value::Object(map) = value else {
        return Err(Error::InvalidFilter(format!(
            "'{field}' element match must be an object"
        )));
    };
    if map.is_empty() {
        return Err(Error::InvalidFilter(format!(
            "'{field}' element match is empty"
        )));
    }

    let mut nodes = Vec::with_capacity(map.len());
    for (key, condition) in map {
        if key == "$or" || key == "$and" {
            let Value::Array(items) = condition else {
                return Err(Error::InvalidFilter(format!(
                    "'{field}' combinator '{key}' must be an array"
                )));
            };
            let children = items
                .iter()
                .map(|item| compile_element(field, item, allowed))
                .collect::<Result<Vec<_>, _>>()?;
            nodes.push(if key == "$or" {
                FilterNode::Or(children)
            } else {
                FilterNode::And(children)
            });
            continue;
        }
        if !allowed.iter().any(|a| a == key) {
            return Err(Error::InvalidFilter(format!(
                "'{key}' is not allowed inside '{field}'"
            )));
        }
        nodes.push(FilterNode::Eq {
            field: key.clone(),
            value: condition.clone(),
        });
    }

    Ok(match nodes.len() {
        1 => nodes.remove(0),
        _ => FilterNode::And(nodes),
    })
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use gatekit_schema::{FieldKind, QueryShape, ResourceSchema};
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
                    .searchable()
                    .build(),
            )
            .field(
                FieldDescriptor::builder("updatedAt", FieldKind::Timestamp)
                    .sortable()
                    .build(),
            )
            .field(
                FieldDescriptor::builder("tags", FieldKind::Array)
                    .searchable()
                    .query(QueryShape::elem_match(&["name", "value"]))
                    .build(),
            )
            .field(FieldDescriptor::builder("secret", FieldKind::String).build())
            .build()
            .unwrap()
    }

    #[test]
    fn test_absent_and_empty_compile_to_none() {
        let schema = schema();
        assert_eq!(compile_filter(None, &schema).unwrap(), None);
        assert_eq!(compile_filter(Some(&json!({})), &schema).unwrap(), None);
    }

    #[test]
    fn test_literal_equality() {
        let schema = schema();
        let node = compile_filter(Some(&json!({"title": "flat"})), &schema)
            .unwrap()
            .unwrap();
        assert_eq!(node, FilterNode::eq("title", json!("flat")));
        assert_eq!(node.to_json(), json!({"title": "flat"}));
    }

    #[test]
    fn test_sortable_only_field_is_filterable() {
        let node = compile_filter(Some(&json!({"updatedAt": {"$gte": 0}})), &schema())
            .unwrap()
            .unwrap();
        assert_eq!(node.to_json(), json!({"updatedAt": {"$gte": 0}}));
    }

    #[test]
    fn test_rejects_unknown_field() {
        let err = compile_filter(Some(&json!({"missing": 1})), &schema()).unwrap_err();
        assert!(matches!(err, Error::InvalidFilter(_)));
    }

    #[test]
    fn test_rejects_unfilterable_field() {
        let err = compile_filter(Some(&json!({"secret": "x"})), &schema()).unwrap_err();
        assert!(matches!(err, Error::InvalidFilter(m) if m.contains("not filterable")));
    }

    #[test]
    fn test_literals_pass_through_unvalidated() {
        // A string on a number field is structurally fine; the store just
        // matches nothing.
        let node = compile_filter(Some(&json!({"price": "cheap"})), &schema())
            .unwrap()
            .unwrap();
        assert_eq!(node, FilterNode::eq("price", json!("cheap")));
    }

    #[test]
    fn test_member_set_wins_over_range() {
        let node = compile_filter(
            Some(&json!({"price": {"$in": [10, 20], "$lte": 30}})),
            &schema(),
        )
        .unwrap()
        .unwrap();
        assert_eq!(
            node,
            FilterNode::In {
                field: "price".to_owned(),
                values: vec![json!(10), json!(20)],
            }
        );
    }

    #[test]
    fn test_member_set_must_be_array() {
        let err = compile_filter(Some(&json!({"price": {"$in": 10}})), &schema()).unwrap_err();
        assert!(matches!(err, Error::InvalidFilter(_)));
    }

    #[test]
    fn test_range_bounds() {
        let node = compile_filter(Some(&json!({"price": {"$gte": 10}})), &schema())
            .unwrap()
            .unwrap();
        assert_eq!(node.to_json(), json!({"price": {"$gte": 10}}));
    }

    #[test]
    fn test_rejects_unsupported_operator() {
        let err = compile_filter(Some(&json!({"price": {"$ne": 10}})), &schema()).unwrap_err();
        assert!(matches!(err, Error::InvalidFilter(m) if m.contains("$ne")));
    }

    #[test]
    fn test_id_renames_to_identity_field() {
        let id = Uuid::new_v4();
        let node = compile_filter(Some(&json!({"id": id.to_string()})), &schema())
            .unwrap()
            .unwrap();
        assert_eq!(node.to_json(), json!({"_id": id.to_string()}));
    }

    #[test]
    fn test_element_match_allowed_keys() {
        let node = compile_filter(
            Some(&json!({"tags": {"name": "location:city", "value": "colombo"}})),
            &schema(),
        )
        .unwrap()
        .unwrap();
        let FilterNode::ElemMatch { field, inner } = node else {
            panic!("expected an element match");
        };
        assert_eq!(field, "tags");
        assert_eq!(
            inner.to_json(),
            json!({"$and": [{"name": "location:city"}, {"value": "colombo"}]})
        );
    }

    #[test]
    fn test_element_match_rejects_stray_key() {
        let err = compile_filter(Some(&json!({"tags": {"color": "red"}})), &schema()).unwrap_err();
        assert!(matches!(err, Error::InvalidFilter(m) if m.contains("color")));
    }

    #[test]
    fn test_element_match_or_combinator() {
        let node = compile_filter(
            Some(&json!({"tags": {"$or": [{"name": "a"}, {"name": "b"}]}})),
            &schema(),
        )
        .unwrap()
        .unwrap();
        assert_eq!(
            node.to_json(),
            json!({"tags": {"$elemMatch": {"$or": [{"name": "a"}, {"name": "b"}]}}})
        );
    }

    #[test]
    fn test_element_match_rejects_unknown_combinator() {
        let err = compile_filter(Some(&json!({"tags": {"$nor": [{"name": "a"}]}})), &schema())
            .unwrap_err();
        assert!(matches!(err, Error::InvalidFilter(_)));
    }

    #[test]
    fn test_multiple_clauses_conjoin() {
        let node = compile_filter(
            Some(&json!({"title": "flat", "price": {"$lte": 100}})),
            &schema(),
        )
        .unwrap()
        .unwrap();
        assert_eq!(
            node.to_json(),
            json!({"$and": [{"title": "flat"}, {"price": {"$lte": 100}}]})
        );
    }

    #[test]
    fn test_and_flattens() {
        let combined = FilterNode::eq("a", json!(1))
            .and(FilterNode::eq("b", json!(2)))
            .and(FilterNode::eq("c", json!(3)));
        let FilterNode::And(children) = &combined else {
            panic!("expected a conjunction");
        };
        assert_eq!(children.len(), 3);
    }
}
