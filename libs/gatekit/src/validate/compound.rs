//! Array, reference-set and bundle validators.

use std::collections::HashMap;

use gatekit_schema::ValidatorSpec;
use serde_json::Value;
use uuid::Uuid;

use crate::context::FieldCx;
use crate::directory::{Directory, DirectoryError};
use crate::error::Error;

use super::{apply_sync, scalar};

pub fn array(
    cx: &FieldCx<'_>,
    min: Option<usize>,
    max: Option<usize>,
    item: &ValidatorSpec,
    value: &Value,
) -> Result<(), Error> {
    let Some(items) = value.as_array() else {
        return Err(cx.invalid("must be an array"));
    };
    check_len(cx, min, max, items.len())?;
    for (index, element) in items.iter().enumerate() {
        apply_sync(cx, item, element).map_err(|err| at_index(cx, index, err))?;
    }
    Ok(())
}

/// Structural half of the groups validator: an array of identifiers,
/// within the size bounds. Returns the parsed ids.
pub fn group_shape(
    cx: &FieldCx<'_>,
    min: Option<usize>,
    max: Option<usize>,
    value: &Value,
) -> Result<Vec<Uuid>, Error> {
    let Some(items) = value.as_array() else {
        return Err(cx.invalid("must be an array of group identifiers"));
    };
    check_len(cx, min, max, items.len())?;
    items
        .iter()
        .map(|item| {
            item.as_str()
                .and_then(|text| Uuid::parse_str(text).ok())
                .ok_or_else(|| cx.invalid("must be an array of group identifiers"))
        })
        .collect()
}

/// Full groups validator: structure plus existence of every referenced
/// group in the directory.
pub async fn groups(
    cx: &FieldCx<'_>,
    directory: &Directory,
    min: Option<usize>,
    max: Option<usize>,
    value: &Value,
) -> Result<(), Error> {
    let ids = group_shape(cx, min, max, value)?;
    for id in ids {
        match directory.group_by_id(id).await {
            Ok(_) => {}
            Err(DirectoryError::Missing { .. }) => {
                return Err(cx.invalid(format!("group '{id}' does not exist")));
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

pub fn tags(
    cx: &FieldCx<'_>,
    allowed: &HashMap<String, Vec<String>>,
    value: &Value,
) -> Result<(), Error> {
    let Some(items) = value.as_array() else {
        return Err(cx.invalid("must be an array"));
    };
    for (index, item) in items.iter().enumerate() {
        tag_entry(cx, allowed, item).map_err(|err| at_index(cx, index, err))?;
    }
    Ok(())
}

fn tag_entry(
    cx: &FieldCx<'_>,
    allowed: &HashMap<String, Vec<String>>,
    item: &Value,
) -> Result<(), Error> {
    let Some(entry) = item.as_object() else {
        return Err(cx.invalid("must be an object"));
    };
    if entry.keys().any(|key| key != "name" && key != "value") {
        return Err(cx.invalid("carries keys other than name and value"));
    }
    let Some(name) = entry.get("name").and_then(Value::as_str) else {
        return Err(cx.invalid("missing tag name"));
    };
    let Some((source, key)) = name.split_once(':') else {
        return Err(cx.invalid(format!("tag '{name}' is not namespaced")));
    };
    let permitted = allowed
        .get(source)
        .is_some_and(|keys| keys.iter().any(|candidate| candidate == key));
    if !permitted {
        return Err(cx.invalid(format!("tag '{name}' is not allowed")));
    }
    if entry.get("value").and_then(Value::as_str).is_none_or(str::is_empty) {
        return Err(cx.invalid(format!("tag '{name}' needs a value")));
    }
    Ok(())
}

pub fn contacts(cx: &FieldCx<'_>, value: &Value) -> Result<(), Error> {
    let Some(map) = value.as_object() else {
        return Err(cx.invalid("must be an object"));
    };
    for (method, entry) in map {
        match method.as_str() {
            "email" => scalar::email(cx, entry)?,
            "phones" => {
                let Some(numbers) = entry.as_array() else {
                    return Err(cx.invalid("phones must be an array"));
                };
                for (index, number) in numbers.iter().enumerate() {
                    scalar::phone(cx, number).map_err(|err| at_index(cx, index, err))?;
                }
            }
            "messenger" | "skype" | "viber" | "whatsapp" => {
                if entry.as_str().is_none_or(str::is_empty) {
                    return Err(cx.invalid(format!("'{method}' must be a non-empty string")));
                }
            }
            _ => return Err(cx.invalid(format!("unknown contact method '{method}'"))),
        }
    }
    Ok(())
}

pub fn cors(cx: &FieldCx<'_>, value: &Value) -> Result<(), Error> {
    let Some(items) = value.as_array() else {
        return Err(cx.invalid("must be an array"));
    };
    for (index, origin) in items.iter().enumerate() {
        let Some(text) = origin.as_str() else {
            return Err(at_index(cx, index, cx.invalid("must be a string")));
        };
        if text != "*" {
            scalar::check_url(cx, text).map_err(|err| at_index(cx, index, err))?;
        }
    }
    Ok(())
}

fn check_len(
    cx: &FieldCx<'_>,
    min: Option<usize>,
    max: Option<usize>,
    len: usize,
) -> Result<(), Error> {
    if let Some(bound) = min {
        if len < bound {
            return Err(cx.invalid(format!("fewer than {bound} items")));
        }
    }
    if let Some(bound) = max {
        if len > bound {
            return Err(cx.invalid(format!("more than {bound} items")));
        }
    }
    Ok(())
}

fn at_index(cx: &FieldCx<'_>, index: usize, err: Error) -> Error {
    match err {
        Error::InvalidField { reason, .. } => cx.invalid(format!("item {index}: {reason}")),
        other => other,
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::directory::{
        DirectoryBackend, DirectoryConfig, GroupRecord, TierRecord, UserRecord,
    };
    use crate::store::Document;
    use async_trait::async_trait;
    use gatekit_schema::ResourceSchema;
    use serde_json::json;
    use std::sync::Arc;

    fn schema() -> ResourceSchema {
        ResourceSchema::builder("subjects").build().unwrap()
    }

    fn cx<'a>(schema: &'a ResourceSchema, payload: &'a Document) -> FieldCx<'a> {
        FieldCx {
            field: "subject",
            schema,
            caller: None,
            payload,
            overrides: payload,
            stored: None,
            updating: false,
        }
    }

    struct OneGroup {
        id: Uuid,
    }

    #[async_trait]
    impl DirectoryBackend for OneGroup {
        async fn group(
            &self,
            _owner: &str,
            _name: &str,
        ) -> Result<Option<GroupRecord>, DirectoryError> {
            Ok(None)
        }

        async fn group_by_id(
            &self,
            _owner: &str,
            id: Uuid,
        ) -> Result<Option<GroupRecord>, DirectoryError> {
            Ok((id == self.id).then(|| GroupRecord {
                id,
                name: "team".to_owned(),
            }))
        }

        async fn tier(
            &self,
            _owner: &str,
            _name: &str,
        ) -> Result<Option<TierRecord>, DirectoryError> {
            Ok(None)
        }

        async fn user(&self, _email: &str) -> Result<Option<UserRecord>, DirectoryError> {
            Ok(None)
        }
    }

    #[test]
    fn test_array_bounds_and_item_errors() {
        let schema = schema();
        let payload = Document::new();
        let cx = cx(&schema, &payload);
        let item = ValidatorSpec::Phone;

        assert!(array(&cx, Some(1), None, &item, &json!([])).is_err());
        assert!(array(&cx, None, Some(1), &item, &json!(["+123456", "+123457"])).is_err());

        let err = array(&cx, None, None, &item, &json!(["+14155552671", "oops"])).unwrap_err();
        assert!(matches!(err, Error::InvalidField { reason, .. } if reason.starts_with("item 1:")));
    }

    #[tokio::test]
    async fn test_groups_must_exist() {
        let known = Uuid::new_v4();
        let directory = Directory::new(
            Arc::new(OneGroup { id: known }),
            DirectoryConfig::new("root@example.com"),
        );
        let schema = schema();
        let payload = Document::new();
        let cx = cx(&schema, &payload);

        assert!(
            groups(&cx, &directory, None, None, &json!([known.to_string()]))
                .await
                .is_ok()
        );

        let ghost = Uuid::new_v4();
        let err = groups(&cx, &directory, None, None, &json!([ghost.to_string()]))
            .await
            .unwrap_err();
        assert!(
            matches!(err, Error::InvalidField { reason, .. } if reason.contains("does not exist"))
        );

        assert!(
            groups(&cx, &directory, None, None, &json!(["nonsense"]))
                .await
                .is_err()
        );
    }

    #[test]
    fn test_tags_allow_list() {
        let schema = schema();
        let payload = Document::new();
        let cx = cx(&schema, &payload);
        let allowed = HashMap::from([("listing".to_owned(), vec!["category".to_owned()])]);

        assert!(
            tags(
                &cx,
                &allowed,
                &json!([{"name": "listing:category", "value": "boats"}])
            )
            .is_ok()
        );
        assert!(
            tags(&cx, &allowed, &json!([{"name": "listing:color", "value": "red"}])).is_err()
        );
        assert!(tags(&cx, &allowed, &json!([{"name": "category", "value": "x"}])).is_err());
        assert!(
            tags(&cx, &allowed, &json!([{"name": "listing:category", "value": ""}])).is_err()
        );
    }

    #[test]
    fn test_contact_bundle() {
        let schema = schema();
        let payload = Document::new();
        let cx = cx(&schema, &payload);

        assert!(
            contacts(
                &cx,
                &json!({"email": "a@b.co", "phones": ["+14155552671"], "skype": "handle"})
            )
            .is_ok()
        );
        assert!(contacts(&cx, &json!({"fax": "123"})).is_err());
        assert!(contacts(&cx, &json!({"phones": ["oops"]})).is_err());
        assert!(contacts(&cx, &json!({"viber": ""})).is_err());
    }

    #[test]
    fn test_cors_accepts_star() {
        let schema = schema();
        let payload = Document::new();
        let cx = cx(&schema, &payload);

        assert!(cors(&cx, &json!(["*", "https://app.example.com"])).is_ok());
        assert!(cors(&cx, &json!(["ftp://files.example.com"])).is_err());
        assert!(cors(&cx, &json!([42])).is_err());
    }
}
