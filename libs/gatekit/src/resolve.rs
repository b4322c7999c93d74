//! Server-side value resolution.
//!
//! Resolvers compute the authoritative value of server-owned fields:
//! identity, ownership, timestamps, workflow status and the derived
//! access structures. Hybrid fields merge the resolver baseline with
//! the caller's submitted value under the field's merge strategy.

use chrono::{SecondsFormat, Utc};
use gatekit_schema::{
    AccessPolicy, AccessShape, FieldDescriptor, MergeStrategy, PermissionEntry, ResolverSpec,
    SchemaMetadataProvider, TagRule, Workflow,
};
use rand::RngCore;
use serde_json::{Value, json};
use uuid::Uuid;

use crate::context::{FieldCx, is_absent};
use crate::directory::{BASIC_TIER, Directory, DirectoryError, PUBLIC_GROUP, UNLIMITED_TIER};
use crate::error::Error;
use crate::permission::PermissionEngine;
use crate::store::Document;

/// Produce the resolved value for one field, or `None` to leave it
/// unset.
///
/// `submitted` is the caller's value from the original payload. Most
/// resolvers ignore it; defaulting resolvers use it as the primary
/// source.
pub async fn apply(
    cx: &FieldCx<'_>,
    directory: &Directory,
    engine: &PermissionEngine,
    spec: &ResolverSpec,
    submitted: Option<&Value>,
) -> Result<Option<Value>, Error> {
    match spec {
        ResolverSpec::Identity => Ok(Some(identity(cx))),
        ResolverSpec::Owner => Ok(owner_value(cx)),
        ResolverSpec::Status { workflow } => status(cx, workflow).map(Some),
        ResolverSpec::CreatedAt => Ok(Some(
            cx.stored_value()
                .filter(|value| !value.is_null())
                .cloned()
                .unwrap_or_else(now_stamp),
        )),
        ResolverSpec::UpdatedAt => Ok(Some(updated_at(cx))),
        ResolverSpec::Tier => tier(cx, directory, engine).await.map(Some),
        ResolverSpec::RandomToken { size } => Ok(Some(random_token(*size))),
        ResolverSpec::DefaultGroups => default_groups(engine, submitted).await.map(Some),
        ResolverSpec::Tags { rules } => Ok(Some(baseline_tags(cx, rules))),
        ResolverSpec::Access { shape, policy } => {
            access(cx, engine, *shape, policy).await.map(Some)
        }
        ResolverSpec::VerifiedCarry => Ok(Some(json!(unchanged_verified(
            cx.schema, cx.payload, cx.stored
        )))),
    }
}

/// Merge a resolver baseline with the caller's submitted value.
pub fn merge(strategy: MergeStrategy, resolved: Value, submitted: Option<&Value>) -> Value {
    let Some(submitted) = submitted else {
        return resolved;
    };
    match strategy {
        MergeStrategy::Permissions => merge_permissions(resolved, submitted),
        MergeStrategy::Tags => merge_tags(resolved, submitted),
    }
}

/// Group field indexes into dependency layers: a field lands one layer
/// after the field it depends on. Order within a layer follows the
/// declaration order.
///
/// # Errors
///
/// Returns [`Error::InvalidServerState`] on a dependency cycle or a
/// dependency on an undeclared field.
pub fn layers(schema: &dyn SchemaMetadataProvider) -> Result<Vec<Vec<usize>>, Error> {
    let fields = schema.fields();
    let mut depth = vec![0_usize; fields.len()];
    for (index, descriptor) in fields.iter().enumerate() {
        let mut hops = 0_usize;
        let mut current = descriptor.depends_on();
        while let Some(name) = current {
            hops += 1;
            if hops > fields.len() {
                return Err(Error::InvalidServerState(format!(
                    "dependency cycle through field '{}'",
                    descriptor.name()
                )));
            }
            let Some(position) = fields.iter().position(|field| field.name() == name) else {
                return Err(Error::InvalidServerState(format!(
                    "field '{}' depends on undeclared '{name}'",
                    descriptor.name()
                )));
            };
            current = fields[position].depends_on();
        }
        depth[index] = hops;
    }
    let deepest = depth.iter().copied().max().unwrap_or(0);
    let mut layers = Vec::with_capacity(deepest + 1);
    for level in 0..=deepest {
        let layer: Vec<usize> = (0..fields.len()).filter(|&i| depth[i] == level).collect();
        if !layer.is_empty() {
            layers.push(layer);
        }
    }
    Ok(layers)
}

/// Names of verify-flagged fields whose submitted value matches the
/// stored one. An update that does not touch a verified field carries
/// its flag forward.
pub fn unchanged_verified(
    schema: &dyn SchemaMetadataProvider,
    payload: &Document,
    stored: Option<&Document>,
) -> Vec<String> {
    let Some(stored) = stored else {
        return Vec::new();
    };
    schema
        .fields()
        .iter()
        .filter(|descriptor| descriptor.verify())
        .filter_map(|descriptor| {
            let name = descriptor.name();
            match (payload.get(name), stored.get(name)) {
                (Some(new), Some(old)) if new == old => Some(name.to_owned()),
                _ => None,
            }
        })
        .collect()
}

fn now_stamp() -> Value {
    json!(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true))
}

fn identity(cx: &FieldCx<'_>) -> Value {
    match cx.stored_value() {
        Some(id) if !id.is_null() => id.clone(),
        _ => json!(Uuid::now_v7()),
    }
}

fn owner_value(cx: &FieldCx<'_>) -> Option<Value> {
    match cx.stored_value() {
        Some(owner) if !owner.is_null() => Some(owner.clone()),
        _ => cx.caller.map(|caller| json!(caller.id)),
    }
}

fn status(cx: &FieldCx<'_>, workflow: &str) -> Result<Value, Error> {
    let Some(flow) = cx.schema.workflow(workflow) else {
        return Err(Error::InvalidServerState(format!(
            "workflow '{workflow}' is not declared on '{}'",
            cx.schema.resource()
        )));
    };
    Ok(cx
        .override_value()
        .filter(|value| !value.is_null())
        .or_else(|| cx.stored_value().filter(|value| !value.is_null()))
        .cloned()
        .unwrap_or_else(|| json!(flow.start())))
}

fn updated_at(cx: &FieldCx<'_>) -> Value {
    cx.override_value()
        .filter(|value| !value.is_null())
        .or_else(|| cx.stored_value().filter(|value| !value.is_null()))
        .cloned()
        .unwrap_or_else(now_stamp)
}

async fn tier(
    cx: &FieldCx<'_>,
    directory: &Directory,
    engine: &PermissionEngine,
) -> Result<Value, Error> {
    let name = if engine.is_admin(cx.caller).await? {
        UNLIMITED_TIER
    } else {
        BASIC_TIER
    };
    match directory.tier(name).await {
        Ok(record) => Ok(json!(record.id)),
        Err(DirectoryError::Missing { .. }) => Err(Error::InvalidServerState(format!(
            "tier '{name}' is not provisioned"
        ))),
        Err(err) => Err(err.into()),
    }
}

fn random_token(size: usize) -> Value {
    let mut bytes = vec![0_u8; size];
    rand::rng().fill_bytes(&mut bytes);
    json!(hex::encode(bytes))
}

async fn default_groups(
    engine: &PermissionEngine,
    submitted: Option<&Value>,
) -> Result<Value, Error> {
    match submitted {
        Some(value) if !is_absent(submitted) => Ok(value.clone()),
        _ => {
            let public = engine.well_known_group(PUBLIC_GROUP).await?;
            Ok(json!([public.id]))
        }
    }
}

fn baseline_tags(cx: &FieldCx<'_>, rules: &[TagRule]) -> Value {
    let mut tags = Vec::with_capacity(rules.len());
    for rule in rules {
        let Some(text) = cx.sibling(&rule.source).and_then(Value::as_str) else {
            continue;
        };
        if !text.is_empty() {
            tags.push(json!({ "name": rule.tag, "value": text }));
        }
    }
    Value::Array(tags)
}

async fn access(
    cx: &FieldCx<'_>,
    engine: &PermissionEngine,
    shape: AccessShape,
    policy: &AccessPolicy,
) -> Result<Value, Error> {
    let owner = document_owner(cx);
    match policy {
        AccessPolicy::Static { actions } => match shape {
            AccessShape::Permissions => {
                let entries = engine.static_permissions(owner, actions).await?;
                Ok(json!(entries))
            }
            AccessShape::Visibility => Ok(json!(engine.static_visibility(owner).await?)),
        },
        AccessPolicy::Workflow { name } => {
            let Some(flow) = cx.schema.workflow(name) else {
                return Err(Error::InvalidServerState(format!(
                    "workflow '{name}' is not declared on '{}'",
                    cx.schema.resource()
                )));
            };
            let state = workflow_state(cx, flow);
            match shape {
                AccessShape::Permissions => Ok(json!(flow.permissions_for(&state, owner))),
                AccessShape::Visibility => Ok(json!(flow.visibility_for(&state, owner))),
            }
        }
    }
}

/// Effective workflow state for access projection: the resolved status
/// in the working payload, else the override, else the stored value,
/// else the start state. Server fields never survive in the initial
/// payload, so a payload hit is the status resolver's own output.
fn workflow_state(cx: &FieldCx<'_>, flow: &Workflow) -> String {
    let field = cx
        .schema
        .fields()
        .iter()
        .find(|descriptor| matches!(descriptor.resolver(), Some(ResolverSpec::Status { .. })))
        .map(FieldDescriptor::name);
    if let Some(field) = field {
        let sources = [
            cx.payload.get(field),
            cx.overrides.get(field),
            cx.stored_field(field),
        ];
        for source in sources {
            if let Some(state) = source.and_then(Value::as_str) {
                if !state.is_empty() {
                    return state.to_owned();
                }
            }
        }
    }
    flow.start().to_owned()
}

/// Owner for access templating: the stored owner field wins, else the
/// authenticated caller.
fn document_owner(cx: &FieldCx<'_>) -> Option<Uuid> {
    let stored = cx
        .schema
        .fields()
        .iter()
        .find(|descriptor| matches!(descriptor.resolver(), Some(ResolverSpec::Owner)))
        .map(FieldDescriptor::name)
        .and_then(|field| cx.stored_field(field))
        .and_then(Value::as_str)
        .and_then(|raw| Uuid::parse_str(raw).ok());
    stored.or_else(|| cx.caller.map(|caller| caller.id))
}

/// Union per subject. Resolver entries keep their position; caller
/// entries add subjects or extend action sets, never shrink them.
fn merge_permissions(resolved: Value, submitted: &Value) -> Value {
    let mut entries: Vec<PermissionEntry> = serde_json::from_value(resolved).unwrap_or_default();
    let caller: Vec<PermissionEntry> = submitted.as_array().map_or_else(Vec::new, |items| {
        items
            .iter()
            .filter_map(|item| serde_json::from_value(item.clone()).ok())
            .collect()
    });
    for entry in caller {
        match entries
            .iter_mut()
            .find(|existing| existing.subject() == entry.subject())
        {
            Some(existing) => existing.grant_all(entry.actions()),
            None => entries.push(entry),
        }
    }
    json!(entries)
}

/// Index by tag name; the caller's entry wins per name.
fn merge_tags(resolved: Value, submitted: &Value) -> Value {
    let mut tags = match resolved {
        Value::Array(tags) => tags,
        other => return other,
    };
    let Some(extra) = submitted.as_array() else {
        return Value::Array(tags);
    };
    for tag in extra {
        let Some(name) = tag.get("name").and_then(Value::as_str) else {
            continue;
        };
        match tags
            .iter_mut()
            .find(|existing| existing.get("name").and_then(Value::as_str) == Some(name))
        {
            Some(existing) => existing.clone_from(tag),
            None => tags.push(tag.clone()),
        }
    }
    Value::Array(tags)
}
