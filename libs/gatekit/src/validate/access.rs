//! Permission and visibility shape validators.

use gatekit_schema::{PermissionEntry, Subject, VisibilityMap, actions};
use serde_json::Value;

use crate::context::FieldCx;
use crate::error::Error;
use crate::permission::PermissionEngine;

/// Parse and structurally check a permission list: one subject per
/// entry, actions within the resource's declared vocabulary.
pub fn permission_shape(cx: &FieldCx<'_>, value: &Value) -> Result<Vec<PermissionEntry>, Error> {
    let Some(items) = value.as_array() else {
        return Err(cx.invalid("must be an array of permission entries"));
    };
    let mut entries = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        let entry: PermissionEntry = serde_json::from_value(item.clone())
            .map_err(|err| cx.invalid(format!("entry {index}: {err}")))?;
        if entry.actions().is_empty() {
            return Err(cx.invalid(format!("entry {index}: grants no actions")));
        }
        for action in entry.actions() {
            if !cx.schema.actions().contains(action) {
                return Err(cx.invalid(format!("entry {index}: unknown action '{action}'")));
            }
        }
        entries.push(entry);
    }
    Ok(entries)
}

/// Full permissions validator. On update the submitted set must retain
/// read and update rights for the acting user; admins are exempt since
/// their access never depends on document permissions.
pub async fn permissions(
    cx: &FieldCx<'_>,
    engine: &PermissionEngine,
    value: &Value,
) -> Result<(), Error> {
    let entries = permission_shape(cx, value)?;
    if !cx.updating {
        return Ok(());
    }
    if engine.is_admin(cx.caller).await? {
        return Ok(());
    }
    let Some(caller) = cx.caller else {
        return Err(Error::Unauthorized);
    };

    let mut keeps_read = false;
    let mut keeps_update = false;
    for entry in &entries {
        let applies = match entry.subject() {
            Subject::User(id) => id == caller.id,
            Subject::Group(id) => caller.is_member(id),
        };
        if applies {
            keeps_read = keeps_read || entry.allows(actions::READ);
            keeps_update = keeps_update || entry.allows(actions::UPDATE);
        }
    }
    if keeps_read && keeps_update {
        Ok(())
    } else {
        Err(cx.invalid("would drop your own read or update access"))
    }
}

/// Visibility map validator: keys must be declared fields or `*`, values
/// group/user id lists.
pub fn visibility(cx: &FieldCx<'_>, value: &Value) -> Result<(), Error> {
    let map: VisibilityMap =
        serde_json::from_value(value.clone()).map_err(|err| cx.invalid(err.to_string()))?;
    for (field, _) in &map {
        if field != "*" && cx.schema.field(field).is_none() {
            return Err(cx.invalid(format!("unknown field '{field}'")));
        }
    }
    Ok(())
}
