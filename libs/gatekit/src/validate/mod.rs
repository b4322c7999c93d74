//! Field validators, dispatched from declarative specs.
//!
//! Most validators are pure functions of the value. Two are not:
//! `groups` resolves submitted group ids through the directory, and
//! `permissions` consults the permission engine on updates. Those two
//! go through the async [`apply`]; everything else, including array
//! item fan-out, runs through [`apply_sync`].

use gatekit_schema::ValidatorSpec;
use serde_json::Value;

use crate::context::FieldCx;
use crate::directory::Directory;
use crate::error::Error;
use crate::permission::PermissionEngine;

mod access;
mod compound;
mod scalar;

/// Run `spec` against `value`, field path and payload taken from `cx`.
pub async fn apply(
    cx: &FieldCx<'_>,
    directory: &Directory,
    engine: &PermissionEngine,
    spec: &ValidatorSpec,
    value: &Value,
) -> Result<(), Error> {
    match spec {
        ValidatorSpec::Groups { min, max } => {
            compound::groups(cx, directory, *min, *max, value).await
        }
        ValidatorSpec::Permissions => access::permissions(cx, engine, value).await,
        other => apply_sync(cx, other, value),
    }
}

/// Synchronous subset of the validators; array items recurse through
/// here, so reference-set validators degrade to their structural half.
pub fn apply_sync(cx: &FieldCx<'_>, spec: &ValidatorSpec, value: &Value) -> Result<(), Error> {
    match spec {
        ValidatorSpec::String {
            enum_values,
            max_length,
        } => scalar::string(cx, enum_values.as_deref(), *max_length, value),
        ValidatorSpec::Number {
            enum_values,
            min,
            max,
        } => scalar::number(cx, enum_values.as_deref(), *min, *max, value),
        ValidatorSpec::Boolean => scalar::boolean(cx, value),
        ValidatorSpec::Url => scalar::url_value(cx, value),
        ValidatorSpec::Email => scalar::email(cx, value),
        ValidatorSpec::Phone => scalar::phone(cx, value),
        ValidatorSpec::Password { block_fields } => scalar::password(cx, block_fields, value),
        ValidatorSpec::Date => scalar::date(cx, value),
        ValidatorSpec::Reference => scalar::reference(cx, value),
        ValidatorSpec::Country { allow } => scalar::country(cx, allow, value),
        ValidatorSpec::Array { min, max, item } => compound::array(cx, *min, *max, item, value),
        ValidatorSpec::Groups { min, max } => {
            compound::group_shape(cx, *min, *max, value).map(|_| ())
        }
        ValidatorSpec::Tags { allowed } => compound::tags(cx, allowed, value),
        ValidatorSpec::Permissions => access::permission_shape(cx, value).map(|_| ()),
        ValidatorSpec::Visibility => access::visibility(cx, value),
        ValidatorSpec::Contacts => compound::contacts(cx, value),
        ValidatorSpec::Cors => compound::cors(cx, value),
    }
}
