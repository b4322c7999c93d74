//! Conditional-require rules, the second pass of the write path.
//!
//! A rule fires off sibling values, so it runs only after every field
//! has validated and resolved. The payload handed in is the final
//! document image, not the caller's raw submission.

use gatekit_schema::{RequireCondition, RequireOutcome, SchemaMetadataProvider};

use crate::context::is_absent;
use crate::error::Error;
use crate::store::Document;

/// Enforce every declared conditional-require rule against the final
/// payload.
///
/// # Errors
///
/// Returns [`Error::MissingField`] when a required field ends up
/// absent, [`Error::InvalidField`] when a forbidden one is present.
pub fn enforce(schema: &dyn SchemaMetadataProvider, payload: &Document) -> Result<(), Error> {
    for descriptor in schema.fields() {
        let Some(rule) = descriptor.require() else {
            continue;
        };
        if !condition_holds(&rule.when, payload) {
            continue;
        }
        let value = payload.get(descriptor.name());
        match rule.outcome {
            RequireOutcome::Required if is_absent(value) => {
                return Err(Error::MissingField(descriptor.name().to_owned()));
            }
            RequireOutcome::Forbidden if !is_absent(value) => {
                return Err(Error::invalid_field(
                    descriptor.name(),
                    describe_forbidden(&rule.when),
                ));
            }
            _ => {}
        }
    }
    Ok(())
}

fn condition_holds(condition: &RequireCondition, payload: &Document) -> bool {
    match condition {
        RequireCondition::Equals { field, value } => payload.get(field) == Some(value),
        RequireCondition::NotEquals { field, value } => payload.get(field) != Some(value),
        RequireCondition::Present { field } => !is_absent(payload.get(field)),
        RequireCondition::Absent { field } => is_absent(payload.get(field)),
    }
}

fn describe_forbidden(condition: &RequireCondition) -> String {
    match condition {
        RequireCondition::Equals { field, value } => {
            format!("not allowed when '{field}' is {value}")
        }
        RequireCondition::NotEquals { field, value } => {
            format!("not allowed unless '{field}' is {value}")
        }
        RequireCondition::Present { field } => format!("not allowed when '{field}' is set"),
        RequireCondition::Absent { field } => format!("not allowed without '{field}'"),
    }
}
