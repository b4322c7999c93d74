//! Declarative validator, resolver, merge, and conditional-require rules.
//!
//! These are pure data: a schema declares them once and the engine
//! interprets them per request. Keeping them declarative lets descriptors
//! stay `Clone + Debug` and keeps this crate free of I/O.

use std::collections::HashMap;

use serde_json::Value;

/// Named, composable validation rule for a field value.
#[derive(Clone, Debug, PartialEq)]
pub enum ValidatorSpec {
    /// String with an optional closed value set and length cap.
    String {
        enum_values: Option<Vec<String>>,
        max_length: Option<usize>,
    },
    /// Finite number with an optional closed value set and bounds.
    Number {
        enum_values: Option<Vec<i64>>,
        min: Option<f64>,
        max: Option<f64>,
    },
    Boolean,
    /// http(s) url, total length capped at 2000.
    Url,
    Email,
    /// E.164 phone number.
    Phone,
    /// At least 6 chars with a digit, a lower and an upper case letter.
    /// `block_fields` name payload fields whose values the password must
    /// not equal (case-insensitive).
    Password { block_fields: Vec<String> },
    /// RFC 3339 string or epoch-millisecond integer.
    Date,
    /// Well-formed document identifier.
    Reference,
    /// Array with item fan-out; first failing item wins.
    Array {
        min: Option<usize>,
        max: Option<usize>,
        item: Box<ValidatorSpec>,
    },
    /// Array of group references that must resolve to existing, readable
    /// group documents. Not pure: consults the directory and the store.
    Groups {
        min: Option<usize>,
        max: Option<usize>,
    },
    /// Tag entries `{name: "field:key", value}`; `allowed` maps each field
    /// to its permitted keys.
    Tags { allowed: HashMap<String, Vec<String>> },
    /// Permission entry list (exactly one subject each, actions within the
    /// resource vocabulary; updates must retain the acting user's rights).
    Permissions,
    /// Per-field visibility map keyed by declared fields or `*`.
    Visibility,
    /// Contact bundle with a closed key set.
    Contacts,
    /// Country code from a closed allow-list.
    Country { allow: Vec<String> },
    /// Array of urls where the literal `*` is also accepted.
    Cors,
}

/// Projects a payload field into a named tag.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TagRule {
    /// Payload field the tag value is read from.
    pub source: String,
    /// Full tag name, `field:key`.
    pub tag: String,
}

/// Which access structure the consolidated access resolver produces.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessShape {
    Permissions,
    Visibility,
}

/// Where the access resolver takes its grants from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AccessPolicy {
    /// Admin group gets everything; an authenticated caller gets `actions`.
    Static { actions: Vec<String> },
    /// Project the named workflow's per-state grants using the resolved
    /// status and the document owner.
    Workflow { name: String },
}

/// Server-side value computation for a field.
#[derive(Clone, Debug, PartialEq)]
pub enum ResolverSpec {
    /// New documents get a fresh identifier; updates keep the stored one.
    Identity,
    /// Stored owner wins, else the authenticated caller.
    Owner,
    /// Override > stored value > the workflow's start state.
    Status { workflow: String },
    CreatedAt,
    UpdatedAt,
    /// Admin callers get the unlimited tier, everyone else the basic tier.
    Tier,
    /// `size` random bytes, hex encoded.
    RandomToken { size: usize },
    /// The public group, when the caller supplies nothing.
    DefaultGroups,
    /// Baseline tag set projected from payload fields.
    Tags { rules: Vec<TagRule> },
    /// Permission list or visibility map, static or workflow-conditioned.
    Access {
        shape: AccessShape,
        policy: AccessPolicy,
    },
    /// Names of verify-flagged fields the current write leaves unchanged.
    VerifiedCarry,
}

/// How a hybrid field merges the resolver output with the caller value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MergeStrategy {
    /// Union action sets per subject; caller entries can only add.
    Permissions,
    /// Index by tag name; the caller value wins per name.
    Tags,
}

/// Filter transform for array-of-objects fields: the filter value becomes
/// an element-match whose keys must come from `allowed`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueryShape {
    pub allowed: Vec<String>,
}

impl QueryShape {
    #[must_use]
    pub fn elem_match(allowed: &[&str]) -> Self {
        Self {
            allowed: allowed.iter().map(|s| (*s).to_owned()).collect(),
        }
    }
}

/// Predicate over the submitted payload.
#[derive(Clone, Debug, PartialEq)]
pub enum RequireCondition {
    Equals { field: String, value: Value },
    NotEquals { field: String, value: Value },
    Present { field: String },
    Absent { field: String },
}

/// What holds for the rule's field when its condition matches.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequireOutcome {
    Required,
    Forbidden,
}

/// Conditional-require rule, evaluated after the field pass succeeds.
#[derive(Clone, Debug, PartialEq)]
pub struct RequireRule {
    pub when: RequireCondition,
    pub outcome: RequireOutcome,
}

impl RequireRule {
    /// The field is required when `field == value` elsewhere in the payload.
    #[must_use]
    pub fn required_when_equals(field: &str, value: Value) -> Self {
        Self {
            when: RequireCondition::Equals {
                field: field.to_owned(),
                value,
            },
            outcome: RequireOutcome::Required,
        }
    }

    /// The field is rejected when `field == value` elsewhere in the payload.
    #[must_use]
    pub fn forbidden_when_equals(field: &str, value: Value) -> Self {
        Self {
            when: RequireCondition::Equals {
                field: field.to_owned(),
                value,
            },
            outcome: RequireOutcome::Forbidden,
        }
    }

    /// The field is required when `field` is absent from the payload.
    #[must_use]
    pub fn required_when_absent(field: &str) -> Self {
        Self {
            when: RequireCondition::Absent {
                field: field.to_owned(),
            },
            outcome: RequireOutcome::Required,
        }
    }
}
