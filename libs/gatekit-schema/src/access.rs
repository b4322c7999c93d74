//! Document-level access structures: permission entries and visibility maps.
//!
//! Both travel on the wire inside documents. A permission entry grants a
//! set of actions to exactly one subject; a visibility map narrows which
//! callers may read individual fields.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Action vocabulary shared by every resource. Resources may extend it.
pub mod actions {
    pub const READ: &str = "read";
    pub const CREATE: &str = "create";
    pub const UPDATE: &str = "update";
    pub const DELETE: &str = "delete";
    /// Matches any action.
    pub const ANY: &str = "*";
}

/// Grantee of a permission entry: a single user or a single group.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Subject {
    User(Uuid),
    Group(Uuid),
}

impl Subject {
    #[must_use]
    pub fn id(&self) -> Uuid {
        match self {
            Self::User(id) | Self::Group(id) => *id,
        }
    }
}

/// One `{user|group, actions}` entry of a document's permission list.
///
/// Wire form is an object with exactly one subject key:
/// `{"user": "<uuid>", "actions": ["read"]}` or
/// `{"group": "<uuid>", "actions": ["*"]}`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PermissionEntry {
    subject: Subject,
    actions: Vec<String>,
}

impl PermissionEntry {
    #[must_use]
    pub fn new(subject: Subject, actions: Vec<String>) -> Self {
        Self { subject, actions }
    }

    #[must_use]
    pub fn user(id: Uuid, actions: &[&str]) -> Self {
        Self::new(
            Subject::User(id),
            actions.iter().map(|a| (*a).to_owned()).collect(),
        )
    }

    #[must_use]
    pub fn group(id: Uuid, actions: &[&str]) -> Self {
        Self::new(
            Subject::Group(id),
            actions.iter().map(|a| (*a).to_owned()).collect(),
        )
    }

    #[must_use]
    pub fn subject(&self) -> Subject {
        self.subject
    }

    #[must_use]
    pub fn actions(&self) -> &[String] {
        &self.actions
    }

    /// Whether this entry covers `action`, directly or via the wildcard.
    #[must_use]
    pub fn allows(&self, action: &str) -> bool {
        self.actions
            .iter()
            .any(|a| a == action || a == actions::ANY)
    }

    /// Adds every action from `extra` this entry does not already carry.
    pub fn grant_all(&mut self, extra: &[String]) {
        for action in extra {
            if !self.actions.contains(action) {
                self.actions.push(action.clone());
            }
        }
    }
}

impl Serialize for PermissionEntry {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(2))?;
        match self.subject {
            Subject::User(id) => map.serialize_entry("user", &id)?,
            Subject::Group(id) => map.serialize_entry("group", &id)?,
        }
        map.serialize_entry("actions", &self.actions)?;
        map.end()
    }
}

impl<'de> Deserialize<'de> for PermissionEntry {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(deny_unknown_fields)]
        struct Raw {
            user: Option<Uuid>,
            group: Option<Uuid>,
            actions: Vec<String>,
        }

        let raw = Raw::deserialize(deserializer)?;
        let subject = match (raw.user, raw.group) {
            (Some(id), None) => Subject::User(id),
            (None, Some(id)) => Subject::Group(id),
            (Some(_), Some(_)) => {
                return Err(serde::de::Error::custom(
                    "permission entry names both a user and a group",
                ));
            }
            (None, None) => {
                return Err(serde::de::Error::custom(
                    "permission entry names neither a user nor a group",
                ));
            }
        };
        Ok(Self {
            subject,
            actions: raw.actions,
        })
    }
}

/// Who may read one field: any listed user, or any member of a listed group.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisibilityRule {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<Uuid>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub users: Vec<Uuid>,
}

impl VisibilityRule {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty() && self.users.is_empty()
    }

    /// Whether a caller with `user` identity and `groups` membership passes.
    #[must_use]
    pub fn permits(&self, user: Option<Uuid>, groups: &[Uuid]) -> bool {
        if let Some(id) = user {
            if self.users.contains(&id) {
                return true;
            }
        }
        self.groups.iter().any(|g| groups.contains(g))
    }
}

/// Per-field visibility, keyed by field name or the `*` wildcard.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VisibilityMap(HashMap<String, VisibilityRule>);

impl VisibilityMap {
    #[must_use]
    pub fn new() -> Self {
        Self(HashMap::new())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn insert(&mut self, field: &str, rule: VisibilityRule) {
        self.0.insert(field.to_owned(), rule);
    }

    #[must_use]
    pub fn get(&self, field: &str) -> Option<&VisibilityRule> {
        self.0.get(field)
    }

    /// Rule governing `field`: its own entry, else the `*` entry.
    #[must_use]
    pub fn rule_for(&self, field: &str) -> Option<&VisibilityRule> {
        self.0.get(field).or_else(|| self.0.get("*"))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &VisibilityRule)> {
        self.0.iter()
    }

    /// Union of `other` into `self`, entry lists concatenated per field.
    pub fn extend_with(&mut self, other: &Self) {
        for (field, rule) in &other.0 {
            let merged = self.0.entry(field.clone()).or_default();
            for g in &rule.groups {
                if !merged.groups.contains(g) {
                    merged.groups.push(*g);
                }
            }
            for u in &rule.users {
                if !merged.users.contains(u) {
                    merged.users.push(*u);
                }
            }
        }
    }
}

impl<'a> IntoIterator for &'a VisibilityMap {
    type Item = (&'a String, &'a VisibilityRule);
    type IntoIter = std::collections::hash_map::Iter<'a, String, VisibilityRule>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
