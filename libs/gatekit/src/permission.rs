//! Permission derivation and read/write authorization.
//!
//! The sole authorization gate is a filter rewrite: [`PermissionEngine::authorize`]
//! narrows a request's filter to documents whose stored `permissions`
//! list grants the required action to the acting principal. Writes are
//! gated by the same rewrite before their field pipeline runs, so an
//! unauthorized update or remove simply fails to find its target.

use std::sync::Arc;

use gatekit_query::FilterNode;
use gatekit_schema::{PermissionEntry, Subject, VisibilityMap, VisibilityRule, actions};
use serde_json::json;
use tracing::debug;
use uuid::Uuid;

use crate::context::Caller;
use crate::directory::{
    ADMIN_GROUP, ANONYMOUS_GROUP, Directory, DirectoryError, GroupRecord, PUBLIC_GROUP,
};
use crate::error::Error;

/// Derives permission and visibility sets and scopes filters to what
/// the acting principal may reach.
pub struct PermissionEngine {
    directory: Arc<Directory>,
}

impl PermissionEngine {
    #[must_use]
    pub fn new(directory: Arc<Directory>) -> Self {
        Self { directory }
    }

    /// True when the caller belongs to the admin group.
    ///
    /// # Errors
    ///
    /// Returns a directory error when the admin group cannot be resolved.
    pub async fn is_admin(&self, caller: Option<&Caller>) -> Result<bool, Error> {
        let Some(caller) = caller else {
            return Ok(false);
        };
        let admin = self.well_known_group(ADMIN_GROUP).await?;
        Ok(caller.is_member(admin.id))
    }

    /// Scope `filter` to documents granting `action` to the principal.
    ///
    /// Admin callers pass through unchanged. Everyone else gets an
    /// element-match over the stored `permissions` list requiring the
    /// action (or `*`) under one of: the public group, the anonymous
    /// group (unauthenticated callers only), the caller's user id, or
    /// one of the caller's groups.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidServerState`] when a well-known group is
    /// not provisioned, or a directory error when lookups fail.
    pub async fn authorize(
        &self,
        caller: Option<&Caller>,
        action: &str,
        filter: Option<FilterNode>,
    ) -> Result<Option<FilterNode>, Error> {
        if self.is_admin(caller).await? {
            return Ok(filter);
        }

        let public = self.well_known_group(PUBLIC_GROUP).await?;
        let mut branches = vec![subject_clause("group", public.id, action)];
        match caller {
            None => {
                let anonymous = self.well_known_group(ANONYMOUS_GROUP).await?;
                branches.push(subject_clause("group", anonymous.id, action));
            }
            Some(caller) => {
                branches.push(subject_clause("user", caller.id, action));
                for group in &caller.groups {
                    if *group != public.id {
                        branches.push(subject_clause("group", *group, action));
                    }
                }
            }
        }
        debug!(action, branches = branches.len(), "scoped filter to principal");

        let permit = FilterNode::ElemMatch {
            field: "permissions".to_owned(),
            inner: Box::new(FilterNode::Or(branches)),
        };
        Ok(Some(match filter {
            Some(filter) => filter.and(permit),
            None => permit,
        }))
    }

    /// Static (non-workflow) permission set: the admin group over
    /// everything, plus the owner over the granted actions.
    ///
    /// # Errors
    ///
    /// Returns a directory error when the admin group cannot be resolved.
    pub async fn static_permissions(
        &self,
        owner: Option<Uuid>,
        granted: &[String],
    ) -> Result<Vec<PermissionEntry>, Error> {
        let admin = self.well_known_group(ADMIN_GROUP).await?;
        let mut entries = vec![PermissionEntry::group(admin.id, &[actions::ANY])];
        if let Some(owner) = owner {
            entries.push(PermissionEntry::new(Subject::User(owner), granted.to_vec()));
        }
        Ok(entries)
    }

    /// Static visibility: everything visible to the admin group and the
    /// owner, under the wildcard key.
    ///
    /// # Errors
    ///
    /// Returns a directory error when the admin group cannot be resolved.
    pub async fn static_visibility(&self, owner: Option<Uuid>) -> Result<VisibilityMap, Error> {
        let admin = self.well_known_group(ADMIN_GROUP).await?;
        let mut rule = VisibilityRule {
            groups: vec![admin.id],
            users: Vec::new(),
        };
        if let Some(owner) = owner {
            rule.users.push(owner);
        }
        let mut map = VisibilityMap::new();
        map.insert("*", rule);
        Ok(map)
    }

    pub(crate) async fn well_known_group(&self, name: &str) -> Result<GroupRecord, Error> {
        match self.directory.group(name).await {
            Ok(record) => Ok(record),
            Err(DirectoryError::Missing { .. }) => Err(Error::InvalidServerState(format!(
                "well-known group '{name}' is not provisioned"
            ))),
            Err(err) => Err(err.into()),
        }
    }
}

/// One permit branch: the subject matches and the entry's actions cover
/// the required one.
fn subject_clause(subject_key: &str, id: Uuid, action: &str) -> FilterNode {
    FilterNode::And(vec![
        FilterNode::Eq {
            field: subject_key.to_owned(),
            value: json!(id),
        },
        FilterNode::In {
            field: "actions".to_owned(),
            values: vec![json!(actions::ANY), json!(action)],
        },
    ])
}

/// Whether the caller may see `field` under a stored visibility map.
/// Absent rules (no per-field entry, no wildcard) leave a field visible.
pub(crate) fn may_view(map: &VisibilityMap, field: &str, caller: Option<&Caller>) -> bool {
    let Some(rule) = map.rule_for(field) else {
        return true;
    };
    match caller {
        Some(caller) => rule.permits(Some(caller.id), &caller.groups),
        None => rule.permits(None, &[]),
    }
}
