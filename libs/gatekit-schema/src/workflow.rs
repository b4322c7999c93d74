//! Workflow definitions: named states with per-state grants and visibility.
//!
//! A workflow-bound resource stores its state in the status field. The
//! grants and visibility declared for that state are projected into the
//! document's own permission list and visibility map on every write, with
//! the `Owner` placeholder bound to the document owner.

use std::collections::HashMap;

use uuid::Uuid;

use crate::access::{PermissionEntry, Subject, VisibilityMap, VisibilityRule};
use crate::schema::SchemaError;

/// Grantee slot in a workflow definition.
///
/// `Owner` is bound to the document owner at projection time; grants for
/// it are dropped when the owner is not known.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkflowSubject {
    Owner,
    User(Uuid),
    Group(Uuid),
}

/// Actions a subject holds while a document sits in one state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkflowGrant {
    pub subject: WorkflowSubject,
    pub actions: Vec<String>,
}

impl WorkflowGrant {
    #[must_use]
    pub fn new(subject: WorkflowSubject, actions: &[&str]) -> Self {
        Self {
            subject,
            actions: actions.iter().map(|a| (*a).to_owned()).collect(),
        }
    }

    #[must_use]
    pub fn owner(actions: &[&str]) -> Self {
        Self::new(WorkflowSubject::Owner, actions)
    }

    #[must_use]
    pub fn group(id: Uuid, actions: &[&str]) -> Self {
        Self::new(WorkflowSubject::Group(id), actions)
    }

    #[must_use]
    pub fn user(id: Uuid, actions: &[&str]) -> Self {
        Self::new(WorkflowSubject::User(id), actions)
    }
}

type StateVisibility = HashMap<String, Vec<WorkflowSubject>>;

/// Named state machine with per-state access projections.
#[derive(Clone, Debug)]
pub struct Workflow {
    name: String,
    start: String,
    states: Vec<String>,
    permits: HashMap<String, Vec<WorkflowGrant>>,
    visibility: HashMap<String, StateVisibility>,
}

impl Workflow {
    /// Starts a builder whose first declared state is `start`.
    #[must_use]
    pub fn builder(name: &str, start: &str) -> WorkflowBuilder {
        WorkflowBuilder {
            name: name.to_owned(),
            start: start.to_owned(),
            states: vec![start.to_owned()],
            permits: HashMap::new(),
            visibility: HashMap::new(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn start(&self) -> &str {
        &self.start
    }

    #[must_use]
    pub fn states(&self) -> &[String] {
        &self.states
    }

    #[must_use]
    pub fn has_state(&self, state: &str) -> bool {
        self.states.iter().any(|s| s == state)
    }

    /// Permission entries a document in `state` carries.
    ///
    /// `Owner` grants become user entries for `owner`; when no owner is
    /// known they are dropped.
    #[must_use]
    pub fn permissions_for(&self, state: &str, owner: Option<Uuid>) -> Vec<PermissionEntry> {
        let Some(grants) = self.permits.get(state) else {
            return Vec::new();
        };
        grants
            .iter()
            .filter_map(|grant| {
                let subject = match grant.subject {
                    WorkflowSubject::Owner => Subject::User(owner?),
                    WorkflowSubject::User(id) => Subject::User(id),
                    WorkflowSubject::Group(id) => Subject::Group(id),
                };
                Some(PermissionEntry::new(subject, grant.actions.clone()))
            })
            .collect()
    }

    /// Visibility map a document in `state` carries.
    #[must_use]
    pub fn visibility_for(&self, state: &str, owner: Option<Uuid>) -> VisibilityMap {
        let mut map = VisibilityMap::new();
        let Some(fields) = self.visibility.get(state) else {
            return map;
        };
        for (field, subjects) in fields {
            let mut rule = VisibilityRule::default();
            for subject in subjects {
                match subject {
                    WorkflowSubject::Owner => {
                        if let Some(id) = owner {
                            rule.users.push(id);
                        }
                    }
                    WorkflowSubject::User(id) => rule.users.push(*id),
                    WorkflowSubject::Group(id) => rule.groups.push(*id),
                }
            }
            map.insert(field, rule);
        }
        map
    }
}

/// Builder for [`Workflow`].
pub struct WorkflowBuilder {
    name: String,
    start: String,
    states: Vec<String>,
    permits: HashMap<String, Vec<WorkflowGrant>>,
    visibility: HashMap<String, StateVisibility>,
}

impl WorkflowBuilder {
    #[must_use]
    pub fn state(mut self, name: &str) -> Self {
        if !self.states.iter().any(|s| s == name) {
            self.states.push(name.to_owned());
        }
        self
    }

    #[must_use]
    pub fn permit(mut self, state: &str, grant: WorkflowGrant) -> Self {
        self.permits.entry(state.to_owned()).or_default().push(grant);
        self
    }

    #[must_use]
    pub fn visible(mut self, state: &str, field: &str, subjects: Vec<WorkflowSubject>) -> Self {
        self.visibility
            .entry(state.to_owned())
            .or_default()
            .insert(field.to_owned(), subjects);
        self
    }

    /// Build the workflow.
    ///
    /// # Errors
    ///
    /// Returns an error if a permit or visibility declaration names a
    /// state that was never declared.
    pub fn build(self) -> Result<Workflow, SchemaError> {
        for state in self.permits.keys().chain(self.visibility.keys()) {
            if !self.states.iter().any(|s| s == state) {
                return Err(SchemaError::UnknownWorkflowState {
                    workflow: self.name.clone(),
                    state: state.clone(),
                });
            }
        }
        Ok(Workflow {
            name: self.name,
            start: self.start,
            states: self.states,
            permits: self.permits,
            visibility: self.visibility,
        })
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::access::actions;

    fn review_flow(reviewers: Uuid, public: Uuid) -> Workflow {
        Workflow::builder("listing", "pending")
            .state("published")
            .permit("pending", WorkflowGrant::owner(&["read", "update", "delete"]))
            .permit("pending", WorkflowGrant::group(reviewers, &["read", "update"]))
            .permit("published", WorkflowGrant::owner(&["read", "delete"]))
            .permit("published", WorkflowGrant::group(public, &[actions::READ]))
            .visible("pending", "*", vec![WorkflowSubject::Owner])
            .build()
            .unwrap()
    }

    #[test]
    fn test_owner_grants_bind_to_owner() {
        let reviewers = Uuid::new_v4();
        let owner = Uuid::new_v4();
        let flow = review_flow(reviewers, Uuid::new_v4());
        let entries = flow.permissions_for("pending", Some(owner));
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].subject(), Subject::User(owner));
        assert!(entries[0].allows("update"));
        assert_eq!(entries[1].subject(), Subject::Group(reviewers));
        assert!(!entries[1].allows("delete"));
    }

    #[test]
    fn test_owner_grants_dropped_without_owner() {
        let reviewers = Uuid::new_v4();
        let flow = review_flow(reviewers, Uuid::new_v4());
        let entries = flow.permissions_for("pending", None);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].subject(), Subject::Group(reviewers));
    }

    #[test]
    fn test_unknown_state_has_no_grants() {
        let flow = review_flow(Uuid::new_v4(), Uuid::new_v4());
        assert!(!flow.has_state("archived"));
        assert!(flow.permissions_for("archived", None).is_empty());
    }

    #[test]
    fn test_visibility_projection() {
        let owner = Uuid::new_v4();
        let flow = review_flow(Uuid::new_v4(), Uuid::new_v4());
        let map = flow.visibility_for("pending", Some(owner));
        let rule = map.get("*").unwrap();
        assert_eq!(rule.users, vec![owner]);
        assert!(flow.visibility_for("published", Some(owner)).is_empty());
    }

    #[test]
    fn test_builder_rejects_undeclared_state() {
        let err = Workflow::builder("listing", "pending")
            .permit("published", WorkflowGrant::owner(&["read"]))
            .build()
            .unwrap_err();
        assert!(matches!(err, SchemaError::UnknownWorkflowState { .. }));
    }
}
