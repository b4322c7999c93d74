//! Resource schemas and the metadata trait the engine consumes.

use std::collections::HashMap;

use thiserror::Error;

use crate::field::FieldDescriptor;
use crate::index::{CompoundIndex, SortKey};
use crate::rules::{AccessPolicy, ResolverSpec};
use crate::workflow::Workflow;

/// Default identity field name, the store's primary key.
pub const IDENTITY_FIELD: &str = "_id";

/// Default update-stamp field name, the lead key of the default sort.
pub const UPDATED_FIELD: &str = "updatedAt";

/// Schema construction failure.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("duplicate field '{0}'")]
    DuplicateField(String),

    #[error("field '{field}' depends on unknown field '{target}'")]
    UnknownDependency { field: String, target: String },

    #[error("dependency cycle through field '{0}'")]
    DependencyCycle(String),

    #[error("field '{field}' references unknown workflow '{workflow}'")]
    UnknownWorkflow { field: String, workflow: String },

    #[error("compound index references unknown field '{0}'")]
    UnknownIndexField(String),

    #[error("workflow '{workflow}' declares unknown state '{state}'")]
    UnknownWorkflowState { workflow: String, state: String },
}

/// Per-resource metadata the validation and query layers interrogate.
///
/// Implementations must be cheap to call; the engine reads them on every
/// request.
pub trait SchemaMetadataProvider: Send + Sync {
    /// Resource name, used in diagnostics and log fields.
    fn resource(&self) -> &str;

    /// Ordered field descriptors. Order fixes the scan order of the write
    /// path and the application order of resolved values.
    fn fields(&self) -> &[FieldDescriptor];

    /// Compound indexes the store maintains for this resource.
    fn compound_indexes(&self) -> &[CompoundIndex];

    /// Workflow registered under `name`, if any.
    fn workflow(&self, name: &str) -> Option<&Workflow>;

    /// Action vocabulary permission entries may grant.
    fn actions(&self) -> &[String];

    fn identity_field(&self) -> &str {
        IDENTITY_FIELD
    }

    fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields().iter().find(|f| f.name() == name)
    }

    /// Sort applied when a find request carries none.
    fn default_sort(&self) -> Vec<SortKey> {
        vec![
            SortKey::desc(UPDATED_FIELD),
            SortKey::desc(self.identity_field()),
        ]
    }
}

/// Concrete, validated schema for one resource type.
#[derive(Clone, Debug)]
pub struct ResourceSchema {
    resource: String,
    identity_field: String,
    fields: Vec<FieldDescriptor>,
    indexes: Vec<CompoundIndex>,
    workflows: HashMap<String, Workflow>,
    actions: Vec<String>,
}

impl ResourceSchema {
    #[must_use]
    pub fn builder(resource: &str) -> ResourceSchemaBuilder {
        ResourceSchemaBuilder {
            resource: resource.to_owned(),
            identity_field: IDENTITY_FIELD.to_owned(),
            fields: Vec::new(),
            indexes: Vec::new(),
            workflows: HashMap::new(),
            actions: vec![
                crate::access::actions::ANY.to_owned(),
                crate::access::actions::READ.to_owned(),
                crate::access::actions::UPDATE.to_owned(),
                crate::access::actions::DELETE.to_owned(),
            ],
        }
    }
}

impl SchemaMetadataProvider for ResourceSchema {
    fn resource(&self) -> &str {
        &self.resource
    }

    fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    fn compound_indexes(&self) -> &[CompoundIndex] {
        &self.indexes
    }

    fn workflow(&self, name: &str) -> Option<&Workflow> {
        self.workflows.get(name)
    }

    fn actions(&self) -> &[String] {
        &self.actions
    }

    fn identity_field(&self) -> &str {
        &self.identity_field
    }
}

/// Builder for [`ResourceSchema`].
pub struct ResourceSchemaBuilder {
    resource: String,
    identity_field: String,
    fields: Vec<FieldDescriptor>,
    indexes: Vec<CompoundIndex>,
    workflows: HashMap<String, Workflow>,
    actions: Vec<String>,
}

impl ResourceSchemaBuilder {
    #[must_use]
    pub fn identity_field(mut self, name: &str) -> Self {
        self.identity_field = name.to_owned();
        self
    }

    #[must_use]
    pub fn field(mut self, field: FieldDescriptor) -> Self {
        self.fields.push(field);
        self
    }

    #[must_use]
    pub fn index(mut self, index: CompoundIndex) -> Self {
        self.indexes.push(index);
        self
    }

    #[must_use]
    pub fn workflow(mut self, workflow: Workflow) -> Self {
        self.workflows.insert(workflow.name().to_owned(), workflow);
        self
    }

    /// Replaces the default action vocabulary.
    #[must_use]
    pub fn actions(mut self, actions: &[&str]) -> Self {
        self.actions = actions.iter().map(|a| (*a).to_owned()).collect();
        self
    }

    /// Build and validate the schema.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - two fields share a name
    /// - a `depends_on` target is not a declared field, or forms a cycle
    /// - a field's resolver names a workflow that was never registered
    /// - a compound index key is neither a declared field nor the
    ///   identity field
    pub fn build(self) -> Result<ResourceSchema, SchemaError> {
        let mut seen: Vec<&str> = Vec::with_capacity(self.fields.len());
        for field in &self.fields {
            if seen.contains(&field.name()) {
                return Err(SchemaError::DuplicateField(field.name().to_owned()));
            }
            seen.push(field.name());
        }

        for field in &self.fields {
            if let Some(target) = field.depends_on() {
                if !seen.contains(&target) {
                    return Err(SchemaError::UnknownDependency {
                        field: field.name().to_owned(),
                        target: target.to_owned(),
                    });
                }
            }
            if let Some(workflow) = field.resolver().and_then(resolver_workflow) {
                if !self.workflows.contains_key(workflow) {
                    return Err(SchemaError::UnknownWorkflow {
                        field: field.name().to_owned(),
                        workflow: workflow.to_owned(),
                    });
                }
            }
        }

        check_dependency_cycles(&self.fields)?;

        for index in &self.indexes {
            for key in index.keys() {
                if key.field != self.identity_field && !seen.contains(&key.field.as_str()) {
                    return Err(SchemaError::UnknownIndexField(key.field.clone()));
                }
            }
        }

        Ok(ResourceSchema {
            resource: self.resource,
            identity_field: self.identity_field,
            fields: self.fields,
            indexes: self.indexes,
            workflows: self.workflows,
            actions: self.actions,
        })
    }
}

/// Workflow name a resolver binds to, if it binds one.
fn resolver_workflow(spec: &ResolverSpec) -> Option<&str> {
    match spec {
        ResolverSpec::Status { workflow } => Some(workflow),
        ResolverSpec::Access {
            policy: AccessPolicy::Workflow { name },
            ..
        } => Some(name),
        _ => None,
    }
}

/// Walks `depends_on` edges; any back-edge is a cycle.
fn check_dependency_cycles(fields: &[FieldDescriptor]) -> Result<(), SchemaError> {
    for start in fields {
        let mut hops = 0usize;
        let mut current = start;
        while let Some(target) = current.depends_on() {
            hops += 1;
            if hops > fields.len() {
                return Err(SchemaError::DependencyCycle(start.name().to_owned()));
            }
            let Some(next) = fields.iter().find(|f| f.name() == target) else {
                break;
            };
            current = next;
        }
    }
    Ok(())
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::field::FieldKind;
    use crate::index::SortDir;
    use crate::rules::ResolverSpec;

    fn text(name: &str) -> FieldDescriptor {
        FieldDescriptor::builder(name, FieldKind::String).build()
    }

    #[test]
    fn test_build_valid_schema() {
        let schema = ResourceSchema::builder("listings")
            .field(text("title"))
            .field(
                FieldDescriptor::builder("updatedAt", FieldKind::Timestamp)
                    .sortable()
                    .server(ResolverSpec::UpdatedAt)
                    .build(),
            )
            .index(CompoundIndex::of(&[
                ("updatedAt", SortDir::Desc),
                ("_id", SortDir::Desc),
            ]))
            .build()
            .unwrap();
        assert_eq!(schema.resource(), "listings");
        assert_eq!(schema.identity_field(), "_id");
        assert!(schema.field("title").is_some());
    }

    #[test]
    fn test_rejects_duplicate_field() {
        let err = ResourceSchema::builder("listings")
            .field(text("title"))
            .field(text("title"))
            .build()
            .unwrap_err();
        assert!(matches!(err, SchemaError::DuplicateField(name) if name == "title"));
    }

    #[test]
    fn test_rejects_unknown_dependency() {
        let err = ResourceSchema::builder("listings")
            .field(
                FieldDescriptor::builder("status", FieldKind::String)
                    .depends_on("owner")
                    .build(),
            )
            .build()
            .unwrap_err();
        assert!(matches!(err, SchemaError::UnknownDependency { .. }));
    }

    #[test]
    fn test_rejects_dependency_cycle() {
        let err = ResourceSchema::builder("listings")
            .field(
                FieldDescriptor::builder("a", FieldKind::String)
                    .depends_on("b")
                    .build(),
            )
            .field(
                FieldDescriptor::builder("b", FieldKind::String)
                    .depends_on("a")
                    .build(),
            )
            .build()
            .unwrap_err();
        assert!(matches!(err, SchemaError::DependencyCycle(_)));
    }

    #[test]
    fn test_rejects_unregistered_workflow() {
        let err = ResourceSchema::builder("listings")
            .field(
                FieldDescriptor::builder("status", FieldKind::String)
                    .server(ResolverSpec::Status {
                        workflow: "listing".to_owned(),
                    })
                    .build(),
            )
            .build()
            .unwrap_err();
        assert!(matches!(err, SchemaError::UnknownWorkflow { .. }));
    }

    #[test]
    fn test_rejects_unknown_index_field() {
        let err = ResourceSchema::builder("listings")
            .index(CompoundIndex::of(&[("price", SortDir::Asc)]))
            .build()
            .unwrap_err();
        assert!(matches!(err, SchemaError::UnknownIndexField(name) if name == "price"));
    }

    #[test]
    fn test_default_sort_uses_identity_field() {
        let schema = ResourceSchema::builder("listings")
            .identity_field("id")
            .build()
            .unwrap();
        let sort = schema.default_sort();
        assert_eq!(sort[0], SortKey::desc("updatedAt"));
        assert_eq!(sort[1], SortKey::desc("id"));
    }
}
