#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
//! Resource schema model: field descriptors, declarative validation and
//! resolution rules, access structures, workflows, and compound indexes.
//!
//! This crate is pure data plus pure functions over it. The engine crate
//! interprets these definitions per request; nothing here performs I/O.

pub mod access;
pub mod field;
pub mod index;
pub mod rules;
pub mod schema;
pub mod workflow;

pub use access::{PermissionEntry, Subject, VisibilityMap, VisibilityRule, actions};
pub use field::{FieldDescriptor, FieldDescriptorBuilder, FieldKind, FieldMode};
pub use index::{CompoundIndex, SortDir, SortKey, canonicalize};
pub use rules::{
    AccessPolicy, AccessShape, MergeStrategy, QueryShape, RequireCondition, RequireOutcome,
    RequireRule, ResolverSpec, TagRule, ValidatorSpec,
};
pub use schema::{
    IDENTITY_FIELD, ResourceSchema, ResourceSchemaBuilder, SchemaError, SchemaMetadataProvider,
    UPDATED_FIELD,
};
pub use workflow::{Workflow, WorkflowBuilder, WorkflowGrant, WorkflowSubject};
