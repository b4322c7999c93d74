//! Field descriptors: the per-field metadata a resource schema declares.

use crate::rules::{MergeStrategy, QueryShape, RequireRule, ResolverSpec, ValidatorSpec};

/// Primitive shape of a field's value, used for filter/cursor coercion.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldKind {
    String,
    Number,
    Boolean,
    Timestamp,
    Reference,
    Array,
    Object,
}

impl std::fmt::Display for FieldKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FieldKind::String => "string",
            FieldKind::Number => "number",
            FieldKind::Boolean => "boolean",
            FieldKind::Timestamp => "timestamp",
            FieldKind::Reference => "reference",
            FieldKind::Array => "array",
            FieldKind::Object => "object",
        };
        write!(f, "{name}")
    }
}

/// Who supplies a field's value.
///
/// `Caller` fields come from the request payload. `Server` fields are
/// computed by a resolver and any caller value is ignored. `Hybrid` fields
/// merge the resolver output with the caller value using the carried
/// strategy, then validate the merged result.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldMode {
    Caller,
    Server,
    Hybrid(MergeStrategy),
}

/// Declarative metadata for one field of a resource.
///
/// Descriptors are loaded once per resource and treated as read-only
/// configuration at request time.
#[derive(Clone, Debug)]
#[allow(clippy::struct_excessive_bools)]
pub struct FieldDescriptor {
    name: String,
    kind: FieldKind,
    mode: FieldMode,
    required: bool,
    searchable: bool,
    sortable: bool,
    encrypted: bool,
    verify: bool,
    depends_on: Option<String>,
    validator: Option<ValidatorSpec>,
    resolver: Option<ResolverSpec>,
    query: Option<QueryShape>,
    require: Option<RequireRule>,
}

impl FieldDescriptor {
    #[must_use]
    pub fn builder(name: &str, kind: FieldKind) -> FieldDescriptorBuilder {
        FieldDescriptorBuilder {
            inner: FieldDescriptor {
                name: name.to_owned(),
                kind,
                mode: FieldMode::Caller,
                required: false,
                searchable: false,
                sortable: false,
                encrypted: false,
                verify: false,
                depends_on: None,
                validator: None,
                resolver: None,
                query: None,
                require: None,
            },
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn kind(&self) -> FieldKind {
        self.kind
    }

    #[must_use]
    pub fn mode(&self) -> &FieldMode {
        &self.mode
    }

    #[must_use]
    pub fn is_server(&self) -> bool {
        matches!(self.mode, FieldMode::Server)
    }

    #[must_use]
    pub fn is_hybrid(&self) -> bool {
        matches!(self.mode, FieldMode::Hybrid(_))
    }

    #[must_use]
    pub fn required(&self) -> bool {
        self.required
    }

    #[must_use]
    pub fn searchable(&self) -> bool {
        self.searchable
    }

    #[must_use]
    pub fn sortable(&self) -> bool {
        self.sortable
    }

    #[must_use]
    pub fn encrypted(&self) -> bool {
        self.encrypted
    }

    /// Whether the field carries a companion verified flag that must be
    /// reset when its value changes.
    #[must_use]
    pub fn verify(&self) -> bool {
        self.verify
    }

    #[must_use]
    pub fn depends_on(&self) -> Option<&str> {
        self.depends_on.as_deref()
    }

    #[must_use]
    pub fn validator(&self) -> Option<&ValidatorSpec> {
        self.validator.as_ref()
    }

    #[must_use]
    pub fn resolver(&self) -> Option<&ResolverSpec> {
        self.resolver.as_ref()
    }

    #[must_use]
    pub fn query(&self) -> Option<&QueryShape> {
        self.query.as_ref()
    }

    #[must_use]
    pub fn require(&self) -> Option<&RequireRule> {
        self.require.as_ref()
    }
}

/// Builder for [`FieldDescriptor`].
#[must_use]
pub struct FieldDescriptorBuilder {
    inner: FieldDescriptor,
}

impl FieldDescriptorBuilder {
    pub fn required(mut self) -> Self {
        self.inner.required = true;
        self
    }

    pub fn searchable(mut self) -> Self {
        self.inner.searchable = true;
        self
    }

    pub fn sortable(mut self) -> Self {
        self.inner.sortable = true;
        self
    }

    pub fn encrypted(mut self) -> Self {
        self.inner.encrypted = true;
        self
    }

    pub fn verify(mut self) -> Self {
        self.inner.verify = true;
        self
    }

    /// Defer this field until `field` has finished validating.
    pub fn depends_on(mut self, field: &str) -> Self {
        self.inner.depends_on = Some(field.to_owned());
        self
    }

    /// Mark the field server-only: the resolver computes it and any
    /// caller-supplied value is ignored.
    pub fn server(mut self, resolver: ResolverSpec) -> Self {
        self.inner.mode = FieldMode::Server;
        self.inner.resolver = Some(resolver);
        self
    }

    /// Mark the field hybrid: the resolver output and the caller value are
    /// merged with `strategy` before validation.
    pub fn hybrid(mut self, resolver: ResolverSpec, strategy: MergeStrategy) -> Self {
        self.inner.mode = FieldMode::Hybrid(strategy);
        self.inner.resolver = Some(resolver);
        self
    }

    /// Attach a resolver that only fills the field when the caller leaves
    /// it absent.
    pub fn default_value(mut self, resolver: ResolverSpec) -> Self {
        self.inner.resolver = Some(resolver);
        self
    }

    pub fn validator(mut self, validator: ValidatorSpec) -> Self {
        self.inner.validator = Some(validator);
        self
    }

    /// Attach a filter transform used when the field appears in a read
    /// request's filter object.
    pub fn query(mut self, shape: QueryShape) -> Self {
        self.inner.query = Some(shape);
        self
    }

    /// Attach a conditional-require rule evaluated after the field pass.
    pub fn require(mut self, rule: RequireRule) -> Self {
        self.inner.require = Some(rule);
        self
    }

    #[must_use]
    pub fn build(self) -> FieldDescriptor {
        self.inner
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::rules::TagRule;

    #[test]
    fn test_builder_defaults() {
        let field = FieldDescriptor::builder("title", FieldKind::String).build();
        assert_eq!(field.name(), "title");
        assert_eq!(field.kind(), FieldKind::String);
        assert_eq!(*field.mode(), FieldMode::Caller);
        assert!(!field.required());
        assert!(!field.searchable());
        assert!(!field.sortable());
        assert!(!field.encrypted());
        assert!(field.validator().is_none());
    }

    #[test]
    fn test_builder_flags() {
        let field = FieldDescriptor::builder("price", FieldKind::Number)
            .required()
            .searchable()
            .sortable()
            .validator(ValidatorSpec::Number {
                enum_values: None,
                min: Some(0.0),
                max: None,
            })
            .build();
        assert!(field.required());
        assert!(field.searchable());
        assert!(field.sortable());
        assert!(field.validator().is_some());
    }

    #[test]
    fn test_server_mode_carries_resolver() {
        let field = FieldDescriptor::builder("createdAt", FieldKind::Timestamp)
            .server(ResolverSpec::CreatedAt)
            .build();
        assert!(field.is_server());
        assert_eq!(field.resolver(), Some(&ResolverSpec::CreatedAt));
    }

    #[test]
    fn test_hybrid_mode_carries_strategy() {
        let field = FieldDescriptor::builder("tags", FieldKind::Array)
            .hybrid(
                ResolverSpec::Tags {
                    rules: vec![TagRule {
                        source: "category".to_owned(),
                        tag: "listing:category".to_owned(),
                    }],
                },
                MergeStrategy::Tags,
            )
            .build();
        assert!(field.is_hybrid());
        assert_eq!(*field.mode(), FieldMode::Hybrid(MergeStrategy::Tags));
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(FieldKind::Timestamp.to_string(), "timestamp");
        assert_eq!(FieldKind::Reference.to_string(), "reference");
    }
}
