//! The resource pipeline: schema-driven create, update, find and remove.
//!
//! Every operation follows the same discipline. Reads compile the
//! request into a [`StoreQuery`](gatekit_query::StoreQuery) whose filter
//! is scoped to the acting principal before the store sees it. Writes
//! run the field pass: validators and resolvers walk the descriptors in
//! dependency layers, producing a validated diff that is the only thing
//! ever handed to the store.

use std::sync::Arc;

use futures::future::join_all;
use gatekit_query::{FilterNode, PageLimits, QueryCompiler};
use gatekit_schema::{
    AccessShape, FieldDescriptor, FieldMode, MergeStrategy, ResolverSpec, SchemaMetadataProvider,
    VisibilityMap, actions,
};
use serde_json::{Value, json};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::context::{FieldCx, RequestContext, is_absent};
use crate::directory::Directory;
use crate::error::Error;
use crate::permission::{PermissionEngine, may_view};
use crate::requires;
use crate::resolve;
use crate::store::{Document, DocumentStore, Encryptor};
use crate::validate;

/// Shared infrastructure seams handed to every pipeline.
#[derive(Clone)]
pub struct Services {
    pub directory: Arc<Directory>,
    pub store: Arc<dyn DocumentStore>,
    pub encryptor: Arc<dyn Encryptor>,
}

/// What one field contributed to the validated diff.
enum FieldOutcome {
    /// Nothing to write; the stored value (if any) stands.
    Skip,
    /// Write this value.
    Set(Value),
    /// Explicitly null the stored value.
    Clear,
}

/// Schema-driven engine for one resource type.
pub struct ResourcePipeline {
    schema: Arc<dyn SchemaMetadataProvider>,
    services: Services,
    permissions: PermissionEngine,
    compiler: QueryCompiler,
}

impl ResourcePipeline {
    #[must_use]
    pub fn new(schema: Arc<dyn SchemaMetadataProvider>, services: Services) -> Self {
        let permissions = PermissionEngine::new(Arc::clone(&services.directory));
        Self {
            schema,
            services,
            permissions,
            compiler: QueryCompiler::new(),
        }
    }

    /// Replace the default pagination limits.
    #[must_use]
    pub fn with_limits(mut self, limits: PageLimits) -> Self {
        self.compiler = QueryCompiler::with_limits(limits);
        self
    }

    /// Validate and resolve `ctx.payload` into a new document and insert
    /// it. The validated diff is stamped on `ctx.validated`.
    ///
    /// # Errors
    ///
    /// Field failures surface as [`Error::InvalidField`] or
    /// [`Error::MissingField`]; store faults pass through.
    #[instrument(skip(self, ctx), fields(resource = self.schema.resource()))]
    pub async fn create(&self, ctx: &mut RequestContext) -> Result<Document, Error> {
        let diff = self.run_field_pass(ctx).await?;
        ctx.validated = Some(diff.clone());
        let created = self
            .services
            .store
            .insert(self.schema.resource(), diff)
            .await?;
        if let Some(id) = created
            .get(self.schema.identity_field())
            .and_then(Value::as_str)
        {
            info!(id, "document created");
        }
        Ok(created)
    }

    /// Load the target document, reduce the payload to fields the caller
    /// may see, run the field pass against the stored document and apply
    /// the resulting diff.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] when the id is malformed, the document
    /// does not exist, or the caller holds no `update` grant on it; the
    /// three cases stay indistinguishable to the caller.
    #[instrument(skip(self, ctx), fields(resource = self.schema.resource()))]
    pub async fn update(&self, ctx: &mut RequestContext) -> Result<Document, Error> {
        let id = parse_target(ctx.id.as_deref())?;
        let filter = self.authorized_target(ctx, id, actions::UPDATE).await?;
        let Some(found) = self
            .services
            .store
            .find_one(self.schema.resource(), &filter)
            .await?
        else {
            warn!(%id, "update target missing or not permitted");
            return Err(Error::NotFound);
        };
        if !self.permissions.is_admin(ctx.caller.as_ref()).await? {
            if let Some(map) = stored_visibility(self.schema.as_ref(), &found) {
                ctx.payload
                    .retain(|field, _| may_view(&map, field, ctx.caller.as_ref()));
            }
        }
        ctx.found = Some(found);

        let diff = self.run_field_pass(ctx).await?;
        ctx.validated = Some(diff.clone());
        let Some(updated) = self
            .services
            .store
            .update(self.schema.resource(), id, diff)
            .await?
        else {
            warn!(%id, "document vanished during update");
            return Err(Error::NotFound);
        };
        info!(%id, "document updated");
        Ok(updated)
    }

    /// Compile the search request into a store plan, scope its filter to
    /// the caller and execute it. The compiled plan is stamped on
    /// `ctx.query`.
    ///
    /// # Errors
    ///
    /// Query compilation failures surface as [`Error::Query`].
    #[instrument(skip(self, ctx), fields(resource = self.schema.resource()))]
    pub async fn find(&self, ctx: &mut RequestContext) -> Result<Vec<Document>, Error> {
        let request = ctx.search.as_query();
        let filter = self.compiler.filter(request.filter, self.schema.as_ref())?;
        let scoped = self
            .permissions
            .authorize(ctx.caller.as_ref(), actions::READ, filter)
            .await?;
        let query = self.compiler.plan(scoped, &request, self.schema.as_ref())?;
        let documents = self
            .services
            .store
            .find(self.schema.resource(), &query)
            .await?;
        debug!(returned = documents.len(), "find executed");
        ctx.query = Some(query);
        Ok(documents)
    }

    /// Fetch one document by id, subject to the caller's `read` grant.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for a malformed id, a missing document
    /// or an unpermitted one alike.
    #[instrument(skip(self, ctx), fields(resource = self.schema.resource()))]
    pub async fn find_one(&self, ctx: &mut RequestContext) -> Result<Document, Error> {
        let id = parse_target(ctx.id.as_deref())?;
        let filter = self.authorized_target(ctx, id, actions::READ).await?;
        let Some(document) = self
            .services
            .store
            .find_one(self.schema.resource(), &filter)
            .await?
        else {
            return Err(Error::NotFound);
        };
        ctx.found = Some(document.clone());
        Ok(document)
    }

    /// Remove one document by id, subject to the caller's `delete` grant.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] when nothing matched the scoped
    /// filter, malformed ids included.
    #[instrument(skip(self, ctx), fields(resource = self.schema.resource()))]
    pub async fn remove(&self, ctx: &mut RequestContext) -> Result<(), Error> {
        let id = parse_target(ctx.id.as_deref())?;
        let filter = self.authorized_target(ctx, id, actions::DELETE).await?;
        if self
            .services
            .store
            .remove(self.schema.resource(), &filter)
            .await?
        {
            info!(%id, "document removed");
            Ok(())
        } else {
            warn!(%id, "remove target missing or not permitted");
            Err(Error::NotFound)
        }
    }

    /// Identity clause plus the caller's permit filter for `action`.
    async fn authorized_target(
        &self,
        ctx: &RequestContext,
        id: Uuid,
        action: &str,
    ) -> Result<FilterNode, Error> {
        let base = FilterNode::eq(self.schema.identity_field(), json!(id));
        let scoped = self
            .permissions
            .authorize(ctx.caller.as_ref(), action, Some(base.clone()))
            .await?;
        Ok(scoped.unwrap_or(base))
    }

    /// Walk the descriptors in dependency layers, validating and
    /// resolving each field, and assemble the validated diff.
    async fn run_field_pass(&self, ctx: &RequestContext) -> Result<Document, Error> {
        let schema = self.schema.as_ref();
        let fields = schema.fields();
        let mut working = strip_server_fields(schema, &ctx.payload);
        let mut diff = Document::new();

        for layer in resolve::layers(schema)? {
            let mut pending = Vec::with_capacity(layer.len());
            for &index in &layer {
                pending.push(self.process_field(ctx, &fields[index], &working));
            }
            let results = join_all(pending).await;
            for (&index, result) in layer.iter().zip(results) {
                let name = fields[index].name();
                match result? {
                    FieldOutcome::Skip => {}
                    FieldOutcome::Set(value) => {
                        working.insert(name.to_owned(), value.clone());
                        diff.insert(name.to_owned(), value);
                    }
                    FieldOutcome::Clear => {
                        working.shift_remove(name);
                        diff.insert(name.to_owned(), Value::Null);
                    }
                }
            }
        }

        stamp_verified_flags(schema, ctx.stored(), &mut diff);
        let image = final_image(ctx.stored(), &diff);
        requires::enforce(schema, &image)?;
        Ok(diff)
    }

    async fn process_field(
        &self,
        ctx: &RequestContext,
        descriptor: &FieldDescriptor,
        working: &Document,
    ) -> Result<FieldOutcome, Error> {
        let cx = FieldCx {
            field: descriptor.name(),
            schema: self.schema.as_ref(),
            caller: ctx.caller.as_ref(),
            payload: working,
            overrides: &ctx.overrides,
            stored: ctx.stored(),
            updating: ctx.found.is_some(),
        };
        let submitted = ctx.submitted(descriptor.name());
        match descriptor.mode() {
            FieldMode::Server => self.server_field(&cx, descriptor, submitted).await,
            FieldMode::Hybrid(strategy) => {
                self.hybrid_field(&cx, descriptor, *strategy, submitted).await
            }
            FieldMode::Caller => self.caller_field(&cx, descriptor, submitted).await,
        }
    }

    /// Server fields: the resolver computes the value, the validator (if
    /// any) checks the resolved value, and the caller's submission only
    /// matters to defaulting resolvers.
    async fn server_field(
        &self,
        cx: &FieldCx<'_>,
        descriptor: &FieldDescriptor,
        submitted: Option<&Value>,
    ) -> Result<FieldOutcome, Error> {
        let resolver = declared_resolver(descriptor)?;
        match self.run_resolver(cx, resolver, submitted).await? {
            Some(value) => {
                self.run_validator(cx, descriptor, &value).await?;
                Ok(FieldOutcome::Set(value))
            }
            None if descriptor.required() => {
                Err(Error::MissingField(descriptor.name().to_owned()))
            }
            None => Ok(FieldOutcome::Skip),
        }
    }

    /// Hybrid fields: the caller's submission is validated as submitted,
    /// then merged over the resolver baseline. Validating before the
    /// merge keeps shrink checks honest; the merge can only re-add what
    /// the resolver grants anyway.
    async fn hybrid_field(
        &self,
        cx: &FieldCx<'_>,
        descriptor: &FieldDescriptor,
        strategy: MergeStrategy,
        submitted: Option<&Value>,
    ) -> Result<FieldOutcome, Error> {
        let submitted = present(submitted);
        if let Some(value) = submitted {
            self.run_validator(cx, descriptor, value).await?;
        }
        let resolver = declared_resolver(descriptor)?;
        let merged = match self.run_resolver(cx, resolver, submitted).await? {
            Some(base) => resolve::merge(strategy, base, submitted),
            None => match submitted {
                Some(value) => value.clone(),
                None if descriptor.required() => {
                    return Err(Error::MissingField(descriptor.name().to_owned()));
                }
                None => return Ok(FieldOutcome::Skip),
            },
        };
        if descriptor.required() && is_absent(Some(&merged)) {
            return Err(Error::MissingField(descriptor.name().to_owned()));
        }
        Ok(FieldOutcome::Set(merged))
    }

    /// Caller fields: validate what was submitted; fill from a defaulting
    /// resolver when absent; on update, absence clears the stored value
    /// except for encrypted fields, which carry forward.
    async fn caller_field(
        &self,
        cx: &FieldCx<'_>,
        descriptor: &FieldDescriptor,
        submitted: Option<&Value>,
    ) -> Result<FieldOutcome, Error> {
        if let Some(value) = present(submitted) {
            // An unchanged ciphertext round-tripped by the client is not
            // plaintext; skip before the validator can reject it.
            if descriptor.encrypted() && cx.updating && cx.stored_value() == Some(value) {
                return Ok(FieldOutcome::Skip);
            }
            self.run_validator(cx, descriptor, value).await?;
            if descriptor.encrypted() {
                return self.encrypt_value(cx, value).await;
            }
            return Ok(FieldOutcome::Set(value.clone()));
        }

        if let Some(value) = self.default_from_resolver(cx, descriptor, submitted).await? {
            return Ok(FieldOutcome::Set(value));
        }

        if cx.updating {
            return absent_on_update(cx, descriptor);
        }
        if descriptor.required() {
            return Err(Error::MissingField(descriptor.name().to_owned()));
        }
        Ok(FieldOutcome::Skip)
    }

    /// Defaulting resolver on a caller field: fills only when the caller
    /// left the field absent, and the result is validated like any
    /// server-produced value.
    async fn default_from_resolver(
        &self,
        cx: &FieldCx<'_>,
        descriptor: &FieldDescriptor,
        submitted: Option<&Value>,
    ) -> Result<Option<Value>, Error> {
        let Some(resolver) = descriptor.resolver() else {
            return Ok(None);
        };
        let resolved = self.run_resolver(cx, resolver, submitted).await?;
        let Some(value) = resolved.filter(|value| !is_absent(Some(value))) else {
            return Ok(None);
        };
        self.run_validator(cx, descriptor, &value).await?;
        Ok(Some(value))
    }

    async fn encrypt_value(&self, cx: &FieldCx<'_>, value: &Value) -> Result<FieldOutcome, Error> {
        let Some(plaintext) = value.as_str() else {
            return Err(cx.invalid("must be a string"));
        };
        let cipher = self.services.encryptor.encrypt(plaintext).await?;
        Ok(FieldOutcome::Set(Value::String(cipher)))
    }

    async fn run_resolver(
        &self,
        cx: &FieldCx<'_>,
        resolver: &ResolverSpec,
        submitted: Option<&Value>,
    ) -> Result<Option<Value>, Error> {
        resolve::apply(
            cx,
            &self.services.directory,
            &self.permissions,
            resolver,
            submitted,
        )
        .await
    }

    async fn run_validator(
        &self,
        cx: &FieldCx<'_>,
        descriptor: &FieldDescriptor,
        value: &Value,
    ) -> Result<(), Error> {
        match descriptor.validator() {
            Some(validator) => {
                validate::apply(
                    cx,
                    &self.services.directory,
                    &self.permissions,
                    validator,
                    value,
                )
                .await
            }
            None => Ok(()),
        }
    }
}

/// The submitted value, unless it counts as absent.
fn present(value: Option<&Value>) -> Option<&Value> {
    if is_absent(value) { None } else { value }
}

/// Caller field absent from an update payload. Encrypted values carry
/// forward; everything else present on the stored document is
/// explicitly cleared.
fn absent_on_update(cx: &FieldCx<'_>, descriptor: &FieldDescriptor) -> Result<FieldOutcome, Error> {
    if descriptor.encrypted() {
        if descriptor.required() && is_absent(cx.stored_value()) {
            return Err(Error::MissingField(descriptor.name().to_owned()));
        }
        return Ok(FieldOutcome::Skip);
    }
    if descriptor.required() {
        return Err(Error::MissingField(descriptor.name().to_owned()));
    }
    if cx.stored_value().is_some_and(|value| !value.is_null()) {
        return Ok(FieldOutcome::Clear);
    }
    Ok(FieldOutcome::Skip)
}

/// A target id must parse as a UUID; anything else reads as a missing
/// document, never as a validation error.
fn parse_target(id: Option<&str>) -> Result<Uuid, Error> {
    id.and_then(|raw| Uuid::parse_str(raw).ok())
        .ok_or(Error::NotFound)
}

/// Working payload for the field pass: the caller's submission minus
/// server-owned fields, so resolver output is the only path a server
/// value can take into the document.
fn strip_server_fields(schema: &dyn SchemaMetadataProvider, payload: &Document) -> Document {
    let mut working = payload.clone();
    for descriptor in schema.fields() {
        if matches!(descriptor.mode(), FieldMode::Server) {
            working.shift_remove(descriptor.name());
        }
    }
    working
}

/// Stored visibility map of the loaded document, located through the
/// schema's visibility-producing resolver.
fn stored_visibility(
    schema: &dyn SchemaMetadataProvider,
    found: &Document,
) -> Option<VisibilityMap> {
    let field = schema
        .fields()
        .iter()
        .find(|descriptor| {
            matches!(
                descriptor.resolver(),
                Some(ResolverSpec::Access {
                    shape: AccessShape::Visibility,
                    ..
                })
            )
        })
        .map(FieldDescriptor::name)?;
    let value = found.get(field)?;
    serde_json::from_value(value.clone()).ok()
}

/// Reset `<field>Verified` companions for verify-flagged fields whose
/// value changed in this write. Untouched fields keep their stored flag
/// by staying out of the diff.
fn stamp_verified_flags(
    schema: &dyn SchemaMetadataProvider,
    stored: Option<&Document>,
    diff: &mut Document,
) {
    for descriptor in schema.fields() {
        if !descriptor.verify() {
            continue;
        }
        let name = descriptor.name();
        let previous = stored.and_then(|doc| doc.get(name));
        let changed = diff.get(name).is_some_and(|new| previous != Some(new));
        if changed {
            diff.insert(format!("{name}Verified"), Value::Bool(false));
        }
    }
}

/// The document as it will stand after the write: the stored image
/// overlaid with the diff. Conditional-require rules judge this, not
/// the diff.
fn final_image(stored: Option<&Document>, diff: &Document) -> Document {
    let mut image = stored.cloned().unwrap_or_default();
    for (key, value) in diff {
        image.insert(key.clone(), value.clone());
    }
    image
}

fn declared_resolver(descriptor: &FieldDescriptor) -> Result<&ResolverSpec, Error> {
    descriptor.resolver().ok_or_else(|| {
        Error::InvalidServerState(format!(
            "field '{}' is server-owned but has no resolver",
            descriptor.name()
        ))
    })
}
