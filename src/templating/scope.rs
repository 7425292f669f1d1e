//! Isolated compilation scopes.
//!
//! A [`TemplateScope`] owns a frozen set of named partials, a helper registry,
//! its own Handlebars runtime registry and a cache of compiled templates keyed
//! by source text. Scopes never share mutable state: deriving a scope copies the
//! partial and helper definitions into a new builder, and the derived scope gets
//! a fresh registry and cache. Only the process-wide [`TemplateSourceCache`] is
//! shared between scopes.
//!
//! # Compiling
//!
//! ```text
//! compile(source)
//!   ├─ "" ............................ empty template, cache untouched
//!   ├─ cached source ................. same CompiledTemplate instance
//!   └─ new source
//!        parse ─► resolve (own partials first, then source cache)
//!              ─► register fetched dependencies ─► register root ─► cache
//! ```
//!
//! Concurrent compiles of the same new source share one task. Failed compiles
//! are removed from the cache so the next call retries.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::future::{self, BoxFuture, FutureExt, Shared};
use tracing::{debug, trace, warn};

use crate::identifiers::IdentifierExpander;
use crate::templating::cache::TemplateSourceCache;
use crate::templating::error::TemplateError;
use crate::templating::helpers::{HelperFn, HelperRegistry};
use crate::templating::parsed::{ParsedTemplate, compiled_template_name};
use crate::templating::references::is_remote_reference;
use crate::templating::resolver::{self, DependencyMap, TemplateLoader, reference_not_found};
use crate::templating::runtime::{self, CompiledTemplate, SharedRegistry};

/// A compile task shared by concurrent callers of one source text.
pub type CompileTask = Shared<BoxFuture<'static, Result<CompiledTemplate, TemplateError>>>;

/// Diagnostic information about the component a scope belongs to.
///
/// Included in compile failure logs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeTrace {
    /// Tag name of the owning component
    pub component_tag: Option<String>,
    /// Id of the owning component instance
    pub component_id: Option<String>,
    /// Identifier of the template the component was created from
    pub template_id: Option<String>,
}

impl fmt::Display for ScopeTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}", self.component_tag.as_deref().unwrap_or("unknown"))?;
        if let Some(id) = &self.component_id {
            write!(f, " id=\"{id}\"")?;
        }
        write!(f, ">")?;
        if let Some(template) = &self.template_id {
            write!(f, " in template '{template}'")?;
        }
        Ok(())
    }
}

/// A partial definition given to [`TemplateScopeBuilder::register_partial`].
#[derive(Debug, Clone)]
pub enum PartialSource {
    /// Markup, parsed on registration
    Text(String),
    /// An already parsed template
    Parsed(ParsedTemplate),
}

impl From<&str> for PartialSource {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for PartialSource {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&String> for PartialSource {
    fn from(text: &String) -> Self {
        Self::Text(text.clone())
    }
}

impl From<ParsedTemplate> for PartialSource {
    fn from(template: ParsedTemplate) -> Self {
        Self::Parsed(template)
    }
}

/// Mutable configuration of a scope that is not built yet.
///
/// # Examples
///
/// ```no_run
/// # fn example(engine: &tscope::templating::TemplateEngine) -> Result<(), tscope::templating::TemplateError> {
/// let scope = engine
///     .builder()
///     .register_partial("header", "<h1>{{title}}</h1>")?
///     .register_partial("page", "{{> header}}<main>{{body}}</main>")?
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct TemplateScopeBuilder {
    partials: BTreeMap<String, ParsedTemplate>,
    helpers: HelperRegistry,
    trace: Option<ScopeTrace>,
    sources: Arc<TemplateSourceCache>,
    expander: Arc<dyn IdentifierExpander>,
}

impl TemplateScopeBuilder {
    /// Create a builder without partials or helpers.
    pub fn new(sources: Arc<TemplateSourceCache>, expander: Arc<dyn IdentifierExpander>) -> Self {
        Self {
            partials: BTreeMap::new(),
            helpers: HelperRegistry::new(),
            trace: None,
            sources,
            expander,
        }
    }

    /// Register a partial under `name`.
    ///
    /// Remote-looking names (containing `:`) are expanded first, so a partial
    /// registered as `ex:footer` satisfies `{{> <http://example.org/footer>}}`.
    ///
    /// # Errors
    ///
    /// - [`TemplateError::DuplicatePartial`] if `name` is already registered
    /// - [`TemplateError::Parse`] if a text partial is not valid template syntax
    pub fn register_partial(
        mut self,
        name: &str,
        partial: impl Into<PartialSource>,
    ) -> Result<Self, TemplateError> {
        let key = if is_remote_reference(name) {
            let expanded = self.expander.expand(&[name.to_string()]);
            expanded.into_iter().next().unwrap_or_else(|| name.to_string())
        } else {
            name.to_string()
        };
        if self.partials.contains_key(&key) {
            return Err(TemplateError::DuplicatePartial {
                name: name.to_string(),
            });
        }

        let parsed = match partial.into() {
            PartialSource::Text(text) => ParsedTemplate::parse(&text, self.expander.as_ref())?,
            PartialSource::Parsed(parsed) => parsed,
        };
        self.partials.insert(key, parsed);
        Ok(self)
    }

    /// Register every `(name, partial)` pair.
    ///
    /// # Errors
    ///
    /// Fails on the first duplicate or unparsable partial.
    pub fn register_partials<I, K, V>(self, partials: I) -> Result<Self, TemplateError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<PartialSource>,
    {
        partials
            .into_iter()
            .try_fold(self, |builder, (name, partial)| builder.register_partial(name.as_ref(), partial))
    }

    /// Merge `helpers` into the builder's helpers; the new ones win.
    #[must_use]
    pub fn with_helpers(mut self, helpers: &HelperRegistry) -> Self {
        self.helpers.merge(helpers);
        self
    }

    /// Add a single helper.
    #[must_use]
    pub fn with_helper(mut self, name: &str, helper: HelperFn) -> Self {
        self.helpers.insert(name, helper);
        self
    }

    /// Attach diagnostic trace information.
    #[must_use]
    pub fn with_trace(mut self, trace: ScopeTrace) -> Self {
        self.trace = Some(trace);
        self
    }

    /// Names of the partials registered so far.
    pub fn partial_names(&self) -> impl Iterator<Item = &str> {
        self.partials.keys().map(String::as_str)
    }

    /// Freeze the builder into a scope.
    ///
    /// Creates the scope's runtime registry and registers every partial and
    /// helper into it.
    ///
    /// # Errors
    ///
    /// Returns [`TemplateError::Compile`] if the runtime rejects a partial.
    pub fn build(self) -> Result<TemplateScope, TemplateError> {
        let mut registry = runtime::new_registry(&self.helpers);
        for (name, partial) in &self.partials {
            runtime::register_partial(&mut registry, name, partial)?;
        }
        debug!(
            "Built template scope with {} partial(s) and {} helper(s)",
            self.partials.len(),
            self.helpers.len()
        );

        let compiler = Compiler {
            partials: Arc::new(self.partials),
            sources: self.sources,
            expander: self.expander,
            registry: Arc::new(RwLock::new(registry)),
        };
        Ok(TemplateScope {
            inner: Arc::new(ScopeInner {
                compiler,
                helpers: self.helpers,
                trace: self.trace,
                compiled: DashMap::new(),
            }),
        })
    }
}

impl fmt::Debug for TemplateScopeBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TemplateScopeBuilder")
            .field("partials", &self.partials.keys().collect::<Vec<_>>())
            .field("helpers", &self.helpers)
            .field("trace", &self.trace)
            .finish()
    }
}

/// Frozen compilation context.
///
/// See the [module documentation](self) for the compile algorithm.
pub struct TemplateScope {
    inner: Arc<ScopeInner>,
}

struct ScopeInner {
    compiler: Compiler,
    helpers: HelperRegistry,
    trace: Option<ScopeTrace>,
    compiled: DashMap<String, CompileTask>,
}

/// The parts of a scope a compile task needs; cloned into every task.
#[derive(Clone)]
struct Compiler {
    partials: Arc<BTreeMap<String, ParsedTemplate>>,
    sources: Arc<TemplateSourceCache>,
    expander: Arc<dyn IdentifierExpander>,
    registry: SharedRegistry,
}

impl Compiler {
    async fn compile(self, source: String) -> Result<CompiledTemplate, TemplateError> {
        debug!("Compiling template ({} bytes)", source.len());
        let parsed = ParsedTemplate::parse(&source, self.expander.as_ref())?;
        let loader = ScopeLoader {
            partials: Arc::clone(&self.partials),
            sources: Arc::clone(&self.sources),
        };
        let dependencies = resolver::resolve(&parsed, &loader).await?;
        self.install(&parsed, &dependencies)
    }

    /// Register resolved dependencies that are not own partials, then the root.
    fn install(
        &self,
        parsed: &ParsedTemplate,
        dependencies: &DependencyMap,
    ) -> Result<CompiledTemplate, TemplateError> {
        let name = compiled_template_name(parsed.source());
        let mut registry = self.registry.write().unwrap_or_else(PoisonError::into_inner);

        let mut registered = 0usize;
        for (reference, dependency) in dependencies {
            if self.partials.contains_key(reference) {
                continue;
            }
            runtime::register_partial(&mut registry, reference, dependency)?;
            registered += 1;
        }
        runtime::register_template(&mut registry, &name, parsed)?;
        debug!(
            "Compiled '{}' with {} dependencies ({} newly registered)",
            name,
            dependencies.len(),
            registered
        );

        Ok(CompiledTemplate::new(name, Arc::clone(&self.registry)))
    }
}

/// Loads references from a scope's partials, falling back to the source cache.
struct ScopeLoader {
    partials: Arc<BTreeMap<String, ParsedTemplate>>,
    sources: Arc<TemplateSourceCache>,
}

impl TemplateLoader for ScopeLoader {
    fn load(&self, reference: &str) -> BoxFuture<'static, Result<ParsedTemplate, TemplateError>> {
        if let Some(partial) = self.partials.get(reference) {
            trace!("Resolved '{}' from scope partials", reference);
            return future::ready(Ok(partial.clone())).boxed();
        }
        if is_remote_reference(reference) {
            return self.sources.fetch(reference).boxed();
        }
        future::ready(Err(reference_not_found(reference, self.partials.keys()))).boxed()
    }
}

impl TemplateScope {
    /// Compile `source` with every dependency resolved.
    ///
    /// The empty string compiles to [`CompiledTemplate::empty`] without
    /// touching the cache. Repeated calls with the same source return the same
    /// [`CompiledTemplate`] instance.
    ///
    /// # Errors
    ///
    /// Parse, resolution, fetch and runtime registration errors. Nothing is
    /// cached for a failed compile.
    pub async fn compile(&self, source: &str) -> Result<CompiledTemplate, TemplateError> {
        if source.is_empty() {
            return Ok(CompiledTemplate::empty());
        }

        let result = self.compile_task(source).await;
        if let Err(e) = &result {
            self.inner.compiled.remove_if(source, |_, task| matches!(task.peek(), Some(Err(_))));
            match &self.inner.trace {
                Some(trace) => warn!("Failed to compile template for {}: {}", trace, e),
                None => warn!("Failed to compile template: {}", e),
            }
        }
        result
    }

    fn compile_task(&self, source: &str) -> CompileTask {
        match self.inner.compiled.entry(source.to_string()) {
            Entry::Occupied(entry) => {
                trace!("Compiled template cache hit");
                entry.get().clone()
            }
            Entry::Vacant(entry) => {
                let task = self.inner.compiler.clone().compile(source.to_string()).boxed().shared();
                entry.insert(task.clone());
                task
            }
        }
    }

    /// Legacy synchronous compile: a strictly weaker form of [`TemplateScope::compile`].
    ///
    /// Uses this scope's partials only, for callers that cannot await. References that are not
    /// registered partials (including every remote reference) fail with
    /// [`TemplateError::ReferenceNotFound`]; use [`TemplateScope::compile`]
    /// whenever remote templates may be involved.
    ///
    /// # Errors
    ///
    /// Parse, resolution and runtime registration errors.
    pub fn compile_without_remote(&self, source: &str) -> Result<CompiledTemplate, TemplateError> {
        if source.is_empty() {
            return Ok(CompiledTemplate::empty());
        }
        let cached = self.inner.compiled.get(source).and_then(|task| task.peek().cloned());
        if let Some(Ok(compiled)) = cached {
            return Ok(compiled);
        }

        let compiler = &self.inner.compiler;
        let parsed = ParsedTemplate::parse(source, compiler.expander.as_ref())?;
        let dependencies = resolver::resolve_local(&parsed, &compiler.partials)?;
        let compiled = compiler.install(&parsed, &dependencies)?;

        let task: CompileTask = future::ready(Ok(compiled.clone())).boxed().shared();
        // Poll once so `peek` sees the result
        let _ = task.clone().now_or_never();
        self.inner.compiled.insert(source.to_string(), task);
        Ok(compiled)
    }

    /// Resolve the full dependency closure of `source` without compiling it.
    ///
    /// Uses the same loader as [`TemplateScope::compile`], so remote templates
    /// land in the shared source cache.
    ///
    /// # Errors
    ///
    /// Parse, resolution and fetch errors.
    pub async fn dependencies(&self, source: &str) -> Result<DependencyMap, TemplateError> {
        let compiler = &self.inner.compiler;
        let parsed = ParsedTemplate::parse(source, compiler.expander.as_ref())?;
        let loader = ScopeLoader {
            partials: Arc::clone(&compiler.partials),
            sources: Arc::clone(&compiler.sources),
        };
        resolver::resolve(&parsed, &loader).await
    }

    /// Drop this scope's compiled templates.
    pub fn clear_cache(&self) {
        let dropped = self.inner.compiled.len();
        self.inner.compiled.clear();
        debug!("Cleared {} compiled template(s)", dropped);
    }

    /// Number of cached compile tasks.
    pub fn cached_len(&self) -> usize {
        self.inner.compiled.len()
    }

    /// A builder seeded with this scope's partials, helpers and trace.
    ///
    /// The derived scope shares nothing mutable with this one.
    pub fn derive(&self) -> TemplateScopeBuilder {
        let compiler = &self.inner.compiler;
        TemplateScopeBuilder {
            partials: compiler.partials.as_ref().clone(),
            helpers: self.inner.helpers.clone(),
            trace: self.inner.trace.clone(),
            sources: Arc::clone(&compiler.sources),
            expander: Arc::clone(&compiler.expander),
        }
    }

    /// The registered partial `name`.
    pub fn partial(&self, name: &str) -> Option<&ParsedTemplate> {
        self.inner.compiler.partials.get(name)
    }

    /// Names of the registered partials.
    pub fn partial_names(&self) -> impl Iterator<Item = &str> {
        self.inner.compiler.partials.keys().map(String::as_str)
    }

    /// Name to source text of every registered partial.
    ///
    /// Enough to re-create an equivalent scope elsewhere.
    pub fn export_props(&self) -> BTreeMap<String, String> {
        self.inner
            .compiler
            .partials
            .iter()
            .map(|(name, partial)| (name.clone(), partial.source().to_string()))
            .collect()
    }

    /// Helpers available to templates compiled in this scope.
    pub fn helpers(&self) -> &HelperRegistry {
        &self.inner.helpers
    }

    /// Diagnostic trace, if any.
    pub fn trace(&self) -> Option<&ScopeTrace> {
        self.inner.trace.as_ref()
    }
}

impl fmt::Debug for TemplateScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TemplateScope")
            .field("partials", &self.inner.compiler.partials.keys().collect::<Vec<_>>())
            .field("helpers", &self.inner.helpers)
            .field("trace", &self.inner.trace)
            .field("compiled", &self.inner.compiled.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::identifiers::PrefixRegistry;
    use crate::source::MemoryContentService;
    use crate::templating::escaping::EscapingRewriter;

    fn builder(service: Arc<MemoryContentService>) -> TemplateScopeBuilder {
        let expander: Arc<dyn IdentifierExpander> =
            Arc::new(PrefixRegistry::new().with_prefix("ex", "http://example.org/"));
        let sources = Arc::new(TemplateSourceCache::new(service, Arc::clone(&expander), EscapingRewriter::default()));
        TemplateScopeBuilder::new(sources, expander).with_helpers(&HelperRegistry::with_defaults())
    }

    #[tokio::test]
    async fn test_compile_with_local_partials() {
        let scope = builder(Arc::new(MemoryContentService::new()))
            .register_partial("header", "<h1>{{uppercase title}}</h1>")
            .unwrap()
            .register_partial("page", "{{> header}}<p>{{body}}</p>")
            .unwrap()
            .build()
            .unwrap();

        let compiled = scope.compile("{{> page}}").await.unwrap();
        let html = compiled.render(&json!({"title": "hi", "body": "text"})).unwrap();
        assert_eq!(html, "<h1>HI</h1><p>text</p>");
    }

    #[tokio::test]
    async fn test_compile_is_cached_by_source() {
        let scope = builder(Arc::new(MemoryContentService::new())).build().unwrap();
        let first = scope.compile("{{a}}").await.unwrap();
        let second = scope.compile("{{a}}").await.unwrap();
        assert!(first.ptr_eq(&second));
        assert_eq!(scope.cached_len(), 1);

        scope.clear_cache();
        let third = scope.compile("{{a}}").await.unwrap();
        assert!(!first.ptr_eq(&third));
    }

    #[tokio::test]
    async fn test_empty_source_is_not_cached() {
        let scope = builder(Arc::new(MemoryContentService::new())).build().unwrap();
        let compiled = scope.compile("").await.unwrap();
        assert!(compiled.is_empty());
        assert_eq!(compiled.render(&json!({})).unwrap(), "");
        assert_eq!(scope.cached_len(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_compiles_share_one_task() {
        let service = Arc::new(MemoryContentService::new().with_latency(Duration::from_millis(20)));
        service.insert("http://example.org/a", "A");
        let scope = builder(service.clone()).build().unwrap();

        let (first, second) = tokio::join!(scope.compile("{{> ex:a}}"), scope.compile("{{> ex:a}}"));
        assert!(first.unwrap().ptr_eq(&second.unwrap()));
        assert_eq!(service.call_count("http://example.org/a"), 1);
    }

    #[tokio::test]
    async fn test_failed_compile_is_not_cached() {
        let service = Arc::new(MemoryContentService::new());
        let scope = builder(service.clone()).build().unwrap();

        let err = scope.compile("{{> missing}}").await.unwrap_err();
        assert!(matches!(err.leaf(), TemplateError::ReferenceNotFound { .. }));
        assert_eq!(scope.cached_len(), 0);

        assert!(scope.compile("{{#if}}").await.is_err());
        assert_eq!(scope.cached_len(), 0);
    }

    #[tokio::test]
    async fn test_remote_dependencies_do_not_change_partials() {
        let service = Arc::new(MemoryContentService::new());
        service.insert("http://example.org/footer", "<footer>{{year}}</footer>");
        let scope = builder(service).build().unwrap();

        let compiled = scope.compile("<main/>{{> ex:footer}}").await.unwrap();
        assert_eq!(compiled.render(&json!({"year": 2024})).unwrap(), "<main/><footer>2024</footer>");
        assert_eq!(scope.partial_names().count(), 0);
    }

    #[test]
    fn test_duplicate_partial_is_rejected() {
        let err = builder(Arc::new(MemoryContentService::new()))
            .register_partial("a", "A")
            .unwrap()
            .register_partial("a", "B")
            .unwrap_err();
        assert_eq!(err.to_string(), "Template partial 'a' already registered");

        let err = builder(Arc::new(MemoryContentService::new()))
            .register_partial("ex:a", "A")
            .unwrap()
            .register_partial("<http://example.org/a>", "B")
            .unwrap_err();
        assert!(matches!(err, TemplateError::DuplicatePartial { .. }));
    }

    #[test]
    fn test_compile_without_remote() {
        let scope = builder(Arc::new(MemoryContentService::new()))
            .register_partial("row", "<tr>{{this}}</tr>")
            .unwrap()
            .build()
            .unwrap();

        let compiled = scope.compile_without_remote("{{#each xs}}{{> row}}{{/each}}").unwrap();
        assert_eq!(compiled.render(&json!({"xs": [1, 2]})).unwrap(), "<tr>1</tr><tr>2</tr>");
        let again = scope.compile_without_remote("{{#each xs}}{{> row}}{{/each}}").unwrap();
        assert!(compiled.ptr_eq(&again));

        let err = scope.compile_without_remote("{{> ex:remote}}").unwrap_err();
        assert!(matches!(err.leaf(), TemplateError::ReferenceNotFound { .. }));
    }

    #[tokio::test]
    async fn test_sync_result_is_reused_by_async_compile() {
        let scope = builder(Arc::new(MemoryContentService::new())).build().unwrap();
        let sync = scope.compile_without_remote("{{x}}").unwrap();
        let async_result = scope.compile("{{x}}").await.unwrap();
        assert!(sync.ptr_eq(&async_result));
    }

    #[tokio::test]
    async fn test_derive_is_isolated() {
        let base = builder(Arc::new(MemoryContentService::new()))
            .register_partial("a", "base-a")
            .unwrap()
            .with_trace(ScopeTrace {
                component_tag: Some("x-list".to_string()),
                ..ScopeTrace::default()
            })
            .build()
            .unwrap();
        let derived = base.derive().register_partial("b", "derived-b").unwrap().build().unwrap();

        assert_eq!(derived.compile("{{> a}}{{> b}}").await.unwrap().render(&json!({})).unwrap(), "base-aderived-b");
        assert!(base.compile("{{> b}}").await.is_err());
        assert!(base.partial("b").is_none());
        assert_eq!(derived.trace(), base.trace());

        let base_compiled = base.compile("{{> a}}").await.unwrap();
        let derived_compiled = derived.compile("{{> a}}").await.unwrap();
        assert!(!base_compiled.ptr_eq(&derived_compiled));
        base.clear_cache();
        assert_eq!(derived.cached_len(), 2);
    }

    #[test]
    fn test_export_props() {
        let scope = builder(Arc::new(MemoryContentService::new()))
            .register_partials([("a", "A {{x}}"), ("b", "{{> a}}")])
            .unwrap()
            .build()
            .unwrap();
        let props = scope.export_props();
        assert_eq!(props.get("a").map(String::as_str), Some("A {{x}}"));
        assert_eq!(props.len(), 2);
        assert_eq!(scope.partial("b").map(|p| p.references().to_vec()), Some(vec!["a".to_string()]));
    }

    #[test]
    fn test_scope_trace_display() {
        let trace = ScopeTrace {
            component_tag: Some("semantic-table".to_string()),
            component_id: Some("t1".to_string()),
            template_id: Some("http://example.org/page".to_string()),
        };
        assert_eq!(trace.to_string(), "<semantic-table id=\"t1\"> in template 'http://example.org/page'");
        assert_eq!(ScopeTrace::default().to_string(), "<unknown>");
    }
}
