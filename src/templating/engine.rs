//! The process-level entry point owning shared caches and the default scope.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::info;

use crate::identifiers::IdentifierExpander;
use crate::source::ContentService;
use crate::templating::cache::TemplateSourceCache;
use crate::templating::error::TemplateError;
use crate::templating::escaping::EscapingRewriter;
use crate::templating::helpers::HelperRegistry;
use crate::templating::scope::{PartialSource, TemplateScope, TemplateScopeBuilder};

/// Construction options of a [`TemplateEngine`].
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Rewriter applied to every fetched template
    pub rewriter: EscapingRewriter,
    /// Helpers every scope starts with
    pub helpers: HelperRegistry,
    /// Partials of the default scope, name to markup
    pub default_partials: BTreeMap<String, String>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            rewriter: EscapingRewriter::default(),
            helpers: HelperRegistry::with_defaults(),
            default_partials: BTreeMap::new(),
        }
    }
}

/// Owns the template source cache and the default scope.
///
/// An engine is created once per process (or per test) and handed to the code
/// that compiles templates. Scopes created through it share its source cache.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use tscope::identifiers::PrefixRegistry;
/// use tscope::source::MemoryContentService;
/// use tscope::templating::TemplateEngine;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), tscope::templating::TemplateError> {
/// let service = Arc::new(MemoryContentService::new());
/// service.insert("http://example.org/greeting", "Hello {{name}}");
/// let expander = Arc::new(PrefixRegistry::new().with_prefix("ex", "http://example.org/"));
///
/// let engine = TemplateEngine::new(service, expander)?;
/// let compiled = engine.default_scope().compile("{{> ex:greeting}}!").await?;
/// assert_eq!(compiled.render(&serde_json::json!({"name": "Ada"}))?, "Hello Ada!");
/// # Ok(())
/// # }
/// ```
pub struct TemplateEngine {
    sources: Arc<TemplateSourceCache>,
    expander: Arc<dyn IdentifierExpander>,
    helpers: HelperRegistry,
    default_scope: TemplateScope,
}

impl TemplateEngine {
    /// Create an engine with default options.
    ///
    /// # Errors
    ///
    /// Infallible with default options; see [`TemplateEngine::with_options`].
    pub fn new(
        service: Arc<dyn ContentService>,
        expander: Arc<dyn IdentifierExpander>,
    ) -> Result<Self, TemplateError> {
        Self::with_options(service, expander, EngineOptions::default())
    }

    /// Create an engine.
    ///
    /// # Errors
    ///
    /// Fails if a default partial cannot be parsed or registered.
    pub fn with_options(
        service: Arc<dyn ContentService>,
        expander: Arc<dyn IdentifierExpander>,
        options: EngineOptions,
    ) -> Result<Self, TemplateError> {
        let sources =
            Arc::new(TemplateSourceCache::new(service, Arc::clone(&expander), options.rewriter));
        let default_scope = TemplateScopeBuilder::new(Arc::clone(&sources), Arc::clone(&expander))
            .with_helpers(&options.helpers)
            .register_partials(&options.default_partials)?
            .build()?;

        Ok(Self {
            sources,
            expander,
            helpers: options.helpers,
            default_scope,
        })
    }

    /// A builder for a new scope with the engine's default helpers.
    pub fn builder(&self) -> TemplateScopeBuilder {
        TemplateScopeBuilder::new(Arc::clone(&self.sources), Arc::clone(&self.expander))
            .with_helpers(&self.helpers)
    }

    /// Build a scope with the given partials and the default helpers.
    ///
    /// # Errors
    ///
    /// Duplicate, unparsable or unregistrable partials.
    pub fn create_scope<I, K, V>(&self, partials: I) -> Result<TemplateScope, TemplateError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<PartialSource>,
    {
        self.builder().register_partials(partials)?.build()
    }

    /// The scope used when no customized scope is needed.
    pub fn default_scope(&self) -> &TemplateScope {
        &self.default_scope
    }

    /// The shared template source cache.
    pub fn source_cache(&self) -> &Arc<TemplateSourceCache> {
        &self.sources
    }

    /// The identifier expander used for remote references.
    pub fn expander(&self) -> &Arc<dyn IdentifierExpander> {
        &self.expander
    }

    /// Drop the default scope's compiled templates and every cached source.
    ///
    /// Other scopes keep their compiled caches; their next compile of a new
    /// source fetches remote templates again.
    pub fn purge_all(&self) {
        self.default_scope.clear_cache();
        self.sources.purge();
        info!("Purged template caches");
    }
}

impl std::fmt::Debug for TemplateEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateEngine")
            .field("sources", &self.sources)
            .field("helpers", &self.helpers)
            .field("default_scope", &self.default_scope)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::identifiers::PrefixRegistry;
    use crate::source::MemoryContentService;

    fn engine(service: Arc<MemoryContentService>) -> TemplateEngine {
        let expander = Arc::new(PrefixRegistry::new().with_prefix("ex", "http://example.org/"));
        TemplateEngine::new(service, expander).unwrap()
    }

    #[tokio::test]
    async fn test_purge_all_refetches_changed_content() {
        let service = Arc::new(MemoryContentService::new());
        service.insert("http://example.org/msg", "v1");
        let engine = engine(service.clone());

        let scope = engine.default_scope();
        let first = scope.compile("{{> ex:msg}}").await.unwrap();
        assert_eq!(first.render(&json!({})).unwrap(), "v1");

        service.insert("http://example.org/msg", "v2");
        let cached = scope.compile("{{> ex:msg}}").await.unwrap();
        assert!(first.ptr_eq(&cached));

        engine.purge_all();
        assert!(engine.source_cache().is_empty());
        let second = scope.compile("{{> ex:msg}}").await.unwrap();
        assert!(!first.ptr_eq(&second));
        assert_eq!(second.render(&json!({})).unwrap(), "v2");
        assert_eq!(service.call_count("http://example.org/msg"), 2);
    }

    #[tokio::test]
    async fn test_scopes_share_source_cache() {
        let service = Arc::new(MemoryContentService::new());
        service.insert("http://example.org/a", "A");
        let engine = engine(service.clone());

        let one = engine.create_scope([("x", "{{> ex:a}}")]).unwrap();
        let two = engine.create_scope([("y", "{{> ex:a}}")]).unwrap();
        one.compile("{{> x}}").await.unwrap();
        two.compile("{{> y}}").await.unwrap();
        assert_eq!(service.call_count("http://example.org/a"), 1);
    }

    #[test]
    fn test_default_partials_and_helpers() {
        let mut options = EngineOptions::default();
        options.default_partials.insert("brand".to_string(), "{{uppercase name}}".to_string());
        let engine = TemplateEngine::with_options(
            Arc::new(MemoryContentService::new()),
            Arc::new(PrefixRegistry::new()),
            options,
        )
        .unwrap();

        let compiled = engine.default_scope().compile_without_remote("[{{> brand}}]").unwrap();
        assert_eq!(compiled.render(&json!({"name": "acme"})).unwrap(), "[ACME]");
        assert!(engine.builder().build().unwrap().helpers().contains("json"));
    }
}
