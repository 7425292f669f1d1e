//! Adapter between parsed templates and the Handlebars runtime.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use handlebars::Handlebars;
use serde::Serialize;

use crate::templating::error::TemplateError;
use crate::templating::helpers::HelperRegistry;
use crate::templating::parsed::{ParsedTemplate, runtime_partial_name};

/// Runtime registry shared by a scope and the templates it compiled.
pub(crate) type SharedRegistry = Arc<RwLock<Handlebars<'static>>>;

/// Create a runtime registry with the literal helper and `helpers` installed.
pub(crate) fn new_registry(helpers: &HelperRegistry) -> Handlebars<'static> {
    let mut registry = Handlebars::new();
    helpers.install(&mut registry);
    registry
}

/// Register `template` as the partial resolving `reference`.
pub(crate) fn register_partial(
    registry: &mut Handlebars<'static>,
    reference: &str,
    template: &ParsedTemplate,
) -> Result<(), TemplateError> {
    registry.register_partial(&runtime_partial_name(reference), template.runtime_source()).map_err(
        |e| TemplateError::Compile {
            name: reference.to_string(),
            message: e.to_string(),
        },
    )
}

/// Register `template` as a root template under `name`.
pub(crate) fn register_template(
    registry: &mut Handlebars<'static>,
    name: &str,
    template: &ParsedTemplate,
) -> Result<(), TemplateError> {
    registry.register_template_string(name, template.runtime_source()).map_err(|e| {
        TemplateError::Compile {
            name: name.to_string(),
            message: e.to_string(),
        }
    })
}

/// An executable template produced by a scope.
///
/// Cloning is cheap; clones of a cached result share the same instance, which
/// can be checked with [`CompiledTemplate::ptr_eq`].
///
/// # Examples
///
/// ```no_run
/// # async fn example(scope: &tscope::templating::TemplateScope) -> Result<(), tscope::templating::TemplateError> {
/// let compiled = scope.compile("Hello {{name}}").await?;
/// let html = compiled.render(&serde_json::json!({"name": "Ada"}))?;
/// assert_eq!(html, "Hello Ada");
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct CompiledTemplate {
    inner: Option<Arc<CompiledInner>>,
}

struct CompiledInner {
    name: String,
    registry: SharedRegistry,
}

impl CompiledTemplate {
    pub(crate) fn new(name: String, registry: SharedRegistry) -> Self {
        Self {
            inner: Some(Arc::new(CompiledInner {
                name,
                registry,
            })),
        }
    }

    /// The compiled form of empty input; renders to the empty string.
    pub fn empty() -> Self {
        Self {
            inner: None,
        }
    }

    /// Whether this is the compiled form of empty input.
    pub fn is_empty(&self) -> bool {
        self.inner.is_none()
    }

    /// Runtime registry name, `None` for the empty template.
    pub fn name(&self) -> Option<&str> {
        self.inner.as_ref().map(|inner| inner.name.as_str())
    }

    /// Render with `data` as the root context.
    ///
    /// # Errors
    ///
    /// Returns [`TemplateError::Render`] if the runtime fails, e.g. because a
    /// helper errors or a dynamic partial is not registered.
    pub fn render<T: Serialize>(&self, data: &T) -> Result<String, TemplateError> {
        let Some(inner) = &self.inner else {
            return Ok(String::new());
        };
        let registry = inner.registry.read().unwrap_or_else(PoisonError::into_inner);
        Ok(registry.render(&inner.name, data)?)
    }

    /// Whether both values are the same compiled instance.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        match (&self.inner, &other.inner) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }
}

impl fmt::Debug for CompiledTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledTemplate").field("name", &self.name()).finish()
    }
}
