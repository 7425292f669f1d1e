//! Helper registry handed to the Handlebars runtime.
//!
//! Helpers are plain functions with the Handlebars helper signature. A scope
//! receives the engine's default helpers merged with the helpers supplied on its
//! builder; later registrations win.

use std::collections::BTreeMap;

use handlebars::{
    Context, Handlebars, Helper, HelperResult, Output, RenderContext, RenderErrorReason,
};

use crate::constants::RAW_LITERAL_HELPER;

/// Signature of a template helper.
pub type HelperFn =
    fn(&Helper, &Handlebars, &Context, &mut RenderContext, &mut dyn Output) -> HelperResult;

/// Immutable-by-convention map from helper name to helper function.
///
/// # Examples
///
/// ```
/// use tscope::templating::HelperRegistry;
///
/// let helpers = HelperRegistry::with_defaults();
/// assert!(helpers.contains("json"));
/// assert!(helpers.contains("uppercase"));
/// ```
#[derive(Clone, Default)]
pub struct HelperRegistry {
    helpers: BTreeMap<String, HelperFn>,
}

impl std::fmt::Debug for HelperRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.helpers.keys()).finish()
    }
}

impl HelperRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The default helpers: `json`, `uppercase` and `lowercase`.
    pub fn with_defaults() -> Self {
        Self::new()
            .with("json", json_helper)
            .with("uppercase", uppercase_helper)
            .with("lowercase", lowercase_helper)
    }

    /// Add a helper, replacing any helper with the same name.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, helper: HelperFn) -> Self {
        self.insert(name, helper);
        self
    }

    /// Add a helper and return the one it replaced.
    pub fn insert(&mut self, name: impl Into<String>, helper: HelperFn) -> Option<HelperFn> {
        self.helpers.insert(name.into(), helper)
    }

    /// Merge `other` into this registry; helpers of `other` win.
    pub fn merge(&mut self, other: &HelperRegistry) {
        for (name, helper) in &other.helpers {
            self.helpers.insert(name.clone(), *helper);
        }
    }

    /// Whether a helper named `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.helpers.contains_key(name)
    }

    /// Helper names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.helpers.keys().map(String::as_str)
    }

    /// Number of helpers.
    pub fn len(&self) -> usize {
        self.helpers.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.helpers.is_empty()
    }

    /// Register the internal literal helper and every helper into `registry`.
    pub(crate) fn install(&self, registry: &mut Handlebars<'static>) {
        registry.register_helper(RAW_LITERAL_HELPER, Box::new(raw_literal_helper as HelperFn));
        for (name, helper) in &self.helpers {
            registry.register_helper(name, Box::new(*helper));
        }
    }
}

/// Emits hex-encoded raw block content verbatim.
fn raw_literal_helper(
    h: &Helper,
    _: &Handlebars,
    _: &Context,
    _: &mut RenderContext,
    out: &mut dyn Output,
) -> HelperResult {
    let encoded = h.param(0).and_then(|v| v.value().as_str()).unwrap_or("");
    let bytes = hex::decode(encoded)
        .map_err(|e| RenderErrorReason::Other(format!("Invalid raw block literal: {e}")))?;
    out.write(&String::from_utf8_lossy(&bytes))?;
    Ok(())
}

fn json_helper(
    h: &Helper,
    _: &Handlebars,
    _: &Context,
    _: &mut RenderContext,
    out: &mut dyn Output,
) -> HelperResult {
    let value = h.param(0).map(|v| v.value().clone()).unwrap_or_default();
    let rendered = serde_json::to_string(&value)
        .map_err(|e| RenderErrorReason::Other(format!("Failed to serialize value: {e}")))?;
    out.write(&rendered)?;
    Ok(())
}

fn uppercase_helper(
    h: &Helper,
    _: &Handlebars,
    _: &Context,
    _: &mut RenderContext,
    out: &mut dyn Output,
) -> HelperResult {
    let value = h.param(0).and_then(|v| v.value().as_str()).unwrap_or("");
    out.write(&value.to_uppercase())?;
    Ok(())
}

fn lowercase_helper(
    h: &Helper,
    _: &Handlebars,
    _: &Context,
    _: &mut RenderContext,
    out: &mut dyn Output,
) -> HelperResult {
    let value = h.param(0).and_then(|v| v.value().as_str()).unwrap_or("");
    out.write(&value.to_lowercase())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(helpers: &HelperRegistry, template: &str, data: serde_json::Value) -> String {
        let mut registry = Handlebars::new();
        helpers.install(&mut registry);
        registry.render_template(template, &data).unwrap()
    }

    fn shout(
        h: &Helper,
        _: &Handlebars,
        _: &Context,
        _: &mut RenderContext,
        out: &mut dyn Output,
    ) -> HelperResult {
        let value = h.param(0).and_then(|v| v.value().as_str()).unwrap_or("");
        out.write(&format!("{value}!"))?;
        Ok(())
    }

    #[test]
    fn test_default_helpers() {
        let helpers = HelperRegistry::with_defaults();
        let data = serde_json::json!({"name": "Ada", "list": [1, 2]});
        assert_eq!(render(&helpers, "{{uppercase name}}", data.clone()), "ADA");
        assert_eq!(render(&helpers, "{{lowercase name}}", data.clone()), "ada");
        assert_eq!(render(&helpers, "{{{json list}}}", data), "[1,2]");
    }

    #[test]
    fn test_merge_later_wins() {
        let mut helpers = HelperRegistry::with_defaults();
        helpers.merge(&HelperRegistry::new().with("uppercase", shout).with("shout", shout));
        assert_eq!(helpers.len(), 4);
        let data = serde_json::json!({"name": "Ada"});
        assert_eq!(render(&helpers, "{{uppercase name}}", data.clone()), "Ada!");
        assert_eq!(render(&helpers, "{{shout name}}", data), "Ada!");
    }

    #[test]
    fn test_raw_literal_helper_emits_content() {
        let helpers = HelperRegistry::new();
        let template = format!("{{{{{RAW_LITERAL_HELPER} \"{}\"}}}}", hex::encode("{{> x}} & <b>"));
        assert_eq!(render(&helpers, &template, serde_json::json!({})), "{{> x}} & <b>");
    }
}
