//! Expansion of compact resource identifiers.
//!
//! Remote template references may be written compactly (`ex:footer`) or as
//! full identifiers (`http://example.org/footer`, `<http://example.org/footer>`).
//! Before a remote template is fetched, its reference is expanded to the full
//! identifier so that every spelling of the same template shares one cache
//! entry.
//!
//! The engine only depends on the [`IdentifierExpander`] trait. [`PrefixRegistry`]
//! is the shipped implementation, configured from the `[prefixes]` table and the
//! `default_namespace` key of `tscope.toml`.

use std::collections::BTreeMap;

use tracing::warn;

/// Pure, order-preserving expansion of compact identifiers.
pub trait IdentifierExpander: Send + Sync {
    /// Expand every identifier; the output has the same length and order as the input.
    fn expand(&self, compact: &[String]) -> Vec<String>;
}

/// Expander that returns its input unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityExpander;

impl IdentifierExpander for IdentityExpander {
    fn expand(&self, compact: &[String]) -> Vec<String> {
        compact.to_vec()
    }
}

/// Prefix-table based identifier expansion.
///
/// # Rules
///
/// - `<iri>` is unwrapped to `iri`
/// - identifiers containing `://` are already absolute and pass through
/// - `prefix:local` with a known prefix becomes `namespace + local`
/// - `:local` becomes `default_namespace + local` when a default is configured
/// - anything else passes through unchanged (with a warning for unknown prefixes)
///
/// # Examples
///
/// ```
/// use tscope::identifiers::PrefixRegistry;
///
/// let registry = PrefixRegistry::new()
///     .with_prefix("ex", "http://example.org/")
///     .with_default_namespace("http://example.org/templates/");
///
/// assert_eq!(registry.expand_one("ex:footer"), "http://example.org/footer");
/// assert_eq!(registry.expand_one(":page"), "http://example.org/templates/page");
/// assert_eq!(registry.expand_one("<urn:x:y>"), "urn:x:y");
/// ```
#[derive(Debug, Clone, Default)]
pub struct PrefixRegistry {
    prefixes: BTreeMap<String, String>,
    default_namespace: Option<String>,
}

impl PrefixRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry from a prefix table and an optional default namespace.
    pub fn from_parts(prefixes: BTreeMap<String, String>, default_namespace: Option<String>) -> Self {
        Self {
            prefixes,
            default_namespace,
        }
    }

    /// Add or replace a prefix.
    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>, namespace: impl Into<String>) -> Self {
        self.prefixes.insert(prefix.into(), namespace.into());
        self
    }

    /// Set the namespace used for `:local` identifiers.
    #[must_use]
    pub fn with_default_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.default_namespace = Some(namespace.into());
        self
    }

    /// Number of registered prefixes.
    pub fn len(&self) -> usize {
        self.prefixes.len()
    }

    /// Whether no prefixes are registered.
    pub fn is_empty(&self) -> bool {
        self.prefixes.is_empty()
    }

    /// Expand a single identifier.
    pub fn expand_one(&self, identifier: &str) -> String {
        let trimmed = identifier.trim();
        if let Some(inner) = trimmed.strip_prefix('<').and_then(|rest| rest.strip_suffix('>')) {
            return inner.to_string();
        }
        if trimmed.contains("://") {
            return trimmed.to_string();
        }

        let Some((prefix, local)) = trimmed.split_once(':') else {
            return trimmed.to_string();
        };
        if prefix.is_empty() {
            return match &self.default_namespace {
                Some(namespace) => format!("{namespace}{local}"),
                None => {
                    warn!("No default namespace configured for identifier '{}'", trimmed);
                    trimmed.to_string()
                }
            };
        }
        match self.prefixes.get(prefix) {
            Some(namespace) => format!("{namespace}{local}"),
            None => {
                warn!("Unknown prefix '{}' in identifier '{}'", prefix, trimmed);
                trimmed.to_string()
            }
        }
    }
}

impl IdentifierExpander for PrefixRegistry {
    fn expand(&self, compact: &[String]) -> Vec<String> {
        compact.iter().map(|identifier| self.expand_one(identifier)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> PrefixRegistry {
        PrefixRegistry::new()
            .with_prefix("ex", "http://example.org/")
            .with_prefix("tpl", "http://example.org/templates/")
            .with_default_namespace("http://default.org/")
    }

    #[test]
    fn test_expand_rules() {
        let registry = registry();
        assert_eq!(registry.expand_one("ex:footer"), "http://example.org/footer");
        assert_eq!(registry.expand_one("tpl:a/b"), "http://example.org/templates/a/b");
        assert_eq!(registry.expand_one(":page"), "http://default.org/page");
        assert_eq!(registry.expand_one("<http://x.org/a>"), "http://x.org/a");
        assert_eq!(registry.expand_one("http://x.org/a"), "http://x.org/a");
        assert_eq!(registry.expand_one("unknown:thing"), "unknown:thing");
        assert_eq!(registry.expand_one("plain"), "plain");
    }

    #[test]
    fn test_expand_preserves_order_and_duplicates() {
        let input = vec!["ex:b".to_string(), "ex:a".to_string(), "ex:b".to_string()];
        let output = registry().expand(&input);
        assert_eq!(
            output,
            vec!["http://example.org/b", "http://example.org/a", "http://example.org/b"]
        );
    }

    #[test]
    fn test_missing_default_namespace_passes_through() {
        let registry = PrefixRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.expand_one(":page"), ":page");
    }

    #[test]
    fn test_identity_expander() {
        let input = vec!["ex:a".to_string()];
        assert_eq!(IdentityExpander.expand(&input), input);
    }
}
