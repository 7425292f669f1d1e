//! Structured error handling for template resolution and compilation.
//!
//! This module provides the [`TemplateError`] enum used by every stage of the
//! engine: syntax parsing, escaping, dependency resolution, remote fetching and
//! runtime compilation. Errors are annotated with context while they propagate
//! out of a recursive resolution, so the final error is a chain that leads from
//! the root template down to the failing leaf:
//!
//! ```text
//! Error while resolving dependencies of template 'ex:page'
//!   caused by: Failed to load template reference 'ex:footer'
//!   caused by: Failed to fetch template 'http://example.org/footer'
//!   caused by: HTTP 404 Not Found
//! ```
//!
//! [`TemplateError`] is `Clone` because results of shared (single-flight) tasks
//! are handed to every waiter. External causes are therefore stored behind an
//! `Arc`.

use std::error::Error as StdError;
use std::sync::Arc;

use thiserror::Error;

/// Shared, type-erased cause reported by a collaborator (e.g. the content service).
pub type ExternalError = Arc<dyn StdError + Send + Sync>;

/// Errors produced while parsing, escaping, resolving or compiling templates.
#[derive(Debug, Clone, Error)]
pub enum TemplateError {
    /// Malformed template-language syntax.
    #[error("Template syntax error at line {line}, column {column}: {message}")]
    Parse {
        /// What the parser expected or found
        message: String,
        /// 1-based line of the offending token
        line: usize,
        /// 1-based column of the offending token
        column: usize,
    },

    /// A partial-with-body invocation was found inside an element attribute.
    ///
    /// Attribute-encoded template bodies cannot be escaped safely when they
    /// wrap inner content, so the whole escaping pass is aborted.
    #[error("Partial block '{pattern}' is not allowed inside attribute '{attribute}' of <{element}>")]
    DisallowedPattern {
        /// Tag name of the element carrying the attribute
        element: String,
        /// Attribute name
        attribute: String,
        /// The offending invocation opener
        pattern: String,
    },

    /// A local reference is neither registered in the scope nor remote.
    #[error("Template reference '{reference}' not found")]
    ReferenceNotFound {
        /// The unresolved reference
        reference: String,
        /// Registered partial names that are close to `reference`
        suggestions: Vec<String>,
    },

    /// The same partial name was registered twice on one builder.
    #[error("Template partial '{name}' already registered")]
    DuplicatePartial {
        /// The duplicated partial name
        name: String,
    },

    /// Fetching or preparing a remote template failed.
    #[error("Failed to fetch template '{identifier}'")]
    Fetch {
        /// Full resource identifier of the remote template
        identifier: String,
        /// Underlying cause
        #[source]
        source: ExternalError,
    },

    /// Loading one reference of a template failed.
    #[error("Failed to load template reference '{reference}'")]
    Load {
        /// Reference as written in the referencing template
        reference: String,
        /// Underlying cause
        #[source]
        source: Box<TemplateError>,
    },

    /// Resolving the dependencies of a loaded sub-template failed.
    #[error("Error while resolving dependencies of template '{reference}'")]
    Dependency {
        /// Reference of the sub-template whose dependencies failed
        reference: String,
        /// Underlying cause
        #[source]
        source: Box<TemplateError>,
    },

    /// The template runtime rejected a template during registration.
    #[error("Failed to compile template '{name}': {message}")]
    Compile {
        /// Registry name of the template
        name: String,
        /// Message reported by the runtime
        message: String,
    },

    /// The template runtime failed while rendering.
    #[error("Failed to render template: {message}")]
    Render {
        /// Message reported by the runtime
        message: String,
    },
}

impl TemplateError {
    /// Wrap a collaborator failure with the identifier it was fetching.
    pub fn fetch(
        identifier: impl Into<String>,
        source: impl Into<Box<dyn StdError + Send + Sync>>,
    ) -> Self {
        Self::Fetch {
            identifier: identifier.into(),
            source: Arc::from(source.into()),
        }
    }

    /// Wrap this error with the reference that was being loaded.
    #[must_use]
    pub fn in_reference(self, reference: impl Into<String>) -> Self {
        Self::Load {
            reference: reference.into(),
            source: Box::new(self),
        }
    }

    /// Wrap this error with the sub-template whose dependencies were being resolved.
    #[must_use]
    pub fn in_dependencies_of(self, reference: impl Into<String>) -> Self {
        Self::Dependency {
            reference: reference.into(),
            source: Box::new(self),
        }
    }

    /// The innermost [`TemplateError`] of the context chain.
    pub fn leaf(&self) -> &TemplateError {
        match self {
            Self::Load {
                source,
                ..
            }
            | Self::Dependency {
                source,
                ..
            } => source.leaf(),
            other => other,
        }
    }

    /// Messages of every error in the `source()` chain, outermost first.
    pub fn breadcrumb(&self) -> Vec<String> {
        let mut trail = vec![self.to_string()];
        let mut current = StdError::source(self);
        while let Some(cause) = current {
            trail.push(cause.to_string());
            current = cause.source();
        }
        trail
    }

    /// Generate a user-friendly, multi-line message with the causal chain and hints.
    pub fn format_with_context(&self) -> String {
        let mut msg = String::new();
        let trail = self.breadcrumb();
        for (depth, line) in trail.iter().enumerate() {
            if depth == 0 {
                msg.push_str(line);
            } else {
                msg.push('\n');
                msg.push_str(&"  ".repeat(depth));
                msg.push_str("└─ ");
                msg.push_str(line);
            }
        }

        if let Self::ReferenceNotFound {
            suggestions,
            ..
        } = self.leaf()
        {
            if !suggestions.is_empty() {
                msg.push_str(&format!("\n\nDid you mean: {}?", suggestions.join(", ")));
            }
        }

        msg
    }

    /// A suggestion for the CLI, based on the kind of the innermost error.
    pub fn suggestion(&self) -> &'static str {
        match self.leaf() {
            Self::Parse {
                ..
            } => "Check the template syntax around the reported position",
            Self::DisallowedPattern {
                ..
            } => "Move the partial block out of the attribute into a nested local template",
            Self::ReferenceNotFound {
                ..
            } => "Register the partial in the scope or reference it by a prefixed identifier",
            Self::DuplicatePartial {
                ..
            } => "Register each partial name only once per scope",
            Self::Fetch {
                ..
            } => "Check that the content service is reachable and the identifier exists",
            Self::Compile {
                ..
            }
            | Self::Render {
                ..
            } => "Check the template against the runtime's syntax and the supplied data",
            Self::Load {
                ..
            }
            | Self::Dependency {
                ..
            } => "Check the referenced templates",
        }
    }
}

impl From<handlebars::RenderError> for TemplateError {
    fn from(err: handlebars::RenderError) -> Self {
        Self::Render {
            message: err.to_string(),
        }
    }
}
