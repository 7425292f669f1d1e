//! Error reporting for the tscope CLI.
//!
//! Library code returns [`TemplateError`] or [`anyhow::Error`]; the CLI turns
//! whatever reaches `main` into an [`ErrorContext`] with [`user_friendly_error`]
//! and prints it with colors:
//!
//! ```text
//! error: Error while resolving dependencies of template 'ex:page'
//!   └─ Failed to load template reference 'ex:footer'
//!     └─ Failed to fetch template 'http://example.org/footer'
//! suggestion: Check that the content service is reachable and the identifier exists
//! ```
//!
//! # Examples
//!
//! ```rust,no_run
//! use tscope::core::user_friendly_error;
//! use tscope::templating::TemplateError;
//!
//! let error = TemplateError::DuplicatePartial {
//!     name: "header".to_string(),
//! };
//! let context = user_friendly_error(anyhow::Error::from(error));
//! context.display();
//! ```

use std::fmt;

use colored::Colorize;
use thiserror::Error;

use crate::templating::TemplateError;

/// Top-level error categories shown to CLI users.
#[derive(Debug, Error)]
pub enum TscopeError {
    /// Template resolution, compilation or rendering failed.
    #[error("{}", .0.format_with_context())]
    Template(TemplateError),

    /// The configuration file is not valid TOML or has invalid values.
    #[error("{context}: {reason}")]
    ConfigParseError {
        /// What was being loaded, naming the file
        context: String,
        /// Parser message
        reason: String,
    },

    /// A file could not be read or written.
    #[error("{context}: {reason}")]
    FileSystemError {
        /// What was being done, naming the file
        context: String,
        /// OS message
        reason: String,
    },

    /// Anything else, with its full cause chain.
    #[error("{message}")]
    Other {
        /// Display text
        message: String,
    },
}

impl From<TemplateError> for TscopeError {
    fn from(error: TemplateError) -> Self {
        Self::Template(error)
    }
}

/// A [`TscopeError`] with optional hints for the user.
#[derive(Debug)]
pub struct ErrorContext {
    /// The underlying error
    pub error: TscopeError,
    /// Optional suggestion for resolving the error
    pub suggestion: Option<String>,
    /// Optional additional details about the error
    pub details: Option<String>,
}

impl ErrorContext {
    /// Create a context without hints.
    #[must_use]
    pub const fn new(error: TscopeError) -> Self {
        Self {
            error,
            suggestion: None,
            details: None,
        }
    }

    /// Add a suggestion for resolving the error.
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    /// Add details explaining the error.
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Print the error to stderr: error in red, details in yellow, suggestion in green.
    pub fn display(&self) {
        eprintln!("{}: {}", "error".red().bold(), self.error);

        if let Some(details) = &self.details {
            eprintln!("{}: {}", "details".yellow(), details);
        }

        if let Some(suggestion) = &self.suggestion {
            eprintln!("{}: {}", "suggestion".green(), suggestion);
        }
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)?;

        if let Some(details) = &self.details {
            write!(f, "\nDetails: {details}")?;
        }

        if let Some(suggestion) = &self.suggestion {
            write!(f, "\nSuggestion: {suggestion}")?;
        }

        Ok(())
    }
}

impl std::error::Error for ErrorContext {}

/// Convert any error into an [`ErrorContext`] with a suggestion where one is known.
///
/// A [`TemplateError`] anywhere in the chain wins; outer `anyhow` contexts
/// (for example the file that was being compiled) become the details.
#[must_use]
pub fn user_friendly_error(error: anyhow::Error) -> ErrorContext {
    if let Some(template_error) = error.chain().find_map(|e| e.downcast_ref::<TemplateError>()) {
        let outer: Vec<String> = error
            .chain()
            .take_while(|e| e.downcast_ref::<TemplateError>().is_none())
            .map(ToString::to_string)
            .collect();
        let suggestion = template_error.suggestion();
        let context = ErrorContext::new(TscopeError::Template(template_error.clone()))
            .with_suggestion(suggestion);
        return if outer.is_empty() {
            context
        } else {
            context.with_details(outer.join(": "))
        };
    }

    if let Some(toml_error) = error.chain().find_map(|e| e.downcast_ref::<toml::de::Error>()) {
        return ErrorContext::new(TscopeError::ConfigParseError {
            context: error.to_string(),
            reason: toml_error.message().to_string(),
        })
        .with_suggestion("Check the TOML syntax of your config file. Verify quotes, brackets and table headers")
        .with_details(toml_error.to_string());
    }

    if let Some(io_error) = error.chain().find_map(|e| e.downcast_ref::<std::io::Error>()) {
        let suggestion = match io_error.kind() {
            std::io::ErrorKind::NotFound => {
                "Check that the file or directory exists and the path is correct"
            }
            std::io::ErrorKind::PermissionDenied => "Check the file permissions",
            _ => "Check the file and try again",
        };
        return ErrorContext::new(TscopeError::FileSystemError {
            context: error.to_string(),
            reason: io_error.to_string(),
        })
        .with_suggestion(suggestion);
    }

    let mut message = error.to_string();
    let chain: Vec<String> = error.chain().skip(1).map(ToString::to_string).collect();
    if !chain.is_empty() {
        message.push_str("\n\nCaused by:");
        for (i, cause) in chain.iter().enumerate() {
            message.push_str(&format!("\n  {}: {}", i + 1, cause));
        }
    }

    ErrorContext::new(TscopeError::Other {
        message,
    })
}
