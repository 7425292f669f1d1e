//! tscope - template scopes with local and remote partials
//!
//! tscope resolves and compiles Handlebars-style templates whose partial
//! invocations refer either to partials registered locally or to templates
//! stored in a remote content service. Before a template is handed to the
//! runtime, every transitive reference is discovered, fetched (once per
//! process), escaped and registered, so the compiled template renders without
//! further I/O.
//!
//! # Architecture Overview
//!
//! - A **scope** owns named partials, helpers, a runtime registry and a cache
//!   of compiled templates. Scopes are isolated from each other.
//! - The **template source cache** is shared by all scopes of an engine. It
//!   keeps one fetch task per remote identifier, so concurrent and repeated
//!   requests hit the content service once.
//! - The **escaping rewriter** protects partial invocations inside nested
//!   local-template definitions so they survive the outer compile.
//!
//! # Core Modules
//!
//! - [`templating`] - parsing, reference discovery, escaping, resolution, scopes
//! - [`source`] - content services that provide remote template markup
//! - [`identifiers`] - expansion of compact identifiers like `ex:footer`
//! - [`config`] - the `tscope.toml` configuration file
//! - [`cli`] - the `tscope` command-line interface
//! - [`core`] - user-facing error reporting
//! - [`constants`] - shared markers and defaults
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tscope::identifiers::PrefixRegistry;
//! use tscope::source::HttpContentService;
//! use tscope::templating::TemplateEngine;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let service = Arc::new(HttpContentService::new("http://localhost:10214")?);
//! let expander = Arc::new(PrefixRegistry::new().with_prefix("ex", "http://example.org/"));
//! let engine = TemplateEngine::new(service, expander)?;
//!
//! let scope = engine.builder().register_partial("title", "<h1>{{title}}</h1>")?.build()?;
//! let page = scope.compile("{{> title}}{{> ex:footer}}").await?;
//! println!("{}", page.render(&serde_json::json!({"title": "Home"}))?);
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod config;
pub mod constants;
pub mod core;
pub mod identifiers;
pub mod source;
pub mod templating;

// test_utils module is available for both unit tests and integration tests
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
