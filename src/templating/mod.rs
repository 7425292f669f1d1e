//! Template resolution and compilation.
//!
//! This module turns template markup that references other templates, either
//! by a local partial name or by a remote resource identifier, into a single
//! executable [`CompiledTemplate`]. Execution itself is delegated to the
//! [Handlebars](handlebars) runtime; this module discovers, fetches, escapes and
//! assembles the templates the runtime needs.
//!
//! # Pipeline
//!
//! ```text
//!            ┌────────────────────────── TemplateScope::compile ───────────────────────────┐
//! source ──► │ syntax::parse ─► references::scan ─► resolver::resolve ─► runtime registry │ ──► CompiledTemplate
//!            └──────────────────────────────────────┬──────────────────────────────────────┘
//!                                                   │ remote references
//!                                                   ▼
//!                        TemplateSourceCache ─► ContentService ─► EscapingRewriter ─► ParsedTemplate
//! ```
//!
//! # References
//!
//! | Written as                    | Kind   | Resolved against                          |
//! |-------------------------------|--------|-------------------------------------------|
//! | `{{> header}}`                | local  | partials registered in the scope          |
//! | `{{> ex:footer}}`             | remote | source cache, after prefix expansion      |
//! | `{{> <http://x.org/footer>}}` | remote | source cache                              |
//! | `{{> @partial-block}}`        | meta   | the runtime itself, never collected       |
//! | `{{> (lookup . "name")}}`     | dynamic| runtime, against registered partials only |
//!
//! # Nested local templates
//!
//! Fetched markup is escaped before parsing so that partial invocations inside
//! nested `<template>` elements (and inside attribute values) reach the
//! component that compiles them later, unexpanded. See [`escaping`].
//!
//! # Modules
//!
//! - [`syntax`] - template-language parser producing a [`syntax::Node`] tree
//! - [`references`] - reference discovery and classification
//! - [`escaping`] - the [`EscapingRewriter`]
//! - [`resolver`] - recursive dependency resolution
//! - [`cache`] - the process-wide [`TemplateSourceCache`]
//! - [`scope`] - [`TemplateScope`] and [`TemplateScopeBuilder`]
//! - [`engine`] - [`TemplateEngine`], owner of the shared caches

pub mod cache;
pub mod engine;
pub mod error;
pub mod escaping;
pub mod helpers;
pub mod parsed;
pub mod references;
pub mod resolver;
pub mod runtime;
pub mod scope;
pub mod syntax;

pub use cache::{SourceTask, TemplateSourceCache};
pub use engine::{EngineOptions, TemplateEngine};
pub use error::TemplateError;
pub use escaping::EscapingRewriter;
pub use helpers::{HelperFn, HelperRegistry};
pub use parsed::{ParsedTemplate, runtime_partial_name};
pub use references::{ReferenceScan, is_remote_reference};
pub use resolver::{DependencyMap, TemplateLoader};
pub use runtime::CompiledTemplate;
pub use scope::{CompileTask, PartialSource, ScopeTrace, TemplateScope, TemplateScopeBuilder};
