//! Test utilities for tscope
//!
//! Fixtures that wire a [`TemplateEngine`] to an in-memory content service, so
//! tests can control what remote templates contain and count how often each
//! one is fetched.
//!
//! # Example
//!
//! ```rust,no_run
//! use tscope::test_utils::TestEngine;
//!
//! # async fn example() -> Result<(), tscope::templating::TemplateError> {
//! let env = TestEngine::new().with_remote("footer", "(c) {{year}}");
//! let compiled = env.engine.default_scope().compile("{{> ex:footer}}").await?;
//! assert_eq!(env.fetches("footer"), 1);
//! # Ok(())
//! # }
//! ```

use std::sync::{Arc, Once};
use std::time::Duration;

use tracing::Level;
use tracing_subscriber::EnvFilter;

use crate::identifiers::PrefixRegistry;
use crate::source::MemoryContentService;
use crate::templating::TemplateEngine;

/// Namespace bound to the `ex` prefix in [`TestEngine`].
pub const TEST_NAMESPACE: &str = "http://example.org/";

/// Global flag to ensure logging is only initialized once in tests
static INIT_LOGGING: Once = Once::new();

/// Initialize logging for tests.
///
/// Uses `level` if given, otherwise `RUST_LOG`; without either, logging stays
/// off. Only the first call has an effect.
///
/// ```bash
/// RUST_LOG=tscope=trace cargo test
/// ```
pub fn init_test_logging(level: Option<Level>) {
    INIT_LOGGING.call_once(|| {
        let filter = if let Some(level) = level {
            EnvFilter::new(level.to_string())
        } else if std::env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else {
            return;
        };

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .with_thread_ids(false)
            .try_init();
    });
}

/// An engine backed by a [`MemoryContentService`].
///
/// The prefix `ex` expands to [`TEST_NAMESPACE`], so `ex:footer` refers to
/// the remote template inserted with `with_remote("footer", ..)`.
pub struct TestEngine {
    /// The content service behind the engine's source cache
    pub service: Arc<MemoryContentService>,
    /// The engine under test
    pub engine: TemplateEngine,
}

impl TestEngine {
    /// An engine without remote templates.
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self::with_service(MemoryContentService::new())
    }

    /// An engine whose content service answers after `latency`.
    pub fn with_latency(latency: Duration) -> Self {
        Self::with_service(MemoryContentService::new().with_latency(latency))
    }

    fn with_service(service: MemoryContentService) -> Self {
        init_test_logging(None);
        let service = Arc::new(service);
        let expander = Arc::new(PrefixRegistry::new().with_prefix("ex", TEST_NAMESPACE));
        let engine = match TemplateEngine::new(service.clone(), expander) {
            Ok(engine) => engine,
            Err(e) => panic!("engine without default partials cannot fail: {e}"),
        };
        Self {
            service,
            engine,
        }
    }

    /// Add or replace the remote template `ex:<name>`.
    #[must_use]
    pub fn with_remote(self, name: &str, markup: &str) -> Self {
        self.set_remote(name, markup);
        self
    }

    /// Add or replace the remote template `ex:<name>` in place.
    pub fn set_remote(&self, name: &str, markup: &str) {
        self.service.insert(Self::identifier(name), markup);
    }

    /// The full identifier of `ex:<name>`.
    pub fn identifier(name: &str) -> String {
        format!("{TEST_NAMESPACE}{name}")
    }

    /// How often `ex:<name>` was fetched.
    pub fn fetches(&self, name: &str) -> usize {
        self.service.call_count(&Self::identifier(name))
    }
}
