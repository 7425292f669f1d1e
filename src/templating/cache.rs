//! Process-wide cache of fetched and parsed remote templates.
//!
//! Every remote identifier maps to exactly one shared task that fetches the raw
//! markup from the content service, escapes nested local templates and parses
//! the result. All callers asking for the same identifier (from any scope, at
//! any time until the next purge) receive a clone of that task and therefore
//! the same outcome, including failures.
//!
//! # Concurrency
//!
//! Entries live in a [`DashMap`]; the first caller inserts the task through the
//! entry API while holding the shard lock, so concurrent callers can never
//! create two tasks for one identifier. The task itself is a
//! [`futures::future::Shared`] future that is driven by whichever waiter polls
//! it and hands every waiter a clone of the result.
//!
//! # Purging
//!
//! [`TemplateSourceCache::purge`] drops every entry. In-flight tasks are not
//! cancelled: callers already holding one still observe its original outcome,
//! only later callers start a new fetch.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::future::{BoxFuture, FutureExt, Shared};
use tracing::{debug, trace, warn};

use crate::identifiers::IdentifierExpander;
use crate::source::ContentService;
use crate::templating::error::TemplateError;
use crate::templating::escaping::EscapingRewriter;
use crate::templating::parsed::ParsedTemplate;

/// A fetch-and-parse task shared by every caller of one identifier.
pub type SourceTask = Shared<BoxFuture<'static, Result<ParsedTemplate, TemplateError>>>;

/// Identifier-keyed cache of remote template tasks.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use tscope::identifiers::IdentityExpander;
/// use tscope::source::MemoryContentService;
/// use tscope::templating::{EscapingRewriter, TemplateSourceCache};
///
/// # #[tokio::main]
/// # async fn main() {
/// let service = Arc::new(MemoryContentService::new());
/// service.insert("http://example.org/a", "<p>{{title}}</p>");
///
/// let cache = TemplateSourceCache::new(service.clone(), Arc::new(IdentityExpander), EscapingRewriter::default());
/// let first = cache.fetch("http://example.org/a").await.unwrap();
/// let second = cache.fetch("http://example.org/a").await.unwrap();
/// assert!(first.ptr_eq(&second));
/// assert_eq!(service.call_count("http://example.org/a"), 1);
/// # }
/// ```
pub struct TemplateSourceCache {
    entries: DashMap<String, SourceTask>,
    service: Arc<dyn ContentService>,
    expander: Arc<dyn IdentifierExpander>,
    rewriter: EscapingRewriter,
    hits: AtomicUsize,
    misses: AtomicUsize,
}

impl TemplateSourceCache {
    /// Create an empty cache over `service`.
    pub fn new(
        service: Arc<dyn ContentService>,
        expander: Arc<dyn IdentifierExpander>,
        rewriter: EscapingRewriter,
    ) -> Self {
        Self {
            entries: DashMap::new(),
            service,
            expander,
            rewriter,
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
        }
    }

    /// The task for `identifier`, creating it on first request.
    ///
    /// The returned task is not started until it is awaited.
    pub fn fetch(&self, identifier: &str) -> SourceTask {
        match self.entries.entry(identifier.to_string()) {
            Entry::Occupied(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                trace!("Source cache hit for '{}'", identifier);
                entry.get().clone()
            }
            Entry::Vacant(entry) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                debug!("Source cache miss for '{}'", identifier);
                let task = self.fetch_task(identifier.to_string());
                entry.insert(task.clone());
                task
            }
        }
    }

    fn fetch_task(&self, identifier: String) -> SourceTask {
        let service = Arc::clone(&self.service);
        let expander = Arc::clone(&self.expander);
        let rewriter = self.rewriter.clone();

        async move {
            debug!("Fetching template '{}'", identifier);
            let result = async {
                let markup = service.fetch_raw_markup(&identifier).await?;
                let escaped = rewriter.escape(&markup)?;
                let parsed = ParsedTemplate::parse(&escaped, expander.as_ref())?;
                Ok::<_, anyhow::Error>(parsed)
            }
            .await;

            match result {
                Ok(parsed) => {
                    debug!(
                        "Fetched template '{}' with {} reference(s)",
                        identifier,
                        parsed.references().len()
                    );
                    Ok(parsed)
                }
                Err(e) => {
                    warn!("Failed to fetch template '{}': {:#}", identifier, e);
                    Err(TemplateError::fetch(identifier, e))
                }
            }
        }
        .boxed()
        .shared()
    }

    /// Drop every entry.
    pub fn purge(&self) {
        let dropped = self.entries.len();
        self.entries.clear();
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        debug!("Purged {} template source cache entries", dropped);
    }

    /// Whether a task exists for `identifier`.
    pub fn contains(&self, identifier: &str) -> bool {
        self.entries.contains_key(identifier)
    }

    /// Number of cached identifiers.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Cache statistics as `(hits, misses)` since creation or the last purge.
    pub fn stats(&self) -> (usize, usize) {
        (self.hits.load(Ordering::Relaxed), self.misses.load(Ordering::Relaxed))
    }
}

impl fmt::Debug for TemplateSourceCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TemplateSourceCache")
            .field("entries", &self.entries.len())
            .field("rewriter", &self.rewriter)
            .finish()
    }
}
