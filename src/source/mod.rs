//! Content services that supply raw template markup for remote identifiers.
//!
//! The engine depends only on the [`ContentService`] trait. Three
//! implementations are shipped:
//!
//! - [`HttpContentService`] - queries a platform's template source endpoint
//! - [`DirectoryContentService`] - reads one file per identifier from a directory
//! - [`MemoryContentService`] - in-memory map, used by tests and embedders
//!
//! [`UnconfiguredContentService`] fails every request; the CLI uses it when no
//! content source is configured so that purely local templates still compile.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use dashmap::DashMap;
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use serde::Deserialize;
use tracing::debug;

use crate::constants::{DEFAULT_FETCH_TIMEOUT, TEMPLATE_SOURCE_ENDPOINT};

/// Fetches raw template markup by full resource identifier.
#[async_trait]
pub trait ContentService: Send + Sync {
    /// Return the raw, unescaped markup of the template `identifier`.
    async fn fetch_raw_markup(&self, identifier: &str) -> Result<String>;
}

/// In-memory content service with per-identifier call counting.
///
/// # Examples
///
/// ```
/// use tscope::source::{ContentService, MemoryContentService};
///
/// # #[tokio::main]
/// # async fn main() -> anyhow::Result<()> {
/// let service = MemoryContentService::new();
/// service.insert("http://example.org/a", "<p>A</p>");
/// assert_eq!(service.fetch_raw_markup("http://example.org/a").await?, "<p>A</p>");
/// assert_eq!(service.call_count("http://example.org/a"), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct MemoryContentService {
    templates: DashMap<String, String>,
    calls: DashMap<String, usize>,
    latency: Option<Duration>,
}

impl MemoryContentService {
    /// Create an empty service.
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every response by `latency` after the markup has been read.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Add or replace the markup of `identifier`.
    pub fn insert(&self, identifier: impl Into<String>, markup: impl Into<String>) {
        self.templates.insert(identifier.into(), markup.into());
    }

    /// Remove `identifier`; later fetches fail.
    pub fn remove(&self, identifier: &str) -> Option<String> {
        self.templates.remove(identifier).map(|(_, markup)| markup)
    }

    /// How often `identifier` has been requested.
    pub fn call_count(&self, identifier: &str) -> usize {
        self.calls.get(identifier).map_or(0, |count| *count)
    }

    /// Total number of requests over all identifiers.
    pub fn total_calls(&self) -> usize {
        self.calls.iter().map(|entry| *entry.value()).sum()
    }
}

#[async_trait]
impl ContentService for MemoryContentService {
    async fn fetch_raw_markup(&self, identifier: &str) -> Result<String> {
        *self.calls.entry(identifier.to_string()).or_insert(0) += 1;
        let markup = self.templates.get(identifier).map(|entry| entry.value().clone());
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        markup.ok_or_else(|| anyhow!("Template '{identifier}' does not exist"))
    }
}

/// Reads `<root>/<percent-encoded identifier>.html`.
#[derive(Debug, Clone)]
pub struct DirectoryContentService {
    root: PathBuf,
}

impl DirectoryContentService {
    /// Serve templates from `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
        }
    }

    /// Directory templates are read from.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File that holds the markup of `identifier`.
    ///
    /// ```
    /// use tscope::source::DirectoryContentService;
    ///
    /// let service = DirectoryContentService::new("/srv/templates");
    /// let path = service.path_for("http://example.org/a");
    /// assert!(path.ends_with("http%3A%2F%2Fexample%2Eorg%2Fa.html"));
    /// ```
    pub fn path_for(&self, identifier: &str) -> PathBuf {
        let file_name = format!("{}.html", utf8_percent_encode(identifier, NON_ALPHANUMERIC));
        self.root.join(file_name)
    }
}

#[async_trait]
impl ContentService for DirectoryContentService {
    async fn fetch_raw_markup(&self, identifier: &str) -> Result<String> {
        let path = self.path_for(identifier);
        debug!("Reading template '{}' from {}", identifier, path.display());
        tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read template file: {}", path.display()))
    }
}

/// Response body of the template source endpoint.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TemplateSourceResponse {
    source: String,
    #[serde(default)]
    app_id: Option<String>,
    #[serde(default)]
    revision: Option<String>,
}

/// Fetches templates from `{base_url}/rest/template/source?iri=<identifier>`.
#[derive(Debug, Clone)]
pub struct HttpContentService {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpContentService {
    /// Create a service for the platform at `base_url` with the default timeout.
    ///
    /// # Errors
    ///
    /// Fails if the HTTP client cannot be built.
    pub fn new(base_url: &str) -> Result<Self> {
        Self::with_timeout(base_url, DEFAULT_FETCH_TIMEOUT)
    }

    /// Create a service with an explicit request timeout.
    ///
    /// # Errors
    ///
    /// Fails if the HTTP client cannot be built.
    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            endpoint: format!("{}/{}", base_url.trim_end_matches('/'), TEMPLATE_SOURCE_ENDPOINT),
        })
    }

    /// Full URL of the template source endpoint.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl ContentService for HttpContentService {
    async fn fetch_raw_markup(&self, identifier: &str) -> Result<String> {
        debug!("Requesting template '{}' from {}", identifier, self.endpoint);
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("iri", identifier)])
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .with_context(|| format!("Failed to request template '{identifier}'"))?;

        let status = response.status();
        if !status.is_success() {
            bail!("Template source request for '{}' failed: HTTP {}", identifier, status);
        }

        let body: TemplateSourceResponse = response
            .json()
            .await
            .with_context(|| format!("Invalid template source response for '{identifier}'"))?;
        debug!(
            "Received template '{}' (app: {}, revision: {})",
            identifier,
            body.app_id.as_deref().unwrap_or("-"),
            body.revision.as_deref().unwrap_or("-")
        );
        Ok(body.source)
    }
}

/// Content service used when no source is configured; every fetch fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnconfiguredContentService;

#[async_trait]
impl ContentService for UnconfiguredContentService {
    async fn fetch_raw_markup(&self, identifier: &str) -> Result<String> {
        bail!(
            "Cannot fetch remote template '{identifier}': no content source configured \
             (set [content].base_url or [content].directory)"
        )
    }
}
