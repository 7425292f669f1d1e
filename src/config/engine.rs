//! The `tscope.toml` configuration file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::debug;

use crate::constants::{DEFAULT_CONFIG_FILE, DEFAULT_FETCH_TIMEOUT, DEFAULT_LOCAL_TEMPLATE_TAG};
use crate::identifiers::PrefixRegistry;
use crate::source::{
    ContentService, DirectoryContentService, HttpContentService, UnconfiguredContentService,
};
use crate::templating::{EngineOptions, EscapingRewriter, HelperRegistry, TemplateEngine};

/// Engine configuration.
///
/// Every key is optional; an absent file is equivalent to an empty one.
///
/// ```toml
/// local_template_tag = "template"
/// default_namespace = "http://example.org/templates/"
///
/// [prefixes]
/// ex = "http://example.org/"
///
/// [content]
/// base_url = "http://localhost:10214"
/// timeout_secs = 30
///
/// [partials]
/// header = "partials/header.hbs"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Element name of nested local-template definitions.
    #[serde(default = "default_local_template_tag")]
    pub local_template_tag: String,

    /// Namespace that `:name` identifiers expand into.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_namespace: Option<String>,

    /// Compact identifier prefixes, prefix to namespace.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub prefixes: BTreeMap<String, String>,

    /// Where remote templates are fetched from.
    #[serde(default)]
    pub content: ContentConfig,

    /// Partials of the default scope, name to file path.
    ///
    /// Relative paths are resolved against the directory of the config file.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub partials: BTreeMap<String, PathBuf>,
}

/// The `[content]` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentConfig {
    /// Base URL of an HTTP template source endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Directory with one `<percent-encoded identifier>.html` file per template.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathBuf>,

    /// HTTP request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_local_template_tag() -> String {
    DEFAULT_LOCAL_TEMPLATE_TAG.to_string()
}

const fn default_timeout_secs() -> u64 {
    DEFAULT_FETCH_TIMEOUT.as_secs()
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            directory: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            local_template_tag: default_local_template_tag(),
            default_namespace: None,
            prefixes: BTreeMap::new(),
            content: ContentConfig::default(),
            partials: BTreeMap::new(),
        }
    }
}

impl EngineConfig {
    /// Load from `path`, or from `./tscope.toml` when `path` is `None`.
    ///
    /// A missing default file yields the default configuration; a missing
    /// explicit file is an error.
    ///
    /// # Errors
    ///
    /// The file cannot be read, is not valid TOML or fails validation.
    pub async fn load_with_optional(path: Option<PathBuf>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from(&path).await,
            None => {
                let path = PathBuf::from(DEFAULT_CONFIG_FILE);
                if path.exists() {
                    Self::load_from(&path).await
                } else {
                    debug!("No {} found, using defaults", DEFAULT_CONFIG_FILE);
                    Ok(Self::default())
                }
            }
        }
    }

    /// Load from a specific file.
    ///
    /// Relative paths inside the file (content directory, partial files) are
    /// made absolute against the file's directory.
    ///
    /// # Errors
    ///
    /// The file cannot be read, is not valid TOML or fails validation.
    pub async fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        let mut config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))?;
        config.validate().with_context(|| format!("Invalid config in {}", path.display()))?;

        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        config.resolve_paths(base_dir);
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Check for conflicting settings.
    ///
    /// # Errors
    ///
    /// Both a content base URL and a content directory are configured, or the
    /// local template tag is empty.
    pub fn validate(&self) -> Result<()> {
        if self.content.base_url.is_some() && self.content.directory.is_some() {
            bail!("Configure either content.base_url or content.directory, not both");
        }
        if self.local_template_tag.trim().is_empty() {
            bail!("local_template_tag must not be empty");
        }
        Ok(())
    }

    fn resolve_paths(&mut self, base_dir: &Path) {
        if let Some(directory) = &self.content.directory {
            if directory.is_relative() {
                self.content.directory = Some(base_dir.join(directory));
            }
        }
        for file in self.partials.values_mut() {
            if file.is_relative() {
                *file = base_dir.join(&*file);
            }
        }
    }

    /// The identifier expander described by `[prefixes]` and `default_namespace`.
    pub fn prefix_registry(&self) -> PrefixRegistry {
        PrefixRegistry::from_parts(self.prefixes.clone(), self.default_namespace.clone())
    }

    /// The escaping rewriter for fetched templates.
    pub fn rewriter(&self) -> EscapingRewriter {
        EscapingRewriter::new(&self.local_template_tag)
    }

    /// The content service described by `[content]`.
    ///
    /// # Errors
    ///
    /// The HTTP client cannot be built.
    pub fn content_service(&self) -> Result<Arc<dyn ContentService>> {
        if let Some(base_url) = &self.content.base_url {
            let timeout = Duration::from_secs(self.content.timeout_secs);
            return Ok(Arc::new(HttpContentService::with_timeout(base_url, timeout)?));
        }
        if let Some(directory) = &self.content.directory {
            return Ok(Arc::new(DirectoryContentService::new(directory)));
        }
        Ok(Arc::new(UnconfiguredContentService))
    }

    /// Build an engine, reading the default partials from disk.
    ///
    /// # Errors
    ///
    /// A partial file cannot be read or parsed, or the content service cannot
    /// be created.
    pub async fn build_engine(&self) -> Result<TemplateEngine> {
        let mut default_partials = BTreeMap::new();
        for (name, file) in &self.partials {
            let markup = fs::read_to_string(file)
                .await
                .with_context(|| format!("Failed to read partial '{}' from {}", name, file.display()))?;
            default_partials.insert(name.clone(), markup);
        }

        let options = EngineOptions {
            rewriter: self.rewriter(),
            helpers: HelperRegistry::with_defaults(),
            default_partials,
        };
        let engine =
            TemplateEngine::with_options(self.content_service()?, Arc::new(self.prefix_registry()), options)
                .context("Failed to set up the default template scope")?;
        Ok(engine)
    }
}
