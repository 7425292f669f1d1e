//! Command-line interface for tscope.
//!
//! The CLI drives the template engine from the shell, mainly for inspecting
//! and debugging templates:
//!
//! - `render` - compile a template with every reference resolved and render it
//! - `deps` - show the resolved dependency tree of a template
//! - `refs` - list the references a template makes, without resolving them
//! - `escape` - show how fetched markup is escaped before compilation
//!
//! Every command reads the engine configuration from `tscope.toml` in the
//! working directory, or from the file named by `--config`.
//!
//! # Examples
//!
//! ```bash
//! # Render a page with data from a JSON file
//! tscope render page.hbs --data data.json
//!
//! # Show which remote templates a page pulls in
//! tscope deps page.hbs
//!
//! # Inspect references as JSON, with debug logging
//! tscope --verbose refs page.hbs --format json
//! ```
//!
//! # Global Options
//!
//! - `--verbose` - debug logging on stderr
//! - `--quiet` - log errors only
//! - `--config` - path to the config file

mod deps;
mod escape;
mod refs;
mod render;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::io::AsyncReadExt;
use tracing_subscriber::EnvFilter;

use crate::config::EngineConfig;

/// Runtime configuration for CLI execution.
///
/// Built from the global flags; tests construct it directly.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    /// Log filter directive, `None` to disable logging
    pub log_level: Option<String>,

    /// Config file given with `--config`
    pub config_path: Option<PathBuf>,
}

impl CliConfig {
    /// Create an empty configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the stderr log subscriber.
    ///
    /// `RUST_LOG` takes precedence over the level chosen by the flags. Calling
    /// this more than once is harmless.
    pub fn init_logging(&self) {
        let filter = if std::env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else if let Some(level) = &self.log_level {
            EnvFilter::new(level)
        } else {
            return;
        };

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .try_init();
    }

    /// Load the engine configuration this CLI run uses.
    ///
    /// # Errors
    ///
    /// See [`EngineConfig::load_with_optional`].
    pub async fn load_engine_config(&self) -> Result<EngineConfig> {
        EngineConfig::load_with_optional(self.config_path.clone()).await
    }
}

/// Main CLI structure.
#[derive(Parser)]
#[command(
    name = "tscope",
    about = "Resolve, compile and render templates that reference remote templates",
    version,
    author
)]
pub struct Cli {
    /// The subcommand to execute
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output (debug logging)
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Suppress all output except errors and command results
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Path to the config file (default: ./tscope.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a template and render it with JSON data
    Render(render::RenderCommand),

    /// Show the resolved dependency tree of a template
    Deps(deps::DepsCommand),

    /// List the references a template makes
    Refs(refs::RefsCommand),

    /// Print markup as it looks after escaping for compilation
    Escape(escape::EscapeCommand),
}

/// Output format of the inspection commands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text
    #[default]
    Text,
    /// JSON on stdout
    Json,
}

impl Cli {
    /// Execute the CLI with the configuration given by its flags.
    ///
    /// # Errors
    ///
    /// Whatever the executed command fails with.
    pub async fn execute(self) -> Result<()> {
        let config = self.build_config();
        self.execute_with_config(config).await
    }

    /// Translate the global flags into a [`CliConfig`].
    #[must_use]
    pub fn build_config(&self) -> CliConfig {
        let log_level = if self.verbose {
            Some("debug".to_string())
        } else if self.quiet {
            Some("error".to_string())
        } else {
            Some("info".to_string())
        };

        CliConfig {
            log_level,
            config_path: self.config.clone(),
        }
    }

    /// Execute the CLI with an injected configuration.
    ///
    /// # Errors
    ///
    /// Whatever the executed command fails with.
    pub async fn execute_with_config(self, config: CliConfig) -> Result<()> {
        config.init_logging();

        match self.command {
            Commands::Render(cmd) => cmd.execute(&config).await,
            Commands::Deps(cmd) => cmd.execute(&config).await,
            Commands::Refs(cmd) => cmd.execute(&config).await,
            Commands::Escape(cmd) => cmd.execute(&config).await,
        }
    }
}

/// Read a template from `path`, or from stdin when `path` is `-`.
pub(crate) async fn read_input(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        let mut input = String::new();
        tokio::io::stdin()
            .read_to_string(&mut input)
            .await
            .context("Failed to read template from stdin")?;
        return Ok(input);
    }
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read template from {}", path.display()))
}
