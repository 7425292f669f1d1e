//! Configuration management for tscope.
//!
//! Configuration lives in a single TOML file, `tscope.toml`, looked up in the
//! working directory unless `--config` names another file. It describes:
//!
//! - how compact identifiers expand (`[prefixes]`, `default_namespace`)
//! - where remote templates come from (`[content]`)
//! - which element marks nested local templates (`local_template_tag`)
//! - partials every template compiled by the CLI can use (`[partials]`)
//!
//! # Examples
//!
//! ```rust,no_run
//! use tscope::config::EngineConfig;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = EngineConfig::load_with_optional(None).await?;
//! let engine = config.build_engine().await?;
//! let compiled = engine.default_scope().compile("{{> header}}").await?;
//! # Ok(())
//! # }
//! ```

mod engine;

pub use engine::{ContentConfig, EngineConfig};
