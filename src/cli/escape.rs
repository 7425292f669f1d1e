//! The `escape` command.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use super::{CliConfig, read_input};

/// Print markup after the escaping pass applied to fetched templates.
///
/// Useful to check which partial invocations a nested local template keeps
/// for later compilation.
#[derive(Args, Debug)]
pub struct EscapeCommand {
    /// Markup file, or `-` for stdin
    markup: PathBuf,

    /// Override the configured local template tag
    #[arg(long)]
    tag: Option<String>,
}

impl EscapeCommand {
    pub async fn execute(self, config: &CliConfig) -> Result<()> {
        let mut engine_config = config.load_engine_config().await?;
        if let Some(tag) = self.tag {
            engine_config.local_template_tag = tag;
        }
        let markup = read_input(&self.markup).await?;
        let escaped = engine_config
            .rewriter()
            .escape(&markup)
            .with_context(|| format!("Failed to escape {}", self.markup.display()))?;
        print!("{escaped}");
        Ok(())
    }
}
