//! The `render` command.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Args;
use serde_json::Value;
use tracing::debug;

use super::{CliConfig, read_input};

/// Compile a template with the default scope and render it.
#[derive(Args, Debug)]
pub struct RenderCommand {
    /// Template file, or `-` for stdin
    template: PathBuf,

    /// JSON file with the render data
    #[arg(short, long, conflicts_with = "json")]
    data: Option<PathBuf>,

    /// Render data as an inline JSON string
    #[arg(long)]
    json: Option<String>,

    /// Extra partial as NAME=FILE; may be repeated
    #[arg(short, long = "partial", value_name = "NAME=FILE")]
    partials: Vec<String>,

    /// Fail on remote references instead of fetching them
    #[arg(long)]
    offline: bool,
}

impl RenderCommand {
    pub async fn execute(self, config: &CliConfig) -> Result<()> {
        let engine = config.load_engine_config().await?.build_engine().await?;
        let source = read_input(&self.template).await?;
        let data = self.load_data().await?;

        let scope = if self.partials.is_empty() {
            None
        } else {
            let mut builder = engine.default_scope().derive();
            for arg in &self.partials {
                let (name, file) = parse_partial_arg(arg)?;
                let markup = tokio::fs::read_to_string(&file)
                    .await
                    .with_context(|| format!("Failed to read partial '{}' from {}", name, file.display()))?;
                builder = builder.register_partial(name, markup)?;
            }
            Some(builder.build()?)
        };
        let scope = scope.as_ref().unwrap_or_else(|| engine.default_scope());

        let compiled = if self.offline {
            scope.compile_without_remote(&source)
        } else {
            scope.compile(&source).await
        }
        .with_context(|| format!("Failed to compile {}", self.template.display()))?;
        debug!("Compiled {}", self.template.display());

        let output = compiled.render(&data)?;
        print!("{output}");
        Ok(())
    }

    async fn load_data(&self) -> Result<Value> {
        if let Some(json) = &self.json {
            return serde_json::from_str(json).context("Failed to parse --json data");
        }
        if let Some(path) = &self.data {
            let content = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read data from {}", path.display()))?;
            return serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse data from {}", path.display()));
        }
        Ok(Value::Object(serde_json::Map::new()))
    }
}

fn parse_partial_arg(arg: &str) -> Result<(&str, PathBuf)> {
    match arg.split_once('=') {
        Some((name, file)) if !name.is_empty() && !file.is_empty() => {
            Ok((name, PathBuf::from(file)))
        }
        _ => bail!("Invalid partial '{arg}', expected NAME=FILE"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_partial_arg() {
        let (name, file) = parse_partial_arg("header=partials/h.hbs").unwrap();
        assert_eq!(name, "header");
        assert_eq!(file, PathBuf::from("partials/h.hbs"));
        assert!(parse_partial_arg("header").is_err());
        assert!(parse_partial_arg("=x").is_err());
    }
}
