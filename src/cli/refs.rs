//! The `refs` command: references of one template, unresolved.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use serde_json::json;

use super::{CliConfig, OutputFormat, read_input};
use crate::templating::references;
use crate::templating::syntax;

/// Parse a template and list the partials it references.
#[derive(Args, Debug)]
pub struct RefsCommand {
    /// Template file, or `-` for stdin
    template: PathBuf,

    /// Output format
    #[arg(short, long, value_enum, default_value_t)]
    format: OutputFormat,
}

impl RefsCommand {
    pub async fn execute(self, config: &CliConfig) -> Result<()> {
        let expander = config.load_engine_config().await?.prefix_registry();
        let source = read_input(&self.template).await?;
        let ast = syntax::parse(&source)?;
        let scan = references::scan(&ast);
        let rows: Vec<(String, Option<String>)> = scan
            .local
            .iter()
            .map(|name| (name.clone(), None))
            .chain(scan.remote.iter().map(|reference| {
                (reference.clone(), Some(expander.expand_one(reference)))
            }))
            .collect();

        match self.format {
            OutputFormat::Text => {
                for (reference, expanded) in &rows {
                    match expanded {
                        None => println!("local   {reference}"),
                        Some(full) if full == reference => println!("remote  {reference}"),
                        Some(full) => println!("remote  {reference} -> {full}"),
                    }
                }
            }
            OutputFormat::Json => {
                let output = json!({
                    "local": scan.local,
                    "remote": scan
                        .remote
                        .iter()
                        .map(|reference| json!({
                            "reference": reference,
                            "identifier": expander.expand_one(reference),
                        }))
                        .collect::<Vec<_>>(),
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
            }
        }
        Ok(())
    }
}
