//! The `deps` command: the resolved dependency tree of a template.
//!
//! ```text
//! page.hbs
//! ├── header
//! │   └── http://example.org/logo
//! └── http://example.org/footer
//!     └── http://example.org/logo (*)
//!
//! (*) = listed above
//! ```

use std::collections::HashSet;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde_json::json;

use super::{CliConfig, OutputFormat, read_input};
use crate::templating::{DependencyMap, ParsedTemplate};

/// Resolve a template's dependencies and print them.
#[derive(Args, Debug)]
pub struct DepsCommand {
    /// Template file, or `-` for stdin
    template: PathBuf,

    /// Output format
    #[arg(short, long, value_enum, default_value_t)]
    format: OutputFormat,
}

impl DepsCommand {
    pub async fn execute(self, config: &CliConfig) -> Result<()> {
        let engine = config.load_engine_config().await?.build_engine().await?;
        let source = read_input(&self.template).await?;
        let root = ParsedTemplate::parse(&source, engine.expander().as_ref())?;
        let dependencies = engine
            .default_scope()
            .dependencies(&source)
            .await
            .with_context(|| format!("Failed to resolve {}", self.template.display()))?;

        match self.format {
            OutputFormat::Text => {
                let label = self.template.display().to_string();
                print!("{}", render_tree(&label, &root, &dependencies));
            }
            OutputFormat::Json => {
                let map: serde_json::Map<String, serde_json::Value> = dependencies
                    .iter()
                    .map(|(reference, template)| {
                        (reference.clone(), json!({ "references": template.references() }))
                    })
                    .collect();
                let output = json!({
                    "references": root.references(),
                    "dependencies": map,
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
            }
        }
        Ok(())
    }
}

fn render_tree(label: &str, root: &ParsedTemplate, dependencies: &DependencyMap) -> String {
    let mut out = format!("{}\n", label.bold());
    let mut seen = HashSet::new();
    let mut duplicates = false;
    print_children(root, dependencies, "", &mut seen, &mut duplicates, &mut out);
    if duplicates {
        out.push_str(&format!("\n{} = listed above\n", "(*)".dimmed()));
    }
    out
}

fn print_children<'a>(
    template: &'a ParsedTemplate,
    dependencies: &'a DependencyMap,
    prefix: &str,
    seen: &mut HashSet<&'a str>,
    duplicates: &mut bool,
    out: &mut String,
) {
    let references = template.references();
    for (i, reference) in references.iter().enumerate() {
        let last = i + 1 == references.len();
        let branch = if last { "└── " } else { "├── " };
        let first_visit = seen.insert(reference.as_str());

        let name = if reference.contains(crate::constants::NAMESPACE_SEPARATOR) {
            reference.cyan().to_string()
        } else {
            reference.to_string()
        };
        if first_visit {
            out.push_str(&format!("{prefix}{branch}{name}\n"));
        } else {
            *duplicates = true;
            out.push_str(&format!("{prefix}{branch}{name} {}\n", "(*)".dimmed()));
            continue;
        }

        if let Some(dependency) = dependencies.get(reference) {
            let child_prefix = format!("{prefix}{}", if last { "    " } else { "│   " });
            print_children(dependency, dependencies, &child_prefix, seen, duplicates, out);
        }
    }
}
