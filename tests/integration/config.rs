//! Integration tests for engines built from `tscope.toml`.

use std::path::Path;

use anyhow::Result;
use serde_json::json;
use tempfile::TempDir;
use tscope::config::EngineConfig;
use tscope::source::DirectoryContentService;

/// Write a remote template into the directory layout the directory content
/// service reads.
pub fn write_remote(root: &Path, identifier: &str, markup: &str) -> Result<()> {
    let path = DirectoryContentService::new(root).path_for(identifier);
    std::fs::write(path, markup)?;
    Ok(())
}

/// A project with a config file, one local partial and two remote templates.
pub fn project() -> Result<TempDir> {
    let dir = tempfile::tempdir()?;
    std::fs::create_dir(dir.path().join("remote"))?;
    std::fs::create_dir(dir.path().join("partials"))?;
    std::fs::write(
        dir.path().join("tscope.toml"),
        r#"
default_namespace = "http://example.org/templates/"

[prefixes]
ex = "http://example.org/"

[content]
directory = "remote"

[partials]
brand = "partials/brand.hbs"
"#,
    )?;
    std::fs::write(dir.path().join("partials/brand.hbs"), "<b>{{company}}</b>")?;

    let remote = dir.path().join("remote");
    write_remote(&remote, "http://example.org/footer", "<footer>{{> brand}} {{> :legal}}</footer>")?;
    write_remote(&remote, "http://example.org/templates/legal", "(c) {{year}}")?;
    Ok(dir)
}

#[tokio::test]
async fn test_engine_from_config_reads_directory() -> Result<()> {
    let dir = project()?;
    let config = EngineConfig::load_from(&dir.path().join("tscope.toml")).await?;
    let engine = config.build_engine().await?;

    let compiled = engine.default_scope().compile("<main/>{{> ex:footer}}").await?;
    let html = compiled.render(&json!({"company": "ACME", "year": 2024}))?;
    assert_eq!(html, "<main/><footer><b>ACME</b> (c) 2024</footer>");
    assert_eq!(engine.source_cache().len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_missing_remote_file_is_a_fetch_error() -> Result<()> {
    let dir = project()?;
    let engine = EngineConfig::load_from(&dir.path().join("tscope.toml")).await?.build_engine().await?;

    let err = engine.default_scope().compile("{{> ex:nope}}").await.unwrap_err();
    assert!(err.to_string().contains("http://example.org/nope"));
    Ok(())
}

#[tokio::test]
async fn test_unconfigured_content_still_compiles_local_templates() -> Result<()> {
    let engine = EngineConfig::default().build_engine().await?;
    let scope = engine.create_scope([("a", "A")])?;

    assert_eq!(scope.compile("{{> a}}").await?.render(&json!({}))?, "A");
    let err = scope.compile("{{> ex:b}}").await.unwrap_err();
    assert!(err.format_with_context().contains("no content source configured"));
    Ok(())
}
