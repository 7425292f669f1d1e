//! Integration tests for the `tscope` binary.

use anyhow::Result;
use assert_cmd::Command;
use predicates::prelude::*;

use crate::config::project;

fn tscope() -> Command {
    let mut cmd = Command::cargo_bin("tscope").unwrap();
    cmd.env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_render_with_remote_and_configured_partials() -> Result<()> {
    let dir = project()?;
    std::fs::write(dir.path().join("page.hbs"), "<h1>{{title}}</h1>{{> ex:footer}}")?;
    std::fs::write(dir.path().join("data.json"), r#"{"title": "Home", "company": "ACME", "year": 2024}"#)?;

    tscope()
        .current_dir(dir.path())
        .args(["render", "page.hbs", "--data", "data.json"])
        .assert()
        .success()
        .stdout("<h1>Home</h1><footer><b>ACME</b> (c) 2024</footer>");
    Ok(())
}

#[test]
fn test_render_from_stdin_with_inline_json() -> Result<()> {
    let dir = project()?;

    tscope()
        .current_dir(dir.path())
        .args(["render", "-", "--json", r#"{"company": "X"}"#])
        .write_stdin("[{{> brand}}]")
        .assert()
        .success()
        .stdout("[<b>X</b>]");
    Ok(())
}

#[test]
fn test_render_with_extra_partial() -> Result<()> {
    let dir = project()?;
    std::fs::write(dir.path().join("extra.hbs"), "extra:{{> brand}}")?;

    tscope()
        .current_dir(dir.path())
        .args(["render", "-", "--partial", "extra=extra.hbs", "--json", r#"{"company": "Y"}"#])
        .write_stdin("{{> extra}}")
        .assert()
        .success()
        .stdout("extra:<b>Y</b>");
    Ok(())
}

#[test]
fn test_render_offline_rejects_remote_references() -> Result<()> {
    let dir = project()?;

    tscope()
        .current_dir(dir.path())
        .args(["render", "-", "--offline"])
        .write_stdin("{{> ex:footer}}")
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("not found"))
        .stderr(predicate::str::contains("suggestion"));
    Ok(())
}

#[test]
fn test_deps_prints_tree() -> Result<()> {
    let dir = project()?;
    std::fs::write(dir.path().join("page.hbs"), "{{> ex:footer}}{{> brand}}")?;

    tscope()
        .current_dir(dir.path())
        .env("NO_COLOR", "1")
        .args(["deps", "page.hbs"])
        .assert()
        .success()
        .stdout(predicate::str::contains("├── brand"))
        .stdout(predicate::str::contains("└── http://example.org/footer"))
        .stdout(predicate::str::contains("    ├── brand (*)"))
        .stdout(predicate::str::contains("    └── http://example.org/templates/legal"));
    Ok(())
}

#[test]
fn test_deps_json() -> Result<()> {
    let dir = project()?;
    std::fs::write(dir.path().join("page.hbs"), "{{> ex:footer}}")?;

    let output = tscope()
        .current_dir(dir.path())
        .args(["deps", "page.hbs", "--format", "json"])
        .output()?;
    assert!(output.status.success());

    let value: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(value["references"], serde_json::json!(["http://example.org/footer"]));
    assert_eq!(
        value["dependencies"]["http://example.org/footer"]["references"],
        serde_json::json!(["brand", "http://example.org/templates/legal"])
    );
    Ok(())
}

#[test]
fn test_refs_lists_local_and_remote() -> Result<()> {
    let dir = project()?;

    tscope()
        .current_dir(dir.path())
        .args(["refs", "-"])
        .write_stdin("{{> header}}{{> ex:footer}}<template>{{> ex:row}}</template>")
        .assert()
        .success()
        .stdout(predicate::str::contains("local   header"))
        .stdout(predicate::str::contains("remote  ex:footer -> http://example.org/footer"))
        .stdout(predicate::str::contains("remote  ex:row -> http://example.org/row"));
    Ok(())
}

#[test]
fn test_escape_wraps_nested_templates() -> Result<()> {
    let dir = project()?;

    tscope()
        .current_dir(dir.path())
        .args(["escape", "-"])
        .write_stdin("<x-list><template>{{> row}}</template></x-list>")
        .assert()
        .success()
        .stdout("<x-list><template>{{{{raw}}}}{{> row}}{{{{/raw}}}}</template></x-list>");
    Ok(())
}

#[test]
fn test_escape_reports_disallowed_pattern() -> Result<()> {
    let dir = project()?;

    tscope()
        .current_dir(dir.path())
        .args(["escape", "-"])
        .write_stdin(r#"<div title="{{#> layout}}{{/layout}}"></div>"#)
        .assert()
        .failure()
        .stderr(predicate::str::contains("is not allowed inside attribute 'title'"));
    Ok(())
}

#[test]
fn test_invalid_config_is_reported() -> Result<()> {
    let dir = tempfile::tempdir()?;
    std::fs::write(dir.path().join("bad.toml"), "[content\n")?;

    tscope()
        .current_dir(dir.path())
        .args(["--config", "bad.toml", "refs", "-"])
        .write_stdin("x")
        .assert()
        .failure()
        .stderr(predicate::str::contains("error"));
    Ok(())
}
