//! Integration tests for resolving remote template references.

use std::time::Duration;

use anyhow::Result;
use serde_json::json;
use tscope::templating::TemplateError;
use tscope::test_utils::TestEngine;

/// A remote template referenced directly and through two nested templates is
/// fetched once.
#[tokio::test]
async fn test_shared_remote_is_fetched_once() -> Result<()> {
    let env = TestEngine::new()
        .with_remote("shared", "[s]")
        .with_remote("a", "a{{> ex:shared}}")
        .with_remote("b", "b{{> ex:shared}}");

    let compiled = env
        .engine
        .default_scope()
        .compile("{{> ex:shared}}{{> ex:a}}{{> ex:b}}")
        .await?;

    assert_eq!(compiled.render(&json!({}))?, "[s]a[s]b[s]");
    assert_eq!(env.fetches("shared"), 1);
    assert_eq!(env.fetches("a"), 1);
    assert_eq!(env.fetches("b"), 1);
    Ok(())
}

/// Every spelling of the same identifier shares one cache entry.
#[tokio::test]
async fn test_spellings_share_one_fetch() -> Result<()> {
    let env = TestEngine::new().with_remote("logo", "LOGO");
    let source = "{{> ex:logo}} {{> <http://example.org/logo>}} {{> http://example.org/logo}}";

    let compiled = env.engine.default_scope().compile(source).await?;
    assert_eq!(compiled.render(&json!({}))?, "LOGO LOGO LOGO");
    assert_eq!(env.fetches("logo"), 1);
    Ok(())
}

/// Mutually recursive templates resolve, each once, and render as far as the
/// data allows.
#[tokio::test]
async fn test_cycle_terminates() -> Result<()> {
    let env = TestEngine::new()
        .with_remote("a", "A{{#if a}}{{> ex:b}}{{/if}}")
        .with_remote("b", "B{{#if b}}{{> ex:a}}{{/if}}");
    let scope = env.engine.default_scope();

    let dependencies = scope.dependencies("{{> ex:a}}").await?;
    let keys: Vec<&str> = dependencies.keys().map(String::as_str).collect();
    assert_eq!(keys, ["http://example.org/a", "http://example.org/b"]);

    let compiled = scope.compile("{{> ex:a}}").await?;
    assert_eq!(compiled.render(&json!({"a": true}))?, "AB");
    assert_eq!(env.fetches("a"), 1);
    assert_eq!(env.fetches("b"), 1);
    Ok(())
}

/// Concurrent compiles of different sources that share a remote dependency
/// still fetch it once.
#[tokio::test]
async fn test_concurrent_compiles_share_fetches() -> Result<()> {
    let env = TestEngine::with_latency(Duration::from_millis(20)).with_remote("slow", "S");
    let scope = env.engine.default_scope();

    let (first, second) = tokio::join!(scope.compile("1{{> ex:slow}}"), scope.compile("2{{> ex:slow}}"));
    assert_eq!(first?.render(&json!({}))?, "1S");
    assert_eq!(second?.render(&json!({}))?, "2S");
    assert_eq!(env.fetches("slow"), 1);
    Ok(())
}

/// After a purge the same source is resolved again and sees changed content.
#[tokio::test]
async fn test_purge_all_picks_up_changes() -> Result<()> {
    let env = TestEngine::new().with_remote("msg", "old");
    let scope = env.engine.default_scope();

    let before = scope.compile("<{{> ex:msg}}>").await?;
    env.set_remote("msg", "new");
    assert_eq!(scope.compile("<{{> ex:msg}}>").await?.render(&json!({}))?, "<old>");

    env.engine.purge_all();
    let after = scope.compile("<{{> ex:msg}}>").await?;
    assert!(!before.ptr_eq(&after));
    assert_eq!(after.render(&json!({}))?, "<new>");
    assert_eq!(env.fetches("msg"), 2);
    Ok(())
}

/// A failed fetch is remembered until purged.
#[tokio::test]
async fn test_fetch_failure_is_cached_until_purge() -> Result<()> {
    let env = TestEngine::new();
    let scope = env.engine.default_scope();

    let err = scope.compile("{{> ex:late}}").await.unwrap_err();
    assert!(matches!(err.leaf(), TemplateError::Fetch { .. }));
    env.set_remote("late", "here");
    assert!(scope.compile("{{> ex:late}}").await.is_err());
    assert_eq!(env.fetches("late"), 1);

    env.engine.purge_all();
    assert_eq!(scope.compile("{{> ex:late}}").await?.render(&json!({}))?, "here");
    assert_eq!(env.fetches("late"), 2);
    Ok(())
}

/// Errors in nested templates carry the path from the root to the failure.
#[tokio::test]
async fn test_nested_error_has_context_chain() -> Result<()> {
    let env = TestEngine::new()
        .with_remote("page", "{{> ex:footer}}")
        .with_remote("footer", "{{> missing}}");

    let err = env.engine.default_scope().compile("{{> ex:page}}").await.unwrap_err();
    let trail = err.breadcrumb();
    assert_eq!(
        trail,
        [
            "Error while resolving dependencies of template 'http://example.org/page'",
            "Error while resolving dependencies of template 'http://example.org/footer'",
            "Failed to load template reference 'missing'",
            "Template reference 'missing' not found",
        ]
    );
    Ok(())
}

/// Local references inside remote templates resolve against the compiling
/// scope's partials.
#[tokio::test]
async fn test_remote_template_uses_scope_partials() -> Result<()> {
    let env = TestEngine::new().with_remote("card", "<div>{{> title}}</div>");
    let scope = env.engine.create_scope([("title", "<h2>{{name}}</h2>")])?;

    let compiled = scope.compile("{{#each items}}{{> ex:card}}{{/each}}").await?;
    let html = compiled.render(&json!({"items": [{"name": "x"}, {"name": "y"}]}))?;
    assert_eq!(html, "<div><h2>x</h2></div><div><h2>y</h2></div>");
    Ok(())
}

/// Partial blocks pass their body to the remote layout.
#[tokio::test]
async fn test_remote_layout_with_partial_block() -> Result<()> {
    let env = TestEngine::new().with_remote("layout", "<main>{{> @partial-block}}</main>");

    let compiled = env.engine.default_scope().compile("{{#> ex:layout}}body{{/ex:layout}}").await?;
    assert_eq!(compiled.render(&json!({}))?, "<main>body</main>");
    Ok(())
}
