//! Integration tests for template scopes.

use std::collections::BTreeMap;

use anyhow::Result;
use serde_json::json;
use tscope::templating::{ScopeTrace, TemplateError};
use tscope::test_utils::TestEngine;

#[tokio::test]
async fn test_compile_returns_cached_instance() -> Result<()> {
    let env = TestEngine::new().with_remote("x", "X");
    let scope = env.engine.create_scope([("a", "{{> ex:x}}")])?;

    let first = scope.compile("{{> a}}").await?;
    let second = scope.compile("{{> a}}").await?;
    assert!(first.ptr_eq(&second));
    assert_eq!(scope.cached_len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_concurrent_compiles_of_new_source_share_result() -> Result<()> {
    let env = TestEngine::with_latency(std::time::Duration::from_millis(10)).with_remote("x", "X");
    let scope = env.engine.default_scope();

    let results = futures::future::join_all((0..4).map(|_| scope.compile("{{> ex:x}}!"))).await;
    let compiled: Vec<_> = results.into_iter().collect::<Result<_, TemplateError>>()?;
    assert!(compiled.windows(2).all(|pair| pair[0].ptr_eq(&pair[1])));
    assert_eq!(env.fetches("x"), 1);
    Ok(())
}

#[tokio::test]
async fn test_scopes_are_isolated() -> Result<()> {
    let env = TestEngine::new();
    let english = env.engine.create_scope([("greet", "Hello {{name}}")])?;
    let german = env.engine.create_scope([("greet", "Hallo {{name}}")])?;

    let data = json!({"name": "Ada"});
    assert_eq!(english.compile("{{> greet}}").await?.render(&data)?, "Hello Ada");
    assert_eq!(german.compile("{{> greet}}").await?.render(&data)?, "Hallo Ada");

    english.clear_cache();
    assert_eq!(english.cached_len(), 0);
    assert_eq!(german.cached_len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_unknown_local_reference_suggests_close_names() -> Result<()> {
    let env = TestEngine::new();
    let scope = env.engine.create_scope([("header", "H"), ("footer", "F")])?;

    let err = scope.compile("{{> heade}}").await.unwrap_err();
    match err.leaf() {
        TemplateError::ReferenceNotFound {
            reference,
            suggestions,
        } => {
            assert_eq!(reference, "heade");
            assert_eq!(suggestions, &["header".to_string()]);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.format_with_context().contains("Did you mean: header?"));
    Ok(())
}

#[tokio::test]
async fn test_inline_partials_are_not_dependencies() -> Result<()> {
    let env = TestEngine::new();
    let source = r#"{{#*inline "item"}}<li>{{this}}</li>{{/inline}}<ul>{{#each xs}}{{> item}}{{/each}}</ul>"#;

    let compiled = env.engine.default_scope().compile(source).await?;
    assert_eq!(compiled.render(&json!({"xs": ["a", "b"]}))?, "<ul><li>a</li><li>b</li></ul>");
    assert_eq!(env.service.total_calls(), 0);
    Ok(())
}

#[tokio::test]
async fn test_dynamic_partial_names_use_registered_partials() -> Result<()> {
    let env = TestEngine::new();
    let scope = env.engine.create_scope([("card", "[card {{title}}]"), ("row", "[row {{title}}]")])?;

    let compiled = scope.compile("{{> (lookup . \"kind\")}}").await?;
    assert_eq!(compiled.render(&json!({"kind": "row", "title": "t"}))?, "[row t]");
    assert_eq!(compiled.render(&json!({"kind": "card", "title": "t"}))?, "[card t]");
    Ok(())
}

#[test]
fn test_sync_compile_rejects_remote_references() {
    let env = TestEngine::new().with_remote("x", "X");
    let scope = env.engine.default_scope();

    let err = scope.compile_without_remote("{{> ex:x}}").unwrap_err();
    assert!(matches!(err.leaf(), TemplateError::ReferenceNotFound { .. }));
    assert_eq!(env.fetches("x"), 0);
}

#[tokio::test]
async fn test_export_props_recreate_an_equivalent_scope() -> Result<()> {
    let env = TestEngine::new();
    let original = env
        .engine
        .builder()
        .register_partial("a", "<a>{{> b}}</a>")?
        .register_partial("b", "{{v}}")?
        .with_trace(ScopeTrace {
            component_tag: Some("x-page".to_string()),
            component_id: None,
            template_id: None,
        })
        .build()?;

    let props: BTreeMap<String, String> = original.export_props();
    let copy = env.engine.create_scope(&props)?;

    let data = json!({"v": 1});
    assert_eq!(
        original.compile("{{> a}}").await?.render(&data)?,
        copy.compile("{{> a}}").await?.render(&data)?
    );
    assert!(copy.trace().is_none());
    Ok(())
}

#[tokio::test]
async fn test_custom_helper_in_derived_scope() -> Result<()> {
    fn shout(
        h: &handlebars::Helper,
        _: &handlebars::Handlebars,
        _: &handlebars::Context,
        _: &mut handlebars::RenderContext,
        out: &mut dyn handlebars::Output,
    ) -> handlebars::HelperResult {
        let text = h.param(0).and_then(|v| v.value().as_str()).unwrap_or("");
        out.write(&format!("{}!", text.to_uppercase()))?;
        Ok(())
    }

    let env = TestEngine::new();
    let base = env.engine.create_scope([("msg", "{{shout text}}")])?;
    let derived = base.derive().with_helper("shout", shout).build()?;

    assert_eq!(derived.compile("{{> msg}}").await?.render(&json!({"text": "hi"}))?, "HI!");
    assert!(!base.helpers().contains("shout"));
    Ok(())
}
