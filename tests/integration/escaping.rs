//! Integration tests for nested local templates in fetched markup.

use anyhow::Result;
use serde_json::json;
use tscope::templating::{EscapingRewriter, TemplateError};
use tscope::test_utils::TestEngine;

/// A partial invocation inside a nested local template reaches the output
/// unexpanded, ready for the component that compiles it later.
#[tokio::test]
async fn test_nested_local_template_is_emitted_literally() -> Result<()> {
    let env = TestEngine::new().with_remote(
        "list",
        r#"<ul data-title="{{title}}"><template id="row"><li>{{> x}}</li></template></ul>"#,
    );

    let compiled = env.engine.default_scope().compile("{{> ex:list}}").await?;
    let html = compiled.render(&json!({"title": "Items"}))?;
    assert_eq!(html, r#"<ul data-title="Items"><template id="row"><li>{{> x}}</li></template></ul>"#);
    Ok(())
}

/// References inside nested local templates are not resolved by the outer
/// compile.
#[tokio::test]
async fn test_nested_references_are_not_fetched() -> Result<()> {
    let env = TestEngine::new().with_remote("outer", "<template>{{> ex:inner}}</template>");

    let dependencies = env.engine.default_scope().dependencies("{{> ex:outer}}").await?;
    assert_eq!(dependencies.len(), 1);
    assert_eq!(env.fetches("inner"), 0);
    Ok(())
}

/// Doubly nested templates keep one more escaping layer for the inner compile.
#[tokio::test]
async fn test_doubly_nested_template_keeps_inner_escaping() -> Result<()> {
    let markup = "<template id=\"a\"><template id=\"b\">{{> y}}</template></template>";
    let env = TestEngine::new().with_remote("deep", markup);

    let html = env.engine.default_scope().compile("{{> ex:deep}}").await?.render(&json!({}))?;
    let inner = EscapingRewriter::default().escape("<template id=\"b\">{{> y}}</template>")?;
    assert_eq!(html, format!("<template id=\"a\">{inner}</template>"));
    assert!(html.contains("{{{{raw}}}}{{> y}}{{{{/raw}}}}"));
    Ok(())
}

#[test]
fn test_empty_nested_definition_is_not_wrapped() -> Result<()> {
    let rewriter = EscapingRewriter::default();
    assert_eq!(rewriter.escape("<template id=\"e\"></template>")?, "<template id=\"e\"></template>");
    assert_eq!(rewriter.escape("<template>\n</template>")?, "<template>\n</template>");
    Ok(())
}

#[tokio::test]
async fn test_partial_block_in_attribute_fails_the_compile() -> Result<()> {
    let env = TestEngine::new()
        .with_remote("bad", r#"<div data-tpl="{{#> layout}}x{{/layout}}"></div>"#);

    let err = env.engine.default_scope().compile("{{> ex:bad}}").await.unwrap_err();
    assert!(matches!(err.leaf(), TemplateError::Fetch { .. }));
    assert!(err.format_with_context().contains("is not allowed inside attribute 'data-tpl' of <div>"));

    let direct = EscapingRewriter::default().escape(r#"<div data-tpl="{{#> layout}}x{{/layout}}">"#);
    assert!(matches!(direct, Err(TemplateError::DisallowedPattern { .. })));
    Ok(())
}

/// The local template element name is configurable.
#[test]
fn test_custom_local_template_tag() -> Result<()> {
    let rewriter = EscapingRewriter::new("mp-template");
    let escaped = rewriter.escape("<mp-template>{{> a}}</mp-template><template>{{> b}}</template>")?;
    assert_eq!(
        escaped,
        "<mp-template>{{{{raw}}}}{{> a}}{{{{/raw}}}}</mp-template><template>{{> b}}</template>"
    );
    Ok(())
}
