//! The immutable parsed-template value shared by caches and scopes.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::constants::{
    COMPILED_TEMPLATE_PREFIX, NAME_HASH_LENGTH, PARTIAL_ALIAS_PREFIX, RAW_LITERAL_HELPER,
};
use crate::identifiers::IdentifierExpander;
use crate::templating::error::TemplateError;
use crate::templating::references::{self, inline_partial_names, is_meta_reference};
use crate::templating::syntax::{self, Node, PartialName, Span, walk};

/// A parsed template: source text, syntax tree and the distinct references it makes.
///
/// Created once by [`ParsedTemplate::parse`] and never mutated. Cloning is an
/// `Arc` increment, so the same value can sit in the source cache, in several
/// scopes and in dependency maps at once.
///
/// Besides the tree, a parsed template carries its *runtime source*: the
/// source text with partial names replaced by runtime-safe aliases and raw
/// blocks replaced by literal-helper calls. That is the text handed to the
/// Handlebars runtime.
///
/// # Examples
///
/// ```
/// use tscope::identifiers::PrefixRegistry;
/// use tscope::templating::ParsedTemplate;
///
/// let expander = PrefixRegistry::new().with_prefix("ex", "http://example.org/");
/// let parsed = ParsedTemplate::parse("{{> header}}{{> ex:footer}}", &expander).unwrap();
/// assert_eq!(parsed.references(), ["header", "http://example.org/footer"]);
/// ```
#[derive(Clone)]
pub struct ParsedTemplate {
    inner: Arc<ParsedInner>,
}

struct ParsedInner {
    source: String,
    ast: Vec<Node>,
    references: Vec<String>,
    runtime_source: String,
}

impl ParsedTemplate {
    /// Parse `source`, scan its references and expand the remote ones.
    ///
    /// References are ordered local names first, then expanded remote
    /// identifiers, each in discovery order without duplicates.
    ///
    /// # Errors
    ///
    /// Returns [`TemplateError::Parse`] if the source is not valid template syntax.
    pub fn parse(source: &str, expander: &dyn IdentifierExpander) -> Result<Self, TemplateError> {
        let ast = syntax::parse(source)?;
        let scan = references::scan(&ast);

        let expanded = expander.expand(&scan.remote);
        let remote_names: HashMap<&str, &str> = scan
            .remote
            .iter()
            .map(String::as_str)
            .zip(expanded.iter().map(String::as_str))
            .collect();

        let mut references = scan.local.clone();
        for identifier in &expanded {
            if !references.contains(identifier) {
                references.push(identifier.clone());
            }
        }

        let runtime_source = lower(source, &ast, |name| {
            remote_names.get(name).map_or_else(|| name.to_string(), |full| (*full).to_string())
        });

        Ok(Self {
            inner: Arc::new(ParsedInner {
                source: source.to_string(),
                ast,
                references,
                runtime_source,
            }),
        })
    }

    /// The source text as given to [`ParsedTemplate::parse`].
    pub fn source(&self) -> &str {
        &self.inner.source
    }

    /// The syntax tree.
    pub fn ast(&self) -> &[Node] {
        &self.inner.ast
    }

    /// Distinct references, remote ones fully expanded.
    ///
    /// Local names come first, then remote identifiers; each group keeps
    /// discovery order. The resolver claims and loads them in this order.
    pub fn references(&self) -> &[String] {
        &self.inner.references
    }

    /// Source text rewritten for the Handlebars runtime.
    pub fn runtime_source(&self) -> &str {
        &self.inner.runtime_source
    }

    /// Whether two values share the same parsed instance.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for ParsedTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParsedTemplate")
            .field("source_len", &self.inner.source.len())
            .field("references", &self.inner.references)
            .finish()
    }
}

/// Runtime registry name of a partial reference.
///
/// Plain identifiers are used as-is; anything the runtime cannot parse as a
/// partial name (identifiers with `:`, `/`, spaces, ...) is replaced by a
/// stable hash-based alias.
pub fn runtime_partial_name(reference: &str) -> String {
    let plain = !reference.is_empty()
        && reference.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if plain {
        reference.to_string()
    } else {
        format!("{PARTIAL_ALIAS_PREFIX}{}", short_hash(reference))
    }
}

/// Registry name of a compiled root template.
pub(crate) fn compiled_template_name(source: &str) -> String {
    format!("{COMPILED_TEMPLATE_PREFIX}{}", short_hash(source))
}

fn short_hash(text: &str) -> String {
    let digest = hex::encode(Sha256::digest(text.as_bytes()));
    digest[..NAME_HASH_LENGTH].to_string()
}

/// Rewrite `source` for the runtime.
///
/// `resolve` maps a reference as written to the key it is resolved under
/// (the expanded identifier for remote references).
fn lower(source: &str, ast: &[Node], resolve: impl Fn(&str) -> String) -> String {
    let inline = inline_partial_names(ast);
    let mut edits: Vec<(Span, String)> = Vec::new();

    let mut rename = |name: &PartialName, spans: &[Span]| {
        if let PartialName::Static {
            name,
            ..
        } = name
        {
            if is_meta_reference(name) || inline.contains(name.as_str()) {
                return;
            }
            let alias = runtime_partial_name(&resolve(name));
            for span in spans {
                if span.slice(source) != alias {
                    edits.push((*span, alias.clone()));
                }
            }
        }
    };

    let mut raw_blocks = Vec::new();
    let mut dynamic = Vec::new();
    walk(ast, &mut |node| match node {
        Node::Partial(partial) => match &partial.name {
            PartialName::Static {
                span,
                ..
            } => rename(&partial.name, &[*span]),
            PartialName::Dynamic {
                expression,
                span,
            } => dynamic.push((*span, expression)),
        },
        Node::PartialBlock(block) => match &block.name {
            PartialName::Static {
                span,
                ..
            } => rename(&block.name, &[*span, block.close_span]),
            PartialName::Dynamic {
                expression,
                span,
            } => dynamic.push((*span, expression)),
        },
        Node::RawBlock(raw) => raw_blocks.push(raw),
        _ => {}
    });

    for (span, expression) in dynamic {
        let runtime = runtime_expression(expression);
        if runtime != *expression {
            edits.push((span, runtime));
        }
    }

    for raw in raw_blocks {
        // Hex keeps the literal free of quotes and backslashes
        let call = format!("{{{{{RAW_LITERAL_HELPER} \"{}\"}}}}", hex::encode(raw.content.as_bytes()));
        edits.push((raw.span, call));
    }

    if edits.is_empty() {
        return source.to_string();
    }
    edits.sort_by_key(|(span, _)| span.start);

    let mut lowered = String::with_capacity(source.len());
    let mut cursor = 0;
    for (span, replacement) in edits {
        lowered.push_str(&source[cursor..span.start]);
        lowered.push_str(&replacement);
        cursor = span.end;
    }
    lowered.push_str(&source[cursor..]);
    lowered
}

/// Spell a bare `.` (the current context) as `this` in a sub-expression.
///
/// The runtime only accepts `this` for the current context in sub-expression
/// arguments. String literals are left alone.
fn runtime_expression(expression: &str) -> String {
    let chars: Vec<char> = expression.chars().collect();
    let mut out = String::with_capacity(expression.len() + 8);
    let mut quote = None;
    for (i, &c) in chars.iter().enumerate() {
        match quote {
            Some(q) => {
                if c == q {
                    quote = None;
                }
                out.push(c);
            }
            None if c == '"' || c == '\'' => {
                quote = Some(c);
                out.push(c);
            }
            None if c == '.' => {
                let before = i.checked_sub(1).map(|j| chars[j]);
                let after = chars.get(i + 1).copied();
                let standalone = matches!(before, None | Some('(')) || before.is_some_and(char::is_whitespace);
                let closes = matches!(after, None | Some(')')) || after.is_some_and(char::is_whitespace);
                if standalone && closes {
                    out.push_str("this");
                } else {
                    out.push(c);
                }
            }
            None => out.push(c),
        }
    }
    out
}
