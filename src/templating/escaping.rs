//! Escaping of nested local-template definitions in raw markup.
//!
//! Markup fetched from the content service may define nested templates that
//! are compiled later, by some component and in that component's own scope:
//!
//! ```html
//! <ul>{{#each items}}<li>{{> ex:item}}</li>{{/each}}</ul>
//! <semantic-table>
//!   <template id="cell">{{> ex:cell}}</template>
//! </semantic-table>
//! ```
//!
//! If the outer template were compiled as-is, `{{> ex:cell}}` would be expanded
//! by the outer pass. The [`EscapingRewriter`] therefore wraps every nested
//! template body in the raw marker pair, and wraps each partial invocation
//! found in an attribute value as well. Each compile pass strips exactly one
//! marker layer, so a definition nested `n` levels deep survives `n` passes.
//!
//! The rewriter is a text scanner, not an HTML parser: everything it does not
//! rewrite is copied byte-for-byte. Comments, `<script>`/`<style>` content,
//! mustache expressions inside tags and existing raw blocks are never touched.

use std::sync::LazyLock;

use regex::{Captures, Regex};
use tracing::trace;

use crate::constants::{DEFAULT_LOCAL_TEMPLATE_TAG, RAW_BLOCK_END, RAW_BLOCK_START};
use crate::templating::error::TemplateError;
use crate::templating::syntax::find_raw_block;

static PARTIAL_INVOCATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\{\{~?>.*?\}\}").expect("valid partial pattern"));

static PARTIAL_BLOCK_OPENER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{~?#>").expect("valid partial block pattern"));

/// Elements whose content is raw text and must not be scanned for tags.
const RAW_TEXT_ELEMENTS: [&str; 3] = ["script", "style", "textarea"];

/// Rewrites markup so nested local templates are not expanded prematurely.
///
/// # Examples
///
/// ```
/// use tscope::templating::EscapingRewriter;
///
/// let rewriter = EscapingRewriter::default();
/// let escaped = rewriter.escape("<template id=\"t\">{{> x}}</template>").unwrap();
/// assert_eq!(escaped, "<template id=\"t\">{{{{raw}}}}{{> x}}{{{{/raw}}}}</template>");
/// ```
#[derive(Debug, Clone)]
pub struct EscapingRewriter {
    local_template_tag: String,
}

impl Default for EscapingRewriter {
    fn default() -> Self {
        Self::new(DEFAULT_LOCAL_TEMPLATE_TAG)
    }
}

impl EscapingRewriter {
    /// Create a rewriter for local-template elements named `local_template_tag`.
    pub fn new(local_template_tag: impl Into<String>) -> Self {
        Self {
            local_template_tag: local_template_tag.into().to_ascii_lowercase(),
        }
    }

    /// Tag name of local-template elements.
    pub fn local_template_tag(&self) -> &str {
        &self.local_template_tag
    }

    /// Escape `markup`.
    ///
    /// # Errors
    ///
    /// Returns [`TemplateError::DisallowedPattern`] when an attribute value
    /// contains a partial block opener (`{{#>` or `{{~#>`).
    pub fn escape(&self, markup: &str) -> Result<String, TemplateError> {
        let scanner = Scanner {
            source: markup,
            lower: markup.to_ascii_lowercase(),
            tag: &self.local_template_tag,
        };
        let fragment = scanner.fragment(0, false)?;
        Ok(fragment.output)
    }
}

/// Escape the partial invocations of one attribute value.
///
/// Returns `None` when the value contains no invocation.
fn escape_attribute(element: &str, attribute: &str, value: &str) -> Result<Option<String>, TemplateError> {
    if let Some(found) = PARTIAL_BLOCK_OPENER.find(value) {
        return Err(TemplateError::DisallowedPattern {
            element: element.to_string(),
            attribute: attribute.to_string(),
            pattern: found.as_str().to_string(),
        });
    }
    if !PARTIAL_INVOCATION.is_match(value) {
        return Ok(None);
    }
    let escaped = PARTIAL_INVOCATION.replace_all(value, |caps: &Captures<'_>| {
        format!("{RAW_BLOCK_START}{}{RAW_BLOCK_END}", &caps[0])
    });
    Ok(Some(escaped.into_owned()))
}

struct Fragment {
    output: String,
    /// Offset just after the closing tag, or the end of input
    resume: usize,
    /// Offset where the fragment's own content ends
    content_end: usize,
}

struct StartTag {
    name: String,
    /// Rewritten tag text
    text: String,
    end: usize,
    self_closing: bool,
}

struct Scanner<'a> {
    source: &'a str,
    /// ASCII-lowercased copy with identical byte offsets
    lower: String,
    tag: &'a str,
}

impl Scanner<'_> {
    fn bytes(&self) -> &[u8] {
        self.source.as_bytes()
    }

    fn at(&self, pos: usize, pattern: &str) -> bool {
        self.bytes()[pos..].starts_with(pattern.as_bytes())
    }

    fn find_from(&self, from: usize, pattern: &str) -> Option<usize> {
        self.source[from..].find(pattern).map(|found| from + found)
    }

    /// End offset of the construct closed by `pattern`, or end of input.
    fn skip_past(&self, from: usize, pattern: &str) -> usize {
        self.find_from(from, pattern).map_or(self.source.len(), |found| found + pattern.len())
    }

    fn is_end_tag(&self, pos: usize, name: &str) -> bool {
        let lower = self.lower.as_bytes();
        lower[pos..].starts_with(b"</")
            && lower[pos + 2..].starts_with(name.as_bytes())
            && lower
                .get(pos + 2 + name.len())
                .is_none_or(|&b| b == b'>' || b.is_ascii_whitespace())
    }

    /// Copy and rewrite markup from `pos`.
    ///
    /// With `in_template`, stops at the local-template end tag of the current
    /// nesting level.
    fn fragment(&self, mut pos: usize, in_template: bool) -> Result<Fragment, TemplateError> {
        let len = self.source.len();
        let mut output = String::new();
        let mut text_start = pos;

        while pos < len {
            let byte = self.bytes()[pos];
            if byte == b'{' && self.at(pos, "{{") {
                let end = if self.at(pos, "{{{{") {
                    find_raw_block(self.source, pos).map_or_else(|| self.skip_past(pos, "}}}}"), |(_, _, end)| end)
                } else {
                    self.skip_past(pos + 2, "}}")
                };
                pos = end;
                continue;
            }
            if byte != b'<' {
                pos += 1;
                continue;
            }

            if self.at(pos, "<!--") {
                pos = self.skip_past(pos + 4, "-->");
                continue;
            }
            if in_template && self.is_end_tag(pos, self.tag) {
                output.push_str(&self.source[text_start..pos]);
                let resume = self.skip_past(pos, ">");
                return Ok(Fragment {
                    output,
                    resume,
                    content_end: pos,
                });
            }
            if !self.bytes().get(pos + 1).is_some_and(u8::is_ascii_alphabetic) {
                pos += 1;
                continue;
            }

            let Some(start_tag) = self.start_tag(pos)? else {
                // Unterminated tag, the rest is copied verbatim
                break;
            };
            output.push_str(&self.source[text_start..pos]);
            output.push_str(&start_tag.text);
            pos = start_tag.end;

            if !start_tag.self_closing {
                if start_tag.name == self.tag {
                    pos = self.local_template(pos, &mut output)?;
                } else if RAW_TEXT_ELEMENTS.contains(&start_tag.name.as_str()) {
                    let mut cursor = pos;
                    while cursor < len && !self.is_end_tag(cursor, &start_tag.name) {
                        cursor += 1;
                    }
                    output.push_str(&self.source[pos..cursor]);
                    pos = cursor;
                }
            }
            text_start = pos;
        }

        output.push_str(&self.source[text_start..len]);
        Ok(Fragment {
            output,
            resume: len,
            content_end: len,
        })
    }

    /// Escape a local-template body starting at `body_start` and write it,
    /// wrapped, together with the end tag. Returns the offset to resume at.
    fn local_template(&self, body_start: usize, output: &mut String) -> Result<usize, TemplateError> {
        let body = self.fragment(body_start, true)?;
        let original = &self.source[body_start..body.content_end];
        if original.trim().is_empty() {
            output.push_str(original);
        } else {
            trace!("Escaping nested <{}> body of {} bytes", self.tag, original.len());
            output.push_str(RAW_BLOCK_START);
            output.push_str(&body.output);
            output.push_str(RAW_BLOCK_END);
        }
        output.push_str(&self.source[body.content_end..body.resume]);
        Ok(body.resume)
    }

    /// Parse the start tag at `start` and rewrite its attribute values.
    ///
    /// Returns `None` if the tag is not terminated.
    fn start_tag(&self, start: usize) -> Result<Option<StartTag>, TemplateError> {
        let bytes = self.bytes();
        let len = bytes.len();
        let name_end = (start + 1..len)
            .find(|&i| !(bytes[i].is_ascii_alphanumeric() || matches!(bytes[i], b'-' | b'_' | b':' | b'.')))
            .unwrap_or(len);
        let name = self.lower[start + 1..name_end].to_string();

        let mut text = String::new();
        let mut copied = start;
        let mut pos = name_end;
        loop {
            while pos < len && bytes[pos].is_ascii_whitespace() {
                pos += 1;
            }
            if pos >= len {
                return Ok(None);
            }
            if bytes[pos] == b'>' || self.at(pos, "/>") {
                let self_closing = bytes[pos] == b'/';
                let end = if self_closing { pos + 2 } else { pos + 1 };
                text.push_str(&self.source[copied..end]);
                return Ok(Some(StartTag {
                    name,
                    text,
                    end,
                    self_closing,
                }));
            }
            if self.at(pos, "{{") {
                // Mustache in attribute position, e.g. {{#if x}}checked{{/if}}
                pos = self.skip_past(pos + 2, "}}");
                continue;
            }

            let attr_start = pos;
            while pos < len
                && !bytes[pos].is_ascii_whitespace()
                && !matches!(bytes[pos], b'=' | b'>')
                && !self.at(pos, "/>")
            {
                pos += 1;
            }
            if pos == attr_start {
                pos += 1;
                continue;
            }
            let attribute = &self.source[attr_start..pos];

            let mut lookahead = pos;
            while lookahead < len && bytes[lookahead].is_ascii_whitespace() {
                lookahead += 1;
            }
            if lookahead >= len || bytes[lookahead] != b'=' {
                continue;
            }
            pos = lookahead + 1;
            while pos < len && bytes[pos].is_ascii_whitespace() {
                pos += 1;
            }
            if pos >= len {
                return Ok(None);
            }

            let (value_start, value_end, next) = match bytes[pos] {
                quote @ (b'"' | b'\'') => {
                    let Some(close) = self.source[pos + 1..].find(quote as char) else {
                        return Ok(None);
                    };
                    (pos + 1, pos + 1 + close, pos + 1 + close + 1)
                }
                _ => {
                    let mut end = pos;
                    while end < len && !bytes[end].is_ascii_whitespace() && bytes[end] != b'>' {
                        if self.at(end, "{{") {
                            end = self.skip_past(end + 2, "}}");
                        } else {
                            end += 1;
                        }
                    }
                    (pos, end, end)
                }
            };

            let value = &self.source[value_start..value_end];
            if let Some(escaped) = escape_attribute(&name, attribute, value)? {
                text.push_str(&self.source[copied..value_start]);
                text.push_str(&escaped);
                copied = value_end;
            }
            pos = next;
        }
    }
}
