//! Parser for the Handlebars template language.
//!
//! The parser produces a small syntax tree that is precise enough for
//! dependency discovery and source rewriting, but it deliberately does not
//! interpret expressions: helper parameters, hash arguments and paths are kept
//! as opaque text. Execution is left to the runtime.
//!
//! Two properties matter to the rest of the engine:
//!
//! - Partial names carry the byte [`Span`] of the name token in the original
//!   source, so names can be rewritten in place without re-printing the tree.
//! - Raw blocks (`{{{{raw}}}} … {{{{/raw}}}}`) nest: an inner opener with the
//!   same helper name increases the depth, so one compile pass strips exactly
//!   one marker layer.
//!
//! # Examples
//!
//! ```
//! use tscope::templating::syntax::{parse, Node};
//!
//! let ast = parse("Hello {{> header title=name}}!").unwrap();
//! assert!(matches!(ast[1], Node::Partial(_)));
//! ```

use crate::templating::error::TemplateError;

/// Byte range `[start, end)` into the parsed source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    /// Inclusive start offset
    pub start: usize,
    /// Exclusive end offset
    pub end: usize,
}

impl Span {
    /// Create a span from byte offsets.
    pub fn new(start: usize, end: usize) -> Self {
        Self {
            start,
            end,
        }
    }

    /// The text this span covers in `source`.
    pub fn slice<'a>(&self, source: &'a str) -> &'a str {
        &source[self.start..self.end]
    }
}

/// Name of a partial invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartialName {
    /// A statically known name: identifier, quoted string or `[segment]`.
    Static {
        /// Name with quotes or brackets removed
        name: String,
        /// Span of the name token as written (including quotes or brackets)
        span: Span,
    },
    /// A name computed at render time by a sub-expression, e.g. `(lookup . "x")`.
    Dynamic {
        /// The sub-expression text, parentheses included
        expression: String,
        /// Span of the sub-expression
        span: Span,
    },
}

impl PartialName {
    /// The static name, if any.
    pub fn as_static(&self) -> Option<&str> {
        match self {
            Self::Static {
                name,
                ..
            } => Some(name),
            Self::Dynamic {
                ..
            } => None,
        }
    }
}

/// `{{> name params}}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partial {
    /// Invoked partial
    pub name: PartialName,
    /// Remaining context and hash arguments, unparsed
    pub params: String,
}

/// `{{#> name params}} body {{/name}}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialBlock {
    /// Invoked partial
    pub name: PartialName,
    /// Remaining context and hash arguments, unparsed
    pub params: String,
    /// Span of the name token inside the closing tag
    pub close_span: Span,
    /// Failover content, available to the partial as `@partial-block`
    pub body: Vec<Node>,
}

/// `{{#helper params}} body {{else}} inverse {{/helper}}`, or `{{^helper}}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// Block helper name
    pub helper: String,
    /// Parameters, unparsed
    pub params: String,
    /// True for inverted sections (`{{^helper}}`)
    pub inverted: bool,
    /// Main section
    pub body: Vec<Node>,
    /// Everything after `{{else}}`, including chained `{{else if}}` sections
    pub inverse: Option<Vec<Node>>,
}

/// `{{#*decorator params}} body {{/decorator}}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecoratorBlock {
    /// Decorator name, `inline` for inline partial definitions
    pub decorator: String,
    /// Parameters, unparsed
    pub params: String,
    /// Block content
    pub body: Vec<Node>,
}

impl DecoratorBlock {
    /// Name declared by an `{{#*inline "name"}}` definition.
    pub fn inline_name(&self) -> Option<&str> {
        if self.decorator != "inline" {
            return None;
        }
        let first = self.params.split_whitespace().next()?;
        Some(unquote(first))
    }
}

/// `{{{{helper}}}} content {{{{/helper}}}}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawBlock {
    /// Raw block helper name, `raw` for escape markers
    pub helper: String,
    /// Verbatim content between the markers
    pub content: String,
    /// Span of the whole block including both markers
    pub span: Span,
}

/// A node of the syntax tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    /// Literal text, including backslash-escaped mustaches
    Text(String),
    /// `{{! … }}` or `{{!-- … --}}`
    Comment(String),
    /// `{{expr}}`, `{{{expr}}}` or `{{& expr}}`
    Expression {
        /// Expression text
        content: String,
        /// False for triple-stash and `&` expressions
        escaped: bool,
    },
    /// `{{* decorator}}`
    Decorator(String),
    /// `{{> partial}}`
    Partial(Partial),
    /// Block helper section
    Block(Box<Block>),
    /// Partial invocation with failover content
    PartialBlock(Box<PartialBlock>),
    /// Decorator block, including inline partial definitions
    DecoratorBlock(Box<DecoratorBlock>),
    /// Raw block, content not parsed
    RawBlock(RawBlock),
}

impl Node {
    /// Child node lists of this node, in source order.
    pub fn children(&self) -> Vec<&[Node]> {
        match self {
            Node::Block(block) => {
                let mut children = vec![block.body.as_slice()];
                if let Some(inverse) = &block.inverse {
                    children.push(inverse.as_slice());
                }
                children
            }
            Node::PartialBlock(block) => vec![block.body.as_slice()],
            Node::DecoratorBlock(block) => vec![block.body.as_slice()],
            Node::Text(_)
            | Node::Comment(_)
            | Node::Expression {
                ..
            }
            | Node::Decorator(_)
            | Node::Partial(_)
            | Node::RawBlock(_) => Vec::new(),
        }
    }
}

/// Visit every node of `nodes` depth-first, in source order.
///
/// Raw block content is never descended into.
pub fn walk<'a>(nodes: &'a [Node], visit: &mut impl FnMut(&'a Node)) {
    for node in nodes {
        visit(node);
        for children in node.children() {
            walk(children, visit);
        }
    }
}

/// Parse template source into a syntax tree.
///
/// # Errors
///
/// Returns [`TemplateError::Parse`] for unterminated tags, unbalanced block
/// tags and malformed partial names.
pub fn parse(source: &str) -> Result<Vec<Node>, TemplateError> {
    let tokens = Lexer::new(source).tokenize()?;
    Parser::new(source).parse(tokens)
}

/// 1-based line and column of a byte offset.
pub fn line_col(source: &str, offset: usize) -> (usize, usize) {
    let offset = offset.min(source.len());
    let before = source.get(..offset).unwrap_or(source);
    let line = before.matches('\n').count() + 1;
    let column = match before.rfind('\n') {
        Some(newline) => before[newline + 1..].chars().count() + 1,
        None => before.chars().count() + 1,
    };
    (line, column)
}

/// Find the end of the raw block opened at `start` (which must point at `{{{{`).
///
/// Returns `(helper, content_span, end)` where `end` is the offset just after
/// the matching closing marker, or `None` if the block is malformed or not
/// closed.
pub(crate) fn find_raw_block(source: &str, start: usize) -> Option<(String, Span, usize)> {
    let open_end = start + 4 + source[start + 4..].find("}}}}")?;
    let helper = source[start + 4..open_end].split_whitespace().next()?.to_string();
    if helper.starts_with('/') {
        return None;
    }
    let content_start = open_end + 4;

    let mut depth = 1usize;
    let mut cursor = content_start;
    while let Some(found) = source[cursor..].find("{{{{") {
        let marker = cursor + found;
        let tag_end = marker + 4 + source[marker + 4..].find("}}}}")?;
        let tag = source[marker + 4..tag_end].trim();
        if let Some(closing) = tag.strip_prefix('/') {
            if closing.trim() == helper {
                depth -= 1;
                if depth == 0 {
                    return Some((helper, Span::new(content_start, marker), tag_end + 4));
                }
            }
        } else if tag.split_whitespace().next() == Some(helper.as_str()) {
            depth += 1;
        }
        cursor = tag_end + 4;
    }
    None
}

fn unquote(token: &str) -> &str {
    let bytes = token.as_bytes();
    if bytes.len() >= 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        if (first == b'"' && last == b'"')
            || (first == b'\'' && last == b'\'')
            || (first == b'[' && last == b']')
        {
            return &token[1..token.len() - 1];
        }
    }
    token
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TagKind {
    Comment,
    Expression,
    Unescaped,
    Decorator,
    Partial,
    OpenBlock,
    OpenInverse,
    OpenPartialBlock,
    OpenDecoratorBlock,
    Else,
    Close,
}

#[derive(Debug)]
struct Tag {
    kind: TagKind,
    /// Tag content after the sigil, trimmed
    inner: Span,
    /// The whole tag including delimiters
    span: Span,
}

#[derive(Debug)]
enum Token {
    Text(Span),
    Tag(Tag),
    Raw(RawBlock),
}

struct Lexer<'a> {
    source: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Lexer<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            bytes: source.as_bytes(),
            pos: 0,
        }
    }

    fn error_at(&self, offset: usize, message: impl Into<String>) -> TemplateError {
        let (line, column) = line_col(self.source, offset);
        TemplateError::Parse {
            message: message.into(),
            line,
            column,
        }
    }

    fn at(&self, offset: usize, pattern: &str) -> bool {
        self.bytes[offset..].starts_with(pattern.as_bytes())
    }

    fn tokenize(mut self) -> Result<Vec<Token>, TemplateError> {
        let mut tokens = Vec::new();
        let mut text_start = 0;

        while self.pos < self.bytes.len() {
            if self.at(self.pos, "\\{{") {
                // Escaped mustache stays literal text up to its closing braces
                self.pos = match self.source[self.pos + 3..].find("}}") {
                    Some(close) => self.pos + 3 + close + 2,
                    None => self.bytes.len(),
                };
                continue;
            }
            if !self.at(self.pos, "{{") {
                self.pos += 1;
                continue;
            }

            if text_start < self.pos {
                tokens.push(Token::Text(Span::new(text_start, self.pos)));
            }
            let token = if self.at(self.pos, "{{{{") {
                self.lex_raw_block()?
            } else {
                Token::Tag(self.lex_tag()?)
            };
            tokens.push(token);
            text_start = self.pos;
        }

        if text_start < self.bytes.len() {
            tokens.push(Token::Text(Span::new(text_start, self.bytes.len())));
        }
        Ok(tokens)
    }

    fn lex_raw_block(&mut self) -> Result<Token, TemplateError> {
        let start = self.pos;
        let (helper, content, end) = find_raw_block(self.source, start)
            .ok_or_else(|| self.error_at(start, "unclosed or malformed raw block"))?;
        self.pos = end;
        Ok(Token::Raw(RawBlock {
            helper,
            content: content.slice(self.source).to_string(),
            span: Span::new(start, end),
        }))
    }

    fn find_from(&self, from: usize, pattern: &str) -> Option<usize> {
        self.source[from..].find(pattern).map(|found| from + found)
    }

    fn lex_tag(&mut self) -> Result<Tag, TemplateError> {
        let start = self.pos;
        let mut cursor = start + 2;
        let strip_open = self.bytes.get(cursor) == Some(&b'~');
        if strip_open {
            cursor += 1;
        }

        if self.at(cursor, "!--") {
            let close = self
                .find_from(cursor + 3, "--}}")
                .ok_or_else(|| self.error_at(start, "unterminated comment"))?;
            self.pos = close + 4;
            return Ok(Tag {
                kind: TagKind::Comment,
                inner: Span::new(cursor + 3, close),
                span: Span::new(start, self.pos),
            });
        }

        if !strip_open && self.at(cursor, "{") {
            let close = self
                .find_from(cursor + 1, "}}}")
                .ok_or_else(|| self.error_at(start, "unterminated triple-stash expression"))?;
            self.pos = close + 3;
            return Ok(Tag {
                kind: TagKind::Unescaped,
                inner: self.trim(cursor + 1, close),
                span: Span::new(start, self.pos),
            });
        }

        let close = self
            .find_from(cursor, "}}")
            .ok_or_else(|| self.error_at(start, "unterminated mustache tag"))?;
        self.pos = close + 2;
        let mut inner_end = close;
        if inner_end > cursor && self.bytes[inner_end - 1] == b'~' {
            inner_end -= 1;
        }
        let content = self.trim(cursor, inner_end);
        let (kind, sigil_len) = self.classify(content);
        let inner = self.trim(content.start + sigil_len, content.end);

        Ok(Tag {
            kind,
            inner,
            span: Span::new(start, self.pos),
        })
    }

    fn classify(&self, content: Span) -> (TagKind, usize) {
        let text = content.slice(self.source);
        match text.as_bytes().first() {
            Some(b'!') => (TagKind::Comment, 1),
            Some(b'#') if text.starts_with("#>") => (TagKind::OpenPartialBlock, 2),
            Some(b'#') if text.starts_with("#*") => (TagKind::OpenDecoratorBlock, 2),
            Some(b'#') => (TagKind::OpenBlock, 1),
            Some(b'^') if text[1..].trim().is_empty() => (TagKind::Else, 1),
            Some(b'^') => (TagKind::OpenInverse, 1),
            Some(b'/') => (TagKind::Close, 1),
            Some(b'>') => (TagKind::Partial, 1),
            Some(b'*') => (TagKind::Decorator, 1),
            Some(b'&') => (TagKind::Unescaped, 1),
            _ if text == "else" || text.starts_with("else ") => (TagKind::Else, 0),
            _ => (TagKind::Expression, 0),
        }
    }

    fn trim(&self, mut start: usize, mut end: usize) -> Span {
        while start < end && self.bytes[start].is_ascii_whitespace() {
            start += 1;
        }
        while end > start && self.bytes[end - 1].is_ascii_whitespace() {
            end -= 1;
        }
        Span::new(start, end)
    }
}

enum FrameKind {
    Root,
    Block {
        helper: String,
        params: String,
        inverted: bool,
    },
    PartialBlock {
        name: PartialName,
        raw_name: String,
        params: String,
    },
    DecoratorBlock {
        decorator: String,
        params: String,
    },
}

struct Frame {
    kind: FrameKind,
    body: Vec<Node>,
    inverse: Option<Vec<Node>>,
    opened_at: usize,
}

impl Frame {
    fn new(kind: FrameKind, opened_at: usize) -> Self {
        Self {
            kind,
            body: Vec::new(),
            inverse: None,
            opened_at,
        }
    }

    fn push(&mut self, node: Node) {
        match &mut self.inverse {
            Some(inverse) => inverse.push(node),
            None => self.body.push(node),
        }
    }

    fn expected_close(&self) -> Option<&str> {
        match &self.kind {
            FrameKind::Root => None,
            FrameKind::Block {
                helper,
                ..
            } => Some(helper),
            FrameKind::PartialBlock {
                raw_name,
                ..
            } => Some(raw_name),
            FrameKind::DecoratorBlock {
                decorator,
                ..
            } => Some(decorator),
        }
    }
}

struct Parser<'a> {
    source: &'a str,
    stack: Vec<Frame>,
}

impl<'a> Parser<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            stack: vec![Frame::new(FrameKind::Root, 0)],
        }
    }

    fn error_at(&self, offset: usize, message: impl Into<String>) -> TemplateError {
        let (line, column) = line_col(self.source, offset);
        TemplateError::Parse {
            message: message.into(),
            line,
            column,
        }
    }

    fn current(&mut self) -> &mut Frame {
        // The root frame is never popped
        let last = self.stack.len() - 1;
        &mut self.stack[last]
    }

    fn parse(mut self, tokens: Vec<Token>) -> Result<Vec<Node>, TemplateError> {
        for token in tokens {
            match token {
                Token::Text(span) => {
                    let text = span.slice(self.source).to_string();
                    self.current().push(Node::Text(text));
                }
                Token::Raw(raw) => self.current().push(Node::RawBlock(raw)),
                Token::Tag(tag) => self.tag(tag)?,
            }
        }

        if self.stack.len() > 1 {
            let frame = &self.stack[self.stack.len() - 1];
            let name = frame.expected_close().unwrap_or_default().to_string();
            return Err(self.error_at(frame.opened_at, format!("unclosed block '{name}'")));
        }
        Ok(self.stack.pop().map(|root| root.body).unwrap_or_default())
    }

    fn tag(&mut self, tag: Tag) -> Result<(), TemplateError> {
        let inner = tag.inner.slice(self.source);
        match tag.kind {
            TagKind::Comment => {
                let content = inner.trim_end_matches("--").to_string();
                self.current().push(Node::Comment(content));
            }
            TagKind::Expression | TagKind::Unescaped => {
                let node = Node::Expression {
                    content: inner.to_string(),
                    escaped: tag.kind == TagKind::Expression,
                };
                self.current().push(node);
            }
            TagKind::Decorator => self.current().push(Node::Decorator(inner.to_string())),
            TagKind::Partial => {
                let (name, params) = self.partial_name(&tag)?;
                self.current().push(Node::Partial(Partial {
                    name,
                    params,
                }));
            }
            TagKind::OpenBlock | TagKind::OpenInverse => {
                let (helper, params) = split_head(inner);
                if helper.is_empty() {
                    return Err(self.error_at(tag.span.start, "block tag without a helper name"));
                }
                let kind = FrameKind::Block {
                    helper: helper.to_string(),
                    params: params.to_string(),
                    inverted: tag.kind == TagKind::OpenInverse,
                };
                self.stack.push(Frame::new(kind, tag.span.start));
            }
            TagKind::OpenPartialBlock => {
                let (name, params) = self.partial_name(&tag)?;
                let raw_name = match &name {
                    PartialName::Static {
                        span,
                        ..
                    } => span.slice(self.source).to_string(),
                    PartialName::Dynamic {
                        expression,
                        ..
                    } => expression.clone(),
                };
                let kind = FrameKind::PartialBlock {
                    name,
                    raw_name,
                    params,
                };
                self.stack.push(Frame::new(kind, tag.span.start));
            }
            TagKind::OpenDecoratorBlock => {
                let (decorator, params) = split_head(inner);
                let kind = FrameKind::DecoratorBlock {
                    decorator: decorator.to_string(),
                    params: params.to_string(),
                };
                self.stack.push(Frame::new(kind, tag.span.start));
            }
            TagKind::Else => {
                if self.stack.len() == 1 {
                    return Err(self.error_at(tag.span.start, "'else' outside of a block"));
                }
                let frame = self.current();
                if frame.inverse.is_none() {
                    frame.inverse = Some(Vec::new());
                }
            }
            TagKind::Close => self.close(&tag)?,
        }
        Ok(())
    }

    fn close(&mut self, tag: &Tag) -> Result<(), TemplateError> {
        let closing = tag.inner.slice(self.source);
        if self.stack.len() == 1 {
            return Err(self.error_at(tag.span.start, format!("unexpected closing tag '{closing}'")));
        }

        let frame = &self.stack[self.stack.len() - 1];
        let expected = frame.expected_close().unwrap_or_default();
        let matches = expected == closing
            || unquote(expected) == unquote(closing)
            || matches!(frame.kind, FrameKind::PartialBlock { name: PartialName::Dynamic { .. }, .. });
        if !matches {
            return Err(self.error_at(
                tag.span.start,
                format!("expected closing tag for '{expected}' but found '{closing}'"),
            ));
        }

        let Some(frame) = self.stack.pop() else {
            return Err(self.error_at(tag.span.start, "unexpected closing tag"));
        };
        let node = match frame.kind {
            FrameKind::Root => {
                return Err(self.error_at(tag.span.start, "unexpected closing tag"));
            }
            FrameKind::Block {
                helper,
                params,
                inverted,
            } => Node::Block(Box::new(Block {
                helper,
                params,
                inverted,
                body: frame.body,
                inverse: frame.inverse,
            })),
            FrameKind::PartialBlock {
                name,
                params,
                ..
            } => {
                let mut body = frame.body;
                if let Some(inverse) = frame.inverse {
                    body.extend(inverse);
                }
                Node::PartialBlock(Box::new(PartialBlock {
                    name,
                    params,
                    close_span: tag.inner,
                    body,
                }))
            }
            FrameKind::DecoratorBlock {
                decorator,
                params,
            } => Node::DecoratorBlock(Box::new(DecoratorBlock {
                decorator,
                params,
                body: frame.body,
            })),
        };
        self.current().push(node);
        Ok(())
    }

    /// Split the content of a partial tag into its name and remaining parameters.
    fn partial_name(&self, tag: &Tag) -> Result<(PartialName, String), TemplateError> {
        let Span {
            start,
            end,
        } = tag.inner;
        let bytes = self.source.as_bytes();
        if start >= end {
            return Err(self.error_at(tag.span.start, "partial tag without a name"));
        }

        let name_end = match bytes[start] {
            b'(' => {
                let mut depth = 0usize;
                let mut cursor = start;
                let mut closed = None;
                while cursor < end {
                    match bytes[cursor] {
                        b'(' => depth += 1,
                        b')' => {
                            depth -= 1;
                            if depth == 0 {
                                closed = Some(cursor + 1);
                                break;
                            }
                        }
                        _ => {}
                    }
                    cursor += 1;
                }
                let close = closed.ok_or_else(|| {
                    self.error_at(tag.span.start, "unbalanced parentheses in partial name")
                })?;
                let params = self.source[close..end].trim().to_string();
                let expression = self.source[start..close].to_string();
                return Ok((
                    PartialName::Dynamic {
                        expression,
                        span: Span::new(start, close),
                    },
                    params,
                ));
            }
            quote @ (b'"' | b'\'') => {
                let close = self.source[start + 1..end]
                    .find(quote as char)
                    .ok_or_else(|| self.error_at(tag.span.start, "unterminated partial name"))?;
                start + 1 + close + 1
            }
            b'[' => {
                let close = self.source[start + 1..end]
                    .find(']')
                    .ok_or_else(|| self.error_at(tag.span.start, "unterminated partial name"))?;
                start + 1 + close + 1
            }
            _ => (start..end).find(|&i| bytes[i].is_ascii_whitespace()).unwrap_or(end),
        };

        let span = Span::new(start, name_end);
        let name = unquote(span.slice(self.source)).to_string();
        if name.is_empty() {
            return Err(self.error_at(tag.span.start, "partial tag with an empty name"));
        }
        let params = self.source[name_end..end].trim().to_string();
        Ok((
            PartialName::Static {
                name,
                span,
            },
            params,
        ))
    }
}

fn split_head(inner: &str) -> (&str, &str) {
    match inner.find(|c: char| c.is_ascii_whitespace()) {
        Some(split) => (&inner[..split], inner[split..].trim()),
        None => (inner, ""),
    }
}
