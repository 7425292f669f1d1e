//! Discovery of sub-template references in a syntax tree.
//!
//! A reference is the static name of a partial invocation. References are
//! classified by the namespace separator: plain names are *local* and resolve
//! only against partials registered in a scope, while names containing `:` are
//! *remote* (a compact `prefix:name` or a full identifier) and are fetched.

use std::collections::HashSet;

use crate::constants::{META_REFERENCE_MARKER, NAMESPACE_SEPARATOR};
use crate::templating::syntax::{Node, PartialName, walk};

/// References found in one template, in discovery order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReferenceScan {
    /// Distinct local partial names
    pub local: Vec<String>,
    /// Remote references as written; may contain duplicates
    pub remote: Vec<String>,
}

/// Whether a reference has to be fetched from the content service.
///
/// # Examples
///
/// ```
/// use tscope::templating::references::is_remote_reference;
///
/// assert!(!is_remote_reference("foo"));
/// assert!(is_remote_reference("prefix:foo"));
/// assert!(is_remote_reference("http://example.org/foo"));
/// ```
pub fn is_remote_reference(reference: &str) -> bool {
    reference.contains(NAMESPACE_SEPARATOR)
}

/// Whether a reference is handled by the runtime itself (`@partial-block`).
pub fn is_meta_reference(reference: &str) -> bool {
    reference.starts_with(META_REFERENCE_MARKER)
}

/// Names declared by `{{#*inline "name"}}` definitions anywhere in the tree.
pub fn inline_partial_names(ast: &[Node]) -> HashSet<String> {
    let mut names = HashSet::new();
    walk(ast, &mut |node| {
        if let Node::DecoratorBlock(block) = node {
            if let Some(name) = block.inline_name() {
                names.insert(name.to_string());
            }
        }
    });
    names
}

/// Static partial names that denote dependencies, in source order.
///
/// Dynamic names, meta references and names of inline partials defined in the
/// same tree are skipped.
pub fn collectible_names(ast: &[Node]) -> Vec<&str> {
    let inline = inline_partial_names(ast);
    let mut names = Vec::new();
    walk(ast, &mut |node| {
        let name = match node {
            Node::Partial(partial) => &partial.name,
            Node::PartialBlock(block) => &block.name,
            _ => return,
        };
        if let PartialName::Static {
            name,
            ..
        } = name
        {
            if !is_meta_reference(name) && !inline.contains(name.as_str()) {
                names.push(name.as_str());
            }
        }
    });
    names
}

/// Scan a syntax tree for local and remote references.
pub fn scan(ast: &[Node]) -> ReferenceScan {
    let mut result = ReferenceScan::default();
    let mut seen_local = HashSet::new();
    for name in collectible_names(ast) {
        if is_remote_reference(name) {
            result.remote.push(name.to_string());
        } else if seen_local.insert(name) {
            result.local.push(name.to_string());
        }
    }
    result
}
