//! Global constants used throughout the tscope codebase.
//!
//! This module contains the reserved template-language markers, default names
//! and timeouts that are shared across modules. Defining them centrally keeps
//! the escaping rewriter, the syntax parser and the runtime lowering in
//! agreement about the exact marker text.

use std::time::Duration;

/// Opening marker of a raw block.
///
/// Content between [`RAW_BLOCK_START`] and [`RAW_BLOCK_END`] is never expanded by
/// the compile pass that sees it; one marker layer is stripped per compile.
pub const RAW_BLOCK_START: &str = "{{{{raw}}}}";

/// Closing marker of a raw block.
pub const RAW_BLOCK_END: &str = "{{{{/raw}}}}";

/// Prefix of references that denote structural/meta partials (e.g. `@partial-block`).
///
/// Such references are handled by the runtime itself and never collected as
/// dependencies.
pub const META_REFERENCE_MARKER: char = '@';

/// Separator that marks a reference as remote (`prefix:name` or a full IRI).
pub const NAMESPACE_SEPARATOR: char = ':';

/// Default tag name of nested local-template definitions in markup.
pub const DEFAULT_LOCAL_TEMPLATE_TAG: &str = "template";

/// Name of the internal helper that emits lowered raw-block content verbatim.
pub const RAW_LITERAL_HELPER: &str = "__tscope_raw";

/// Prefix of runtime aliases generated for partial names the runtime cannot parse.
pub const PARTIAL_ALIAS_PREFIX: &str = "tpl_";

/// Prefix of registry names under which compiled root templates are stored.
pub const COMPILED_TEMPLATE_PREFIX: &str = "__tscope_compiled_";

/// Number of hex characters of the SHA-256 digest kept in generated names.
pub const NAME_HASH_LENGTH: usize = 16;

/// Default config file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "tscope.toml";

/// Path of the template source endpoint on an HTTP content service.
pub const TEMPLATE_SOURCE_ENDPOINT: &str = "rest/template/source";

/// Default timeout for HTTP content-service requests (30 seconds).
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum Levenshtein distance for "did you mean" partial suggestions.
pub const MAX_SUGGESTION_DISTANCE: usize = 3;
