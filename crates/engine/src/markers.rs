//! Attribute, type and global names shared with rewritten pages.
//!
//! The build step that rewrites pages emits these literal values, so they
//! must not change.

/// Non-executing type given to deferred scripts
pub const SCRIPT_TYPE: &str = "text/frzjs";

/// Set on nodes that execution has not reached yet
pub const NOT_PROCESSED: &str = "frz_not_processed";

/// Marks the node new content is inserted before
pub const CURRENT_NODE: &str = "frz_current_node";

/// A deferred script's original `type`
pub const ORIG_TYPE: &str = "frz_orig_type";

/// A deferred script's original `src`
pub const ORIG_SRC: &str = "frz_orig_src";

/// A deferred script's original queue position
pub const ORIG_INDEX: &str = "orig_index";

/// Handler body replayed at the synthetic `load`
pub const ONLOAD: &str = "data-frz-onload";

/// Set by the rewritten native `onload` once the element has loaded
pub const LOADED: &str = "data-frz-loaded";

/// Global counter that postpones the start of deferred execution
pub const PREVENT_START_GLOBAL: &str = "preventDeferJSStart";

/// Fallback insertion point appended to `<body>`
pub const CONTEXT_NODE: &str = "psanode";

/// Attribute carried by the fallback insertion point
pub const CONTEXT_NODE_ATTR: &str = "psa_dw_target";
