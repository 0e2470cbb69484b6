//! Deferjs Engine
//!
//! Deferred JavaScript execution: scripts a page was served with are
//! rewritten to a non-executing type, then replayed in document order after
//! parsing while the page is kept under the impression it is still loading.
//!
//! [`Window`] models the host page (DOM, listeners, event loop, script
//! loading); [`DeferJs`] is the engine installed on it. Script evaluation is
//! delegated to a [`ScriptHost`].

mod classify;
mod config;
mod defer;
mod dynamic;
mod error;
mod event_loop;
mod events;
mod host;
pub mod markers;
mod overrides;
mod queue;
mod window;

#[cfg(test)]
mod testing;

pub use classify::{
    defer_document, deferred_scripts, describe, discover_scripts, is_js_element, is_js_node, mark_deferred,
    ScriptPayload,
};
pub use config::{Capabilities, DeferConfig, LoadOptions, DEFAULT_MAX_STEPS, DEFAULT_START_POLL_MS};
pub use defer::{DeferJs, ExecutionState, Task};
pub use dynamic::{DynamicScriptSet, LivenessRule};
pub use error::{DeferError, DeferResult, ScriptError};
pub use events::{CallbackId, Event, EventPhase, EventTarget};
pub use host::{RustHost, ScriptHost, ScriptSource};
pub use overrides::Override;
pub use queue::TaskQueue;
pub use window::{ReadyState, Registrar, Window};
