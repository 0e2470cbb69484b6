//! Engine error types

use deferjs_dom::DomError;
use deferjs_html::HtmlError;
use thiserror::Error;

use crate::overrides::Override;

/// Engine result type
pub type DeferResult<T> = Result<T, DeferError>;

/// Failure raised by page script, reported by the script host
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScriptError {
    #[error("Uncaught {0}")]
    Uncaught(String),

    #[error("Cannot compile handler: {0}")]
    Compile(String),

    #[error("Unknown callback {0}")]
    UnknownCallback(u64),
}

/// Engine and host page errors
#[derive(Debug, Error)]
pub enum DeferError {
    #[error("Deferred execution engine already initialized")]
    AlreadyInitialized,

    #[error("Cannot override {}: property is not configurable", .0.name())]
    OverrideLocked(Override),

    #[error("Event loop exceeded {0} steps")]
    LoopLimit(usize),

    #[error("No insertion point for deferred content")]
    NoInsertionPoint,

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error(transparent)]
    Dom(#[from] DomError),

    #[error(transparent)]
    Html(#[from] HtmlError),

    #[error(transparent)]
    Script(#[from] ScriptError),
}
