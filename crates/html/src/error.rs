//! HTML parsing error types

use deferjs_dom::DomError;
use thiserror::Error;

/// HTML parsing result type
pub type HtmlResult<T> = Result<T, HtmlError>;

/// HTML parsing errors
#[derive(Debug, Error)]
pub enum HtmlError {
    #[error("Tree construction failed: {0}")]
    Tree(#[from] DomError),

    #[error("Fragment container {0} does not exist")]
    MissingContainer(u32),
}
