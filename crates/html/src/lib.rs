//! Deferjs HTML Parser
//!
//! Tokenizer and tree construction for whole pages and for the fragments
//! produced by buffered `document.write` calls.

mod tokenizer;
mod tree_builder;
mod error;
mod entities;

pub use tokenizer::{Attributes, Token, Tokenizer};
pub use tree_builder::{parse_fragment, HtmlParser};
pub use error::{HtmlError, HtmlResult};
