//! Deferjs DOM - Document Object Model
//!
//! Arena-backed DOM tree the deferral engine reads and rewrites while it
//! replays a page's scripts.

mod node;
mod tree;
mod error;
mod query;

pub use node::{Attribute, ElementData, Node, NodeId, NodeType};
pub use tree::DomTree;
pub use error::{DomError, DomResult};
pub use query::Queryable;
