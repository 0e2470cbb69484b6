//! Deferjs Network Layer
//!
//! Script sources are fetched synchronously from the engine's point of view:
//! the event loop asks a [`Fetch`] implementation for the body of a URL and
//! decides itself when the matching `load`/`error` event is delivered.

mod client;
mod error;
mod fetch;
mod response;

pub use client::{ClientConfig, HttpClient, HttpFetcher};
pub use error::{NetError, NetResult};
pub use fetch::{Fetch, FileFetcher, Loader, MemoryFetcher};
pub use response::Response;
