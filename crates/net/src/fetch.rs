//! Resource loading abstraction

use std::path::PathBuf;

use log::debug;
use rustc_hash::FxHashMap;
use url::Url;

use crate::client::HttpFetcher;
use crate::error::{NetError, NetResult};

/// Source of script bodies
pub trait Fetch {
    /// Fetch the text behind `url`
    fn fetch(&mut self, url: &Url) -> NetResult<String>;
}

/// In-memory resources keyed by absolute URL
#[derive(Debug, Default, Clone)]
pub struct MemoryFetcher {
    resources: FxHashMap<String, String>,
}

impl MemoryFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the body served for `url`
    pub fn insert(&mut self, url: impl Into<String>, body: impl Into<String>) {
        self.resources.insert(url.into(), body.into());
    }

    pub fn with(mut self, url: impl Into<String>, body: impl Into<String>) -> Self {
        self.insert(url, body);
        self
    }
}

impl Fetch for MemoryFetcher {
    fn fetch(&mut self, url: &Url) -> NetResult<String> {
        self.resources
            .get(url.as_str())
            .cloned()
            .ok_or_else(|| NetError::NotFound(url.to_string()))
    }
}

/// `file:` URLs read from disk
#[derive(Debug, Default, Clone, Copy)]
pub struct FileFetcher;

impl Fetch for FileFetcher {
    fn fetch(&mut self, url: &Url) -> NetResult<String> {
        let path: PathBuf = url
            .to_file_path()
            .map_err(|_| NetError::InvalidUrl(url.to_string()))?;
        Ok(std::fs::read_to_string(path)?)
    }
}

/// Scheme-dispatching loader with an in-memory overlay and a response cache
pub struct Loader {
    overlay: MemoryFetcher,
    files: FileFetcher,
    http: Option<HttpFetcher>,
    cache: FxHashMap<String, String>,
}

impl Loader {
    /// A loader that serves the overlay and `file:` URLs only
    pub fn offline() -> Self {
        Self {
            overlay: MemoryFetcher::new(),
            files: FileFetcher,
            http: None,
            cache: FxHashMap::default(),
        }
    }

    /// A loader that also goes to the network for `http(s):` URLs
    pub fn new() -> NetResult<Self> {
        let mut loader = Self::offline();
        loader.http = Some(HttpFetcher::new()?);
        Ok(loader)
    }

    /// Serve `body` for `url` without touching disk or network
    pub fn preload(&mut self, url: impl Into<String>, body: impl Into<String>) {
        self.overlay.insert(url, body);
    }

    /// Resolve a relative URL against a base URL
    pub fn resolve_url(base: &Url, relative: &str) -> NetResult<Url> {
        base.join(relative).map_err(|e| e.into())
    }

    /// Clear the cache
    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }
}

impl Fetch for Loader {
    fn fetch(&mut self, url: &Url) -> NetResult<String> {
        let key = url.to_string();
        if let Some(body) = self.cache.get(&key) {
            debug!("Cache hit: {}", url);
            return Ok(body.clone());
        }

        let body = match self.overlay.fetch(url) {
            Ok(body) => body,
            Err(NetError::NotFound(_)) => match url.scheme() {
                "file" => self.files.fetch(url)?,
                "http" | "https" => match self.http.as_mut() {
                    Some(http) => http.fetch(url)?,
                    None => return Err(NetError::NotFound(key)),
                },
                other => return Err(NetError::UnsupportedScheme(other.to_string())),
            },
            Err(err) => return Err(err),
        };

        self.cache.insert(key, body.clone());
        Ok(body)
    }
}
