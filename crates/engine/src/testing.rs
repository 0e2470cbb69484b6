//! Fixtures shared by the engine tests.

use std::cell::RefCell;
use std::rc::Rc;

use deferjs_net::MemoryFetcher;
use url::Url;

use crate::classify::defer_document;
use crate::events::CallbackId;
use crate::host::RustHost;
use crate::markers;
use crate::window::Window;

pub const BASE_URL: &str = "http://site.test/index.html";

/// Parse `html` as if served from [`BASE_URL`]
pub fn page(html: &str, fetcher: MemoryFetcher) -> Window {
    let base = Url::parse(BASE_URL).unwrap();
    Window::parse(html, base, Box::new(fetcher)).unwrap()
}

/// Parse `html` with its scripts rewritten to the deferred type, the way
/// the page rewriter serves them
pub fn deferred_page(html: &str, fetcher: MemoryFetcher) -> Window {
    let window = page(html, fetcher);
    {
        let mut dom = window.dom_mut();
        defer_document(&mut dom, markers::SCRIPT_TYPE, markers::NOT_PROCESSED).unwrap();
    }
    window
}

/// Ordered record of what page scripts observed
#[derive(Clone, Default)]
pub struct Recorder {
    entries: Rc<RefCell<Vec<String>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, entry: &str) {
        self.entries.borrow_mut().push(entry.to_string());
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.borrow().clone()
    }

    /// A host where the script `log('x')` records `x` for every label
    pub fn host(&self, labels: &[&str]) -> RustHost {
        let mut host = RustHost::new();
        for label in labels {
            self.define_log(&mut host, label);
        }
        host
    }

    pub fn define_log(&self, host: &mut RustHost, label: &str) {
        let rec = self.clone();
        let entry = label.to_string();
        host.define_script(&format!("log('{}')", label), move |_, _| {
            rec.push(&entry);
            Ok(())
        });
    }

    /// A listener that records `label` each time it is called
    pub fn callback(&self, host: &mut RustHost, label: &str) -> CallbackId {
        let rec = self.clone();
        let entry = label.to_string();
        host.callback(move |_, _, _, _| {
            rec.push(&entry);
            Ok(())
        })
    }
}
