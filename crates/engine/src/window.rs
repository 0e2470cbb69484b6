//! The host page: DOM, native listeners, ready state, event loop and the
//! override table the engine hooks into.
//!
//! Every script-visible primitive is a method on [`Window`]. Each one checks
//! the override table first and routes to the engine when its override is
//! installed, otherwise it behaves like an unpatched browser document.
//!
//! No `RefCell` borrow is ever held across a call into the [`ScriptHost`]:
//! page scripts call straight back into these methods.

use std::cell::{OnceCell, Ref, RefCell, RefMut};
use std::rc::Rc;

use deferjs_dom::{DomTree, NodeId, Queryable};
use deferjs_html::{parse_fragment, HtmlParser};
use deferjs_net::Fetch;
use log::{debug, info, warn};
use rustc_hash::{FxHashMap, FxHashSet};
use url::Url;

use crate::classify::{is_js_element, is_js_node};
use crate::config::LoadOptions;
use crate::defer::DeferJs;
use crate::error::{DeferError, DeferResult, ScriptError};
use crate::event_loop::{EventLoop, PendingFetch, PendingTimer, TimerAction};
use crate::events::{CallbackId, EngineHook, Event, EventTarget, Listener};
use crate::host::{ScriptHost, ScriptSource};
use crate::overrides::{Override, OverrideTable};

/// `document.readyState`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ReadyState {
    Loading,
    Interactive,
    Complete,
}

impl ReadyState {
    pub fn as_str(self) -> &'static str {
        match self {
            ReadyState::Loading => "loading",
            ReadyState::Interactive => "interactive",
            ReadyState::Complete => "complete",
        }
    }
}

/// Native listener registration function
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registrar {
    /// `addEventListener("load", ...)`
    AddEventListener,
    /// `attachEvent("onload", ...)`
    AttachEvent,
}

struct NativeState {
    ready_state: ReadyState,
    listeners: Vec<(EventTarget, String, Listener)>,
    handlers: FxHashMap<(EventTarget, String), CallbackId>,
    /// Scripts that have been run or fetched ("already started")
    started: FxHashSet<NodeId>,
    event_loop: EventLoop,
    requests: Vec<String>,
    failed_requests: Vec<String>,
    errors: Vec<String>,
    /// Where a parse-time `document.write` inserts
    insertion_point: Option<NodeId>,
    parsing: bool,
    load_fired: bool,
}

impl NativeState {
    fn new() -> Self {
        Self {
            ready_state: ReadyState::Loading,
            listeners: Vec::new(),
            handlers: FxHashMap::default(),
            started: FxHashSet::default(),
            event_loop: EventLoop::new(),
            requests: Vec::new(),
            failed_requests: Vec::new(),
            errors: Vec::new(),
            insertion_point: None,
            parsing: false,
            load_fired: false,
        }
    }
}

struct WindowInner {
    dom: RefCell<DomTree>,
    native: RefCell<NativeState>,
    fetcher: RefCell<Box<dyn Fetch>>,
    overrides: RefCell<OverrideTable>,
    base_url: Url,
    defer: OnceCell<DeferJs>,
}

/// Handle to a loaded page. Clones share the same page.
#[derive(Clone)]
pub struct Window {
    inner: Rc<WindowInner>,
}

impl Window {
    /// Wrap an already built tree
    pub fn new(dom: DomTree, base_url: Url, fetcher: Box<dyn Fetch>) -> Self {
        Self {
            inner: Rc::new(WindowInner {
                dom: RefCell::new(dom),
                native: RefCell::new(NativeState::new()),
                fetcher: RefCell::new(fetcher),
                overrides: RefCell::new(OverrideTable::new()),
                base_url,
                defer: OnceCell::new(),
            }),
        }
    }

    /// Parse a page without running anything yet
    pub fn parse(html: &str, base_url: Url, fetcher: Box<dyn Fetch>) -> DeferResult<Self> {
        let dom = HtmlParser::new().parse(html)?;
        Ok(Self::new(dom, base_url, fetcher))
    }

    /// Load the page: run parser-blocking scripts, install the engine if
    /// asked to, fire `DOMContentLoaded`, then run the event loop until
    /// nothing is left to do.
    pub fn load(&self, host: &mut dyn ScriptHost, options: &LoadOptions) -> DeferResult<()> {
        info!("Loading {}", self.inner.base_url);
        self.init_body_onload(host);
        self.run_parser(host);
        if let Some(config) = &options.defer {
            DeferJs::install(self, config.clone())?;
        }
        self.finish_parsing(host);
        self.run_until_idle(host, options.max_steps)
    }

    /// Drain fetches, fire the window `load` once they are done, then run
    /// timers in due order
    pub fn run_until_idle(&self, host: &mut dyn ScriptHost, max_steps: usize) -> DeferResult<()> {
        let mut steps = 0;
        loop {
            steps += 1;
            if steps > max_steps {
                return Err(DeferError::LoopLimit(max_steps));
            }

            let fetch = self.native_mut().event_loop.next_fetch();
            if let Some(fetch) = fetch {
                self.complete_fetch(host, fetch);
                continue;
            }

            let should_load = {
                let native = self.native();
                !native.load_fired && native.ready_state == ReadyState::Interactive
            };
            if should_load {
                self.fire_load(host);
                continue;
            }

            let timer = self.native_mut().event_loop.next_timer();
            if let Some(timer) = timer {
                self.run_timer(host, timer);
                continue;
            }

            debug!("Event loop idle after {} steps", steps);
            return Ok(());
        }
    }

    fn init_body_onload(&self, host: &mut dyn ScriptHost) {
        let body = {
            let dom = self.dom();
            dom.body()
                .and_then(|b| dom.attribute(b, "onload"))
                .map(String::from)
        };
        if let Some(body) = body {
            match host.compile_handler(self, &body) {
                Ok(handler) => self.set_handler(EventTarget::Window, "load", Some(handler)),
                Err(err) => self.report_error(&err),
            }
        }
    }

    fn run_parser(&self, host: &mut dyn ScriptHost) {
        self.native_mut().parsing = true;
        loop {
            let next = {
                let dom = self.dom();
                let native = self.native();
                dom.elements_where(is_js_element)
                    .into_iter()
                    .find(|id| !native.started.contains(id))
            };
            let Some(script) = next else {
                break;
            };
            {
                let mut native = self.native_mut();
                native.insertion_point = Some(script);
                native.started.insert(script);
            }
            self.run_parser_script(host, script);
        }
        let mut native = self.native_mut();
        native.parsing = false;
        native.insertion_point = None;
    }

    /// Parser-blocking execution: external sources are fetched on the spot
    fn run_parser_script(&self, host: &mut dyn ScriptHost, script: NodeId) {
        let src = self.script_src(script);
        let Some(src) = src else {
            let code = self.dom().text_content(script);
            if !code.trim().is_empty() {
                let _ = self.evaluate(host, &code, None, Some(script));
            }
            return;
        };

        let url = match self.resolve_url(&src) {
            Ok(url) => url,
            Err(err) => {
                warn!("Bad script URL {:?}: {}", src, err);
                self.dispatch_event(host, EventTarget::Element(script), "error");
                return;
            }
        };
        self.native_mut().requests.push(url.to_string());
        let result = self.inner.fetcher.borrow_mut().fetch(&url);
        match result {
            Ok(code) => {
                let _ = self.evaluate(host, &code, Some(url.as_str()), Some(script));
                self.dispatch_event(host, EventTarget::Element(script), "load");
            }
            Err(err) => {
                warn!("Failed to load {}: {}", url, err);
                self.native_mut().failed_requests.push(url.to_string());
                self.dispatch_event(host, EventTarget::Element(script), "error");
            }
        }
    }

    fn finish_parsing(&self, host: &mut dyn ScriptHost) {
        self.native_mut().ready_state = ReadyState::Interactive;
        self.dispatch_event(host, EventTarget::Document, "readystatechange");
        self.dispatch_event(host, EventTarget::Document, "DOMContentLoaded");
    }

    fn fire_load(&self, host: &mut dyn ScriptHost) {
        self.native_mut().load_fired = true;
        let loadables = self.dom().elements_where(|e| {
            matches!(e.tag_name.as_str(), "img" | "iframe") && e.has_attribute("onload")
        });
        for element in loadables {
            self.dispatch_event(host, EventTarget::Element(element), "load");
        }
        self.native_mut().ready_state = ReadyState::Complete;
        self.dispatch_event(host, EventTarget::Document, "readystatechange");
        self.dispatch_event(host, EventTarget::Window, "load");
    }

    fn complete_fetch(&self, host: &mut dyn ScriptHost, fetch: PendingFetch) {
        let PendingFetch { element, url } = fetch;
        let result = self.inner.fetcher.borrow_mut().fetch(&url);
        match result {
            Ok(code) => {
                debug!("Executing {}", url);
                let _ = self.evaluate(host, &code, Some(url.as_str()), Some(element));
                self.dispatch_event(host, EventTarget::Element(element), "load");
            }
            Err(err) => {
                warn!("Failed to load {}: {}", url, err);
                self.native_mut().failed_requests.push(url.to_string());
                self.dispatch_event(host, EventTarget::Element(element), "error");
            }
        }
    }

    fn run_timer(&self, host: &mut dyn ScriptHost, timer: PendingTimer) {
        debug!("[timer] run id={} due_at={}", timer.id, timer.due_at);
        match timer.action {
            TimerAction::Callback(callback) => {
                self.invoke(host, callback, EventTarget::Window, None);
            }
            TimerAction::Engine(hook) => self.run_engine_hook(host, hook),
        }
    }

    fn run_engine_hook(&self, host: &mut dyn ScriptHost, hook: EngineHook) {
        if let Some(defer) = self.defer() {
            defer.handle_hook(self, host, hook);
        }
    }

    // ---- events -------------------------------------------------------

    /// Dispatch a native event at `target`: listeners in registration
    /// order, then the `on<type>` handler
    pub fn dispatch_event(&self, host: &mut dyn ScriptHost, target: EventTarget, event_type: &str) {
        let event = Event::native(event_type, target, self.now_ms());
        self.dispatch(host, &event);
    }

    fn dispatch(&self, host: &mut dyn ScriptHost, event: &Event) {
        let target = event.current_target;
        let listeners: Vec<Listener> = self
            .native()
            .listeners
            .iter()
            .filter(|(t, ty, _)| *t == target && *ty == event.event_type)
            .map(|(_, _, listener)| *listener)
            .collect();
        for listener in listeners {
            match listener {
                Listener::Script(callback) => self.invoke(host, callback, target, Some(event)),
                Listener::Engine(hook) => self.run_engine_hook(host, hook),
            }
        }
        if let Some(handler) = self.property_handler(host, target, &event.event_type) {
            self.invoke(host, handler, target, Some(event));
        }
    }

    /// The `on<type>` handler, compiling an element's attribute on first use
    fn property_handler(
        &self,
        host: &mut dyn ScriptHost,
        target: EventTarget,
        event_type: &str,
    ) -> Option<CallbackId> {
        let key = (target, event_type.to_string());
        let existing = self.native().handlers.get(&key).copied();
        if existing.is_some() {
            return existing;
        }
        let EventTarget::Element(element) = target else {
            return None;
        };
        let body = self
            .dom()
            .attribute(element, &format!("on{}", event_type))
            .map(String::from)?;
        match host.compile_handler(self, &body) {
            Ok(handler) => {
                self.native_mut().handlers.insert(key, handler);
                Some(handler)
            }
            Err(err) => {
                self.report_error(&err);
                None
            }
        }
    }

    /// `target.addEventListener(type, callback)`
    pub fn add_event_listener(&self, target: EventTarget, event_type: &str, callback: CallbackId) {
        self.register_listener(Registrar::AddEventListener, Override::AddEventListener, target, event_type, callback);
    }

    /// `target.attachEvent("on" + type, callback)`
    pub fn attach_event(&self, target: EventTarget, event_name: &str, callback: CallbackId) {
        self.register_listener(Registrar::AttachEvent, Override::AttachEvent, target, event_name, callback);
    }

    fn register_listener(
        &self,
        registrar: Registrar,
        o: Override,
        target: EventTarget,
        event_name: &str,
        callback: CallbackId,
    ) {
        // Only the window and document registrations are patched.
        if !matches!(target, EventTarget::Element(_)) {
            if let Some(defer) = self.intercepted(o) {
                defer.add_event_listener(self, target, event_name, callback, Some(registrar));
                return;
            }
        }
        self.native_register(registrar, target, event_name, callback);
    }

    pub(crate) fn native_register(
        &self,
        registrar: Registrar,
        target: EventTarget,
        event_name: &str,
        callback: CallbackId,
    ) {
        let event_type = match registrar {
            Registrar::AddEventListener => event_name,
            Registrar::AttachEvent => event_name.strip_prefix("on").unwrap_or(event_name),
        };
        self.native_mut()
            .listeners
            .push((target, event_type.to_string(), Listener::Script(callback)));
    }

    pub(crate) fn add_engine_listener(&self, target: EventTarget, event_type: &str, hook: EngineHook) {
        self.native_mut()
            .listeners
            .push((target, event_type.to_string(), Listener::Engine(hook)));
    }

    /// Set or clear `target.on<type>`
    pub fn set_handler(&self, target: EventTarget, event_type: &str, handler: Option<CallbackId>) {
        let key = (target, event_type.to_string());
        let mut native = self.native_mut();
        match handler {
            Some(handler) => {
                native.handlers.insert(key, handler);
            }
            None => {
                native.handlers.remove(&key);
            }
        }
    }

    /// Read `target.on<type>`
    pub fn handler(&self, target: EventTarget, event_type: &str) -> Option<CallbackId> {
        self.native()
            .handlers
            .get(&(target, event_type.to_string()))
            .copied()
    }

    pub(crate) fn take_handler(&self, target: EventTarget, event_type: &str) -> Option<CallbackId> {
        self.native_mut()
            .handlers
            .remove(&(target, event_type.to_string()))
    }

    /// `setTimeout(callback, delay)`
    pub fn set_timeout(&self, callback: CallbackId, delay_ms: u64) -> u64 {
        self.native_mut()
            .event_loop
            .set_timeout(delay_ms, TimerAction::Callback(callback))
    }

    pub fn clear_timeout(&self, id: u64) -> bool {
        self.native_mut().event_loop.clear_timeout(id)
    }

    pub(crate) fn set_engine_timer(&self, delay_ms: u64, hook: EngineHook) {
        self.native_mut()
            .event_loop
            .set_timeout(delay_ms, TimerAction::Engine(hook));
    }

    pub(crate) fn invoke(
        &self,
        host: &mut dyn ScriptHost,
        callback: CallbackId,
        this: EventTarget,
        event: Option<&Event>,
    ) {
        if let Err(err) = host.invoke(self, callback, this, event) {
            self.report_error(&err);
        }
    }

    // ---- document primitives -------------------------------------------

    /// `document.write(html)`
    pub fn write(&self, host: &mut dyn ScriptHost, html: &str) -> DeferResult<()> {
        match self.intercepted(Override::Write) {
            Some(defer) => defer.write_html(self, host, html),
            None => self.native_write(host, html),
        }
    }

    /// `document.writeln(html)`
    pub fn writeln(&self, host: &mut dyn ScriptHost, html: &str) -> DeferResult<()> {
        let line = format!("{}\n", html);
        match self.intercepted(Override::Writeln) {
            Some(defer) => defer.write_html(self, host, &line),
            None => self.native_write(host, &line),
        }
    }

    /// `document.open()`
    pub fn open(&self) {
        if let Some(defer) = self.intercepted(Override::Open) {
            if defer.override_active() {
                return;
            }
        }
        debug!("document.open has no effect on a loaded page model");
    }

    /// `document.close()`
    pub fn close(&self) {
        if let Some(defer) = self.intercepted(Override::Close) {
            if defer.override_active() {
                return;
            }
        }
        debug!("document.close has no effect on a loaded page model");
    }

    /// While parsing, written markup lands right after the running parser
    /// script and is executed by the parser next. Afterwards it is appended
    /// to `<body>` and its scripts run as they are inserted.
    pub(crate) fn native_write(&self, host: &mut dyn ScriptHost, html: &str) -> DeferResult<()> {
        let (parsing, point) = {
            let native = self.native();
            (native.parsing, native.insertion_point)
        };

        if parsing {
            if let Some(point) = point {
                let mut dom = self.dom_mut();
                let container = parse_fragment(&mut dom, html)?;
                let parent = dom.parent(point).ok_or(DeferError::NoInsertionPoint)?;
                let reference = dom.next_sibling(point);
                let mut last = None;
                for child in dom.children(container) {
                    dom.insert_before(parent, child, reference)?;
                    last = Some(child);
                }
                drop(dom);
                if let Some(last) = last {
                    self.native_mut().insertion_point = Some(last);
                }
                return Ok(());
            }
        }

        let (children, parent) = {
            let mut dom = self.dom_mut();
            let container = parse_fragment(&mut dom, html)?;
            let parent = dom
                .body()
                .or_else(|| dom.document_element())
                .ok_or(DeferError::NoInsertionPoint)?;
            (dom.children(container), parent)
        };
        for child in children {
            self.native_insert_before(host, parent, child, None)?;
        }
        Ok(())
    }

    /// `document.getElementById(id)`
    pub fn get_element_by_id(&self, id: &str) -> Option<NodeId> {
        match self.intercepted(Override::GetElementById) {
            Some(defer) => defer.get_element_by_id(self, id),
            None => {
                let node = self.dom().get_element_by_id(id)?;
                match self.parsed_nodes() {
                    Some(parsed) if !parsed.contains(&node) => None,
                    _ => Some(node),
                }
            }
        }
    }

    /// `document.getElementsByTagName(tag)`
    pub fn get_elements_by_tag_name(&self, tag_name: &str) -> Vec<NodeId> {
        match self.intercepted(Override::GetElementsByTagName) {
            Some(defer) => defer.get_elements_by_tag_name(self, tag_name),
            None => {
                let found = self.dom().get_elements_by_tag_name(tag_name);
                match self.parsed_nodes() {
                    Some(parsed) => found.into_iter().filter(|n| parsed.contains(n)).collect(),
                    None => found,
                }
            }
        }
    }

    /// While the parser is running, the nodes it has reached: everything up
    /// to the end of the insertion point's subtree in document order.
    /// `None` once parsing is over.
    fn parsed_nodes(&self) -> Option<FxHashSet<NodeId>> {
        let point = {
            let native = self.native();
            if !native.parsing {
                return None;
            }
            native.insertion_point?
        };
        let dom = self.dom();
        let end = dom.descendants(point).last().copied().unwrap_or(point);
        let order = dom.descendants(dom.document_id());
        let cut = order.iter().position(|&n| n == end)?;
        Some(order[..=cut].iter().copied().collect())
    }

    /// `document.createElement(tag)`
    pub fn create_element(&self, tag_name: &str) -> NodeId {
        let element = self.dom_mut().create_element(tag_name);
        if let Some(defer) = self.intercepted(Override::CreateElement) {
            defer.on_create_element(self, element, tag_name);
        }
        element
    }

    /// `document.createTextNode(text)`
    pub fn create_text_node(&self, text: &str) -> NodeId {
        self.dom_mut().create_text(text)
    }

    /// `parent.insertBefore(node, reference)`
    pub fn insert_before(
        &self,
        host: &mut dyn ScriptHost,
        parent: NodeId,
        node: NodeId,
        reference: Option<NodeId>,
    ) -> DeferResult<()> {
        self.insert_with(Override::InsertBefore, host, parent, node, reference)
    }

    /// `parent.appendChild(node)`
    pub fn append_child(&self, host: &mut dyn ScriptHost, parent: NodeId, node: NodeId) -> DeferResult<()> {
        self.insert_with(Override::AppendChild, host, parent, node, None)
    }

    fn insert_with(
        &self,
        o: Override,
        host: &mut dyn ScriptHost,
        parent: NodeId,
        node: NodeId,
        reference: Option<NodeId>,
    ) -> DeferResult<()> {
        if let Some(defer) = self.intercepted(o) {
            if defer.intercept_insertion(self, parent, node, reference) {
                return Ok(());
            }
        }
        self.native_insert_before(host, parent, node, reference)
    }

    /// Insert and prepare every script that became connected
    pub(crate) fn native_insert_before(
        &self,
        host: &mut dyn ScriptHost,
        parent: NodeId,
        node: NodeId,
        reference: Option<NodeId>,
    ) -> DeferResult<()> {
        let scripts: Vec<NodeId> = {
            let mut dom = self.dom_mut();
            dom.insert_before(parent, node, reference)?;
            if dom.is_connected(node) {
                std::iter::once(node)
                    .chain(dom.descendants(node))
                    .filter(|&id| is_js_node(&dom, id))
                    .collect()
            } else {
                Vec::new()
            }
        };
        for script in scripts {
            self.prepare_script(host, script);
        }
        Ok(())
    }

    /// `parent.removeChild(child)`
    pub fn remove_child(&self, parent: NodeId, child: NodeId) -> DeferResult<()> {
        self.dom_mut().remove_child(parent, child)?;
        Ok(())
    }

    /// Run a newly connected script the way a browser does for inserted
    /// scripts: inline code at once, sources asynchronously.
    fn prepare_script(&self, host: &mut dyn ScriptHost, script: NodeId) {
        if self.native().started.contains(&script) {
            return;
        }
        let src = self.script_src(script);
        match src {
            Some(src) => {
                let url = self.resolve_url(&src);
                let mut native = self.native_mut();
                native.started.insert(script);
                match url {
                    Ok(url) => {
                        native.requests.push(url.to_string());
                        native.event_loop.queue_fetch(script, url);
                    }
                    Err(err) => warn!("Bad script URL {:?}: {}", src, err),
                }
            }
            None => {
                let _ = self.run_inline_script(host, script);
            }
        }
    }

    /// Evaluate an inline script element's text now. Empty scripts are
    /// left unstarted.
    pub(crate) fn run_inline_script(&self, host: &mut dyn ScriptHost, script: NodeId) -> Result<(), ScriptError> {
        let code = self.dom().text_content(script);
        if code.trim().is_empty() {
            return Ok(());
        }
        self.native_mut().started.insert(script);
        self.evaluate(host, &code, None, Some(script))
    }

    fn evaluate(
        &self,
        host: &mut dyn ScriptHost,
        code: &str,
        url: Option<&str>,
        element: Option<NodeId>,
    ) -> Result<(), ScriptError> {
        let source = ScriptSource { code, url, element };
        let result = host.evaluate(self, &source);
        if let Err(err) = &result {
            self.report_error(err);
        }
        result
    }

    /// Record an uncaught script error
    pub(crate) fn report_error(&self, err: &ScriptError) {
        warn!("Uncaught script error: {}", err);
        self.native_mut().errors.push(err.to_string());
    }

    fn script_src(&self, script: NodeId) -> Option<String> {
        self.dom()
            .attribute(script, "src")
            .filter(|s| !s.is_empty())
            .map(String::from)
    }

    /// `document.readyState`
    pub fn ready_state(&self) -> &'static str {
        match self.intercepted(Override::ReadyState) {
            Some(defer) => defer.shadow_ready_state(),
            None => self.native_ready_state().as_str(),
        }
    }

    /// The unshadowed ready state
    pub fn native_ready_state(&self) -> ReadyState {
        self.native().ready_state
    }

    /// Whether `document.all` currently reads as undefined
    pub fn document_all_hidden(&self) -> bool {
        self.intercepted(Override::DocumentAll).is_some()
    }

    /// `document.documentElement.doScroll()`
    pub fn do_scroll(&self) -> Result<(), ScriptError> {
        if self.intercepted(Override::DoScroll).is_some() {
            return Err(ScriptError::Uncaught("psa exception".to_string()));
        }
        Ok(())
    }

    // ---- element helpers (never overridden) -----------------------------

    pub fn attribute(&self, node: NodeId, name: &str) -> Option<String> {
        self.dom().attribute(node, name).map(String::from)
    }

    pub fn set_attribute(&self, node: NodeId, name: &str, value: &str) -> DeferResult<()> {
        self.dom_mut().set_attribute(node, name, value)?;
        Ok(())
    }

    pub fn remove_attribute(&self, node: NodeId, name: &str) {
        self.dom_mut().remove_attribute(node, name);
    }

    pub fn text_content(&self, node: NodeId) -> String {
        self.dom().text_content(node)
    }

    pub fn set_text(&self, node: NodeId, text: &str) -> DeferResult<()> {
        self.dom_mut().set_text_content(node, text)?;
        Ok(())
    }

    pub fn parent_node(&self, node: NodeId) -> Option<NodeId> {
        self.dom().parent(node)
    }

    pub fn body(&self) -> Option<NodeId> {
        self.dom().body()
    }

    // ---- state access ----------------------------------------------------

    pub fn dom(&self) -> Ref<'_, DomTree> {
        self.inner.dom.borrow()
    }

    pub fn dom_mut(&self) -> RefMut<'_, DomTree> {
        self.inner.dom.borrow_mut()
    }

    fn native(&self) -> Ref<'_, NativeState> {
        self.inner.native.borrow()
    }

    fn native_mut(&self) -> RefMut<'_, NativeState> {
        self.inner.native.borrow_mut()
    }

    pub fn base_url(&self) -> &Url {
        &self.inner.base_url
    }

    pub fn resolve_url(&self, src: &str) -> DeferResult<Url> {
        Ok(self.inner.base_url.join(src)?)
    }

    /// Virtual clock, milliseconds
    pub fn now_ms(&self) -> u64 {
        self.native().event_loop.now_ms()
    }

    /// Uncaught script errors, in order
    pub fn errors(&self) -> Vec<String> {
        self.native().errors.clone()
    }

    /// Every script URL requested
    pub fn requests(&self) -> Vec<String> {
        self.native().requests.clone()
    }

    /// Script URLs whose fetch failed
    pub fn failed_requests(&self) -> Vec<String> {
        self.native().failed_requests.clone()
    }

    /// The deferred execution engine, once installed
    pub fn defer(&self) -> Option<&DeferJs> {
        self.inner.defer.get()
    }

    pub(crate) fn set_defer(&self, defer: DeferJs) -> DeferResult<&DeferJs> {
        self.inner
            .defer
            .set(defer)
            .map_err(|_| DeferError::AlreadyInitialized)?;
        self.inner.defer.get().ok_or(DeferError::AlreadyInitialized)
    }

    // ---- override table ---------------------------------------------------

    /// Route `o` to the engine
    pub fn install_override(&self, o: Override) -> DeferResult<()> {
        self.inner.overrides.borrow_mut().install(o)
    }

    /// Restore the native implementation of `o`
    pub fn restore_override(&self, o: Override) -> bool {
        self.inner.overrides.borrow_mut().restore(o)
    }

    /// Make `o` impossible to override, like a non-configurable property
    pub fn lock_override(&self, o: Override) {
        self.inner.overrides.borrow_mut().lock(o);
    }

    pub fn is_overridden(&self, o: Override) -> bool {
        self.inner.overrides.borrow().is_installed(o)
    }

    fn intercepted(&self, o: Override) -> Option<&DeferJs> {
        if self.is_overridden(o) {
            self.defer()
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::RustHost;
    use crate::testing::{page, Recorder};
    use deferjs_net::MemoryFetcher;

    #[test]
    fn test_parser_runs_scripts_in_document_order() {
        let rec = Recorder::new();
        let mut host = rec.host(&["head", "ext", "body"]);
        let fetcher = MemoryFetcher::new().with("http://site.test/ext.js", "log('ext')");
        let window = page(
            "<html><head><script>log('head')</script></head>\
             <body><script src=\"ext.js\"></script><script>log('body')</script></body></html>",
            fetcher,
        );

        window.load(&mut host, &LoadOptions::native()).unwrap();
        assert_eq!(rec.entries(), vec!["head", "ext", "body"]);
        assert_eq!(window.requests(), vec!["http://site.test/ext.js"]);
        assert_eq!(window.native_ready_state(), ReadyState::Complete);
    }

    #[test]
    fn test_parse_time_write_runs_next() {
        let rec = Recorder::new();
        let mut host = rec.host(&["a", "written", "b"]);
        host.define_script("writeScript()", |window, host| {
            window
                .write(host, "<p id=\"w\"></p><script>log('written')</script>")
                .map_err(|e| ScriptError::Uncaught(e.to_string()))
        });
        let window = page(
            "<body><script>log('a')</script><script>writeScript()</script>\
             <script>log('b')</script></body>",
            MemoryFetcher::new(),
        );

        window.load(&mut host, &LoadOptions::native()).unwrap();
        assert_eq!(rec.entries(), vec!["a", "written", "b"]);
        let written = window.get_element_by_id("w").unwrap();
        let scripts = window.get_elements_by_tag_name("script");
        assert_eq!(window.dom().next_sibling(scripts[1]), Some(written));
    }

    #[test]
    fn test_parser_hides_nodes_it_has_not_reached() {
        let rec = Recorder::new();
        let mut host = RustHost::new();
        for label in ["first", "second"] {
            let rec = rec.clone();
            host.define_script(&format!("count('{}')", label), move |window, host| {
                let scripts = window.get_elements_by_tag_name("script").len();
                let tail = window.get_element_by_id("tail").is_some();
                rec.push(&format!("{}:{}:{}", label, scripts, tail));
                window
                    .write(host, "<b id=\"w\"><i id=\"inner\"></i></b>")
                    .map_err(|e| ScriptError::Uncaught(e.to_string()))?;
                let inner = window.get_element_by_id("inner").is_some();
                rec.push(&format!("{}:written:{}", label, inner));
                Ok(())
            });
        }
        let window = page(
            "<body><script>count('first')</script><p id=\"tail\"></p>\
             <script>count('second')</script></body>",
            MemoryFetcher::new(),
        );

        window.load(&mut host, &LoadOptions::native()).unwrap();
        assert_eq!(
            rec.entries(),
            vec!["first:1:false", "first:written:true", "second:2:true", "second:written:true"]
        );
        assert_eq!(window.get_elements_by_tag_name("script").len(), 2);
    }

    #[test]
    fn test_missing_script_fires_error_and_continues() {
        let rec = Recorder::new();
        let mut host = rec.host(&["after"]);
        let on_error = rec.callback(&mut host, "error");
        let window = page(
            "<body><script src=\"missing.js\"></script><script>log('after')</script></body>",
            MemoryFetcher::new(),
        );
        let script = window.get_elements_by_tag_name("script")[0];
        window.add_event_listener(EventTarget::Element(script), "error", on_error);

        window.load(&mut host, &LoadOptions::native()).unwrap();
        assert_eq!(rec.entries(), vec!["error", "after"]);
        assert_eq!(window.failed_requests(), vec!["http://site.test/missing.js"]);
    }

    #[test]
    fn test_lifecycle_events_and_body_onload() {
        let rec = Recorder::new();
        let mut host = rec.host(&[]);
        let ready = rec.callback(&mut host, "DOMContentLoaded");
        let loaded = rec.callback(&mut host, "load-listener");
        let rec_onload = rec.clone();
        host.define_handler("bodyLoaded()", move |_, _, _, event| {
            assert_eq!(event.map(|e| e.event_type.as_str()), Some("load"));
            rec_onload.push("body-onload");
            Ok(())
        });
        host.define_script("listen()", move |window, _| {
            assert_eq!(window.ready_state(), "loading");
            window.add_event_listener(EventTarget::Document, "DOMContentLoaded", ready);
            window.add_event_listener(EventTarget::Window, "load", loaded);
            Ok(())
        });
        let window = page(
            "<body onload=\"bodyLoaded()\"><script>listen()</script></body>",
            MemoryFetcher::new(),
        );

        window.load(&mut host, &LoadOptions::native()).unwrap();
        assert_eq!(rec.entries(), vec!["DOMContentLoaded", "load-listener", "body-onload"]);
        assert_eq!(window.ready_state(), "complete");
    }

    #[test]
    fn test_inserted_scripts_run_natively() {
        let rec = Recorder::new();
        let mut host = rec.host(&["inline", "dynamic"]);
        let fetcher = MemoryFetcher::new().with("http://site.test/dyn.js", "log('dynamic')");
        host.define_script("insert()", |window, host| {
            let body = window.body().unwrap();
            let external = window.create_element("script");
            window.set_attribute(external, "src", "dyn.js").unwrap();
            window.append_child(host, body, external).unwrap();

            let inline = window.create_element("script");
            window.set_text(inline, "log('inline')").unwrap();
            window.append_child(host, body, inline).unwrap();
            Ok(())
        });
        let window = page("<body><script>insert()</script></body>", fetcher);

        window.load(&mut host, &LoadOptions::native()).unwrap();
        assert_eq!(rec.entries(), vec!["inline", "dynamic"]);
    }

    #[test]
    fn test_timers_run_after_load() {
        let rec = Recorder::new();
        let mut host = rec.host(&[]);
        let tick = rec.callback(&mut host, "tick");
        let loaded = rec.callback(&mut host, "load");
        host.define_script("schedule()", move |window, _| {
            window.set_timeout(tick, 10);
            window.add_event_listener(EventTarget::Window, "load", loaded);
            Ok(())
        });
        let window = page("<body><script>schedule()</script></body>", MemoryFetcher::new());

        window.load(&mut host, &LoadOptions::native()).unwrap();
        assert_eq!(rec.entries(), vec!["load", "tick"]);
        assert_eq!(window.now_ms(), 10);
    }

    #[test]
    fn test_write_after_load_appends_to_body() {
        let rec = Recorder::new();
        let mut host = rec.host(&["late"]);
        let late = host.callback(|window, host, _, _| {
            window
                .write(host, "<span id=\"late\"></span><script>log('late')</script>")
                .map_err(|e| ScriptError::Uncaught(e.to_string()))
        });
        host.define_script("schedule()", move |window, _| {
            window.set_timeout(late, 0);
            Ok(())
        });
        let window = page("<body><script>schedule()</script><p></p></body>", MemoryFetcher::new());

        window.load(&mut host, &LoadOptions::native()).unwrap();
        assert_eq!(rec.entries(), vec!["late"]);
        let span = window.get_element_by_id("late").unwrap();
        assert_eq!(window.parent_node(span), window.body());
    }

    #[test]
    fn test_script_errors_are_reported_not_fatal() {
        let rec = Recorder::new();
        let mut host = rec.host(&["ok"]);
        host.define_script("boom()", |_, _| Err(ScriptError::Uncaught("Error: boom".into())));
        let window = page("<body><script>boom()</script><script>log('ok')</script></body>", MemoryFetcher::new());

        window.load(&mut host, &LoadOptions::native()).unwrap();
        assert_eq!(rec.entries(), vec!["ok"]);
        assert_eq!(window.errors(), vec!["Uncaught Error: boom"]);
    }

    #[test]
    fn test_loop_limit() {
        let mut host = RustHost::new();
        let again = Rc::new(RefCell::new(None::<CallbackId>));
        let slot = again.clone();
        let id = host.callback(move |window, _, _, _| {
            if let Some(id) = *slot.borrow() {
                window.set_timeout(id, 1);
            }
            Ok(())
        });
        *again.borrow_mut() = Some(id);
        host.define_script("spin()", move |window, _| {
            window.set_timeout(id, 1);
            Ok(())
        });
        let window = page("<body><script>spin()</script></body>", MemoryFetcher::new());

        let options = LoadOptions {
            max_steps: 20,
            ..LoadOptions::native()
        };
        assert!(matches!(window.load(&mut host, &options), Err(DeferError::LoopLimit(20))));
    }

    #[test]
    fn test_overrides_without_engine_stay_native() {
        let window = page("<body><div id=\"a\"></div></body>", MemoryFetcher::new());
        window.install_override(Override::GetElementById).unwrap();
        assert!(window.is_overridden(Override::GetElementById));
        assert!(window.get_element_by_id("a").is_some());

        window.lock_override(Override::ReadyState);
        assert!(window.install_override(Override::ReadyState).is_err());
        assert_eq!(window.ready_state(), "loading");
    }
}
