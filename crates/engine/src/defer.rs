//! The deferred execution engine.
//!
//! [`DeferJs`] replays the scripts a page was served with (rewritten to a
//! non-executing type) in document order once the page has been parsed,
//! while making the page believe it is still loading: `document.write`
//! output lands where the writing script stood, lookups hide nodes that
//! execution has not reached, and `DOMContentLoaded`/`load` listeners get
//! synthesized events at the right moment.
//!
//! The engine is installed once per [`Window`]. It never patches anything
//! itself; it installs entries in the window's override table and the
//! window routes intercepted primitives to the shims in this module.

use std::cell::{RefCell, RefMut};
use std::fmt;

use deferjs_dom::{NodeId, Queryable};
use deferjs_html::parse_fragment;
use log::{debug, info, warn};

use crate::classify::{deferred_scripts, describe, discover_scripts, is_js_node, mark_deferred, ScriptPayload};
use crate::config::DeferConfig;
use crate::dynamic::{DynamicScriptSet, LivenessRule};
use crate::error::{DeferError, DeferResult};
use crate::events::{
    classify_registration, CallbackId, EngineHook, Event, EventPhase, EventTarget, ListenerRegistry,
    Registration, SyntheticListener,
};
use crate::host::ScriptHost;
use crate::markers;
use crate::overrides::Override;
use crate::queue::TaskQueue;
use crate::window::{ReadyState, Registrar, Window};

/// Engine lifecycle. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ExecutionState {
    NotStarted,
    Registered,
    Executing,
    /// Queue exhausted; dynamically inserted scripts may still be loading
    SyncDone,
    WaitingForLoad,
    Done,
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExecutionState::NotStarted => "NOT_STARTED",
            ExecutionState::Registered => "SCRIPTS_REGISTERED",
            ExecutionState::Executing => "SCRIPTS_EXECUTING",
            ExecutionState::SyncDone => "SYNC_SCRIPTS_DONE",
            ExecutionState::WaitingForLoad => "WAITING_FOR_ONLOAD",
            ExecutionState::Done => "SCRIPTS_DONE",
        };
        f.write_str(name)
    }
}

/// A queued unit of deferred work
#[derive(Debug, Clone, PartialEq)]
pub enum Task {
    /// Evaluate code in place of `element`
    Inline { code: String, element: Option<NodeId> },
    /// Load and run `url` in place of `element`; the queue waits for it
    External { url: String, element: Option<NodeId> },
    /// A script insertion held back by the insertion interceptor
    DeferredInsertion {
        parent: NodeId,
        node: NodeId,
        reference: Option<NodeId>,
    },
}

enum TaskOutcome {
    Completed,
    /// Waiting for the inserted script's `load` or `error`
    Pending,
}

struct EngineState {
    state: ExecutionState,
    event_phase: EventPhase,
    queue: TaskQueue<Task>,
    /// External task whose script has not fired yet, with its URL
    awaiting: Option<(usize, String)>,
    started: bool,
    initialized: bool,
    override_active: bool,
    write_buffer: String,
    /// Scripts already queued by flushes during the current task
    write_offset: usize,
    listeners: ListenerRegistry,
    dynamic: DynamicScriptSet,
    no_defer: DynamicScriptSet,
    logs: Vec<String>,
}

/// The deferred execution engine of one page
pub struct DeferJs {
    config: DeferConfig,
    liveness: LivenessRule,
    inner: RefCell<EngineState>,
}

impl DeferJs {
    fn new(config: DeferConfig) -> Self {
        let liveness = LivenessRule::for_ie_mode(config.ie_mode());
        Self {
            config,
            liveness,
            inner: RefCell::new(EngineState {
                state: ExecutionState::NotStarted,
                event_phase: EventPhase::NotStarted,
                queue: TaskQueue::new(),
                awaiting: None,
                started: false,
                initialized: false,
                override_active: true,
                write_buffer: String::new(),
                write_offset: 0,
                listeners: ListenerRegistry::new(),
                dynamic: DynamicScriptSet::new(),
                no_defer: DynamicScriptSet::new(),
                logs: Vec::new(),
            }),
        }
    }

    /// Create the engine of `window` and hook its start onto the document's
    /// `DOMContentLoaded` and the window's `load`.
    pub fn install(window: &Window, config: DeferConfig) -> DeferResult<&DeferJs> {
        let defer = window.set_defer(DeferJs::new(config))?;
        window.add_engine_listener(EventTarget::Document, "DOMContentLoaded", EngineHook::Start);
        window.add_engine_listener(EventTarget::Window, "load", EngineHook::Start);
        info!("Deferred execution installed on {}", window.base_url());
        Ok(defer)
    }

    fn st(&self) -> RefMut<'_, EngineState> {
        self.inner.borrow_mut()
    }

    pub fn config(&self) -> &DeferConfig {
        &self.config
    }

    pub fn state(&self) -> ExecutionState {
        self.inner.borrow().state
    }

    pub fn event_phase(&self) -> EventPhase {
        self.inner.borrow().event_phase
    }

    /// Whether the patched primitives still behave as patched
    pub fn override_active(&self) -> bool {
        self.inner.borrow().override_active
    }

    pub fn queue_len(&self) -> usize {
        self.inner.borrow().queue.len()
    }

    /// Engine log lines, oldest first
    pub fn logs(&self) -> Vec<String> {
        self.inner.borrow().logs.clone()
    }

    /// Every deferred script, its DOM ready and load listeners have run
    pub fn scripts_are_done(&self) -> bool {
        self.state() == ExecutionState::Done
    }

    fn log(&self, line: impl Into<String>) {
        let line = line.into();
        debug!("{}", line);
        self.st().logs.push(line);
    }

    fn log_exception(&self, line: &str, err: &dyn fmt::Display) {
        warn!("{}{}", line, err);
        let mut st = self.st();
        st.logs.push(line.to_string());
        st.logs.push(err.to_string());
    }

    fn set_state(&self, state: ExecutionState) {
        info!("Deferred execution: {}", state);
        self.st().state = state;
    }

    pub(crate) fn handle_hook(&self, window: &Window, host: &mut dyn ScriptHost, hook: EngineHook) {
        match hook {
            EngineHook::Start => self.start(window, host),
            EngineHook::TaskDone { seq } => self.task_done(window, host, seq),
            EngineHook::DynamicSettled(script) => self.on_dynamic_settled(window, host, script),
            EngineHook::NoDeferSettled(script) => self.on_no_defer_settled(window, host, script),
            EngineHook::FireOnload => self.fire_onload(window, host),
        }
    }

    // ---- start up --------------------------------------------------------

    /// Begin deferred execution, unless the page postponed it through the
    /// global `preventDeferJSStart` counter, in which case the counter is
    /// decremented and the start polled again later.
    pub fn start(&self, window: &Window, host: &mut dyn ScriptHost) {
        if self.inner.borrow().started {
            return;
        }
        let remaining = host
            .global_number(window, markers::PREVENT_START_GLOBAL)
            .unwrap_or(0.0);
        if remaining > 0.0 {
            host.set_global_number(window, markers::PREVENT_START_GLOBAL, remaining - 1.0);
            debug!("Start postponed, {} polls left", remaining - 1.0);
            window.set_engine_timer(self.config.start_poll_interval, EngineHook::Start);
            return;
        }

        self.initialize(window);
        self.st().started = true;
        self.register_script_tags(window);
        self.execute(window, host);
    }

    /// Hide every element from lookups and start tracking script creation
    /// and insertion. Runs once.
    pub fn initialize(&self, window: &Window) {
        {
            let mut st = self.st();
            if st.initialized {
                return;
            }
            st.initialized = true;
        }

        {
            let mut dom = window.dom_mut();
            for element in dom.elements_where(|_| true) {
                // Only elements are returned, so this cannot fail.
                let _ = dom.set_attribute(element, &self.config.not_processed_marker, "");
            }
        }

        self.try_install(window, Override::CreateElement);
        self.try_install(window, Override::InsertBefore);
        self.try_install(window, Override::AppendChild);
    }

    /// Queue every deferred script of the document, once
    pub fn register_script_tags(&self, window: &Window) {
        {
            let mut st = self.st();
            if st.state >= ExecutionState::Registered {
                return;
            }
            st.state = ExecutionState::Registered;
        }
        let scripts = deferred_scripts(&window.dom(), &self.config.script_type);
        info!("Registering {} deferred scripts", scripts.len());
        for script in scripts {
            self.add_node(window, script, None);
        }
    }

    /// Queue `script` according to its payload
    pub fn add_node(&self, window: &Window, script: NodeId, position: Option<usize>) -> usize {
        let payload = describe(&window.dom(), script);
        match payload {
            ScriptPayload::External(url) => self.add_url(&url, Some(script), position),
            ScriptPayload::Inline(code) => self.add_str(&code, Some(script), position),
        }
    }

    /// Queue inline code; returns its queue index
    pub fn add_str(&self, code: &str, element: Option<NodeId>, position: Option<usize>) -> usize {
        self.log(format!("Add to queue str: {}", code));
        let task = Task::Inline {
            code: code.to_string(),
            element,
        };
        self.st().queue.submit(task, position)
    }

    /// Queue an external script; returns its queue index
    pub fn add_url(&self, url: &str, element: Option<NodeId>, position: Option<usize>) -> usize {
        self.log(format!("Add to queue url: {}", url));
        let task = Task::External {
            url: url.to_string(),
            element,
        };
        self.st().queue.submit(task, position)
    }

    /// Run the queue once no script created by non-deferred code is still
    /// loading
    pub fn execute(&self, window: &Window, host: &mut dyn ScriptHost) {
        let ready = {
            let st = self.inner.borrow();
            let dom = window.dom();
            st.state == ExecutionState::Registered && st.no_defer.all_settled(&dom, self.liveness)
        };
        if ready {
            self.run(window, host);
        }
    }

    /// Start draining the queue
    pub fn run(&self, window: &Window, host: &mut dyn ScriptHost) {
        if self.state() != ExecutionState::Registered {
            return;
        }
        self.fire_event(window, host, EventPhase::BeforeScripts);
        self.set_state(ExecutionState::Executing);
        self.set_up(window, host);
        self.run_next(window, host);
    }

    fn set_up(&self, window: &Window, host: &mut dyn ScriptHost) {
        let caps = self.config.capabilities;
        let ie = self.config.ie_mode().is_some();

        if let Err(err) = self.add_context_node(window) {
            self.log_exception("Unable to add the write context node: ", &err);
        }
        if ie {
            self.create_id_vars(window, host);
        }
        if caps.define_property {
            self.try_install(window, Override::ReadyState);
        }
        if ie {
            self.try_install(window, Override::DoScroll);
            if caps.define_property {
                self.try_install(window, Override::DocumentAll);
            }
        }

        if caps.add_event_listener {
            self.try_install(window, Override::AddEventListener);
        } else {
            self.try_install(window, Override::AttachEvent);
        }

        for o in [
            Override::Writeln,
            Override::Write,
            Override::Open,
            Override::Close,
            Override::GetElementById,
        ] {
            self.try_install(window, o);
        }
        if caps.selectors_usable() {
            self.try_install(window, Override::GetElementsByTagName);
        }
        self.try_install(window, Override::CreateElement);
    }

    fn try_install(&self, window: &Window, o: Override) -> bool {
        match window.install_override(o) {
            Ok(()) => true,
            Err(err) => {
                self.log_exception(&format!("Exception while overriding {}.", o.name()), &err);
                false
            }
        }
    }

    /// Where writes go when no script is current
    fn add_context_node(&self, window: &Window) -> DeferResult<()> {
        let mut dom = window.dom_mut();
        let parent = dom
            .body()
            .or_else(|| dom.document_element())
            .ok_or(DeferError::NoInsertionPoint)?;
        let node = dom.create_element(markers::CONTEXT_NODE);
        dom.set_attribute(node, markers::CONTEXT_NODE_ATTR, "true")?;
        dom.append_child(parent, node)?;
        Ok(())
    }

    /// Declare ids that resolve to elements as real variables, so scripts
    /// can assign to them under IE
    fn create_id_vars(&self, window: &Window, host: &mut dyn ScriptHost) {
        let ids: Vec<String> = {
            let dom = window.dom();
            dom.elements_with_attribute("id")
                .into_iter()
                .filter_map(|element| dom.attribute(element, "id"))
                .filter(|id| {
                    !id.is_empty()
                        && !id.contains(|c| matches!(c, '-' | ':' | '.'))
                        && !id.starts_with(|c: char| c.is_ascii_digit())
                })
                .map(String::from)
                .collect()
        };

        let mut code = String::new();
        for id in ids {
            if host.has_element_global(window, &id) {
                code.push_str(&format!("var {0}=document.getElementById(\"{0}\");", id));
            }
        }
        if code.is_empty() {
            return;
        }
        match self.global_eval(window, host, &code, None) {
            Ok(script) => {
                let _ = window.set_attribute(script, &self.config.not_processed_marker, "");
            }
            Err(err) => self.log_exception("Exception while evaluating the script : ", &err),
        }
    }

    // ---- the queue ---------------------------------------------------------

    /// Flush pending writes, drop the finished script node and run tasks
    /// until one has to wait for a load or the queue is exhausted.
    fn run_next(&self, window: &Window, host: &mut dyn ScriptHost) {
        loop {
            self.handle_pending_document_writes(window);
            self.remove_current_dom_location(window);

            // The cursor moves before the task runs, so a completion that
            // arrives while the task is still on the stack cannot run it twice.
            let next = {
                let mut st = self.st();
                st.write_offset = 0;
                st.queue.advance()
            };
            let Some((seq, task)) = next else {
                self.on_queue_exhausted(window, host);
                return;
            };
            if let TaskOutcome::Pending = self.run_task(window, host, seq, task) {
                return;
            }
        }
    }

    fn run_task(&self, window: &Window, host: &mut dyn ScriptHost, seq: usize, task: Task) -> TaskOutcome {
        match task {
            Task::Inline { code, element } => {
                self.run_inline_task(window, host, &code, element);
                TaskOutcome::Completed
            }
            Task::External { url, element } => self.run_external_task(window, host, seq, url, element),
            Task::DeferredInsertion {
                parent,
                node,
                reference,
            } => {
                self.run_deferred_insertion(window, host, parent, node, reference);
                TaskOutcome::Completed
            }
        }
    }

    fn run_inline_task(&self, window: &Window, host: &mut dyn ScriptHost, code: &str, element: Option<NodeId>) {
        self.remove_not_processed_till(window, element);
        self.mark_current(window);
        if let Err(err) = self.global_eval(window, host, code, element) {
            self.log_exception("Exception while evaluating the script : ", &err);
        }
        self.log(format!("Evaluated: {}", code));
    }

    fn run_external_task(
        &self,
        window: &Window,
        host: &mut dyn ScriptHost,
        seq: usize,
        url: String,
        element: Option<NodeId>,
    ) -> TaskOutcome {
        self.remove_not_processed_till(window, element);
        self.st().awaiting = Some((seq, url.clone()));
        match self.insert_external_clone(window, host, seq, &url, element) {
            Ok(()) => TaskOutcome::Pending,
            Err(err) => {
                self.st().awaiting = None;
                self.log_exception(&format!("Unable to load {}: ", url), &err);
                TaskOutcome::Completed
            }
        }
    }

    fn insert_external_clone(
        &self,
        window: &Window,
        host: &mut dyn ScriptHost,
        seq: usize,
        url: &str,
        element: Option<NodeId>,
    ) -> DeferResult<()> {
        // A clone whose URL cannot resolve would never fire.
        window.resolve_url(url)?;

        let script = self.clone_script_node(window, element)?;
        window.set_attribute(script, "type", "text/javascript")?;
        window.set_attribute(script, "src", url)?;
        if let Some(original) = element {
            // Kept so the DOM looks the same; never executed.
            let text = window.text_content(original);
            if !text.is_empty() {
                let text = window.create_text_node(&text);
                window.dom_mut().append_child(script, text)?;
            }
        }
        let target = EventTarget::Element(script);
        window.add_engine_listener(target, "load", EngineHook::TaskDone { seq });
        window.add_engine_listener(target, "error", EngineHook::TaskDone { seq });

        let location = self
            .mark_current(window)
            .or_else(|| self.current_dom_location(window))
            .ok_or(DeferError::NoInsertionPoint)?;
        let parent = window.parent_node(location).ok_or(DeferError::NoInsertionPoint)?;
        window.native_insert_before(host, parent, script, Some(location))
    }

    fn task_done(&self, window: &Window, host: &mut dyn ScriptHost, seq: usize) {
        let url = {
            let mut st = self.st();
            match st.awaiting.take() {
                Some((awaited, url)) if awaited == seq => url,
                other => {
                    st.awaiting = other;
                    return;
                }
            }
        };
        self.log(format!("Executed: {}", url));
        self.run_next(window, host);
    }

    fn run_deferred_insertion(
        &self,
        window: &Window,
        host: &mut dyn ScriptHost,
        parent: NodeId,
        node: NodeId,
        reference: Option<NodeId>,
    ) {
        let target = {
            let dom = window.dom();
            let intact = dom.is_connected(parent)
                && reference.map_or(true, |r| dom.parent(r) == Some(parent));
            if intact {
                Some((parent, reference))
            } else {
                dom.find_element(|e| e.is_script())
                    .and_then(|first| dom.parent(first).map(|p| (p, Some(first))))
            }
        };
        let Some((parent, reference)) = target else {
            self.log("Unable to insert nodes, no context element found");
            return;
        };
        if let Err(err) = window.native_insert_before(host, parent, node, reference) {
            self.log_exception("Unable to insert script: ", &err);
        }
    }

    fn on_queue_exhausted(&self, window: &Window, host: &mut dyn ScriptHost) {
        self.set_state(ExecutionState::SyncDone);
        self.remove_not_processed_till(window, None);
        self.fire_event(window, host, EventPhase::DomReady);
        if self.can_call_on_complete(window) {
            self.on_complete(window, host);
        }
    }

    fn can_call_on_complete(&self, window: &Window) -> bool {
        let st = self.inner.borrow();
        if st.state != ExecutionState::SyncDone {
            return false;
        }
        let dom = window.dom();
        st.dynamic.all_settled(&dom, self.liveness)
    }

    fn on_complete(&self, window: &Window, host: &mut dyn ScriptHost) {
        if self.state() >= ExecutionState::WaitingForLoad {
            return;
        }
        if self.config.ie_mode().is_some() {
            window.restore_override(Override::DoScroll);
            window.restore_override(Override::DocumentAll);
        }
        window.restore_override(Override::ReadyState);
        self.st().override_active = false;
        self.set_state(ExecutionState::WaitingForLoad);

        if window.native_ready_state() != ReadyState::Complete {
            window.add_engine_listener(EventTarget::Window, "load", EngineHook::FireOnload);
            return;
        }

        // The native load is over: replay what would have run at that point.
        if let Some(handler) = window.handler(EventTarget::Document, "readystatechange") {
            self.exec(window, host, handler, EventTarget::Document);
        }
        if let Some(onload) = window.take_handler(EventTarget::Window, "load") {
            self.add_event_listener(window, EventTarget::Window, "onload", onload, None);
        }
        self.fire_onload(window, host);
    }

    fn fire_onload(&self, window: &Window, host: &mut dyn ScriptHost) {
        if self.event_phase() >= EventPhase::Load {
            return;
        }
        self.add_deferred_onload_listeners(window, host);
        self.fire_event(window, host, EventPhase::Load);

        {
            let mut dom = window.dom_mut();
            for node in dom.elements_where(|e| e.tag_name == markers::CONTEXT_NODE) {
                dom.detach(node);
            }
        }

        self.set_state(ExecutionState::Done);
        self.fire_event(window, host, EventPhase::AfterScripts);
    }

    /// Elements whose `onload` was postponed by the rewriter get it back as
    /// a `load` listener
    fn add_deferred_onload_listeners(&self, window: &Window, host: &mut dyn ScriptHost) {
        let elements = window
            .dom()
            .elements_where(|e| e.has_attribute(markers::ONLOAD) && e.has_attribute(markers::LOADED));
        for element in elements {
            let Some(body) = window.attribute(element, markers::ONLOAD) else {
                continue;
            };
            match host.compile_handler(window, &body) {
                Ok(handler) => {
                    self.add_event_listener(window, EventTarget::Element(element), "onload", handler, None)
                }
                Err(err) => self.log_exception("Function is not defined", &err),
            }
        }
    }

    // ---- DOM locations -------------------------------------------------------

    /// Strip the not-processed marker from every node before `stop`, or
    /// from all nodes when there is no stop node. Deferred scripts keep it.
    fn remove_not_processed_till(&self, window: &Window, stop: Option<NodeId>) {
        let marker = self.config.not_processed_marker.as_str();
        let mut dom = window.dom_mut();
        for node in dom.elements_with_attribute(marker) {
            if Some(node) == stop {
                return;
            }
            if dom.attribute(node, "type") != Some(self.config.script_type.as_str()) {
                dom.remove_attribute(node, marker);
            }
        }
    }

    /// The next deferred script node in the document
    fn next_deferred_node(&self, window: &Window) -> Option<NodeId> {
        let script_type = self.config.script_type.as_str();
        window
            .dom()
            .find_element(|e| e.get_attribute("type") == Some(script_type))
    }

    fn mark_current(&self, window: &Window) -> Option<NodeId> {
        let node = self.next_deferred_node(window)?;
        window.set_attribute(node, markers::CURRENT_NODE, "").ok()?;
        Some(node)
    }

    /// Where new nodes go: before the current script, else before the
    /// context node
    fn current_dom_location(&self, window: &Window) -> Option<NodeId> {
        let dom = window.dom();
        dom.find_element(|e| e.has_attribute(markers::CURRENT_NODE))
            .or_else(|| dom.find_element(|e| e.tag_name == markers::CONTEXT_NODE))
    }

    fn remove_current_dom_location(&self, window: &Window) {
        let Some(location) = self.current_dom_location(window) else {
            return;
        };
        let mut dom = window.dom_mut();
        if dom.tag_name(location) == Some("script") {
            dom.detach(location);
        }
    }

    /// A fresh script element carrying the attributes of `original`, which
    /// loses them. Type, source, loading flags and markers stay behind.
    fn clone_script_node(&self, window: &Window, original: Option<NodeId>) -> DeferResult<NodeId> {
        let mut dom = window.dom_mut();
        let script = dom.create_element("script");
        let Some(original) = original else {
            return Ok(script);
        };
        let copied: Vec<(String, String)> = dom
            .element(original)
            .map(|e| {
                e.attributes
                    .iter()
                    .filter(|a| !self.is_kept_attribute(&a.name))
                    .map(|a| (a.name.clone(), a.value.clone()))
                    .collect()
            })
            .unwrap_or_default();
        for (name, value) in copied {
            dom.set_attribute(script, &name, &value)?;
            dom.remove_attribute(original, &name);
        }
        Ok(script)
    }

    fn is_kept_attribute(&self, name: &str) -> bool {
        matches!(
            name,
            "type" | "src" | "async" | "defer"
                | markers::ORIG_TYPE
                | markers::ORIG_SRC
                | markers::ORIG_INDEX
                | markers::CURRENT_NODE
        ) || name == self.config.not_processed_marker
    }

    /// Run `code` as a script element placed at the current location
    fn global_eval(
        &self,
        window: &Window,
        host: &mut dyn ScriptHost,
        code: &str,
        element: Option<NodeId>,
    ) -> DeferResult<NodeId> {
        let script = self.clone_script_node(window, element)?;
        window.set_text(script, code)?;
        window.set_attribute(script, "type", "text/javascript")?;
        let location = self
            .current_dom_location(window)
            .ok_or(DeferError::NoInsertionPoint)?;
        {
            let mut dom = window.dom_mut();
            let parent = dom.parent(location).ok_or(DeferError::NoInsertionPoint)?;
            dom.insert_before(parent, script, Some(location))?;
        }
        window.run_inline_script(host, script)?;
        Ok(script)
    }

    // ---- document.write -------------------------------------------------------

    /// `document.write` while deferred: buffer until the script finishes
    pub(crate) fn write_html(&self, window: &Window, host: &mut dyn ScriptHost, html: &str) -> DeferResult<()> {
        if !self.override_active() {
            return window.native_write(host, html);
        }
        self.log(format!("dw: {}", html));
        self.st().write_buffer.push_str(html);
        Ok(())
    }

    fn handle_pending_document_writes(&self, window: &Window) {
        let (html, position) = {
            let mut st = self.st();
            if st.write_buffer.is_empty() {
                return;
            }
            // Earlier flushes of this task keep their place ahead of this one
            let position = st.queue.cursor() + st.write_offset;
            (std::mem::take(&mut st.write_buffer), position)
        };
        self.log(format!("handle_dw: {}", html));
        let location = self.current_dom_location(window);
        match self.insert_html(window, &html, position, location) {
            Ok(queued) => self.st().write_offset += queued,
            Err(err) => self.log_exception("Unable to insert written html: ", &err),
        }
    }

    /// Parse `html` before `location`, queueing its scripts from `position`.
    /// Returns how many scripts were queued.
    fn insert_html(
        &self,
        window: &Window,
        html: &str,
        position: usize,
        location: Option<NodeId>,
    ) -> DeferResult<usize> {
        let scripts = {
            let mut dom = window.dom_mut();
            let container = parse_fragment(&mut dom, html)?;
            let scripts = discover_scripts(&dom, container);
            mark_deferred(
                &mut dom,
                &scripts,
                &self.config.script_type,
                &self.config.not_processed_marker,
            )?;

            match location.and_then(|l| dom.parent(l).map(|p| (p, l))) {
                Some((parent, location)) => {
                    for child in dom.children(container) {
                        dom.insert_before(parent, child, Some(location))?;
                    }
                }
                None => self.log("Unable to insert nodes, no context element found"),
            }
            scripts
        };

        let queued = scripts.len();
        for (i, script) in scripts.into_iter().enumerate() {
            self.add_node(window, script, Some(position + i));
        }
        Ok(queued)
    }

    // ---- lookups and creation -------------------------------------------------

    /// `document.getElementById` that cannot see past execution
    pub(crate) fn get_element_by_id(&self, window: &Window, id: &str) -> Option<NodeId> {
        self.handle_pending_document_writes(window);
        let dom = window.dom();
        let node = dom.get_element_by_id(id)?;
        if dom.has_attribute(node, &self.config.not_processed_marker) {
            None
        } else {
            Some(node)
        }
    }

    pub(crate) fn get_elements_by_tag_name(&self, window: &Window, tag_name: &str) -> Vec<NodeId> {
        let active = self.override_active();
        let dom = window.dom();
        let all = dom.get_elements_by_tag_name(tag_name);
        if !active {
            return all;
        }
        all.into_iter()
            .filter(|&node| !dom.has_attribute(node, &self.config.not_processed_marker))
            .collect()
    }

    /// Track scripts created by page code until they settle
    pub(crate) fn on_create_element(&self, window: &Window, element: NodeId, tag_name: &str) {
        if !tag_name.eq_ignore_ascii_case("script") {
            return;
        }
        let hook = {
            let mut st = self.st();
            if !st.override_active {
                return;
            }
            if st.state >= ExecutionState::Executing {
                st.dynamic.track(element).then_some(EngineHook::DynamicSettled(element))
            } else {
                st.no_defer.track(element).then_some(EngineHook::NoDeferSettled(element))
            }
        };
        if let Some(hook) = hook {
            let target = EventTarget::Element(element);
            window.add_engine_listener(target, "load", hook);
            window.add_engine_listener(target, "error", hook);
        }
    }

    fn on_dynamic_settled(&self, window: &Window, host: &mut dyn ScriptHost, script: NodeId) {
        let settled = self.st().dynamic.settle(script);
        if settled && self.can_call_on_complete(window) {
            self.on_complete(window, host);
        }
    }

    fn on_no_defer_settled(&self, window: &Window, host: &mut dyn ScriptHost, script: NodeId) {
        let settled = self.st().no_defer.settle(script);
        if settled {
            self.execute(window, host);
        }
    }

    /// Hold back the insertion of a loading script while the queue runs, so
    /// its side effects land after the scripts queued before it. Returns
    /// false when the insertion should happen natively.
    pub(crate) fn intercept_insertion(
        &self,
        window: &Window,
        parent: NodeId,
        node: NodeId,
        reference: Option<NodeId>,
    ) -> bool {
        if self.state() != ExecutionState::Executing {
            return false;
        }
        let src = {
            let dom = window.dom();
            if !dom.is_connected(parent) || !is_js_node(&dom, node) {
                return false;
            }
            match dom.attribute(node, "src").filter(|s| !s.is_empty()) {
                Some(src) => src.to_string(),
                None => return false,
            }
        };

        let newly_tracked = self.st().dynamic.track(node);
        if newly_tracked {
            let target = EventTarget::Element(node);
            window.add_engine_listener(target, "load", EngineHook::DynamicSettled(node));
            window.add_engine_listener(target, "error", EngineHook::DynamicSettled(node));
        }
        self.log(format!("Deferred insertion of {}", src));
        self.st().queue.submit(
            Task::DeferredInsertion {
                parent,
                node,
                reference,
            },
            None,
        );
        true
    }

    /// `document.readyState` while shadowed
    pub(crate) fn shadow_ready_state(&self) -> &'static str {
        if self.state() >= ExecutionState::SyncDone {
            ReadyState::Interactive.as_str()
        } else {
            ReadyState::Loading.as_str()
        }
    }

    // ---- events ----------------------------------------------------------------

    /// Route a listener registration. Lifecycle listeners are held for
    /// their synthetic phase; anything else goes to `registrar`, the native
    /// registration it came through (none for internal registrations).
    pub fn add_event_listener(
        &self,
        window: &Window,
        target: EventTarget,
        event_name: &str,
        callback: CallbackId,
        registrar: Option<Registrar>,
    ) {
        let (state, phase) = {
            let st = self.inner.borrow();
            (st.state, st.event_phase)
        };
        if state >= ExecutionState::WaitingForLoad {
            if let Some(registrar) = registrar {
                window.native_register(registrar, target, event_name, callback);
                return;
            }
            if state >= ExecutionState::Done {
                return;
            }
        }

        match classify_registration(event_name, phase) {
            Registration::Defer { phase, event_type } => {
                self.st().listeners.push(
                    phase,
                    SyntheticListener {
                        target,
                        callback,
                        event_type,
                    },
                );
            }
            Registration::PassThrough => {
                if let Some(registrar) = registrar {
                    window.native_register(registrar, target, event_name, callback);
                }
            }
        }
    }

    /// Run `callback` first thing when deferred execution starts
    pub fn add_before_defer_run_functions(&self, window: &Window, callback: CallbackId) {
        self.add_event_listener(window, EventTarget::Window, "onbeforescripts", callback, None);
    }

    /// Run `callback` after the deferred scripts and their load listeners
    pub fn add_after_defer_run_functions(&self, window: &Window, callback: CallbackId) {
        self.add_event_listener(window, EventTarget::Window, "onafterscripts", callback, None);
    }

    fn fire_event(&self, window: &Window, host: &mut dyn ScriptHost, phase: EventPhase) {
        let listeners = {
            let mut st = self.st();
            st.event_phase = phase;
            st.listeners.take(phase)
        };
        self.log(format!("Firing Event: {}", phase));
        let now = window.now_ms();
        for listener in listeners {
            let event = Event::synthetic(listener.event_type, listener.target, now);
            if let Err(err) = host.invoke(window, listener.callback, listener.target, Some(&event)) {
                self.log_exception("Exception while evaluating the script : ", &err);
            }
        }
    }

    fn exec(&self, window: &Window, host: &mut dyn ScriptHost, callback: CallbackId, this: EventTarget) {
        if let Err(err) = host.invoke(window, callback, this, None) {
            self.log_exception("Exception while evaluating the script : ", &err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DeferConfig, LoadOptions};
    use crate::error::ScriptError;
    use crate::host::RustHost;
    use crate::testing::{deferred_page, page, Recorder};
    use deferjs_net::MemoryFetcher;

    const ORDER_FIXTURE: &str = "<html><head><script>log('0')</script></head><body>\
        <script src=\"one.js\"></script>\
        <script>writeTwo()</script>\
        <script src=\"three.js\"></script>\
        <p id=\"tail\"></p>\
        <script>log('4')</script>\
        </body></html>";

    fn order_fetcher() -> MemoryFetcher {
        MemoryFetcher::new()
            .with("http://site.test/one.js", "log('1')")
            .with("http://site.test/three.js", "log('3')")
    }

    fn order_host(rec: &Recorder) -> RustHost {
        let mut host = rec.host(&["0", "1", "2", "3", "4"]);
        host.define_script("writeTwo()", |window, host| {
            window
                .write(host, "<span id=\"two\"></span><script>log('2')</script>")
                .map_err(|e| ScriptError::Uncaught(e.to_string()))
        });
        host
    }

    fn to_script_error(err: DeferError) -> ScriptError {
        ScriptError::Uncaught(err.to_string())
    }

    #[test]
    fn test_deferred_order_matches_native() {
        let native_rec = Recorder::new();
        let mut native_host = order_host(&native_rec);
        let native = page(ORDER_FIXTURE, order_fetcher());
        native.load(&mut native_host, &LoadOptions::native()).unwrap();

        let rec = Recorder::new();
        let mut host = order_host(&rec);
        let window = deferred_page(ORDER_FIXTURE, order_fetcher());
        window.load(&mut host, &LoadOptions::deferred()).unwrap();

        assert_eq!(native_rec.entries(), vec!["0", "1", "2", "3", "4"]);
        assert_eq!(rec.entries(), native_rec.entries());
        assert_eq!(window.requests(), native.requests());

        let defer = window.defer().unwrap();
        assert!(defer.scripts_are_done());
        assert_eq!(defer.event_phase(), EventPhase::AfterScripts);
        assert!(window.errors().is_empty());

        let dom = window.dom();
        assert!(dom.elements_with_attribute(markers::NOT_PROCESSED).is_empty());
        assert!(dom.elements_with_attribute(markers::CURRENT_NODE).is_empty());
        assert!(deferred_scripts(&dom, markers::SCRIPT_TYPE).is_empty());
        assert!(dom.get_elements_by_tag_name(markers::CONTEXT_NODE).is_empty());
    }

    #[test]
    fn test_written_markup_lands_where_the_writer_stood() {
        let rec = Recorder::new();
        let mut host = order_host(&rec);
        let window = deferred_page(ORDER_FIXTURE, order_fetcher());
        window.load(&mut host, &LoadOptions::deferred()).unwrap();

        let two = window.get_element_by_id("two").unwrap();
        let tail = window.get_element_by_id("tail").unwrap();
        let dom = window.dom();
        let body = dom.body().unwrap();
        let children = dom.children(body);
        let position = |node| children.iter().position(|c| *c == node).unwrap();
        assert!(position(two) < position(tail));

        let logs = window.defer().unwrap().logs();
        assert!(logs.iter().any(|l| l.starts_with("dw: <span id=\"two\">")));
        assert!(logs.iter().any(|l| l.starts_with("handle_dw: ")));
        assert!(logs.contains(&"Executed: one.js".to_string()));
        assert!(logs.contains(&"Evaluated: log('4')".to_string()));
    }

    #[test]
    fn test_writes_split_by_a_lookup_keep_their_order() {
        const HTML: &str = "<body><div id=\"x\"></div>\
            <script>writeTwice()</script>\
            <script>log('C')</script></body>";

        let make_host = |rec: &Recorder| {
            let mut host = rec.host(&["A", "B", "C"]);
            host.define_script("writeTwice()", |window, host| {
                window
                    .write(host, "<script>log('A')</script>")
                    .map_err(to_script_error)?;
                window.get_element_by_id("x");
                window
                    .write(host, "<script>log('B')</script>")
                    .map_err(to_script_error)
            });
            host
        };

        let native_rec = Recorder::new();
        let mut native_host = make_host(&native_rec);
        let native = page(HTML, MemoryFetcher::new());
        native.load(&mut native_host, &LoadOptions::native()).unwrap();

        let rec = Recorder::new();
        let mut host = make_host(&rec);
        let window = deferred_page(HTML, MemoryFetcher::new());
        window.load(&mut host, &LoadOptions::deferred()).unwrap();

        assert_eq!(native_rec.entries(), vec!["A", "B", "C"]);
        assert_eq!(rec.entries(), native_rec.entries());
    }

    #[test]
    fn test_lookups_hide_unreached_nodes() {
        let rec = Recorder::new();
        let mut host = RustHost::new();
        for label in ["early", "late"] {
            let rec = rec.clone();
            host.define_script(&format!("probe('{}')", label), move |window, _| {
                let found = window.get_element_by_id("later").is_some();
                let divs = window.get_elements_by_tag_name("div").len();
                rec.push(&format!("{}:{}:{}", label, found, divs));
                Ok(())
            });
        }
        let window = deferred_page(
            "<body><script>probe('early')</script><div id=\"later\"></div>\
             <script>probe('late')</script></body>",
            MemoryFetcher::new(),
        );
        window.load(&mut host, &LoadOptions::deferred()).unwrap();

        assert_eq!(rec.entries(), vec!["early:false:0", "late:true:1"]);
    }

    #[test]
    fn test_registration_is_idempotent() {
        let rec = Recorder::new();
        let mut host = order_host(&rec);
        let window = deferred_page(ORDER_FIXTURE, order_fetcher());
        window.load(&mut host, &LoadOptions::deferred()).unwrap();

        let defer = window.defer().unwrap();
        let queued = defer.queue_len();
        defer.register_script_tags(&window);
        defer.register_script_tags(&window);
        assert_eq!(defer.queue_len(), queued);
        assert_eq!(rec.entries().len(), 5);
    }

    #[test]
    fn test_install_twice_fails() {
        let window = deferred_page("<body></body>", MemoryFetcher::new());
        DeferJs::install(&window, DeferConfig::default()).unwrap();
        assert!(matches!(
            DeferJs::install(&window, DeferConfig::default()),
            Err(DeferError::AlreadyInitialized)
        ));
    }

    #[test]
    fn test_throwing_script_does_not_stop_the_queue() {
        let rec = Recorder::new();
        let mut host = rec.host(&["after"]);
        host.define_script("boom()", |_, _| Err(ScriptError::Uncaught("TypeError: boom".into())));
        let window = deferred_page(
            "<body><script>boom()</script><script>log('after')</script></body>",
            MemoryFetcher::new(),
        );
        window.load(&mut host, &LoadOptions::deferred()).unwrap();

        let defer = window.defer().unwrap();
        assert_eq!(rec.entries(), vec!["after"]);
        assert!(defer.scripts_are_done());
        let logs = defer.logs();
        let at = logs
            .iter()
            .position(|l| l == "Exception while evaluating the script : ")
            .unwrap();
        assert_eq!(logs[at + 1], "Uncaught TypeError: boom");
    }

    #[test]
    fn test_missing_external_script_is_skipped() {
        let html = "<body><script src=\"gone.js\"></script><script>log('after')</script></body>";

        let native_rec = Recorder::new();
        let mut native_host = native_rec.host(&["after"]);
        let native = page(html, MemoryFetcher::new());
        native.load(&mut native_host, &LoadOptions::native()).unwrap();

        let rec = Recorder::new();
        let mut host = rec.host(&["after"]);
        let window = deferred_page(html, MemoryFetcher::new());
        window.load(&mut host, &LoadOptions::deferred()).unwrap();

        assert_eq!(rec.entries(), vec!["after"]);
        assert_eq!(window.failed_requests(), vec!["http://site.test/gone.js"]);
        assert_eq!(window.requests(), native.requests());
        assert!(window.defer().unwrap().scripts_are_done());
    }

    #[test]
    fn test_lifecycle_listeners_get_one_synthetic_event() {
        let rec = Recorder::new();
        let mut host = rec.host(&[]);
        let seen = rec.clone();
        let ready = host.callback(move |window, host, this, event| {
            let event = event.unwrap();
            assert!(event.synthetic && !event.bubbles && !event.cancelable);
            assert_eq!(this, EventTarget::Document);
            seen.push(&format!("{}:{}", event.event_type, window.ready_state()));
            // Still before the load phase, so this is held for it.
            let late = host.callback(|_, _, _, _| Ok(()));
            window.add_event_listener(EventTarget::Window, "load", late);
            Ok(())
        });
        let seen = rec.clone();
        let loaded = host.callback(move |_, _, _, event| {
            let event = event.unwrap();
            assert_eq!(event.target, EventTarget::Document);
            assert_eq!(event.current_target, EventTarget::Window);
            seen.push(&event.event_type);
            Ok(())
        });
        let clicked = rec.callback(&mut host, "click");
        let seen = rec.clone();
        host.define_script("listen()", move |window, _| {
            seen.push(&format!("script:{}", window.ready_state()));
            window.add_event_listener(EventTarget::Document, "DOMContentLoaded", ready);
            window.add_event_listener(EventTarget::Window, "load", loaded);
            window.add_event_listener(EventTarget::Document, "click", clicked);
            Ok(())
        });
        let window = deferred_page("<body><script>listen()</script></body>", MemoryFetcher::new());
        window.load(&mut host, &LoadOptions::deferred()).unwrap();

        assert_eq!(
            rec.entries(),
            vec!["script:loading", "DOMContentLoaded:interactive", "load"]
        );
        window.dispatch_event(&mut host, EventTarget::Document, "click");
        assert_eq!(rec.entries().last().map(String::as_str), Some("click"));
        assert_eq!(window.ready_state(), "complete");
    }

    #[test]
    fn test_before_and_after_run_functions() {
        let rec = Recorder::new();
        let mut host = rec.host(&["script"]);
        let before = rec.callback(&mut host, "before");
        let after = rec.callback(&mut host, "after");
        let loaded = rec.callback(&mut host, "load");
        host.define_script("listen()", move |window, _| {
            window.add_event_listener(EventTarget::Window, "load", loaded);
            Ok(())
        });
        let window = deferred_page(
            "<body><script>listen()</script><script>log('script')</script></body>",
            MemoryFetcher::new(),
        );
        let defer = DeferJs::install(&window, DeferConfig::default()).unwrap();
        defer.add_before_defer_run_functions(&window, before);
        defer.add_after_defer_run_functions(&window, after);
        window.load(&mut host, &LoadOptions::native()).unwrap();

        assert_eq!(rec.entries(), vec!["before", "script", "load", "after"]);
    }

    #[test]
    fn test_exported_add_str_runs_at_the_end() {
        let rec = Recorder::new();
        let mut host = rec.host(&["a", "b", "extra"]);
        host.define_script("queueMore()", |window, _| {
            if let Some(defer) = window.defer() {
                defer.add_str("log('extra')", None, None);
            }
            Ok(())
        });
        let window = deferred_page(
            "<body><script>queueMore()</script><script>log('a')</script>\
             <script>log('b')</script></body>",
            MemoryFetcher::new(),
        );
        window.load(&mut host, &LoadOptions::deferred()).unwrap();

        assert_eq!(rec.entries(), vec!["a", "b", "extra"]);
    }

    fn insertion_host(rec: &Recorder) -> RustHost {
        let mut host = rec.host(&["a", "b"]);
        let seen = rec.clone();
        host.define_script("log('dyn')", move |window, _| {
            let state = window.defer().map(|d| d.state().to_string());
            seen.push(&format!("dyn:{}", state.as_deref().unwrap_or("native")));
            Ok(())
        });
        host.define_script("insert()", |window, host| {
            let body = window.body().ok_or(ScriptError::Uncaught("no body".into()))?;
            let script = window.create_element("script");
            window.set_attribute(script, "src", "dyn.js").map_err(to_script_error)?;
            window.append_child(host, body, script).map_err(to_script_error)?;
            Ok(())
        });
        host
    }

    #[test]
    fn test_dynamic_insertion_keeps_order_and_gates_completion() {
        let html = "<body><script>log('a')</script><script>insert()</script>\
                    <script>log('b')</script></body>";
        let fetcher = || MemoryFetcher::new().with("http://site.test/dyn.js", "log('dyn')");

        let native_rec = Recorder::new();
        let mut native_host = insertion_host(&native_rec);
        page(html, fetcher())
            .load(&mut native_host, &LoadOptions::native())
            .unwrap();

        let rec = Recorder::new();
        let mut host = insertion_host(&rec);
        let window = deferred_page(html, fetcher());
        window.load(&mut host, &LoadOptions::deferred()).unwrap();

        assert_eq!(native_rec.entries(), vec!["a", "b", "dyn:native"]);
        // The dynamic script ran after the queue, before completion.
        assert_eq!(rec.entries(), vec!["a", "b", "dyn:SYNC_SCRIPTS_DONE"]);
        let defer = window.defer().unwrap();
        assert!(defer.scripts_are_done());
        assert!(defer.logs().contains(&"Deferred insertion of dyn.js".to_string()));
    }

    #[test]
    fn test_deferred_insertion_falls_back_to_first_script() {
        let rec = Recorder::new();
        let mut host = rec.host(&["dyn"]);
        host.define_script("insertBefore()", |window, host| {
            let anchor = window.get_element_by_id("anchor").ok_or(ScriptError::Uncaught("anchor".into()))?;
            let parent = window.parent_node(anchor).ok_or(ScriptError::Uncaught("parent".into()))?;
            let script = window.create_element("script");
            window.set_attribute(script, "src", "dyn.js").map_err(to_script_error)?;
            window.set_attribute(script, "id", "dyn").map_err(to_script_error)?;
            window.insert_before(host, parent, script, Some(anchor)).map_err(to_script_error)?;
            // Gone before the held insertion runs.
            window.remove_child(parent, anchor).map_err(to_script_error)
        });
        let window = deferred_page(
            "<body><div><span id=\"anchor\"></span></div><script>insertBefore()</script></body>",
            MemoryFetcher::new().with("http://site.test/dyn.js", "log('dyn')"),
        );
        window.load(&mut host, &LoadOptions::deferred()).unwrap();

        assert_eq!(rec.entries(), vec!["dyn"]);
        let dynamic = window.get_element_by_id("dyn").unwrap();
        assert!(window.dom().is_connected(dynamic));
        assert!(window.defer().unwrap().scripts_are_done());
    }

    #[test]
    fn test_prevented_start_polls_then_completes_immediately() {
        let rec = Recorder::new();
        let mut host = rec.host(&[]);
        host.set_global(markers::PREVENT_START_GLOBAL, 2.0);
        let ready_state_changed = rec.callback(&mut host, "readystatechange");
        let onload = rec.callback(&mut host, "onload");
        let seen = rec.clone();
        host.define_script("late()", move |window, _| {
            seen.push(&format!("late@{}", window.now_ms()));
            window.set_handler(EventTarget::Window, "load", Some(onload));
            window.set_handler(EventTarget::Document, "readystatechange", Some(ready_state_changed));
            Ok(())
        });
        let window = deferred_page("<body><script>late()</script></body>", MemoryFetcher::new());
        window.load(&mut host, &LoadOptions::deferred()).unwrap();

        // The native load fired while the start was postponed.
        assert_eq!(rec.entries(), vec!["late@50", "readystatechange", "onload"]);
        assert_eq!(host.global(markers::PREVENT_START_GLOBAL), Some(0.0));
        assert_eq!(window.handler(EventTarget::Window, "load"), None);
        assert!(window.defer().unwrap().scripts_are_done());
    }

    #[test]
    fn test_ready_state_is_shadowed_until_sync_done() {
        let rec = Recorder::new();
        let mut host = rec.host(&[]);
        let seen = rec.clone();
        host.define_script("probe()", move |window, _| {
            seen.push(window.ready_state());
            Ok(())
        });
        let window = deferred_page("<body><script>probe()</script></body>", MemoryFetcher::new());
        window.load(&mut host, &LoadOptions::deferred()).unwrap();
        assert_eq!(rec.entries(), vec!["loading"]);
        assert!(!window.is_overridden(Override::ReadyState));
    }

    #[test]
    fn test_locked_override_degrades_to_native() {
        let rec = Recorder::new();
        let mut host = rec.host(&[]);
        let seen = rec.clone();
        host.define_script("probe()", move |window, _| {
            seen.push(window.ready_state());
            Ok(())
        });
        let window = deferred_page("<body><script>probe()</script></body>", MemoryFetcher::new());
        window.lock_override(Override::ReadyState);
        window.load(&mut host, &LoadOptions::deferred()).unwrap();

        // Native value during DOMContentLoaded.
        assert_eq!(rec.entries(), vec!["interactive"]);
        let defer = window.defer().unwrap();
        assert!(defer.scripts_are_done());
        assert!(defer
            .logs()
            .contains(&"Exception while overriding document.readyState.".to_string()));
    }

    #[test]
    fn test_scripts_created_before_run_delay_execution() {
        let rec = Recorder::new();
        let mut host = rec.host(&["nodefer", "deferred"]);
        let window = deferred_page(
            "<body><script>log('deferred')</script></body>",
            MemoryFetcher::new().with("http://site.test/nd.js", "log('nodefer')"),
        );
        let defer = DeferJs::install(&window, DeferConfig::default()).unwrap();
        defer.initialize(&window);

        let script = window.create_element("script");
        window.set_attribute(script, "src", "nd.js").unwrap();
        let body = window.body().unwrap();
        window.append_child(&mut host, body, script).unwrap();

        defer.register_script_tags(&window);
        defer.execute(&window, &mut host);
        assert_eq!(defer.state(), ExecutionState::Registered);
        assert!(rec.entries().is_empty());

        window.run_until_idle(&mut host, 100).unwrap();
        assert_eq!(rec.entries(), vec!["nodefer", "deferred"]);
        assert_eq!(defer.state(), ExecutionState::WaitingForLoad);
    }

    #[test]
    fn test_deferred_onload_attributes_are_replayed() {
        let rec = Recorder::new();
        let mut host = rec.host(&[]);
        let seen = rec.clone();
        host.define_handler("picLoaded()", move |window, _, this, event| {
            let EventTarget::Element(element) = this else {
                return Err(ScriptError::Uncaught("bad this".into()));
            };
            assert_eq!(event.map(|e| e.target), Some(this));
            seen.push(&format!("onload:{}", window.attribute(element, "id").unwrap_or_default()));
            Ok(())
        });
        let window = deferred_page(
            "<body><img id=\"pic\" data-frz-onload=\"picLoaded()\" data-frz-loaded=\"1\">\
             <img id=\"pending\" data-frz-onload=\"picLoaded()\"></body>",
            MemoryFetcher::new(),
        );
        window.load(&mut host, &LoadOptions::deferred()).unwrap();

        assert_eq!(rec.entries(), vec!["onload:pic"]);
    }

    #[test]
    fn test_write_after_completion_is_native() {
        let rec = Recorder::new();
        let mut host = rec.host(&["late"]);
        let late = host.callback(|window, host, _, _| {
            window
                .write(host, "<script>log('late')</script>")
                .map_err(to_script_error)
        });
        host.define_script("schedule()", move |window, _| {
            window.set_timeout(late, 5);
            Ok(())
        });
        let window = deferred_page("<body><script>schedule()</script></body>", MemoryFetcher::new());
        window.load(&mut host, &LoadOptions::deferred()).unwrap();

        assert_eq!(rec.entries(), vec!["late"]);
        assert!(!window.defer().unwrap().override_active());
    }

    #[test]
    fn test_legacy_ie_mode() {
        let rec = Recorder::new();
        let mut host = rec.host(&[]);
        host.declare_element_global("main");
        let seen = rec.clone();
        let on_load = rec.callback(&mut host, "attached-load");
        host.define_script("probe()", move |window, _| {
            seen.push(&format!(
                "doScroll:{} all:{} tags:{}",
                window.do_scroll().is_err(),
                window.document_all_hidden(),
                window.is_overridden(Override::GetElementsByTagName)
            ));
            window.attach_event(EventTarget::Window, "onload", on_load);
            Ok(())
        });
        let window = deferred_page(
            "<body><div id=\"main\"></div><div id=\"a-b\"></div><script>probe()</script></body>",
            MemoryFetcher::new(),
        );
        window
            .load(&mut host, &LoadOptions::with_config(DeferConfig::legacy_ie(8.0)))
            .unwrap();

        assert_eq!(rec.entries(), vec!["doScroll:true all:true tags:false", "attached-load"]);
        assert!(host
            .evaluated()
            .contains(&"var main=document.getElementById(\"main\");".to_string()));
        assert!(window.do_scroll().is_ok());
        assert!(!window.document_all_hidden());
    }

    #[test]
    fn test_ie_mode_needs_compat_flag() {
        let config = DeferConfig {
            capabilities: crate::config::Capabilities::legacy_ie(9.0),
            ..DeferConfig::default()
        };
        let rec = Recorder::new();
        let mut host = rec.host(&[]);
        let seen = rec.clone();
        host.define_script("probe()", move |window, _| {
            seen.push(&format!("doScroll:{}", window.do_scroll().is_err()));
            Ok(())
        });
        let window = deferred_page("<body><script>probe()</script></body>", MemoryFetcher::new());
        window.load(&mut host, &LoadOptions::with_config(config)).unwrap();

        assert_eq!(rec.entries(), vec!["doScroll:false"]);
    }
}
