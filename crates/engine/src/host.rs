//! The boundary to whatever actually runs JavaScript.
//!
//! The engine never evaluates code itself. It hands sources, callbacks and
//! handler bodies to a [`ScriptHost`]; [`RustHost`] implements that boundary
//! with Rust closures standing in for page scripts.

use std::rc::Rc;

use deferjs_dom::NodeId;
use log::debug;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::error::ScriptError;
use crate::events::{CallbackId, Event, EventTarget};
use crate::window::Window;

/// A script about to run in the global scope
#[derive(Debug, Clone, Copy)]
pub struct ScriptSource<'a> {
    pub code: &'a str,
    /// Where an external script came from
    pub url: Option<&'a str>,
    /// The element being executed
    pub element: Option<NodeId>,
}

impl<'a> ScriptSource<'a> {
    pub fn inline(code: &'a str, element: Option<NodeId>) -> Self {
        Self {
            code,
            url: None,
            element,
        }
    }
}

/// Script execution services the page model needs
pub trait ScriptHost {
    /// Evaluate code in the global scope
    fn evaluate(&mut self, window: &Window, source: &ScriptSource<'_>) -> Result<(), ScriptError>;

    /// Call a registered function with `this` bound to `this`
    fn invoke(
        &mut self,
        window: &Window,
        callback: CallbackId,
        this: EventTarget,
        event: Option<&Event>,
    ) -> Result<(), ScriptError>;

    /// Compile an attribute handler body into a callable function
    fn compile_handler(&mut self, window: &Window, body: &str) -> Result<CallbackId, ScriptError>;

    /// Read a numeric global, if it is defined and numeric
    fn global_number(&mut self, window: &Window, name: &str) -> Option<f64>;

    fn set_global_number(&mut self, window: &Window, name: &str, value: f64);

    /// Whether the global `name` currently resolves to an element (IE
    /// exposes elements with an id as globals)
    fn has_element_global(&mut self, _window: &Window, _name: &str) -> bool {
        false
    }
}

/// A page script written in Rust
pub type ScriptFn = Rc<dyn Fn(&Window, &mut RustHost) -> Result<(), ScriptError>>;

/// A listener or handler written in Rust
pub type CallbackFn =
    Rc<dyn Fn(&Window, &mut RustHost, EventTarget, Option<&Event>) -> Result<(), ScriptError>>;

/// [`ScriptHost`] whose scripts are Rust closures.
///
/// Inline scripts and handler bodies are looked up by their trimmed source
/// text; sources nobody defined evaluate to nothing. Every evaluation is
/// recorded in order.
#[derive(Default)]
pub struct RustHost {
    scripts: FxHashMap<String, ScriptFn>,
    handler_bodies: FxHashMap<String, CallbackFn>,
    callbacks: Vec<CallbackFn>,
    globals: FxHashMap<String, f64>,
    element_globals: FxHashSet<String>,
    evaluated: Vec<String>,
}

impl RustHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Define what evaluating `code` does
    pub fn define_script(
        &mut self,
        code: &str,
        script: impl Fn(&Window, &mut RustHost) -> Result<(), ScriptError> + 'static,
    ) {
        self.scripts.insert(code.trim().to_string(), Rc::new(script));
    }

    /// Define what compiling the handler `body` yields
    pub fn define_handler(
        &mut self,
        body: &str,
        handler: impl Fn(&Window, &mut RustHost, EventTarget, Option<&Event>) -> Result<(), ScriptError>
            + 'static,
    ) {
        self.handler_bodies
            .insert(body.trim().to_string(), Rc::new(handler));
    }

    /// Register a function that page code can pass around
    pub fn callback(
        &mut self,
        callback: impl Fn(&Window, &mut RustHost, EventTarget, Option<&Event>) -> Result<(), ScriptError>
            + 'static,
    ) -> CallbackId {
        self.push_callback(Rc::new(callback))
    }

    fn push_callback(&mut self, callback: CallbackFn) -> CallbackId {
        self.callbacks.push(callback);
        CallbackId(self.callbacks.len() as u64 - 1)
    }

    pub fn set_global(&mut self, name: &str, value: f64) {
        self.globals.insert(name.to_string(), value);
    }

    pub fn global(&self, name: &str) -> Option<f64> {
        self.globals.get(name).copied()
    }

    /// Make `name` resolve to an element, as IE does for ids
    pub fn declare_element_global(&mut self, name: &str) {
        self.element_globals.insert(name.to_string());
    }

    /// Trimmed sources evaluated so far
    pub fn evaluated(&self) -> &[String] {
        &self.evaluated
    }
}

impl ScriptHost for RustHost {
    fn evaluate(&mut self, window: &Window, source: &ScriptSource<'_>) -> Result<(), ScriptError> {
        let key = source.code.trim();
        self.evaluated.push(key.to_string());
        match self.scripts.get(key).cloned() {
            Some(script) => script(window, self),
            None => {
                debug!("No script defined for {:?}", key);
                Ok(())
            }
        }
    }

    fn invoke(
        &mut self,
        window: &Window,
        callback: CallbackId,
        this: EventTarget,
        event: Option<&Event>,
    ) -> Result<(), ScriptError> {
        let function = self
            .callbacks
            .get(callback.0 as usize)
            .cloned()
            .ok_or(ScriptError::UnknownCallback(callback.0))?;
        function(window, self, this, event)
    }

    fn compile_handler(&mut self, _window: &Window, body: &str) -> Result<CallbackId, ScriptError> {
        let handler = self
            .handler_bodies
            .get(body.trim())
            .cloned()
            .ok_or_else(|| ScriptError::Compile(body.to_string()))?;
        Ok(self.push_callback(handler))
    }

    fn global_number(&mut self, _window: &Window, name: &str) -> Option<f64> {
        self.global(name)
    }

    fn set_global_number(&mut self, _window: &Window, name: &str, value: f64) {
        self.set_global(name, value);
    }

    fn has_element_global(&mut self, _window: &Window, name: &str) -> bool {
        self.element_globals.contains(name)
    }
}
