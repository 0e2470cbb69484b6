//! [`ScriptHost`] backed by QuickJS.

use deferjs_engine::{CallbackId, Event, EventTarget, ScriptError, ScriptHost, ScriptSource, Window};
use log::{debug, warn};
use rquickjs::context::EvalOptions;
use rquickjs::{Context, Ctx, Function, Object, Runtime, Value};

use crate::bindings::{install_bindings, target_ref};
use crate::console;
use crate::error::{exception_message, JsError};
use crate::{convert_value, JsValue};

/// Script host over a context that is already entered. Native functions
/// build one from the context they are called with, so page code that
/// triggers engine work can be called back into.
pub struct CtxHost<'js> {
    ctx: Ctx<'js>,
}

impl<'js> CtxHost<'js> {
    pub fn new(ctx: Ctx<'js>) -> Self {
        Self { ctx }
    }

    fn uncaught(&self, err: rquickjs::Error) -> ScriptError {
        ScriptError::Uncaught(exception_message(&self.ctx, err))
    }

    fn internal(&self, name: &str) -> rquickjs::Result<Function<'js>> {
        let internals: Object = self.ctx.globals().get("__deferjs")?;
        internals.get(name)
    }

    fn event_object(&self, event: &Event) -> rquickjs::Result<Object<'js>> {
        let object = Object::new(self.ctx.clone())?;
        let (target_kind, target_node) = target_ref(event.target);
        let (current_kind, current_node) = target_ref(event.current_target);
        object.set("type", event.event_type.as_str())?;
        object.set("targetKind", target_kind)?;
        object.set("targetNode", target_node)?;
        object.set("currentKind", current_kind)?;
        object.set("currentNode", current_node)?;
        object.set("bubbles", event.bubbles)?;
        object.set("cancelable", event.cancelable)?;
        object.set("eventPhase", event.event_phase as i32)?;
        object.set("timeStamp", event.time_stamp as f64)?;
        object.set("synthetic", event.synthetic)?;
        Ok(object)
    }
}

impl<'js> ScriptHost for CtxHost<'js> {
    fn evaluate(&mut self, _window: &Window, source: &ScriptSource<'_>) -> Result<(), ScriptError> {
        if let Some(url) = source.url {
            debug!("Evaluating {}", url);
        }
        // Page scripts are sloppy mode
        let mut options = EvalOptions::default();
        options.strict = false;
        self.ctx
            .eval_with_options::<(), _>(source.code, options)
            .map_err(|e| self.uncaught(e))
    }

    fn invoke(
        &mut self,
        _window: &Window,
        callback: CallbackId,
        this: EventTarget,
        event: Option<&Event>,
    ) -> Result<(), ScriptError> {
        let invoke = self.internal("invoke").map_err(|e| self.uncaught(e))?;
        let event = match event {
            Some(event) => Some(self.event_object(event).map_err(|e| self.uncaught(e))?),
            None => None,
        };
        let (kind, node) = target_ref(this);
        invoke
            .call::<_, ()>((callback.0 as u32, kind, node, event))
            .map_err(|e| self.uncaught(e))
    }

    fn compile_handler(&mut self, _window: &Window, body: &str) -> Result<CallbackId, ScriptError> {
        let compile = self.internal("compile").map_err(|e| self.uncaught(e))?;
        compile
            .call::<_, u32>((body,))
            .map(|id| CallbackId(id as u64))
            .map_err(|e| ScriptError::Compile(exception_message(&self.ctx, e)))
    }

    fn global_number(&mut self, _window: &Window, name: &str) -> Option<f64> {
        let value: Value = self.ctx.globals().get(name).ok()?;
        value.as_number()
    }

    fn set_global_number(&mut self, _window: &Window, name: &str, value: f64) {
        if let Err(err) = self.ctx.globals().set(name, value) {
            warn!("Cannot set global {}: {}", name, err);
        }
    }

    fn has_element_global(&mut self, _window: &Window, name: &str) -> bool {
        let value: Value = match self.ctx.globals().get(name) {
            Ok(value) => value,
            Err(_) => return false,
        };
        value
            .into_object()
            .and_then(|object| object.contains_key("__nodeId").ok())
            .unwrap_or(false)
    }
}

/// A QuickJS runtime with the console and, once attached, a page.
///
/// Each host serves a single [`Window`]; attaching installs `document`,
/// `window` and the `fasterize` exports into the global scope.
pub struct QuickJsHost {
    context: Context,
    _runtime: Runtime,
}

impl QuickJsHost {
    pub fn new() -> Result<Self, JsError> {
        let runtime = Runtime::new()?;
        let context = Context::full(&runtime)?;

        context.with(|ctx| console::register_console(&ctx))?;

        Ok(Self {
            context,
            _runtime: runtime,
        })
    }

    /// Expose `window` to page code
    pub fn attach(&self, window: &Window) -> Result<(), JsError> {
        self.context
            .with(|ctx| install_bindings(&ctx, window).map_err(|e| JsError::caught(&ctx, e)))
    }

    /// Evaluate JavaScript code and return the result as a JsValue
    pub fn eval(&self, code: &str) -> Result<JsValue, JsError> {
        self.context.with(|ctx| {
            let result: Value = ctx.eval(code).map_err(|e| JsError::caught(&ctx, e))?;
            Ok(convert_value(&result))
        })
    }

    /// Evaluate JavaScript code without returning a value
    pub fn exec(&self, code: &str) -> Result<(), JsError> {
        self.context.with(|ctx| {
            ctx.eval::<(), _>(code)
                .map_err(|e| JsError::caught(&ctx, e))
        })
    }
}

impl ScriptHost for QuickJsHost {
    fn evaluate(&mut self, window: &Window, source: &ScriptSource<'_>) -> Result<(), ScriptError> {
        self.context
            .with(|ctx| CtxHost::new(ctx).evaluate(window, source))
    }

    fn invoke(
        &mut self,
        window: &Window,
        callback: CallbackId,
        this: EventTarget,
        event: Option<&Event>,
    ) -> Result<(), ScriptError> {
        self.context
            .with(|ctx| CtxHost::new(ctx).invoke(window, callback, this, event))
    }

    fn compile_handler(&mut self, window: &Window, body: &str) -> Result<CallbackId, ScriptError> {
        self.context
            .with(|ctx| CtxHost::new(ctx).compile_handler(window, body))
    }

    fn global_number(&mut self, window: &Window, name: &str) -> Option<f64> {
        self.context
            .with(|ctx| CtxHost::new(ctx).global_number(window, name))
    }

    fn set_global_number(&mut self, window: &Window, name: &str, value: f64) {
        self.context
            .with(|ctx| CtxHost::new(ctx).set_global_number(window, name, value))
    }

    fn has_element_global(&mut self, window: &Window, name: &str) -> bool {
        self.context
            .with(|ctx| CtxHost::new(ctx).has_element_global(window, name))
    }
}
