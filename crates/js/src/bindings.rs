//! DOM bindings.
//!
//! Native functions deal in node ids, numbers and strings; the prelude
//! script wraps them into `document`, `window` and node objects. Every
//! primitive goes through [`Window`], so the deferral engine sees page code
//! the way it would see it in a browser.

use deferjs_dom::{NodeId, NodeType};
use deferjs_engine::{CallbackId, DeferError, EventTarget, ScriptError, Window};
use rquickjs::{Ctx, Exception, Function, Object, Result};

use crate::host::CtxHost;

/// Node id meaning "no node" on the JavaScript side
const NO_NODE: i32 = -1;

const KIND_WINDOW: i32 = 0;
const KIND_DOCUMENT: i32 = 1;
const KIND_ELEMENT: i32 = 2;

fn node(id: i32) -> NodeId {
    NodeId::new(id as u32)
}

fn node_ref(node: Option<NodeId>) -> i32 {
    node.map(|n| n.as_u32() as i32).unwrap_or(NO_NODE)
}

fn node_refs(nodes: Vec<NodeId>) -> Vec<i32> {
    nodes.into_iter().map(|n| n.as_u32() as i32).collect()
}

fn optional_node(id: i32) -> Option<NodeId> {
    (id >= 0).then(|| node(id))
}

fn target(kind: i32, id: i32) -> EventTarget {
    match kind {
        KIND_WINDOW => EventTarget::Window,
        KIND_DOCUMENT => EventTarget::Document,
        _ => EventTarget::Element(node(id)),
    }
}

/// `(kind, node)` pair the prelude understands
pub(crate) fn target_ref(target: EventTarget) -> (i32, i32) {
    match target {
        EventTarget::Window => (KIND_WINDOW, NO_NODE),
        EventTarget::Document => (KIND_DOCUMENT, NO_NODE),
        EventTarget::Element(id) => (KIND_ELEMENT, id.as_u32() as i32),
    }
}

fn optional_position(position: i32) -> Option<usize> {
    (position >= 0).then_some(position as usize)
}

fn throw(ctx: &Ctx<'_>, err: DeferError) -> rquickjs::Error {
    Exception::throw_message(ctx, &err.to_string())
}

/// Install `document`, `window` and the `fasterize` exports for `window`
pub fn install_bindings<'js>(ctx: &Ctx<'js>, window: &Window) -> Result<()> {
    let native = Object::new(ctx.clone())?;

    // ---- lookups ----------------------------------------------------------

    let w = window.clone();
    native.set(
        "getElementById",
        Function::new(ctx.clone(), move |id: String| -> i32 {
            node_ref(w.get_element_by_id(&id))
        })?,
    )?;

    let w = window.clone();
    native.set(
        "getElementsByTagName",
        Function::new(ctx.clone(), move |tag: String| -> Vec<i32> {
            node_refs(w.get_elements_by_tag_name(&tag))
        })?,
    )?;

    let w = window.clone();
    native.set(
        "allElements",
        Function::new(ctx.clone(), move || -> Vec<i32> {
            node_refs(w.dom().elements_where(|_| true))
        })?,
    )?;

    let w = window.clone();
    native.set(
        "body",
        Function::new(ctx.clone(), move || -> i32 { node_ref(w.body()) })?,
    )?;

    let w = window.clone();
    native.set(
        "documentElement",
        Function::new(ctx.clone(), move || -> i32 {
            node_ref(w.dom().document_element())
        })?,
    )?;

    // ---- node creation and inspection ---------------------------------------

    let w = window.clone();
    native.set(
        "createElement",
        Function::new(ctx.clone(), move |tag: String| -> i32 {
            w.create_element(&tag).as_u32() as i32
        })?,
    )?;

    let w = window.clone();
    native.set(
        "createTextNode",
        Function::new(ctx.clone(), move |text: String| -> i32 {
            w.create_text_node(&text).as_u32() as i32
        })?,
    )?;

    let w = window.clone();
    native.set(
        "nodeType",
        Function::new(ctx.clone(), move |id: i32| -> i32 {
            let dom = w.dom();
            let node_type = match dom.get(node(id)).map(|n| &n.node_type) {
                Some(NodeType::Element(_)) => 1,
                Some(NodeType::Text(_)) => 3,
                Some(NodeType::Comment(_)) => 8,
                Some(NodeType::Document) => 9,
                Some(NodeType::Doctype { .. }) => 10,
                None => 0,
            };
            node_type
        })?,
    )?;

    let w = window.clone();
    native.set(
        "tagName",
        Function::new(ctx.clone(), move |id: i32| -> String {
            w.dom()
                .tag_name(node(id))
                .map(|t| t.to_uppercase())
                .unwrap_or_default()
        })?,
    )?;

    let w = window.clone();
    native.set(
        "getAttribute",
        Function::new(ctx.clone(), move |id: i32, name: String| -> Option<String> {
            w.attribute(node(id), &name.to_ascii_lowercase())
        })?,
    )?;

    let w = window.clone();
    native.set(
        "setAttribute",
        Function::new(
            ctx.clone(),
            move |ctx: Ctx<'js>, id: i32, name: String, value: String| -> Result<()> {
                w.set_attribute(node(id), &name.to_ascii_lowercase(), &value)
                    .map_err(|e| throw(&ctx, e))
            },
        )?,
    )?;

    let w = window.clone();
    native.set(
        "removeAttribute",
        Function::new(ctx.clone(), move |id: i32, name: String| {
            w.remove_attribute(node(id), &name.to_ascii_lowercase());
        })?,
    )?;

    let w = window.clone();
    native.set(
        "textContent",
        Function::new(ctx.clone(), move |id: i32| -> String { w.text_content(node(id)) })?,
    )?;

    let w = window.clone();
    native.set(
        "setTextContent",
        Function::new(ctx.clone(), move |ctx: Ctx<'js>, id: i32, text: String| -> Result<()> {
            w.set_text(node(id), &text).map_err(|e| throw(&ctx, e))
        })?,
    )?;

    // ---- tree ----------------------------------------------------------------

    let w = window.clone();
    native.set(
        "parent",
        Function::new(ctx.clone(), move |id: i32| -> i32 { node_ref(w.parent_node(node(id))) })?,
    )?;

    let w = window.clone();
    native.set(
        "children",
        Function::new(ctx.clone(), move |id: i32| -> Vec<i32> {
            node_refs(w.dom().children(node(id)))
        })?,
    )?;

    let w = window.clone();
    native.set(
        "nextSibling",
        Function::new(ctx.clone(), move |id: i32| -> i32 {
            node_ref(w.dom().next_sibling(node(id)))
        })?,
    )?;

    let w = window.clone();
    native.set(
        "appendChild",
        Function::new(ctx.clone(), move |ctx: Ctx<'js>, parent: i32, child: i32| -> Result<()> {
            let mut host = CtxHost::new(ctx.clone());
            w.append_child(&mut host, node(parent), node(child))
                .map_err(|e| throw(&ctx, e))
        })?,
    )?;

    let w = window.clone();
    native.set(
        "insertBefore",
        Function::new(
            ctx.clone(),
            move |ctx: Ctx<'js>, parent: i32, child: i32, reference: i32| -> Result<()> {
                let mut host = CtxHost::new(ctx.clone());
                w.insert_before(&mut host, node(parent), node(child), optional_node(reference))
                    .map_err(|e| throw(&ctx, e))
            },
        )?,
    )?;

    let w = window.clone();
    native.set(
        "removeChild",
        Function::new(ctx.clone(), move |ctx: Ctx<'js>, parent: i32, child: i32| -> Result<()> {
            w.remove_child(node(parent), node(child))
                .map_err(|e| throw(&ctx, e))
        })?,
    )?;

    // ---- document --------------------------------------------------------------

    let w = window.clone();
    native.set(
        "write",
        Function::new(ctx.clone(), move |ctx: Ctx<'js>, html: String| -> Result<()> {
            let mut host = CtxHost::new(ctx.clone());
            w.write(&mut host, &html).map_err(|e| throw(&ctx, e))
        })?,
    )?;

    let w = window.clone();
    native.set(
        "writeln",
        Function::new(ctx.clone(), move |ctx: Ctx<'js>, html: String| -> Result<()> {
            let mut host = CtxHost::new(ctx.clone());
            w.writeln(&mut host, &html).map_err(|e| throw(&ctx, e))
        })?,
    )?;

    let w = window.clone();
    native.set("open", Function::new(ctx.clone(), move || w.open())?)?;

    let w = window.clone();
    native.set("close", Function::new(ctx.clone(), move || w.close())?)?;

    let w = window.clone();
    native.set(
        "readyState",
        Function::new(ctx.clone(), move || -> String { w.ready_state().to_string() })?,
    )?;

    let w = window.clone();
    native.set(
        "documentAllHidden",
        Function::new(ctx.clone(), move || -> bool { w.document_all_hidden() })?,
    )?;

    let w = window.clone();
    native.set(
        "doScroll",
        Function::new(ctx.clone(), move |ctx: Ctx<'js>| -> Result<()> {
            w.do_scroll().map_err(|e| {
                let message = match e {
                    ScriptError::Uncaught(message) => message,
                    other => other.to_string(),
                };
                Exception::throw_message(&ctx, &message)
            })
        })?,
    )?;

    // ---- events and timers --------------------------------------------------------

    let w = window.clone();
    native.set(
        "addEventListener",
        Function::new(ctx.clone(), move |kind: i32, id: i32, event_type: String, callback: u32| {
            w.add_event_listener(target(kind, id), &event_type, CallbackId(callback as u64));
        })?,
    )?;

    let w = window.clone();
    native.set(
        "attachEvent",
        Function::new(ctx.clone(), move |kind: i32, id: i32, event_name: String, callback: u32| {
            w.attach_event(target(kind, id), &event_name, CallbackId(callback as u64));
        })?,
    )?;

    let w = window.clone();
    native.set(
        "setHandler",
        Function::new(ctx.clone(), move |kind: i32, id: i32, event_type: String, callback: i32| {
            let handler = (callback >= 0).then(|| CallbackId(callback as u64));
            w.set_handler(target(kind, id), &event_type, handler);
        })?,
    )?;

    let w = window.clone();
    native.set(
        "handler",
        Function::new(ctx.clone(), move |kind: i32, id: i32, event_type: String| -> i32 {
            w.handler(target(kind, id), &event_type)
                .map(|c| c.0 as i32)
                .unwrap_or(-1)
        })?,
    )?;

    let w = window.clone();
    native.set(
        "setTimeout",
        Function::new(ctx.clone(), move |callback: u32, delay: f64| -> u32 {
            let delay = if delay.is_finite() && delay > 0.0 { delay as u64 } else { 0 };
            w.set_timeout(CallbackId(callback as u64), delay) as u32
        })?,
    )?;

    let w = window.clone();
    native.set(
        "clearTimeout",
        Function::new(ctx.clone(), move |id: u32| -> bool { w.clear_timeout(id as u64) })?,
    )?;

    // ---- deferred execution exports ---------------------------------------------------

    let w = window.clone();
    native.set(
        "deferStart",
        Function::new(ctx.clone(), move |ctx: Ctx<'js>| {
            if let Some(defer) = w.defer() {
                defer.start(&w, &mut CtxHost::new(ctx));
            }
        })?,
    )?;

    let w = window.clone();
    native.set(
        "deferExecute",
        Function::new(ctx.clone(), move |ctx: Ctx<'js>| {
            if let Some(defer) = w.defer() {
                defer.execute(&w, &mut CtxHost::new(ctx));
            }
        })?,
    )?;

    let w = window.clone();
    native.set(
        "deferRun",
        Function::new(ctx.clone(), move |ctx: Ctx<'js>| {
            if let Some(defer) = w.defer() {
                defer.run(&w, &mut CtxHost::new(ctx));
            }
        })?,
    )?;

    let w = window.clone();
    native.set(
        "deferRegister",
        Function::new(ctx.clone(), move || {
            if let Some(defer) = w.defer() {
                defer.register_script_tags(&w);
            }
        })?,
    )?;

    let w = window.clone();
    native.set(
        "deferAddStr",
        Function::new(ctx.clone(), move |code: String, position: i32| -> i32 {
            w.defer()
                .map(|d| d.add_str(&code, None, optional_position(position)) as i32)
                .unwrap_or(-1)
        })?,
    )?;

    let w = window.clone();
    native.set(
        "deferAddUrl",
        Function::new(ctx.clone(), move |url: String, position: i32| -> i32 {
            w.defer()
                .map(|d| d.add_url(&url, None, optional_position(position)) as i32)
                .unwrap_or(-1)
        })?,
    )?;

    let w = window.clone();
    native.set(
        "deferDone",
        Function::new(ctx.clone(), move || -> bool {
            w.defer().map(|d| d.scripts_are_done()).unwrap_or(false)
        })?,
    )?;

    let w = window.clone();
    native.set(
        "deferBefore",
        Function::new(ctx.clone(), move |callback: u32| {
            if let Some(defer) = w.defer() {
                defer.add_before_defer_run_functions(&w, CallbackId(callback as u64));
            }
        })?,
    )?;

    let w = window.clone();
    native.set(
        "deferAfter",
        Function::new(ctx.clone(), move |callback: u32| {
            if let Some(defer) = w.defer() {
                defer.add_after_defer_run_functions(&w, CallbackId(callback as u64));
            }
        })?,
    )?;

    let prelude: Function = ctx.eval(PRELUDE)?;
    prelude.call::<_, ()>((native,))?;
    Ok(())
}

/// Builds the page-facing objects on top of the native functions. Nodes
/// are wrapped once per id so identity comparisons hold.
const PRELUDE: &str = r#"
(function (native) {
    var global = globalThis;
    var callbacks = [];
    var nodes = {};

    function register(fn) {
        var known = callbacks.indexOf(fn);
        if (known >= 0) return known;
        callbacks.push(fn);
        return callbacks.length - 1;
    }

    function Node(id) {
        this.__nodeId = id;
    }

    function wrap(id) {
        if (id < 0) return null;
        return nodes[id] || (nodes[id] = new Node(id));
    }

    function wrapAll(ids) {
        return ids.map(wrap);
    }

    function idOf(value) {
        return value && typeof value.__nodeId === 'number' ? value.__nodeId : -1;
    }

    function reflect(name) {
        return {
            get: function () {
                var value = native.getAttribute(this.__nodeId, name);
                return value === undefined ? '' : value;
            },
            set: function (value) {
                native.setAttribute(this.__nodeId, name, String(value));
            }
        };
    }

    function handlerProperty(kind, type) {
        return {
            get: function () {
                var id = native.handler(kind, idOf(this), type);
                return id < 0 ? null : callbacks[id];
            },
            set: function (fn) {
                native.setHandler(kind, idOf(this), type, typeof fn === 'function' ? register(fn) : -1);
            },
            configurable: true
        };
    }

    function listen(kind, id, type, fn) {
        if (typeof fn === 'function') native.addEventListener(kind, id, String(type), register(fn));
    }

    function attach(kind, id, name, fn) {
        if (typeof fn !== 'function') return false;
        native.attachEvent(kind, id, String(name), register(fn));
        return true;
    }

    var text = {
        get: function () { return native.textContent(this.__nodeId); },
        set: function (value) { native.setTextContent(this.__nodeId, String(value)); }
    };

    Object.defineProperties(Node.prototype, {
        nodeType: { get: function () { return native.nodeType(this.__nodeId); } },
        tagName: { get: function () { return native.tagName(this.__nodeId); } },
        nodeName: { get: function () { return native.tagName(this.__nodeId); } },
        id: reflect('id'),
        className: reflect('class'),
        src: reflect('src'),
        type: reflect('type'),
        textContent: text,
        text: text,
        parentNode: { get: function () { return wrap(native.parent(this.__nodeId)); } },
        childNodes: { get: function () { return wrapAll(native.children(this.__nodeId)); } },
        firstChild: {
            get: function () {
                var children = native.children(this.__nodeId);
                return children.length ? wrap(children[0]) : null;
            }
        },
        lastChild: {
            get: function () {
                var children = native.children(this.__nodeId);
                return children.length ? wrap(children[children.length - 1]) : null;
            }
        },
        nextSibling: { get: function () { return wrap(native.nextSibling(this.__nodeId)); } },
        onload: handlerProperty(2, 'load'),
        onerror: handlerProperty(2, 'error')
    });

    Node.prototype.getAttribute = function (name) {
        var value = native.getAttribute(this.__nodeId, String(name));
        return value === undefined ? null : value;
    };
    Node.prototype.hasAttribute = function (name) {
        return native.getAttribute(this.__nodeId, String(name)) !== undefined;
    };
    Node.prototype.setAttribute = function (name, value) {
        native.setAttribute(this.__nodeId, String(name), String(value));
    };
    Node.prototype.removeAttribute = function (name) {
        native.removeAttribute(this.__nodeId, String(name));
    };
    Node.prototype.appendChild = function (child) {
        native.appendChild(this.__nodeId, idOf(child));
        return child;
    };
    Node.prototype.insertBefore = function (child, reference) {
        native.insertBefore(this.__nodeId, idOf(child), idOf(reference));
        return child;
    };
    Node.prototype.removeChild = function (child) {
        native.removeChild(this.__nodeId, idOf(child));
        return child;
    };
    Node.prototype.addEventListener = function (type, fn) {
        listen(2, this.__nodeId, type, fn);
    };
    Node.prototype.attachEvent = function (name, fn) {
        return attach(2, this.__nodeId, name, fn);
    };
    Node.prototype.doScroll = function () {
        native.doScroll();
    };

    var document = {
        getElementById: function (id) { return wrap(native.getElementById(String(id))); },
        getElementsByTagName: function (tag) {
            return wrapAll(native.getElementsByTagName(String(tag).toLowerCase()));
        },
        createElement: function (tag) { return wrap(native.createElement(String(tag).toLowerCase())); },
        createTextNode: function (value) { return wrap(native.createTextNode(String(value))); },
        write: function () { native.write(Array.prototype.join.call(arguments, '')); },
        writeln: function () { native.writeln(Array.prototype.join.call(arguments, '')); },
        open: function () { native.open(); return document; },
        close: function () { native.close(); },
        addEventListener: function (type, fn) { listen(1, -1, type, fn); },
        attachEvent: function (name, fn) { return attach(1, -1, name, fn); },
        querySelector: function (selector) {
            if (selector.charAt(0) === '#') return document.getElementById(selector.slice(1));
            var found = document.getElementsByTagName(selector);
            return found.length > 0 ? found[0] : null;
        }
    };

    Object.defineProperties(document, {
        readyState: { get: function () { return native.readyState(); } },
        body: { get: function () { return wrap(native.body()); } },
        documentElement: { get: function () { return wrap(native.documentElement()); } },
        head: { get: function () { return document.getElementsByTagName('head')[0] || null; } },
        all: {
            get: function () {
                return native.documentAllHidden() ? undefined : wrapAll(native.allElements());
            }
        },
        onreadystatechange: handlerProperty(1, 'readystatechange')
    });

    function targetOf(kind, id) {
        if (kind === 0) return global;
        if (kind === 1) return document;
        return wrap(id);
    }

    global.window = global;
    global.self = global;
    global.document = document;
    global.addEventListener = function (type, fn) { listen(0, -1, type, fn); };
    global.attachEvent = function (name, fn) { return attach(0, -1, name, fn); };
    global.setTimeout = function (fn, delay) {
        if (typeof fn !== 'function') return 0;
        return native.setTimeout(register(fn), Number(delay) || 0);
    };
    global.clearTimeout = function (id) {
        native.clearTimeout(Number(id) || 0);
    };
    Object.defineProperty(global, 'onload', handlerProperty(0, 'load'));

    Object.defineProperty(global, '__deferjs', {
        value: {
            invoke: function (id, kind, node, raw) {
                var fn = callbacks[id];
                if (typeof fn !== 'function') throw new TypeError('callback ' + id + ' is not a function');
                var event;
                if (raw) {
                    var eventTarget = targetOf(raw.targetKind, raw.targetNode);
                    event = {
                        type: raw.type,
                        target: eventTarget,
                        srcElement: eventTarget,
                        currentTarget: targetOf(raw.currentKind, raw.currentNode),
                        bubbles: raw.bubbles,
                        cancelable: raw.cancelable,
                        eventPhase: raw.eventPhase,
                        timeStamp: raw.timeStamp,
                        synthetic: raw.synthetic,
                        preventDefault: function () {},
                        stopPropagation: function () {}
                    };
                }
                fn.call(targetOf(kind, node), event);
            },
            compile: function (body) {
                return register(new Function('event', body));
            }
        }
    });

    global.fasterize = {
        deferJs: {
            start: function () { native.deferStart(); },
            execute: function () { native.deferExecute(); },
            run: function () { native.deferRun(); },
            registerScriptTags: function () { native.deferRegister(); },
            addStr: function (code, position) {
                return native.deferAddStr(String(code), position === undefined ? -1 : position);
            },
            addUrl: function (url, position) {
                return native.deferAddUrl(String(url), position === undefined ? -1 : position);
            },
            scriptsAreDone: function () { return native.deferDone(); },
            addBeforeDeferRunFunctions: function (fn) {
                if (typeof fn === 'function') native.deferBefore(register(fn));
            },
            addAfterDeferRunFunctions: function (fn) {
                if (typeof fn === 'function') native.deferAfter(register(fn));
            }
        },
        deferJsNs: {
            startDeferJs: function () { native.deferStart(); }
        }
    };
})
"#;
