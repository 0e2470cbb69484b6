//! Deferjs JavaScript Host
//!
//! Runs page scripts in QuickJS. [`QuickJsHost`] implements the engine's
//! `ScriptHost` boundary and exposes the page model to scripts as
//! `document`, `window` and the `fasterize.deferJs` exports.

mod bindings;
mod console;
mod error;
mod host;

pub use bindings::install_bindings;
pub use error::JsError;
pub use host::{CtxHost, QuickJsHost};

/// JavaScript value representation
#[derive(Debug, Clone)]
pub enum JsValue {
    Undefined,
    Null,
    Boolean(bool),
    Number(f64),
    String(String),
    Array(Vec<JsValue>),
    Object,
    Function,
}

impl JsValue {
    /// Check if the value is truthy
    pub fn is_truthy(&self) -> bool {
        match self {
            JsValue::Undefined | JsValue::Null => false,
            JsValue::Boolean(b) => *b,
            JsValue::Number(n) => *n != 0.0 && !n.is_nan(),
            JsValue::String(s) => !s.is_empty(),
            JsValue::Array(_) | JsValue::Object | JsValue::Function => true,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            JsValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            JsValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            JsValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }
}

/// Convert a QuickJS value to a JsValue
pub(crate) fn convert_value(value: &rquickjs::Value) -> JsValue {
    use rquickjs::Type;

    match value.type_of() {
        Type::Undefined => JsValue::Undefined,
        Type::Null => JsValue::Null,
        Type::Bool => value
            .as_bool()
            .map(JsValue::Boolean)
            .unwrap_or(JsValue::Undefined),
        Type::Int => value
            .as_int()
            .map(|n| JsValue::Number(n as f64))
            .unwrap_or(JsValue::Undefined),
        Type::Float => value
            .as_float()
            .map(JsValue::Number)
            .unwrap_or(JsValue::Undefined),
        Type::String => value
            .as_string()
            .and_then(|s| s.to_string().ok())
            .map(JsValue::String)
            .unwrap_or(JsValue::Undefined),
        Type::Array => match value.as_array() {
            Some(arr) => JsValue::Array(
                arr.iter::<rquickjs::Value>()
                    .filter_map(|r| r.ok())
                    .map(|v| convert_value(&v))
                    .collect(),
            ),
            None => JsValue::Array(vec![]),
        },
        Type::Object => JsValue::Object,
        Type::Function => JsValue::Function,
        _ => JsValue::Undefined,
    }
}
