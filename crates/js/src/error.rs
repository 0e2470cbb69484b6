//! JavaScript error types

use deferjs_engine::DeferError;
use rquickjs::{Coerced, Ctx};
use thiserror::Error;

/// JavaScript runtime error
#[derive(Debug, Error)]
pub enum JsError {
    #[error("JavaScript error: {message}")]
    Runtime {
        message: String,
        stack: Option<String>,
    },

    #[error("QuickJS error: {0}")]
    QuickJs(String),

    #[error(transparent)]
    Page(#[from] DeferError),
}

impl JsError {
    pub fn runtime(message: impl Into<String>) -> Self {
        Self::Runtime {
            message: message.into(),
            stack: None,
        }
    }

    pub fn with_stack(message: impl Into<String>, stack: impl Into<String>) -> Self {
        Self::Runtime {
            message: message.into(),
            stack: Some(stack.into()),
        }
    }

    /// Convert a failed QuickJS call, taking the pending exception if it
    /// was one
    pub(crate) fn caught(ctx: &Ctx<'_>, err: rquickjs::Error) -> Self {
        if !err.is_exception() {
            return err.into();
        }
        let caught = ctx.catch();
        let stack = caught.as_exception().and_then(|e| e.stack());
        let message = describe_value(&caught);
        match stack {
            Some(stack) => Self::with_stack(message, stack),
            None => Self::runtime(message),
        }
    }
}

impl From<rquickjs::Error> for JsError {
    fn from(err: rquickjs::Error) -> Self {
        Self::QuickJs(err.to_string())
    }
}

/// Message of a failed call the way an uncaught error is reported:
/// `Name: message` for errors, the string form of anything else thrown
pub(crate) fn exception_message(ctx: &Ctx<'_>, err: rquickjs::Error) -> String {
    if !err.is_exception() {
        return err.to_string();
    }
    describe_value(&ctx.catch())
}

fn describe_value(value: &rquickjs::Value<'_>) -> String {
    if let Some(exception) = value.as_exception() {
        let name = exception
            .get::<_, String>("name")
            .unwrap_or_else(|_| "Error".to_string());
        return match exception.message() {
            Some(message) if !message.is_empty() => format!("{}: {}", name, message),
            _ => name,
        };
    }
    value
        .get::<Coerced<String>>()
        .map(|s| s.0)
        .unwrap_or_else(|_| "exception".to_string())
}
