//! Console API implementation
//!
//! Provides console.log, console.warn, console.error, etc. Output goes to
//! the `log` facade under the `js` target; stdout belongs to the runner.

use rquickjs::function::Rest;
use rquickjs::{Coerced, Ctx, Function, Object, Result};

fn join(args: Rest<Coerced<String>>) -> String {
    args.0
        .into_iter()
        .map(|arg| arg.0)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Register the console object in the global scope
pub fn register_console(ctx: &Ctx<'_>) -> Result<()> {
    let globals = ctx.globals();

    let console = Object::new(ctx.clone())?;

    console.set(
        "log",
        Function::new(ctx.clone(), |args: Rest<Coerced<String>>| {
            log::info!(target: "js", "{}", join(args));
        })?,
    )?;

    console.set(
        "warn",
        Function::new(ctx.clone(), |args: Rest<Coerced<String>>| {
            log::warn!(target: "js", "{}", join(args));
        })?,
    )?;

    console.set(
        "error",
        Function::new(ctx.clone(), |args: Rest<Coerced<String>>| {
            log::error!(target: "js", "{}", join(args));
        })?,
    )?;

    // console.info (alias for log)
    console.set(
        "info",
        Function::new(ctx.clone(), |args: Rest<Coerced<String>>| {
            log::info!(target: "js", "{}", join(args));
        })?,
    )?;

    console.set(
        "debug",
        Function::new(ctx.clone(), |args: Rest<Coerced<String>>| {
            log::debug!(target: "js", "{}", join(args));
        })?,
    )?;

    globals.set("console", console)?;

    Ok(())
}
