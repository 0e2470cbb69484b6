//! deferjs - run a page's scripts natively or deferred
//!
//! Usage: deferjs [OPTIONS] <PATH>

use std::env;
use std::fs;
use std::path::Path;
use std::process::ExitCode;

use log::info;
use serde::Serialize;
use url::Url;

use deferjs_engine::{defer_document, markers, DeferConfig, LoadOptions, Window};
use deferjs_js::{JsValue, QuickJsHost};
use deferjs_net::Loader;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, PartialEq)]
enum Command {
    Help,
    Version,
    Run(RunOptions),
}

#[derive(Debug, Clone, PartialEq)]
struct RunOptions {
    path: String,
    native: bool,
    ie_version: Option<f32>,
    json: bool,
}

/// What a page did while loading
#[derive(Debug, Serialize)]
struct PageReport {
    /// `window.output` once the page settled
    output: Option<String>,
    errors: Vec<String>,
    requests: Vec<String>,
    failed_requests: Vec<String>,
    /// Engine log lines, empty for native runs
    logs: Vec<String>,
    scripts_done: bool,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .init();

    let args: Vec<String> = env::args().collect();
    let program = args.first().map(String::as_str).unwrap_or("deferjs");

    match parse_args(&args[1.min(args.len())..]) {
        Ok(Command::Help) => {
            print_usage(program);
            ExitCode::SUCCESS
        }
        Ok(Command::Version) => {
            println!("deferjs {}", VERSION);
            ExitCode::SUCCESS
        }
        Ok(Command::Run(options)) => match run(&options) {
            Ok(report) => {
                print_report(&report, options.json);
                if report.errors.is_empty() {
                    ExitCode::SUCCESS
                } else {
                    ExitCode::FAILURE
                }
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                ExitCode::FAILURE
            }
        },
        Err(e) => {
            eprintln!("Error: {}", e);
            print_usage(program);
            ExitCode::FAILURE
        }
    }
}

fn parse_args(args: &[String]) -> Result<Command, String> {
    let mut path = None;
    let mut native = false;
    let mut ie_version = None;
    let mut json = false;

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--help" | "-h" => return Ok(Command::Help),
            "--version" | "-V" => return Ok(Command::Version),
            "--native" => native = true,
            "--json" => json = true,
            "--ie" => {
                let version = iter.next().ok_or("--ie needs a document mode")?;
                let version: f32 = version
                    .parse()
                    .map_err(|_| format!("Invalid IE version: {}", version))?;
                ie_version = Some(version);
            }
            flag if flag.starts_with('-') => return Err(format!("Unknown option: {}", flag)),
            file => {
                if path.replace(file.to_string()).is_some() {
                    return Err("Only one page can be run at a time".to_string());
                }
            }
        }
    }

    let path = path.ok_or("No page given")?;
    Ok(Command::Run(RunOptions {
        path,
        native,
        ie_version,
        json,
    }))
}

fn print_usage(program: &str) {
    println!(
        r#"deferjs {} - deferred JavaScript execution

USAGE:
    {} [OPTIONS] <PATH>

OPTIONS:
    -h, --help        Print this help message
    -V, --version     Print version information
    --native          Run scripts the way the browser would, without deferral
    --ie <VERSION>    Emulate Internet Explorer in the given document mode
    --json            Print the page report as JSON

EXAMPLES:
    {} pages/blog.html
    {} --native pages/blog.html
    {} --ie 8 --json pages/blog.html
"#,
        VERSION, program, program, program, program
    );
}

/// Load the page at `options.path` and collect what happened
fn run(options: &RunOptions) -> Result<PageReport, Box<dyn std::error::Error>> {
    let path = Path::new(&options.path);
    let html = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read {}: {}", options.path, e))?;
    let absolute = fs::canonicalize(path)?;
    let base = Url::from_file_path(&absolute)
        .map_err(|_| format!("Cannot build a file URL for {}", absolute.display()))?;

    let window = Window::parse(&html, base, Box::new(Loader::new()?))?;

    let load_options = if options.native {
        LoadOptions::native()
    } else {
        let deferred = defer_document(&mut window.dom_mut(), markers::SCRIPT_TYPE, markers::NOT_PROCESSED)?;
        info!("Deferred {} scripts", deferred.len());
        let config = match options.ie_version {
            Some(version) => DeferConfig::legacy_ie(version),
            None => DeferConfig::default(),
        };
        LoadOptions::with_config(config)
    };

    let mut host = QuickJsHost::new()?;
    host.attach(&window)?;
    window.load(&mut host, &load_options)?;

    let output = match host.eval("window.output")? {
        JsValue::Undefined | JsValue::Null => None,
        JsValue::String(s) => Some(s),
        JsValue::Number(n) => Some(n.to_string()),
        JsValue::Boolean(b) => Some(b.to_string()),
        _ => host
            .eval("String(window.output)")?
            .as_str()
            .map(String::from),
    };

    let defer = window.defer();
    Ok(PageReport {
        output,
        errors: window.errors(),
        requests: window.requests(),
        failed_requests: window.failed_requests(),
        logs: defer.map(|d| d.logs()).unwrap_or_default(),
        scripts_done: defer.map(|d| d.scripts_are_done()).unwrap_or(true),
    })
}

fn print_report(report: &PageReport, json: bool) {
    if json {
        match serde_json::to_string_pretty(report) {
            Ok(text) => println!("{}", text),
            Err(e) => eprintln!("Error: {}", e),
        }
        return;
    }

    println!("=== Output ===\n");
    println!("{}", report.output.as_deref().unwrap_or("(none)"));

    println!("\n=== Requests ===");
    for url in &report.requests {
        let status = if report.failed_requests.contains(url) {
            "failed"
        } else {
            "ok"
        };
        println!("{} [{}]", url, status);
    }

    if !report.errors.is_empty() {
        println!("\n=== Errors ===");
        for error in &report.errors {
            println!("{}", error);
        }
    }

    if !report.logs.is_empty() {
        println!("\n=== Engine log ===");
        for line in &report.logs {
            println!("{}", line);
        }
    }

    println!("\nScripts done: {}", report.scripts_done);
}
