//! Sandboxed host tools over stdio JSON-RPC.
//!
//! # Examples
//!
//! ```sh
//! # Serve JSON-RPC on stdin/stdout (default)
//! hostkit --config hostkit.toml
//!
//! # Which external programs are installed?
//! hostkit check
//!
//! # One-shot call
//! hostkit call telnet_port_check --args '{"host": "127.0.0.1", "port": 22}'
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use hostkit::prelude::*;
use hostkit::transport::stdio;
use tracing::info;

/// Exit code for invalid invocation arguments.
const EXIT_USAGE: u8 = 2;

/// Sandboxed host-capability tool dispatcher.
#[derive(Parser)]
#[command(name = "hostkit", version)]
struct Cli {
    /// Configuration file. Defaults to ./hostkit.toml when present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Serve newline-delimited JSON-RPC on stdin/stdout (default).
    Serve,
    /// Report missing external programs and the tools they disable.
    Check,
    /// List the tool registry by backend. `!` marks unavailable tools, `~`
    /// tools with unusable parameters.
    Tools {
        /// Print full descriptors with input schemas as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Run a single tool call and print the result as JSON.
    Call {
        /// Tool name, e.g. `read_file`.
        tool: String,
        /// Arguments as a JSON object.
        #[arg(long, default_value = "{}")]
        args: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    hostkit::logging::init();

    let config = match Config::load(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Check => check(config).await,
        Command::Tools { json } => tools(config, json).await,
        Command::Call { tool, args } => call(config, &tool, &args).await,
    }
}

async fn serve(config: Config) -> ExitCode {
    let dispatcher = Arc::new(Dispatcher::new(config.policy).await);
    info!(
        "hostkit {} serving {} tools on stdio",
        env!("CARGO_PKG_VERSION"),
        dispatcher.registry().len()
    );
    match stdio::serve(dispatcher, tokio::io::stdin(), tokio::io::stdout()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: stdio transport failed: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn check(config: Config) -> ExitCode {
    let dispatcher = Dispatcher::new(config.policy).await;
    println!("Programs:");
    for (program, location) in dispatcher.availability().locations() {
        match location {
            Some(path) => println!("  {program:<12} {}", path.display()),
            None => println!("  {program:<12} MISSING"),
        }
    }

    let health = dispatcher.health();
    if !health.limited.is_empty() {
        println!("\nLimited tools:");
        for entry in &health.limited {
            for unusable in &entry.unusable_params {
                println!(
                    "  {:<20} {} auth unavailable, needs {}",
                    entry.tool, unusable.param, unusable.missing
                );
            }
        }
    }
    if health.unavailable.is_empty() {
        println!("\nAll {} tools available.", health.tools);
        return ExitCode::SUCCESS;
    }
    println!("\nUnavailable tools:");
    for entry in &health.unavailable {
        println!("  {:<20} needs {}", entry.tool, entry.missing.join(", "));
    }
    ExitCode::FAILURE
}

async fn tools(config: Config, json: bool) -> ExitCode {
    let dispatcher = Dispatcher::new(config.policy).await;
    let listing = dispatcher.list_tools();
    if json {
        match serde_json::to_string_pretty(&listing) {
            Ok(text) => println!("{text}"),
            Err(e) => {
                eprintln!("Error: {e}");
                return ExitCode::FAILURE;
            }
        }
        return ExitCode::SUCCESS;
    }
    for kind in BackendKind::ALL {
        println!("{kind}:");
        for desc in dispatcher.registry().for_backend(kind) {
            let Some(tool) = listing.iter().find(|t| t.name == desc.name.as_str()) else {
                continue;
            };
            let marker = match (tool.available, tool.unusable_params.is_empty()) {
                (false, _) => "!",
                (true, false) => "~",
                (true, true) => " ",
            };
            let summary = tool.description.lines().next().unwrap_or_default();
            println!("{marker} {:<20} {summary}", tool.name);
        }
    }
    ExitCode::SUCCESS
}

async fn call(config: Config, tool: &str, raw_args: &str) -> ExitCode {
    let arguments = match serde_json::from_str::<serde_json::Value>(raw_args) {
        Ok(serde_json::Value::Object(map)) => map,
        Ok(other) => {
            eprintln!("Error: --args must be a JSON object, got {other}");
            return ExitCode::from(EXIT_USAGE);
        }
        Err(e) => {
            eprintln!("Error: --args is not valid JSON: {e}");
            return ExitCode::from(EXIT_USAGE);
        }
    };

    let dispatcher = Dispatcher::new(config.policy).await;
    let result = dispatcher.invoke(ToolRequest::new(tool, arguments)).await;
    match serde_json::to_string_pretty(&result) {
        Ok(text) => println!("{text}"),
        Err(e) => eprintln!("Error: {e}"),
    }

    match result.error.as_ref().map(|e| e.class) {
        None => ExitCode::SUCCESS,
        Some(ErrorClass::Validation) => ExitCode::from(EXIT_USAGE),
        Some(ErrorClass::Execution) => ExitCode::FAILURE,
    }
}
