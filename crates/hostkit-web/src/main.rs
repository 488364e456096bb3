//! Serve the hostkit tools over HTTP.
//!
//! # Usage
//!
//! ```bash
//! cargo run -p hostkit-web
//! cargo run -p hostkit-web -- --config hostkit.toml --bind 0.0.0.0:8080
//! ```
//!
//! ```bash
//! curl -s localhost:8000/health
//! curl -s localhost:8000/call -H 'content-type: application/json' \
//!     -d '{"tool": "list_directory", "arguments": {"directory_path": "."}}'
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use hostkit::prelude::*;
use hostkit_web::{WebConfig, spawn_web};
use tracing::info;

/// HTTP front end for the sandboxed host tools.
#[derive(Parser)]
#[command(name = "hostkit-web", version)]
struct Args {
    /// Configuration file. Defaults to ./hostkit.toml when present.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Address to listen on. Overrides `[http] bind` from the config.
    #[arg(long)]
    bind: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    hostkit::logging::init();

    let config = match Config::load(args.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let web_config = WebConfig {
        bind_addr: args.bind.unwrap_or(config.http.bind),
    };
    let dispatcher = Arc::new(Dispatcher::new(config.policy).await);
    let addr = match spawn_web(dispatcher, web_config).await {
        Ok(addr) => addr,
        Err(e) => {
            eprintln!("Error: cannot listen: {e}");
            return ExitCode::FAILURE;
        }
    };
    println!("hostkit: http://{addr}");

    if let Err(e) = tokio::signal::ctrl_c().await {
        eprintln!("Error: signal handler failed: {e}");
        return ExitCode::FAILURE;
    }
    info!("Shutting down");
    ExitCode::SUCCESS
}
