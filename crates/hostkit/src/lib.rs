//! Sandboxed host-capability tool dispatcher.
//!
//! `hostkit` exposes a fixed set of sixteen host tools (local files, network
//! scanning, SSH, FTP and raw TCP probes) to remote callers such as LLM
//! agents. Every request passes a validation and sandbox layer before any
//! backend runs, and every outcome comes back as one normalized
//! [`ExecutionResult`](tools::result::ExecutionResult).
//!
//! # Getting started
//!
//! ```ignore
//! use hostkit::prelude::*;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), ConfigError> {
//!     let config = Config::load(None)?;
//!     let dispatcher = Dispatcher::new(config.policy).await;
//!
//!     let result = dispatcher
//!         .call("read_file", json!({"file_path": "README.md", "end_line": 5}))
//!         .await;
//!     println!("{}", result.render_text());
//!     Ok(())
//! }
//! ```
//!
//! # Where to find things
//!
//! - **The tool table:** [`tools::registry`] builds one
//!   [`ToolDescriptor`](tools::spec::ToolDescriptor) per
//!   [`ToolName`](tools::names::ToolName), with typed parameters and the
//!   policy constraint each one is checked against.
//!
//! - **What gets rejected and why:** [`sandbox::Validator`] coerces raw JSON
//!   arguments, applies defaults and enforces path containment, numeric
//!   bounds, host and port syntax and the command denylist.
//!
//! - **What actually runs:** [`backends`] holds one
//!   [`Backend`](backends::Backend) per capability domain. External programs
//!   all go through [`backends::exec::run`], which owns deadlines and
//!   process cleanup.
//!
//! - **Putting it together:** [`dispatch::Dispatcher`] validates, routes,
//!   times and reports. Transports ([`transport::stdio`] here, the
//!   `hostkit-web` crate for HTTP) are thin adapters around it.
//!
//! - **Limits and roots:** [`config`] reads `hostkit.toml` into a
//!   [`SandboxPolicy`](config::SandboxPolicy).
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`tools`] | Tool names, descriptors, normalized arguments, results, recovery hints |
//! | [`sandbox`] | Validator, path containment, denylists, network syntax |
//! | [`backends`] | File, scan, remote shell, transfer and probe backends; the exec primitive |
//! | [`dispatch`] | [`Dispatcher`](dispatch::Dispatcher), tool listing, health |
//! | [`transport`] | Newline-delimited JSON-RPC over stdio |
//! | [`config`] | TOML configuration and the sandbox policy |
//! | [`error`] | Error kinds and the `Rejection` / `ExecError` / `ConfigError` enums |
//!
//! # Safety model
//!
//! The sandbox roots and numeric limits are enforced. The command denylist
//! is a usability safeguard against obvious accidents, not a security
//! boundary: a determined caller with `ssh_execute` access can run anything
//! the remote account can.

pub mod backends;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod logging;
pub mod prelude;
pub mod sandbox;
pub mod tools;
pub mod transport;

use schemars::JsonSchema;

// Re-export schemars for downstream crates.
pub use schemars;

// ── Schema generation ──────────────────────────────────────────────

/// Generate a JSON Schema `serde_json::Value` from a type that implements
/// `schemars::JsonSchema`.
///
/// # Example
///
/// ```
/// use hostkit::json_schema_for;
/// use schemars::JsonSchema;
/// use serde::Deserialize;
///
/// #[derive(Deserialize, JsonSchema)]
/// struct ProbeArgs {
///     host: String,
///     #[serde(default)]
///     port: Option<u16>,
/// }
///
/// let schema = json_schema_for::<ProbeArgs>();
/// assert_eq!(schema["type"], "object");
/// assert!(schema["required"].as_array().unwrap().contains(&"host".into()));
/// ```
pub fn json_schema_for<T: JsonSchema>() -> serde_json::Value {
    let schema = schemars::schema_for!(T);
    serde_json::to_value(schema)
        .unwrap_or_else(|_| serde_json::json!({"type": "object", "properties": {}}))
}
