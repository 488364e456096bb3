//! Convenience re-exports for common `hostkit` types.
//!
//! ```ignore
//! use hostkit::prelude::*;
//! ```
//!
//! Pulls in what an embedding program needs: configuration, the
//! dispatcher and its request/response types, and the error enums.
//! Backend internals and the sandbox helpers stay in their modules.

// ── Configuration ───────────────────────────────────────────────────
pub use crate::config::{Config, SandboxPolicy};

// ── Dispatch ────────────────────────────────────────────────────────
pub use crate::dispatch::{Dispatcher, DispatcherBuilder, Health, ToolListing, ToolRequest};

// ── Errors ──────────────────────────────────────────────────────────
pub use crate::error::{ConfigError, ErrorClass, ErrorKind, ExecError, Rejection};

// ── Tools ───────────────────────────────────────────────────────────
pub use crate::tools::{
    BackendKind, ExecutionResult, NormalizedArgs, Output, Registry, Status, ToolDescriptor,
    ToolError, ToolName,
};

// ── Backends ────────────────────────────────────────────────────────
pub use crate::backends::{Availability, Backend, BackendFuture, CallContext};

pub use crate::json_schema_for;
