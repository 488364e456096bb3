//! Tool vocabulary: names, descriptors, arguments and results.
//!
//! # Submodules
//!
//! - [`names`]: [`ToolName`] and [`BackendKind`], the closed set of tools.
//! - [`spec`]: [`ToolDescriptor`] builder with typed parameters and policy
//!   constraints; renders JSON input schemas.
//! - [`registry`]: [`Registry`], the descriptor table built at startup.
//! - [`args`]: [`NormalizedArgs`], the validated form backends consume.
//! - [`result`]: [`ExecutionResult`], [`ToolError`] and typed [`Output`]
//!   payloads.
//! - [`reflection`]: recovery hints attached to failures.

pub mod args;
pub mod names;
pub mod reflection;
pub mod registry;
pub mod result;
pub mod spec;

pub use args::{ArgValue, NormalizedArgs};
pub use names::{BackendKind, ToolName};
pub use registry::Registry;
pub use result::{ExecutionResult, Output, Status, ToolError, truncate_result};
pub use spec::{Constraint, ParamSpec, ParamType, PathAccess, ToolDescriptor};
