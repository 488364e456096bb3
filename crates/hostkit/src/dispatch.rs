//! The dispatcher: validate, route, time, report.
//!
//! [`Dispatcher::invoke`] is the single entry point every transport uses.
//! A request is validated against the registry and policy first; only an
//! accepted request reaches a backend. The backend runs under a per-call
//! deadline and whatever happens comes back as an [`ExecutionResult`].

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, trace, warn};

use crate::backends::{self, Availability, Backend, CallContext, ProcessTracker};
use crate::config::SandboxPolicy;
use crate::error::{ErrorKind, ExecError};
use crate::sandbox::Validator;
use crate::tools::names::{BackendKind, ToolName};
use crate::tools::registry::Registry;
use crate::tools::result::{ExecutionResult, ToolError};
use crate::tools::spec::{Constraint, ToolDescriptor};

/// Slack on top of the call budget before the dispatcher abandons a
/// backend that ignored its own deadline.
const DEADLINE_GRACE: Duration = Duration::from_secs(1);

/// One tool invocation as received from a transport.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolRequest {
    pub tool: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl ToolRequest {
    pub fn new(tool: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Self {
            tool: tool.into(),
            arguments,
            request_id: None,
        }
    }

    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }
}

/// A tool as advertised to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolListing {
    pub name: String,
    pub description: String,
    pub backend: BackendKind,
    pub input_schema: Value,
    pub available: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing: Vec<String>,
    /// Parameters that fail every call that supplies them.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unusable_params: Vec<UnusableParam>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnavailableTool {
    pub tool: String,
    pub missing: Vec<String>,
}

/// A parameter whose program is missing, e.g. `password` without `sshpass`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnusableParam {
    pub param: String,
    pub missing: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitedTool {
    pub tool: String,
    pub unusable_params: Vec<UnusableParam>,
}

/// Liveness report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Health {
    /// `ok` when every tool and parameter is usable, `degraded` otherwise.
    pub status: String,
    pub tools: usize,
    pub unavailable: Vec<UnavailableTool>,
    #[serde(default)]
    pub limited: Vec<LimitedTool>,
    pub active_processes: usize,
}

// ── Dispatcher ─────────────────────────────────────────────────────

pub struct Dispatcher {
    registry: Arc<Registry>,
    policy: Arc<SandboxPolicy>,
    validator: Validator,
    backends: BTreeMap<BackendKind, Arc<dyn Backend>>,
    availability: Availability,
    tracker: ProcessTracker,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("tools", &self.registry.len())
            .field("backends", &self.backends.keys().collect::<Vec<_>>())
            .field("active_processes", &self.tracker.active())
            .finish()
    }
}

impl Dispatcher {
    /// Standard backends, with external programs probed on `PATH`.
    pub async fn new(policy: SandboxPolicy) -> Self {
        Self::builder(policy).probe_programs().await.build()
    }

    pub fn builder(policy: SandboxPolicy) -> DispatcherBuilder {
        DispatcherBuilder::new(policy)
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn policy(&self) -> &SandboxPolicy {
        &self.policy
    }

    pub fn availability(&self) -> &Availability {
        &self.availability
    }

    /// Child processes currently alive across all calls.
    pub fn active_processes(&self) -> usize {
        self.tracker.active()
    }

    /// Validate and run one request.
    pub async fn invoke(&self, request: ToolRequest) -> ExecutionResult {
        let ToolRequest {
            tool,
            arguments,
            request_id,
        } = request;
        let start = Instant::now();
        log_tool_call(&tool, &arguments);

        let args = match self.validator.check(&tool, &arguments) {
            Ok(args) => args,
            Err(rejection) => {
                warn!("[tool] {tool} rejected: {rejection}");
                let error = ToolError::from_rejection(&tool, &rejection);
                return ExecutionResult::failure(request_id, tool, error, start.elapsed());
            }
        };

        let name = args.tool();
        let Some(descriptor) = self.registry.get(name) else {
            let error = ToolError::new(&tool, ErrorKind::UnknownTool, format!("unknown tool '{tool}'"));
            return ExecutionResult::failure(request_id, tool, error, start.elapsed());
        };

        if let Some(program) = self.availability.missing_for_call(descriptor, &args).first() {
            warn!("[tool] {tool} unavailable: `{program}` not on PATH");
            let error = ToolError::from_exec(&tool, &ExecError::unavailable(program));
            return ExecutionResult::failure(request_id, tool, error, start.elapsed());
        }

        let Some(backend) = self.backends.get(&descriptor.backend) else {
            let error = ToolError::new(
                &tool,
                ErrorKind::BackendError,
                format!("no backend registered for {}", descriptor.backend),
            );
            return ExecutionResult::failure(request_id, tool, error, start.elapsed());
        };

        let budget = self.budget(descriptor, args.int("timeout"));
        let ctx = CallContext::new(budget, self.tracker.clone(), request_id.clone());
        trace!(
            "[tool] {tool} request {} budget {:?}",
            ctx.request_id().unwrap_or("-"),
            ctx.timeout()
        );
        let outcome =
            match tokio::time::timeout(budget + DEADLINE_GRACE, backend.execute(name, &args, &ctx))
                .await
            {
                Ok(outcome) => outcome,
                Err(_) => Err(ctx.timed_out()),
            };

        let elapsed = start.elapsed();
        match outcome {
            Ok(payload) => {
                debug!(
                    "Tool {tool} completed in {:.0}ms",
                    elapsed.as_secs_f64() * 1000.0
                );
                trace!("Tool {tool} payload: {payload:?}");
                ExecutionResult::success(request_id, tool, payload, elapsed)
            }
            Err(err) => {
                info!(
                    "Tool {tool} failed after {:.1}s: {err}",
                    elapsed.as_secs_f64()
                );
                let error = ToolError::from_exec(&tool, &err);
                ExecutionResult::failure(request_id, tool, error, elapsed)
            }
        }
    }

    /// Convenience wrapper around [`invoke`](Self::invoke).
    pub async fn call(&self, tool: &str, arguments: Value) -> ExecutionResult {
        let arguments = match arguments {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let error = ToolError::new(
                    tool,
                    ErrorKind::TypeMismatch,
                    format!("arguments must be a JSON object, got {other}"),
                );
                return ExecutionResult::failure(None, tool, error, Duration::ZERO);
            }
        };
        self.invoke(ToolRequest::new(tool, arguments)).await
    }

    /// The call's timeout argument where the tool has one, else the
    /// backend ceiling. The validator has already bounded the argument.
    fn budget(&self, descriptor: &ToolDescriptor, requested: Option<i64>) -> Duration {
        let ceiling = self.policy.timeout(descriptor.backend);
        let takes_timeout = descriptor
            .param("timeout")
            .is_some_and(|p| matches!(p.constraint, Constraint::Timeout));
        match requested {
            Some(secs) if takes_timeout => u64::try_from(secs)
                .map(Duration::from_secs)
                .map_or(ceiling, |d| d.min(ceiling)),
            _ => ceiling,
        }
    }

    /// Every tool in registry order.
    pub fn list_tools(&self) -> Vec<ToolListing> {
        self.registry
            .iter()
            .map(|desc| {
                let missing: Vec<String> = self
                    .availability
                    .missing_for(desc)
                    .into_iter()
                    .map(str::to_string)
                    .collect();
                let unusable_params = self
                    .availability
                    .unusable_params(desc)
                    .into_iter()
                    .map(|(param, program)| UnusableParam {
                        param: param.to_string(),
                        missing: program.to_string(),
                    })
                    .collect();
                ToolListing {
                    name: desc.name.to_string(),
                    description: desc.purpose.clone(),
                    backend: desc.backend,
                    input_schema: desc.input_schema(),
                    available: missing.is_empty(),
                    missing,
                    unusable_params,
                }
            })
            .collect()
    }

    pub fn health(&self) -> Health {
        let mut unavailable = Vec::new();
        let mut limited = Vec::new();
        for listing in self.list_tools() {
            if !listing.available {
                unavailable.push(UnavailableTool {
                    tool: listing.name,
                    missing: listing.missing,
                });
            } else if !listing.unusable_params.is_empty() {
                limited.push(LimitedTool {
                    tool: listing.name,
                    unusable_params: listing.unusable_params,
                });
            }
        }
        let status = if unavailable.is_empty() && limited.is_empty() {
            "ok"
        } else {
            "degraded"
        };
        Health {
            status: status.to_string(),
            tools: self.registry.len(),
            unavailable,
            limited,
            active_processes: self.tracker.active(),
        }
    }
}

/// Log a tool call at INFO level with a truncated preview of arguments.
/// Secrets are masked before anything is printed.
fn log_tool_call(name: &str, arguments: &Map<String, Value>) {
    let mut shown = arguments.clone();
    if let Some(password) = shown.get_mut("password") {
        *password = Value::from("***");
    }
    let rendered = Value::Object(shown).to_string();
    let preview: String = rendered.chars().take(120).collect();
    info!(
        "[tool] {name}({preview}{})",
        if rendered.len() > 120 { "..." } else { "" }
    );
    debug!("[tool] {name} full args ({} bytes)", rendered.len());
    trace!("[tool] {name} arguments: {rendered}");
}

// ── Builder ────────────────────────────────────────────────────────

/// Assembles a [`Dispatcher`]; swap backends or skip the `PATH` probe in
/// tests.
pub struct DispatcherBuilder {
    policy: SandboxPolicy,
    registry: Registry,
    backends: BTreeMap<BackendKind, Arc<dyn Backend>>,
    availability: Option<Availability>,
}

impl DispatcherBuilder {
    fn new(policy: SandboxPolicy) -> Self {
        let backends = backends::standard_backends(&policy);
        Self {
            policy,
            registry: Registry::standard(),
            backends,
            availability: None,
        }
    }

    /// Replace the backend serving `backend.kind()`.
    pub fn backend(mut self, backend: Arc<dyn Backend>) -> Self {
        self.backends.insert(backend.kind(), backend);
        self
    }

    pub fn availability(mut self, availability: Availability) -> Self {
        self.availability = Some(availability);
        self
    }

    /// Look up every program the registry needs on `PATH`.
    pub async fn probe_programs(mut self) -> Self {
        let availability = Availability::probe(self.registry.required_programs()).await;
        for (program, location) in availability.locations() {
            if location.is_none() {
                warn!("`{program}` not found on PATH; tools that need it are unavailable");
            }
        }
        self.availability = Some(availability);
        self
    }

    pub fn build(self) -> Dispatcher {
        let registry = Arc::new(self.registry);
        let policy = Arc::new(self.policy);
        Dispatcher {
            validator: Validator::new(Arc::clone(&registry), Arc::clone(&policy)),
            registry,
            policy,
            backends: self.backends,
            availability: self.availability.unwrap_or_else(Availability::assume_present),
            tracker: ProcessTracker::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::BackendFuture;
    use crate::tools::args::NormalizedArgs;
    use crate::tools::result::{CommandOutput, Output, PortCheck};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Probe backend that counts calls and reports every port open.
    struct CountingProbe {
        calls: Arc<AtomicUsize>,
    }

    impl Backend for CountingProbe {
        fn kind(&self) -> BackendKind {
            BackendKind::Probe
        }

        fn execute<'a>(
            &'a self,
            _tool: ToolName,
            args: &'a NormalizedArgs,
            _ctx: &'a CallContext,
        ) -> BackendFuture<'a> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                Ok(Output::PortCheck(PortCheck {
                    host: args.str("host").unwrap_or_default().to_string(),
                    port: args.int("port").and_then(|p| u16::try_from(p).ok()).unwrap_or(0),
                    open: true,
                    state: "open".into(),
                    latency_ms: None,
                }))
            })
        }
    }

    /// Remote shell backend that counts calls and echoes the command.
    struct CountingShell {
        calls: Arc<AtomicUsize>,
    }

    impl Backend for CountingShell {
        fn kind(&self) -> BackendKind {
            BackendKind::RemoteShell
        }

        fn execute<'a>(
            &'a self,
            _tool: ToolName,
            args: &'a NormalizedArgs,
            _ctx: &'a CallContext,
        ) -> BackendFuture<'a> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                Ok(Output::CommandOutput(CommandOutput {
                    host: args.str("host").unwrap_or_default().to_string(),
                    command: args.str("command").unwrap_or_default().to_string(),
                    exit_code: Some(0),
                    stdout: String::new(),
                    stderr: String::new(),
                }))
            })
        }
    }

    fn dispatcher(dir: &tempfile::TempDir) -> (Dispatcher, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let policy = SandboxPolicy::for_root(dir.path()).unwrap();
        let dispatcher = Dispatcher::builder(policy)
            .backend(Arc::new(CountingProbe {
                calls: Arc::clone(&calls),
            }))
            .build();
        (dispatcher, calls)
    }

    #[tokio::test]
    async fn accepted_request_reaches_backend_with_request_id() {
        let dir = tempfile::tempdir().unwrap();
        let (dispatcher, calls) = dispatcher(&dir);
        let mut arguments = Map::new();
        arguments.insert("host".into(), json!("127.0.0.1"));
        arguments.insert("port".into(), json!(22));
        let request = ToolRequest::new("telnet_port_check", arguments).with_request_id("abc");

        let result = dispatcher.invoke(request).await;
        assert!(result.is_success(), "{result:?}");
        assert_eq!(result.request_id.as_deref(), Some("abc"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn rejected_request_never_reaches_backend() {
        let dir = tempfile::tempdir().unwrap();
        let (dispatcher, calls) = dispatcher(&dir);
        let result = dispatcher
            .call("telnet_port_check", json!({"host": "127.0.0.1", "port": 70000}))
            .await;
        assert_eq!(result.error_kind(), Some(ErrorKind::OutOfRange));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_program_fails_only_its_tools() {
        let dir = tempfile::tempdir().unwrap();
        let policy = SandboxPolicy::for_root(dir.path()).unwrap();
        let dispatcher = Dispatcher::builder(policy)
            .availability(Availability::probe(["hostkit-no-such-program"]).await)
            .build();

        let result = dispatcher.call("nmap_scan", json!({"target": "127.0.0.1"})).await;
        assert_eq!(result.error_kind(), Some(ErrorKind::BackendError));
        assert!(result.error.unwrap().message.contains("nmap"));

        std::fs::write(dir.path().join("a.txt"), "hi").unwrap();
        let ok = dispatcher.call("read_file", json!({"file_path": "a.txt"})).await;
        assert!(ok.is_success());

        let health = dispatcher.health();
        assert_eq!(health.status, "degraded");
        assert!(health.unavailable.iter().any(|u| u.tool == "nmap_scan"));
        assert!(!health.unavailable.iter().any(|u| u.tool == "read_file"));
    }

    #[tokio::test]
    async fn password_auth_without_sshpass_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let policy = SandboxPolicy::for_root(dir.path()).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let dispatcher = Dispatcher::builder(policy)
            .backend(Arc::new(CountingShell {
                calls: Arc::clone(&calls),
            }))
            .availability(Availability::from_lookups([
                ("ssh".to_string(), Some(std::path::PathBuf::from("/usr/bin/ssh"))),
                ("sshpass".to_string(), None),
            ]))
            .build();

        let base = json!({"host": "10.0.0.5", "username": "ops", "command": "uptime"});
        let mut with_password = base.clone();
        with_password["password"] = json!("pw");

        let result = dispatcher.call("ssh_execute", with_password).await;
        assert_eq!(result.error_kind(), Some(ErrorKind::BackendError));
        assert!(result.error.unwrap().message.contains("sshpass"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let result = dispatcher.call("ssh_execute", base).await;
        assert!(result.is_success(), "{result:?}");
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let listing = dispatcher.list_tools();
        let ssh = listing.iter().find(|t| t.name == "ssh_execute").unwrap();
        assert_eq!(
            ssh.unusable_params,
            vec![UnusableParam {
                param: "password".into(),
                missing: "sshpass".into(),
            }]
        );
        assert!(ssh.available);

        let health = dispatcher.health();
        assert_eq!(health.status, "degraded");
        assert!(health.unavailable.iter().all(|u| u.tool != "ssh_execute"));
        assert!(health.limited.iter().any(|l| l.tool == "ssh_execute"));
    }

    #[tokio::test]
    async fn budget_uses_timeout_argument_only_where_declared() {
        let dir = tempfile::tempdir().unwrap();
        let (dispatcher, _) = dispatcher(&dir);
        let registry = Registry::standard();

        let ssh = registry.get(ToolName::SshExecute).unwrap();
        assert_eq!(dispatcher.budget(ssh, Some(5)), Duration::from_secs(5));
        assert_eq!(dispatcher.budget(ssh, None), Duration::from_secs(60));

        // ping_host's timeout is the per-reply wait, not the call budget.
        let ping = registry.get(ToolName::PingHost).unwrap();
        assert_eq!(dispatcher.budget(ping, Some(5)), Duration::from_secs(300));
    }

    #[tokio::test]
    async fn listing_carries_schemas_and_availability() {
        let dir = tempfile::tempdir().unwrap();
        let (dispatcher, _) = dispatcher(&dir);
        let tools = dispatcher.list_tools();
        assert_eq!(tools.len(), 16);
        assert!(tools.iter().all(|t| t.available));
        assert_eq!(tools[0].name, "read_file");
        assert_eq!(tools[0].input_schema["type"], "object");
        assert_eq!(dispatcher.health().status, "ok");
    }

    #[test]
    fn request_deserializes_with_defaults() {
        let request: ToolRequest = serde_json::from_value(json!({"tool": "ping_host"})).unwrap();
        assert!(request.arguments.is_empty());
        assert!(request.request_id.is_none());
    }
}
