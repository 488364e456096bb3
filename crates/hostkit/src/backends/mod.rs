//! Backends: the code that actually touches the host.
//!
//! Each [`Backend`] serves the tools of one [`BackendKind`] and receives
//! arguments that have already passed the sandbox validator. A backend
//! never re-validates policy; it maps its failures onto [`ExecError`] and
//! releases every process and socket it opened before returning.
//!
//! | Module | Tools | Mechanism |
//! |--------|-------|-----------|
//! | [`file`] | read_file, list_directory, get_file_info | `tokio::fs` |
//! | [`scan`] | nmap_scan, ping_host, port_scan, network_discovery | `nmap`, `ping` |
//! | [`shell`] | ssh_execute, ssh_copy_file, ssh_key_info | `ssh`, `scp`, `ssh-keygen`, `sshpass` |
//! | [`transfer`] | ftp_* | `curl` |
//! | [`probe`] | telnet_* | `tokio::net::TcpStream` |

pub mod exec;
pub mod file;
pub mod probe;
pub mod scan;
pub mod shell;
pub mod transfer;

use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::config::SandboxPolicy;
use crate::error::ExecError;
use crate::tools::args::NormalizedArgs;
use crate::tools::names::{BackendKind, ToolName};
use crate::tools::result::Output;
use crate::tools::spec::ToolDescriptor;

pub use exec::ProcessTracker;

/// Boxed future returned by [`Backend::execute`].
pub type BackendFuture<'a> = Pin<Box<dyn Future<Output = Result<Output, ExecError>> + Send + 'a>>;

/// A family of tools executed the same way.
///
/// Implementations box their future so the trait stays object-safe:
///
/// ```ignore
/// impl Backend for MyBackend {
///     fn kind(&self) -> BackendKind { BackendKind::Probe }
///
///     fn execute<'a>(
///         &'a self,
///         tool: ToolName,
///         args: &'a NormalizedArgs,
///         ctx: &'a CallContext,
///     ) -> BackendFuture<'a> {
///         Box::pin(async move { /* ... */ })
///     }
/// }
/// ```
pub trait Backend: Send + Sync {
    fn kind(&self) -> BackendKind;

    fn execute<'a>(
        &'a self,
        tool: ToolName,
        args: &'a NormalizedArgs,
        ctx: &'a CallContext,
    ) -> BackendFuture<'a>;
}

// ── CallContext ────────────────────────────────────────────────────

/// Per-call execution budget.
#[derive(Debug, Clone)]
pub struct CallContext {
    deadline: Instant,
    timeout: Duration,
    tracker: ProcessTracker,
    request_id: Option<String>,
}

impl CallContext {
    pub fn new(timeout: Duration, tracker: ProcessTracker, request_id: Option<String>) -> Self {
        Self {
            deadline: Instant::now() + timeout,
            timeout,
            tracker,
            request_id,
        }
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// The full budget this call started with.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Time left before the deadline, zero once it has passed.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn tracker(&self) -> &ProcessTracker {
        &self.tracker
    }

    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    pub(crate) fn timed_out(&self) -> ExecError {
        ExecError::Timeout {
            secs: self.timeout.as_secs(),
        }
    }
}

/// One backend per kind, built from the policy.
pub fn standard_backends(policy: &SandboxPolicy) -> BTreeMap<BackendKind, Arc<dyn Backend>> {
    let backends: [Arc<dyn Backend>; 5] = [
        Arc::new(file::FileBackend::new(policy.file.max_read_bytes)),
        Arc::new(scan::ScanBackend::new()),
        Arc::new(shell::ShellBackend::new()),
        Arc::new(transfer::TransferBackend::new()),
        Arc::new(probe::ProbeBackend::new()),
    ];
    backends.into_iter().map(|b| (b.kind(), b)).collect()
}

/// JSON schema of the typed argument struct a backend parses for `tool`.
pub fn args_schema(tool: ToolName) -> serde_json::Value {
    use crate::json_schema_for;
    match tool {
        ToolName::ReadFile => json_schema_for::<file::ReadFileArgs>(),
        ToolName::ListDirectory => json_schema_for::<file::ListDirectoryArgs>(),
        ToolName::GetFileInfo => json_schema_for::<file::FileInfoArgs>(),
        ToolName::NmapScan => json_schema_for::<scan::NmapArgs>(),
        ToolName::PingHost => json_schema_for::<scan::PingArgs>(),
        ToolName::PortScan => json_schema_for::<scan::PortScanArgs>(),
        ToolName::NetworkDiscovery => json_schema_for::<scan::DiscoveryArgs>(),
        ToolName::SshExecute => json_schema_for::<shell::SshExecuteArgs>(),
        ToolName::SshCopyFile => json_schema_for::<shell::SshCopyArgs>(),
        ToolName::SshKeyInfo => json_schema_for::<shell::KeyInfoArgs>(),
        ToolName::FtpListFiles => json_schema_for::<transfer::FtpListArgs>(),
        ToolName::FtpDownloadFile => json_schema_for::<transfer::FtpDownloadArgs>(),
        ToolName::FtpUploadFile => json_schema_for::<transfer::FtpUploadArgs>(),
        ToolName::TelnetConnect => json_schema_for::<probe::ConnectArgs>(),
        ToolName::TelnetPortCheck => json_schema_for::<probe::PortCheckArgs>(),
        ToolName::TelnetBannerGrab => json_schema_for::<probe::BannerArgs>(),
    }
}

// ── Availability ───────────────────────────────────────────────────

/// Which external programs were found on `PATH` at startup.
#[derive(Debug, Clone, Default)]
pub struct Availability {
    found: BTreeMap<String, Option<PathBuf>>,
    assume_present: bool,
}

impl Availability {
    /// Treat every program as present. Used when backends are fakes.
    pub fn assume_present() -> Self {
        Self {
            found: BTreeMap::new(),
            assume_present: true,
        }
    }

    /// Look up every program concurrently.
    pub async fn probe<I, S>(programs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let path_var = std::env::var_os("PATH").unwrap_or_default();
        let dirs: Vec<PathBuf> = std::env::split_paths(&path_var).collect();
        let dirs = dirs.as_slice();
        let lookups = programs.into_iter().map(|program| {
            let program: String = program.into();
            async move {
                let location = find_program(&program, dirs).await;
                debug!("[availability] {program}: {location:?}");
                (program, location)
            }
        });
        Self::from_lookups(futures::future::join_all(lookups).await)
    }

    /// Availability from already resolved program locations.
    pub(crate) fn from_lookups(found: impl IntoIterator<Item = (String, Option<PathBuf>)>) -> Self {
        Self {
            found: found.into_iter().collect(),
            assume_present: false,
        }
    }

    pub fn is_available(&self, program: &str) -> bool {
        self.assume_present || matches!(self.found.get(program), Some(Some(_)))
    }

    /// Programs `descriptor` needs that were not found.
    pub fn missing_for(&self, descriptor: &ToolDescriptor) -> Vec<&'static str> {
        descriptor
            .requires
            .iter()
            .copied()
            .filter(|p| !self.is_available(p))
            .collect()
    }

    /// Programs a call with these arguments would run that were not found:
    /// the tool's own requirements plus those of every supplied parameter.
    pub fn missing_for_call(
        &self,
        descriptor: &ToolDescriptor,
        args: &NormalizedArgs,
    ) -> Vec<&'static str> {
        let mut missing = self.missing_for(descriptor);
        for (name, _) in args.iter() {
            if let Some(program) = descriptor.param(name).and_then(|p| p.needs)
                && !self.is_available(program)
                && !missing.contains(&program)
            {
                missing.push(program);
            }
        }
        missing
    }

    /// Parameters of `descriptor` that cannot be used, with the program
    /// each one is missing.
    pub fn unusable_params(&self, descriptor: &ToolDescriptor) -> Vec<(&'static str, &'static str)> {
        descriptor
            .params
            .iter()
            .filter_map(|p| p.needs.map(|program| (p.name, program)))
            .filter(|(_, program)| !self.is_available(program))
            .collect()
    }

    /// Resolved location of every probed program.
    pub fn locations(&self) -> impl Iterator<Item = (&str, Option<&Path>)> {
        self.found
            .iter()
            .map(|(name, path)| (name.as_str(), path.as_deref()))
    }
}

/// First executable file named `program` in `dirs`.
async fn find_program(program: &str, dirs: &[PathBuf]) -> Option<PathBuf> {
    for dir in dirs {
        let candidate = dir.join(program);
        let Ok(meta) = tokio::fs::metadata(&candidate).await else {
            continue;
        };
        if meta.is_file() && is_executable(&meta) {
            return Some(candidate);
        }
    }
    None
}

#[cfg(unix)]
fn is_executable(meta: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_meta: &std::fs::Metadata) -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::registry::Registry;
    use std::collections::BTreeSet;

    #[test]
    fn typed_args_agree_with_descriptors() {
        let registry = Registry::standard();
        for desc in registry.iter() {
            let schema = args_schema(desc.name);
            let props: BTreeSet<String> = schema["properties"]
                .as_object()
                .map(|m| m.keys().cloned().collect())
                .unwrap_or_default();
            let params: BTreeSet<String> =
                desc.params.iter().map(|p| p.name.to_string()).collect();
            assert_eq!(props, params, "{} typed args differ", desc.name);

            let required = schema["required"].as_array().cloned().unwrap_or_default();
            for name in required {
                let name = name.as_str().unwrap();
                let param = desc.param(name).unwrap();
                assert!(
                    param.required || param.default.is_some(),
                    "{}: typed args require '{name}' but the validator may omit it",
                    desc.name
                );
            }
        }
    }

    #[test]
    fn one_backend_per_kind() {
        let dir = tempfile::tempdir().unwrap();
        let policy = SandboxPolicy::for_root(dir.path()).unwrap();
        let backends = standard_backends(&policy);
        assert_eq!(backends.len(), BackendKind::ALL.len());
        for kind in BackendKind::ALL {
            assert_eq!(backends[&kind].kind(), kind);
        }
    }

    #[test]
    fn context_remaining_never_exceeds_budget() {
        let ctx = CallContext::new(Duration::from_secs(2), ProcessTracker::new(), None);
        assert!(ctx.remaining() <= Duration::from_secs(2));
        assert_eq!(ctx.timeout(), Duration::from_secs(2));
        assert!(ctx.request_id().is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn probe_finds_sh_and_misses_nonsense() {
        let availability = Availability::probe(["sh", "hostkit-no-such-program"]).await;
        assert!(availability.is_available("sh"));
        assert!(!availability.is_available("hostkit-no-such-program"));
        assert!(Availability::assume_present().is_available("anything"));
    }

    #[tokio::test]
    async fn missing_for_lists_absent_programs() {
        let availability = Availability::probe(["hostkit-no-such-program"]).await;
        let registry = Registry::standard();
        let nmap = registry.get(ToolName::NmapScan).unwrap();
        assert_eq!(availability.missing_for(nmap), vec!["nmap"]);
        let probe = registry.get(ToolName::TelnetPortCheck).unwrap();
        assert!(availability.missing_for(probe).is_empty());
    }

    #[test]
    fn password_calls_need_sshpass() {
        let dir = tempfile::tempdir().unwrap();
        let policy = Arc::new(SandboxPolicy::for_root(dir.path()).unwrap());
        let registry = Arc::new(Registry::standard());
        let validator = crate::sandbox::Validator::new(Arc::clone(&registry), policy);
        let ssh = registry.get(ToolName::SshExecute).unwrap();
        let availability = Availability::from_lookups([
            ("ssh".to_string(), Some(PathBuf::from("/usr/bin/ssh"))),
            ("sshpass".to_string(), None),
        ]);
        assert!(availability.missing_for(ssh).is_empty());
        assert_eq!(availability.unusable_params(ssh), vec![("password", "sshpass")]);

        let call = |args: serde_json::Value| {
            let map = args.as_object().cloned().unwrap();
            validator.check("ssh_execute", &map).unwrap()
        };
        let with_key = call(serde_json::json!(
            {"host": "10.0.0.5", "username": "ops", "command": "uptime"}
        ));
        let with_password = call(serde_json::json!(
            {"host": "10.0.0.5", "username": "ops", "command": "uptime", "password": "hunter2"}
        ));
        assert!(availability.missing_for_call(ssh, &with_key).is_empty());
        assert_eq!(availability.missing_for_call(ssh, &with_password), vec!["sshpass"]);

        let everything = Availability::assume_present();
        assert!(everything.unusable_params(ssh).is_empty());
        assert!(everything.missing_for_call(ssh, &with_password).is_empty());
    }
}
