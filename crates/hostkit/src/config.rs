//! Startup configuration.
//!
//! Read once from a TOML file and immutable afterwards. Every section is
//! optional; missing keys take the defaults below.
//!
//! ```toml
//! [file]
//! roots = ["/srv/share", "."]
//! max_read_bytes = 10485760
//! timeout_secs = 10
//!
//! [scan]
//! timeout_secs = 300
//!
//! [shell]
//! denylist = ["rm -rf", "mkfs"]
//!
//! [http]
//! bind = "127.0.0.1:8000"
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::ConfigError;
use crate::sandbox::denylist::{DEFAULT_SCAN_FLAGS, DEFAULT_SHELL_PATTERNS};
use crate::tools::names::BackendKind;

/// Config file looked up in the working directory when none is given.
pub const DEFAULT_CONFIG_FILE: &str = "hostkit.toml";

/// Default ceiling for content returned by `read_file` (10 MiB).
pub const DEFAULT_MAX_READ_BYTES: u64 = 10 * 1024 * 1024;

fn default_roots() -> Vec<PathBuf> {
    vec![PathBuf::from(".")]
}

fn default_max_read_bytes() -> u64 {
    DEFAULT_MAX_READ_BYTES
}

fn default_file_timeout() -> u64 {
    10
}

fn default_scan_timeout() -> u64 {
    300
}

fn default_shell_timeout() -> u64 {
    60
}

fn default_transfer_timeout() -> u64 {
    120
}

fn default_probe_timeout() -> u64 {
    15
}

fn default_scan_denylist() -> Vec<String> {
    DEFAULT_SCAN_FLAGS.iter().map(|s| (*s).to_string()).collect()
}

fn default_shell_denylist() -> Vec<String> {
    DEFAULT_SHELL_PATTERNS
        .iter()
        .map(|s| (*s).to_string())
        .collect()
}

fn default_bind() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8000))
}

// ── Sections ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileSection {
    /// Directories file tools may touch. Relative paths in requests resolve
    /// against the first root.
    pub roots: Vec<PathBuf>,
    pub max_read_bytes: u64,
    pub timeout_secs: u64,
}

impl Default for FileSection {
    fn default() -> Self {
        Self {
            roots: default_roots(),
            max_read_bytes: default_max_read_bytes(),
            timeout_secs: default_file_timeout(),
        }
    }
}

/// `denylist` holds scanner flags that are refused in `options`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanSection {
    pub denylist: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for ScanSection {
    fn default() -> Self {
        Self {
            denylist: default_scan_denylist(),
            timeout_secs: default_scan_timeout(),
        }
    }
}

/// `denylist` holds substrings refused in remote commands and scp paths.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShellSection {
    pub denylist: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for ShellSection {
    fn default() -> Self {
        Self {
            denylist: default_shell_denylist(),
            timeout_secs: default_shell_timeout(),
        }
    }
}

/// `denylist` holds substrings refused in remote FTP paths. Empty by default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferSection {
    pub denylist: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for TransferSection {
    fn default() -> Self {
        Self {
            denylist: Vec::new(),
            timeout_secs: default_transfer_timeout(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeSection {
    pub timeout_secs: u64,
}

impl Default for ProbeSection {
    fn default() -> Self {
        Self {
            timeout_secs: default_probe_timeout(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSection {
    pub bind: SocketAddr,
}

impl Default for HttpSection {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

// ── SandboxPolicy ──────────────────────────────────────────────────

/// Limits the validator and dispatcher enforce.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxPolicy {
    pub file: FileSection,
    pub scan: ScanSection,
    pub shell: ShellSection,
    pub transfer: TransferSection,
    pub probe: ProbeSection,
}

impl SandboxPolicy {
    /// Default policy with a single sandbox root.
    pub fn for_root(root: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let mut policy = Self::default();
        policy.file.roots = vec![root.as_ref().to_path_buf()];
        policy.prepare()
    }

    /// Override one backend's timeout ceiling.
    pub fn with_timeout(mut self, kind: BackendKind, secs: u64) -> Self {
        match kind {
            BackendKind::File => self.file.timeout_secs = secs,
            BackendKind::Scan => self.scan.timeout_secs = secs,
            BackendKind::RemoteShell => self.shell.timeout_secs = secs,
            BackendKind::Transfer => self.transfer.timeout_secs = secs,
            BackendKind::Probe => self.probe.timeout_secs = secs,
        }
        self
    }

    pub fn with_max_read_bytes(mut self, max: u64) -> Self {
        self.file.max_read_bytes = max;
        self
    }

    pub fn timeout_secs(&self, kind: BackendKind) -> u64 {
        match kind {
            BackendKind::File => self.file.timeout_secs,
            BackendKind::Scan => self.scan.timeout_secs,
            BackendKind::RemoteShell => self.shell.timeout_secs,
            BackendKind::Transfer => self.transfer.timeout_secs,
            BackendKind::Probe => self.probe.timeout_secs,
        }
    }

    pub fn timeout(&self, kind: BackendKind) -> Duration {
        Duration::from_secs(self.timeout_secs(kind))
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.file.roots
    }

    /// Canonicalize the sandbox roots and check the limits. Must run before
    /// the policy is handed to a dispatcher.
    pub fn prepare(mut self) -> Result<Self, ConfigError> {
        if self.file.roots.is_empty() {
            return Err(ConfigError::NoRoots);
        }
        let mut roots = Vec::with_capacity(self.file.roots.len());
        for root in &self.file.roots {
            let canonical = std::fs::canonicalize(root).map_err(|source| ConfigError::Root {
                path: root.clone(),
                source,
            })?;
            if !canonical.is_dir() {
                return Err(ConfigError::RootNotDirectory(canonical));
            }
            debug!("Sandbox root {} -> {}", root.display(), canonical.display());
            roots.push(canonical);
        }
        self.file.roots = roots;

        for kind in BackendKind::ALL {
            if self.timeout_secs(kind) == 0 {
                return Err(ConfigError::ZeroTimeout(kind.section()));
            }
        }
        Ok(self)
    }
}

// ── Config ─────────────────────────────────────────────────────────

/// Everything read from the config file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    #[serde(flatten)]
    pub policy: SandboxPolicy,
    pub http: HttpSection,
}

impl Config {
    /// Load from `path`, or from [`DEFAULT_CONFIG_FILE`] when it exists,
    /// or fall back to defaults. The returned policy is prepared.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(p) => Some(p.to_path_buf()),
            None => {
                let candidate = PathBuf::from(DEFAULT_CONFIG_FILE);
                candidate.is_file().then_some(candidate)
            }
        };

        let config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
                    path: path.clone(),
                    source,
                })?;
                info!("Loading config from {}", path.display());
                Self::parse(&text, &path)?
            }
            None => {
                info!("No config file; using defaults");
                Self::default()
            }
        };
        config.prepare()
    }

    pub fn parse(text: &str, origin: &Path) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })
    }

    pub fn prepare(mut self) -> Result<Self, ConfigError> {
        self.policy = self.policy.prepare()?;
        Ok(self)
    }
}
