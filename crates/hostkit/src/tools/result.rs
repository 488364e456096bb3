//! Normalized call results.
//!
//! Every invocation ends in an [`ExecutionResult`]: `Success` carries a
//! typed [`Output`], `Failure` carries a [`ToolError`]. Exactly one of the
//! two is set, and the elapsed time is always reported.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ErrorClass, ErrorKind, ExecError, Rejection};
use crate::tools::reflection::recovery_hint;

/// Maximum size (in bytes) of free-form text fields in an [`Output`].
pub const DEFAULT_MAX_TEXT_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Success,
    Failure,
}

/// Typed failure description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolError {
    pub class: ErrorClass,
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl ToolError {
    pub fn new(tool: &str, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            class: kind.class(),
            kind,
            message: message.into(),
            hint: recovery_hint(tool, kind),
        }
    }

    pub fn from_rejection(tool: &str, rejection: &Rejection) -> Self {
        Self::new(tool, rejection.kind(), rejection.to_string())
    }

    pub fn from_exec(tool: &str, err: &ExecError) -> Self {
        Self::new(tool, err.kind(), err.to_string())
    }
}

/// Outcome of one tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub tool: String,
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Output>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ToolError>,
    pub duration_ms: u64,
}

impl ExecutionResult {
    pub fn success(
        request_id: Option<String>,
        tool: impl Into<String>,
        payload: Output,
        elapsed: Duration,
    ) -> Self {
        Self {
            request_id,
            tool: tool.into(),
            status: Status::Success,
            payload: Some(payload),
            error: None,
            duration_ms: millis(elapsed),
        }
    }

    pub fn failure(
        request_id: Option<String>,
        tool: impl Into<String>,
        error: ToolError,
        elapsed: Duration,
    ) -> Self {
        Self {
            request_id,
            tool: tool.into(),
            status: Status::Failure,
            payload: None,
            error: Some(error),
            duration_ms: millis(elapsed),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }

    /// Human-readable rendering for text-only clients.
    pub fn render_text(&self) -> String {
        match (&self.payload, &self.error) {
            (Some(payload), _) => payload.render_text(),
            (None, Some(error)) => {
                let mut text = format!("Error ({:?}): {}", error.kind, error.message);
                if let Some(hint) = &error.hint {
                    text.push_str(&format!("\nHint: {hint}"));
                }
                text
            }
            (None, None) => String::new(),
        }
    }
}

fn millis(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

/// Truncate `s` to at most `max` bytes on a character boundary, appending a
/// notice if anything was cut.
pub fn truncate_result(mut s: String, max: usize) -> String {
    if s.len() <= max {
        return s;
    }
    let total = s.len();
    let mut cut = max;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    s.truncate(cut);
    s.push_str(&format!("...\n[truncated: {total} bytes total]"));
    s
}

// ── Payloads ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    File,
    Directory,
    Symlink,
    Other,
}

impl EntryType {
    pub fn of(file_type: std::fs::FileType) -> Self {
        if file_type.is_symlink() {
            Self::Symlink
        } else if file_type.is_dir() {
            Self::Directory
        } else if file_type.is_file() {
            Self::File
        } else {
            Self::Other
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileContent {
    pub path: String,
    pub content: String,
    pub total_lines: usize,
    pub start_line: usize,
    pub end_line: usize,
    pub lines_returned: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    pub name: String,
    pub entry_type: EntryType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryListing {
    pub path: String,
    pub entries: Vec<DirEntry>,
    /// Entries that matched before `max_items` was applied.
    pub total: usize,
    pub truncated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    pub path: String,
    pub entry_type: EntryType,
    pub size: u64,
    /// Octal permission bits, e.g. `"644"`.
    pub permissions: String,
    pub readonly: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gid: Option<u32>,
    /// RFC 3339 modification time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortEntry {
    pub port: u16,
    pub protocol: String,
    pub state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostReport {
    pub address: String,
    pub up: bool,
    pub ports: Vec<PortEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanReport {
    pub target: String,
    pub scan_type: String,
    pub command: String,
    pub hosts: Vec<HostReport>,
    pub raw_output: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PingReport {
    pub host: String,
    pub reachable: bool,
    pub transmitted: u32,
    pub received: u32,
    pub packet_loss_percent: f64,
    pub rtt_ms: Vec<f64>,
    pub raw_output: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortScanReport {
    pub host: String,
    pub scan_type: String,
    pub ports: Vec<PortEntry>,
    /// Scanner summary of ports it did not list, e.g. "997 closed tcp ports".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_shown: Option<String>,
    pub raw_output: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostList {
    pub network: String,
    pub hosts: Vec<String>,
    pub raw_output: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    pub host: String,
    pub command: String,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferReport {
    pub direction: String,
    pub source: String,
    pub destination: String,
    pub bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FtpListing {
    pub host: String,
    pub directory: String,
    pub entries: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectReport {
    pub host: String,
    pub port: u16,
    pub connected: bool,
    pub initial_response: String,
    pub bytes_received: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortCheck {
    pub host: String,
    pub port: u16,
    pub open: bool,
    /// `open`, `closed` or `filtered`.
    pub state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Banner {
    pub host: String,
    pub port: u16,
    pub banner: String,
    pub bytes_received: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyInfo {
    pub path: String,
    pub public: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bits: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub permissions: String,
    pub warnings: Vec<String>,
}

/// Structured payload of a successful call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Output {
    FileContent(FileContent),
    DirectoryListing(DirectoryListing),
    FileInfo(FileInfo),
    ScanReport(ScanReport),
    PingReport(PingReport),
    PortScanReport(PortScanReport),
    HostList(HostList),
    CommandOutput(CommandOutput),
    TransferReport(TransferReport),
    FtpListing(FtpListing),
    ConnectReport(ConnectReport),
    PortCheck(PortCheck),
    Banner(Banner),
    KeyInfo(KeyInfo),
}

impl Output {
    /// Plain-text view: raw content where there is one, pretty JSON
    /// otherwise.
    pub fn render_text(&self) -> String {
        match self {
            Self::FileContent(f) => f.content.clone(),
            Self::CommandOutput(c) => {
                let mut text = c.stdout.clone();
                if !c.stderr.is_empty() {
                    text.push_str(&format!("\n[stderr]\n{}", c.stderr));
                }
                if let Some(code) = c.exit_code
                    && code != 0
                {
                    text.push_str(&format!("\n[exit code {code}]"));
                }
                text
            }
            Self::ScanReport(s) => s.raw_output.clone(),
            Self::Banner(b) => b.banner.clone(),
            other => serde_json::to_string_pretty(other).unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_and_failure_set_exactly_one_side() {
        let ok = ExecutionResult::success(
            Some("r1".into()),
            "telnet_port_check",
            Output::PortCheck(PortCheck {
                host: "h".into(),
                port: 22,
                open: true,
                state: "open".into(),
                latency_ms: Some(1),
            }),
            Duration::from_millis(12),
        );
        assert!(ok.is_success());
        assert!(ok.payload.is_some() && ok.error.is_none());
        assert_eq!(ok.duration_ms, 12);

        let err = ExecutionResult::failure(
            None,
            "read_file",
            ToolError::new("read_file", ErrorKind::NotFound, "no such file"),
            Duration::ZERO,
        );
        assert!(!err.is_success());
        assert!(err.payload.is_none());
        assert_eq!(err.error_kind(), Some(ErrorKind::NotFound));
    }

    #[test]
    fn serialized_shape() {
        let result = ExecutionResult::failure(
            Some("7".into()),
            "port_scan",
            ToolError::new("port_scan", ErrorKind::OutOfRange, "port 65536 is outside 1-65535"),
            Duration::from_millis(1),
        );
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["status"], "failure");
        assert_eq!(json["error"]["class"], "validation");
        assert_eq!(json["error"]["kind"], "OutOfRange");
        assert!(json.get("payload").is_none());

        let output = Output::HostList(HostList {
            network: "10.0.0.0/24".into(),
            hosts: vec!["10.0.0.1".into()],
            raw_output: String::new(),
        });
        let json = serde_json::to_value(&output).unwrap();
        assert_eq!(json["type"], "host_list");
        assert_eq!(json["hosts"][0], "10.0.0.1");
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let s = "é".repeat(10);
        let t = truncate_result(s, 5);
        assert!(t.starts_with("éé..."));
        assert!(t.contains("[truncated: 20 bytes total]"));
        assert_eq!(truncate_result("short".into(), 50), "short");
    }

    #[test]
    fn command_output_text_includes_stderr() {
        let out = Output::CommandOutput(CommandOutput {
            host: "h".into(),
            command: "ls".into(),
            exit_code: Some(2),
            stdout: "a\n".into(),
            stderr: "b".into(),
        });
        let text = out.render_text();
        assert!(text.contains("[stderr]\nb"));
        assert!(text.contains("[exit code 2]"));
    }
}
