//! Spawn an external program with a deadline.
//!
//! Every backend that shells out goes through [`run`]. Output is captured
//! up to a byte cap (the pipes keep draining past the cap so the child never
//! blocks). On Unix each child leads its own process group; a call that
//! outlives its deadline, or is dropped mid-flight, takes the whole group
//! down with it, so helpers like `ssh` under `sshpass` or a backgrounded
//! pipeline stage cannot linger. [`ProcessTracker`] counts live children
//! across all calls.

use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tracing::{debug, warn};

use crate::backends::CallContext;
use crate::error::ExecError;
use crate::tools::result::DEFAULT_MAX_TEXT_BYTES;

// ── ProcessTracker ─────────────────────────────────────────────────

/// Number of child processes currently alive.
#[derive(Debug, Clone, Default)]
pub struct ProcessTracker {
    active: Arc<AtomicUsize>,
}

impl ProcessTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    fn track(&self) -> TrackedChild {
        self.active.fetch_add(1, Ordering::SeqCst);
        TrackedChild {
            active: Arc::clone(&self.active),
        }
    }
}

/// Decrements the tracker when the child is gone.
struct TrackedChild {
    active: Arc<AtomicUsize>,
}

impl Drop for TrackedChild {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

// ── CommandSpec ────────────────────────────────────────────────────

/// What to run.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    program: String,
    args: Vec<String>,
    env: Vec<(String, String)>,
    stdin: Option<Vec<u8>>,
    max_output_bytes: usize,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            stdin: None,
            max_output_bytes: DEFAULT_MAX_TEXT_BYTES,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set an environment variable for the child only.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Bytes written to the child's stdin, which is then closed.
    pub fn stdin(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn max_output_bytes(mut self, max: usize) -> Self {
        self.max_output_bytes = max;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// The command line as it would be typed, for reports and logs.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Captured result of a finished child.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    /// `None` when the child was terminated by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub truncated: bool,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// stderr if present, otherwise stdout, trimmed. Used in error messages.
    pub fn diagnostic(&self) -> String {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim().to_string()
        } else {
            stderr.to_string()
        }
    }
}

// ── run ────────────────────────────────────────────────────────────

/// Run `spec` to completion or until the call deadline.
pub async fn run(spec: CommandSpec, ctx: &CallContext) -> Result<ProcessOutput, ExecError> {
    debug!("[exec] {}", spec.display());

    let mut command = Command::new(&spec.program);
    command
        .args(&spec.args)
        .stdin(if spec.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    command.process_group(0);
    for (key, value) in &spec.env {
        command.env(key, value);
    }

    let mut child = command.spawn().map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => ExecError::unavailable(&spec.program),
        _ => ExecError::io(format!("failed to start {}", spec.program), e),
    })?;
    let _tracked = ctx.tracker().track();
    let mut group = ProcessGroup::of(&child);

    let stdin = child.stdin.take();
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let cap = spec.max_output_bytes;
    let program = spec.program.as_str();

    let finished = tokio::time::timeout_at(ctx.deadline(), async {
        let ((), (out, out_truncated), (err, err_truncated)) = tokio::join!(
            write_stdin(program, stdin, spec.stdin.as_deref()),
            read_capped(stdout, cap),
            read_capped(stderr, cap),
        );
        let status = child.wait().await?;
        Ok::<_, std::io::Error>((status, out, err, out_truncated || err_truncated))
    })
    .await;

    match finished {
        Ok(Ok((status, out, err, truncated))) => {
            group.release();
            Ok(ProcessOutput {
                exit_code: status.code(),
                stdout: String::from_utf8_lossy(&out).into_owned(),
                stderr: String::from_utf8_lossy(&err).into_owned(),
                truncated,
            })
        }
        Ok(Err(e)) => Err(ExecError::io(format!("waiting for {program}"), e)),
        Err(_) => {
            group.kill();
            if let Err(e) = child.kill().await {
                warn!("[exec] failed to kill {program}: {e}");
            }
            Err(ExecError::Timeout {
                secs: ctx.timeout().as_secs(),
            })
        }
    }
}

/// Feed `input` to the child and close its stdin. Errors mean the child
/// exited or closed the pipe early; its exit status tells the rest.
async fn write_stdin(program: &str, pipe: Option<ChildStdin>, input: Option<&[u8]>) {
    let (Some(mut pipe), Some(input)) = (pipe, input) else {
        return;
    };
    if let Err(e) = pipe.write_all(input).await {
        debug!("[exec] {program}: stdin write failed: {e}");
    }
}

// ── ProcessGroup ───────────────────────────────────────────────────

/// The child's process group. Killed on [`kill`](Self::kill) or when
/// dropped while still armed; [`release`](Self::release) disarms it once
/// the child has exited normally.
struct ProcessGroup {
    pgid: Option<i32>,
}

impl ProcessGroup {
    fn of(child: &Child) -> Self {
        let pgid = if cfg!(unix) {
            child.id().and_then(|pid| i32::try_from(pid).ok())
        } else {
            None
        };
        Self { pgid }
    }

    fn release(&mut self) {
        self.pgid = None;
    }

    fn kill(&mut self) {
        if let Some(pgid) = self.pgid.take() {
            signal_group(pgid);
        }
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.kill();
    }
}

#[cfg(unix)]
fn signal_group(pgid: i32) {
    // SAFETY: killpg takes plain integers and touches no memory.
    let rc = unsafe { libc::killpg(pgid, libc::SIGKILL) };
    if rc != 0 {
        let err = std::io::Error::last_os_error();
        // ESRCH: every member is already gone.
        if err.raw_os_error() != Some(libc::ESRCH) {
            warn!("[exec] failed to kill process group {pgid}: {err}");
        }
    }
}

#[cfg(not(unix))]
fn signal_group(_pgid: i32) {}

/// Read a pipe to EOF, keeping at most `cap` bytes.
async fn read_capped<R: AsyncRead + Unpin>(reader: Option<R>, cap: usize) -> (Vec<u8>, bool) {
    let Some(mut reader) = reader else {
        return (Vec::new(), false);
    };
    let mut kept = Vec::new();
    let mut truncated = false;
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let room = cap.saturating_sub(kept.len());
                if n > room {
                    truncated = true;
                }
                kept.extend_from_slice(&chunk[..n.min(room)]);
            }
        }
    }
    (kept, truncated)
}
