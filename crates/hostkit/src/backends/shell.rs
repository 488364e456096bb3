//! Remote shell tools over OpenSSH: `ssh`, `scp` and `ssh-keygen`.
//!
//! Passwords are handed to `sshpass -e` through the child environment and
//! never appear on a command line. Without a password the client runs in
//! batch mode so it cannot block on an interactive prompt.

use std::path::Path;
use std::time::Duration;

use schemars::JsonSchema;
use serde::Deserialize;
use tracing::debug;

use crate::backends::exec::{self, CommandSpec, ProcessOutput};
use crate::backends::{Backend, BackendFuture, CallContext};
use crate::error::ExecError;
use crate::tools::args::NormalizedArgs;
use crate::tools::names::{BackendKind, ToolName};
use crate::tools::result::{CommandOutput, KeyInfo, Output, TransferReport};

/// Upper bound on the TCP connect phase of an ssh session.
const MAX_CONNECT_SECS: u64 = 10;

const PUBLIC_KEY_PREFIXES: &[&str] = &["ssh-", "ecdsa-", "sk-"];

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SshExecuteArgs {
    pub host: String,
    pub command: String,
    pub username: String,
    pub password: Option<String>,
    pub key_file: Option<String>,
    pub port: u16,
    pub timeout: Option<u64>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SshCopyArgs {
    pub source_file: String,
    pub dest_file: String,
    pub host: String,
    pub username: String,
    pub password: Option<String>,
    pub key_file: Option<String>,
    pub direction: String,
    pub port: u16,
    pub timeout: Option<u64>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct KeyInfoArgs {
    pub key_file: String,
}

/// Connection settings shared by `ssh` and `scp`.
struct Session<'a> {
    password: Option<&'a str>,
    key_file: Option<&'a str>,
    port: u16,
}

impl Session<'_> {
    /// Start a command line for `program`, wrapped in `sshpass` when a
    /// password is set. `port_flag` is `-p` for ssh and `-P` for scp.
    fn command(&self, program: &str, port_flag: &str, ctx: &CallContext) -> CommandSpec {
        let connect = connect_timeout(ctx.remaining());
        let mut spec = match self.password {
            Some(password) => CommandSpec::new("sshpass")
                .args(["-e", program])
                .env("SSHPASS", password),
            None => CommandSpec::new(program),
        };
        spec = spec
            .arg("-o")
            .arg(format!("ConnectTimeout={connect}"))
            .args(["-o", "StrictHostKeyChecking=accept-new"]);
        spec = if self.password.is_some() {
            spec.args(["-o", "NumberOfPasswordPrompts=1"])
        } else {
            spec.args(["-o", "BatchMode=yes"])
        };
        spec = spec.args([port_flag.to_string(), self.port.to_string()]);
        if let Some(key) = self.key_file {
            spec = spec.args(["-i", key]);
        }
        spec
    }
}

fn connect_timeout(remaining: Duration) -> u64 {
    remaining.as_secs().clamp(1, MAX_CONNECT_SECS)
}

/// ssh and scp exit with 255 on their own failures; classify them.
fn session_error(output: &ProcessOutput) -> ExecError {
    let diagnostic = output.diagnostic();
    if diagnostic.contains("Permission denied") || diagnostic.contains("Authentication failed") {
        ExecError::Permission(diagnostic)
    } else if diagnostic.contains("No such file or directory") {
        ExecError::NotFound(diagnostic)
    } else {
        ExecError::Connection(diagnostic)
    }
}

pub struct ShellBackend;

impl ShellBackend {
    pub fn new() -> Self {
        Self
    }

    async fn execute_remote(
        &self,
        args: SshExecuteArgs,
        ctx: &CallContext,
    ) -> Result<Output, ExecError> {
        let session = Session {
            password: args.password.as_deref(),
            key_file: args.key_file.as_deref(),
            port: args.port,
        };
        let spec = session
            .command("ssh", "-p", ctx)
            .arg(format!("{}@{}", args.username, args.host))
            .arg(args.command.as_str());
        let output = exec::run(spec, ctx).await?;
        if output.exit_code == Some(255) {
            return Err(session_error(&output));
        }
        debug!(
            "[shell] {}@{} exited with {:?}",
            args.username, args.host, output.exit_code
        );
        Ok(Output::CommandOutput(CommandOutput {
            host: args.host,
            command: args.command,
            exit_code: output.exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
        }))
    }

    async fn copy(&self, args: SshCopyArgs, ctx: &CallContext) -> Result<Output, ExecError> {
        let session = Session {
            password: args.password.as_deref(),
            key_file: args.key_file.as_deref(),
            port: args.port,
        };
        let remote_prefix = format!("{}@{}:", args.username, args.host);
        let upload = args.direction == "upload";
        let (source, destination) = if upload {
            (args.source_file.clone(), format!("{remote_prefix}{}", args.dest_file))
        } else {
            (format!("{remote_prefix}{}", args.source_file), args.dest_file.clone())
        };

        let spec = session
            .command("scp", "-P", ctx)
            .args([source.as_str(), destination.as_str()]);
        let output = exec::run(spec, ctx).await?;
        if !output.success() {
            return Err(session_error(&output));
        }

        let local = if upload { &args.source_file } else { &args.dest_file };
        let bytes = tokio::fs::metadata(local).await.map(|m| m.len()).unwrap_or(0);
        Ok(Output::TransferReport(TransferReport {
            direction: args.direction,
            source,
            destination,
            bytes,
        }))
    }

    async fn key_info(&self, args: KeyInfoArgs, ctx: &CallContext) -> Result<Output, ExecError> {
        let path = Path::new(&args.key_file);
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ExecError::io(format!("cannot read {}", path.display()), e))?;
        let public = PUBLIC_KEY_PREFIXES
            .iter()
            .any(|p| text.trim_start().starts_with(p));
        if !public && !text.contains("PRIVATE KEY") {
            return Err(ExecError::Backend(format!(
                "{} does not look like an SSH key",
                path.display()
            )));
        }

        let meta = tokio::fs::metadata(path)
            .await
            .map_err(|e| ExecError::io(format!("cannot stat {}", path.display()), e))?;
        let mode = file_mode(&meta);
        let (key_type, comment) = if public {
            parse_public_key(&text)
        } else {
            (None, None)
        };
        let mut info = KeyInfo {
            path: path.display().to_string(),
            public,
            key_type,
            bits: None,
            fingerprint: None,
            comment,
            permissions: format!("{mode:o}"),
            warnings: Vec::new(),
        };
        if !public && mode & 0o077 != 0 {
            info.warnings.push(format!(
                "private key permissions are {mode:o}; use 600 or 400"
            ));
        }

        let spec = CommandSpec::new("ssh-keygen").args(["-l", "-f", args.key_file.as_str()]);
        let output = exec::run(spec, ctx).await?;
        match output.success().then(|| parse_fingerprint(&output.stdout)).flatten() {
            Some(fp) => {
                info.bits = Some(fp.bits);
                info.fingerprint = Some(fp.fingerprint);
                info.key_type = Some(fp.key_type);
                info.comment = fp.comment.or(info.comment);
            }
            None => info
                .warnings
                .push(format!("ssh-keygen could not read the key: {}", output.diagnostic())),
        }
        Ok(Output::KeyInfo(info))
    }
}

impl Default for ShellBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for ShellBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::RemoteShell
    }

    fn execute<'a>(
        &'a self,
        tool: ToolName,
        args: &'a NormalizedArgs,
        ctx: &'a CallContext,
    ) -> BackendFuture<'a> {
        Box::pin(async move {
            match tool {
                ToolName::SshExecute => self.execute_remote(args.parse()?, ctx).await,
                ToolName::SshCopyFile => self.copy(args.parse()?, ctx).await,
                ToolName::SshKeyInfo => self.key_info(args.parse()?, ctx).await,
                other => Err(ExecError::Backend(format!("{other} is not a shell tool"))),
            }
        })
    }
}

#[cfg(unix)]
fn file_mode(meta: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o777
}

#[cfg(not(unix))]
fn file_mode(meta: &std::fs::Metadata) -> u32 {
    if meta.permissions().readonly() { 0o400 } else { 0o600 }
}

/// `ssh-ed25519 AAAA... comment words` yields the algorithm and comment.
fn parse_public_key(text: &str) -> (Option<String>, Option<String>) {
    let line = text.lines().map(str::trim).find(|l| !l.is_empty()).unwrap_or_default();
    let mut fields = line.splitn(3, ' ');
    let key_type = fields.next().filter(|t| !t.is_empty()).map(str::to_string);
    let comment = fields
        .nth(1)
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string);
    (key_type, comment)
}

#[derive(Debug, PartialEq)]
struct Fingerprint {
    bits: u32,
    fingerprint: String,
    key_type: String,
    comment: Option<String>,
}

/// `256 SHA256:abc... user@host (ED25519)`
fn parse_fingerprint(line: &str) -> Option<Fingerprint> {
    let line = line.lines().next()?.trim();
    let (rest, key_type) = line.strip_suffix(')')?.rsplit_once(" (")?;
    let mut fields = rest.splitn(3, ' ');
    let bits = fields.next()?.parse().ok()?;
    let fingerprint = fields.next()?.to_string();
    let comment = fields
        .next()
        .map(str::trim)
        .filter(|c| !c.is_empty() && *c != "no comment")
        .map(str::to_string);
    Some(Fingerprint {
        bits,
        fingerprint,
        key_type: key_type.to_string(),
        comment,
    })
}
