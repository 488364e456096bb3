//! FTP transfers through `curl`.
//!
//! Credentials are written to curl's stdin as a config file (`--config -`)
//! so they never show up in the process table.

use std::path::Path;

use schemars::JsonSchema;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::backends::exec::{self, CommandSpec, ProcessOutput};
use crate::backends::{Backend, BackendFuture, CallContext};
use crate::error::ExecError;
use crate::tools::args::NormalizedArgs;
use crate::tools::names::{BackendKind, ToolName};
use crate::tools::result::{FtpListing, Output, TransferReport};

/// Cap on the connect phase, inside the overall call budget.
const MAX_CONNECT_SECS: u64 = 15;

#[derive(Debug, Deserialize, JsonSchema)]
pub struct FtpListArgs {
    pub host: String,
    pub directory: String,
    pub username: String,
    pub password: Option<String>,
    pub port: u16,
    pub timeout: Option<u64>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct FtpDownloadArgs {
    pub host: String,
    pub remote_file: String,
    pub local_file: String,
    pub username: String,
    pub password: Option<String>,
    pub port: u16,
    pub timeout: Option<u64>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct FtpUploadArgs {
    pub host: String,
    pub local_file: String,
    pub remote_file: String,
    pub username: String,
    pub password: Option<String>,
    pub port: u16,
    pub timeout: Option<u64>,
}

/// Login details for one server.
struct Login<'a> {
    host: &'a str,
    port: u16,
    username: &'a str,
    password: Option<&'a str>,
}

impl Login<'_> {
    fn url(&self, path: &str) -> String {
        let host = if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.to_string()
        };
        let path = path.trim_start_matches('/');
        format!("ftp://{host}:{}/{}", self.port, encode_path(path))
    }

    /// curl config text carrying the credentials.
    fn config(&self) -> String {
        let user = format!("{}:{}", self.username, self.password.unwrap_or_default());
        format!("user = \"{}\"\n", escape_config(&user))
    }

    fn command(&self, ctx: &CallContext) -> CommandSpec {
        let remaining = ctx.remaining().as_secs().max(1);
        CommandSpec::new("curl")
            .args(["--silent", "--show-error", "--config", "-"])
            .arg("--connect-timeout")
            .arg(remaining.min(MAX_CONNECT_SECS).to_string())
            .arg("--max-time")
            .arg(remaining.to_string())
            .stdin(self.config())
    }
}

pub struct TransferBackend;

impl TransferBackend {
    pub fn new() -> Self {
        Self
    }

    async fn list(&self, args: FtpListArgs, ctx: &CallContext) -> Result<Output, ExecError> {
        let login = Login {
            host: &args.host,
            port: args.port,
            username: &args.username,
            password: args.password.as_deref(),
        };
        let mut directory = args.directory.clone();
        if !directory.ends_with('/') {
            directory.push('/');
        }
        let spec = login
            .command(ctx)
            .arg("--list-only")
            .arg(login.url(&directory));
        let output = run_curl(spec, ctx).await?;
        let entries = output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();
        Ok(Output::FtpListing(FtpListing {
            host: args.host,
            directory: args.directory,
            entries,
        }))
    }

    async fn download(&self, args: FtpDownloadArgs, ctx: &CallContext) -> Result<Output, ExecError> {
        let login = Login {
            host: &args.host,
            port: args.port,
            username: &args.username,
            password: args.password.as_deref(),
        };
        let url = login.url(&args.remote_file);
        let existed = tokio::fs::try_exists(&args.local_file).await.unwrap_or(true);
        let spec = login
            .command(ctx)
            .args(["-o", args.local_file.as_str()])
            .arg(url.as_str());

        if let Err(err) = run_curl(spec, ctx).await {
            if !existed && let Err(e) = tokio::fs::remove_file(&args.local_file).await {
                debug!("[transfer] no partial file to remove: {e}");
            }
            return Err(err);
        }

        let bytes = local_size(&args.local_file).await;
        Ok(Output::TransferReport(TransferReport {
            direction: "download".into(),
            source: url,
            destination: args.local_file,
            bytes,
        }))
    }

    async fn upload(&self, args: FtpUploadArgs, ctx: &CallContext) -> Result<Output, ExecError> {
        let login = Login {
            host: &args.host,
            port: args.port,
            username: &args.username,
            password: args.password.as_deref(),
        };
        let url = login.url(&args.remote_file);
        let bytes = local_size(&args.local_file).await;
        let spec = login
            .command(ctx)
            .args(["-T", args.local_file.as_str()])
            .arg(url.as_str());
        run_curl(spec, ctx).await?;
        Ok(Output::TransferReport(TransferReport {
            direction: "upload".into(),
            source: args.local_file,
            destination: url,
            bytes,
        }))
    }
}

impl Default for TransferBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for TransferBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Transfer
    }

    fn execute<'a>(
        &'a self,
        tool: ToolName,
        args: &'a NormalizedArgs,
        ctx: &'a CallContext,
    ) -> BackendFuture<'a> {
        Box::pin(async move {
            match tool {
                ToolName::FtpListFiles => self.list(args.parse()?, ctx).await,
                ToolName::FtpDownloadFile => self.download(args.parse()?, ctx).await,
                ToolName::FtpUploadFile => self.upload(args.parse()?, ctx).await,
                other => Err(ExecError::Backend(format!("{other} is not a transfer tool"))),
            }
        })
    }
}

async fn local_size(path: impl AsRef<Path>) -> u64 {
    tokio::fs::metadata(path).await.map(|m| m.len()).unwrap_or(0)
}

async fn run_curl(spec: CommandSpec, ctx: &CallContext) -> Result<ProcessOutput, ExecError> {
    let output = exec::run(spec, ctx).await?;
    match output.exit_code {
        Some(0) => Ok(output),
        code => {
            let err = classify_curl_exit(code, output.diagnostic(), ctx);
            warn!("[transfer] curl failed ({code:?}): {err}");
            Err(err)
        }
    }
}

/// Map curl exit codes onto error kinds.
fn classify_curl_exit(code: Option<i32>, diagnostic: String, ctx: &CallContext) -> ExecError {
    match code {
        Some(6 | 7) => ExecError::Connection(diagnostic),
        Some(28) => ctx.timed_out(),
        Some(9 | 67) => ExecError::Permission(diagnostic),
        Some(19 | 78) => ExecError::NotFound(diagnostic),
        _ => ExecError::Backend(format!("ftp transfer failed: {diagnostic}")),
    }
}

/// Percent-encode a URL path, keeping `/` separators.
fn encode_path(path: &str) -> String {
    let mut out = String::with_capacity(path.len() * 3);
    for b in path.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/' => {
                out.push(b as char);
            }
            _ => {
                out.push('%');
                out.push_str(&format!("{b:02X}"));
            }
        }
    }
    out
}

fn escape_config(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
