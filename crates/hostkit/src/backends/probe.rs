//! Raw TCP probes: connect, port check and banner grab.
//!
//! Telnet option negotiation is answered with refusals (`WONT`/`DONT`) and
//! stripped from the captured text, so plain TCP services and telnet
//! daemons both yield readable output.

use std::io;
use std::time::Duration;

use schemars::JsonSchema;
use serde::Deserialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::Instant;
use tracing::debug;

use crate::backends::{Backend, BackendFuture, CallContext};
use crate::error::ExecError;
use crate::tools::args::NormalizedArgs;
use crate::tools::names::{BackendKind, ToolName};
use crate::tools::result::{Banner, ConnectReport, Output, PortCheck};

/// Most bytes kept from a service's first response.
const MAX_RESPONSE_BYTES: usize = 4096;
/// How long telnet_connect listens after connecting.
const CONNECT_LISTEN: Duration = Duration::from_secs(3);
/// Silence after the first data that ends a read.
const IDLE_GAP: Duration = Duration::from_millis(500);

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ConnectArgs {
    pub host: String,
    pub port: u16,
    pub timeout: Option<u64>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct PortCheckArgs {
    pub host: String,
    pub port: u16,
    pub timeout: Option<u64>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct BannerArgs {
    pub host: String,
    pub port: u16,
    pub timeout: Option<u64>,
    pub wait_time: u64,
}

pub struct ProbeBackend;

impl ProbeBackend {
    pub fn new() -> Self {
        Self
    }

    async fn connect(&self, args: ConnectArgs, ctx: &CallContext) -> Result<Output, ExecError> {
        let mut stream = open(&args.host, args.port, ctx).await?;
        let (text, raw) = listen(&mut stream, CONNECT_LISTEN, ctx).await;
        Ok(Output::ConnectReport(ConnectReport {
            host: args.host,
            port: args.port,
            connected: true,
            initial_response: text,
            bytes_received: raw,
        }))
    }

    async fn port_check(&self, args: PortCheckArgs, ctx: &CallContext) -> Result<Output, ExecError> {
        let started = Instant::now();
        let attempt = tokio::time::timeout_at(
            ctx.deadline(),
            TcpStream::connect((args.host.as_str(), args.port)),
        )
        .await;
        let (open, state, latency_ms) = match attempt {
            Ok(Ok(_stream)) => (true, "open", Some(elapsed_ms(started))),
            Ok(Err(e)) if e.kind() == io::ErrorKind::ConnectionRefused => {
                (false, "closed", Some(elapsed_ms(started)))
            }
            Ok(Err(e)) => return Err(connect_error(&args.host, args.port, e)),
            Err(_) => (false, "filtered", None),
        };
        debug!("[probe] {}:{} is {state}", args.host, args.port);
        Ok(Output::PortCheck(PortCheck {
            host: args.host,
            port: args.port,
            open,
            state: state.to_string(),
            latency_ms,
        }))
    }

    async fn banner(&self, args: BannerArgs, ctx: &CallContext) -> Result<Output, ExecError> {
        let mut stream = open(&args.host, args.port, ctx).await?;
        let (banner, raw) = listen(&mut stream, Duration::from_secs(args.wait_time), ctx).await;
        Ok(Output::Banner(Banner {
            host: args.host,
            port: args.port,
            banner,
            bytes_received: raw,
        }))
    }
}

impl Default for ProbeBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for ProbeBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Probe
    }

    fn execute<'a>(
        &'a self,
        tool: ToolName,
        args: &'a NormalizedArgs,
        ctx: &'a CallContext,
    ) -> BackendFuture<'a> {
        Box::pin(async move {
            match tool {
                ToolName::TelnetConnect => self.connect(args.parse()?, ctx).await,
                ToolName::TelnetPortCheck => self.port_check(args.parse()?, ctx).await,
                ToolName::TelnetBannerGrab => self.banner(args.parse()?, ctx).await,
                other => Err(ExecError::Backend(format!("{other} is not a probe tool"))),
            }
        })
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn connect_error(host: &str, port: u16, err: io::Error) -> ExecError {
    ExecError::Connection(format!("cannot connect to {host}:{port}: {err}"))
}

async fn open(host: &str, port: u16, ctx: &CallContext) -> Result<TcpStream, ExecError> {
    tokio::time::timeout_at(ctx.deadline(), TcpStream::connect((host, port)))
        .await
        .map_err(|_| ctx.timed_out())?
        .map_err(|e| connect_error(host, port, e))
}

/// Read what the peer sends within `wait` (and the call deadline),
/// answering telnet negotiation. Returns the cleaned text and the number
/// of raw bytes received.
async fn listen(stream: &mut TcpStream, wait: Duration, ctx: &CallContext) -> (String, usize) {
    let hard_stop = (Instant::now() + wait).min(ctx.deadline());
    let mut filter = TelnetFilter::default();
    let mut data = Vec::new();
    let mut raw = 0usize;
    let mut buf = [0u8; 1024];

    while raw < MAX_RESPONSE_BYTES {
        let stop = if data.is_empty() {
            hard_stop
        } else {
            (Instant::now() + IDLE_GAP).min(hard_stop)
        };
        let n = match tokio::time::timeout_at(stop, stream.read(&mut buf)).await {
            Ok(Ok(0)) | Ok(Err(_)) | Err(_) => break,
            Ok(Ok(n)) => n,
        };
        raw += n;
        let replies = filter.feed(&buf[..n], &mut data);
        if !replies.is_empty()
            && let Err(e) = stream.write_all(&replies).await
        {
            debug!("[probe] negotiation reply failed: {e}");
            break;
        }
    }

    data.truncate(MAX_RESPONSE_BYTES);
    let text = String::from_utf8_lossy(&data).trim().to_string();
    (text, raw)
}

// ── Telnet negotiation ─────────────────────────────────────────────

const IAC: u8 = 255;
const DONT: u8 = 254;
const DO: u8 = 253;
const WONT: u8 = 252;
const WILL: u8 = 251;
const SB: u8 = 250;
const SE: u8 = 240;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
enum FilterState {
    #[default]
    Data,
    Iac,
    Option(u8),
    Sub,
    SubIac,
}

/// Byte-level telnet parser that survives sequences split across reads.
#[derive(Debug, Default)]
struct TelnetFilter {
    state: FilterState,
}

impl TelnetFilter {
    /// Append the data bytes of `input` to `out`; return the replies to send.
    fn feed(&mut self, input: &[u8], out: &mut Vec<u8>) -> Vec<u8> {
        let mut replies = Vec::new();
        for &b in input {
            self.state = match (self.state, b) {
                (FilterState::Data, IAC) => FilterState::Iac,
                (FilterState::Data, _) => {
                    out.push(b);
                    FilterState::Data
                }
                (FilterState::Iac, IAC) => {
                    out.push(IAC);
                    FilterState::Data
                }
                (FilterState::Iac, WILL | WONT | DO | DONT) => FilterState::Option(b),
                (FilterState::Iac, SB) => FilterState::Sub,
                (FilterState::Iac, _) => FilterState::Data,
                (FilterState::Option(cmd), option) => {
                    match cmd {
                        DO => replies.extend_from_slice(&[IAC, WONT, option]),
                        WILL => replies.extend_from_slice(&[IAC, DONT, option]),
                        _ => {}
                    }
                    FilterState::Data
                }
                (FilterState::Sub, IAC) => FilterState::SubIac,
                (FilterState::Sub, _) => FilterState::Sub,
                (FilterState::SubIac, SE) => FilterState::Data,
                (FilterState::SubIac, _) => FilterState::Sub,
            };
        }
        replies
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::ProcessTracker;
    use tokio::net::TcpListener;

    fn ctx(secs: u64) -> CallContext {
        CallContext::new(Duration::from_secs(secs), ProcessTracker::new(), None)
    }

    #[test]
    fn filter_strips_negotiation_and_replies() {
        let mut filter = TelnetFilter::default();
        let mut out = Vec::new();
        let input = [IAC, DO, 1, b'h', b'i', IAC, WILL, 3, IAC, IAC, IAC, SB, 24, 1, IAC, SE, b'!'];
        let replies = filter.feed(&input, &mut out);
        assert_eq!(out, [b'h', b'i', IAC, b'!']);
        assert_eq!(replies, [IAC, WONT, 1, IAC, DONT, 3]);
    }

    #[test]
    fn filter_handles_split_sequences() {
        let mut filter = TelnetFilter::default();
        let mut out = Vec::new();
        assert!(filter.feed(&[b'a', IAC], &mut out).is_empty());
        let replies = filter.feed(&[DO, 31, b'b'], &mut out);
        assert_eq!(out, b"ab");
        assert_eq!(replies, [IAC, WONT, 31]);
    }

    #[tokio::test]
    async fn port_check_open_and_closed() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let backend = ProbeBackend::new();

        let args = PortCheckArgs {
            host: "127.0.0.1".into(),
            port,
            timeout: None,
        };
        let Output::PortCheck(check) = backend.port_check(args, &ctx(5)).await.unwrap() else {
            panic!("wrong payload");
        };
        assert!(check.open);
        assert_eq!(check.state, "open");
        assert!(check.latency_ms.is_some());

        drop(listener);
        let args = PortCheckArgs {
            host: "127.0.0.1".into(),
            port,
            timeout: None,
        };
        let Output::PortCheck(check) = backend.port_check(args, &ctx(5)).await.unwrap() else {
            panic!("wrong payload");
        };
        assert!(!check.open);
        assert_eq!(check.state, "closed");
    }

    #[tokio::test]
    async fn banner_grab_reads_greeting() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            sock.write_all(b"SSH-2.0-TestServer\r\n").await.unwrap();
            tokio::time::sleep(Duration::from_secs(2)).await;
        });

        let started = Instant::now();
        let args = BannerArgs {
            host: "127.0.0.1".into(),
            port,
            timeout: None,
            wait_time: 5,
        };
        let Output::Banner(banner) = ProbeBackend::new().banner(args, &ctx(10)).await.unwrap()
        else {
            panic!("wrong payload");
        };
        assert_eq!(banner.banner, "SSH-2.0-TestServer");
        assert_eq!(banner.bytes_received, 20);
        assert!(started.elapsed() < Duration::from_secs(2));
        server.abort();
    }

    #[tokio::test]
    async fn connect_answers_negotiation() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            sock.write_all(&[IAC, DO, 1]).await.unwrap();
            sock.write_all(b"login: ").await.unwrap();
            let mut reply = [0u8; 3];
            sock.read_exact(&mut reply).await.unwrap();
            reply
        });

        let args = ConnectArgs {
            host: "127.0.0.1".into(),
            port,
            timeout: None,
        };
        let Output::ConnectReport(report) = ProbeBackend::new().connect(args, &ctx(10)).await.unwrap()
        else {
            panic!("wrong payload");
        };
        assert!(report.connected);
        assert_eq!(report.initial_response, "login:");
        assert_eq!(server.await.unwrap(), [IAC, WONT, 1]);
    }

    #[tokio::test]
    async fn refused_connect_is_a_connection_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let args = ConnectArgs {
            host: "127.0.0.1".into(),
            port,
            timeout: None,
        };
        let err = ProbeBackend::new().connect(args, &ctx(5)).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::ConnectionError);
    }
}
