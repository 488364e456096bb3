//! Network scanning through `nmap` and `ping`.
//!
//! Scanner output is parsed into structured reports; the raw text is kept
//! alongside so nothing the parser misses is lost.

use schemars::JsonSchema;
use serde::Deserialize;
use tracing::debug;

use crate::backends::exec::{self, CommandSpec, ProcessOutput};
use crate::backends::{Backend, BackendFuture, CallContext};
use crate::error::ExecError;
use crate::tools::args::NormalizedArgs;
use crate::tools::names::{BackendKind, ToolName};
use crate::tools::result::{
    HostList, HostReport, Output, PingReport, PortEntry, PortScanReport, ScanReport,
};

#[derive(Debug, Deserialize, JsonSchema)]
pub struct NmapArgs {
    pub target: String,
    pub scan_type: String,
    pub ports: Option<String>,
    pub options: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct PingArgs {
    pub host: String,
    pub count: u32,
    /// Per-reply wait in seconds.
    pub timeout: u64,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct PortScanArgs {
    pub host: String,
    pub ports: String,
    pub timeout: Option<u64>,
    pub scan_type: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct DiscoveryArgs {
    pub network: String,
    pub scan_type: String,
}

pub struct ScanBackend;

impl ScanBackend {
    pub fn new() -> Self {
        Self
    }

    async fn nmap_scan(&self, args: NmapArgs, ctx: &CallContext) -> Result<Output, ExecError> {
        let mut spec = CommandSpec::new("nmap");
        if let Some(flag) = nmap_flag(&args.scan_type) {
            spec = spec.arg(flag);
        }
        if let Some(ports) = &args.ports {
            spec = spec.args(["-p", ports.as_str()]);
        }
        if let Some(options) = &args.options {
            spec = spec.args(options.split_whitespace());
        }
        spec = spec.arg(args.target.as_str());

        let command = spec.display();
        let output = run_nmap(spec, ctx).await?;
        let parsed = parse_nmap_output(&output.stdout);
        Ok(Output::ScanReport(ScanReport {
            target: args.target,
            scan_type: args.scan_type,
            command,
            hosts: parsed.hosts,
            raw_output: output.stdout,
        }))
    }

    async fn ping(&self, args: PingArgs, ctx: &CallContext) -> Result<Output, ExecError> {
        let spec = CommandSpec::new("ping").args([
            "-c".to_string(),
            args.count.to_string(),
            "-W".to_string(),
            ping_wait(args.timeout),
            args.host.clone(),
        ]);
        let output = exec::run(spec, ctx).await?;

        let diagnostic = output.diagnostic();
        if diagnostic.contains("Operation not permitted") {
            return Err(ExecError::Permission(diagnostic));
        }
        // Exit 1 means no replies; anything above is a resolution or usage error.
        if output.exit_code.is_none_or(|code| code > 1) {
            return Err(ExecError::Connection(format!("ping {}: {diagnostic}", args.host)));
        }

        let stats = parse_ping_output(&output.stdout);
        Ok(Output::PingReport(PingReport {
            host: args.host,
            reachable: stats.received > 0,
            transmitted: stats.transmitted,
            received: stats.received,
            packet_loss_percent: stats.loss_percent,
            rtt_ms: stats.rtt_ms,
            raw_output: output.stdout,
        }))
    }

    async fn port_scan(&self, args: PortScanArgs, ctx: &CallContext) -> Result<Output, ExecError> {
        let flag = nmap_flag(&args.scan_type).unwrap_or("-sT");
        let spec = CommandSpec::new("nmap").args([
            "-Pn",
            flag,
            "-p",
            args.ports.as_str(),
            args.host.as_str(),
        ]);
        let output = run_nmap(spec, ctx).await?;
        let parsed = parse_nmap_output(&output.stdout);
        Ok(Output::PortScanReport(PortScanReport {
            host: args.host,
            scan_type: args.scan_type,
            ports: parsed.hosts.into_iter().flat_map(|h| h.ports).collect(),
            not_shown: parsed.not_shown,
            raw_output: output.stdout,
        }))
    }

    async fn discover(&self, args: DiscoveryArgs, ctx: &CallContext) -> Result<Output, ExecError> {
        let flags: &[&str] = match args.scan_type.as_str() {
            "arp" => &["-sn", "-PR"],
            "list" => &["-sL"],
            _ => &["-sn"],
        };
        let spec = CommandSpec::new("nmap")
            .args(flags.iter().copied())
            .arg(args.network.as_str());
        let output = run_nmap(spec, ctx).await?;
        let list_scan = args.scan_type == "list";
        let hosts = parse_nmap_output(&output.stdout)
            .hosts
            .into_iter()
            .filter(|h| list_scan || h.up)
            .map(|h| h.address)
            .collect();
        Ok(Output::HostList(HostList {
            network: args.network,
            hosts,
            raw_output: output.stdout,
        }))
    }
}

impl Default for ScanBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for ScanBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Scan
    }

    fn execute<'a>(
        &'a self,
        tool: ToolName,
        args: &'a NormalizedArgs,
        ctx: &'a CallContext,
    ) -> BackendFuture<'a> {
        Box::pin(async move {
            match tool {
                ToolName::NmapScan => self.nmap_scan(args.parse()?, ctx).await,
                ToolName::PingHost => self.ping(args.parse()?, ctx).await,
                ToolName::PortScan => self.port_scan(args.parse()?, ctx).await,
                ToolName::NetworkDiscovery => self.discover(args.parse()?, ctx).await,
                other => Err(ExecError::Backend(format!("{other} is not a scan tool"))),
            }
        })
    }
}

fn nmap_flag(scan_type: &str) -> Option<&'static str> {
    match scan_type {
        "syn" => Some("-sS"),
        "udp" => Some("-sU"),
        "tcp" => Some("-sT"),
        "ping" => Some("-sn"),
        "os" => Some("-O"),
        "service" => Some("-sV"),
        _ => None,
    }
}

/// `-W` is milliseconds on macOS and seconds elsewhere.
fn ping_wait(secs: u64) -> String {
    if cfg!(target_os = "macos") {
        (secs * 1000).to_string()
    } else {
        secs.to_string()
    }
}

/// Run nmap and map its failure modes onto error kinds.
async fn run_nmap(spec: CommandSpec, ctx: &CallContext) -> Result<ProcessOutput, ExecError> {
    let output = exec::run(spec, ctx).await?;
    let diagnostic = output.diagnostic();
    if diagnostic.contains("requires root") || diagnostic.contains("Operation not permitted") {
        return Err(ExecError::Permission(diagnostic));
    }
    if output.stderr.contains("Failed to resolve") {
        return Err(ExecError::Connection(output.stderr.trim().to_string()));
    }
    if !output.success() {
        return Err(ExecError::Backend(format!("nmap failed: {diagnostic}")));
    }
    debug!("[scan] nmap finished ({} bytes)", output.stdout.len());
    Ok(output)
}

// ── Parsers ────────────────────────────────────────────────────────

#[derive(Debug, Default, PartialEq)]
pub(crate) struct NmapParsed {
    pub hosts: Vec<HostReport>,
    pub not_shown: Option<String>,
}

/// Parse nmap's normal (human-readable) output.
pub(crate) fn parse_nmap_output(text: &str) -> NmapParsed {
    let mut parsed = NmapParsed::default();
    for line in text.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("Nmap scan report for ") {
            parsed.hosts.push(HostReport {
                address: report_address(rest),
                up: false,
                ports: Vec::new(),
            });
        } else if line.starts_with("Host is up") {
            if let Some(host) = parsed.hosts.last_mut() {
                host.up = true;
            }
        } else if let Some(rest) = line.strip_prefix("Not shown: ") {
            parsed.not_shown = Some(rest.to_string());
        } else if let Some(entry) = parse_port_line(line)
            && let Some(host) = parsed.hosts.last_mut()
        {
            host.up = true;
            host.ports.push(entry);
        }
    }
    parsed
}

/// `"name (1.2.3.4)"` yields the address in parentheses, otherwise the
/// whole string.
fn report_address(rest: &str) -> String {
    rest.strip_suffix(')')
        .and_then(|r| r.rsplit_once(" ("))
        .map_or(rest, |(_, addr)| addr)
        .to_string()
}

/// `22/tcp  open  ssh`
fn parse_port_line(line: &str) -> Option<PortEntry> {
    let mut fields = line.split_whitespace();
    let (port, protocol) = fields.next()?.split_once('/')?;
    let port: u16 = port.parse().ok()?;
    if !matches!(protocol, "tcp" | "udp" | "sctp") {
        return None;
    }
    let state = fields.next()?.to_string();
    let service = fields.next().map(str::to_string);
    Some(PortEntry {
        port,
        protocol: protocol.to_string(),
        state,
        service,
    })
}

#[derive(Debug, Default, PartialEq)]
pub(crate) struct PingStats {
    pub transmitted: u32,
    pub received: u32,
    pub loss_percent: f64,
    pub rtt_ms: Vec<f64>,
}

/// Parse the summary and per-reply lines of `ping` on Linux and macOS.
pub(crate) fn parse_ping_output(text: &str) -> PingStats {
    let mut stats = PingStats::default();
    for line in text.lines() {
        if let Some((_, after)) = line.split_once("time=") {
            let value = after
                .split(|c: char| !(c.is_ascii_digit() || c == '.'))
                .next()
                .and_then(|v| v.parse::<f64>().ok());
            if let Some(ms) = value {
                stats.rtt_ms.push(ms);
            }
        }
        if line.contains("packets transmitted") {
            for part in line.split(',') {
                let part = part.trim();
                let number = part.split_whitespace().next().unwrap_or_default();
                if part.contains("transmitted") {
                    stats.transmitted = number.parse().unwrap_or_default();
                } else if part.contains("received") {
                    stats.received = number.parse().unwrap_or_default();
                } else if part.contains("packet loss") {
                    stats.loss_percent = number.trim_end_matches('%').parse().unwrap_or_default();
                }
            }
        }
    }
    stats
}

#[cfg(test)]
mod tests {
    use super::*;

    const PORT_SCAN: &str = "\
Starting Nmap 7.94 ( https://nmap.org ) at 2024-05-01 10:00 UTC
Nmap scan report for localhost (127.0.0.1)
Host is up (0.00010s latency).
Not shown: 997 closed tcp ports (conn-refused)
PORT    STATE SERVICE
22/tcp  open  ssh
80/tcp  open  http
631/tcp filtered ipp
Nmap done: 1 IP address (1 host up) scanned in 0.05 seconds
";

    const DISCOVERY: &str = "\
Starting Nmap 7.94 ( https://nmap.org ) at 2024-05-01 10:00 UTC
Nmap scan report for 192.168.1.1
Host is up (0.0020s latency).
Nmap scan report for router.lan (192.168.1.254)
Host is up.
Nmap done: 256 IP addresses (2 hosts up) scanned in 2.31 seconds
";

    #[test]
    fn parses_ports_and_summary() {
        let parsed = parse_nmap_output(PORT_SCAN);
        assert_eq!(parsed.hosts.len(), 1);
        let host = &parsed.hosts[0];
        assert_eq!(host.address, "127.0.0.1");
        assert!(host.up);
        assert_eq!(host.ports.len(), 3);
        assert_eq!(host.ports[0].port, 22);
        assert_eq!(host.ports[0].service.as_deref(), Some("ssh"));
        assert_eq!(host.ports[2].state, "filtered");
        assert_eq!(
            parsed.not_shown.as_deref(),
            Some("997 closed tcp ports (conn-refused)")
        );
    }

    #[test]
    fn parses_discovered_hosts() {
        let parsed = parse_nmap_output(DISCOVERY);
        let addrs: Vec<&str> = parsed.hosts.iter().map(|h| h.address.as_str()).collect();
        assert_eq!(addrs, ["192.168.1.1", "192.168.1.254"]);
        assert!(parsed.hosts.iter().all(|h| h.up));
    }

    #[test]
    fn port_line_rejects_headers() {
        assert!(parse_port_line("PORT    STATE SERVICE").is_none());
        assert!(parse_port_line("Nmap done: 1 IP address").is_none());
        let udp = parse_port_line("53/udp open|filtered domain").unwrap();
        assert_eq!(udp.protocol, "udp");
        assert_eq!(udp.state, "open|filtered");
    }

    #[test]
    fn parses_linux_ping() {
        let text = "\
PING 127.0.0.1 (127.0.0.1) 56(84) bytes of data.
64 bytes from 127.0.0.1: icmp_seq=1 ttl=64 time=0.045 ms
64 bytes from 127.0.0.1: icmp_seq=2 ttl=64 time=0.061 ms

--- 127.0.0.1 ping statistics ---
2 packets transmitted, 2 received, 0% packet loss, time 1001ms
rtt min/avg/max/mdev = 0.045/0.053/0.061/0.008 ms
";
        let stats = parse_ping_output(text);
        assert_eq!(stats.transmitted, 2);
        assert_eq!(stats.received, 2);
        assert_eq!(stats.loss_percent, 0.0);
        assert_eq!(stats.rtt_ms, vec![0.045, 0.061]);
    }

    #[test]
    fn parses_macos_ping_with_loss() {
        let text = "\
--- 10.0.0.9 ping statistics ---
4 packets transmitted, 1 packets received, 75.0% packet loss
";
        let stats = parse_ping_output(text);
        assert_eq!(stats.transmitted, 4);
        assert_eq!(stats.received, 1);
        assert_eq!(stats.loss_percent, 75.0);
        assert!(stats.rtt_ms.is_empty());
    }

    #[test]
    fn scan_type_flags() {
        assert_eq!(nmap_flag("basic"), None);
        assert_eq!(nmap_flag("syn"), Some("-sS"));
        assert_eq!(nmap_flag("service"), Some("-sV"));
    }
}
