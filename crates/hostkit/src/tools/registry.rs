//! The fixed tool table.
//!
//! [`Registry::standard`] builds one [`ToolDescriptor`] per [`ToolName`]
//! at startup. The registry is never extended at runtime.

use std::collections::BTreeSet;

use crate::tools::names::{BackendKind, ToolName};
use crate::tools::spec::{Constraint, ParamSpec, PathAccess, ToolDescriptor};

pub const NMAP_SCAN_TYPES: &[&str] = &["basic", "syn", "udp", "tcp", "ping", "os", "service"];
pub const PORT_SCAN_TYPES: &[&str] = &["tcp", "udp", "syn"];
pub const DISCOVERY_SCAN_TYPES: &[&str] = &["ping", "arp", "list"];
pub const COPY_DIRECTIONS: &[&str] = &["upload", "download"];

const MAX_PASSWORD_LEN: usize = 256;

#[derive(Debug, Clone)]
pub struct Registry {
    descriptors: Vec<ToolDescriptor>,
}

impl Registry {
    pub fn standard() -> Self {
        Self {
            descriptors: ToolName::ALL.into_iter().map(descriptor).collect(),
        }
    }

    pub fn get(&self, name: ToolName) -> Option<&ToolDescriptor> {
        self.descriptors.iter().find(|d| d.name == name)
    }

    /// Descriptors in registry order.
    pub fn iter(&self) -> impl Iterator<Item = &ToolDescriptor> {
        self.descriptors.iter()
    }

    pub fn for_backend(&self, kind: BackendKind) -> impl Iterator<Item = &ToolDescriptor> {
        self.iter().filter(move |d| d.backend == kind)
    }

    /// Every external program some tool needs.
    pub fn required_programs(&self) -> BTreeSet<&'static str> {
        self.iter().flat_map(ToolDescriptor::programs).collect()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::standard()
    }
}

// ── Shared parameters ──────────────────────────────────────────────

fn host() -> ParamSpec {
    ParamSpec::string("host", "Host name or IP address")
        .required()
        .constraint(Constraint::Host)
}

fn port(description: &'static str, default: i64) -> ParamSpec {
    ParamSpec::integer("port", description)
        .default(default)
        .range(1, 65_535)
}

fn call_timeout() -> ParamSpec {
    ParamSpec::integer(
        "timeout",
        "Seconds before the operation is abandoned (default and maximum: the backend limit)",
    )
    .constraint(Constraint::Timeout)
}

fn username(required: bool) -> ParamSpec {
    let spec = ParamSpec::string("username", "Login name").constraint(Constraint::Username);
    if required {
        spec.required()
    } else {
        spec.default("anonymous")
    }
}

fn password() -> ParamSpec {
    ParamSpec::string("password", "Login password (never placed on a command line)")
        .constraint(Constraint::MaxLen(MAX_PASSWORD_LEN))
}

fn key_file() -> ParamSpec {
    ParamSpec::string("key_file", "Private key inside the sandbox roots")
        .constraint(Constraint::Path(PathAccess::Read))
}

// ── Descriptor table ───────────────────────────────────────────────

fn descriptor(name: ToolName) -> ToolDescriptor {
    let builder = ToolDescriptor::builder(name);
    match name {
        ToolName::ReadFile => builder
            .purpose("Read a UTF-8 text file inside the sandbox roots, optionally a line window")
            .output_format("File content with total and returned line counts")
            .param(
                ParamSpec::string("file_path", "File to read, absolute or relative to the first root")
                    .required()
                    .constraint(Constraint::Path(PathAccess::Read)),
            )
            .param(ParamSpec::integer("start_line", "First line to return (1-based)").range(1, i64::MAX))
            .param(ParamSpec::integer("end_line", "Last line to return (inclusive)").range(1, i64::MAX))
            .build(),

        ToolName::ListDirectory => builder
            .purpose("List a directory inside the sandbox roots, sorted by name")
            .output_format("Entries with name, type and size")
            .param(
                ParamSpec::string("directory_path", "Directory to list")
                    .required()
                    .constraint(Constraint::Path(PathAccess::Any)),
            )
            .param(ParamSpec::boolean("show_hidden", "Include dot-files").default(false))
            .param(
                ParamSpec::integer("max_items", "Maximum entries returned")
                    .default(1000)
                    .range(1, 10_000),
            )
            .build(),

        ToolName::GetFileInfo => builder
            .purpose("Show size, type, permissions, owner and modification time of a path")
            .param(
                ParamSpec::string("file_path", "File or directory to inspect")
                    .required()
                    .constraint(Constraint::Path(PathAccess::Any)),
            )
            .build(),

        ToolName::NmapScan => builder
            .purpose("Run an nmap scan against a host or network")
            .output_format("Hosts with open ports and services, plus the raw scanner output")
            .param(
                ParamSpec::string("target", "Host, address or CIDR network")
                    .required()
                    .constraint(Constraint::Target),
            )
            .param(
                ParamSpec::string("scan_type", "Scan profile")
                    .default("basic")
                    .constraint(Constraint::OneOf(NMAP_SCAN_TYPES)),
            )
            .param(
                ParamSpec::string("ports", "Ports to scan, e.g. '22,80' or '1-1024'")
                    .constraint(Constraint::PortList),
            )
            .param(
                ParamSpec::string("options", "Extra scanner flags, e.g. '-T4 --open'")
                    .constraint(Constraint::ScanOptions),
            )
            .requires(&["nmap"])
            .build(),

        ToolName::PingHost => builder
            .purpose("Send ICMP echo requests to a host")
            .output_format("Reachability, packet counts and round-trip samples in ms")
            .param(host())
            .param(ParamSpec::integer("count", "Echo requests to send").default(4).range(1, 10))
            .param(
                ParamSpec::integer("timeout", "Seconds to wait for each reply")
                    .default(5)
                    .range(1, 30),
            )
            .requires(&["ping"])
            .build(),

        ToolName::PortScan => builder
            .purpose("Scan specific ports on one host without host discovery")
            .output_format("Per-port state and service")
            .param(host())
            .param(
                ParamSpec::string("ports", "Ports to scan, e.g. '22,80' or '1-1024'")
                    .required()
                    .constraint(Constraint::PortList),
            )
            .param(call_timeout())
            .param(
                ParamSpec::string("scan_type", "Probe type")
                    .default("tcp")
                    .constraint(Constraint::OneOf(PORT_SCAN_TYPES)),
            )
            .requires(&["nmap"])
            .build(),

        ToolName::NetworkDiscovery => builder
            .purpose("Find live hosts in a CIDR network")
            .output_format("Addresses of hosts that answered")
            .param(
                ParamSpec::string("network", "CIDR network, e.g. 192.168.1.0/24")
                    .required()
                    .constraint(Constraint::Network),
            )
            .param(
                ParamSpec::string("scan_type", "Discovery method")
                    .default("ping")
                    .constraint(Constraint::OneOf(DISCOVERY_SCAN_TYPES)),
            )
            .requires(&["nmap"])
            .build(),

        ToolName::SshExecute => builder
            .purpose("Run one command on a remote host over SSH")
            .output_format("Remote stdout, stderr and exit code")
            .param(host())
            .param(
                ParamSpec::string("command", "Command line to run remotely")
                    .required()
                    .constraint(Constraint::Command),
            )
            .param(username(true))
            .param(password().needs("sshpass"))
            .param(key_file())
            .param(port("SSH port", 22))
            .param(call_timeout())
            .requires(&["ssh"])
            .build(),

        ToolName::SshCopyFile => builder
            .purpose("Copy a file to or from a remote host with scp")
            .output_format("Transfer direction, endpoints and bytes moved")
            .param(
                ParamSpec::string("source_file", "Local path for uploads, remote path for downloads")
                    .required()
                    .constraint(Constraint::PathWhen {
                        param: "direction",
                        equals: "upload",
                        access: PathAccess::Any,
                    }),
            )
            .param(
                ParamSpec::string("dest_file", "Remote path for uploads, local path for downloads")
                    .required()
                    .constraint(Constraint::PathWhen {
                        param: "direction",
                        equals: "download",
                        access: PathAccess::Write,
                    }),
            )
            .param(host())
            .param(username(true))
            .param(password().needs("sshpass"))
            .param(key_file())
            .param(
                ParamSpec::string("direction", "'upload' (local to remote) or 'download'")
                    .default("upload")
                    .constraint(Constraint::OneOf(COPY_DIRECTIONS)),
            )
            .param(port("SSH port", 22))
            .param(call_timeout())
            .requires(&["scp"])
            .build(),

        ToolName::SshKeyInfo => builder
            .purpose("Inspect an SSH key file: type, size, fingerprint and permissions")
            .param(
                ParamSpec::string("key_file", "Public or private key inside the sandbox roots")
                    .required()
                    .constraint(Constraint::Path(PathAccess::Read)),
            )
            .requires(&["ssh-keygen"])
            .build(),

        ToolName::FtpListFiles => builder
            .purpose("List a directory on an FTP server")
            .output_format("Entry names")
            .param(host())
            .param(
                ParamSpec::string("directory", "Remote directory")
                    .default("/")
                    .constraint(Constraint::RemotePath),
            )
            .param(username(false))
            .param(password())
            .param(port("FTP control port", 21))
            .param(call_timeout())
            .requires(&["curl"])
            .build(),

        ToolName::FtpDownloadFile => builder
            .purpose("Download one file from an FTP server into the sandbox")
            .output_format("Transfer endpoints and bytes written")
            .param(host())
            .param(
                ParamSpec::string("remote_file", "File on the server")
                    .required()
                    .constraint(Constraint::RemotePath),
            )
            .param(
                ParamSpec::string("local_file", "Destination inside the sandbox roots")
                    .required()
                    .constraint(Constraint::Path(PathAccess::Write)),
            )
            .param(username(false))
            .param(password())
            .param(port("FTP control port", 21))
            .param(call_timeout())
            .requires(&["curl"])
            .build(),

        ToolName::FtpUploadFile => builder
            .purpose("Upload one file from the sandbox to an FTP server")
            .output_format("Transfer endpoints and bytes sent")
            .param(host())
            .param(
                ParamSpec::string("local_file", "Source inside the sandbox roots")
                    .required()
                    .constraint(Constraint::Path(PathAccess::Any)),
            )
            .param(
                ParamSpec::string("remote_file", "Destination on the server")
                    .required()
                    .constraint(Constraint::RemotePath),
            )
            .param(username(false))
            .param(password())
            .param(port("FTP control port", 21))
            .param(call_timeout())
            .requires(&["curl"])
            .build(),

        ToolName::TelnetConnect => builder
            .purpose("Open a TCP connection and capture whatever the service sends first")
            .output_format("Connection status and initial response with telnet negotiation removed")
            .param(host())
            .param(port("TCP port", 23))
            .param(call_timeout())
            .build(),

        ToolName::TelnetPortCheck => builder
            .purpose("Check whether a TCP port accepts connections")
            .output_format("open, closed or filtered, with connect latency")
            .param(host())
            .param(
                ParamSpec::integer("port", "TCP port")
                    .required()
                    .range(1, 65_535),
            )
            .param(call_timeout())
            .build(),

        ToolName::TelnetBannerGrab => builder
            .purpose("Connect to a TCP service and read its banner")
            .output_format("Banner text")
            .param(host())
            .param(port("TCP port", 23))
            .param(call_timeout())
            .param(
                ParamSpec::integer("wait_time", "Seconds to wait for banner data")
                    .default(3)
                    .range(1, 10),
            )
            .build(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::args::ArgValue;
    use crate::tools::spec::ParamType;

    #[test]
    fn one_descriptor_per_tool_in_order() {
        let registry = Registry::standard();
        let names: Vec<ToolName> = registry.iter().map(|d| d.name).collect();
        assert_eq!(names, ToolName::ALL.to_vec());
    }

    #[test]
    fn every_descriptor_has_a_purpose() {
        for desc in Registry::standard().iter() {
            assert!(!desc.purpose.is_empty(), "{} has no purpose", desc.name);
        }
    }

    #[test]
    fn parameter_names_are_unique() {
        for desc in Registry::standard().iter() {
            let mut seen = BTreeSet::new();
            for p in &desc.params {
                assert!(seen.insert(p.name), "{} declares '{}' twice", desc.name, p.name);
            }
        }
    }

    #[test]
    fn defaults_match_declared_types() {
        for desc in Registry::standard().iter() {
            for p in &desc.params {
                let Some(default) = &p.default else { continue };
                let ok = matches!(
                    (p.ty, default),
                    (ParamType::String, ArgValue::Str(_))
                        | (ParamType::Integer, ArgValue::Int(_))
                        | (ParamType::Boolean, ArgValue::Bool(_))
                );
                assert!(ok, "{}.{} default has the wrong type", desc.name, p.name);
                assert!(!p.required, "{}.{} is required but has a default", desc.name, p.name);
            }
        }
    }

    #[test]
    fn required_programs() {
        let programs = Registry::standard().required_programs();
        for program in ["nmap", "ping", "ssh", "scp", "ssh-keygen", "curl", "sshpass"] {
            assert!(programs.contains(program), "{program}");
        }
    }

    #[test]
    fn password_auth_needs_sshpass_only_over_ssh() {
        let registry = Registry::standard();
        for desc in registry.for_backend(BackendKind::RemoteShell) {
            let Some(password) = desc.param("password") else { continue };
            assert_eq!(password.needs, Some("sshpass"), "{}", desc.name);
        }
        let ftp = registry.get(ToolName::FtpListFiles).unwrap();
        assert_eq!(ftp.param("password").unwrap().needs, None);
        assert_eq!(registry.for_backend(BackendKind::Probe).count(), 3);
    }
}
