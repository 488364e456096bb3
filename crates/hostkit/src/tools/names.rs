//! Canonical tool names.
//!
//! The tool set is closed: every name the dispatcher accepts is a
//! [`ToolName`] variant, and all wire-level strings come from the constants
//! below. Renaming a tool only touches this file.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Rejection;

pub const READ_FILE: &str = "read_file";
pub const LIST_DIRECTORY: &str = "list_directory";
pub const GET_FILE_INFO: &str = "get_file_info";
pub const NMAP_SCAN: &str = "nmap_scan";
pub const PING_HOST: &str = "ping_host";
pub const PORT_SCAN: &str = "port_scan";
pub const NETWORK_DISCOVERY: &str = "network_discovery";
pub const SSH_EXECUTE: &str = "ssh_execute";
pub const SSH_COPY_FILE: &str = "ssh_copy_file";
pub const SSH_KEY_INFO: &str = "ssh_key_info";
pub const FTP_LIST_FILES: &str = "ftp_list_files";
pub const FTP_DOWNLOAD_FILE: &str = "ftp_download_file";
pub const FTP_UPLOAD_FILE: &str = "ftp_upload_file";
pub const TELNET_CONNECT: &str = "telnet_connect";
pub const TELNET_PORT_CHECK: &str = "telnet_port_check";
pub const TELNET_BANNER_GRAB: &str = "telnet_banner_grab";

/// The capability domain a tool belongs to. Each kind maps to exactly one
/// backend and one policy section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    File,
    Scan,
    RemoteShell,
    Transfer,
    Probe,
}

impl BackendKind {
    pub const ALL: [BackendKind; 5] = [
        Self::File,
        Self::Scan,
        Self::RemoteShell,
        Self::Transfer,
        Self::Probe,
    ];

    /// Section name in the configuration file.
    pub fn section(self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Scan => "scan",
            Self::RemoteShell => "shell",
            Self::Transfer => "transfer",
            Self::Probe => "probe",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.section())
    }
}

/// Every tool the dispatcher knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolName {
    ReadFile,
    ListDirectory,
    GetFileInfo,
    NmapScan,
    PingHost,
    PortScan,
    NetworkDiscovery,
    SshExecute,
    SshCopyFile,
    SshKeyInfo,
    FtpListFiles,
    FtpDownloadFile,
    FtpUploadFile,
    TelnetConnect,
    TelnetPortCheck,
    TelnetBannerGrab,
}

impl ToolName {
    /// Registry order. Tool listings follow this order.
    pub const ALL: [ToolName; 16] = [
        Self::ReadFile,
        Self::ListDirectory,
        Self::GetFileInfo,
        Self::NmapScan,
        Self::PingHost,
        Self::PortScan,
        Self::NetworkDiscovery,
        Self::SshExecute,
        Self::SshCopyFile,
        Self::SshKeyInfo,
        Self::FtpListFiles,
        Self::FtpDownloadFile,
        Self::FtpUploadFile,
        Self::TelnetConnect,
        Self::TelnetPortCheck,
        Self::TelnetBannerGrab,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ReadFile => READ_FILE,
            Self::ListDirectory => LIST_DIRECTORY,
            Self::GetFileInfo => GET_FILE_INFO,
            Self::NmapScan => NMAP_SCAN,
            Self::PingHost => PING_HOST,
            Self::PortScan => PORT_SCAN,
            Self::NetworkDiscovery => NETWORK_DISCOVERY,
            Self::SshExecute => SSH_EXECUTE,
            Self::SshCopyFile => SSH_COPY_FILE,
            Self::SshKeyInfo => SSH_KEY_INFO,
            Self::FtpListFiles => FTP_LIST_FILES,
            Self::FtpDownloadFile => FTP_DOWNLOAD_FILE,
            Self::FtpUploadFile => FTP_UPLOAD_FILE,
            Self::TelnetConnect => TELNET_CONNECT,
            Self::TelnetPortCheck => TELNET_PORT_CHECK,
            Self::TelnetBannerGrab => TELNET_BANNER_GRAB,
        }
    }

    pub fn backend(self) -> BackendKind {
        match self {
            Self::ReadFile | Self::ListDirectory | Self::GetFileInfo => BackendKind::File,
            Self::NmapScan | Self::PingHost | Self::PortScan | Self::NetworkDiscovery => {
                BackendKind::Scan
            }
            Self::SshExecute | Self::SshCopyFile | Self::SshKeyInfo => BackendKind::RemoteShell,
            Self::FtpListFiles | Self::FtpDownloadFile | Self::FtpUploadFile => {
                BackendKind::Transfer
            }
            Self::TelnetConnect | Self::TelnetPortCheck | Self::TelnetBannerGrab => {
                BackendKind::Probe
            }
        }
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ToolName {
    type Err = Rejection;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|name| name.as_str() == s)
            .ok_or_else(|| Rejection::UnknownTool(s.to_string()))
    }
}
