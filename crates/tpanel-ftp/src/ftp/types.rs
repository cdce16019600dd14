//! Shared types for the FTP engine.

use crate::ftp::error::{FtpError, FtpResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

// ─── Modes ───────────────────────────────────────────────────────────

/// How the data connection is established.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionMode {
    /// `PASV`: server listens, client connects.
    Passive,
    /// `PORT`: client listens, server connects.
    Active,
}

impl Default for ConnectionMode {
    fn default() -> Self {
        Self::Passive
    }
}

/// Representation type (RFC 959 `TYPE`).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum TransferMode {
    Ascii,
    Image,
}

impl TransferMode {
    pub fn type_code(self) -> char {
        match self {
            Self::Ascii => 'A',
            Self::Image => 'I',
        }
    }
}

impl Default for TransferMode {
    fn default() -> Self {
        Self::Image
    }
}

/// What a data connection is opened for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessType {
    /// `NLST`, names only.
    Dir,
    /// `LIST -aL`, long listing.
    DirVerbose,
    /// `RETR` into a fresh local file.
    FileRead,
    /// `STOR` from the start of a local file.
    FileWrite,
    /// `RETR` appended to an existing local file (resume).
    FileReadAppend,
    /// `STOR` from an offset of a local file (resume).
    FileWriteAppend,
}

impl AccessType {
    pub fn verb(self) -> &'static str {
        match self {
            Self::Dir => "NLST",
            Self::DirVerbose => "LIST -aL",
            Self::FileRead | Self::FileReadAppend => "RETR",
            Self::FileWrite | Self::FileWriteAppend => "STOR",
        }
    }

    pub fn direction(self) -> Direction {
        match self {
            Self::FileWrite | Self::FileWriteAppend => Direction::Write,
            _ => Direction::Read,
        }
    }

    pub fn requires_path(self) -> bool {
        !matches!(self, Self::Dir | Self::DirVerbose)
    }
}

/// Direction of a data channel, seen from the client.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum Direction {
    Read,
    Write,
}

/// Which side listens in a server-to-server transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FxpMethod {
    /// Destination `PASV`, source `PORT`, `RETR` before `STOR`.
    Default,
    /// Source `PASV`, destination `PORT`, `STOR` before `RETR`.
    Alternative,
}

impl Default for FxpMethod {
    fn default() -> Self {
        Self::Default
    }
}

/// Data-channel protection level (`PROT`).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum DataEncryption {
    /// `PROT C`
    Unencrypted,
    /// `PROT P`
    Secure,
}

/// Whether closing a data channel reads the transfer's final status reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalStatus {
    /// Read one response from the control channel and require class `2`.
    Read,
    /// Leave the final reply on the control channel for the caller.
    Skip,
}

// ─── Configuration ───────────────────────────────────────────────────

/// Engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FtpConfig {
    #[serde(default)]
    pub connection_mode: ConnectionMode,
    /// Replace the address in PASV replies with the control peer's address.
    #[serde(default)]
    pub correct_pasv: bool,
    /// Fire the progress callback every N transferred bytes (0 = never).
    #[serde(default)]
    pub progress_bytes: u64,
    /// Poll interval of the idle callback in milliseconds (0 = no idle polling).
    #[serde(default)]
    pub idle_interval_ms: u64,
    /// TCP connect timeout for control and passive data connections.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_sec: u64,
    /// How long active mode waits for the server to connect back.
    #[serde(default = "default_accept_timeout")]
    pub accept_timeout_sec: u64,
    /// Validate server certificates against the OS trust store.
    #[serde(default)]
    pub verify_certificates: bool,
    /// Name presented for SNI / verification instead of the connect host.
    #[serde(default)]
    pub tls_server_name: Option<String>,
}

fn default_connect_timeout() -> u64 {
    15
}
fn default_accept_timeout() -> u64 {
    30
}

impl Default for FtpConfig {
    fn default() -> Self {
        Self {
            connection_mode: ConnectionMode::Passive,
            correct_pasv: false,
            progress_bytes: 0,
            idle_interval_ms: 0,
            connect_timeout_sec: default_connect_timeout(),
            accept_timeout_sec: default_accept_timeout(),
            verify_certificates: false,
            tls_server_name: None,
        }
    }
}

impl FtpConfig {
    pub fn from_json_str(text: &str) -> FtpResult<Self> {
        serde_json::from_str(text)
            .map_err(|e| FtpError::invalid_argument(format!("invalid FTP config: {}", e)))
    }

    pub async fn from_json_file(path: impl AsRef<Path>) -> FtpResult<Self> {
        let path = path.as_ref();
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| FtpError::io_context(&format!("read {}", path.display()), e))?;
        Self::from_json_str(&text)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_sec)
    }

    pub fn accept_timeout(&self) -> Duration {
        Duration::from_secs(self.accept_timeout_sec)
    }

    pub fn idle_interval(&self) -> Duration {
        Duration::from_millis(self.idle_interval_ms)
    }
}

// ─── Session snapshot ────────────────────────────────────────────────

/// Point-in-time view of a client session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FtpSessionInfo {
    pub id: String,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub connected: bool,
    pub tls_control: bool,
    pub tls_data: bool,
    pub connection_mode: ConnectionMode,
    pub connected_at: Option<DateTime<Utc>>,
    pub last_activity: Option<DateTime<Utc>>,
    pub bytes_uploaded: u64,
    pub bytes_downloaded: u64,
    pub last_response: String,
}
