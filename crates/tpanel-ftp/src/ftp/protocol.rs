//! FTP control channel: command/response exchange (RFC 959 §4).
//!
//! Handles:
//! - Writing commands terminated with `\r\n`
//! - Reading single-line and multi-line replies through the line buffer
//! - Comparing the reply class with the one the exchange expects
//! - The error sink every public operation reports through

use crate::ftp::buffer::LineBuffer;
use crate::ftp::callbacks::FtpCallbacks;
use crate::ftp::error::{FtpError, FtpResult};
use crate::ftp::tls;
use crate::ftp::transport::{IdleGate, Transport};
use crate::ftp::types::FtpConfig;
use chrono::{DateTime, Utc};
use rustls::ClientConfig;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

/// Longest reply line kept, including the newline slot.
pub const RESPONSE_LINE_MAX: usize = 256;
/// Longest command line accepted, including CRLF.
pub const COMMAND_LINE_MAX: usize = 256;
/// Longest `USER`/`PASS` line accepted, including CRLF.
pub const LOGIN_LINE_MAX: usize = 64;

/// Byte totals and activity timestamps of one session.
#[derive(Debug, Clone, Default)]
pub struct SessionStats {
    pub bytes_uploaded: u64,
    pub bytes_downloaded: u64,
    pub connected_at: Option<DateTime<Utc>>,
    pub last_activity: Option<DateTime<Utc>>,
}

/// The control connection of one client.
pub struct ControlChannel {
    pub(crate) transport: Option<Transport>,
    pub(crate) lines: LineBuffer,
    last_response: String,
    pub(crate) tls_control: bool,
    pub(crate) tls_data: bool,
    pub(crate) callbacks: FtpCallbacks,
    pub(crate) config: FtpConfig,
    tls_config: Option<Arc<ClientConfig>>,
    pub(crate) host: Option<String>,
    pub(crate) port: Option<u16>,
    pub(crate) stats: SessionStats,
}

impl ControlChannel {
    pub fn new(config: FtpConfig) -> Self {
        Self {
            transport: None,
            lines: LineBuffer::new(),
            last_response: String::new(),
            tls_control: false,
            tls_data: false,
            callbacks: FtpCallbacks::default(),
            config,
            tls_config: None,
            host: None,
            port: None,
            stats: SessionStats::default(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_some()
    }

    /// Terminator line of the most recent reply, without its line ending.
    pub fn last_response(&self) -> &str {
        &self.last_response
    }

    pub(crate) fn set_last_response(&mut self, text: impl Into<String>) {
        self.last_response = text.into();
    }

    pub fn config(&self) -> &FtpConfig {
        &self.config
    }

    pub(crate) fn touch(&mut self) {
        self.stats.last_activity = Some(Utc::now());
    }

    // ── Error sink ───────────────────────────────────────────────────

    /// Hand a failure to the error callback (or standard error).
    pub fn report(&mut self, err: &FtpError) {
        let message = err.to_string();
        self.callbacks.report(&message, err.os_code.unwrap_or(0));
    }

    /// Report `res` if it failed, then pass it through unchanged.
    pub(crate) fn reported<T>(&mut self, res: FtpResult<T>) -> FtpResult<T> {
        if let Err(e) = &res {
            self.report(e);
        }
        res
    }

    // ── Addresses ────────────────────────────────────────────────────

    /// IPv4 address of the server end of the control connection.
    pub fn peer_ipv4(&self) -> FtpResult<Ipv4Addr> {
        let transport = self.transport.as_ref().ok_or_else(FtpError::not_connected)?;
        match transport.peer_addr()?.ip() {
            IpAddr::V4(ip) => Ok(ip),
            IpAddr::V6(ip) => Err(FtpError::connect(format!(
                "control peer {} is not IPv4",
                ip
            ))),
        }
    }

    /// IPv4 address of our end of the control connection.
    pub fn local_ipv4(&self) -> FtpResult<Ipv4Addr> {
        let transport = self.transport.as_ref().ok_or_else(FtpError::not_connected)?;
        match transport.local_addr()?.ip() {
            IpAddr::V4(ip) => Ok(ip),
            IpAddr::V6(ip) => Err(FtpError::connect(format!(
                "control socket {} is not IPv4",
                ip
            ))),
        }
    }

    // ── TLS ──────────────────────────────────────────────────────────

    /// Client TLS configuration, built on first use and then shared.
    pub(crate) fn tls_config(&mut self) -> FtpResult<Arc<ClientConfig>> {
        if let Some(cfg) = &self.tls_config {
            return Ok(cfg.clone());
        }
        let cfg = tls::build_client_config(self.config.verify_certificates)?;
        self.tls_config = Some(cfg.clone());
        Ok(cfg)
    }

    /// Name used for SNI and verification.
    pub(crate) fn tls_server_name(&self) -> FtpResult<String> {
        self.config
            .tls_server_name
            .clone()
            .or_else(|| self.host.clone())
            .ok_or_else(FtpError::not_connected)
    }

    // ── Wire I/O ─────────────────────────────────────────────────────

    /// Read one line from the control connection.
    ///
    /// A line longer than `RESPONSE_LINE_MAX - 1` bytes is read to its end;
    /// only the leading part is kept.
    async fn read_line(&mut self) -> FtpResult<String> {
        let transport = self.transport.as_mut().ok_or_else(FtpError::not_connected)?;
        let mut gate = IdleGate::new(self.callbacks.idle.as_mut(), self.config.idle_interval());
        let mut raw = [0u8; RESPONSE_LINE_MAX];
        let n = self
            .lines
            .read_line(transport, &mut gate, &mut raw)
            .await?
            .ok_or_else(|| FtpError::io("control socket read failed: connection closed by server"))?;

        let mut ended = raw[..n].ends_with(b"\n");
        let mut dropped = 0;
        let mut rest = [0u8; RESPONSE_LINE_MAX];
        while !ended {
            match self.lines.read_line(transport, &mut gate, &mut rest).await? {
                Some(m) if m > 0 => {
                    ended = rest[..m].ends_with(b"\n");
                    dropped += m - usize::from(ended);
                }
                _ => break,
            }
        }
        if dropped > 0 {
            log::debug!("reply line truncated, {} bytes dropped", dropped);
        }

        let line = String::from_utf8_lossy(&raw[..n])
            .trim_end_matches('\n')
            .to_string();
        log::trace!("<<< {}", line);
        self.callbacks.log_line(&line, true);
        Ok(line)
    }

    /// Read one reply and report whether its class is `expected`.
    ///
    /// A first line of the form `NNN-` starts a multi-line reply; lines are
    /// then consumed until one begins with `NNN ` exactly. Only that
    /// terminator line is compared and kept as the last response.
    pub async fn read_response(&mut self, expected: char) -> FtpResult<bool> {
        let mut line = self.read_line().await?;

        if line.as_bytes().get(3) == Some(&b'-') {
            let mut terminator = line.get(..3).unwrap_or_default().to_string();
            terminator.push(' ');
            loop {
                line = self.read_line().await?;
                if line.starts_with(&terminator) {
                    break;
                }
            }
        }

        self.touch();
        let matched = line.starts_with(expected);
        self.last_response = line;
        Ok(matched)
    }

    /// Read one reply and fail unless its class is `expected`.
    pub async fn expect_response(&mut self, expected: char) -> FtpResult<()> {
        if self.read_response(expected).await? {
            Ok(())
        } else {
            Err(FtpError::unexpected_reply(expected, &self.last_response))
        }
    }

    /// Write `cmd` followed by CRLF without waiting for a reply.
    pub async fn write_command(&mut self, cmd: &str) -> FtpResult<()> {
        check_command(cmd, COMMAND_LINE_MAX)?;
        let transport = self.transport.as_mut().ok_or_else(FtpError::not_connected)?;
        let mut gate = IdleGate::new(self.callbacks.idle.as_mut(), self.config.idle_interval());

        let line = format!("{}\r\n", cmd);
        transport.write_all_gated(line.as_bytes(), &mut gate).await?;

        if cmd.starts_with("PASS ") {
            log::trace!(">>> PASS ****");
        } else {
            log::trace!(">>> {}", cmd);
        }
        self.callbacks.log_line(cmd, false);
        Ok(())
    }

    /// Send a command and report whether the reply class is `expected`.
    pub async fn send_command(&mut self, cmd: &str, expected: char) -> FtpResult<bool> {
        self.write_command(cmd).await?;
        self.read_response(expected).await
    }

    /// Send a command and fail unless the reply class is `expected`.
    pub async fn expect(&mut self, cmd: &str, expected: char) -> FtpResult<()> {
        if self.send_command(cmd, expected).await? {
            Ok(())
        } else {
            Err(FtpError::unexpected_reply(expected, &self.last_response))
        }
    }

    /// Drop the connection. Buffered reply bytes and TLS state go with it.
    pub async fn close(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            transport.shutdown().await;
        }
        self.lines.clear();
        self.tls_control = false;
        self.tls_data = false;
    }
}

// ─── Command formatting ──────────────────────────────────────────────

/// Validate a finished command line against a byte budget (CRLF included).
pub fn check_command(cmd: &str, max_line: usize) -> FtpResult<()> {
    if cmd.contains(['\r', '\n']) {
        return Err(FtpError::invalid_argument(
            "command must not contain CR or LF",
        ));
    }
    if cmd.len() + 2 > max_line {
        return Err(FtpError::invalid_argument(format!(
            "command of {} bytes exceeds the {}-byte line limit",
            cmd.len(),
            max_line
        )));
    }
    Ok(())
}

/// Format `VERB arg` and validate it against the general line limit.
pub fn format_command(verb: &str, arg: &str) -> FtpResult<String> {
    let cmd = format!("{} {}", verb, arg);
    check_command(&cmd, COMMAND_LINE_MAX)?;
    Ok(cmd)
}

/// Format `USER`/`PASS` against the tighter login limit.
pub fn format_login(verb: &str, arg: &str) -> FtpResult<String> {
    let cmd = format!("{} {}", verb, arg);
    check_command(&cmd, LOGIN_LINE_MAX)?;
    Ok(cmd)
}
