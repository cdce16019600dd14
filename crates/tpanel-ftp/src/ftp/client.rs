//! Stateful FTP client: owns the control channel and issues commands.
//!
//! Lifecycle: `connect()` → optional `negotiate_encryption()` /
//! `set_data_encryption()` → `login()` → commands and transfers → `quit()`.
//!
//! Every public operation reports its failure once through the error
//! callback (or standard error) before returning it.

use crate::ftp::callbacks::{
    CertificateCallback, ErrorCallback, FtpCallbacks, IdleCallback, LogCallback,
    ProgressCallback,
};
use crate::ftp::data::DataChannel;
use crate::ftp::error::{FtpError, FtpResult};
use crate::ftp::protocol::{format_command, format_login, ControlChannel};
use crate::ftp::tls;
use crate::ftp::transfer;
use crate::ftp::transport::Transport;
use crate::ftp::types::*;
use std::time::Duration;
use uuid::Uuid;

/// An FTP client session.
pub struct FtpClient {
    id: String,
    pub(crate) control: ControlChannel,
}

impl Default for FtpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl FtpClient {
    pub fn new() -> Self {
        Self::with_config(FtpConfig::default())
    }

    pub fn with_config(config: FtpConfig) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            control: ControlChannel::new(config),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    // ─── Configuration ───────────────────────────────────────────

    pub fn config(&self) -> &FtpConfig {
        self.control.config()
    }

    /// Replace the configuration. TLS settings apply to the next handshake
    /// that builds a fresh TLS configuration.
    pub fn set_config(&mut self, config: FtpConfig) {
        self.control.config = config;
    }

    pub fn set_connection_mode(&mut self, mode: ConnectionMode) {
        self.control.config.connection_mode = mode;
    }

    pub fn set_correct_pasv(&mut self, on: bool) {
        self.control.config.correct_pasv = on;
    }

    /// Fire the progress callback every `bytes` transferred (0 disables it).
    pub fn set_progress_bytes(&mut self, bytes: u64) {
        self.control.config.progress_bytes = bytes;
    }

    /// Poll interval of the idle callback (zero disables polling).
    pub fn set_idle_interval(&mut self, interval: Duration) {
        self.control.config.idle_interval_ms = interval.as_millis() as u64;
    }

    // ─── Callbacks ───────────────────────────────────────────────

    pub fn callbacks_mut(&mut self) -> &mut FtpCallbacks {
        &mut self.control.callbacks
    }

    pub fn set_progress_callback(&mut self, cb: Option<ProgressCallback>) {
        self.control.callbacks.progress = cb;
    }

    pub fn set_idle_callback(&mut self, cb: Option<IdleCallback>) {
        self.control.callbacks.idle = cb;
    }

    pub fn set_log_callback(&mut self, cb: Option<LogCallback>) {
        self.control.callbacks.log = cb;
    }

    pub fn set_error_callback(&mut self, cb: Option<ErrorCallback>) {
        self.control.callbacks.error = cb;
    }

    pub fn set_certificate_callback(&mut self, cb: Option<CertificateCallback>) {
        self.control.callbacks.certificate = cb;
    }

    // ─── State ───────────────────────────────────────────────────

    pub fn is_connected(&self) -> bool {
        self.control.is_connected()
    }

    /// Terminator line of the last server reply (or a local status line).
    pub fn last_response(&self) -> &str {
        self.control.last_response()
    }

    pub fn session_info(&self) -> FtpSessionInfo {
        let ctl = &self.control;
        FtpSessionInfo {
            id: self.id.clone(),
            host: ctl.host.clone(),
            port: ctl.port,
            connected: ctl.is_connected(),
            tls_control: ctl.tls_control,
            tls_data: ctl.tls_data,
            connection_mode: ctl.config.connection_mode,
            connected_at: ctl.stats.connected_at,
            last_activity: ctl.stats.last_activity,
            bytes_uploaded: ctl.stats.bytes_uploaded,
            bytes_downloaded: ctl.stats.bytes_downloaded,
            last_response: ctl.last_response().to_string(),
        }
    }

    // ─── Session ─────────────────────────────────────────────────

    /// Connect to `host` or `host:port` and read the greeting.
    pub async fn connect(&mut self, target: &str) -> FtpResult<()> {
        let res = self.control.connect(target).await;
        self.control.reported(res)
    }

    /// `USER` then `PASS`. A class-2 reply to `USER` completes the login
    /// without a password.
    pub async fn login(&mut self, user: &str, pass: &str) -> FtpResult<()> {
        let res = self.login_inner(user, pass).await;
        self.control.reported(res)
    }

    async fn login_inner(&mut self, user: &str, pass: &str) -> FtpResult<()> {
        let user_cmd = format_login("USER", user)?;
        let pass_cmd = format_login("PASS", pass)?;

        if !self.control.send_command(&user_cmd, '3').await? {
            if self.control.last_response().starts_with('2') {
                log::info!("logged in as {} without password", user);
                return Ok(());
            }
            return Err(FtpError::unexpected_reply('3', self.control.last_response()));
        }
        self.control.expect(&pass_cmd, '2').await?;
        log::info!("logged in as {}", user);
        Ok(())
    }

    /// `AUTH TLS` and a handshake over the control connection.
    ///
    /// The peer certificate goes to the certificate callback afterwards; a
    /// rejection fails the call while the channel stays encrypted. A failed
    /// handshake leaves the control connection closed.
    pub async fn negotiate_encryption(&mut self) -> FtpResult<()> {
        let res = self.negotiate_encryption_inner().await;
        self.control.reported(res)
    }

    async fn negotiate_encryption_inner(&mut self) -> FtpResult<()> {
        let ctl = &mut self.control;
        if ctl.tls_control {
            return Err(FtpError::tls("control channel is already encrypted"));
        }
        let config = ctl.tls_config()?;
        let name = ctl.tls_server_name()?;
        ctl.expect("AUTH TLS", '2').await?;

        let tcp = match ctl.transport.take() {
            Some(Transport::Plain(tcp)) => tcp,
            Some(other) => {
                ctl.transport = Some(other);
                return Err(FtpError::tls("control channel is already encrypted"));
            }
            None => return Err(FtpError::not_connected()),
        };
        ctl.lines.clear();

        let stream = match tls::handshake(&config, &name, tcp).await {
            Ok(stream) => stream,
            Err(e) => {
                ctl.close().await;
                return Err(e);
            }
        };
        let cert = tls::peer_certificate(&stream);
        ctl.transport = Some(Transport::Tls(Box::new(stream)));
        ctl.tls_control = true;
        log::info!("control channel encrypted ({})", name);

        if !ctl.callbacks.accept_certificate(cert.as_ref()) {
            return Err(FtpError::tls("server certificate rejected"));
        }
        Ok(())
    }

    /// `PBSZ 0` then `PROT P` / `PROT C`. Requires an encrypted control channel.
    pub async fn set_data_encryption(&mut self, level: DataEncryption) -> FtpResult<()> {
        let res = self.set_data_encryption_inner(level).await;
        self.control.reported(res)
    }

    async fn set_data_encryption_inner(&mut self, level: DataEncryption) -> FtpResult<()> {
        if !self.control.tls_control {
            return Err(FtpError::tls(
                "data protection requires an encrypted control channel",
            ));
        }
        self.control.expect("PBSZ 0", '2').await?;
        let (secure, cmd) = match level {
            DataEncryption::Unencrypted => (false, "PROT C"),
            DataEncryption::Secure => (true, "PROT P"),
        };
        self.control.tls_data = secure;
        self.control.expect(cmd, '2').await
    }

    /// Send `QUIT` and close the control connection regardless of the reply.
    pub async fn quit(&mut self) -> FtpResult<()> {
        let res = self.control.quit().await;
        self.control.reported(res)
    }

    // ─── Commands ────────────────────────────────────────────────

    async fn simple(&mut self, verb: &str, arg: &str) -> FtpResult<()> {
        let res = match format_command(verb, arg) {
            Ok(cmd) => self.control.expect(&cmd, '2').await,
            Err(e) => Err(e),
        };
        self.control.reported(res)
    }

    /// `SITE <cmd>`, class 2 required.
    pub async fn site(&mut self, cmd: &str) -> FtpResult<()> {
        self.simple("SITE", cmd).await
    }

    /// Send `cmd` verbatim, class 2 required.
    pub async fn raw(&mut self, cmd: &str) -> FtpResult<()> {
        let res = self.control.expect(cmd, '2').await;
        self.control.reported(res)
    }

    /// Read one pending reply, e.g. a final status left by
    /// [`FinalStatus::Skip`]. Returns whether its class is `expected`.
    pub async fn read_response(&mut self, expected: char) -> FtpResult<bool> {
        let res = self.control.read_response(expected).await;
        self.control.reported(res)
    }

    /// First word of the `SYST` reply text.
    pub async fn sys_type(&mut self) -> FtpResult<String> {
        let res = match self.control.expect("SYST", '2').await {
            Ok(()) => Ok(parse_sys_type(self.control.last_response())),
            Err(e) => Err(e),
        };
        self.control.reported(res)
    }

    pub async fn mkdir(&mut self, path: &str) -> FtpResult<()> {
        self.simple("MKD", path).await
    }

    pub async fn chdir(&mut self, path: &str) -> FtpResult<()> {
        self.simple("CWD", path).await
    }

    pub async fn cdup(&mut self) -> FtpResult<()> {
        let res = self.control.expect("CDUP", '2').await;
        self.control.reported(res)
    }

    pub async fn rmdir(&mut self, path: &str) -> FtpResult<()> {
        self.simple("RMD", path).await
    }

    /// Working directory from the quoted part of the `PWD` reply.
    pub async fn pwd(&mut self) -> FtpResult<String> {
        let res = match self.control.expect("PWD", '2').await {
            Ok(()) => parse_pwd(self.control.last_response()),
            Err(e) => Err(e),
        };
        self.control.reported(res)
    }

    /// `TYPE` then `SIZE`; the size as the server counts it in `mode`.
    pub async fn size(&mut self, path: &str, mode: TransferMode) -> FtpResult<u64> {
        let res = self.size_inner(path, mode).await;
        self.control.reported(res)
    }

    async fn size_inner(&mut self, path: &str, mode: TransferMode) -> FtpResult<u64> {
        let cmd = format_command("SIZE", path)?;
        self.control
            .expect(&format!("TYPE {}", mode.type_code()), '2')
            .await?;
        self.control.expect(&cmd, '2').await?;
        parse_size(self.control.last_response())
    }

    /// Reply text of `MDTM` after the code (usually `YYYYMMDDhhmmss`).
    pub async fn mod_date(&mut self, path: &str) -> FtpResult<String> {
        let res = match format_command("MDTM", path) {
            Ok(cmd) => match self.control.expect(&cmd, '2').await {
                Ok(()) => Ok(self
                    .control
                    .last_response()
                    .get(4..)
                    .unwrap_or_default()
                    .to_string()),
                Err(e) => Err(e),
            },
            Err(e) => Err(e),
        };
        self.control.reported(res)
    }

    /// `RNFR` (class 3) then `RNTO` (class 2).
    pub async fn rename(&mut self, from: &str, to: &str) -> FtpResult<()> {
        let res = self.rename_inner(from, to).await;
        self.control.reported(res)
    }

    async fn rename_inner(&mut self, from: &str, to: &str) -> FtpResult<()> {
        let rnfr = format_command("RNFR", from)?;
        let rnto = format_command("RNTO", to)?;
        self.control.expect(&rnfr, '3').await?;
        self.control.expect(&rnto, '2').await
    }

    pub async fn delete(&mut self, path: &str) -> FtpResult<()> {
        self.simple("DELE", path).await
    }

    // ─── Streaming ───────────────────────────────────────────────

    /// Open a data channel for caller-driven reads or writes.
    ///
    /// The returned handle borrows the client; close it to read the
    /// transfer's final status.
    pub async fn raw_open(
        &mut self,
        path: Option<&str>,
        access: AccessType,
        mode: TransferMode,
        offset: u64,
    ) -> FtpResult<DataChannel<'_>> {
        let res = transfer::negotiate(&mut self.control, path, access, mode, offset).await;
        let transport = self.control.reported(res)?;
        Ok(DataChannel::new(
            &mut self.control,
            transport,
            access.direction(),
            mode,
            FinalStatus::Read,
        ))
    }
}

// ─── Reply parsing ───────────────────────────────────────────────────

/// First word after the reply code, e.g. `UNIX` from `215 UNIX Type: L8`.
fn parse_sys_type(reply: &str) -> String {
    reply
        .get(4..)
        .unwrap_or_default()
        .split(' ')
        .next()
        .unwrap_or_default()
        .to_string()
}

/// Text between the first pair of quotes of a `257` reply (or to the end
/// when the closing quote is missing).
fn parse_pwd(reply: &str) -> FtpResult<String> {
    let (_, rest) = reply
        .split_once('"')
        .ok_or_else(|| FtpError::protocol(format!("cannot parse PWD reply '{}'", reply)))?;
    Ok(rest.split('"').next().unwrap_or_default().to_string())
}

/// `213 <size>`.
fn parse_size(reply: &str) -> FtpResult<u64> {
    let mut fields = reply.split_whitespace();
    let code = fields.next().and_then(|c| c.parse::<u16>().ok());
    let size = fields.next().and_then(|s| s.parse::<u64>().ok());
    match (code, size) {
        (Some(_), Some(size)) => Ok(size),
        _ => Err(FtpError::protocol(format!("cannot parse SIZE reply '{}'", reply))),
    }
}
