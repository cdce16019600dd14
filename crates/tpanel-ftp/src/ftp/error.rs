//! FTP engine error type.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Categorised FTP error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FtpError {
    pub kind: FtpErrorKind,
    pub message: String,
    /// FTP reply code that triggered the error, if any.
    pub code: Option<u16>,
    /// Raw OS error number of the underlying socket/file failure, if any.
    pub os_code: Option<i32>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum FtpErrorKind {
    /// Host or service name could not be resolved to an IPv4 address.
    Resolution,
    /// TCP connect (control or passive data) failed.
    Connect,
    /// Server replied with an unexpected response class or unparseable text.
    Protocol,
    /// PORT accept window elapsed, or a connect/read deadline expired.
    Timeout,
    /// TLS handshake failure or certificate rejection.
    Tls,
    /// Socket or local file read/write failure.
    Io,
    /// A progress or idle callback asked to stop.
    Cancelled,
    /// Caller input rejected before anything was sent (length, CR/LF, missing path).
    InvalidArgument,
    /// Operation requires a connected control channel.
    NotConnected,
}

pub type FtpResult<T> = Result<T, FtpError>;

// ── Construction helpers ─────────────────────────────────────────────

impl FtpError {
    pub fn new(kind: FtpErrorKind, msg: impl Into<String>) -> Self {
        Self {
            kind,
            message: msg.into(),
            code: None,
            os_code: None,
        }
    }

    pub fn with_code(mut self, code: u16) -> Self {
        self.code = Some(code);
        self
    }

    pub fn with_os_code(mut self, os_code: Option<i32>) -> Self {
        self.os_code = os_code;
        self
    }

    pub fn resolution(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::Resolution, msg)
    }

    pub fn connect(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::Connect, msg)
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::Protocol, msg)
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::Timeout, msg)
    }

    pub fn tls(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::Tls, msg)
    }

    pub fn io(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::Io, msg)
    }

    pub fn cancelled(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::Cancelled, msg)
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::InvalidArgument, msg)
    }

    pub fn not_connected() -> Self {
        Self::new(FtpErrorKind::NotConnected, "control channel is not connected")
    }

    /// Wrap an I/O failure with the operation that produced it.
    pub fn io_context(op: &str, e: std::io::Error) -> Self {
        let kind = if e.kind() == std::io::ErrorKind::TimedOut {
            FtpErrorKind::Timeout
        } else {
            FtpErrorKind::Io
        };
        Self::new(kind, format!("{}: {}", op, e)).with_os_code(e.raw_os_error())
    }

    /// A reply whose leading digit was not the one the exchange required.
    ///
    /// `line` is the terminator line exactly as the server sent it.
    pub fn unexpected_reply(expected: char, line: &str) -> Self {
        let err = Self::protocol(format!(
            "expected a {}xx reply, got '{}'",
            expected, line
        ));
        match reply_code(line) {
            Some(code) => err.with_code(code),
            None => err,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == FtpErrorKind::Cancelled
    }
}

/// Leading 3-digit code of a reply line, when present.
pub(crate) fn reply_code(line: &str) -> Option<u16> {
    let digits = line.get(..3)?;
    if digits.bytes().all(|b| b.is_ascii_digit()) {
        digits.parse().ok()
    } else {
        None
    }
}

impl fmt::Display for FtpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(code) = self.code {
            write!(f, "[FTP {:?} {}] {}", self.kind, code, self.message)
        } else {
            write!(f, "[FTP {:?}] {}", self.kind, self.message)
        }
    }
}

impl std::error::Error for FtpError {}

impl From<std::io::Error> for FtpError {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::TimedOut {
            Self::timeout(format!("I/O timeout: {}", e)).with_os_code(e.raw_os_error())
        } else {
            Self::io(e.to_string()).with_os_code(e.raw_os_error())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unexpected_reply_carries_code() {
        let err = FtpError::unexpected_reply('2', "530 Login incorrect.");
        assert_eq!(err.kind, FtpErrorKind::Protocol);
        assert_eq!(err.code, Some(530));
        assert!(err.to_string().contains("530 Login incorrect."));
    }

    #[test]
    fn unexpected_reply_without_code() {
        let err = FtpError::unexpected_reply('1', "garbage");
        assert_eq!(err.code, None);
    }

    #[test]
    fn io_timeout_maps_to_timeout_kind() {
        let e = std::io::Error::new(std::io::ErrorKind::TimedOut, "slow");
        assert_eq!(FtpError::from(e).kind, FtpErrorKind::Timeout);
        let e = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone");
        assert_eq!(FtpError::io_context("write", e).kind, FtpErrorKind::Io);
    }

    #[test]
    fn os_code_is_kept() {
        let e = std::io::Error::from_raw_os_error(111);
        let err = FtpError::io_context("connect", e);
        assert_eq!(err.os_code, Some(111));
    }
}
