//! Caller-supplied hooks.
//!
//! Every hook is optional. Closures carry their own context, so there is
//! no separate user argument.

use rustls::pki_types::CertificateDer;
use std::fmt;

/// Receives the cumulative byte count; `false` aborts the transfer.
pub type ProgressCallback = Box<dyn FnMut(u64) -> bool + Send>;
/// Polled while I/O is stalled; `false` abandons the wait.
pub type IdleCallback = Box<dyn FnMut() -> bool + Send>;
/// Receives each control line; `inbound` is `true` for server replies.
pub type LogCallback = Box<dyn FnMut(&str, bool) + Send>;
/// Receives the formatted error message and the OS error number (0 if none).
pub type ErrorCallback = Box<dyn FnMut(&str, i32) + Send>;
/// Decides whether the server certificate is acceptable.
pub type CertificateCallback = Box<dyn FnMut(Option<&CertificateDer<'_>>) -> bool + Send>;

#[derive(Default)]
pub struct FtpCallbacks {
    pub progress: Option<ProgressCallback>,
    pub idle: Option<IdleCallback>,
    pub log: Option<LogCallback>,
    pub error: Option<ErrorCallback>,
    pub certificate: Option<CertificateCallback>,
}

impl FtpCallbacks {
    pub(crate) fn log_line(&mut self, line: &str, inbound: bool) {
        if let Some(cb) = self.log.as_mut() {
            cb(line, inbound);
        }
    }

    /// The single error sink: the error callback, or standard error.
    pub(crate) fn report(&mut self, message: &str, os_code: i32) {
        match self.error.as_mut() {
            Some(cb) => cb(message, os_code),
            None => eprintln!("{}", message),
        }
    }

    /// Ask the progress hook whether to continue. No hook means continue.
    pub(crate) fn progress(&mut self, total: u64) -> bool {
        match self.progress.as_mut() {
            Some(cb) => cb(total),
            None => true,
        }
    }

    pub(crate) fn accept_certificate(&mut self, cert: Option<&CertificateDer<'_>>) -> bool {
        match self.certificate.as_mut() {
            Some(cb) => cb(cert),
            None => true,
        }
    }
}

impl fmt::Debug for FtpCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FtpCallbacks")
            .field("progress", &self.progress.is_some())
            .field("idle", &self.idle.is_some())
            .field("log", &self.log.is_some())
            .field("error", &self.error.is_some())
            .field("certificate", &self.certificate.is_some())
            .finish()
    }
}
