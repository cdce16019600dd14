//! Socket transport shared by control and data channels.
//!
//! The plain/TLS choice is made once when a channel is established; after
//! that everything goes through `AsyncRead`/`AsyncWrite` on `Transport`.
//! Blocking waits can be routed through an [`IdleGate`], which bounds each
//! wait by the idle interval and polls the idle callback in between.

use crate::ftp::callbacks::IdleCallback;
use crate::ftp::error::{FtpError, FtpResult};
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;

/// Plain TCP or TLS-wrapped TCP.
pub enum Transport {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl Transport {
    pub fn is_tls(&self) -> bool {
        matches!(self, Self::Tls(_))
    }

    /// The underlying TCP socket.
    pub fn tcp(&self) -> &TcpStream {
        match self {
            Self::Plain(s) => s,
            Self::Tls(s) => s.get_ref().0,
        }
    }

    pub fn local_addr(&self) -> FtpResult<SocketAddr> {
        self.tcp()
            .local_addr()
            .map_err(|e| FtpError::io_context("getsockname", e))
    }

    pub fn peer_addr(&self) -> FtpResult<SocketAddr> {
        self.tcp()
            .peer_addr()
            .map_err(|e| FtpError::io_context("getpeername", e))
    }

    /// Read up to `buf.len()` bytes, waiting through `gate`. `Ok(0)` is end of stream.
    pub async fn read_gated(&mut self, buf: &mut [u8], gate: &mut IdleGate<'_>) -> FtpResult<usize> {
        gate.run("read", AsyncReadExt::read(self, buf)).await
    }

    /// Write all of `data`, waiting through `gate`.
    pub async fn write_all_gated(&mut self, data: &[u8], gate: &mut IdleGate<'_>) -> FtpResult<()> {
        gate.run("write", AsyncWriteExt::write_all(self, data)).await?;
        gate.run("flush", AsyncWriteExt::flush(self)).await
    }

    /// Shut down the write side (TLS sends close_notify first). Errors are
    /// logged and swallowed: the socket is released either way.
    pub async fn shutdown(&mut self) {
        if let Err(e) = AsyncWriteExt::shutdown(self).await {
            log::debug!("socket shutdown: {}", e);
        }
    }
}

impl AsyncRead for Transport {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_read(cx, buf),
            Self::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Transport {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_write(cx, buf),
            Self::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_flush(cx),
            Self::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_shutdown(cx),
            Self::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

// ─── Idle gate ───────────────────────────────────────────────────────

/// Readiness gate in front of blocking socket waits.
///
/// Without an idle callback (or with a zero interval) the wait is a plain
/// blocking await. Otherwise the pending operation is polled in slices of
/// `interval`; after each empty slice the callback decides whether to keep
/// waiting.
pub struct IdleGate<'a> {
    idle: Option<&'a mut IdleCallback>,
    interval: Duration,
}

impl<'a> IdleGate<'a> {
    pub fn new(idle: Option<&'a mut IdleCallback>, interval: Duration) -> Self {
        Self { idle, interval }
    }

    pub fn blocking() -> Self {
        Self {
            idle: None,
            interval: Duration::ZERO,
        }
    }

    pub(crate) async fn run<F, T>(&mut self, op: &str, fut: F) -> FtpResult<T>
    where
        F: Future<Output = io::Result<T>>,
    {
        let idle = match self.idle.as_mut() {
            Some(idle) if !self.interval.is_zero() => idle,
            _ => return fut.await.map_err(|e| FtpError::io_context(op, e)),
        };

        tokio::pin!(fut);
        loop {
            match tokio::time::timeout(self.interval, &mut fut).await {
                Ok(res) => return res.map_err(|e| FtpError::io_context(op, e)),
                Err(_) => {
                    if !idle() {
                        return Err(FtpError::cancelled(format!(
                            "{} abandoned by idle callback",
                            op
                        )));
                    }
                }
            }
        }
    }
}
