//! Open data channel: chunked reads/writes with ASCII translation,
//! byte counting and progress callbacks.

use crate::ftp::buffer::{LineBuffer, BUFFER_SIZE};
use crate::ftp::error::{FtpError, FtpResult};
use crate::ftp::protocol::ControlChannel;
use crate::ftp::transport::{IdleGate, Transport};
use crate::ftp::types::{Direction, FinalStatus, TransferMode};

/// One data connection, borrowed from the control channel that opened it.
///
/// Closing reads the transfer's final reply from the control channel when
/// the handle's policy is [`FinalStatus::Read`]. Dropping an unclosed
/// handle closes the socket but leaves that reply unread.
pub struct DataChannel<'a> {
    control: &'a mut ControlChannel,
    transport: Option<Transport>,
    direction: Direction,
    mode: TransferMode,
    lines: LineBuffer,
    staged: Vec<u8>,
    last_byte: u8,
    transferred: u64,
    since_progress: u64,
    final_status: FinalStatus,
}

impl<'a> DataChannel<'a> {
    pub(crate) fn new(
        control: &'a mut ControlChannel,
        transport: Transport,
        direction: Direction,
        mode: TransferMode,
        final_status: FinalStatus,
    ) -> Self {
        let staged = match (direction, mode) {
            (Direction::Write, TransferMode::Ascii) => Vec::with_capacity(BUFFER_SIZE),
            _ => Vec::new(),
        };
        Self {
            control,
            transport: Some(transport),
            direction,
            mode,
            lines: LineBuffer::new(),
            staged,
            last_byte: 0,
            transferred: 0,
            since_progress: 0,
            final_status,
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn mode(&self) -> TransferMode {
        self.mode
    }

    /// Bytes moved so far (after ASCII translation on reads, before it on writes).
    pub fn transferred(&self) -> u64 {
        self.transferred
    }

    pub fn is_secure(&self) -> bool {
        self.transport.as_ref().is_some_and(Transport::is_tls)
    }

    pub fn is_closed(&self) -> bool {
        self.transport.is_none()
    }

    /// Policy applied by [`close`](Self::close).
    pub fn final_status(&self) -> FinalStatus {
        self.final_status
    }

    pub fn set_final_status(&mut self, policy: FinalStatus) {
        self.final_status = policy;
    }

    // ── Public, reporting surface ────────────────────────────────────

    /// Read the next chunk (binary) or line (ASCII). `Ok(0)` is end of data.
    pub async fn read(&mut self, buf: &mut [u8]) -> FtpResult<usize> {
        let res = self.read_inner(buf).await;
        self.control.reported(res)
    }

    /// Write `data`, translating `\n` to `\r\n` in ASCII mode.
    pub async fn write(&mut self, data: &[u8]) -> FtpResult<usize> {
        let res = self.write_inner(data).await;
        self.control.reported(res)
    }

    /// Close with the handle's recorded final-status policy.
    pub async fn close(&mut self) -> FtpResult<()> {
        let policy = self.final_status;
        self.close_with(policy).await
    }

    /// Close, choosing explicitly whether to read the final status reply.
    /// A second close is a no-op.
    pub async fn close_with(&mut self, policy: FinalStatus) -> FtpResult<()> {
        let res = self.close_inner(policy).await;
        self.control.reported(res)
    }

    // ── Internals used by whole-file operations ──────────────────────

    pub(crate) async fn read_inner(&mut self, buf: &mut [u8]) -> FtpResult<usize> {
        if self.direction != Direction::Read {
            return Err(FtpError::invalid_argument("data channel is not open for reading"));
        }
        let transport = self
            .transport
            .as_mut()
            .ok_or_else(|| FtpError::io("data channel is closed"))?;
        let mut gate = IdleGate::new(
            self.control.callbacks.idle.as_mut(),
            self.control.config.idle_interval(),
        );

        let n = match self.mode {
            TransferMode::Ascii => self
                .lines
                .read_line(transport, &mut gate, buf)
                .await?
                .unwrap_or(0),
            TransferMode::Image => transport.read_gated(buf, &mut gate).await?,
        };
        self.account(n as u64)?;
        Ok(n)
    }

    pub(crate) async fn write_inner(&mut self, data: &[u8]) -> FtpResult<usize> {
        if self.direction != Direction::Write {
            return Err(FtpError::invalid_argument("data channel is not open for writing"));
        }
        if self.transport.is_none() {
            return Err(FtpError::io("data channel is closed"));
        }

        match self.mode {
            TransferMode::Ascii => {
                for &byte in data {
                    if byte == b'\n' && self.last_byte != b'\r' {
                        self.stage(b'\r').await?;
                    }
                    self.stage(byte).await?;
                    self.last_byte = byte;
                }
            }
            TransferMode::Image => {
                let transport = self
                    .transport
                    .as_mut()
                    .ok_or_else(|| FtpError::io("data channel is closed"))?;
                let mut gate = IdleGate::new(
                    self.control.callbacks.idle.as_mut(),
                    self.control.config.idle_interval(),
                );
                transport.write_all_gated(data, &mut gate).await?;
            }
        }
        self.account(data.len() as u64)?;
        Ok(data.len())
    }

    pub(crate) async fn close_inner(&mut self, policy: FinalStatus) -> FtpResult<()> {
        if self.transport.is_none() {
            return Ok(());
        }

        let flushed = if self.direction == Direction::Write {
            self.flush_staged().await
        } else {
            Ok(())
        };
        if let Some(mut transport) = self.transport.take() {
            transport.shutdown().await;
        }
        log::debug!("data channel closed after {} bytes", self.transferred);

        let status = match policy {
            FinalStatus::Read => self.control.expect_response('2').await,
            FinalStatus::Skip => Ok(()),
        };
        flushed.and(status)
    }

    // ── Helpers ──────────────────────────────────────────────────────

    async fn stage(&mut self, byte: u8) -> FtpResult<()> {
        self.staged.push(byte);
        if self.staged.len() >= BUFFER_SIZE {
            self.flush_staged().await?;
        }
        Ok(())
    }

    async fn flush_staged(&mut self) -> FtpResult<()> {
        if self.staged.is_empty() {
            return Ok(());
        }
        let transport = self
            .transport
            .as_mut()
            .ok_or_else(|| FtpError::io("data channel is closed"))?;
        let mut gate = IdleGate::new(
            self.control.callbacks.idle.as_mut(),
            self.control.config.idle_interval(),
        );
        transport.write_all_gated(&self.staged, &mut gate).await?;
        self.staged.clear();
        Ok(())
    }

    /// Count `n` bytes and fire the progress callback once per full threshold.
    fn account(&mut self, n: u64) -> FtpResult<()> {
        self.transferred += n;
        match self.direction {
            Direction::Read => self.control.stats.bytes_downloaded += n,
            Direction::Write => self.control.stats.bytes_uploaded += n,
        }
        self.control.touch();

        let threshold = self.control.config.progress_bytes;
        if threshold == 0 || self.control.callbacks.progress.is_none() {
            return Ok(());
        }
        self.since_progress += n;
        while self.since_progress >= threshold {
            self.since_progress -= threshold;
            if !self.control.callbacks.progress(self.transferred) {
                return Err(FtpError::cancelled(format!(
                    "transfer stopped by progress callback at {} bytes",
                    self.transferred
                )));
            }
        }
        Ok(())
    }
}

impl Drop for DataChannel<'_> {
    fn drop(&mut self) {
        if self.transport.is_some() {
            log::debug!("data channel dropped without close; final reply left pending");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ftp::error::FtpErrorKind;
    use crate::ftp::types::FtpConfig;
    use std::sync::{Arc, Mutex};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    /// Control channel plus a connected data socket pair.
    struct Rig {
        control: ControlChannel,
        control_server: TcpStream,
        data: Option<Transport>,
        data_server: TcpStream,
    }

    async fn tcp_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (client, server)
    }

    async fn rig(config: FtpConfig) -> Rig {
        let (ctl_client, control_server) = tcp_pair().await;
        let (data_client, data_server) = tcp_pair().await;
        let mut control = ControlChannel::new(config);
        control.transport = Some(Transport::Plain(ctl_client));
        Rig {
            control,
            control_server,
            data: Some(Transport::Plain(data_client)),
            data_server,
        }
    }

    #[tokio::test]
    async fn ascii_write_expands_bare_newlines() {
        let mut r = rig(FtpConfig::default()).await;
        r.control_server.write_all(b"226 done\r\n").await.unwrap();
        let mut dc = DataChannel::new(
            &mut r.control,
            r.data.take().unwrap(),
            Direction::Write,
            TransferMode::Ascii,
            FinalStatus::Read,
        );
        dc.write(b"a\nb\r\nc").await.unwrap();
        dc.write(b"\n").await.unwrap();
        dc.close().await.unwrap();
        drop(dc);

        let mut wire = Vec::new();
        r.data_server.read_to_end(&mut wire).await.unwrap();
        assert_eq!(wire, b"a\r\nb\r\nc\r\n");
    }

    #[tokio::test]
    async fn ascii_write_tracks_cr_across_calls() {
        let mut r = rig(FtpConfig::default()).await;
        let mut dc = DataChannel::new(
            &mut r.control,
            r.data.take().unwrap(),
            Direction::Write,
            TransferMode::Ascii,
            FinalStatus::Skip,
        );
        dc.write(b"x\r").await.unwrap();
        dc.write(b"\ny").await.unwrap();
        dc.close().await.unwrap();
        drop(dc);

        let mut wire = Vec::new();
        r.data_server.read_to_end(&mut wire).await.unwrap();
        assert_eq!(wire, b"x\r\ny");
    }

    #[tokio::test]
    async fn ascii_write_flushes_full_chunks() {
        let mut r = rig(FtpConfig::default()).await;
        let payload = vec![b'z'; BUFFER_SIZE * 2 + 10];
        let mut dc = DataChannel::new(
            &mut r.control,
            r.data.take().unwrap(),
            Direction::Write,
            TransferMode::Ascii,
            FinalStatus::Skip,
        );
        dc.write(&payload).await.unwrap();
        assert_eq!(dc.staged.len(), 10);
        dc.close().await.unwrap();
        drop(dc);

        let mut wire = Vec::new();
        r.data_server.read_to_end(&mut wire).await.unwrap();
        assert_eq!(wire, payload);
    }

    #[tokio::test]
    async fn ascii_round_trip_through_line_reader() {
        let original = b"line one\nline two\n\nlast\n".to_vec();

        let mut w = rig(FtpConfig::default()).await;
        let mut writer = DataChannel::new(
            &mut w.control,
            w.data.take().unwrap(),
            Direction::Write,
            TransferMode::Ascii,
            FinalStatus::Skip,
        );
        writer.write(&original).await.unwrap();
        writer.close().await.unwrap();
        drop(writer);
        let mut wire = Vec::new();
        w.data_server.read_to_end(&mut wire).await.unwrap();
        assert_eq!(wire, b"line one\r\nline two\r\n\r\nlast\r\n");

        let mut r = rig(FtpConfig::default()).await;
        r.data_server.write_all(&wire).await.unwrap();
        drop(r.data_server);
        let mut reader = DataChannel::new(
            &mut r.control,
            r.data.take().unwrap(),
            Direction::Read,
            TransferMode::Ascii,
            FinalStatus::Skip,
        );
        let mut back = Vec::new();
        let mut buf = [0u8; 64];
        loop {
            let n = reader.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            back.extend_from_slice(&buf[..n]);
        }
        assert_eq!(back, original);
    }

    #[tokio::test]
    async fn close_twice_is_noop_and_empty_flush_is_clean() {
        let mut r = rig(FtpConfig::default()).await;
        r.control_server.write_all(b"226 ok\r\n").await.unwrap();
        let mut dc = DataChannel::new(
            &mut r.control,
            r.data.take().unwrap(),
            Direction::Write,
            TransferMode::Ascii,
            FinalStatus::Read,
        );
        dc.close().await.unwrap();
        assert!(dc.is_closed());
        // The second close must not try to read another reply.
        tokio::time::timeout(std::time::Duration::from_secs(1), dc.close())
            .await
            .unwrap()
            .unwrap();
        drop(dc);

        let mut wire = Vec::new();
        r.data_server.read_to_end(&mut wire).await.unwrap();
        assert!(wire.is_empty());
        assert_eq!(r.control.last_response(), "226 ok");
    }

    #[tokio::test]
    async fn progress_fires_floor_s_over_t_times() {
        let config = FtpConfig {
            progress_bytes: 100,
            ..Default::default()
        };
        let mut r = rig(config).await;
        let calls = Arc::new(Mutex::new(Vec::new()));
        let sink = calls.clone();
        r.control.callbacks.progress = Some(Box::new(move |total| {
            sink.lock().unwrap().push(total);
            true
        }));

        let mut dc = DataChannel::new(
            &mut r.control,
            r.data.take().unwrap(),
            Direction::Write,
            TransferMode::Image,
            FinalStatus::Skip,
        );
        for _ in 0..7 {
            dc.write(&[0u8; 50]).await.unwrap();
        }
        dc.write(&[0u8; 260]).await.unwrap();
        assert_eq!(dc.transferred(), 610);
        dc.close().await.unwrap();
        drop(dc);

        // 610 bytes at threshold 100 -> 6 firings.
        assert_eq!(
            calls.lock().unwrap().as_slice(),
            &[100, 200, 300, 610, 610, 610]
        );
        assert_eq!(r.control.stats.bytes_uploaded, 610);
    }

    #[tokio::test]
    async fn progress_stop_cancels_transfer() {
        let config = FtpConfig {
            progress_bytes: 10,
            ..Default::default()
        };
        let mut r = rig(config).await;
        let mut firings = 0;
        r.control.callbacks.progress = Some(Box::new(move |_| {
            firings += 1;
            firings < 2
        }));
        let mut dc = DataChannel::new(
            &mut r.control,
            r.data.take().unwrap(),
            Direction::Write,
            TransferMode::Image,
            FinalStatus::Skip,
        );
        dc.write(&[1u8; 10]).await.unwrap();
        let err = dc.write(&[1u8; 10]).await.unwrap_err();
        assert_eq!(err.kind, FtpErrorKind::Cancelled);
        assert_eq!(dc.transferred(), 20);
    }

    #[tokio::test]
    async fn wrong_direction_is_rejected() {
        let mut r = rig(FtpConfig::default()).await;
        let mut dc = DataChannel::new(
            &mut r.control,
            r.data.take().unwrap(),
            Direction::Read,
            TransferMode::Image,
            FinalStatus::Skip,
        );
        let err = dc.write(b"nope").await.unwrap_err();
        assert_eq!(err.kind, FtpErrorKind::InvalidArgument);
    }
}
