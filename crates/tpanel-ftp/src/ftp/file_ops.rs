//! Whole-file operations: download, upload, resume and listings.
//!
//! A local path of `None` means standard output (downloads, listings) or
//! standard input (uploads). Data moves in 1024-byte chunks.

use crate::ftp::buffer::BUFFER_SIZE;
use crate::ftp::client::FtpClient;
use crate::ftp::data::DataChannel;
use crate::ftp::error::{FtpError, FtpResult};
use crate::ftp::transfer;
use crate::ftp::types::*;
use std::io::SeekFrom;
use std::path::Path;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWrite, AsyncWriteExt};

/// Transfer chunk size.
pub const CHUNK_SIZE: usize = BUFFER_SIZE;

impl FtpClient {
    // ─── DOWNLOAD (RETR) ─────────────────────────────────────────

    /// Download `remote` into `local`.
    ///
    /// With `offset == 0` the local file is created or truncated. With an
    /// offset, `REST` is sent and the bytes are appended to the local file.
    /// Returns the number of bytes received by this call.
    pub async fn get(
        &mut self,
        local: Option<&Path>,
        remote: &str,
        mode: TransferMode,
        offset: u64,
    ) -> FtpResult<u64> {
        let access = if offset == 0 {
            AccessType::FileRead
        } else {
            AccessType::FileReadAppend
        };
        let res = self.xfer(local, Some(remote), access, mode, offset).await;
        self.control.reported(res)
    }

    /// Download `remote` into any async writer.
    pub async fn get_to<W>(
        &mut self,
        out: &mut W,
        remote: &str,
        mode: TransferMode,
        offset: u64,
    ) -> FtpResult<u64>
    where
        W: AsyncWrite + Unpin,
    {
        let access = if offset == 0 {
            AccessType::FileRead
        } else {
            AccessType::FileReadAppend
        };
        let res = self.download(out, Some(remote), access, mode, offset).await;
        self.control.reported(res)
    }

    // ─── UPLOAD (STOR) ───────────────────────────────────────────

    /// Upload `local` to `remote`.
    ///
    /// With an offset, `REST` is sent and the local file is read from that
    /// position. Returns the number of bytes taken from the local side.
    pub async fn put(
        &mut self,
        local: Option<&Path>,
        remote: &str,
        mode: TransferMode,
        offset: u64,
    ) -> FtpResult<u64> {
        let access = if offset == 0 {
            AccessType::FileWrite
        } else {
            AccessType::FileWriteAppend
        };
        let res = self.xfer(local, Some(remote), access, mode, offset).await;
        self.control.reported(res)
    }

    /// Upload from any async reader. The reader is consumed from its
    /// current position; `offset` only drives `REST`.
    pub async fn put_from<R>(
        &mut self,
        input: &mut R,
        remote: &str,
        mode: TransferMode,
        offset: u64,
    ) -> FtpResult<u64>
    where
        R: AsyncRead + Unpin,
    {
        let access = if offset == 0 {
            AccessType::FileWrite
        } else {
            AccessType::FileWriteAppend
        };
        let res = self.upload(input, Some(remote), access, mode, offset).await;
        self.control.reported(res)
    }

    // ─── LISTINGS ────────────────────────────────────────────────

    /// `NLST [remote]` into `local`, in ASCII mode.
    pub async fn nlst(&mut self, local: Option<&Path>, remote: Option<&str>) -> FtpResult<u64> {
        let res = self
            .xfer(local, remote, AccessType::Dir, TransferMode::Ascii, 0)
            .await;
        self.control.reported(res)
    }

    /// `LIST -aL [remote]` into `local`, in ASCII mode.
    pub async fn dir(&mut self, local: Option<&Path>, remote: Option<&str>) -> FtpResult<u64> {
        let res = self
            .xfer(local, remote, AccessType::DirVerbose, TransferMode::Ascii, 0)
            .await;
        self.control.reported(res)
    }

    // ─── Internals ───────────────────────────────────────────────

    async fn xfer(
        &mut self,
        local: Option<&Path>,
        path: Option<&str>,
        access: AccessType,
        mode: TransferMode,
        offset: u64,
    ) -> FtpResult<u64> {
        match (access.direction(), local) {
            (Direction::Read, Some(local)) => {
                let mut file = match open_local(local, access, offset).await {
                    Ok(file) => file,
                    Err(e) => {
                        self.control.set_last_response(e.message.clone());
                        return Err(e);
                    }
                };
                self.download(&mut file, path, access, mode, offset).await
            }
            (Direction::Read, None) => {
                let mut out = tokio::io::stdout();
                self.download(&mut out, path, access, mode, offset).await
            }
            (Direction::Write, Some(local)) => {
                let mut file = match open_local(local, access, offset).await {
                    Ok(file) => file,
                    Err(e) => {
                        self.control.set_last_response(e.message.clone());
                        return Err(e);
                    }
                };
                self.upload(&mut file, path, access, mode, offset).await
            }
            (Direction::Write, None) => {
                let mut input = tokio::io::stdin();
                self.upload(&mut input, path, access, mode, offset).await
            }
        }
    }

    async fn download<W>(
        &mut self,
        out: &mut W,
        path: Option<&str>,
        access: AccessType,
        mode: TransferMode,
        offset: u64,
    ) -> FtpResult<u64>
    where
        W: AsyncWrite + Unpin,
    {
        let mut data = transfer::open(&mut self.control, path, access, mode, offset).await?;
        let pumped = pump_down(&mut data, out).await;
        finish(data, pumped).await
    }

    async fn upload<R>(
        &mut self,
        input: &mut R,
        path: Option<&str>,
        access: AccessType,
        mode: TransferMode,
        offset: u64,
    ) -> FtpResult<u64>
    where
        R: AsyncRead + Unpin,
    {
        let mut data = transfer::open(&mut self.control, path, access, mode, offset).await?;
        let pumped = pump_up(input, &mut data).await;
        finish(data, pumped).await
    }
}

/// Open the local side of a transfer the way `access` needs it.
async fn open_local(path: &Path, access: AccessType, offset: u64) -> FtpResult<File> {
    let ctx = |e: std::io::Error| {
        FtpError::io_context(&format!("opening local file {}", path.display()), e)
    };
    match access {
        AccessType::Dir | AccessType::DirVerbose | AccessType::FileRead => {
            File::create(path).await.map_err(ctx)
        }
        AccessType::FileReadAppend => OpenOptions::new()
            .append(true)
            .create(true)
            .open(path)
            .await
            .map_err(ctx),
        AccessType::FileWrite => File::open(path).await.map_err(ctx),
        AccessType::FileWriteAppend => {
            let mut file = File::open(path).await.map_err(ctx)?;
            file.seek(SeekFrom::Start(offset)).await.map_err(ctx)?;
            Ok(file)
        }
    }
}

async fn pump_down<W>(data: &mut DataChannel<'_>, out: &mut W) -> FtpResult<()>
where
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = data.read_inner(&mut buf).await?;
        if n == 0 {
            break;
        }
        out.write_all(&buf[..n])
            .await
            .map_err(|e| FtpError::io_context("local write", e))?;
    }
    out.flush()
        .await
        .map_err(|e| FtpError::io_context("local flush", e))
}

async fn pump_up<R>(input: &mut R, data: &mut DataChannel<'_>) -> FtpResult<()>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = input
            .read(&mut buf)
            .await
            .map_err(|e| FtpError::io_context("local read", e))?;
        if n == 0 {
            return Ok(());
        }
        data.write_inner(&buf[..n]).await?;
    }
}

/// Close the data channel and read the final status even when the pump
/// failed; the pump's error takes precedence.
async fn finish(mut data: DataChannel<'_>, pumped: FtpResult<()>) -> FtpResult<u64> {
    let closed = data.close_inner(FinalStatus::Read).await;
    pumped?;
    closed?;
    Ok(data.transferred())
}
