//! Fixed-size line buffer used by the control channel and ASCII data reads.

use crate::ftp::error::FtpResult;
use crate::ftp::transport::{IdleGate, Transport};

/// Capacity of every line buffer.
pub const BUFFER_SIZE: usize = 1024;

/// Linear read buffer with start/end cursors.
///
/// `buf[start..end]` holds bytes received but not yet handed out. The region
/// is compacted to the front before a refill when it has drifted to the end.
pub struct LineBuffer {
    buf: Box<[u8; BUFFER_SIZE]>,
    start: usize,
    end: usize,
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl LineBuffer {
    pub fn new() -> Self {
        Self {
            buf: Box::new([0u8; BUFFER_SIZE]),
            start: 0,
            end: 0,
        }
    }

    /// Bytes buffered but not yet consumed.
    pub fn pending(&self) -> &[u8] {
        &self.buf[self.start..self.end]
    }

    pub fn has_pending(&self) -> bool {
        self.start < self.end
    }

    pub fn clear(&mut self) {
        self.start = 0;
        self.end = 0;
    }

    fn compact(&mut self) {
        if self.start == 0 {
            return;
        }
        self.buf.copy_within(self.start..self.end, 0);
        self.end -= self.start;
        self.start = 0;
    }

    /// Append whatever the socket delivers next. Returns the number of new
    /// bytes; `0` means end of stream (or a full buffer).
    pub(crate) async fn fill(&mut self, io: &mut Transport, gate: &mut IdleGate<'_>) -> FtpResult<usize> {
        if self.start == self.end {
            self.clear();
        } else if self.end == BUFFER_SIZE {
            self.compact();
        }
        if self.end == BUFFER_SIZE {
            return Ok(0);
        }
        let n = io.read_gated(&mut self.buf[self.end..], gate).await?;
        self.end += n;
        Ok(n)
    }

    /// Read one line into `out`.
    ///
    /// At most `out.len() - 1` bytes are stored. The line ends after the
    /// first `\n`; a `\r\n` ending is collapsed to `\n` and the returned
    /// count excludes the CR. A line longer than the limit is returned in
    /// pieces; a piece never ends in a CR that may start a CRLF. At end of stream the partial line is returned, or `None` when
    /// nothing at all was read.
    pub async fn read_line(
        &mut self,
        io: &mut Transport,
        gate: &mut IdleGate<'_>,
        out: &mut [u8],
    ) -> FtpResult<Option<usize>> {
        if out.is_empty() {
            return Ok(Some(0));
        }
        let limit = out.len() - 1;
        let mut n = 0;

        loop {
            let avail = &self.buf[self.start..self.end];
            let take = avail.len().min(limit - n);

            if let Some(pos) = memchr::memchr(b'\n', &avail[..take]) {
                out[n..n + pos + 1].copy_from_slice(&avail[..pos + 1]);
                n += pos + 1;
                self.start += pos + 1;
                if n >= 2 && out[n - 2] == b'\r' {
                    out[n - 2] = b'\n';
                    n -= 1;
                }
                return Ok(Some(n));
            }

            out[n..n + take].copy_from_slice(&avail[..take]);
            n += take;
            self.start += take;
            if n == limit {
                // Keep a trailing CR for the next call so CRLF still collapses.
                if n > 1 && out[n - 1] == b'\r' {
                    n -= 1;
                    self.start -= 1;
                }
                return Ok(Some(n));
            }

            if self.fill(io, gate).await? == 0 {
                return Ok(if n > 0 { Some(n) } else { None });
            }
        }
    }
}
