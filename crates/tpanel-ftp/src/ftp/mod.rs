//! # FTP/FTPS client
//!
//! RFC 959 with the RFC 2228 / 4217 security extensions (`AUTH TLS`,
//! `PBSZ`, `PROT`). One `FtpClient` owns one control connection and at most
//! one open data connection at a time; every operation is sequential.
//!
//! Architecture:
//! - `buffer` — fixed 1024-byte line buffer shared by control and data reads
//! - `transport` — plain or TLS socket, plus the idle-callback gate
//! - `tls` — client config, handshake, peer certificate
//! - `protocol` — control channel: command writer, multi-line reply reader
//! - `connection` — `host[:port]` parsing, resolution, greeting, `QUIT`
//! - `transfer` — PASV / PORT negotiation and data-socket TLS
//! - `data` — open data channel: read, write, ASCII conversion, close
//! - `file_ops` — get, put, resume, `NLST`, `LIST`
//! - `fxp` — server-to-server transfer
//! - `client` — public session API
//! - `callbacks` — caller hooks
//! - `types` — enums and `FtpConfig`
//! - `error` — `FtpError` / `FtpResult`

pub mod buffer;
pub mod callbacks;
pub mod client;
pub mod connection;
pub mod data;
pub mod error;
pub mod file_ops;
pub mod fxp;
pub mod protocol;
pub mod tls;
pub mod transfer;
pub mod transport;
pub mod types;

pub use buffer::LineBuffer;
pub use callbacks::*;
pub use client::FtpClient;
pub use data::DataChannel;
pub use error::{FtpError, FtpErrorKind, FtpResult};
pub use protocol::{ControlChannel, SessionStats};
pub use transport::{IdleGate, Transport};
pub use types::*;
