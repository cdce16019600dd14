//! **tpanel-ftp** — embeddable FTP/FTPS client engine.
//!
//! # Modules
//!
//! | Module | Purpose |
//! |---|---|
//! | [`ftp::client`] | `FtpClient` session: login, AUTH TLS, PROT, simple commands |
//! | [`ftp::file_ops`] | Downloads, uploads, resume and directory listings |
//! | [`ftp::fxp`] | Server-to-server copies between two sessions |
//! | [`ftp::data`] | Open data connections with ASCII conversion and progress |
//! | [`ftp::transfer`] | PASV / PORT negotiation |
//! | [`ftp::protocol`] | Control channel: command writer and reply reader |
//! | [`ftp::connection`] | Host/service resolution and the greeting |
//! | [`ftp::tls`] | rustls client configuration and handshakes |
//! | [`ftp::transport`] | Plain/TLS socket wrapper and the idle gate |
//! | [`ftp::buffer`] | Fixed-size line buffer |
//! | [`ftp::callbacks`] | Progress, idle, log, error and certificate hooks |
//! | [`ftp::types`] | Modes, access types and configuration |
//! | [`ftp::error`] | Error kinds and `FtpResult` |

pub mod ftp;

pub use ftp::*;
