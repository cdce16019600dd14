//! Data-channel negotiation (RFC 959 §3.2).
//!
//! Two modes, picked by `FtpConfig::connection_mode`:
//! - **PASV**: the server listens; the transfer command is written before
//!   the client connects, and the preliminary reply is read afterwards.
//! - **PORT**: the client listens on the control socket's interface and
//!   races the server's inbound connect against a reply on the control
//!   channel.
//!
//! When data protection is on, every data socket runs its own TLS handshake
//! before it is handed out.

use crate::ftp::connection::connect_tcp;
use crate::ftp::data::DataChannel;
use crate::ftp::error::{reply_code, FtpError, FtpResult};
use crate::ftp::protocol::{format_command, ControlChannel};
use crate::ftp::tls;
use crate::ftp::transport::{IdleGate, Transport};
use crate::ftp::types::{AccessType, ConnectionMode, FinalStatus, TransferMode};
use regex::Regex;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};

/// How long a queued data connection may take to surface once the server
/// has already replied on the control channel.
const ACCEPT_GRACE: Duration = Duration::from_millis(100);

const PASV_OCTETS: &str = r"^\s*(\d{1,3}),\s*(\d{1,3}),\s*(\d{1,3}),\s*(\d{1,3}),\s*(\d{1,3}),\s*(\d{1,3})";

// ─── Address encoding ────────────────────────────────────────────────

/// Parse the `(h1,h2,h3,h4,p1,p2)` group of a 227 reply.
pub fn parse_pasv_reply(text: &str) -> FtpResult<SocketAddrV4> {
    let group = text
        .split_once('(')
        .map(|(_, rest)| rest)
        .ok_or_else(|| FtpError::protocol(format!("no address in PASV reply '{}'", text)))?;
    let re = Regex::new(PASV_OCTETS)
        .map_err(|e| FtpError::protocol(format!("PASV pattern: {}", e)))?;
    let caps = re
        .captures(group)
        .ok_or_else(|| FtpError::protocol(format!("cannot parse PASV reply '{}'", text)))?;

    let mut v = [0u8; 6];
    for (i, slot) in v.iter_mut().enumerate() {
        *slot = caps[i + 1].parse().map_err(|_| {
            FtpError::protocol(format!("PASV value '{}' out of range", &caps[i + 1]))
        })?;
    }
    let ip = Ipv4Addr::new(v[0], v[1], v[2], v[3]);
    let port = u16::from(v[4]) << 8 | u16::from(v[5]);
    Ok(SocketAddrV4::new(ip, port))
}

/// Keep the advertised port but use the address we actually reached.
pub fn correct_pasv(advertised: SocketAddrV4, peer: Ipv4Addr) -> SocketAddrV4 {
    SocketAddrV4::new(peer, advertised.port())
}

/// `PORT a1,a2,a3,a4,p1,p2` for a listening address.
pub fn format_port_command(addr: SocketAddrV4) -> String {
    let [a1, a2, a3, a4] = addr.ip().octets();
    let port = addr.port();
    format!("PORT {},{},{},{},{},{}", a1, a2, a3, a4, port >> 8, port & 0xff)
}

pub fn rest_command(offset: u64) -> String {
    format!("REST {}", offset)
}

// ─── Negotiation ─────────────────────────────────────────────────────

/// Send `PASV` and return the (optionally corrected) data address.
pub(crate) async fn request_pasv(ctl: &mut ControlChannel) -> FtpResult<SocketAddrV4> {
    ctl.expect("PASV", '2').await?;
    let advertised = parse_pasv_reply(ctl.last_response())?;
    if ctl.config.correct_pasv {
        let peer = ctl.peer_ipv4()?;
        if peer != *advertised.ip() {
            log::debug!("correcting PASV address {} -> {}", advertised.ip(), peer);
        }
        return Ok(correct_pasv(advertised, peer));
    }
    Ok(advertised)
}

async fn send_rest(ctl: &mut ControlChannel, offset: u64) -> FtpResult<()> {
    if offset > 0 {
        ctl.expect(&rest_command(offset), '3').await?;
    }
    Ok(())
}

/// PASV → REST → command (unanswered) → connect → class 1.
async fn open_passive(ctl: &mut ControlChannel, cmd: &str, offset: u64) -> FtpResult<TcpStream> {
    let addr = request_pasv(ctl).await?;
    send_rest(ctl, offset).await?;

    ctl.write_command(cmd).await?;
    log::debug!("passive data connection to {}", addr);
    let tcp = connect_tcp(addr, ctl.config.connect_timeout()).await?;

    if !ctl.read_response('1').await? {
        return Err(FtpError::unexpected_reply('1', ctl.last_response()));
    }
    Ok(tcp)
}

enum AcceptRace {
    Accepted(io::Result<(TcpStream, SocketAddr)>),
    ControlReady(FtpResult<usize>),
    TimedOut,
}

/// Listen → PORT → REST → command (class 1) → accept or abort.
///
/// The listener is polled first: a connection already queued beats a
/// reply already on the control channel.
async fn open_active(ctl: &mut ControlChannel, cmd: &str, offset: u64) -> FtpResult<TcpStream> {
    let local = ctl.local_ipv4()?;
    let listener = TcpListener::bind(SocketAddrV4::new(local, 0))
        .await
        .map_err(|e| FtpError::io_context("bind", e))?;
    let bound = match listener.local_addr().map_err(|e| FtpError::io_context("getsockname", e))? {
        SocketAddr::V4(v4) => v4,
        SocketAddr::V6(v6) => {
            return Err(FtpError::connect(format!("listener {} is not IPv4", v6)));
        }
    };

    ctl.expect(&format_port_command(bound), '2').await?;
    send_rest(ctl, offset).await?;
    ctl.expect(cmd, '1').await?;

    let limit = ctl.config.accept_timeout();
    let mut outcome = if ctl.lines.has_pending() {
        AcceptRace::ControlReady(Ok(ctl.lines.pending().len()))
    } else {
        let transport = ctl.transport.as_mut().ok_or_else(FtpError::not_connected)?;
        let mut gate = IdleGate::blocking();
        tokio::select! {
            biased;
            res = listener.accept() => AcceptRace::Accepted(res),
            res = ctl.lines.fill(transport, &mut gate) => AcceptRace::ControlReady(res),
            _ = tokio::time::sleep(limit) => AcceptRace::TimedOut,
        }
    };
    // A fast server may connect, send and reply before we look; a queued
    // connection wins over the reply.
    if let AcceptRace::ControlReady(Ok(_)) = outcome {
        if let Ok(res) = tokio::time::timeout(ACCEPT_GRACE, listener.accept()).await {
            outcome = AcceptRace::Accepted(res);
        }
    }
    drop(listener);

    match outcome {
        AcceptRace::Accepted(Ok((tcp, from))) => {
            log::debug!("active data connection from {}", from);
            tcp.set_nodelay(true).ok();
            Ok(tcp)
        }
        AcceptRace::Accepted(Err(e)) => Err(FtpError::io_context("accept", e)),
        AcceptRace::ControlReady(res) => {
            res?;
            ctl.read_response('2').await?;
            let reply = ctl.last_response();
            let err = FtpError::protocol(format!(
                "server replied before connecting back: '{}'",
                reply
            ));
            Err(match reply_code(reply) {
                Some(code) => err.with_code(code),
                None => err,
            })
        }
        AcceptRace::TimedOut => {
            ctl.set_last_response("timed out waiting for connection");
            Err(FtpError::timeout(format!(
                "server did not connect to {} within {:?}",
                bound, limit
            )))
        }
    }
}

/// Wrap a fresh data socket in TLS when data protection is on.
async fn secure_data(ctl: &mut ControlChannel, tcp: TcpStream) -> FtpResult<Transport> {
    if !ctl.tls_data {
        return Ok(Transport::Plain(tcp));
    }
    let config = ctl.tls_config()?;
    let name = ctl.tls_server_name()?;
    let stream = tls::handshake(&config, &name, tcp).await?;
    Ok(Transport::Tls(Box::new(stream)))
}

/// Negotiate a data connection for `access` on `path`.
///
/// Sends `TYPE`, then runs the configured mode and the optional TLS
/// handshake. The control channel is only borrowed for the exchange.
pub(crate) async fn negotiate(
    ctl: &mut ControlChannel,
    path: Option<&str>,
    access: AccessType,
    mode: TransferMode,
    offset: u64,
) -> FtpResult<Transport> {
    let cmd = match path {
        Some(path) => format_command(access.verb(), path)?,
        None if access.requires_path() => {
            ctl.set_last_response("Missing path argument for file transfer");
            return Err(FtpError::invalid_argument(
                "missing path argument for file transfer",
            ));
        }
        None => access.verb().to_string(),
    };

    ctl.expect(&format!("TYPE {}", mode.type_code()), '2').await?;

    let tcp = match ctl.config.connection_mode {
        ConnectionMode::Passive => open_passive(ctl, &cmd, offset).await?,
        ConnectionMode::Active => open_active(ctl, &cmd, offset).await?,
    };
    secure_data(ctl, tcp).await
}

/// Negotiate and wrap the connection in a handle that reads the final
/// status when closed.
pub(crate) async fn open<'a>(
    ctl: &'a mut ControlChannel,
    path: Option<&str>,
    access: AccessType,
    mode: TransferMode,
    offset: u64,
) -> FtpResult<DataChannel<'a>> {
    let transport = negotiate(ctl, path, access, mode, offset).await?;
    Ok(DataChannel::new(
        ctl,
        transport,
        access.direction(),
        mode,
        FinalStatus::Read,
    ))
}
