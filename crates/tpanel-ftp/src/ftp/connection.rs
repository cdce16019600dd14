//! Control connection establishment.
//!
//! Resolves `host[:port]` to an IPv4 socket address, opens TCP within the
//! connect timeout and reads the server greeting.

use crate::ftp::error::{FtpError, FtpResult};
use crate::ftp::protocol::{ControlChannel, SessionStats};
use crate::ftp::transport::Transport;
use chrono::Utc;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;

const SERVICES_FILE: &str = "/etc/services";

/// Well-known TCP services used when the services database has no entry.
const BUILTIN_SERVICES: &[(&str, u16)] = &[
    ("ftp-data", 20),
    ("ftp", 21),
    ("ssh", 22),
    ("telnet", 23),
    ("http", 80),
    ("https", 443),
    ("ftps-data", 989),
    ("ftps", 990),
];

/// Split `host[:port]` at the first colon.
pub fn split_host_port(spec: &str) -> (&str, Option<&str>) {
    match spec.split_once(':') {
        Some((host, port)) => (host, Some(port)),
        None => (spec, None),
    }
}

/// Find a TCP service's port in services-database text.
pub fn lookup_service(text: &str, name: &str) -> Option<u16> {
    for line in text.lines() {
        let line = line.split('#').next().unwrap_or_default();
        let mut fields = line.split_whitespace();
        let (Some(service), Some(port_proto)) = (fields.next(), fields.next()) else {
            continue;
        };
        let Some((port, proto)) = port_proto.split_once('/') else {
            continue;
        };
        if proto != "tcp" {
            continue;
        }
        if service == name || fields.any(|alias| alias == name) {
            if let Ok(port) = port.parse() {
                return Some(port);
            }
        }
    }
    None
}

/// Resolve a numeric port or TCP service name.
pub async fn resolve_service(name: &str) -> FtpResult<u16> {
    if name.starts_with(|c: char| c.is_ascii_digit()) {
        return name
            .parse()
            .map_err(|_| FtpError::resolution(format!("invalid port '{}'", name)));
    }

    match tokio::fs::read_to_string(SERVICES_FILE).await {
        Ok(text) => {
            if let Some(port) = lookup_service(&text, name) {
                return Ok(port);
            }
        }
        Err(e) => log::debug!("{} unavailable: {}", SERVICES_FILE, e),
    }

    BUILTIN_SERVICES
        .iter()
        .find(|(service, _)| *service == name)
        .map(|(_, port)| *port)
        .ok_or_else(|| FtpError::resolution(format!("unknown service '{}'", name)))
}

/// Resolve a dotted quad or host name to its first IPv4 address.
pub async fn resolve_host(host: &str) -> FtpResult<Ipv4Addr> {
    if let Ok(ip) = host.parse::<Ipv4Addr>() {
        return Ok(ip);
    }
    let addrs = tokio::net::lookup_host((host, 0))
        .await
        .map_err(|e| {
            FtpError::resolution(format!("cannot resolve '{}': {}", host, e))
                .with_os_code(e.raw_os_error())
        })?;
    addrs
        .filter_map(|addr| match addr {
            SocketAddr::V4(v4) => Some(*v4.ip()),
            SocketAddr::V6(_) => None,
        })
        .next()
        .ok_or_else(|| FtpError::resolution(format!("'{}' has no IPv4 address", host)))
}

/// Open a TCP connection within `limit`.
pub async fn connect_tcp(addr: SocketAddrV4, limit: Duration) -> FtpResult<TcpStream> {
    let tcp = timeout(limit, TcpStream::connect(addr))
        .await
        .map_err(|_| FtpError::timeout(format!("TCP connect to {} timed out", addr)))?
        .map_err(|e| {
            FtpError::connect(format!("TCP connect to {}: {}", addr, e))
                .with_os_code(e.raw_os_error())
        })?;
    tcp.set_nodelay(true).ok();
    Ok(tcp)
}

impl ControlChannel {
    /// Connect to `host[:port]` and require a class-2 greeting.
    ///
    /// The port defaults to the `ftp` service. Any previous connection is
    /// closed first and the session counters start over.
    pub async fn connect(&mut self, target: &str) -> FtpResult<()> {
        self.close().await;
        self.stats = SessionStats::default();

        let (host, port) = split_host_port(target);
        let port = resolve_service(port.unwrap_or("ftp")).await?;
        let ip = resolve_host(host).await?;
        let addr = SocketAddrV4::new(ip, port);

        log::debug!("connecting control channel to {} ({})", target, addr);
        let tcp = connect_tcp(addr, self.config.connect_timeout()).await?;
        self.transport = Some(Transport::Plain(tcp));
        self.host = Some(host.to_string());
        self.port = Some(port);

        let greeted = match self.read_response('2').await {
            Ok(true) => Ok(()),
            Ok(false) => Err(FtpError::unexpected_reply('2', self.last_response())),
            Err(e) => Err(e),
        };
        if let Err(e) = greeted {
            self.close().await;
            return Err(e);
        }

        self.stats.connected_at = Some(Utc::now());
        log::info!("connected to {}: {}", addr, self.last_response());
        Ok(())
    }

    /// Send `QUIT` and drop the connection whatever the reply.
    pub async fn quit(&mut self) -> FtpResult<()> {
        if !self.is_connected() {
            self.set_last_response("error: no answer from server");
            return Err(FtpError::not_connected());
        }
        let res = self.expect("QUIT", '2').await;
        self.close().await;
        log::info!("control channel closed");
        res
    }
}
