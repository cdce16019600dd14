//! Explicit FTPS against a loopback server with a throwaway certificate.

mod common;

use common::{error_sink, payload};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_rustls::server::TlsStream;
use tokio_rustls::TlsAcceptor;
use tpanel_ftp::*;

/// Server TLS setup around a fresh self-signed certificate.
fn acceptor() -> (TlsAcceptor, CertificateDer<'static>) {
    let rcgen::CertifiedKey { cert, key_pair } =
        rcgen::generate_simple_self_signed(vec!["localhost".to_string(), "127.0.0.1".to_string()])
            .unwrap();
    let cert_der = cert.der().clone();
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_pair.serialize_der()));
    let config = rustls::ServerConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .unwrap()
    .with_no_client_auth()
    .with_single_cert(vec![cert_der.clone()], key)
    .unwrap();
    (TlsAcceptor::from(Arc::new(config)), cert_der)
}

/// Server end of a control connection, plain or encrypted.
struct Session<S> {
    stream: BufReader<S>,
}

impl<S: AsyncRead + AsyncWrite + Unpin> Session<S> {
    fn new(stream: S) -> Self {
        Self {
            stream: BufReader::new(stream),
        }
    }

    async fn reply(&mut self, line: &str) {
        let stream = self.stream.get_mut();
        stream
            .write_all(format!("{}\r\n", line).as_bytes())
            .await
            .unwrap();
        stream.flush().await.unwrap();
    }

    async fn next_command(&mut self) -> String {
        let mut line = String::new();
        let n = self.stream.read_line(&mut line).await.unwrap();
        assert!(n > 0, "client closed the control connection");
        line.trim_end_matches(['\r', '\n']).to_string()
    }

    async fn expect(&mut self, cmd: &str, reply: &str) {
        assert_eq!(self.next_command().await, cmd);
        self.reply(reply).await;
    }

    async fn login(&mut self) {
        self.expect("USER anonymous", "331 Password required").await;
        self.expect("PASS guest", "230 Logged in").await;
    }

    async fn quit(&mut self) {
        self.expect("QUIT", "221 Goodbye").await;
    }

    async fn pasv(&mut self) -> TcpListener {
        assert_eq!(self.next_command().await, "PASV");
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        self.reply(&format!(
            "227 Entering Passive Mode (127,0,0,1,{},{})",
            port >> 8,
            port & 0xff
        ))
        .await;
        listener
    }
}

impl Session<TcpStream> {
    /// Answer `AUTH TLS` and run the server side of the handshake.
    async fn upgrade(mut self, acceptor: &TlsAcceptor) -> Session<TlsStream<TcpStream>> {
        self.expect("AUTH TLS", "234 Proceed with negotiation").await;
        assert!(self.stream.buffer().is_empty());
        let tcp = self.stream.into_inner();
        Session::new(acceptor.accept(tcp).await.unwrap())
    }
}

async fn serve<F, Fut>(script: F) -> (String, JoinHandle<()>)
where
    F: FnOnce(Session<TcpStream>) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let handle = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut session = Session::new(stream);
        session.reply("220 Mock FTPS ready").await;
        script(session).await;
    });
    (format!("127.0.0.1:{}", port), handle)
}

#[tokio::test]
async fn auth_tls_then_login_over_the_encrypted_channel() {
    let (acceptor, server_cert) = acceptor();
    let (addr, server) = serve(move |s| async move {
        let mut s = s.upgrade(&acceptor).await;
        s.login().await;
        s.expect("PWD", "257 \"/secure\"").await;
        s.quit().await;
    })
    .await;

    let presented: Arc<Mutex<Option<Vec<u8>>>> = Arc::new(Mutex::new(None));
    let sink = presented.clone();
    let mut client = FtpClient::new();
    client.set_certificate_callback(Some(Box::new(move |cert: Option<&CertificateDer<'_>>| {
        *sink.lock().unwrap() = cert.map(|c| c.as_ref().to_vec());
        true
    })));
    client.connect(&addr).await.unwrap();
    client.negotiate_encryption().await.unwrap();
    assert!(client.session_info().tls_control);
    assert_eq!(
        presented.lock().unwrap().as_deref(),
        Some(server_cert.as_ref())
    );

    client.login("anonymous", "guest").await.unwrap();
    assert_eq!(client.last_response(), "230 Logged in");
    assert_eq!(client.pwd().await.unwrap(), "/secure");
    client.quit().await.unwrap();
    server.await.unwrap();
}

#[tokio::test]
async fn rejected_certificate_fails_negotiation() {
    let (acceptor, _) = acceptor();
    let (addr, server) = serve(move |s| async move {
        let mut s = s.upgrade(&acceptor).await;
        s.quit().await;
    })
    .await;

    let (cb, seen) = error_sink();
    let mut client = FtpClient::new();
    client.set_error_callback(Some(cb));
    client.set_certificate_callback(Some(Box::new(|_: Option<&CertificateDer<'_>>| false)));
    client.connect(&addr).await.unwrap();

    let err = client.negotiate_encryption().await.unwrap_err();
    assert_eq!(err.kind, FtpErrorKind::Tls);
    assert!(err.message.contains("rejected"));
    // The handshake itself completed; the session stays encrypted.
    assert!(client.session_info().tls_control);
    assert_eq!(seen.lock().unwrap().len(), 1);

    client.quit().await.unwrap();
    server.await.unwrap();
}

#[tokio::test]
async fn protected_data_channel_runs_its_own_handshake() {
    let body = payload(4000);
    let sent = body.clone();
    let (acceptor, _) = acceptor();
    let (addr, server) = serve(move |s| async move {
        let mut s = s.upgrade(&acceptor).await;
        s.login().await;
        s.expect("PBSZ 0", "200 PBSZ=0").await;
        s.expect("PROT P", "200 Protection level set to P").await;
        s.expect("TYPE I", "200 Type set to I").await;
        let data = s.pasv().await;
        assert_eq!(s.next_command().await, "RETR secret.bin");
        let (tcp, _) = data.accept().await.unwrap();
        s.reply("150 Opening BINARY mode data connection").await;
        let mut stream = acceptor.accept(tcp).await.unwrap();
        stream.write_all(&sent).await.unwrap();
        stream.shutdown().await.unwrap();
        s.reply("226 Transfer complete").await;
        s.quit().await;
    })
    .await;

    let mut client = FtpClient::new();
    client.connect(&addr).await.unwrap();
    client.negotiate_encryption().await.unwrap();
    client.login("anonymous", "guest").await.unwrap();
    client
        .set_data_encryption(DataEncryption::Secure)
        .await
        .unwrap();
    assert!(client.session_info().tls_data);

    let mut out = Vec::new();
    let n = client
        .get_to(&mut out, "secret.bin", TransferMode::Image, 0)
        .await
        .unwrap();
    assert_eq!(n, 4000);
    assert_eq!(out, body);
    assert_eq!(client.last_response(), "226 Transfer complete");
    client.quit().await.unwrap();
    server.await.unwrap();
}

#[tokio::test]
async fn failed_handshake_never_falls_back_to_plaintext() {
    let (addr, server) = serve(|mut s| async move {
        s.expect("AUTH TLS", "234 Proceed with negotiation").await;
        s.reply("this is not a TLS server").await;
    })
    .await;

    let (cb, seen) = error_sink();
    let mut client = FtpClient::new();
    client.set_error_callback(Some(cb));
    client.connect(&addr).await.unwrap();

    let err = client.negotiate_encryption().await.unwrap_err();
    assert_eq!(err.kind, FtpErrorKind::Tls);
    assert!(!client.is_connected());
    assert!(!client.session_info().tls_control);

    // Nothing more goes out unencrypted.
    let err = client.login("anonymous", "guest").await.unwrap_err();
    assert_eq!(err.kind, FtpErrorKind::NotConnected);
    assert_eq!(seen.lock().unwrap().len(), 2);
    server.await.unwrap();
}
