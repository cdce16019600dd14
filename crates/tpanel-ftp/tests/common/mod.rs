//! Scripted loopback FTP server for integration tests.
#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tpanel_ftp::{ErrorCallback, FtpClient};

/// Server end of one control connection.
pub struct MockSession {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl MockSession {
    pub async fn reply(&mut self, line: &str) {
        self.writer
            .write_all(format!("{}\r\n", line).as_bytes())
            .await
            .unwrap();
    }

    pub async fn next_command(&mut self) -> String {
        let mut line = String::new();
        let n = self.reader.read_line(&mut line).await.unwrap();
        assert!(n > 0, "client closed the control connection");
        line.trim_end_matches(['\r', '\n']).to_string()
    }

    /// Require `cmd` next and answer it with `reply`.
    pub async fn expect(&mut self, cmd: &str, reply: &str) {
        let got = self.next_command().await;
        assert_eq!(got, cmd);
        self.reply(reply).await;
    }

    pub async fn greet(&mut self) {
        self.reply("220 Mock FTP ready").await;
    }

    pub async fn login(&mut self) {
        self.expect("USER anonymous", "331 Password required").await;
        self.expect("PASS guest", "230 Logged in").await;
    }

    pub async fn quit(&mut self) {
        self.expect("QUIT", "221 Goodbye").await;
    }

    /// Answer `PASV` with a fresh loopback listener.
    pub async fn pasv(&mut self) -> TcpListener {
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

    /// Accept a `PORT` command and return the address it names.
    pub async fn port(&mut self) -> SocketAddr {
        let cmd = self.next_command().await;
        let args = cmd.strip_prefix("PORT ").expect("PORT command");
        let v: Vec<u16> = args.split(',').map(|s| s.parse().unwrap()).collect();
        assert_eq!(v.len(), 6);
        self.reply("200 PORT command successful").await;
        SocketAddr::from((
            [v[0] as u8, v[1] as u8, v[2] as u8, v[3] as u8],
            v[4] << 8 | v[5],
        ))
    }
}

/// A mock server bound to loopback, running one scripted session.
pub struct MockServer {
    pub addr: String,
    handle: JoinHandle<()>,
}

impl MockServer {
    /// Wait for the script to finish; assertion failures inside it surface here.
    pub async fn finish(self) {
        self.handle.await.unwrap();
    }
}

pub async fn serve<F, Fut>(script: F) -> MockServer
where
    F: FnOnce(MockSession) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let handle = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let (reader, writer) = stream.into_split();
        script(MockSession {
            reader: BufReader::new(reader),
            writer,
        })
        .await;
    });
    MockServer {
        addr: format!("127.0.0.1:{}", port),
        handle,
    }
}

/// Write `data` to a data connection and close it.
pub async fn send_all(mut stream: TcpStream, data: &[u8]) {
    stream.write_all(data).await.unwrap();
    stream.shutdown().await.unwrap();
}

/// Read a data connection to end of stream.
pub async fn recv_all(mut stream: TcpStream) -> Vec<u8> {
    let mut out = Vec::new();
    stream.read_to_end(&mut out).await.unwrap();
    out
}

/// Connect and log in as `anonymous` / `guest`.
pub async fn logged_in(addr: &str) -> FtpClient {
    let mut client = FtpClient::new();
    client.connect(addr).await.unwrap();
    client.login("anonymous", "guest").await.unwrap();
    client
}

/// An error callback that records every reported message.
pub fn error_sink() -> (ErrorCallback, Arc<Mutex<Vec<String>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let cb: ErrorCallback = Box::new(move |msg: &str, _os: i32| {
        sink.lock().unwrap().push(msg.to_string());
    });
    (cb, seen)
}

/// Binary payload with embedded line endings.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| match i % 97 {
            10 => b'\r',
            11 => b'\n',
            n => n as u8,
        })
        .collect()
}
