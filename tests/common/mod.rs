//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rustls::pki_types::ServerName;
use telemetry_relay::net::tls::{self, CertificateProvider, SelfSignedProvider};
use telemetry_relay::server::LineSink;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::client::TlsStream;
use tokio_rustls::{TlsAcceptor, TlsConnector};

/// Sink that keeps every line for later assertions.
#[derive(Default)]
pub struct MemorySink {
    lines: Mutex<Vec<(SocketAddr, String)>>,
}

impl LineSink for MemorySink {
    fn emit(&self, peer: SocketAddr, line: &[u8]) {
        self.lines
            .lock()
            .unwrap()
            .push((peer, String::from_utf8_lossy(line).into_owned()));
    }
}

impl MemorySink {
    pub fn lines(&self) -> Vec<(SocketAddr, String)> {
        self.lines.lock().unwrap().clone()
    }

    /// Lines from one peer, in the order they were emitted.
    pub fn lines_from(&self, peer: SocketAddr) -> Vec<String> {
        self.lines()
            .into_iter()
            .filter(|(p, _)| *p == peer)
            .map(|(_, line)| line)
            .collect()
    }

    /// Poll until at least `n` lines arrived or `limit` passes.
    pub async fn wait_for(&self, n: usize, limit: Duration) -> Vec<(SocketAddr, String)> {
        let deadline = tokio::time::Instant::now() + limit;
        loop {
            let lines = self.lines();
            if lines.len() >= n || tokio::time::Instant::now() >= deadline {
                return lines;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

pub fn connector() -> TlsConnector {
    TlsConnector::from(Arc::new(tls::insecure_client_config().unwrap()))
}

pub async fn handshake(tcp: TcpStream) -> TlsStream<TcpStream> {
    connector()
        .connect(ServerName::try_from("localhost").unwrap(), tcp)
        .await
        .unwrap()
}

/// Open a TLS connection the way a line client would.
pub async fn connect_tls(addr: SocketAddr) -> TlsStream<TcpStream> {
    handshake(TcpStream::connect(addr).await.unwrap()).await
}

/// TLS upstream that appends everything it reads to a shared buffer.
pub async fn start_tls_upstream() -> (SocketAddr, Arc<Mutex<Vec<u8>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let identity = SelfSignedProvider.generate().unwrap();
    let acceptor = TlsAcceptor::from(Arc::new(tls::server_config(identity).unwrap()));
    let received = Arc::new(Mutex::new(Vec::new()));

    let sink = Arc::clone(&received);
    tokio::spawn(async move {
        loop {
            let Ok((tcp, _)) = listener.accept().await else {
                break;
            };
            let acceptor = acceptor.clone();
            let sink = Arc::clone(&sink);
            tokio::spawn(async move {
                let Ok(mut stream) = acceptor.accept(tcp).await else {
                    return;
                };
                let mut buf = [0u8; 1024];
                loop {
                    match stream.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => sink.lock().unwrap().extend_from_slice(&buf[..n]),
                    }
                }
            });
        }
    });

    (addr, received)
}

/// TCP endpoint that accepts connections and never speaks TLS.
pub async fn start_silent_upstream() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });

    addr
}
