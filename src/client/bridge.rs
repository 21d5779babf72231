//! Upstream bridge: relay buffer → reconnecting TLS link.
//!
//! # State Machine
//! ```text
//! DISCONNECTED ──▶ DIALING ──handshake ok──▶ CONNECTED ──write error──▶ DISCONNECTED
//!                    ▲  │                                                   │
//!                    └──┘ dial/handshake failure (backoff)                  │
//!                    └──────────────────────────────────────────────────────┘
//! ```
//!
//! Messages are only taken from the relay buffer while CONNECTED. The message
//! whose write fails or misses the write deadline is dropped; the next link
//! resumes with the following one. Writes are abandoned on shutdown.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use rustls::pki_types::ServerName;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

use crate::config::{BackoffConfig, ClientConfig};
use crate::lifecycle::ShutdownSignal;
use crate::observability::metrics;
use crate::queue::QueueReceiver;
use crate::resilience::Backoff;

#[derive(Debug, Error)]
pub enum DialError {
    #[error("dial timed out after {0:?}")]
    Timeout(Duration),

    #[error("connect failed: {0}")]
    Connect(#[source] std::io::Error),

    #[error("TLS handshake failed: {0}")]
    Handshake(#[source] std::io::Error),

    #[error("invalid server name {0:?}")]
    InvalidServerName(String),
}

/// Opens a fresh upstream link. A returned link has completed its handshake.
#[async_trait]
pub trait Dialer: Send + Sync {
    type Link: AsyncWrite + Unpin + Send;

    async fn dial(&self) -> Result<Self::Link, DialError>;
}

/// TCP + TLS dialer with certificate verification disabled.
pub struct TlsDialer {
    address: String,
    server_name: ServerName<'static>,
    connector: TlsConnector,
    timeout: Duration,
}

impl TlsDialer {
    pub fn new(
        address: impl Into<String>,
        server_name: &str,
        tls: rustls::ClientConfig,
        timeout: Duration,
    ) -> Result<Self, DialError> {
        let server_name = ServerName::try_from(server_name.to_string())
            .map_err(|_| DialError::InvalidServerName(server_name.to_string()))?;
        Ok(Self {
            address: address.into(),
            server_name,
            connector: TlsConnector::from(std::sync::Arc::new(tls)),
            timeout,
        })
    }

    async fn connect(&self) -> Result<TlsStream<TcpStream>, DialError> {
        let tcp = TcpStream::connect(&self.address)
            .await
            .map_err(DialError::Connect)?;
        self.connector
            .connect(self.server_name.clone(), tcp)
            .await
            .map_err(DialError::Handshake)
    }
}

#[async_trait]
impl Dialer for TlsDialer {
    type Link = TlsStream<TcpStream>;

    /// The timeout covers both the TCP connect and the handshake.
    async fn dial(&self) -> Result<Self::Link, DialError> {
        tokio::time::timeout(self.timeout, self.connect())
            .await
            .map_err(|_| DialError::Timeout(self.timeout))?
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Disconnected,
    Dialing,
    Connected,
}

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Pause between a completed handshake and the first write.
    pub settle: Duration,
    /// Upper bound on writing and flushing one message.
    pub write_timeout: Duration,
    pub reconnect: BackoffConfig,
}

impl From<&ClientConfig> for BridgeConfig {
    fn from(config: &ClientConfig) -> Self {
        Self {
            settle: config.settle(),
            write_timeout: config.write_timeout(),
            reconnect: config.reconnect.clone(),
        }
    }
}

enum DrainEnd {
    WriteFailed,
    RelayClosed,
    Shutdown,
}

/// Sole consumer of the relay buffer and sole owner of the upstream link.
pub struct UpstreamBridge {
    config: BridgeConfig,
    state: watch::Sender<BridgeState>,
}

impl UpstreamBridge {
    pub fn new(config: BridgeConfig) -> Self {
        let (state, _) = watch::channel(BridgeState::Disconnected);
        Self { config, state }
    }

    /// Observe state transitions.
    pub fn state(&self) -> watch::Receiver<BridgeState> {
        self.state.subscribe()
    }

    /// Dial, drain, and redial until shutdown or until the relay buffer closes.
    pub async fn run<D: Dialer>(
        self,
        dialer: D,
        relay: QueueReceiver<Vec<u8>>,
        mut shutdown: ShutdownSignal,
    ) {
        let mut backoff = Backoff::new(&self.config.reconnect);

        loop {
            self.state.send_replace(BridgeState::Dialing);
            let dialed = tokio::select! {
                _ = shutdown.recv() => break,
                dialed = dialer.dial() => dialed,
            };

            let link = match dialed {
                Ok(link) => link,
                Err(e) => {
                    metrics::record_upstream_dial("failure");
                    let delay = backoff.next_delay();
                    tracing::warn!(
                        error = %e,
                        attempt = backoff.attempts(),
                        retry_in = ?delay,
                        "Upstream dial failed"
                    );
                    tokio::select! {
                        _ = shutdown.recv() => break,
                        _ = tokio::time::sleep(delay) => continue,
                    }
                }
            };

            metrics::record_upstream_dial("success");
            backoff.reset();
            self.state.send_replace(BridgeState::Connected);
            tracing::info!("Upstream connected");

            match self.drain(link, &relay, &mut shutdown).await {
                DrainEnd::WriteFailed => {
                    self.state.send_replace(BridgeState::Disconnected);
                }
                DrainEnd::RelayClosed => {
                    tracing::info!("Relay buffer closed, bridge stopping");
                    break;
                }
                DrainEnd::Shutdown => break,
            }
        }

        self.state.send_replace(BridgeState::Disconnected);
        tracing::info!("Upstream bridge stopped");
    }

    async fn drain<L>(
        &self,
        mut link: L,
        relay: &QueueReceiver<Vec<u8>>,
        shutdown: &mut ShutdownSignal,
    ) -> DrainEnd
    where
        L: AsyncWrite + Unpin,
    {
        tokio::select! {
            _ = shutdown.recv() => return DrainEnd::Shutdown,
            _ = tokio::time::sleep(self.config.settle) => {}
        }

        loop {
            let message = tokio::select! {
                _ = shutdown.recv() => return DrainEnd::Shutdown,
                message = relay.pop() => message,
            };
            let Some(message) = message else {
                let _ = tokio::time::timeout(self.config.write_timeout, link.shutdown()).await;
                return DrainEnd::RelayClosed;
            };

            let written = async {
                link.write_all(&message).await?;
                link.flush().await
            };
            let written = tokio::select! {
                _ = shutdown.recv() => return DrainEnd::Shutdown,
                written = tokio::time::timeout(self.config.write_timeout, written) => written,
            };
            let failure = match written {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(e.to_string()),
                Err(_) => Some(format!("write timed out after {:?}", self.config.write_timeout)),
            };
            if let Some(error) = failure {
                metrics::record_upstream_dropped();
                tracing::warn!(
                    error = %error,
                    dropped_bytes = message.len(),
                    "Upstream write failed, dropping message and reconnecting"
                );
                return DrainEnd::WriteFailed;
            }

            metrics::record_upstream_write();
            tracing::debug!(bytes = message.len(), "Message sent upstream");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::Shutdown;
    use crate::queue;
    use std::io;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::task::{Context, Poll};

    /// Records each write as one message; fails the write with index `fail_at`.
    struct RecordingLink {
        written: Arc<Mutex<Vec<String>>>,
        writes: Arc<AtomicUsize>,
        fail_at: Option<usize>,
    }

    impl AsyncWrite for RecordingLink {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            let index = self.writes.fetch_add(1, Ordering::SeqCst);
            if self.fail_at == Some(index) {
                return Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "link reset")));
            }
            self.written
                .lock()
                .unwrap()
                .push(String::from_utf8_lossy(buf).into_owned());
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[derive(Default)]
    struct MockDialer {
        written: Arc<Mutex<Vec<String>>>,
        writes: Arc<AtomicUsize>,
        dials: Arc<AtomicUsize>,
        fail_write_at: Option<usize>,
        never_connect: bool,
    }

    #[async_trait]
    impl Dialer for MockDialer {
        type Link = RecordingLink;

        async fn dial(&self) -> Result<RecordingLink, DialError> {
            self.dials.fetch_add(1, Ordering::SeqCst);
            if self.never_connect {
                return Err(DialError::Handshake(io::Error::new(
                    io::ErrorKind::ConnectionAborted,
                    "handshake incomplete",
                )));
            }
            Ok(RecordingLink {
                written: Arc::clone(&self.written),
                writes: Arc::clone(&self.writes),
                fail_at: self.fail_write_at,
            })
        }
    }

    /// A link whose peer never reads: every write stays pending.
    struct StalledLink;

    impl AsyncWrite for StalledLink {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            Poll::Pending
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Pending
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Pending
        }
    }

    #[derive(Default)]
    struct StallingDialer {
        dials: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Dialer for StallingDialer {
        type Link = StalledLink;

        async fn dial(&self) -> Result<StalledLink, DialError> {
            self.dials.fetch_add(1, Ordering::SeqCst);
            Ok(StalledLink)
        }
    }

    fn config() -> BridgeConfig {
        BridgeConfig {
            settle: Duration::ZERO,
            write_timeout: Duration::from_secs(10),
            reconnect: BackoffConfig {
                base_delay_ms: 100,
                max_delay_ms: 1000,
            },
        }
    }

    async fn wait_for_written(written: &Mutex<Vec<String>>, n: usize) {
        while written.lock().unwrap().len() < n {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn delivers_buffered_messages_in_order() {
        let dialer = MockDialer::default();
        let written = Arc::clone(&dialer.written);
        let (tx, rx) = queue::bounded(8);
        let shutdown = Shutdown::new();

        for message in ["10.5", "11.0", "9.8"] {
            tx.push(message.as_bytes().to_vec()).await.unwrap();
        }

        let bridge = UpstreamBridge::new(config());
        let mut state = bridge.state();
        let task = tokio::spawn(bridge.run(dialer, rx, shutdown.subscribe()));

        state
            .wait_for(|s| *s == BridgeState::Connected)
            .await
            .unwrap();
        wait_for_written(&written, 3).await;
        assert_eq!(*written.lock().unwrap(), vec!["10.5", "11.0", "9.8"]);

        shutdown.trigger();
        task.await.unwrap();
        assert_eq!(*state.borrow(), BridgeState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_write_drops_message_and_reconnects() {
        let dialer = MockDialer {
            fail_write_at: Some(1),
            ..MockDialer::default()
        };
        let written = Arc::clone(&dialer.written);
        let dials = Arc::clone(&dialer.dials);
        let (tx, rx) = queue::bounded(8);
        let shutdown = Shutdown::new();

        for message in ["10.5", "11.0", "9.8"] {
            tx.push(message.as_bytes().to_vec()).await.unwrap();
        }

        let bridge = UpstreamBridge::new(config());
        let task = tokio::spawn(bridge.run(dialer, rx, shutdown.subscribe()));

        wait_for_written(&written, 2).await;
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(*written.lock().unwrap(), vec!["10.5", "9.8"]);
        assert_eq!(dials.load(Ordering::SeqCst), 2);
        assert!(tx.is_empty());

        shutdown.trigger();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn never_connecting_leaves_buffer_untouched() {
        let dialer = MockDialer {
            never_connect: true,
            ..MockDialer::default()
        };
        let dials = Arc::clone(&dialer.dials);
        let (tx, rx) = queue::bounded(8);
        let shutdown = Shutdown::new();

        tx.push(b"10.5".to_vec()).await.unwrap();
        tx.push(b"11.0".to_vec()).await.unwrap();

        let bridge = UpstreamBridge::new(config());
        let state = bridge.state();
        let task = tokio::spawn(bridge.run(dialer, rx, shutdown.subscribe()));

        let mut last_len = tx.len();
        for message in ["9.8", "10.1", "10.2"] {
            tokio::time::sleep(Duration::from_secs(10)).await;
            assert_eq!(*state.borrow(), BridgeState::Dialing);
            assert!(tx.len() >= last_len);
            tx.push(message.as_bytes().to_vec()).await.unwrap();
            last_len = tx.len();
        }
        assert_eq!(tx.len(), 5);
        assert!(dials.load(Ordering::SeqCst) > 3, "bridge keeps redialing");

        shutdown.trigger();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn dial_failures_back_off() {
        let dialer = MockDialer {
            never_connect: true,
            ..MockDialer::default()
        };
        let dials = Arc::clone(&dialer.dials);
        let (_tx, rx) = queue::bounded::<Vec<u8>>(1);
        let shutdown = Shutdown::new();

        let bridge = UpstreamBridge::new(config());
        let task = tokio::spawn(bridge.run(dialer, rx, shutdown.subscribe()));

        // 100 + 200 + 400 + 800 + 1000 ms (plus up to 10% jitter each) before the sixth dial.
        tokio::time::sleep(Duration::from_millis(2400)).await;
        let attempts = dials.load(Ordering::SeqCst);
        assert!((4..=6).contains(&attempts), "got {attempts} dials");

        shutdown.trigger();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_interrupts_stalled_write() {
        let (tx, rx) = queue::bounded(4);
        let shutdown = Shutdown::new();
        tx.push(b"10.5".to_vec()).await.unwrap();

        let bridge = UpstreamBridge::new(config());
        let mut state = bridge.state();
        let task = tokio::spawn(bridge.run(StallingDialer::default(), rx, shutdown.subscribe()));

        state
            .wait_for(|s| *s == BridgeState::Connected)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(tx.is_empty(), "message taken for writing");
        assert!(!task.is_finished());

        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(3), task)
            .await
            .expect("bridge should stop while a write is stalled")
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_write_times_out_and_redials() {
        let dialer = StallingDialer::default();
        let dials = Arc::clone(&dialer.dials);
        let (tx, rx) = queue::bounded(4);
        let shutdown = Shutdown::new();
        tx.push(b"10.5".to_vec()).await.unwrap();

        let bridge = UpstreamBridge::new(config());
        let task = tokio::spawn(bridge.run(dialer, rx, shutdown.subscribe()));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(dials.load(Ordering::SeqCst), 1);

        // Past the 10 s write deadline the message is dropped and the link replaced.
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(dials.load(Ordering::SeqCst), 2);
        assert!(tx.is_empty());

        shutdown.trigger();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn stops_when_relay_closes() {
        let dialer = MockDialer::default();
        let (tx, rx) = queue::bounded::<Vec<u8>>(1);
        let shutdown = Shutdown::new();
        drop(tx);

        UpstreamBridge::new(config())
            .run(dialer, rx, shutdown.subscribe())
            .await;
    }

    #[tokio::test]
    async fn rejects_invalid_server_name() {
        let tls = crate::net::tls::insecure_client_config().unwrap();
        let result = TlsDialer::new("127.0.0.1:1", "", tls, Duration::from_secs(1));
        assert!(matches!(result, Err(DialError::InvalidServerName(_))));
    }
}
