//! Accept loop feeding the pending connection queue.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpStream;

use crate::lifecycle::ShutdownSignal;
use crate::net::{ConnectionGuard, ConnectionTracker, Listener};
use crate::observability::metrics;
use crate::queue::QueueSender;

/// Pause after a failed accept so a persistent error (e.g. EMFILE) cannot spin.
pub const ACCEPT_ERROR_PAUSE: Duration = Duration::from_millis(50);

/// An accepted connection that has not been handed to a worker yet.
///
/// The TLS handshake has not happened; the worker that dequeues it performs it.
#[derive(Debug)]
pub struct PendingConnection {
    pub stream: TcpStream,
    pub peer: SocketAddr,
    pub guard: ConnectionGuard,
}

/// Sole producer of the pending connection queue.
pub struct Acceptor {
    listener: Listener,
    queue: QueueSender<PendingConnection>,
    tracker: ConnectionTracker,
}

impl Acceptor {
    pub fn new(
        listener: Listener,
        queue: QueueSender<PendingConnection>,
        tracker: ConnectionTracker,
    ) -> Self {
        Self {
            listener,
            queue,
            tracker,
        }
    }

    /// Accept until shutdown.
    ///
    /// A full queue suspends this loop inside `push`; the kernel backlog keeps
    /// absorbing new connections meanwhile. Accept errors are logged and skipped.
    pub async fn run(self, mut shutdown: ShutdownSignal) {
        loop {
            let accepted = tokio::select! {
                _ = shutdown.recv() => break,
                accepted = self.listener.accept() => accepted,
            };

            let (stream, peer) = match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    tracing::warn!(error = %e, "Accept failed, continuing");
                    metrics::record_accept_error();
                    tokio::select! {
                        _ = shutdown.recv() => break,
                        _ = tokio::time::sleep(ACCEPT_ERROR_PAUSE) => continue,
                    }
                }
            };

            metrics::record_connection_accepted();
            let pending = PendingConnection {
                stream,
                peer,
                guard: self.tracker.track(),
            };
            tracing::debug!(
                peer_addr = %peer,
                connection_id = %pending.guard.id(),
                queued = self.queue.len(),
                "Queueing connection"
            );

            tokio::select! {
                _ = shutdown.recv() => break,
                pushed = self.queue.push(pending) => {
                    if pushed.is_err() {
                        tracing::warn!("Connection queue closed, acceptor stopping");
                        break;
                    }
                }
            }
        }

        tracing::info!("Acceptor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::Shutdown;
    use crate::queue;

    #[tokio::test]
    async fn blocks_on_full_queue_without_refusing() {
        let listener = Listener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = queue::bounded(1);
        let tracker = ConnectionTracker::new();
        let shutdown = Shutdown::new();

        let acceptor = tokio::spawn(
            Acceptor::new(listener, tx.clone(), tracker.clone()).run(shutdown.subscribe()),
        );

        let mut clients = Vec::new();
        for _ in 0..3 {
            clients.push(TcpStream::connect(addr).await.unwrap());
        }

        // One queued, one held by the blocked acceptor, one in the kernel backlog.
        while tracker.active_count() < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(tracker.active_count(), 2);
        assert_eq!(tx.len(), 1);
        assert!(!acceptor.is_finished());

        let mut peers = Vec::new();
        for _ in 0..3 {
            let pending = rx.pop().await.unwrap();
            peers.push(pending.peer);
        }
        let mut expected: Vec<_> = clients.iter().map(|c| c.local_addr().unwrap()).collect();
        expected.sort();
        peers.sort();
        assert_eq!(peers, expected);

        shutdown.trigger();
        acceptor.await.unwrap();
        assert_eq!(tracker.active_count(), 0);
    }
}
