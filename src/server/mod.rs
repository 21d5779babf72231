//! Line server subsystem.
//!
//! # Data Flow
//! ```text
//! Listener ─accept─▶ Acceptor ─push─▶ [pending connection queue] ─pop─▶ Worker × N
//!                                                                        │
//!                                              TLS handshake ◀───────────┘
//!                                                    │
//!                                              session.rs (line loop) ─▶ LineSink
//! ```
//!
//! # Design Decisions
//! - The queue is the only admission control: accepts never get refused
//! - Worker count is the only concurrency limit on sessions
//! - A connection belongs to exactly one worker from dequeue to close

pub mod acceptor;
pub mod pool;
pub mod session;
pub mod sink;

use std::sync::Arc;

use tokio_rustls::TlsAcceptor;

use crate::config::ServerConfig;
use crate::lifecycle::ShutdownSignal;
use crate::net::tls::{self, Identity, TlsError};
use crate::net::{ConnectionTracker, Listener};
use crate::observability::metrics;
use crate::queue;

pub use acceptor::{Acceptor, PendingConnection};
pub use pool::WorkerPool;
pub use session::{handle_connection, SessionConfig, SessionEnd};
pub use sink::{LineSink, TracingSink};

/// Encrypted line server.
pub struct Server {
    config: ServerConfig,
    tls: TlsAcceptor,
    sink: Arc<dyn LineSink>,
    tracker: ConnectionTracker,
}

impl Server {
    pub fn new(
        config: ServerConfig,
        identity: Identity,
        sink: Arc<dyn LineSink>,
    ) -> Result<Self, TlsError> {
        let tls = TlsAcceptor::from(Arc::new(tls::server_config(identity)?));
        Ok(Self {
            config,
            tls,
            sink,
            tracker: ConnectionTracker::new(),
        })
    }

    /// Live connection counter: queued, awaiting the acceptor, or in a session.
    pub fn tracker(&self) -> ConnectionTracker {
        self.tracker.clone()
    }

    /// Serve `listener` until shutdown, then wait for every worker to exit.
    pub async fn run(self, listener: Listener, shutdown: ShutdownSignal) {
        if let Ok(addr) = listener.local_addr() {
            tracing::info!(
                address = %addr,
                workers = self.config.worker_pool_size,
                queue_capacity = self.config.queue_capacity,
                "Server running (TLS)"
            );
        }

        let (tx, rx) = queue::bounded(self.config.queue_capacity);
        let context = Arc::new(SessionContext {
            tls: self.tls,
            session: SessionConfig::from(&self.config),
            sink: self.sink,
            shutdown: shutdown.clone(),
        });

        let pool = WorkerPool::spawn(
            self.config.worker_pool_size,
            rx,
            move |pending| serve_connection(Arc::clone(&context), pending),
            shutdown.clone(),
        );

        Acceptor::new(listener, tx, self.tracker).run(shutdown).await;
        pool.join().await;
        tracing::info!("Server stopped");
    }
}

struct SessionContext {
    tls: TlsAcceptor,
    session: SessionConfig,
    sink: Arc<dyn LineSink>,
    shutdown: ShutdownSignal,
}

/// Worker body: handshake, run the session, release the connection.
async fn serve_connection(context: Arc<SessionContext>, pending: PendingConnection) {
    let PendingConnection {
        stream,
        peer,
        guard,
    } = pending;

    // The handshake shares the idle deadline so a silent peer cannot pin a worker.
    let handshake = tokio::time::timeout(context.session.idle_timeout, context.tls.accept(stream));
    let stream = match handshake.await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            tracing::warn!(
                peer_addr = %peer,
                connection_id = %guard.id(),
                error = %e,
                "TLS handshake failed"
            );
            return;
        }
        Err(_) => {
            tracing::warn!(
                peer_addr = %peer,
                connection_id = %guard.id(),
                "TLS handshake timed out"
            );
            return;
        }
    };

    metrics::record_session_started();
    tracing::debug!(peer_addr = %peer, connection_id = %guard.id(), "Session started");

    let end = handle_connection(
        stream,
        peer,
        context.session,
        context.sink.as_ref(),
        context.shutdown.clone(),
    )
    .await;

    metrics::record_session_closed(end.reason());
    tracing::debug!(
        peer_addr = %peer,
        connection_id = %guard.id(),
        reason = end.reason(),
        "Session closed"
    );
    drop(guard);
}
