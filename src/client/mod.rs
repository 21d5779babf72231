//! Relay client subsystem.
//!
//! # Data Flow
//! ```text
//! local feed ─receive─▶ FeedListener ─push─▶ [relay buffer] ─pop─▶ UpstreamBridge ─write─▶ TLS upstream
//! ```
//!
//! # Design Decisions
//! - The relay buffer is bounded; a stalled upstream eventually blocks the feed listener
//! - Only the bridge touches the upstream link, only the listener touches the feed
//! - Write failures drop the in-flight message and trigger a redial

pub mod bridge;
pub mod feed;
pub mod listener;

use crate::config::ClientConfig;
use crate::lifecycle::ShutdownSignal;
use crate::net::tls::{self, TlsError};
use crate::queue;

pub use bridge::{BridgeConfig, BridgeState, DialError, Dialer, TlsDialer, UpstreamBridge};
pub use feed::{FeedError, FeedSource, ZmqFeed};
pub use listener::{FeedListener, ListenerConfig};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Tls(#[from] TlsError),

    #[error(transparent)]
    Dial(#[from] DialError),

    #[error(transparent)]
    Feed(#[from] FeedError),
}

/// Feed-to-upstream relay.
pub struct RelayClient {
    config: ClientConfig,
    dialer: TlsDialer,
}

impl RelayClient {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let dialer = TlsDialer::new(
            config.upstream_address.clone(),
            &config.server_name,
            tls::insecure_client_config()?,
            config.dial_timeout(),
        )?;
        Ok(Self { config, dialer })
    }

    /// Subscribe to the local feed, then relay until shutdown.
    ///
    /// Only the initial subscription can fail; later errors are retried in place.
    pub async fn run(self, shutdown: ShutdownSignal) -> Result<(), ClientError> {
        let feed = ZmqFeed::new(self.config.subscribe_endpoint.clone());
        self.run_with(feed, shutdown).await
    }

    /// [`RelayClient::run`] with an explicit feed source.
    pub async fn run_with<F>(self, feed: F, shutdown: ShutdownSignal) -> Result<(), ClientError>
    where
        F: FeedSource + 'static,
    {
        let listener = FeedListener::subscribe(feed, ListenerConfig::from(&self.config)).await?;

        let (tx, rx) = queue::bounded(self.config.relay_capacity);
        let bridge = UpstreamBridge::new(BridgeConfig::from(&self.config));
        tracing::info!(
            upstream = %self.config.upstream_address,
            endpoint = %self.config.subscribe_endpoint,
            relay_capacity = self.config.relay_capacity,
            "Relay client running"
        );
        let bridge_task = tokio::spawn(bridge.run(self.dialer, rx, shutdown.clone()));

        listener.run(tx, shutdown).await;

        if let Err(e) = bridge_task.await {
            tracing::error!(error = %e, "Upstream bridge task failed");
        }
        Ok(())
    }
}
