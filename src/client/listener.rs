//! Pub/sub listener: feed → relay buffer.

use std::time::Duration;

use crate::client::feed::{FeedError, FeedSource};
use crate::config::ClientConfig;
use crate::lifecycle::ShutdownSignal;
use crate::observability::metrics;
use crate::queue::QueueSender;

#[derive(Debug, Clone, Copy)]
pub struct ListenerConfig {
    /// Pause after a failed receive.
    pub receive_backoff: Duration,
    /// Subscribe again after a failed receive instead of only retrying it.
    pub redial_on_error: bool,
}

impl From<&ClientConfig> for ListenerConfig {
    fn from(config: &ClientConfig) -> Self {
        Self {
            receive_backoff: config.receive_backoff(),
            redial_on_error: config.redial_on_receive_error,
        }
    }
}

/// Sole producer of the relay buffer.
pub struct FeedListener<F> {
    source: F,
    config: ListenerConfig,
}

impl<F: FeedSource> FeedListener<F> {
    /// Dial and subscribe. Failure here is a startup error.
    pub async fn subscribe(mut source: F, config: ListenerConfig) -> Result<Self, FeedError> {
        source.subscribe().await?;
        Ok(Self { source, config })
    }

    /// Forward every received message into `relay`, in arrival order, until shutdown.
    ///
    /// Blocks on a full relay buffer. Receive errors are logged and retried
    /// after the configured backoff.
    pub async fn run(mut self, relay: QueueSender<Vec<u8>>, mut shutdown: ShutdownSignal) {
        tracing::info!("Feed listener started");
        loop {
            let received = tokio::select! {
                _ = shutdown.recv() => break,
                received = self.source.receive() => received,
            };

            match received {
                Ok(message) => {
                    metrics::record_feed_message();
                    tracing::trace!(
                        bytes = message.len(),
                        buffered = relay.len(),
                        "Feed message received"
                    );
                    tokio::select! {
                        _ = shutdown.recv() => break,
                        pushed = relay.push(message) => {
                            if pushed.is_err() {
                                tracing::warn!("Relay buffer closed, feed listener stopping");
                                break;
                            }
                        }
                    }
                }
                Err(e) => {
                    metrics::record_feed_error();
                    tracing::warn!(error = %e, "Feed receive failed");
                    tokio::select! {
                        _ = shutdown.recv() => break,
                        _ = tokio::time::sleep(self.config.receive_backoff) => {}
                    }
                    if self.config.redial_on_error {
                        if let Err(e) = self.source.subscribe().await {
                            tracing::warn!(error = %e, "Feed re-subscribe failed");
                        }
                    }
                }
            }
        }
        tracing::info!("Feed listener stopped");
    }
}
