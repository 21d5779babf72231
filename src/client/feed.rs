//! Local publish/subscribe feed.

use async_trait::async_trait;
use thiserror::Error;
use zeromq::{Socket, SocketRecv, SubSocket};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("feed dial to {endpoint} failed: {source}")]
    Dial {
        endpoint: String,
        #[source]
        source: BoxError,
    },

    #[error("feed subscribe failed: {0}")]
    Subscribe(#[source] BoxError),

    #[error("feed receive failed: {0}")]
    Receive(#[source] BoxError),
}

/// A message source with "receive everything" semantics.
#[async_trait]
pub trait FeedSource: Send {
    /// Connect to the feed and subscribe to all messages. Replaces any previous subscription.
    async fn subscribe(&mut self) -> Result<(), FeedError>;

    /// Wait for the next message payload.
    async fn receive(&mut self) -> Result<Vec<u8>, FeedError>;
}

/// ZeroMQ SUB socket, e.g. on `ipc:///temperature`.
pub struct ZmqFeed {
    endpoint: String,
    socket: Option<SubSocket>,
}

impl ZmqFeed {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            socket: None,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl FeedSource for ZmqFeed {
    async fn subscribe(&mut self) -> Result<(), FeedError> {
        self.socket = None;

        let mut socket = SubSocket::new();
        socket
            .connect(&self.endpoint)
            .await
            .map_err(|e| FeedError::Dial {
                endpoint: self.endpoint.clone(),
                source: e.into(),
            })?;
        socket
            .subscribe("")
            .await
            .map_err(|e| FeedError::Subscribe(e.into()))?;

        tracing::info!(endpoint = %self.endpoint, "Feed subscribed");
        self.socket = Some(socket);
        Ok(())
    }

    async fn receive(&mut self) -> Result<Vec<u8>, FeedError> {
        let socket = self
            .socket
            .as_mut()
            .ok_or_else(|| FeedError::Receive("not subscribed".into()))?;
        let message = socket
            .recv()
            .await
            .map_err(|e| FeedError::Receive(e.into()))?;
        // Multipart messages are flattened into one payload.
        Ok(message.into_vec().concat())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn receive_before_subscribe_is_an_error() {
        let mut feed = ZmqFeed::new("ipc:///tmp/telemetry-relay-unused");
        assert_eq!(feed.endpoint(), "ipc:///tmp/telemetry-relay-unused");
        let err = feed.receive().await.unwrap_err();
        assert!(matches!(err, FeedError::Receive(_)));
    }

    #[tokio::test]
    async fn invalid_endpoint_fails_to_dial() {
        let mut feed = ZmqFeed::new("not-an-endpoint");
        let err = feed.subscribe().await.unwrap_err();
        assert!(matches!(err, FeedError::Dial { .. }));
    }
}
