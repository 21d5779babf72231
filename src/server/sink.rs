//! Destinations for received lines.

use std::net::SocketAddr;

/// Receives every complete line a session reads, tagged with its peer.
pub trait LineSink: Send + Sync {
    fn emit(&self, peer: SocketAddr, line: &[u8]);
}

/// Writes lines to the log on the `relay::lines` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl LineSink for TracingSink {
    fn emit(&self, peer: SocketAddr, line: &[u8]) {
        tracing::info!(
            target: "relay::lines",
            peer_addr = %peer,
            line = %String::from_utf8_lossy(line),
            "Line received"
        );
    }
}
