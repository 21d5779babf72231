//! Per-connection line protocol.
//!
//! # State Machine
//! ```text
//! READING ──line──▶ emit to sink ──▶ READING
//!    │
//!    ├─ idle deadline elapsed ──▶ CLOSED (Timeout)
//!    ├─ EOF / read error ───────▶ CLOSED (Eof / Error)
//!    ├─ line over the limit ────▶ CLOSED (LineTooLong)
//!    └─ shutdown ───────────────▶ CLOSED (Shutdown)
//! ```
//!
//! The idle deadline is re-armed before every read. The stream is owned by the
//! session and closed on every exit path.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::config::ServerConfig;
use crate::lifecycle::ShutdownSignal;
use crate::observability::metrics;
use crate::server::sink::LineSink;

/// Limits applied to one session.
#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    pub idle_timeout: Duration,
    /// Longest line in bytes, excluding the delimiter. 0 disables the bound.
    pub max_line_bytes: usize,
}

impl From<&ServerConfig> for SessionConfig {
    fn from(config: &ServerConfig) -> Self {
        Self {
            idle_timeout: config.idle_timeout(),
            max_line_bytes: config.max_line_bytes,
        }
    }
}

/// Why a session ended.
#[derive(Debug)]
pub enum SessionEnd {
    /// Peer closed the connection. A trailing unterminated fragment is discarded.
    Eof,
    /// No complete read within the idle deadline.
    Timeout,
    Error(io::Error),
    LineTooLong,
    Shutdown,
}

impl SessionEnd {
    /// Short label for metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            SessionEnd::Eof => "eof",
            SessionEnd::Timeout => "timeout",
            SessionEnd::Error(_) => "error",
            SessionEnd::LineTooLong => "line_too_long",
            SessionEnd::Shutdown => "shutdown",
        }
    }
}

/// Read newline-delimited lines from `stream` until it closes, stalls or errors.
pub async fn handle_connection<S>(
    stream: S,
    peer: SocketAddr,
    config: SessionConfig,
    sink: &dyn LineSink,
    mut shutdown: ShutdownSignal,
) -> SessionEnd
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut reader = BufReader::new(stream);
    let mut line = Vec::new();

    let end = loop {
        line.clear();

        let read = tokio::select! {
            _ = shutdown.recv() => break SessionEnd::Shutdown,
            read = tokio::time::timeout(
                config.idle_timeout,
                read_line(&mut reader, &mut line, config.max_line_bytes),
            ) => read,
        };

        match read {
            Err(_elapsed) => {
                tracing::info!(peer_addr = %peer, "Idle timeout, closing connection");
                break SessionEnd::Timeout;
            }
            Ok(Err(e)) => {
                tracing::warn!(peer_addr = %peer, error = %e, "Read error, closing connection");
                break SessionEnd::Error(e);
            }
            Ok(Ok(0)) => {
                tracing::debug!(peer_addr = %peer, "Peer closed connection");
                break SessionEnd::Eof;
            }
            Ok(Ok(_)) => {}
        }

        if line.last() != Some(&b'\n') {
            if config.max_line_bytes > 0 && line.len() > config.max_line_bytes {
                tracing::warn!(
                    peer_addr = %peer,
                    max_line_bytes = config.max_line_bytes,
                    "Line exceeds limit, closing connection"
                );
                break SessionEnd::LineTooLong;
            }
            tracing::debug!(
                peer_addr = %peer,
                discarded_bytes = line.len(),
                "Peer closed connection mid-line"
            );
            break SessionEnd::Eof;
        }

        let content = trim_delimiter(&line);
        if config.max_line_bytes > 0 && content.len() > config.max_line_bytes {
            tracing::warn!(
                peer_addr = %peer,
                max_line_bytes = config.max_line_bytes,
                "Line exceeds limit, closing connection"
            );
            break SessionEnd::LineTooLong;
        }

        metrics::record_line_received();
        sink.emit(peer, content);
    };

    // Best effort: sends close_notify on TLS streams.
    let _ = reader.into_inner().shutdown().await;
    end
}

/// Read through the next `\n`, at most `max + 2` bytes when `max` is non-zero
/// so a full-length line still fits with its `\r\n`.
async fn read_line<R>(reader: &mut R, buf: &mut Vec<u8>, max: usize) -> io::Result<usize>
where
    R: tokio::io::AsyncBufRead + Unpin,
{
    if max == 0 {
        reader.read_until(b'\n', buf).await
    } else {
        reader.take(max as u64 + 2).read_until(b'\n', buf).await
    }
}

fn trim_delimiter(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}
