//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, transient error handling)
//!     → connection.rs (id + guard, tracked until the session returns)
//!     → pending connection queue
//!     → tls.rs (handshake performed by the worker that dequeues it)
//!
//! Outgoing upstream link
//!     → tls.rs (client config, certificate verification disabled)
//! ```
//!
//! # Design Decisions
//! - Admission control comes from the bounded queue, never from refusing accepts
//! - Handshakes run on workers so one slow peer cannot stall the acceptor
//! - Every connection is tracked for leak checks and graceful shutdown

pub mod connection;
pub mod listener;
pub mod tls;

pub use connection::{ConnectionGuard, ConnectionId, ConnectionTracker};
pub use listener::{Listener, ListenerError};
