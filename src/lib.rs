//! Encrypted line server and feed-to-upstream telemetry relay.

pub mod client;
pub mod config;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod queue;
pub mod resilience;
pub mod server;

pub use client::RelayClient;
pub use config::schema::RelayConfig;
pub use lifecycle::Shutdown;
pub use server::Server;
