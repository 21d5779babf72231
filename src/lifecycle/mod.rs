//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Shutdown::trigger
//!
//! Shutdown (shutdown.rs):
//!     trigger → every ShutdownSignal resolves
//!     → acceptor stops accepting, workers stop dequeuing
//!     → feed listener and upstream bridge leave their loops
//! ```
//!
//! # Design Decisions
//! - One coordinator per process, handed to components as ShutdownSignal clones
//! - Late subscribers still observe a shutdown that already happened

pub mod shutdown;
pub mod signals;

pub use shutdown::{Shutdown, ShutdownSignal};
