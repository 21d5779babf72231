//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Upstream dial fails:
//!     → backoff.rs (next jittered delay, capped)
//!     → bridge sleeps, then dials again
//! Dial succeeds:
//!     → backoff reset to the base delay
//! ```
//!
//! # Design Decisions
//! - Every external call has a deadline (dial timeout, idle deadline)
//! - Jittered backoff prevents a thundering herd of reconnecting clients
//! - Backoff sleeps are raced against shutdown so loops stop promptly

pub mod backoff;

pub use backoff::{calculate_backoff, Backoff};
