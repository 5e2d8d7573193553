//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Logical call
//!     → failover.rs (rank candidates, attempt, record the outcome)
//!     → On connection failure: backoff.rs (delay), then re-rank and
//!       try the next untried candidate while budget remains
//! ```
//!
//! # Design Decisions
//! - Only connection-level failures fail over; any status is a response
//! - Budget is `min(max_attempts, candidates)`; no host repeats in a call
//! - Every attempt has a deadline enforced by the transport

pub mod backoff;
pub mod failover;

pub use failover::FailoverTarget;
