//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! FailoverTarget produces:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, histograms)
//!     → tracing.rs (call and attempt spans carrying the call id)
//!
//! Consumers:
//!     → stdout (pretty or JSON)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Call id flows through every attempt span and request
//! - Metrics are cheap facade calls; no recorder means no cost

pub mod logging;
pub mod metrics;
pub mod tracing;
