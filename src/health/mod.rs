//! Host health subsystem.
//!
//! # Data Flow
//! ```text
//! Attempt completes (failover target)
//!     → passive.rs (HostEventsSink / HostEventCallback)
//!     → registry.rs (per-host record, created on first event)
//!     → state.rs (sliding window, consecutive failures, status counts)
//!
//! Next selection:
//!     registry.rs rank(remaining candidates)
//!     → unknown hosts first, then fewest consecutive failures,
//!       lowest recent failure rate, least recently attempted
//! ```
//!
//! # Design Decisions
//! - Reachability only: any received status code is a success
//! - Per-host synchronization; no registry-wide lock
//! - Health decays with a configurable sliding window

pub mod key;
pub mod passive;
pub mod registry;
pub mod state;

pub use key::{HostEvent, HostKey, StatusClass};
pub use passive::{BufferedSink, FanOutSink, HostEventCallback, HostEventsSink};
pub use registry::{HostMetricsRegistry, HostMetricsSnapshot};
pub use state::{HostHealth, StatusCounts};
