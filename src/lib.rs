//! Host-health-aware failover client.
//!
//! Calls to a replicated service go to the healthiest of its candidate
//! hosts and fail over to another one on connection-level errors, while
//! host health is learned from live traffic.

pub mod config;
pub mod error;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod resilience;

pub use config::schema::FailoverConfig;
pub use error::{ConnectionFailure, FailoverError, FailureKind};
pub use health::{HostEvent, HostEventsSink, HostKey, HostMetricsRegistry};
pub use http::{HttpTransport, RequestSpec, Transport};
pub use lifecycle::Shutdown;
pub use net::TrustContext;
pub use resilience::FailoverTarget;
