//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for a failover
//! client. All types derive Serde traits for deserialization from config
//! files.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration for one failover client.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct FailoverConfig {
    /// Target service identity and candidate URIs.
    pub service: ServiceConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Backoff between failover attempts.
    pub backoff: BackoffConfig,

    /// Host health window and registry bounds.
    pub health: HealthConfig,

    /// TLS trust material.
    pub security: SecurityConfig,

    /// Buffering for external event sinks.
    pub events: EventsConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// The replicated service a client talks to.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Service name; becomes part of every host key.
    pub name: String,

    /// Candidate base URIs (e.g., "https://host-1:8443/api").
    pub uris: Vec<String>,

    /// Maximum attempts per logical call, capped by the number of hosts.
    pub max_attempts: u32,

    /// Shuffle discovery order once at construction.
    pub randomize_order: bool,

    /// User-Agent sent with every attempt.
    pub user_agent: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            uris: Vec::new(),
            max_attempts: 4,
            randomize_order: false,
            user_agent: concat!("host-failover/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Timeout configuration for a single attempt.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Connection establishment timeout (TCP + TLS) in milliseconds.
    pub connect_ms: u64,

    /// Time to response headers in milliseconds.
    pub read_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_ms: 10_000,
            read_ms: 30_000,
        }
    }
}

/// Exponential backoff applied before the second and later attempts.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Base delay in milliseconds (0 disables backoff).
    pub base_delay_ms: u64,

    /// Maximum delay in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 50,
            max_delay_ms: 1_000,
        }
    }
}

/// Host health tracking configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Length of the sliding health window in seconds.
    pub window_secs: u64,

    /// Number of buckets the window is divided into.
    pub buckets: u32,

    /// Maximum number of hosts tracked by a registry.
    pub max_hosts: usize,

    /// Hosts without events for this long are forgotten.
    pub idle_expiry_secs: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            window_secs: 60,
            buckets: 6,
            max_hosts: 1_000,
            idle_expiry_secs: 24 * 60 * 60,
        }
    }
}

/// TLS trust material; all paths point at PEM files.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct SecurityConfig {
    /// CA bundle used to verify servers. Bundled web roots when unset.
    pub ca_file: Option<PathBuf>,

    /// Client certificate chain for mutual TLS.
    pub cert_file: Option<PathBuf>,

    /// Client private key (PKCS#1, PKCS#8 or SEC1) for mutual TLS.
    pub key_file: Option<PathBuf>,
}

/// Buffering for external host event sinks.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Events held before the oldest are dropped.
    pub queue_capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1_024,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable the Prometheus metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
