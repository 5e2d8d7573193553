//! Host identity and raw host events.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of one backend host as seen by one client service.
///
/// Used as the map key for every per-host structure. Never mutated after
/// creation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HostKey {
    service_name: String,
    hostname: String,
    port: u16,
}

impl HostKey {
    pub fn new(service_name: impl Into<String>, hostname: impl Into<String>, port: u16) -> Self {
        Self {
            service_name: service_name.into(),
            hostname: hostname.into(),
            port,
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for HostKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.service_name, self.hostname, self.port)
    }
}

/// Outcome of one completed attempt against a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostEvent {
    /// A response was received. The status code is irrelevant to
    /// reachability: a host answering 500 is still up.
    Success { status_code: u16, latency_micros: u64 },
    /// The exchange failed below HTTP (refused, reset, timeout, TLS).
    IoFailure,
}

impl HostEvent {
    pub fn is_failure(&self) -> bool {
        matches!(self, HostEvent::IoFailure)
    }
}

/// HTTP status class used for the cumulative per-host counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Informational,
    Successful,
    Redirection,
    ClientError,
    ServerError,
    Other,
}

impl StatusClass {
    pub fn of(status_code: u16) -> Self {
        match status_code / 100 {
            1 => StatusClass::Informational,
            2 => StatusClass::Successful,
            3 => StatusClass::Redirection,
            4 => StatusClass::ClientError,
            5 => StatusClass::ServerError,
            _ => StatusClass::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StatusClass::Informational => "1xx",
            StatusClass::Successful => "2xx",
            StatusClass::Redirection => "3xx",
            StatusClass::ClientError => "4xx",
            StatusClass::ServerError => "5xx",
            StatusClass::Other => "other",
        }
    }
}
