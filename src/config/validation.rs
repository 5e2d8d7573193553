//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check every candidate URI parses into canonical form
//! - Check the user agent is a legal header value
//! - Validate value ranges (attempts > 0, window > 0, buckets > 0)
//! - Check TLS material settings are consistent
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: FailoverConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system
//! - Repeated hosts are not an error; the failover target collapses them

use axum::http::HeaderValue;
use std::fmt;

use crate::config::schema::FailoverConfig;
use crate::net::uri::{CandidateUri, UriError};

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    EmptyServiceName,
    NoCandidateUris,
    InvalidUri(UriError),
    ZeroMaxAttempts,
    InvalidUserAgent(String),
    ZeroWindow,
    ZeroBuckets,
    BucketsExceedWindow { buckets: u32, window_secs: u64 },
    ZeroMaxHosts,
    ZeroTimeout(&'static str),
    BackoffRange { base_delay_ms: u64, max_delay_ms: u64 },
    IncompleteClientIdentity,
    InvalidMetricsAddress(String),
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::EmptyServiceName => write!(f, "service.name must not be empty"),
            ValidationError::NoCandidateUris => write!(f, "service.uris must list at least one URI"),
            ValidationError::InvalidUri(e) => write!(f, "{}", e),
            ValidationError::ZeroMaxAttempts => write!(f, "service.max_attempts must be at least 1"),
            ValidationError::InvalidUserAgent(agent) => {
                write!(f, "service.user_agent is not a valid header value: {:?}", agent)
            }
            ValidationError::ZeroWindow => write!(f, "health.window_secs must be at least 1"),
            ValidationError::ZeroBuckets => write!(f, "health.buckets must be at least 1"),
            ValidationError::BucketsExceedWindow { buckets, window_secs } => write!(
                f,
                "health.buckets ({}) makes buckets shorter than 1ms for a {}s window",
                buckets, window_secs
            ),
            ValidationError::ZeroMaxHosts => write!(f, "health.max_hosts must be at least 1"),
            ValidationError::ZeroTimeout(name) => write!(f, "timeouts.{} must be positive", name),
            ValidationError::BackoffRange {
                base_delay_ms,
                max_delay_ms,
            } => write!(
                f,
                "backoff.base_delay_ms ({}) exceeds backoff.max_delay_ms ({})",
                base_delay_ms, max_delay_ms
            ),
            ValidationError::IncompleteClientIdentity => {
                write!(f, "security.cert_file and security.key_file must be set together")
            }
            ValidationError::InvalidMetricsAddress(addr) => {
                write!(f, "observability.metrics_address is not a socket address: {}", addr)
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// Check a parsed configuration for semantic errors.
pub fn validate_config(config: &FailoverConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let service = &config.service;
    if service.name.trim().is_empty() {
        errors.push(ValidationError::EmptyServiceName);
    }
    if service.uris.is_empty() {
        errors.push(ValidationError::NoCandidateUris);
    }
    for uri in &service.uris {
        if let Err(e) = CandidateUri::parse(&service.name, uri) {
            errors.push(ValidationError::InvalidUri(e));
        }
    }
    if service.max_attempts == 0 {
        errors.push(ValidationError::ZeroMaxAttempts);
    }
    if HeaderValue::from_str(&service.user_agent).is_err() {
        errors.push(ValidationError::InvalidUserAgent(service.user_agent.clone()));
    }

    let health = &config.health;
    if health.window_secs == 0 {
        errors.push(ValidationError::ZeroWindow);
    }
    if health.buckets == 0 {
        errors.push(ValidationError::ZeroBuckets);
    } else if health.window_secs > 0 && u64::from(health.buckets) > health.window_secs * 1_000 {
        errors.push(ValidationError::BucketsExceedWindow {
            buckets: health.buckets,
            window_secs: health.window_secs,
        });
    }
    if health.max_hosts == 0 {
        errors.push(ValidationError::ZeroMaxHosts);
    }

    if config.timeouts.connect_ms == 0 {
        errors.push(ValidationError::ZeroTimeout("connect_ms"));
    }
    if config.timeouts.read_ms == 0 {
        errors.push(ValidationError::ZeroTimeout("read_ms"));
    }
    if config.backoff.base_delay_ms > config.backoff.max_delay_ms {
        errors.push(ValidationError::BackoffRange {
            base_delay_ms: config.backoff.base_delay_ms,
            max_delay_ms: config.backoff.max_delay_ms,
        });
    }

    let security = &config.security;
    if security.cert_file.is_some() != security.key_file.is_some() {
        errors.push(ValidationError::IncompleteClientIdentity);
    }

    let observability = &config.observability;
    if observability.metrics_enabled
        && observability
            .metrics_address
            .parse::<std::net::SocketAddr>()
            .is_err()
    {
        errors.push(ValidationError::InvalidMetricsAddress(
            observability.metrics_address.clone(),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
