//! Caller-facing error types.

use std::fmt;

use crate::config::ConfigError;
use crate::health::HostKey;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Coarse classification of a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    Timeout,
    Refused,
    Reset,
    Tls,
    Other,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Timeout => "timeout",
            FailureKind::Refused => "refused",
            FailureKind::Reset => "reset",
            FailureKind::Tls => "tls",
            FailureKind::Other => "other",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An attempt that produced no response.
#[derive(Debug, thiserror::Error)]
#[error("connection to {host} failed ({kind}): {source}")]
pub struct ConnectionFailure {
    pub host: HostKey,
    pub kind: FailureKind,
    #[source]
    pub source: BoxError,
}

/// Outcome of a logical call that did not yield a response.
#[derive(Debug, thiserror::Error)]
pub enum FailoverError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("all {attempts} attempts failed; last: {last}")]
    BudgetExhausted {
        attempts: usize,
        #[source]
        last: ConnectionFailure,
    },
}

impl FailoverError {
    /// The host and cause of the final attempt, if any attempt was made.
    pub fn last_failure(&self) -> Option<&ConnectionFailure> {
        match self {
            FailoverError::BudgetExhausted { last, .. } => Some(last),
            _ => None,
        }
    }
}
