//! HTTP transport subsystem.
//!
//! # Data Flow
//! ```text
//! FailoverTarget picks a candidate
//!     → request.rs (RequestSpec rebuilt for that candidate)
//!     → client.rs (connect, TLS, send, wait for response headers)
//!     → Response<Body> | TransportError { kind, source }
//! ```
//!
//! # Design Decisions
//! - `Transport` is the seam between failover logic and the network
//! - Any response is a success at this layer, whatever its status
//! - Failures are classified once, here, by walking the error chain

pub mod client;
pub mod request;

use async_trait::async_trait;
use axum::http::Response;
use std::error::Error as StdError;
use std::io;

use crate::error::{BoxError, FailureKind};
use crate::net::uri::CandidateUri;

pub use client::HttpTransport;
pub use request::{RequestSpec, X_REQUEST_ID};

/// Sends one attempt to one candidate.
#[async_trait]
pub trait Transport: Send + Sync {
    type Body: Send;

    /// Resolves once response headers arrive. Body consumption is the
    /// caller's business and is not part of the attempt.
    async fn send(
        &self,
        candidate: &CandidateUri,
        request: &RequestSpec,
    ) -> Result<Response<Self::Body>, TransportError>;
}

/// An attempt that got no response.
#[derive(Debug, thiserror::Error)]
#[error("{kind}: {source}")]
pub struct TransportError {
    pub kind: FailureKind,
    #[source]
    pub source: BoxError,
}

impl TransportError {
    pub fn new(kind: FailureKind, source: impl Into<BoxError>) -> Self {
        Self {
            kind,
            source: source.into(),
        }
    }

    /// Wrap an error, deriving its kind from the source chain.
    pub fn classified<E>(source: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        let kind = classify(&source);
        Self::new(kind, source)
    }
}

/// Derive a failure kind from an error and everything it wraps.
///
/// TLS problems anywhere in the chain win; otherwise the outermost
/// recognizable cause decides.
pub fn classify(error: &(dyn StdError + 'static)) -> FailureKind {
    let mut kind = FailureKind::Other;
    let mut current = Some(error);
    while let Some(err) = current {
        if err.is::<rustls::Error>() {
            return FailureKind::Tls;
        }
        if let Some(io_err) = err.downcast_ref::<io::Error>() {
            if kind == FailureKind::Other {
                kind = match io_err.kind() {
                    io::ErrorKind::ConnectionRefused => FailureKind::Refused,
                    io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::UnexpectedEof => FailureKind::Reset,
                    io::ErrorKind::TimedOut => FailureKind::Timeout,
                    _ => FailureKind::Other,
                };
            }
            // io::Error::source skips the error it wraps.
            current = io_err
                .get_ref()
                .map(|inner| inner as &(dyn StdError + 'static));
            continue;
        }
        if kind == FailureKind::Other {
            if let Some(hyper_err) = err.downcast_ref::<hyper::Error>() {
                if hyper_err.is_timeout() {
                    kind = FailureKind::Timeout;
                } else if hyper_err.is_incomplete_message() || hyper_err.is_canceled() {
                    kind = FailureKind::Reset;
                }
            } else if err.is::<tokio::time::error::Elapsed>() {
                kind = FailureKind::Timeout;
            }
        }
        current = err.source();
    }
    kind
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("connect error")]
    struct Wrapper(#[source] io::Error);

    #[test]
    fn classifies_io_kinds_through_wrappers() {
        let refused = Wrapper(io::Error::from(io::ErrorKind::ConnectionRefused));
        assert_eq!(classify(&refused), FailureKind::Refused);

        let reset = Wrapper(io::Error::from(io::ErrorKind::ConnectionReset));
        assert_eq!(classify(&reset), FailureKind::Reset);

        let timed_out = io::Error::from(io::ErrorKind::TimedOut);
        assert_eq!(classify(&timed_out), FailureKind::Timeout);
    }

    #[test]
    fn tls_errors_inside_io_errors_are_tls() {
        let tls = io::Error::new(
            io::ErrorKind::InvalidData,
            rustls::Error::InvalidCertificate(rustls::CertificateError::UnknownIssuer),
        );
        let rewrapped = io::Error::new(io::ErrorKind::Other, tls);
        assert_eq!(classify(&Wrapper(rewrapped)), FailureKind::Tls);
    }

    #[test]
    fn unknown_errors_are_other() {
        let err = io::Error::new(io::ErrorKind::InvalidInput, "nope");
        assert_eq!(classify(&err), FailureKind::Other);
        assert_eq!(TransportError::classified(err).kind, FailureKind::Other);
    }

    #[tokio::test]
    async fn elapsed_timers_are_timeouts() {
        let elapsed = tokio::time::timeout(
            std::time::Duration::from_millis(1),
            std::future::pending::<()>(),
        )
        .await
        .unwrap_err();
        assert_eq!(TransportError::classified(elapsed).kind, FailureKind::Timeout);
    }
}
