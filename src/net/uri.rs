//! Candidate base URI parsing.
//!
//! # Responsibilities
//! - Parse configured base URIs into canonical form
//! - Derive the host key (service, hostname, port) for each candidate
//! - Join request paths onto a candidate's base path

use std::fmt;
use url::Url;

use crate::health::HostKey;

/// Why a configured URI was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UriError {
    #[error("not a valid URL: {uri} ({reason})")]
    Invalid { uri: String, reason: String },
    #[error("unsupported scheme '{scheme}' in {uri}")]
    UnsupportedScheme { uri: String, scheme: String },
    #[error("base URLs must consist of scheme, host, port and path only: {uri}")]
    NotCanonical { uri: String },
    #[error("no host in {uri}")]
    MissingHost { uri: String },
}

/// One candidate backend for a service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateUri {
    base: Url,
    key: HostKey,
}

impl CandidateUri {
    /// Parse a base URI for `service`.
    ///
    /// `ws`/`wss` are treated as `http`/`https`. Query strings, fragments
    /// and credentials are rejected.
    pub fn parse(service: &str, uri: &str) -> Result<Self, UriError> {
        let normalized = switch_ws_to_http(uri.trim());
        let base = Url::parse(&normalized).map_err(|e| UriError::Invalid {
            uri: uri.to_string(),
            reason: e.to_string(),
        })?;

        match base.scheme() {
            "http" | "https" => {}
            other => {
                return Err(UriError::UnsupportedScheme {
                    uri: uri.to_string(),
                    scheme: other.to_string(),
                })
            }
        }
        if base.query().is_some()
            || base.fragment().is_some()
            || !base.username().is_empty()
            || base.password().is_some()
        {
            return Err(UriError::NotCanonical {
                uri: uri.to_string(),
            });
        }

        let hostname = base
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| UriError::MissingHost {
                uri: uri.to_string(),
            })?
            .to_string();
        let port = base
            .port_or_known_default()
            .ok_or_else(|| UriError::MissingHost {
                uri: uri.to_string(),
            })?;

        Ok(Self {
            key: HostKey::new(service, hostname, port),
            base,
        })
    }

    pub fn key(&self) -> &HostKey {
        &self.key
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    pub fn is_tls(&self) -> bool {
        self.base.scheme() == "https"
    }

    /// Absolute URL for `path_and_query` under this candidate's base path.
    pub fn join(&self, path_and_query: &str) -> String {
        let base = self.base.as_str().trim_end_matches('/');
        let suffix = path_and_query.trim_start_matches('/');
        if suffix.is_empty() {
            format!("{base}/")
        } else {
            format!("{base}/{suffix}")
        }
    }
}

impl fmt::Display for CandidateUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.base.as_str())
    }
}

fn switch_ws_to_http(uri: &str) -> String {
    let lower = uri.get(..4).map(str::to_ascii_lowercase);
    match lower.as_deref() {
        Some("wss:") => format!("https:{}", &uri[4..]),
        Some(prefix) if prefix.starts_with("ws:") => format!("http:{}", &uri[3..]),
        _ => uri.to_string(),
    }
}
