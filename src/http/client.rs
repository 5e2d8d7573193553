//! HTTP/1.1 and HTTP/2 transport over hyper.

use arc_swap::ArcSwap;
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{HeaderValue, Response};
use hyper::body::Incoming;
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{ConfigError, TimeoutConfig, ValidationError};
use crate::error::{FailoverError, FailureKind};
use crate::http::request::RequestSpec;
use crate::http::{Transport, TransportError};
use crate::net::tls::TrustContext;
use crate::net::uri::CandidateUri;

type HttpsClient = Client<HttpsConnector<HttpConnector>, Body>;

/// Pooled hyper client secured by a [`TrustContext`].
///
/// `read` in the timeout config bounds the whole attempt up to response
/// headers; `connect` bounds TCP establishment alone.
pub struct HttpTransport {
    client: ArcSwap<HttpsClient>,
    connect_timeout: Duration,
    read_timeout: Duration,
    user_agent: HeaderValue,
}

impl HttpTransport {
    pub fn new(
        trust: &TrustContext,
        timeouts: &TimeoutConfig,
        user_agent: &str,
    ) -> Result<Self, FailoverError> {
        let user_agent = HeaderValue::from_str(user_agent).map_err(|_| {
            ConfigError::Validation(vec![ValidationError::InvalidUserAgent(user_agent.to_string())])
        })?;
        let connect_timeout = Duration::from_millis(timeouts.connect_ms);
        Ok(Self {
            client: ArcSwap::from_pointee(build_client(trust, connect_timeout)),
            connect_timeout,
            read_timeout: Duration::from_millis(timeouts.read_ms),
            user_agent,
        })
    }

    /// Swap in a new trust context. Attempts already in flight finish on
    /// the client they started with; pooled connections are not reused.
    pub fn set_trust(&self, trust: &TrustContext) {
        self.client
            .store(Arc::new(build_client(trust, self.connect_timeout)));
        tracing::info!("Transport trust context replaced");
    }
}

fn build_client(trust: &TrustContext, connect_timeout: Duration) -> HttpsClient {
    let mut http = HttpConnector::new();
    http.enforce_http(false);
    http.set_nodelay(true);
    http.set_connect_timeout(Some(connect_timeout));
    Client::builder(TokioExecutor::new()).build(trust.https_connector(http))
}

#[async_trait]
impl Transport for HttpTransport {
    type Body = Incoming;

    async fn send(
        &self,
        candidate: &CandidateUri,
        request: &RequestSpec,
    ) -> Result<Response<Incoming>, TransportError> {
        let req = request
            .to_request(candidate, &self.user_agent)
            .map_err(|e| TransportError::new(FailureKind::Other, e))?;
        let client = self.client.load_full();

        match tokio::time::timeout(self.read_timeout, client.request(req)).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) => Err(TransportError::classified(e)),
            Err(elapsed) => Err(TransportError::new(FailureKind::Timeout, elapsed)),
        }
    }
}
