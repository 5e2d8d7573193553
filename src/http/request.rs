//! Outgoing request description.
//!
//! # Responsibilities
//! - Hold the method, path, headers and buffered body of a logical call
//! - Rebuild a fresh `Request` for every attempt against a candidate
//! - Tag each logical call with its call id
//!
//! # Design Decisions
//! - Bodies are buffered `Bytes` so retries can resend them
//! - Caller-supplied `x-request-id` wins over the generated call id

use axum::body::Body;
use axum::http::uri::PathAndQuery;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method, Request};
use bytes::Bytes;
use uuid::Uuid;

use crate::error::FailoverError;
use crate::net::uri::CandidateUri;

/// Header carrying the call id.
pub const X_REQUEST_ID: &str = "x-request-id";

/// A replayable request, independent of which host receives it.
#[derive(Debug, Clone)]
pub struct RequestSpec {
    method: Method,
    path_and_query: PathAndQuery,
    headers: HeaderMap,
    body: Bytes,
}

impl RequestSpec {
    /// `path_and_query` is relative to each candidate's base path.
    pub fn new(method: Method, path_and_query: &str) -> Result<Self, FailoverError> {
        let path = if path_and_query.starts_with('/') {
            path_and_query.to_string()
        } else {
            format!("/{path_and_query}")
        };
        let path_and_query = path
            .parse::<PathAndQuery>()
            .map_err(|e| FailoverError::InvalidRequest(format!("{path_and_query}: {e}")))?;
        Ok(Self {
            method,
            path_and_query,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        })
    }

    pub fn get(path_and_query: &str) -> Result<Self, FailoverError> {
        Self::new(Method::GET, path_and_query)
    }

    /// Add a header, rejecting names or values that are not valid HTTP.
    pub fn header(mut self, name: &str, value: &str) -> Result<Self, FailoverError> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| FailoverError::InvalidRequest(format!("header name {name:?}: {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| FailoverError::InvalidRequest(format!("header {name}: {e}")))?;
        self.headers.append(name, value);
        Ok(self)
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path_and_query(&self) -> &str {
        self.path_and_query.as_str()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body_bytes(&self) -> &Bytes {
        &self.body
    }

    /// The call id this request carries, if one has been assigned.
    pub fn call_id(&self) -> Option<&str> {
        self.headers
            .get(X_REQUEST_ID)
            .and_then(|v| v.to_str().ok())
    }

    /// Copy of this request tagged with a call id. An id already present
    /// is kept.
    pub(crate) fn tagged(&self) -> (Self, String) {
        let mut spec = self.clone();
        if let Some(existing) = self.call_id() {
            let id = existing.to_string();
            return (spec, id);
        }
        let id = Uuid::new_v4().to_string();
        if let Ok(value) = HeaderValue::from_str(&id) {
            spec.headers.insert(X_REQUEST_ID, value);
        }
        (spec, id)
    }

    /// Build the concrete request for one attempt against `candidate`.
    pub fn to_request(
        &self,
        candidate: &CandidateUri,
        user_agent: &HeaderValue,
    ) -> Result<Request<Body>, axum::http::Error> {
        let mut builder = Request::builder()
            .method(self.method.clone())
            .uri(candidate.join(self.path_and_query.as_str()));
        if let Some(headers) = builder.headers_mut() {
            headers.extend(self.headers.clone());
            if !headers.contains_key(header::USER_AGENT) {
                headers.insert(header::USER_AGENT, user_agent.clone());
            }
        }
        builder.body(Body::from(self.body.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate() -> CandidateUri {
        CandidateUri::parse("svc", "https://a.example.com:8443/api").unwrap()
    }

    #[test]
    fn builds_attempt_request() {
        let spec = RequestSpec::new(Method::POST, "widgets?limit=2")
            .unwrap()
            .header("accept", "application/json")
            .unwrap()
            .body("payload");
        let agent = HeaderValue::from_static("host-failover/test");
        let req = spec.to_request(&candidate(), &agent).unwrap();

        assert_eq!(req.method(), Method::POST);
        assert_eq!(
            req.uri().to_string(),
            "https://a.example.com:8443/api/widgets?limit=2"
        );
        assert_eq!(req.headers()[header::ACCEPT], "application/json");
        assert_eq!(req.headers()[header::USER_AGENT], "host-failover/test");
    }

    #[test]
    fn caller_user_agent_wins() {
        let spec = RequestSpec::get("/").unwrap().header("user-agent", "mine").unwrap();
        let agent = HeaderValue::from_static("host-failover/test");
        let req = spec.to_request(&candidate(), &agent).unwrap();
        assert_eq!(req.headers()[header::USER_AGENT], "mine");
    }

    #[test]
    fn tagging_assigns_one_call_id() {
        let spec = RequestSpec::get("/status").unwrap();
        assert!(spec.call_id().is_none());

        let (tagged, id) = spec.tagged();
        assert_eq!(tagged.call_id(), Some(id.as_str()));
        assert!(Uuid::parse_str(&id).is_ok());

        let (again, same) = tagged.tagged();
        assert_eq!(same, id);
        assert_eq!(again.headers().get_all(X_REQUEST_ID).iter().count(), 1);
    }

    #[test]
    fn rejects_invalid_input() {
        assert!(matches!(
            RequestSpec::get("/a b"),
            Err(FailoverError::InvalidRequest(_))
        ));
        assert!(matches!(
            RequestSpec::get("/").unwrap().header("bad header", "x"),
            Err(FailoverError::InvalidRequest(_))
        ));
    }
}
