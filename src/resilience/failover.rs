//! Health-aware failover across the candidate hosts of one service.
//!
//! One logical call walks an explicit state machine:
//!
//! ```text
//! Selecting ──▶ Attempting ──▶ response (any status) ──▶ done
//!     ▲              │
//!     │              ▼ connection failure
//!     └── RetryableFailure (budget left)      TerminalFailure (budget spent)
//! ```
//!
//! Each completed attempt produces exactly one host event. An attempt
//! whose future is dropped before it completes produces none.

use axum::http::Response;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::Instrument;

use crate::config::{BackoffConfig, ConfigError, FailoverConfig, ServiceConfig, ValidationError};
use crate::error::{ConnectionFailure, FailoverError};
use crate::health::{FanOutSink, HostEventCallback, HostEventsSink, HostKey, HostMetricsRegistry};
use crate::http::{HttpTransport, RequestSpec, Transport};
use crate::net::tls::TrustContext;
use crate::net::uri::CandidateUri;
use crate::observability::{metrics, tracing as spans};
use crate::resilience::backoff;

/// Where a logical call currently stands.
#[derive(Debug)]
enum CallState {
    Selecting,
    Attempting(usize),
    RetryableFailure,
    TerminalFailure,
}

/// Executes logical calls against the healthiest reachable candidate.
pub struct FailoverTarget<T: Transport> {
    service: String,
    candidates: Vec<CandidateUri>,
    max_attempts: usize,
    backoff: BackoffConfig,
    registry: Arc<HostMetricsRegistry>,
    extra_sinks: Vec<Arc<dyn HostEventsSink>>,
    sink: Arc<dyn HostEventsSink>,
    transport: T,
}

impl<T: Transport> FailoverTarget<T> {
    /// Parse and deduplicate the service's candidates.
    ///
    /// Candidates sharing a host key collapse to the first one listed. With
    /// `randomize_order` the discovery order is shuffled once, here.
    pub fn new(
        service: &ServiceConfig,
        backoff: BackoffConfig,
        registry: Arc<HostMetricsRegistry>,
        transport: T,
    ) -> Result<Self, ConfigError> {
        if service.max_attempts == 0 {
            return Err(ConfigError::Validation(vec![ValidationError::ZeroMaxAttempts]));
        }

        let mut candidates: Vec<CandidateUri> = Vec::with_capacity(service.uris.len());
        for uri in &service.uris {
            let candidate = CandidateUri::parse(&service.name, uri)?;
            if candidates.iter().any(|c| c.key() == candidate.key()) {
                tracing::warn!(uri = %uri, host = %candidate.key(), "Ignoring duplicate candidate");
                continue;
            }
            candidates.push(candidate);
        }
        if candidates.is_empty() {
            return Err(ConfigError::NoCandidates(service.name.clone()));
        }
        if service.randomize_order {
            fastrand::shuffle(&mut candidates);
        }

        tracing::info!(
            service = %service.name,
            candidates = candidates.len(),
            max_attempts = service.max_attempts,
            "Failover target ready"
        );

        let sink: Arc<dyn HostEventsSink> = registry.clone();
        Ok(Self {
            service: service.name.clone(),
            candidates,
            max_attempts: service.max_attempts as usize,
            backoff,
            registry,
            extra_sinks: Vec::new(),
            sink,
            transport,
        })
    }

    pub fn from_config(
        config: &FailoverConfig,
        registry: Arc<HostMetricsRegistry>,
        transport: T,
    ) -> Result<Self, ConfigError> {
        Self::new(&config.service, config.backoff.clone(), registry, transport)
    }

    /// Also deliver every host event to `sink`, after the registry.
    pub fn with_events_sink(mut self, sink: Arc<dyn HostEventsSink>) -> Self {
        self.extra_sinks.push(sink);
        let registry: Arc<dyn HostEventsSink> = self.registry.clone();
        let mut fan_out = FanOutSink::new(vec![registry]);
        for extra in &self.extra_sinks {
            fan_out.push(Arc::clone(extra));
        }
        self.sink = Arc::new(fan_out);
        self
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    /// Candidates in discovery order.
    pub fn candidates(&self) -> &[CandidateUri] {
        &self.candidates
    }

    pub fn registry(&self) -> &Arc<HostMetricsRegistry> {
        &self.registry
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Most attempts one logical call may make.
    pub fn budget(&self) -> usize {
        self.max_attempts.min(self.candidates.len())
    }

    /// Run one logical call.
    ///
    /// Returns the first response received, whatever its status. Fails
    /// only when every attempt in the budget failed to get a response, with
    /// the cause of the last one.
    pub async fn execute(&self, request: &RequestSpec) -> Result<Response<T::Body>, FailoverError> {
        let (request, call_id) = request.tagged();
        let span = spans::call_span(
            &self.service,
            &call_id,
            request.method().as_str(),
            request.path_and_query(),
        );
        self.run(&request).instrument(span).await
    }

    async fn run(&self, request: &RequestSpec) -> Result<Response<T::Body>, FailoverError> {
        let budget = self.budget();
        let mut tried = vec![false; self.candidates.len()];
        let mut attempts = 0usize;
        let mut last_failure: Option<ConnectionFailure> = None;
        let mut state = CallState::Selecting;

        loop {
            state = match state {
                CallState::Selecting => {
                    if attempts >= budget {
                        CallState::TerminalFailure
                    } else {
                        match self.select(&tried) {
                            Some(index) => CallState::Attempting(index),
                            None => CallState::TerminalFailure,
                        }
                    }
                }
                CallState::Attempting(index) => {
                    tried[index] = true;
                    attempts += 1;
                    let candidate = &self.candidates[index];
                    match self.attempt(candidate, request, attempts).await {
                        Ok(response) => {
                            metrics::record_call_outcome(&self.service, "success");
                            return Ok(response);
                        }
                        Err(failure) => {
                            last_failure = Some(failure);
                            if attempts < budget {
                                CallState::RetryableFailure
                            } else {
                                CallState::TerminalFailure
                            }
                        }
                    }
                }
                CallState::RetryableFailure => {
                    let delay = backoff::delay_before(attempts, &self.backoff);
                    if !delay.is_zero() {
                        tracing::debug!(delay = ?delay, "Backing off before next candidate");
                        tokio::time::sleep(delay).await;
                    }
                    CallState::Selecting
                }
                CallState::TerminalFailure => {
                    metrics::record_call_outcome(&self.service, "exhausted");
                    return Err(match last_failure.take() {
                        Some(last) => {
                            tracing::warn!(attempts, host = %last.host, kind = %last.kind, "All attempts failed");
                            FailoverError::BudgetExhausted { attempts, last }
                        }
                        None => FailoverError::Configuration(ConfigError::NoCandidates(
                            self.service.clone(),
                        )),
                    });
                }
            };
        }
    }

    /// Best-ranked candidate not yet tried in this call.
    fn select(&self, tried: &[bool]) -> Option<usize> {
        let remaining: Vec<HostKey> = self
            .candidates
            .iter()
            .zip(tried)
            .filter(|(_, was_tried)| !**was_tried)
            .map(|(candidate, _)| candidate.key().clone())
            .collect();
        let chosen = self.registry.rank(&remaining).into_iter().next()?;
        tracing::debug!(host = %chosen, remaining = remaining.len(), "Selected candidate");
        self.candidates.iter().position(|c| c.key() == &chosen)
    }

    async fn attempt(
        &self,
        candidate: &CandidateUri,
        request: &RequestSpec,
        attempt: usize,
    ) -> Result<Response<T::Body>, ConnectionFailure> {
        let key = candidate.key();
        let callback = HostEventCallback::new(Arc::clone(&self.sink), key.clone());
        self.registry.note_attempt(key);

        let started = Instant::now();
        let outcome = self
            .transport
            .send(candidate, request)
            .instrument(spans::attempt_span(attempt, key))
            .await;
        let elapsed = started.elapsed();

        match outcome {
            Ok(response) => {
                let status = response.status().as_u16();
                callback.record(status, as_micros(elapsed));
                metrics::record_attempt(key, status, elapsed);
                tracing::debug!(host = %key, status, latency = ?elapsed, "Response received");
                Ok(response)
            }
            Err(e) => {
                callback.record_io_exception();
                metrics::record_io_failure(key, e.kind);
                tracing::warn!(
                    host = %key,
                    attempt,
                    kind = %e.kind,
                    error = %e.source,
                    "Attempt failed"
                );
                Err(ConnectionFailure {
                    host: key.clone(),
                    kind: e.kind,
                    source: e.source,
                })
            }
        }
    }
}

impl FailoverTarget<HttpTransport> {
    /// Build trust material, transport and target from one configuration.
    pub fn connect(
        config: &FailoverConfig,
        registry: Arc<HostMetricsRegistry>,
    ) -> Result<Self, FailoverError> {
        let trust = TrustContext::from_security_config(&config.security).map_err(ConfigError::from)?;
        let transport = HttpTransport::new(&trust, &config.timeouts, &config.service.user_agent)?;
        Ok(Self::from_config(config, registry, transport)?)
    }
}

fn as_micros(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX)
}
