//! Spans for logical calls and attempts.
//!
//! A call span carries the call id; each attempt gets a child span with
//! the host and attempt number. Attempt futures are instrumented, so the
//! span is re-entered on whichever worker polls them.

use tracing::Span;

use crate::health::HostKey;

pub fn call_span(service: &str, call_id: &str, method: &str, path: &str) -> Span {
    tracing::info_span!(
        "failover_call",
        service = %service,
        call_id = %call_id,
        method = %method,
        path = %path,
    )
}

pub fn attempt_span(attempt: usize, host: &HostKey) -> Span {
    tracing::debug_span!(
        "attempt",
        attempt,
        host = %host.hostname(),
        port = host.port(),
    )
}
