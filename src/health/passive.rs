//! Passive health checking: recording live request outcomes.
//!
//! # Responsibilities
//! - Accept raw outcomes (status + latency, or I/O failure) per host
//! - Bind a cheap per-attempt callback to one host identity
//! - Decouple slow event consumers from the request path
//!
//! # Design Decisions
//! - Recording never fails and never blocks the caller
//! - Only connection-level errors are failures; every status code is a
//!   successful exchange
//! - Under sustained overload the oldest buffered events are dropped

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;

use crate::health::key::{HostEvent, HostKey};
use crate::observability::metrics;

/// Write-side collector of host outcomes.
pub trait HostEventsSink: Send + Sync {
    /// A completed HTTP exchange, whatever its status code.
    fn record(&self, key: &HostKey, status_code: u16, latency_micros: u64);

    /// A connection-level failure; no status code is available.
    fn record_io_exception(&self, key: &HostKey);

    fn record_event(&self, key: &HostKey, event: HostEvent) {
        match event {
            HostEvent::Success {
                status_code,
                latency_micros,
            } => self.record(key, status_code, latency_micros),
            HostEvent::IoFailure => self.record_io_exception(key),
        }
    }
}

/// Event recorder bound to a single host.
#[derive(Clone)]
pub struct HostEventCallback {
    key: HostKey,
    sink: Arc<dyn HostEventsSink>,
}

impl HostEventCallback {
    pub fn new(sink: Arc<dyn HostEventsSink>, key: HostKey) -> Self {
        Self { key, sink }
    }

    pub fn key(&self) -> &HostKey {
        &self.key
    }

    pub fn record(&self, status_code: u16, latency_micros: u64) {
        self.sink.record(&self.key, status_code, latency_micros);
    }

    pub fn record_io_exception(&self) {
        self.sink.record_io_exception(&self.key);
    }
}

impl std::fmt::Debug for HostEventCallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostEventCallback")
            .field("key", &self.key)
            .finish()
    }
}

/// Delivers every event to each of its sinks, in order.
#[derive(Clone, Default)]
pub struct FanOutSink {
    sinks: Vec<Arc<dyn HostEventsSink>>,
}

impl FanOutSink {
    pub fn new(sinks: Vec<Arc<dyn HostEventsSink>>) -> Self {
        Self { sinks }
    }

    pub fn push(&mut self, sink: Arc<dyn HostEventsSink>) {
        self.sinks.push(sink);
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl HostEventsSink for FanOutSink {
    fn record(&self, key: &HostKey, status_code: u16, latency_micros: u64) {
        for sink in &self.sinks {
            sink.record(key, status_code, latency_micros);
        }
    }

    fn record_io_exception(&self, key: &HostKey) {
        for sink in &self.sinks {
            sink.record_io_exception(key);
        }
    }
}

/// Bounded, drop-oldest queue in front of a possibly slow sink.
///
/// Events are handed to the inner sink by a background task. Recording
/// only takes a short lock on the queue.
pub struct BufferedSink {
    queue: Mutex<VecDeque<(HostKey, HostEvent)>>,
    capacity: usize,
    notify: Notify,
    dropped: AtomicU64,
    drain_task: Mutex<Option<JoinHandle<()>>>,
}

impl BufferedSink {
    /// Create the buffer and spawn its drain task on the current runtime.
    ///
    /// The task exits after a final drain when `shutdown` fires; await
    /// [`BufferedSink::join`] to know that drain has finished.
    pub fn spawn(
        inner: Arc<dyn HostEventsSink>,
        capacity: usize,
        shutdown: broadcast::Receiver<()>,
    ) -> Arc<Self> {
        let sink = Arc::new(Self::unstarted(capacity));
        let handle = tokio::spawn(Arc::clone(&sink).drain_loop(inner, shutdown));
        *sink
            .drain_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);
        sink
    }

    /// Wait for the drain task to deliver what is left and exit.
    ///
    /// Only returns once shutdown has fired. Later calls return at once.
    pub async fn join(&self) {
        let handle = self
            .drain_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Host event drain task failed");
            }
        }
    }

    fn unstarted(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
            drain_task: Mutex::new(None),
        }
    }

    /// Number of events discarded because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Number of events waiting for delivery.
    pub fn pending(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<(HostKey, HostEvent)>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push(&self, key: &HostKey, event: HostEvent) {
        let overflowed = {
            let mut queue = self.lock();
            let overflowed = if queue.len() >= self.capacity {
                queue.pop_front();
                true
            } else {
                false
            };
            queue.push_back((key.clone(), event));
            overflowed
        };
        if overflowed {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            metrics::record_dropped_event();
        }
        self.notify.notify_one();
    }

    fn take_batch(&self) -> Vec<(HostKey, HostEvent)> {
        self.lock().drain(..).collect()
    }

    async fn drain_loop(
        self: Arc<Self>,
        inner: Arc<dyn HostEventsSink>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                _ = self.notify.notified() => {
                    for (key, event) in self.take_batch() {
                        inner.record_event(&key, event);
                    }
                }
                _ = shutdown.recv() => {
                    for (key, event) in self.take_batch() {
                        inner.record_event(&key, event);
                    }
                    tracing::debug!(dropped = self.dropped(), "Host event buffer stopped");
                    break;
                }
            }
        }
    }
}

impl HostEventsSink for BufferedSink {
    fn record(&self, key: &HostKey, status_code: u16, latency_micros: u64) {
        self.push(
            key,
            HostEvent::Success {
                status_code,
                latency_micros,
            },
        );
    }

    fn record_io_exception(&self, key: &HostKey) {
        self.push(key, HostEvent::IoFailure);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::time::Duration;

    /// Sink that remembers every event it was given.
    #[derive(Default)]
    pub(crate) struct RecordingSink {
        events: Mutex<Vec<(HostKey, HostEvent)>>,
    }

    impl RecordingSink {
        pub(crate) fn events(&self) -> Vec<(HostKey, HostEvent)> {
            self.events.lock().unwrap().clone()
        }
    }

    impl HostEventsSink for RecordingSink {
        fn record(&self, key: &HostKey, status_code: u16, latency_micros: u64) {
            self.events.lock().unwrap().push((
                key.clone(),
                HostEvent::Success {
                    status_code,
                    latency_micros,
                },
            ));
        }

        fn record_io_exception(&self, key: &HostKey) {
            self.events
                .lock()
                .unwrap()
                .push((key.clone(), HostEvent::IoFailure));
        }
    }

    fn key(host: &str) -> HostKey {
        HostKey::new("svc", host, 443)
    }

    #[test]
    fn callback_is_bound_to_its_host() {
        let recorder = Arc::new(RecordingSink::default());
        let callback = HostEventCallback::new(recorder.clone(), key("a"));
        callback.record(200, 42);
        callback.record_io_exception();

        assert_eq!(
            recorder.events(),
            vec![
                (
                    key("a"),
                    HostEvent::Success {
                        status_code: 200,
                        latency_micros: 42
                    }
                ),
                (key("a"), HostEvent::IoFailure),
            ]
        );
    }

    #[test]
    fn fan_out_reaches_every_sink() {
        let first = Arc::new(RecordingSink::default());
        let second = Arc::new(RecordingSink::default());
        let fan_out = FanOutSink::new(vec![first.clone() as Arc<dyn HostEventsSink>, second.clone()]);
        fan_out.record_io_exception(&key("a"));

        assert_eq!(first.events().len(), 1);
        assert_eq!(second.events().len(), 1);
    }

    #[test]
    fn full_buffer_drops_oldest() {
        let buffer = BufferedSink::unstarted(2);
        buffer.record(&key("a"), 200, 1);
        buffer.record(&key("b"), 200, 1);
        buffer.record_io_exception(&key("c"));

        assert_eq!(buffer.dropped(), 1);
        let hosts: Vec<_> = buffer
            .take_batch()
            .into_iter()
            .map(|(k, _)| k.hostname().to_string())
            .collect();
        assert_eq!(hosts, vec!["b", "c"]);
    }

    #[tokio::test]
    async fn drains_to_inner_sink() {
        let recorder = Arc::new(RecordingSink::default());
        let (tx, rx) = broadcast::channel(1);
        let buffer = BufferedSink::spawn(recorder.clone(), 16, rx);

        buffer.record(&key("a"), 503, 7);
        buffer.record_io_exception(&key("b"));

        for _ in 0..50 {
            if recorder.events().len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(recorder.events().len(), 2);
        assert_eq!(buffer.pending(), 0);
        let _ = tx.send(());
    }

    /// Sink that takes a while per event.
    #[derive(Default)]
    struct SlowSink {
        inner: RecordingSink,
    }

    impl HostEventsSink for SlowSink {
        fn record(&self, key: &HostKey, status_code: u16, latency_micros: u64) {
            std::thread::sleep(Duration::from_millis(5));
            self.inner.record(key, status_code, latency_micros);
        }

        fn record_io_exception(&self, key: &HostKey) {
            std::thread::sleep(Duration::from_millis(5));
            self.inner.record_io_exception(key);
        }
    }

    #[tokio::test]
    async fn join_waits_for_final_drain() {
        let slow = Arc::new(SlowSink::default());
        let shutdown = crate::lifecycle::Shutdown::new();
        let buffer = BufferedSink::spawn(slow.clone(), 64, shutdown.subscribe());

        for i in 0..10 {
            buffer.record(&key(&format!("h{i}")), 200, 1);
        }
        shutdown.trigger();
        buffer.join().await;

        assert_eq!(slow.inner.events().len(), 10);
        assert_eq!(buffer.pending(), 0);
        // A second join has nothing left to wait for.
        buffer.join().await;
    }

    #[tokio::test]
    async fn shutdown_flushes_pending_events() {
        let recorder = Arc::new(RecordingSink::default());
        let (tx, rx) = broadcast::channel(1);
        let buffer = Arc::new(BufferedSink::unstarted(16));
        buffer.record(&key("a"), 200, 1);

        // Shutdown wins the race against the first notification only
        // sometimes; either way every event must be delivered.
        let _ = tx.send(());
        Arc::clone(&buffer).drain_loop(recorder.clone(), rx).await;
        assert_eq!(recorder.events().len(), 1);
    }
}
