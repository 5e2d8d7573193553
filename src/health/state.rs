//! Per-host health state.
//!
//! # Decay Policy
//! ```text
//! |<------------------ window ------------------>|
//! | b0 | b1 | b2 | b3 | b4 | b5 |   (buckets = 6)
//!                          ^ current epoch = elapsed / (window / buckets)
//! ```
//! Events land in the bucket of the current epoch. A bucket whose epoch has
//! fallen out of the window is ignored by reads and reset on the next write,
//! so recent counts are bounded by one window of traffic and only shrink as
//! time passes.
//!
//! Consecutive failures are reset by any success and are treated as zero
//! once the last failure is older than the window, which lets a host that
//! stopped receiving traffic recover.

use serde::Serialize;
use std::time::{Duration, Instant, SystemTime};

use crate::health::key::{HostEvent, StatusClass};

#[derive(Debug, Clone, Copy, Default)]
struct Bucket {
    epoch: u64,
    successes: u64,
    failures: u64,
    latency_sum_micros: u64,
    latency_max_micros: u64,
}

/// Ring of time buckets covering one sliding window.
#[derive(Debug, Clone)]
pub(crate) struct HealthWindow {
    buckets: Box<[Bucket]>,
    bucket_len: Duration,
    origin: Instant,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct WindowTotals {
    pub successes: u64,
    pub failures: u64,
    pub latency_sum_micros: u64,
    pub latency_max_micros: u64,
}

impl HealthWindow {
    pub fn new(window: Duration, buckets: u32, origin: Instant) -> Self {
        let buckets = buckets.max(1);
        let bucket_len = (window / buckets).max(Duration::from_millis(1));
        Self {
            // Epoch 0 is a real epoch, so empty buckets are tagged with a
            // sentinel that never matches.
            buckets: vec![
                Bucket {
                    epoch: u64::MAX,
                    ..Bucket::default()
                };
                buckets as usize
            ]
            .into_boxed_slice(),
            bucket_len,
            origin,
        }
    }

    pub fn window(&self) -> Duration {
        self.bucket_len * self.buckets.len() as u32
    }

    fn epoch(&self, now: Instant) -> u64 {
        let elapsed = now.saturating_duration_since(self.origin);
        (elapsed.as_nanos() / self.bucket_len.as_nanos()) as u64
    }

    fn current(&mut self, now: Instant) -> &mut Bucket {
        let epoch = self.epoch(now);
        let slot = (epoch % self.buckets.len() as u64) as usize;
        let bucket = &mut self.buckets[slot];
        if bucket.epoch != epoch {
            *bucket = Bucket {
                epoch,
                ..Bucket::default()
            };
        }
        bucket
    }

    pub fn record_success(&mut self, now: Instant, latency_micros: u64) {
        let bucket = self.current(now);
        bucket.successes += 1;
        bucket.latency_sum_micros = bucket.latency_sum_micros.saturating_add(latency_micros);
        bucket.latency_max_micros = bucket.latency_max_micros.max(latency_micros);
    }

    pub fn record_failure(&mut self, now: Instant) {
        self.current(now).failures += 1;
    }

    pub fn totals(&self, now: Instant) -> WindowTotals {
        let epoch = self.epoch(now);
        let span = self.buckets.len() as u64;
        self.buckets
            .iter()
            .filter(|b| b.epoch != u64::MAX && b.epoch <= epoch && epoch - b.epoch < span)
            .fold(WindowTotals::default(), |mut acc, b| {
                acc.successes += b.successes;
                acc.failures += b.failures;
                acc.latency_sum_micros = acc.latency_sum_micros.saturating_add(b.latency_sum_micros);
                acc.latency_max_micros = acc.latency_max_micros.max(b.latency_max_micros);
                acc
            })
    }
}

/// Cumulative outcome counters since the host was first seen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub informational: u64,
    pub successful: u64,
    pub redirection: u64,
    pub client_error: u64,
    pub server_error: u64,
    pub other: u64,
    pub io_exceptions: u64,
}

impl StatusCounts {
    fn bump(&mut self, class: StatusClass) {
        match class {
            StatusClass::Informational => self.informational += 1,
            StatusClass::Successful => self.successful += 1,
            StatusClass::Redirection => self.redirection += 1,
            StatusClass::ClientError => self.client_error += 1,
            StatusClass::ServerError => self.server_error += 1,
            StatusClass::Other => self.other += 1,
        }
    }

    /// Every completed exchange, successful or not.
    pub fn total(&self) -> u64 {
        self.informational
            + self.successful
            + self.redirection
            + self.client_error
            + self.server_error
            + self.other
            + self.io_exceptions
    }
}

/// Point-in-time health of one host, as seen by the ranking.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HostHealth {
    pub recent_failure_count: u64,
    pub recent_success_count: u64,
    pub consecutive_failures: u32,
    #[serde(skip)]
    pub last_failure: Option<Instant>,
    pub mean_latency_micros: Option<u64>,
    pub max_latency_micros: u64,
}

impl HostHealth {
    pub fn recent_total(&self) -> u64 {
        self.recent_failure_count + self.recent_success_count
    }
}

/// Mutable record behind one registry entry.
#[derive(Debug)]
pub(crate) struct HostState {
    window: HealthWindow,
    consecutive_failures: u32,
    last_failure: Option<Instant>,
    last_update: Instant,
    last_update_wall: SystemTime,
    counts: StatusCounts,
}

impl HostState {
    pub fn new(window: HealthWindow, now: Instant) -> Self {
        Self {
            window,
            consecutive_failures: 0,
            last_failure: None,
            last_update: now,
            last_update_wall: SystemTime::now(),
            counts: StatusCounts::default(),
        }
    }

    pub fn apply(&mut self, event: HostEvent, now: Instant) {
        match event {
            HostEvent::Success {
                status_code,
                latency_micros,
            } => {
                self.window.record_success(now, latency_micros);
                self.consecutive_failures = 0;
                self.counts.bump(StatusClass::of(status_code));
            }
            HostEvent::IoFailure => {
                self.window.record_failure(now);
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                self.last_failure = Some(now);
                self.counts.io_exceptions += 1;
            }
        }
        self.last_update = now;
        self.last_update_wall = SystemTime::now();
    }

    pub fn health(&self, now: Instant) -> HostHealth {
        let totals = self.window.totals(now);
        let failure_is_recent = self
            .last_failure
            .is_some_and(|at| now.saturating_duration_since(at) < self.window.window());
        HostHealth {
            recent_failure_count: totals.failures,
            recent_success_count: totals.successes,
            consecutive_failures: if failure_is_recent {
                self.consecutive_failures
            } else {
                0
            },
            last_failure: self.last_failure,
            mean_latency_micros: (totals.successes > 0)
                .then(|| totals.latency_sum_micros / totals.successes),
            max_latency_micros: totals.latency_max_micros,
        }
    }

    pub fn counts(&self) -> StatusCounts {
        self.counts
    }

    pub fn last_update(&self) -> Instant {
        self.last_update
    }

    pub fn last_update_wall(&self) -> SystemTime {
        self.last_update_wall
    }
}
