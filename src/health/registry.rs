//! Host metrics registry.
//!
//! # Responsibilities
//! - Aggregate host events into rolling per-host health
//! - Rank candidate hosts for the next attempt
//! - Bound the number of tracked hosts
//!
//! # Design Decisions
//! - One record per host, each behind its own mutex; no registry-wide lock
//! - Records are created lazily on the first event for a host
//! - `rank` reads each host under its own short critical section, so a
//!   snapshot is coherent per host and eventually consistent across hosts

use dashmap::DashMap;
use serde::Serialize;
use std::cmp::Ordering as CmpOrdering;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant, SystemTime};

use crate::config::HealthConfig;
use crate::health::key::{HostEvent, HostKey};
use crate::health::passive::HostEventsSink;
use crate::health::state::{HealthWindow, HostHealth, HostState, StatusCounts};

#[derive(Debug)]
struct HostRecord {
    state: Mutex<HostState>,
}

impl HostRecord {
    fn lock(&self) -> MutexGuard<'_, HostState> {
        // A poisoned record still holds valid counters.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Snapshot of everything the registry knows about one host.
#[derive(Debug, Clone, Serialize)]
pub struct HostMetricsSnapshot {
    pub key: HostKey,
    pub health: HostHealth,
    pub counts: StatusCounts,
    pub last_update: SystemTime,
}

/// Ranking inputs for one candidate.
struct RankEntry {
    key: HostKey,
    health: Option<HostHealth>,
    last_attempt: u64,
}

impl RankEntry {
    fn compare(&self, other: &Self) -> CmpOrdering {
        let health = match (&self.health, &other.health) {
            (None, Some(_)) => CmpOrdering::Less,
            (Some(_), None) => CmpOrdering::Greater,
            (Some(a), Some(b)) => a
                .consecutive_failures
                .cmp(&b.consecutive_failures)
                .then_with(|| compare_failure_rate(a, b)),
            (None, None) => CmpOrdering::Equal,
        };
        health.then_with(|| self.last_attempt.cmp(&other.last_attempt))
    }
}

/// Compares `failures / total` exactly. An empty window has rate zero.
fn compare_failure_rate(a: &HostHealth, b: &HostHealth) -> CmpOrdering {
    let (fa, ta) = (a.recent_failure_count as u128, a.recent_total() as u128);
    let (fb, tb) = (b.recent_failure_count as u128, b.recent_total() as u128);
    match (ta, tb) {
        (0, 0) => CmpOrdering::Equal,
        (0, _) => 0.cmp(&fb),
        (_, 0) => fa.cmp(&0),
        _ => (fa * tb).cmp(&(fb * ta)),
    }
}

/// Re-inserts tried when concurrent inserts keep evicting a host's record.
const EVICTION_RETRIES: usize = 3;

/// Registry of per-host health, shared by every call of every client.
#[derive(Debug)]
pub struct HostMetricsRegistry {
    hosts: DashMap<HostKey, Arc<HostRecord>>,
    /// Process-wide attempt sequence per host, for round-robin tie-breaks.
    attempts: DashMap<HostKey, u64>,
    attempt_seq: AtomicU64,
    config: HealthConfig,
    origin: Instant,
}

impl HostMetricsRegistry {
    pub fn new(config: HealthConfig) -> Self {
        Self {
            hosts: DashMap::with_capacity(64),
            attempts: DashMap::with_capacity(64),
            attempt_seq: AtomicU64::new(0),
            config,
            origin: Instant::now(),
        }
    }

    /// Record one completed attempt against `key`.
    pub fn update(&self, event: HostEvent, key: &HostKey) {
        self.update_at(event, key, Instant::now());
    }

    pub(crate) fn update_at(&self, event: HostEvent, key: &HostKey, now: Instant) {
        let record = self.record_for(key, now);
        self.apply_to(record, event, key, now);
    }

    /// Apply `event` to `record`, moving it to the live record when a
    /// concurrent insert evicted `record` in the meantime.
    fn apply_to(&self, mut record: Arc<HostRecord>, event: HostEvent, key: &HostKey, now: Instant) {
        for _ in 0..EVICTION_RETRIES {
            record.lock().apply(event, now);
            let live = self
                .hosts
                .get(key)
                .is_some_and(|current| Arc::ptr_eq(current.value(), &record));
            if live {
                return;
            }
            tracing::debug!(host = %key, "Host record evicted during update, retrying");
            record = self.record_for(key, now);
        }
        tracing::debug!(host = %key, "Host event lost to repeated eviction");
    }

    fn record_for(&self, key: &HostKey, now: Instant) -> Arc<HostRecord> {
        if let Some(record) = self.hosts.get(key) {
            return Arc::clone(record.value());
        }

        let mut inserted = false;
        let record = Arc::clone(
            self.hosts
                .entry(key.clone())
                .or_insert_with(|| {
                    inserted = true;
                    Arc::new(HostRecord {
                        state: Mutex::new(HostState::new(self.new_window(), now)),
                    })
                })
                .value(),
        );

        // The entry guard is released above; iterating while holding it
        // would deadlock on its shard.
        if inserted {
            tracing::debug!(host = %key, tracked = self.hosts.len(), "Tracking new host");
            self.enforce_bounds(key, now);
        }
        record
    }

    fn new_window(&self) -> HealthWindow {
        HealthWindow::new(
            Duration::from_secs(self.config.window_secs),
            self.config.buckets,
            self.origin,
        )
    }

    fn enforce_bounds(&self, just_inserted: &HostKey, now: Instant) {
        let idle = Duration::from_secs(self.config.idle_expiry_secs);
        let expired: Vec<HostKey> = self
            .hosts
            .iter()
            .filter(|entry| entry.key() != just_inserted)
            .filter(|entry| now.saturating_duration_since(entry.value().lock().last_update()) >= idle)
            .map(|entry| entry.key().clone())
            .collect();
        for key in expired {
            tracing::debug!(host = %key, "Expiring idle host record");
            self.forget(&key);
        }

        while self.hosts.len() > self.config.max_hosts.max(1) {
            let oldest = self
                .hosts
                .iter()
                .filter(|entry| entry.key() != just_inserted)
                .map(|entry| (entry.key().clone(), entry.value().lock().last_update()))
                .min_by_key(|(_, last_update)| *last_update)
                .map(|(key, _)| key);
            match oldest {
                Some(key) => {
                    tracing::debug!(host = %key, "Evicting least recently updated host record");
                    self.forget(&key);
                }
                None => break,
            }
        }
    }

    fn forget(&self, key: &HostKey) {
        self.hosts.remove(key);
        self.attempts.remove(key);
    }

    /// Note that an attempt against `key` is starting. Feeds the
    /// least-recently-tried tie-break; does not create a health record.
    pub fn note_attempt(&self, key: &HostKey) {
        let seq = self.attempt_seq.fetch_add(1, Ordering::Relaxed) + 1;
        self.attempts.insert(key.clone(), seq);

        // Cancelled attempts against hosts that never produced an event
        // would otherwise accumulate here.
        let limit = self.config.max_hosts.max(1).saturating_mul(2);
        if self.attempts.len() > limit {
            self.attempts
                .retain(|k, _| k == key || self.hosts.contains_key(k));
        }
    }

    /// Order `candidates` from most to least preferred.
    ///
    /// Duplicates are dropped (first occurrence wins); every distinct
    /// candidate appears exactly once and nothing else is returned.
    pub fn rank(&self, candidates: &[HostKey]) -> Vec<HostKey> {
        self.rank_at(candidates, Instant::now())
    }

    pub(crate) fn rank_at(&self, candidates: &[HostKey], now: Instant) -> Vec<HostKey> {
        let mut seen = HashSet::with_capacity(candidates.len());
        let mut entries: Vec<RankEntry> = candidates
            .iter()
            .filter(|key| seen.insert(*key))
            .map(|key| RankEntry {
                key: key.clone(),
                health: self.hosts.get(key).map(|r| r.value().lock().health(now)),
                last_attempt: self.attempts.get(key).map(|seq| *seq).unwrap_or(0),
            })
            .collect();

        // Stable: equal entries keep discovery order.
        entries.sort_by(RankEntry::compare);
        entries.into_iter().map(|entry| entry.key).collect()
    }

    /// Current health of one host, if it has ever produced an event.
    pub fn health(&self, key: &HostKey) -> Option<HostHealth> {
        let now = Instant::now();
        self.hosts.get(key).map(|r| r.value().lock().health(now))
    }

    /// Snapshots of every tracked host, sorted by key.
    pub fn metrics(&self) -> Vec<HostMetricsSnapshot> {
        let now = Instant::now();
        let mut snapshots: Vec<_> = self
            .hosts
            .iter()
            .map(|entry| {
                let state = entry.value().lock();
                HostMetricsSnapshot {
                    key: entry.key().clone(),
                    health: state.health(now),
                    counts: state.counts(),
                    last_update: state.last_update_wall(),
                }
            })
            .collect();
        snapshots.sort_by(|a, b| a.key.cmp(&b.key));
        snapshots
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }
}

impl Default for HostMetricsRegistry {
    fn default() -> Self {
        Self::new(HealthConfig::default())
    }
}

impl HostEventsSink for HostMetricsRegistry {
    fn record(&self, key: &HostKey, status_code: u16, latency_micros: u64) {
        self.update(
            HostEvent::Success {
                status_code,
                latency_micros,
            },
            key,
        );
    }

    fn record_io_exception(&self, key: &HostKey) {
        self.update(HostEvent::IoFailure, key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn key(host: &str) -> HostKey {
        HostKey::new("svc", host, 443)
    }

    fn ok(status_code: u16) -> HostEvent {
        HostEvent::Success {
            status_code,
            latency_micros: 1_000,
        }
    }

    #[test]
    fn unknown_hosts_rank_first_in_discovery_order() {
        let registry = HostMetricsRegistry::default();
        registry.update(ok(200), &key("a"));

        let ranked = registry.rank(&[key("a"), key("b"), key("c")]);
        assert_eq!(ranked, vec![key("b"), key("c"), key("a")]);
    }

    #[test]
    fn consecutive_failures_then_failure_rate() {
        let registry = HostMetricsRegistry::default();
        // a: one failure followed by a success -> consecutive 0, rate 1/2
        registry.update(HostEvent::IoFailure, &key("a"));
        registry.update(ok(200), &key("a"));
        // b: clean
        registry.update(ok(200), &key("b"));
        // c: two failures in a row
        registry.update(HostEvent::IoFailure, &key("c"));
        registry.update(HostEvent::IoFailure, &key("c"));
        // d: one failure
        registry.update(HostEvent::IoFailure, &key("d"));

        let ranked = registry.rank(&[key("c"), key("d"), key("a"), key("b")]);
        assert_eq!(ranked, vec![key("b"), key("a"), key("d"), key("c")]);
    }

    #[test]
    fn server_errors_count_as_healthy() {
        let registry = HostMetricsRegistry::default();
        registry.update(ok(500), &key("a"));
        registry.update(HostEvent::IoFailure, &key("b"));

        assert_eq!(registry.rank(&[key("b"), key("a")]), vec![key("a"), key("b")]);
        let health = registry.health(&key("a")).unwrap();
        assert_eq!(health.recent_success_count, 1);
        assert_eq!(health.consecutive_failures, 0);
    }

    #[test]
    fn least_recently_attempted_breaks_ties() {
        let registry = HostMetricsRegistry::default();
        for host in ["a", "b", "c"] {
            registry.update(ok(200), &key(host));
        }
        registry.note_attempt(&key("a"));
        registry.note_attempt(&key("c"));

        assert_eq!(
            registry.rank(&[key("a"), key("b"), key("c")]),
            vec![key("b"), key("a"), key("c")]
        );
    }

    #[test]
    fn note_attempt_does_not_create_records() {
        let registry = HostMetricsRegistry::default();
        registry.note_attempt(&key("a"));
        assert!(registry.is_empty());
        assert!(registry.health(&key("a")).is_none());
    }

    #[test]
    fn stale_failures_stop_penalizing() {
        let registry = HostMetricsRegistry::default();
        let t0 = Instant::now();
        registry.update_at(HostEvent::IoFailure, &key("a"), t0);
        registry.update_at(ok(200), &key("b"), t0);

        assert_eq!(
            registry.rank_at(&[key("a"), key("b")], t0 + Duration::from_secs(1)),
            vec![key("b"), key("a")]
        );
        // Both windows are empty now; discovery order decides.
        assert_eq!(
            registry.rank_at(&[key("a"), key("b")], t0 + Duration::from_secs(120)),
            vec![key("a"), key("b")]
        );
    }

    #[test]
    fn duplicates_are_collapsed() {
        let registry = HostMetricsRegistry::default();
        let ranked = registry.rank(&[key("a"), key("b"), key("a")]);
        assert_eq!(ranked, vec![key("a"), key("b")]);
    }

    #[test]
    fn evicts_least_recently_updated_beyond_capacity() {
        let registry = HostMetricsRegistry::new(HealthConfig {
            max_hosts: 2,
            ..HealthConfig::default()
        });
        let t0 = Instant::now();
        registry.update_at(ok(200), &key("a"), t0);
        registry.update_at(ok(200), &key("b"), t0 + Duration::from_secs(1));
        registry.update_at(ok(200), &key("a"), t0 + Duration::from_secs(2));
        registry.update_at(ok(200), &key("c"), t0 + Duration::from_secs(3));

        assert_eq!(registry.len(), 2);
        assert!(registry.health(&key("b")).is_none());
        assert!(registry.health(&key("a")).is_some());
        assert!(registry.health(&key("c")).is_some());
    }

    #[test]
    fn update_lands_on_live_record_after_racing_eviction() {
        let registry = HostMetricsRegistry::default();
        let now = Instant::now();

        // Evicted between lookup and apply.
        let stale = registry.record_for(&key("a"), now);
        registry.forget(&key("a"));
        registry.apply_to(stale, HostEvent::IoFailure, &key("a"), now);
        assert_eq!(registry.health(&key("a")).unwrap().recent_failure_count, 1);

        // Evicted and already re-created by another update.
        let stale = registry.record_for(&key("b"), now);
        registry.forget(&key("b"));
        registry.update_at(ok(200), &key("b"), now);
        registry.apply_to(stale, HostEvent::IoFailure, &key("b"), now);
        let health = registry.health(&key("b")).unwrap();
        assert_eq!(health.recent_success_count, 1);
        assert_eq!(health.recent_failure_count, 1);
    }

    #[test]
    fn expires_idle_records_on_insert() {
        let registry = HostMetricsRegistry::new(HealthConfig {
            idle_expiry_secs: 10,
            ..HealthConfig::default()
        });
        let t0 = Instant::now();
        registry.update_at(ok(200), &key("a"), t0);
        registry.update_at(ok(200), &key("b"), t0 + Duration::from_secs(11));

        let tracked: Vec<_> = registry.metrics().into_iter().map(|m| m.key).collect();
        assert_eq!(tracked, vec![key("b")]);
    }

    #[test]
    fn metrics_snapshot_counts_by_class() {
        let registry = HostMetricsRegistry::default();
        registry.record(&key("a"), 204, 10);
        registry.record(&key("a"), 404, 10);
        registry.record(&key("a"), 503, 10);
        registry.record_io_exception(&key("a"));

        let snapshot = registry.metrics().pop().unwrap();
        assert_eq!(snapshot.counts.successful, 1);
        assert_eq!(snapshot.counts.client_error, 1);
        assert_eq!(snapshot.counts.server_error, 1);
        assert_eq!(snapshot.counts.io_exceptions, 1);
        assert_eq!(snapshot.counts.total(), 4);
    }

    fn arb_events() -> impl Strategy<Value = Vec<(usize, bool)>> {
        prop::collection::vec((0usize..6, any::<bool>()), 0..64)
    }

    proptest! {
        #[test]
        fn rank_is_a_permutation_of_distinct_candidates(
            events in arb_events(),
            picks in prop::collection::vec(0usize..6, 0..10),
        ) {
            let registry = HostMetricsRegistry::default();
            let hosts: Vec<HostKey> = (0..6).map(|i| key(&format!("h{i}"))).collect();
            for (i, failed) in events {
                let event = if failed { HostEvent::IoFailure } else { ok(200) };
                registry.update(event, &hosts[i]);
            }

            let candidates: Vec<HostKey> = picks.iter().map(|&i| hosts[i].clone()).collect();
            let ranked = registry.rank(&candidates);

            let distinct: HashSet<_> = candidates.iter().cloned().collect();
            let returned: HashSet<_> = ranked.iter().cloned().collect();
            prop_assert_eq!(ranked.len(), distinct.len());
            prop_assert_eq!(returned, distinct);
        }

        #[test]
        fn failure_free_hosts_rank_above_failing_hosts(
            events in arb_events(),
        ) {
            let registry = HostMetricsRegistry::default();
            let hosts: Vec<HostKey> = (0..6).map(|i| key(&format!("h{i}"))).collect();
            for (i, failed) in events {
                let event = if failed { HostEvent::IoFailure } else { ok(200) };
                registry.update(event, &hosts[i]);
            }

            let ranked = registry.rank(&hosts);
            let failing = |k: &HostKey| registry
                .health(k)
                .is_some_and(|h| h.recent_failure_count > 0);
            if let Some(first_failing) = ranked.iter().position(failing) {
                prop_assert!(ranked[first_failing..].iter().all(failing));
            }
        }
    }
}
