//! Usage & Quota Tracker — a sharded, atomic counter store with at-most-N
//! `reserve` semantics under concurrent load.
//!
//! Counters are keyed by `(tenant_id, usage_kind, calendar_day)` and reset on
//! the UTC day boundary. `reserve` is the hardest operation in this crate: for N
//! concurrent callers against a limit of L, at most L may succeed and the final
//! counter must equal exactly L. This is implemented with a compare-and-swap
//! loop over a packed atomic rather than a coarse lock, so readers never block.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use crate::error::QuotaError;

/// Independent usage dimensions; each kind has its own counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum UsageKind {
    Chat,
    Action,
    Execution,
    Advisory,
}

/// Derived status band, folded into `snapshot`. Not an error variant —
/// `QuotaExceeded` remains the hard error; `Warning` is additive information
/// surfaced at 80% utilization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum QuotaStatus {
    Ok,
    Warning,
    Exceeded,
    Unlimited,
}

const WARNING_THRESHOLD: f64 = 0.8;

/// Value-type snapshot of a counter. No reference to tracker-owned state escapes;
/// every read returns one of these by value.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub tenant_id: String,
    pub kind: UsageKind,
    pub day: NaiveDate,
    pub request_count: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub limit: Option<u64>,
    pub status: QuotaStatus,
}

#[derive(Default)]
struct Counter {
    request_count: AtomicU64,
    input_tokens: AtomicU64,
    output_tokens: AtomicU64,
    /// `u64::MAX` encodes "no limit set".
    limit: AtomicU64,
}

impl Counter {
    fn new() -> Self {
        Self {
            request_count: AtomicU64::new(0),
            input_tokens: AtomicU64::new(0),
            output_tokens: AtomicU64::new(0),
            limit: AtomicU64::new(u64::MAX),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Key {
    tenant_id: String,
    kind_tag: u8,
    day: NaiveDate,
}

fn kind_tag(kind: UsageKind) -> u8 {
    match kind {
        UsageKind::Chat => 0,
        UsageKind::Action => 1,
        UsageKind::Execution => 2,
        UsageKind::Advisory => 3,
    }
}

/// Sharded atomic counter store.
pub struct UsageTracker {
    counters: RwLock<HashMap<Key, Arc<Counter>>>,
}

impl UsageTracker {
    pub fn new() -> Self {
        Self {
            counters: RwLock::new(HashMap::new()),
        }
    }

    fn today() -> NaiveDate {
        Utc::now().date_naive()
    }

    fn key(tenant: &str, kind: UsageKind, day: NaiveDate) -> Key {
        Key {
            tenant_id: tenant.to_string(),
            kind_tag: kind_tag(kind),
            day,
        }
    }

    fn counter(&self, tenant: &str, kind: UsageKind, day: NaiveDate) -> Arc<Counter> {
        let key = Self::key(tenant, kind, day);
        if let Some(existing) = self.counters.read().get(&key) {
            return existing.clone();
        }
        let mut counters = self.counters.write();
        counters
            .entry(key)
            .or_insert_with(|| Arc::new(Counter::new()))
            .clone()
    }

    fn snapshot_of(&self, tenant: &str, kind: UsageKind, day: NaiveDate, c: &Counter) -> Snapshot {
        let request_count = c.request_count.load(Ordering::SeqCst);
        let input_tokens = c.input_tokens.load(Ordering::SeqCst);
        let output_tokens = c.output_tokens.load(Ordering::SeqCst);
        let raw_limit = c.limit.load(Ordering::SeqCst);
        let limit = if raw_limit == u64::MAX { None } else { Some(raw_limit) };
        let status = match limit {
            None => QuotaStatus::Unlimited,
            Some(l) if request_count >= l => QuotaStatus::Exceeded,
            Some(l) if l > 0 && (request_count as f64 / l as f64) >= WARNING_THRESHOLD => {
                QuotaStatus::Warning
            }
            Some(_) => QuotaStatus::Ok,
        };
        Snapshot {
            tenant_id: tenant.to_string(),
            kind,
            day,
            request_count,
            input_tokens,
            output_tokens,
            limit,
            status,
        }
    }

    /// Unconditional atomic add. Never read-modify-write through a lock: each
    /// field is its own atomic, so N concurrent callers never lose an update.
    pub fn increment(
        &self,
        tenant: &str,
        kind: UsageKind,
        delta_requests: u64,
        delta_input_tokens: u64,
        delta_output_tokens: u64,
    ) -> Snapshot {
        let day = Self::today();
        let counter = self.counter(tenant, kind, day);
        counter.request_count.fetch_add(delta_requests, Ordering::SeqCst);
        counter.input_tokens.fetch_add(delta_input_tokens, Ordering::SeqCst);
        counter.output_tokens.fetch_add(delta_output_tokens, Ordering::SeqCst);
        self.snapshot_of(tenant, kind, day, &counter)
    }

    pub fn snapshot(&self, tenant: &str, kind: UsageKind, day: NaiveDate) -> Snapshot {
        let counter = self.counter(tenant, kind, day);
        self.snapshot_of(tenant, kind, day, &counter)
    }

    pub fn set_quota(&self, tenant: &str, kind: UsageKind, limit: Option<u64>) {
        let day = Self::today();
        let counter = self.counter(tenant, kind, day);
        counter
            .limit
            .store(limit.unwrap_or(u64::MAX), Ordering::SeqCst);
    }

    pub fn get_quota(&self, tenant: &str, kind: UsageKind) -> Option<u64> {
        let day = Self::today();
        let counter = self.counter(tenant, kind, day);
        let raw = counter.limit.load(Ordering::SeqCst);
        if raw == u64::MAX {
            None
        } else {
            Some(raw)
        }
    }

    /// Check-and-increment the request count under one compare-and-swap loop.
    /// For N concurrent `reserve` calls against limit L, exactly `min(N, L)`
    /// succeed and the counter ends at exactly that value — no request is
    /// admitted beyond the limit, and none is silently dropped.
    pub fn reserve(
        &self,
        tenant: &str,
        kind: UsageKind,
        delta_input_tokens: u64,
        delta_output_tokens: u64,
    ) -> Result<Snapshot, QuotaError> {
        let day = Self::today();
        let counter = self.counter(tenant, kind, day);
        let limit = counter.limit.load(Ordering::SeqCst);

        loop {
            let current = counter.request_count.load(Ordering::SeqCst);
            if limit != u64::MAX && current >= limit {
                return Err(QuotaError::QuotaExceeded {
                    current,
                    limit,
                    retry_after_day_secs: seconds_until_next_utc_day(),
                });
            }
            match counter.request_count.compare_exchange_weak(
                current,
                current + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => {
                    counter.input_tokens.fetch_add(delta_input_tokens, Ordering::SeqCst);
                    counter.output_tokens.fetch_add(delta_output_tokens, Ordering::SeqCst);
                    return Ok(self.snapshot_of(tenant, kind, day, &counter));
                }
                Err(_) => continue,
            }
        }
    }

    /// Remove every key belonging to a tenant in one atomic step (under the
    /// write lock), across all kinds and days.
    pub fn clear_tenant(&self, tenant: &str) {
        self.counters.write().retain(|k, _| k.tenant_id != tenant);
    }

    /// Test scaffolding only.
    pub fn reset(&self) {
        self.counters.write().clear();
    }
}

impl Default for UsageTracker {
    fn default() -> Self {
        Self::new()
    }
}

fn seconds_until_next_utc_day() -> u64 {
    let now = Utc::now();
    let next_midnight = (now.date_naive() + chrono::Duration::days(1))
        .and_hms_opt(0, 0, 0)
        .expect("valid midnight")
        .and_utc();
    (next_midnight - now).num_seconds().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    // Concurrent increments never lose an update.
    #[test]
    fn concurrent_increments_never_lose_an_update() {
        let tracker = Arc::new(UsageTracker::new());
        std::thread::scope(|scope| {
            for _ in 0..100 {
                let tracker = tracker.clone();
                scope.spawn(move || {
                    tracker.increment("tenant-a", UsageKind::Chat, 1, 0, 0);
                });
            }
        });
        let snap = tracker.snapshot("tenant-a", UsageKind::Chat, Utc::now().date_naive());
        assert_eq!(snap.request_count, 100);
    }

    // Concurrent reserve calls admit exactly min(callers, limit).
    #[test]
    fn concurrent_reserve_admits_exactly_the_limit() {
        let tracker = Arc::new(UsageTracker::new());
        tracker.set_quota("tenant-a", UsageKind::Action, Some(10));
        let admitted = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..37)
                .map(|_| {
                    let tracker = tracker.clone();
                    scope.spawn(move || tracker.reserve("tenant-a", UsageKind::Action, 0, 0).is_ok())
                })
                .collect();
            handles.into_iter().filter(|h| h.join().unwrap()).count()
        });
        assert_eq!(admitted, 10);
        let snap = tracker.snapshot("tenant-a", UsageKind::Action, Utc::now().date_naive());
        assert_eq!(snap.request_count, 10);
    }

    #[test]
    fn unlimited_quota_never_rejects() {
        let tracker = UsageTracker::new();
        for _ in 0..1000 {
            assert!(tracker.reserve("tenant-a", UsageKind::Chat, 0, 0).is_ok());
        }
    }

    #[test]
    fn warning_band_fires_at_eighty_percent() {
        let tracker = UsageTracker::new();
        tracker.set_quota("tenant-a", UsageKind::Chat, Some(10));
        for _ in 0..8 {
            tracker.reserve("tenant-a", UsageKind::Chat, 0, 0).unwrap();
        }
        let snap = tracker.snapshot("tenant-a", UsageKind::Chat, Utc::now().date_naive());
        assert_eq!(snap.status, QuotaStatus::Warning);
    }

    #[test]
    fn kinds_have_independent_counters() {
        let tracker = UsageTracker::new();
        tracker.set_quota("tenant-a", UsageKind::Chat, Some(1));
        tracker.reserve("tenant-a", UsageKind::Chat, 0, 0).unwrap();
        assert!(tracker.reserve("tenant-a", UsageKind::Chat, 0, 0).is_err());
        // Action is a distinct kind and has its own (unlimited) budget.
        assert!(tracker.reserve("tenant-a", UsageKind::Action, 0, 0).is_ok());
    }

    #[test]
    fn clear_tenant_removes_all_its_keys() {
        let tracker = UsageTracker::new();
        tracker.increment("tenant-a", UsageKind::Chat, 5, 0, 0);
        tracker.increment("tenant-a", UsageKind::Action, 5, 0, 0);
        tracker.increment("tenant-b", UsageKind::Chat, 5, 0, 0);
        tracker.clear_tenant("tenant-a");
        let today = Utc::now().date_naive();
        assert_eq!(tracker.snapshot("tenant-a", UsageKind::Chat, today).request_count, 0);
        assert_eq!(tracker.snapshot("tenant-b", UsageKind::Chat, today).request_count, 5);
    }
}
