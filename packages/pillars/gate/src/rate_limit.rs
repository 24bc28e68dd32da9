//! Rate Limiter — sliding-window, per-tenant and per-user admission control.
//!
//! Each window is a monotonically growing sequence of timestamps guarded by its
//! own lock, sharded per key rather than behind a single contended lock, so
//! tenant A's window is never blocked behind tenant B's.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use crate::error::RateLimitError;

/// Outcome of a rate-limit check. The header triple is a convenience for
/// HTTP front doors translating a decision into `X-RateLimit-*` headers.
#[derive(Debug, Clone, Serialize)]
pub struct Decision {
    pub allowed: bool,
    pub current: u32,
    pub limit: u32,
    pub remaining: u32,
    pub reset_at_secs: u64,
    pub retry_after_secs: Option<u64>,
}

impl Decision {
    /// `X-RateLimit-*` header triple, as the original `to_headers()` produced.
    pub fn to_header_pairs(&self) -> [(&'static str, String); 3] {
        [
            ("X-RateLimit-Limit", self.limit.to_string()),
            ("X-RateLimit-Remaining", self.remaining.to_string()),
            ("X-RateLimit-Reset", self.reset_at_secs.to_string()),
        ]
    }
}

struct Window {
    timestamps: VecDeque<Instant>,
}

impl Window {
    fn new() -> Self {
        Self {
            timestamps: VecDeque::new(),
        }
    }

    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(&front) = self.timestamps.front() {
            if now.duration_since(front) >= window {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }
    }

    fn count(&self) -> u32 {
        self.timestamps.len() as u32
    }

    fn push(&mut self, now: Instant) {
        self.timestamps.push_back(now);
    }
}

/// A keyed collection of sliding windows, each independently locked.
struct WindowTable {
    shards: RwLock<HashMap<String, Arc<Mutex<Window>>>>,
}

impl WindowTable {
    fn new() -> Self {
        Self {
            shards: RwLock::new(HashMap::new()),
        }
    }

    fn shard(&self, key: &str) -> Arc<Mutex<Window>> {
        if let Some(existing) = self.shards.read().get(key) {
            return existing.clone();
        }
        let mut shards = self.shards.write();
        shards
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(Window::new())))
            .clone()
    }

    fn clear(&self) {
        self.shards.write().clear();
    }

    fn remove_tenant(&self, tenant: &str) {
        self.shards.write().retain(|k, _| {
            k != tenant && !k.starts_with(&format!("{tenant}\u{0}"))
        });
    }
}

/// Sliding-window per-tenant and per-user admission control.
pub struct RateLimiter {
    tenant_limit: u32,
    user_limit: u32,
    window: Duration,
    tenant_windows: WindowTable,
    user_windows: WindowTable,
}

fn user_key(tenant: &str, user: &str) -> String {
    format!("{tenant}\u{0}{user}")
}

impl RateLimiter {
    pub fn new(tenant_limit: u32, user_limit: u32, window: Duration) -> Self {
        Self {
            tenant_limit,
            user_limit,
            window,
            tenant_windows: WindowTable::new(),
            user_windows: WindowTable::new(),
        }
    }

    pub fn from_config(config: &crate::config::AppConfig) -> Self {
        Self::new(
            config.tenant_rate_limit_per_minute,
            config.user_rate_limit_per_minute,
            config.rate_limit_window,
        )
    }

    /// Check, without recording, whether tenant and user currently have room.
    /// Returns the more restrictive of the two decisions.
    pub fn check(&self, tenant: &str, user: &str) -> Decision {
        let now = Instant::now();
        let tenant_shard = self.tenant_windows.shard(tenant);
        let user_shard = self.user_windows.shard(&user_key(tenant, user));

        let tenant_decision = {
            let mut w = tenant_shard.lock();
            w.prune(now, self.window);
            self.decision_for(w.count(), self.tenant_limit)
        };
        let user_decision = {
            let mut w = user_shard.lock();
            w.prune(now, self.window);
            self.decision_for(w.count(), self.user_limit)
        };

        more_restrictive(tenant_decision, user_decision)
    }

    fn decision_for(&self, current: u32, limit: u32) -> Decision {
        let allowed = current < limit;
        Decision {
            allowed,
            current,
            limit,
            remaining: limit.saturating_sub(current),
            reset_at_secs: self.window.as_secs(),
            retry_after_secs: if allowed {
                None
            } else {
                Some(self.window.as_secs())
            },
        }
    }

    /// Append a timestamp to both the tenant and the user window, unconditionally.
    pub fn record(&self, tenant: &str, user: &str) {
        let now = Instant::now();
        self.tenant_windows.shard(tenant).lock().push(now);
        self.user_windows.shard(&user_key(tenant, user)).lock().push(now);
    }

    /// Atomic check-then-record: admits the caller iff both the tenant and the
    /// user window have room, and if admitted, records exactly once in both
    /// windows.
    pub fn acquire(&self, tenant: &str, user: &str) -> Result<Decision, RateLimitError> {
        let now = Instant::now();
        let tenant_shard = self.tenant_windows.shard(tenant);
        let user_shard = self.user_windows.shard(&user_key(tenant, user));

        // Lock ordering is always tenant-then-user to avoid deadlock across
        // concurrent acquire() calls on different (tenant, user) pairs.
        let mut tenant_window = tenant_shard.lock();
        let mut user_window = user_shard.lock();

        tenant_window.prune(now, self.window);
        user_window.prune(now, self.window);

        let tenant_decision = self.decision_for(tenant_window.count(), self.tenant_limit);
        let user_decision = self.decision_for(user_window.count(), self.user_limit);
        let decision = more_restrictive(tenant_decision, user_decision);

        if decision.allowed {
            tenant_window.push(now);
            user_window.push(now);
            Ok(decision)
        } else {
            Err(RateLimitError::RateLimitExceeded {
                retry_after_secs: decision.retry_after_secs.unwrap_or(self.window.as_secs()),
            })
        }
    }

    /// Drop all windows for a tenant (and, transitively, its users) in one step.
    pub fn clear_tenant(&self, tenant: &str) {
        self.tenant_windows.shard(tenant).lock().timestamps.clear();
        self.tenant_windows.remove_tenant(tenant);
        self.user_windows.remove_tenant(tenant);
    }

    /// Reset all state. Test scaffolding only.
    pub fn reset(&self) {
        self.tenant_windows.clear();
        self.user_windows.clear();
    }
}

fn more_restrictive(a: Decision, b: Decision) -> Decision {
    if a.allowed && b.allowed {
        if a.remaining <= b.remaining {
            a
        } else {
            b
        }
    } else if !a.allowed {
        a
    } else {
        b
    }
}
