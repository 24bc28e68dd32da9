//! Circuit Breaker (spec §4.E) — per-circuit failure-isolation state machine
//! protecting downstream inference calls.
//!
//! `CircuitState` is process-wide shared mutable state guarded by its own lock
//! (spec §3). Circuits are created lazily on first reference by name and live
//! for process lifetime, held in a [`CircuitRegistry`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;

use crate::error::CircuitError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum State {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy)]
pub struct CircuitConfig {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub open_timeout: Duration,
    pub half_open_max_calls: u32,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            open_timeout: Duration::from_secs(30),
            half_open_max_calls: 3,
        }
    }
}

/// Call counters, folded into `status()` per SPEC_FULL §C.7.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Metrics {
    pub total_calls: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    pub rejected_calls: u64,
    pub state_changes: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Status {
    pub name: String,
    pub state: State,
    pub failure_count: u32,
    pub success_count: u32,
    pub retry_after_secs: u64,
    pub metrics: Metrics,
}

struct Inner {
    name: String,
    config: CircuitConfig,
    state: State,
    failure_count: u32,
    success_count: u32,
    half_open_in_flight: u32,
    last_state_change: Instant,
    metrics: Metrics,
}

impl Inner {
    fn transition_to(&mut self, new_state: State) {
        if self.state == new_state {
            return;
        }
        let old = self.state;
        self.state = new_state;
        self.last_state_change = Instant::now();
        self.metrics.state_changes += 1;
        match new_state {
            State::HalfOpen => {
                self.half_open_in_flight = 0;
                self.success_count = 0;
            }
            State::Closed => {
                self.failure_count = 0;
            }
            State::Open => {}
        }
        tracing::info!(circuit = %self.name, from = ?old, to = ?new_state, "circuit_state_transition");
    }

    /// Promote Open -> HalfOpen if the timeout has elapsed. Called before every
    /// state read so `status()` and `execute()` never see a stale Open past its
    /// own timeout.
    fn maybe_promote(&mut self) {
        if self.state == State::Open
            && self.last_state_change.elapsed() >= self.config.open_timeout
        {
            self.transition_to(State::HalfOpen);
        }
    }

    fn retry_after_secs(&self) -> u64 {
        if self.state != State::Open {
            return 0;
        }
        self.config
            .open_timeout
            .saturating_sub(self.last_state_change.elapsed())
            .as_secs()
    }

    /// Reserve a probe slot if a call may proceed; returns false if the call
    /// must be rejected without affecting counters.
    fn try_admit(&mut self) -> bool {
        self.maybe_promote();
        match self.state {
            State::Closed => true,
            State::Open => false,
            State::HalfOpen => {
                if self.half_open_in_flight < self.config.half_open_max_calls {
                    self.half_open_in_flight += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    fn record_success(&mut self) {
        self.metrics.total_calls += 1;
        self.metrics.successful_calls += 1;
        match self.state {
            State::HalfOpen => {
                self.half_open_in_flight = self.half_open_in_flight.saturating_sub(1);
                self.success_count += 1;
                if self.success_count >= self.config.success_threshold {
                    self.transition_to(State::Closed);
                }
            }
            State::Closed => {
                self.failure_count = 0;
            }
            State::Open => {}
        }
    }

    fn record_failure(&mut self) {
        self.metrics.total_calls += 1;
        self.metrics.failed_calls += 1;
        match self.state {
            State::HalfOpen => {
                self.half_open_in_flight = self.half_open_in_flight.saturating_sub(1);
                self.transition_to(State::Open);
            }
            State::Closed => {
                self.failure_count += 1;
                if self.failure_count >= self.config.failure_threshold {
                    self.transition_to(State::Open);
                }
            }
            State::Open => {}
        }
    }
}

/// A single named circuit. Cheaply cloneable; clones share the same lock.
#[derive(Clone)]
pub struct Circuit {
    inner: Arc<Mutex<Inner>>,
}

impl Circuit {
    fn new(name: impl Into<String>, config: CircuitConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                name: name.into(),
                config,
                state: State::Closed,
                failure_count: 0,
                success_count: 0,
                half_open_in_flight: 0,
                last_state_change: Instant::now(),
                metrics: Metrics::default(),
            })),
        }
    }

    /// Wrap a blocking or async call. Threads success/failure through the state
    /// machine identically for either calling convention (spec §4.E: "both
    /// blocking and cooperative variants exist; contract is identical").
    pub async fn execute<F, Fut, T, E>(&self, f: F) -> Result<Result<T, E>, CircuitError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        {
            let mut inner = self.inner.lock();
            if !inner.try_admit() {
                inner.metrics.rejected_calls += 1;
                return Err(CircuitError::CircuitOpen {
                    circuit: inner.name.clone(),
                    retry_after_secs: inner.retry_after_secs(),
                });
            }
        }

        let result = f().await;

        let mut inner = self.inner.lock();
        match &result {
            Ok(_) => inner.record_success(),
            Err(_) => inner.record_failure(),
        }
        Ok(result)
    }

    pub fn status(&self) -> Status {
        let mut inner = self.inner.lock();
        inner.maybe_promote();
        Status {
            name: inner.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            retry_after_secs: inner.retry_after_secs(),
            metrics: inner.metrics.clone(),
        }
    }

    pub fn force_open(&self) {
        self.inner.lock().transition_to(State::Open);
    }

    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = State::Closed;
        inner.failure_count = 0;
        inner.success_count = 0;
        inner.half_open_in_flight = 0;
        inner.last_state_change = Instant::now();
        inner.metrics = Metrics::default();
    }
}

/// Process-wide registry of named circuits, created lazily on first reference.
pub struct CircuitRegistry {
    config: CircuitConfig,
    circuits: Mutex<HashMap<String, Circuit>>,
}

impl CircuitRegistry {
    pub fn new(config: CircuitConfig) -> Self {
        Self {
            config,
            circuits: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, name: &str) -> Circuit {
        let mut circuits = self.circuits.lock();
        circuits
            .entry(name.to_string())
            .or_insert_with(|| Circuit::new(name, self.config))
            .clone()
    }

    /// Test scaffolding only.
    pub fn reset(&self) {
        self.circuits.lock().clear();
    }
}

impl Default for CircuitRegistry {
    fn default() -> Self {
        Self::new(CircuitConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_circuit() -> Circuit {
        Circuit::new(
            "inference",
            CircuitConfig {
                failure_threshold: 3,
                success_threshold: 2,
                open_timeout: Duration::from_millis(20),
                half_open_max_calls: 2,
            },
        )
    }

    async fn ok_call() -> Result<(), &'static str> {
        Ok(())
    }

    async fn err_call() -> Result<(), &'static str> {
        Err("boom")
    }

    // P6: circuit state transitions.
    #[tokio::test]
    async fn opens_after_consecutive_failures() {
        let c = fast_circuit();
        for _ in 0..3 {
            let _ = c.execute(err_call).await.unwrap();
        }
        assert_eq!(c.status().state, State::Open);
    }

    #[tokio::test]
    async fn success_resets_failure_count_while_closed() {
        let c = fast_circuit();
        let _ = c.execute(err_call).await.unwrap();
        let _ = c.execute(err_call).await.unwrap();
        let _ = c.execute(ok_call).await.unwrap();
        assert_eq!(c.status().failure_count, 0);
        assert_eq!(c.status().state, State::Closed);
    }

    #[tokio::test]
    async fn open_rejects_without_probing() {
        let c = fast_circuit();
        for _ in 0..3 {
            let _ = c.execute(err_call).await.unwrap();
        }
        let result = c.execute(ok_call).await;
        assert!(matches!(result, Err(CircuitError::CircuitOpen { .. })));
    }

    #[tokio::test]
    async fn transitions_to_half_open_after_timeout_then_closes_on_successes() {
        let c = fast_circuit();
        for _ in 0..3 {
            let _ = c.execute(err_call).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(c.status().state, State::HalfOpen);

        let _ = c.execute(ok_call).await.unwrap();
        assert_eq!(c.status().state, State::HalfOpen);
        let _ = c.execute(ok_call).await.unwrap();
        assert_eq!(c.status().state, State::Closed);
    }

    #[tokio::test]
    async fn any_failure_in_half_open_reopens() {
        let c = fast_circuit();
        for _ in 0..3 {
            let _ = c.execute(err_call).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(c.status().state, State::HalfOpen);
        let _ = c.execute(err_call).await.unwrap();
        assert_eq!(c.status().state, State::Open);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn half_open_rejects_beyond_max_in_flight() {
        let c = fast_circuit();
        for _ in 0..3 {
            let _ = c.execute(err_call).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(c.status().state, State::HalfOpen);

        // half_open_max_calls=2: hold both slots open with calls that block on
        // a oneshot channel until the test releases them, so a third call
        // observes both probe slots still occupied.
        let (tx1, rx1) = tokio::sync::oneshot::channel::<()>();
        let (tx2, rx2) = tokio::sync::oneshot::channel::<()>();

        let c1 = c.clone();
        let probe1 = tokio::spawn(async move {
            c1.execute(|| async move {
                let _ = rx1.await;
                Ok::<(), &'static str>(())
            })
            .await
        });
        let c2 = c.clone();
        let probe2 = tokio::spawn(async move {
            c2.execute(|| async move {
                let _ = rx2.await;
                Ok::<(), &'static str>(())
            })
            .await
        });

        // Give both spawned probes a chance to be admitted and park on their
        // channel before the third call is attempted.
        tokio::time::sleep(Duration::from_millis(10)).await;

        let third = c.execute(ok_call).await;
        assert!(
            matches!(third, Err(CircuitError::CircuitOpen { .. })),
            "a third half-open call must be rejected while half_open_max_calls probes are in flight"
        );

        tx1.send(()).unwrap();
        tx2.send(()).unwrap();
        assert!(probe1.await.unwrap().unwrap().is_ok());
        assert!(probe2.await.unwrap().unwrap().is_ok());
    }

    #[test]
    fn registry_creates_circuits_lazily_and_reuses_them() {
        let registry = CircuitRegistry::default();
        let a = registry.get("inference");
        a.force_open();
        let b = registry.get("inference");
        assert_eq!(b.status().state, State::Open);
    }

    #[test]
    fn force_open_and_reset_are_administrative_overrides() {
        let c = fast_circuit();
        c.force_open();
        assert_eq!(c.status().state, State::Open);
        c.reset();
        assert_eq!(c.status().state, State::Closed);
    }
}
