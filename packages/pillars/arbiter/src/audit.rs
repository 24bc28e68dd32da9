//! Append-only audit log sink (§4.H).
//!
//! Writes are queued onto a bounded channel drained by a dedicated writer
//! task so a slow or failing persistence backend never blocks the admission
//! pipeline. When the channel is full the event is dropped and
//! `sink_degraded` increments; the request itself is never failed on this
//! account.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Every kind of state change the fabric ever emits (§4.H, non-exhaustive
/// list in the field documentation below mirrors the one named there).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    RequestReceived,
    IntentClassified,
    PromptSanitized,
    PiiDetected,
    RateLimitRejected,
    QuotaExceeded,
    CircuitStateTransition,
    ActionPlanned,
    ActionAutoApproved,
    ApprovalRequired,
    ApprovalGranted,
    ApprovalRejected,
    ApprovalExpired,
    TokenValidationFailed,
    BypassEntered,
    BypassExited,
    ExecutionCompleted,
    ExecutionFailed,
    RequestCancelled,
}

/// Append-only, immutable record. No update path exists anywhere in this
/// crate; the only operations are `emit` and read-side queries owned by
/// whatever persistence backend drains the channel.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub event_id: Uuid,
    pub event_type: EventType,
    pub tenant_id: String,
    pub actor_id: String,
    pub request_id: Option<String>,
    pub action_id: Option<String>,
    pub plan_hash: Option<String>,
    pub risk_level: Option<String>,
    pub outcome: String,
    pub policy_version: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub extra: Value,
}

impl AuditEvent {
    pub fn new(
        event_type: EventType,
        tenant_id: impl Into<String>,
        actor_id: impl Into<String>,
        outcome: impl Into<String>,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type,
            tenant_id: tenant_id.into(),
            actor_id: actor_id.into(),
            request_id: None,
            action_id: None,
            plan_hash: None,
            risk_level: None,
            outcome: outcome.into(),
            policy_version: None,
            timestamp: Utc::now(),
            extra: Value::Null,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_action_id(mut self, action_id: impl Into<String>) -> Self {
        self.action_id = Some(action_id.into());
        self
    }

    pub fn with_plan_hash(mut self, plan_hash: impl Into<String>) -> Self {
        self.plan_hash = Some(plan_hash.into());
        self
    }

    pub fn with_risk_level(mut self, risk_level: impl Into<String>) -> Self {
        self.risk_level = Some(risk_level.into());
        self
    }

    pub fn with_extra(mut self, extra: Value) -> Self {
        self.extra = extra;
        self
    }
}

/// Receives events that did not fit on the channel; the caller is
/// responsible for deciding how to surface `sink_degraded`.
pub trait DegradedSink: Send + Sync {
    fn record_dropped(&self, event: &AuditEvent);
}

/// A `DegradedSink` that only logs; suitable as the default fallback.
pub struct TracingDegradedSink;

impl DegradedSink for TracingDegradedSink {
    fn record_dropped(&self, event: &AuditEvent) {
        tracing::warn!(
            event_id = %event.event_id,
            event_type = ?event.event_type,
            tenant_id = %event.tenant_id,
            "audit sink degraded: event dropped, queue full"
        );
    }
}

/// Front door for audit emission. Cloning is cheap; all clones share the
/// same channel and degradation counter.
#[derive(Clone)]
pub struct AuditSink {
    tx: mpsc::Sender<AuditEvent>,
    sink_degraded: Arc<AtomicU64>,
    fallback: Arc<dyn DegradedSink>,
}

/// The task-side handle that drains the channel. Held by whoever owns the
/// persistence backend; dropping it without draining loses queued events.
pub struct AuditDrain {
    rx: mpsc::Receiver<AuditEvent>,
}

impl AuditSink {
    pub fn new(capacity: usize) -> (Self, AuditDrain) {
        Self::with_fallback(capacity, Arc::new(TracingDegradedSink))
    }

    pub fn with_fallback(capacity: usize, fallback: Arc<dyn DegradedSink>) -> (Self, AuditDrain) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self { tx, sink_degraded: Arc::new(AtomicU64::new(0)), fallback },
            AuditDrain { rx },
        )
    }

    /// Never blocks and never fails the caller. On backpressure, the event
    /// is dropped and `sink_degraded` increments.
    pub fn emit(&self, event: AuditEvent) {
        if let Err(mpsc::error::TrySendError::Full(event))
        | Err(mpsc::error::TrySendError::Closed(event)) = self.tx.try_send(event)
        {
            self.sink_degraded.fetch_add(1, Ordering::Relaxed);
            self.fallback.record_dropped(&event);
        }
    }

    pub fn sink_degraded_count(&self) -> u64 {
        self.sink_degraded.load(Ordering::Relaxed)
    }
}

impl AuditDrain {
    /// Pull the next event, awaiting until one arrives or the sink is
    /// dropped. Intended to be run in a dedicated task writing to whatever
    /// persistence backend the application composes in.
    pub async fn recv(&mut self) -> Option<AuditEvent> {
        self.rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn builder_methods_populate_optional_fields() {
        let event = AuditEvent::new(EventType::ApprovalRequired, "tenant-a", "actor-1", "pending")
            .with_action_id("act-1")
            .with_plan_hash("deadbeef")
            .with_risk_level("Critical");
        assert_eq!(event.action_id.as_deref(), Some("act-1"));
        assert_eq!(event.plan_hash.as_deref(), Some("deadbeef"));
        assert_eq!(event.risk_level.as_deref(), Some("Critical"));
    }

    #[tokio::test]
    async fn emitted_events_are_received_in_order() {
        let (sink, mut drain) = AuditSink::new(8);
        sink.emit(AuditEvent::new(EventType::RequestReceived, "t", "a", "ok"));
        sink.emit(AuditEvent::new(EventType::IntentClassified, "t", "a", "ok"));

        let first = drain.recv().await.unwrap();
        let second = drain.recv().await.unwrap();
        assert_eq!(first.event_type, EventType::RequestReceived);
        assert_eq!(second.event_type, EventType::IntentClassified);
    }

    struct CountingFallback(Mutex<usize>);

    impl DegradedSink for CountingFallback {
        fn record_dropped(&self, _event: &AuditEvent) {
            *self.0.lock().unwrap() += 1;
        }
    }

    #[tokio::test]
    async fn overflow_drops_and_increments_sink_degraded_without_blocking() {
        let fallback = Arc::new(CountingFallback(Mutex::new(0)));
        let (sink, mut drain) = AuditSink::with_fallback(1, fallback.clone());

        sink.emit(AuditEvent::new(EventType::RequestReceived, "t", "a", "ok"));
        // channel has capacity 1 and nobody has drained yet: this one overflows.
        sink.emit(AuditEvent::new(EventType::IntentClassified, "t", "a", "ok"));

        assert_eq!(sink.sink_degraded_count(), 1);
        assert_eq!(*fallback.0.lock().unwrap(), 1);

        let received = drain.recv().await.unwrap();
        assert_eq!(received.event_type, EventType::RequestReceived);
    }
}
