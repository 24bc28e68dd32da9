//! AgentKern-Pipeline: the admission pipeline composing the phase
//! gate, tenant context, rate limiter, quota tracker, prompt safety pipeline,
//! circuit breaker, and approval gate into the single path every AI-origin
//! request travels.
//!
//! Data flow, failures short-circuit at any stage:
//! `phase → tenant → rate limiter → quota.reserve → prompt safety →
//! circuit(inference) → output validation → risk classify → approval gate`.
//! Every stage emits an audit event regardless of outcome.

pub mod error;
pub mod inference;

pub use error::AdmissionError;
pub use inference::{InferenceClient, InferenceOutput};

use std::sync::Arc;

use agentkern_arbiter::{ActionPlan, ApprovalGate, AuditEvent, AuditSink, Evaluation, EventType};
use agentkern_gate::phase::Phase;
use agentkern_gate::prompt_safety::{validator, Allowlist};
use agentkern_gate::{CircuitRegistry, PhaseGate, QuotaStatus, UsageKind, UsageTracker};
use agentkern_tenancy::TenantContext;

/// The kind of operation a request requests, used to pick the phase threshold
/// it must clear via `require_phase(phase_for(request_kind))`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Read,
    Propose,
    Execute,
}

fn phase_for(kind: RequestKind) -> Phase {
    match kind {
        RequestKind::Read => Phase::ReadOnly,
        RequestKind::Propose => Phase::Proposal,
        RequestKind::Execute => Phase::Execution,
    }
}

/// Outcome of running a request through the pipeline end to end.
pub enum AdmissionOutcome {
    AutoApproved { output: InferenceOutput },
    ApprovalRequired { encoded_token: String, expires_at: i64 },
}

/// All of the fabric's stateful services plus the audit sink, owned by the
/// application and handed to the pipeline by explicit injection rather than
/// reached through process-wide statics.
pub struct AdmissionPipeline {
    pub phase: PhaseGate,
    pub rate_limiter: agentkern_gate::RateLimiter,
    pub usage: UsageTracker,
    pub circuits: CircuitRegistry,
    pub approval: ApprovalGate,
    pub allowlist: Allowlist,
    pub prompt_risk_threshold: f64,
    pub audit: AuditSink,
    pub inference: Arc<dyn InferenceClient>,
}

impl AdmissionPipeline {
    /// Run the nine-step admission flow for a single request.
    ///
    /// `tenant_id`/`actor_id` must match the ambient [`TenantContext`] exactly
    /// (step 2); the caller is expected to have already installed that context
    /// via [`agentkern_tenancy::with_context`] or [`agentkern_tenancy::set`].
    pub async fn admit(
        &self,
        request_id: &str,
        kind: RequestKind,
        tenant_id: &str,
        actor_id: &str,
        prompt: &str,
        usage_kind: UsageKind,
    ) -> Result<AdmissionOutcome, AdmissionError> {
        self.audit.emit(
            AuditEvent::new(EventType::RequestReceived, tenant_id, actor_id, "received")
                .with_request_id(request_id.to_string()),
        );

        // 1. Phase gate.
        self.phase.require_phase(phase_for(kind))?;

        // 2. Tenant context: the ambient context must agree with the caller's claim.
        let ctx = agentkern_tenancy::require_context()?;
        if ctx.tenant_id != tenant_id {
            return Err(AdmissionError::Tenant(agentkern_tenancy::TenantError::ContextMismatch {
                expected: tenant_id.to_string(),
                found: ctx.tenant_id.clone(),
            }));
        }

        // 3. Rate limiter.
        if let Err(err) = self.rate_limiter.acquire(tenant_id, actor_id) {
            self.audit.emit(
                AuditEvent::new(EventType::RateLimitRejected, tenant_id, actor_id, "rejected")
                    .with_request_id(request_id.to_string()),
            );
            return Err(err.into());
        }

        // 4. Quota tracker.
        let snapshot = match self.usage.reserve(tenant_id, usage_kind, 0, 0) {
            Ok(s) => s,
            Err(err) => {
                self.audit.emit(
                    AuditEvent::new(EventType::QuotaExceeded, tenant_id, actor_id, "rejected")
                        .with_request_id(request_id.to_string()),
                );
                return Err(err.into());
            }
        };
        if snapshot.status == QuotaStatus::Warning {
            tracing::warn!(tenant_id, kind = usage_kind_label(usage_kind), "quota at warning threshold");
        }

        // 5. Prompt safety.
        let (artifact, verdict) =
            agentkern_gate::prompt_safety::run_pipeline(prompt, self.prompt_risk_threshold, &self.allowlist);
        self.audit.emit(
            AuditEvent::new(EventType::PromptSanitized, tenant_id, actor_id, "sanitized")
                .with_request_id(request_id.to_string())
                .with_extra(serde_json::json!({ "risk_score": artifact.risk_score })),
        );
        if !artifact.pii_detections.is_empty() || !artifact.phi_detections.is_empty() {
            self.audit.emit(
                AuditEvent::new(EventType::PiiDetected, tenant_id, actor_id, "detected")
                    .with_request_id(request_id.to_string()),
            );
        }
        verdict?;

        // 6. Circuit-protected inference call.
        let inference = Arc::clone(&self.inference);
        let sanitized = artifact.sanitized_text.clone();
        let circuit = self.circuits.get("inference");
        let call_result = circuit.execute(|| async move { inference.call(&sanitized).await }).await?;
        let raw_output = match call_result {
            Ok(output) => output,
            Err(_) => {
                self.audit.emit(
                    AuditEvent::new(EventType::ExecutionFailed, tenant_id, actor_id, "inference_error")
                        .with_request_id(request_id.to_string()),
                );
                return Err(AdmissionError::InferenceTimeout);
            }
        };

        // 7. Output validation (the validator scans its own leakage internally).
        let variant = raw_output.variant();
        let validated = validator::validate(&raw_output.as_value(), variant)?;
        if validated.leak_scan.pii_detected || validated.leak_scan.phi_detected {
            tracing::warn!(tenant_id, request_id, "pii/phi leakage detected in validated output");
        }

        // 8. Risk classification for action plans; everything else auto-approves.
        let outcome = match raw_output {
            InferenceOutput::Plan(plan) => {
                self.audit.emit(
                    AuditEvent::new(EventType::ActionPlanned, tenant_id, actor_id, "planned")
                        .with_request_id(request_id.to_string())
                        .with_action_id(plan.action_id.clone()),
                );
                self.evaluate_plan(plan, tenant_id, actor_id).await?
            }
            other => AdmissionOutcome::AutoApproved { output: other },
        };

        self.audit.emit(
            AuditEvent::new(EventType::ExecutionCompleted, tenant_id, actor_id, "completed")
                .with_request_id(request_id.to_string()),
        );

        Ok(outcome)
    }

    async fn evaluate_plan(
        &self,
        plan: ActionPlan,
        tenant_id: &str,
        actor_id: &str,
    ) -> Result<AdmissionOutcome, AdmissionError> {
        let evaluation = self.approval.evaluate(
            &plan,
            None,
            tenant_id,
            actor_id,
            self.phase.current_phase(),
            vec![],
            None,
        )?;
        Ok(match evaluation {
            Evaluation::AutoApproved { .. } => {
                AdmissionOutcome::AutoApproved { output: InferenceOutput::Plan(plan) }
            }
            Evaluation::ApprovalRequired { encoded_token, expires_at } => {
                AdmissionOutcome::ApprovalRequired { encoded_token, expires_at }
            }
        })
    }
}

fn usage_kind_label(kind: UsageKind) -> &'static str {
    match kind {
        UsageKind::Chat => "chat",
        UsageKind::Action => "action",
        UsageKind::Execution => "execution",
        UsageKind::Advisory => "advisory",
    }
}
