//! Approval gate: the keystone composing risk classification, plan hashing,
//! token issuance and the pending-approval queue (§4.G).

use agentkern_gate::phase::Phase;
use serde_json::Value;

use crate::audit::{AuditEvent, AuditSink, EventType};
use crate::error::ApprovalError;
use crate::plan::{plan_hash, ActionPlan};
use crate::queue::{ApprovalQueue, ApprovalRequest, RequestStatus};
use crate::risk::{classify, RiskLevel};
use crate::token::{ApprovalToken, TokenIssuer};

/// Outcome of evaluating a plan against the approval gate.
pub enum Evaluation {
    AutoApproved { risk_level: RiskLevel },
    ApprovalRequired { encoded_token: String, expires_at: i64 },
}

/// Redacts a plan for admin display. Step contents are dropped to their
/// operation name only; full step payloads stay out of the queue (§3
/// `ApprovalRequest`: "plan (redacted)").
fn redact_plan_for_display(plan: &ActionPlan) -> Value {
    let op_names: Vec<Value> = plan
        .steps
        .iter()
        .map(|step| {
            step.get("op").cloned().unwrap_or(Value::String("unknown".to_string()))
        })
        .collect();
    serde_json::json!({
        "action_id": plan.action_id,
        "step_ops": op_names,
        "step_count": plan.steps.len(),
    })
}

pub struct ApprovalGate {
    issuer: TokenIssuer,
    queue: ApprovalQueue,
    audit: AuditSink,
}

impl ApprovalGate {
    pub fn new(hmac_key: Vec<u8>, audit: AuditSink) -> Self {
        Self { issuer: TokenIssuer::new(hmac_key), queue: ApprovalQueue::new(), audit }
    }

    /// Classify `plan` and either auto-approve it or mint a token and enqueue
    /// it for human review, depending on the currently deployed phase (§4.G.5).
    ///
    /// `ReadOnly` never mints an execution-class token: a risky plan in that
    /// phase is rejected upstream rather than queued. `Proposal` may classify
    /// and enqueue but the token it mints cannot be redeemed until the phase
    /// advances to `Execution`; the caller is responsible for enforcing that
    /// at redemption time via `phase_gate.require_phase`.
    pub fn evaluate(
        &self,
        plan: &ActionPlan,
        scenario_tag: Option<&str>,
        tenant_id: &str,
        requested_by: &str,
        phase: Phase,
        required_permissions: Vec<String>,
        rollback_plan: Option<Value>,
    ) -> Result<Evaluation, ApprovalError> {
        let classification = classify(plan, scenario_tag);
        let hash = plan_hash(plan);

        self.audit.emit(
            AuditEvent::new(EventType::IntentClassified, tenant_id, requested_by, "classified")
                .with_action_id(plan.action_id.clone())
                .with_plan_hash(hash.clone())
                .with_risk_level(format!("{:?}", classification.level)),
        );

        if !classification.level.requires_approval() {
            self.audit.emit(
                AuditEvent::new(EventType::ActionAutoApproved, tenant_id, requested_by, "auto_approved")
                    .with_action_id(plan.action_id.clone())
                    .with_plan_hash(hash),
            );
            return Ok(Evaluation::AutoApproved { risk_level: classification.level });
        }

        if phase == Phase::ReadOnly {
            return Err(ApprovalError::ApprovalRequired { action_id: plan.action_id.clone() });
        }

        let mut hash_bytes = [0u8; 32];
        hex_into(&hash, &mut hash_bytes);
        let token = self.issuer.mint(tenant_id, &plan.action_id, hash_bytes, requested_by);
        let encoded = self.issuer.encode(&token);

        self.queue.enqueue(ApprovalRequest {
            action_id: plan.action_id.clone(),
            plan_redacted: redact_plan_for_display(plan),
            plan_hash: hash.clone(),
            risk_level: classification.level,
            risk_reasoning: classification.reasoning,
            rollback_plan,
            required_permissions,
            tenant_id: tenant_id.to_string(),
            requested_by: requested_by.to_string(),
            created_at: token.issued_at,
            expires_at: token.expires_at,
            status: RequestStatus::PendingApproval,
        });

        self.audit.emit(
            AuditEvent::new(EventType::ApprovalRequired, tenant_id, requested_by, "pending")
                .with_action_id(plan.action_id.clone())
                .with_plan_hash(hash),
        );

        Ok(Evaluation::ApprovalRequired { encoded_token: encoded, expires_at: token.expires_at })
    }

    /// Redeem a token at execution time against the plan actually being run.
    /// Only valid in the `Execution` phase (§4.G.5); callers enforce the
    /// phase check upstream via the phase gate before reaching this call.
    pub fn approve(
        &self,
        encoded_token: &str,
        tenant_id: &str,
        action_id: &str,
        current_plan: &ActionPlan,
    ) -> Result<(), ApprovalError> {
        let result = self.issuer.validate_and_consume(encoded_token, tenant_id, action_id, current_plan);

        match &result {
            Ok(()) => {
                self.queue.set_status(tenant_id, action_id, RequestStatus::Approved);
                self.audit.emit(
                    AuditEvent::new(EventType::ApprovalGranted, tenant_id, "system", "approved")
                        .with_action_id(action_id.to_string()),
                );
            }
            Err(invalid) => {
                self.audit.emit(
                    AuditEvent::new(
                        EventType::TokenValidationFailed,
                        tenant_id,
                        "system",
                        invalid.to_string(),
                    )
                    .with_action_id(action_id.to_string()),
                );
            }
        }

        result.map_err(ApprovalError::from)
    }

    pub fn reject(&self, tenant_id: &str, action_id: &str, reason: &str) {
        self.queue.set_status(tenant_id, action_id, RequestStatus::Rejected);
        self.audit.emit(
            AuditEvent::new(EventType::ApprovalRejected, tenant_id, "system", reason.to_string())
                .with_action_id(action_id.to_string()),
        );
    }

    pub fn pending_approvals(&self, tenant_id: &str) -> Vec<ApprovalRequest> {
        self.queue.pending_for_tenant(tenant_id)
    }

    /// Sweep the queue for expired entries, auditing each transition.
    pub fn sweep_expired(&self) {
        for (tenant_id, action_id) in self.queue.sweep_expired() {
            self.audit.emit(
                AuditEvent::new(EventType::ApprovalExpired, &tenant_id, "system", "expired")
                    .with_action_id(action_id),
            );
        }
    }
}

fn hex_into(hex: &str, out: &mut [u8; 32]) {
    for (i, byte) in out.iter_mut().enumerate() {
        let hi = hex.as_bytes()[i * 2] as char;
        let lo = hex.as_bytes()[i * 2 + 1] as char;
        *byte = (hi.to_digit(16).unwrap() as u8) << 4 | lo.to_digit(16).unwrap() as u8;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn plan(action_id: &str, op: &str) -> ActionPlan {
        ActionPlan {
            action_id: action_id.to_string(),
            steps: vec![json!({"op": op})],
            tool_schema_versions: json!({}),
            metadata: json!({}),
        }
    }

    fn gate() -> (ApprovalGate, crate::audit::AuditDrain) {
        let (audit, drain) = AuditSink::new(64);
        (ApprovalGate::new(b"test-key".to_vec(), audit), drain)
    }

    #[test]
    fn low_risk_plan_auto_approves() {
        let (gate, _drain) = gate();
        let p = plan("act-1", "send_reminder_email");
        let result = gate
            .evaluate(&p, None, "tenant-a", "actor-1", Phase::Execution, vec![], None)
            .unwrap();
        assert!(matches!(result, Evaluation::AutoApproved { risk_level: RiskLevel::Low }));
    }

    #[test]
    fn critical_plan_in_read_only_phase_is_rejected_not_queued() {
        let (gate, _drain) = gate();
        let p = plan("act-1", "delete_patient");
        let err = gate
            .evaluate(&p, None, "tenant-a", "actor-1", Phase::ReadOnly, vec![], None)
            .unwrap_err();
        assert!(matches!(err, ApprovalError::ApprovalRequired { .. }));
        assert!(gate.pending_approvals("tenant-a").is_empty());
    }

    #[test]
    fn critical_plan_in_execution_phase_mints_redeemable_token() {
        let (gate, _drain) = gate();
        let p = plan("act-1", "delete_patient");
        let evaluation = gate
            .evaluate(&p, None, "tenant-a", "actor-1", Phase::Execution, vec![], None)
            .unwrap();
        let Evaluation::ApprovalRequired { encoded_token, .. } = evaluation else {
            panic!("expected ApprovalRequired");
        };
        assert_eq!(gate.pending_approvals("tenant-a").len(), 1);
        gate.approve(&encoded_token, "tenant-a", "act-1", &p).unwrap();
        let pending = gate.pending_approvals("tenant-a");
        assert!(pending.is_empty());
    }

    // P11: redemption against a drifted plan fails and leaves the token usable.
    #[test]
    fn drifted_plan_at_redemption_is_rejected() {
        let (gate, _drain) = gate();
        let p1 = plan("act-1", "delete_patient");
        let p2 = plan("act-1", "delete_record");
        let evaluation = gate
            .evaluate(&p1, None, "tenant-a", "actor-1", Phase::Execution, vec![], None)
            .unwrap();
        let Evaluation::ApprovalRequired { encoded_token, .. } = evaluation else {
            panic!("expected ApprovalRequired");
        };
        let err = gate.approve(&encoded_token, "tenant-a", "act-1", &p2).unwrap_err();
        assert!(matches!(
            err,
            ApprovalError::TokenInvalid(crate::error::ApprovalTokenInvalid::PlanDrift)
        ));
    }
}
