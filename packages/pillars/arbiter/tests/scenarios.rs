//! End-to-end approval-gate scenarios.

use agentkern_arbiter::{ActionPlan, ApprovalError, ApprovalGate, AuditSink, Evaluation};
use agentkern_gate::phase::Phase;
use serde_json::json;

fn plan(action_id: &str, op: &str) -> ActionPlan {
    ActionPlan {
        action_id: action_id.to_string(),
        steps: vec![json!({"op": op})],
        tool_schema_versions: json!({ "crm": 1 }),
        metadata: json!({}),
    }
}

// Scenario 1: happy path proposal, Low risk, auto-approved.
#[test]
fn happy_path_proposal_auto_approves() {
    let (audit, _drain) = AuditSink::new(16);
    let gate = ApprovalGate::new(b"scenario-key".to_vec(), audit);
    let p = plan("act-1", "send_followup_email");

    let result = gate
        .evaluate(&p, None, "tenant-t", "user-u", Phase::Proposal, vec![], None)
        .unwrap();
    assert!(matches!(result, Evaluation::AutoApproved { .. }));
}

// Scenario 2: risky plan requires approval, token minted with ~10 minute expiry.
#[test]
fn risky_plan_mints_token_with_ten_minute_expiry() {
    let (audit, _drain) = AuditSink::new(16);
    let gate = ApprovalGate::new(b"scenario-key".to_vec(), audit);
    let p = plan("act-2", "delete_patient");

    let before = chrono::Utc::now().timestamp();
    let result = gate
        .evaluate(&p, None, "tenant-t", "user-u", Phase::Execution, vec![], None)
        .unwrap();
    let Evaluation::ApprovalRequired { encoded_token, expires_at } = result else {
        panic!("expected ApprovalRequired");
    };
    assert!(!encoded_token.is_empty());
    assert!(expires_at - before >= 590 && expires_at - before <= 610);
    assert_eq!(gate.pending_approvals("tenant-t").len(), 1);
}

// Scenario 3: token replay. Exactly one of ten concurrent approve() calls succeeds.
#[test]
fn token_replay_exactly_one_approval_succeeds() {
    use std::sync::Arc;
    use std::thread;

    let (audit, _drain) = AuditSink::new(16);
    let gate = Arc::new(ApprovalGate::new(b"scenario-key".to_vec(), audit));
    let p = Arc::new(plan("act-3", "delete_patient"));

    let result = gate
        .evaluate(&p, None, "tenant-t", "user-u", Phase::Execution, vec![], None)
        .unwrap();
    let Evaluation::ApprovalRequired { encoded_token, .. } = result else {
        panic!("expected ApprovalRequired");
    };
    let encoded_token = Arc::new(encoded_token);

    let successes = thread::scope(|scope| {
        let handles: Vec<_> = (0..10)
            .map(|_| {
                let gate = Arc::clone(&gate);
                let token = Arc::clone(&encoded_token);
                let plan = Arc::clone(&p);
                scope.spawn(move || gate.approve(&token, "tenant-t", "act-3", &plan).is_ok())
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).filter(|ok| *ok).count()
    });

    assert_eq!(successes, 1);
}

// Scenario 4: plan drift. Token minted for P1 is rejected against P2, and
// remains usable against the original plan.
#[test]
fn plan_drift_is_rejected_and_token_survives_for_correct_plan() {
    let (audit, _drain) = AuditSink::new(16);
    let gate = ApprovalGate::new(b"scenario-key".to_vec(), audit);
    let p1 = plan("act-4", "delete_patient");
    let mut p2 = plan("act-4", "delete_patient");
    p2.steps = vec![json!({"op": "delete_patient", "id": 999})];

    let result = gate
        .evaluate(&p1, None, "tenant-t", "user-u", Phase::Execution, vec![], None)
        .unwrap();
    let Evaluation::ApprovalRequired { encoded_token, .. } = result else {
        panic!("expected ApprovalRequired");
    };

    let err = gate.approve(&encoded_token, "tenant-t", "act-4", &p2).unwrap_err();
    assert!(matches!(
        err,
        ApprovalError::TokenInvalid(agentkern_arbiter::ApprovalTokenInvalid::PlanDrift)
    ));

    assert!(gate.approve(&encoded_token, "tenant-t", "act-4", &p1).is_ok());
}
