//! The inference runtime contract: an external collaborator whose interface
//! this crate defines but whose implementation it does not.
//!
//! The pipeline only needs a single async call behind a circuit breaker; the
//! concrete model client (HTTP call to a hosted model, local runtime, etc.) is
//! out of scope and left to the application wiring it up.

use agentkern_arbiter::ActionPlan;
use agentkern_gate::prompt_safety::validator::OutputVariant;
use async_trait::async_trait;
use serde_json::Value;

/// One of the three shapes inference may return.
#[derive(Debug, Clone)]
pub enum InferenceOutput {
    Intent(Value),
    Plan(ActionPlan),
    Response(Value),
}

impl InferenceOutput {
    pub fn variant(&self) -> OutputVariant {
        match self {
            InferenceOutput::Intent(_) => OutputVariant::Intent,
            InferenceOutput::Plan(_) => OutputVariant::Plan,
            InferenceOutput::Response(_) => OutputVariant::Response,
        }
    }

    pub fn as_value(&self) -> Value {
        match self {
            InferenceOutput::Intent(v) | InferenceOutput::Response(v) => v.clone(),
            InferenceOutput::Plan(plan) => serde_json::json!({
                "steps": plan.steps,
                "tool_schema_versions": plan.tool_schema_versions,
            }),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("inference call failed: {0}")]
pub struct InferenceError(pub String);

#[async_trait]
pub trait InferenceClient: Send + Sync {
    async fn call(&self, sanitized_prompt: &str) -> Result<InferenceOutput, InferenceError>;
}

#[cfg(any(test, feature = "test-support"))]
pub mod test_support {
    use super::*;

    /// A deterministic stand-in for a real model client, used by this crate's
    /// own tests and available to downstream crates under the `test-support`
    /// feature for their own pipeline integration tests.
    pub struct EchoPlanClient {
        action_id: &'static str,
        op: &'static str,
    }

    impl EchoPlanClient {
        pub fn low_risk() -> Self {
            Self { action_id: "act-low", op: "send_reminder_email" }
        }

        pub fn high_risk() -> Self {
            Self { action_id: "act-high", op: "delete_patient" }
        }
    }

    #[async_trait]
    impl InferenceClient for EchoPlanClient {
        async fn call(&self, _sanitized_prompt: &str) -> Result<InferenceOutput, InferenceError> {
            Ok(InferenceOutput::Plan(ActionPlan {
                action_id: self.action_id.to_string(),
                steps: vec![serde_json::json!({ "op": self.op })],
                tool_schema_versions: serde_json::json!({ "crm": 1 }),
                metadata: serde_json::json!({}),
            }))
        }
    }
}
