//! Error taxonomy for the admission pipeline.
//!
//! Unlike the component crates, this enum wraps each component's own error
//! rather than re-declaring its variants, since the pipeline's job is purely
//! sequencing: the first stage to fail terminates the request and its error
//! surfaces verbatim, with none silently recovered.

use thiserror::Error;

use agentkern_arbiter::ApprovalError;
use agentkern_gate::{CircuitError, PhaseError, PromptSafetyError, QuotaError, RateLimitError};
use agentkern_tenancy::TenantError;

#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error(transparent)]
    Phase(#[from] PhaseError),

    #[error(transparent)]
    Tenant(#[from] TenantError),

    #[error(transparent)]
    RateLimit(#[from] RateLimitError),

    #[error(transparent)]
    Quota(#[from] QuotaError),

    #[error(transparent)]
    PromptSafety(#[from] PromptSafetyError),

    #[error(transparent)]
    Circuit(#[from] CircuitError),

    #[error("inference call exceeded its time budget")]
    InferenceTimeout,

    #[error(transparent)]
    Approval(#[from] ApprovalError),
}

impl AdmissionError {
    /// Stable machine-readable tag for the `{ error_code, message, ... }`
    /// shape external callers receive.
    pub fn error_code(&self) -> &'static str {
        match self {
            AdmissionError::Phase(PhaseError::AIDisabled) => "ai_disabled",
            AdmissionError::Phase(PhaseError::PhaseViolation { .. }) => "phase_violation",
            AdmissionError::Tenant(_) => "tenant_context_error",
            AdmissionError::RateLimit(_) => "rate_limit_exceeded",
            AdmissionError::Quota(_) => "quota_exceeded",
            AdmissionError::PromptSafety(PromptSafetyError::PromptUnsafe { .. }) => "prompt_unsafe",
            AdmissionError::PromptSafety(PromptSafetyError::OutputValidationError { .. }) => {
                "output_validation_error"
            }
            AdmissionError::Circuit(_) => "circuit_open",
            AdmissionError::InferenceTimeout => "inference_timeout",
            AdmissionError::Approval(_) => "approval_required",
        }
    }

    /// Seconds the caller should wait before retrying, when known.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            AdmissionError::RateLimit(RateLimitError::RateLimitExceeded { retry_after_secs }) => {
                Some(*retry_after_secs)
            }
            AdmissionError::Quota(QuotaError::QuotaExceeded { retry_after_day_secs, .. }) => {
                Some(*retry_after_day_secs)
            }
            AdmissionError::Circuit(CircuitError::CircuitOpen { retry_after_secs, .. }) => {
                Some(*retry_after_secs)
            }
            _ => None,
        }
    }
}
