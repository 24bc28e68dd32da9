//! Error taxonomy for the gate crate.
//!
//! Each variant is a distinct control-flow outcome, not a generic failure; callers
//! are expected to match on it rather than treat it as an opaque `anyhow::Error`.

use thiserror::Error;

/// Errors raised by the phase gate (§4.A).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PhaseError {
    #[error("operation requires phase {required:?}, current phase is {current:?}")]
    PhaseViolation { current: crate::phase::Phase, required: crate::phase::Phase },

    #[error("AI governance is disabled")]
    AIDisabled,
}

/// Errors raised by the rate limiter (§4.D).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RateLimitError {
    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimitExceeded { retry_after_secs: u64 },
}

/// Errors raised by the usage/quota tracker (§4.C).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QuotaError {
    #[error("quota exceeded: {current}/{limit}, resets in {retry_after_day_secs}s")]
    QuotaExceeded {
        current: u64,
        limit: u64,
        retry_after_day_secs: u64,
    },
}

/// Errors raised by the circuit breaker (§4.E).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CircuitError {
    #[error("circuit '{circuit}' is open, retry after {retry_after_secs}s")]
    CircuitOpen { circuit: String, retry_after_secs: u64 },
}

/// Errors raised by the prompt safety pipeline (§4.F).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PromptSafetyError {
    #[error("prompt rejected: risk score {risk_score:.2} >= threshold {threshold:.2}")]
    PromptUnsafe { risk_score: f64, threshold: f64 },

    #[error("output failed validation at {field_path}: {reason}")]
    OutputValidationError { field_path: String, reason: String },
}
