//! Error taxonomy for the arbiter crate (spec §7).

use thiserror::Error;

/// Sub-kinds of an invalid approval token, per spec §4.G.3 validation rules.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ApprovalTokenInvalid {
    #[error("token signature does not verify under the current key")]
    BadSignature,

    #[error("token expired at {expires_at}")]
    Expired { expires_at: i64 },

    #[error("token has already been used")]
    AlreadyUsed,

    #[error("plan drift: token was minted against a different plan")]
    PlanDrift,

    #[error("token tenant does not match the caller's tenant context")]
    WrongTenant,

    #[error("token action does not match the execution target")]
    WrongAction,

    #[error("token wire format is malformed: {reason}")]
    Malformed { reason: String },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ApprovalError {
    #[error("approval token invalid: {0}")]
    TokenInvalid(#[from] ApprovalTokenInvalid),

    #[error("action {action_id} requires approval")]
    ApprovalRequired { action_id: String },

    #[error("no pending approval found for action {action_id}")]
    NotFound { action_id: String },
}
