use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TenantError {
    #[error("no tenant context installed for this operation")]
    ContextRequired,

    #[error("tenant context mismatch: expected {expected}, found {found}")]
    ContextMismatch { expected: String, found: String },

    #[error("bypass scope requires a non-empty reason")]
    EmptyBypassReason,
}
