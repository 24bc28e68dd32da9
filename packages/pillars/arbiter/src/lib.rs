//! AgentKern-Arbiter: the approval gate and audit log sink.
//!
//! These two components depend on the phase gate and tenant context owned by
//! [`agentkern_tenancy`] and [`agentkern_gate`], so they live one crate up from
//! those foundations.

pub mod audit;
pub mod error;
pub mod gate;
pub mod plan;
pub mod queue;
pub mod risk;
pub mod token;

pub use audit::{AuditDrain, AuditEvent, AuditSink, EventType};
pub use error::{ApprovalError, ApprovalTokenInvalid};
pub use gate::{ApprovalGate, Evaluation};
pub use plan::{canonical_json, plan_hash, ActionPlan};
pub use queue::{ApprovalQueue, ApprovalRequest, RequestStatus};
pub use risk::{classify, Classification, RiskLevel};
pub use token::{ApprovalToken, TokenIssuer};
