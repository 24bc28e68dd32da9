//! AgentKern-Tenancy: ambient tenant-context propagation and isolation kernel.
//!
//! Every data-scoped operation in the fabric must be attributable to exactly one
//! tenant. This crate is the single place that context is carried, read, and
//! enforced; nothing downstream is allowed to thread `tenant_id` through its own
//! ad-hoc parameter.

mod context;
mod error;

pub use context::{
    current, current_tenant_id, has_context, require_context, reset, set, spawn_with_tenant,
    with_context, BypassGuard, NonEmptyReason, Token,
};
pub use error::TenantError;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// The ambient value carried along every request path.
///
/// Owned by the request frame: created at the auth boundary, reset deterministically
/// at boundary exit. Background tasks never inherit it; they re-declare it from an
/// explicit `tenant_id` parameter (see [`spawn_with_tenant`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantContext {
    pub tenant_id: String,
    pub actor_id: String,
    pub role: String,
    pub permissions: HashSet<String>,
    pub is_impersonating: bool,
    pub real_actor_id: Option<String>,
}

impl TenantContext {
    pub fn new(tenant_id: impl Into<String>, actor_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            actor_id: actor_id.into(),
            role: "member".to_string(),
            permissions: HashSet::new(),
            is_impersonating: false,
            real_actor_id: None,
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = role.into();
        self
    }

    pub fn with_permissions(mut self, permissions: impl IntoIterator<Item = String>) -> Self {
        self.permissions = permissions.into_iter().collect();
        self
    }

    pub fn impersonating(mut self, real_actor_id: impl Into<String>) -> Self {
        self.is_impersonating = true;
        self.real_actor_id = Some(real_actor_id.into());
        self
    }

    pub fn has_permission(&self, capability: &str) -> bool {
        self.permissions.contains(capability)
    }

    /// Invariant from spec §3: no data-scoped operation executes with an empty
    /// `tenant_id` unless it explicitly enters an audited bypass scope.
    pub fn is_valid(&self) -> bool {
        !self.tenant_id.is_empty()
    }
}

/// Strict-mode behavior for a data-scoped query made with no tenant in scope and no
/// active bypass: hard error in strict mode, `tracing::warn!` in lenient mode.
///
/// This is the single choke point every repository/query layer in downstream
/// crates is expected to call before executing a tenant-scoped read or write.
pub fn assert_scoped(strict_mode: bool) -> Result<TenantContext, TenantError> {
    if context::is_bypassed() {
        return current().ok_or(TenantError::ContextRequired);
    }

    match current() {
        Some(ctx) if ctx.is_valid() => Ok(ctx),
        Some(ctx) => {
            if strict_mode {
                Err(TenantError::ContextRequired)
            } else {
                tracing::warn!(tenant_id = %ctx.tenant_id, "data-scoped query with empty tenant_id");
                Ok(ctx)
            }
        }
        None => {
            if strict_mode {
                Err(TenantError::ContextRequired)
            } else {
                tracing::warn!("data-scoped query with no tenant context installed");
                Err(TenantError::ContextRequired)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tenant_context_requires_nonempty_tenant_id() {
        let ctx = TenantContext::new("", "actor-1");
        assert!(!ctx.is_valid());
        let ctx = TenantContext::new("tenant-1", "actor-1");
        assert!(ctx.is_valid());
    }

    #[test]
    fn impersonation_records_real_actor() {
        let ctx = TenantContext::new("tenant-1", "admin-1").impersonating("real-admin-1");
        assert!(ctx.is_impersonating);
        assert_eq!(ctx.real_actor_id.as_deref(), Some("real-admin-1"));
    }

    #[test]
    fn permission_check() {
        let ctx = TenantContext::new("tenant-1", "actor-1")
            .with_permissions(["action:delete".to_string()]);
        assert!(ctx.has_permission("action:delete"));
        assert!(!ctx.has_permission("action:read"));
    }
}
