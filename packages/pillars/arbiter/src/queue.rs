//! Pending-approval queue and its expiry sweeper (§4.G.4).

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;

use crate::risk::RiskLevel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RequestStatus {
    PendingApproval,
    Approved,
    Rejected,
    Expired,
    AutoApproved,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApprovalRequest {
    pub action_id: String,
    /// Plan with sensitive fields redacted for admin display; the queue never
    /// stores the raw plan used for drift checks (that lives in the token).
    pub plan_redacted: Value,
    pub plan_hash: String,
    pub risk_level: RiskLevel,
    pub risk_reasoning: String,
    pub rollback_plan: Option<Value>,
    pub required_permissions: Vec<String>,
    pub tenant_id: String,
    pub requested_by: String,
    pub created_at: i64,
    pub expires_at: i64,
    pub status: RequestStatus,
}

fn now_unix() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).expect("clock after epoch").as_secs() as i64
}

/// Tenant-indexed queue of pending approvals. A request key is its
/// `action_id`, unique within a tenant.
pub struct ApprovalQueue {
    by_tenant: Mutex<HashMap<String, HashMap<String, ApprovalRequest>>>,
}

impl ApprovalQueue {
    pub fn new() -> Self {
        Self { by_tenant: Mutex::new(HashMap::new()) }
    }

    pub fn enqueue(&self, request: ApprovalRequest) {
        let mut guard = self.by_tenant.lock();
        guard
            .entry(request.tenant_id.clone())
            .or_default()
            .insert(request.action_id.clone(), request);
    }

    pub fn get(&self, tenant_id: &str, action_id: &str) -> Option<ApprovalRequest> {
        self.by_tenant.lock().get(tenant_id)?.get(action_id).cloned()
    }

    /// Pending entries for a tenant, oldest first.
    pub fn pending_for_tenant(&self, tenant_id: &str) -> Vec<ApprovalRequest> {
        let mut pending: Vec<ApprovalRequest> = self
            .by_tenant
            .lock()
            .get(tenant_id)
            .map(|m| m.values().filter(|r| r.status == RequestStatus::PendingApproval).cloned().collect())
            .unwrap_or_default();
        pending.sort_by_key(|r| r.created_at);
        pending
    }

    pub fn set_status(&self, tenant_id: &str, action_id: &str, status: RequestStatus) -> bool {
        let mut guard = self.by_tenant.lock();
        if let Some(tenant_map) = guard.get_mut(tenant_id) {
            if let Some(entry) = tenant_map.get_mut(action_id) {
                entry.status = status;
                return true;
            }
        }
        false
    }

    /// Move every still-pending entry whose `expires_at` has passed to
    /// `Expired`. Returns the action_ids transitioned, for audit emission by
    /// the caller.
    pub fn sweep_expired(&self) -> Vec<(String, String)> {
        let now = now_unix();
        let mut swept = Vec::new();
        let mut guard = self.by_tenant.lock();
        for (tenant_id, requests) in guard.iter_mut() {
            for request in requests.values_mut() {
                if request.status == RequestStatus::PendingApproval && now >= request.expires_at {
                    request.status = RequestStatus::Expired;
                    swept.push((tenant_id.clone(), request.action_id.clone()));
                }
            }
        }
        swept
    }

    #[cfg(test)]
    pub fn clear(&self) {
        self.by_tenant.lock().clear();
    }
}

impl Default for ApprovalQueue {
    fn default() -> Self {
        Self::new()
    }
}
