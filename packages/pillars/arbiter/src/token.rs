//! Approval tokens: binary wire format, HMAC signing, and single-use
//! validation (§4.G.3, §6).

use std::collections::HashSet;
use std::time::{SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use parking_lot::Mutex;
use rand::RngCore;
use sha2::Sha256;
use uuid::Uuid;

use crate::error::ApprovalTokenInvalid;
use crate::plan::ActionPlan;

type HmacSha256 = Hmac<Sha256>;

const WIRE_VERSION: u8 = 1;
const DEFAULT_TTL_SECONDS: i64 = 10 * 60;

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is after the epoch")
        .as_secs() as i64
}

/// A signed, single-use, time-bounded claim binding an approver's decision to
/// a specific plan hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalToken {
    pub token_id: [u8; 16],
    pub issued_at: i64,
    pub expires_at: i64,
    pub tenant_id: String,
    pub action_id: String,
    pub plan_hash: [u8; 32],
    pub approver_id: String,
}

impl ApprovalToken {
    fn signing_payload(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.push(WIRE_VERSION);
        buf.extend_from_slice(&self.token_id);
        buf.extend_from_slice(&self.issued_at.to_be_bytes());
        buf.extend_from_slice(&self.expires_at.to_be_bytes());
        buf.extend_from_slice(&(self.tenant_id.len() as u16).to_be_bytes());
        buf.extend_from_slice(self.tenant_id.as_bytes());
        buf.extend_from_slice(&(self.action_id.len() as u16).to_be_bytes());
        buf.extend_from_slice(self.action_id.as_bytes());
        buf.extend_from_slice(&self.plan_hash);
        buf.extend_from_slice(&(self.approver_id.len() as u16).to_be_bytes());
        buf.extend_from_slice(self.approver_id.as_bytes());
        buf
    }

    fn hmac(&self, key: &[u8]) -> [u8; 32] {
        let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts keys of any length");
        mac.update(&self.signing_payload());
        mac.finalize().into_bytes().into()
    }

    /// Encode as `version ‖ token_id ‖ issued_at ‖ expires_at ‖ tenant_len ‖
    /// tenant ‖ action_len ‖ action ‖ plan_hash ‖ approver_len ‖ approver ‖
    /// hmac`, base64-URL (no padding).
    pub fn encode(&self, key: &[u8]) -> String {
        let mut buf = self.signing_payload();
        buf.extend_from_slice(&self.hmac(key));
        URL_SAFE_NO_PAD.encode(buf)
    }

    pub fn decode(encoded: &str, key: &[u8]) -> Result<Self, ApprovalTokenInvalid> {
        let bytes = URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|e| ApprovalTokenInvalid::Malformed { reason: e.to_string() })?;

        let mut cursor = 0usize;
        let mut take = |n: usize| -> Result<&[u8], ApprovalTokenInvalid> {
            let end = cursor.checked_add(n).ok_or(ApprovalTokenInvalid::Malformed {
                reason: "length overflow".to_string(),
            })?;
            let slice = bytes.get(cursor..end).ok_or(ApprovalTokenInvalid::Malformed {
                reason: "unexpected end of token".to_string(),
            })?;
            cursor = end;
            Ok(slice)
        };

        let version = take(1)?[0];
        if version != WIRE_VERSION {
            return Err(ApprovalTokenInvalid::Malformed {
                reason: format!("unsupported wire version {version}"),
            });
        }

        let token_id: [u8; 16] = take(16)?.try_into().unwrap();
        let issued_at = i64::from_be_bytes(take(8)?.try_into().unwrap());
        let expires_at = i64::from_be_bytes(take(8)?.try_into().unwrap());

        let tenant_len = u16::from_be_bytes(take(2)?.try_into().unwrap()) as usize;
        let tenant_id = String::from_utf8(take(tenant_len)?.to_vec())
            .map_err(|e| ApprovalTokenInvalid::Malformed { reason: e.to_string() })?;

        let action_len = u16::from_be_bytes(take(2)?.try_into().unwrap()) as usize;
        let action_id = String::from_utf8(take(action_len)?.to_vec())
            .map_err(|e| ApprovalTokenInvalid::Malformed { reason: e.to_string() })?;

        let plan_hash: [u8; 32] = take(32)?.try_into().unwrap();

        let approver_len = u16::from_be_bytes(take(2)?.try_into().unwrap()) as usize;
        let approver_id = String::from_utf8(take(approver_len)?.to_vec())
            .map_err(|e| ApprovalTokenInvalid::Malformed { reason: e.to_string() })?;

        let claimed_mac: [u8; 32] = take(32)?.try_into().unwrap();
        if cursor != bytes.len() {
            return Err(ApprovalTokenInvalid::Malformed {
                reason: "trailing bytes after signature".to_string(),
            });
        }

        let token = ApprovalToken {
            token_id,
            issued_at,
            expires_at,
            tenant_id,
            action_id,
            plan_hash,
            approver_id,
        };

        let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts keys of any length");
        mac.update(&token.signing_payload());
        mac.verify_slice(&claimed_mac).map_err(|_| ApprovalTokenInvalid::BadSignature)?;

        Ok(token)
    }
}

/// Mints tokens and enforces single-use, plan-bound redemption.
pub struct TokenIssuer {
    key: Vec<u8>,
    ttl_seconds: i64,
    consumed: Mutex<HashSet<[u8; 16]>>,
}

impl TokenIssuer {
    pub fn new(key: Vec<u8>) -> Self {
        Self::with_ttl(key, DEFAULT_TTL_SECONDS)
    }

    pub fn with_ttl(key: Vec<u8>, ttl_seconds: i64) -> Self {
        Self { key, ttl_seconds, consumed: Mutex::new(HashSet::new()) }
    }

    pub fn mint(
        &self,
        tenant_id: &str,
        action_id: &str,
        plan_hash: [u8; 32],
        approver_id: &str,
    ) -> ApprovalToken {
        let mut id_bytes = [0u8; 16];
        rand::rng().fill_bytes(&mut id_bytes);
        let issued_at = now_unix();
        ApprovalToken {
            token_id: id_bytes,
            issued_at,
            expires_at: issued_at + self.ttl_seconds,
            tenant_id: tenant_id.to_string(),
            action_id: action_id.to_string(),
            plan_hash,
            approver_id: approver_id.to_string(),
        }
    }

    pub fn encode(&self, token: &ApprovalToken) -> String {
        token.encode(&self.key)
    }

    /// Validate a presented token against the caller's tenant and the plan
    /// currently being executed, consuming it atomically on success. On any
    /// failure the token is left untouched and can be retried with a
    /// corrected input (except `AlreadyUsed`, `Expired`, `BadSignature`,
    /// `Malformed`, which are permanent).
    pub fn validate_and_consume(
        &self,
        encoded: &str,
        caller_tenant_id: &str,
        execution_action_id: &str,
        execution_plan: &ActionPlan,
    ) -> Result<(), ApprovalTokenInvalid> {
        let token = ApprovalToken::decode(encoded, &self.key)?;

        if now_unix() >= token.expires_at {
            return Err(ApprovalTokenInvalid::Expired { expires_at: token.expires_at });
        }
        if token.tenant_id != caller_tenant_id {
            return Err(ApprovalTokenInvalid::WrongTenant);
        }
        if token.action_id != execution_action_id {
            return Err(ApprovalTokenInvalid::WrongAction);
        }
        let current_hash = crate::plan::plan_hash(execution_plan);
        let current_hash_bytes = hex_decode(&current_hash);
        if token.plan_hash != current_hash_bytes[..] {
            return Err(ApprovalTokenInvalid::PlanDrift);
        }

        let mut consumed = self.consumed.lock();
        if !consumed.insert(token.token_id) {
            return Err(ApprovalTokenInvalid::AlreadyUsed);
        }
        Ok(())
    }

    #[cfg(test)]
    pub fn reset(&self) {
        self.consumed.lock().clear();
    }
}

fn hex_decode(hex: &str) -> [u8; 32] {
    let mut out = [0u8; 32];
    for (i, byte) in out.iter_mut().enumerate() {
        let hi = hex.as_bytes()[i * 2] as char;
        let lo = hex.as_bytes()[i * 2 + 1] as char;
        *byte = (hi.to_digit(16).unwrap() as u8) << 4 | lo.to_digit(16).unwrap() as u8;
    }
    out
}

/// Unique, process-reproducible identifier for an approval request, distinct
/// from the token itself.
pub fn new_request_id() -> String {
    Uuid::new_v4().to_string()
}
