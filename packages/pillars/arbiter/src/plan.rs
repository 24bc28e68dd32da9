//! `ActionPlan` and canonical plan hashing (spec §3, §4.G.2).
//!
//! `plan_hash = SHA-256(canonical_json(plan))`. Canonicalization sorts object
//! keys at every level, strips whitespace, normalizes strings to Unicode NFC,
//! and excludes mutable metadata the plan carries alongside its steps. Two
//! byte-identical plans always hash the same; any semantic change changes the
//! hash (P9).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use unicode_normalization::UnicodeNormalization;

/// A structured, replay-safe description of side-effecting operations proposed
/// by inference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionPlan {
    pub action_id: String,
    pub steps: Vec<Value>,
    /// Versions of the tool schemas this plan was built against; carried so
    /// drift in the underlying tool contract can be detected independently of
    /// plan-content drift (spec §3 `ActionPlan`).
    pub tool_schema_versions: Value,
    /// Mutable metadata (e.g. a UI-only display label) excluded from hashing.
    #[serde(default)]
    pub metadata: Value,
}

/// Produce the canonical JSON serialization used for hashing: keys sorted at
/// every object level (`serde_json::Map` is a `BTreeMap` in this workspace — no
/// `preserve_order` feature is enabled — so ordinary serialization already
/// yields sorted keys), no whitespace, and all string leaves normalized to NFC.
pub fn canonical_json(plan: &ActionPlan) -> String {
    let hashed = serde_json::json!({
        "action_id": plan.action_id,
        "steps": plan.steps,
        "tool_schema_versions": plan.tool_schema_versions,
    });
    let normalized = normalize_strings(hashed);
    serde_json::to_string(&normalized).expect("canonical value serializes")
}

fn normalize_strings(value: Value) -> Value {
    match value {
        Value::String(s) => Value::String(s.nfc().collect::<String>()),
        Value::Array(items) => Value::Array(items.into_iter().map(normalize_strings).collect()),
        Value::Object(map) => {
            Value::Object(map.into_iter().map(|(k, v)| (k, normalize_strings(v))).collect())
        }
        other => other,
    }
}

/// `SHA-256(canonical_json(plan))`, lowercase hex.
pub fn plan_hash(plan: &ActionPlan) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_json(plan).as_bytes());
    hex::encode(hasher.finalize())
}

/// Minimal hex encoding so the crate doesn't need a dedicated `hex` dependency
/// beyond what `sha2`'s output already gives us as a byte slice.
mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        bytes.as_ref().iter().map(|b| format!("{b:02x}")).collect()
    }
}
