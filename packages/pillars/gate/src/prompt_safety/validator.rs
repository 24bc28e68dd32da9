//! Output validator — validates each inference output against the declared
//! schema for its expected variant, then scans the (accepted) output with the
//! redactor to detect PII leakage.

use serde::Serialize;
use serde_json::Value;

use crate::error::PromptSafetyError;
use crate::prompt_safety::redact::{self, Allowlist, RedactResult};

/// The three output variants the pipeline expects from inference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputVariant {
    Intent,
    Plan,
    Response,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidatedOutput {
    pub variant_checked: String,
    /// Leakage scan is logged, not fatal.
    pub leak_scan: LeakScan,
}

#[derive(Debug, Clone, Serialize)]
pub struct LeakScan {
    pub pii_detected: bool,
    pub phi_detected: bool,
}

fn required_fields(variant: OutputVariant) -> &'static [&'static str] {
    match variant {
        OutputVariant::Intent => &["intent", "confidence"],
        OutputVariant::Plan => &["steps", "tool_schema_versions"],
        OutputVariant::Response => &["message"],
    }
}

fn variant_name(variant: OutputVariant) -> &'static str {
    match variant {
        OutputVariant::Intent => "intent",
        OutputVariant::Plan => "plan",
        OutputVariant::Response => "response",
    }
}

const TRUNCATE_AT: usize = 500;

fn truncated(raw: &Value) -> String {
    let s = raw.to_string();
    if s.len() > TRUNCATE_AT {
        format!("{}...<truncated>", &s[..TRUNCATE_AT])
    } else {
        s
    }
}

/// Validate `output` against the schema declared for `variant`. On failure the
/// field path and reason are returned, plus a truncated capture of the raw
/// output for audit.
pub fn validate(output: &Value, variant: OutputVariant) -> Result<ValidatedOutput, PromptSafetyError> {
    let obj = output.as_object().ok_or_else(|| PromptSafetyError::OutputValidationError {
        field_path: "$".to_string(),
        reason: format!("expected a JSON object, got: {}", truncated(output)),
    })?;

    for field in required_fields(variant) {
        if !obj.contains_key(*field) {
            return Err(PromptSafetyError::OutputValidationError {
                field_path: format!("$.{field}"),
                reason: format!(
                    "missing required field `{field}` for variant `{}`; raw output: {}",
                    variant_name(variant),
                    truncated(output)
                ),
            });
        }
    }

    let leak_scan = scan_for_leakage(output);

    Ok(ValidatedOutput {
        variant_checked: variant_name(variant).to_string(),
        leak_scan,
    })
}

fn scan_for_leakage(output: &Value) -> LeakScan {
    let text = flatten_strings(output);
    let redaction: RedactResult = redact::redact(&text, &Allowlist::default());
    let pii_detected = !redaction.pii.is_empty();
    let phi_detected = !redaction.phi.is_empty();
    if pii_detected || phi_detected {
        tracing::warn!(pii_detected, phi_detected, "pii_detected");
    }
    LeakScan {
        pii_detected,
        phi_detected,
    }
}

fn flatten_strings(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(items) => items.iter().map(flatten_strings).collect::<Vec<_>>().join(" "),
        Value::Object(map) => map.values().map(flatten_strings).collect::<Vec<_>>().join(" "),
        _ => String::new(),
    }
}
