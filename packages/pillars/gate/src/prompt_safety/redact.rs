//! PII/PHI redactor — a fixed catalogue of detectors with a configurable
//! allowlist of safe tokens, applied in descending start-offset order so
//! substitutions never shift the offsets of detections not yet applied.
//!
//! Placeholder tokens are domain-neutral English (`[ID]`, `[PHONE]`,
//! `[DIAGNOSIS]`, ...) rather than tied to any one jurisdiction's identifier
//! formats.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PiiKind {
    NationalId,
    Phone,
    Email,
    Iban,
    CreditCard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PhiKind {
    Diagnosis,
    MedicalRecord,
    Medication,
    Condition,
}

pub fn pii_placeholder(kind: PiiKind) -> &'static str {
    match kind {
        PiiKind::NationalId => "[ID]",
        PiiKind::Phone => "[PHONE]",
        PiiKind::Email => "[EMAIL]",
        PiiKind::Iban => "[IBAN]",
        PiiKind::CreditCard => "[CARD]",
    }
}

pub fn phi_placeholder(kind: PhiKind) -> &'static str {
    match kind {
        PhiKind::Diagnosis => "[DIAGNOSIS]",
        PhiKind::MedicalRecord => "[MEDICAL_RECORD]",
        PhiKind::Medication => "[MEDICATION]",
        PhiKind::Condition => "[CONDITION]",
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PiiDetection {
    pub kind: PiiKind,
    pub value: String,
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct PhiDetection {
    pub kind: PhiKind,
    pub value: String,
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RedactResult {
    pub redacted: String,
    pub pii: Vec<PiiDetection>,
    pub phi: Vec<PhiDetection>,
}

static NATIONAL_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b[1-9]\d{10}\b").unwrap());
static PHONE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:\+?\d{1,3})?[\s.-]?(?:\d{3})[\s.-]?\d{3}[\s.-]?\d{2}[\s.-]?\d{2}\b").unwrap()
});
static EMAIL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").unwrap());
static IBAN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b[A-Z]{2}\s?\d{2}\s?\d{4}\s?\d{4}\s?\d{4}\s?\d{4}\s?\d{4}\s?\d{0,2}\b")
        .unwrap()
});
static CREDIT_CARD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(?:\d{4}[\s-]?){3}\d{4}\b").unwrap());

static DIAGNOSIS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b[A-Z]\d{2}(?:\.\d{1,2})?\b").unwrap());
static MEDICAL_RECORD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:MRN|HN)[:\s]*\d{6,12}\b").unwrap());

const MEDICATION_KEYWORDS: &[&str] = &[
    "aspirin",
    "ibuprofen",
    "metformin",
    "atorvastatin",
    "omeprazole",
    "amoxicillin",
    "lisinopril",
];

const CONDITION_KEYWORDS: &[&str] = &[
    "diabetes",
    "hypertension",
    "cancer",
    "tumor",
    "hiv",
    "depression",
    "anxiety",
    "schizophrenia",
];

/// Detectors honor an allowlist of safe tokens that suppress matches, per
/// spec §4.F.2.
#[derive(Debug, Clone, Default)]
pub struct Allowlist(HashSet<String>);

impl Allowlist {
    pub fn new(tokens: impl IntoIterator<Item = String>) -> Self {
        Self(tokens.into_iter().map(|t| t.to_lowercase()).collect())
    }

    fn allows(&self, value: &str) -> bool {
        self.0.contains(&value.to_lowercase())
    }
}

fn word_boundary_ok(text: &str, start: usize, end: usize) -> bool {
    let before_ok = text[..start]
        .chars()
        .next_back()
        .map(|c| !c.is_alphanumeric())
        .unwrap_or(true);
    let after_ok = text[end..]
        .chars()
        .next()
        .map(|c| !c.is_alphanumeric())
        .unwrap_or(true);
    before_ok && after_ok
}

fn detect_pii(text: &str, allowlist: &Allowlist) -> Vec<PiiDetection> {
    let mut out = Vec::new();
    for (regex, kind) in [
        (&*NATIONAL_ID, PiiKind::NationalId),
        (&*PHONE, PiiKind::Phone),
        (&*EMAIL, PiiKind::Email),
        (&*IBAN, PiiKind::Iban),
        (&*CREDIT_CARD, PiiKind::CreditCard),
    ] {
        for m in regex.find_iter(text) {
            if !allowlist.allows(m.as_str()) {
                out.push(PiiDetection {
                    kind,
                    value: m.as_str().to_string(),
                    start: m.start(),
                    end: m.end(),
                });
            }
        }
    }
    out
}

fn detect_keyword(text: &str, keywords: &[&str], kind: PhiKind, allowlist: &Allowlist) -> Vec<PhiDetection> {
    let lower = text.to_lowercase();
    let mut out = Vec::new();
    for keyword in keywords {
        let mut search_from = 0;
        while let Some(offset) = lower[search_from..].find(keyword) {
            let start = search_from + offset;
            let end = start + keyword.len();
            if word_boundary_ok(&lower, start, end) {
                let value = &text[start..end];
                if !allowlist.allows(value) {
                    out.push(PhiDetection {
                        kind,
                        value: value.to_string(),
                        start,
                        end,
                    });
                }
            }
            search_from = start + 1;
        }
    }
    out
}

fn detect_phi(text: &str, allowlist: &Allowlist) -> Vec<PhiDetection> {
    let mut out = Vec::new();
    for m in DIAGNOSIS.find_iter(text) {
        if !allowlist.allows(m.as_str()) {
            out.push(PhiDetection {
                kind: PhiKind::Diagnosis,
                value: m.as_str().to_string(),
                start: m.start(),
                end: m.end(),
            });
        }
    }
    for m in MEDICAL_RECORD.find_iter(text) {
        if !allowlist.allows(m.as_str()) {
            out.push(PhiDetection {
                kind: PhiKind::MedicalRecord,
                value: m.as_str().to_string(),
                start: m.start(),
                end: m.end(),
            });
        }
    }
    out.extend(detect_keyword(text, MEDICATION_KEYWORDS, PhiKind::Medication, allowlist));
    out.extend(detect_keyword(text, CONDITION_KEYWORDS, PhiKind::Condition, allowlist));
    out
}

/// Detect and redact PII/PHI. Applies substitutions in descending start-offset
/// order so earlier replacements never shift the byte ranges of detections not
/// yet applied (spec §4.F.2, P8).
pub fn redact(text: &str, allowlist: &Allowlist) -> RedactResult {
    if text.is_empty() {
        return RedactResult {
            redacted: String::new(),
            pii: Vec::new(),
            phi: Vec::new(),
        };
    }

    let pii = detect_pii(text, allowlist);
    let phi = detect_phi(text, allowlist);

    let mut spans: Vec<(usize, usize, &'static str)> = pii
        .iter()
        .map(|d| (d.start, d.end, pii_placeholder(d.kind)))
        .chain(phi.iter().map(|d| (d.start, d.end, phi_placeholder(d.kind))))
        .collect();
    // Process right-to-left (descending start, widest-first on ties) so a
    // `replace_range` call never shifts the byte offsets of a span not yet
    // applied. Two detector classes can report spans that overlap without
    // sharing a start (e.g. a credit-card run and a phone pattern both firing
    // on the same digits) — an overlapping span is clipped to its
    // not-yet-covered prefix rather than dropped whole, so no raw detected
    // text survives in `redacted` even though it wasn't the widest match.
    spans.sort_by(|a, b| b.0.cmp(&a.0).then(b.1.cmp(&a.1)));

    let mut redacted = text.to_string();
    let mut next_valid_end = text.len();
    for (start, end, placeholder) in spans {
        let end = end.min(next_valid_end);
        if end <= start {
            // Fully covered by a span processed earlier (further right).
            continue;
        }
        redacted.replace_range(start..end, placeholder);
        next_valid_end = start;
    }

    RedactResult { redacted, pii, phi }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_and_redacts_email() {
        let r = redact("contact me at jane.doe@example.com please", &Allowlist::default());
        assert_eq!(r.pii.len(), 1);
        assert_eq!(r.pii[0].kind, PiiKind::Email);
        assert!(r.redacted.contains("[EMAIL]"));
        assert!(!r.redacted.contains("jane.doe@example.com"));
    }

    #[test]
    fn detects_credit_card_and_iban() {
        let r = redact(
            "card 4111 1111 1111 1111 and iban GB29 NWBK 6016 1331 9268 19",
            &Allowlist::default(),
        );
        assert!(r.pii.iter().any(|d| d.kind == PiiKind::CreditCard));
        assert!(r.pii.iter().any(|d| d.kind == PiiKind::Iban));
    }

    #[test]
    fn detects_medication_and_condition_keywords() {
        let r = redact(
            "patient has diabetes and takes metformin daily",
            &Allowlist::default(),
        );
        assert!(r.phi.iter().any(|d| d.kind == PhiKind::Condition));
        assert!(r.phi.iter().any(|d| d.kind == PhiKind::Medication));
        assert!(r.redacted.contains("[CONDITION]"));
        assert!(r.redacted.contains("[MEDICATION]"));
    }

    #[test]
    fn allowlisted_tokens_are_not_redacted() {
        let allowlist = Allowlist::new(["support@example.com".to_string()]);
        let r = redact("email support@example.com for help", &allowlist);
        assert!(r.pii.is_empty());
        assert!(r.redacted.contains("support@example.com"));
    }

    // P8: redaction totality — every detected span becomes exactly its
    // placeholder, and multiple detections don't corrupt each other's offsets.
    #[test]
    fn multiple_detections_are_all_redacted_without_offset_corruption() {
        let text = "Email a@b.com, call 212 555 12 34, email c@d.com again";
        let r = redact(text, &Allowlist::default());
        assert_eq!(r.pii.len(), 3);
        assert!(!r.redacted.contains("a@b.com"));
        assert!(!r.redacted.contains("c@d.com"));
        assert_eq!(r.redacted.matches("[EMAIL]").count(), 2);
    }

    #[test]
    fn empty_input_yields_empty_result() {
        let r = redact("", &Allowlist::default());
        assert!(r.redacted.is_empty());
        assert!(r.pii.is_empty());
    }

    // A long unbroken digit run can be matched by more than one detector
    // (national id vs. phone); overlapping spans must not panic on
    // replace_range, and the text must still come out fully substituted.
    #[test]
    fn overlapping_detections_do_not_panic_and_still_redact() {
        let r = redact("id 12345678901 on file", &Allowlist::default());
        assert!(!r.redacted.contains("12345678901"));
    }

    // Regression: CREDIT_CARD matches the full 16-digit run while PHONE (no
    // leading `\b`) matches a narrower sub-range of the same digits starting
    // a few bytes later. Sorting descending-by-start processes PHONE first;
    // the clip (not drop) of CREDIT_CARD's now-overlapping span must still
    // redact its non-overlapping prefix so no raw card digits leak through.
    #[test]
    fn partially_overlapping_spans_with_different_starts_leak_no_raw_digits() {
        let r = redact("card 4111111111111111 here", &Allowlist::default());
        assert!(r.pii.iter().any(|d| d.kind == PiiKind::CreditCard));
        assert!(!r.redacted.contains("4111111111111111"));
        for run in ["411", "111", "1111"] {
            assert!(
                !r.redacted.contains(run),
                "raw card digits `{run}` leaked into: {}",
                r.redacted
            );
        }
    }
}
