//! G.1 Risk classification — a deterministic function of an [`ActionPlan`] and
//! an optional scenario tag. Same input always yields the same level (spec
//! §4.G.1, P12).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::plan::ActionPlan;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// High or Critical require approval; Low and Medium auto-approve
    /// (spec §4.G.1).
    pub fn requires_approval(self) -> bool {
        matches!(self, RiskLevel::High | RiskLevel::Critical)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Classification {
    pub level: RiskLevel,
    pub reasoning: String,
}

const BLOCKED_PATTERNS: &[&str] = &[
    "delete_patient",
    "delete_record",
    "drop_table",
    "transfer_funds",
    "wire_transfer",
    "close_account",
    "refund",
    "issue_payment",
];

const URGENCY_KEYWORDS: &[&str] = &["urgent", "immediately", "asap", "right now"];
const EXTERNAL_LINK_MARKERS: &[&str] = &["http://", "https://"];

/// Large plans get more scrutiny: many steps increase blast radius even if no
/// single step looks individually dangerous.
const LARGE_PAYLOAD_STEP_COUNT: usize = 10;

fn step_text(step: &Value) -> String {
    step.to_string().to_lowercase()
}

fn count_distinct_dangerous_patterns(plan: &ActionPlan) -> usize {
    let mut found = std::collections::HashSet::new();
    for step in &plan.steps {
        let text = step_text(step);
        for pattern in BLOCKED_PATTERNS {
            if text.contains(pattern) {
                found.insert(*pattern);
            }
        }
    }
    found.len()
}

fn has_financial_action(plan: &ActionPlan) -> bool {
    plan.steps.iter().any(|s| {
        let text = step_text(s);
        ["transfer_funds", "wire_transfer", "issue_payment", "refund"]
            .iter()
            .any(|p| text.contains(p))
    })
}

fn has_urgency_language(plan: &ActionPlan) -> bool {
    plan.steps.iter().any(|s| {
        let text = step_text(s);
        URGENCY_KEYWORDS.iter().any(|k| text.contains(k))
    })
}

fn has_external_link(plan: &ActionPlan) -> bool {
    plan.steps.iter().any(|s| {
        let text = step_text(s);
        EXTERNAL_LINK_MARKERS.iter().any(|m| text.contains(m))
    })
}

fn is_transactional_scenario(scenario_tag: Option<&str>) -> bool {
    matches!(scenario_tag, Some(tag) if tag.eq_ignore_ascii_case("transactional"))
}

fn is_promotional_scenario(scenario_tag: Option<&str>) -> bool {
    matches!(scenario_tag, Some(tag) if tag.eq_ignore_ascii_case("promotional"))
}

/// Deterministically classify a plan's risk.
///
/// Signals: presence of blocked patterns (dangerous verbs), count of distinct
/// dangerous patterns (three or more ⇒ Critical, per spec §4.G.1), payload
/// size, scenario category, urgency language, external links, and financial
/// actions.
pub fn classify(plan: &ActionPlan, scenario_tag: Option<&str>) -> Classification {
    let distinct_dangerous = count_distinct_dangerous_patterns(plan);
    let financial = has_financial_action(plan);
    let urgency = has_urgency_language(plan);
    let external_link = has_external_link(plan);
    let large_payload = plan.steps.len() >= LARGE_PAYLOAD_STEP_COUNT;
    let transactional = is_transactional_scenario(scenario_tag);
    let promotional = is_promotional_scenario(scenario_tag);

    if distinct_dangerous >= 3 {
        return Classification {
            level: RiskLevel::Critical,
            reasoning: format!(
                "{distinct_dangerous} distinct dangerous patterns matched (threshold: 3)"
            ),
        };
    }

    if distinct_dangerous >= 1 && (financial || transactional) {
        return Classification {
            level: RiskLevel::Critical,
            reasoning: "dangerous pattern combined with a financial or transactional action"
                .to_string(),
        };
    }

    if distinct_dangerous >= 1 {
        return Classification {
            level: RiskLevel::High,
            reasoning: format!("{distinct_dangerous} dangerous pattern(s) matched"),
        };
    }

    if financial || (urgency && external_link) {
        return Classification {
            level: RiskLevel::High,
            reasoning: "financial action or urgency-plus-external-link combination".to_string(),
        };
    }

    if large_payload || urgency || external_link || transactional {
        return Classification {
            level: RiskLevel::Medium,
            reasoning: "elevated signal (large payload, urgency, external link, or transactional scenario) without a dangerous pattern".to_string(),
        };
    }

    if promotional {
        return Classification {
            level: RiskLevel::Low,
            reasoning: "promotional scenario with no elevated signals".to_string(),
        };
    }

    Classification {
        level: RiskLevel::Low,
        reasoning: "no dangerous patterns or elevated signals detected".to_string(),
    }
}
