use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::escalation::ActionOrigin;

/// Action kinds a suggestion may propose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposedActionType {
    Message,
    Meeting,
    Workflow,
    Task,
    Note,
    Update,
    FollowUp,
}

impl ProposedActionType {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "message" => Some(Self::Message),
            "meeting" => Some(Self::Meeting),
            "workflow" => Some(Self::Workflow),
            "task" => Some(Self::Task),
            "note" => Some(Self::Note),
            "update" => Some(Self::Update),
            "follow_up" => Some(Self::FollowUp),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Message => "message",
            Self::Meeting => "meeting",
            Self::Workflow => "workflow",
            Self::Task => "task",
            Self::Note => "note",
            Self::Update => "update",
            Self::FollowUp => "follow_up",
        }
    }

    /// Action kinds the autonomous path may take without a human.
    pub fn is_low_risk(&self) -> bool {
        matches!(self, Self::Note | Self::Task | Self::FollowUp)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyGateResult {
    Allowed,
    Escalated,
    Blocked,
}

impl PolicyGateResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Allowed => "allowed",
            Self::Escalated => "escalated",
            Self::Blocked => "blocked",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PolicyInput {
    pub action_origin: Option<ActionOrigin>,
    pub proposed_action_type: Option<ProposedActionType>,
    pub text: Option<String>,
    pub meta: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyDecision {
    pub policy_gate_result: PolicyGateResult,
    pub escalate: bool,
    pub reasons: Vec<String>,
}

fn rx(pattern: &str) -> Regex {
    Regex::new(pattern).expect("policy pattern must compile")
}

/// Text that is never sent regardless of origin. Label + pattern pairs.
static HARD_PROHIBITIONS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    vec![
        (
            "binding_commitment",
            rx(r"(?i)\b(i|we)\s+(personally\s+)?(guarantee|promise)\b|\byou have my word\b"),
        ),
        (
            "legally_binding",
            rx(r"(?i)\blegally\s+binding\b|\bthis (constitutes|is) a binding (agreement|contract)\b"),
        ),
        (
            "explicit_pricing_offer",
            rx(r"(?i)\b(i|we)\s+can\s+offer\s+(you\s+)?(a\s+price\s+of\s+)?\$\s*\d"),
        ),
        (
            "final_price_negotiation",
            rx(r"(?i)\b(final|best and final|lowest)\s+(price|offer)\b"),
        ),
        (
            "data_deletion_request",
            rx(r"(?i)\bgdpr\b|\bright to be forgotten\b|\bdelete (all\s+)?(my|your|their) data\b"),
        ),
        (
            "legal_threat",
            rx(r"(?i)\bwe will sue\b|\blegal action\b|\bcease and desist\b|\bour (lawyers|attorneys) will\b"),
        ),
    ]
});

// Impersonation is two checks combined: a human-style signature with no
// AI/system disclosure anywhere in the text.
static SIGNATURE_PATTERN: Lazy<Regex> =
    Lazy::new(|| rx(r"(?i)\b(sincerely|best regards|kind regards|warm regards|yours truly),?\s+\w"));
static AI_DISCLOSURE_PATTERN: Lazy<Regex> =
    Lazy::new(|| rx(r"(?i)\b(ai|a\.i\.|bot|assistant|automated|auto-generated|system)\b"));

/// Text the autonomous path must hand to a human.
static AUTONOMOUS_PROHIBITIONS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    vec![
        (
            "strong_guarantee",
            rx(r"(?i)\bguaranteed?\b|\b(100%|completely)\s+(certain|sure|risk[- ]free)\b"),
        ),
        (
            "negotiation_language",
            rx(r"(?i)\b(discount|negotiat(e|ion|ing)|special deal|price match)\b"),
        ),
        (
            "urgency_pressure",
            rx(r"(?i)\b(act now|limited time|expires (today|soon)|last chance|urgent(ly)?)\b"),
        ),
    ]
});

/// User-directed text that still deserves a second pair of eyes.
static USER_HIGH_RISK: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    vec![
        (
            "contract_reference",
            rx(r"(?i)\b(contract|agreement|terms and conditions|statement of work)\b"),
        ),
        (
            "large_dollar_amount",
            rx(r"\$\s*(\d{5,}|\d{2,3},\d{3}\b|\d{1,3}(,\d{3}){2,})"),
        ),
    ]
});

fn matched_labels(text: &str, patterns: &[(&'static str, Regex)]) -> Vec<String> {
    patterns
        .iter()
        .filter(|(_, pattern)| pattern.is_match(text))
        .map(|(label, _)| label.to_string())
        .collect()
}

/// Pure classifier: (origin, action type, text) -> allowed | escalated | blocked.
pub fn evaluate_policy(input: &PolicyInput) -> PolicyDecision {
    let mut reasons = Vec::new();

    let (Some(origin), Some(action_type)) = (input.action_origin, input.proposed_action_type)
    else {
        if input.action_origin.is_none() {
            reasons.push("missing_action_origin".to_string());
        }
        if input.proposed_action_type.is_none() {
            reasons.push("missing_action_type".to_string());
        }
        return PolicyDecision {
            policy_gate_result: PolicyGateResult::Blocked,
            escalate: false,
            reasons,
        };
    };

    let text = input.text.as_deref().unwrap_or("");

    // Hard prohibitions block unconditionally, whoever asked.
    let mut hard = matched_labels(text, &HARD_PROHIBITIONS);
    if SIGNATURE_PATTERN.is_match(text) && !AI_DISCLOSURE_PATTERN.is_match(text) {
        hard.push("impersonation_signature".to_string());
    }
    if !hard.is_empty() {
        return PolicyDecision {
            policy_gate_result: PolicyGateResult::Blocked,
            escalate: false,
            reasons: hard.into_iter().map(|l| format!("hard_prohibition:{l}")).collect(),
        };
    }

    match origin {
        ActionOrigin::CareAutonomous => {
            let autonomous = matched_labels(text, &AUTONOMOUS_PROHIBITIONS);
            if !autonomous.is_empty() {
                reasons.extend(
                    autonomous
                        .into_iter()
                        .map(|l| format!("autonomous_prohibition:{l}")),
                );
            }
            if !action_type.is_low_risk() {
                reasons.push(format!(
                    "autonomous_action_type_not_low_risk:{}",
                    action_type.as_str()
                ));
            }
        }
        ActionOrigin::UserDirected => {
            let high_risk = matched_labels(text, &USER_HIGH_RISK);
            reasons.extend(high_risk.into_iter().map(|l| format!("high_risk:{l}")));
        }
    }

    if !reasons.is_empty() {
        return PolicyDecision {
            policy_gate_result: PolicyGateResult::Escalated,
            escalate: true,
            reasons,
        };
    }

    PolicyDecision {
        policy_gate_result: PolicyGateResult::Allowed,
        escalate: false,
        reasons: vec!["no_policy_match".to_string()],
    }
}
