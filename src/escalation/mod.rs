use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::lexicon::{
    contains_any_phrase, COMPLIANCE_PHRASES, HIGH_RISK_AMBIGUOUS_PHRASES, OBJECTION_PHRASES,
    PRICING_CONTRACT_PHRASES,
};

/// Why a signal needs a human. Ordered the way phase 1 collects them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationReason {
    Objection,
    PricingOrContract,
    NegativeSentiment,
    ComplianceSensitive,
    UnknownHighRisk,
}

impl EscalationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Objection => "objection",
            Self::PricingOrContract => "pricing_or_contract",
            Self::NegativeSentiment => "negative_sentiment",
            Self::ComplianceSensitive => "compliance_sensitive",
            Self::UnknownHighRisk => "unknown_high_risk",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Call,
    Sms,
    Email,
    Chat,
    Other,
}

impl Channel {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "call" => Some(Self::Call),
            "sms" => Some(Self::Sms),
            "email" => Some(Self::Email),
            "chat" => Some(Self::Chat),
            "other" => Some(Self::Other),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Call => "call",
            Self::Sms => "sms",
            Self::Email => "email",
            Self::Chat => "chat",
            Self::Other => "other",
        }
    }
}

/// Who is asking for the action. Recorded in detector meta, never used for
/// gating here; the policy gate is where origin matters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionOrigin {
    UserDirected,
    CareAutonomous,
}

impl ActionOrigin {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "user_directed" => Some(Self::UserDirected),
            "care_autonomous" => Some(Self::CareAutonomous),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UserDirected => "user_directed",
            Self::CareAutonomous => "care_autonomous",
        }
    }
}

/// Sentiment arrives either as a label or as a score in [-1, 1].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SentimentSignal {
    Label(String),
    Score(f64),
}

impl SentimentSignal {
    /// Negative when labelled "negative" or strictly below -0.3.
    pub fn is_negative(&self) -> bool {
        match self {
            Self::Label(label) => label == "negative",
            Self::Score(score) => *score < -0.3,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EscalationInput {
    pub text: Option<String>,
    pub sentiment: Option<SentimentSignal>,
    pub channel: Option<Channel>,
    pub action_origin: Option<ActionOrigin>,
    #[serde(default)]
    pub meta: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationResult {
    pub escalate: bool,
    pub reasons: Vec<EscalationReason>,
    pub confidence: Confidence,
    pub meta: Map<String, Value>,
}

impl EscalationResult {
    pub fn has_reason(&self, reason: EscalationReason) -> bool {
        self.reasons.contains(&reason)
    }
}

/// Wire-facing entry point: anything that is not a JSON object is treated
/// as an unknown high-risk signal, never an error.
pub fn classify_escalation_value(value: &Value) -> EscalationResult {
    let Some(object) = value.as_object() else {
        let mut meta = Map::new();
        meta.insert("error".into(), json!("malformed_input"));
        return EscalationResult {
            escalate: true,
            reasons: vec![EscalationReason::UnknownHighRisk],
            confidence: Confidence::Low,
            meta,
        };
    };

    let input = EscalationInput {
        // A non-string text field degrades to "no text", per the signal model.
        text: object
            .get("text")
            .and_then(Value::as_str)
            .map(str::to_string),
        sentiment: object.get("sentiment").and_then(|v| match v {
            Value::String(label) => Some(SentimentSignal::Label(label.clone())),
            Value::Number(n) => n.as_f64().map(SentimentSignal::Score),
            _ => None,
        }),
        channel: object
            .get("channel")
            .and_then(Value::as_str)
            .and_then(Channel::parse),
        action_origin: object
            .get("action_origin")
            .and_then(Value::as_str)
            .and_then(ActionOrigin::parse),
        meta: object
            .get("meta")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default(),
    };

    classify_escalation(&input)
}

/// Pure two-phase classifier: collect reasons, then derive confidence.
pub fn classify_escalation(input: &EscalationInput) -> EscalationResult {
    let text = input.text.as_deref().unwrap_or("");

    // Phase 1: reasons, in fixed order.
    let mut reasons = Vec::new();
    let mut matched_phrases: Vec<String> = Vec::new();
    let mut pricing_match_count = 0usize;

    let objection = contains_any_phrase(text, &OBJECTION_PHRASES);
    if objection.matched {
        reasons.push(EscalationReason::Objection);
        matched_phrases.extend(objection.matches);
    }

    let pricing = contains_any_phrase(text, &PRICING_CONTRACT_PHRASES);
    if pricing.matched {
        reasons.push(EscalationReason::PricingOrContract);
        pricing_match_count = pricing.matches.len();
        matched_phrases.extend(pricing.matches);
    }

    let compliance = contains_any_phrase(text, &COMPLIANCE_PHRASES);
    if compliance.matched {
        reasons.push(EscalationReason::ComplianceSensitive);
        matched_phrases.extend(compliance.matches);
    }

    // The ambiguous list only counts when nothing stronger fired.
    if reasons.is_empty() {
        let ambiguous = contains_any_phrase(text, &HIGH_RISK_AMBIGUOUS_PHRASES);
        if ambiguous.matched {
            reasons.push(EscalationReason::UnknownHighRisk);
            matched_phrases.extend(ambiguous.matches);
        }
    }

    let negative = input
        .sentiment
        .as_ref()
        .map(SentimentSignal::is_negative)
        .unwrap_or(false);
    if negative {
        reasons.push(EscalationReason::NegativeSentiment);
    }

    // Phase 2: confidence.
    let has = |reason| reasons.contains(&reason);
    let confidence = if reasons.is_empty() {
        Confidence::High
    } else if has(EscalationReason::Objection) || has(EscalationReason::ComplianceSensitive) {
        Confidence::High
    } else if reasons == [EscalationReason::UnknownHighRisk] {
        Confidence::Low
    } else if has(EscalationReason::PricingOrContract) && pricing_match_count > 2 {
        Confidence::High
    } else {
        // Pricing with 1-2 matches, negative sentiment alone, or any
        // pricing + sentiment combination.
        Confidence::Medium
    };

    let mut meta = input.meta.clone();
    meta.insert("match_count".into(), json!(matched_phrases.len()));
    if !matched_phrases.is_empty() {
        meta.insert("matched_phrases".into(), json!(matched_phrases));
    }
    if let Some(channel) = input.channel {
        meta.insert("channel".into(), json!(channel.as_str()));
    }
    if let Some(origin) = input.action_origin {
        meta.insert("action_origin".into(), json!(origin.as_str()));
    }

    EscalationResult {
        escalate: !reasons.is_empty(),
        reasons,
        confidence,
        meta,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input_with_text(text: &str) -> EscalationInput {
        EscalationInput {
            text: Some(text.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_empty_text_does_not_escalate() {
        let result = classify_escalation(&input_with_text(""));
        assert!(!result.escalate);
        assert!(result.reasons.is_empty());
        assert_eq!(result.confidence, Confidence::High);
        assert_eq!(result.meta["match_count"], 0);
    }

    #[test]
    fn test_objection_with_negative_sentiment_is_high() {
        let input = EscalationInput {
            text: Some("not interested please stop calling".into()),
            sentiment: Some(SentimentSignal::Label("negative".into())),
            ..Default::default()
        };
        let result = classify_escalation(&input);

        assert!(result.escalate);
        assert_eq!(
            result.reasons,
            vec![
                EscalationReason::Objection,
                EscalationReason::NegativeSentiment
            ]
        );
        assert_eq!(result.confidence, Confidence::High);
        assert_eq!(result.meta["match_count"], 2);
    }

    #[test]
    fn test_sentiment_threshold_is_exclusive() {
        assert!(!SentimentSignal::Score(-0.3).is_negative());
        assert!(SentimentSignal::Score(-0.300001).is_negative());
        assert!(!SentimentSignal::Score(0.9).is_negative());
        assert!(SentimentSignal::Label("negative".into()).is_negative());
        assert!(!SentimentSignal::Label("neutral".into()).is_negative());
    }

    #[test]
    fn test_pricing_alone_is_medium() {
        let result = classify_escalation(&input_with_text("what is your pricing?"));
        assert!(result.escalate);
        assert_eq!(result.reasons, vec![EscalationReason::PricingOrContract]);
        assert_eq!(result.confidence, Confidence::Medium);
    }

    #[test]
    fn test_many_pricing_matches_raise_confidence() {
        let result = classify_escalation(&input_with_text(
            "please send a quote, the invoice, and the contract with pricing",
        ));
        assert_eq!(result.reasons, vec![EscalationReason::PricingOrContract]);
        assert_eq!(result.confidence, Confidence::High);
    }

    #[test]
    fn test_ambiguous_only_checked_when_nothing_stronger_fired() {
        let result = classify_escalation(&input_with_text("I want to escalate this now"));
        assert_eq!(result.reasons, vec![EscalationReason::UnknownHighRisk]);
        assert_eq!(result.confidence, Confidence::Low);

        let result = classify_escalation(&input_with_text(
            "I want to escalate this pricing discussion",
        ));
        assert_eq!(result.reasons, vec![EscalationReason::PricingOrContract]);
    }

    #[test]
    fn test_compliance_is_always_high() {
        let result = classify_escalation(&input_with_text("delete my data under gdpr"));
        assert!(result.has_reason(EscalationReason::ComplianceSensitive));
        assert_eq!(result.confidence, Confidence::High);
    }

    #[test]
    fn test_negative_sentiment_alone_is_medium() {
        let input = EscalationInput {
            sentiment: Some(SentimentSignal::Score(-0.8)),
            ..Default::default()
        };
        let result = classify_escalation(&input);
        assert_eq!(result.reasons, vec![EscalationReason::NegativeSentiment]);
        assert_eq!(result.confidence, Confidence::Medium);
    }

    #[test]
    fn test_malformed_value_escalates_low() {
        let result = classify_escalation_value(&serde_json::json!("just a string"));
        assert!(result.escalate);
        assert_eq!(result.reasons, vec![EscalationReason::UnknownHighRisk]);
        assert_eq!(result.confidence, Confidence::Low);
        assert_eq!(result.meta["error"], "malformed_input");
    }

    #[test]
    fn test_value_entry_tolerates_non_string_text() {
        let result = classify_escalation_value(&serde_json::json!({
            "text": 42,
            "sentiment": -0.9,
        }));
        assert_eq!(result.reasons, vec![EscalationReason::NegativeSentiment]);
    }

    #[test]
    fn test_meta_records_channel_and_origin() {
        let input = EscalationInput {
            text: Some("hello there".into()),
            channel: Some(Channel::Email),
            action_origin: Some(ActionOrigin::CareAutonomous),
            ..Default::default()
        };
        let result = classify_escalation(&input);
        assert!(!result.escalate);
        assert_eq!(result.meta["channel"], "email");
        assert_eq!(result.meta["action_origin"], "care_autonomous");
    }
}
