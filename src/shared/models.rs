use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Closed set of CRM record kinds the orchestrator is allowed to observe.
/// Anything else is rejected at the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Lead,
    Contact,
    Account,
    Opportunity,
    Activity,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lead => "lead",
            Self::Contact => "contact",
            Self::Account => "account",
            Self::Opportunity => "opportunity",
            Self::Activity => "activity",
        }
    }

    pub fn parse(value: &str) -> Result<Self, ValidationError> {
        match value {
            "lead" => Ok(Self::Lead),
            "contact" => Ok(Self::Contact),
            "account" => Ok(Self::Account),
            "opportunity" => Ok(Self::Opportunity),
            "activity" => Ok(Self::Activity),
            other => Err(ValidationError::UnknownEntityType(other.to_string())),
        }
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// C.A.R.E. lifecycle state attached to a CRM entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CareState {
    Unaware,
    Aware,
    Engaged,
    Evaluating,
    Committed,
    Active,
    AtRisk,
    Dormant,
    Reactivated,
    Lost,
}

impl CareState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unaware => "unaware",
            Self::Aware => "aware",
            Self::Engaged => "engaged",
            Self::Evaluating => "evaluating",
            Self::Committed => "committed",
            Self::Active => "active",
            Self::AtRisk => "at_risk",
            Self::Dormant => "dormant",
            Self::Reactivated => "reactivated",
            Self::Lost => "lost",
        }
    }

    pub fn parse(value: &str) -> Result<Self, ValidationError> {
        match value {
            "unaware" => Ok(Self::Unaware),
            "aware" => Ok(Self::Aware),
            "engaged" => Ok(Self::Engaged),
            "evaluating" => Ok(Self::Evaluating),
            "committed" => Ok(Self::Committed),
            "active" => Ok(Self::Active),
            "at_risk" => Ok(Self::AtRisk),
            "dormant" => Ok(Self::Dormant),
            "reactivated" => Ok(Self::Reactivated),
            "lost" => Ok(Self::Lost),
            other => Err(ValidationError::UnknownCareState(other.to_string())),
        }
    }
}

impl Default for CareState {
    fn default() -> Self {
        Self::Unaware
    }
}

impl std::fmt::Display for CareState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The (tenant, type, id) triple identifying one CRM record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub tenant_id: Uuid,
    pub entity_type: EntityType,
    pub entity_id: Uuid,
}

impl EntityRef {
    pub fn new(tenant_id: Uuid, entity_type: EntityType, entity_id: Uuid) -> Self {
        Self {
            tenant_id,
            entity_type,
            entity_id,
        }
    }
}

impl std::fmt::Display for EntityRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.tenant_id, self.entity_type, self.entity_id
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EscalationStatus {
    Open,
    Closed,
}

/// One row per entity; created lazily on the first signal, never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CareStateRecord {
    pub entity: EntityRef,
    pub care_state: CareState,
    pub hands_off_enabled: bool,
    pub escalation_status: Option<EscalationStatus>,
    pub last_signal_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CareStateRecord {
    pub fn new(entity: EntityRef) -> Self {
        let now = Utc::now();
        Self {
            entity,
            care_state: CareState::default(),
            hands_off_enabled: false,
            escalation_status: None,
            last_signal_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CareEventType {
    StateProposed,
    StateApplied,
    EscalationOpened,
    EscalationClosed,
    ActionCandidate,
    ActionSkipped,
    SignalRecorded,
}

impl CareEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StateProposed => "state_proposed",
            Self::StateApplied => "state_applied",
            Self::EscalationOpened => "escalation_opened",
            Self::EscalationClosed => "escalation_closed",
            Self::ActionCandidate => "action_candidate",
            Self::ActionSkipped => "action_skipped",
            Self::SignalRecorded => "signal_recorded",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActorType {
    System,
    User,
    Agent,
}

impl Default for ActorType {
    fn default() -> Self {
        Self::System
    }
}

/// Append-only history row. `reason` must be non-empty; the store layer
/// rejects rows that violate this.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CareHistoryEvent {
    pub event_id: Uuid,
    pub entity: EntityRef,
    pub from_state: Option<CareState>,
    pub to_state: Option<CareState>,
    pub event_type: CareEventType,
    pub reason: String,
    #[serde(default)]
    pub meta: Map<String, Value>,
    pub actor_type: ActorType,
    pub actor_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Everything the orchestrator knows about an entity's recent activity.
/// Every field is optional; absence means "no signal".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CareSignals {
    pub last_inbound_at: Option<DateTime<Utc>>,
    pub last_outbound_at: Option<DateTime<Utc>>,
    pub has_bidirectional: Option<bool>,
    pub proposal_sent: Option<bool>,
    pub commitment_recorded: Option<bool>,
    pub negative_sentiment: Option<bool>,
    pub explicit_rejection: Option<bool>,
    pub silence_days: Option<i64>,
    pub meeting_scheduled: Option<bool>,
    pub meeting_completed: Option<bool>,
    pub contract_signed: Option<bool>,
    pub payment_received: Option<bool>,
    pub engagement_score: Option<f64>,
    #[serde(default)]
    pub meta: Map<String, Value>,
}

/// Closed set of conditions the trigger worker can derive from snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    LeadStagnant,
    DealDecay,
    DealRegression,
    AccountRisk,
    ActivityOverdue,
    ContactInactive,
    OpportunityHot,
    FollowupNeeded,
}

impl TriggerType {
    pub const ALL: [TriggerType; 8] = [
        Self::LeadStagnant,
        Self::DealDecay,
        Self::DealRegression,
        Self::AccountRisk,
        Self::ActivityOverdue,
        Self::ContactInactive,
        Self::OpportunityHot,
        Self::FollowupNeeded,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LeadStagnant => "lead_stagnant",
            Self::DealDecay => "deal_decay",
            Self::DealRegression => "deal_regression",
            Self::AccountRisk => "account_risk",
            Self::ActivityOverdue => "activity_overdue",
            Self::ContactInactive => "contact_inactive",
            Self::OpportunityHot => "opportunity_hot",
            Self::FollowupNeeded => "followup_needed",
        }
    }

    pub fn parse(value: &str) -> Result<Self, ValidationError> {
        match value {
            "lead_stagnant" => Ok(Self::LeadStagnant),
            "deal_decay" => Ok(Self::DealDecay),
            "deal_regression" => Ok(Self::DealRegression),
            "account_risk" => Ok(Self::AccountRisk),
            "activity_overdue" => Ok(Self::ActivityOverdue),
            "contact_inactive" => Ok(Self::ContactInactive),
            "opportunity_hot" => Ok(Self::OpportunityHot),
            "followup_needed" => Ok(Self::FollowupNeeded),
            other => Err(ValidationError::UnknownTriggerType(other.to_string())),
        }
    }

    /// Default urgency when the candidate context carries none.
    pub fn default_priority(&self) -> SuggestionPriority {
        match self {
            Self::AccountRisk => SuggestionPriority::Critical,
            Self::OpportunityHot | Self::DealRegression | Self::ActivityOverdue => {
                SuggestionPriority::High
            }
            Self::DealDecay | Self::LeadStagnant | Self::FollowupNeeded => {
                SuggestionPriority::Normal
            }
            Self::ContactInactive => SuggestionPriority::Low,
        }
    }
}

impl std::fmt::Display for TriggerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered low → critical so worker tie-breaks can use `Ord` directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuggestionPriority {
    Low,
    Normal,
    High,
    Critical,
}

impl SuggestionPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "low" => Some(Self::Low),
            "normal" => Some(Self::Normal),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }
}

impl Default for SuggestionPriority {
    fn default() -> Self {
        Self::Normal
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuggestionStatus {
    Pending,
    Approved,
    Rejected,
    Applied,
}

impl SuggestionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Applied => "applied",
        }
    }
}

/// The tool invocation a suggestion proposes. Never executed by this crate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuggestedAction {
    pub tool_name: String,
    pub tool_args: Value,
}

/// Terminal classification of one suggestion-gate invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeType {
    SuggestionCreated,
    DuplicateSuppressed,
    GenerationFailed,
    ConstraintViolation,
    Error,
}

impl OutcomeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SuggestionCreated => "suggestion_created",
            Self::DuplicateSuppressed => "duplicate_suppressed",
            Self::GenerationFailed => "generation_failed",
            Self::ConstraintViolation => "constraint_violation",
            Self::Error => "error",
        }
    }
}

/// Stored action proposal, gated behind user approval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Suggestion {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub trigger_id: TriggerType,
    pub record_type: EntityType,
    pub record_id: Uuid,
    pub action: SuggestedAction,
    pub confidence: f64,
    pub reasoning: String,
    pub priority: SuggestionPriority,
    pub status: SuggestionStatus,
    pub outcome_type: OutcomeType,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Insert payload for a new pending suggestion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSuggestion {
    pub tenant_id: Uuid,
    pub trigger_id: TriggerType,
    pub record_type: EntityType,
    pub record_id: Uuid,
    pub action: SuggestedAction,
    pub confidence: f64,
    pub reasoning: String,
    pub priority: SuggestionPriority,
    pub status: SuggestionStatus,
    pub outcome_type: OutcomeType,
}

/// One trigger condition derived for one record in one scan cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerData {
    pub trigger_id: TriggerType,
    pub record_type: EntityType,
    pub record_id: Uuid,
    #[serde(default)]
    pub context: Map<String, Value>,
    pub priority: SuggestionPriority,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigSource {
    Database,
    Environment,
}

/// Per-tenant workflow configuration, resolved through the cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantCareConfig {
    pub tenant_id: Uuid,
    pub workflow_id: Option<String>,
    pub webhook_url: Option<String>,
    pub webhook_secret: Option<String>,
    pub is_enabled: bool,
    pub state_write_enabled: bool,
    pub shadow_mode: bool,
    pub webhook_timeout_ms: u64,
    pub webhook_max_retries: u32,
    pub source: ConfigSource,
}

impl TenantCareConfig {
    /// URL the workflow webhook goes to: the explicit URL if set, otherwise
    /// composed from the base URL and workflow id.
    pub fn effective_webhook_url(&self, base_url: &str) -> Option<String> {
        if let Some(url) = &self.webhook_url {
            if !url.is_empty() {
                return Some(url.clone());
            }
        }
        match &self.workflow_id {
            Some(id) if !id.is_empty() && !base_url.is_empty() => {
                Some(format!("{}/{}", base_url.trim_end_matches('/'), id))
            }
            _ => None,
        }
    }

    /// Enabled only when the flag is set and a webhook URL resolves.
    pub fn effectively_enabled(&self, base_url: &str) -> bool {
        self.is_enabled && self.effective_webhook_url(base_url).is_some()
    }
}

/// Validation failures. These never reach the store.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("unknown entity type: {0}")]
    UnknownEntityType(String),
    #[error("unknown care state: {0}")]
    UnknownCareState(String),
    #[error("unknown trigger type: {0}")]
    UnknownTriggerType(String),
    #[error("transition reason must be non-empty")]
    EmptyReason,
    #[error("invalid suggestion status transition: {0} -> {1}")]
    InvalidStatusTransition(&'static str, &'static str),
}
