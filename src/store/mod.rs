use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::shared::models::{
    CareHistoryEvent, CareState, CareStateRecord, EntityRef, EntityType, EscalationStatus,
    NewSuggestion, Suggestion, SuggestionPriority, SuggestionStatus, TenantCareConfig,
    TriggerType, ValidationError,
};

mod memory;

pub use memory::MemoryCareStore;

/// Store failures. `UniqueViolation` is the one callers branch on; it maps
/// the database's reserved unique-constraint code.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("unique constraint violation")]
    UniqueViolation,
    #[error("row not found")]
    NotFound,
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("store backend error: {0}")]
    Backend(String),
}

/// Partial update for a care-state row. `None` leaves the column alone.
#[derive(Debug, Clone, Default)]
pub struct CareStatePatch {
    pub care_state: Option<CareState>,
    pub hands_off_enabled: Option<bool>,
    pub escalation_status: Option<EscalationStatus>,
    pub last_signal_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

#[derive(Debug, Clone)]
pub struct HistoryQuery {
    pub limit: usize,
    pub order: SortOrder,
}

impl Default for HistoryQuery {
    fn default() -> Self {
        Self {
            limit: 50,
            order: SortOrder::Desc,
        }
    }
}

/// Filter for suggestion listings and the gate's cooldown check.
#[derive(Debug, Clone, Default)]
pub struct SuggestionFilter {
    pub tenant_id: Uuid,
    pub status: Option<SuggestionStatus>,
    pub trigger_id: Option<TriggerType>,
    pub priority: Option<SuggestionPriority>,
    pub record_type: Option<EntityType>,
    pub record_id: Option<Uuid>,
    pub created_after: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
    pub offset: usize,
}

/// One record the trigger scan surfaced for a tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerCandidate {
    pub record_id: Uuid,
    pub record_type: EntityType,
    #[serde(default)]
    pub context: serde_json::Map<String, serde_json::Value>,
}

/// Narrow persistence interface the core consumes. Every access is scoped
/// by tenant; the backing implementation enforces tenant isolation.
#[async_trait]
pub trait CareStore: Send + Sync {
    async fn get_care_state(
        &self,
        entity: &EntityRef,
    ) -> Result<Option<CareStateRecord>, StoreError>;

    async fn upsert_care_state(
        &self,
        entity: &EntityRef,
        patch: CareStatePatch,
    ) -> Result<CareStateRecord, StoreError>;

    /// Append-only; retries with the same `event_id` must be no-ops.
    async fn append_care_history(
        &self,
        entity: &EntityRef,
        event: CareHistoryEvent,
    ) -> Result<(), StoreError>;

    async fn get_care_history(
        &self,
        entity: &EntityRef,
        query: HistoryQuery,
    ) -> Result<Vec<CareHistoryEvent>, StoreError>;

    async fn insert_suggestion(&self, payload: NewSuggestion) -> Result<Suggestion, StoreError>;

    async fn query_suggestions(
        &self,
        filter: SuggestionFilter,
    ) -> Result<Vec<Suggestion>, StoreError>;

    async fn update_suggestion_status(
        &self,
        tenant_id: Uuid,
        suggestion_id: Uuid,
        status: SuggestionStatus,
    ) -> Result<Suggestion, StoreError>;

    async fn load_care_config(
        &self,
        tenant_id: Uuid,
    ) -> Result<Option<TenantCareConfig>, StoreError>;

    async fn scan_trigger_candidates(
        &self,
        tenant_id: Uuid,
        trigger: TriggerType,
    ) -> Result<Vec<TriggerCandidate>, StoreError>;

    async fn list_enabled_tenants(&self) -> Result<Vec<Uuid>, StoreError>;
}
