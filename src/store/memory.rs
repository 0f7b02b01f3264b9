use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use super::{
    CareStatePatch, CareStore, HistoryQuery, SortOrder, StoreError, SuggestionFilter,
    TriggerCandidate,
};
use crate::shared::models::{
    CareHistoryEvent, CareStateRecord, EntityRef, NewSuggestion, Suggestion, SuggestionStatus,
    TenantCareConfig, TriggerType, ValidationError,
};

/// In-memory reference store. Enforces the same invariants a database
/// schema would: one care-state row per entity, append-only history with
/// event-id idempotency, and the unique pending-suggestion key.
#[derive(Default)]
pub struct MemoryCareStore {
    care_states: RwLock<HashMap<EntityRef, CareStateRecord>>,
    history: RwLock<HashMap<EntityRef, Vec<CareHistoryEvent>>>,
    suggestions: RwLock<Vec<Suggestion>>,
    configs: RwLock<HashMap<Uuid, TenantCareConfig>>,
    candidates: RwLock<HashMap<(Uuid, TriggerType), Vec<TriggerCandidate>>>,
    tenants: RwLock<Vec<Uuid>>,
    fail_next_insert: Mutex<Option<String>>,
    failing_scan_tenants: RwLock<Vec<Uuid>>,
}

impl MemoryCareStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn seed_config(&self, config: TenantCareConfig) {
        let tenant_id = config.tenant_id;
        self.configs.write().await.insert(tenant_id, config);
        let mut tenants = self.tenants.write().await;
        if !tenants.contains(&tenant_id) {
            tenants.push(tenant_id);
        }
    }

    pub async fn seed_candidates(
        &self,
        tenant_id: Uuid,
        trigger: TriggerType,
        candidates: Vec<TriggerCandidate>,
    ) {
        self.candidates
            .write()
            .await
            .insert((tenant_id, trigger), candidates);
        let mut tenants = self.tenants.write().await;
        if !tenants.contains(&tenant_id) {
            tenants.push(tenant_id);
        }
    }

    /// Make the next `insert_suggestion` fail with a generic backend error.
    pub async fn fail_next_insert(&self, message: &str) {
        *self.fail_next_insert.lock().await = Some(message.to_string());
    }

    /// Make every candidate scan for a tenant fail with a backend error.
    pub async fn fail_scans_for(&self, tenant_id: Uuid) {
        self.failing_scan_tenants.write().await.push(tenant_id);
    }

    pub async fn suggestion_count(&self) -> usize {
        self.suggestions.read().await.len()
    }

    pub async fn history_len(&self, entity: &EntityRef) -> usize {
        self.history
            .read()
            .await
            .get(entity)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

#[async_trait]
impl CareStore for MemoryCareStore {
    async fn get_care_state(
        &self,
        entity: &EntityRef,
    ) -> Result<Option<CareStateRecord>, StoreError> {
        Ok(self.care_states.read().await.get(entity).cloned())
    }

    async fn upsert_care_state(
        &self,
        entity: &EntityRef,
        patch: CareStatePatch,
    ) -> Result<CareStateRecord, StoreError> {
        let mut states = self.care_states.write().await;
        let record = states
            .entry(*entity)
            .or_insert_with(|| CareStateRecord::new(*entity));

        if let Some(state) = patch.care_state {
            record.care_state = state;
        }
        if let Some(hands_off) = patch.hands_off_enabled {
            record.hands_off_enabled = hands_off;
        }
        if let Some(status) = patch.escalation_status {
            record.escalation_status = Some(status);
        }
        if let Some(at) = patch.last_signal_at {
            record.last_signal_at = Some(at);
        }
        record.updated_at = Utc::now();

        Ok(record.clone())
    }

    async fn append_care_history(
        &self,
        entity: &EntityRef,
        event: CareHistoryEvent,
    ) -> Result<(), StoreError> {
        if event.reason.trim().is_empty() {
            return Err(ValidationError::EmptyReason.into());
        }

        let mut history = self.history.write().await;
        let rows = history.entry(*entity).or_default();
        // Idempotent retry: the same event id is appended once.
        if rows.iter().any(|row| row.event_id == event.event_id) {
            return Ok(());
        }
        rows.push(event);
        Ok(())
    }

    async fn get_care_history(
        &self,
        entity: &EntityRef,
        query: HistoryQuery,
    ) -> Result<Vec<CareHistoryEvent>, StoreError> {
        let history = self.history.read().await;
        let mut rows = history.get(entity).cloned().unwrap_or_default();
        rows.sort_by_key(|row| row.created_at);
        if query.order == SortOrder::Desc {
            rows.reverse();
        }
        rows.truncate(query.limit);
        Ok(rows)
    }

    async fn insert_suggestion(&self, payload: NewSuggestion) -> Result<Suggestion, StoreError> {
        if let Some(message) = self.fail_next_insert.lock().await.take() {
            return Err(StoreError::Backend(message));
        }

        let mut suggestions = self.suggestions.write().await;

        // Unique key on (tenant, trigger, record_type, record_id, pending).
        let duplicate = suggestions.iter().any(|existing| {
            existing.tenant_id == payload.tenant_id
                && existing.trigger_id == payload.trigger_id
                && existing.record_type == payload.record_type
                && existing.record_id == payload.record_id
                && existing.status == SuggestionStatus::Pending
        });
        if duplicate && payload.status == SuggestionStatus::Pending {
            return Err(StoreError::UniqueViolation);
        }

        let now = Utc::now();
        let suggestion = Suggestion {
            id: Uuid::new_v4(),
            tenant_id: payload.tenant_id,
            trigger_id: payload.trigger_id,
            record_type: payload.record_type,
            record_id: payload.record_id,
            action: payload.action,
            confidence: payload.confidence,
            reasoning: payload.reasoning,
            priority: payload.priority,
            status: payload.status,
            outcome_type: payload.outcome_type,
            created_at: now,
            updated_at: now,
        };
        suggestions.push(suggestion.clone());
        Ok(suggestion)
    }

    async fn query_suggestions(
        &self,
        filter: SuggestionFilter,
    ) -> Result<Vec<Suggestion>, StoreError> {
        let suggestions = self.suggestions.read().await;
        let mut rows: Vec<Suggestion> = suggestions
            .iter()
            .filter(|s| s.tenant_id == filter.tenant_id)
            .filter(|s| filter.status.map_or(true, |status| s.status == status))
            .filter(|s| filter.trigger_id.map_or(true, |t| s.trigger_id == t))
            .filter(|s| filter.priority.map_or(true, |p| s.priority == p))
            .filter(|s| filter.record_type.map_or(true, |t| s.record_type == t))
            .filter(|s| filter.record_id.map_or(true, |id| s.record_id == id))
            .filter(|s| {
                filter
                    .created_after
                    .map_or(true, |after| s.created_at >= after)
            })
            .cloned()
            .collect();

        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let rows = rows
            .into_iter()
            .skip(filter.offset)
            .take(filter.limit.unwrap_or(usize::MAX))
            .collect();
        Ok(rows)
    }

    async fn update_suggestion_status(
        &self,
        tenant_id: Uuid,
        suggestion_id: Uuid,
        status: SuggestionStatus,
    ) -> Result<Suggestion, StoreError> {
        let mut suggestions = self.suggestions.write().await;
        let suggestion = suggestions
            .iter_mut()
            .find(|s| s.tenant_id == tenant_id && s.id == suggestion_id)
            .ok_or(StoreError::NotFound)?;
        suggestion.status = status;
        suggestion.updated_at = Utc::now();
        Ok(suggestion.clone())
    }

    async fn load_care_config(
        &self,
        tenant_id: Uuid,
    ) -> Result<Option<TenantCareConfig>, StoreError> {
        Ok(self.configs.read().await.get(&tenant_id).cloned())
    }

    async fn scan_trigger_candidates(
        &self,
        tenant_id: Uuid,
        trigger: TriggerType,
    ) -> Result<Vec<TriggerCandidate>, StoreError> {
        if self.failing_scan_tenants.read().await.contains(&tenant_id) {
            return Err(StoreError::Backend("scan unavailable".into()));
        }
        Ok(self
            .candidates
            .read()
            .await
            .get(&(tenant_id, trigger))
            .cloned()
            .unwrap_or_default())
    }

    async fn list_enabled_tenants(&self) -> Result<Vec<Uuid>, StoreError> {
        Ok(self.tenants.read().await.clone())
    }
}
