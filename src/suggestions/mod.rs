use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use serde_json::{json, Map, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::audit::{AuditEmitter, AuditEvent, TenantEventBus};
use crate::budget::{apply_budget_caps, BudgetInput, ChatMessage, ChatRole};
use crate::config::BudgetConfig;
use crate::llm::SuggestionProvider;
use crate::shared::models::{
    ActorType, CareEventType, CareHistoryEvent, EntityRef, NewSuggestion, OutcomeType,
    Suggestion, SuggestionStatus, TriggerData, ValidationError,
};
use crate::store::{CareStore, StoreError, SuggestionFilter};
use crate::tools::{lookup_tool, tool_specs};

/// Internal bus event fired when a suggestion lands.
pub const SUGGESTION_GENERATED_EVENT: &str = "ai.suggestion.generated";

const DEFAULT_CONFIDENCE: f64 = 0.75;
const LLM_TIMEOUT_BASE_MS: u64 = 10_000;
const LLM_TIMEOUT_PER_OUTPUT_TOKEN_MS: u64 = 50;

const SUGGESTION_SYSTEM_PROMPT: &str = "You are the CARE assistant for a CRM. \
Given a trigger condition on a record, propose exactly one next action using \
the available tools. Prefer low-risk internal actions. Respond only through a \
tool call.";

/// Collaborators the gate needs. Production wiring fills these with real
/// adapters; tests inject fakes.
pub struct SuggestionGateDeps {
    pub store: Arc<dyn CareStore>,
    pub provider: Arc<dyn SuggestionProvider>,
    pub bus: Arc<dyn TenantEventBus>,
    pub audit: Arc<dyn AuditEmitter>,
    pub budget: BudgetConfig,
    pub cooldown_hours: i64,
}

/// Create at most one pending suggestion for (tenant, trigger, record).
///
/// This is the swallow-all boundary of the suggestion pipeline: it never
/// propagates an error upward, every invocation emits exactly one audit
/// event, and the return value is the inserted id or `None`.
pub async fn create_suggestion_if_new(
    tenant_id: Uuid,
    trigger: &TriggerData,
    deps: &SuggestionGateDeps,
) -> Option<Uuid> {
    let (outcome, inserted_id, detail) = run_gate(tenant_id, trigger, deps).await;

    let mut event = AuditEvent::action_outcome(
        tenant_id,
        trigger.trigger_id,
        trigger.record_type,
        trigger.record_id,
        outcome,
    );
    event.meta.extend(detail);
    if let Err(error) = deps.audit.emit(event).await {
        // Audit gaps are tolerated; the gate result stands.
        warn!(%tenant_id, %error, "care audit emit failed");
    }

    inserted_id
}

async fn run_gate(
    tenant_id: Uuid,
    trigger: &TriggerData,
    deps: &SuggestionGateDeps,
) -> (OutcomeType, Option<Uuid>, Map<String, Value>) {
    let mut detail = Map::new();

    // Cooldown: an existing pending row, or a rejection inside the window,
    // suppresses a new suggestion before any model call.
    match find_duplicate(tenant_id, trigger, deps).await {
        Ok(Some(existing)) => {
            detail.insert("duplicate_of".into(), json!(existing.to_string()));
            return (OutcomeType::DuplicateSuppressed, None, detail);
        }
        Ok(None) => {}
        Err(error) => {
            detail.insert("error".into(), json!(error.to_string()));
            return (OutcomeType::Error, None, detail);
        }
    }

    let generated = match generate_under_budget(tenant_id, trigger, deps).await {
        Some(generated) => generated,
        None => return (OutcomeType::GenerationFailed, None, detail),
    };

    if lookup_tool(&generated.action.tool_name).is_none() {
        detail.insert("error".into(), json!("unknown_tool"));
        detail.insert("tool_name".into(), json!(generated.action.tool_name));
        return (OutcomeType::GenerationFailed, None, detail);
    }

    let payload = NewSuggestion {
        tenant_id,
        trigger_id: trigger.trigger_id,
        record_type: trigger.record_type,
        record_id: trigger.record_id,
        action: generated.action,
        confidence: generated.confidence.unwrap_or(DEFAULT_CONFIDENCE),
        reasoning: generated.reasoning.unwrap_or_default(),
        priority: generated.priority.unwrap_or(trigger.priority),
        status: SuggestionStatus::Pending,
        outcome_type: OutcomeType::SuggestionCreated,
    };

    match deps.store.insert_suggestion(payload).await {
        Ok(suggestion) => {
            detail.insert("suggestion_id".into(), json!(suggestion.id.to_string()));

            // Bus failures must not take back the inserted id.
            if let Err(error) = deps
                .bus
                .emit(
                    tenant_id,
                    SUGGESTION_GENERATED_EVENT,
                    json!({
                        "suggestion_id": suggestion.id.to_string(),
                        "trigger_id": trigger.trigger_id.as_str(),
                        "record_type": trigger.record_type.as_str(),
                        "record_id": trigger.record_id.to_string(),
                    }),
                )
                .await
            {
                warn!(%tenant_id, %error, "suggestion webhook emit failed");
            }

            (OutcomeType::SuggestionCreated, Some(suggestion.id), detail)
        }
        Err(StoreError::UniqueViolation) => {
            debug!(%tenant_id, trigger = %trigger.trigger_id, "pending suggestion already exists");
            (OutcomeType::ConstraintViolation, None, detail)
        }
        Err(error) => {
            detail.insert("error".into(), json!(error.to_string()));
            (OutcomeType::Error, None, detail)
        }
    }
}

async fn find_duplicate(
    tenant_id: Uuid,
    trigger: &TriggerData,
    deps: &SuggestionGateDeps,
) -> Result<Option<Uuid>, StoreError> {
    let base = SuggestionFilter {
        tenant_id,
        trigger_id: Some(trigger.trigger_id),
        record_type: Some(trigger.record_type),
        record_id: Some(trigger.record_id),
        limit: Some(1),
        ..Default::default()
    };

    let pending = deps
        .store
        .query_suggestions(SuggestionFilter {
            status: Some(SuggestionStatus::Pending),
            ..base.clone()
        })
        .await?;
    if let Some(existing) = pending.first() {
        return Ok(Some(existing.id));
    }

    if deps.cooldown_hours > 0 {
        let window_start = Utc::now() - ChronoDuration::hours(deps.cooldown_hours);
        let rejected = deps
            .store
            .query_suggestions(SuggestionFilter {
                status: Some(SuggestionStatus::Rejected),
                created_after: Some(window_start),
                ..base
            })
            .await?;
        if let Some(existing) = rejected.first() {
            return Ok(Some(existing.id));
        }
    }

    Ok(None)
}

async fn generate_under_budget(
    tenant_id: Uuid,
    trigger: &TriggerData,
    deps: &SuggestionGateDeps,
) -> Option<crate::llm::GeneratedSuggestion> {
    let context = json!({
        "tenant_id": tenant_id.to_string(),
        "trigger": trigger.trigger_id.as_str(),
        "record_type": trigger.record_type.as_str(),
        "record_id": trigger.record_id.to_string(),
        "priority": trigger.priority.as_str(),
        "context": trigger.context,
    });

    let budgeted = apply_budget_caps(
        BudgetInput {
            system_prompt: SUGGESTION_SYSTEM_PROMPT.to_string(),
            messages: vec![ChatMessage::new(ChatRole::User, context.to_string())],
            tools: tool_specs(),
            memory_text: String::new(),
            tool_result_summaries: Vec::new(),
            forced_tool: None,
        },
        &deps.budget,
    );

    let prompt = match budgeted.messages.last() {
        Some(message) => format!("{}\n\n{}", budgeted.system_prompt, message.content),
        None => budgeted.system_prompt,
    };

    let timeout = Duration::from_millis(
        LLM_TIMEOUT_BASE_MS + deps.budget.output_max as u64 * LLM_TIMEOUT_PER_OUTPUT_TOKEN_MS,
    );
    match tokio::time::timeout(
        timeout,
        deps.provider.generate(&prompt, &budgeted.tools, &deps.budget),
    )
    .await
    {
        Ok(generated) => generated,
        Err(_) => {
            warn!(%tenant_id, trigger = %trigger.trigger_id, "suggestion generation timed out");
            None
        }
    }
}

/// Move a suggestion through its review lifecycle. Only
/// pending → approved, pending → rejected and approved → applied are
/// legal; anything else is a validation error.
pub async fn review_suggestion(
    store: &Arc<dyn CareStore>,
    tenant_id: Uuid,
    suggestion_id: Uuid,
    new_status: SuggestionStatus,
    actor: Option<(ActorType, String)>,
    reason: &str,
) -> Result<Suggestion, StoreError> {
    if reason.trim().is_empty() {
        return Err(ValidationError::EmptyReason.into());
    }

    let existing = store
        .query_suggestions(SuggestionFilter {
            tenant_id,
            ..Default::default()
        })
        .await?
        .into_iter()
        .find(|s| s.id == suggestion_id)
        .ok_or(StoreError::NotFound)?;

    let legal = matches!(
        (existing.status, new_status),
        (SuggestionStatus::Pending, SuggestionStatus::Approved)
            | (SuggestionStatus::Pending, SuggestionStatus::Rejected)
            | (SuggestionStatus::Approved, SuggestionStatus::Applied)
    );
    if !legal {
        return Err(ValidationError::InvalidStatusTransition(
            existing.status.as_str(),
            new_status.as_str(),
        )
        .into());
    }

    let updated = store
        .update_suggestion_status(tenant_id, suggestion_id, new_status)
        .await?;

    let event_type = match new_status {
        SuggestionStatus::Rejected => CareEventType::ActionSkipped,
        _ => CareEventType::ActionCandidate,
    };
    let (actor_type, actor_id) = match actor {
        Some((actor_type, actor_id)) => (actor_type, Some(actor_id)),
        None => (ActorType::User, None),
    };
    let entity = EntityRef::new(tenant_id, updated.record_type, updated.record_id);

    let mut meta = Map::new();
    meta.insert("suggestion_id".into(), json!(updated.id.to_string()));
    meta.insert("status".into(), json!(new_status.as_str()));

    store
        .append_care_history(
            &entity,
            CareHistoryEvent {
                event_id: Uuid::new_v4(),
                entity,
                from_state: None,
                to_state: None,
                event_type,
                reason: reason.to_string(),
                meta,
                actor_type,
                actor_id,
                created_at: Utc::now(),
            },
        )
        .await?;

    Ok(updated)
}
