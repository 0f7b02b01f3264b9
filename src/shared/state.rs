use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Map};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::audit::{AuditEmitter, TenantEventBus};
use crate::config::CareConfig;
use crate::escalation::{classify_escalation, ActionOrigin, EscalationInput, EscalationResult};
use crate::llm::SuggestionProvider;
use crate::policy::{evaluate_policy, PolicyDecision, PolicyGateResult, PolicyInput};
use crate::shared::models::{
    ActorType, CareEventType, CareHistoryEvent, CareSignals, CareState, CareStateRecord,
    EntityRef, EscalationStatus, TenantCareConfig, ValidationError,
};
use crate::state_engine::{StateEngine, TransitionProposal};
use crate::store::{CareStatePatch, CareStore, StoreError};
use crate::suggestions::SuggestionGateDeps;
use crate::tenant_config::TenantConfigCache;
use crate::trigger::TriggerWorker;
use crate::webhooks::{
    WebhookEvent, WebhookTriggerClient, EVENT_ESCALATION_DETECTED, EVENT_STATE_TRANSITION,
};

/// What one signal intake produced.
#[derive(Debug, Clone)]
pub struct SignalOutcome {
    pub escalation: EscalationResult,
    pub transition: Option<TransitionProposal>,
    pub record: Option<CareStateRecord>,
}

/// Process-wide runtime. Constructed once at start-up in dependency order:
/// configuration, tool-registry snapshot, caches, worker pool, webhook
/// client. Tenant isolation is enforced per call through the entity ref,
/// not by hiding state behind globals.
pub struct CareRuntime {
    pub config: CareConfig,
    pub store: Arc<dyn CareStore>,
    pub tenant_configs: Arc<TenantConfigCache>,
    pub state_engine: StateEngine,
    pub webhooks: Arc<WebhookTriggerClient>,
    pub gate: Arc<SuggestionGateDeps>,
    pub worker: Arc<TriggerWorker>,
}

impl CareRuntime {
    pub fn new(
        config: CareConfig,
        store: Arc<dyn CareStore>,
        provider: Arc<dyn SuggestionProvider>,
        bus: Arc<dyn TenantEventBus>,
        audit: Arc<dyn AuditEmitter>,
    ) -> Arc<Self> {
        // Warm the read-only tool registry before anything can race on it.
        let _ = crate::tools::tool_specs();

        let tenant_configs = Arc::new(TenantConfigCache::new(store.clone(), &config));
        let state_engine = StateEngine::new(
            config.thresholds.clone(),
            config.state_write_enabled,
            config.shadow_mode,
        );
        let webhooks = Arc::new(WebhookTriggerClient::new(&config.webhook));
        let gate = Arc::new(SuggestionGateDeps {
            store: store.clone(),
            provider,
            bus,
            audit,
            budget: config.budget.clone(),
            cooldown_hours: config.worker.suggestion_cooldown_hours,
        });
        let worker = TriggerWorker::new(
            store.clone(),
            tenant_configs.clone(),
            state_engine.clone(),
            gate.clone(),
            webhooks.clone(),
            config.worker.clone(),
            config.webhook.base_url.clone(),
            config.workflow_triggers_enabled,
            config.shadow_mode,
        );

        Arc::new(Self {
            config,
            store,
            tenant_configs,
            state_engine,
            webhooks,
            gate,
            worker,
        })
    }

    /// Start the trigger-worker supervisor. Idempotent.
    pub async fn start_worker(&self) {
        self.worker.clone().start().await;
    }

    pub async fn stop_worker(&self) {
        self.worker.stop().await;
    }

    /// Full intake pipeline for one inbound signal: classify, open an
    /// escalation when warranted, run the state rules, and record the
    /// signal. Webhook emission respects the workflow kill switch.
    pub async fn process_signal(
        &self,
        entity: &EntityRef,
        input: &EscalationInput,
        signals: &CareSignals,
        actor: Option<(ActorType, String)>,
    ) -> Result<SignalOutcome, StoreError> {
        let tenant_config = self.tenant_configs.get(entity.tenant_id).await;
        let escalation = classify_escalation(input);

        let mut signals = signals.clone();
        if escalation.has_reason(crate::escalation::EscalationReason::NegativeSentiment) {
            signals.negative_sentiment = Some(true);
        }
        let enriched = self.state_engine.enrich_signals(&signals, Utc::now());

        let writes_enabled = self.writes_enabled(&tenant_config);

        if escalation.escalate {
            self.open_escalation(entity, &escalation, writes_enabled, &tenant_config)
                .await?;
        }

        let current = match self.store.get_care_state(entity).await? {
            Some(record) => record.care_state,
            None => CareState::Unaware,
        };

        let transition = self.state_engine.propose_transition(current, &enriched);
        let mut record = None;
        if let Some(proposal) = &transition {
            if writes_enabled {
                record = self
                    .state_engine
                    .apply_transition(&self.store, entity, proposal, actor.clone())
                    .await?;
                self.emit_workflow_event(
                    &tenant_config,
                    WebhookEvent::new(
                        EVENT_STATE_TRANSITION,
                        entity,
                        json!({
                            "from": proposal.from_state.as_str(),
                            "to": proposal.to_state.as_str(),
                            "reason": proposal.reason,
                        }),
                    ),
                )
                .await;
            } else {
                info!(
                    %entity,
                    from = %proposal.from_state,
                    to = %proposal.to_state,
                    "transition observed in shadow mode"
                );
            }
        }

        if writes_enabled {
            let mut meta = enriched.meta.clone();
            meta.insert("escalate".into(), json!(escalation.escalate));
            if let Some(days) = enriched.silence_days {
                meta.insert("silence_days".into(), json!(days));
            }
            self.store
                .append_care_history(
                    entity,
                    CareHistoryEvent {
                        event_id: Uuid::new_v4(),
                        entity: *entity,
                        from_state: None,
                        to_state: None,
                        event_type: CareEventType::SignalRecorded,
                        reason: "inbound signal processed".to_string(),
                        meta,
                        actor_type: ActorType::System,
                        actor_id: None,
                        created_at: Utc::now(),
                    },
                )
                .await?;

            self.store
                .upsert_care_state(
                    entity,
                    CareStatePatch {
                        last_signal_at: Some(Utc::now()),
                        ..Default::default()
                    },
                )
                .await?;
        }

        Ok(SignalOutcome {
            escalation,
            transition,
            record,
        })
    }

    async fn open_escalation(
        &self,
        entity: &EntityRef,
        escalation: &EscalationResult,
        writes_enabled: bool,
        tenant_config: &TenantCareConfig,
    ) -> Result<(), StoreError> {
        let reasons: Vec<&str> = escalation
            .reasons
            .iter()
            .map(|reason| reason.as_str())
            .collect();
        let reason_text = format!("escalation detected: {}", reasons.join(", "));

        if writes_enabled {
            self.store
                .upsert_care_state(
                    entity,
                    CareStatePatch {
                        escalation_status: Some(EscalationStatus::Open),
                        ..Default::default()
                    },
                )
                .await?;

            let mut meta = Map::new();
            meta.insert("reasons".into(), json!(reasons));
            meta.insert(
                "confidence".into(),
                json!(escalation.confidence.as_str()),
            );
            self.store
                .append_care_history(
                    entity,
                    CareHistoryEvent {
                        event_id: Uuid::new_v4(),
                        entity: *entity,
                        from_state: None,
                        to_state: None,
                        event_type: CareEventType::EscalationOpened,
                        reason: reason_text.clone(),
                        meta,
                        actor_type: ActorType::System,
                        actor_id: None,
                        created_at: Utc::now(),
                    },
                )
                .await?;
        } else {
            info!(%entity, reason = %reason_text, "escalation observed in shadow mode");
        }

        self.emit_workflow_event(
            tenant_config,
            WebhookEvent::new(
                EVENT_ESCALATION_DETECTED,
                entity,
                json!({
                    "reasons": reasons,
                    "confidence": escalation.confidence.as_str(),
                    "meta": escalation.meta,
                }),
            ),
        )
        .await;

        Ok(())
    }

    /// Close an open escalation with a human-readable reason.
    pub async fn close_escalation(
        &self,
        entity: &EntityRef,
        reason: &str,
        actor: Option<(ActorType, String)>,
    ) -> Result<CareStateRecord, StoreError> {
        if reason.trim().is_empty() {
            return Err(ValidationError::EmptyReason.into());
        }

        let record = self
            .store
            .upsert_care_state(
                entity,
                CareStatePatch {
                    escalation_status: Some(EscalationStatus::Closed),
                    ..Default::default()
                },
            )
            .await?;

        let (actor_type, actor_id) = match actor {
            Some((actor_type, actor_id)) => (actor_type, Some(actor_id)),
            None => (ActorType::User, None),
        };
        self.store
            .append_care_history(
                entity,
                CareHistoryEvent {
                    event_id: Uuid::new_v4(),
                    entity: *entity,
                    from_state: None,
                    to_state: None,
                    event_type: CareEventType::EscalationClosed,
                    reason: reason.to_string(),
                    meta: Map::new(),
                    actor_type,
                    actor_id,
                    created_at: Utc::now(),
                },
            )
            .await?;

        Ok(record)
    }

    /// Policy gate with the autonomy kill switch folded in: when autonomy
    /// is disabled process-wide, an autonomous action can at best escalate.
    pub fn evaluate_action(&self, input: &PolicyInput) -> PolicyDecision {
        let mut decision = evaluate_policy(input);
        if !self.config.autonomy_enabled
            && input.action_origin == Some(ActionOrigin::CareAutonomous)
            && decision.policy_gate_result == PolicyGateResult::Allowed
        {
            decision.policy_gate_result = PolicyGateResult::Escalated;
            decision.escalate = true;
            decision.reasons = vec!["autonomy_disabled".to_string()];
        }
        decision
    }

    fn writes_enabled(&self, tenant_config: &TenantCareConfig) -> bool {
        self.config.state_write_enabled
            && !self.config.shadow_mode
            && tenant_config.state_write_enabled
            && !tenant_config.shadow_mode
    }

    async fn emit_workflow_event(&self, tenant_config: &TenantCareConfig, event: WebhookEvent) {
        if !self.config.workflow_triggers_enabled {
            debug!("workflow triggers disabled, webhook suppressed");
            return;
        }
        if self.config.shadow_mode || tenant_config.shadow_mode {
            debug!(tenant_id = %tenant_config.tenant_id, "shadow mode, webhook suppressed");
            return;
        }
        let base_url = &self.config.webhook.base_url;
        let Some(url) = tenant_config.effective_webhook_url(base_url) else {
            debug!(tenant_id = %tenant_config.tenant_id, "no webhook url resolved, event dropped");
            return;
        };
        if !tenant_config.is_enabled {
            return;
        }

        let outcome = self
            .webhooks
            .trigger_care_workflow(crate::webhooks::TriggerRequest {
                url,
                secret: tenant_config.webhook_secret.clone(),
                event,
                timeout_ms: tenant_config.webhook_timeout_ms,
                retries: tenant_config.webhook_max_retries,
            })
            .await;
        if !outcome.success {
            warn!(
                tenant_id = %tenant_config.tenant_id,
                error = outcome.error.as_deref().unwrap_or("unknown"),
                "workflow webhook delivery failed"
            );
        }
    }
}
