use std::sync::Arc;

use async_trait::async_trait;
use careserver::audit::{AuditEmitter, AuditEvent, TenantEventBus};
use careserver::budget::ToolSpec;
use careserver::config::{BudgetConfig, CareConfig};
use careserver::escalation::{ActionOrigin, EscalationInput, EscalationReason, SentimentSignal};
use careserver::llm::{GeneratedSuggestion, SuggestionProvider};
use careserver::models::{
    CareEventType, CareState, ConfigSource, EntityRef, EntityType, EscalationStatus,
    SuggestedAction, SuggestionStatus, TenantCareConfig, TriggerType,
};
use careserver::policy::{PolicyGateResult, PolicyInput, ProposedActionType};
use careserver::store::{
    CareStatePatch, CareStore, MemoryCareStore, SuggestionFilter, TriggerCandidate,
};
use careserver::CareRuntime;
use serde_json::{json, Map, Value};
use tokio::sync::Mutex;
use uuid::Uuid;

struct StaticProvider {
    response: Option<GeneratedSuggestion>,
}

#[async_trait]
impl SuggestionProvider for StaticProvider {
    async fn generate(
        &self,
        _prompt: &str,
        _tools: &[ToolSpec],
        _caps: &BudgetConfig,
    ) -> Option<GeneratedSuggestion> {
        self.response.clone()
    }
}

#[derive(Default)]
struct CapturingAudit {
    events: Mutex<Vec<AuditEvent>>,
}

#[async_trait]
impl AuditEmitter for CapturingAudit {
    async fn emit(&self, event: AuditEvent) -> anyhow::Result<()> {
        self.events.lock().await.push(event);
        Ok(())
    }
}

#[derive(Default)]
struct CapturingBus {
    events: Mutex<Vec<(Uuid, String, Value)>>,
}

#[async_trait]
impl TenantEventBus for CapturingBus {
    async fn emit(&self, tenant_id: Uuid, event_name: &str, payload: Value) -> anyhow::Result<()> {
        self.events
            .lock()
            .await
            .push((tenant_id, event_name.to_string(), payload));
        Ok(())
    }
}

fn tenant_config(tenant_id: Uuid, webhook_url: Option<String>) -> TenantCareConfig {
    TenantCareConfig {
        tenant_id,
        workflow_id: None,
        webhook_url,
        webhook_secret: Some("integration-secret".into()),
        is_enabled: true,
        state_write_enabled: true,
        shadow_mode: false,
        webhook_timeout_ms: 3000,
        webhook_max_retries: 0,
        source: ConfigSource::Database,
    }
}

struct World {
    store: Arc<MemoryCareStore>,
    audit: Arc<CapturingAudit>,
    bus: Arc<CapturingBus>,
    runtime: Arc<CareRuntime>,
}

fn world_with(config: CareConfig, response: Option<GeneratedSuggestion>) -> World {
    let store = MemoryCareStore::new();
    let audit = Arc::new(CapturingAudit::default());
    let bus = Arc::new(CapturingBus::default());
    let runtime = CareRuntime::new(
        config,
        store.clone(),
        Arc::new(StaticProvider { response }),
        bus.clone(),
        audit.clone(),
    );
    World {
        store,
        audit,
        bus,
        runtime,
    }
}

fn update_lead_suggestion() -> GeneratedSuggestion {
    GeneratedSuggestion {
        action: SuggestedAction {
            tool_name: "update_lead".into(),
            tool_args: json!({"status": "contacted"}),
        },
        confidence: Some(0.85),
        reasoning: Some("lead went quiet after a proposal".into()),
        priority: None,
    }
}

#[tokio::test]
async fn escalation_signal_opens_status_and_fires_signed_webhook() {
    let mut server = mockito::Server::new_async().await;
    let hook = server
        .mock("POST", "/workflow")
        .match_header("x-aisha-signature", mockito::Matcher::Regex("[0-9a-f]{64}".into()))
        .match_header("user-agent", "AiSHA-CARE/1.0")
        .with_status(200)
        .expect_at_least(1)
        .create_async()
        .await;

    let world = world_with(CareConfig::default(), None);
    let tenant_id = Uuid::new_v4();
    world
        .store
        .seed_config(tenant_config(
            tenant_id,
            Some(format!("{}/workflow", server.url())),
        ))
        .await;

    let entity = EntityRef::new(tenant_id, EntityType::Contact, Uuid::new_v4());
    let input = EscalationInput {
        text: Some("not interested please stop calling".into()),
        sentiment: Some(SentimentSignal::Label("negative".into())),
        ..Default::default()
    };

    let outcome = world
        .runtime
        .process_signal(&entity, &input, &Default::default(), None)
        .await
        .expect("signal processed");

    assert!(outcome.escalation.escalate);
    assert_eq!(
        outcome.escalation.reasons,
        vec![
            EscalationReason::Objection,
            EscalationReason::NegativeSentiment
        ]
    );
    assert_eq!(outcome.escalation.meta["match_count"], 2);

    let record = world
        .store
        .get_care_state(&entity)
        .await
        .expect("get")
        .expect("record exists");
    assert_eq!(record.escalation_status, Some(EscalationStatus::Open));

    let history = world
        .store
        .get_care_history(&entity, Default::default())
        .await
        .expect("history");
    assert!(history
        .iter()
        .any(|event| event.event_type == CareEventType::EscalationOpened));
    assert!(history
        .iter()
        .any(|event| event.event_type == CareEventType::SignalRecorded));
    assert!(history.iter().all(|event| !event.reason.trim().is_empty()));

    hook.assert_async().await;
}

#[tokio::test]
async fn commitment_signal_moves_evaluating_to_committed() {
    let world = world_with(CareConfig::default(), None);
    let tenant_id = Uuid::new_v4();
    world.store.seed_config(tenant_config(tenant_id, None)).await;

    let entity = EntityRef::new(tenant_id, EntityType::Opportunity, Uuid::new_v4());
    world
        .store
        .upsert_care_state(
            &entity,
            CareStatePatch {
                care_state: Some(CareState::Evaluating),
                ..Default::default()
            },
        )
        .await
        .expect("seed state");

    let mut signals = careserver::models::CareSignals::default();
    signals.commitment_recorded = Some(true);

    let outcome = world
        .runtime
        .process_signal(&entity, &EscalationInput::default(), &signals, None)
        .await
        .expect("signal processed");

    let transition = outcome.transition.expect("transition proposed");
    assert_eq!(transition.from_state, CareState::Evaluating);
    assert_eq!(transition.to_state, CareState::Committed);
    assert!(transition.reason.contains("commitment"));

    let record = world
        .store
        .get_care_state(&entity)
        .await
        .expect("get")
        .expect("record");
    assert_eq!(record.care_state, CareState::Committed);

    let history = world
        .store
        .get_care_history(&entity, Default::default())
        .await
        .expect("history");
    assert!(history.iter().any(|event| {
        event.event_type == CareEventType::StateApplied
            && event.to_state == Some(CareState::Committed)
    }));
}

#[tokio::test]
async fn worker_cycle_creates_suggestion_once_and_audits_duplicate() {
    let world = world_with(CareConfig::default(), Some(update_lead_suggestion()));
    let tenant_id = Uuid::new_v4();
    world.store.seed_config(tenant_config(tenant_id, None)).await;

    let mut context = Map::new();
    context.insert("days_stagnant".into(), json!(20));
    world
        .store
        .seed_candidates(
            tenant_id,
            TriggerType::LeadStagnant,
            vec![TriggerCandidate {
                record_id: Uuid::new_v4(),
                record_type: EntityType::Lead,
                context,
            }],
        )
        .await;

    world.runtime.worker.run_cycle().await;
    world.runtime.worker.run_cycle().await;

    let rows = world
        .store
        .query_suggestions(SuggestionFilter {
            tenant_id,
            status: Some(SuggestionStatus::Pending),
            ..Default::default()
        })
        .await
        .expect("query");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].confidence, 0.85);
    assert_eq!(rows[0].trigger_id, TriggerType::LeadStagnant);

    let audits = world.audit.events.lock().await;
    assert_eq!(audits.len(), 2);
    assert_eq!(
        audits[0].outcome_type,
        careserver::models::OutcomeType::SuggestionCreated
    );
    assert_eq!(
        audits[1].outcome_type,
        careserver::models::OutcomeType::DuplicateSuppressed
    );

    let bus_events = world.bus.events.lock().await;
    let generated: Vec<_> = bus_events
        .iter()
        .filter(|(_, name, _)| name == "ai.suggestion.generated")
        .collect();
    assert_eq!(generated.len(), 1);
}

#[tokio::test]
async fn shadow_mode_observes_without_writing() {
    let mut config = CareConfig::default();
    config.shadow_mode = true;

    let world = world_with(config, None);
    let tenant_id = Uuid::new_v4();
    world.store.seed_config(tenant_config(tenant_id, None)).await;

    let entity = EntityRef::new(tenant_id, EntityType::Lead, Uuid::new_v4());
    let input = EscalationInput {
        text: Some("delete my data under gdpr".into()),
        ..Default::default()
    };
    let mut signals = careserver::models::CareSignals::default();
    signals.last_inbound_at = Some(chrono::Utc::now());

    let outcome = world
        .runtime
        .process_signal(&entity, &input, &signals, None)
        .await
        .expect("signal processed");

    // Classification still happens; persistence does not.
    assert!(outcome.escalation.escalate);
    assert!(outcome.transition.is_some());
    assert!(outcome.record.is_none());
    assert!(world
        .store
        .get_care_state(&entity)
        .await
        .expect("get")
        .is_none());
}

#[tokio::test]
async fn close_escalation_appends_history() {
    let world = world_with(CareConfig::default(), None);
    let tenant_id = Uuid::new_v4();
    world.store.seed_config(tenant_config(tenant_id, None)).await;

    let entity = EntityRef::new(tenant_id, EntityType::Account, Uuid::new_v4());
    let record = world
        .runtime
        .close_escalation(&entity, "resolved on a call", None)
        .await
        .expect("closed");
    assert_eq!(record.escalation_status, Some(EscalationStatus::Closed));

    let history = world
        .store
        .get_care_history(&entity, Default::default())
        .await
        .expect("history");
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].event_type, CareEventType::EscalationClosed);
    assert_eq!(history[0].reason, "resolved on a call");
}

#[tokio::test]
async fn autonomy_kill_switch_escalates_allowed_autonomous_actions() {
    let world = world_with(CareConfig::default(), None);

    let decision = world.runtime.evaluate_action(&PolicyInput {
        action_origin: Some(ActionOrigin::CareAutonomous),
        proposed_action_type: Some(ProposedActionType::Note),
        text: Some("leave an internal note about the renewal timeline".into()),
        meta: Map::new(),
    });
    assert_eq!(decision.policy_gate_result, PolicyGateResult::Escalated);
    assert_eq!(decision.reasons, vec!["autonomy_disabled".to_string()]);

    // User-directed actions are untouched by the switch.
    let decision = world.runtime.evaluate_action(&PolicyInput {
        action_origin: Some(ActionOrigin::UserDirected),
        proposed_action_type: Some(ProposedActionType::Message),
        text: Some("thanks for your time yesterday".into()),
        meta: Map::new(),
    });
    assert_eq!(decision.policy_gate_result, PolicyGateResult::Allowed);
}
