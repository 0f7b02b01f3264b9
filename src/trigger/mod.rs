use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::WorkerConfig;
use crate::shared::models::{
    CareSignals, CareState, EntityRef, SuggestionPriority, TenantCareConfig, TriggerData,
    TriggerType,
};
use crate::state_engine::StateEngine;
use crate::store::{CareStore, TriggerCandidate};
use crate::suggestions::{create_suggestion_if_new, SuggestionGateDeps};
use crate::tenant_config::TenantConfigCache;
use crate::webhooks::{TriggerRequest, WebhookEvent, WebhookTriggerClient, EVENT_SUGGESTION_CREATED};

/// Periodic multi-tenant scanner. One supervisor task owns the tick; each
/// cycle scans tenants in parallel up to the pool size, with at most one
/// in-flight scan per tenant.
pub struct TriggerWorker {
    store: Arc<dyn CareStore>,
    cache: Arc<TenantConfigCache>,
    engine: StateEngine,
    gate: Arc<SuggestionGateDeps>,
    webhooks: Arc<WebhookTriggerClient>,
    config: WorkerConfig,
    webhook_base_url: String,
    workflow_triggers_enabled: bool,
    shadow_mode: bool,
    pool: Arc<Semaphore>,
    leases: Arc<Mutex<HashSet<Uuid>>>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl TriggerWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn CareStore>,
        cache: Arc<TenantConfigCache>,
        engine: StateEngine,
        gate: Arc<SuggestionGateDeps>,
        webhooks: Arc<WebhookTriggerClient>,
        config: WorkerConfig,
        webhook_base_url: String,
        workflow_triggers_enabled: bool,
        shadow_mode: bool,
    ) -> Arc<Self> {
        let pool = Arc::new(Semaphore::new(config.pool_size));
        Arc::new(Self {
            store,
            cache,
            engine,
            gate,
            webhooks,
            config,
            webhook_base_url,
            workflow_triggers_enabled,
            shadow_mode,
            pool,
            leases: Arc::new(Mutex::new(HashSet::new())),
            supervisor: Mutex::new(None),
        })
    }

    /// Spawn the supervisor tick loop. Idempotent: a second start while
    /// running is a no-op.
    pub async fn start(self: Arc<Self>) {
        let mut supervisor = self.supervisor.lock().await;
        if supervisor.is_some() {
            return;
        }

        info!(
            interval_seconds = self.config.interval_seconds,
            pool_size = self.config.pool_size,
            "trigger worker started"
        );

        let worker = Arc::clone(&self);
        let handle = tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(Duration::from_secs(worker.config.interval_seconds));
            loop {
                ticker.tick().await;
                worker.run_cycle().await;
            }
        });
        *supervisor = Some(handle);
    }

    pub async fn stop(&self) {
        if let Some(handle) = self.supervisor.lock().await.take() {
            handle.abort();
            info!("trigger worker stopped");
        }
    }

    /// One full scan pass over every enabled tenant. Scans run concurrently
    /// up to the pool size; a failing tenant is logged and does not stop
    /// the others.
    pub async fn run_cycle(&self) {
        let tenants = match self.store.list_enabled_tenants().await {
            Ok(tenants) => tenants,
            Err(error) => {
                error!(%error, "tenant enumeration failed, skipping cycle");
                return;
            }
        };

        let scans = tenants
            .into_iter()
            .map(|tenant_id| self.scan_tenant_guarded(tenant_id));
        futures::future::join_all(scans).await;
    }

    /// Lease + pool + deadline wrapper around one tenant scan.
    async fn scan_tenant_guarded(&self, tenant_id: Uuid) {
        {
            let mut leases = self.leases.lock().await;
            if !leases.insert(tenant_id) {
                debug!(%tenant_id, "scan already in flight, lease held");
                return;
            }
        }

        let _permit = match self.pool.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                self.leases.lock().await.remove(&tenant_id);
                return;
            }
        };

        let deadline = Duration::from_millis(self.config.scan_deadline_ms);
        match tokio::time::timeout(deadline, self.scan_tenant(tenant_id)).await {
            Ok(()) => {}
            Err(_) => warn!(%tenant_id, "tenant scan hit deadline, retrying next tick"),
        }

        self.leases.lock().await.remove(&tenant_id);
    }

    async fn scan_tenant(&self, tenant_id: Uuid) {
        let tenant_config = self.cache.get(tenant_id).await;
        if !tenant_config.is_enabled {
            debug!(%tenant_id, "care disabled for tenant, skipping scan");
            return;
        }

        // Best trigger per record this cycle: highest priority wins, ties go
        // to the alphabetically-first trigger name.
        let mut best: HashMap<Uuid, TriggerData> = HashMap::new();

        for trigger_type in TriggerType::ALL {
            let candidates = match self
                .store
                .scan_trigger_candidates(tenant_id, trigger_type)
                .await
            {
                Ok(candidates) => candidates,
                Err(error) => {
                    warn!(%tenant_id, trigger = %trigger_type, %error, "candidate scan failed");
                    continue;
                }
            };

            for candidate in candidates {
                let data = match derive_trigger_data(trigger_type, &candidate) {
                    Ok(data) => data,
                    Err(error) => {
                        warn!(
                            %tenant_id,
                            trigger = %trigger_type,
                            record_id = %candidate.record_id,
                            error,
                            "candidate skipped"
                        );
                        continue;
                    }
                };

                let replace = match best.get(&data.record_id) {
                    Some(current) => beats(&data, current),
                    None => true,
                };
                if replace {
                    best.insert(data.record_id, data);
                }
            }
        }

        let mut selected: Vec<TriggerData> = best.into_values().collect();
        selected.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.trigger_id.as_str().cmp(b.trigger_id.as_str()))
                .then_with(|| a.record_id.cmp(&b.record_id))
        });
        let total = selected.len();
        if total > self.config.batch_cap {
            warn!(
                %tenant_id,
                total,
                cap = self.config.batch_cap,
                "trigger batch capped for cycle"
            );
            selected.truncate(self.config.batch_cap);
        }

        let shadow = self.shadow_mode || tenant_config.shadow_mode;
        for trigger in &selected {
            if shadow {
                info!(
                    %tenant_id,
                    trigger = %trigger.trigger_id,
                    record_id = %trigger.record_id,
                    "shadow mode, trigger observed but not forwarded"
                );
                continue;
            }
            // Opportunistic state pass: the trigger context doubles as a
            // signal snapshot.
            self.apply_trigger_signals(tenant_id, trigger).await;
            if let Some(suggestion_id) =
                create_suggestion_if_new(tenant_id, trigger, &self.gate).await
            {
                self.emit_suggestion_webhook(&tenant_config, trigger, suggestion_id)
                    .await;
            }
        }

        debug!(%tenant_id, forwarded = selected.len(), "tenant scan complete");
    }

    /// Workflow webhook for a freshly created suggestion. Delivery failures
    /// are logged; the suggestion already exists either way.
    async fn emit_suggestion_webhook(
        &self,
        tenant_config: &TenantCareConfig,
        trigger: &TriggerData,
        suggestion_id: Uuid,
    ) {
        if !self.workflow_triggers_enabled {
            return;
        }
        let Some(url) = tenant_config.effective_webhook_url(&self.webhook_base_url) else {
            return;
        };

        let entity = EntityRef::new(
            tenant_config.tenant_id,
            trigger.record_type,
            trigger.record_id,
        );
        let event = WebhookEvent::new(
            EVENT_SUGGESTION_CREATED,
            &entity,
            json!({
                "suggestion_id": suggestion_id.to_string(),
                "trigger_id": trigger.trigger_id.as_str(),
                "priority": trigger.priority.as_str(),
            }),
        );

        let outcome = self
            .webhooks
            .trigger_care_workflow(TriggerRequest {
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
                suggestion_id = %suggestion_id,
                error = outcome.error.as_deref().unwrap_or("unknown"),
                "suggestion webhook delivery failed"
            );
        }
    }

    async fn apply_trigger_signals(&self, tenant_id: Uuid, trigger: &TriggerData) {
        let entity = EntityRef::new(tenant_id, trigger.record_type, trigger.record_id);
        let signals = signals_from_trigger(trigger);

        let current = match self.store.get_care_state(&entity).await {
            Ok(record) => record.map(|r| r.care_state).unwrap_or(CareState::Unaware),
            Err(error) => {
                warn!(%entity, %error, "care state read failed, skipping signal pass");
                return;
            }
        };

        let enriched = self.engine.enrich_signals(&signals, Utc::now());
        if let Some(proposal) = self.engine.propose_transition(current, &enriched) {
            match self
                .engine
                .apply_transition(&self.store, &entity, &proposal, None)
                .await
            {
                Ok(_) => debug!(
                    %entity,
                    from = %proposal.from_state,
                    to = %proposal.to_state,
                    "trigger-derived transition applied"
                ),
                Err(error) => warn!(%entity, %error, "trigger-derived transition failed"),
            }
        }
    }
}

fn beats(challenger: &TriggerData, incumbent: &TriggerData) -> bool {
    match challenger.priority.cmp(&incumbent.priority) {
        std::cmp::Ordering::Greater => true,
        std::cmp::Ordering::Less => false,
        std::cmp::Ordering::Equal => {
            challenger.trigger_id.as_str() < incumbent.trigger_id.as_str()
        }
    }
}

fn derive_trigger_data(
    trigger_type: TriggerType,
    candidate: &TriggerCandidate,
) -> Result<TriggerData, &'static str> {
    let priority = candidate
        .context
        .get("priority")
        .and_then(|value| value.as_str())
        .map(|raw| SuggestionPriority::parse(raw).ok_or("unknown priority in context"))
        .transpose()?
        .unwrap_or_else(|| trigger_type.default_priority());

    Ok(TriggerData {
        trigger_id: trigger_type,
        record_type: candidate.record_type,
        record_id: candidate.record_id,
        context: candidate.context.clone(),
        priority,
    })
}

/// Adapt a trigger snapshot into care signals for the state engine.
fn signals_from_trigger(trigger: &TriggerData) -> CareSignals {
    let mut signals = CareSignals::default();

    let days = ["days_stagnant", "days_inactive", "days_overdue"]
        .iter()
        .find_map(|key| trigger.context.get(*key).and_then(|value| value.as_i64()));
    signals.silence_days = days;

    signals.last_inbound_at = trigger
        .context
        .get("last_inbound_at")
        .and_then(|value| value.as_str())
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|parsed| parsed.with_timezone(&Utc));

    signals.negative_sentiment = trigger
        .context
        .get("negative_sentiment")
        .and_then(|value| value.as_bool());

    signals
        .meta
        .insert("trigger_id".into(), json!(trigger.trigger_id.as_str()));

    signals
}
