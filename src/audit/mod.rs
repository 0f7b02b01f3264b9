use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::info;
use uuid::Uuid;

use crate::shared::models::{EntityType, OutcomeType, TriggerType};

pub const ACTION_OUTCOME: &str = "ACTION_OUTCOME";

/// One audit record per suggestion-gate invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_type: String,
    pub tenant_id: Uuid,
    pub trigger_id: TriggerType,
    pub record_type: EntityType,
    pub record_id: Uuid,
    pub outcome_type: OutcomeType,
    #[serde(default)]
    pub meta: Map<String, Value>,
    pub created_at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn action_outcome(
        tenant_id: Uuid,
        trigger_id: TriggerType,
        record_type: EntityType,
        record_id: Uuid,
        outcome_type: OutcomeType,
    ) -> Self {
        let mut meta = Map::new();
        meta.insert(
            "outcome_type".into(),
            Value::String(outcome_type.as_str().to_string()),
        );
        Self {
            event_type: ACTION_OUTCOME.to_string(),
            tenant_id,
            trigger_id,
            record_type,
            record_id,
            outcome_type,
            meta,
            created_at: Utc::now(),
        }
    }
}

/// Audit sink. Failures are swallowed by callers; the audit stream may
/// have gaps and downstream consumers must tolerate them.
#[async_trait]
pub trait AuditEmitter: Send + Sync {
    async fn emit(&self, event: AuditEvent) -> anyhow::Result<()>;
}

/// Emits audit records to the structured log stream.
pub struct LoggingAuditEmitter;

#[async_trait]
impl AuditEmitter for LoggingAuditEmitter {
    async fn emit(&self, event: AuditEvent) -> anyhow::Result<()> {
        info!(
            event_type = %event.event_type,
            tenant_id = %event.tenant_id,
            trigger_id = %event.trigger_id,
            record_type = %event.record_type,
            record_id = %event.record_id,
            outcome = event.outcome_type.as_str(),
            "care audit event"
        );
        Ok(())
    }
}

/// Internal per-tenant event fanout: at-most-once, fire-and-forget.
#[async_trait]
pub trait TenantEventBus: Send + Sync {
    async fn emit(&self, tenant_id: Uuid, event_name: &str, payload: Value)
        -> anyhow::Result<()>;
}

/// Bus that only logs. Production wiring replaces it with the real fanout.
pub struct LoggingTenantBus;

#[async_trait]
impl TenantEventBus for LoggingTenantBus {
    async fn emit(
        &self,
        tenant_id: Uuid,
        event_name: &str,
        _payload: Value,
    ) -> anyhow::Result<()> {
        info!(%tenant_id, event_name, "tenant event emitted");
        Ok(())
    }
}
