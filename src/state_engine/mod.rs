use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::ThresholdConfig;
use crate::shared::models::{
    ActorType, CareEventType, CareHistoryEvent, CareSignals, CareState, CareStateRecord,
    EntityRef, ValidationError,
};
use crate::store::{CareStatePatch, CareStore, StoreError};

/// Namespace for deriving idempotent history event ids.
const HISTORY_EVENT_NAMESPACE: Uuid = Uuid::NAMESPACE_OID;

/// A state change the rules want to make. Carries the reason that ends up
/// in the history row; an empty reason is rejected at apply time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionProposal {
    pub from_state: CareState,
    pub to_state: CareState,
    pub reason: String,
    #[serde(default)]
    pub meta: Map<String, Value>,
    pub proposed_at: DateTime<Utc>,
}

/// Deterministic lifecycle rules. Thresholds are read once at start-up.
#[derive(Debug, Clone)]
pub struct StateEngine {
    thresholds: ThresholdConfig,
    write_enabled: bool,
    shadow_mode: bool,
}

impl StateEngine {
    pub fn new(thresholds: ThresholdConfig, write_enabled: bool, shadow_mode: bool) -> Self {
        Self {
            thresholds,
            write_enabled,
            shadow_mode,
        }
    }

    /// Fill in `silence_days` from `last_inbound_at` when the computed value
    /// is more recent than what the caller provided. The override is
    /// recorded in the signal meta.
    pub fn enrich_signals(&self, signals: &CareSignals, now: DateTime<Utc>) -> CareSignals {
        let mut enriched = signals.clone();

        if let Some(last_inbound) = signals.last_inbound_at {
            let derived = (now - last_inbound).num_days().max(0);
            match signals.silence_days {
                Some(provided) if derived < provided => {
                    enriched.silence_days = Some(derived);
                    enriched
                        .meta
                        .insert("silence_days_overridden".into(), json!(true));
                    enriched
                        .meta
                        .insert("silence_days_provided".into(), json!(provided));
                }
                None => {
                    enriched.silence_days = Some(derived);
                }
                _ => {}
            }
        }

        enriched.engagement_score = Some(engagement_score(&enriched));
        enriched
    }

    /// Rule table, in strict priority order. Returns `None` when no rule
    /// fires or the winning rule would not change the state.
    pub fn propose_transition(
        &self,
        current: CareState,
        signals: &CareSignals,
    ) -> Option<TransitionProposal> {
        let silence = signals.silence_days.unwrap_or(0);
        let flag = |value: Option<bool>| value.unwrap_or(false);

        let (to_state, reason): (CareState, String) = if flag(signals.explicit_rejection) {
            (
                CareState::Lost,
                "explicit rejection signal recorded".to_string(),
            )
        } else if current == CareState::Dormant && signals.last_inbound_at.is_some() {
            (
                CareState::Reactivated,
                "inbound activity observed while dormant".to_string(),
            )
        } else if current == CareState::AtRisk && silence >= self.thresholds.dormant_silence_days {
            (
                CareState::Dormant,
                format!(
                    "{} days of silence reached the dormant threshold of {}",
                    silence, self.thresholds.dormant_silence_days
                ),
            )
        } else if !matches!(
            current,
            CareState::AtRisk | CareState::Dormant | CareState::Lost
        ) && silence >= self.thresholds.at_risk_silence_days
        {
            (
                CareState::AtRisk,
                format!(
                    "{} days of silence reached the at-risk threshold of {}",
                    silence, self.thresholds.at_risk_silence_days
                ),
            )
        } else if current == CareState::Unaware && signals.last_inbound_at.is_some() {
            (
                CareState::Aware,
                "first inbound contact observed".to_string(),
            )
        } else if current == CareState::Aware && flag(signals.has_bidirectional) {
            (
                CareState::Engaged,
                "bidirectional communication established".to_string(),
            )
        } else if current == CareState::Engaged && flag(signals.proposal_sent) {
            (
                CareState::Evaluating,
                "proposal sent, entity is evaluating".to_string(),
            )
        } else if current == CareState::Evaluating && flag(signals.commitment_recorded) {
            (
                CareState::Committed,
                "commitment recorded during evaluation".to_string(),
            )
        } else if current == CareState::Committed {
            let closing = if flag(signals.contract_signed) {
                Some("contract signed")
            } else if flag(signals.payment_received) {
                Some("payment received")
            } else if flag(signals.meeting_completed) {
                Some("closing meeting completed")
            } else {
                None
            };
            match closing {
                Some(what) => (CareState::Active, format!("{what}, entity is now active")),
                None => return None,
            }
        } else {
            return None;
        };

        // Identity transitions are never proposed.
        if to_state == current {
            return None;
        }

        let mut meta = Map::new();
        if let Some(days) = signals.silence_days {
            meta.insert("silence_days".into(), json!(days));
        }
        if let Some(score) = signals.engagement_score {
            meta.insert("engagement_score".into(), json!(score));
        }

        Some(TransitionProposal {
            from_state: current,
            to_state,
            reason,
            meta,
            proposed_at: Utc::now(),
        })
    }

    /// Persist a proposal: upsert the state row, then append the history
    /// row. The history event id is derived from (entity, to_state,
    /// proposed_at) so a retried apply lands on the same row.
    pub async fn apply_transition(
        &self,
        store: &Arc<dyn CareStore>,
        entity: &EntityRef,
        proposal: &TransitionProposal,
        actor: Option<(ActorType, String)>,
    ) -> Result<Option<CareStateRecord>, StoreError> {
        if proposal.reason.trim().is_empty() {
            return Err(ValidationError::EmptyReason.into());
        }

        if !self.write_enabled || self.shadow_mode {
            info!(
                entity = %entity,
                from = %proposal.from_state,
                to = %proposal.to_state,
                reason = %proposal.reason,
                "state write disabled, transition observed in shadow only"
            );
            return Ok(None);
        }

        let now = Utc::now();
        let record = store
            .upsert_care_state(
                entity,
                CareStatePatch {
                    care_state: Some(proposal.to_state),
                    last_signal_at: Some(now),
                    ..Default::default()
                },
            )
            .await?;

        let (actor_type, actor_id) = match actor {
            Some((actor_type, actor_id)) => (actor_type, Some(actor_id)),
            None => (ActorType::System, None),
        };

        let event_id = Uuid::new_v5(
            &HISTORY_EVENT_NAMESPACE,
            format!(
                "{}:{}:{}",
                entity,
                proposal.to_state,
                proposal.proposed_at.timestamp_millis()
            )
            .as_bytes(),
        );

        store
            .append_care_history(
                entity,
                CareHistoryEvent {
                    event_id,
                    entity: *entity,
                    from_state: Some(proposal.from_state),
                    to_state: Some(proposal.to_state),
                    event_type: CareEventType::StateApplied,
                    reason: proposal.reason.clone(),
                    meta: proposal.meta.clone(),
                    actor_type,
                    actor_id,
                    created_at: now,
                },
            )
            .await?;

        debug!(
            entity = %entity,
            from = %proposal.from_state,
            to = %proposal.to_state,
            "care state transition applied"
        );

        Ok(Some(record))
    }
}

/// Advisory engagement scalar, clamped to [-5, 10]. Positive signals add,
/// silence and rejection subtract.
pub fn engagement_score(signals: &CareSignals) -> f64 {
    let flag = |value: Option<bool>| value.unwrap_or(false);
    let mut score: f64 = 0.0;

    if flag(signals.has_bidirectional) {
        score += 2.0;
    }
    if flag(signals.proposal_sent) {
        score += 1.0;
    }
    if flag(signals.meeting_scheduled) {
        score += 1.0;
    }
    if flag(signals.meeting_completed) {
        score += 2.0;
    }
    if flag(signals.contract_signed) {
        score += 3.0;
    }
    if flag(signals.payment_received) {
        score += 3.0;
    }
    if flag(signals.negative_sentiment) {
        score -= 2.0;
    }
    if flag(signals.explicit_rejection) {
        score -= 5.0;
    }

    score += match signals.silence_days {
        Some(days) if days <= 3 => 2.0,
        Some(days) if days <= 7 => 1.0,
        Some(days) if days <= 14 => 0.0,
        Some(days) if days <= 30 => -2.0,
        Some(_) => -4.0,
        None => 0.0,
    };

    score.clamp(-5.0, 10.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::models::EntityType;
    use crate::store::MemoryCareStore;
    use chrono::Duration;

    fn engine() -> StateEngine {
        StateEngine::new(
            ThresholdConfig {
                at_risk_silence_days: 14,
                dormant_silence_days: 30,
                lead_stagnant_days: 14,
                deal_decay_days: 21,
            },
            true,
            false,
        )
    }

    fn signals() -> CareSignals {
        CareSignals::default()
    }

    #[test]
    fn test_explicit_rejection_wins_over_everything() {
        let mut s = signals();
        s.explicit_rejection = Some(true);
        s.commitment_recorded = Some(true);
        s.silence_days = Some(90);

        let proposal = engine()
            .propose_transition(CareState::Evaluating, &s)
            .expect("proposal");
        assert_eq!(proposal.to_state, CareState::Lost);
        assert!(!proposal.reason.trim().is_empty());
    }

    #[test]
    fn test_rejection_of_lost_entity_is_identity_and_skipped() {
        let mut s = signals();
        s.explicit_rejection = Some(true);
        assert!(engine().propose_transition(CareState::Lost, &s).is_none());
    }

    #[test]
    fn test_dormant_reactivates_on_inbound() {
        let mut s = signals();
        s.last_inbound_at = Some(Utc::now());
        let proposal = engine()
            .propose_transition(CareState::Dormant, &s)
            .expect("proposal");
        assert_eq!(proposal.to_state, CareState::Reactivated);
    }

    #[test]
    fn test_at_risk_boundary_is_inclusive() {
        let mut s = signals();
        s.silence_days = Some(13);
        assert!(engine().propose_transition(CareState::Engaged, &s).is_none());

        s.silence_days = Some(14);
        let proposal = engine()
            .propose_transition(CareState::Engaged, &s)
            .expect("proposal");
        assert_eq!(proposal.to_state, CareState::AtRisk);
    }

    #[test]
    fn test_at_risk_goes_dormant_at_threshold() {
        let mut s = signals();
        s.silence_days = Some(30);
        let proposal = engine()
            .propose_transition(CareState::AtRisk, &s)
            .expect("proposal");
        assert_eq!(proposal.to_state, CareState::Dormant);
    }

    #[test]
    fn test_silence_does_not_touch_terminal_states() {
        let mut s = signals();
        s.silence_days = Some(200);
        assert!(engine().propose_transition(CareState::Lost, &s).is_none());
        assert!(engine().propose_transition(CareState::Dormant, &s).is_none());
    }

    #[test]
    fn test_forward_funnel_rules() {
        let e = engine();

        let mut s = signals();
        s.last_inbound_at = Some(Utc::now());
        assert_eq!(
            e.propose_transition(CareState::Unaware, &s).map(|p| p.to_state),
            Some(CareState::Aware)
        );

        let mut s = signals();
        s.has_bidirectional = Some(true);
        assert_eq!(
            e.propose_transition(CareState::Aware, &s).map(|p| p.to_state),
            Some(CareState::Engaged)
        );

        let mut s = signals();
        s.proposal_sent = Some(true);
        assert_eq!(
            e.propose_transition(CareState::Engaged, &s).map(|p| p.to_state),
            Some(CareState::Evaluating)
        );

        let mut s = signals();
        s.commitment_recorded = Some(true);
        let proposal = e
            .propose_transition(CareState::Evaluating, &s)
            .expect("proposal");
        assert_eq!(proposal.to_state, CareState::Committed);
        assert!(proposal.reason.contains("commitment"));

        let mut s = signals();
        s.payment_received = Some(true);
        assert_eq!(
            e.propose_transition(CareState::Committed, &s).map(|p| p.to_state),
            Some(CareState::Active)
        );
    }

    #[test]
    fn test_enrichment_overrides_stale_silence_days() {
        let e = engine();
        let now = Utc::now();

        let mut s = signals();
        s.last_inbound_at = Some(now - Duration::days(2));
        s.silence_days = Some(20);

        let enriched = e.enrich_signals(&s, now);
        assert_eq!(enriched.silence_days, Some(2));
        assert_eq!(enriched.meta["silence_days_overridden"], true);
        assert_eq!(enriched.meta["silence_days_provided"], 20);

        // A larger derived value does not override a fresher caller value.
        let mut s = signals();
        s.last_inbound_at = Some(now - Duration::days(20));
        s.silence_days = Some(5);
        let enriched = e.enrich_signals(&s, now);
        assert_eq!(enriched.silence_days, Some(5));
        assert!(!enriched.meta.contains_key("silence_days_overridden"));
    }

    #[test]
    fn test_engagement_score_is_clamped() {
        let mut s = signals();
        s.has_bidirectional = Some(true);
        s.meeting_completed = Some(true);
        s.contract_signed = Some(true);
        s.payment_received = Some(true);
        s.meeting_scheduled = Some(true);
        s.proposal_sent = Some(true);
        s.silence_days = Some(1);
        assert_eq!(engagement_score(&s), 10.0);

        let mut s = signals();
        s.explicit_rejection = Some(true);
        s.negative_sentiment = Some(true);
        s.silence_days = Some(60);
        assert_eq!(engagement_score(&s), -5.0);
    }

    #[tokio::test]
    async fn test_apply_writes_state_then_history() {
        let store = MemoryCareStore::new();
        let store: Arc<dyn CareStore> = store.clone();
        let entity = EntityRef::new(Uuid::new_v4(), EntityType::Lead, Uuid::new_v4());

        let mut s = signals();
        s.commitment_recorded = Some(true);
        let proposal = engine()
            .propose_transition(CareState::Evaluating, &s)
            .expect("proposal");

        let record = engine()
            .apply_transition(&store, &entity, &proposal, None)
            .await
            .expect("apply")
            .expect("record written");
        assert_eq!(record.care_state, CareState::Committed);

        let history = store
            .get_care_history(&entity, Default::default())
            .await
            .expect("history");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].event_type, CareEventType::StateApplied);
        assert_eq!(history[0].to_state, Some(CareState::Committed));
    }

    #[tokio::test]
    async fn test_apply_twice_is_idempotent() {
        let memory = MemoryCareStore::new();
        let store: Arc<dyn CareStore> = memory.clone();
        let entity = EntityRef::new(Uuid::new_v4(), EntityType::Contact, Uuid::new_v4());

        let mut s = signals();
        s.proposal_sent = Some(true);
        let proposal = engine()
            .propose_transition(CareState::Engaged, &s)
            .expect("proposal");

        let e = engine();
        e.apply_transition(&store, &entity, &proposal, None)
            .await
            .expect("first apply");
        e.apply_transition(&store, &entity, &proposal, None)
            .await
            .expect("second apply");

        assert_eq!(memory.history_len(&entity).await, 1);
    }

    #[tokio::test]
    async fn test_apply_rejects_blank_reason() {
        let store: Arc<dyn CareStore> = MemoryCareStore::new();
        let entity = EntityRef::new(Uuid::new_v4(), EntityType::Lead, Uuid::new_v4());

        let proposal = TransitionProposal {
            from_state: CareState::Unaware,
            to_state: CareState::Aware,
            reason: "  ".into(),
            meta: Map::new(),
            proposed_at: Utc::now(),
        };

        let result = engine()
            .apply_transition(&store, &entity, &proposal, None)
            .await;
        assert!(matches!(
            result,
            Err(StoreError::Validation(ValidationError::EmptyReason))
        ));
    }

    #[tokio::test]
    async fn test_shadow_mode_skips_writes() {
        let memory = MemoryCareStore::new();
        let store: Arc<dyn CareStore> = memory.clone();
        let entity = EntityRef::new(Uuid::new_v4(), EntityType::Lead, Uuid::new_v4());

        let shadow_engine = StateEngine::new(
            ThresholdConfig {
                at_risk_silence_days: 14,
                dormant_silence_days: 30,
                lead_stagnant_days: 14,
                deal_decay_days: 21,
            },
            true,
            true,
        );

        let mut s = signals();
        s.last_inbound_at = Some(Utc::now());
        let proposal = shadow_engine
            .propose_transition(CareState::Unaware, &s)
            .expect("proposal");

        let result = shadow_engine
            .apply_transition(&store, &entity, &proposal, None)
            .await
            .expect("shadow apply");
        assert!(result.is_none());
        assert_eq!(memory.history_len(&entity).await, 0);
        assert!(store.get_care_state(&entity).await.expect("get").is_none());
    }
}
