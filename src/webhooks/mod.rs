use std::sync::Arc;
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::Sha256;
use tokio::sync::Semaphore;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::WebhookConfig;
use crate::shared::models::{EntityRef, EntityType};

type HmacSha256 = Hmac<Sha256>;

pub const EVENT_ESCALATION_DETECTED: &str = "care.escalation_detected";
pub const EVENT_STATE_TRANSITION: &str = "care.state_transition";
pub const EVENT_SUGGESTION_CREATED: &str = "care.suggestion_created";

const SIGNATURE_HEADER: &str = "X-AISHA-SIGNATURE";
const EVENT_ID_HEADER: &str = "X-AISHA-EVENT-ID";
const USER_AGENT: &str = "AiSHA-CARE/1.0";
const BACKOFF_BASE_MS: u64 = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEntity {
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    pub id: Uuid,
}

/// Wire payload for workflow webhooks. Field order is part of the
/// contract; the signature covers the exact serialized bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub event_id: Uuid,
    #[serde(rename = "type")]
    pub event_type: String,
    pub ts: String,
    pub tenant_id: Uuid,
    pub entity: WebhookEntity,
    pub payload: Value,
}

impl WebhookEvent {
    pub fn new(event_type: &str, entity: &EntityRef, payload: Value) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type: event_type.to_string(),
            ts: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            tenant_id: entity.tenant_id,
            entity: WebhookEntity {
                entity_type: entity.entity_type,
                id: entity.entity_id,
            },
            payload,
        }
    }
}

/// Hex HMAC-SHA256 over the serialized body.
pub fn sign_payload(body: &str, secret: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(body.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

#[derive(Debug, Clone)]
pub struct TriggerRequest {
    pub url: String,
    pub secret: Option<String>,
    pub event: WebhookEvent,
    pub timeout_ms: u64,
    pub retries: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerOutcome {
    pub success: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub sent: usize,
    pub skipped: usize,
    pub failed: usize,
    pub errors: Vec<String>,
}

/// Signed POST fanout with a process-wide concurrency bound. One instance
/// lives in the runtime; every workflow trigger in the process goes
/// through its semaphore.
pub struct WebhookTriggerClient {
    http: reqwest::Client,
    semaphore: Arc<Semaphore>,
    batch_size: usize,
}

impl WebhookTriggerClient {
    pub fn new(config: &WebhookConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            semaphore: Arc::new(Semaphore::new(config.max_concurrency)),
            batch_size: config.batch_size,
        }
    }

    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Deliver one event. Never panics and never returns an `Err`-shaped
    /// surprise: the outcome is always a structured result. The semaphore
    /// permit is held across all attempts and released exactly once.
    pub async fn trigger_care_workflow(&self, request: TriggerRequest) -> TriggerOutcome {
        let body = match serde_json::to_string(&request.event) {
            Ok(body) => body,
            Err(error) => {
                return TriggerOutcome {
                    success: false,
                    error: Some(format!("payload serialization failed: {error}")),
                }
            }
        };

        let signature = request
            .secret
            .as_deref()
            .filter(|secret| !secret.is_empty())
            .map(|secret| sign_payload(&body, secret));

        let _permit = match self.semaphore.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(error) => {
                return TriggerOutcome {
                    success: false,
                    error: Some(format!("webhook semaphore closed: {error}")),
                }
            }
        };

        let attempts = request.retries + 1;
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            if attempt > 1 {
                let backoff = BACKOFF_BASE_MS * 2u64.pow(attempt - 2);
                tokio::time::sleep(Duration::from_millis(backoff)).await;
            }

            let mut builder = self
                .http
                .post(&request.url)
                .header("Content-Type", "application/json")
                .header(EVENT_ID_HEADER, request.event.event_id.to_string())
                .header("User-Agent", USER_AGENT)
                .body(body.clone());
            if let Some(signature) = &signature {
                builder = builder.header(SIGNATURE_HEADER, signature.clone());
            }

            let send = tokio::time::timeout(
                Duration::from_millis(request.timeout_ms),
                builder.send(),
            );

            match send.await {
                Ok(Ok(response)) if response.status().is_success() => {
                    debug!(
                        url = %request.url,
                        event_id = %request.event.event_id,
                        attempt,
                        "care workflow webhook delivered"
                    );
                    return TriggerOutcome {
                        success: true,
                        error: None,
                    };
                }
                Ok(Ok(response)) => {
                    last_error = format!("unexpected status {}", response.status());
                }
                Ok(Err(error)) => {
                    last_error = format!("request failed: {error}");
                }
                Err(_) => {
                    last_error = format!("timed out after {}ms", request.timeout_ms);
                }
            }

            warn!(
                url = %request.url,
                event_id = %request.event.event_id,
                attempt,
                error = %last_error,
                "care workflow webhook attempt failed"
            );
        }

        TriggerOutcome {
            success: false,
            error: Some(last_error),
        }
    }

    /// Deliver a batch, capped at the configured batch size; the remainder
    /// is counted as skipped rather than queued. Accepted events fire
    /// concurrently and the semaphore throttles actual in-flight requests.
    pub async fn trigger_care_workflow_batch(
        &self,
        url: &str,
        secret: Option<&str>,
        events: Vec<WebhookEvent>,
        timeout_ms: u64,
        retries: u32,
    ) -> BatchOutcome {
        let total = events.len();
        let accepted: Vec<WebhookEvent> = events.into_iter().take(self.batch_size).collect();
        let skipped = total - accepted.len();
        if skipped > 0 {
            warn!(
                url,
                total,
                skipped,
                batch_size = self.batch_size,
                "webhook batch capped, remainder skipped"
            );
        }

        let deliveries = accepted.into_iter().map(|event| {
            self.trigger_care_workflow(TriggerRequest {
                url: url.to_string(),
                secret: secret.map(str::to_string),
                event,
                timeout_ms,
                retries,
            })
        });
        let outcomes = futures::future::join_all(deliveries).await;

        let mut result = BatchOutcome {
            skipped,
            ..Default::default()
        };
        for outcome in outcomes {
            if outcome.success {
                result.sent += 1;
            } else {
                result.failed += 1;
                result
                    .errors
                    .push(outcome.error.unwrap_or_else(|| "unknown error".to_string()));
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::models::EntityType;
    use mockito::Matcher;
    use serde_json::json;

    fn client(max_concurrency: usize, batch_size: usize) -> WebhookTriggerClient {
        WebhookTriggerClient::new(&WebhookConfig {
            max_concurrency,
            batch_size,
            timeout_ms: 3000,
            max_retries: 2,
            base_url: String::new(),
        })
    }

    fn event() -> WebhookEvent {
        let entity = EntityRef::new(Uuid::new_v4(), EntityType::Lead, Uuid::new_v4());
        WebhookEvent::new(EVENT_SUGGESTION_CREATED, &entity, json!({"suggestion_id": "s1"}))
    }

    #[test]
    fn test_signature_is_deterministic_hex() {
        let body = r#"{"event_id":"abc"}"#;
        let first = sign_payload(body, "topsecret");
        let second = sign_payload(body, "topsecret");
        assert_eq!(first, second);
        assert_eq!(first.len(), 64);
        assert!(first.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(first, sign_payload(body, "othersecret"));
    }

    #[test]
    fn test_event_serializes_wire_shape() {
        let entity = EntityRef::new(Uuid::new_v4(), EntityType::Opportunity, Uuid::new_v4());
        let event = WebhookEvent::new(EVENT_STATE_TRANSITION, &entity, json!({"to": "active"}));
        let value: Value = serde_json::from_str(&serde_json::to_string(&event).expect("json"))
            .expect("parse");

        assert_eq!(value["type"], "care.state_transition");
        assert_eq!(value["entity"]["type"], "opportunity");
        assert_eq!(value["tenant_id"], entity.tenant_id.to_string());
        assert_eq!(value["payload"]["to"], "active");
        assert!(value["ts"].as_str().expect("ts").ends_with('Z'));
    }

    #[tokio::test]
    async fn test_delivery_success_with_signature_headers() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/hook")
            .match_header("content-type", "application/json")
            .match_header("user-agent", "AiSHA-CARE/1.0")
            .match_header("x-aisha-event-id", Matcher::Regex("[0-9a-f-]{36}".into()))
            .match_header("x-aisha-signature", Matcher::Regex("[0-9a-f]{64}".into()))
            .with_status(200)
            .create_async()
            .await;

        let client = client(5, 50);
        let outcome = client
            .trigger_care_workflow(TriggerRequest {
                url: format!("{}/hook", server.url()),
                secret: Some("topsecret".into()),
                event: event(),
                timeout_ms: 3000,
                retries: 0,
            })
            .await;

        assert!(outcome.success);
        assert!(outcome.error.is_none());
        mock.assert_async().await;
        assert_eq!(client.available_permits(), 5);
    }

    #[tokio::test]
    async fn test_unsigned_delivery_omits_signature_header() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/hook")
            .match_header("x-aisha-signature", Matcher::Missing)
            .with_status(204)
            .create_async()
            .await;

        let outcome = client(5, 50)
            .trigger_care_workflow(TriggerRequest {
                url: format!("{}/hook", server.url()),
                secret: None,
                event: event(),
                timeout_ms: 3000,
                retries: 0,
            })
            .await;

        assert!(outcome.success);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_non_2xx_exhausts_retries_and_reports() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/hook")
            .with_status(500)
            .expect(3)
            .create_async()
            .await;

        let outcome = client(5, 50)
            .trigger_care_workflow(TriggerRequest {
                url: format!("{}/hook", server.url()),
                secret: Some("s".into()),
                event: event(),
                timeout_ms: 3000,
                retries: 2,
            })
            .await;

        assert!(!outcome.success);
        assert!(outcome.error.expect("error").contains("500"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_returns_structured_error() {
        let client = client(5, 50);
        let outcome = client
            .trigger_care_workflow(TriggerRequest {
                url: "http://127.0.0.1:1/hook".into(),
                secret: None,
                event: event(),
                timeout_ms: 500,
                retries: 1,
            })
            .await;

        assert!(!outcome.success);
        assert!(outcome.error.is_some());
        assert_eq!(client.available_permits(), 5);
    }

    #[tokio::test]
    async fn test_batch_caps_and_counts() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/hook")
            .with_status(200)
            .expect(50)
            .create_async()
            .await;

        let client = client(5, 50);
        let events: Vec<WebhookEvent> = (0..75).map(|_| event()).collect();
        let outcome = client
            .trigger_care_workflow_batch(
                &format!("{}/hook", server.url()),
                Some("secret"),
                events,
                3000,
                0,
            )
            .await;

        assert_eq!(outcome.sent, 50);
        assert_eq!(outcome.skipped, 25);
        assert_eq!(outcome.failed, 0);
        assert!(outcome.errors.is_empty());
        assert_eq!(client.available_permits(), 5);
    }

    #[tokio::test]
    async fn test_batch_collects_errors_per_failure() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/hook")
            .with_status(503)
            .create_async()
            .await;

        let client = client(2, 10);
        let events: Vec<WebhookEvent> = (0..3).map(|_| event()).collect();
        let outcome = client
            .trigger_care_workflow_batch(
                &format!("{}/hook", server.url()),
                None,
                events,
                3000,
                0,
            )
            .await;

        assert_eq!(outcome.sent, 0);
        assert_eq!(outcome.failed, 3);
        assert_eq!(outcome.errors.len(), 3);
    }
}
