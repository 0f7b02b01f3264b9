use std::collections::{HashMap, VecDeque};
use std::env;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::CareConfig;
use crate::shared::models::{ConfigSource, TenantCareConfig};
use crate::store::CareStore;

#[derive(Debug, Clone)]
struct CacheEntry {
    config: TenantCareConfig,
    inserted_at: Instant,
}

/// Environment-level defaults used when a tenant has no stored config or
/// the store is unavailable. Read once at construction.
#[derive(Debug, Clone)]
struct EnvDefaults {
    workflow_id: Option<String>,
    webhook_url: Option<String>,
    webhook_secret: Option<String>,
    is_enabled: bool,
    state_write_enabled: bool,
    shadow_mode: bool,
    webhook_timeout_ms: u64,
    webhook_max_retries: u32,
}

impl EnvDefaults {
    fn load(global: &CareConfig) -> Self {
        let non_empty = |key: &str| env::var(key).ok().filter(|v| !v.is_empty());
        Self {
            workflow_id: non_empty("CARE_DEFAULT_WORKFLOW_ID"),
            webhook_url: non_empty("CARE_DEFAULT_WEBHOOK_URL"),
            webhook_secret: non_empty("CARE_DEFAULT_WEBHOOK_SECRET"),
            is_enabled: global.workflow_triggers_enabled,
            state_write_enabled: global.state_write_enabled,
            shadow_mode: global.shadow_mode,
            webhook_timeout_ms: global.webhook.timeout_ms,
            webhook_max_retries: global.webhook.max_retries,
        }
    }

    fn config_for(&self, tenant_id: Uuid) -> TenantCareConfig {
        TenantCareConfig {
            tenant_id,
            workflow_id: self.workflow_id.clone(),
            webhook_url: self.webhook_url.clone(),
            webhook_secret: self.webhook_secret.clone(),
            is_enabled: self.is_enabled,
            state_write_enabled: self.state_write_enabled,
            shadow_mode: self.shadow_mode,
            webhook_timeout_ms: self.webhook_timeout_ms,
            webhook_max_retries: self.webhook_max_retries,
            source: ConfigSource::Environment,
        }
    }
}

/// TTL + capped cache of per-tenant workflow config. Insertion order doubles
/// as the LRU order: re-inserting a key moves it to newest, and overflow
/// evicts from the oldest end.
pub struct TenantConfigCache {
    store: Arc<dyn CareStore>,
    ttl: Duration,
    max_size: usize,
    defaults: EnvDefaults,
    inner: Mutex<CacheInner>,
}

#[derive(Default)]
struct CacheInner {
    entries: HashMap<Uuid, CacheEntry>,
    order: VecDeque<Uuid>,
}

impl TenantConfigCache {
    pub fn new(store: Arc<dyn CareStore>, global: &CareConfig) -> Self {
        Self {
            store,
            ttl: Duration::from_secs(global.cache.ttl_seconds),
            max_size: global.cache.max_size.max(1),
            defaults: EnvDefaults::load(global),
            inner: Mutex::new(CacheInner::default()),
        }
    }

    /// Resolve the config for a tenant: cache hit if fresh, otherwise load
    /// from the store, falling back to environment defaults on a miss or a
    /// store error. The resolved value (fallback included) is cached.
    pub async fn get(&self, tenant_id: Uuid) -> TenantCareConfig {
        {
            let inner = self.inner.lock().await;
            if let Some(entry) = inner.entries.get(&tenant_id) {
                if entry.inserted_at.elapsed() < self.ttl {
                    return entry.config.clone();
                }
            }
        }

        // Not held across the store call.
        let resolved = match self.store.load_care_config(tenant_id).await {
            Ok(Some(config)) => config,
            Ok(None) => {
                debug!(%tenant_id, "no stored care config, using environment defaults");
                self.defaults.config_for(tenant_id)
            }
            Err(error) => {
                warn!(%tenant_id, %error, "care config load failed, using environment defaults");
                self.defaults.config_for(tenant_id)
            }
        };

        self.insert(tenant_id, resolved.clone()).await;
        resolved
    }

    async fn insert(&self, tenant_id: Uuid, config: TenantCareConfig) {
        let mut inner = self.inner.lock().await;

        if inner.entries.contains_key(&tenant_id) {
            inner.order.retain(|id| *id != tenant_id);
        }
        inner.order.push_back(tenant_id);
        inner.entries.insert(
            tenant_id,
            CacheEntry {
                config,
                inserted_at: Instant::now(),
            },
        );

        while inner.entries.len() > self.max_size {
            match inner.order.pop_front() {
                Some(oldest) => {
                    inner.entries.remove(&oldest);
                }
                None => break,
            }
        }
    }

    pub async fn invalidate(&self, tenant_id: Uuid) {
        let mut inner = self.inner.lock().await;
        inner.entries.remove(&tenant_id);
        inner.order.retain(|id| *id != tenant_id);
    }

    pub async fn clear(&self) {
        let mut inner = self.inner.lock().await;
        inner.entries.clear();
        inner.order.clear();
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    #[cfg(test)]
    fn with_limits(store: Arc<dyn CareStore>, global: &CareConfig, ttl: Duration, max_size: usize) -> Self {
        Self {
            store,
            ttl,
            max_size,
            defaults: EnvDefaults::load(global),
            inner: Mutex::new(CacheInner::default()),
        }
    }
}
