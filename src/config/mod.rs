use dotenvy::dotenv;
use std::env;

/// Process-wide CARE configuration. Read once at start-up; every numeric
/// value is parsed with a default and clamped to its documented bounds.
#[derive(Debug, Clone)]
pub struct CareConfig {
    pub autonomy_enabled: bool,
    pub shadow_mode: bool,
    pub state_write_enabled: bool,
    pub workflow_triggers_enabled: bool,
    pub webhook: WebhookConfig,
    pub cache: CacheConfig,
    pub thresholds: ThresholdConfig,
    pub worker: WorkerConfig,
    pub budget: BudgetConfig,
}

#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub max_concurrency: usize,
    pub batch_size: usize,
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub base_url: String,
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub max_size: usize,
    pub ttl_seconds: u64,
}

/// Silence and staleness thresholds, in whole days.
#[derive(Debug, Clone)]
pub struct ThresholdConfig {
    pub at_risk_silence_days: i64,
    pub dormant_silence_days: i64,
    pub lead_stagnant_days: i64,
    pub deal_decay_days: i64,
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub interval_seconds: u64,
    pub pool_size: usize,
    pub scan_deadline_ms: u64,
    pub batch_cap: usize,
    pub suggestion_cooldown_hours: i64,
}

/// Token caps for the budget manager. Bounds match the documented ranges.
#[derive(Debug, Clone)]
pub struct BudgetConfig {
    pub hard_ceiling: usize,
    pub system_prompt_max: usize,
    pub tool_schema_max: usize,
    pub memory_max: usize,
    pub tool_result_max: usize,
    pub output_max: usize,
}

fn get_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(default)
}

fn get_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn get_i64(key: &str, default: i64) -> i64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn get_usize_clamped(key: &str, default: usize, min: usize, max: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
        .clamp(min, max)
}

impl CareConfig {
    pub fn load() -> Self {
        dotenv().ok();

        Self {
            autonomy_enabled: get_bool("CARE_AUTONOMY_ENABLED", false),
            shadow_mode: get_bool("CARE_SHADOW_MODE", false),
            state_write_enabled: get_bool("CARE_STATE_WRITE_ENABLED", true),
            workflow_triggers_enabled: get_bool("CARE_WORKFLOW_TRIGGERS_ENABLED", true),
            webhook: WebhookConfig {
                max_concurrency: get_usize_clamped("CARE_WEBHOOK_MAX_CONCURRENCY", 5, 1, 64),
                batch_size: get_usize_clamped("CARE_WEBHOOK_BATCH_SIZE", 50, 1, 500),
                timeout_ms: get_u64("CARE_WEBHOOK_TIMEOUT_MS", 3000),
                max_retries: get_u64("CARE_WEBHOOK_MAX_RETRIES", 2) as u32,
                base_url: env::var("CARE_WEBHOOK_BASE_URL").unwrap_or_default(),
            },
            cache: CacheConfig {
                max_size: get_usize_clamped("CARE_CONFIG_CACHE_MAX_SIZE", 500, 1, 10_000),
                ttl_seconds: get_u64("CARE_CONFIG_CACHE_TTL_SECONDS", 60),
            },
            thresholds: ThresholdConfig {
                at_risk_silence_days: get_i64("CARE_AT_RISK_SILENCE_DAYS", 14).max(1),
                dormant_silence_days: get_i64("CARE_DORMANT_SILENCE_DAYS", 30).max(1),
                lead_stagnant_days: get_i64("CARE_LEAD_STAGNANT_DAYS", 14).max(1),
                deal_decay_days: get_i64("CARE_DEAL_DECAY_DAYS", 21).max(1),
            },
            worker: WorkerConfig {
                interval_seconds: get_u64("CARE_TRIGGER_INTERVAL_SECONDS", 300).max(10),
                pool_size: get_usize_clamped("CARE_TRIGGER_WORKER_POOL", 4, 1, 32),
                scan_deadline_ms: get_u64("CARE_TRIGGER_SCAN_DEADLINE_MS", 30_000).max(1_000),
                batch_cap: get_usize_clamped("CARE_TRIGGER_BATCH_CAP", 50, 1, 500),
                suggestion_cooldown_hours: get_i64("CARE_SUGGESTION_COOLDOWN_HOURS", 24).max(0),
            },
            budget: BudgetConfig {
                hard_ceiling: get_usize_clamped("AI_TOKEN_HARD_CEILING", 6000, 4000, 8000),
                system_prompt_max: get_usize_clamped("AI_TOKEN_SYSTEM_PROMPT_MAX", 1800, 1200, 2500),
                tool_schema_max: get_usize_clamped("AI_TOKEN_TOOL_SCHEMA_MAX", 1000, 800, 1200),
                memory_max: get_usize_clamped("AI_TOKEN_MEMORY_MAX", 400, 250, 500),
                tool_result_max: get_usize_clamped("AI_TOKEN_TOOL_RESULT_MAX", 700, 100, 700),
                output_max: get_usize_clamped("AI_TOKEN_OUTPUT_MAX", 350, 100, 350),
            },
        }
    }
}

impl Default for CareConfig {
    fn default() -> Self {
        Self {
            autonomy_enabled: false,
            shadow_mode: false,
            state_write_enabled: true,
            workflow_triggers_enabled: true,
            webhook: WebhookConfig {
                max_concurrency: 5,
                batch_size: 50,
                timeout_ms: 3000,
                max_retries: 2,
                base_url: String::new(),
            },
            cache: CacheConfig {
                max_size: 500,
                ttl_seconds: 60,
            },
            thresholds: ThresholdConfig {
                at_risk_silence_days: 14,
                dormant_silence_days: 30,
                lead_stagnant_days: 14,
                deal_decay_days: 21,
            },
            worker: WorkerConfig {
                interval_seconds: 300,
                pool_size: 4,
                scan_deadline_ms: 30_000,
                batch_cap: 50,
                suggestion_cooldown_hours: 24,
            },
            budget: BudgetConfig {
                hard_ceiling: 6000,
                system_prompt_max: 1800,
                tool_schema_max: 1000,
                memory_max: 400,
                tool_result_max: 700,
                output_max: 350,
            },
        }
    }
}
