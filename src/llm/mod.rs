use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::budget::ToolSpec;
use crate::config::BudgetConfig;
use crate::shared::models::{SuggestedAction, SuggestionPriority};

/// What the model proposed. Optional fields fall back to gate defaults
/// (confidence 0.75, empty reasoning, normal priority).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedSuggestion {
    pub action: SuggestedAction,
    pub confidence: Option<f64>,
    pub reasoning: Option<String>,
    pub priority: Option<SuggestionPriority>,
}

/// Provider seam for suggestion generation. `None` means the model did not
/// produce a usable action; the gate records that as `generation_failed`
/// and never retries.
#[async_trait]
pub trait SuggestionProvider: Send + Sync {
    async fn generate(
        &self,
        prompt: &str,
        tools: &[ToolSpec],
        caps: &BudgetConfig,
    ) -> Option<GeneratedSuggestion>;
}

/// Provider that always declines. Useful as wiring default when no model
/// is configured; every gate call becomes `generation_failed`.
pub struct DisabledSuggestionProvider;

#[async_trait]
impl SuggestionProvider for DisabledSuggestionProvider {
    async fn generate(
        &self,
        _prompt: &str,
        _tools: &[ToolSpec],
        _caps: &BudgetConfig,
    ) -> Option<GeneratedSuggestion> {
        None
    }
}
