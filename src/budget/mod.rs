use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::BudgetConfig;

/// Tools that survive every drop pass; the assistant is useless without
/// them.
pub const CORE_TOOLS: [&str; 3] = ["create_task", "create_note", "follow_up"];

const PER_MESSAGE_OVERHEAD_TOKENS: usize = 4;
const MIN_SYSTEM_PROMPT_TOKENS: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<Value>,
}

impl ChatMessage {
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// chars/4, rounded up. Good enough for budget enforcement; the provider
/// bills the real count.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

pub fn estimate_message_tokens(message: &ChatMessage) -> usize {
    let tool_call_tokens: usize = message
        .tool_calls
        .iter()
        .map(|call| estimate_tokens(&call.to_string()))
        .sum();
    PER_MESSAGE_OVERHEAD_TOKENS + estimate_tokens(&message.content) + tool_call_tokens
}

pub fn estimate_messages_tokens(messages: &[ChatMessage]) -> usize {
    messages.iter().map(estimate_message_tokens).sum()
}

pub fn estimate_tool_tokens(tool: &ToolSpec) -> usize {
    let serialized = serde_json::json!({
        "name": tool.name,
        "description": tool.description,
        "parameters": tool.parameters,
    })
    .to_string();
    estimate_tokens(&serialized)
}

pub fn estimate_tools_tokens(tools: &[ToolSpec]) -> usize {
    tools.iter().map(estimate_tool_tokens).sum()
}

fn truncate_to_tokens(text: &str, max_tokens: usize) -> String {
    if estimate_tokens(text) <= max_tokens {
        return text.to_string();
    }
    text.chars().take(max_tokens * 4).collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetReport {
    pub system_prompt_tokens: usize,
    pub messages_tokens: usize,
    pub tools_tokens: usize,
    pub memory_tokens: usize,
    pub tool_results_tokens: usize,
    pub total_tokens: usize,
    pub hard_ceiling: usize,
    pub over_budget: bool,
}

#[derive(Debug, Clone, Default)]
pub struct BudgetInput {
    pub system_prompt: String,
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolSpec>,
    pub memory_text: String,
    pub tool_result_summaries: Vec<String>,
    pub forced_tool: Option<String>,
}

#[derive(Debug, Clone)]
pub struct BudgetOutcome {
    pub system_prompt: String,
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolSpec>,
    pub memory_text: String,
    pub tool_result_summaries: Vec<String>,
    pub actions_taken: Vec<String>,
    pub total_tokens: usize,
}

pub fn build_budget_report(input: &BudgetInput, caps: &BudgetConfig) -> BudgetReport {
    let system_prompt_tokens = estimate_tokens(&input.system_prompt);
    let messages_tokens = estimate_messages_tokens(&input.messages);
    let tools_tokens = estimate_tools_tokens(&input.tools);
    let memory_tokens = estimate_tokens(&input.memory_text);
    let tool_results_tokens: usize = input
        .tool_result_summaries
        .iter()
        .map(|summary| estimate_tokens(summary))
        .sum();
    let total_tokens = system_prompt_tokens
        + messages_tokens
        + tools_tokens
        + memory_tokens
        + tool_results_tokens;

    BudgetReport {
        system_prompt_tokens,
        messages_tokens,
        tools_tokens,
        memory_tokens,
        tool_results_tokens,
        total_tokens,
        hard_ceiling: caps.hard_ceiling,
        over_budget: total_tokens > caps.hard_ceiling,
    }
}

/// Greedy admission by serialized size, up to `cap` tokens. The forced
/// tool, when named and present, is admitted first whatever its size.
pub fn enforce_tool_schema_cap(
    tools: Vec<ToolSpec>,
    cap: usize,
    forced_tool: Option<&str>,
) -> (Vec<ToolSpec>, usize) {
    let mut kept = Vec::new();
    let mut budget_used = 0usize;
    let mut dropped = 0usize;

    let mut remaining = Vec::new();
    for tool in tools {
        if forced_tool == Some(tool.name.as_str()) {
            budget_used += estimate_tool_tokens(&tool);
            kept.push(tool);
        } else {
            remaining.push(tool);
        }
    }

    for tool in remaining {
        let size = estimate_tool_tokens(&tool);
        if budget_used + size <= cap {
            budget_used += size;
            kept.push(tool);
        } else {
            dropped += 1;
        }
    }

    (kept, dropped)
}

fn total_of(
    system_prompt: &str,
    messages: &[ChatMessage],
    tools: &[ToolSpec],
    memory_text: &str,
    tool_result_summaries: &[String],
) -> usize {
    estimate_tokens(system_prompt)
        + estimate_messages_tokens(messages)
        + estimate_tools_tokens(tools)
        + estimate_tokens(memory_text)
        + tool_result_summaries
            .iter()
            .map(|s| estimate_tokens(s))
            .sum::<usize>()
}

/// Enforce the hard ceiling by dropping components in priority order:
/// memory, then tool-result summaries, then droppable tools, then the
/// oldest messages. The last user message and the forced tool always
/// survive; the system prompt is truncated, never removed.
pub fn apply_budget_caps(input: BudgetInput, caps: &BudgetConfig) -> BudgetOutcome {
    let mut actions: Vec<String> = Vec::new();

    let system_prompt = truncate_to_tokens(&input.system_prompt, caps.system_prompt_max);
    if system_prompt.len() < input.system_prompt.len() {
        actions.push("truncated_system_prompt".to_string());
    }

    let memory_text = truncate_to_tokens(&input.memory_text, caps.memory_max);
    if memory_text.len() < input.memory_text.len() {
        actions.push("truncated_memory".to_string());
    }

    let mut tool_result_summaries: Vec<String> = Vec::new();
    let mut truncated_results = false;
    for summary in &input.tool_result_summaries {
        let capped = truncate_to_tokens(summary, caps.tool_result_max);
        truncated_results |= capped.len() < summary.len();
        tool_result_summaries.push(capped);
    }
    if truncated_results {
        actions.push("truncated_tool_results".to_string());
    }

    let forced = input.forced_tool.as_deref();
    let (mut tools, dropped) =
        enforce_tool_schema_cap(input.tools, caps.tool_schema_max, forced);
    if dropped > 0 {
        actions.push(format!("dropped_{dropped}_tools"));
    }

    let mut messages = input.messages;
    let mut memory_text = memory_text;

    let last_user_index = messages
        .iter()
        .rposition(|message| message.role == ChatRole::User);

    // Ceiling passes, cheapest sacrifice first.
    if total_of(&system_prompt, &messages, &tools, &memory_text, &tool_result_summaries)
        > caps.hard_ceiling
        && !memory_text.is_empty()
    {
        memory_text.clear();
        actions.push("cleared_memory".to_string());
    }

    if total_of(&system_prompt, &messages, &tools, &memory_text, &tool_result_summaries)
        > caps.hard_ceiling
        && !tool_result_summaries.is_empty()
    {
        tool_result_summaries.clear();
        actions.push("cleared_tool_results".to_string());
    }

    if total_of(&system_prompt, &messages, &tools, &memory_text, &tool_result_summaries)
        > caps.hard_ceiling
    {
        let before = tools.len();
        tools.retain(|tool| {
            forced == Some(tool.name.as_str()) || CORE_TOOLS.contains(&tool.name.as_str())
        });
        let dropped = before - tools.len();
        if dropped > 0 {
            actions.push(format!("dropped_{dropped}_tools"));
        }
    }

    if total_of(&system_prompt, &messages, &tools, &memory_text, &tool_result_summaries)
        > caps.hard_ceiling
    {
        let mut dropped = 0usize;
        let mut index = 0usize;
        let mut protected = last_user_index;
        while total_of(&system_prompt, &messages, &tools, &memory_text, &tool_result_summaries)
            > caps.hard_ceiling
            && index < messages.len()
        {
            if protected == Some(index) {
                index += 1;
                continue;
            }
            messages.remove(index);
            if let Some(p) = protected {
                if p > index {
                    protected = Some(p - 1);
                }
            }
            dropped += 1;
        }
        if dropped > 0 {
            actions.push(format!("dropped_{dropped}_messages"));
        }
    }

    // Last resort: shrink the system prompt to fit. It is truncated, never
    // removed, so a small floor always remains.
    let mut system_prompt = system_prompt;
    let total = total_of(
        &system_prompt,
        &messages,
        &tools,
        &memory_text,
        &tool_result_summaries,
    );
    if total > caps.hard_ceiling {
        let over = total - caps.hard_ceiling;
        let current = estimate_tokens(&system_prompt);
        let target = current.saturating_sub(over).max(MIN_SYSTEM_PROMPT_TOKENS);
        if target < current {
            system_prompt = truncate_to_tokens(&system_prompt, target);
            actions.push("reduced_system_prompt".to_string());
        }
    }

    let total_tokens = total_of(
        &system_prompt,
        &messages,
        &tools,
        &memory_text,
        &tool_result_summaries,
    );

    BudgetOutcome {
        system_prompt,
        messages,
        tools,
        memory_text,
        tool_result_summaries,
        actions_taken: actions,
        total_tokens,
    }
}
