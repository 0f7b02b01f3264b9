use std::collections::HashMap;

use once_cell::sync::Lazy;
use serde_json::json;

use crate::budget::ToolSpec;
use crate::policy::ProposedActionType;

/// One CRM tool a suggestion may name. The registry maps the wire-level
/// tool name to its typed descriptor; unknown names never reach the store.
#[derive(Debug, Clone)]
pub struct ToolDescriptor {
    pub name: &'static str,
    pub description: &'static str,
    pub action_type: ProposedActionType,
}

impl ToolDescriptor {
    pub fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name.to_string(),
            description: self.description.to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "record_id": {"type": "string"},
                },
                "additionalProperties": true,
            }),
        }
    }
}

/// Process-wide registry snapshot, built on first use and read-only after.
static REGISTRY: Lazy<HashMap<&'static str, ToolDescriptor>> = Lazy::new(|| {
    let descriptors = [
        ToolDescriptor {
            name: "update_lead",
            description: "Update lead fields such as status or owner",
            action_type: ProposedActionType::Update,
        },
        ToolDescriptor {
            name: "update_opportunity",
            description: "Update opportunity stage, amount or close date",
            action_type: ProposedActionType::Update,
        },
        ToolDescriptor {
            name: "create_task",
            description: "Create a task for the record owner",
            action_type: ProposedActionType::Task,
        },
        ToolDescriptor {
            name: "create_note",
            description: "Attach an internal note to the record",
            action_type: ProposedActionType::Note,
        },
        ToolDescriptor {
            name: "follow_up",
            description: "Schedule a follow-up touch for the record",
            action_type: ProposedActionType::FollowUp,
        },
        ToolDescriptor {
            name: "schedule_meeting",
            description: "Propose a meeting with the contact",
            action_type: ProposedActionType::Meeting,
        },
        ToolDescriptor {
            name: "draft_message",
            description: "Draft an outbound message for user review",
            action_type: ProposedActionType::Message,
        },
    ];
    descriptors
        .into_iter()
        .map(|descriptor| (descriptor.name, descriptor))
        .collect()
});

pub fn lookup_tool(name: &str) -> Option<&'static ToolDescriptor> {
    REGISTRY.get(name)
}

pub fn tool_specs() -> Vec<ToolSpec> {
    let mut specs: Vec<ToolSpec> = REGISTRY.values().map(ToolDescriptor::spec).collect();
    specs.sort_by(|a, b| a.name.cmp(&b.name));
    specs
}
