//! Planning and step-execution core for LLM agent applications.
//!
//! `stride` is the stateful heart of an agent loop: it keeps a bounded, typed
//! conversation history with exact token accounting, derives and incrementally
//! mutates a hierarchical task plan from model output, and correlates streamed
//! model output with tool round trips into one ordered message log.
//!
//! The crate deliberately does **not** talk to any LLM vendor. The transport
//! is an injected collaborator behind the [`ModelClient`](api::ModelClient)
//! trait; everything here is pure state-machine and bookkeeping logic that a
//! host application (desktop assistant, TUI, server) wires to its own
//! provider layer.
//!
//! # Where to find things
//!
//! - **Count tokens:** [`TokenAccountant`](context::TokenAccountant) — native
//!   model capability with a deterministic cl100k fallback.
//! - **Keep conversation state:** [`MessageHistory`](context::MessageHistory)
//!   and [`MessageManager`](context::MessageManager) — typed log, running
//!   token total, task lifecycle, sequential tool-call ids, budget eviction.
//! - **Track the plan:** [`Plan`](plan::Plan) — sections of ordered steps,
//!   markdown checklist rendering, 1-based addressable indices over
//!   non-terminal steps, batched [`update actions`](plan::UpdateStepsArgs).
//! - **Drive planning:** [`PlannerController`](agent::PlannerController) —
//!   the CREATE/UPDATE state machine with four structured-output strategies.
//! - **Correlate a turn:** [`TurnCoordinator`](agent::TurnCoordinator) —
//!   streamed deltas, pending tool calls, and tool results folded into one
//!   ordered sequence, keyed by the model-assigned call id.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`api`] | [`ModelClient`](api::ModelClient) seam, request/response types, structured-output binding |
//! | [`context`] | Token accounting, message history, budget enforcement, snapshots |
//! | [`plan`] | Plan data model, rendering, addressable indices, update batches |
//! | [`agent`] | Planner state machine, turn coordination, observer traits |

pub mod agent;
pub mod api;
pub mod context;
pub mod plan;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// Re-export schemars for downstream crates.
pub use schemars;

// ── Schema generation ──────────────────────────────────────────────

/// Generate a JSON Schema `serde_json::Value` from a type that implements
/// `schemars::JsonSchema`. This is the bridge between strong Rust types
/// and the `serde_json::Value` that function-calling APIs expect.
///
/// # Example
///
/// ```
/// use stride::json_schema_for;
/// use schemars::JsonSchema;
/// use serde::Deserialize;
///
/// #[derive(Deserialize, JsonSchema)]
/// struct StatusUpdate {
///     index: u32,
///     #[serde(default)]
///     note: Option<String>,
/// }
///
/// let schema = json_schema_for::<StatusUpdate>();
/// assert_eq!(schema["type"], "object");
/// assert!(schema["required"].as_array().unwrap().contains(&"index".into()));
/// ```
pub fn json_schema_for<T: JsonSchema>() -> serde_json::Value {
    let schema = schemars::schema_for!(T);
    serde_json::to_value(schema)
        .unwrap_or_else(|_| serde_json::json!({"type": "object", "properties": {}}))
}

// ── Message types ──────────────────────────────────────────────────

/// Role of a message in the conversation.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageRole::System => write!(f, "system"),
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
            MessageRole::Tool => write!(f, "tool"),
        }
    }
}

/// A message in the conversation.
///
/// Once added to a [`MessageHistory`](context::MessageHistory) the history
/// owns it exclusively; callers get clones back, never shared references.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Message {
    pub role: MessageRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn assistant_text(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn assistant_tool_calls(calls: Vec<ToolCall>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: None,
            tool_calls: Some(calls),
            tool_call_id: None,
        }
    }

    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Tool,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: Some(call_id.into()),
        }
    }
}

// ── Tool types ─────────────────────────────────────────────────────

/// The type of a tool definition. Currently always `Function`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum ToolType {
    #[serde(rename = "function")]
    Function,
}

/// Tool definition sent to the model (OpenAI function-calling format).
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ToolDef {
    #[serde(rename = "type")]
    pub tool_type: ToolType,
    pub function: FunctionDef,
}

impl ToolDef {
    /// Create a function-calling tool definition.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            tool_type: ToolType::Function,
            function: FunctionDef {
                name: name.into(),
                description: description.into(),
                parameters,
            },
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct FunctionDef {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// The type of a tool call. Currently always `Function`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum CallType {
    #[serde(rename = "function")]
    Function,
}

/// A tool call emitted by the model.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub call_type: CallType,
    pub function: FunctionCallData,
}

impl ToolCall {
    /// Convenience constructor for tests and synthesized calls.
    pub fn function(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            call_type: CallType::Function,
            function: FunctionCallData {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct FunctionCallData {
    pub name: String,
    pub arguments: String,
}

/// Token usage statistics reported by a model invocation.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct UsageInfo {
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
    pub total_tokens: Option<u32>,
}
