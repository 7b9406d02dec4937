//! The model-invocation seam.
//!
//! This crate never performs an LLM call itself. Host applications implement
//! [`ModelClient`] over their provider layer (HTTP, IPC, in-process) and hand
//! it to the components that need one. The request type carries everything
//! the planning state machine relies on: an ordered message list, a bound
//! tool set with a forced choice, a structured-output binding, and stop
//! sequences.
//!
//! Controllers hold `Arc<dyn ModelClient>`, so the trait must stay
//! dyn-compatible and returns boxed futures rather than using `async fn`.

use crate::{Message, ToolCall, ToolDef, UsageInfo};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// ── Structured output ──────────────────────────────────────────────

/// Strategy for obtaining schema-conforming output from a model.
///
/// `Raw` relies on prompt discipline plus client-side JSON extraction; the
/// other three bind the schema at the API level with increasing strictness.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StructuredMethod {
    Raw,
    FunctionCalling,
    JsonMode,
    JsonSchema,
}

/// Output format binding for a model invocation.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseFormat {
    JsonObject,
    JsonSchema { schema: serde_json::Value },
}

/// Tool-choice constraint for a bound tool set.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ToolChoice {
    /// The model decides whether to call a tool.
    Auto,
    /// The model must call at least one of the bound tools.
    Any,
    /// The model must call the named tool.
    Tool(String),
}

// ── Request / response ─────────────────────────────────────────────

/// A model invocation request: ordered messages plus binding configuration.
#[derive(Serialize, Clone, Debug)]
pub struct ModelRequest {
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDef>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
}

impl ModelRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            tools: None,
            tool_choice: None,
            response_format: None,
            stop: None,
        }
    }

    /// Bind a fixed tool set.
    pub fn with_tools(mut self, tools: Vec<ToolDef>) -> Self {
        self.tools = Some(tools);
        self
    }

    /// Constrain the tool choice (use [`ToolChoice::Any`] to force a call).
    pub fn with_tool_choice(mut self, choice: ToolChoice) -> Self {
        self.tool_choice = Some(choice);
        self
    }

    /// Bind a structured output format.
    pub fn with_response_format(mut self, format: ResponseFormat) -> Self {
        self.response_format = Some(format);
        self
    }

    /// Bind token stop sequences.
    pub fn with_stop(mut self, stop: Vec<String>) -> Self {
        self.stop = Some(stop);
        self
    }
}

/// The aggregate result of one model invocation.
#[derive(Deserialize, Clone, Debug, Default)]
pub struct ModelResponse {
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    pub usage: Option<UsageInfo>,
}

impl ModelResponse {
    /// A text-only response (test helper and common adapter path).
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            tool_calls: Vec::new(),
            usage: None,
        }
    }

    /// A response consisting solely of tool calls.
    pub fn calls(tool_calls: Vec<ToolCall>) -> Self {
        Self {
            content: None,
            tool_calls,
            usage: None,
        }
    }
}

// ── Collaborator traits ────────────────────────────────────────────

/// Boxed future returned by [`ModelClient::chat`].
pub type ChatFuture<'a> = BoxFuture<'a, Result<ModelResponse, String>>;

/// The model invocation collaborator.
///
/// Implementations are expected to honor the request's tool binding (with
/// forced choice) and structured-output format. Transport failures surface
/// as `Err` strings; the planner decides whether they are fatal for the turn.
pub trait ModelClient: Send + Sync {
    fn chat<'a>(&'a self, request: &'a ModelRequest) -> ChatFuture<'a>;
}

/// Optional native token-counting capability of a model.
///
/// When a provider exposes exact counting, wire it in here; the
/// [`TokenAccountant`](crate::context::TokenAccountant) falls back to a
/// deterministic local tokenizer when this errors or is absent.
pub trait TokenCounter: Send + Sync {
    fn count_tokens(&self, message: &Message) -> Result<u32, String>;
}

/// Registry of model clients with an explicit lifecycle.
///
/// Replaces the ambient provider singleton of typical host apps: components
/// receive their [`ModelClient`] by constructor parameter, and whatever owns
/// the process wires this registry behind that, with `init`/`refresh`/
/// `dispose` called at well-defined points instead of on first touch.
pub trait ModelRegistry: Send + Sync {
    fn init(&self) -> Result<(), String>;
    fn refresh(&self) -> Result<(), String>;
    fn dispose(&self);
    fn resolve(&self, model: &str) -> Option<Arc<dyn ModelClient>>;
}
