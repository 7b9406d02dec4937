//! Correlation of one model invocation turn.
//!
//! A turn starts when a model call begins and covers the streamed assistant
//! message plus every tool execution the model requested. The coordinator
//! keeps the per-turn message list consistent while results arrive out of
//! band: tool completions are matched to their requests by the
//! model-assigned call id when the dispatcher provides one, falling back to
//! request order when it does not.
//!
//! Failures inside a turn never escape the coordinator. A failing tool or
//! model step marks the matching message with [`TurnStatus::Error`] and the
//! turn carries on.

use crate::agent::events::{TurnEvent, TurnObserver};
use crate::api::ModelResponse;
use crate::{Message, MessageRole, ToolCall, UsageInfo};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, warn};

// ── Turn messages ──────────────────────────────────────────────────

/// Delivery state of one message within a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnStatus {
    /// Content is still arriving.
    Streaming,
    /// Complete and usable.
    Finished,
    /// The producing step failed; see `error`.
    Error,
}

/// One message of a turn, with streaming and correlation metadata on top of
/// the wire fields.
#[derive(Debug, Clone)]
pub struct TurnMessage {
    pub role: MessageRole,
    pub content: Option<String>,
    pub tool_calls: Option<Vec<ToolCall>>,
    pub tool_call_id: Option<String>,
    pub model: Option<String>,
    pub usage: Option<UsageInfo>,
    pub status: TurnStatus,
    pub error: Option<String>,
}

impl TurnMessage {
    fn from_message(message: &Message) -> Self {
        Self {
            role: message.role,
            content: message.content.clone(),
            tool_calls: message.tool_calls.clone(),
            tool_call_id: message.tool_call_id.clone(),
            model: None,
            usage: None,
            status: TurnStatus::Finished,
            error: None,
        }
    }

    fn assistant_placeholder(model: Option<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: None,
            tool_calls: None,
            tool_call_id: None,
            model,
            usage: None,
            status: TurnStatus::Streaming,
            error: None,
        }
    }

    fn tool_placeholder(call_id: String) -> Self {
        Self {
            role: MessageRole::Tool,
            content: None,
            tool_calls: None,
            tool_call_id: Some(call_id),
            model: None,
            usage: None,
            status: TurnStatus::Streaming,
            error: None,
        }
    }
}

// ── Coordinator ────────────────────────────────────────────────────

/// Tracks the messages and pending tool calls of a single turn. One
/// coordinator per turn; never reused across invocations.
pub struct TurnCoordinator {
    messages: Vec<TurnMessage>,
    pending: VecDeque<ToolCall>,
    /// Index of the message currently being produced, if any.
    current: Option<usize>,
    observer: Option<Arc<dyn TurnObserver>>,
}

impl std::fmt::Debug for TurnCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TurnCoordinator")
            .field("messages", &self.messages.len())
            .field("pending", &self.pending.len())
            .field("current", &self.current)
            .finish()
    }
}

impl Default for TurnCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl TurnCoordinator {
    pub fn new() -> Self {
        Self {
            messages: Vec::new(),
            pending: VecDeque::new(),
            current: None,
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn TurnObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    fn notify(&self, event: TurnEvent<'_>) {
        if let Some(observer) = &self.observer {
            observer.on_turn_event(&event);
        }
    }

    pub fn messages(&self) -> &[TurnMessage] {
        &self.messages
    }

    pub fn pending_tool_calls(&self) -> usize {
        self.pending.len()
    }

    // ── Model lifecycle ────────────────────────────────────────────

    /// Begin a model invocation.
    ///
    /// If the request tail carries a user message the turn hasn't recorded
    /// yet, record it first so the stream reads in conversation order. Then
    /// open an empty assistant placeholder and mark it current.
    pub fn on_model_start(&mut self, incoming_tail: Option<&Message>, model: Option<&str>) {
        if let Some(tail) = incoming_tail
            && tail.role == MessageRole::User
            && !self.already_recorded(tail)
        {
            self.messages.push(TurnMessage::from_message(tail));
        }

        self.messages.push(TurnMessage::assistant_placeholder(
            model.map(str::to_string),
        ));
        self.current = Some(self.messages.len() - 1);
        self.notify(TurnEvent::ModelStart { model });
    }

    /// Whether the most recent recorded message of this role matches. Tool
    /// and assistant entries in between must not defeat the comparison.
    fn already_recorded(&self, message: &Message) -> bool {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == message.role)
            .is_some_and(|m| m.content == message.content)
    }

    /// Append a streamed content delta to the current assistant message.
    pub fn on_model_token(&mut self, delta: &str) {
        if delta.is_empty() {
            return;
        }
        let Some(idx) = self.current else {
            debug!("dropping model token with no message in flight");
            return;
        };
        self.messages[idx]
            .content
            .get_or_insert_with(String::new)
            .push_str(delta);
        self.notify(TurnEvent::ModelToken { delta });
    }

    /// Finish the model invocation with its aggregate response.
    ///
    /// The aggregate is authoritative: it overwrites whatever the deltas
    /// accumulated, then the requested tool calls are queued in order.
    pub fn on_model_end(&mut self, response: &ModelResponse) {
        let tool_call_count = response.tool_calls.len();
        if let Some(idx) = self.current.take() {
            let message = &mut self.messages[idx];
            message.content = response.content.clone();
            message.tool_calls = if response.tool_calls.is_empty() {
                None
            } else {
                Some(response.tool_calls.clone())
            };
            message.usage = response.usage.clone();
            message.status = TurnStatus::Finished;
        }
        self.pending.extend(response.tool_calls.iter().cloned());
        self.notify(TurnEvent::ModelEnd { tool_call_count });
    }

    /// Fail the model invocation, marking the in-flight assistant message.
    pub fn on_model_error(&mut self, description: &str) {
        if let Some(idx) = self.current.take() {
            self.messages[idx].status = TurnStatus::Error;
            self.messages[idx].error = Some(description.to_string());
        }
        self.notify(TurnEvent::Error { description });
    }

    // ── Tool lifecycle ─────────────────────────────────────────────

    /// Begin a tool execution, binding it to a queued tool call.
    ///
    /// When the dispatcher knows the model-assigned call id it binds by id,
    /// removing that entry from wherever it sits in the queue; `None` falls
    /// back to dequeuing the oldest request. Returns the bound call id, or
    /// `None` when nothing matched.
    pub fn on_tool_start(&mut self, call_id: Option<&str>) -> Option<String> {
        let call = match call_id {
            Some(id) => {
                let pos = self.pending.iter().position(|c| c.id == id);
                match pos {
                    Some(pos) => self.pending.remove(pos),
                    None => {
                        warn!("tool start for unknown call id {id}");
                        None
                    }
                }
            }
            None => self.pending.pop_front(),
        }?;

        self.messages
            .push(TurnMessage::tool_placeholder(call.id.clone()));
        self.current = Some(self.messages.len() - 1);
        self.notify(TurnEvent::ToolStart {
            call_id: &call.id,
            name: &call.function.name,
        });
        Some(call.id)
    }

    /// Deliver a tool result for the given call id.
    ///
    /// Recognized payloads are an object `{"content": "...", "status"?: ...}`
    /// or a bare JSON string. Anything else marks the message finished
    /// without overwriting content.
    pub fn on_tool_end(&mut self, call_id: &str, output: &serde_json::Value) {
        let Some(idx) = self.index_of_call(call_id) else {
            warn!("tool result for unknown call id {call_id}");
            return;
        };

        let message = &mut self.messages[idx];
        match output {
            serde_json::Value::Object(map) => {
                if let Some(serde_json::Value::String(content)) = map.get("content") {
                    message.content = Some(content.clone());
                }
                let errored = map
                    .get("status")
                    .and_then(|s| s.as_str())
                    .is_some_and(|s| s == "error");
                if errored {
                    message.status = TurnStatus::Error;
                    message.error = message.content.clone();
                } else {
                    message.status = TurnStatus::Finished;
                }
            }
            serde_json::Value::String(content) => {
                message.content = Some(content.clone());
                message.status = TurnStatus::Finished;
            }
            _ => {
                debug!("unrecognized tool output shape for call {call_id}");
                message.status = TurnStatus::Finished;
            }
        }

        if self.current == Some(idx) {
            self.current = None;
        }
        self.notify(TurnEvent::ToolEnd { call_id });
    }

    /// Fail a tool execution.
    pub fn on_tool_error(&mut self, call_id: Option<&str>, description: &str) {
        let idx = match call_id {
            Some(id) => self.index_of_call(id),
            None => self.current,
        };
        if let Some(idx) = idx {
            self.messages[idx].status = TurnStatus::Error;
            self.messages[idx].error = Some(description.to_string());
            if self.current == Some(idx) {
                self.current = None;
            }
        } else {
            warn!("tool error with no matching message: {description}");
        }
        self.notify(TurnEvent::Error { description });
    }

    fn index_of_call(&self, call_id: &str) -> Option<usize> {
        self.messages
            .iter()
            .position(|m| m.role == MessageRole::Tool && m.tool_call_id.as_deref() == Some(call_id))
    }
}
