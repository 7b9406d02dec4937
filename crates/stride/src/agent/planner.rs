//! Plan synthesis and maintenance against a model.
//!
//! The controller runs one step at a time. With no plan in hand it
//! synthesizes one (CREATE); with a plan in hand it asks the model for
//! `update_steps` batches and reconciles them (UPDATE). Once a plan exists
//! the controller never re-synthesizes: plans evolve only through updates.
//!
//! Four structured-output strategies are supported for synthesis, selected
//! by [`StructuredMethod`]: free-text JSON extraction, a forced function
//! call, JSON mode, and schema-constrained output.

use crate::agent::events::{StepEvent, StepObserver};
use crate::api::{ModelClient, ModelRequest, ResponseFormat, StructuredMethod, ToolChoice};
use crate::context::{MessageKind, MessageManager};
use crate::plan::{Plan, PlanProposal, Step, parse_update_args, update_steps_tool_def};
use crate::{Message, ToolDef, json_schema_for};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

const DEFAULT_SYSTEM_PROMPT: &str = "You are a planning assistant. Break the given task into a \
     concise, ordered plan of sections and steps. Keep steps small and \
     verifiable. Respond with the plan structure you are asked for and \
     nothing else.";

/// Kinds hidden from planner model calls. The task travels as the final
/// user message instead, and agent-internal notes never reach the planner.
const PLANNER_EXCLUDED_KINDS: [MessageKind; 3] =
    [MessageKind::Init, MessageKind::Task, MessageKind::Agent];

// ── State and config ───────────────────────────────────────────────

/// Planning state owned by a single task. Created on first task submission
/// and never reused across tasks.
#[derive(Debug, Clone, Default)]
pub struct PlannerState {
    /// The indexed markdown rendering of the current plan.
    pub todo: Option<String>,
    pub plan: Option<Plan>,
    pub current_step: Option<Step>,
    pub created_at: Option<DateTime<Utc>>,
}

impl PlannerState {
    pub fn new() -> Self {
        Self {
            todo: None,
            plan: None,
            current_step: None,
            created_at: Some(Utc::now()),
        }
    }

    fn reconcile(&mut self) {
        if let Some(plan) = &self.plan {
            self.todo = Some(plan.render(true));
            self.current_step = plan.current_step().cloned();
        }
    }
}

#[derive(Debug, Clone)]
pub struct PlannerConfig {
    pub system_prompt: Option<String>,
    pub method: StructuredMethod,
    /// When set, a synthesis parse failure degrades to a no-op instead of
    /// failing the step. The raw response is logged for inspection.
    pub include_raw: bool,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            system_prompt: None,
            method: StructuredMethod::JsonSchema,
            include_raw: false,
        }
    }
}

impl PlannerConfig {
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_method(mut self, method: StructuredMethod) -> Self {
        self.method = method;
        self
    }

    pub fn with_include_raw(mut self, include_raw: bool) -> Self {
        self.include_raw = include_raw;
        self
    }
}

// ── Controller ─────────────────────────────────────────────────────

/// Drives plan synthesis and maintenance for one agent run.
pub struct PlannerController {
    model: Arc<dyn ModelClient>,
    config: PlannerConfig,
    observer: Option<Arc<dyn StepObserver>>,
}

impl PlannerController {
    pub fn new(model: Arc<dyn ModelClient>, config: PlannerConfig) -> Self {
        Self {
            model,
            config,
            observer: None,
        }
    }

    pub fn with_step_observer(mut self, observer: Arc<dyn StepObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    fn notify(&self, event: StepEvent<'_>) {
        if let Some(observer) = &self.observer {
            observer.on_step_event(&event);
        }
    }

    /// Run one planner step: synthesize a plan when none exists, otherwise
    /// ask the model for plan updates and apply them.
    pub async fn step(
        &self,
        state: &mut PlannerState,
        manager: &mut MessageManager,
    ) -> Result<(), String> {
        let creating = state.plan.is_none();
        self.notify(StepEvent::StepStart { creating });

        let result = if creating {
            self.create(state, manager).await
        } else {
            self.update(state, manager).await
        };

        match &result {
            Ok(()) => self.notify(StepEvent::StepEnd {
                plan: state.plan.as_ref(),
                current_step: state.current_step.as_ref().map(|s| s.title.as_str()),
            }),
            Err(description) => self.notify(StepEvent::StepError {
                description: description.as_str(),
            }),
        }
        result
    }

    fn base_messages(&self, manager: &MessageManager) -> Vec<Message> {
        let prompt = self
            .config
            .system_prompt
            .as_deref()
            .unwrap_or(DEFAULT_SYSTEM_PROMPT);
        let mut messages = vec![Message::system(prompt)];
        messages.extend(manager.messages_excluding(&PLANNER_EXCLUDED_KINDS));
        messages
    }

    // ── CREATE ─────────────────────────────────────────────────────

    async fn create(
        &self,
        state: &mut PlannerState,
        manager: &mut MessageManager,
    ) -> Result<(), String> {
        let closing = match &state.todo {
            // A prior degraded pass left a rendering behind; repeat with it.
            Some(todo) => todo.clone(),
            None => manager
                .task()
                .ok_or_else(|| "Cannot synthesize a plan without a task".to_string())?
                .to_string(),
        };

        let mut messages = self.base_messages(manager);
        messages.push(Message::user(closing));

        let proposal = match self.config.method {
            StructuredMethod::Raw => self.create_raw(messages).await?,
            StructuredMethod::FunctionCalling => self.create_function_calling(messages).await?,
            StructuredMethod::JsonMode => {
                let request =
                    ModelRequest::new(messages).with_response_format(ResponseFormat::JsonObject);
                let response = self.model.chat(&request).await?;
                self.parse_proposal(response.content.as_deref().unwrap_or_default())?
            }
            StructuredMethod::JsonSchema => {
                let request = ModelRequest::new(messages).with_response_format(
                    ResponseFormat::JsonSchema {
                        schema: json_schema_for::<PlanProposal>(),
                    },
                );
                let response = self.model.chat(&request).await?;
                self.parse_proposal(response.content.as_deref().unwrap_or_default())?
            }
        };

        let Some(proposal) = proposal else {
            // Degraded pass (include_raw): state untouched, caller proceeds.
            return Ok(());
        };

        let plan = Plan::from_proposal(proposal);
        info!(
            "synthesized plan '{}' with {} steps",
            plan.title,
            plan.addressable_count()
        );
        let rendered = plan.render(true);
        // Fold the synthesis into the history as a tool message so the
        // stream stays homogeneous with real tool calls.
        manager.append_tool_result(rendered, Some(MessageKind::Plan));

        state.plan = Some(plan);
        state.reconcile();
        if let Some(plan) = &state.plan {
            self.notify(StepEvent::PlanCreated { plan });
        }
        Ok(())
    }

    async fn create_raw(&self, messages: Vec<Message>) -> Result<Option<PlanProposal>, String> {
        let request = ModelRequest::new(messages);
        let response = self.model.chat(&request).await?;
        let text = response.content.as_deref().unwrap_or_default();
        let Some(json) = extract_json_object(text) else {
            return Err(format!(
                "Planner response contained no JSON object: {}",
                text.chars().take(200).collect::<String>()
            ));
        };
        self.parse_proposal(&json)
    }

    async fn create_function_calling(
        &self,
        messages: Vec<Message>,
    ) -> Result<Option<PlanProposal>, String> {
        let tool = ToolDef::new(
            "propose_plan",
            "Propose an ordered plan of sections and steps for the task.",
            json_schema_for::<PlanProposal>(),
        );
        let request = ModelRequest::new(messages)
            .with_tools(vec![tool])
            .with_tool_choice(ToolChoice::Any);
        let response = self.model.chat(&request).await?;

        let call = response
            .tool_calls
            .iter()
            .find(|c| c.function.name == "propose_plan")
            .or_else(|| response.tool_calls.first());
        let Some(call) = call else {
            return Err("Planner returned no propose_plan call".to_string());
        };
        self.parse_proposal(&call.function.arguments)
    }

    /// Parse a proposal, honoring the degrade-on-failure config.
    fn parse_proposal(&self, raw: &str) -> Result<Option<PlanProposal>, String> {
        match serde_json::from_str::<PlanProposal>(raw) {
            Ok(proposal) => Ok(Some(proposal)),
            Err(e) if self.config.include_raw => {
                warn!("plan synthesis output did not parse ({e}), continuing without a plan");
                debug!("unparsed synthesis output: {raw}");
                Ok(None)
            }
            Err(e) => Err(format!("Failed to parse plan proposal: {e}")),
        }
    }

    // ── UPDATE ─────────────────────────────────────────────────────

    async fn update(
        &self,
        state: &mut PlannerState,
        manager: &mut MessageManager,
    ) -> Result<(), String> {
        let plan = state
            .plan
            .as_mut()
            .ok_or_else(|| "update called without a plan".to_string())?;

        let mut messages = self.base_messages(manager);
        messages.push(Message::user(format!(
            "Here is the current plan. Report progress by calling update_steps \
             with the step numbers shown.\n\n{}",
            plan.render(true)
        )));

        let request = ModelRequest::new(messages)
            .with_tools(vec![update_steps_tool_def()])
            .with_tool_choice(ToolChoice::Any);
        let response = self.model.chat(&request).await?;

        let mut touched = false;
        for call in &response.tool_calls {
            if call.function.name != "update_steps" {
                debug!("ignoring unexpected tool call '{}'", call.function.name);
                continue;
            }
            let args = match parse_update_args(&call.function.arguments) {
                Ok(args) => args,
                Err(e) => {
                    warn!("dropping malformed update_steps call: {e}");
                    continue;
                }
            };
            if args.is_empty() {
                continue;
            }
            let outcome = plan.apply_batch(&args);
            debug!(
                "applied update_steps batch: {} applied, {} skipped",
                outcome.applied, outcome.skipped
            );
            self.notify(StepEvent::PlanUpdated {
                applied: outcome.applied,
                skipped: outcome.skipped,
            });
            touched = true;
        }

        if !touched {
            // The model had nothing to report. Not an error.
            debug!("planner update produced no actionable calls");
            return Ok(());
        }

        state.reconcile();
        Ok(())
    }
}

// ── Free-text JSON extraction ──────────────────────────────────────

/// Pull the first JSON object out of free text. Prefers fenced blocks, then
/// falls back to brace matching with string awareness. Returns `None` when
/// nothing parseable is found.
// All slice offsets come from find/char_indices, so they sit on char
// boundaries.
#[allow(clippy::string_slice)]
fn extract_json_object(text: &str) -> Option<String> {
    // Fenced block first: ```json ... ``` or bare ``` ... ```.
    for fence in ["```json", "```"] {
        if let Some(start) = text.find(fence) {
            let body = &text[start + fence.len()..];
            if let Some(end) = body.find("```") {
                let candidate = body[..end].trim();
                if candidate.starts_with('{')
                    && serde_json::from_str::<serde_json::Value>(candidate).is_ok()
                {
                    return Some(candidate.to_string());
                }
            }
        }
    }

    // Bare object: walk from the first '{' to its matching close brace,
    // skipping braces inside string literals.
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in text[start..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    let candidate = &text[start..start + offset + ch.len_utf8()];
                    if serde_json::from_str::<serde_json::Value>(candidate).is_ok() {
                        return Some(candidate.to_string());
                    }
                    return None;
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::events::FnStepObserver;
    use crate::api::{ChatFuture, ModelResponse};
    use crate::context::TokenAccountant;
    use crate::{ToolCall, UsageInfo};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays canned responses and records every request it sees.
    struct CannedModel {
        responses: Mutex<VecDeque<ModelResponse>>,
        requests: Mutex<Vec<ModelRequest>>,
    }

    impl CannedModel {
        fn new(responses: Vec<ModelResponse>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn requests(&self) -> Vec<ModelRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    impl ModelClient for CannedModel {
        fn chat<'a>(&'a self, request: &'a ModelRequest) -> ChatFuture<'a> {
            self.requests.lock().unwrap().push(request.clone());
            Box::pin(async move {
                self.responses
                    .lock()
                    .unwrap()
                    .pop_front()
                    .ok_or_else(|| "no canned response left".to_string())
            })
        }
    }

    struct FailingModel;
    impl ModelClient for FailingModel {
        fn chat<'a>(&'a self, _request: &'a ModelRequest) -> ChatFuture<'a> {
            Box::pin(async { Err("connection refused".to_string()) })
        }
    }

    const PROPOSAL_JSON: &str = r#"{
        "title": "Fix the bug",
        "outline": [
            {"title": "Investigate", "steps": ["Reproduce", "Bisect"]},
            {"title": "Fix", "steps": ["Patch", "Add regression test"]}
        ]
    }"#;

    fn text_response(content: &str) -> ModelResponse {
        ModelResponse {
            content: Some(content.to_string()),
            tool_calls: vec![],
            usage: Some(UsageInfo {
                prompt_tokens: Some(100),
                completion_tokens: Some(50),
                total_tokens: Some(150),
            }),
        }
    }

    fn call_response(name: &str, arguments: &str) -> ModelResponse {
        ModelResponse {
            content: None,
            tool_calls: vec![ToolCall::function("call_0", name, arguments)],
            usage: None,
        }
    }

    fn manager_with_task() -> MessageManager {
        let mut m = MessageManager::new(TokenAccountant::new(None).unwrap(), 100_000);
        m.append_message(Message::system("preamble"), MessageKind::Init, None)
            .unwrap();
        m.set_task("Fix the bug in the parser");
        m
    }

    fn controller(model: Arc<dyn ModelClient>, method: StructuredMethod) -> PlannerController {
        PlannerController::new(model, PlannerConfig::default().with_method(method))
    }

    #[tokio::test]
    async fn create_via_function_calling() {
        let model = CannedModel::new(vec![call_response("propose_plan", PROPOSAL_JSON)]);
        let planner = controller(model.clone(), StructuredMethod::FunctionCalling);
        let mut state = PlannerState::new();
        let mut manager = manager_with_task();

        planner.step(&mut state, &mut manager).await.unwrap();

        let plan = state.plan.as_ref().unwrap();
        assert_eq!(plan.title, "Fix the bug");
        assert_eq!(plan.addressable_count(), 4);
        assert_eq!(state.current_step.as_ref().unwrap().title, "Reproduce");
        assert!(state.todo.as_ref().unwrap().contains("1. Reproduce"));

        // The synthesis lands in the history as a plan-kind tool message.
        assert_eq!(manager.history().count_of_kind(MessageKind::Plan), 1);

        // The request bound exactly the propose_plan tool with forced choice.
        let requests = model.requests();
        let tools = requests[0].tools.as_ref().unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].function.name, "propose_plan");
        assert_eq!(requests[0].tool_choice, Some(ToolChoice::Any));
    }

    #[tokio::test]
    async fn create_requests_exclude_init_task_and_agent_kinds() {
        let model = CannedModel::new(vec![call_response("propose_plan", PROPOSAL_JSON)]);
        let planner = controller(model.clone(), StructuredMethod::FunctionCalling);
        let mut state = PlannerState::new();
        let mut manager = manager_with_task();
        manager
            .append_message(Message::user("visible context"), MessageKind::User, None)
            .unwrap();
        manager
            .append_message(
                Message::assistant_text("internal note"),
                MessageKind::Agent,
                None,
            )
            .unwrap();

        planner.step(&mut state, &mut manager).await.unwrap();

        let requests = model.requests();
        let request = &requests[0];
        let contents: Vec<&str> = request
            .messages
            .iter()
            .filter_map(|m| m.content.as_deref())
            .collect();
        assert!(contents.contains(&"visible context"));
        assert!(!contents.contains(&"preamble"));
        assert!(!contents.contains(&"internal note"));
        // The task travels as the final user message instead.
        assert_eq!(
            request.messages.last().unwrap().content.as_deref(),
            Some("Fix the bug in the parser")
        );
    }

    #[tokio::test]
    async fn create_raw_extracts_fenced_json() {
        let content = format!("Here is the plan:\n\n```json\n{PROPOSAL_JSON}\n```\n\nGood luck!");
        let model = CannedModel::new(vec![text_response(&content)]);
        let planner = controller(model, StructuredMethod::Raw);
        let mut state = PlannerState::new();
        let mut manager = manager_with_task();

        planner.step(&mut state, &mut manager).await.unwrap();
        assert_eq!(state.plan.as_ref().unwrap().title, "Fix the bug");
    }

    #[tokio::test]
    async fn create_raw_without_json_is_fatal() {
        let model = CannedModel::new(vec![text_response("I cannot produce a plan right now.")]);
        let planner = controller(model, StructuredMethod::Raw);
        let mut state = PlannerState::new();
        let mut manager = manager_with_task();

        let err = planner.step(&mut state, &mut manager).await.unwrap_err();
        assert!(err.contains("no JSON object"));
        assert!(state.plan.is_none());
    }

    #[tokio::test]
    async fn create_json_schema_binds_response_format() {
        let model = CannedModel::new(vec![text_response(PROPOSAL_JSON)]);
        let planner = controller(model.clone(), StructuredMethod::JsonSchema);
        let mut state = PlannerState::new();
        let mut manager = manager_with_task();

        planner.step(&mut state, &mut manager).await.unwrap();
        assert!(state.plan.is_some());
        assert!(matches!(
            &model.requests()[0].response_format,
            Some(ResponseFormat::JsonSchema { .. })
        ));
    }

    #[tokio::test]
    async fn include_raw_degrades_parse_failure_to_noop() {
        let model = CannedModel::new(vec![text_response(r#"{"not": "a proposal"}"#)]);
        let planner = PlannerController::new(
            model,
            PlannerConfig::default()
                .with_method(StructuredMethod::JsonMode)
                .with_include_raw(true),
        );
        let mut state = PlannerState::new();
        let mut manager = manager_with_task();

        planner.step(&mut state, &mut manager).await.unwrap();
        assert!(state.plan.is_none());
        assert_eq!(manager.history().count_of_kind(MessageKind::Plan), 0);
    }

    #[tokio::test]
    async fn parse_failure_without_include_raw_is_fatal() {
        let model = CannedModel::new(vec![text_response(r#"{"not": "a proposal"}"#)]);
        let planner = controller(model, StructuredMethod::JsonMode);
        let mut state = PlannerState::new();
        let mut manager = manager_with_task();

        assert!(planner.step(&mut state, &mut manager).await.is_err());
    }

    #[tokio::test]
    async fn update_applies_batches_and_recomputes_current_step() {
        let model = CannedModel::new(vec![
            call_response("propose_plan", PROPOSAL_JSON),
            call_response(
                "update_steps",
                r#"{"update_status": [{"index": 1, "status": "done"}]}"#,
            ),
        ]);
        let planner = controller(model.clone(), StructuredMethod::FunctionCalling);
        let mut state = PlannerState::new();
        let mut manager = manager_with_task();

        planner.step(&mut state, &mut manager).await.unwrap();
        assert_eq!(state.current_step.as_ref().unwrap().title, "Reproduce");

        planner.step(&mut state, &mut manager).await.unwrap();
        assert_eq!(state.current_step.as_ref().unwrap().title, "Bisect");
        assert!(state.todo.as_ref().unwrap().contains("[x] Reproduce"));

        // The update request carried the update_steps tool, forced.
        let requests = model.requests();
        let tools = requests[1].tools.as_ref().unwrap();
        assert_eq!(tools[0].function.name, "update_steps");
        assert_eq!(requests[1].tool_choice, Some(ToolChoice::Any));
    }

    #[tokio::test]
    async fn update_with_zero_actionable_calls_is_silent_noop() {
        let model = CannedModel::new(vec![
            call_response("propose_plan", PROPOSAL_JSON),
            call_response("update_steps", "{}"),
        ]);
        let planner = controller(model, StructuredMethod::FunctionCalling);
        let mut state = PlannerState::new();
        let mut manager = manager_with_task();

        planner.step(&mut state, &mut manager).await.unwrap();
        let todo_before = state.todo.clone();
        planner.step(&mut state, &mut manager).await.unwrap();
        assert_eq!(state.todo, todo_before);
    }

    #[tokio::test]
    async fn model_errors_propagate_and_leave_state_untouched() {
        let planner = controller(Arc::new(FailingModel), StructuredMethod::JsonSchema);
        let mut state = PlannerState::new();
        let mut manager = manager_with_task();

        let err = planner.step(&mut state, &mut manager).await.unwrap_err();
        assert_eq!(err, "connection refused");
        assert!(state.plan.is_none());
        assert!(state.todo.is_none());
    }

    #[tokio::test]
    async fn failing_step_still_closes_the_observer_bracket() {
        let events: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
        let seen = events.clone();
        let observer = Arc::new(FnStepObserver::new(move |event: &StepEvent<'_>| {
            let tag = match event {
                StepEvent::StepStart { .. } => "start",
                StepEvent::StepEnd { .. } => "end",
                StepEvent::StepError { .. } => "error",
                _ => "other",
            };
            seen.lock().unwrap().push(tag);
        }));
        let planner = controller(Arc::new(FailingModel), StructuredMethod::JsonSchema)
            .with_step_observer(observer);
        let mut state = PlannerState::new();
        let mut manager = manager_with_task();

        assert!(planner.step(&mut state, &mut manager).await.is_err());
        assert_eq!(*events.lock().unwrap(), vec!["start", "error"]);
    }

    #[test]
    fn extract_json_object_handles_bare_and_nested() {
        let text = r#"Sure thing. {"a": {"b": "closing } inside string"}} trailing"#;
        let json = extract_json_object(text).unwrap();
        assert_eq!(json, r#"{"a": {"b": "closing } inside string"}}"#);

        assert!(extract_json_object("no braces here").is_none());
        assert!(extract_json_object("{ broken").is_none());
    }
}
