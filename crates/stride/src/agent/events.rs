//! Observer traits for planner steps and turn progress.
//!
//! Callers implement [`StepObserver`] to watch plan synthesis and
//! maintenance, and [`TurnObserver`] to watch the message stream of a
//! single turn. Notifications are fire-and-continue: observers cannot
//! return errors, and a slow or absent observer never changes agent
//! behavior.

use crate::plan::Plan;

// ── Step events ────────────────────────────────────────────────────

/// Events emitted around each planner step.
#[derive(Debug)]
pub enum StepEvent<'a> {
    /// A planner model call is starting.
    StepStart {
        /// Whether this step synthesizes a new plan or updates an existing one.
        creating: bool,
    },
    /// A planner model call finished and state was reconciled.
    StepEnd {
        plan: Option<&'a Plan>,
        current_step: Option<&'a str>,
    },
    /// A planner model call failed; state is unchanged. Every `StepStart`
    /// is closed by exactly one `StepEnd` or `StepError`.
    StepError { description: &'a str },
    /// A plan was synthesized for the first time.
    PlanCreated { plan: &'a Plan },
    /// An `update_steps` batch landed on the plan.
    PlanUpdated { applied: usize, skipped: usize },
}

/// Observer for planner lifecycle events.
pub trait StepObserver: Send + Sync {
    fn on_step_event(&self, event: &StepEvent<'_>) {
        let _ = event;
    }
}

// ── Turn events ────────────────────────────────────────────────────

/// Events emitted as a turn's messages stream in.
#[derive(Debug)]
pub enum TurnEvent<'a> {
    /// A model invocation began.
    ModelStart { model: Option<&'a str> },
    /// A content delta arrived for the current assistant message.
    ModelToken { delta: &'a str },
    /// The model invocation completed.
    ModelEnd { tool_call_count: usize },
    /// A tool execution began for the given call id.
    ToolStart { call_id: &'a str, name: &'a str },
    /// A tool execution produced its result.
    ToolEnd { call_id: &'a str },
    /// A tool or model step failed.
    Error { description: &'a str },
}

/// Observer for turn streaming events.
pub trait TurnObserver: Send + Sync {
    fn on_turn_event(&self, event: &TurnEvent<'_>) {
        let _ = event;
    }
}

// ── Adapters ───────────────────────────────────────────────────────

/// Ignores everything. Useful in tests and headless runs.
pub struct NoopObserver;
impl StepObserver for NoopObserver {}
impl TurnObserver for NoopObserver {}

/// A step observer backed by a closure, avoiding a full struct for simple
/// callbacks.
pub struct FnStepObserver<F>(F)
where
    F: Fn(&StepEvent<'_>) + Send + Sync;

impl<F> FnStepObserver<F>
where
    F: Fn(&StepEvent<'_>) + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> StepObserver for FnStepObserver<F>
where
    F: Fn(&StepEvent<'_>) + Send + Sync,
{
    fn on_step_event(&self, event: &StepEvent<'_>) {
        (self.0)(event)
    }
}
