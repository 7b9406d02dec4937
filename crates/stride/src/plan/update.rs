//! The `update_steps` pseudo-tool: action union, argument parsing, and
//! batch application against a plan.
//!
//! The model edits a plan by emitting one `update_steps` call carrying up to
//! three action arrays. All indices in a batch refer to the plan as it stood
//! when the batch was issued, so the arrays are resolved against a pre-batch
//! snapshot rather than interleaved with mutation.

use crate::plan::store::{Plan, Step, StepStatus};
use crate::{ToolDef, json_schema_for};
use schemars::JsonSchema;
use serde::Deserialize;
use tracing::warn;

// ── Action union ───────────────────────────────────────────────────

/// Change the status of the step at an addressable index.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct StatusUpdate {
    /// 1-based index of a non-terminal step, as shown in the rendered plan.
    pub index: usize,
    pub status: StepStatus,
}

/// Rewrite the title of the step at an addressable index.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct TitleUpdate {
    /// 1-based index of a non-terminal step, as shown in the rendered plan.
    pub index: usize,
    pub title: String,
}

/// Insert a new step immediately before the step at an addressable index.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct InsertStep {
    /// 1-based index of the non-terminal step the new step goes before.
    pub index: usize,
    pub title: String,
}

/// Arguments of one `update_steps` call. Every array is optional; an empty
/// batch is valid and applies nothing.
#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct UpdateStepsArgs {
    /// Steps to mark done, skipped, or reopened.
    #[serde(default)]
    pub update_status: Vec<StatusUpdate>,
    /// Steps to retitle.
    #[serde(default)]
    pub update_title: Vec<TitleUpdate>,
    /// New steps to insert.
    #[serde(default)]
    pub insert_step: Vec<InsertStep>,
}

impl UpdateStepsArgs {
    pub fn is_empty(&self) -> bool {
        self.update_status.is_empty() && self.update_title.is_empty() && self.insert_step.is_empty()
    }
}

/// The tool definition bound into UPDATE-phase model requests.
pub fn update_steps_tool_def() -> ToolDef {
    ToolDef::new(
        "update_steps",
        "Update the current plan: change step statuses, rewrite step titles, \
         or insert new steps. Indices refer to the numbered steps in the plan \
         as currently shown.",
        json_schema_for::<UpdateStepsArgs>(),
    )
}

/// Parse raw tool-call arguments, validating against the schema first so a
/// malformed call comes back as a message the model can act on.
pub fn parse_update_args(raw: &str) -> Result<UpdateStepsArgs, String> {
    let value: serde_json::Value = serde_json::from_str(raw).map_err(|e| {
        format!(
            "Error: invalid JSON arguments for tool 'update_steps': {e}. \
             Please provide valid JSON matching the tool's parameter schema."
        )
    })?;

    let schema = json_schema_for::<UpdateStepsArgs>();
    if let Ok(validator) = jsonschema::validator_for(&schema) {
        let errors: Vec<String> = validator
            .iter_errors(&value)
            .map(|e| format!("  - {}: {e}", e.instance_path()))
            .collect();
        if !errors.is_empty() {
            return Err(format!(
                "Error: argument validation failed for tool 'update_steps':\n{}\n\
                 Please fix the arguments and try again.",
                errors.join("\n")
            ));
        }
    }

    serde_json::from_value(value)
        .map_err(|e| format!("Error: could not decode 'update_steps' arguments: {e}"))
}

// ── Batch application ──────────────────────────────────────────────

/// What happened to one batch: actions that landed vs. actions dropped for
/// unresolvable indices.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub applied: usize,
    pub skipped: usize,
}

impl Plan {
    /// Apply one `update_steps` batch.
    ///
    /// Every index resolves against a snapshot of the plan taken before any
    /// action lands, so the model's indices stay valid across the whole
    /// batch. Status updates go first, then title updates (snapshot
    /// coordinates still hold since nothing has moved), then insertions in
    /// descending resolved position so an earlier insert never displaces a
    /// later one. Unresolvable indices are skipped, never fatal.
    pub fn apply_batch(&mut self, args: &UpdateStepsArgs) -> BatchOutcome {
        let snapshot = self.clone();
        let mut outcome = BatchOutcome::default();

        for action in &args.update_status {
            match snapshot.resolve_index(action.index) {
                Some((si, pi)) => {
                    self.outline[si].steps[pi].status = action.status;
                    outcome.applied += 1;
                }
                None => {
                    warn!("update_status index {} does not resolve, skipping", action.index);
                    outcome.skipped += 1;
                }
            }
        }

        for action in &args.update_title {
            match snapshot.resolve_index(action.index) {
                Some((si, pi)) => {
                    self.outline[si].steps[pi].title = action.title.clone();
                    outcome.applied += 1;
                }
                None => {
                    warn!("update_title index {} does not resolve, skipping", action.index);
                    outcome.skipped += 1;
                }
            }
        }

        // Resolve all insertions first, then apply highest position first.
        let mut inserts: Vec<(usize, usize, &InsertStep)> = Vec::new();
        for action in &args.insert_step {
            match snapshot.resolve_index(action.index) {
                Some((si, pi)) => inserts.push((si, pi, action)),
                None => {
                    warn!("insert_step index {} does not resolve, skipping", action.index);
                    outcome.skipped += 1;
                }
            }
        }
        inserts.sort_by(|a, b| (b.0, b.1).cmp(&(a.0, a.1)));
        for (si, pi, action) in inserts {
            self.outline[si].steps.insert(pi, Step::new(action.title.clone()));
            outcome.applied += 1;
        }

        outcome
    }
}
