//! Plan data model: sections, steps, rendering, and the addressable index.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

// ── Step status ────────────────────────────────────────────────────

/// Lifecycle state of a single step. `Done` and `Skip` are terminal: a step
/// that reaches either never re-enters the addressable index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    NotStarted,
    Done,
    Skip,
}

impl StepStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StepStatus::Done | StepStatus::Skip)
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let marker = match self {
            StepStatus::NotStarted => "[ ]",
            StepStatus::Done => "[x]",
            StepStatus::Skip => "[-]",
        };
        write!(f, "{marker}")
    }
}

// ── Plan model ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub title: String,
    pub status: StepStatus,
}

impl Step {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            status: StepStatus::NotStarted,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    pub title: String,
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub title: String,
    pub outline: Vec<Section>,
}

// ── Model-facing proposal shape ────────────────────────────────────

/// What the model emits when synthesizing a plan. Steps are bare titles;
/// status is assigned on normalization, never trusted from the model.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct PlanProposal {
    /// Short name for the overall plan.
    pub title: String,
    /// Ordered sections, each with its ordered step titles.
    pub outline: Vec<SectionProposal>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct SectionProposal {
    pub title: String,
    pub steps: Vec<String>,
}

impl Plan {
    /// Normalize a model proposal into a plan. Every step starts NotStarted.
    pub fn from_proposal(proposal: PlanProposal) -> Self {
        Self {
            title: proposal.title,
            outline: proposal
                .outline
                .into_iter()
                .map(|s| Section {
                    title: s.title,
                    steps: s.steps.into_iter().map(Step::new).collect(),
                })
                .collect(),
        }
    }

    /// Render as a markdown checklist. When `show_index` is set, each
    /// non-terminal step is prefixed with its 1-based addressable index,
    /// matching what `resolve_index` accepts.
    pub fn render(&self, show_index: bool) -> String {
        let mut out = format!("# {}\n", self.title);
        let mut index = 0usize;
        for section in &self.outline {
            out.push_str(&format!("\n## {}\n", section.title));
            for step in &section.steps {
                if show_index && !step.status.is_terminal() {
                    index += 1;
                    out.push_str(&format!("- {} {}. {}\n", step.status, index, step.title));
                } else {
                    out.push_str(&format!("- {} {}\n", step.status, step.title));
                }
            }
        }
        out
    }

    /// Resolve a 1-based addressable index to `(section, step)` coordinates.
    ///
    /// The index walks sections in order, counting only non-terminal steps.
    /// Out-of-range indices resolve to `None`.
    pub fn resolve_index(&self, n: usize) -> Option<(usize, usize)> {
        if n == 0 {
            return None;
        }
        let mut remaining = n;
        for (si, section) in self.outline.iter().enumerate() {
            for (pi, step) in section.steps.iter().enumerate() {
                if step.status.is_terminal() {
                    continue;
                }
                remaining -= 1;
                if remaining == 0 {
                    return Some((si, pi));
                }
            }
        }
        None
    }

    /// The first NotStarted step in flatten order.
    pub fn current_step(&self) -> Option<&Step> {
        self.outline
            .iter()
            .flat_map(|s| s.steps.iter())
            .find(|step| step.status == StepStatus::NotStarted)
    }

    /// How many steps are currently addressable.
    pub fn addressable_count(&self) -> usize {
        self.outline
            .iter()
            .flat_map(|s| s.steps.iter())
            .filter(|step| !step.status.is_terminal())
            .count()
    }
}
