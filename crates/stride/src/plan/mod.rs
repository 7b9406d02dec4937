//! Plan model and structured update application.
//!
//! A plan is a titled outline of sections, each holding ordered steps. Open
//! steps carry a 1-based addressable index in flatten order (section-major,
//! terminal steps skipped) so a model can reference them compactly. The
//! update module defines the `update_steps` action union the model emits to
//! mutate a plan, and the batch semantics for applying it.

pub mod store;
pub mod update;

pub use store::{Plan, PlanProposal, Section, SectionProposal, Step, StepStatus};
pub use update::{
    BatchOutcome, InsertStep, StatusUpdate, TitleUpdate, UpdateStepsArgs, parse_update_args,
    update_steps_tool_def,
};
