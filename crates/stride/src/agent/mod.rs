//! Planner control loop and turn coordination.
//!
//! [`PlannerController`](planner::PlannerController) drives plan synthesis
//! and maintenance against a [`ModelClient`](crate::api::ModelClient);
//! [`TurnCoordinator`](turn::TurnCoordinator) correlates the streamed
//! messages and tool calls of a single model invocation. Both report
//! progress through the observer traits in [`events`].

pub mod events;
pub mod planner;
pub mod turn;

pub use events::{
    FnStepObserver, NoopObserver, StepEvent, StepObserver, TurnEvent, TurnObserver,
};
pub use planner::{PlannerConfig, PlannerController, PlannerState};
pub use turn::{TurnCoordinator, TurnMessage, TurnStatus};
