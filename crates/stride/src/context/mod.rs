//! Conversation state: token accounting, typed message history, budget
//! enforcement, and snapshot persistence.
//!
//! The context window is the scarcest resource in any agent loop, so every
//! message entering the history is counted exactly once at insertion time and
//! the running total is maintained as an O(1) cache. [`MessageManager`] sits
//! on top of the raw [`MessageHistory`] and owns the task lifecycle,
//! sequential tool-call ids, and the eviction policy that keeps the history
//! under the model's input budget.

pub mod history;
pub mod manager;
pub mod snapshot;
pub mod tokens;

pub use history::{MessageHistory, MessageKind, MessageMeta, MessageRecord};
pub use manager::MessageManager;
pub use snapshot::{HistorySnapshot, load_snapshot, save_snapshot};
pub use tokens::TokenAccountant;
