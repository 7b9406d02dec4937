//! Task and tool lifecycle over the message history, plus budget eviction.
//!
//! The manager owns one [`MessageHistory`] for the life of one agent run. It
//! keeps the task message unique and pinned at slot 1 (right after any init
//! message at slot 0), hands out sequential tool-invocation ids, and applies
//! the eviction policy when the running token total exceeds the model's
//! input budget.
//!
//! Budget overflow is corrected, never surfaced: an over-budget request
//! would be rejected by the model layer anyway, so the manager's job is
//! best-effort recovery, not error reporting. Likewise token counting never
//! aborts the caller; the accountant is infallible by construction.

use crate::context::history::{MessageHistory, MessageKind, MessageMeta, MessageRecord};
use crate::{Message, MessageRole};
use crate::context::tokens::TokenAccountant;
use tracing::{debug, info};

/// Kinds exempt from budget eviction. The task and any init preamble must
/// survive arbitrarily long runs.
const PROTECTED_KINDS: [MessageKind; 2] = [MessageKind::Init, MessageKind::Task];

/// Wraps a [`MessageHistory`] with task/tool/message lifecycle operations
/// and a maximum input-token budget.
pub struct MessageManager {
    task: Option<String>,
    max_input_tokens: u64,
    history: MessageHistory,
    /// Monotonic id for tool invocations, string-encoded on use. Restored
    /// as one past the highest persisted id, so resumed runs never reissue
    /// an id.
    tool_call_counter: u64,
    accountant: TokenAccountant,
}

impl std::fmt::Debug for MessageManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageManager")
            .field("task", &self.task)
            .field("max_input_tokens", &self.max_input_tokens)
            .field("messages", &self.history.len())
            .field("total_tokens", &self.history.total_tokens())
            .field("tool_call_counter", &self.tool_call_counter)
            .finish()
    }
}

impl MessageManager {
    pub fn new(accountant: TokenAccountant, max_input_tokens: u64) -> Self {
        Self {
            task: None,
            max_input_tokens,
            history: MessageHistory::new(),
            tool_call_counter: 0,
            accountant,
        }
    }

    /// Restore a manager from persisted records.
    ///
    /// The tool-call counter resumes one past the highest numeric
    /// `tool_call_id` among tool-role records. Counter ids are handed out
    /// to every kind that travels as a tool message (plan syntheses
    /// included), so counting only Tool-kind records would undercount and
    /// reissue ids already present. Externally-correlated ids that are not
    /// numeric are ignored.
    pub fn from_records(
        accountant: TokenAccountant,
        max_input_tokens: u64,
        records: Vec<MessageRecord>,
    ) -> Self {
        let history = MessageHistory::from_records(records);
        let tool_call_counter = history
            .records()
            .iter()
            .filter(|r| r.message.role == MessageRole::Tool)
            .filter_map(|r| r.message.tool_call_id.as_deref())
            .filter_map(|id| id.parse::<u64>().ok())
            .map(|id| id + 1)
            .max()
            .unwrap_or(0);
        let task = history
            .records()
            .iter()
            .find(|r| r.meta.kind == MessageKind::Task)
            .and_then(|r| r.message.content.clone());
        Self {
            task,
            max_input_tokens,
            history,
            tool_call_counter,
            accountant,
        }
    }

    // ── Task lifecycle ─────────────────────────────────────────────

    /// Set (or replace) the task.
    ///
    /// Any existing task record is removed first, then the new one is
    /// inserted at slot 1, the position immediately after an init message,
    /// clamped so an init-less history still accepts it.
    pub fn set_task(&mut self, task: impl Into<String>) {
        let task = task.into();
        let message = Message::user(task.clone());
        let tokens = self.accountant.count(&message);

        self.history.remove_all_of_kind(MessageKind::Task);
        let position = 1usize.min(self.history.len());
        // Position is clamped, so the insert cannot fail.
        let _ = self.history.add(
            message,
            MessageMeta::new(MessageKind::Task, tokens),
            Some(position),
        );
        self.task = Some(task);
    }

    pub fn task(&self) -> Option<&str> {
        self.task.as_deref()
    }

    // ── Message lifecycle ──────────────────────────────────────────

    /// Count and insert a message (default: append).
    pub fn append_message(
        &mut self,
        message: Message,
        kind: MessageKind,
        position: Option<usize>,
    ) -> Result<(), String> {
        let tokens = self.accountant.count(&message);
        self.history
            .add(message, MessageMeta::new(kind, tokens), position)
    }

    /// Wrap `content` as a tool message tagged with the next sequential
    /// invocation id, append it, and return the assigned id.
    pub fn append_tool_result(
        &mut self,
        content: impl Into<String>,
        kind: Option<MessageKind>,
    ) -> String {
        let id = self.tool_call_counter.to_string();
        let message = Message::tool_result(id.clone(), content);
        let tokens = self.accountant.count(&message);
        // Appends cannot fail.
        let _ = self.history.add(
            message,
            MessageMeta::new(kind.unwrap_or(MessageKind::Tool), tokens),
            None,
        );
        self.tool_call_counter += 1;
        id
    }

    /// The ordered message list, excluding any of the given kinds.
    pub fn messages_excluding(&self, exclude: &[MessageKind]) -> Vec<Message> {
        self.history
            .records()
            .iter()
            .filter(|r| !exclude.contains(&r.meta.kind))
            .map(|r| r.message.clone())
            .collect()
    }

    /// The full ordered message list.
    pub fn messages(&self) -> Vec<Message> {
        self.messages_excluding(&[])
    }

    pub fn remove_all_of_kind(&mut self, kind: MessageKind) -> usize {
        self.history.remove_all_of_kind(kind)
    }

    pub fn remove_last(&mut self) -> Result<MessageRecord, String> {
        self.history.remove(None)
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.history.last().map(|r| &r.message)
    }

    pub fn total_tokens(&self) -> u64 {
        self.history.total_tokens()
    }

    pub fn max_input_tokens(&self) -> u64 {
        self.max_input_tokens
    }

    pub fn history(&self) -> &MessageHistory {
        &self.history
    }

    pub fn tool_call_counter(&self) -> u64 {
        self.tool_call_counter
    }

    /// A point-in-time copy of the history for persistence.
    pub fn snapshot(&self) -> crate::context::snapshot::HistorySnapshot {
        crate::context::snapshot::HistorySnapshot::new(self.history.records().to_vec())
    }

    // ── Budget enforcement ─────────────────────────────────────────

    /// Evict until the running total fits the budget. Returns the number of
    /// records evicted.
    ///
    /// Policy: oldest-first removal of unprotected kinds (everything except
    /// init and task). Stops when under budget or when only protected
    /// records remain. Never an error.
    pub fn enforce_budget(&mut self) -> usize {
        let mut evicted = 0;
        while self.history.total_tokens() > self.max_input_tokens {
            let victim = self
                .history
                .records()
                .iter()
                .position(|r| !PROTECTED_KINDS.contains(&r.meta.kind));
            let Some(pos) = victim else {
                debug!(
                    "budget exceeded ({} > {}) but only protected messages remain",
                    self.history.total_tokens(),
                    self.max_input_tokens
                );
                break;
            };
            // Position came from the same history, so removal cannot fail.
            if let Ok(record) = self.history.remove(Some(pos)) {
                info!(
                    "evicted {:?} message ({} tokens) to fit input budget",
                    record.meta.kind, record.meta.tokens
                );
                evicted += 1;
            } else {
                break;
            }
        }
        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(max: u64) -> MessageManager {
        MessageManager::new(TokenAccountant::new(None).unwrap(), max)
    }

    #[test]
    fn set_task_occupies_slot_one_after_init() {
        let mut m = manager(10_000);
        m.append_message(Message::system("you are an agent"), MessageKind::Init, None)
            .unwrap();
        m.append_message(Message::user("chatter"), MessageKind::User, None)
            .unwrap();
        m.set_task("build the thing");

        let records = m.history().records();
        assert_eq!(records[0].meta.kind, MessageKind::Init);
        assert_eq!(records[1].meta.kind, MessageKind::Task);
        assert_eq!(records[2].meta.kind, MessageKind::User);
    }

    #[test]
    fn set_task_on_empty_history() {
        let mut m = manager(10_000);
        m.set_task("solo task");
        assert_eq!(m.history().len(), 1);
        assert_eq!(m.history().records()[0].meta.kind, MessageKind::Task);
        assert_eq!(m.task(), Some("solo task"));
    }

    #[test]
    fn set_task_replaces_existing_task() {
        let mut m = manager(10_000);
        m.append_message(Message::system("init"), MessageKind::Init, None)
            .unwrap();
        m.set_task("first");
        m.set_task("second");

        assert_eq!(m.history().count_of_kind(MessageKind::Task), 1);
        assert_eq!(
            m.history().records()[1].message.content.as_deref(),
            Some("second")
        );
    }

    #[test]
    fn tool_result_ids_are_sequential_strings() {
        let mut m = manager(10_000);
        assert_eq!(m.append_tool_result("first", None), "0");
        assert_eq!(m.append_tool_result("second", None), "1");
        assert_eq!(m.tool_call_counter(), 2);

        let last = m.last_message().unwrap();
        assert_eq!(last.tool_call_id.as_deref(), Some("1"));
    }

    #[test]
    fn restore_resumes_tool_counter_from_tool_records() {
        let mut m = manager(10_000);
        m.set_task("t");
        m.append_tool_result("a", None);
        m.append_tool_result("b", None);
        let records: Vec<MessageRecord> = m.history().records().to_vec();

        let restored =
            MessageManager::from_records(TokenAccountant::new(None).unwrap(), 10_000, records);
        assert_eq!(restored.tool_call_counter(), 2);
        assert_eq!(restored.task(), Some("t"));
    }

    #[test]
    fn restore_counter_accounts_for_plan_kind_results() {
        let mut m = manager(10_000);
        m.append_tool_result("# plan checklist", Some(MessageKind::Plan)); // id "0"
        m.append_tool_result("tool output", None); // id "1"
        let records: Vec<MessageRecord> = m.history().records().to_vec();

        let mut restored =
            MessageManager::from_records(TokenAccountant::new(None).unwrap(), 10_000, records);
        assert_eq!(restored.tool_call_counter(), 2);
        // The next id must not collide with a persisted one.
        assert_eq!(restored.append_tool_result("next", None), "2");
    }

    #[test]
    fn restore_ignores_non_numeric_correlation_ids() {
        let mut m = manager(10_000);
        m.append_message(
            Message::tool_result("call_abc", "external result"),
            MessageKind::Tool,
            None,
        )
        .unwrap();
        m.append_tool_result("counted result", None); // id "0"
        let records: Vec<MessageRecord> = m.history().records().to_vec();

        let restored =
            MessageManager::from_records(TokenAccountant::new(None).unwrap(), 10_000, records);
        assert_eq!(restored.tool_call_counter(), 1);
    }

    #[test]
    fn messages_excluding_preserves_order() {
        let mut m = manager(10_000);
        m.append_message(Message::system("init"), MessageKind::Init, None)
            .unwrap();
        m.set_task("task");
        m.append_message(Message::user("q1"), MessageKind::User, None)
            .unwrap();
        m.append_message(Message::assistant_text("a1"), MessageKind::Assistant, None)
            .unwrap();

        let filtered = m.messages_excluding(&[MessageKind::Init, MessageKind::Task]);
        assert_eq!(filtered.len(), 2);
        assert_eq!(filtered[0].content.as_deref(), Some("q1"));
        assert_eq!(filtered[1].content.as_deref(), Some("a1"));
    }

    #[test]
    fn enforce_budget_evicts_oldest_unprotected_first() {
        let mut m = manager(0); // everything is over budget
        m.append_message(Message::system("init preamble"), MessageKind::Init, None)
            .unwrap();
        m.set_task("the task");
        m.append_message(Message::user("old user msg"), MessageKind::User, None)
            .unwrap();
        m.append_tool_result("tool output", None);

        let evicted = m.enforce_budget();
        assert_eq!(evicted, 2);
        // Only the protected records survive.
        let kinds: Vec<MessageKind> = m.history().records().iter().map(|r| r.meta.kind).collect();
        assert_eq!(kinds, vec![MessageKind::Init, MessageKind::Task]);
    }

    #[test]
    fn enforce_budget_noop_when_under() {
        let mut m = manager(1_000_000);
        m.set_task("small");
        m.append_tool_result("tiny", None);
        assert_eq!(m.enforce_budget(), 0);
        assert_eq!(m.history().len(), 2);
    }

    #[test]
    fn enforce_budget_stops_once_under() {
        let mut m = manager(10_000);
        m.set_task("task");
        for i in 0..20 {
            m.append_tool_result(format!("result {i}: {}", "x".repeat(400)), None);
        }
        // Shrink the budget below the current total, then enforce.
        m.max_input_tokens = m.total_tokens() / 2;
        let evicted = m.enforce_budget();
        assert!(evicted > 0);
        assert!(evicted < 20, "should stop as soon as the total fits");
        assert!(m.total_tokens() <= m.max_input_tokens());
    }
}
