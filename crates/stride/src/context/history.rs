//! Ordered, typed message log with an O(1) running token total.
//!
//! Every entry pairs a [`Message`] with a [`MessageMeta`] that records its
//! kind and the exact token cost counted at insertion time. The cost is
//! never recomputed; a message that leaves and re-enters the history is
//! recounted by whoever inserts it. The cached total is updated in the same
//! call as the sequence mutation, so no caller can observe the two out of
//! sync.

use crate::Message;
use serde::{Deserialize, Serialize};

/// The conversational kind of a history entry.
///
/// Kinds drive filtering (the planner excludes init/task/agent entries from
/// its prompts), bulk removal, and the budget eviction policy.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Init,
    Tool,
    User,
    Assistant,
    Task,
    Plan,
    Agent,
}

/// Metadata attached to exactly one history entry.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct MessageMeta {
    pub kind: MessageKind,
    /// Token cost counted when the entry was inserted. Fixed for the life
    /// of the entry.
    pub tokens: u32,
}

impl MessageMeta {
    pub fn new(kind: MessageKind, tokens: u32) -> Self {
        Self { kind, tokens }
    }
}

/// One history entry. Serializable so histories can be snapshot to disk and
/// restored.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct MessageRecord {
    pub message: Message,
    pub meta: MessageMeta,
}

/// Ordered sequence of `(Message, MessageMeta)` pairs with a cached total.
///
/// Invariant: `total_tokens == Σ meta.tokens` over all entries, after every
/// mutation. Insertion order is preserved; positional operations index into
/// that order.
#[derive(Debug, Default)]
pub struct MessageHistory {
    records: Vec<MessageRecord>,
    total_tokens: u64,
}

impl MessageHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a history from persisted records, recomputing the cache.
    pub fn from_records(records: Vec<MessageRecord>) -> Self {
        let total_tokens = records.iter().map(|r| r.meta.tokens as u64).sum();
        Self {
            records,
            total_tokens,
        }
    }

    /// Insert an entry at `position` (default: append).
    ///
    /// This does not deduplicate by kind; callers that maintain a unique
    /// entry (a single task message, say) remove the old one first.
    pub fn add(
        &mut self,
        message: Message,
        meta: MessageMeta,
        position: Option<usize>,
    ) -> Result<(), String> {
        let record = MessageRecord { message, meta };
        match position {
            Some(pos) => {
                if pos > self.records.len() {
                    return Err(format!(
                        "insert position {pos} out of range (len {})",
                        self.records.len()
                    ));
                }
                self.records.insert(pos, record);
            }
            None => self.records.push(record),
        }
        self.total_tokens += meta.tokens as u64;
        Ok(())
    }

    /// Remove one entry at `position` (default: last) and return it.
    pub fn remove(&mut self, position: Option<usize>) -> Result<MessageRecord, String> {
        if self.records.is_empty() {
            return Err("cannot remove from empty history".into());
        }
        let pos = position.unwrap_or(self.records.len() - 1);
        if pos >= self.records.len() {
            return Err(format!(
                "remove position {pos} out of range (len {})",
                self.records.len()
            ));
        }
        let record = self.records.remove(pos);
        self.total_tokens -= record.meta.tokens as u64;
        Ok(record)
    }

    /// Remove every entry of the given kind. Returns the number removed;
    /// zero matches is a no-op, not an error.
    pub fn remove_all_of_kind(&mut self, kind: MessageKind) -> usize {
        let before = self.records.len();
        let mut freed: u64 = 0;
        self.records.retain(|r| {
            if r.meta.kind == kind {
                freed += r.meta.tokens as u64;
                false
            } else {
                true
            }
        });
        self.total_tokens -= freed;
        before - self.records.len()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn total_tokens(&self) -> u64 {
        self.total_tokens
    }

    pub fn records(&self) -> &[MessageRecord] {
        &self.records
    }

    pub fn last(&self) -> Option<&MessageRecord> {
        self.records.last()
    }

    /// Index of the first entry of the given kind, in insertion order.
    pub fn position_of_kind(&self, kind: MessageKind) -> Option<usize> {
        self.records.iter().position(|r| r.meta.kind == kind)
    }

    /// Count of entries of the given kind.
    pub fn count_of_kind(&self, kind: MessageKind) -> usize {
        self.records.iter().filter(|r| r.meta.kind == kind).count()
    }
}
