//! Token counting with a deterministic fallback.
//!
//! Budget enforcement only works when every message has an exact, stable
//! token cost. When the active model exposes a native counting capability we
//! use it; when it errors (or no capability is wired in) we fall back to a
//! fixed cl100k byte-pair encoding so the same message always costs the same
//! number of tokens across runs. Counting never fails and never aborts the
//! caller; a failed native count degrades silently to the fallback.

use crate::Message;
use crate::api::TokenCounter;
use std::sync::Arc;
use tiktoken_rs::CoreBPE;
use tracing::debug;

/// Counts the token cost of a single conversational message.
///
/// Pure function of its input plus the (optional) native capability: no
/// side effects, no caching, no recomputation. The history stores the value
/// counted at insertion time.
pub struct TokenAccountant {
    native: Option<Arc<dyn TokenCounter>>,
    bpe: CoreBPE,
}

impl std::fmt::Debug for TokenAccountant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenAccountant")
            .field("native", &self.native.is_some())
            .finish()
    }
}

impl TokenAccountant {
    /// Create an accountant, optionally backed by a model's native counter.
    ///
    /// Building the fallback vocabulary can fail only if the embedded cl100k
    /// tables are corrupt, which would be a packaging defect.
    pub fn new(native: Option<Arc<dyn TokenCounter>>) -> Result<Self, String> {
        let bpe = tiktoken_rs::cl100k_base()
            .map_err(|e| format!("failed to build fallback tokenizer: {e}"))?;
        Ok(Self { native, bpe })
    }

    /// Count the tokens of one message. Never fails.
    ///
    /// Native counter first; any error is logged at debug and absorbed by
    /// the fallback path.
    pub fn count(&self, message: &Message) -> u32 {
        if let Some(ref native) = self.native {
            match native.count_tokens(message) {
                Ok(n) => return n,
                Err(e) => {
                    debug!("native token count failed, using fallback: {e}");
                }
            }
        }
        self.fallback_count(message)
    }

    /// Sum the counts of an ordered message list.
    pub fn count_all(&self, messages: &[Message]) -> u64 {
        messages.iter().map(|m| self.count(m) as u64).sum()
    }

    /// Deterministic fallback: newline-join every piece of textual content
    /// the message carries (body plus tool-call arguments) and encode it.
    fn fallback_count(&self, message: &Message) -> u32 {
        let mut parts: Vec<&str> = Vec::new();
        if let Some(ref content) = message.content {
            parts.push(content);
        }
        if let Some(ref calls) = message.tool_calls {
            for call in calls {
                parts.push(&call.function.arguments);
            }
        }
        let joined = parts.join("\n");
        self.bpe.encode_with_special_tokens(&joined).len() as u32
    }
}
