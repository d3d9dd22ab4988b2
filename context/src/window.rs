//! The context window manager.
//!
//! Given a conversation and its budget, produces the largest valid suffix of
//! history (plus the pinned prefix) whose token total fits
//! `context_limit - token_offset`. Messages are never split and never
//! reordered; trimming only chooses where the retained suffix begins.
//!
//! Token counts are memoized per `(MessageId, TokenizerId)` in a side table
//! owned by each manager, so re-trimming unchanged history does not
//! re-tokenize it and multiple managers coexist in one process without
//! interference. The table is read-mostly: concurrent dispatches on different
//! conversations share cached counts and only take the write lock on a miss.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use palaver_types::{Conversation, Message, MessageId, Seq, TokenizerId};

use crate::tokenizer::{TokenizationError, Tokenizer};

/// What to do when the most recent message alone exceeds the remaining
/// budget.
///
/// Defaults to keeping the newest message: a single message is the minimal
/// useful unit, and a non-empty history must never trim down to an empty
/// request. Strict callers that need the budget guaranteed can opt into
/// rejection instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OversizePolicy {
    /// Retain the most recent message alone, even over budget.
    #[default]
    KeepMostRecent,
    /// Fail the dispatch; the caller must shorten its input.
    Reject,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrimError {
    /// A message that cannot be dropped (the pinned prefix, or the most
    /// recent message under [`OversizePolicy::Reject`]) exceeds the budget
    /// on its own.
    #[error(
        "message at seq {seq} needs {tokens} tokens but only {available} fit the context window"
    )]
    MessageTooLarge {
        seq: Seq,
        tokens: u32,
        available: u32,
    },
    #[error(transparent)]
    Tokenization(#[from] TokenizationError),
}

/// The budget-fitting view of a conversation: pinned prefix plus a contiguous
/// suffix of the remaining history.
#[derive(Debug, Clone)]
pub struct TrimmedContext<'a> {
    pinned: Option<&'a Message>,
    tail: &'a [Message],
    total_tokens: u32,
}

impl<'a> TrimmedContext<'a> {
    /// Messages in dispatch order: pinned prefix first, then the suffix.
    pub fn messages(&self) -> impl Iterator<Item = &'a Message> + '_ {
        self.pinned.into_iter().chain(self.tail.iter())
    }

    #[must_use]
    pub fn pinned(&self) -> Option<&'a Message> {
        self.pinned
    }

    #[must_use]
    pub fn tail(&self) -> &'a [Message] {
        self.tail
    }

    #[must_use]
    pub fn len(&self) -> usize {
        usize::from(self.pinned.is_some()) + self.tail.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total tokens of the retained messages as measured by the
    /// conversation's tokenizer. Exceeds the budget only in the documented
    /// [`OversizePolicy::KeepMostRecent`] case.
    #[must_use]
    pub fn total_tokens(&self) -> u32 {
        self.total_tokens
    }
}

/// Trims conversations to their budget and owns the token-count memo table.
#[derive(Debug, Default)]
pub struct ContextWindowManager {
    policy: OversizePolicy,
    counts: RwLock<HashMap<(MessageId, TokenizerId), u32>>,
}

impl ContextWindowManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_policy(policy: OversizePolicy) -> Self {
        Self {
            policy,
            counts: RwLock::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn policy(&self) -> OversizePolicy {
        self.policy
    }

    /// Produces the largest budget-fitting view of the conversation.
    ///
    /// Walks history newest to oldest, accumulating memoized token counts,
    /// and stops before the first message that would overflow
    /// `context_limit - token_offset - pinned_tokens`. Never retries and
    /// never splits a message.
    pub fn trim<'a>(
        &self,
        conversation: &'a Conversation,
    ) -> Result<TrimmedContext<'a>, TrimError> {
        let tokenizer = Tokenizer::new(conversation.tokenizer())?;
        let budget = conversation.budget().history_budget();

        let pinned = conversation.pinned();
        let mut remaining = budget;
        let mut total_tokens = 0u32;

        if let Some(pinned) = pinned {
            let tokens = self.counted(pinned, &tokenizer);
            if tokens > remaining {
                // The pinned prefix is exempt from truncation, and nothing
                // else can give way for it.
                return Err(TrimError::MessageTooLarge {
                    seq: pinned.seq(),
                    tokens,
                    available: remaining,
                });
            }
            remaining -= tokens;
            total_tokens += tokens;
        }

        let history = conversation.truncatable();
        let mut start = history.len();
        for (idx, message) in history.iter().enumerate().rev() {
            let tokens = self.counted(message, &tokenizer);
            if tokens > remaining {
                let is_most_recent = idx + 1 == history.len();
                if is_most_recent {
                    match self.policy {
                        OversizePolicy::KeepMostRecent => {
                            tracing::warn!(
                                conversation = %conversation.id(),
                                seq = %message.seq(),
                                tokens,
                                available = remaining,
                                "most recent message exceeds budget; retaining it alone"
                            );
                            start = idx;
                            total_tokens = total_tokens.saturating_add(tokens);
                        }
                        OversizePolicy::Reject => {
                            return Err(TrimError::MessageTooLarge {
                                seq: message.seq(),
                                tokens,
                                available: remaining,
                            });
                        }
                    }
                }
                break;
            }
            remaining -= tokens;
            total_tokens += tokens;
            start = idx;
        }

        let dropped = start;
        if dropped > 0 {
            tracing::debug!(
                conversation = %conversation.id(),
                dropped,
                retained = history.len() - dropped,
                "trimmed conversation history to fit budget"
            );
        }

        Ok(TrimmedContext {
            pinned,
            tail: &history[start..],
            total_tokens,
        })
    }

    fn counted(&self, message: &Message, tokenizer: &Tokenizer) -> u32 {
        let key = (message.id(), tokenizer.id());
        if let Some(cached) = self
            .counts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
        {
            return *cached;
        }

        let tokens = tokenizer.count_message(message);
        self.counts
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, tokens);
        tokens
    }

    #[cfg(test)]
    fn cached_entries(&self) -> usize {
        self.counts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
