//! Conversation state: an append-only, ordered message history bound to a
//! provider, a tokenizer, and a validated budget.
//!
//! Invariants enforced here:
//! - insertion order is semantic order; nothing reorders messages
//! - sequence numbers are strictly increasing (gaps allowed)
//! - the first message, if system-role, is the pinned prefix and is exempt
//!   from truncation

use std::time::SystemTime;

use thiserror::Error;

use crate::budget::Budget;
use crate::ids::{ConversationId, ProviderId, Seq};
use crate::message::Message;
use crate::proofs::NonEmptyString;
use crate::tokenizer::TokenizerId;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HistoryError {
    #[error("message sequence numbers must be strictly increasing (got {next} after {prev})")]
    NonMonotonicSequence { prev: Seq, next: Seq },
}

/// Ordered message history plus the provider/tokenizer pairing used to
/// dispatch it.
#[derive(Debug, Clone)]
pub struct Conversation {
    id: ConversationId,
    provider: ProviderId,
    tokenizer: TokenizerId,
    budget: Budget,
    messages: Vec<Message>,
    next_seq: Seq,
}

impl Conversation {
    /// Creates an empty conversation.
    ///
    /// The budget is already validated by construction ([`Budget::new`]), so
    /// a `Conversation` in hand can always be dispatched.
    #[must_use]
    pub fn new(
        id: ConversationId,
        provider: ProviderId,
        tokenizer: TokenizerId,
        budget: Budget,
    ) -> Self {
        Self {
            id,
            provider,
            tokenizer,
            budget,
            messages: Vec::new(),
            next_seq: Seq::new(0),
        }
    }

    /// Rebuilds a conversation from stored history.
    ///
    /// The store contract guarantees insertion order on load; this validates
    /// that the sequence numbers agree and refuses corrupted history.
    pub fn from_history(
        id: ConversationId,
        provider: ProviderId,
        tokenizer: TokenizerId,
        budget: Budget,
        messages: Vec<Message>,
    ) -> Result<Self, HistoryError> {
        let mut prev: Option<Seq> = None;
        for msg in &messages {
            if let Some(prev) = prev
                && msg.seq() <= prev
            {
                return Err(HistoryError::NonMonotonicSequence {
                    prev,
                    next: msg.seq(),
                });
            }
            prev = Some(msg.seq());
        }

        let next_seq = prev.map_or(Seq::new(0), Seq::next);
        Ok(Self {
            id,
            provider,
            tokenizer,
            budget,
            messages,
            next_seq,
        })
    }

    #[must_use]
    pub fn id(&self) -> ConversationId {
        self.id
    }

    #[must_use]
    pub fn provider(&self) -> &ProviderId {
        &self.provider
    }

    #[must_use]
    pub fn tokenizer(&self) -> TokenizerId {
        self.tokenizer
    }

    #[must_use]
    pub fn budget(&self) -> Budget {
        self.budget
    }

    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// The pinned prefix: the first message when it is system-role.
    #[must_use]
    pub fn pinned(&self) -> Option<&Message> {
        self.messages.first().filter(|m| m.is_system())
    }

    /// History subject to truncation: everything after the pinned prefix.
    #[must_use]
    pub fn truncatable(&self) -> &[Message] {
        if self.pinned().is_some() {
            &self.messages[1..]
        } else {
            &self.messages
        }
    }

    fn push(&mut self, message: Message) -> &Message {
        self.messages.push(message);
        self.next_seq = self.next_seq.next();
        self.messages.last().expect("just pushed")
    }

    pub fn push_system(&mut self, content: NonEmptyString, now: SystemTime) -> &Message {
        let msg = Message::system(content, self.next_seq, now);
        self.push(msg)
    }

    pub fn push_user(&mut self, content: NonEmptyString, now: SystemTime) -> &Message {
        let msg = Message::user(content, self.next_seq, now);
        self.push(msg)
    }

    pub fn push_assistant(
        &mut self,
        provider: ProviderId,
        content: NonEmptyString,
        now: SystemTime,
    ) -> &Message {
        let msg = Message::assistant(provider, content, self.next_seq, now);
        self.push(msg)
    }
}
