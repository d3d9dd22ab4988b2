//! Core message domain model.
//!
//! Contains the `Message` sum type and its role-specific structs. Messages are
//! immutable once created; constructors take `SystemTime` explicitly so
//! callers own the clock, and a [`Seq`] explicitly so the conversation owns
//! the ordering.

use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::ids::{MessageId, ProviderId, Seq};
use crate::proofs::NonEmptyString;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemMessage {
    id: MessageId,
    seq: Seq,
    content: NonEmptyString,
    timestamp: SystemTime,
}

impl SystemMessage {
    #[must_use]
    pub fn new(content: NonEmptyString, seq: Seq, timestamp: SystemTime) -> Self {
        Self {
            id: MessageId::random(),
            seq,
            content,
            timestamp,
        }
    }

    #[must_use]
    pub fn content(&self) -> &str {
        self.content.as_str()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserMessage {
    id: MessageId,
    seq: Seq,
    content: NonEmptyString,
    timestamp: SystemTime,
}

impl UserMessage {
    #[must_use]
    pub fn new(content: NonEmptyString, seq: Seq, timestamp: SystemTime) -> Self {
        Self {
            id: MessageId::random(),
            seq,
            content,
            timestamp,
        }
    }

    #[must_use]
    pub fn content(&self) -> &str {
        self.content.as_str()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantMessage {
    id: MessageId,
    seq: Seq,
    content: NonEmptyString,
    timestamp: SystemTime,
    /// The provider instance that produced this reply. Kept on the message so
    /// mixed-provider conversations remain attributable after the fact.
    provider: ProviderId,
}

impl AssistantMessage {
    #[must_use]
    pub fn new(
        provider: ProviderId,
        content: NonEmptyString,
        seq: Seq,
        timestamp: SystemTime,
    ) -> Self {
        Self {
            id: MessageId::random(),
            seq,
            content,
            timestamp,
            provider,
        }
    }

    #[must_use]
    pub fn content(&self) -> &str {
        self.content.as_str()
    }

    #[must_use]
    pub fn provider(&self) -> &ProviderId {
        &self.provider
    }
}

/// A complete message.
///
/// This is a real sum type (not a `Role` tag + "sometimes-meaningful" fields):
/// only assistant messages carry provider attribution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Message {
    System(SystemMessage),
    User(UserMessage),
    Assistant(AssistantMessage),
}

impl Message {
    #[must_use]
    pub fn system(content: NonEmptyString, seq: Seq, timestamp: SystemTime) -> Self {
        Self::System(SystemMessage::new(content, seq, timestamp))
    }

    #[must_use]
    pub fn user(content: NonEmptyString, seq: Seq, timestamp: SystemTime) -> Self {
        Self::User(UserMessage::new(content, seq, timestamp))
    }

    #[must_use]
    pub fn assistant(
        provider: ProviderId,
        content: NonEmptyString,
        seq: Seq,
        timestamp: SystemTime,
    ) -> Self {
        Self::Assistant(AssistantMessage::new(provider, content, seq, timestamp))
    }

    #[must_use]
    pub fn id(&self) -> MessageId {
        match self {
            Message::System(m) => m.id,
            Message::User(m) => m.id,
            Message::Assistant(m) => m.id,
        }
    }

    #[must_use]
    pub fn seq(&self) -> Seq {
        match self {
            Message::System(m) => m.seq,
            Message::User(m) => m.seq,
            Message::Assistant(m) => m.seq,
        }
    }

    #[must_use]
    pub fn timestamp(&self) -> SystemTime {
        match self {
            Message::System(m) => m.timestamp,
            Message::User(m) => m.timestamp,
            Message::Assistant(m) => m.timestamp,
        }
    }

    #[must_use]
    pub fn role_str(&self) -> &'static str {
        match self {
            Message::System(_) => "system",
            Message::User(_) => "user",
            Message::Assistant(_) => "assistant",
        }
    }

    #[must_use]
    pub fn content(&self) -> &str {
        match self {
            Message::System(m) => m.content(),
            Message::User(m) => m.content(),
            Message::Assistant(m) => m.content(),
        }
    }

    #[must_use]
    pub fn is_system(&self) -> bool {
        matches!(self, Message::System(_))
    }
}
