//! Conversation dispatch engine.
//!
//! # Architecture
//!
//! ```text
//! Flow
//! ├── providers: sealed ChatProvider set, validated unique ids
//! ├── store: ConversationStore (append + ordered load)
//! ├── window: ContextWindowManager (trim to budget, memoized counts)
//! ├── locks: per-conversation exclusive sections
//! └── retry: bounded backoff for transient provider failures
//! ```
//!
//! The public operation is [`Flow::send`]: append the user turn, trim the
//! history to the provider's token budget, call the provider with retry, and
//! persist exactly one assistant reply. [`Flow::send_validated`] additionally
//! gates persistence on a caller-supplied validator, re-asking the provider
//! with the complaint as a correction prompt.
//!
//! All failures are typed by stage ([`DispatchError`]), so a caller can tell
//! "your input was too large" from "the provider is unavailable" from "the
//! store is down".

mod config;
mod dispatch;
mod store;

pub use config::{ConfigError, FlowConfig};
pub use dispatch::{AssistantReply, DispatchError, Flow};
pub use store::{ConversationStore, MemoryStore, StoreError};

pub use palaver_context as context;
pub use palaver_providers as providers;
pub use palaver_types as types;
