//! The dispatch engine.
//!
//! One [`Flow`] owns a set of registered providers, a conversation store, and
//! a context window manager. Each `send` runs the same state machine:
//!
//! 1. load history and persist the inbound user message
//! 2. trim the conversation to its token budget
//! 3. call the provider, retrying transient failures with backoff
//! 4. persist the assistant reply
//!
//! The inbound message is persisted before the provider is called, so
//! history is never silently lost: a failed dispatch leaves the user's
//! message in the store with no assistant reply. Exactly one assistant
//! message is persisted per successful dispatch, regardless of retries.
//!
//! Dispatches on the same conversation are serialized by a per-conversation
//! lock; different conversations proceed concurrently. Dropping the returned
//! future cancels the dispatch: before the provider call is issued the only
//! side effect is the persisted inbound message, afterwards cancellation is
//! best-effort (the in-flight request is abandoned and nothing further is
//! persisted).

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime};

use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use palaver_context::{ContextWindowManager, Tokenizer, TrimError};
use palaver_providers::retry::{RetryConfig, backoff_delay};
use palaver_providers::{ChatProvider, Completion, FatalKind, ProviderError, TokenUsage};
use palaver_types::{
    Budget, Conversation, ConversationId, EmptyStringError, GenerationParams, HistoryError,
    Message, NonEmptyString, ProviderId, TokenizerId,
};

use crate::config::{ConfigError, FlowConfig};
use crate::store::{ConversationStore, StoreError};

/// Everything a dispatch can fail with, named by the stage that failed so a
/// caller can distinguish "your input was too large" from "the provider is
/// unavailable".
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("configuration rejected: {0}")]
    Config(#[from] ConfigError),
    #[error("inbound message rejected: {0}")]
    EmptyMessage(#[from] EmptyStringError),
    #[error("loading conversation history failed: {0}")]
    Load(#[source] StoreError),
    #[error("stored conversation history is corrupt: {0}")]
    History(#[from] HistoryError),
    #[error("trimming conversation to budget failed: {0}")]
    Trim(#[from] TrimError),
    #[error("provider call failed after {attempts} attempt(s): {source}")]
    Provider {
        attempts: u32,
        #[source]
        source: ProviderError,
    },
    #[error("persisting message failed: {0}")]
    Persist(#[source] StoreError),
    #[error("assistant reply rejected after {attempts} attempt(s): {reason}")]
    ResponseRejected {
        attempts: u32,
        last_reply: String,
        reason: String,
    },
}

/// A successful dispatch: the persisted assistant message plus any usage the
/// provider reported.
#[derive(Debug, Clone)]
pub struct AssistantReply {
    pub message: Message,
    pub usage: Option<TokenUsage>,
}

struct RegisteredProvider {
    provider: ChatProvider,
    budget: Budget,
    tokenizer: TokenizerId,
}

/// Per-conversation exclusive sections.
///
/// Entries are never reclaimed; the map is bounded by the number of distinct
/// conversations the embedding application dispatches through this flow.
#[derive(Default)]
struct ConversationLocks {
    inner: Mutex<HashMap<ConversationId, Arc<AsyncMutex<()>>>>,
}

impl ConversationLocks {
    async fn acquire(&self, id: ConversationId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(map.entry(id).or_insert_with(|| Arc::new(AsyncMutex::new(()))))
        };
        lock.lock_owned().await
    }
}

/// The conversation dispatch engine.
pub struct Flow<S> {
    providers: HashMap<ProviderId, RegisteredProvider>,
    default_provider: Option<ProviderId>,
    store: S,
    window: ContextWindowManager,
    locks: ConversationLocks,
    retry: RetryConfig,
    request_timeout: Duration,
}

impl<S: ConversationStore> Flow<S> {
    /// Builds a flow over the given providers and store.
    ///
    /// Fails fast on anything that would make a later dispatch invalid: no
    /// providers, duplicate ids, an unknown default provider, a token offset
    /// that exhausts a provider's context limit, or a tokenizer whose
    /// vocabulary cannot be loaded.
    pub fn new(
        providers: Vec<ChatProvider>,
        store: S,
        config: FlowConfig,
    ) -> Result<Self, ConfigError> {
        if providers.is_empty() {
            return Err(ConfigError::NoProviders);
        }

        let single_id = (providers.len() == 1).then(|| providers[0].id().clone());

        let mut registered = HashMap::new();
        for provider in providers {
            let id = provider.id().clone();
            let limit = config.context_limit.unwrap_or(provider.context_limit());
            let budget = Budget::new(limit, config.token_offset)?;
            let tokenizer = config.tokenizer.unwrap_or(provider.tokenizer_id());
            Tokenizer::new(tokenizer)?;
            let entry = RegisteredProvider {
                provider,
                budget,
                tokenizer,
            };
            if registered.insert(id.clone(), entry).is_some() {
                return Err(ConfigError::DuplicateProviderId(id));
            }
        }

        let default_provider = match &config.provider {
            Some(raw) => {
                let id = ProviderId::new(raw.clone());
                if !registered.contains_key(&id) {
                    return Err(ConfigError::UnknownProvider(id));
                }
                Some(id)
            }
            None => single_id,
        };

        Ok(Self {
            providers: registered,
            default_provider,
            store,
            window: ContextWindowManager::with_policy(config.oversize_policy),
            locks: ConversationLocks::default(),
            retry: config.retry_config(),
            request_timeout: config.request_timeout(),
        })
    }

    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Sends one user turn through the default provider and returns the
    /// persisted assistant reply.
    pub async fn send(
        &self,
        conversation_id: ConversationId,
        text: impl Into<String>,
        params: &GenerationParams,
    ) -> Result<AssistantReply, DispatchError> {
        let provider_id = self.default_provider_id()?;
        self.dispatch(conversation_id, &provider_id, text.into(), params)
            .await
    }

    /// Like [`Flow::send`] but against an explicitly chosen provider.
    pub async fn send_with(
        &self,
        conversation_id: ConversationId,
        provider_id: &ProviderId,
        text: impl Into<String>,
        params: &GenerationParams,
    ) -> Result<AssistantReply, DispatchError> {
        self.dispatch(conversation_id, provider_id, text.into(), params)
            .await
    }

    /// Sends one user turn and validates the reply before persisting it.
    ///
    /// A rejected reply is kept only in the in-flight working history,
    /// together with the validator's complaint as a correction prompt, and
    /// the provider is asked again up to `fix_retries` more times. Only the
    /// finally accepted assistant message reaches the store; the caller gets
    /// it alongside whatever the validator parsed out of it.
    pub async fn send_validated<T, F>(
        &self,
        conversation_id: ConversationId,
        text: impl Into<String>,
        params: &GenerationParams,
        fix_retries: u32,
        validator: F,
    ) -> Result<(AssistantReply, T), DispatchError>
    where
        F: Fn(&str) -> Result<T, String>,
    {
        let provider_id = self.default_provider_id()?;
        let registered = self.registered(&provider_id)?;
        let content = NonEmptyString::new(text.into())?;

        let _guard = self.locks.acquire(conversation_id).await;

        let mut conversation = self
            .load_conversation(conversation_id, &provider_id, registered)
            .await?;
        let inbound = conversation
            .push_user(content, SystemTime::now())
            .clone();
        self.store
            .append(conversation_id, inbound)
            .await
            .map_err(DispatchError::Persist)?;

        let total_attempts = fix_retries + 1;
        let mut last_rejection: Option<(String, String)> = None;
        for attempt in 1..=total_attempts {
            let request = self.trimmed_request(&conversation)?;
            let (completion, provider_attempts) = self
                .complete_with_retry(&registered.provider, &request, params)
                .await?;

            match validator(&completion.content) {
                Ok(value) => {
                    let reply = self
                        .persist_assistant(conversation_id, &mut conversation, &provider_id, completion, provider_attempts)
                        .await?;
                    return Ok((reply, value));
                }
                Err(reason) => {
                    tracing::warn!(
                        conversation = %conversation_id,
                        attempt,
                        reason,
                        "assistant reply rejected by validator; re-asking"
                    );
                    // The candidate and the correction live only in the
                    // working history; the store never sees them.
                    let candidate =
                        reply_content(&completion.content, provider_attempts)?;
                    conversation.push_assistant(
                        provider_id.clone(),
                        candidate,
                        SystemTime::now(),
                    );
                    let correction = correction_prompt(&reason);
                    conversation.push_user(correction, SystemTime::now());
                    last_rejection = Some((completion.content, reason));
                }
            }
        }

        let (last_reply, reason) = last_rejection.unwrap_or_default();
        Err(DispatchError::ResponseRejected {
            attempts: total_attempts,
            last_reply,
            reason,
        })
    }

    async fn dispatch(
        &self,
        conversation_id: ConversationId,
        provider_id: &ProviderId,
        text: String,
        params: &GenerationParams,
    ) -> Result<AssistantReply, DispatchError> {
        let registered = self.registered(provider_id)?;
        let content = NonEmptyString::new(text)?;

        let _guard = self.locks.acquire(conversation_id).await;

        let mut conversation = self
            .load_conversation(conversation_id, provider_id, registered)
            .await?;
        let inbound = conversation
            .push_user(content, SystemTime::now())
            .clone();
        self.store
            .append(conversation_id, inbound)
            .await
            .map_err(DispatchError::Persist)?;

        let request = self.trimmed_request(&conversation)?;
        let (completion, attempts) = self
            .complete_with_retry(&registered.provider, &request, params)
            .await?;

        let reply = self
            .persist_assistant(conversation_id, &mut conversation, provider_id, completion, attempts)
            .await?;
        tracing::info!(
            conversation = %conversation_id,
            provider = %provider_id,
            attempts,
            "dispatch complete"
        );
        Ok(reply)
    }

    fn default_provider_id(&self) -> Result<ProviderId, DispatchError> {
        self.default_provider
            .clone()
            .ok_or_else(|| ConfigError::ProviderRequired.into())
    }

    fn registered(&self, id: &ProviderId) -> Result<&RegisteredProvider, DispatchError> {
        self.providers
            .get(id)
            .ok_or_else(|| ConfigError::UnknownProvider(id.clone()).into())
    }

    async fn load_conversation(
        &self,
        conversation_id: ConversationId,
        provider_id: &ProviderId,
        registered: &RegisteredProvider,
    ) -> Result<Conversation, DispatchError> {
        let history = self
            .store
            .load(conversation_id)
            .await
            .map_err(DispatchError::Load)?;
        Ok(Conversation::from_history(
            conversation_id,
            provider_id.clone(),
            registered.tokenizer,
            registered.budget,
            history,
        )?)
    }

    fn trimmed_request(&self, conversation: &Conversation) -> Result<Vec<Message>, DispatchError> {
        let trimmed = self.window.trim(conversation)?;
        tracing::debug!(
            conversation = %conversation.id(),
            messages = trimmed.len(),
            total_tokens = trimmed.total_tokens(),
            "context trimmed to budget"
        );
        Ok(trimmed.messages().cloned().collect())
    }

    async fn complete_with_retry(
        &self,
        provider: &ChatProvider,
        messages: &[Message],
        params: &GenerationParams,
    ) -> Result<(Completion, u32), DispatchError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let outcome =
                tokio::time::timeout(self.request_timeout, provider.complete(messages, params))
                    .await;
            let error = match outcome {
                Ok(Ok(completion)) => return Ok((completion, attempt)),
                Ok(Err(e)) => e,
                Err(_elapsed) => ProviderError::timeout(self.request_timeout),
            };

            if error.is_transient() && attempt <= self.retry.max_retries {
                let delay = backoff_delay(attempt - 1, &self.retry);
                tracing::debug!(
                    provider = %provider.id(),
                    attempt,
                    delay_ms = delay.as_millis(),
                    error = %error,
                    "transient provider failure; retrying after backoff"
                );
                tokio::time::sleep(delay).await;
                continue;
            }

            return Err(DispatchError::Provider {
                attempts: attempt,
                source: error,
            });
        }
    }

    async fn persist_assistant(
        &self,
        conversation_id: ConversationId,
        conversation: &mut Conversation,
        provider_id: &ProviderId,
        completion: Completion,
        attempts: u32,
    ) -> Result<AssistantReply, DispatchError> {
        let content = reply_content(&completion.content, attempts)?;
        let assistant = conversation
            .push_assistant(provider_id.clone(), content, SystemTime::now())
            .clone();
        self.store
            .append(conversation_id, assistant.clone())
            .await
            .map_err(DispatchError::Persist)?;
        Ok(AssistantReply {
            message: assistant,
            usage: completion.usage,
        })
    }
}

fn reply_content(raw: &str, attempts: u32) -> Result<NonEmptyString, DispatchError> {
    NonEmptyString::new(raw).map_err(|_| DispatchError::Provider {
        attempts,
        source: ProviderError::Fatal {
            kind: FatalKind::MalformedResponse,
            message: "completion content was empty".to_string(),
        },
    })
}

fn correction_prompt(reason: &str) -> NonEmptyString {
    let text = if reason.trim().is_empty() {
        "The previous reply was rejected. Please answer again.".to_string()
    } else {
        format!("The previous reply was rejected: {reason}. Please answer again.")
    };
    NonEmptyString::new(text).expect("correction prompt is non-empty by construction")
}
