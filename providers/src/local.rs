//! Locally-served model backend.
//!
//! Speaks the Ollama chat protocol (`POST {base_url}/api/chat`) against a
//! model served on the caller's machine. No auth; the transport boundary is
//! the local socket. Always requests a non-streamed reply (`stream: false`).
//!
//! Local models rarely publish a tokenizer, so the default counting family is
//! the byte heuristic.

use serde::{Deserialize, Serialize};

use palaver_types::{GenerationParams, Message, ProviderId, TokenizerId};

use crate::limits::ContextLimitRegistry;
use crate::{Completion, ProviderError, TokenUsage, http_client, read_error_body};

/// Default Ollama endpoint.
pub const LOCAL_API_BASE_URL: &str = "http://localhost:11434";

#[derive(Debug)]
pub struct LocalProvider {
    id: ProviderId,
    model: String,
    base_url: String,
    context_limit: u32,
    tokenizer: TokenizerId,
}

impl LocalProvider {
    #[must_use]
    pub fn new(id: ProviderId, model: impl Into<String>) -> Self {
        let model = model.into();
        let context_limit = ContextLimitRegistry::new().get(&model).limit();
        Self {
            id,
            model,
            base_url: LOCAL_API_BASE_URL.to_string(),
            context_limit,
            tokenizer: TokenizerId::Heuristic,
        }
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Overrides the registry-resolved context limit, e.g. when a local
    /// model is served with a custom `num_ctx`.
    #[must_use]
    pub fn with_context_limit(mut self, context_limit: u32) -> Self {
        self.context_limit = context_limit;
        self
    }

    #[must_use]
    pub fn with_tokenizer(mut self, tokenizer: TokenizerId) -> Self {
        self.tokenizer = tokenizer;
        self
    }

    #[must_use]
    pub fn id(&self) -> &ProviderId {
        &self.id
    }

    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    #[must_use]
    pub fn context_limit(&self) -> u32 {
        self.context_limit
    }

    #[must_use]
    pub fn tokenizer_id(&self) -> TokenizerId {
        self.tokenizer
    }

    pub async fn complete(
        &self,
        messages: &[Message],
        params: &GenerationParams,
    ) -> Result<Completion, ProviderError> {
        let options = ChatOptions {
            temperature: params.temperature,
            top_p: params.top_p,
            num_predict: params.max_tokens,
            stop: &params.stop,
        };
        let body = ChatRequest {
            model: &self.model,
            messages: messages.iter().map(WireMessage::from).collect(),
            stream: false,
            options,
        };

        let url = format!("{}/api/chat", self.base_url);
        tracing::debug!(
            provider = %self.id,
            model = %self.model,
            messages = messages.len(),
            "sending local completion request"
        );

        let response = http_client()
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::from_transport(&e))?;

        let status = response.status();
        if !status.is_success() {
            let body = read_error_body(response).await;
            return Err(ProviderError::from_status(status, &body));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::malformed(format!("invalid completion payload: {e}")))?;

        if parsed.message.content.trim().is_empty() {
            return Err(ProviderError::malformed("completion content was empty"));
        }

        let usage = match (parsed.prompt_eval_count, parsed.eval_count) {
            (Some(prompt_tokens), Some(completion_tokens)) => Some(TokenUsage {
                prompt_tokens,
                completion_tokens,
            }),
            _ => None,
        };

        Ok(Completion {
            content: parsed.message.content,
            usage,
        })
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    stream: bool,
    options: ChatOptions<'a>,
}

#[derive(Serialize)]
struct ChatOptions<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
    #[serde(skip_serializing_if = "<[_]>::is_empty")]
    stop: &'a [String],
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

impl<'a> From<&'a Message> for WireMessage<'a> {
    fn from(message: &'a Message) -> Self {
        Self {
            role: message.role_str(),
            content: message.content(),
        }
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    message: ResponseMessage,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    eval_count: Option<u32>,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: String,
}
