//! Hosted OpenAI-compatible backend.
//!
//! Speaks the Chat Completions wire format (`POST {base_url}/chat/completions`)
//! with bearer-token auth. Non-streaming: one JSON request, one JSON reply.
//!
//! # Role Mapping
//!
//! The uniform message roles map directly: `system`, `user`, `assistant`.
//!
//! # Tokenizer Selection
//!
//! The counting family is inferred from the model name (`o200k_base` for
//! gpt-4o and later, `cl100k_base` otherwise) and can be overridden for
//! compatible third-party endpoints that serve other vocabularies.

use serde::{Deserialize, Serialize};

use palaver_types::{GenerationParams, Message, ProviderId, TokenizerId};

use crate::limits::ContextLimitRegistry;
use crate::{ApiKey, Completion, ProviderError, TokenUsage, http_client, read_error_body};

/// Canonical OpenAI API base URL.
pub const OPENAI_API_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug)]
pub struct HostedProvider {
    id: ProviderId,
    model: String,
    api_key: ApiKey,
    base_url: String,
    context_limit: u32,
    tokenizer: TokenizerId,
}

impl HostedProvider {
    /// Creates a hosted provider for `model`.
    ///
    /// The context limit and tokenizer family are resolved from the model
    /// name; both can be overridden for custom deployments.
    #[must_use]
    pub fn new(id: ProviderId, model: impl Into<String>, api_key: ApiKey) -> Self {
        let model = model.into();
        let context_limit = ContextLimitRegistry::new().get(&model).limit();
        let tokenizer = default_tokenizer_for(&model);
        Self {
            id,
            model,
            api_key,
            base_url: OPENAI_API_BASE_URL.to_string(),
            context_limit,
            tokenizer,
        }
    }

    /// Points the adapter at a compatible endpoint (proxy, gateway, mock).
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Overrides the registry-resolved context limit.
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
        let body = ChatCompletionRequest {
            model: &self.model,
            messages: messages.iter().map(WireMessage::from).collect(),
            temperature: params.temperature,
            top_p: params.top_p,
            max_tokens: params.max_tokens,
            stop: &params.stop,
        };

        let url = format!("{}/chat/completions", self.base_url);
        tracing::debug!(
            provider = %self.id,
            model = %self.model,
            messages = messages.len(),
            "sending hosted completion request"
        );

        let response = http_client()
            .post(&url)
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::from_transport(&e))?;

        let status = response.status();
        if !status.is_success() {
            let body = read_error_body(response).await;
            return Err(ProviderError::from_status(status, &body));
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::malformed(format!("invalid completion payload: {e}")))?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::malformed("completion carried no choices"))?;

        let content = choice.message.content.unwrap_or_default();
        if content.trim().is_empty() {
            return Err(ProviderError::malformed("completion content was empty"));
        }

        Ok(Completion {
            content,
            usage: parsed.usage.map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
            }),
        })
    }
}

fn default_tokenizer_for(model: &str) -> TokenizerId {
    if model.starts_with("gpt-4o") || model.starts_with("gpt-5") || model.starts_with("o1") {
        TokenizerId::O200k
    } else {
        TokenizerId::Cl100k
    }
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
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
struct ChatCompletionResponse {
    choices: Vec<Choice>,
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct WireUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[cfg(test)]
mod tests {
    use std::time::SystemTime;

    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::{HostedProvider, default_tokenizer_for};
    use crate::{ApiKey, FatalKind, ProviderError, TransientKind};
    use palaver_types::{GenerationParams, Message, NonEmptyString, ProviderId, Seq, TokenizerId};

    fn provider(server: &MockServer) -> HostedProvider {
        HostedProvider::new(ProviderId::new("chatgpt"), "gpt-4-0613", ApiKey::new("sk-test"))
            .with_base_url(server.uri())
    }

    fn user(content: &str) -> Message {
        Message::user(
            NonEmptyString::new(content).expect("non-empty test content"),
            Seq::new(0),
            SystemTime::now(),
        )
    }

    fn reply_body(content: &str) -> serde_json::Value {
        json!({
            "choices": [{"message": {"role": "assistant", "content": content}}],
            "usage": {"prompt_tokens": 12, "completion_tokens": 5, "total_tokens": 17}
        })
    }

    #[test]
    fn tokenizer_inferred_from_model_family() {
        assert_eq!(default_tokenizer_for("gpt-4-0613"), TokenizerId::Cl100k);
        assert_eq!(default_tokenizer_for("gpt-3.5-turbo"), TokenizerId::Cl100k);
        assert_eq!(default_tokenizer_for("gpt-4o-mini"), TokenizerId::O200k);
        assert_eq!(default_tokenizer_for("o1-preview"), TokenizerId::O200k);
    }

    #[test]
    fn context_limit_resolved_from_model() {
        let provider =
            HostedProvider::new(ProviderId::new("chatgpt"), "gpt-4-0613", ApiKey::new("k"));
        assert_eq!(provider.context_limit(), 8_192);

        let overridden =
            HostedProvider::new(ProviderId::new("proxy"), "gpt-4-0613", ApiKey::new("k"))
                .with_context_limit(2_048);
        assert_eq!(overridden.context_limit(), 2_048);
    }

    #[tokio::test]
    async fn complete_returns_content_and_usage() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(json!({
                "model": "gpt-4-0613",
                "messages": [{"role": "user", "content": "hello"}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(reply_body("hi there")))
            .expect(1)
            .mount(&server)
            .await;

        let provider = provider(&server);
        let completion = provider
            .complete(&[user("hello")], &GenerationParams::new())
            .await
            .expect("completion");

        assert_eq!(completion.content, "hi there");
        let usage = completion.usage.expect("usage");
        assert_eq!(usage.prompt_tokens, 12);
        assert_eq!(usage.completion_tokens, 5);
    }

    #[tokio::test]
    async fn generation_params_reach_the_wire() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_partial_json(json!({
                "temperature": 0.5,
                "max_tokens": 128,
                "stop": ["END"]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(reply_body("ok")))
            .expect(1)
            .mount(&server)
            .await;

        let params = GenerationParams::new()
            .with_temperature(0.5)
            .with_max_tokens(128)
            .with_stop("END");
        provider(&server)
            .complete(&[user("hello")], &params)
            .await
            .expect("completion");
    }

    #[tokio::test]
    async fn rate_limit_maps_to_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .expect(1)
            .mount(&server)
            .await;

        let err = provider(&server)
            .complete(&[user("hello")], &GenerationParams::new())
            .await
            .expect_err("rate limited");
        assert!(matches!(
            err,
            ProviderError::Transient {
                kind: TransientKind::RateLimited,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn auth_failure_maps_to_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .expect(1)
            .mount(&server)
            .await;

        let err = provider(&server)
            .complete(&[user("hello")], &GenerationParams::new())
            .await
            .expect_err("unauthorized");
        assert!(matches!(
            err,
            ProviderError::Fatal {
                kind: FatalKind::Auth,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn provider_reported_context_violation_is_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": {"code": "context_length_exceeded", "message": "too long"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let err = provider(&server)
            .complete(&[user("hello")], &GenerationParams::new())
            .await
            .expect_err("context violation");
        assert!(matches!(
            err,
            ProviderError::Fatal {
                kind: FatalKind::ContextLimit,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn garbage_payload_is_malformed_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .expect(1)
            .mount(&server)
            .await;

        let err = provider(&server)
            .complete(&[user("hello")], &GenerationParams::new())
            .await
            .expect_err("bad payload");
        assert!(matches!(
            err,
            ProviderError::Fatal {
                kind: FatalKind::MalformedResponse,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn empty_choices_is_malformed_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"choices": []})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let err = provider(&server)
            .complete(&[user("hello")], &GenerationParams::new())
            .await
            .expect_err("no choices");
        assert!(matches!(
            err,
            ProviderError::Fatal {
                kind: FatalKind::MalformedResponse,
                ..
            }
        ));
    }
}
