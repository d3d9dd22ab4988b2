//! LLM provider adapters with a uniform completion contract.
//!
//! # Architecture
//!
//! The crate is organized around a sealed provider set:
//!
//! - [`ChatProvider`] - the dispatch enum; `complete` routes to the selected
//!   backend
//! - [`hosted`] - OpenAI-compatible Chat Completions client (hosted API)
//! - [`local`] - Ollama-style chat client for locally-served models
//! - [`limits`] - per-model context limits (prefix matching, overrides)
//! - [`retry`] - retry bounds and backoff arithmetic consumed by the flow
//!   dispatcher (the adapters themselves never retry)
//!
//! Every adapter translates the uniform [`Message`] sequence into its wire
//! format, owns its transport and auth, and reports static metadata: the
//! model's context limit (resolved through [`limits::ContextLimitRegistry`])
//! and the tokenizer family that counts for it.
//!
//! # Error Handling
//!
//! All failures map onto [`ProviderError`]: `Transient` failures (rate
//! limits, timeouts, 5xx, connection errors) are safe to retry; `Fatal`
//! failures (auth, malformed requests, provider-reported context violations)
//! are surfaced immediately.

use std::sync::OnceLock;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use palaver_types::{GenerationParams, Message, ProviderId, TokenizerId};

pub mod hosted;
pub mod limits;
pub mod local;
pub mod retry;

pub use hosted::HostedProvider;
pub use limits::{ContextLimitRegistry, ContextLimitSource, ResolvedContextLimit};
pub use local::LocalProvider;

const CONNECT_TIMEOUT_SECS: u64 = 30;
const POOL_MAX_IDLE_PER_HOST: usize = 16;
const POOL_IDLE_TIMEOUT_SECS: u64 = 90;
const MAX_ERROR_BODY_BYTES: usize = 32 * 1024;

/// Shared HTTP client for all provider adapters.
///
/// Built once per process with connect timeout, TCP keepalive, and pool
/// limits. Request timeouts are applied per dispatch by the caller, not here.
pub fn http_client() -> &'static reqwest::Client {
    static CLIENT: OnceLock<reqwest::Client> = OnceLock::new();
    CLIENT.get_or_init(|| {
        reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .tcp_keepalive(Some(Duration::from_secs(60)))
            .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
            .pool_idle_timeout(Some(Duration::from_secs(POOL_IDLE_TIMEOUT_SECS)))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap_or_else(|e| {
                tracing::error!("failed to build pooled HTTP client: {e}; using defaults");
                reqwest::Client::new()
            })
    })
}

/// API credential that never appears in debug output or logs.
#[derive(Clone)]
pub struct ApiKey(String);

impl ApiKey {
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    #[must_use]
    pub fn expose_secret(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ApiKey(<redacted>)")
    }
}

/// Token usage as reported by the provider, when it reports any.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

/// A successful completion: the reply text plus optional usage accounting.
#[derive(Debug, Clone)]
pub struct Completion {
    pub content: String,
    pub usage: Option<TokenUsage>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransientKind {
    RateLimited,
    Unavailable,
    Timeout,
    Connection,
}

impl std::fmt::Display for TransientKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TransientKind::RateLimited => "rate limited",
            TransientKind::Unavailable => "unavailable",
            TransientKind::Timeout => "timeout",
            TransientKind::Connection => "connection",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalKind {
    Auth,
    InvalidRequest,
    ContextLimit,
    MalformedResponse,
}

impl std::fmt::Display for FatalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FatalKind::Auth => "auth",
            FatalKind::InvalidRequest => "invalid request",
            FatalKind::ContextLimit => "context limit",
            FatalKind::MalformedResponse => "malformed response",
        };
        f.write_str(s)
    }
}

/// Provider failure taxonomy.
///
/// The split is structural so callers cannot accidentally retry a fatal
/// failure: retry policy dispatches on [`ProviderError::is_transient`].
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("transient provider failure ({kind}): {message}")]
    Transient {
        kind: TransientKind,
        message: String,
    },
    #[error("fatal provider failure ({kind}): {message}")]
    Fatal { kind: FatalKind, message: String },
}

impl ProviderError {
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Transient { .. })
    }

    #[must_use]
    pub fn timeout(after: Duration) -> Self {
        ProviderError::Transient {
            kind: TransientKind::Timeout,
            message: format!("no response within {}s", after.as_secs()),
        }
    }

    pub(crate) fn malformed(message: impl Into<String>) -> Self {
        ProviderError::Fatal {
            kind: FatalKind::MalformedResponse,
            message: message.into(),
        }
    }

    /// Classifies a non-success HTTP status plus (capped) error body.
    #[must_use]
    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let code = status.as_u16();
        match code {
            401 | 403 => ProviderError::Fatal {
                kind: FatalKind::Auth,
                message: format!("{status}: {body}"),
            },
            408 => ProviderError::Transient {
                kind: TransientKind::Timeout,
                message: format!("{status}: {body}"),
            },
            409 | 429 => ProviderError::Transient {
                kind: TransientKind::RateLimited,
                message: format!("{status}: {body}"),
            },
            413 => ProviderError::Fatal {
                kind: FatalKind::ContextLimit,
                message: format!("{status}: {body}"),
            },
            400 if body.contains("context_length") || body.contains("maximum context length") => {
                // OpenAI reports context violations as 400 with code
                // "context_length_exceeded".
                ProviderError::Fatal {
                    kind: FatalKind::ContextLimit,
                    message: format!("{status}: {body}"),
                }
            }
            500..=599 => ProviderError::Transient {
                kind: TransientKind::Unavailable,
                message: format!("{status}: {body}"),
            },
            _ => ProviderError::Fatal {
                kind: FatalKind::InvalidRequest,
                message: format!("{status}: {body}"),
            },
        }
    }

    /// Classifies a transport-level reqwest error.
    #[must_use]
    pub fn from_transport(error: &reqwest::Error) -> Self {
        if error.is_timeout() {
            ProviderError::Transient {
                kind: TransientKind::Timeout,
                message: error.to_string(),
            }
        } else if error.is_decode() {
            ProviderError::malformed(error.to_string())
        } else {
            ProviderError::Transient {
                kind: TransientKind::Connection,
                message: error.to_string(),
            }
        }
    }
}

/// Reads an error body, truncated so a hostile or broken server cannot make
/// the error path allocate without bound.
pub(crate) async fn read_error_body(response: reqwest::Response) -> String {
    match response.text().await {
        Ok(mut text) => {
            if text.len() > MAX_ERROR_BODY_BYTES {
                text.truncate(MAX_ERROR_BODY_BYTES);
                text.push_str("...(truncated)");
            }
            text
        }
        Err(e) => format!("<unreadable error body: {e}>"),
    }
}

/// One registered backend instance, selected by configuration.
///
/// A sealed set rather than a trait object: provider selection stays
/// exhaustively checkable, and adding a backend is a compile-visible change.
#[derive(Debug)]
pub enum ChatProvider {
    Hosted(HostedProvider),
    Local(LocalProvider),
}

impl ChatProvider {
    #[must_use]
    pub fn id(&self) -> &ProviderId {
        match self {
            ChatProvider::Hosted(p) => p.id(),
            ChatProvider::Local(p) => p.id(),
        }
    }

    #[must_use]
    pub fn model(&self) -> &str {
        match self {
            ChatProvider::Hosted(p) => p.model(),
            ChatProvider::Local(p) => p.model(),
        }
    }

    /// Maximum tokens this backend accepts in one request.
    #[must_use]
    pub fn context_limit(&self) -> u32 {
        match self {
            ChatProvider::Hosted(p) => p.context_limit(),
            ChatProvider::Local(p) => p.context_limit(),
        }
    }

    /// The tokenizer family that measures this backend's context.
    #[must_use]
    pub fn tokenizer_id(&self) -> TokenizerId {
        match self {
            ChatProvider::Hosted(p) => p.tokenizer_id(),
            ChatProvider::Local(p) => p.tokenizer_id(),
        }
    }

    /// Executes a single completion request. Never retries; retry policy
    /// belongs to the dispatcher.
    pub async fn complete(
        &self,
        messages: &[Message],
        params: &GenerationParams,
    ) -> Result<Completion, ProviderError> {
        match self {
            ChatProvider::Hosted(p) => p.complete(messages, params).await,
            ChatProvider::Local(p) => p.complete(messages, params).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ApiKey, FatalKind, ProviderError, TransientKind};
    use reqwest::StatusCode;

    #[test]
    fn api_key_debug_is_redacted() {
        let key = ApiKey::new("sk-secret-value");
        let debug = format!("{key:?}");
        assert!(!debug.contains("secret"));
        assert_eq!(key.expose_secret(), "sk-secret-value");
    }

    #[test]
    fn rate_limit_and_server_errors_are_transient() {
        for status in [429u16, 500, 502, 503, 504] {
            let status = StatusCode::from_u16(status).expect("valid status");
            let err = ProviderError::from_status(status, "");
            assert!(err.is_transient(), "{status} should be transient");
        }
    }

    #[test]
    fn auth_failures_are_fatal() {
        for status in [401u16, 403] {
            let status = StatusCode::from_u16(status).expect("valid status");
            let err = ProviderError::from_status(status, "no key");
            assert!(!err.is_transient());
            assert!(matches!(
                err,
                ProviderError::Fatal {
                    kind: FatalKind::Auth,
                    ..
                }
            ));
        }
    }

    #[test]
    fn bad_request_is_fatal() {
        let err = ProviderError::from_status(StatusCode::BAD_REQUEST, "missing field");
        assert!(matches!(
            err,
            ProviderError::Fatal {
                kind: FatalKind::InvalidRequest,
                ..
            }
        ));
    }

    #[test]
    fn context_length_exceeded_maps_to_context_limit() {
        let body = r#"{"error":{"code":"context_length_exceeded"}}"#;
        let err = ProviderError::from_status(StatusCode::BAD_REQUEST, body);
        assert!(matches!(
            err,
            ProviderError::Fatal {
                kind: FatalKind::ContextLimit,
                ..
            }
        ));
    }

    #[test]
    fn request_timeout_status_is_transient_timeout() {
        let err = ProviderError::from_status(StatusCode::REQUEST_TIMEOUT, "");
        assert!(matches!(
            err,
            ProviderError::Transient {
                kind: TransientKind::Timeout,
                ..
            }
        ));
    }
}
