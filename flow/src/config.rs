//! Flow configuration surface.
//!
//! A plain structure with the recognized options and nothing else
//! (`deny_unknown_fields`): a typo in an embedder's config file fails loudly
//! instead of silently falling back to a default. File discovery and
//! environment merging belong to the embedding application; the core only
//! parses.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use palaver_context::{OversizePolicy, TokenizationError};
use palaver_providers::retry::RetryConfig;
use palaver_types::{Budget, BudgetError, ProviderId, TokenizerId};

/// Configuration errors: everything that can be rejected before any dispatch
/// runs.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("at least one provider must be registered")]
    NoProviders,
    #[error("provider ids must be unique (duplicate: {0})")]
    DuplicateProviderId(ProviderId),
    #[error("no provider registered under id {0}")]
    UnknownProvider(ProviderId),
    #[error("a provider id is required when more than one provider is registered")]
    ProviderRequired,
    #[error(transparent)]
    Budget(#[from] BudgetError),
    #[error(transparent)]
    Tokenizer(#[from] TokenizationError),
    #[error("invalid flow configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Per-flow settings.
///
/// Every field has a default; an empty document is a valid configuration for
/// a single-provider flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FlowConfig {
    /// Tokens reserved for the anticipated completion before trimming.
    pub token_offset: u32,
    /// Overrides every provider's reported context limit when set.
    pub context_limit: Option<u32>,
    /// Default provider id for `send`. Optional when exactly one provider is
    /// registered.
    pub provider: Option<String>,
    /// Overrides every provider's tokenizer family when set.
    pub tokenizer: Option<TokenizerId>,
    /// What to do when the most recent message alone exceeds the budget.
    pub oversize_policy: OversizePolicy,
    /// Retries after a transient provider failure.
    pub max_retries: u32,
    pub initial_retry_delay_ms: u64,
    pub max_retry_delay_ms: u64,
    /// Per-attempt provider call timeout.
    pub request_timeout_secs: u64,
}

impl Default for FlowConfig {
    fn default() -> Self {
        let retry = RetryConfig::default();
        Self {
            token_offset: Budget::DEFAULT_TOKEN_OFFSET,
            context_limit: None,
            provider: None,
            tokenizer: None,
            oversize_policy: OversizePolicy::default(),
            max_retries: retry.max_retries,
            initial_retry_delay_ms: retry.initial_delay.as_millis() as u64,
            max_retry_delay_ms: retry.max_delay.as_millis() as u64,
            request_timeout_secs: 60,
        }
    }
}

impl FlowConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    #[must_use]
    pub(crate) fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.max_retries,
            initial_delay: Duration::from_millis(self.initial_retry_delay_ms),
            max_delay: Duration::from_millis(self.max_retry_delay_ms),
            ..RetryConfig::default()
        }
    }

    #[must_use]
    pub(crate) fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, FlowConfig};
    use palaver_context::OversizePolicy;
    use palaver_types::TokenizerId;

    #[test]
    fn defaults_reserve_sixteen_tokens() {
        let config = FlowConfig::default();
        assert_eq!(config.token_offset, 16);
        assert_eq!(config.context_limit, None);
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.request_timeout_secs, 60);
        assert_eq!(config.oversize_policy, OversizePolicy::KeepMostRecent);
    }

    #[test]
    fn empty_document_is_valid() {
        let config = FlowConfig::from_toml_str("").expect("empty config");
        assert_eq!(config.token_offset, FlowConfig::default().token_offset);
    }

    #[test]
    fn parses_recognized_options() {
        let config = FlowConfig::from_toml_str(
            r#"
            token_offset = 32
            context_limit = 2048
            provider = "chatgpt"
            tokenizer = "cl100k"
            oversize_policy = "reject"
            max_retries = 5
            request_timeout_secs = 10
            "#,
        )
        .expect("valid config");

        assert_eq!(config.token_offset, 32);
        assert_eq!(config.context_limit, Some(2048));
        assert_eq!(config.provider.as_deref(), Some("chatgpt"));
        assert_eq!(config.tokenizer, Some(TokenizerId::Cl100k));
        assert_eq!(config.oversize_policy, OversizePolicy::Reject);
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.request_timeout_secs, 10);
    }

    #[test]
    fn unknown_options_are_rejected() {
        let err = FlowConfig::from_toml_str("tokenoffset = 32").expect_err("typo");
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn retry_config_uses_configured_delays() {
        let config = FlowConfig {
            max_retries: 4,
            initial_retry_delay_ms: 10,
            max_retry_delay_ms: 50,
            ..FlowConfig::default()
        };
        let retry = config.retry_config();
        assert_eq!(retry.max_retries, 4);
        assert_eq!(retry.initial_delay.as_millis(), 10);
        assert_eq!(retry.max_delay.as_millis(), 50);
    }
}
