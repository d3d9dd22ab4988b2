//! Per-model context limits and registry.
//!
//! Providers report their context limit through this registry: prefix matching
//! against known model families, explicit overrides for custom deployments,
//! and a conservative default for everything else.

use std::collections::HashMap;

/// Default fallback limit for unknown models. Matches the smallest hosted
/// model family rather than the largest, so unknown models trim aggressively
/// instead of overflowing.
pub const DEFAULT_CONTEXT_LIMIT: u32 = 4096;

/// Known model prefixes and their context limits.
///
/// Ordered by specificity (more specific prefixes first) so that, for
/// example, `gpt-4-32k` and `gpt-4o` match before the bare `gpt-4` prefix.
const KNOWN_MODELS: &[(&str, u32)] = &[
    // Hosted OpenAI-compatible families
    ("gpt-4-32k", 32_768),
    ("gpt-4o", 128_000),
    ("gpt-4", 8_192),
    ("gpt-3.5-turbo-16k", 16_384),
    ("gpt-3.5-turbo", 4_096),
    // Common locally-served families
    ("llama3", 8_192),
    ("mistral", 32_768),
    ("qwen", 32_768),
];

/// Where a resolved context limit came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextLimitSource {
    /// Exact match from an override.
    Override,
    /// Matched a known prefix (the matched prefix).
    Prefix(&'static str),
    /// Fell back to [`DEFAULT_CONTEXT_LIMIT`] because no match was found.
    DefaultFallback,
}

/// Result of looking up a model's context limit.
///
/// This makes the "fallback OR real data" decision explicit at the call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedContextLimit {
    limit: u32,
    source: ContextLimitSource,
}

impl ResolvedContextLimit {
    #[must_use]
    pub const fn new(limit: u32, source: ContextLimitSource) -> Self {
        Self { limit, source }
    }

    #[must_use]
    pub const fn limit(self) -> u32 {
        self.limit
    }

    #[must_use]
    pub const fn source(self) -> ContextLimitSource {
        self.source
    }
}

/// Registry of known context limits with support for custom overrides.
///
/// Lookup order: exact override, then prefix match, then default fallback.
#[derive(Debug, Clone, Default)]
pub struct ContextLimitRegistry {
    overrides: HashMap<String, u32>,
}

impl ContextLimitRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, model: &str) -> ResolvedContextLimit {
        if let Some(limit) = self.overrides.get(model) {
            return ResolvedContextLimit::new(*limit, ContextLimitSource::Override);
        }

        for (prefix, limit) in KNOWN_MODELS {
            if model.starts_with(prefix) {
                return ResolvedContextLimit::new(*limit, ContextLimitSource::Prefix(prefix));
            }
        }

        tracing::debug!(model, "no known context limit, using default fallback");
        ResolvedContextLimit::new(DEFAULT_CONTEXT_LIMIT, ContextLimitSource::DefaultFallback)
    }

    /// Sets a custom limit for an exact model name, taking precedence over
    /// prefix matching.
    pub fn set_override(&mut self, model: impl Into<String>, limit: u32) {
        self.overrides.insert(model.into(), limit);
    }

    /// Removes an override, restoring prefix/default behavior. Returns the
    /// removed limit if one existed.
    pub fn remove_override(&mut self, model: &str) -> Option<u32> {
        self.overrides.remove(model)
    }
}

#[cfg(test)]
mod tests {
    use super::{
        ContextLimitRegistry, ContextLimitSource, DEFAULT_CONTEXT_LIMIT,
    };

    #[test]
    fn resolves_hosted_families_by_prefix() {
        let registry = ContextLimitRegistry::new();
        assert_eq!(registry.get("gpt-3.5-turbo-0613").limit(), 4_096);
        assert_eq!(registry.get("gpt-3.5-turbo-16k-0613").limit(), 16_384);
        assert_eq!(registry.get("gpt-4-0613").limit(), 8_192);
        assert_eq!(registry.get("gpt-4-32k-0613").limit(), 32_768);
    }

    #[test]
    fn specific_prefixes_win_over_general_ones() {
        let registry = ContextLimitRegistry::new();
        let resolved = registry.get("gpt-4o-mini");
        assert_eq!(resolved.source(), ContextLimitSource::Prefix("gpt-4o"));
        assert_eq!(resolved.limit(), 128_000);
    }

    #[test]
    fn resolves_local_families() {
        let registry = ContextLimitRegistry::new();
        assert_eq!(registry.get("llama3.1:8b").limit(), 8_192);
        assert_eq!(registry.get("qwen2.5:14b").limit(), 32_768);
    }

    #[test]
    fn unknown_model_falls_back_to_default() {
        let registry = ContextLimitRegistry::new();
        let resolved = registry.get("totally-novel-model");
        assert_eq!(resolved.source(), ContextLimitSource::DefaultFallback);
        assert_eq!(resolved.limit(), DEFAULT_CONTEXT_LIMIT);
    }

    #[test]
    fn override_takes_precedence_and_is_removable() {
        let mut registry = ContextLimitRegistry::new();
        registry.set_override("gpt-4-0613", 2_048);

        let resolved = registry.get("gpt-4-0613");
        assert_eq!(resolved.source(), ContextLimitSource::Override);
        assert_eq!(resolved.limit(), 2_048);

        // Other models in the family are untouched.
        assert_eq!(registry.get("gpt-4-0314").limit(), 8_192);

        assert_eq!(registry.remove_override("gpt-4-0613"), Some(2_048));
        assert_eq!(
            registry.get("gpt-4-0613").source(),
            ContextLimitSource::Prefix("gpt-4")
        );
    }
}
