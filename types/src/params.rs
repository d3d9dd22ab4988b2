//! Generation parameters passed through to providers.
//!
//! The core treats these as opaque: each provider adapter translates the
//! fields it understands into its wire format and ignores the rest.

use serde::{Deserialize, Serialize};

/// Sampling and length controls for a completion request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct GenerationParams {
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    /// Maximum tokens the provider may generate for this reply. Independent
    /// of the budget's `token_offset`, which only reserves trimming headroom.
    pub max_tokens: Option<u32>,
    pub stop: Vec<String>,
}

impl GenerationParams {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature.clamp(0.0, 2.0));
        self
    }

    #[must_use]
    pub fn with_top_p(mut self, top_p: f32) -> Self {
        self.top_p = Some(top_p.clamp(0.0, 1.0));
        self
    }

    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    #[must_use]
    pub fn with_stop(mut self, stop: impl Into<String>) -> Self {
        self.stop.push(stop.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::GenerationParams;

    #[test]
    fn default_sets_nothing() {
        let params = GenerationParams::new();
        assert_eq!(params.temperature, None);
        assert_eq!(params.top_p, None);
        assert_eq!(params.max_tokens, None);
        assert!(params.stop.is_empty());
    }

    #[test]
    fn temperature_is_clamped() {
        let params = GenerationParams::new().with_temperature(9.0);
        assert_eq!(params.temperature, Some(2.0));
    }

    #[test]
    fn builders_accumulate() {
        let params = GenerationParams::new()
            .with_temperature(0.7)
            .with_max_tokens(256)
            .with_stop("\n\n");
        assert_eq!(params.temperature, Some(0.7));
        assert_eq!(params.max_tokens, Some(256));
        assert_eq!(params.stop, vec!["\n\n".to_string()]);
    }

    #[test]
    fn serde_defaults_missing_fields() {
        let params: GenerationParams = serde_json::from_str("{}").expect("deserialize");
        assert_eq!(params, GenerationParams::default());
    }
}
