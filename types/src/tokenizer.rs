//! Tokenizer family enumeration.
//!
//! The set of tokenizer families is sealed so provider/tokenizer selection
//! stays exhaustively checkable. The counting implementations live in
//! `palaver-context`; this crate only names them.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A tokenizer family the context window manager can count with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenizerId {
    /// tiktoken `cl100k_base` byte-pair encoding (GPT-3.5/GPT-4 era).
    Cl100k,
    /// tiktoken `o200k_base` byte-pair encoding (GPT-4o and later).
    O200k,
    /// Deterministic byte-length approximation for models with no published
    /// vocabulary.
    Heuristic,
}

const TOKENIZER_PARSE_VALUES: &[&str] = &["cl100k", "o200k", "heuristic"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid tokenizer id '{raw}'; expected one of: {TOKENIZER_PARSE_VALUES:?}")]
pub struct TokenizerIdParseError {
    raw: String,
}

impl TokenizerId {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            TokenizerId::Cl100k => "cl100k",
            TokenizerId::O200k => "o200k",
            TokenizerId::Heuristic => "heuristic",
        }
    }

    pub fn parse(s: &str) -> Result<Self, TokenizerIdParseError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cl100k" | "cl100k_base" => Ok(TokenizerId::Cl100k),
            "o200k" | "o200k_base" => Ok(TokenizerId::O200k),
            "heuristic" => Ok(TokenizerId::Heuristic),
            other => Err(TokenizerIdParseError {
                raw: other.to_string(),
            }),
        }
    }

    #[must_use]
    pub const fn all() -> &'static [TokenizerId] {
        &[TokenizerId::Cl100k, TokenizerId::O200k, TokenizerId::Heuristic]
    }
}

impl fmt::Display for TokenizerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
