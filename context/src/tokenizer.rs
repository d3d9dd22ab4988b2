//! Token counting across the sealed tokenizer set.
//!
//! Two tiktoken byte-pair encodings cover the hosted models; the heuristic
//! variant covers locally-served models with no published vocabulary. BPE
//! encoders are expensive to initialize (they load vocabulary data), so each
//! is created once per process and shared across all `Tokenizer` instances.
//!
//! Counts are deterministic for a given text and tokenizer, which the context
//! window manager relies on for memoization.

use std::sync::OnceLock;

use thiserror::Error;
use tiktoken_rs::{CoreBPE, cl100k_base, o200k_base};

use palaver_types::{Message, TokenizerId};

/// Fixed token overhead added per message to approximate role markers and
/// message delimiters in the provider's chat format. The reply-priming
/// overhead on the request as a whole is covered by the budget's token
/// offset, not counted here.
const PER_MESSAGE_OVERHEAD: u32 = 3;

/// Bytes per token assumed by the heuristic counter. Deliberately on the
/// dense side so the estimate overcounts rather than undercounts.
const HEURISTIC_BYTES_PER_TOKEN: usize = 4;

static CL100K: OnceLock<Option<CoreBPE>> = OnceLock::new();
static O200K: OnceLock<Option<CoreBPE>> = OnceLock::new();

fn shared_encoder(id: TokenizerId) -> Option<&'static CoreBPE> {
    match id {
        TokenizerId::Cl100k => CL100K.get_or_init(|| cl100k_base().ok()).as_ref(),
        TokenizerId::O200k => O200K.get_or_init(|| o200k_base().ok()).as_ref(),
        TokenizerId::Heuristic => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenizationError {
    #[error("tokenizer {tokenizer} could not load its vocabulary")]
    VocabularyUnavailable { tokenizer: TokenizerId },
    #[error("tokenizer {tokenizer} cannot encode text into token ids")]
    EncodingUnsupported { tokenizer: TokenizerId },
}

/// A concrete tokenizer selected by [`TokenizerId`].
///
/// Construction fails fast when a BPE vocabulary cannot be loaded, so a
/// `Tokenizer` in hand always counts successfully.
#[derive(Clone, Copy)]
pub struct Tokenizer {
    id: TokenizerId,
    encoder: Option<&'static CoreBPE>,
}

impl std::fmt::Debug for Tokenizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tokenizer")
            .field("id", &self.id)
            .field("encoder", &self.encoder.map(|_| "<CoreBPE>"))
            .finish()
    }
}

impl Tokenizer {
    pub fn new(id: TokenizerId) -> Result<Self, TokenizationError> {
        let encoder = shared_encoder(id);
        if encoder.is_none() && id != TokenizerId::Heuristic {
            tracing::error!(tokenizer = %id, "failed to initialize BPE encoder");
            return Err(TokenizationError::VocabularyUnavailable { tokenizer: id });
        }
        Ok(Self { id, encoder })
    }

    #[must_use]
    pub fn id(&self) -> TokenizerId {
        self.id
    }

    /// Counts the tokens in a plain string, without message overhead.
    #[must_use]
    pub fn count_text(&self, text: &str) -> u32 {
        let len = match self.encoder {
            Some(encoder) => encoder.encode_ordinary(text).len(),
            None => text.len().div_ceil(HEURISTIC_BYTES_PER_TOKEN),
        };
        u32::try_from(len).unwrap_or(u32::MAX)
    }

    /// Counts tokens for a single message: role + content + per-message
    /// overhead.
    #[must_use]
    pub fn count_message(&self, message: &Message) -> u32 {
        self.count_text(message.role_str())
            .saturating_add(self.count_text(message.content()))
            .saturating_add(PER_MESSAGE_OVERHEAD)
    }

    /// Encodes text into token ids.
    ///
    /// Only the BPE variants carry a vocabulary; the heuristic counter fails
    /// with [`TokenizationError::EncodingUnsupported`].
    pub fn encode(&self, text: &str) -> Result<Vec<u32>, TokenizationError> {
        let Some(encoder) = self.encoder else {
            return Err(TokenizationError::EncodingUnsupported { tokenizer: self.id });
        };
        Ok(encoder
            .encode_ordinary(text)
            .into_iter()
            .map(|rank| u32::try_from(rank).unwrap_or(u32::MAX))
            .collect())
    }
}
