//! Token budget invariant type.
//!
//! A [`Budget`] pairs a provider's context limit with the headroom reserved
//! for the anticipated completion. Invalid combinations are unrepresentable:
//! construction fails when the reserved offset leaves no room for history, so
//! misconfiguration surfaces when a conversation is built, never mid-dispatch.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BudgetError {
    #[error("token offset ({token_offset}) must be smaller than context limit ({context_limit})")]
    OffsetExceedsLimit {
        token_offset: u32,
        context_limit: u32,
    },
}

/// Validated token budget for a single provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Budget {
    context_limit: u32,
    token_offset: u32,
}

impl Budget {
    /// Tokens reserved for the completion when the caller does not configure
    /// an offset.
    pub const DEFAULT_TOKEN_OFFSET: u32 = 16;

    /// Returns an error if `token_offset >= context_limit` - such a budget
    /// could never fit even an empty history plus a reply.
    pub fn new(context_limit: u32, token_offset: u32) -> Result<Self, BudgetError> {
        if token_offset >= context_limit {
            return Err(BudgetError::OffsetExceedsLimit {
                token_offset,
                context_limit,
            });
        }
        Ok(Self {
            context_limit,
            token_offset,
        })
    }

    pub fn with_default_offset(context_limit: u32) -> Result<Self, BudgetError> {
        Self::new(context_limit, Self::DEFAULT_TOKEN_OFFSET)
    }

    #[must_use]
    pub const fn context_limit(self) -> u32 {
        self.context_limit
    }

    #[must_use]
    pub const fn token_offset(self) -> u32 {
        self.token_offset
    }

    /// Tokens available to conversation history before the pinned prefix is
    /// accounted for: `context_limit - token_offset`.
    ///
    /// Always positive; construction rejects the degenerate case.
    #[must_use]
    pub const fn history_budget(self) -> u32 {
        self.context_limit - self.token_offset
    }
}

#[cfg(test)]
mod tests {
    use super::{Budget, BudgetError};

    #[test]
    fn new_accepts_offset_below_limit() {
        let budget = Budget::new(100, 16).expect("valid budget");
        assert_eq!(budget.context_limit(), 100);
        assert_eq!(budget.token_offset(), 16);
        assert_eq!(budget.history_budget(), 84);
    }

    #[test]
    fn new_rejects_offset_equal_to_limit() {
        let err = Budget::new(16, 16).expect_err("offset == limit");
        assert!(matches!(
            err,
            BudgetError::OffsetExceedsLimit {
                token_offset: 16,
                context_limit: 16,
            }
        ));
    }

    #[test]
    fn new_rejects_offset_above_limit() {
        assert!(Budget::new(100, 200).is_err());
    }

    #[test]
    fn default_offset_is_sixteen() {
        let budget = Budget::with_default_offset(4096).expect("valid budget");
        assert_eq!(budget.token_offset(), 16);
        assert_eq!(budget.history_budget(), 4080);
    }

    #[test]
    fn default_offset_still_validates() {
        assert!(Budget::with_default_offset(16).is_err());
        assert!(Budget::with_default_offset(8).is_err());
    }
}
