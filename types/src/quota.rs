//! Per-feature usage quota types.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A quota-gated feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    AiChat,
    CodeReview,
}

impl Feature {
    /// All quota-gated features, in refresh order.
    pub const ALL: [Feature; 2] = [Feature::AiChat, Feature::CodeReview];

    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            Feature::AiChat => "ai_chat",
            Feature::CodeReview => "code_review",
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Daily usage counters for one feature.
///
/// All fields are unsigned, so `remaining >= 0` holds by construction.
/// `used + remaining == limit` is an eventual-consistency target, not an
/// invariant: `remaining` is optimistically adjusted ahead of server
/// confirmation and reconciled on the next refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaUsage {
    pub used: u32,
    pub remaining: u32,
    pub limit: u32,
}

impl QuotaUsage {
    #[must_use]
    pub const fn new(used: u32, remaining: u32, limit: u32) -> Self {
        Self {
            used,
            remaining,
            limit,
        }
    }

    /// Whether the feature may still be used today.
    #[must_use]
    pub const fn can_use(&self) -> bool {
        self.remaining > 0
    }

    /// Optimistic local decrement, applied before the server confirms.
    pub fn record_use(&mut self) {
        self.used = self.used.saturating_add(1);
        self.remaining = self.remaining.saturating_sub(1);
    }
}
