//! Core domain types for Quill.
//!
//! This crate contains pure domain types with no IO, no async, and minimal
//! dependencies. Everything here can be used from any layer of the
//! application.

mod ids;
mod message;
mod quota;

pub use ids::{MessageId, SessionId};
pub use message::{Message, Sender};
pub use quota::{Feature, QuotaUsage};

use thiserror::Error;

// ============================================================================
// Streaming Events
// ============================================================================

/// Event emitted by the streaming transport.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// Decoded text fragment, one per network chunk, in arrival order.
    TextDelta(String),
    /// Stream completed; concatenation of all deltas is the full response.
    Done,
    /// Stream terminated with an error. Deltas already emitted stand.
    Error(StreamError),
}

/// Reason a stream finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamFinishReason {
    Done,
    Error(StreamError),
}

// ============================================================================
// Error Taxonomy
// ============================================================================

/// Failures surfaced by the chat subsystem.
///
/// None of these are fatal: every variant degrades to a visible chat message
/// and a retryable state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    /// Transport-level failure during an active stream. Partial content is
    /// preserved by the caller.
    #[error("stream transport failed: {0}")]
    StreamFailure(String),

    /// Non-2xx response before streaming began. No partial message exists.
    #[error("request rejected with status {status}: {body}")]
    RequestRejected { status: u16, body: String },

    /// Client-side pre-flight refusal; no network call was made.
    #[error("daily quota exhausted for {0}")]
    QuotaExhausted(Feature),

    /// No bytes arrived within the idle-timeout window.
    #[error("stream stalled: no data for {idle_secs}s")]
    StreamStalled { idle_secs: u64 },
}

impl StreamError {
    /// True when the failure happened before any response body could exist.
    #[must_use]
    pub fn is_rejection(&self) -> bool {
        matches!(self, StreamError::RequestRejected { .. })
    }
}
