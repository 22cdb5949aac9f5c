//! Chat message domain model.
//!
//! Constructors take `SystemTime` explicitly; callers own the clock.

use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::MessageId;

/// Who produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Ai,
}

/// A single chat message.
///
/// `content` is ground truth: it only ever grows while `is_streaming` is
/// true, and is never truncated afterwards. The reveal animation derives its
/// display string from it without mutating it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    id: MessageId,
    sender: Sender,
    content: String,
    is_streaming: bool,
    timestamp: SystemTime,
}

impl Message {
    /// A completed user message.
    #[must_use]
    pub fn user(id: MessageId, content: impl Into<String>, timestamp: SystemTime) -> Self {
        Self {
            id,
            sender: Sender::User,
            content: content.into(),
            is_streaming: false,
            timestamp,
        }
    }

    /// A completed AI message (cached history, greeting, fallback).
    #[must_use]
    pub fn ai(id: MessageId, content: impl Into<String>, timestamp: SystemTime) -> Self {
        Self {
            id,
            sender: Sender::Ai,
            content: content.into(),
            is_streaming: false,
            timestamp,
        }
    }

    /// An empty AI message that is about to receive streamed content.
    #[must_use]
    pub fn ai_streaming(id: MessageId, timestamp: SystemTime) -> Self {
        Self {
            id,
            sender: Sender::Ai,
            content: String::new(),
            is_streaming: true,
            timestamp,
        }
    }

    #[must_use]
    pub fn id(&self) -> MessageId {
        self.id
    }

    #[must_use]
    pub fn sender(&self) -> Sender {
        self.sender
    }

    #[must_use]
    pub fn content(&self) -> &str {
        &self.content
    }

    #[must_use]
    pub fn is_streaming(&self) -> bool {
        self.is_streaming
    }

    #[must_use]
    pub fn timestamp(&self) -> SystemTime {
        self.timestamp
    }

    /// Append a streamed fragment. Content growth is append-only.
    pub fn push_content(&mut self, fragment: &str) {
        self.content.push_str(fragment);
    }

    /// Close out streaming. Idempotent; partial content is preserved.
    pub fn finish_streaming(&mut self) {
        self.is_streaming = false;
    }
}
