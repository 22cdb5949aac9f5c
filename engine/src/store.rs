//! Ordered message store for a chat session.
//!
//! Holds the session transcript in insertion order and enforces the
//! structural invariant that at most one message is streaming at a time.
//! Content mutation during a stream goes through [`MessageStore::append_to`];
//! everything else reads through accessors.

use std::time::SystemTime;

use quill_types::{Message, MessageId, Sender};

/// Append-ordered transcript with monotonically increasing ids.
#[derive(Debug, Default)]
pub struct MessageStore {
    messages: Vec<Message>,
    next_id: u64,
}

impl MessageStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    #[must_use]
    pub fn get(&self, id: MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| m.id() == id)
    }

    /// Id of the currently streaming message, if any.
    #[must_use]
    pub fn streaming_id(&self) -> Option<MessageId> {
        self.messages
            .iter()
            .find(|m| m.is_streaming())
            .map(Message::id)
    }

    fn allocate_id(&mut self) -> MessageId {
        let id = MessageId::new(self.next_id);
        self.next_id += 1;
        id
    }

    /// Append a completed user message.
    ///
    /// Any message still marked streaming is finalized first, so a new send
    /// can never coexist with a stale streaming marker.
    pub fn push_user(&mut self, content: impl Into<String>, now: SystemTime) -> MessageId {
        self.finish_any_streaming();
        let id = self.allocate_id();
        self.messages.push(Message::user(id, content, now));
        id
    }

    /// Append a completed AI message (greeting, fallback, history replay).
    pub fn push_ai(&mut self, content: impl Into<String>, now: SystemTime) -> MessageId {
        self.finish_any_streaming();
        let id = self.allocate_id();
        self.messages.push(Message::ai(id, content, now));
        id
    }

    /// Append an empty AI placeholder and mark it streaming.
    pub fn begin_ai_stream(&mut self, now: SystemTime) -> MessageId {
        self.finish_any_streaming();
        let id = self.allocate_id();
        self.messages.push(Message::ai_streaming(id, now));
        id
    }

    /// Append streamed content to a message. Returns false when the id is
    /// unknown (already rolled back).
    pub fn append_to(&mut self, id: MessageId, fragment: &str) -> bool {
        match self.messages.iter_mut().find(|m| m.id() == id) {
            Some(message) => {
                message.push_content(fragment);
                true
            }
            None => false,
        }
    }

    /// Clear the streaming flag on a message, preserving whatever content
    /// has arrived. Idempotent.
    pub fn finish_stream(&mut self, id: MessageId) {
        if let Some(message) = self.messages.iter_mut().find(|m| m.id() == id) {
            message.finish_streaming();
        }
    }

    fn finish_any_streaming(&mut self) {
        for message in &mut self.messages {
            message.finish_streaming();
        }
    }

    /// Remove a message outright. Used to roll back an empty placeholder
    /// when the request is rejected before any content arrives.
    pub fn remove(&mut self, id: MessageId) -> Option<Message> {
        let index = self.messages.iter().position(|m| m.id() == id)?;
        Some(self.messages.remove(index))
    }

    /// Drop the whole transcript. Ids keep counting up, so stale ids from
    /// before the clear can never alias a new message.
    pub fn clear(&mut self) {
        self.messages.clear();
    }

    /// Most recent message from the given sender.
    #[must_use]
    pub fn last_from(&self, sender: Sender) -> Option<&Message> {
        self.messages.iter().rev().find(|m| m.sender() == sender)
    }
}
