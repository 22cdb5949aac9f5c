//! In-flight operation state for the chat session.

use futures_util::future::AbortHandle;
use tokio::sync::mpsc;

use quill_types::{MessageId, StreamEvent};

/// A live stream: the placeholder message it feeds, the channel carrying its
/// events, and the handle that cancels the network task.
pub struct ActiveStream {
    pub message_id: MessageId,
    pub rx: mpsc::Receiver<StreamEvent>,
    pub abort_handle: AbortHandle,
}

impl std::fmt::Debug for ActiveStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveStream")
            .field("message_id", &self.message_id)
            .finish_non_exhaustive()
    }
}

/// What the session is doing right now. At most one stream is ever active;
/// the state machine makes a second concurrent stream unrepresentable.
#[derive(Debug, Default)]
pub enum OperationState {
    #[default]
    Idle,
    Streaming(ActiveStream),
}

impl OperationState {
    #[must_use]
    pub fn is_streaming(&self) -> bool {
        matches!(self, OperationState::Streaming(_))
    }

    /// Abort the in-flight task (if any) and return to idle.
    pub fn abort(&mut self) {
        if let OperationState::Streaming(active) = std::mem::take(self) {
            active.abort_handle.abort();
        }
    }
}
