//! Chat session orchestration.
//!
//! [`ChatSession`] ties the pieces together: it owns the transcript, the
//! reveal animation, the quota tracker, and the in-flight stream state. The
//! host drives it from the outside:
//!
//! - call [`ChatSession::process_stream_events`] whenever it polls (every
//!   frame, or on a channel wakeup)
//! - call [`ChatSession::tick_animation`] on the reveal cadence
//! - call [`ChatSession::refresh_quota_if_due`] periodically
//!
//! While a response is streaming, its raw content is displayed directly and
//! the typewriter is kept caught up with it, so the moment the stream
//! finishes nothing re-animates. The character-by-character reveal applies to
//! content that arrives whole: the greeting and history replay.

use std::time::{Instant, SystemTime};

use futures_util::future::{AbortHandle, Abortable};
use tokio::sync::mpsc;

use quill_client::{ApiConfig, HistoryRecord, StreamRequest};
use quill_types::{
    Feature, Message, MessageId, QuotaUsage, Sender, SessionId, StreamError, StreamEvent,
    StreamFinishReason,
};

use crate::config::EngineConfig;
use crate::quota::QuotaTracker;
use crate::state::{ActiveStream, OperationState};
use crate::store::MessageStore;
use crate::typewriter::Typewriter;

const STREAM_EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Cap on events drained per `process_stream_events` call, so a fast
/// producer cannot starve the caller's loop.
const DEFAULT_STREAM_EVENT_BUDGET: usize = 256;

/// Shown when the stream failed after starting and delivered nothing.
const FALLBACK_ERROR_MESSAGE: &str =
    "Sorry, something went wrong while answering. Please try again.";

/// Shown when the stream completed cleanly but carried no content.
const EMPTY_RESPONSE_MESSAGE: &str =
    "I didn't have anything to add there. Could you rephrase?";

/// Result of a send attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Request dispatched; `message_id` is the AI placeholder being filled.
    Accepted { message_id: MessageId },
    /// Input was blank after trimming; nothing happened.
    EmptyInput,
    /// A response is already streaming; nothing happened.
    Busy,
    /// Local quota check refused the send; no network call was made.
    QuotaExhausted,
}

/// One chat conversation against the backend.
pub struct ChatSession {
    config: EngineConfig,
    api: ApiConfig,
    session_id: SessionId,
    store: MessageStore,
    typewriter: Typewriter,
    animated_id: Option<MessageId>,
    quota: QuotaTracker,
    state: OperationState,
    last_error: Option<StreamError>,
    review_id: Option<String>,
    context: serde_json::Value,
}

impl ChatSession {
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        let api = ApiConfig::new(config.api_base_url.clone());
        let quota = QuotaTracker::with_refresh_interval(config.quota_refresh_interval());
        Self {
            config,
            api,
            session_id: SessionId::generate(),
            store: MessageStore::new(),
            typewriter: Typewriter::new(),
            animated_id: None,
            quota,
            state: OperationState::Idle,
            last_error: None,
            review_id: None,
            context: serde_json::Value::Null,
        }
    }

    /// Attach review metadata forwarded verbatim with every send.
    #[must_use]
    pub fn with_review_context(
        mut self,
        review_id: Option<String>,
        context: serde_json::Value,
    ) -> Self {
        self.review_id = review_id;
        self.context = context;
        self
    }

    #[must_use]
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    #[must_use]
    pub fn messages(&self) -> &[Message] {
        self.store.messages()
    }

    #[must_use]
    pub fn is_streaming(&self) -> bool {
        self.state.is_streaming()
    }

    #[must_use]
    pub fn last_error(&self) -> Option<&StreamError> {
        self.last_error.as_ref()
    }

    #[must_use]
    pub fn quota_usage(&self, feature: Feature) -> Option<QuotaUsage> {
        self.quota.usage(feature)
    }

    // ========================================================================
    // Display
    // ========================================================================

    /// Text to render for a message right now.
    ///
    /// A streaming message shows its raw content as it arrives. The message
    /// under reveal animation shows the revealed prefix. Everything else
    /// shows full content.
    #[must_use]
    pub fn display_text<'a>(&'a self, message: &'a Message) -> &'a str {
        if !message.is_streaming() && self.animated_id == Some(message.id()) {
            self.typewriter.visible_text()
        } else {
            message.content()
        }
    }

    /// Advance the reveal animation one character. Call on the cadence from
    /// [`EngineConfig::reveal_interval`]. Returns true when the display
    /// changed.
    pub fn tick_animation(&mut self) -> bool {
        self.typewriter.tick()
    }

    /// User skipped the reveal; show the full text immediately.
    pub fn skip_reveal(&mut self) {
        self.typewriter.skip_to_end();
    }

    #[must_use]
    pub fn is_animating(&self) -> bool {
        self.typewriter.is_animating()
    }

    // ========================================================================
    // Session Content
    // ========================================================================

    /// Seed the conversation with a greeting that reveals character by
    /// character.
    pub fn add_initial_message(&mut self, content: &str, now: SystemTime) -> MessageId {
        let id = self.store.push_ai(content, now);
        self.animate(id, content);
        id
    }

    /// Replace the transcript with server-side history.
    ///
    /// Records arrive oldest first. The most recent AI message replays with
    /// the reveal animation; everything above it renders instantly.
    pub fn load_history(&mut self, records: &[HistoryRecord]) {
        self.store.clear();
        for record in records {
            match record.sender {
                Sender::User => {
                    self.store.push_user(record.content.clone(), record.timestamp());
                }
                Sender::Ai => {
                    self.store.push_ai(record.content.clone(), record.timestamp());
                }
            }
        }
        self.animated_id = None;
        self.typewriter.reset();
        if let Some(last_ai) = self.store.last_from(Sender::Ai) {
            let (id, content) = (last_ai.id(), last_ai.content().to_string());
            self.animate(id, &content);
        }
    }

    fn animate(&mut self, id: MessageId, content: &str) {
        self.animated_id = Some(id);
        self.typewriter.reset();
        self.typewriter.set_target(content);
    }

    // ========================================================================
    // Send / Cancel / Reset
    // ========================================================================

    /// Validate and dispatch a user message.
    ///
    /// Must be called from within a tokio runtime; the network task is
    /// spawned onto it.
    pub fn send_message(&mut self, text: &str, now: SystemTime) -> SendOutcome {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return SendOutcome::EmptyInput;
        }
        if self.state.is_streaming() {
            return SendOutcome::Busy;
        }
        if !self.quota.can_use(Feature::AiChat) {
            self.last_error = Some(StreamError::QuotaExhausted(Feature::AiChat));
            return SendOutcome::QuotaExhausted;
        }

        self.last_error = None;
        self.store.push_user(trimmed, now);
        let message_id = self.store.begin_ai_stream(now);
        self.quota.record_use(Feature::AiChat);

        // Streamed content bypasses the reveal; keep the typewriter synced
        // from an empty target so completion causes no restart.
        self.animate(message_id, "");

        let request = StreamRequest {
            review_id: self.review_id.clone(),
            message: trimmed.to_string(),
            session_id: self.session_id,
            context: self.context.clone(),
        };

        let (tx, rx) = mpsc::channel(STREAM_EVENT_CHANNEL_CAPACITY);
        let (abort_handle, abort_registration) = AbortHandle::new_pair();

        let api = self.api.clone();
        let task = async move {
            if let Err(e) = quill_client::stream_message(&api, &request, tx.clone()).await {
                tracing::warn!("Chat streaming request failed: {e}");
                let _ = tx
                    .send(StreamEvent::Error(StreamError::StreamFailure(e.to_string())))
                    .await;
            }
        };
        tokio::spawn(async move {
            let _ = Abortable::new(task, abort_registration).await;
        });

        self.state = OperationState::Streaming(ActiveStream {
            message_id,
            rx,
            abort_handle,
        });

        SendOutcome::Accepted { message_id }
    }

    /// Abort the in-flight stream, keeping any partial content.
    ///
    /// An empty placeholder is removed outright, leaving the transcript as
    /// if the response never started.
    pub fn cancel_stream(&mut self) {
        let OperationState::Streaming(active) = std::mem::take(&mut self.state) else {
            return;
        };
        active.abort_handle.abort();
        self.settle_placeholder(active.message_id, None);
    }

    /// Abort anything in flight, wipe the transcript, and start a fresh
    /// session id. Id reuse across the reset is impossible, so a late event
    /// from the old stream can never touch a new message.
    pub fn reset_chat(&mut self) {
        self.state.abort();
        self.store.clear();
        self.typewriter.reset();
        self.animated_id = None;
        self.last_error = None;
        self.session_id = SessionId::generate();
    }

    // ========================================================================
    // Stream Event Processing
    // ========================================================================

    /// Drain pending stream events, up to a fixed budget per call.
    ///
    /// Consecutive `TextDelta` events are coalesced into one store append to
    /// keep up with fast producers.
    pub fn process_stream_events(&mut self) {
        let mut processed = 0usize;
        let mut pending_event: Option<StreamEvent> = None;

        loop {
            // A pending event was already taken off the channel during
            // coalescing and must be handled even when the budget is spent.
            let event = if let Some(event) = pending_event.take() {
                event
            } else {
                if processed >= DEFAULT_STREAM_EVENT_BUDGET {
                    return;
                }
                let OperationState::Streaming(active) = &mut self.state else {
                    return;
                };
                match active.rx.try_recv() {
                    Ok(event) => event,
                    Err(mpsc::error::TryRecvError::Empty) => return,
                    Err(mpsc::error::TryRecvError::Disconnected) => {
                        tracing::warn!("Stream channel disconnected without terminal event");
                        StreamEvent::Error(StreamError::StreamFailure(
                            "stream channel disconnected".to_string(),
                        ))
                    }
                }
            };

            match event {
                StreamEvent::TextDelta(mut text) => {
                    processed = processed.saturating_add(1);
                    // Coalesce consecutive deltas within the remaining budget.
                    while processed < DEFAULT_STREAM_EVENT_BUDGET {
                        let OperationState::Streaming(active) = &mut self.state else {
                            break;
                        };
                        match active.rx.try_recv() {
                            Ok(StreamEvent::TextDelta(more)) => {
                                text.push_str(&more);
                                processed = processed.saturating_add(1);
                            }
                            Ok(other) => {
                                pending_event = Some(other);
                                break;
                            }
                            Err(_) => break,
                        }
                    }
                    self.apply_text_delta(&text);
                }
                StreamEvent::Done => {
                    processed = processed.saturating_add(1);
                    self.finish_streaming(StreamFinishReason::Done);
                    return;
                }
                StreamEvent::Error(err) => {
                    processed = processed.saturating_add(1);
                    self.finish_streaming(StreamFinishReason::Error(err));
                    return;
                }
            }
        }
    }

    fn apply_text_delta(&mut self, text: &str) {
        let OperationState::Streaming(active) = &self.state else {
            return;
        };
        let id = active.message_id;
        if !self.store.append_to(id, text) {
            return;
        }
        // Keep the typewriter caught up with the raw content so nothing
        // re-animates when the stream completes.
        if let Some(message) = self.store.get(id) {
            let content = message.content().to_string();
            self.typewriter.set_target(&content);
            self.typewriter.skip_to_end();
        }
    }

    fn finish_streaming(&mut self, reason: StreamFinishReason) {
        let OperationState::Streaming(active) = std::mem::take(&mut self.state) else {
            return;
        };
        active.abort_handle.abort();

        match reason {
            StreamFinishReason::Done => {
                self.settle_placeholder(active.message_id, Some(EMPTY_RESPONSE_MESSAGE));
            }
            StreamFinishReason::Error(err) => {
                tracing::warn!("Stream finished with error: {err}");
                // A rejection happened before any response existed: the
                // placeholder rolls back and the error is surfaced out of
                // band via `last_error`, with no synthesized chat message.
                let fallback = if err.is_rejection() {
                    None
                } else {
                    Some(FALLBACK_ERROR_MESSAGE)
                };
                self.settle_placeholder(active.message_id, fallback);
                self.last_error = Some(err);
            }
        }
    }

    /// Close out a streaming placeholder. Partial content is finalized in
    /// place; an empty placeholder is removed, then replaced with `fallback`
    /// when one is given.
    fn settle_placeholder(&mut self, id: MessageId, fallback: Option<&str>) {
        let is_empty = self
            .store
            .get(id)
            .is_none_or(|m| m.content().is_empty());

        if is_empty {
            if let Some(removed) = self.store.remove(id) {
                let timestamp = removed.timestamp();
                if let Some(text) = fallback {
                    let new_id = self.store.push_ai(text, timestamp);
                    self.animate(new_id, text);
                    return;
                }
            }
            if self.animated_id == Some(id) {
                self.animated_id = None;
                self.typewriter.reset();
            }
        } else {
            self.store.finish_stream(id);
            if let Some(message) = self.store.get(id) {
                let content = message.content().to_string();
                self.typewriter.set_target(&content);
                self.typewriter.skip_to_end();
            }
        }
    }

    // ========================================================================
    // Quota
    // ========================================================================

    /// Re-fetch authoritative quota counters when the cadence has elapsed.
    ///
    /// Fetch failures are logged and swallowed; stale counters stay in
    /// effect until the next successful refresh.
    pub async fn refresh_quota_if_due(&mut self) {
        if !self.quota.refresh_due(Instant::now()) {
            return;
        }
        for feature in Feature::ALL {
            match quill_client::fetch_quota(&self.api, feature).await {
                Ok(usage) => {
                    self.quota.apply_refresh(feature, usage, Instant::now());
                }
                Err(e) => {
                    tracing::warn!("Quota refresh for {feature} failed: {e}");
                }
            }
        }
    }

    /// Inject an authoritative quota snapshot (e.g. from a response header).
    pub fn apply_quota_snapshot(&mut self, feature: Feature, usage: QuotaUsage) {
        self.quota.apply_refresh(feature, usage, Instant::now());
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        self.state.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> ChatSession {
        ChatSession::new(EngineConfig::new("http://localhost:3000"))
    }

    fn now() -> SystemTime {
        SystemTime::UNIX_EPOCH
    }

    /// Wire a fake in-flight stream directly, bypassing the network.
    fn attach_stream(session: &mut ChatSession, now: SystemTime) -> mpsc::Sender<StreamEvent> {
        session.store.push_user("question", now);
        let message_id = session.store.begin_ai_stream(now);
        session.animate(message_id, "");
        let (tx, rx) = mpsc::channel(STREAM_EVENT_CHANNEL_CAPACITY);
        let (abort_handle, _reg) = AbortHandle::new_pair();
        session.state = OperationState::Streaming(ActiveStream {
            message_id,
            rx,
            abort_handle,
        });
        tx
    }

    fn ai_contents(session: &ChatSession) -> Vec<&str> {
        session
            .messages()
            .iter()
            .filter(|m| m.sender() == Sender::Ai)
            .map(Message::content)
            .collect()
    }

    #[test]
    fn blank_input_is_refused_without_side_effects() {
        let mut session = session();
        assert_eq!(session.send_message("   \n\t ", now()), SendOutcome::EmptyInput);
        assert!(session.messages().is_empty());
        assert!(!session.is_streaming());
    }

    #[tokio::test]
    async fn concurrent_send_is_refused() {
        let mut session = session();
        let _tx = attach_stream(&mut session, now());
        let before = session.messages().len();
        assert_eq!(session.send_message("again", now()), SendOutcome::Busy);
        assert_eq!(session.messages().len(), before);
    }

    #[test]
    fn exhausted_quota_blocks_the_send_locally() {
        let mut session = session();
        session.apply_quota_snapshot(Feature::AiChat, QuotaUsage::new(50, 0, 50));
        assert_eq!(session.send_message("hi", now()), SendOutcome::QuotaExhausted);
        assert!(session.messages().is_empty());
        assert_eq!(
            session.last_error(),
            Some(&StreamError::QuotaExhausted(Feature::AiChat))
        );
    }

    #[tokio::test]
    async fn deltas_accumulate_into_the_placeholder() {
        let mut session = session();
        let tx = attach_stream(&mut session, now());

        for delta in ["Hel", "lo wor", "ld"] {
            tx.send(StreamEvent::TextDelta(delta.to_string()))
                .await
                .unwrap();
        }
        session.process_stream_events();

        assert_eq!(ai_contents(&session), vec!["Hello world"]);
        assert!(session.is_streaming());

        // Raw content is displayed while streaming; no reveal lag.
        let message = session.messages().last().unwrap().clone();
        assert_eq!(session.display_text(&message), "Hello world");
        assert!(!session.is_animating());

        tx.send(StreamEvent::Done).await.unwrap();
        session.process_stream_events();
        assert!(!session.is_streaming());
        let message = session.messages().last().unwrap().clone();
        assert!(!message.is_streaming());
        // Completion does not restart the reveal.
        assert_eq!(session.display_text(&message), "Hello world");
        assert!(session.last_error().is_none());
    }

    #[tokio::test]
    async fn empty_successful_stream_gets_a_neutral_placeholder() {
        let mut session = session();
        let tx = attach_stream(&mut session, now());
        tx.send(StreamEvent::Done).await.unwrap();
        session.process_stream_events();

        assert_eq!(ai_contents(&session), vec![EMPTY_RESPONSE_MESSAGE]);
        assert!(!session.is_streaming());
        assert!(session.last_error().is_none());
    }

    #[tokio::test]
    async fn rejection_rolls_back_without_synthesizing_a_message() {
        let mut session = session();
        let tx = attach_stream(&mut session, now());
        tx.send(StreamEvent::Error(StreamError::RequestRejected {
            status: 429,
            body: "quota exceeded".to_string(),
        }))
        .await
        .unwrap();
        session.process_stream_events();

        // The empty placeholder is gone and no AI message took its place;
        // only the user message remains. The error surfaces out of band.
        assert!(ai_contents(&session).is_empty());
        assert_eq!(session.messages().len(), 1);
        assert_eq!(session.messages()[0].sender(), Sender::User);
        assert!(!session.is_streaming());
        assert!(!session.is_animating());
        assert!(matches!(
            session.last_error(),
            Some(StreamError::RequestRejected { status: 429, .. })
        ));
    }

    #[tokio::test]
    async fn mid_stream_failure_with_no_content_gets_the_fallback() {
        let mut session = session();
        let tx = attach_stream(&mut session, now());
        tx.send(StreamEvent::Error(StreamError::StreamFailure(
            "connection reset".to_string(),
        )))
        .await
        .unwrap();
        session.process_stream_events();

        assert_eq!(ai_contents(&session), vec![FALLBACK_ERROR_MESSAGE]);
        assert!(matches!(
            session.last_error(),
            Some(StreamError::StreamFailure(_))
        ));
    }

    #[tokio::test]
    async fn mid_stream_failure_preserves_partial_content() {
        let mut session = session();
        let tx = attach_stream(&mut session, now());
        tx.send(StreamEvent::TextDelta("partial answ".to_string()))
            .await
            .unwrap();
        tx.send(StreamEvent::Error(StreamError::StreamFailure(
            "connection reset".to_string(),
        )))
        .await
        .unwrap();
        session.process_stream_events();

        assert_eq!(ai_contents(&session), vec!["partial answ"]);
        let message = session.messages().last().unwrap();
        assert!(!message.is_streaming());
        assert!(matches!(
            session.last_error(),
            Some(StreamError::StreamFailure(_))
        ));
    }

    #[tokio::test]
    async fn reset_discards_the_stream_and_regenerates_the_session() {
        let mut session = session();
        let old_id = session.session_id();
        let tx = attach_stream(&mut session, now());
        tx.send(StreamEvent::TextDelta("in flight".to_string()))
            .await
            .unwrap();

        session.reset_chat();
        assert!(session.messages().is_empty());
        assert!(!session.is_streaming());
        assert_ne!(session.session_id(), old_id);

        // Late events from the old stream have nowhere to land.
        session.process_stream_events();
        assert!(session.messages().is_empty());
        assert!(tx.send(StreamEvent::Done).await.is_err());
    }

    #[tokio::test]
    async fn cancel_keeps_partial_and_drops_empty() {
        let mut session = session();
        let tx = attach_stream(&mut session, now());
        tx.send(StreamEvent::TextDelta("keep me".to_string()))
            .await
            .unwrap();
        session.process_stream_events();
        session.cancel_stream();

        assert_eq!(ai_contents(&session), vec!["keep me"]);
        assert!(!session.is_streaming());
        assert!(session.last_error().is_none());

        // Cancel with nothing received leaves no AI message behind.
        let mut session = self::session();
        let _tx = attach_stream(&mut session, now());
        session.cancel_stream();
        assert!(ai_contents(&session).is_empty());
        assert_eq!(session.messages().len(), 1);
    }

    #[test]
    fn greeting_reveals_character_by_character() {
        let mut session = session();
        let id = session.add_initial_message("Hi there!", now());
        let message = session.store.get(id).unwrap().clone();

        assert_eq!(session.display_text(&message), "");
        assert!(session.is_animating());
        session.tick_animation();
        session.tick_animation();
        assert_eq!(session.display_text(&message), "Hi");

        session.skip_reveal();
        assert_eq!(session.display_text(&message), "Hi there!");
        assert!(!session.is_animating());
    }

    #[test]
    fn history_replay_animates_only_the_latest_ai_message() {
        use chrono::{TimeZone, Utc};
        let mut session = session();
        let record = |id: &str, sender, content: &str| HistoryRecord {
            id: id.to_string(),
            content: content.to_string(),
            sender,
            created_at: Utc.with_ymd_and_hms(2026, 8, 27, 10, 0, 0).unwrap(),
        };
        session.load_history(&[
            record("1", Sender::User, "q1"),
            record("2", Sender::Ai, "a1"),
            record("3", Sender::User, "q2"),
            record("4", Sender::Ai, "a2"),
        ]);

        assert_eq!(session.messages().len(), 4);
        let older = session.messages()[1].clone();
        let latest = session.messages()[3].clone();
        // Older messages render in full immediately.
        assert_eq!(session.display_text(&older), "a1");
        // The latest AI message replays.
        assert_eq!(session.display_text(&latest), "");
        session.tick_animation();
        assert_eq!(session.display_text(&latest), "a");
    }
}
