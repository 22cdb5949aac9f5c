//! HTTP transport for Quill.
//!
//! # Architecture
//!
//! The crate wraps the dashboard backend's three chat endpoints:
//!
//! - [`stream_message`] - `POST /api/ai-chat/message/stream`, an unframed
//!   UTF-8 chunk stream
//! - [`fetch_quota`] - `GET /api/usage/quota?feature={key}`
//! - [`fetch_history`] - `GET /api/chat/history?sessionId={id}`
//!
//! The streaming endpoint emits events through a
//! [`tokio::sync::mpsc::Sender<StreamEvent>`] channel, allowing the engine
//! to process content as it arrives. The response body carries no per-chunk
//! envelope or delimiter: concatenating every chunk yields the full response
//! text, and chunk boundaries may fall anywhere, including inside a
//! multi-byte character ([`decode::ChunkDecoder`] handles the reassembly).
//!
//! # Error Handling
//!
//! Failures during streaming are delivered as `StreamEvent::Error` events
//! rather than `Result::Err` returns, allowing partial output to be captured
//! before the error occurs. After [`StreamEvent::Done`] or
//! [`StreamEvent::Error`], no further event is ever emitted.

pub mod decode;
pub mod retry;

use std::sync::OnceLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use quill_types::{Sender, SessionId, StreamError, StreamEvent};

pub use quill_types::{Feature, QuotaUsage};

use crate::decode::ChunkDecoder;
use crate::retry::{RetryConfig, RetryOutcome, send_with_retry};

const CONNECT_TIMEOUT_SECS: u64 = 30;
const TCP_KEEPALIVE_SECS: u64 = 60;
const POOL_MAX_IDLE_PER_HOST: usize = 8;
const POOL_IDLE_TIMEOUT_SECS: u64 = 90;

const DEFAULT_STREAM_IDLE_TIMEOUT_SECS: u64 = 60;

const MAX_ERROR_BODY_BYTES: usize = 32 * 1024;

/// Shared HTTP client with connect timeout, keepalive, and pooling.
pub fn http_client() -> &'static reqwest::Client {
    static CLIENT: OnceLock<reqwest::Client> = OnceLock::new();
    CLIENT.get_or_init(|| {
        reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .tcp_keepalive(Some(Duration::from_secs(TCP_KEEPALIVE_SECS)))
            .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
            .pool_idle_timeout(Some(Duration::from_secs(POOL_IDLE_TIMEOUT_SECS)))
            .build()
            .unwrap_or_else(|e| {
                tracing::error!("Failed to build tuned HTTP client: {e}. Using defaults.");
                reqwest::Client::new()
            })
    })
}

/// Idle-timeout watchdog for stream reads.
///
/// A stalled connection would otherwise hang forever, since chunked bodies
/// have no overall deadline. Overridable via `QUILL_STREAM_IDLE_TIMEOUT_SECS`.
pub fn stream_idle_timeout() -> Duration {
    static TIMEOUT: OnceLock<Duration> = OnceLock::new();
    *TIMEOUT.get_or_init(|| {
        idle_timeout_from(
            std::env::var("QUILL_STREAM_IDLE_TIMEOUT_SECS")
                .ok()
                .as_deref(),
        )
    })
}

fn idle_timeout_from(raw: Option<&str>) -> Duration {
    let secs = raw
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(DEFAULT_STREAM_IDLE_TIMEOUT_SECS);
    Duration::from_secs(secs)
}

/// Backend location. The base URL is injected by the host application; this
/// subsystem never hardcodes it.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    base_url: String,
}

impl ApiConfig {
    /// Create a config from an injected base URL. A trailing slash is
    /// normalized away so endpoint joins are unambiguous.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self { base_url }
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn stream_url(&self) -> String {
        format!("{}/api/ai-chat/message/stream", self.base_url)
    }

    fn quota_url(&self, feature: Feature) -> String {
        format!("{}/api/usage/quota?feature={}", self.base_url, feature.key())
    }

    fn history_url(&self, session_id: SessionId) -> String {
        format!("{}/api/chat/history?sessionId={session_id}", self.base_url)
    }
}

/// Payload for the streaming chat endpoint.
///
/// `context` is an opaque bag of review metadata (title, code, prior
/// feedback) passed through to the backend unmodified.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub review_id: Option<String>,
    pub message: String,
    pub session_id: SessionId,
    pub context: serde_json::Value,
}

/// One record from the chat history endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryRecord {
    pub id: String,
    pub content: String,
    pub sender: Sender,
    pub created_at: DateTime<Utc>,
}

impl HistoryRecord {
    /// Wire timestamps are RFC 3339; the domain uses `SystemTime`.
    #[must_use]
    pub fn timestamp(&self) -> std::time::SystemTime {
        self.created_at.into()
    }
}

async fn send_event(tx: &mpsc::Sender<StreamEvent>, event: StreamEvent) -> bool {
    tx.send(event).await.is_ok()
}

/// Read an error response body, capped so a hostile or broken backend cannot
/// balloon memory.
pub async fn read_capped_error_body(response: reqwest::Response) -> String {
    let mut body = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let Ok(chunk) = chunk else { break };
        body.extend_from_slice(&chunk);
        if body.len() > MAX_ERROR_BODY_BYTES {
            body.truncate(MAX_ERROR_BODY_BYTES);
            let text = String::from_utf8_lossy(&body);
            return format!("{text}...(truncated)");
        }
    }
    String::from_utf8_lossy(&body).into_owned()
}

/// Open the streaming chat endpoint and forward decoded fragments.
///
/// Every terminal condition is reported through the channel:
/// - non-2xx before streaming → [`StreamError::RequestRejected`]
/// - transport failure at any point → [`StreamError::StreamFailure`]
/// - no bytes within the idle window → [`StreamError::StreamStalled`]
/// - clean end of body → [`StreamEvent::Done`]
///
/// The returned `Result` only signals that the loop itself ran; callers
/// observe outcomes via the channel.
pub async fn stream_message(
    config: &ApiConfig,
    request: &StreamRequest,
    tx: mpsc::Sender<StreamEvent>,
) -> anyhow::Result<()> {
    let client = http_client();
    let retry_config = RetryConfig::default();
    let url = config.stream_url();

    let outcome = send_with_retry(|| client.post(&url).json(request), &retry_config).await;

    let response = match outcome {
        RetryOutcome::Success(response) => response,
        RetryOutcome::HttpError(response) => {
            let status = response.status().as_u16();
            let body = read_capped_error_body(response).await;
            let _ = send_event(
                &tx,
                StreamEvent::Error(StreamError::RequestRejected { status, body }),
            )
            .await;
            return Ok(());
        }
        RetryOutcome::ConnectionError { attempts, source } => {
            let _ = send_event(
                &tx,
                StreamEvent::Error(StreamError::StreamFailure(format!(
                    "request failed after {attempts} attempts: {source}"
                ))),
            )
            .await;
            return Ok(());
        }
        RetryOutcome::NonRetryable(e) => {
            let _ = send_event(
                &tx,
                StreamEvent::Error(StreamError::StreamFailure(format!("request failed: {e}"))),
            )
            .await;
            return Ok(());
        }
    };

    process_chunk_stream(response, &tx, stream_idle_timeout()).await;
    Ok(())
}

/// Consume the response body chunk by chunk.
///
/// One `TextDelta` per chunk that completes at least one character; the
/// decoder holds split multi-byte sequences across reads.
async fn process_chunk_stream(
    response: reqwest::Response,
    tx: &mpsc::Sender<StreamEvent>,
    idle_timeout: Duration,
) {
    let mut stream = response.bytes_stream();
    let mut decoder = ChunkDecoder::new();

    loop {
        let Ok(next) = tokio::time::timeout(idle_timeout, stream.next()).await else {
            let _ = send_event(
                tx,
                StreamEvent::Error(StreamError::StreamStalled {
                    idle_secs: idle_timeout.as_secs(),
                }),
            )
            .await;
            return;
        };

        let Some(chunk) = next else { break };
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                let _ = send_event(
                    tx,
                    StreamEvent::Error(StreamError::StreamFailure(format!(
                        "connection lost mid-stream: {e}"
                    ))),
                )
                .await;
                return;
            }
        };

        let fragment = decoder.decode(&chunk);
        if !fragment.is_empty() && !send_event(tx, StreamEvent::TextDelta(fragment)).await {
            // Receiver dropped: the session was reset or closed.
            return;
        }
    }

    let remainder = decoder.finish();
    if !remainder.is_empty() && !send_event(tx, StreamEvent::TextDelta(remainder)).await {
        return;
    }

    let _ = send_event(tx, StreamEvent::Done).await;
}

/// Fetch authoritative usage counters for one feature.
pub async fn fetch_quota(config: &ApiConfig, feature: Feature) -> anyhow::Result<QuotaUsage> {
    let client = http_client();
    let retry_config = RetryConfig::default();
    let url = config.quota_url(feature);

    match send_with_retry(|| client.get(&url), &retry_config).await {
        RetryOutcome::Success(response) => {
            let usage = response.json::<QuotaUsage>().await?;
            Ok(usage)
        }
        RetryOutcome::HttpError(response) => {
            let status = response.status();
            let body = read_capped_error_body(response).await;
            anyhow::bail!("quota fetch for {feature} failed: {status}: {body}")
        }
        RetryOutcome::ConnectionError { attempts, source } => {
            anyhow::bail!("quota fetch for {feature} failed after {attempts} attempts: {source}")
        }
        RetryOutcome::NonRetryable(e) => {
            anyhow::bail!("quota fetch for {feature} failed: {e}")
        }
    }
}

/// Fetch the ordered chat history for a session.
///
/// Consumed only at session (re)load, never by the streaming path.
pub async fn fetch_history(
    config: &ApiConfig,
    session_id: SessionId,
) -> anyhow::Result<Vec<HistoryRecord>> {
    let client = http_client();
    let retry_config = RetryConfig::default();
    let url = config.history_url(session_id);

    match send_with_retry(|| client.get(&url), &retry_config).await {
        RetryOutcome::Success(response) => {
            let records = response.json::<Vec<HistoryRecord>>().await?;
            Ok(records)
        }
        RetryOutcome::HttpError(response) => {
            let status = response.status();
            let body = read_capped_error_body(response).await;
            anyhow::bail!("history fetch failed: {status}: {body}")
        }
        RetryOutcome::ConnectionError { attempts, source } => {
            anyhow::bail!("history fetch failed after {attempts} attempts: {source}")
        }
        RetryOutcome::NonRetryable(e) => {
            anyhow::bail!("history fetch failed: {e}")
        }
    }
}
