//! Quill chat engine.
//!
//! Everything between the HTTP transport and the UI: the message store, the
//! reveal animation, quota tracking, and the session controller that
//! orchestrates them. The engine is UI-agnostic and host-driven; it never
//! spawns timers of its own. The host polls [`ChatSession`] for stream
//! events, ticks the animation on the configured cadence, and renders
//! whatever [`ChatSession::display_text`] returns.

pub mod config;
pub mod quota;
pub mod session;
pub mod state;
pub mod store;
pub mod typewriter;

pub use config::EngineConfig;
pub use quota::{DEFAULT_QUOTA_REFRESH_INTERVAL, QuotaTracker};
pub use session::{ChatSession, SendOutcome};
pub use state::{ActiveStream, OperationState};
pub use store::MessageStore;
pub use typewriter::{DEFAULT_REVEAL_INTERVAL, Typewriter};
