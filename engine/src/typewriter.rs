//! Character-by-character reveal animation.
//!
//! The typewriter never owns the cadence: the host calls [`Typewriter::tick`]
//! on its animation timer (see [`DEFAULT_REVEAL_INTERVAL`]). Progress is
//! counted in characters, not bytes, so multi-byte text reveals one visible
//! character at a time.

use std::time::Duration;

/// One character revealed per tick at this cadence.
pub const DEFAULT_REVEAL_INTERVAL: Duration = Duration::from_millis(25);

/// Progressive reveal of a target string.
///
/// Reconciliation on retarget is prefix-based: when the new target is a
/// continuation of the old one (old text is a prefix of the new), revealed
/// progress carries over and the animation continues without restarting.
/// Any other change is a discontinuity and restarts the reveal from zero.
#[derive(Debug, Default)]
pub struct Typewriter {
    target: String,
    revealed_chars: usize,
    total_chars: usize,
}

impl Typewriter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Point the animation at new text, reconciling against the old target.
    ///
    /// The new text counts as a continuation when it starts with what is
    /// currently displayed, so the revealed prefix stays valid even when the
    /// unrevealed tail changed.
    pub fn set_target(&mut self, text: &str) {
        if text == self.target {
            return;
        }
        let continuation = text.starts_with(self.visible_text());
        self.target.clear();
        self.target.push_str(text);
        self.total_chars = text.chars().count();
        if !continuation {
            self.revealed_chars = 0;
        }
    }

    /// Reveal one more character. Returns true when the visible text changed.
    pub fn tick(&mut self) -> bool {
        if self.revealed_chars >= self.total_chars {
            return false;
        }
        self.revealed_chars += 1;
        true
    }

    /// Reveal everything immediately. Used for user skip and for keeping the
    /// display synced while raw streamed content bypasses the animation.
    pub fn skip_to_end(&mut self) {
        self.revealed_chars = self.total_chars;
    }

    /// Forget the target entirely.
    pub fn reset(&mut self) {
        self.target.clear();
        self.revealed_chars = 0;
        self.total_chars = 0;
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.revealed_chars >= self.total_chars
    }

    #[must_use]
    pub fn is_animating(&self) -> bool {
        !self.is_complete()
    }

    #[must_use]
    pub fn revealed_chars(&self) -> usize {
        self.revealed_chars
    }

    #[must_use]
    pub fn target(&self) -> &str {
        &self.target
    }

    /// The revealed prefix, sliced on a character boundary.
    #[must_use]
    pub fn visible_text(&self) -> &str {
        if self.revealed_chars >= self.total_chars {
            return &self.target;
        }
        let byte_end = self
            .target
            .char_indices()
            .nth(self.revealed_chars)
            .map_or(self.target.len(), |(i, _)| i);
        &self.target[..byte_end]
    }
}
