//! Client-side quota tracking.
//!
//! The server is authoritative; this tracker keeps an optimistic local view
//! that is reconciled whenever a refresh lands. Before the first refresh a
//! feature is treated as usable, never blocked on missing data.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use quill_types::{Feature, QuotaUsage};

/// Authoritative counters are re-fetched on this cadence.
pub const DEFAULT_QUOTA_REFRESH_INTERVAL: Duration = Duration::from_secs(60);

/// Per-feature usage counters with an optimistic local decrement.
#[derive(Debug, Default)]
pub struct QuotaTracker {
    usage: HashMap<Feature, QuotaUsage>,
    last_refresh: Option<Instant>,
    refresh_interval: Duration,
}

impl QuotaTracker {
    #[must_use]
    pub fn new() -> Self {
        Self {
            usage: HashMap::new(),
            last_refresh: None,
            refresh_interval: DEFAULT_QUOTA_REFRESH_INTERVAL,
        }
    }

    #[must_use]
    pub fn with_refresh_interval(interval: Duration) -> Self {
        Self {
            refresh_interval: interval,
            ..Self::new()
        }
    }

    #[must_use]
    pub fn usage(&self, feature: Feature) -> Option<QuotaUsage> {
        self.usage.get(&feature).copied()
    }

    /// Whether a use of `feature` should be allowed right now.
    ///
    /// Unloaded features are allowed; the server rejects the request if the
    /// optimism was misplaced, and that rejection is handled downstream.
    #[must_use]
    pub fn can_use(&self, feature: Feature) -> bool {
        self.usage.get(&feature).is_none_or(QuotaUsage::can_use)
    }

    /// Optimistically record one use ahead of server confirmation.
    pub fn record_use(&mut self, feature: Feature) {
        if let Some(usage) = self.usage.get_mut(&feature) {
            usage.record_use();
        }
    }

    /// Overwrite local counters with an authoritative server snapshot.
    /// Last write wins; any optimistic drift is discarded.
    pub fn apply_refresh(&mut self, feature: Feature, usage: QuotaUsage, now: Instant) {
        self.usage.insert(feature, usage);
        self.last_refresh = Some(now);
    }

    /// True when the refresh cadence has elapsed (or nothing was ever
    /// fetched).
    #[must_use]
    pub fn refresh_due(&self, now: Instant) -> bool {
        match self.last_refresh {
            None => true,
            Some(last) => now.duration_since(last) >= self.refresh_interval,
        }
    }
}
