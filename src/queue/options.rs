//! Queue configuration and per-call overrides.

use std::time::Duration;

use serde::Serialize;

/// Default lease length for claims and pings.
pub const DEFAULT_VISIBILITY: Duration = Duration::from_secs(30);

/// Claims allowed before a message is dead-lettered.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Construction-time settings of a [`Queue`](super::Queue).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueOptions {
    /// Lease length granted by `claim` and `ping`.
    pub visibility: Duration,
    /// Delay before newly added messages become claimable.
    pub delay: Duration,
    /// A message claimed more often than this is dead-lettered, if the
    /// queue has a dead-letter queue.
    pub max_retries: u32,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            visibility: DEFAULT_VISIBILITY,
            delay: Duration::ZERO,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl QueueOptions {
    pub fn visibility(mut self, visibility: Duration) -> Self {
        self.visibility = visibility;
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }
}

/// Overrides for `add` / `add_many`. `None` uses the queue default.
#[derive(Debug, Clone, Copy, Default)]
pub struct AddOptions {
    pub delay: Option<Duration>,
}

impl AddOptions {
    pub fn delay(delay: Duration) -> Self {
        Self { delay: Some(delay) }
    }
}

/// Overrides for `claim`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClaimOptions {
    pub visibility: Option<Duration>,
}

impl ClaimOptions {
    pub fn visibility(visibility: Duration) -> Self {
        Self {
            visibility: Some(visibility),
        }
    }
}

/// Overrides for `ping`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PingOptions {
    pub visibility: Option<Duration>,
}

impl PingOptions {
    pub fn visibility(visibility: Duration) -> Self {
        Self {
            visibility: Some(visibility),
        }
    }
}

/// Overrides for `nack`. The default delay is zero: immediately claimable.
#[derive(Debug, Clone, Copy, Default)]
pub struct NackOptions {
    pub delay: Option<Duration>,
}

impl NackOptions {
    pub fn delay(delay: Duration) -> Self {
        Self { delay: Some(delay) }
    }
}

/// Counts of a queue's records by state.
///
/// Each count is a separate store query; under concurrent traffic they are
/// not a consistent snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct QueueStats {
    pub total: u64,
    pub size: u64,
    pub in_flight: u64,
    pub done: u64,
}
