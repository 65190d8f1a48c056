//! Absolute deadlines for long-running operations

use std::time::Duration;
use tokio::time::Instant;

/// Stand-in for timeouts too large to represent as an instant
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// A point in time after which an operation is abandoned
///
/// Computed once at the top of a call chain and handed down unchanged, so
/// every poll loop in the chain stops at the same instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    pub fn after(timeout: Duration) -> Self {
        let now = Instant::now();
        let at = now
            .checked_add(timeout)
            .unwrap_or_else(|| now + FAR_FUTURE);
        Self { at }
    }

    pub fn at(&self) -> Instant {
        self.at
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() > self.at
    }

    /// Time left, zero once expired
    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }
}
