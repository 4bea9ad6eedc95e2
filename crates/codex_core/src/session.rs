//! Explicit edit context threaded through every mutator.
//!
//! # Responsibility
//! - Carry the acting author and the time source for new edit records.
//!
//! # Invariants
//! - The author is never empty; unknown users are recorded as `anonymous`.

use crate::model::edit::ANONYMOUS_AUTHOR;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Millisecond wall-clock source.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

/// Reads the system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
            .unwrap_or(0)
    }
}

/// Caller-driven clock for replay and tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(start_ms: i64) -> Self {
        Self {
            now: AtomicI64::new(start_ms),
        }
    }

    pub fn set(&self, now_ms: i64) {
        self.now.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, delta_ms: i64) {
        self.now.fetch_add(delta_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Who is editing, and when.
#[derive(Clone)]
pub struct EditSession {
    author: String,
    clock: Arc<dyn Clock>,
}

impl EditSession {
    pub fn new(author: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        let author = author.into();
        let author = match author.trim() {
            "" => ANONYMOUS_AUTHOR.to_string(),
            trimmed => trimmed.to_string(),
        };
        Self { author, clock }
    }

    pub fn with_system_clock(author: impl Into<String>) -> Self {
        Self::new(author, Arc::new(SystemClock))
    }

    pub fn author(&self) -> &str {
        &self.author
    }

    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }
}

impl std::fmt::Debug for EditSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EditSession")
            .field("author", &self.author)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::{EditSession, ManualClock};
    use std::sync::Arc;

    #[test]
    fn blank_author_is_recorded_as_anonymous() {
        let session = EditSession::new("  ", Arc::new(ManualClock::new(0)));
        assert_eq!(session.author(), "anonymous");
    }

    #[test]
    fn manual_clock_is_shared_with_sessions() {
        let clock = Arc::new(ManualClock::new(100));
        let session = EditSession::new("u1", clock.clone());

        clock.advance(50);
        assert_eq!(session.now_ms(), 150);
    }
}
