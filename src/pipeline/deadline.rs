//! Query deadline and cancellation.
//!
//! A cooperative deadline shared by every processor in a chain. It is
//! checked at processor boundaries and carried in the execution context
//! that every `next` call receives, never in thread-local state, so
//! depleter workers observe cancellation through the same object.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// What a boundary check does when the deadline has elapsed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TimeoutPolicy {
    /// Fail pending work with a timeout status.
    #[default]
    Return,
    /// Emit whatever is ready, then end the stream.
    Continue,
}

/// Monotonic deadline with a shared cancellation flag.
///
/// Clones share the flag: cancelling any clone cancels them all. A query
/// is cancelled by moving its deadline to now; the next boundary check
/// observes it.
#[derive(Clone, Debug)]
pub struct QueryDeadline {
    cancelled: Arc<AtomicBool>,
    start: Instant,
    timeout: Option<Duration>,
}

impl QueryDeadline {
    pub fn new(timeout: Option<Duration>) -> Self {
        QueryDeadline {
            cancelled: Arc::new(AtomicBool::new(false)),
            start: Instant::now(),
            timeout,
        }
    }

    /// A deadline that never fires on its own (still cancellable).
    pub fn unbounded() -> Self {
        QueryDeadline::new(None)
    }

    /// True once the deadline elapsed or the query was cancelled.
    /// Latches: once true it stays true.
    pub fn exceeded(&self) -> bool {
        if self.cancelled.load(Ordering::Relaxed) {
            return true;
        }
        if let Some(timeout) = self.timeout {
            if self.start.elapsed() > timeout {
                self.cancelled.store(true, Ordering::Relaxed);
                return true;
            }
        }
        false
    }

    /// Cancel explicitly; equivalent to setting the deadline to now.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Default for QueryDeadline {
    fn default() -> Self {
        QueryDeadline::unbounded()
    }
}

/// Shared per-query execution context, passed on every `next` call.
#[derive(Clone, Debug, Default)]
pub struct ExecContext {
    pub deadline: QueryDeadline,
    pub policy: TimeoutPolicy,
}

impl ExecContext {
    pub fn new(timeout: Option<Duration>, policy: TimeoutPolicy) -> Self {
        ExecContext {
            deadline: QueryDeadline::new(timeout),
            policy,
        }
    }

    pub fn unbounded() -> Self {
        ExecContext::default()
    }
}
