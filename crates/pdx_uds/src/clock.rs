use std::time::{
    Duration,
    Instant,
};

use crate::Error;

/// Time source and sleep primitive used by the connect loop.
///
/// This provides unit tests the capability to run the retry state machine without real delays.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;

    fn sleep(&self, duration: Duration);
}

/// Provides the real implementation of [Clock].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Deadline of a single connect call, fixed once when the call starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionDeadline {
    Unbounded,
    At(Instant),
}

impl ConnectionDeadline {
    pub fn new(clock: &dyn Clock, timeout: Option<Duration>) -> Self {
        // A budget too large to represent is as good as no deadline at all.
        timeout
            .and_then(|timeout| clock.now().checked_add(timeout))
            .map_or(Self::Unbounded, Self::At)
    }

    /// Converts a signed millisecond budget where any negative value means "wait forever".
    pub fn timeout_from_millis(timeout_ms: i64) -> Option<Duration> {
        u64::try_from(timeout_ms).ok().map(Duration::from_millis)
    }

    pub fn is_bounded(&self) -> bool {
        matches!(self, Self::At(_))
    }

    /// Budget left before the deadline, `None` when unbounded.
    ///
    /// Fails with [Error::Timeout] once the deadline has passed.
    pub fn remaining(&self, clock: &dyn Clock) -> crate::Result<Option<Duration>> {
        match self {
            Self::Unbounded => Ok(None),
            Self::At(deadline) => deadline
                .checked_duration_since(clock.now())
                .map(Some)
                .ok_or(Error::Timeout),
        }
    }
}
