use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::stat;
use thiserror::Error;
use tracing::trace;

use crate::clock::{
    Clock,
    ConnectionDeadline,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum WaitError {
    #[error("endpoint did not appear before the timeout")]
    TimedOut,
    #[error(transparent)]
    Os(Errno),
}

/// Blocks until the socket node of an endpoint exists.
pub trait EndpointWaiter: Send + Sync {
    /// Waits for `path` to exist. `timeout` of `None` waits forever.
    fn wait_for_endpoint(&self, path: &Path, timeout: Option<Duration>) -> Result<(), WaitError>;
}

/// [EndpointWaiter] that polls the filesystem at a fixed interval.
pub struct PollingEndpointWaiter {
    clock: Arc<dyn Clock>,
    poll_interval: Duration,
}

impl PollingEndpointWaiter {
    pub fn new(clock: Arc<dyn Clock>, poll_interval: Duration) -> Self {
        Self { clock, poll_interval }
    }
}

impl std::fmt::Debug for PollingEndpointWaiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollingEndpointWaiter")
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

impl EndpointWaiter for PollingEndpointWaiter {
    fn wait_for_endpoint(&self, path: &Path, timeout: Option<Duration>) -> Result<(), WaitError> {
        let deadline = ConnectionDeadline::new(self.clock.as_ref(), timeout);
        loop {
            match stat::lstat(path) {
                Ok(_) => return Ok(()),
                Err(Errno::ENOENT | Errno::ENOTDIR | Errno::EINTR) => {},
                Err(errno) => return Err(WaitError::Os(errno)),
            }

            let pause = match deadline.remaining(self.clock.as_ref()) {
                Ok(Some(remaining)) if remaining.is_zero() => return Err(WaitError::TimedOut),
                Ok(Some(remaining)) => remaining.min(self.poll_interval),
                Ok(None) => self.poll_interval,
                Err(_) => return Err(WaitError::TimedOut),
            };
            trace!(?path, ?pause, "Endpoint not present yet");
            self.clock.sleep(pause);
        }
    }
}
