//! Time-bounded connect loop around a single Unix-domain socket.

use std::os::fd::{
    AsFd,
    OwnedFd,
};
use std::path::Path;
use std::time::Duration;

use nix::sys::socket::UnixAddr;
use tracing::{
    debug,
    error,
    trace,
};

use crate::clock::{
    Clock,
    ConnectionDeadline,
};
use crate::retry::{
    Disposition,
    RetryPolicy,
};
use crate::socket::SocketOps;
use crate::waiter::{
    EndpointWaiter,
    WaitError,
};
use crate::{
    ConnectConfig,
    Error,
};

/// Drives the wait/connect/backoff cycle for one connect call.
///
/// One socket is created per call and reused for every connect attempt of that call. The socket
/// is closed on every failure and returned, still owned, on success.
pub struct Connector<'a> {
    clock: &'a dyn Clock,
    waiter: &'a dyn EndpointWaiter,
    sockets: &'a dyn SocketOps,
    backoff: Duration,
    max_eacces_retries: u32,
}

impl<'a> Connector<'a> {
    pub fn new(
        clock: &'a dyn Clock,
        waiter: &'a dyn EndpointWaiter,
        sockets: &'a dyn SocketOps,
        config: &ConnectConfig,
    ) -> Self {
        Self {
            clock,
            waiter,
            sockets,
            backoff: config.backoff(),
            max_eacces_retries: config.max_eacces_retries,
        }
    }

    /// Connects to the endpoint at `path`. `timeout` of `None` waits forever.
    pub fn connect(&self, path: &Path, timeout: Option<Duration>) -> crate::Result<OwnedFd> {
        let socket = self.sockets.open().map_err(|errno| {
            error!(%errno, "Failed to create socket");
            Error::Resource(errno)
        })?;

        // Paths longer than `sun_path` are rejected here instead of being truncated.
        let addr = UnixAddr::new(path).map_err(|errno| {
            error!(%errno, ?path, "Invalid endpoint address");
            Error::Connect(errno)
        })?;

        let deadline = ConnectionDeadline::new(self.clock, timeout);
        let mut policy = RetryPolicy::new(self.max_eacces_retries);
        let mut attempt: u32 = 0;

        loop {
            let remaining = deadline.remaining(self.clock).inspect_err(|_| {
                debug!(?path, attempt, "Deadline passed before connecting");
            })?;

            debug!(?path, ?remaining, "Waiting for endpoint");
            self.waiter
                .wait_for_endpoint(path, remaining)
                .map_err(|err| match err {
                    WaitError::TimedOut if deadline.is_bounded() => Error::Timeout,
                    WaitError::TimedOut => Error::Wait(nix::errno::Errno::ETIMEDOUT),
                    WaitError::Os(errno) => Error::Wait(errno),
                })
                .inspect_err(|err| debug!(?path, %err, "Endpoint wait failed"))?;

            attempt += 1;
            debug!(?path, attempt, "Connecting");
            let errno = match self.sockets.connect(socket.as_fd(), &addr) {
                Ok(()) => {
                    debug!(?path, attempt, "Connected");
                    return Ok(socket);
                },
                Err(errno) => errno,
            };

            debug!(?path, attempt, %errno, "Connect error");
            match policy.on_error(errno) {
                Disposition::RetryWithBackoff => {
                    debug!(
                        ?path,
                        %errno,
                        eacces_retries_left = policy.eacces_retries_left(),
                        "Endpoint not accepting yet, waiting"
                    );
                    self.clock.sleep(self.backoff);
                },
                Disposition::RetryImmediate => {
                    trace!(?path, %errno, "Endpoint node missing, waiting for it again");
                },
                Disposition::Fatal => {
                    error!(?path, %errno, attempt, "Failed to initialize connection when connecting");
                    return Err(Error::Connect(errno));
                },
            }
        }
    }
}
