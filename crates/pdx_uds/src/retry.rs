//! Classification of connect failures into retry decisions.
//!
//! A socket node that exists but is not yet listening (or whose permissions are not yet set)
//! refuses connections for a short while after the service creates it, so those failures are
//! retried after a pause. A node that vanished between the endpoint wait and the connect is
//! retried right away, which sends the loop back to waiting for it.

use nix::errno::Errno;

/// What the connect loop does with a failed connect attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Pause for the backoff interval, then wait for the endpoint again.
    RetryWithBackoff,
    /// Wait for the endpoint again without pausing.
    RetryImmediate,
    /// Give up and surface the error.
    Fatal,
}

/// Pure classification of a connect error.
///
/// `eacces_retries_left` is how many more `EACCES` failures may still be retried in this call.
pub fn classify(errno: Errno, eacces_retries_left: u32) -> Disposition {
    match errno {
        Errno::ECONNREFUSED => Disposition::RetryWithBackoff,
        Errno::EACCES if eacces_retries_left > 0 => Disposition::RetryWithBackoff,
        Errno::ENOENT | Errno::ENOTDIR => Disposition::RetryImmediate,
        _ => Disposition::Fatal,
    }
}

/// Per-call retry bookkeeping.
///
/// `ECONNREFUSED` has no budget of its own and is bounded only by the call deadline, while
/// `EACCES` is charged against a fixed budget.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    eacces_retries_left: u32,
}

impl RetryPolicy {
    pub fn new(max_eacces_retries: u32) -> Self {
        Self {
            eacces_retries_left: max_eacces_retries,
        }
    }

    /// Classifies `errno` and charges the `EACCES` budget when the attempt is retried.
    pub fn on_error(&mut self, errno: Errno) -> Disposition {
        let disposition = classify(errno, self.eacces_retries_left);
        if errno == Errno::EACCES && disposition == Disposition::RetryWithBackoff {
            self.eacces_retries_left -= 1;
        }
        disposition
    }

    pub fn eacces_retries_left(&self) -> u32 {
        self.eacces_retries_left
    }
}
