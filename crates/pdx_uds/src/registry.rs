use std::collections::HashMap;
use std::fmt;
use std::os::fd::{
    AsFd,
    AsRawFd,
    BorrowedFd,
    OwnedFd,
};
use std::sync::{
    Arc,
    OnceLock,
};

use parking_lot::Mutex;
use tracing::{
    trace,
    warn,
};

/// Opaque value identifying a registered channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelHandle(i32);

impl ChannelHandle {
    pub fn new(value: i32) -> Self {
        Self(value)
    }

    pub fn value(&self) -> i32 {
        self.0
    }
}

impl fmt::Display for ChannelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "channel#{}", self.0)
    }
}

/// Bookkeeping for connected channels.
///
/// Implementations are shared between threads and must serialize their own state.
pub trait ChannelRegistry: Send + Sync {
    /// Takes ownership of a connected socket and its event descriptor.
    fn create_handle(&self, socket: OwnedFd, event: OwnedFd) -> ChannelHandle;

    /// Releases the descriptors behind `handle`. Returns `false` for an unknown handle.
    fn close_handle(&self, handle: ChannelHandle) -> bool;
}

struct ChannelEntry {
    socket: OwnedFd,
    event: OwnedFd,
}

/// Default [ChannelRegistry], keyed by the socket descriptor number.
#[derive(Default)]
pub struct ChannelManager {
    channels: Mutex<HashMap<ChannelHandle, ChannelEntry>>,
}

impl ChannelManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry shared by every factory in the process that does not bring its own.
    pub fn global() -> Arc<ChannelManager> {
        static GLOBAL: OnceLock<Arc<ChannelManager>> = OnceLock::new();
        GLOBAL.get_or_init(|| Arc::new(ChannelManager::new())).clone()
    }

    pub fn len(&self) -> usize {
        self.channels.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.lock().is_empty()
    }

    pub fn contains(&self, handle: ChannelHandle) -> bool {
        self.channels.lock().contains_key(&handle)
    }

    /// Runs `f` with the descriptors registered under `handle`.
    pub fn with_descriptors<R>(
        &self,
        handle: ChannelHandle,
        f: impl FnOnce(BorrowedFd<'_>, BorrowedFd<'_>) -> R,
    ) -> Option<R> {
        let channels = self.channels.lock();
        channels
            .get(&handle)
            .map(|entry| f(entry.socket.as_fd(), entry.event.as_fd()))
    }
}

impl fmt::Debug for ChannelManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelManager").field("channels", &self.len()).finish()
    }
}

impl ChannelRegistry for ChannelManager {
    fn create_handle(&self, socket: OwnedFd, event: OwnedFd) -> ChannelHandle {
        // The socket descriptor number is unique for as long as the socket stays open, and the
        // registry holds it open until the handle is closed.
        let handle = ChannelHandle::new(socket.as_raw_fd());
        trace!(%handle, event_fd = event.as_raw_fd(), "Registering channel");
        if self
            .channels
            .lock()
            .insert(handle, ChannelEntry { socket, event })
            .is_some()
        {
            warn!(%handle, "Replaced a stale channel registration");
        }
        handle
    }

    fn close_handle(&self, handle: ChannelHandle) -> bool {
        let removed = self.channels.lock().remove(&handle);
        trace!(%handle, found = removed.is_some(), "Closing channel");
        removed.is_some()
    }
}
