use std::fmt;
use std::sync::Arc;

use tracing::warn;

use crate::registry::{
    ChannelHandle,
    ChannelRegistry,
};

/// A connected channel, registered with the registry that produced its handle.
///
/// Dropping the channel closes its handle.
pub struct ClientChannel {
    handle: ChannelHandle,
    registry: Arc<dyn ChannelRegistry>,
    owns_handle: bool,
}

impl ClientChannel {
    pub fn new(handle: ChannelHandle, registry: Arc<dyn ChannelRegistry>) -> Self {
        Self {
            handle,
            registry,
            owns_handle: true,
        }
    }

    pub fn handle(&self) -> ChannelHandle {
        self.handle
    }

    /// Releases the handle without closing it. The caller becomes responsible for closing it
    /// through the registry.
    pub fn into_handle(mut self) -> ChannelHandle {
        self.owns_handle = false;
        self.handle
    }
}

impl fmt::Debug for ClientChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientChannel")
            .field("handle", &self.handle)
            .field("owns_handle", &self.owns_handle)
            .finish_non_exhaustive()
    }
}

impl Drop for ClientChannel {
    fn drop(&mut self) {
        if self.owns_handle && !self.registry.close_handle(self.handle) {
            warn!(handle = %self.handle, "Channel handle was already closed");
        }
    }
}
