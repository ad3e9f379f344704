use std::path::{
    Path,
    PathBuf,
};
use std::sync::Arc;
use std::time::Duration;

use tracing::{
    debug,
    info,
};

use crate::channel::ClientChannel;
use crate::clock::{
    Clock,
    ConnectionDeadline,
    SystemClock,
};
use crate::connector::Connector;
use crate::endpoint::resolve_endpoint_path_in;
use crate::handshake::open_channel;
use crate::registry::ChannelRegistry;
use crate::socket::{
    SocketOps,
    UnixSocketOps,
};
use crate::waiter::{
    EndpointWaiter,
    PollingEndpointWaiter,
};
use crate::{
    ConnectConfig,
    Error,
    Result,
};

/// Creates [ClientChannel]s connected to a single endpoint.
///
/// The endpoint path is resolved once, at construction. Each call to [Self::connect] is an
/// independent attempt and the factory can be shared between threads.
pub struct ClientChannelFactory {
    endpoint_path: PathBuf,
    registry: Arc<dyn ChannelRegistry>,
    clock: Arc<dyn Clock>,
    waiter: Option<Arc<dyn EndpointWaiter>>,
    sockets: Arc<dyn SocketOps>,
    config: ConnectConfig,
}

impl ClientChannelFactory {
    /// Resolves `endpoint` under the default socket root.
    pub fn new(endpoint: &str, registry: Arc<dyn ChannelRegistry>) -> Result<Self> {
        Self::with_config(endpoint, registry, ConnectConfig::default())
    }

    /// Resolves `endpoint` under `config.root_path`.
    pub fn with_config(endpoint: &str, registry: Arc<dyn ChannelRegistry>, config: ConnectConfig) -> Result<Self> {
        let endpoint_path = resolve_endpoint_path_in(&config.root_path, endpoint);
        if endpoint_path.as_os_str().is_empty() {
            return Err(Error::EmptyEndpoint);
        }
        debug!(?endpoint_path, "Created client channel factory");

        Ok(Self {
            endpoint_path,
            registry,
            clock: Arc::new(SystemClock),
            waiter: None,
            sockets: Arc::new(UnixSocketOps),
            config,
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replaces the default polling waiter.
    pub fn with_waiter(mut self, waiter: Arc<dyn EndpointWaiter>) -> Self {
        self.waiter = Some(waiter);
        self
    }

    pub fn with_socket_ops(mut self, sockets: Arc<dyn SocketOps>) -> Self {
        self.sockets = sockets;
        self
    }

    pub fn endpoint_path(&self) -> &Path {
        &self.endpoint_path
    }

    pub fn config(&self) -> &ConnectConfig {
        &self.config
    }

    /// Connects, opens a channel, and registers it. `timeout` of `None` waits forever.
    pub fn connect(&self, timeout: Option<Duration>) -> Result<ClientChannel> {
        let default_waiter;
        let waiter: &dyn EndpointWaiter = match &self.waiter {
            Some(waiter) => waiter.as_ref(),
            None => {
                default_waiter = PollingEndpointWaiter::new(self.clock.clone(), self.config.wait_poll_interval());
                &default_waiter
            },
        };

        let connector = Connector::new(self.clock.as_ref(), waiter, self.sockets.as_ref(), &self.config);
        let socket = connector.connect(&self.endpoint_path, timeout)?;

        let (socket, event) = open_channel(socket)?;
        let handle = self.registry.create_handle(socket, event);
        info!(endpoint_path = ?self.endpoint_path, %handle, "Opened channel");
        Ok(ClientChannel::new(handle, self.registry.clone()))
    }

    /// Same as [Self::connect] with a signed millisecond budget, any negative value waits
    /// forever.
    pub fn connect_millis(&self, timeout_ms: i64) -> Result<ClientChannel> {
        self.connect(ConnectionDeadline::timeout_from_millis(timeout_ms))
    }
}

impl std::fmt::Debug for ClientChannelFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientChannelFactory")
            .field("endpoint_path", &self.endpoint_path)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
