//! Client-side channel establishment for PDX endpoints served over Unix-domain stream sockets.
//!
//! A [ClientChannelFactory] resolves an endpoint name under the well-known socket root, connects
//! with a bounded retry policy, performs the `CHANNEL_OPEN` handshake that hands back an event
//! descriptor, and registers the resulting descriptor pair with a [ChannelRegistry].

#![cfg(unix)]

pub mod channel;
pub mod clock;
pub mod config;
pub mod connector;
pub mod consts;
pub mod endpoint;
mod error;
pub mod factory;
pub mod handshake;
pub mod protocol;
pub mod registry;
pub mod retry;
pub mod socket;
pub mod waiter;

pub use channel::ClientChannel;
pub use clock::{
    Clock,
    ConnectionDeadline,
    SystemClock,
};
pub use config::ConnectConfig;
pub use error::{
    Error,
    ErrorKind,
    ProtocolViolation,
};
pub use factory::ClientChannelFactory;
pub use registry::{
    ChannelHandle,
    ChannelManager,
    ChannelRegistry,
};
pub use socket::{
    SocketOps,
    UnixSocketOps,
};
pub use waiter::{
    EndpointWaiter,
    PollingEndpointWaiter,
    WaitError,
};

pub type Result<T, E = Error> = std::result::Result<T, E>;
