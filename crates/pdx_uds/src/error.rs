use nix::errno::Errno;
use thiserror::Error;

/// Terminal state a failed connect call ends in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::AsRefStr)]
pub enum ErrorKind {
    ResourceError,
    WaitError,
    Timeout,
    ConnectError,
    ProtocolError,
    IOError,
    ConfigError,
}

/// A frame or handshake response that does not follow the wire protocol.
///
/// Only a bad descriptor index reaches callers as [Error::Protocol]. Framing failures while
/// receiving a response are reported as [Error::Io].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolViolation {
    #[error("return code {ret_code} does not index the {descriptors} transferred descriptors")]
    InvalidDescriptorIndex { ret_code: i32, descriptors: usize },
    #[error("bad frame magic {0:#010x}")]
    BadMagic(u32),
    #[error("frame is {received} bytes, expected at least {expected}")]
    Truncated { expected: usize, received: usize },
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("endpoint path is empty")]
    EmptyEndpoint,
    #[error("failed to create socket: {0}")]
    Resource(Errno),
    #[error("failed waiting for endpoint: {0}")]
    Wait(Errno),
    #[error("timed out connecting to endpoint")]
    Timeout,
    #[error("failed to connect to endpoint: {0}")]
    Connect(Errno),
    #[error("channel open protocol error: {0}")]
    Protocol(#[from] ProtocolViolation),
    #[error("channel open handshake failed: {0}")]
    Io(Errno),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::EmptyEndpoint => ErrorKind::ConfigError,
            Error::Resource(_) => ErrorKind::ResourceError,
            Error::Wait(_) => ErrorKind::WaitError,
            Error::Timeout => ErrorKind::Timeout,
            Error::Connect(_) => ErrorKind::ConnectError,
            Error::Protocol(_) => ErrorKind::ProtocolError,
            Error::Io(_) => ErrorKind::IOError,
        }
    }

    /// The OS error code behind this failure.
    ///
    /// Protocol violations are not OS failures and have no errno.
    pub fn errno(&self) -> Option<Errno> {
        match self {
            Error::EmptyEndpoint => Some(Errno::EINVAL),
            Error::Timeout => Some(Errno::ETIMEDOUT),
            Error::Resource(errno) | Error::Wait(errno) | Error::Connect(errno) | Error::Io(errno) => Some(*errno),
            Error::Protocol(_) => None,
        }
    }
}
