use std::os::fd::{
    AsRawFd,
    BorrowedFd,
    OwnedFd,
};

use cfg_if::cfg_if;
use nix::errno::Errno;
use nix::sys::socket::{
    self,
    AddressFamily,
    SockFlag,
    SockType,
    UnixAddr,
};

/// OS socket primitives used by the connector.
///
/// Tests substitute an implementation that scripts connect results.
pub trait SocketOps: Send + Sync {
    /// Creates an unconnected Unix-domain stream socket.
    fn open(&self) -> Result<OwnedFd, Errno>;

    /// Connects `socket` to `addr`. Interruptions by a signal are retried and never reported.
    fn connect(&self, socket: BorrowedFd<'_>, addr: &UnixAddr) -> Result<(), Errno>;
}

/// Provides the real implementation of [SocketOps].
#[derive(Debug, Clone, Copy, Default)]
pub struct UnixSocketOps;

impl SocketOps for UnixSocketOps {
    fn open(&self) -> Result<OwnedFd, Errno> {
        cfg_if! {
            if #[cfg(any(target_os = "linux", target_os = "android"))] {
                let flags = SockFlag::SOCK_CLOEXEC;
            } else {
                let flags = SockFlag::empty();
            }
        }
        socket::socket(AddressFamily::Unix, SockType::Stream, flags, None)
    }

    fn connect(&self, socket: BorrowedFd<'_>, addr: &UnixAddr) -> Result<(), Errno> {
        retry_eintr(|| socket::connect(socket.as_raw_fd(), addr))
    }
}

/// Runs `op` again for as long as it fails with `EINTR`.
pub(crate) fn retry_eintr<T>(mut op: impl FnMut() -> Result<T, Errno>) -> Result<T, Errno> {
    loop {
        match op() {
            Err(Errno::EINTR) => {},
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::os::fd::AsFd;
    use std::os::unix::net::UnixListener;

    use super::*;

    #[test]
    fn test_connect_to_listener() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("svc");
        let _listener = UnixListener::bind(&path).unwrap();

        let ops = UnixSocketOps;
        let fd = ops.open().unwrap();
        let addr = UnixAddr::new(&path).unwrap();
        ops.connect(fd.as_fd(), &addr).unwrap();
    }

    #[test]
    fn test_connect_missing_node() {
        let dir = tempfile::tempdir().unwrap();
        let addr = UnixAddr::new(&dir.path().join("missing")).unwrap();

        let ops = UnixSocketOps;
        let fd = ops.open().unwrap();
        let err = ops.connect(fd.as_fd(), &addr).unwrap_err();
        assert_eq!(err, Errno::ENOENT);
    }

    #[test]
    fn test_retry_eintr() {
        let mut calls = 0;
        let result = retry_eintr(|| {
            calls += 1;
            if calls < 3 { Err(Errno::EINTR) } else { Ok(calls) }
        });
        assert_eq!(result, Ok(3));
    }
}
