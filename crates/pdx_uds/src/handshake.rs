//! The `CHANNEL_OPEN` exchange performed on a freshly connected socket.

use std::io::IoSliceMut;
use std::os::fd::{
    AsFd,
    AsRawFd,
    BorrowedFd,
    FromRawFd,
    OwnedFd,
    RawFd,
};

use cfg_if::cfg_if;
use nix::errno::Errno;
use nix::sys::socket::{
    self,
    ControlMessageOwned,
    MsgFlags,
};
use tracing::{
    debug,
    error,
    trace,
    warn,
};

use crate::consts::MAX_TRANSFERRED_FDS;
use crate::protocol::{
    RESPONSE_HEADER_LEN,
    RequestHeader,
    ResponseHeader,
};
use crate::socket::retry_eintr;
use crate::{
    Error,
    ProtocolViolation,
};

cfg_if! {
    if #[cfg(any(target_os = "linux", target_os = "android"))] {
        const SEND_FLAGS: MsgFlags = MsgFlags::MSG_NOSIGNAL;
        const RECV_FLAGS: MsgFlags = MsgFlags::MSG_CMSG_CLOEXEC;
    } else {
        const SEND_FLAGS: MsgFlags = MsgFlags::empty();
        const RECV_FLAGS: MsgFlags = MsgFlags::empty();
    }
}

/// A received response header together with the descriptors transferred alongside it.
///
/// Descriptors are owned by the response until extracted, dropping the response closes every
/// descriptor still held.
#[derive(Debug)]
pub struct HandshakeResponse {
    pub header: ResponseHeader,
    descriptors: Vec<OwnedFd>,
}

impl HandshakeResponse {
    pub fn new(header: ResponseHeader, descriptors: Vec<OwnedFd>) -> Self {
        Self { header, descriptors }
    }

    pub fn ret_code(&self) -> i32 {
        self.header.ret_code
    }

    pub fn descriptors(&self) -> &[OwnedFd] {
        &self.descriptors
    }

    /// Takes the event descriptor selected by the return code.
    ///
    /// A negative return code is not distinguished from an out-of-range index, both are
    /// protocol violations.
    pub fn into_event_descriptor(self) -> Result<OwnedFd, ProtocolViolation> {
        let count = self.descriptors.len();
        let violation = ProtocolViolation::InvalidDescriptorIndex {
            ret_code: self.header.ret_code,
            descriptors: count,
        };
        match usize::try_from(self.header.ret_code) {
            // Remaining descriptors are dropped, and closed, with the iterator.
            Ok(index) if index < count => self.descriptors.into_iter().nth(index).ok_or(violation),
            _ => Err(violation),
        }
    }
}

/// Writes `request` to `socket` in full.
pub fn send_request(socket: BorrowedFd<'_>, request: &RequestHeader) -> Result<(), Errno> {
    let frame = request.encode();
    let mut sent = 0;
    while sent < frame.len() {
        sent += retry_eintr(|| socket::send(socket.as_raw_fd(), &frame[sent..], SEND_FLAGS))?;
    }
    Ok(())
}

/// Reads one response header from `socket`, collecting any transferred descriptors.
pub fn recv_response(socket: BorrowedFd<'_>) -> crate::Result<HandshakeResponse> {
    let raw = socket.as_raw_fd();
    let mut buf = [0u8; RESPONSE_HEADER_LEN];
    let mut cmsg_buf = nix::cmsg_space!([RawFd; MAX_TRANSFERRED_FDS]);

    let (mut received, descriptors, control_truncated) = loop {
        let mut iov = [IoSliceMut::new(&mut buf)];
        match socket::recvmsg::<()>(raw, &mut iov, Some(&mut cmsg_buf), RECV_FLAGS) {
            Ok(msg) => {
                let mut descriptors = Vec::new();
                let mut control_truncated = msg.flags.contains(MsgFlags::MSG_CTRUNC);
                match msg.cmsgs() {
                    Ok(cmsgs) => {
                        for cmsg in cmsgs {
                            if let ControlMessageOwned::ScmRights(fds) = cmsg {
                                // SAFETY: descriptors delivered through SCM_RIGHTS are freshly
                                // installed in this process and owned by nobody else.
                                descriptors.extend(fds.into_iter().map(|fd| unsafe { OwnedFd::from_raw_fd(fd) }));
                            }
                        }
                    },
                    Err(_) => control_truncated = true,
                }
                break (msg.bytes, descriptors, control_truncated);
            },
            Err(Errno::EINTR) => {},
            Err(errno) => return Err(Error::Io(errno)),
        }
    };

    if control_truncated {
        warn!(received = descriptors.len(), "Transferred descriptors were truncated");
        return Err(Error::Io(Errno::EMSGSIZE));
    }

    while received < RESPONSE_HEADER_LEN {
        trace!(received, "Short read of response header");
        let n = retry_eintr(|| socket::recv(raw, &mut buf[received..], MsgFlags::empty())).map_err(Error::Io)?;
        if n == 0 {
            break;
        }
        received += n;
    }

    if received < RESPONSE_HEADER_LEN {
        warn!(received, "Peer closed the stream before the response header was complete");
        return Err(Error::Io(Errno::ESHUTDOWN));
    }

    let header = ResponseHeader::decode(&buf).map_err(|violation| {
        warn!(%violation, "Malformed response header");
        Error::Io(Errno::EIO)
    })?;
    Ok(HandshakeResponse::new(header, descriptors))
}

/// Performs the `CHANNEL_OPEN` exchange on a connected socket.
///
/// Returns the socket together with the event descriptor chosen by the peer. On failure the
/// socket, and every descriptor received, is closed before returning.
pub fn open_channel(socket: OwnedFd) -> crate::Result<(OwnedFd, OwnedFd)> {
    let request = RequestHeader::channel_open();
    if let Err(errno) = send_request(socket.as_fd(), &request) {
        error!(%errno, "Failed to send channel open request");
        return Err(Error::Io(errno));
    }

    let response = match recv_response(socket.as_fd()) {
        Ok(response) => response,
        Err(err) => {
            error!(%err, "Failed to receive channel open response");
            return Err(err);
        },
    };

    let ret_code = response.ret_code();
    let descriptors = response.descriptors().len();
    match response.into_event_descriptor() {
        Ok(event_fd) => {
            debug!(ret_code, descriptors, "Channel open handshake complete");
            Ok((socket, event_fd))
        },
        Err(violation) => {
            error!(%violation, "Invalid channel open response");
            Err(violation.into())
        },
    }
}
