//! Fixed-size frames exchanged while opening a channel.
//!
//! All fields are little-endian. A request is followed by no payload and carries no descriptors.
//! A response carries its descriptors as `SCM_RIGHTS` ancillary data on the same message.

use bytes::{
    Buf,
    BufMut,
};

use crate::ProtocolViolation;
use crate::consts::opcodes;

/// `"PDX?"` read as a little-endian `u32`.
pub const FRAME_MAGIC: u32 = 0x3f58_4450;

pub const REQUEST_HEADER_LEN: usize = 24;
pub const RESPONSE_HEADER_LEN: usize = 12;

const FLAG_IMPULSE: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestHeader {
    pub opcode: i32,
    pub send_len: u32,
    pub max_recv_len: u32,
    pub fd_count: u32,
    /// Fire-and-forget message, the peer sends no response.
    pub is_impulse: bool,
}

impl RequestHeader {
    pub fn new(opcode: i32, send_len: u32, max_recv_len: u32, is_impulse: bool) -> Self {
        Self {
            opcode,
            send_len,
            max_recv_len,
            fd_count: 0,
            is_impulse,
        }
    }

    pub fn channel_open() -> Self {
        Self::new(opcodes::CHANNEL_OPEN, 0, 0, false)
    }

    pub fn encode(&self) -> [u8; REQUEST_HEADER_LEN] {
        let mut out = [0u8; REQUEST_HEADER_LEN];
        let mut buf = &mut out[..];
        buf.put_u32_le(FRAME_MAGIC);
        buf.put_i32_le(self.opcode);
        buf.put_u32_le(self.send_len);
        buf.put_u32_le(self.max_recv_len);
        buf.put_u32_le(self.fd_count);
        buf.put_u32_le(if self.is_impulse { FLAG_IMPULSE } else { 0 });
        out
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self, ProtocolViolation> {
        if buf.len() < REQUEST_HEADER_LEN {
            return Err(ProtocolViolation::Truncated {
                expected: REQUEST_HEADER_LEN,
                received: buf.len(),
            });
        }
        let magic = buf.get_u32_le();
        if magic != FRAME_MAGIC {
            return Err(ProtocolViolation::BadMagic(magic));
        }
        Ok(Self {
            opcode: buf.get_i32_le(),
            send_len: buf.get_u32_le(),
            max_recv_len: buf.get_u32_le(),
            fd_count: buf.get_u32_le(),
            is_impulse: buf.get_u32_le() & FLAG_IMPULSE != 0,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseHeader {
    /// Status of the request. For `CHANNEL_OPEN`, the index of the event descriptor among the
    /// transferred descriptors.
    pub ret_code: i32,
    pub recv_len: u32,
}

impl ResponseHeader {
    pub fn new(ret_code: i32) -> Self {
        Self { ret_code, recv_len: 0 }
    }

    pub fn encode(&self) -> [u8; RESPONSE_HEADER_LEN] {
        let mut out = [0u8; RESPONSE_HEADER_LEN];
        let mut buf = &mut out[..];
        buf.put_u32_le(FRAME_MAGIC);
        buf.put_i32_le(self.ret_code);
        buf.put_u32_le(self.recv_len);
        out
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self, ProtocolViolation> {
        if buf.len() < RESPONSE_HEADER_LEN {
            return Err(ProtocolViolation::Truncated {
                expected: RESPONSE_HEADER_LEN,
                received: buf.len(),
            });
        }
        let magic = buf.get_u32_le();
        if magic != FRAME_MAGIC {
            return Err(ProtocolViolation::BadMagic(magic));
        }
        Ok(Self {
            ret_code: buf.get_i32_le(),
            recv_len: buf.get_u32_le(),
        })
    }
}
