/// Directory holding the listening sockets of every PDX endpoint.
pub const ROOT_ENDPOINT_PATH: &str = "/dev/socket/pdx";

/// Pause before retrying a connect refused with `ECONNREFUSED` or `EACCES`.
pub const DEFAULT_BACKOFF_MS: u64 = 100;

/// Number of `EACCES` connect failures tolerated per connect call.
pub const DEFAULT_MAX_EACCES_RETRIES: u32 = 5;

pub const DEFAULT_WAIT_POLL_INTERVAL_MS: u64 = 10;

/// Linux `SCM_MAX_FD`.
pub const MAX_TRANSFERRED_FDS: usize = 253;

/// Opcodes reserved by the transport. Only `CHANNEL_OPEN` is sent by this crate, the others are
/// reserved wire values that a request header must never reuse for service-defined opcodes.
pub mod opcodes {
    pub const CHANNEL_OPEN: i32 = -1;
    pub const CHANNEL_CLOSE: i32 = -2;
    pub const REPORT_SYSPROP_CHANGE: i32 = -3;
}
