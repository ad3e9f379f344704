use std::path::PathBuf;
use std::time::Duration;

use serde::{
    Deserialize,
    Serialize,
};

use crate::consts::{
    DEFAULT_BACKOFF_MS,
    DEFAULT_MAX_EACCES_RETRIES,
    DEFAULT_WAIT_POLL_INTERVAL_MS,
    ROOT_ENDPOINT_PATH,
};

/// Tunables for [crate::ClientChannelFactory].
///
/// Every field has a default, so the config can be embedded in a larger settings document and
/// partially overridden.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConnectConfig {
    pub backoff_ms: u64,
    pub max_eacces_retries: u32,
    pub wait_poll_interval_ms: u64,
    pub root_path: PathBuf,
}

impl ConnectConfig {
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }

    pub fn wait_poll_interval(&self) -> Duration {
        Duration::from_millis(self.wait_poll_interval_ms)
    }
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            backoff_ms: DEFAULT_BACKOFF_MS,
            max_eacces_retries: DEFAULT_MAX_EACCES_RETRIES,
            wait_poll_interval_ms: DEFAULT_WAIT_POLL_INTERVAL_MS,
            root_path: PathBuf::from(ROOT_ENDPOINT_PATH),
        }
    }
}
