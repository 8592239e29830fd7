//! Centralized configuration for wirelink.
//!
//! Protocol constants live on unit structs; per-link knobs that an embedding
//! application may want to tune are carried by [`LinkOptions`].

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Wire protocol limits.
pub struct WireConfig;

impl WireConfig {
    /// First call id handed out by a fresh link. Lower ids are reserved.
    pub const INITIAL_CALL_ID: i32 = 10_000;
    pub const MAX_PAYLOAD_LEN: usize = 64 * 1024 * 1024; // 64MB
    /// Whole frame, all payloads together.
    pub const MAX_FRAME_LEN: usize = 256 * 1024 * 1024; // 256MB
    pub const MAX_METHOD_NAME_LEN: usize = u16::MAX as usize;
    pub const MAX_ARG_COUNT: usize = u16::MAX as usize;
    pub const READ_CHUNK_SIZE: usize = 8192;
}

/// Deadlines used by links and servers.
pub struct TimeoutConfig;

impl TimeoutConfig {
    pub const CALL_TIMEOUT: Duration = Duration::from_secs(300);
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
    pub const ACCEPT_RETRY_DELAY: Duration = Duration::from_secs(1);
}

/// Link server limits.
pub struct ServerConfig;

impl ServerConfig {
    pub const MAX_CONNECTIONS: usize = 64;
}

/// Runtime options for a single link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkOptions {
    /// Deadline for a synchronous remote call.
    pub call_timeout: Duration,
    /// Largest payload accepted on a single frame argument.
    pub max_payload_len: usize,
    /// Largest frame accepted, header and all payloads together.
    pub max_frame_len: usize,
    /// First call id this link allocates.
    pub initial_call_id: i32,
}

impl Default for LinkOptions {
    fn default() -> Self {
        Self {
            call_timeout: TimeoutConfig::CALL_TIMEOUT,
            max_payload_len: WireConfig::MAX_PAYLOAD_LEN,
            max_frame_len: WireConfig::MAX_FRAME_LEN,
            initial_call_id: WireConfig::INITIAL_CALL_ID,
        }
    }
}

impl LinkOptions {
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_max_payload_len(mut self, len: usize) -> Self {
        self.max_payload_len = len;
        self
    }

    pub fn with_max_frame_len(mut self, len: usize) -> Self {
        self.max_frame_len = len;
        self
    }
}
