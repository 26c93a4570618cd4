//! Client settings sent in the handshake and used to pace the session.

use facnet_net::{ModId, Version};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Settings for one client instance.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Player name presented to the server.
    pub player_name: String,
    /// Server password, sent verbatim.
    pub password: String,
    /// Checksum of the core mod.
    pub core_checksum: u32,
    /// Checksum of the prototype list.
    pub prototype_list_checksum: u32,
    /// Mods reported as active.
    pub active_mods: Vec<ModId>,
    /// Game version announced in the connection request.
    pub game_version: Version,
    /// Heartbeat period in microseconds.
    pub heartbeat_interval_us: u64,
    /// How long `connect` waits for the join before giving up.
    pub connect_timeout_ms: u64,
    /// Message bodies above this size are fragmented.
    pub max_fragment_payload: usize,
    /// Sent heartbeats kept for resend requests.
    pub heartbeat_history: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            player_name: "player".to_string(),
            password: String::new(),
            core_checksum: 0,
            prototype_list_checksum: 0,
            active_mods: Vec::new(),
            game_version: Version::default(),
            // 60 Hz
            heartbeat_interval_us: 16_667,
            connect_timeout_ms: 10_000,
            max_fragment_payload: facnet_net::DEFAULT_MAX_FRAGMENT_PAYLOAD,
            heartbeat_history: 64,
        }
    }
}

impl ClientConfig {
    /// Heartbeat period, never shorter than one millisecond.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_micros(self.heartbeat_interval_us.max(1_000))
    }

    /// Deadline for `connect`.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}
