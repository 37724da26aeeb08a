use std::time::Duration;

use wireprims_frame::DEFAULT_MAX_PAYLOAD;
use wireprims_wire::WireType;

use crate::pauser::PauserMode;

/// Configuration for opening a channel.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Where to connect: `tcp://host:port` or `internal://`.
    pub location: String,
    /// Wire used for outgoing documents. Json is write-only and rejected.
    pub wire_type: WireType,
    /// Hand writes to a background thread.
    pub buffered: bool,
    /// How idle loops wait: the buffered writer and event pumps.
    pub pauser_mode: PauserMode,
    /// Bound on connecting and on waiting for the peer's header.
    pub connection_timeout: Duration,
    /// Longest a read waits before reporting no data.
    pub read_poll: Duration,
    pub max_payload_size: usize,
    /// Recorded in the current message history when a history event is read.
    pub source_id: i32,
    /// Prepend the current message history to each event written.
    pub record_history: bool,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            location: "internal://".to_string(),
            wire_type: WireType::Binary,
            buffered: false,
            pauser_mode: PauserMode::Balanced,
            connection_timeout: Duration::from_secs(5),
            read_poll: Duration::from_millis(20),
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            source_id: 0,
            record_history: false,
        }
    }
}

impl ChannelConfig {
    /// Default configuration for `location`.
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            ..Self::default()
        }
    }
}
