//! Event names the channel layer reserves.

/// Metadata event carrying a [`crate::ChannelHeader`].
pub const HEADER: &str = "header";

/// Metadata event carrying a heartbeat timestamp.
pub const TEST_MESSAGE: &str = "testMessage";

/// Payload event carrying the sender's message history.
pub const HISTORY: &str = "history";

/// Returns true if the event name is reserved by the channel layer.
pub fn is_reserved(event: &str) -> bool {
    matches!(event, HEADER | TEST_MESSAGE | HISTORY)
}
