use serde::{Deserialize, Serialize};

use relay_core::types::Platform;

/// Platform-native id for a previously-sent message, opaque outside the
/// adapter that issued it. Needed to target a later `update_message` call.
pub type MessageId = String;

/// A message to be delivered to an external channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub platform: Platform,
    pub channel_id: String,
    pub conversation_id: String,
    pub content: String,
    pub format: MessageFormat,
}

/// Formatting hint for outbound message content.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageFormat {
    #[default]
    PlainText,
    Markdown,
    Html,
}

/// Runtime connection state of a channel adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelStatus {
    Connected,
    Connecting,
    Disconnected,
    Error(String),
}

/// What an adapter can do, so the router doesn't have to special-case
/// platforms when deciding how to stream a reply back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelCapabilities {
    /// Supports editing a previously-sent message (simulated streaming).
    pub supports_streaming: bool,
    /// Supports threaded replies tied to a parent message.
    pub supports_threads: bool,
    /// Maximum characters accepted in a single outbound message.
    pub max_message_len: usize,
}
