use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    error::ChannelError,
    types::{ChannelCapabilities, ChannelStatus, MessageId, OutboundMessage},
};

/// A live handle to a message being streamed into a channel, opened by
/// [`Channel::start_stream`].
///
/// On platforms with no native edit-streaming (Telegram), the adapter
/// simulates it by throttling edits to a placeholder message. On platforms
/// that do support it (Slack), `append` debounces native `chat.update` calls.
/// Either way the caller's contract is the same: feed partial text as it
/// becomes available, then call `stop` once with the final text.
#[async_trait]
pub trait StreamHandle: Send {
    /// Forward a partial chunk of the in-progress reply. May be throttled or
    /// dropped by the implementation; never errors, since a missed
    /// intermediate edit isn't worth failing the run over.
    async fn append(&mut self, text: &str);

    /// Finalize the stream. `final_text` replaces whatever partial content
    /// was shown; `None` just closes the handle without posting anything
    /// further (used when the caller will post the final text separately).
    async fn stop(&mut self, final_text: Option<&str>);
}

/// Common interface implemented by every platform adapter (Slack, Telegram, …).
///
/// Implementations must be `Send + Sync` so they can be stored in a
/// [`ChannelManager`](crate::manager::ChannelManager) and driven from
/// multiple Tokio tasks.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Stable lowercase identifier for this channel (e.g. `"telegram"`).
    fn name(&self) -> &str;

    /// What this adapter can do — streaming edits, threads, length limits.
    fn capabilities(&self) -> ChannelCapabilities;

    /// Establish the connection to the external service.
    async fn connect(&mut self) -> Result<(), ChannelError>;

    /// Gracefully close the connection.
    async fn disconnect(&mut self) -> Result<(), ChannelError>;

    /// Deliver a single outbound message to the channel, returning the id
    /// the platform assigned it so a later `update_message` can target it.
    ///
    /// Intentionally `&self` so a connected adapter can send concurrently
    /// without a mutable borrow.
    async fn send(&self, msg: &OutboundMessage) -> Result<MessageId, ChannelError>;

    /// Edit a previously-sent message in place.
    async fn update_message(&self, channel_id: &str, message_id: &MessageId, text: &str) -> Result<(), ChannelError>;

    /// Open a streaming handle for progressively revealing a reply in
    /// `channel_id` (optionally within `thread_id`). See [`StreamHandle`].
    async fn start_stream(
        &self,
        channel_id: &str,
        thread_id: Option<&str>,
    ) -> Result<Box<dyn StreamHandle>, ChannelError>;

    /// Upload `content` as a file attachment named `filename`.
    async fn upload_file(
        &self,
        channel_id: &str,
        content: &[u8],
        filename: &str,
        thread_id: Option<&str>,
    ) -> Result<(), ChannelError>;

    /// Fetch messages posted in `thread_id` after `after`, newest activity
    /// first excluded — used to top up context with messages that arrived
    /// on the platform after the last cached one. Platforms with no native
    /// thread-history API may return an empty vec rather than erroring.
    async fn get_thread_history(
        &self,
        channel_id: &str,
        thread_id: &str,
        after: Option<DateTime<Utc>>,
    ) -> Result<Vec<relay_core::types::ChatMessage>, ChannelError>;

    /// Return the current runtime status without blocking.
    fn status(&self) -> ChannelStatus;
}
