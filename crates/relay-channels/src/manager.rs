use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio::time::{sleep, Duration};
use tracing::{error, info, warn};

use crate::{
    channel::{Channel, StreamHandle},
    error::ChannelError,
    types::{ChannelCapabilities, ChannelStatus, MessageId, OutboundMessage},
};

/// Minimum delay between reconnect attempts (seconds).
const BACKOFF_BASE_SECS: u64 = 5;
/// Maximum delay between reconnect attempts (seconds).
const BACKOFF_MAX_SECS: u64 = 300;
/// Maximum number of reconnect attempts before giving up.
const MAX_ATTEMPTS: u32 = 10;
/// Jitter fraction applied to each delay (±10 %).
const JITTER_FRACTION: f64 = 0.10;

/// Manages the set of connected platform adapters.
///
/// Channels are stored by [`Channel::name`] and can be connected,
/// disconnected, or queried as a group. Applies exponential backoff with
/// jitter when a channel's connection attempt fails.
///
/// Backed by a [`tokio::sync::Mutex`] rather than requiring `&mut self` so a
/// single `Arc<ChannelManager>` can live for the whole process: the
/// supervisor calls `connect_all`/`disconnect_all` through the same handle
/// the router and notifier use for `send`/`capabilities`.
#[derive(Default)]
pub struct ChannelManager {
    channels: Mutex<HashMap<String, Box<dyn Channel + Send + Sync>>>,
}

impl ChannelManager {
    pub fn new() -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// Register a channel adapter. Replaces any existing adapter with the
    /// same name.
    pub async fn register(&self, channel: Box<dyn Channel + Send + Sync>) {
        let name = channel.name().to_string();
        info!(channel = %name, "registering channel adapter");
        self.channels.lock().await.insert(name, channel);
    }

    /// Connect all registered channels sequentially, applying backoff with
    /// jitter on failure up to [`MAX_ATTEMPTS`] times per channel.
    pub async fn connect_all(&self) {
        let mut guard = self.channels.lock().await;
        let names: Vec<String> = guard.keys().cloned().collect();
        for name in names {
            info!(channel = %name, "connecting channel");
            let channel = guard.get_mut(&name).unwrap().as_mut();
            if let Err(e) = connect_with_backoff(&name, channel).await {
                error!(channel = %name, error = %e, "failed to connect channel after retries");
            }
        }
    }

    /// Disconnect all registered channels. Errors are logged but do not
    /// abort disconnection of remaining channels.
    pub async fn disconnect_all(&self) {
        let mut guard = self.channels.lock().await;
        let names: Vec<String> = guard.keys().cloned().collect();
        for name in names {
            info!(channel = %name, "disconnecting channel");
            let channel = guard.get_mut(&name).unwrap().as_mut();
            if let Err(e) = channel.disconnect().await {
                warn!(channel = %name, error = %e, "error while disconnecting channel");
            }
        }
    }

    /// Capabilities of the named channel, if registered.
    pub async fn capabilities(&self, name: &str) -> Option<ChannelCapabilities> {
        self.channels.lock().await.get(name).map(|c| c.capabilities())
    }

    /// Deliver `msg` through the named channel. Returns `None` if no adapter
    /// is registered for that name.
    pub async fn send(&self, name: &str, msg: &OutboundMessage) -> Option<Result<MessageId, ChannelError>> {
        let guard = self.channels.lock().await;
        match guard.get(name) {
            Some(channel) => Some(channel.send(msg).await),
            None => None,
        }
    }

    /// Edit a previously-sent message through the named channel.
    pub async fn update_message(
        &self,
        name: &str,
        channel_id: &str,
        message_id: &MessageId,
        text: &str,
    ) -> Option<Result<(), ChannelError>> {
        let guard = self.channels.lock().await;
        match guard.get(name) {
            Some(channel) => Some(channel.update_message(channel_id, message_id, text).await),
            None => None,
        }
    }

    /// Open a streaming handle through the named channel.
    pub async fn start_stream(
        &self,
        name: &str,
        channel_id: &str,
        thread_id: Option<&str>,
    ) -> Option<Result<Box<dyn StreamHandle>, ChannelError>> {
        let guard = self.channels.lock().await;
        match guard.get(name) {
            Some(channel) => Some(channel.start_stream(channel_id, thread_id).await),
            None => None,
        }
    }

    /// Upload a file attachment through the named channel.
    pub async fn upload_file(
        &self,
        name: &str,
        channel_id: &str,
        content: &[u8],
        filename: &str,
        thread_id: Option<&str>,
    ) -> Option<Result<(), ChannelError>> {
        let guard = self.channels.lock().await;
        match guard.get(name) {
            Some(channel) => Some(channel.upload_file(channel_id, content, filename, thread_id).await),
            None => None,
        }
    }

    /// Fetch thread history through the named channel.
    pub async fn get_thread_history(
        &self,
        name: &str,
        channel_id: &str,
        thread_id: &str,
        after: Option<DateTime<Utc>>,
    ) -> Option<Result<Vec<relay_core::types::ChatMessage>, ChannelError>> {
        let guard = self.channels.lock().await;
        match guard.get(name) {
            Some(channel) => Some(channel.get_thread_history(channel_id, thread_id, after).await),
            None => None,
        }
    }

    pub async fn status(&self, name: &str) -> Option<ChannelStatus> {
        self.channels.lock().await.get(name).map(|c| c.status())
    }

    /// Current [`ChannelStatus`] for every registered channel, sorted by
    /// name for deterministic output.
    pub async fn statuses(&self) -> Vec<(String, ChannelStatus)> {
        let mut result: Vec<(String, ChannelStatus)> = self
            .channels
            .lock()
            .await
            .iter()
            .map(|(name, ch)| (name.clone(), ch.status()))
            .collect();
        result.sort_by(|a, b| a.0.cmp(&b.0));
        result
    }
}

/// Attempt to connect a single channel with exponential backoff and ±10%
/// jitter. Schedule: 5s → 10s → 20s → … → 300s (cap), up to
/// [`MAX_ATTEMPTS`] tries.
async fn connect_with_backoff(name: &str, channel: &mut dyn Channel) -> Result<(), ChannelError> {
    let mut delay_secs = BACKOFF_BASE_SECS;

    for attempt in 1..=MAX_ATTEMPTS {
        match channel.connect().await {
            Ok(()) => {
                info!(channel = %name, attempt, "channel connected successfully");
                return Ok(());
            }
            Err(e) if attempt == MAX_ATTEMPTS => {
                return Err(e);
            }
            Err(e) => {
                let jitter = jitter_secs(delay_secs);
                let total = delay_secs + jitter;
                warn!(
                    channel = %name,
                    attempt,
                    max = MAX_ATTEMPTS,
                    error = %e,
                    retry_after_secs = total,
                    "channel connect failed, retrying with backoff"
                );
                sleep(Duration::from_secs(total)).await;
                delay_secs = (delay_secs * 2).min(BACKOFF_MAX_SECS);
            }
        }
    }

    unreachable!("backoff loop exited without returning")
}

/// Jitter offset (0 … `JITTER_FRACTION * base_secs`) as integer seconds.
///
/// Derived from the current monotonic timestamp rather than a `rand`
/// dependency.
fn jitter_secs(base_secs: u64) -> u64 {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);

    let max_jitter = ((base_secs as f64) * JITTER_FRACTION) as u64;
    if max_jitter == 0 {
        return 0;
    }
    (nanos as u64) % max_jitter
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChannelCapabilities, MessageFormat, OutboundMessage};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct FlakyChannel {
        name: String,
        attempts: Arc<AtomicUsize>,
        succeed_on: usize,
        status: ChannelStatus,
    }

    #[async_trait]
    impl Channel for FlakyChannel {
        fn name(&self) -> &str {
            &self.name
        }

        fn capabilities(&self) -> ChannelCapabilities {
            ChannelCapabilities {
                supports_streaming: false,
                supports_threads: false,
                max_message_len: 4000,
            }
        }

        async fn connect(&mut self) -> Result<(), ChannelError> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt >= self.succeed_on {
                self.status = ChannelStatus::Connected;
                Ok(())
            } else {
                Err(ChannelError::ConnectionFailed("not yet".into()))
            }
        }

        async fn disconnect(&mut self) -> Result<(), ChannelError> {
            self.status = ChannelStatus::Disconnected;
            Ok(())
        }

        async fn send(&self, _msg: &OutboundMessage) -> Result<String, ChannelError> {
            Ok("msg-1".to_string())
        }

        async fn update_message(&self, _channel_id: &str, _message_id: &String, _text: &str) -> Result<(), ChannelError> {
            Ok(())
        }

        async fn start_stream(
            &self,
            _channel_id: &str,
            _thread_id: Option<&str>,
        ) -> Result<Box<dyn crate::channel::StreamHandle>, ChannelError> {
            Err(ChannelError::ConfigError("FlakyChannel does not support streaming".into()))
        }

        async fn upload_file(
            &self,
            _channel_id: &str,
            _content: &[u8],
            _filename: &str,
            _thread_id: Option<&str>,
        ) -> Result<(), ChannelError> {
            Ok(())
        }

        async fn get_thread_history(
            &self,
            _channel_id: &str,
            _thread_id: &str,
            _after: Option<chrono::DateTime<chrono::Utc>>,
        ) -> Result<Vec<relay_core::types::ChatMessage>, ChannelError> {
            Ok(Vec::new())
        }

        fn status(&self) -> ChannelStatus {
            self.status.clone()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn connect_all_retries_until_success() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let manager = ChannelManager::new();
        manager
            .register(Box::new(FlakyChannel {
                name: "test".into(),
                attempts: attempts.clone(),
                succeed_on: 3,
                status: ChannelStatus::Disconnected,
            }))
            .await;

        let manager = Arc::new(manager);
        let handle = tokio::spawn({
            let manager = manager.clone();
            async move {
                manager.connect_all().await;
            }
        });
        tokio::time::advance(Duration::from_secs(3600)).await;
        handle.await.unwrap();

        assert_eq!(manager.status("test").await, Some(ChannelStatus::Connected));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn statuses_are_sorted_by_name() {
        let manager = ChannelManager::new();
        assert!(manager.statuses().await.is_empty());
    }
}
