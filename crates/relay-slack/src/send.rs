//! Outbound delivery to Slack via the Web API `chat.postMessage` call.
//!
//! Grounded on `relay_sanitize::chunk` for the chunking shape (itself lifted
//! from `skynet_discord::send::split_chunks`); Slack has no edit-throttled
//! streaming mode, so there is no `relay_telegram::send::StreamingReply`
//! counterpart here.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use slack_morphism::prelude::*;
use tracing::warn;

use relay_channels::StreamHandle;

/// Conservative chunk size well under Slack's ~40,000-character message cap.
const SLACK_CHUNK_MAX: usize = 3900;

/// Minimum gap between native `chat.update` edits while streaming.
const STREAM_DEBOUNCE: Duration = Duration::from_millis(300);

/// Send `text` in as many `chat.postMessage` calls as needed. Returns the
/// `ts` of the last chunk actually posted, if any.
pub async fn send_chunked(
    client: &Arc<SlackHyperClient>,
    token: &SlackApiToken,
    channel_id: &str,
    thread_ts: Option<&str>,
    text: &str,
) -> Option<String> {
    let session = client.open_session(token);
    let mut last = None;

    for chunk in relay_sanitize::chunk(text, SLACK_CHUNK_MAX) {
        let content = SlackMessageContent::new().with_text(chunk);
        let mut request = SlackApiChatPostMessageRequest::new(channel_id.into(), content);
        if let Some(ts) = thread_ts {
            request = request.with_thread_ts(ts.into());
        }
        match session.chat_post_message(&request).await {
            Ok(resp) => last = Some(resp.ts.to_string()),
            Err(e) => warn!(error = %e, "slack: failed to send message"),
        }
    }
    last
}

/// A message progressively edited in place via `chat.update`, debounced to
/// at most one edit per [`STREAM_DEBOUNCE`].
pub struct SlackStreamHandle {
    client: Arc<SlackHyperClient>,
    token: SlackApiToken,
    channel_id: String,
    thread_ts: Option<String>,
    message_ts: Mutex<Option<String>>,
    last_edit: Mutex<Instant>,
}

impl SlackStreamHandle {
    pub fn new(client: Arc<SlackHyperClient>, token: SlackApiToken, channel_id: String, thread_ts: Option<String>) -> Self {
        Self {
            client,
            token,
            channel_id,
            thread_ts,
            message_ts: Mutex::new(None),
            last_edit: Mutex::new(Instant::now() - STREAM_DEBOUNCE),
        }
    }
}

#[async_trait]
impl StreamHandle for SlackStreamHandle {
    async fn append(&mut self, text: &str) {
        if self.last_edit.lock().unwrap().elapsed() < STREAM_DEBOUNCE {
            return;
        }
        let session = self.client.open_session(&self.token);
        let truncated = relay_sanitize::chunk(text, SLACK_CHUNK_MAX).into_iter().next().unwrap_or_default();

        let existing_ts = self.message_ts.lock().unwrap().clone();
        match existing_ts {
            Some(ts) => {
                let content = SlackMessageContent::new().with_text(truncated);
                let request = SlackApiChatUpdateRequest::new(self.channel_id.as_str().into(), content, ts.as_str().into());
                if session.chat_update(&request).await.is_ok() {
                    *self.last_edit.lock().unwrap() = Instant::now();
                }
            }
            None => {
                let content = SlackMessageContent::new().with_text(truncated);
                let mut request = SlackApiChatPostMessageRequest::new(self.channel_id.as_str().into(), content);
                if let Some(tts) = &self.thread_ts {
                    request = request.with_thread_ts(tts.as_str().into());
                }
                if let Ok(resp) = session.chat_post_message(&request).await {
                    *self.message_ts.lock().unwrap() = Some(resp.ts.to_string());
                    *self.last_edit.lock().unwrap() = Instant::now();
                }
            }
        }
    }

    async fn stop(&mut self, final_text: Option<&str>) {
        let Some(text) = final_text else {
            return;
        };
        let existing_ts = self.message_ts.lock().unwrap().clone();
        match existing_ts {
            Some(ts) => {
                let session = self.client.open_session(&self.token);
                let content = SlackMessageContent::new().with_text(text.to_string());
                let request = SlackApiChatUpdateRequest::new(self.channel_id.as_str().into(), content, ts.as_str().into());
                if let Err(e) = session.chat_update(&request).await {
                    warn!(error = %e, "slack: failed to finalize streamed message");
                }
            }
            None => {
                send_chunked(&self.client, &self.token, &self.channel_id, self.thread_ts.as_deref(), text).await;
            }
        }
    }
}
