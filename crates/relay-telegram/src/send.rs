//! Outbound delivery to Telegram, including the edit-throttled "simulated
//! streaming" mode.
//!
//! Grounded on `skynet_discord::send::split_chunks` for the chunking shape;
//! the edit-throttle loop itself is new (Telegram has no true token stream
//! from the agent runtime to forward).

use std::time::{Duration, Instant};

use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{MessageId, ThreadId};
use tracing::warn;

use relay_channels::StreamHandle;
use relay_core::config::TelegramStreamMode;

/// Telegram message length limit is 4096; stay well under it.
const TELEGRAM_CHUNK_MAX: usize = 3900;

/// Send `text` in as many chunks as needed, respecting Telegram's length cap.
/// Returns the id of the last chunk actually sent, if any — a single
/// logical [`OutboundMessage`](relay_channels::OutboundMessage) can expand
/// into several physical Telegram messages.
pub async fn send_chunked(bot: &Bot, chat_id: ChatId, thread_id: Option<ThreadId>, text: &str) -> Option<MessageId> {
    let mut last = None;
    for chunk in relay_sanitize::chunk(text, TELEGRAM_CHUNK_MAX) {
        let mut req = bot.send_message(chat_id, chunk);
        if let Some(tid) = thread_id {
            req = req.message_thread_id(tid);
        }
        match req.await {
            Ok(sent) => last = Some(sent.id),
            Err(e) => warn!(error = %e, "telegram: failed to send message"),
        }
    }
    last
}

/// A placeholder message progressively edited as the agent run progresses.
/// Only meaningful under [`TelegramStreamMode::Edit`].
pub struct StreamingReply {
    chat_id: ChatId,
    thread_id: Option<ThreadId>,
    message_id: Option<MessageId>,
    last_edit: Instant,
    interval: Duration,
}

impl StreamingReply {
    /// Post the initial placeholder. No-op handle for modes that don't edit.
    pub async fn start(
        bot: &Bot,
        chat_id: ChatId,
        thread_id: Option<ThreadId>,
        mode: TelegramStreamMode,
        edit_interval_ms: u64,
    ) -> Self {
        let message_id = if mode == TelegramStreamMode::Edit {
            let mut req = bot.send_message(chat_id, "_working…_").parse_mode(teloxide::types::ParseMode::MarkdownV2);
            if let Some(tid) = thread_id {
                req = req.message_thread_id(tid);
            }
            match req.await {
                Ok(sent) => Some(sent.id),
                Err(e) => {
                    warn!(error = %e, "telegram: failed to post placeholder");
                    None
                }
            }
        } else {
            None
        };

        Self {
            chat_id,
            thread_id,
            message_id,
            last_edit: Instant::now(),
            interval: Duration::from_millis(edit_interval_ms),
        }
    }

    /// Update the placeholder with partial progress, subject to the
    /// configured edit interval. Silently does nothing outside edit mode or
    /// if the placeholder failed to post.
    pub async fn update(&mut self, bot: &Bot, partial_text: &str) {
        let Some(message_id) = self.message_id else {
            return;
        };
        if self.last_edit.elapsed() < self.interval {
            return;
        }
        let truncated = relay_sanitize::chunk(partial_text, TELEGRAM_CHUNK_MAX)
            .into_iter()
            .next()
            .unwrap_or_default();
        if bot
            .edit_message_text(self.chat_id, message_id, truncated)
            .await
            .is_ok()
        {
            self.last_edit = Instant::now();
        }
    }

    /// Deliver the final text. If a placeholder exists and the text fits in
    /// one edit, edits it in place; otherwise edits the first chunk and
    /// sends the rest as follow-up messages.
    pub async fn finish(self, bot: &Bot, final_text: &str) {
        let chunks = relay_sanitize::chunk_with_numbering(final_text, TELEGRAM_CHUNK_MAX);
        let mut chunks = chunks.into_iter();

        if let Some(message_id) = self.message_id {
            if let Some(first) = chunks.next() {
                if let Err(e) = bot.edit_message_text(self.chat_id, message_id, first).await {
                    warn!(error = %e, "telegram: failed to finalize placeholder edit");
                }
            }
        } else if let Some(first) = chunks.next() {
            let mut req = bot.send_message(self.chat_id, first);
            if let Some(tid) = self.thread_id {
                req = req.message_thread_id(tid);
            }
            let _ = req.await;
        }

        for chunk in chunks {
            let mut req = bot.send_message(self.chat_id, chunk);
            if let Some(tid) = self.thread_id {
                req = req.message_thread_id(tid);
            }
            let _ = req.await;
        }
    }
}

/// Adapts [`StreamingReply`] to the generic [`StreamHandle`] contract so
/// `relay_router::exec` can drive it without knowing it's talking to
/// Telegram.
pub struct TelegramStreamHandle {
    bot: Bot,
    reply: Option<StreamingReply>,
}

impl TelegramStreamHandle {
    pub fn new(bot: Bot, reply: StreamingReply) -> Self {
        Self {
            bot,
            reply: Some(reply),
        }
    }
}

#[async_trait]
impl StreamHandle for TelegramStreamHandle {
    async fn append(&mut self, text: &str) {
        if let Some(reply) = &mut self.reply {
            reply.update(&self.bot, text).await;
        }
    }

    async fn stop(&mut self, final_text: Option<&str>) {
        let Some(reply) = self.reply.take() else {
            return;
        };
        reply.finish(&self.bot, final_text.unwrap_or("")).await;
    }
}
