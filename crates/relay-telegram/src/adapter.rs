//! Telegram channel adapter.
//!
//! Wraps a teloxide `Bot` + `Dispatcher` and drives the long-polling event
//! loop. Incoming messages are forwarded to the router over an mpsc channel
//! rather than handled inline, keeping the `Channel` contract symmetric
//! with `relay-slack`.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use teloxide::prelude::*;
use tokio::sync::mpsc;
use tracing::info;

use relay_channels::{Channel, ChannelCapabilities, ChannelError, ChannelStatus, MessageId, OutboundMessage, StreamHandle};
use relay_core::config::TelegramConfig;
use relay_core::types::ChatMessage;

use crate::handler::handle_message;
use crate::send::{send_chunked, StreamingReply, TelegramStreamHandle};

pub struct TelegramAdapter {
    config: TelegramConfig,
    inbound_tx: Arc<mpsc::Sender<ChatMessage>>,
    bot: Mutex<Option<Bot>>,
    status: Mutex<ChannelStatus>,
}

impl TelegramAdapter {
    pub fn new(config: TelegramConfig, inbound_tx: mpsc::Sender<ChatMessage>) -> Self {
        Self {
            config,
            inbound_tx: Arc::new(inbound_tx),
            bot: Mutex::new(None),
            status: Mutex::new(ChannelStatus::Disconnected),
        }
    }
}

#[async_trait]
impl Channel for TelegramAdapter {
    fn name(&self) -> &str {
        "telegram"
    }

    fn capabilities(&self) -> ChannelCapabilities {
        ChannelCapabilities {
            supports_streaming: self.config.stream_mode == relay_core::config::TelegramStreamMode::Edit,
            supports_threads: true,
            max_message_len: 4096,
        }
    }

    async fn connect(&mut self) -> Result<(), ChannelError> {
        if self.config.bot_token.is_empty() {
            return Err(ChannelError::ConfigError(
                "platforms.telegram.bot_token is empty".to_string(),
            ));
        }

        *self.status.lock().unwrap() = ChannelStatus::Connecting;
        let bot = Bot::new(&self.config.bot_token);
        bot.get_me()
            .await
            .map_err(|e| ChannelError::AuthFailed(e.to_string()))?;

        *self.bot.lock().unwrap() = Some(bot.clone());
        *self.status.lock().unwrap() = ChannelStatus::Connected;

        let inbound_tx = self.inbound_tx.clone();
        let status_handle = bot.clone();
        tokio::spawn(async move {
            info!("telegram: starting long-polling dispatcher");
            let handler = Update::filter_message()
                .endpoint(move |bot: Bot, msg: Message| {
                    let inbound_tx = inbound_tx.clone();
                    async move { handle_message(bot, msg, inbound_tx).await }
                });

            Dispatcher::builder(status_handle, handler)
                .default_handler(|_upd| async {})
                .build()
                .dispatch()
                .await;
        });

        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), ChannelError> {
        *self.bot.lock().unwrap() = None;
        *self.status.lock().unwrap() = ChannelStatus::Disconnected;
        Ok(())
    }

    async fn send(&self, msg: &OutboundMessage) -> Result<MessageId, ChannelError> {
        let bot = self.connected_bot()?;

        let chat_id = parse_chat_id(&msg.channel_id)?;
        let thread_id = forum_topic_id(&msg.conversation_id);

        send_chunked(&bot, chat_id, thread_id, &msg.content)
            .await
            .map(|id| id.0.to_string())
            .ok_or_else(|| ChannelError::SendFailed("no chunk was sent successfully".to_string()))
    }

    async fn update_message(&self, channel_id: &str, message_id: &MessageId, text: &str) -> Result<(), ChannelError> {
        let bot = self.connected_bot()?;
        let chat_id = parse_chat_id(channel_id)?;
        let id = teloxide::types::MessageId(
            message_id
                .parse()
                .map_err(|_| ChannelError::SendFailed(format!("invalid telegram message id: {message_id}")))?,
        );
        bot.edit_message_text(chat_id, id, text)
            .await
            .map_err(|e| ChannelError::SendFailed(e.to_string()))?;
        Ok(())
    }

    /// `thread_id` is the conversation id the message came in on (same shape
    /// `forum_topic_id` already parses for plain `send`), not a bare topic
    /// number.
    async fn start_stream(&self, channel_id: &str, thread_id: Option<&str>) -> Result<Box<dyn StreamHandle>, ChannelError> {
        let bot = self.connected_bot()?;
        let chat_id = parse_chat_id(channel_id)?;
        let topic = thread_id.and_then(forum_topic_id);

        let reply = StreamingReply::start(&bot, chat_id, topic, self.config.stream_mode, self.config.edit_interval_ms).await;
        Ok(Box::new(TelegramStreamHandle::new(bot, reply)))
    }

    async fn upload_file(&self, channel_id: &str, content: &[u8], filename: &str, thread_id: Option<&str>) -> Result<(), ChannelError> {
        let bot = self.connected_bot()?;
        let chat_id = parse_chat_id(channel_id)?;
        let file = teloxide::types::InputFile::memory(content.to_vec()).file_name(filename.to_string());

        let mut req = bot.send_document(chat_id, file);
        if let Some(tid) = thread_id.and_then(forum_topic_id) {
            req = req.message_thread_id(tid);
        }
        req.await.map_err(|e| ChannelError::SendFailed(e.to_string()))?;
        Ok(())
    }

    /// Telegram's Bot API exposes no generic "fetch past messages" call, so
    /// this always returns an empty history rather than erroring.
    async fn get_thread_history(
        &self,
        _channel_id: &str,
        _thread_id: &str,
        _after: Option<DateTime<Utc>>,
    ) -> Result<Vec<ChatMessage>, ChannelError> {
        Ok(Vec::new())
    }

    fn status(&self) -> ChannelStatus {
        self.status.lock().unwrap().clone()
    }
}

impl TelegramAdapter {
    fn connected_bot(&self) -> Result<Bot, ChannelError> {
        self.bot
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| ChannelError::SendFailed("telegram adapter not connected".to_string()))
    }
}

fn parse_chat_id(channel_id: &str) -> Result<ChatId, ChannelError> {
    channel_id
        .parse()
        .map(ChatId)
        .map_err(|_| ChannelError::SendFailed(format!("invalid chat id: {channel_id}")))
}

/// Extract the forum-topic thread id from a `telegram:group:{chat}:topic:{id}`
/// conversation id, if present.
fn forum_topic_id(conversation_id: &str) -> Option<teloxide::types::ThreadId> {
    let idx = conversation_id.find(":topic:")?;
    let id: i32 = conversation_id[idx + ":topic:".len()..].parse().ok()?;
    Some(teloxide::types::ThreadId(teloxide::types::MessageId(id)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forum_topic_id_extracts_trailing_number() {
        let id = forum_topic_id("telegram:group:-100123:topic:7").unwrap();
        assert_eq!(id.0 .0, 7);
    }

    #[test]
    fn forum_topic_id_absent_for_plain_group() {
        assert!(forum_topic_id("telegram:group:-100123").is_none());
    }

    #[test]
    fn forum_topic_id_absent_for_dm() {
        assert!(forum_topic_id("telegram:dm:42").is_none());
    }
}
