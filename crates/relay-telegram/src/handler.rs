//! Telegram message handler registered in the teloxide Dispatcher.
//!
//! Converts every incoming `Message` into a normalized [`ChatMessage`] and
//! forwards it to the router over `inbound_tx`. All allowlisting, binding
//! lookups, and reply generation live in `relay-router` — this adapter only
//! translates wire format.

use std::sync::Arc;

use chrono::Utc;
use teloxide::prelude::*;
use tokio::sync::mpsc;
use tracing::warn;

use relay_core::types::{ChatMessage, Platform};

use crate::session::conversation_id;

pub async fn handle_message(
    _bot: Bot,
    msg: Message,
    inbound_tx: Arc<mpsc::Sender<ChatMessage>>,
) -> ResponseResult<()> {
    let Some(from) = msg.from.as_ref() else {
        return Ok(());
    };
    if from.is_bot {
        return Ok(());
    }

    let text = msg.text().or(msg.caption()).unwrap_or("").to_string();
    if text.is_empty() {
        return Ok(());
    }

    let chat_message = ChatMessage {
        platform: Platform::Telegram,
        channel_id: msg.chat.id.0.to_string(),
        conversation_id: conversation_id(&msg),
        message_id: msg.id.0.to_string(),
        user_id: from.id.0.to_string(),
        user_name: from
            .username
            .clone()
            .unwrap_or_else(|| from.first_name.clone()),
        text,
        timestamp: Utc::now(),
        is_bot: false,
    };

    if inbound_tx.send(chat_message).await.is_err() {
        warn!("telegram: inbound channel closed, dropping message");
    }

    Ok(())
}
