//! Slack push-event handling, shared by both the Socket Mode and HTTP
//! ingress paths.
//!
//! Converts `message`/`app_mention` events into normalized [`ChatMessage`]s
//! and forwards them to the router over `inbound_tx`. All allowlisting,
//! binding lookups, and reply generation live in `relay-router` — this
//! adapter only translates wire format, mirroring `relay-telegram::handler`.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use slack_morphism::prelude::*;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use relay_core::types::{ChatMessage, Platform};

use crate::dedupe::RetryDedup;
use crate::names::DisplayNameCache;
use crate::session::conversation_id;

/// State handed to Socket Mode callbacks via `with_user_state`, and
/// constructed directly by the HTTP ingress path.
#[derive(Clone)]
pub struct SlackBridgeState {
    pub inbound_tx: Arc<mpsc::Sender<ChatMessage>>,
    pub bot_user_id: String,
    pub dedup: Arc<RetryDedup>,
    pub names: Arc<DisplayNameCache>,
    /// Unix timestamp of the last push event seen, polled by the adapter's
    /// idle watchdog.
    pub last_event: Arc<AtomicI64>,
}

pub async fn handle_push_event(bridge: &SlackBridgeState, event: SlackPushEventCallback) {
    bridge.last_event.store(Utc::now().timestamp(), Ordering::Relaxed);

    let event_id = event.event_id.to_string();
    if !bridge.dedup.first_delivery(&event_id) {
        debug!(event_id, "slack: dropping redelivered event");
        return;
    }

    match event.event {
        SlackEventCallbackBody::Message(msg_event) => {
            handle_message_event(bridge, &msg_event).await;
        }
        SlackEventCallbackBody::AppMention(mention_event) => {
            handle_mention_event(bridge, &mention_event).await;
        }
        _ => {}
    }
}

async fn handle_message_event(bridge: &SlackBridgeState, msg_event: &SlackMessageEvent) {
    // Ignore every bot-authored message, not just our own replies — avoids
    // bot-to-bot reply loops as well as re-processing our own posts.
    if msg_event.sender.bot_id.is_some() {
        return;
    }

    let Some(user) = &msg_event.sender.user else {
        return;
    };
    let user_id = user.to_string();
    if user_id == bridge.bot_user_id {
        return;
    }

    let Some(channel) = &msg_event.origin.channel else {
        return;
    };
    let channel_id = channel.to_string();

    let text = msg_event
        .content
        .as_ref()
        .and_then(|c| c.text.as_ref())
        .map(|t| t.to_string())
        .unwrap_or_default();
    if text.is_empty() {
        return;
    }

    let thread_ts = msg_event.origin.thread_ts.as_ref().map(|ts| ts.to_string());
    let ts = msg_event.origin.ts.to_string();

    let user_name = match &msg_event.sender.username {
        Some(name) => name.to_string(),
        None => bridge.names.resolve(&user_id).await,
    };

    let chat_message = ChatMessage {
        platform: Platform::Slack,
        channel_id: channel_id.clone(),
        conversation_id: conversation_id(&channel_id, thread_ts.as_deref()),
        message_id: ts.clone(),
        user_id,
        user_name,
        text,
        timestamp: parse_slack_ts(&ts),
        is_bot: false,
    };

    send(bridge, chat_message).await;
}

async fn handle_mention_event(bridge: &SlackBridgeState, mention_event: &SlackAppMentionEvent) {
    let user_id = mention_event.user.to_string();
    if user_id == bridge.bot_user_id {
        return;
    }

    let channel_id = mention_event.channel.to_string();
    let text = mention_event
        .content
        .text
        .as_ref()
        .map(|t| t.to_string())
        .unwrap_or_default();
    let thread_ts = mention_event
        .origin
        .thread_ts
        .as_ref()
        .map(|ts| ts.to_string());
    let ts = mention_event.origin.ts.to_string();
    let user_name = bridge.names.resolve(&user_id).await;

    let chat_message = ChatMessage {
        platform: Platform::Slack,
        channel_id: channel_id.clone(),
        conversation_id: conversation_id(&channel_id, thread_ts.as_deref()),
        message_id: ts.clone(),
        user_id,
        user_name,
        text,
        timestamp: parse_slack_ts(&ts),
        is_bot: false,
    };

    send(bridge, chat_message).await;
}

async fn send(bridge: &SlackBridgeState, chat_message: ChatMessage) {
    if bridge.inbound_tx.send(chat_message).await.is_err() {
        warn!("slack: inbound channel closed, dropping message");
    }
}

/// Slack timestamps are `{seconds}.{microseconds}` strings; fall back to
/// "now" rather than dropping the message if parsing ever fails.
pub(crate) fn parse_slack_ts(ts: &str) -> DateTime<Utc> {
    ts.split('.')
        .next()
        .and_then(|secs| secs.parse::<i64>().ok())
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_slack_ts_extracts_seconds() {
        let dt = parse_slack_ts("1700000000.000100");
        assert_eq!(dt.timestamp(), 1_700_000_000);
    }

    #[test]
    fn parse_slack_ts_falls_back_on_garbage() {
        let before = Utc::now();
        let dt = parse_slack_ts("not-a-timestamp");
        assert!(dt >= before);
    }
}
