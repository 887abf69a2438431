//! Slack channel adapter.
//!
//! Socket Mode (the default, grounded on
//! `2389-research-gorp-rs::platform::slack`) opens a persistent websocket and
//! needs no inbound network exposure. HTTP mode stands up an `axum` listener
//! for the classic Events API, verifying the `X-Slack-Signature` HMAC the
//! same way `skynet_gateway::http::webhooks::verify_hmac_sha256` verifies
//! GitHub's `X-Hub-Signature-256`.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::post,
    Json, Router,
};
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use slack_morphism::prelude::*;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use relay_channels::{Channel, ChannelCapabilities, ChannelError, ChannelStatus, MessageId, OutboundMessage, StreamHandle};
use relay_core::config::{SlackConfig, SlackMode};
use relay_core::types::ChatMessage;

use crate::dedupe::RetryDedup;
use crate::handler::{handle_push_event, SlackBridgeState};
use crate::names::DisplayNameCache;
use crate::send::{send_chunked, SlackStreamHandle};
use crate::session::{conversation_id, thread_ts_of};

type HmacSha256 = Hmac<Sha256>;

/// How long a Socket Mode connection may go without an inbound event before
/// the watchdog forces a reconnect.
const WATCHDOG_IDLE_TIMEOUT: Duration = Duration::from_secs(90);
const WATCHDOG_POLL_INTERVAL: Duration = Duration::from_secs(10);
const WATCHDOG_BACKOFF_BASE: Duration = Duration::from_secs(1);
const WATCHDOG_BACKOFF_MAX: Duration = Duration::from_secs(30);

pub struct SlackAdapter {
    config: SlackConfig,
    inbound_tx: Arc<mpsc::Sender<ChatMessage>>,
    client: Arc<SlackHyperClient>,
    bot_token: SlackApiToken,
    bot_user_id: Mutex<Option<String>>,
    status: Mutex<ChannelStatus>,
    dedup: Arc<RetryDedup>,
    names: Arc<DisplayNameCache>,
    last_event: Arc<AtomicI64>,
    socket_handle: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl SlackAdapter {
    pub fn new(
        config: SlackConfig,
        inbound_tx: mpsc::Sender<ChatMessage>,
    ) -> Result<Self, ChannelError> {
        let connector = SlackClientHyperConnector::new()
            .map_err(|e| ChannelError::ConfigError(format!("slack http connector: {e}")))?;
        let bot_token = SlackApiToken::new(SlackApiTokenValue(config.bot_token.clone()));
        let client = Arc::new(SlackClient::new(connector));
        let names = Arc::new(DisplayNameCache::new(client.clone(), bot_token.clone()));
        Ok(Self {
            config,
            inbound_tx: Arc::new(inbound_tx),
            client,
            bot_token,
            bot_user_id: Mutex::new(None),
            status: Mutex::new(ChannelStatus::Disconnected),
            dedup: Arc::new(RetryDedup::new()),
            names,
            last_event: Arc::new(AtomicI64::new(Utc::now().timestamp())),
            socket_handle: Arc::new(Mutex::new(None)),
        })
    }

    fn bridge_state(&self) -> SlackBridgeState {
        SlackBridgeState {
            inbound_tx: self.inbound_tx.clone(),
            bot_user_id: self
                .bot_user_id
                .lock()
                .unwrap()
                .clone()
                .unwrap_or_default(),
            dedup: self.dedup.clone(),
            names: self.names.clone(),
            last_event: self.last_event.clone(),
        }
    }

    async fn start_socket_mode(&self) -> Result<(), ChannelError> {
        let app_token = SlackApiToken::new(SlackApiTokenValue(self.config.app_token.clone()));
        let handle = spawn_socket_listener(self.client.clone(), app_token.clone(), self.bridge_state());

        if let Some(old) = self.socket_handle.lock().unwrap().replace(handle) {
            old.abort();
        }
        self.last_event.store(Utc::now().timestamp(), Ordering::Relaxed);
        self.spawn_watchdog(app_token);

        Ok(())
    }

    /// Force a Socket Mode reconnect whenever [`WATCHDOG_IDLE_TIMEOUT`]
    /// passes with no inbound event, backing off up to
    /// [`WATCHDOG_BACKOFF_MAX`] between attempts. Abandoned connections
    /// (the listener thinks it's alive but nothing is arriving) don't
    /// surface as a socket error, so this is the only thing watching for
    /// them.
    fn spawn_watchdog(&self, app_token: SlackApiToken) {
        let last_event = self.last_event.clone();
        let client = self.client.clone();
        let bridge_state = self.bridge_state();
        let socket_handle = self.socket_handle.clone();

        tokio::spawn(async move {
            let mut backoff = WATCHDOG_BACKOFF_BASE;
            loop {
                tokio::time::sleep(WATCHDOG_POLL_INTERVAL).await;
                let idle = Utc::now().timestamp() - last_event.load(Ordering::Relaxed);
                if idle < WATCHDOG_IDLE_TIMEOUT.as_secs() as i64 {
                    backoff = WATCHDOG_BACKOFF_BASE;
                    continue;
                }

                warn!(idle_secs = idle, "slack: socket mode idle watchdog forcing reconnect");
                if let Some(old) = socket_handle.lock().unwrap().take() {
                    old.abort();
                }

                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(WATCHDOG_BACKOFF_MAX);

                let new_handle = spawn_socket_listener(client.clone(), app_token.clone(), bridge_state.clone());
                *socket_handle.lock().unwrap() = Some(new_handle);
                last_event.store(Utc::now().timestamp(), Ordering::Relaxed);
            }
        });
    }

    async fn start_http_mode(&self) -> Result<(), ChannelError> {
        let bridge_state = self.bridge_state();
        let http_state = Arc::new(HttpState {
            bridge: bridge_state,
            signing_secret: self.config.signing_secret.clone(),
        });
        let port = self.config.port;

        let app = Router::new()
            .route("/slack/events", post(events_handler))
            .with_state(http_state);

        let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
            .await
            .map_err(|e| ChannelError::ConnectionFailed(e.to_string()))?;

        tokio::spawn(async move {
            info!(port, "slack: http events listener starting");
            if let Err(e) = axum::serve(listener, app).await {
                error!(error = %e, "slack: http listener exited");
            }
        });

        Ok(())
    }
}

#[async_trait]
impl Channel for SlackAdapter {
    fn name(&self) -> &str {
        "slack"
    }

    fn capabilities(&self) -> ChannelCapabilities {
        ChannelCapabilities {
            supports_streaming: true,
            supports_threads: true,
            max_message_len: 40_000,
        }
    }

    async fn connect(&mut self) -> Result<(), ChannelError> {
        if self.config.bot_token.is_empty() {
            return Err(ChannelError::ConfigError(
                "platforms.slack.bot_token is empty".to_string(),
            ));
        }
        if self.config.mode == SlackMode::Socket && self.config.app_token.is_empty() {
            return Err(ChannelError::ConfigError(
                "platforms.slack.app_token is required in socket mode".to_string(),
            ));
        }
        if self.config.mode == SlackMode::Http && self.config.signing_secret.is_empty() {
            return Err(ChannelError::ConfigError(
                "platforms.slack.signing_secret is required in http mode".to_string(),
            ));
        }

        *self.status.lock().unwrap() = ChannelStatus::Connecting;

        let session = self.client.open_session(&self.bot_token);
        let auth = session
            .auth_test()
            .await
            .map_err(|e| ChannelError::AuthFailed(e.to_string()))?;
        *self.bot_user_id.lock().unwrap() = Some(auth.user_id.to_string());

        match self.config.mode {
            SlackMode::Socket => self.start_socket_mode().await?,
            SlackMode::Http => self.start_http_mode().await?,
        }

        *self.status.lock().unwrap() = ChannelStatus::Connected;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), ChannelError> {
        *self.status.lock().unwrap() = ChannelStatus::Disconnected;
        Ok(())
    }

    async fn send(&self, msg: &OutboundMessage) -> Result<MessageId, ChannelError> {
        let thread_ts = thread_ts_of(&msg.conversation_id);
        send_chunked(&self.client, &self.bot_token, &msg.channel_id, thread_ts, &msg.content)
            .await
            .ok_or_else(|| ChannelError::SendFailed("no chunk was posted successfully".to_string()))
    }

    async fn update_message(&self, channel_id: &str, message_id: &MessageId, text: &str) -> Result<(), ChannelError> {
        let session = self.client.open_session(&self.bot_token);
        let content = SlackMessageContent::new().with_text(text.to_string());
        let request = SlackApiChatUpdateRequest::new(channel_id.into(), content, message_id.as_str().into());
        session
            .chat_update(&request)
            .await
            .map_err(|e| ChannelError::SendFailed(e.to_string()))?;
        Ok(())
    }

    async fn start_stream(&self, channel_id: &str, thread_id: Option<&str>) -> Result<Box<dyn StreamHandle>, ChannelError> {
        Ok(Box::new(SlackStreamHandle::new(
            self.client.clone(),
            self.bot_token.clone(),
            channel_id.to_string(),
            thread_id.map(|s| s.to_string()),
        )))
    }

    async fn upload_file(&self, channel_id: &str, content: &[u8], filename: &str, thread_id: Option<&str>) -> Result<(), ChannelError> {
        let session = self.client.open_session(&self.bot_token);
        let mut request = SlackApiFilesUploadRequest::new()
            .with_channels(vec![channel_id.into()])
            .with_filename(filename.to_string())
            .with_file(content.to_vec());
        if let Some(ts) = thread_id {
            request = request.with_thread_ts(ts.into());
        }
        session
            .files_upload(&request)
            .await
            .map_err(|e| ChannelError::SendFailed(e.to_string()))?;
        Ok(())
    }

    async fn get_thread_history(
        &self,
        channel_id: &str,
        thread_id: &str,
        after: Option<chrono::DateTime<Utc>>,
    ) -> Result<Vec<ChatMessage>, ChannelError> {
        let session = self.client.open_session(&self.bot_token);
        let mut request = SlackApiConversationsRepliesRequest::new(channel_id.into(), thread_id.into());
        if let Some(ts) = after {
            request = request.with_oldest(format!("{}.000000", ts.timestamp()).into());
        }
        let response = session
            .conversations_replies(&request)
            .await
            .map_err(|e| ChannelError::SendFailed(e.to_string()))?;

        Ok(response
            .messages
            .into_iter()
            .map(|m| {
                let ts = m.origin.ts.to_string();
                ChatMessage {
                    platform: relay_core::types::Platform::Slack,
                    channel_id: channel_id.to_string(),
                    conversation_id: conversation_id(channel_id, Some(thread_id)),
                    message_id: ts.clone(),
                    user_id: m.sender.user.map(|u| u.to_string()).unwrap_or_default(),
                    user_name: String::new(),
                    text: m
                        .content
                        .and_then(|c| c.text)
                        .map(|t| t.to_string())
                        .unwrap_or_default(),
                    timestamp: crate::handler::parse_slack_ts(&ts),
                    is_bot: m.sender.bot_id.is_some(),
                }
            })
            .collect())
    }

    fn status(&self) -> ChannelStatus {
        self.status.lock().unwrap().clone()
    }
}

/// Spawn the Socket Mode listener task and return its handle so the caller
/// can `abort()` it on reconnect.
fn spawn_socket_listener(client: Arc<SlackHyperClient>, app_token: SlackApiToken, bridge_state: SlackBridgeState) -> JoinHandle<()> {
    tokio::spawn(async move {
        let callbacks = SlackSocketModeListenerCallbacks::new().with_push_events(socket_push_event_cb);

        let environment = Arc::new(
            SlackClientEventsListenerEnvironment::new(client)
                .with_error_handler(socket_mode_error_handler)
                .with_user_state(bridge_state),
        );

        let listener = SlackClientSocketModeListener::new(
            &SlackClientSocketModeConfig::new(),
            environment,
            callbacks,
        );

        if let Err(e) = listener.listen_for(&app_token).await {
            error!(error = %e, "slack: failed to start socket mode listener");
            return;
        }
        info!("slack: socket mode connected");
        listener.serve().await;
    })
}

struct HttpState {
    bridge: SlackBridgeState,
    signing_secret: String,
}

async fn socket_push_event_cb(
    event: SlackPushEventCallback,
    _client: Arc<SlackHyperClient>,
    states: SlackClientEventsUserState,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let bridge = {
        let guard = states.read().await;
        guard
            .get_user_state::<SlackBridgeState>()
            .cloned()
            .ok_or("slack bridge state missing")?
    };
    handle_push_event(&bridge, event).await;
    Ok(())
}

fn socket_mode_error_handler(
    err: Box<dyn std::error::Error + Send + Sync>,
    _client: Arc<SlackHyperClient>,
    _states: SlackClientEventsUserState,
) -> HttpStatusCode {
    error!(error = %err, "slack: socket mode error");
    HttpStatusCode::OK
}

async fn events_handler(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Result<Json<serde_json::Value>, StatusCode> {
    if let Err(e) = verify_slack_signature(&headers, &body, &state.signing_secret) {
        warn!(reason = %e, "slack: request signature verification failed");
        return Err(StatusCode::UNAUTHORIZED);
    }

    let event: SlackPushEvent = serde_json::from_slice(&body).map_err(|_| StatusCode::BAD_REQUEST)?;
    match event {
        SlackPushEvent::UrlVerification(v) => Ok(Json(serde_json::json!({ "challenge": v.challenge }))),
        SlackPushEvent::EventCallback(callback) => {
            handle_push_event(&state.bridge, callback).await;
            Ok(Json(serde_json::json!({ "ok": true })))
        }
        _ => Ok(Json(serde_json::json!({ "ok": true }))),
    }
}

/// Verify `v0={hmac}` in `X-Slack-Signature` over `v0:{timestamp}:{body}`.
fn verify_slack_signature(headers: &HeaderMap, body: &[u8], secret: &str) -> Result<(), String> {
    let timestamp = headers
        .get("x-slack-request-timestamp")
        .and_then(|v| v.to_str().ok())
        .ok_or("missing X-Slack-Request-Timestamp header")?;

    let sig_header = headers
        .get("x-slack-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or("missing X-Slack-Signature header")?;
    let sig_hex = sig_header
        .strip_prefix("v0=")
        .ok_or("malformed X-Slack-Signature header")?;
    let expected = hex::decode(sig_hex).map_err(|_| "X-Slack-Signature is not valid hex")?;

    let base = format!("v0:{timestamp}:{}", String::from_utf8_lossy(body));
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| "invalid signing secret length")?;
    mac.update(base.as_bytes());
    mac.verify_slice(&expected)
        .map_err(|_| "signature mismatch".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn signed_headers(secret: &str, timestamp: &str, body: &str) -> HeaderMap {
        let base = format!("v0:{timestamp}:{body}");
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(base.as_bytes());
        let sig = hex::encode(mac.finalize().into_bytes());

        let mut headers = HeaderMap::new();
        headers.insert(
            "x-slack-request-timestamp",
            HeaderValue::from_str(timestamp).unwrap(),
        );
        headers.insert(
            "x-slack-signature",
            HeaderValue::from_str(&format!("v0={sig}")).unwrap(),
        );
        headers
    }

    #[test]
    fn valid_signature_is_accepted() {
        let headers = signed_headers("secret", "1700000000", "{}");
        assert!(verify_slack_signature(&headers, b"{}", "secret").is_ok());
    }

    #[test]
    fn tampered_body_is_rejected() {
        let headers = signed_headers("secret", "1700000000", "{}");
        assert!(verify_slack_signature(&headers, b"{\"x\":1}", "secret").is_err());
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let headers = signed_headers("secret", "1700000000", "{}");
        assert!(verify_slack_signature(&headers, b"{}", "wrong").is_err());
    }

    #[test]
    fn missing_signature_header_is_rejected() {
        let headers = HeaderMap::new();
        assert!(verify_slack_signature(&headers, b"{}", "secret").is_err());
    }
}
