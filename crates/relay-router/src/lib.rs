//! Message/reaction/command routing (spec §4.3): the state machine that
//! turns a normalized `ChatMessage` or reaction event into a queued agent
//! run, an admin reply, or a silent drop.
//!
//! Grounded on `skynet_telegram::handler::handle_message`'s overall shape
//! (bot-drop guard, binding/allowlist lookup, slash-command interception
//! before the pipeline, fire-and-forget spawn of the actual work) and on
//! `skynet_gateway::app::AppState`'s per-process registries for abort
//! tokens and rate limiting.

pub mod abort;
pub mod admin;
pub mod exec;
pub mod feedback;
pub mod rate_limit;

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{error, info, warn};
use uuid::Uuid;

use relay_channels::ChannelManager;
use relay_core::config::{AdminsConfig, AgentConfig, ContextConfig, LimitsConfig};
use relay_core::error::{RelayError, Result};
use relay_core::types::{ChatMessage, PendingMessage, PendingStatus, Platform};
use relay_pool::AgentPool;
use relay_store::RelayStore;

use abort::AbortRegistry;
use exec::{execute_and_post, ExecDeps, ExecJob};
use feedback::FeedbackKind;
use rate_limit::RollingLimiter;

/// Reply text is returned to the caller, who is responsible for actually
/// posting it (the adapter already has a handle to the source message in
/// hand for Slack/Telegram-native reply threading).
pub type RouteOutcome = Option<String>;

/// Cheap to clone — every field is either `Arc`-backed or small owned
/// config data, so each inbound adapter task can hold its own handle.
#[derive(Clone)]
pub struct Router {
    store: Arc<RelayStore>,
    pool: AgentPool,
    channels: Arc<ChannelManager>,
    notifier: Arc<relay_notify::Notifier>,
    aborts: Arc<AbortRegistry>,
    user_limiter: RollingLimiter,
    reaction_limiter: RollingLimiter,
    admins: AdminsConfig,
    agent: AgentConfig,
    context: ContextConfig,
    limits: LimitsConfig,
    feedback_log_path: String,
    started_at: Instant,
}

impl Router {
    pub fn new(
        store: Arc<RelayStore>,
        pool: AgentPool,
        channels: Arc<ChannelManager>,
        notifier: Arc<relay_notify::Notifier>,
        admins: AdminsConfig,
        agent: AgentConfig,
        context: ContextConfig,
        limits: LimitsConfig,
        feedback_log_path: String,
    ) -> Self {
        Self {
            store,
            pool,
            channels,
            notifier,
            aborts: Arc::new(AbortRegistry::new()),
            user_limiter: RollingLimiter::new(limits.user_rate_per_hour, Duration::from_secs(3600)),
            reaction_limiter: RollingLimiter::new(limits.reaction_rate_per_hour, Duration::from_secs(3600)),
            admins,
            agent,
            context,
            limits,
            feedback_log_path,
            started_at: Instant::now(),
        }
    }

    /// Step 1-9 of the spec §4.3 message state machine.
    pub async fn route_message(&self, msg: ChatMessage) -> RouteOutcome {
        if msg.is_bot {
            return None;
        }

        if let Err(e) = self.store.cache_message(&msg) {
            error!(error = %e, "failed to cache inbound message");
        }

        if let Some((command, args)) = admin::parse_invocation(&msg.text) {
            return Some(self.route_command(msg.platform, &msg.channel_id, &msg.conversation_id, &msg.user_id, &command, &args));
        }

        let binding = match self.store.lookup_binding(msg.platform, &msg.channel_id) {
            Ok(Some(b)) => b,
            Ok(None) => {
                return Some(
                    "This channel isn't bound to a project yet. An admin can run `bind <project>` to connect one.".to_string(),
                )
            }
            Err(e) => {
                error!(error = %e, "binding lookup failed");
                return Some("Internal error looking up this channel's project.".to_string());
            }
        };

        if !self.user_limiter.allow(&msg.user_id) {
            return Some("You're sending messages too quickly. Please slow down.".to_string());
        }

        if self.limits.daily_budget_per_project > 0.0 {
            let since = Utc::now() - chrono::Duration::days(1);
            match self.store.get_run_stats(&binding.project, since) {
                Ok(stats) if stats.total_cost_usd >= self.limits.daily_budget_per_project => {
                    return Some(format!(
                        "Daily budget reached for project `{}`.",
                        binding.project
                    ));
                }
                Err(e) => {
                    error!(error = %e, "failed to read run stats for budget check");
                }
                _ => {}
            }
        }

        let pending = PendingMessage {
            id: Uuid::new_v4().to_string(),
            platform: msg.platform,
            channel_id: msg.channel_id.clone(),
            conversation_id: msg.conversation_id.clone(),
            message_id: msg.message_id.clone(),
            user_id: msg.user_id.clone(),
            received_at: Utc::now(),
            status: PendingStatus::Pending,
        };
        if let Err(e) = self.store.write_pending_message(&pending) {
            error!(error = %e, "failed to write pending message WAL row");
            return Some("Internal error accepting this message.".to_string());
        }

        let deps = Arc::new(ExecDeps {
            store: self.store.clone(),
            channels: self.channels.clone(),
            notifier: self.notifier.clone(),
            aborts: self.aborts.clone(),
            agent: self.agent.clone(),
            context: self.context.clone(),
        });
        let job = ExecJob {
            binding: binding.clone(),
            incoming: msg.clone(),
            platform_top_up: Vec::new(),
            pending_id: pending.id.clone(),
        };

        let enqueue_result = self.pool.enqueue(&binding.project, move || async move {
            execute_and_post(deps, job).await;
        });

        match enqueue_result {
            Ok(position) => {
                if position > 0 {
                    Some(format!("Queued at position {position}."))
                } else {
                    None
                }
            }
            Err(RelayError::QueueFull { project }) => {
                if let Err(e) = self.store.mark_pending_status(&pending.id, PendingStatus::Failed) {
                    error!(error = %e, "failed to mark pending message failed after queue-full");
                }
                Some(format!("Project `{project}` is too busy right now; try again shortly."))
            }
            Err(e) => {
                if let Err(mark_err) = self.store.mark_pending_status(&pending.id, PendingStatus::Failed) {
                    error!(error = %mark_err, "failed to mark pending message failed");
                }
                warn!(error = %e, "unexpected enqueue failure");
                Some("Internal error queuing this run.".to_string())
            }
        }
    }

    /// Spec §4.3 reactions: rate-limited, classified, logged, and in the
    /// `stop_sign`/`octagonal_sign` case, cancels an in-flight run.
    pub async fn route_reaction(
        &self,
        platform: Platform,
        channel_id: &str,
        message_id: &str,
        user_id: &str,
        emoji: &str,
    ) -> RouteOutcome {
        if !self.reaction_limiter.allow(user_id) {
            return None;
        }

        let conversation_id = match self.store.conversation_id_for_message(platform, channel_id, message_id) {
            Ok(Some(id)) => id,
            Ok(None) => return None,
            Err(e) => {
                error!(error = %e, "failed to resolve conversation for reacted message");
                return None;
            }
        };

        if feedback::is_cancel_reaction(emoji) {
            self.aborts.cancel(&conversation_id);
            return Some("Cancelled.".to_string());
        }

        let Some(kind) = feedback::classify_reaction(emoji) else {
            return None;
        };

        feedback::log_feedback(&self.feedback_log_path, platform, &conversation_id, user_id, emoji, kind);

        if matches!(kind, FeedbackKind::Save) {
            match self.store.lookup_binding(platform, channel_id) {
                Ok(Some(binding)) => {
                    let memory_path = relay_core::config::project_memory_path(&binding.project);
                    feedback::append_durable_memory(
                        &memory_path,
                        &format!("saved from conversation {conversation_id}"),
                    );
                }
                Ok(None) => warn!(channel_id, "save reaction on an unbound channel"),
                Err(e) => error!(error = %e, "failed to look up binding for save reaction"),
            }
        }

        if matches!(kind, FeedbackKind::Negative) {
            return Some(feedback::negative_followup_prompt().to_string());
        }

        None
    }

    /// Entry point for a command the adapter has already identified as
    /// directed at the bot (e.g. a Slack slash command), bypassing the
    /// text-based admin-syntax parsing `route_message` does inline.
    pub fn route_command(
        &self,
        platform: Platform,
        channel_id: &str,
        conversation_id: &str,
        user_id: &str,
        command: &str,
        args: &[String],
    ) -> String {
        let ctx = admin::AdminContext {
            store: &self.store,
            pool: &self.pool,
            aborts: &self.aborts,
            admins: &self.admins,
            platform,
            channel_id,
            conversation_id,
            user_id,
            uptime: self.started_at.elapsed(),
        };
        let reply = admin::dispatch(&ctx, command, args);
        info!(command, "dispatched admin command");
        reply
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use relay_channels::{Channel, ChannelCapabilities, ChannelError, ChannelStatus, MessageId, StreamHandle};
    use relay_notify::{Notifier, WebhookDispatcher};
    use rusqlite::Connection;

    struct NoopChannel;

    #[async_trait]
    impl Channel for NoopChannel {
        fn name(&self) -> &str {
            "slack"
        }
        fn capabilities(&self) -> ChannelCapabilities {
            ChannelCapabilities {
                supports_streaming: false,
                supports_threads: false,
                max_message_len: 4000,
            }
        }
        async fn connect(&mut self) -> Result<(), ChannelError> {
            Ok(())
        }
        async fn disconnect(&mut self) -> Result<(), ChannelError> {
            Ok(())
        }
        async fn send(&self, _msg: &relay_channels::OutboundMessage) -> Result<MessageId, ChannelError> {
            Ok("msg-1".to_string())
        }
        async fn update_message(&self, _channel_id: &str, _message_id: &MessageId, _text: &str) -> Result<(), ChannelError> {
            Ok(())
        }
        async fn start_stream(
            &self,
            _channel_id: &str,
            _thread_id: Option<&str>,
        ) -> Result<Box<dyn StreamHandle>, ChannelError> {
            Err(ChannelError::ConfigError("NoopChannel does not support streaming".into()))
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
            ChannelStatus::Connected
        }
    }

    async fn test_router(admins: AdminsConfig) -> (Router, tempfile::TempDir) {
        let conn = Connection::open_in_memory().unwrap();
        relay_store::db::init_db(&conn).unwrap();
        let store = Arc::new(RelayStore::new(conn));

        let manager = ChannelManager::new();
        manager.register(Box::new(NoopChannel)).await;
        let channels = Arc::new(manager);

        let dir = tempfile::tempdir().unwrap();
        let dispatcher = WebhookDispatcher::new(
            dir.path().join("webhook.toml").to_string_lossy().to_string(),
            dir.path().join("dead.jsonl").to_string_lossy().to_string(),
        );
        let notifier = Arc::new(Notifier::new(
            Default::default(),
            store.clone(),
            channels.clone(),
            dispatcher,
        ));

        let pool = AgentPool::new(2, 4);
        let router = Router::new(
            store,
            pool,
            channels,
            notifier,
            admins,
            AgentConfig::default(),
            ContextConfig::default(),
            LimitsConfig::default(),
            dir.path().join("feedback.jsonl").to_string_lossy().to_string(),
        );
        (router, dir)
    }

    fn sample_message(text: &str) -> ChatMessage {
        ChatMessage {
            platform: Platform::Slack,
            channel_id: "C1".into(),
            conversation_id: "C1".into(),
            message_id: "M1".into(),
            user_id: "U1".into(),
            user_name: "alice".into(),
            text: text.into(),
            timestamp: Utc::now(),
            is_bot: false,
        }
    }

    #[tokio::test]
    async fn bot_messages_are_dropped_silently() {
        let (router, _dir) = test_router(AdminsConfig::default()).await;
        let mut msg = sample_message("hello");
        msg.is_bot = true;
        assert_eq!(router.route_message(msg).await, None);
    }

    #[tokio::test]
    async fn unbound_channel_gets_a_help_reply() {
        let (router, _dir) = test_router(AdminsConfig::default()).await;
        let reply = router.route_message(sample_message("do the thing")).await;
        assert!(reply.unwrap().contains("bind"));
    }

    #[tokio::test]
    async fn non_admin_cannot_bind() {
        let (router, _dir) = test_router(AdminsConfig::default()).await;
        let reply = router.route_message(sample_message("/pilotlynx-bind demo")).await;
        assert_eq!(reply.unwrap(), "Permission denied.");
    }

    #[tokio::test]
    async fn admin_bind_then_where_reports_the_project() {
        let admins = AdminsConfig {
            slack: vec!["U1".to_string()],
            telegram: vec![],
        };
        let (router, _dir) = test_router(admins).await;
        let bind_reply = router.route_message(sample_message("/pilotlynx-bind demo")).await;
        assert!(bind_reply.unwrap().contains("demo"));

        let where_reply = router.route_message(sample_message("!where")).await;
        assert!(where_reply.unwrap().contains("demo"));
    }

    #[tokio::test]
    async fn reaction_on_uncached_message_is_ignored() {
        let (router, _dir) = test_router(AdminsConfig::default()).await;
        let reply = router.route_reaction(Platform::Slack, "C1", "missing", "U1", "thumbsup").await;
        assert_eq!(reply, None);
    }

    #[tokio::test]
    async fn stop_sign_reaction_cancels_the_registered_run() {
        let (router, _dir) = test_router(AdminsConfig::default()).await;
        router.store.cache_message(&sample_message("hello")).unwrap();
        let token = router.aborts.register("C1");
        let reply = router.route_reaction(Platform::Slack, "C1", "M1", "U1", "stop_sign").await;
        assert_eq!(reply.as_deref(), Some("Cancelled."));
        assert!(token.is_cancelled());
    }
}
