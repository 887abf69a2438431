//! Durable notifier — posts proactive events to every channel bound to a
//! project and fires the matching outbound webhook.
//!
//! Grounded on the notification gating described alongside
//! `skynet_memory::manager`'s health-score tracking: each method is a no-op
//! when its config switch is off, a missing binding is skipped rather than
//! treated as an error, and a platform send failure is logged and swallowed
//! — this is best-effort broadcast, not a delivery guarantee.

use std::sync::Arc;

use chrono::Utc;
use tracing::{error, warn};

use relay_channels::{ChannelManager, MessageFormat, OutboundMessage};
use relay_core::config::NotificationsConfig;
use relay_core::types::{RelayRun, RunStatus, WebhookEvent};
use relay_store::RelayStore;

use crate::webhook::{WebhookDispatcher, WebhookPayload};

pub struct Notifier {
    config: NotificationsConfig,
    store: Arc<RelayStore>,
    channels: Arc<ChannelManager>,
    dispatcher: WebhookDispatcher,
}

impl Notifier {
    pub fn new(
        config: NotificationsConfig,
        store: Arc<RelayStore>,
        channels: Arc<ChannelManager>,
        dispatcher: WebhookDispatcher,
    ) -> Self {
        Self {
            config,
            store,
            channels,
            dispatcher,
        }
    }

    /// Broadcast the outcome of a scheduled agent run, then fire the
    /// matching webhook event.
    pub async fn notify_schedule_result(&self, project: &str, run: &RelayRun) {
        if !self.config.schedule_failures {
            return;
        }

        let success = run.status == RunStatus::Completed;
        let summary = match run.status {
            RunStatus::Completed => format!("run {} completed", run.id),
            RunStatus::Failed => format!("run {} failed", run.id),
            RunStatus::Running => format!("run {} still running", run.id),
        };

        self.broadcast(project, &summary).await;

        let event = if success {
            WebhookEvent::RelayRunComplete
        } else {
            WebhookEvent::RelayRunFailed
        };
        let payload = WebhookPayload {
            event,
            timestamp: Utc::now(),
            project: project.to_string(),
            workflow: "default".to_string(),
            success,
            summary,
            cost_usd: run.cost_usd,
            duration_ms: run.duration_ms,
            model: run.model.clone(),
            platform: Some(run.platform.to_string()),
            channel_id: Some(run.channel_id.clone()),
        }
        .capped_summary();
        self.dispatcher.dispatch(&payload).await;
    }

    /// Broadcast a batch of improvement insights discovered for a project.
    pub async fn notify_improve_insights(&self, project: &str, insights: &[String]) {
        if !self.config.improve_insights || insights.is_empty() {
            return;
        }
        let body = format!(
            "Improvement insights for {project}:\n{}",
            insights.iter().map(|i| format!("- {i}")).collect::<Vec<_>>().join("\n")
        );
        self.broadcast(project, &body).await;
    }

    /// Broadcast that a project has exceeded its configured daily spend.
    pub async fn notify_budget_alert(&self, project: &str, spent: f64, limit: f64) {
        if !self.config.budget_alerts {
            return;
        }
        let body = format!("Budget alert for {project}: spent ${spent:.2} of ${limit:.2} daily limit");
        self.broadcast(project, &body).await;
    }

    /// Broadcast a health-score regression. No-op once the new score has
    /// recovered back above the configured threshold.
    pub async fn notify_health_drop(&self, project: &str, old_score: f64, new_score: f64) {
        if new_score >= self.config.health_score_threshold {
            return;
        }
        let body = format!("Health score for {project} dropped from {old_score:.2} to {new_score:.2}");
        self.broadcast(project, &body).await;
    }

    /// Post `body` to every channel bound to `project`. Missing bindings are
    /// skipped; platform send errors are logged and swallowed.
    async fn broadcast(&self, project: &str, body: &str) {
        let bindings = match self.store.bindings_for_project(project) {
            Ok(b) => b,
            Err(e) => {
                error!(project, error = %e, "failed to look up bindings for notification");
                return;
            }
        };

        for binding in bindings {
            let platform_name = binding.platform.to_string();

            let msg = OutboundMessage {
                platform: binding.platform,
                channel_id: binding.channel_id.clone(),
                conversation_id: binding.channel_id.clone(),
                content: body.to_string(),
                format: MessageFormat::PlainText,
            };

            match self.channels.send(&platform_name, &msg).await {
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(project, platform = %binding.platform, error = %e, "notification send failed");
                }
                None => {
                    warn!(project, platform = %binding.platform, "no adapter registered for bound platform");
                }
            }
        }
    }
}
