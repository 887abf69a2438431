//! Startup/shutdown orchestration for the relay service (spec §4.10).

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use relay_channels::{ChannelManager, MessageFormat, OutboundMessage};
use relay_core::types::{ChatMessage, PendingStatus};
use relay_notify::Notifier;
use relay_router::Router;
use relay_store::RelayStore;

/// How often the cleanup sweep and budget-alert check run.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(3600);
/// Done/failed pending rows older than this are garbage-collected.
const PENDING_HOT_HOURS: i64 = 24;
/// Cached messages and idle threads older than this are purged.
const MESSAGE_RETENTION_DAYS: i64 = 30;
/// Run history older than this is purged.
const RUN_RETENTION_DAYS: i64 = 90;
/// Fraction of the daily budget that triggers an alert.
const BUDGET_ALERT_FRACTION: f64 = 0.8;

/// Bridge one platform adapter's inbound stream to the router, posting
/// whatever reply text comes back through the same adapter.
pub fn spawn_adapter_bridge(router: Router, channels: Arc<ChannelManager>, mut inbound_rx: mpsc::Receiver<ChatMessage>) {
    tokio::spawn(async move {
        while let Some(msg) = inbound_rx.recv().await {
            let platform_name = msg.platform.to_string();
            let channel_id = msg.channel_id.clone();
            let conversation_id = msg.conversation_id.clone();
            let platform = msg.platform;

            let Some(reply) = router.route_message(msg).await else {
                continue;
            };
            let out = OutboundMessage {
                platform,
                channel_id,
                conversation_id,
                content: reply,
                format: MessageFormat::Markdown,
            };
            match channels.send(&platform_name, &out).await {
                Some(Err(e)) => error!(error = %e, platform = %platform_name, "failed to post router reply"),
                Some(Ok(_)) | None => {}
            }
        }
        info!("adapter inbound channel closed, bridge task exiting");
    });
}

/// Replay write-ahead-log rows left `Pending` by a previous crash, posting a
/// one-line notice per row (spec §4.10). These rows never got a reply, so
/// there's no saved output to resend — only an acknowledgement that the
/// message was seen and will need to be sent again if still relevant.
pub async fn recover_pending_messages(store: &RelayStore, channels: &ChannelManager) {
    let rows = match store.get_pending_messages(PendingStatus::Pending) {
        Ok(rows) => rows,
        Err(e) => {
            error!(error = %e, "failed to load pending messages for recovery");
            return;
        }
    };

    for row in rows {
        info!(pending_id = %row.id, conversation_id = %row.conversation_id, "recovering pending message from previous run");

        let msg = OutboundMessage {
            platform: row.platform,
            channel_id: row.channel_id.clone(),
            conversation_id: row.conversation_id.clone(),
            content: "Recovered after a restart — this message may not have gotten a reply; resend if you still need one.".to_string(),
            format: MessageFormat::PlainText,
        };
        if let Some(Err(e)) = channels.send(&row.platform.to_string(), &msg).await {
            warn!(error = %e, pending_id = %row.id, "failed to post recovery notice");
        }
        if let Err(e) = store.mark_pending_status(&row.id, PendingStatus::Failed) {
            error!(error = %e, pending_id = %row.id, "failed to mark recovered pending message");
        }
    }
}

/// Arm the hourly cleanup timer: purge stale rows and, if enabled, sweep
/// every bound project for 80%-of-daily-budget spend.
pub fn spawn_cleanup_timer(
    store: Arc<RelayStore>,
    notifier: Arc<Notifier>,
    daily_budget_per_project: f64,
    budget_alerts_enabled: bool,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(CLEANUP_INTERVAL);
        ticker.tick().await; // first tick fires immediately; skip it

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    run_cleanup_sweep(&store).await;
                    if budget_alerts_enabled && daily_budget_per_project > 0.0 {
                        check_budget_alerts(&store, &notifier, daily_budget_per_project).await;
                    }
                }
                _ = cancel.cancelled() => {
                    info!("cleanup timer stopping");
                    return;
                }
            }
        }
    });
}

async fn run_cleanup_sweep(store: &RelayStore) {
    let pending_cutoff = Utc::now() - chrono::Duration::hours(PENDING_HOT_HOURS);
    let message_cutoff = Utc::now() - chrono::Duration::days(MESSAGE_RETENTION_DAYS);
    let run_cutoff = Utc::now() - chrono::Duration::days(RUN_RETENTION_DAYS);
    match store.cleanup_stale_data(pending_cutoff, message_cutoff, run_cutoff) {
        Ok(removed) => info!(rows_removed = removed, "cleanup sweep complete"),
        Err(e) => error!(error = %e, "cleanup sweep failed"),
    }
}

async fn check_budget_alerts(store: &RelayStore, notifier: &Notifier, daily_budget: f64) {
    let projects = match store.distinct_projects() {
        Ok(p) => p,
        Err(e) => {
            error!(error = %e, "failed to list projects for budget sweep");
            return;
        }
    };

    let since = Utc::now() - chrono::Duration::days(1);
    for project in projects {
        match store.get_run_stats(&project, since) {
            Ok(stats) if stats.total_cost_usd >= daily_budget * BUDGET_ALERT_FRACTION => {
                notifier.notify_budget_alert(&project, stats.total_cost_usd, daily_budget).await;
            }
            Ok(_) => {}
            Err(e) => error!(error = %e, project, "failed to read run stats for budget alert"),
        }
    }
}

/// Resolves on SIGINT or SIGTERM (SIGTERM only on Unix).
pub async fn wait_for_shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
