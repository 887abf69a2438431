//! `relay-service`: the long-running supervisor process (spec §4.10).
//!
//! Startup/shutdown shape grounded on `skynet_gateway::main` (tracing init,
//! config load-with-fallback, `axum::serve`) and on
//! `softwaresalt-agent-intercom::main`'s bounded-timeout shutdown sequence.

mod env;
mod health;
mod pidfile;
mod supervisor;

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use relay_channels::ChannelManager;
use relay_core::config::RelayConfig;
use relay_notify::{Notifier, WebhookDispatcher};
use relay_pool::AgentPool;
use relay_router::Router;
use relay_slack::SlackAdapter;
use relay_store::RelayStore;
use relay_telegram::TelegramAdapter;

/// Size of each adapter's inbound channel buffer before the router starts
/// applying backpressure to the platform's own event loop.
const INBOUND_CHANNEL_CAPACITY: usize = 256;
/// Upper bound on how long shutdown waits for in-flight agent runs to drain.
const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "relay_service=info,relay_router=info".into()),
        )
        .init();

    run().await
}

async fn run() -> anyhow::Result<()> {
    env::load_dotenv(&relay_core::config::env_file_path());

    let config_path = std::env::var("RELAY_CONFIG").ok();
    let config = RelayConfig::load(config_path.as_deref())?;

    let _pid_file = pidfile::PidFile::acquire(&relay_core::config::pid_file_path())?;

    let conn = relay_store::db::open(&config.database.path)?;
    let store = Arc::new(RelayStore::new(conn));

    let channels = Arc::new(ChannelManager::new());
    let dispatcher = WebhookDispatcher::new(relay_core::config::webhook_config_path(), relay_core::config::dead_letter_path());
    let notifier = Arc::new(Notifier::new(
        config.notifications.clone(),
        store.clone(),
        channels.clone(),
        dispatcher,
    ));

    let pool = AgentPool::new(config.limits.global_concurrency, config.limits.project_queue_depth);

    let router = Router::new(
        store.clone(),
        pool.clone(),
        channels.clone(),
        notifier.clone(),
        config.admins.clone(),
        config.agent.clone(),
        config.context.clone(),
        config.limits.clone(),
        relay_core::config::feedback_log_path(),
    );

    let mut any_platform_enabled = false;

    if config.platforms.slack.enabled {
        let slack_config = env::resolve_slack(config.platforms.slack.clone())?;
        let (tx, rx) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);
        let adapter = SlackAdapter::new(slack_config, tx).map_err(|e| anyhow::anyhow!("failed to construct slack adapter: {e}"))?;
        channels.register(Box::new(adapter)).await;
        supervisor::spawn_adapter_bridge(router.clone(), channels.clone(), rx);
        any_platform_enabled = true;
        info!("slack adapter registered");
    }

    if config.platforms.telegram.enabled {
        let telegram_config = env::resolve_telegram(config.platforms.telegram.clone())?;
        let (tx, rx) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);
        let adapter = TelegramAdapter::new(telegram_config, tx);
        channels.register(Box::new(adapter)).await;
        supervisor::spawn_adapter_bridge(router.clone(), channels.clone(), rx);
        any_platform_enabled = true;
        info!("telegram adapter registered");
    }

    if !any_platform_enabled {
        anyhow::bail!("no platform enabled: set platforms.slack.enabled or platforms.telegram.enabled");
    }

    channels.connect_all().await;
    info!("adapters connected");

    supervisor::recover_pending_messages(&store, &channels).await;

    let cancel = CancellationToken::new();
    supervisor::spawn_cleanup_timer(
        store.clone(),
        notifier.clone(),
        config.limits.daily_budget_per_project,
        config.notifications.budget_alerts,
        cancel.clone(),
    );

    let started_at = Instant::now();
    let health_handle = tokio::spawn(health::serve(relay_core::config::DEFAULT_HEALTH_PORT, started_at, cancel.clone()));

    info!("relay-service ready");
    supervisor::wait_for_shutdown_signal().await;
    info!("shutdown signal received, draining");

    cancel.cancel();
    pool.shutdown();
    drain_pool(&pool).await;
    channels.disconnect_all().await;
    if let Err(e) = health_handle.await {
        warn!(error = %e, "health server task panicked during shutdown");
    }

    info!("relay-service shut down cleanly");
    Ok(())
}

/// Poll the pool's active-run count until it reaches zero or
/// [`SHUTDOWN_DRAIN_TIMEOUT`] elapses, whichever comes first.
async fn drain_pool(pool: &AgentPool) {
    let deadline = Instant::now() + SHUTDOWN_DRAIN_TIMEOUT;
    while pool.active_count() > 0 {
        if Instant::now() >= deadline {
            warn!(active = pool.active_count(), "shutdown drain timed out, exiting with runs still active");
            return;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}
