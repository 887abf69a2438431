//! `.env`-backed platform token loading (spec §6).
//!
//! Grounded on `mira-server::cli`'s `dotenvy::from_path(home.join(".mira/.env"))`
//! pattern: load one well-known file rather than the working directory, so a
//! bound project checkout can't shadow real platform credentials.

use anyhow::{bail, Result};

use relay_core::config::{SlackConfig, SlackMode, TelegramConfig};

pub fn load_dotenv(path: &str) {
    if let Err(e) = dotenvy::from_path(path) {
        tracing::debug!(error = %e, path, "no .env file loaded");
    }
}

/// Fill in `cfg`'s token fields from the environment and fail fast if a
/// token required for the configured mode is missing.
pub fn resolve_slack(mut cfg: SlackConfig) -> Result<SlackConfig> {
    if let Ok(v) = std::env::var("SLACK_BOT_TOKEN") {
        cfg.bot_token = v;
    }
    if let Ok(v) = std::env::var("SLACK_APP_TOKEN") {
        cfg.app_token = v;
    }
    if let Ok(v) = std::env::var("SLACK_SIGNING_SECRET") {
        cfg.signing_secret = v;
    }

    if cfg.bot_token.is_empty() {
        bail!("platforms.slack is enabled but SLACK_BOT_TOKEN is not set");
    }
    match cfg.mode {
        SlackMode::Socket if cfg.app_token.is_empty() => {
            bail!("platforms.slack.mode is socket but SLACK_APP_TOKEN is not set")
        }
        SlackMode::Http if cfg.signing_secret.is_empty() => {
            bail!("platforms.slack.mode is http but SLACK_SIGNING_SECRET is not set")
        }
        _ => {}
    }
    Ok(cfg)
}

pub fn resolve_telegram(mut cfg: TelegramConfig) -> Result<TelegramConfig> {
    if let Ok(v) = std::env::var("TELEGRAM_BOT_TOKEN") {
        cfg.bot_token = v;
    }
    if cfg.bot_token.is_empty() {
        bail!("platforms.telegram is enabled but TELEGRAM_BOT_TOKEN is not set");
    }
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_slack_rejects_missing_bot_token() {
        let cfg = SlackConfig {
            enabled: true,
            mode: SlackMode::Socket,
            port: 3000,
            bot_token: String::new(),
            app_token: String::new(),
            signing_secret: String::new(),
        };
        assert!(resolve_slack(cfg).is_err());
    }

    #[test]
    fn resolve_telegram_rejects_missing_bot_token() {
        let cfg = TelegramConfig {
            enabled: true,
            stream_mode: relay_core::config::TelegramStreamMode::Edit,
            edit_interval_ms: relay_core::config::MIN_TELEGRAM_EDIT_INTERVAL_MS,
            bot_token: String::new(),
        };
        assert!(resolve_telegram(cfg).is_err());
    }
}
