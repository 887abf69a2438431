use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_HEALTH_PORT: u16 = 9100;
/// Pending-message rows older than this are surfaced as "recovered" at startup.
pub const DEFAULT_RECOVERY_TTL_MINUTES: i64 = 10;
/// Telegram's simulated-streaming edit cadence may not go below this.
pub const MIN_TELEGRAM_EDIT_INTERVAL_MS: u64 = 12_000;

/// Top-level config (`relay.toml` + `RELAY_*` env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default)]
    pub platforms: PlatformsConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub notifications: NotificationsConfig,
    #[serde(default)]
    pub admins: AdminsConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            platforms: PlatformsConfig::default(),
            agent: AgentConfig::default(),
            context: ContextConfig::default(),
            limits: LimitsConfig::default(),
            notifications: NotificationsConfig::default(),
            admins: AdminsConfig::default(),
            database: DatabaseConfig::default(),
        }
    }
}

impl RelayConfig {
    /// Load config from a TOML file with `RELAY_*` env var overrides.
    ///
    /// Checks, in order: explicit path argument, then `PILOTLYNX_ROOT/relay.toml`
    /// when set, then `~/.pilotlynx/relay.toml`.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: RelayConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("RELAY_").split("_"))
            .extract()
            .map_err(|e| crate::error::RelayError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Config-level invariants that must hold before the service starts.
    fn validate(&self) -> crate::error::Result<()> {
        if !self.platforms.slack.enabled && !self.platforms.telegram.enabled {
            return Err(crate::error::RelayError::Config(
                "no platform enabled: set platforms.slack.enabled or platforms.telegram.enabled".into(),
            ));
        }
        if self.platforms.telegram.enabled
            && self.platforms.telegram.edit_interval_ms < MIN_TELEGRAM_EDIT_INTERVAL_MS
        {
            return Err(crate::error::RelayError::Config(format!(
                "platforms.telegram.edit_interval_ms must be >= {MIN_TELEGRAM_EDIT_INTERVAL_MS}"
            )));
        }
        Ok(())
    }
}

fn default_config_root() -> String {
    std::env::var("PILOTLYNX_ROOT").unwrap_or_else(|_| {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        format!("{home}/.pilotlynx")
    })
}

fn default_config_path() -> String {
    format!("{}/relay.toml", default_config_root())
}

pub fn webhook_config_path() -> String {
    format!("{}/webhook.toml", default_config_root())
}

/// `.env` file the supervisor loads platform tokens from (spec §6).
pub fn env_file_path() -> String {
    format!("{}/.env", default_config_root())
}

/// Guards against two supervisor processes running against the same config root.
pub fn pid_file_path() -> String {
    format!("{}/relay-service.pid", default_config_root())
}

pub fn dead_letter_path() -> String {
    format!("{}/webhook_dead_letters.jsonl", default_config_root())
}

pub fn feedback_log_path() -> String {
    format!("{}/feedback.jsonl", default_config_root())
}

/// Durable per-project memory file appended to by `save`-type feedback.
pub fn project_memory_path(project: &str) -> String {
    format!("{}/memory/{project}.md", default_config_root())
}

// ---------------------------------------------------------------------------
// platforms.*
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PlatformsConfig {
    #[serde(default)]
    pub slack: SlackConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SlackMode {
    Socket,
    Http,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlackConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_slack_mode")]
    pub mode: SlackMode,
    #[serde(default = "default_slack_port")]
    pub port: u16,
    #[serde(default)]
    pub bot_token: String,
    #[serde(default)]
    pub app_token: String,
    #[serde(default)]
    pub signing_secret: String,
}

impl Default for SlackConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            mode: default_slack_mode(),
            port: default_slack_port(),
            bot_token: String::new(),
            app_token: String::new(),
            signing_secret: String::new(),
        }
    }
}

fn default_slack_mode() -> SlackMode {
    SlackMode::Socket
}
fn default_slack_port() -> u16 {
    3000
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TelegramStreamMode {
    Edit,
    Chunked,
    FinalOnly,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_telegram_stream_mode")]
    pub stream_mode: TelegramStreamMode,
    #[serde(default = "default_edit_interval_ms")]
    pub edit_interval_ms: u64,
    #[serde(default)]
    pub bot_token: String,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            stream_mode: default_telegram_stream_mode(),
            edit_interval_ms: default_edit_interval_ms(),
            bot_token: String::new(),
        }
    }
}

fn default_telegram_stream_mode() -> TelegramStreamMode {
    TelegramStreamMode::Edit
}
fn default_edit_interval_ms() -> u64 {
    MIN_TELEGRAM_EDIT_INTERVAL_MS
}

// ---------------------------------------------------------------------------
// agent.*
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,
    #[serde(default = "default_max_memory_mb")]
    pub max_memory_mb: u64,
    #[serde(default)]
    pub require_kernel_sandbox: bool,
    #[serde(default = "bool_true")]
    pub network_isolation: bool,
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,
    /// Command used to invoke the agent runtime child process.
    #[serde(default = "default_agent_command")]
    pub command: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            default_timeout_ms: default_timeout_ms(),
            max_memory_mb: default_max_memory_mb(),
            require_kernel_sandbox: false,
            network_isolation: true,
            max_turns: default_max_turns(),
            command: default_agent_command(),
        }
    }
}

fn default_max_concurrent() -> usize {
    5
}
fn default_timeout_ms() -> u64 {
    300_000
}
fn default_max_memory_mb() -> u64 {
    2048
}
fn default_max_turns() -> u32 {
    25
}
fn default_agent_command() -> String {
    "claude".to_string()
}
fn bool_true() -> bool {
    true
}

// ---------------------------------------------------------------------------
// context.*
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    #[serde(default = "default_token_budget")]
    pub token_budget: usize,
    #[serde(default = "default_max_messages_per_thread")]
    pub max_messages_per_thread: usize,
    #[serde(default = "default_max_chars_per_message")]
    pub max_chars_per_message: usize,
    #[serde(default = "default_stale_thread_days")]
    pub stale_thread_days: i64,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            token_budget: default_token_budget(),
            max_messages_per_thread: default_max_messages_per_thread(),
            max_chars_per_message: default_max_chars_per_message(),
            stale_thread_days: default_stale_thread_days(),
        }
    }
}

fn default_token_budget() -> usize {
    8000
}
fn default_max_messages_per_thread() -> usize {
    50
}
fn default_max_chars_per_message() -> usize {
    4000
}
fn default_stale_thread_days() -> i64 {
    3
}

// ---------------------------------------------------------------------------
// limits.*
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_user_rate_per_hour")]
    pub user_rate_per_hour: u32,
    #[serde(default = "default_reaction_rate_per_hour")]
    pub reaction_rate_per_hour: u32,
    #[serde(default = "default_project_queue_depth")]
    pub project_queue_depth: usize,
    #[serde(default)]
    pub daily_budget_per_project: f64,
    #[serde(default = "default_max_concurrent")]
    pub global_concurrency: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            user_rate_per_hour: default_user_rate_per_hour(),
            reaction_rate_per_hour: default_reaction_rate_per_hour(),
            project_queue_depth: default_project_queue_depth(),
            daily_budget_per_project: 0.0,
            global_concurrency: default_max_concurrent(),
        }
    }
}

fn default_user_rate_per_hour() -> u32 {
    30
}
fn default_reaction_rate_per_hour() -> u32 {
    60
}
fn default_project_queue_depth() -> usize {
    10
}

// ---------------------------------------------------------------------------
// notifications.*
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationsConfig {
    #[serde(default = "bool_true")]
    pub schedule_failures: bool,
    #[serde(default = "bool_true")]
    pub improve_insights: bool,
    #[serde(default = "bool_true")]
    pub budget_alerts: bool,
    #[serde(default = "default_health_score_threshold")]
    pub health_score_threshold: f64,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            schedule_failures: true,
            improve_insights: true,
            budget_alerts: true,
            health_score_threshold: default_health_score_threshold(),
        }
    }
}

fn default_health_score_threshold() -> f64 {
    0.7
}

// ---------------------------------------------------------------------------
// admins.*
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AdminsConfig {
    #[serde(default)]
    pub slack: Vec<String>,
    #[serde(default)]
    pub telegram: Vec<String>,
}

impl AdminsConfig {
    pub fn is_admin(&self, platform: crate::types::Platform, user_id: &str) -> bool {
        match platform {
            crate::types::Platform::Slack => self.slack.iter().any(|u| u == user_id),
            crate::types::Platform::Telegram => self.telegram.iter().any(|u| u == user_id),
        }
    }
}

// ---------------------------------------------------------------------------
// database.*
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> String {
    format!("{}/relay.sqlite3", default_config_root())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_requires_a_platform_enabled() {
        let cfg = RelayConfig::default();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn telegram_edit_interval_floor_enforced() {
        let mut cfg = RelayConfig::default();
        cfg.platforms.telegram.enabled = true;
        cfg.platforms.telegram.edit_interval_ms = 1000;
        assert!(cfg.validate().is_err());
        cfg.platforms.telegram.edit_interval_ms = MIN_TELEGRAM_EDIT_INTERVAL_MS;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn admin_membership_is_per_platform() {
        let admins = AdminsConfig {
            slack: vec!["U1".to_string()],
            telegram: vec!["T1".to_string()],
        };
        assert!(admins.is_admin(crate::types::Platform::Slack, "U1"));
        assert!(!admins.is_admin(crate::types::Platform::Telegram, "U1"));
    }
}
