//! Core data-model entities shared across every relay crate.
//!
//! These mirror spec §3 field-for-field; persistence lives in `relay-store`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A supported chat platform. New platforms are added via the `Channel`
/// adapter contract in `relay-channels`, not by extending this enum's
/// meaning beyond "which wire protocol produced this event".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Slack,
    Telegram,
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Platform::Slack => write!(f, "slack"),
            Platform::Telegram => write!(f, "telegram"),
        }
    }
}

impl std::str::FromStr for Platform {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "slack" => Ok(Platform::Slack),
            "telegram" => Ok(Platform::Telegram),
            other => Err(format!("unknown platform: {other}")),
        }
    }
}

/// A `(platform, channelId) -> project` mapping, with auditing fields.
/// Primary key is `(platform, channel_id)`; reassigning a channel overwrites.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Binding {
    pub platform: Platform,
    pub channel_id: String,
    pub project: String,
    pub bound_by: String,
    pub bound_at: DateTime<Utc>,
}

/// A normalized inbound or outbound message.
///
/// `conversation_id` is the thread root where the platform supports threads,
/// else the message ID itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub platform: Platform,
    pub channel_id: String,
    pub conversation_id: String,
    pub message_id: String,
    pub user_id: String,
    pub user_name: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    pub is_bot: bool,
}

/// Write-ahead-log status for an inbound message accepted for processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PendingStatus {
    Pending,
    Processing,
    Done,
    Failed,
}

impl fmt::Display for PendingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PendingStatus::Pending => "pending",
            PendingStatus::Processing => "processing",
            PendingStatus::Done => "done",
            PendingStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for PendingStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PendingStatus::Pending),
            "processing" => Ok(PendingStatus::Processing),
            "done" => Ok(PendingStatus::Done),
            "failed" => Ok(PendingStatus::Failed),
            other => Err(format!("unknown pending status: {other}")),
        }
    }
}

/// The write-ahead-log row for a message accepted but not yet acknowledged complete.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingMessage {
    pub id: String,
    pub platform: Platform,
    pub channel_id: String,
    pub conversation_id: String,
    pub message_id: String,
    pub user_id: String,
    pub received_at: DateTime<Utc>,
    pub status: PendingStatus,
}

/// Status of a single agent execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            other => Err(format!("unknown run status: {other}")),
        }
    }
}

/// One agent execution: the source of truth for per-project budget accounting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayRun {
    pub id: String,
    pub platform: Platform,
    pub channel_id: String,
    pub conversation_id: String,
    pub project: String,
    pub user_id: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub cost_usd: f64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub duration_ms: u64,
    pub model: Option<String>,
}

/// Sparse patch applied by `updateRelayRun`. All fields `None` is a no-op.
#[derive(Debug, Clone, Default)]
pub struct RelayRunPatch {
    pub completed_at: Option<DateTime<Utc>>,
    pub status: Option<RunStatus>,
    pub cost_usd: Option<f64>,
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    pub duration_ms: Option<u64>,
    pub model: Option<String>,
}

impl RelayRunPatch {
    /// True when applying this patch would change nothing.
    pub fn is_empty(&self) -> bool {
        self.completed_at.is_none()
            && self.status.is_none()
            && self.cost_usd.is_none()
            && self.input_tokens.is_none()
            && self.output_tokens.is_none()
            && self.duration_ms.is_none()
            && self.model.is_none()
    }
}

/// Optional summary entity answering staleness queries without scanning messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationThread {
    pub conversation_id: String,
    pub last_activity_at: DateTime<Utc>,
    pub message_count: u64,
    pub summary: Option<String>,
}

/// A single outbound-webhook destination.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEndpoint {
    pub name: String,
    pub url: String,
    pub events: Vec<WebhookEvent>,
    pub secret: Option<String>,
    #[serde(default)]
    pub headers: std::collections::HashMap<String, String>,
}

/// The four event names the dispatcher commits to (spec §9 open question:
/// the set may grow, but only these are implemented here).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookEvent {
    RunComplete,
    RunFailed,
    RelayRunComplete,
    RelayRunFailed,
}

impl fmt::Display for WebhookEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WebhookEvent::RunComplete => "run_complete",
            WebhookEvent::RunFailed => "run_failed",
            WebhookEvent::RelayRunComplete => "relay_run_complete",
            WebhookEvent::RelayRunFailed => "relay_run_failed",
        };
        write!(f, "{s}")
    }
}

/// Reaction-derived feedback classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackType {
    Positive,
    Negative,
    Save,
    Acknowledge,
}

/// An append-only feedback record (JSONL on disk; see `relay-router::feedback`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackEntry {
    #[serde(rename = "type")]
    pub kind: FeedbackType,
    pub platform: Platform,
    pub channel_id: String,
    pub conversation_id: String,
    pub user_id: String,
    pub project: String,
    pub timestamp: DateTime<Utc>,
    pub agent_output_summary: Option<String>,
}

/// Classify a reaction emoji name into a [`FeedbackType`].
///
/// Accepts both bare names (`"thumbsup"`) and colon-wrapped shortcodes
/// (`":thumbsup:"`) so `classifyReaction(e) == classifyReaction(":" + e + ":")`
/// holds for every recognised emoji (spec §8).
pub fn classify_reaction(emoji: &str) -> Option<FeedbackType> {
    let bare = emoji.trim_matches(':');
    match bare {
        "thumbsup" | "+1" => Some(FeedbackType::Positive),
        "thumbsdown" | "-1" => Some(FeedbackType::Negative),
        "star" | "glowing_star" => Some(FeedbackType::Save),
        "eyes" => Some(FeedbackType::Acknowledge),
        _ => None,
    }
}

/// Return `true` when a reaction emoji should cancel the conversation's
/// in-flight run (spec §4.3).
pub fn is_cancel_reaction(emoji: &str) -> bool {
    matches!(emoji.trim_matches(':'), "stop_sign" | "octagonal_sign")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_reaction_bare_and_shortcode_agree() {
        for e in ["thumbsup", "thumbsdown", "star", "glowing_star", "eyes", "+1", "-1"] {
            let bare = classify_reaction(e);
            let wrapped = classify_reaction(&format!(":{e}:"));
            assert_eq!(bare, wrapped, "mismatch for {e}");
            assert!(bare.is_some());
        }
    }

    #[test]
    fn classify_reaction_unknown_is_none() {
        assert_eq!(classify_reaction("tada"), None);
    }

    #[test]
    fn cancel_reaction_recognises_both_names() {
        assert!(is_cancel_reaction("stop_sign"));
        assert!(is_cancel_reaction(":octagonal_sign:"));
        assert!(!is_cancel_reaction("eyes"));
    }

    #[test]
    fn patch_empty_detection() {
        assert!(RelayRunPatch::default().is_empty());
        let mut p = RelayRunPatch::default();
        p.cost_usd = Some(1.0);
        assert!(!p.is_empty());
    }
}
