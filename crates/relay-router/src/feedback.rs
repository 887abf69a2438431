//! Reaction classification and feedback logging (spec §4.3, §8).
//!
//! The JSONL-append shape is grounded on
//! `relay_notify::webhook::WebhookDispatcher::write_dead_letter`: build a
//! `serde_json::json!` object, serialize it to one line, append with
//! `OpenOptions::new().create(true).append(true)`.

use std::fs::OpenOptions;
use std::io::Write as _;

use chrono::Utc;
use tracing::error;

use relay_core::types::Platform;

/// The feedback bucket a reaction emoji falls into, per the known-emoji
/// table in spec §4.3. Anything outside that table is not feedback at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedbackKind {
    Positive,
    Negative,
    Save,
    Acknowledge,
}

/// `stop_sign`/`octagonal_sign` are handled by the caller before this is
/// even consulted — they cancel a run rather than log feedback.
pub fn is_cancel_reaction(emoji: &str) -> bool {
    matches!(emoji, "stop_sign" | "octagonal_sign")
}

pub fn classify_reaction(emoji: &str) -> Option<FeedbackKind> {
    match emoji {
        "thumbsup" | "+1" => Some(FeedbackKind::Positive),
        "thumbsdown" | "-1" => Some(FeedbackKind::Negative),
        "star" | "glowing_star" => Some(FeedbackKind::Save),
        "eyes" => Some(FeedbackKind::Acknowledge),
        _ => None,
    }
}

/// Append one feedback entry to `feedback.jsonl`. Mirrors
/// `WebhookDispatcher::write_dead_letter`'s log-and-swallow-IO-errors
/// approach: a failure to record feedback must never fail the reaction
/// handling path.
pub fn log_feedback(
    path: &str,
    platform: Platform,
    conversation_id: &str,
    user_id: &str,
    emoji: &str,
    kind: FeedbackKind,
) {
    let entry = serde_json::json!({
        "platform": platform.to_string(),
        "conversation_id": conversation_id,
        "user_id": user_id,
        "emoji": emoji,
        "kind": format!("{kind:?}").to_lowercase(),
        "recorded_at": Utc::now().to_rfc3339(),
    });
    let line = match serde_json::to_string(&entry) {
        Ok(l) => l,
        Err(e) => {
            error!(error = %e, "failed to serialize feedback entry");
            return;
        }
    };
    match OpenOptions::new().create(true).append(true).open(path) {
        Ok(mut f) => {
            if let Err(e) = writeln!(f, "{line}") {
                error!(error = %e, "failed to append feedback entry");
            }
        }
        Err(e) => error!(error = %e, path, "failed to open feedback log"),
    }
}

/// Append a save-type reaction's referenced message to the project's
/// durable memory file. Creates the `memory/` directory on first use.
pub fn append_durable_memory(path: &str, text: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            error!(error = %e, path, "failed to create memory directory");
            return;
        }
    }
    match OpenOptions::new().create(true).append(true).open(path) {
        Ok(mut f) => {
            if let Err(e) = writeln!(f, "- {text}") {
                error!(error = %e, "failed to append durable memory entry");
            }
        }
        Err(e) => error!(error = %e, path, "failed to open durable memory file"),
    }
}

/// Thread reply posted for a negative-feedback reaction, asking the user
/// to say more about what went wrong.
pub fn negative_followup_prompt() -> &'static str {
    "Thanks for the feedback. What would you have wanted instead?"
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn classifies_known_emoji_aliases() {
        assert_eq!(classify_reaction("thumbsup"), Some(FeedbackKind::Positive));
        assert_eq!(classify_reaction("+1"), Some(FeedbackKind::Positive));
        assert_eq!(classify_reaction("thumbsdown"), Some(FeedbackKind::Negative));
        assert_eq!(classify_reaction("-1"), Some(FeedbackKind::Negative));
        assert_eq!(classify_reaction("star"), Some(FeedbackKind::Save));
        assert_eq!(classify_reaction("glowing_star"), Some(FeedbackKind::Save));
        assert_eq!(classify_reaction("eyes"), Some(FeedbackKind::Acknowledge));
    }

    #[test]
    fn unknown_emoji_is_not_feedback() {
        assert_eq!(classify_reaction("tada"), None);
    }

    #[test]
    fn stop_sign_and_octagonal_sign_are_cancel_reactions() {
        assert!(is_cancel_reaction("stop_sign"));
        assert!(is_cancel_reaction("octagonal_sign"));
        assert!(!is_cancel_reaction("eyes"));
    }

    #[test]
    fn log_feedback_appends_one_json_line() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("feedback.jsonl");
        let path = path.to_str().unwrap();
        log_feedback(path, Platform::Slack, "conv1", "u1", "thumbsup", FeedbackKind::Positive);
        log_feedback(path, Platform::Slack, "conv1", "u2", "star", FeedbackKind::Save);
        let contents = std::fs::read_to_string(path).unwrap();
        assert_eq!(contents.lines().count(), 2);
        assert!(contents.contains("\"kind\":\"positive\""));
    }

    #[test]
    fn append_durable_memory_creates_parent_directory() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("memory").join("proj.md");
        let path = path.to_str().unwrap();
        append_durable_memory(path, "remember this");
        let contents = std::fs::read_to_string(path).unwrap();
        assert_eq!(contents, "- remember this\n");
    }
}
