//! Conversation-id derivation for Slack channels.
//!
//! | Channel kind                | conversation_id format                  |
//! |------------------------------|--------------------------------------------|
//! | DM (channel id starts `D`)    | `slack:dm:{channel_id}`                   |
//! | Channel, no thread             | `slack:channel:{channel_id}`              |
//! | Channel, threaded               | `slack:channel:{channel_id}:thread:{ts}`  |

/// Slack DM channel ids are assigned the `D` prefix by the platform.
pub fn is_dm(channel_id: &str) -> bool {
    channel_id.starts_with('D')
}

pub fn conversation_id(channel_id: &str, thread_ts: Option<&str>) -> String {
    if is_dm(channel_id) {
        return format!("slack:dm:{channel_id}");
    }
    match thread_ts {
        Some(ts) => format!("slack:channel:{channel_id}:thread:{ts}"),
        None => format!("slack:channel:{channel_id}"),
    }
}

/// Extract the thread timestamp from a conversation id produced by
/// [`conversation_id`], if present.
pub fn thread_ts_of(conversation_id: &str) -> Option<&str> {
    let idx = conversation_id.find(":thread:")?;
    Some(&conversation_id[idx + ":thread:".len()..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dm_channel_detected_by_prefix() {
        assert!(is_dm("D012345"));
        assert!(!is_dm("C012345"));
    }

    #[test]
    fn conversation_id_dm_format() {
        assert_eq!(conversation_id("D012345", None), "slack:dm:D012345");
    }

    #[test]
    fn conversation_id_channel_without_thread() {
        assert_eq!(conversation_id("C012345", None), "slack:channel:C012345");
    }

    #[test]
    fn conversation_id_channel_with_thread() {
        assert_eq!(
            conversation_id("C012345", Some("1700000000.000100")),
            "slack:channel:C012345:thread:1700000000.000100"
        );
    }

    #[test]
    fn thread_ts_roundtrips_through_conversation_id() {
        let id = conversation_id("C012345", Some("1700000000.000100"));
        assert_eq!(thread_ts_of(&id), Some("1700000000.000100"));
    }

    #[test]
    fn thread_ts_absent_for_plain_channel() {
        assert_eq!(thread_ts_of("slack:channel:C012345"), None);
    }
}
