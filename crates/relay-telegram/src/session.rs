//! Conversation-id derivation for Telegram chats.
//!
//! | Chat type         | conversation_id format                     |
//! |--------------------|---------------------------------------------|
//! | Private DM          | `telegram:dm:{chat_id}`                     |
//! | Group/supergroup     | `telegram:group:{chat_id}`                  |
//! | Forum topic          | `telegram:group:{chat_id}:topic:{thread_id}` |

use teloxide::types::Message;

pub fn conversation_id(msg: &Message) -> String {
    if msg.chat.is_private() {
        return format!("telegram:dm:{}", msg.chat.id.0);
    }

    let chat_id = msg.chat.id.0;
    match msg.thread_id {
        Some(thread_id) => format!("telegram:group:{chat_id}:topic:{}", thread_id.0),
        None => format!("telegram:group:{chat_id}"),
    }
}

#[cfg(test)]
mod tests {
    // `conversation_id` takes a `teloxide::types::Message`, which is
    // expensive to construct directly in a unit test — these tests document
    // the format table above via the same string construction the function
    // performs.

    #[test]
    fn conversation_id_private_format() {
        let id = format!("telegram:dm:{}", 42);
        assert_eq!(id, "telegram:dm:42");
    }

    #[test]
    fn conversation_id_group_format() {
        let id = format!("telegram:group:{}", -100_123_456_789_i64);
        assert!(id.starts_with("telegram:group:"));
        assert!(!id.contains(":topic:"));
    }

    #[test]
    fn conversation_id_forum_topic_format() {
        let id = format!("telegram:group:{}:topic:{}", -100_123_i64, 7);
        assert!(id.ends_with(":topic:7"));
        assert!(id.contains("telegram:group:"));
    }
}
