//! Bounded cache of Slack user id -> display name.
//!
//! Inbound events rarely carry a resolved display name, so showing one
//! means a `users.info` call; caching keeps that off the hot path for
//! chatty channels.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use lru::LruCache;
use slack_morphism::prelude::*;
use tracing::warn;

const CACHE_CAPACITY: usize = 512;

pub struct DisplayNameCache {
    client: Arc<SlackHyperClient>,
    token: SlackApiToken,
    cache: Mutex<LruCache<String, String>>,
}

impl DisplayNameCache {
    pub fn new(client: Arc<SlackHyperClient>, token: SlackApiToken) -> Self {
        Self {
            client,
            token,
            cache: Mutex::new(LruCache::new(NonZeroUsize::new(CACHE_CAPACITY).unwrap())),
        }
    }

    /// Resolve `user_id` to a display name. Falls back to the bare id on any
    /// lookup failure — a naming hiccup shouldn't block the message.
    pub async fn resolve(&self, user_id: &str) -> String {
        if let Some(name) = self.cache.lock().unwrap().get(user_id).cloned() {
            return name;
        }

        let session = self.client.open_session(&self.token);
        let request = SlackApiUsersInfoRequest::new(user_id.into());
        let name = match session.users_info(&request).await {
            Ok(resp) => resp
                .user
                .profile
                .and_then(|p| p.display_name.or(p.real_name))
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| user_id.to_string()),
            Err(e) => {
                warn!(error = %e, user_id, "slack: users.info lookup failed, using raw id");
                user_id.to_string()
            }
        };

        self.cache.lock().unwrap().put(user_id.to_string(), name.clone());
        name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_capacity_is_nonzero() {
        assert!(CACHE_CAPACITY > 0);
    }
}
