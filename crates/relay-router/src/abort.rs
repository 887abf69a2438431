//! Process-local registry of in-flight conversation abort controllers.
//!
//! Grounded directly on `skynet_gateway::app::AppState::active_operations`
//! (`DashMap<String, CancellationToken>`, registered per session key before
//! a pipeline run and removed once it completes) and the register/cancel
//! flow in `skynet_gateway::http::chat::chat_handler`. The relay keys by
//! `conversationId` instead of a terminal session key, and adds a `cancel`
//! that fires the token before removing it, since the admin `cancel`
//! command and the `stop_sign`/`octagonal_sign` reaction both need to abort
//! a run, not merely drop bookkeeping for one that already finished.

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

/// conversation_id -> the token its in-flight run is watching.
#[derive(Default)]
pub struct AbortRegistry {
    tokens: DashMap<String, CancellationToken>,
}

impl AbortRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint and register a fresh token for a conversation about to start a
    /// run. Overwrites (without cancelling) any stale entry left behind by
    /// a run that didn't unregister cleanly.
    pub fn register(&self, conversation_id: &str) -> CancellationToken {
        let token = CancellationToken::new();
        self.tokens.insert(conversation_id.to_string(), token.clone());
        token
    }

    /// Remove the token for a conversation without cancelling it — called
    /// unconditionally once a run finishes.
    pub fn unregister(&self, conversation_id: &str) {
        self.tokens.remove(conversation_id);
    }

    /// Cancel and remove the token for a conversation. Returns `true` if a
    /// run was actually registered (and therefore cancelled).
    pub fn cancel(&self, conversation_id: &str) -> bool {
        match self.tokens.remove(conversation_id) {
            Some((_, token)) => {
                token.cancel();
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_then_cancel_fires_the_token() {
        let registry = AbortRegistry::new();
        let token = registry.register("conv1");
        assert!(!token.is_cancelled());
        assert!(registry.cancel("conv1"));
        assert!(token.is_cancelled());
    }

    #[test]
    fn cancel_on_unknown_conversation_is_noop() {
        let registry = AbortRegistry::new();
        assert!(!registry.cancel("missing"));
    }

    #[test]
    fn unregister_removes_without_cancelling() {
        let registry = AbortRegistry::new();
        let token = registry.register("conv1");
        registry.unregister("conv1");
        assert!(!token.is_cancelled());
        assert!(!registry.cancel("conv1"));
    }

    #[test]
    fn re_registering_overwrites_the_previous_token() {
        let registry = AbortRegistry::new();
        let first = registry.register("conv1");
        let second = registry.register("conv1");
        registry.cancel("conv1");
        assert!(!first.is_cancelled());
        assert!(second.is_cancelled());
    }
}
