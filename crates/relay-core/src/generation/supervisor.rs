//! One active turn per conversation.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use tokio_util::sync::CancellationToken;

/// Tracks the cancellation token of each conversation's latest turn.
///
/// Starting a turn cancels the previous one for the same conversation, so
/// the newest request always wins. Conversations never affect each other.
#[derive(Debug, Default)]
pub struct ConversationSupervisor {
    active: Mutex<HashMap<String, CancellationToken>>,
}

impl ConversationSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a fresh token for `conversation_id`, cancelling the one handed
    /// out before it.
    pub fn begin(&self, conversation_id: &str) -> CancellationToken {
        let token = CancellationToken::new();
        let previous = self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(conversation_id.to_string(), token.clone());
        if let Some(previous) = previous
            && !previous.is_cancelled()
        {
            tracing::debug!(conversation_id, "cancelling previous turn");
            previous.cancel();
        }
        token
    }

    /// Releases a turn that ran to completion.
    ///
    /// `token` is cancelled, and the conversation's entry is dropped unless a
    /// newer, still live turn has replaced it.
    pub fn finish(&self, conversation_id: &str, token: &CancellationToken) {
        token.cancel();
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if active
            .get(conversation_id)
            .is_some_and(CancellationToken::is_cancelled)
        {
            active.remove(conversation_id);
        }
    }

    /// Number of conversations with a tracked turn.
    pub fn active_count(&self) -> usize {
        self.active.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Cancels and forgets the conversation's latest turn. Returns false when
    /// the conversation had none.
    pub fn cancel(&self, conversation_id: &str) -> bool {
        let token = self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(conversation_id);
        match token {
            Some(token) => {
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
    fn test_new_turn_cancels_previous_in_same_conversation() {
        let supervisor = ConversationSupervisor::new();
        let first = supervisor.begin("a");
        let other = supervisor.begin("b");
        let second = supervisor.begin("a");

        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
        assert!(!other.is_cancelled());
    }

    #[test]
    fn test_finished_turns_are_forgotten() {
        let supervisor = ConversationSupervisor::new();
        let a = supervisor.begin("a");
        let b = supervisor.begin("b");
        supervisor.finish("a", &a);
        supervisor.finish("b", &b);

        assert_eq!(supervisor.active_count(), 0);
        assert!(!supervisor.cancel("a"));
    }

    #[test]
    fn test_finishing_stale_turn_keeps_newer_one() {
        let supervisor = ConversationSupervisor::new();
        let stale = supervisor.begin("a");
        let current = supervisor.begin("a");
        supervisor.finish("a", &stale);

        assert_eq!(supervisor.active_count(), 1);
        assert!(!current.is_cancelled());
        assert!(supervisor.cancel("a"));
        assert!(current.is_cancelled());
    }

    #[test]
    fn test_cancel_removes_conversation() {
        let supervisor = ConversationSupervisor::new();
        let token = supervisor.begin("a");
        assert!(supervisor.cancel("a"));
        assert!(token.is_cancelled());
        assert!(!supervisor.cancel("a"));
    }
}
