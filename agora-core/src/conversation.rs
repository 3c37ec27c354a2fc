//! Conversation store - per-agent message logs
//!
//! Each registered agent owns an ordered, append-only log that is replayed
//! as context on every request:
//! - System messages are never stored (the persona prompt is injected per request)
//! - Messages are never removed or edited
//! - Order is chronological and defines request context order

use dashmap::DashMap;
use thiserror::Error;

use crate::{Message, Role};

/// Errors from conversation store operations
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Unknown agent: {0}")]
    UnknownAgent(String),

    #[error("System messages cannot be stored in a conversation")]
    SystemRole,
}

/// Mapping of agent id to its ordered message log
#[derive(Debug, Default)]
pub struct ConversationStore {
    logs: DashMap<String, Vec<Message>>,
}

impl ConversationStore {
    /// Create an empty store with no registered agents
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an agent with an empty log
    ///
    /// Registering an id twice keeps the existing history.
    pub fn register(&self, agent_id: &str) {
        self.logs.entry(agent_id.to_string()).or_default();
    }

    /// Check whether an agent has a log
    pub fn contains(&self, agent_id: &str) -> bool {
        self.logs.contains_key(agent_id)
    }

    /// Append one message to an agent's log
    pub fn append(&self, agent_id: &str, message: Message) -> Result<(), StoreError> {
        ensure_storable(&message)?;

        let mut log = self
            .logs
            .get_mut(agent_id)
            .ok_or_else(|| StoreError::UnknownAgent(agent_id.to_string()))?;
        log.push(message);
        Ok(())
    }

    /// Append a user/assistant pair as a single unit
    pub fn append_pair(
        &self,
        agent_id: &str,
        user: Message,
        assistant: Message,
    ) -> Result<(), StoreError> {
        ensure_storable(&user)?;
        ensure_storable(&assistant)?;

        let mut log = self
            .logs
            .get_mut(agent_id)
            .ok_or_else(|| StoreError::UnknownAgent(agent_id.to_string()))?;
        log.push(user);
        log.push(assistant);
        Ok(())
    }

    /// Snapshot of an agent's history
    pub fn history(&self, agent_id: &str) -> Option<Vec<Message>> {
        self.logs.get(agent_id).map(|log| log.clone())
    }

    /// Number of messages stored for an agent
    pub fn len(&self, agent_id: &str) -> usize {
        self.logs.get(agent_id).map(|log| log.len()).unwrap_or(0)
    }

    /// Ids of all registered agents, sorted
    pub fn agent_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.logs.iter().map(|entry| entry.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Check if no agent is registered
    pub fn is_empty(&self) -> bool {
        self.logs.is_empty()
    }
}

fn ensure_storable(message: &Message) -> Result<(), StoreError> {
    if message.role == Role::System {
        return Err(StoreError::SystemRole);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_keeps_order() {
        let store = ConversationStore::new();
        store.register("spinoza");

        store.append("spinoza", Message::user("first")).unwrap();
        store.append("spinoza", Message::assistant("reply")).unwrap();
        store.append("spinoza", Message::user("second")).unwrap();

        let history = store.history("spinoza").unwrap();
        let contents: Vec<_> = history.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["first", "reply", "second"]);
    }

    #[test]
    fn test_rejects_system_role() {
        let store = ConversationStore::new();
        store.register("spinoza");

        let err = store.append("spinoza", Message::system("prompt")).unwrap_err();
        assert_eq!(err, StoreError::SystemRole);
        assert_eq!(store.len("spinoza"), 0);
    }

    #[test]
    fn test_unknown_agent() {
        let store = ConversationStore::new();
        let err = store.append("nobody", Message::user("hi")).unwrap_err();
        assert_eq!(err, StoreError::UnknownAgent("nobody".to_string()));
        assert!(store.history("nobody").is_none());
    }

    #[test]
    fn test_register_is_idempotent() {
        let store = ConversationStore::new();
        store.register("zizek");
        store
            .append_pair("zizek", Message::user("q"), Message::assistant("a"))
            .unwrap();

        store.register("zizek");
        assert_eq!(store.len("zizek"), 2);
        assert_eq!(store.agent_ids(), vec!["zizek".to_string()]);
    }

    #[test]
    fn test_append_pair_rejects_before_mutating() {
        let store = ConversationStore::new();
        store.register("foucault");

        let result = store.append_pair("foucault", Message::user("q"), Message::system("x"));
        assert!(result.is_err());
        assert_eq!(store.len("foucault"), 0);
    }
}
