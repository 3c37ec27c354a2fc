//! Events delivered to the presentation boundary

use uuid::Uuid;

/// Progress notifications from the orchestrator
///
/// Agent events carry the agent id and the exchange they belong to, so
/// concurrent streams stay attributed. Within one exchange, chunks arrive in
/// the order the backend produced them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    /// An agent began answering a user message
    Started {
        agent_id: String,
        display_name: String,
        exchange_id: Uuid,
    },
    /// A streamed content delta
    Chunk {
        agent_id: String,
        exchange_id: Uuid,
        text: String,
    },
    /// The reply finished and was recorded
    Completed {
        agent_id: String,
        exchange_id: Uuid,
        full_text: String,
    },
    /// The exchange failed; the user message stays in history
    Failed {
        agent_id: String,
        exchange_id: Uuid,
        error: String,
    },
    SearchStarted {
        query: String,
    },
    /// Results were injected into every agent's conversation
    SearchCompleted {
        query: String,
        snippet_text: String,
        agents_updated: usize,
    },
    SearchFailed {
        message: String,
    },
}

impl ChatEvent {
    /// Whether this event ends an agent exchange
    pub fn ends_exchange(&self) -> bool {
        matches!(self, ChatEvent::Completed { .. } | ChatEvent::Failed { .. })
    }
}
