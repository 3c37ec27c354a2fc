//! Search hits and the synthetic context they add to conversations

use serde::{Deserialize, Serialize};

use crate::Message;

/// Successful result of one web search
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    /// The query as submitted (trimmed)
    pub query: String,
    /// Extracted snippets separated by blank lines
    pub snippet_text: String,
}

impl SearchHit {
    pub fn new(query: impl Into<String>, snippet_text: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            snippet_text: snippet_text.into(),
        }
    }

    /// Render the synthetic user message that carries these results
    pub fn context_message(&self) -> Message {
        Message::user(format!(
            "The following are web search results for '{}'. Please refer to this information when answering:\n\n{}",
            self.query, self.snippet_text
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Role;

    #[test]
    fn test_context_message() {
        let hit = SearchHit::new("rhizome", "A rhizome has no center.");
        let message = hit.context_message();

        assert_eq!(message.role, Role::User);
        assert!(message.content.contains("'rhizome'"));
        assert!(message.content.ends_with("\n\nA rhizome has no center."));
    }
}
