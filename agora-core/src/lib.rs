//! Agora Core - conversation model and search primitives
//!
//! This crate provides the foundational types shared by every other crate:
//! - Chat messages and roles
//! - The per-agent append-only conversation store
//! - Search hits and the synthetic context they inject
//! - Search engine registry

pub mod message;
pub mod conversation;
pub mod search;
pub mod search_engines;

pub use message::*;
pub use conversation::*;
pub use search::*;
pub use search_engines::*;

/// Maximum number of result blocks extracted per search
pub const MAX_SEARCH_RESULTS: usize = 5;

/// Fixed wait after submitting a query, in milliseconds
pub const DEFAULT_SETTLE_DELAY_MS: u64 = 2000;

/// Assistant reply recorded after search results are injected into a conversation
pub const DEFAULT_SEARCH_ACKNOWLEDGEMENT: &str =
    "I have received the search results and will refer to them in my answers.";
