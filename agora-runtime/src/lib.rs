//! Agora Runtime
//!
//! Orchestrates concurrent conversations with several persona agents and
//! broadcasts web-search context into all of them.

pub mod events;
pub mod orchestrator;

pub use events::*;
pub use orchestrator::*;
