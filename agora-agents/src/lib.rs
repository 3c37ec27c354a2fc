//! Agora Agents
//!
//! Persona-scoped conversation agents:
//! - **Personas**: id, display name and system prompt, loaded from TOML
//! - **Backends**: streaming chat completions (OpenAI-compatible, Anthropic)
//!
//! ## Modular Personas
//!
//! Agent identities are defined via TOML persona files in `prompts/`.
//! See [`persona::AgentRegistry`] for loading and looking up personas.

pub mod backend;
pub mod persona;

pub use backend::*;
pub use persona::*;
