//! Persona management for conversation agents
//!
//! Loads persona definitions from TOML files. Each enabled persona becomes an
//! [`AgentProfile`]: an id, a display label and a system prompt. The registry
//! is built once at startup and shared read-only.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, warn};

/// A persona definition loaded from TOML
#[derive(Debug, Clone, Deserialize)]
struct PersonaFile {
    persona: PersonaMetadata,
    prompt: PromptConfig,
}

#[derive(Debug, Clone, Deserialize)]
struct PersonaMetadata {
    id: String,
    name: String,
    #[serde(default = "default_enabled")]
    enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct PromptConfig {
    system: String,
}

fn default_enabled() -> bool {
    true
}

/// An agent identity with a fixed system prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentProfile {
    pub id: String,
    pub display_name: String,
    pub system_prompt: String,
}

impl From<PersonaFile> for AgentProfile {
    fn from(file: PersonaFile) -> Self {
        Self {
            id: file.persona.id,
            display_name: file.persona.name,
            system_prompt: file.prompt.system.trim().to_string(),
        }
    }
}

/// Id and label of an agent, for selection controls
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentSummary {
    pub id: String,
    pub display_name: String,
}

/// Ordered registry of agent profiles
#[derive(Debug, Default)]
pub struct AgentRegistry {
    profiles: Vec<AgentProfile>,
    index: HashMap<String, usize>,
}

impl AgentRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the personas compiled into the binary
    pub fn load_embedded() -> Self {
        let mut registry = Self::new();

        let embedded = [
            ("deleuze.toml", include_str!("../prompts/deleuze.toml")),
            ("spinoza.toml", include_str!("../prompts/spinoza.toml")),
            ("ranciere.toml", include_str!("../prompts/ranciere.toml")),
            ("foucault.toml", include_str!("../prompts/foucault.toml")),
            ("zizek.toml", include_str!("../prompts/zizek.toml")),
        ];

        for (source, toml_str) in embedded {
            registry.register_toml(source, toml_str);
        }

        registry
    }

    /// Load personas from a directory, in file-name order
    pub fn load_from_dir<P: AsRef<Path>>(dir: P) -> std::io::Result<Self> {
        let mut registry = Self::new();

        let mut paths = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "toml") {
                paths.push(path);
            }
        }
        paths.sort();

        for path in paths {
            match std::fs::read_to_string(&path) {
                Ok(content) => registry.register_toml(&path.display().to_string(), &content),
                Err(e) => warn!("Skipping persona {}: {}", path.display(), e),
            }
        }

        Ok(registry)
    }

    fn register_toml(&mut self, source: &str, toml_str: &str) {
        match toml::from_str::<PersonaFile>(toml_str) {
            Ok(file) if file.persona.enabled => self.register(file.into()),
            Ok(file) => debug!("Persona {} is disabled", file.persona.id),
            Err(e) => warn!("Skipping malformed persona {}: {}", source, e),
        }
    }

    /// Register a profile; the first definition of an id wins
    pub fn register(&mut self, profile: AgentProfile) {
        if self.index.contains_key(&profile.id) {
            warn!("Duplicate persona id {}, keeping the first definition", profile.id);
            return;
        }
        self.index.insert(profile.id.clone(), self.profiles.len());
        self.profiles.push(profile);
    }

    /// Get a profile by ID
    pub fn get(&self, id: &str) -> Option<&AgentProfile> {
        self.index.get(id).map(|&i| &self.profiles[i])
    }

    /// All profiles in registration order
    pub fn profiles(&self) -> &[AgentProfile] {
        &self.profiles
    }

    /// Ids and display names in registration order
    pub fn list(&self) -> Vec<AgentSummary> {
        self.profiles
            .iter()
            .map(|p| AgentSummary {
                id: p.id.clone(),
                display_name: p.display_name.clone(),
            })
            .collect()
    }

    /// List all agent IDs
    pub fn ids(&self) -> Vec<&str> {
        self.profiles.iter().map(|p| p.id.as_str()).collect()
    }

    /// Count of loaded profiles
    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    /// Check if registry is empty
    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_embedded_personas() {
        let registry = AgentRegistry::load_embedded();
        assert_eq!(registry.len(), 5);
        assert_eq!(
            registry.ids(),
            vec!["deleuze", "spinoza", "ranciere", "foucault", "zizek"]
        );

        let deleuze = registry.get("deleuze").unwrap();
        assert_eq!(deleuze.display_name, "Gilles Deleuze");
        assert!(!deleuze.system_prompt.is_empty());
    }

    #[test]
    fn test_list_is_stable() {
        let registry = AgentRegistry::load_embedded();
        assert_eq!(registry.list(), registry.list());
        assert_eq!(registry.list()[4].id, "zizek");
    }

    #[test]
    fn test_duplicate_id_keeps_first() {
        let mut registry = AgentRegistry::new();
        registry.register(AgentProfile {
            id: "a".to_string(),
            display_name: "First".to_string(),
            system_prompt: "one".to_string(),
        });
        registry.register(AgentProfile {
            id: "a".to_string(),
            display_name: "Second".to_string(),
            system_prompt: "two".to_string(),
        });

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("a").unwrap().display_name, "First");
    }

    #[test]
    fn test_disabled_and_malformed_are_skipped() {
        let mut registry = AgentRegistry::new();
        registry.register_toml(
            "off.toml",
            "[persona]\nid = \"off\"\nname = \"Off\"\nenabled = false\n[prompt]\nsystem = \"x\"\n",
        );
        registry.register_toml("broken.toml", "[persona]\nid = ");

        assert!(registry.is_empty());
    }

    #[test]
    fn test_load_from_dir() {
        let dir = std::env::temp_dir().join(format!("agora-personas-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("b.toml"),
            "[persona]\nid = \"b\"\nname = \"Bee\"\n[prompt]\nsystem = \"buzz\"\n",
        )
        .unwrap();
        std::fs::write(
            dir.join("a.toml"),
            "[persona]\nid = \"a\"\nname = \"Ay\"\n[prompt]\nsystem = \"hello\"\n",
        )
        .unwrap();
        std::fs::write(dir.join("notes.txt"), "ignored").unwrap();

        let registry = AgentRegistry::load_from_dir(&dir).unwrap();
        std::fs::remove_dir_all(&dir).unwrap();

        assert_eq!(registry.ids(), vec!["a", "b"]);
        assert_eq!(registry.get("b").unwrap().system_prompt, "buzz");
    }
}
