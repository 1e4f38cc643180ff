//! Gateway configuration and the static model catalog.
//!
//! `config.json` is read once at startup; a missing or unparsable file is a
//! fatal error. The catalog itself is shared read-only afterwards, except for
//! the learned per-model VRAM footprint which the lifecycle controller
//! refines after each successful load.

use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;

use serde::Deserialize;

use crate::error::{GatewayError, Result};

/// One backend model known to the gateway.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelSpec {
    /// Unique model name, as clients send it in the `model` field.
    pub name: String,
    /// Base URL of the backend HTTP server this model exposes once loaded.
    #[serde(rename = "location")]
    pub upstream: String,
    /// Shell command that starts the backend. Absent for remote-only models,
    /// which are treated as always resident and take no VRAM here.
    #[serde(rename = "load_command")]
    pub spawn_command: Option<String>,
    /// VRAM footprint in MiB. Optional; estimated from the name and learned
    /// after the first load if absent.
    #[serde(rename = "vram")]
    pub vram_estimate_mib: Option<u64>,
}

/// Top-level `config.json` document.
#[derive(Debug, Deserialize)]
pub struct Config {
    pub port: u16,
    #[serde(default)]
    pub models: Vec<ModelSpec>,
}

impl Config {
    /// Load the configuration from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            GatewayError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&content).map_err(|e| {
            GatewayError::Config(format!("Failed to parse {}: {}", path.display(), e))
        })
    }
}

/// Process-wide model catalog, keyed by model name.
///
/// Learned VRAM footprints live in an interior map so the specs themselves
/// stay immutable. Nothing is persisted back to disk.
pub struct ModelCatalog {
    specs: Vec<ModelSpec>,
    index: HashMap<String, usize>,
    learned_vram: RwLock<HashMap<String, u64>>,
}

impl ModelCatalog {
    pub fn new(models: Vec<ModelSpec>) -> Self {
        let index = models
            .iter()
            .enumerate()
            .map(|(i, spec)| (spec.name.clone(), i))
            .collect();
        Self {
            specs: models,
            index,
            learned_vram: RwLock::new(HashMap::new()),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Look up a model, with any learned VRAM footprint folded in.
    pub fn get(&self, name: &str) -> Option<ModelSpec> {
        let mut spec = self.specs.get(*self.index.get(name)?)?.clone();
        if let Ok(learned) = self.learned_vram.read() {
            if let Some(&mib) = learned.get(name) {
                spec.vram_estimate_mib = Some(mib);
            }
        }
        Some(spec)
    }

    /// Model names in configuration order.
    pub fn list(&self) -> Vec<String> {
        self.specs.iter().map(|spec| spec.name.clone()).collect()
    }

    /// Record a measured VRAM footprint. Called only by the lifecycle
    /// controller, under its load/unload lock.
    pub fn update_vram(&self, name: &str, mib: u64) {
        if let Ok(mut learned) = self.learned_vram.write() {
            learned.insert(name.to_string(), mib);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str, vram: Option<u64>) -> ModelSpec {
        ModelSpec {
            name: name.to_string(),
            upstream: format!("http://127.0.0.1:9000/{}", name),
            spawn_command: Some(format!("serve-{}", name)),
            vram_estimate_mib: vram,
        }
    }

    #[test]
    fn test_parse_config() {
        let raw = r#"{
            "port": 5000,
            "models": [
                { "name": "llama-7b", "location": "http://127.0.0.1:8001", "load_command": "run-llama" },
                { "name": "remote", "location": "http://10.0.0.2:8000", "vram": 4000 }
            ]
        }"#;
        let config: Config = serde_json::from_str(raw).unwrap();
        assert_eq!(config.port, 5000);
        assert_eq!(config.models.len(), 2);
        assert_eq!(config.models[0].spawn_command.as_deref(), Some("run-llama"));
        assert!(config.models[1].spawn_command.is_none());
        assert_eq!(config.models[1].vram_estimate_mib, Some(4000));
    }

    #[test]
    fn test_parse_config_rejects_missing_port() {
        assert!(serde_json::from_str::<Config>(r#"{"models": []}"#).is_err());
    }

    #[test]
    fn test_load_missing_file_is_error() {
        let err = Config::load(Path::new("/nonexistent/config.json")).unwrap_err();
        assert!(matches!(err, GatewayError::Config(_)));
    }

    #[test]
    fn test_catalog_lookup() {
        let catalog = ModelCatalog::new(vec![spec("a", None), spec("b", Some(4000))]);
        assert!(catalog.contains("a"));
        assert!(!catalog.contains("ghost"));
        assert!(catalog.get("ghost").is_none());
        assert_eq!(catalog.list(), vec!["a", "b"]);
        assert_eq!(catalog.get("b").unwrap().vram_estimate_mib, Some(4000));
    }

    #[test]
    fn test_learned_vram_overrides_spec() {
        let catalog = ModelCatalog::new(vec![spec("a", None)]);
        assert_eq!(catalog.get("a").unwrap().vram_estimate_mib, None);

        catalog.update_vram("a", 1050);
        assert_eq!(catalog.get("a").unwrap().vram_estimate_mib, Some(1050));
    }
}
