//! CLI configuration

use anyhow::Context;
use qrchain_ledger::{ActorId, LedgerConfig};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CliConfig {
    #[serde(default)]
    pub state: StateConfig,

    #[serde(default)]
    pub ledger: LedgerConfig,

    /// Short names for actor identities, used by `--as` and identity arguments
    #[serde(default)]
    pub actors: BTreeMap<String, String>,
}

/// Where ledger state is persisted between invocations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    #[serde(default = "default_state_path")]
    pub path: PathBuf,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            path: default_state_path(),
        }
    }
}

fn default_state_path() -> PathBuf {
    PathBuf::from("qrchain-state.json")
}

impl CliConfig {
    /// Load from `path`, falling back to defaults when the file is absent.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            info!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_toml(&content).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Resolve an alias from `[actors]`; anything else is taken literally.
    pub fn resolve_actor(&self, name: &str) -> ActorId {
        match self.actors.get(name) {
            Some(identity) => ActorId::new(identity.as_str()),
            None => ActorId::new(name),
        }
    }

    /// Reverse lookup for display: the alias bound to `identity`, if any.
    pub fn alias_of(&self, identity: &ActorId) -> Option<&str> {
        self.actors
            .iter()
            .find(|(_, id)| id.as_str() == identity.as_str())
            .map(|(alias, _)| alias.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qrchain_ledger::Role;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = CliConfig::from_toml("").unwrap();
        assert_eq!(config.state.path, PathBuf::from("qrchain-state.json"));
        assert_eq!(config.ledger.event_capacity, 256);
        assert_eq!(config.ledger.owner_seed_role, Some(Role::Producer));
        assert!(config.actors.is_empty());
    }

    #[test]
    fn test_full_config() {
        let config = CliConfig::from_toml(
            r#"
[state]
path = "/var/lib/qrchain/ledger.json"

[ledger]
ledger_id = "durian-line"
event_capacity = 64
owner_seed_role = "retailer"

[actors]
farmer = "0xF00D"
truck = "0xBEEF"
"#,
        )
        .unwrap();

        assert_eq!(config.state.path, PathBuf::from("/var/lib/qrchain/ledger.json"));
        assert_eq!(config.ledger.ledger_id, "durian-line");
        assert_eq!(config.ledger.event_capacity, 64);
        assert_eq!(config.ledger.owner_seed_role, Some(Role::Retailer));
        assert_eq!(config.resolve_actor("truck"), ActorId::new("0xBEEF"));
        assert_eq!(config.resolve_actor("0xCAFE"), ActorId::new("0xCAFE"));
        assert_eq!(config.alias_of(&ActorId::new("0xF00D")), Some("farmer"));
        assert_eq!(config.alias_of(&ActorId::new("0xCAFE")), None);
    }

    #[test]
    fn test_sample_config_loads() {
        let config = CliConfig::from_toml(include_str!("../qrchain.toml")).unwrap();
        assert_eq!(config.ledger.ledger_id, "durian-supply-chain");
        assert_eq!(
            config.resolve_actor("farmer"),
            ActorId::new("0x70997970C51812dc3A010C7d01b50e0d17dc79C8")
        );
    }

    #[test]
    fn test_missing_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let config = CliConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert!(config.actors.is_empty());
    }
}
