//! Configuration for a ledger instance.

use serde::{Deserialize, Serialize};

use crate::role::Role;

/// Ledger configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Identifier used in logs and stamped on snapshots
    pub ledger_id: String,
    /// Events buffered per subscriber before a slow one starts skipping
    pub event_capacity: usize,
    /// Role granted to the deployer at creation (`None` to skip seeding)
    pub owner_seed_role: Option<Role>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            ledger_id: uuid::Uuid::new_v4().to_string(),
            event_capacity: 256,
            owner_seed_role: Some(Role::Producer),
        }
    }
}

impl LedgerConfig {
    /// Create a new config with a fixed ledger ID.
    pub fn new(ledger_id: impl Into<String>) -> Self {
        Self {
            ledger_id: ledger_id.into(),
            ..Default::default()
        }
    }

    /// Builder: set the deployer's seed role.
    pub fn with_owner_seed_role(mut self, role: Option<Role>) -> Self {
        self.owner_seed_role = role;
        self
    }

    /// Builder: set the per-subscriber event buffer.
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Load config from YAML.
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    /// Serialize to YAML.
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LedgerConfig::default();
        assert_eq!(config.event_capacity, 256);
        assert_eq!(config.owner_seed_role, Some(Role::Producer));
        assert!(!config.ledger_id.is_empty());
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config = LedgerConfig::from_yaml("ledger_id: durian-main\nowner_seed_role: null\n").unwrap();
        assert_eq!(config.ledger_id, "durian-main");
        assert_eq!(config.owner_seed_role, None);
        assert_eq!(config.event_capacity, 256);
    }

    #[test]
    fn test_yaml_roundtrip() {
        let config = LedgerConfig::new("test-ledger").with_owner_seed_role(Some(Role::Retailer));
        let yaml = config.to_yaml().unwrap();
        assert!(yaml.contains("retailer"));
        assert_eq!(LedgerConfig::from_yaml(&yaml).unwrap(), config);
    }
}
