//! Serializable images of full ledger state.
//!
//! A snapshot is how ledger state leaves the process: the CLI persists one
//! between invocations, and tests use them to compare ledgers. Restoring
//! re-checks every structural invariant instead of trusting the input.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};

use crate::ledger::LedgerState;
use crate::products::ProductTable;
use crate::registry::RoleRegistry;
use crate::role::Role;
use crate::types::{ActorId, HistoryEntry, ProductId};

/// Error types for snapshot restore.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SnapshotError {
    /// Owner identity is empty
    #[error("Snapshot has no owner")]
    MissingOwner,

    /// Product IDs are not 1, 2, 3, ...
    #[error("Product IDs out of sequence: expected {expected}, found {found}")]
    NonSequentialId { expected: ProductId, found: ProductId },

    /// Product without its creation entry
    #[error("Product {0} has an empty history")]
    EmptyHistory(ProductId),

    /// Empty product code
    #[error("Product {0} has an empty code")]
    EmptyCode(ProductId),

    /// Two products share a code
    #[error("Code '{0}' is registered to more than one product")]
    DuplicateCode(String),

    /// History timestamps go backwards
    #[error("Product {0} has history entries out of timestamp order")]
    OutOfOrderHistory(ProductId),

    /// A role map entry with an empty identity
    #[error("Role assigned to an empty identity")]
    EmptyIdentity,
}

/// One product as captured in a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductRecord {
    pub id: ProductId,
    pub code: String,
    pub history: Vec<HistoryEntry>,
}

/// Full ledger state at a point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    /// Ledger the snapshot was taken from
    pub ledger_id: String,
    /// Owner at capture time
    pub owner: ActorId,
    /// Identities holding a role other than `none`
    pub roles: BTreeMap<ActorId, Role>,
    /// Products in ID order
    pub products: Vec<ProductRecord>,
    /// Latest commit timestamp, if anything was ever committed
    pub last_timestamp: Option<DateTime<Utc>>,
}

impl LedgerSnapshot {
    pub(crate) fn capture(ledger_id: &str, state: &LedgerState) -> Self {
        Self {
            ledger_id: ledger_id.to_string(),
            owner: state.registry.owner().clone(),
            roles: state
                .registry
                .assignments()
                .map(|(id, role)| (id.clone(), role))
                .collect(),
            products: state
                .products
                .iter()
                .map(|(id, product)| ProductRecord {
                    id,
                    code: product.code.clone(),
                    history: product.history.clone(),
                })
                .collect(),
            last_timestamp: state.last_timestamp,
        }
    }

    /// Validate and rebuild in-memory state.
    pub(crate) fn into_state(self) -> Result<LedgerState, SnapshotError> {
        if self.owner.is_empty() {
            return Err(SnapshotError::MissingOwner);
        }

        let mut registry = RoleRegistry::new(self.owner);
        for (identity, role) in self.roles {
            if identity.is_empty() {
                return Err(SnapshotError::EmptyIdentity);
            }
            registry.assign(identity, role);
        }

        let mut products = ProductTable::new();
        let mut seen = HashSet::new();
        let mut last_timestamp = self.last_timestamp;
        for record in self.products {
            let expected = products.next_id();
            if record.id != expected {
                return Err(SnapshotError::NonSequentialId {
                    expected,
                    found: record.id,
                });
            }
            if record.code.is_empty() {
                return Err(SnapshotError::EmptyCode(record.id));
            }
            if !seen.insert(record.code.clone()) {
                return Err(SnapshotError::DuplicateCode(record.code));
            }

            if record
                .history
                .windows(2)
                .any(|pair| pair[1].timestamp < pair[0].timestamp)
            {
                return Err(SnapshotError::OutOfOrderHistory(record.id));
            }

            let mut entries = record.history.into_iter();
            let first = entries.next().ok_or(SnapshotError::EmptyHistory(record.id))?;
            last_timestamp = last_timestamp.max(Some(first.timestamp));
            let id = products.insert(record.code, first);
            for entry in entries {
                last_timestamp = last_timestamp.max(Some(entry.timestamp));
                // The ID was allocated just above, so the append cannot miss.
                let _ = products.append(id, entry);
            }
        }

        Ok(LedgerState {
            registry,
            products,
            last_timestamp,
        })
    }

    /// Hex SHA-256 of the snapshot's canonical JSON form.
    pub fn digest(&self) -> Result<String, serde_json::Error> {
        let json = serde_json::to_vec(self)?;
        Ok(compute_hash(&json))
    }

    /// Total number of history entries across all products.
    pub fn entry_count(&self) -> usize {
        self.products.iter().map(|p| p.history.len()).sum()
    }
}

/// Compute SHA256 hash of content.
pub fn compute_hash(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}
