//! Common types for the qrchain-ledger crate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[cfg(feature = "typescript")]
use ts_rs::TS;

/// Location recorded on the first entry of every product.
pub const FARM_LOCATION: &str = "Farm";
/// Note recorded on the first entry of every product.
pub const CREATED_NOTE: &str = "Product created by farmer";
/// Note recorded on every transporter checkpoint.
pub const TRANSPORT_NOTE: &str = "Location updated by transporter";
/// Location recorded on every retailer update.
pub const RETAIL_LOCATION: &str = "Retail Store";
/// Note recorded on every retailer update.
pub const RETAIL_NOTE: &str = "Final status updated by retailer";

/// Opaque actor handle (typically a wallet address).
///
/// The ledger never interprets the contents; identity is asserted by
/// whoever opens a [`crate::Caller`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(transparent)]
pub struct ActorId(String);

impl ActorId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ActorId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ActorId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&ActorId> for ActorId {
    fn from(id: &ActorId) -> Self {
        id.clone()
    }
}

/// Sequential product identifier. IDs start at 1; 0 never resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(transparent)]
pub struct ProductId(u64);

impl ProductId {
    /// The "does not exist" sentinel.
    pub const NONE: ProductId = ProductId(0);

    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub const fn get(self) -> u64 {
        self.0
    }

    pub(crate) fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Zero-based position in the product table, if this can be a real product.
    pub(crate) fn index(self) -> Option<usize> {
        usize::try_from(self.0).ok()?.checked_sub(1)
    }
}

impl fmt::Display for ProductId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ProductId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// One immutable checkpoint in a product's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct HistoryEntry {
    /// Who appended the entry
    pub actor: ActorId,
    /// Commit time assigned by the ledger clock
    pub timestamp: DateTime<Utc>,
    /// Where the product was
    pub location: String,
    /// Free-form status text
    pub status: String,
    /// Fixed note describing the kind of checkpoint
    pub note: String,
}

/// Result of resolving a scanned code: the product and its full history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductTrace {
    pub id: ProductId,
    pub code: String,
    pub history: Vec<HistoryEntry>,
}

impl ProductTrace {
    /// The most recent checkpoint.
    pub fn latest(&self) -> Option<&HistoryEntry> {
        self.history.last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_product_id_index() {
        assert_eq!(ProductId::NONE.index(), None);
        assert_eq!(ProductId::new(1).index(), Some(0));
        assert_eq!(ProductId::new(42).index(), Some(41));
        assert_eq!(ProductId::new(1).next(), ProductId::new(2));
    }

    #[test]
    fn test_actor_id_serializes_as_plain_string() {
        let actor = ActorId::new("0xFarmer");
        let json = serde_json::to_string(&actor).unwrap();
        assert_eq!(json, "\"0xFarmer\"");
        let back: ActorId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, actor);
    }
}
