//! Supply-chain roles and the write capabilities they grant.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[cfg(feature = "typescript")]
use ts_rs::TS;

use crate::ledger::LedgerError;

/// Role held by an identity. Every identity holds exactly one; unregistered
/// identities hold [`Role::None`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// No write capability
    #[default]
    None,
    /// Creates products at the farm
    Producer,
    /// Records location checkpoints in transit
    Transporter,
    /// Records final status at the store
    Retailer,
}

/// Role-gated write actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    CreateProduct,
    AppendLocationUpdate,
    AppendStatusUpdate,
}

impl Action {
    /// The single role allowed to perform this action.
    pub fn required_role(self) -> Role {
        match self {
            Self::CreateProduct => Role::Producer,
            Self::AppendLocationUpdate => Role::Transporter,
            Self::AppendStatusUpdate => Role::Retailer,
        }
    }
}

impl Role {
    pub const ALL: [Role; 4] = [Role::None, Role::Producer, Role::Transporter, Role::Retailer];

    /// Whether this role may perform `action`.
    pub fn permits(self, action: Action) -> bool {
        self != Role::None && action.required_role() == self
    }

    /// Numeric wire code (0 = none, 1 = producer, 2 = transporter, 3 = retailer).
    pub fn code(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Producer => 1,
            Self::Transporter => 2,
            Self::Retailer => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Producer => "producer",
            Self::Transporter => "transporter",
            Self::Retailer => "retailer",
        }
    }

    /// Human description of what the role can do.
    pub fn description(self) -> &'static str {
        match self {
            Self::None => "No role assigned; read-only access",
            Self::Producer => "Can create new durian products",
            Self::Transporter => "Can update product locations during transport",
            Self::Retailer => "Can update final product status at retail",
        }
    }
}

impl TryFrom<u8> for Role {
    type Error = LedgerError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Role::ALL
            .into_iter()
            .find(|r| r.code() == code)
            .ok_or_else(|| LedgerError::InvalidArgument(format!("unknown role code {code}")))
    }
}

impl FromStr for Role {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(code) = s.parse::<u8>() {
            return Role::try_from(code);
        }
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            // Producers were called "farmers" in earlier deployments.
            "producer" | "farmer" => Ok(Self::Producer),
            "transporter" => Ok(Self::Transporter),
            "retailer" => Ok(Self::Retailer),
            other => Err(LedgerError::InvalidArgument(format!("unknown role '{other}'"))),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
