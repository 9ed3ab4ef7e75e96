//! The Ledger: single owner of all provenance state.
//!
//! Writes go through a [`Caller`], which binds the asserted identity of
//! whoever is acting. Each write holds the state lock for its whole
//! validate-then-commit sequence, so writes are serialized and either apply
//! completely or not at all.

use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::clock::{Clock, SystemClock};
use crate::config::LedgerConfig;
use crate::events::{EventHub, LedgerEvent, Subscription};
use crate::products::{product_not_found, ProductTable};
use crate::registry::RoleRegistry;
use crate::role::{Action, Role};
use crate::snapshot::{LedgerSnapshot, SnapshotError};
use crate::types::*;

/// Error types for ledger operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    /// Caller lacks the owner identity or the role the operation needs
    #[error("{actor} is not authorized: requires {required}")]
    Unauthorized { actor: ActorId, required: Requirement },

    /// Empty required field or out-of-range value
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Operation is structurally forbidden
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Product code already registered
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Unknown product ID or code
    #[error("Not found: {0}")]
    NotFound(String),
}

/// What an unauthorized caller was missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    Owner,
    Role(Role),
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Owner => f.write_str("ledger owner"),
            Self::Role(role) => write!(f, "{role} role"),
        }
    }
}

/// Everything the ledger owns, guarded as one unit.
pub(crate) struct LedgerState {
    pub(crate) registry: RoleRegistry,
    pub(crate) products: ProductTable,
    pub(crate) last_timestamp: Option<DateTime<Utc>>,
}

impl LedgerState {
    /// Commit timestamp: the clock reading, never earlier than the last commit.
    fn stamp(&mut self, now: DateTime<Utc>) -> DateTime<Utc> {
        let stamped = match self.last_timestamp {
            Some(last) if now < last => last,
            _ => now,
        };
        self.last_timestamp = Some(stamped);
        stamped
    }
}

/// Role-gated, append-only provenance ledger.
///
/// Cloning yields another handle to the same ledger.
#[derive(Clone)]
pub struct Ledger {
    ledger_id: String,
    state: Arc<RwLock<LedgerState>>,
    events: Arc<EventHub>,
    clock: Arc<dyn Clock>,
}

impl Ledger {
    /// Create a ledger owned by `deployer`, timestamped by the system clock.
    pub fn deploy(deployer: impl Into<ActorId>, config: LedgerConfig) -> Self {
        Self::deploy_with_clock(deployer, config, Arc::new(SystemClock))
    }

    /// Create a ledger owned by `deployer` with an explicit clock.
    ///
    /// If `config.owner_seed_role` is set, the deployer is granted that role
    /// as part of creation so it can act immediately.
    pub fn deploy_with_clock(
        deployer: impl Into<ActorId>,
        config: LedgerConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let deployer = deployer.into();
        let mut registry = RoleRegistry::new(deployer.clone());
        if let Some(role) = config.owner_seed_role {
            registry.assign(deployer.clone(), role);
        }

        info!(
            ledger_id = %config.ledger_id,
            owner = %deployer,
            seed_role = ?config.owner_seed_role,
            "Ledger deployed"
        );

        let state = LedgerState {
            registry,
            products: ProductTable::new(),
            last_timestamp: None,
        };
        Self::from_parts(config, state, clock)
    }

    /// Rebuild a ledger from a snapshot after validating its invariants.
    pub fn restore(
        snapshot: LedgerSnapshot,
        config: LedgerConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, SnapshotError> {
        let state = snapshot.into_state()?;
        info!(
            ledger_id = %config.ledger_id,
            owner = %state.registry.owner(),
            products = state.products.total(),
            "Ledger restored from snapshot"
        );
        Ok(Self::from_parts(config, state, clock))
    }

    fn from_parts(config: LedgerConfig, state: LedgerState, clock: Arc<dyn Clock>) -> Self {
        Self {
            ledger_id: config.ledger_id,
            state: Arc::new(RwLock::new(state)),
            events: Arc::new(EventHub::new(config.event_capacity)),
            clock,
        }
    }

    pub fn ledger_id(&self) -> &str {
        &self.ledger_id
    }

    /// Bind an asserted identity for write operations.
    pub fn connect(&self, actor: impl Into<ActorId>) -> Caller<'_> {
        Caller {
            ledger: self,
            actor: actor.into(),
        }
    }

    // ========== Events ==========

    /// Attach an event observer.
    pub fn subscribe(&self) -> Subscription {
        self.events.subscribe()
    }

    /// Detach an event observer.
    pub fn unsubscribe(&self, subscription: Subscription) {
        self.events.unsubscribe(subscription)
    }

    pub fn subscriber_count(&self) -> usize {
        self.events.subscriber_count()
    }

    // ========== Reads ==========

    pub async fn owner(&self) -> ActorId {
        self.state.read().await.registry.owner().clone()
    }

    pub async fn role_of(&self, identity: &ActorId) -> Role {
        self.state.read().await.registry.role_of(identity)
    }

    pub async fn has_role(&self, identity: &ActorId, role: Role) -> bool {
        self.state.read().await.registry.has_role(identity, role)
    }

    /// Number of products ever created (equal to the highest ID).
    pub async fn total_products(&self) -> u64 {
        self.state.read().await.products.total()
    }

    pub async fn product_id_for_code(&self, code: &str) -> Result<ProductId, LedgerError> {
        self.state.read().await.products.id_for_code(code)
    }

    pub async fn code_for_product(&self, id: ProductId) -> Result<String, LedgerError> {
        let state = self.state.read().await;
        Ok(state.products.get(id)?.code.clone())
    }

    /// Full history, oldest first.
    pub async fn history(&self, id: ProductId) -> Result<Vec<HistoryEntry>, LedgerError> {
        let state = self.state.read().await;
        Ok(state.products.get(id)?.history.clone())
    }

    /// The most recent entry of a product's history.
    pub async fn latest_entry(&self, id: ProductId) -> Result<HistoryEntry, LedgerError> {
        let state = self.state.read().await;
        state
            .products
            .get(id)?
            .latest()
            .cloned()
            .ok_or_else(|| product_not_found(id))
    }

    /// Resolve a scanned code to its product and full history.
    pub async fn trace(&self, code: &str) -> Result<ProductTrace, LedgerError> {
        let state = self.state.read().await;
        let id = state.products.id_for_code(code)?;
        let product = state.products.get(id)?;
        Ok(ProductTrace {
            id,
            code: product.code.clone(),
            history: product.history.clone(),
        })
    }

    /// Capture the full committed state.
    pub async fn snapshot(&self) -> LedgerSnapshot {
        let state = self.state.read().await;
        LedgerSnapshot::capture(&self.ledger_id, &state)
    }
}

/// A ledger handle bound to one acting identity.
///
/// The identity is asserted by whoever opened the handle; the ledger only
/// checks what that identity is allowed to do.
pub struct Caller<'a> {
    ledger: &'a Ledger,
    actor: ActorId,
}

impl Caller<'_> {
    pub fn actor(&self) -> &ActorId {
        &self.actor
    }

    /// The role currently held by this caller.
    pub async fn role(&self) -> Role {
        self.ledger.role_of(&self.actor).await
    }

    // ========== Role Registry ==========

    /// Set `identity`'s role, replacing whatever it held. Owner only.
    pub async fn assign_role(&self, identity: &ActorId, role: Role) -> Result<(), LedgerError> {
        let mut state = self.ledger.state.write().await;
        state.registry.ensure_owner(&self.actor)?;
        self.commit_assignment(&mut state, identity, role)
    }

    /// Assign a role given its numeric wire code. Unknown codes are rejected.
    pub async fn assign_role_code(&self, identity: &ActorId, code: u8) -> Result<(), LedgerError> {
        let mut state = self.ledger.state.write().await;
        state.registry.ensure_owner(&self.actor)?;
        let role = Role::try_from(code)?;
        self.commit_assignment(&mut state, identity, role)
    }

    fn commit_assignment(
        &self,
        state: &mut LedgerState,
        identity: &ActorId,
        role: Role,
    ) -> Result<(), LedgerError> {
        require_identity(identity)?;

        let previous = state.registry.assign(identity.clone(), role);

        self.ledger.events.publish(LedgerEvent::RoleAssigned {
            identity: identity.clone(),
            role,
            assigned_by: self.actor.clone(),
        });
        info!(
            identity = %identity,
            role = %role,
            previous = %previous,
            assigned_by = %self.actor,
            "Role assigned"
        );
        Ok(())
    }

    /// Reset `identity` to no role. Owner only; the owner itself cannot be revoked.
    pub async fn revoke_role(&self, identity: &ActorId) -> Result<(), LedgerError> {
        let mut state = self.ledger.state.write().await;
        state.registry.ensure_owner(&self.actor)?;

        let previous_role = state.registry.revoke(identity)?;

        self.ledger.events.publish(LedgerEvent::RoleRevoked {
            identity: identity.clone(),
            previous_role,
            revoked_by: self.actor.clone(),
        });
        info!(
            identity = %identity,
            previous_role = %previous_role,
            revoked_by = %self.actor,
            "Role revoked"
        );
        Ok(())
    }

    /// Hand ownership to `new_owner`. Owner only; roles are unaffected.
    pub async fn transfer_ownership(&self, new_owner: &ActorId) -> Result<(), LedgerError> {
        let mut state = self.ledger.state.write().await;
        state.registry.ensure_owner(&self.actor)?;
        require_identity(new_owner)?;

        let previous_owner = state.registry.transfer(new_owner.clone());

        self.ledger.events.publish(LedgerEvent::OwnershipTransferred {
            previous_owner: previous_owner.clone(),
            new_owner: new_owner.clone(),
        });
        info!(previous_owner = %previous_owner, new_owner = %new_owner, "Ownership transferred");
        Ok(())
    }

    // ========== Product Registry ==========

    /// Register a new product under `code` with its first checkpoint. Producer only.
    pub async fn create_product(
        &self,
        code: &str,
        initial_status: &str,
    ) -> Result<ProductId, LedgerError> {
        let mut state = self.ledger.state.write().await;
        state
            .registry
            .ensure_permitted(&self.actor, Action::CreateProduct)?;
        require_non_empty("code", code)?;
        require_non_empty("initial status", initial_status)?;
        if state.products.contains_code(code) {
            return Err(LedgerError::AlreadyExists(format!(
                "product with code '{code}' already exists"
            )));
        }

        let timestamp = state.stamp(self.ledger.clock.now());
        let id = state.products.insert(
            code.to_string(),
            HistoryEntry {
                actor: self.actor.clone(),
                timestamp,
                location: FARM_LOCATION.to_string(),
                status: initial_status.to_string(),
                note: CREATED_NOTE.to_string(),
            },
        );

        self.ledger.events.publish(LedgerEvent::ProductCreated {
            id,
            code: code.to_string(),
            actor: self.actor.clone(),
            status: initial_status.to_string(),
            timestamp,
        });
        info!(
            product_id = %id,
            code = %code,
            actor = %self.actor,
            "Product created"
        );
        Ok(id)
    }

    // ========== History Log ==========

    /// Record a transport checkpoint. Transporter only.
    pub async fn append_location_update(
        &self,
        id: ProductId,
        location: &str,
        status: &str,
    ) -> Result<(), LedgerError> {
        let mut state = self.ledger.state.write().await;
        state
            .registry
            .ensure_permitted(&self.actor, Action::AppendLocationUpdate)?;
        state.products.get(id)?;
        require_non_empty("location", location)?;
        require_non_empty("status", status)?;

        let timestamp = state.stamp(self.ledger.clock.now());
        state.products.append(
            id,
            HistoryEntry {
                actor: self.actor.clone(),
                timestamp,
                location: location.to_string(),
                status: status.to_string(),
                note: TRANSPORT_NOTE.to_string(),
            },
        )?;

        self.ledger.events.publish(LedgerEvent::LocationUpdated {
            id,
            actor: self.actor.clone(),
            location: location.to_string(),
            status: status.to_string(),
            timestamp,
        });
        debug!(
            product_id = %id,
            location = %location,
            status = %status,
            actor = %self.actor,
            "Location updated"
        );
        Ok(())
    }

    /// Record a retail status update. Retailer only.
    pub async fn append_status_update(&self, id: ProductId, status: &str) -> Result<(), LedgerError> {
        let mut state = self.ledger.state.write().await;
        state
            .registry
            .ensure_permitted(&self.actor, Action::AppendStatusUpdate)?;
        state.products.get(id)?;
        require_non_empty("status", status)?;

        let timestamp = state.stamp(self.ledger.clock.now());
        state.products.append(
            id,
            HistoryEntry {
                actor: self.actor.clone(),
                timestamp,
                location: RETAIL_LOCATION.to_string(),
                status: status.to_string(),
                note: RETAIL_NOTE.to_string(),
            },
        )?;

        self.ledger.events.publish(LedgerEvent::StatusUpdated {
            id,
            actor: self.actor.clone(),
            status: status.to_string(),
            timestamp,
        });
        debug!(product_id = %id, status = %status, actor = %self.actor, "Status updated");
        Ok(())
    }
}

fn require_non_empty(field: &str, value: &str) -> Result<(), LedgerError> {
    if value.is_empty() {
        Err(LedgerError::InvalidArgument(format!("{field} cannot be empty")))
    } else {
        Ok(())
    }
}

fn require_identity(identity: &ActorId) -> Result<(), LedgerError> {
    if identity.is_empty() {
        Err(LedgerError::InvalidArgument("identity cannot be empty".to_string()))
    } else {
        Ok(())
    }
}
