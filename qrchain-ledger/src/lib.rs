//! QRChain Ledger - Supply-Chain Provenance
//!
//! Records a product's journey from farm to shelf as an append-only,
//! role-gated history keyed by a scannable code:
//!
//! - **Role registry**: an owner assigns exactly one role per identity
//! - **Product registry**: producers register products under unique codes
//! - **History log**: transporters and retailers append checkpoints
//! - **Events**: every committed write is published to subscribers
//!
//! Anyone may read. Writes go through a [`Caller`] bound to the acting
//! identity and are checked against that identity's [`Role`].
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │                   Ledger                    │
//! │  ┌──────────────┐  ┌─────────────────────┐  │
//! │  │ RoleRegistry │  │    ProductTable     │  │
//! │  │ owner, roles │  │ codes ↔ ids, history│  │
//! │  └──────────────┘  └─────────────────────┘  │
//! │          one RwLock, one commit at a time   │
//! └───────┬───────────────────────┬─────────────┘
//!         │ events                │ snapshots
//!    ┌────▼─────┐          ┌──────▼────────┐
//!    │ EventHub │          │ SnapshotStore │
//!    └──────────┘          └───────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use qrchain_ledger::{Ledger, LedgerConfig, Role};
//!
//! let ledger = Ledger::deploy("0xOwner", LedgerConfig::default());
//! ledger.connect("0xOwner").assign_role(&"0xTruck".into(), Role::Transporter).await?;
//!
//! let id = ledger.connect("0xOwner").create_product("QR123456", "Harvested").await?;
//! ledger.connect("0xTruck").append_location_update(id, "Highway", "In Transit").await?;
//! let latest = ledger.latest_entry(id).await?;
//! ```

pub mod clock;
pub mod config;
pub mod events;
pub mod ledger;
pub mod role;
pub mod snapshot;
pub mod store;
pub mod types;

mod products;
mod registry;

// Re-export main types
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::LedgerConfig;
pub use events::{EventHub, LedgerEvent, Subscription};
pub use ledger::{Caller, Ledger, LedgerError, Requirement};
pub use role::{Action, Role};
pub use snapshot::{LedgerSnapshot, ProductRecord, SnapshotError};
pub use store::{JsonFileStore, MemoryStore, SealedSnapshot, SnapshotStore, StoreError, StoreLock};
pub use types::*;
