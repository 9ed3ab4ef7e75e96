//! Ledger commands
//!
//! Every write takes the state file lock, opens the persisted ledger, applies
//! exactly one operation as the `--as` identity, and saves the result before
//! releasing the lock. Reads never save.

use anyhow::{anyhow, bail};
use clap::Subcommand;
use qrchain_ledger::{
    ActorId, HistoryEntry, JsonFileStore, Ledger, LedgerConfig, LedgerError, ProductId,
    Requirement, Role, SnapshotStore, SystemClock,
};
use serde_json::json;
use std::fmt::Write;
use std::sync::Arc;
use tracing::info;

use crate::config::CliConfig;
use crate::demo;

/// QRChain commands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Create a new ledger owned by OWNER
    Init {
        /// Owner identity (or alias from [actors])
        #[arg(long)]
        owner: String,
        /// Replace an existing state file
        #[arg(long)]
        force: bool,
    },

    /// Give an identity a role, replacing any role it held
    AssignRole {
        /// Acting identity (must be the owner)
        #[arg(long = "as")]
        caller: String,
        identity: String,
        /// none, producer, transporter, retailer (or 0-3)
        role: Role,
    },

    /// Reset an identity to no role
    RevokeRole {
        #[arg(long = "as")]
        caller: String,
        identity: String,
    },

    /// Hand ledger ownership to another identity
    TransferOwnership {
        #[arg(long = "as")]
        caller: String,
        new_owner: String,
    },

    /// Register a product under a QR code
    CreateProduct {
        /// Acting identity (must hold the producer role)
        #[arg(long = "as")]
        caller: String,
        code: String,
        status: String,
    },

    /// Record a transport checkpoint
    UpdateLocation {
        /// Acting identity (must hold the transporter role)
        #[arg(long = "as")]
        caller: String,
        id: u64,
        location: String,
        status: String,
    },

    /// Record a retail status update
    UpdateStatus {
        /// Acting identity (must hold the retailer role)
        #[arg(long = "as")]
        caller: String,
        id: u64,
        status: String,
    },

    /// Show an identity's role
    Role { identity: String },

    /// Show the ledger owner
    Owner,

    /// Resolve a QR code to its product ID
    Lookup { code: String },

    /// Show the QR code of a product
    Code { id: u64 },

    /// Show a product's full history
    History { id: u64 },

    /// Show a product's latest entry
    Latest { id: u64 },

    /// Scan a QR code: product ID plus full history
    Trace { code: String },

    /// Show the number of products created
    Total,

    /// Walk one durian from farm to sale on an in-memory ledger
    Demo,
}

impl Commands {
    /// Whether the command rewrites the state file.
    fn mutates_state(&self) -> bool {
        matches!(
            self,
            Self::Init { .. }
                | Self::AssignRole { .. }
                | Self::RevokeRole { .. }
                | Self::TransferOwnership { .. }
                | Self::CreateProduct { .. }
                | Self::UpdateLocation { .. }
                | Self::UpdateStatus { .. }
        )
    }
}

/// Resolved settings shared by every command.
pub struct CommandContext {
    pub config: CliConfig,
    pub store: JsonFileStore,
    pub json: bool,
}

impl CommandContext {
    pub fn new(config: CliConfig, json: bool) -> Self {
        let store = JsonFileStore::new(config.state.path.clone());
        Self { config, store, json }
    }

    fn actor(&self, name: &str) -> ActorId {
        self.config.resolve_actor(name)
    }

    /// Load the persisted ledger, keeping the ledger ID it was created with.
    async fn open(&self) -> anyhow::Result<Ledger> {
        let snapshot = self.store.load().await?.ok_or_else(|| {
            anyhow!(
                "No ledger at {}. Run `qrchain init --owner <identity>` first",
                self.store.path().display()
            )
        })?;
        let config = LedgerConfig {
            ledger_id: snapshot.ledger_id.clone(),
            ..self.config.ledger.clone()
        };
        Ok(Ledger::restore(snapshot, config, Arc::new(SystemClock))?)
    }

    async fn save(&self, ledger: &Ledger) -> anyhow::Result<()> {
        self.store.save(&ledger.snapshot().await).await?;
        Ok(())
    }

    fn display_actor(&self, identity: &ActorId) -> String {
        match self.config.alias_of(identity) {
            Some(alias) => format!("{alias} ({identity})"),
            None => identity.to_string(),
        }
    }
}

/// Execute a command and return what should be printed.
pub async fn execute(ctx: &CommandContext, command: Commands) -> anyhow::Result<String> {
    // Held until the command returns, so the whole load, apply, save cycle is one commit.
    let _lock = if command.mutates_state() {
        Some(ctx.store.lock().await?)
    } else {
        None
    };

    match command {
        Commands::Init { owner, force } => {
            if ctx.store.exists().await && !force {
                bail!(
                    "Ledger already exists at {} (use --force to replace it)",
                    ctx.store.path().display()
                );
            }
            let owner = ctx.actor(&owner);
            let ledger = Ledger::deploy(owner.clone(), ctx.config.ledger.clone());
            ctx.save(&ledger).await?;
            info!(ledger_id = %ledger.ledger_id(), "State initialized");

            if ctx.json {
                return Ok(json!({ "ledger_id": ledger.ledger_id(), "owner": owner }).to_string());
            }
            let role = ledger.role_of(&owner).await;
            Ok(format!(
                "Ledger {} created\nOwner: {} (role: {role})",
                ledger.ledger_id(),
                ctx.display_actor(&owner)
            ))
        }

        Commands::AssignRole { caller, identity, role } => {
            let ledger = ctx.open().await?;
            let identity = ctx.actor(&identity);
            ledger
                .connect(ctx.actor(&caller))
                .assign_role(&identity, role)
                .await
                .map_err(user_facing)?;
            ctx.save(&ledger).await?;
            Ok(confirm(ctx, json!({ "identity": identity, "role": role }), || {
                format!("Assigned {role} to {}", ctx.display_actor(&identity))
            }))
        }

        Commands::RevokeRole { caller, identity } => {
            let ledger = ctx.open().await?;
            let identity = ctx.actor(&identity);
            ledger
                .connect(ctx.actor(&caller))
                .revoke_role(&identity)
                .await
                .map_err(user_facing)?;
            ctx.save(&ledger).await?;
            Ok(confirm(ctx, json!({ "identity": identity, "role": Role::None }), || {
                format!("Revoked role of {}", ctx.display_actor(&identity))
            }))
        }

        Commands::TransferOwnership { caller, new_owner } => {
            let ledger = ctx.open().await?;
            let new_owner = ctx.actor(&new_owner);
            ledger
                .connect(ctx.actor(&caller))
                .transfer_ownership(&new_owner)
                .await
                .map_err(user_facing)?;
            ctx.save(&ledger).await?;
            Ok(confirm(ctx, json!({ "owner": new_owner }), || {
                format!("Ownership transferred to {}", ctx.display_actor(&new_owner))
            }))
        }

        Commands::CreateProduct { caller, code, status } => {
            let ledger = ctx.open().await?;
            let id = ledger
                .connect(ctx.actor(&caller))
                .create_product(&code, &status)
                .await
                .map_err(user_facing)?;
            ctx.save(&ledger).await?;
            Ok(confirm(ctx, json!({ "id": id, "code": code }), || {
                format!("Product created with ID {id} (code {code})")
            }))
        }

        Commands::UpdateLocation { caller, id, location, status } => {
            let ledger = ctx.open().await?;
            let id = ProductId::new(id);
            ledger
                .connect(ctx.actor(&caller))
                .append_location_update(id, &location, &status)
                .await
                .map_err(user_facing)?;
            ctx.save(&ledger).await?;
            Ok(confirm(ctx, json!({ "id": id, "location": location, "status": status }), || {
                format!("Product {id} location updated to {location}")
            }))
        }

        Commands::UpdateStatus { caller, id, status } => {
            let ledger = ctx.open().await?;
            let id = ProductId::new(id);
            ledger
                .connect(ctx.actor(&caller))
                .append_status_update(id, &status)
                .await
                .map_err(user_facing)?;
            ctx.save(&ledger).await?;
            Ok(confirm(ctx, json!({ "id": id, "status": status }), || {
                format!("Product {id} status updated to {status}")
            }))
        }

        Commands::Role { identity } => {
            let ledger = ctx.open().await?;
            let identity = ctx.actor(&identity);
            let role = ledger.role_of(&identity).await;
            Ok(confirm(ctx, json!({ "identity": identity, "role": role }), || {
                format!("{}: {role} ({})", ctx.display_actor(&identity), role.description())
            }))
        }

        Commands::Owner => {
            let ledger = ctx.open().await?;
            let owner = ledger.owner().await;
            Ok(confirm(ctx, json!({ "owner": owner }), || ctx.display_actor(&owner)))
        }

        Commands::Lookup { code } => {
            let ledger = ctx.open().await?;
            let id = ledger
                .product_id_for_code(&code)
                .await
                .map_err(code_lookup_failed)?;
            Ok(confirm(ctx, json!({ "id": id, "code": code }), || id.to_string()))
        }

        Commands::Code { id } => {
            let ledger = ctx.open().await?;
            let id = ProductId::new(id);
            let code = ledger.code_for_product(id).await.map_err(user_facing)?;
            Ok(confirm(ctx, json!({ "id": id, "code": code }), || code.clone()))
        }

        Commands::History { id } => {
            let ledger = ctx.open().await?;
            let history = ledger.history(ProductId::new(id)).await.map_err(user_facing)?;
            if ctx.json {
                return Ok(serde_json::to_string_pretty(&history)?);
            }
            Ok(format_history(ctx, &history))
        }

        Commands::Latest { id } => {
            let ledger = ctx.open().await?;
            let entry = ledger.latest_entry(ProductId::new(id)).await.map_err(user_facing)?;
            if ctx.json {
                return Ok(serde_json::to_string_pretty(&entry)?);
            }
            Ok(format_entry(ctx, &entry))
        }

        Commands::Trace { code } => {
            let ledger = ctx.open().await?;
            let trace = ledger.trace(&code).await.map_err(code_lookup_failed)?;
            if ctx.json {
                return Ok(serde_json::to_string_pretty(&trace)?);
            }
            Ok(format!(
                "Product {} ({})\n\n{}",
                trace.id,
                trace.code,
                format_history(ctx, &trace.history)
            ))
        }

        Commands::Total => {
            let ledger = ctx.open().await?;
            let total = ledger.total_products().await;
            Ok(confirm(ctx, json!({ "total": total }), || total.to_string()))
        }

        Commands::Demo => demo::run(ctx.config.ledger.clone()).await,
    }
}

/// JSON or human text, depending on `--json`.
fn confirm(ctx: &CommandContext, value: serde_json::Value, text: impl FnOnce() -> String) -> String {
    if ctx.json {
        value.to_string()
    } else {
        text()
    }
}

/// Attach the operator-facing explanation to a ledger rejection.
pub fn user_facing(err: LedgerError) -> anyhow::Error {
    let message = match &err {
        LedgerError::Unauthorized { required: Requirement::Owner, .. } => {
            "Only the ledger owner can manage roles and ownership".to_string()
        }
        LedgerError::Unauthorized { required: Requirement::Role(role), .. } => match role {
            Role::Producer => "Only producers can create products".to_string(),
            Role::Transporter => "Only transporters can update product locations".to_string(),
            Role::Retailer => "Only retailers can update product status".to_string(),
            Role::None => err.to_string(),
        },
        LedgerError::AlreadyExists(_) => "A product with this QR code already exists".to_string(),
        LedgerError::NotFound(_) => "Product does not exist".to_string(),
        LedgerError::InvalidOperation(_) => "The ledger owner's role cannot be revoked".to_string(),
        LedgerError::InvalidArgument(detail) => format!("Please fill in all fields ({detail})"),
    };
    anyhow::Error::new(err).context(message)
}

/// Like [`user_facing`], for commands keyed by QR code rather than product ID.
fn code_lookup_failed(err: LedgerError) -> anyhow::Error {
    match err {
        LedgerError::NotFound(_) => {
            anyhow::Error::new(err).context("Product with this QR code does not exist")
        }
        other => user_facing(other),
    }
}

fn format_entry(ctx: &CommandContext, entry: &HistoryEntry) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "  Actor:     {}", ctx.display_actor(&entry.actor));
    let _ = writeln!(out, "  Timestamp: {}", entry.timestamp.format("%Y-%m-%d %H:%M:%S UTC"));
    let _ = writeln!(out, "  Location:  {}", entry.location);
    let _ = writeln!(out, "  Status:    {}", entry.status);
    let _ = write!(out, "  Note:      {}", entry.note);
    out
}

fn format_history(ctx: &CommandContext, history: &[HistoryEntry]) -> String {
    let mut out = format!("{} history entries", history.len());
    for (i, entry) in history.iter().enumerate() {
        let _ = write!(out, "\n\nEntry {}:\n{}", i + 1, format_entry(ctx, entry));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StateConfig;

    fn context(dir: &tempfile::TempDir, json: bool) -> CommandContext {
        context_at(dir.path().join("state.json"), json)
    }

    fn context_at(path: std::path::PathBuf, json: bool) -> CommandContext {
        let mut config = CliConfig {
            state: StateConfig { path },
            ledger: LedgerConfig::new("cli-test"),
            ..Default::default()
        };
        config.actors.insert("farmer".to_string(), "0xFarmer".to_string());
        config.actors.insert("truck".to_string(), "0xTruck".to_string());
        config.actors.insert("shop".to_string(), "0xShop".to_string());
        CommandContext::new(config, json)
    }

    async fn run(ctx: &CommandContext, command: Commands) -> anyhow::Result<String> {
        execute(ctx, command).await
    }

    async fn seeded(ctx: &CommandContext) {
        run(ctx, Commands::Init { owner: "0xOwner".into(), force: false }).await.unwrap();
        for (identity, role) in [
            ("farmer", Role::Producer),
            ("truck", Role::Transporter),
            ("shop", Role::Retailer),
        ] {
            run(
                ctx,
                Commands::AssignRole {
                    caller: "0xOwner".into(),
                    identity: identity.into(),
                    role,
                },
            )
            .await
            .unwrap();
        }
    }

    #[tokio::test]
    async fn test_reads_require_init() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(&dir, false);
        let err = run(&ctx, Commands::Total).await.unwrap_err();
        assert!(err.to_string().contains("qrchain init"));
    }

    #[tokio::test]
    async fn test_init_refuses_to_clobber() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(&dir, false);
        seeded(&ctx).await;

        let err = run(&ctx, Commands::Init { owner: "0xOther".into(), force: false })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("already exists"));

        run(&ctx, Commands::Init { owner: "0xOther".into(), force: true }).await.unwrap();
        assert_eq!(run(&ctx, Commands::Owner).await.unwrap(), "0xOther");
    }

    #[tokio::test]
    async fn test_state_persists_across_commands() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(&dir, false);
        seeded(&ctx).await;

        let out = run(
            &ctx,
            Commands::CreateProduct {
                caller: "farmer".into(),
                code: "QR123456".into(),
                status: "Freshly Harvested".into(),
            },
        )
        .await
        .unwrap();
        assert!(out.contains("ID 1"));

        run(
            &ctx,
            Commands::UpdateLocation {
                caller: "truck".into(),
                id: 1,
                location: "Highway".into(),
                status: "In Transit".into(),
            },
        )
        .await
        .unwrap();
        run(
            &ctx,
            Commands::UpdateStatus {
                caller: "shop".into(),
                id: 1,
                status: "Sold".into(),
            },
        )
        .await
        .unwrap();

        assert_eq!(run(&ctx, Commands::Lookup { code: "QR123456".into() }).await.unwrap(), "1");
        assert_eq!(run(&ctx, Commands::Code { id: 1 }).await.unwrap(), "QR123456");
        assert_eq!(run(&ctx, Commands::Total).await.unwrap(), "1");

        let history = run(&ctx, Commands::History { id: 1 }).await.unwrap();
        assert!(history.starts_with("3 history entries"));
        assert!(history.contains("truck (0xTruck)"));
        assert!(history.contains(qrchain_ledger::RETAIL_NOTE));

        let latest = run(&ctx, Commands::Latest { id: 1 }).await.unwrap();
        assert!(latest.contains("Status:    Sold"));
    }

    #[tokio::test]
    async fn test_rejections_are_user_facing_and_not_saved() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(&dir, false);
        seeded(&ctx).await;

        let err = run(
            &ctx,
            Commands::CreateProduct {
                caller: "truck".into(),
                code: "QR1".into(),
                status: "Fresh".into(),
            },
        )
        .await
        .unwrap_err();
        assert_eq!(err.to_string(), "Only producers can create products");
        assert!(matches!(
            err.downcast_ref::<LedgerError>(),
            Some(LedgerError::Unauthorized { .. })
        ));
        assert_eq!(run(&ctx, Commands::Total).await.unwrap(), "0");

        let err = run(&ctx, Commands::RevokeRole { caller: "0xOwner".into(), identity: "0xOwner".into() })
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<LedgerError>(),
            Some(LedgerError::InvalidOperation(_))
        ));

        let err = run(&ctx, Commands::Trace { code: "INVALID_QR_CODE".into() }).await.unwrap_err();
        assert_eq!(err.to_string(), "Product with this QR code does not exist");
        let err = run(&ctx, Commands::Lookup { code: "INVALID_QR_CODE".into() }).await.unwrap_err();
        assert_eq!(err.to_string(), "Product with this QR code does not exist");

        let err = run(&ctx, Commands::History { id: 999 }).await.unwrap_err();
        assert_eq!(err.to_string(), "Product does not exist");
        let err = run(
            &ctx,
            Commands::UpdateStatus {
                caller: "shop".into(),
                id: 999,
                status: "Sold".into(),
            },
        )
        .await
        .unwrap_err();
        assert_eq!(err.to_string(), "Product does not exist");
        assert!(matches!(
            err.downcast_ref::<LedgerError>(),
            Some(LedgerError::NotFound(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writes_are_all_committed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        seeded(&context_at(path.clone(), false)).await;

        let mut tasks = Vec::new();
        for n in 0..8 {
            let ctx = context_at(path.clone(), false);
            tasks.push(tokio::spawn(async move {
                execute(
                    &ctx,
                    Commands::CreateProduct {
                        caller: "farmer".into(),
                        code: format!("QR{n}"),
                        status: "Freshly Harvested".into(),
                    },
                )
                .await
            }));
        }

        let mut confirmations = Vec::new();
        for task in tasks {
            confirmations.push(task.await.unwrap().unwrap());
        }

        // Every confirmed write survived and each got its own ID.
        let ctx = context_at(path, false);
        assert_eq!(run(&ctx, Commands::Total).await.unwrap(), "8");
        for n in 1..=8 {
            let id_line = format!("ID {n} ");
            assert_eq!(confirmations.iter().filter(|c| c.contains(&id_line)).count(), 1);
        }
        for n in 0..8 {
            run(&ctx, Commands::Lookup { code: format!("QR{n}") }).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_json_output() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(&dir, true);
        seeded(&ctx).await;
        run(
            &ctx,
            Commands::CreateProduct {
                caller: "farmer".into(),
                code: "QR9".into(),
                status: "Fresh".into(),
            },
        )
        .await
        .unwrap();

        let role: serde_json::Value =
            serde_json::from_str(&run(&ctx, Commands::Role { identity: "truck".into() }).await.unwrap())
                .unwrap();
        assert_eq!(role["role"], "transporter");
        assert_eq!(role["identity"], "0xTruck");

        let trace: serde_json::Value =
            serde_json::from_str(&run(&ctx, Commands::Trace { code: "QR9".into() }).await.unwrap())
                .unwrap();
        assert_eq!(trace["id"], 1);
        assert_eq!(trace["history"][0]["location"], qrchain_ledger::FARM_LOCATION);
    }

    #[tokio::test]
    async fn test_ownership_transfer_persists() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(&dir, false);
        seeded(&ctx).await;

        run(
            &ctx,
            Commands::TransferOwnership {
                caller: "0xOwner".into(),
                new_owner: "shop".into(),
            },
        )
        .await
        .unwrap();
        assert_eq!(run(&ctx, Commands::Owner).await.unwrap(), "shop (0xShop)");

        let err = run(
            &ctx,
            Commands::RevokeRole {
                caller: "0xOwner".into(),
                identity: "farmer".into(),
            },
        )
        .await
        .unwrap_err();
        assert_eq!(err.to_string(), "Only the ledger owner can manage roles and ownership");
    }
}
