//! Durian supply chain walkthrough
//!
//! Runs one durian from farm to sale on an in-memory ledger with a fixed
//! clock, printing each ledger event as the subscription observes it.

use chrono::{Duration, TimeZone, Utc};
use qrchain_ledger::{
    ActorId, HistoryEntry, Ledger, LedgerConfig, LedgerEvent, ManualClock, Role, Subscription,
};
use std::fmt::Write;
use std::sync::Arc;

use crate::commands::user_facing;

const OWNER: &str = "0xDeployer";
const FARMER: &str = "0xFarmer";
const TRANSPORTER: &str = "0xTransporter";
const RETAILER: &str = "0xRetailer";

const QR_CODE: &str = "DURIAN_FARM_002_20250715";

const CHECKPOINTS: [(&str, &str); 4] = [
    (
        "Durian Farm - Penang, Malaysia",
        "Picked up - Temperature controlled transport",
    ),
    (
        "Highway Rest Area - Quality Control Station",
        "Quality inspection passed - Temperature: 15°C",
    ),
    (
        "Kuala Lumpur Distribution Center",
        "Sorted and prepared for final delivery",
    ),
    (
        "Premium Fruit Market - KLCC",
        "Delivered to retailer - Cold chain maintained",
    ),
];

const RETAIL_UPDATES: [&str; 3] = [
    "Received and inspected - Quality Grade A confirmed",
    "Prepared for display - Price: RM 45/kg",
    "SOLD - Customer: Premium Restaurant Chain",
];

pub async fn run(config: LedgerConfig) -> anyhow::Result<String> {
    let start = Utc
        .with_ymd_and_hms(2025, 7, 15, 6, 0, 0)
        .single()
        .unwrap_or_else(Utc::now);
    let clock = ManualClock::new(start);
    let ledger = Ledger::deploy_with_clock(OWNER, config, Arc::new(clock.clone()));
    let mut events = ledger.subscribe();
    let mut out = String::new();

    writeln!(out, "QRChain Durian Supply Chain")?;
    writeln!(out, "===========================\n")?;
    writeln!(out, "Ledger: {}", ledger.ledger_id())?;
    writeln!(out, "Owner:  {}\n", ledger.owner().await)?;

    writeln!(out, "STEP 0: Setting up roles")?;
    let owner = ledger.connect(OWNER);
    for (identity, code) in [(FARMER, 1), (TRANSPORTER, 2), (RETAILER, 3)] {
        owner
            .assign_role_code(&ActorId::new(identity), code)
            .await
            .map_err(user_facing)?;
    }
    print_events(&mut out, &mut events)?;
    for identity in [FARMER, TRANSPORTER, RETAILER] {
        let role = ledger.role_of(&ActorId::new(identity)).await;
        writeln!(out, "  {identity}: {role} ({})", role.code())?;
    }

    writeln!(out, "\nSTEP 1: Farmer creates durian product")?;
    clock.advance(Duration::hours(1));
    let id = ledger
        .connect(FARMER)
        .create_product(QR_CODE, "Freshly Harvested - Grade Apple Premium")
        .await
        .map_err(user_facing)?;
    print_events(&mut out, &mut events)?;
    writeln!(out, "  Product ID: {}", ledger.product_id_for_code(QR_CODE).await?)?;

    writeln!(out, "\nSTEP 2: Transportation phase")?;
    let transporter = ledger.connect(TRANSPORTER);
    for (location, status) in CHECKPOINTS {
        clock.advance(Duration::hours(2));
        transporter
            .append_location_update(id, location, status)
            .await
            .map_err(user_facing)?;
        print_events(&mut out, &mut events)?;
    }

    writeln!(out, "\nSTEP 3: Retail phase")?;
    let retailer = ledger.connect(RETAILER);
    for status in RETAIL_UPDATES {
        clock.advance(Duration::hours(3));
        retailer.append_status_update(id, status).await.map_err(user_facing)?;
        print_events(&mut out, &mut events)?;
    }

    writeln!(out, "\nSTEP 4: Complete product history")?;
    let history = ledger.history(id).await?;
    writeln!(out, "  Total products: {}", ledger.total_products().await)?;
    writeln!(out, "  History entries: {}", history.len())?;
    for (i, entry) in history.iter().enumerate() {
        write_entry(&mut out, i + 1, entry)?;
    }

    writeln!(out, "\nSTEP 5: Summary")?;
    let latest = ledger.latest_entry(id).await?;
    writeln!(out, "  Product ID:      {id}")?;
    writeln!(out, "  QR code:         {QR_CODE}")?;
    writeln!(out, "  Latest status:   {}", latest.status)?;
    writeln!(out, "  Final location:  {}", latest.location)?;
    writeln!(out, "  Last updated by: {}", latest.actor)?;

    writeln!(out, "\nSTEP 6: QR code verification")?;
    let trace = ledger.trace(QR_CODE).await?;
    writeln!(
        out,
        "  QR code \"{QR_CODE}\" verified: {} history entries",
        trace.history.len()
    )?;
    match ledger.trace("INVALID_QR_CODE").await {
        Ok(_) => writeln!(out, "  Invalid QR code was unexpectedly accepted")?,
        Err(_) => writeln!(out, "  Invalid QR code correctly rejected")?,
    }

    writeln!(out, "\nSTEP 7: Role verification")?;
    for identity in [FARMER, TRANSPORTER, RETAILER] {
        let identity = ActorId::new(identity);
        let role = ledger.role_of(&identity).await;
        let expected = match identity.as_str() {
            FARMER => Role::Producer,
            TRANSPORTER => Role::Transporter,
            _ => Role::Retailer,
        };
        let mark = if role == expected { "ok" } else { "MISMATCH" };
        writeln!(out, "  {identity}: {role} [{mark}]")?;
    }

    ledger.unsubscribe(events);
    Ok(out)
}

fn print_events(out: &mut String, events: &mut Subscription) -> std::fmt::Result {
    for event in events.drain() {
        writeln!(out, "  event: {}", describe(&event))?;
    }
    Ok(())
}

fn describe(event: &LedgerEvent) -> String {
    match event {
        LedgerEvent::RoleAssigned { identity, role, .. } => {
            format!("role_assigned {identity} -> {role}")
        }
        LedgerEvent::RoleRevoked { identity, previous_role, .. } => {
            format!("role_revoked {identity} (was {previous_role})")
        }
        LedgerEvent::OwnershipTransferred { previous_owner, new_owner } => {
            format!("ownership_transferred {previous_owner} -> {new_owner}")
        }
        LedgerEvent::ProductCreated { id, code, status, .. } => {
            format!("product_created #{id} {code}: {status}")
        }
        LedgerEvent::LocationUpdated { id, location, status, .. } => {
            format!("location_updated #{id} @ {location}: {status}")
        }
        LedgerEvent::StatusUpdated { id, status, .. } => {
            format!("status_updated #{id}: {status}")
        }
    }
}

fn write_entry(out: &mut String, n: usize, entry: &HistoryEntry) -> std::fmt::Result {
    writeln!(out, "\n  Entry {n}:")?;
    writeln!(out, "    Actor:     {}", entry.actor)?;
    writeln!(out, "    Timestamp: {}", entry.timestamp.format("%Y-%m-%d %H:%M:%S UTC"))?;
    writeln!(out, "    Location:  {}", entry.location)?;
    writeln!(out, "    Status:    {}", entry.status)?;
    writeln!(out, "    Note:      {}", entry.note)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_demo_walkthrough() {
        let out = run(LedgerConfig::new("demo")).await.unwrap();

        assert!(out.contains("History entries: 8"));
        assert!(out.contains("Latest status:   SOLD - Customer: Premium Restaurant Chain"));
        assert!(out.contains("Final location:  Retail Store"));
        assert!(out.contains("Invalid QR code correctly rejected"));
        assert!(!out.contains("MISMATCH"));

        let events = out.lines().filter(|l| l.trim_start().starts_with("event:")).count();
        // Three role assignments, one creation, four checkpoints, three retail updates.
        assert_eq!(events, 11);
        assert!(out.contains("Timestamp: 2025-07-15 07:00:00 UTC"));
    }
}
