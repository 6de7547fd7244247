//! End-to-end ledger demo over in-memory infrastructure.
//!
//! Walks one event through a full night: tiers and staff are set up, tickets
//! are allocated and transferred, sales and a bundle go through, a cash-order
//! hold is activated by code, sold tickets are scanned at the door, and the
//! run ends with settlement reports and a Prometheus metrics dump.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin demo
//! ```
//!
//! Configuration comes from `STAGEPASS_*` environment variables (a `.env`
//! file is honored). `RUST_LOG` controls verbosity:
//!
//! ```bash
//! RUST_LOG=debug cargo run --bin demo
//! ```

use anyhow::Context;
use metrics_exporter_prometheus::PrometheusBuilder;
use stagepass_core::environment::SystemClock;
use stagepass_ledger::{
    BundleRequirement, BuyerInfo, CommissionPlan, HoldItem, LedgerConfig, LedgerService, Money,
    PaymentMethod, Role, Ticket, TicketCode,
};
use stagepass_testing::{InMemoryEventBus, InMemoryEventStore};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Poll the scan store until the registrar has delivered a sold code.
async fn wait_for_ticket(service: &LedgerService, code: TicketCode) -> anyhow::Result<Ticket> {
    for _ in 0..100 {
        if let Some(ticket) = service.ticket(code.clone()).await {
            return Ok(ticket);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    anyhow::bail!("ticket {code} never reached the scan store")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,stagepass_ledger=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let prometheus = PrometheusBuilder::new()
        .install_recorder()
        .context("installing Prometheus recorder")?;
    stagepass_ledger::metrics::register_ledger_metrics();

    info!("=== Stagepass Ledger Demo ===");

    let config = LedgerConfig::from_env();
    let service = LedgerService::start(
        "summer-fest",
        Arc::new(SystemClock),
        Arc::new(InMemoryEventStore::new()),
        Arc::new(InMemoryEventBus::new()),
        config,
    )
    .await?;

    // ------------------------------------------------------------------
    // Setup: tiers, team, bundle
    // ------------------------------------------------------------------
    let friday = service
        .register_tier("Friday GA", Money::from_dollars(40), 100)
        .await?;
    let saturday = service
        .register_tier("Saturday GA", Money::from_dollars(45), 80)
        .await?;

    let dana = service
        .add_staff(
            "Dana",
            Role::Organizer,
            None,
            CommissionPlan::Percentage { basis_points: 0 },
        )
        .await?;
    let mara = service
        .add_staff(
            "Mara",
            Role::TeamMember,
            None,
            CommissionPlan::Percentage { basis_points: 1000 },
        )
        .await?;
    let jonah = service
        .add_staff(
            "Jonah",
            Role::TeamMember,
            None,
            CommissionPlan::Fixed {
                per_ticket: Money::from_dollars(5),
            },
        )
        .await?;

    let weekend_pass = service
        .define_bundle(
            "Weekend Pass",
            Money::from_dollars(75),
            vec![
                BundleRequirement {
                    tier_id: friday,
                    quantity: 1,
                },
                BundleRequirement {
                    tier_id: saturday,
                    quantity: 1,
                },
            ],
            25,
        )
        .await?;
    info!("Setup complete: 2 tiers, 3 staff, 1 bundle");

    // ------------------------------------------------------------------
    // Allocation
    // ------------------------------------------------------------------
    service.allocate(mara, friday, 40).await?;
    service.allocate(mara, saturday, 30).await?;
    service.allocate(jonah, friday, 25).await?;
    info!(
        friday_available = service.tier_availability(friday).await,
        saturday_available = service.tier_availability(saturday).await,
        "Tickets allocated"
    );

    // ------------------------------------------------------------------
    // Transfers: one accepted, one rejected
    // ------------------------------------------------------------------
    let transfer = service
        .request_transfer(jonah, mara, friday, 5, Some("covering your shift".into()))
        .await?;
    service.accept_transfer(transfer, mara).await?;
    info!(
        mara_friday = service.balance(mara, friday).await,
        jonah_friday = service.balance(jonah, friday).await,
        "Transfer accepted"
    );

    let declined = service
        .request_transfer(jonah, mara, friday, 10, None)
        .await?;
    service.reject_transfer(declined, dana).await?;
    info!(
        jonah_friday = service.balance(jonah, friday).await,
        "Transfer rejected by the organizer, tickets refunded"
    );

    // ------------------------------------------------------------------
    // Sales
    // ------------------------------------------------------------------
    let cash_sale = service
        .record_sale(
            mara,
            friday,
            2,
            PaymentMethod::Cash,
            BuyerInfo::named("Ana Flores"),
        )
        .await?;
    info!(
        commission = %cash_sale.commission,
        cash_collected = %cash_sale.cash_collected,
        codes = ?cash_sale.ticket_codes(),
        "Mara sold 2 Friday tickets for cash"
    );

    let flat_sale = service
        .record_sale(
            jonah,
            friday,
            3,
            PaymentMethod::CashApp,
            BuyerInfo::named("Theo Park"),
        )
        .await?;
    info!(
        commission = %flat_sale.commission,
        cash_collected = %flat_sale.cash_collected,
        "Jonah sold 3 Friday tickets, flat commission per ticket"
    );

    let card_sale = service
        .record_sale(
            mara,
            saturday,
            1,
            PaymentMethod::Credit,
            BuyerInfo::named("Iris Wade"),
        )
        .await?;
    info!(
        commission = %card_sale.commission,
        cash_collected = %card_sale.cash_collected,
        "Mara sold 1 Saturday ticket on card, no cash changed hands"
    );

    // ------------------------------------------------------------------
    // Bundle sale
    // ------------------------------------------------------------------
    service.can_sell_bundle(mara, weekend_pass).await?;
    let bundle_sale = service
        .sell_bundle(
            mara,
            weekend_pass,
            PaymentMethod::Credit,
            BuyerInfo::named("Sam Okafor"),
        )
        .await?;
    info!(
        commission = %bundle_sale.commission,
        tickets = bundle_sale.tickets.len(),
        "Mara sold a Weekend Pass, one record, commission once on the bundle price"
    );

    // ------------------------------------------------------------------
    // Cash-order hold with activation code
    // ------------------------------------------------------------------
    let hold = service
        .create_hold(
            BuyerInfo::named("Walk-up buyer"),
            vec![HoldItem {
                tier_id: friday,
                quantity: 2,
            }],
            None,
        )
        .await?;
    let code = service.generate_activation_code(hold, dana).await?;
    info!(code = %code, "Hold placed against the general pool, activation code issued");

    let approved = service.activate_by_code(hold, code).await?;
    info!(
        tickets = approved.tickets.len(),
        "Buyer activated the hold at the box office"
    );

    let abandoned = service
        .create_hold(
            BuyerInfo::named("No-show"),
            vec![HoldItem {
                tier_id: saturday,
                quantity: 1,
            }],
            Some(5),
        )
        .await?;
    service.cancel_hold(abandoned).await?;
    info!("Second hold cancelled, capacity released");

    // ------------------------------------------------------------------
    // Door scans
    // ------------------------------------------------------------------
    let codes = cash_sale.ticket_codes();
    let first = codes
        .first()
        .cloned()
        .context("cash sale issued no tickets")?;
    let second = codes
        .get(1)
        .cloned()
        .context("cash sale issued one ticket only")?;
    wait_for_ticket(&service, first.clone()).await?;

    let admitted = service.scan_ticket(first.clone()).await?;
    info!(code = %admitted.code, "First scan admitted the holder");

    match service.scan_ticket(first).await {
        Err(error) => info!(%error, "Second scan refused, as it should be"),
        Ok(_) => anyhow::bail!("duplicate scan was admitted"),
    }

    wait_for_ticket(&service, second.clone()).await?;
    service.void_ticket(second.clone()).await?;
    match service.scan_ticket(second).await {
        Err(error) => info!(%error, "Voided ticket refused at the door"),
        Ok(_) => anyhow::bail!("voided ticket was admitted"),
    }

    // ------------------------------------------------------------------
    // Settlement
    // ------------------------------------------------------------------
    service.sweep_now().await?;

    for report in service.settlement_reports().await {
        info!(
            staff = %report.staff_name,
            commission = %report.commission_earned,
            cash_collected = %report.cash_collected,
            net_cents = report.net_cents,
            organizer_owes_staff = report.organizer_owes_staff(),
            "Settlement"
        );
    }

    service.mark_settlement_paid(jonah).await?;
    let report = service.settlement_report(jonah).await?;
    info!(staff = %report.staff_name, status = ?report.status, "Marked paid");

    // The projection trails by consumer delivery; by now it has caught up.
    tokio::time::sleep(Duration::from_millis(50)).await;
    if let Some(view) = service.settlement_view(&mara) {
        info!(
            staff = %view.staff_name,
            sales = view.sales_count,
            commission = %view.commission_earned,
            "Projection view agrees with the recomputed report"
        );
    }

    service.shutdown().await?;

    println!("\n=== Prometheus metrics ===\n{}", prometheus.render());
    Ok(())
}
