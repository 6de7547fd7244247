//! Business metrics for the staff ticket ledger.
//!
//! # Exported Metrics
//!
//! ## Counters
//! - `stagepass_allocations_total` - Allocation commands that succeeded
//! - `stagepass_tickets_allocated_total` - Tickets handed to staff
//! - `stagepass_transfers_total{status}` - Transfers by outcome
//! - `stagepass_sales_total{method}` - Sales by payment method
//! - `stagepass_sale_revenue_cents_total` - Gross revenue in cents
//! - `stagepass_commission_cents_total` - Commission frozen at sale time
//! - `stagepass_tickets_issued_total` - Ticket codes generated
//! - `stagepass_holds_total{status}` - Cash-order holds by outcome
//! - `stagepass_scans_total{outcome}` - Door scans by outcome
//! - `stagepass_rejections_total{category}` - Rejected commands by category
//!
//! ## Gauges
//! - `stagepass_pending_transfers` - Transfers awaiting a response
//! - `stagepass_active_holds` - Holds currently reserving capacity

use crate::error::ErrorCategory;
use crate::types::PaymentMethod;
use metrics::{describe_counter, describe_gauge};

/// Register descriptions for every ledger metric.
///
/// Call once at startup, before any metrics are recorded.
pub fn register_ledger_metrics() {
    describe_counter!(
        "stagepass_allocations_total",
        "Total allocation commands that succeeded"
    );
    describe_counter!(
        "stagepass_tickets_allocated_total",
        "Total tickets handed from printed stock to staff"
    );

    describe_counter!(
        "stagepass_transfers_total",
        "Total transfers by outcome (requested, accepted, rejected, expired)"
    );
    describe_gauge!(
        "stagepass_pending_transfers",
        "Transfers currently awaiting a response"
    );

    describe_counter!(
        "stagepass_sales_total",
        "Total sales by payment method (cash, cash_app, credit, online)"
    );
    describe_counter!(
        "stagepass_sale_revenue_cents_total",
        "Gross revenue across all sales in cents"
    );
    describe_counter!(
        "stagepass_commission_cents_total",
        "Commission frozen into sale records in cents"
    );
    describe_counter!(
        "stagepass_tickets_issued_total",
        "Ticket codes generated by sales, bundles, and approved holds"
    );

    describe_counter!(
        "stagepass_holds_total",
        "Total cash-order holds by outcome (created, approved, cancelled, expired)"
    );
    describe_gauge!(
        "stagepass_active_holds",
        "Holds currently reserving general-pool capacity"
    );

    describe_counter!(
        "stagepass_scans_total",
        "Total door scans by outcome (admitted, duplicate, voided, unknown)"
    );
    describe_counter!(
        "stagepass_rejections_total",
        "Rejected commands by error category"
    );

    tracing::info!("Ledger metrics registered");
}

/// Label for a payment method
const fn method_label(method: PaymentMethod) -> &'static str {
    match method {
        PaymentMethod::Cash => "cash",
        PaymentMethod::CashApp => "cash_app",
        PaymentMethod::Credit => "credit",
        PaymentMethod::Online => "online",
    }
}

/// Label for an error category
const fn category_label(category: ErrorCategory) -> &'static str {
    match category {
        ErrorCategory::Validation => "validation",
        ErrorCategory::Capacity => "capacity",
        ErrorCategory::RaceLost => "race_lost",
        ErrorCategory::Authorization => "authorization",
    }
}

/// Record a successful allocation.
pub fn record_allocation(quantity: u32) {
    metrics::counter!("stagepass_allocations_total").increment(1);
    metrics::counter!("stagepass_tickets_allocated_total").increment(u64::from(quantity));
    tracing::debug!(quantity, "Recorded allocation metric");
}

/// Record a transfer request.
pub fn record_transfer_requested() {
    metrics::counter!("stagepass_transfers_total", "status" => "requested").increment(1);
    metrics::gauge!("stagepass_pending_transfers").increment(1.0);
}

/// Record a transfer acceptance.
pub fn record_transfer_accepted() {
    metrics::counter!("stagepass_transfers_total", "status" => "accepted").increment(1);
    metrics::gauge!("stagepass_pending_transfers").decrement(1.0);
}

/// Record a transfer rejection by its destination.
pub fn record_transfer_rejected() {
    metrics::counter!("stagepass_transfers_total", "status" => "rejected").increment(1);
    metrics::gauge!("stagepass_pending_transfers").decrement(1.0);
}

/// Record a transfer expiry.
pub fn record_transfer_expired() {
    metrics::counter!("stagepass_transfers_total", "status" => "expired").increment(1);
    metrics::gauge!("stagepass_pending_transfers").decrement(1.0);
}

/// Record a completed sale.
pub fn record_sale(
    method: PaymentMethod,
    revenue_cents: u64,
    commission_cents: u64,
    tickets: u32,
) {
    metrics::counter!("stagepass_sales_total", "method" => method_label(method)).increment(1);
    metrics::counter!("stagepass_sale_revenue_cents_total").increment(revenue_cents);
    metrics::counter!("stagepass_commission_cents_total").increment(commission_cents);
    metrics::counter!("stagepass_tickets_issued_total").increment(u64::from(tickets));
    tracing::debug!(revenue_cents, commission_cents, tickets, "Recorded sale metric");
}

/// Record a hold creation.
pub fn record_hold_created() {
    metrics::counter!("stagepass_holds_total", "status" => "created").increment(1);
    metrics::gauge!("stagepass_active_holds").increment(1.0);
}

/// Record a hold approval and the tickets it issued.
pub fn record_hold_approved(tickets: u32) {
    metrics::counter!("stagepass_holds_total", "status" => "approved").increment(1);
    metrics::counter!("stagepass_tickets_issued_total").increment(u64::from(tickets));
    metrics::gauge!("stagepass_active_holds").decrement(1.0);
}

/// Record a hold cancellation.
pub fn record_hold_cancelled() {
    metrics::counter!("stagepass_holds_total", "status" => "cancelled").increment(1);
    metrics::gauge!("stagepass_active_holds").decrement(1.0);
}

/// Record a hold expiry.
pub fn record_hold_expired() {
    metrics::counter!("stagepass_holds_total", "status" => "expired").increment(1);
    metrics::gauge!("stagepass_active_holds").decrement(1.0);
}

/// Record a door scan outcome.
///
/// `outcome` is one of `admitted`, `duplicate`, `voided`, `unknown`.
pub fn record_scan(outcome: &'static str) {
    metrics::counter!("stagepass_scans_total", "outcome" => outcome).increment(1);
    tracing::debug!(outcome, "Recorded scan metric");
}

/// Record a rejected command.
pub fn record_rejection(category: ErrorCategory) {
    metrics::counter!("stagepass_rejections_total", "category" => category_label(category))
        .increment(1);
}
