//! Write-side aggregates for the staff ticket ledger.
//!
//! Two aggregates cover one event's lifecycle:
//!
//! - [`ledger`]: tiers, staff, allocations, transfers, sales, bundles,
//!   settlement flags, and cash-order holds. Everything that moves a ticket
//!   before the show.
//! - [`scan`]: issued tickets at the door. Fed by ledger events through the
//!   ticket registrar, so a sale on the write side becomes a scannable code
//!   without the door ever querying the ledger.
//!
//! Each aggregate persists its events to its own stream and publishes them on
//! its own topic. Reducers validate against in-memory state, apply the event,
//! and emit append + publish effects; a validation failure applies a
//! transient rejection instead and emits nothing.

pub mod ledger;
pub mod scan;

pub use ledger::{LedgerAction, LedgerEnvironment, LedgerReducer};
pub use scan::{ScanAction, ScanEnvironment, ScanReducer};

/// Topic every ledger aggregate event is published on
pub const LEDGER_TOPIC: &str = "ledger-events";

/// Topic every scan aggregate event is published on
pub const SCAN_TOPIC: &str = "scan-events";
