//! Stagepass Ledger - inventory, transfers, sales, and settlement for an
//! event's street-team ticket operation
//!
//! Physical tickets are printed per tier and handed to staff members to
//! sell. This crate keeps the single source of truth for where every ticket
//! stands: who holds it, whether it is tied up in a pending transfer or a
//! cash-order hold, what was sold for how much, and what each seller and the
//! organizer owe each other at the end of the night.
//!
//! # Architecture
//!
//! ```text
//! Write Side (Event Sourcing):
//! ┌────────────────────────────┐      ┌──────────────────────┐
//! │      Ledger Aggregate      │      │    Scan Aggregate    │
//! │ tiers / staff / transfers  │      │   door check-ins     │
//! │ sales / bundles / holds    │      │   and voids          │
//! └─────────────┬──────────────┘      └──────────┬───────────┘
//!               │ ledger-{event}                 │ scan-{event}
//!               ▼                                ▼
//!        ┌─────────────────── Event Store ───────────────────┐
//!        └─────────────────────┬──────────────────────────────┘
//!                              │ Event Bus
//!               ┌──────────────┼──────────────┐
//!               ▼              ▼              ▼
//!       TicketRegistrar  SettlementProjector  (metrics)
//!       feeds sold codes  settlement read
//!       to the door       model
//! ```
//!
//! # Key Rules
//!
//! ## 1. Balances always reconcile
//!
//! Every (staff, tier) row satisfies
//!
//! ```text
//! held = allocated_total + transferred_in - transferred_out - sold
//! ```
//!
//! and `held` never goes negative. Total claims against a tier never exceed
//! its printed quantity.
//!
//! ## 2. Transfers debit on request
//!
//! Offering tickets to a peer removes them from the source immediately, so
//! they cannot be double-spent while the offer is pending. They land at the
//! destination on accept and come back on reject or expiry.
//!
//! ## 3. Commission is frozen at sale time
//!
//! A sale record captures commission and cash-collected once, from the plan
//! in force at that moment. Settlement is recomputed from those immutable
//! records on demand; the incremental projection must agree with it.
//!
//! ## 4. First scan wins
//!
//! A ticket code admits exactly one person. The second presentation of the
//! same code reports when the first admission happened.
//!
//! # Usage
//!
//! See [`service::LedgerService`] for the facade and the [`aggregates`]
//! module for the reducers and their tests.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod aggregates;
pub mod config;
pub mod error;
pub mod metrics;
pub mod projections;
pub mod runtime;
pub mod service;
pub mod settlement;
pub mod types;

pub use aggregates::{
    LedgerAction, LedgerEnvironment, LedgerReducer, ScanAction, ScanEnvironment, ScanReducer,
};
pub use config::LedgerConfig;
pub use error::{ErrorCategory, LedgerError};
pub use projections::{Projection, SettlementProjection, StagepassEvent, StaffSettlementView};
pub use service::{LedgerService, LedgerStore, ScanStore, ServiceError};
pub use settlement::SettlementReport;
pub use types::*;
