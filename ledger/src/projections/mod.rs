//! Read model projections for the staff ticket ledger.
//!
//! Projections consume events published by the write-side aggregates and
//! maintain denormalized views optimized for queries.
//!
//! ```text
//! Write Side (Aggregates)        Event Store         Read Side (Projections)
//! ┌────────────────┐            ┌───────────┐        ┌─────────────────────┐
//! │  Ledger        │───events──>│  ledger-* │───────>│ SettlementProjection│
//! │  Scan          │            │  scan-*   │        └─────────────────────┘
//! └────────────────┘            └───────────┘                  │
//!                                                              v
//!                                                     settlement dashboard
//! ```
//!
//! Projections are eventually consistent: a query can trail the write side by
//! the time it takes the consumer to deliver the event. They are also
//! rebuildable; [`Projection::reset`] followed by a replay of the event
//! history reproduces the same view, and the tests hold the settlement view
//! to exactly that standard against recomputation from sale records.

pub mod settlement;

pub use settlement::{SettlementProjection, StaffSettlementView};

use crate::aggregates::{LedgerAction, ScanAction};
use serde::{Deserialize, Serialize};
use stagepass_core::event::SerializedEvent;

/// Unified event type for both ledger aggregates.
///
/// Everything persisted to a stream or published on a topic is one of these,
/// so projections and consumers deserialize a single type and match on it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum StagepassEvent {
    /// Event from the ledger aggregate
    Ledger(LedgerAction),
    /// Event from the scan aggregate
    Scan(ScanAction),
}

impl StagepassEvent {
    /// Serialize an action into a `SerializedEvent` for event store persistence.
    ///
    /// The event type combines the aggregate name with the versioned event
    /// name the action derive assigns, e.g. `Ledger.SaleRecorded.v1`.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails
    pub fn serialize(self) -> Result<SerializedEvent, String> {
        let event_type = match &self {
            Self::Ledger(action) => format!("Ledger.{}", action.event_type()),
            Self::Scan(action) => format!("Scan.{}", action.event_type()),
        };

        let data =
            bincode::serialize(&self).map_err(|e| format!("Serialization error: {e}"))?;

        Ok(SerializedEvent::new(event_type, data, None))
    }

    /// Deserialize a `SerializedEvent` back into a `StagepassEvent`
    ///
    /// # Errors
    ///
    /// Returns an error if deserialization fails
    pub fn deserialize(event: &SerializedEvent) -> Result<Self, String> {
        bincode::deserialize(&event.data).map_err(|e| format!("Deserialization error: {e}"))
    }
}

/// Trait for projections that consume events to build read models.
pub trait Projection: Send + Sync {
    /// Handle one event and update the projection's view.
    ///
    /// Called for each event in stream order. Projections ignore events that
    /// do not touch their view.
    ///
    /// # Errors
    ///
    /// Returns an error if the projection fails to update.
    fn handle_event(&mut self, event: &StagepassEvent) -> Result<(), String>;

    /// The projection's name, for logging.
    fn name(&self) -> &'static str;

    /// Reset the projection to its initial state before a rebuild.
    fn reset(&mut self);
}
