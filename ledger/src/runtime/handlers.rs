//! Event handlers wired into the background consumers.
//!
//! A handler receives the raw bytes of one published event, deserializes
//! them into [`StagepassEvent`], and reacts. Two handlers bridge the write
//! side to the read side:
//!
//! - [`TicketRegistrar`] watches the ledger stream for events that
//!   materialize tickets and registers them with the scan aggregate
//! - [`SettlementProjector`] folds sale and settlement events into the
//!   in-memory settlement read model
//! - [`ExpiryMetrics`] counts transfer and hold expiries, which happen in
//!   the sweep or lazily and never pass through a facade method
//!
//! All tolerate redelivery: registration skips known codes and the
//! projection is only ever fed by one consumer at a time.

use crate::aggregates::{LedgerAction, ScanAction};
use crate::projections::{Projection, SettlementProjection, StagepassEvent};
use crate::service::ScanStore;
use async_trait::async_trait;
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

/// Handler for processing deserialized events.
///
/// Takes raw bytes rather than a concrete event type so the consumer stays
/// generic. Errors are logged by the consumer and do not stop the stream.
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    /// Handle one raw event (bincode-serialized bytes).
    ///
    /// # Errors
    ///
    /// Returns an error when the bytes do not deserialize or downstream
    /// processing fails.
    async fn handle(&self, data: &[u8]) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// Feeds tickets materialized by the ledger into the scan aggregate.
///
/// Sales, bundle sales, and approved holds all carry issued tickets; each
/// batch is forwarded as a `RegisterTickets` command so the door can accept
/// the codes. Registration is an upsert, so seeing the same event twice is
/// harmless.
pub struct TicketRegistrar {
    /// Scan store receiving registration commands
    pub scan: ScanStore,
}

#[async_trait]
impl EventHandler for TicketRegistrar {
    async fn handle(&self, data: &[u8]) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let event: StagepassEvent = bincode::deserialize(data)?;
        let StagepassEvent::Ledger(action) = event else {
            return Ok(());
        };

        let tickets = match action {
            LedgerAction::SaleRecorded { tickets, .. }
            | LedgerAction::BundleSold { tickets, .. }
            | LedgerAction::HoldApproved { tickets, .. } => tickets,
            _ => return Ok(()),
        };
        if tickets.is_empty() {
            return Ok(());
        }

        debug!(count = tickets.len(), "Registering issued tickets for scanning");
        self.scan.send(ScanAction::RegisterTickets { tickets }).await?;
        Ok(())
    }
}

/// Folds ledger events into the settlement read model
pub struct SettlementProjector {
    /// Settlement projection shared with query callers
    pub projection: Arc<RwLock<SettlementProjection>>,
}

#[async_trait]
impl EventHandler for SettlementProjector {
    async fn handle(&self, data: &[u8]) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let event: StagepassEvent = bincode::deserialize(data)?;

        if let Ok(mut projection) = self.projection.write() {
            projection.handle_event(&event)?;
        } else {
            warn!("Failed to acquire write lock on settlement projection");
        }

        Ok(())
    }
}

/// Records expiry metrics off the event stream.
///
/// Expiries fire inside the sweep or when a stale transfer or hold is
/// touched, so the facade methods that record the other outcomes never see
/// them.
pub struct ExpiryMetrics;

#[async_trait]
impl EventHandler for ExpiryMetrics {
    async fn handle(&self, data: &[u8]) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let event: StagepassEvent = bincode::deserialize(data)?;
        match event {
            StagepassEvent::Ledger(LedgerAction::TransferExpired { transfer_id, .. }) => {
                debug!(%transfer_id, "Transfer expired");
                crate::metrics::record_transfer_expired();
            }
            StagepassEvent::Ledger(LedgerAction::HoldExpired { hold_id, .. }) => {
                debug!(%hold_id, "Hold expired");
                crate::metrics::record_hold_expired();
            }
            _ => {}
        }
        Ok(())
    }
}
