//! Service facade for one event's ticket ledger.
//!
//! [`LedgerService`] owns the full wiring for one event: the ledger store,
//! the scan store, the background consumers bridging them, the settlement
//! projection, and the periodic expiry sweeper. Callers get a plain async
//! API; every method dispatches a command, waits for the reducer to run,
//! and turns a recorded rejection into a typed error.
//!
//! ## Startup
//!
//! [`LedgerService::start`] replays both event streams before accepting
//! commands, so a restarted service picks up exactly where it left off. The
//! settlement projection is rebuilt from the same replay, which is what
//! keeps it honest: it must agree with the figures recomputed from sale
//! records, or the replay test fails.
//!
//! ## Shutdown
//!
//! [`LedgerService::shutdown`] broadcasts a stop signal, joins every worker
//! with a timeout, and drains the stores' in-flight effects.

use crate::aggregates::{
    LEDGER_TOPIC, LedgerAction, LedgerEnvironment, LedgerReducer, ScanAction, ScanEnvironment,
    ScanReducer,
};
use crate::config::LedgerConfig;
use crate::error::LedgerError;
use crate::metrics;
use crate::projections::{Projection, SettlementProjection, StagepassEvent, StaffSettlementView};
use crate::runtime::{EventConsumer, ExpiryMetrics, SettlementProjector, TicketRegistrar};
use crate::settlement::{self, SettlementReport};
use crate::types::{
    ActivationCode, BundleId, BundleRequirement, BuyerInfo, CashOrderHold, CommissionPlan,
    HoldId, HoldItem, LedgerState, Money, PaymentMethod, RequestId, Role, SaleId, SaleRecord,
    ScanState, StaffId, Ticket, TicketCode, Tier, TierId, TransferId, TransferRequest,
};
use stagepass_core::environment::Clock;
use stagepass_core::event_bus::EventBus;
use stagepass_core::event_store::EventStore;
use stagepass_core::reducer::Reducer;
use stagepass_core::stream::StreamId;
use stagepass_runtime::{Store, StoreConfig, StoreError};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Write-side store for the ledger aggregate
pub type LedgerStore = Store<LedgerState, LedgerAction, LedgerEnvironment, LedgerReducer>;

/// Write-side store for the scan aggregate
pub type ScanStore = Store<ScanState, ScanAction, ScanEnvironment, ScanReducer>;

/// Errors surfaced by the service facade
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// The command was rejected by the ledger
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// The store runtime refused the dispatch
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Startup replay or internal wiring failed
    #[error("{0}")]
    Internal(String),
}

impl ServiceError {
    /// The underlying ledger rejection, if this error carries one
    #[must_use]
    pub const fn as_ledger(&self) -> Option<&LedgerError> {
        match self {
            Self::Ledger(error) => Some(error),
            Self::Store(_) | Self::Internal(_) => None,
        }
    }
}

/// A running ledger service for one event.
///
/// Holds both aggregate stores, the settlement read model, and the
/// background workers. Cheap reads go straight to store state; commands go
/// through the reducers and come back as `Result`s.
pub struct LedgerService {
    /// The event this service manages
    event_id: String,

    /// Write-side store for inventory, transfers, sales, and holds
    ledger: LedgerStore,

    /// Write-side store for door scans
    scan: ScanStore,

    /// Settlement read model fed by the projector consumer
    settlement: Arc<RwLock<SettlementProjection>>,

    /// Service configuration
    config: LedgerConfig,

    /// Shutdown signal broadcaster
    shutdown_tx: broadcast::Sender<()>,

    /// Background workers: consumers and the expiry sweeper
    workers: Vec<JoinHandle<()>>,
}

impl LedgerService {
    /// Start the service for one event.
    ///
    /// Replays `ledger-{event_id}` and `scan-{event_id}` from the event
    /// store, rebuilds the settlement projection from the same history, and
    /// spawns the background workers: the ticket registrar, the settlement
    /// projector, the expiry metrics observer, and the expiry sweeper.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Internal`] when a stream cannot be loaded.
    pub async fn start(
        event_id: impl Into<String>,
        clock: Arc<dyn Clock>,
        event_store: Arc<dyn EventStore>,
        event_bus: Arc<dyn EventBus>,
        config: LedgerConfig,
    ) -> Result<Self, ServiceError> {
        let event_id = event_id.into();
        let ledger_stream = StreamId::new(format!("ledger-{event_id}"));
        let scan_stream = StreamId::new(format!("scan-{event_id}"));
        let settlement = Arc::new(RwLock::new(SettlementProjection::new()));

        // Replay the ledger stream into fresh state, feeding the settlement
        // projection from the same pass.
        let ledger_env = LedgerEnvironment::new(
            Arc::clone(&clock),
            Arc::clone(&event_store),
            Arc::clone(&event_bus),
            ledger_stream.clone(),
            config.clone(),
        );
        let ledger_reducer = LedgerReducer::new();
        let mut ledger_state = LedgerState::new();
        let history = event_store
            .load_events(ledger_stream.clone(), None)
            .await
            .map_err(|e| ServiceError::Internal(format!("loading ledger stream: {e}")))?;
        let mut ledger_replayed = 0usize;
        for event in &history {
            match StagepassEvent::deserialize(event) {
                Ok(StagepassEvent::Ledger(action)) => {
                    ledger_reducer.reduce(&mut ledger_state, action.clone(), &ledger_env);
                    if let Ok(mut projection) = settlement.write() {
                        if let Err(error) =
                            projection.handle_event(&StagepassEvent::Ledger(action))
                        {
                            warn!(error = %error, "Settlement projection failed during replay");
                        }
                    }
                    ledger_replayed += 1;
                }
                Ok(StagepassEvent::Scan(_)) => {
                    warn!(
                        stream = %ledger_stream,
                        event_type = %event.event_type,
                        "Scan event found in ledger stream, skipping"
                    );
                }
                Err(error) => {
                    warn!(
                        stream = %ledger_stream,
                        event_type = %event.event_type,
                        error = %error,
                        "Undecodable event in ledger stream, skipping"
                    );
                }
            }
        }

        // Replay the scan stream.
        let scan_env = ScanEnvironment::new(
            Arc::clone(&clock),
            Arc::clone(&event_store),
            Arc::clone(&event_bus),
            scan_stream.clone(),
        );
        let scan_reducer = ScanReducer::new();
        let mut scan_state = ScanState::new();
        let history = event_store
            .load_events(scan_stream.clone(), None)
            .await
            .map_err(|e| ServiceError::Internal(format!("loading scan stream: {e}")))?;
        let mut scan_replayed = 0usize;
        for event in &history {
            match StagepassEvent::deserialize(event) {
                Ok(StagepassEvent::Scan(action)) => {
                    scan_reducer.reduce(&mut scan_state, action, &scan_env);
                    scan_replayed += 1;
                }
                Ok(StagepassEvent::Ledger(_)) => {
                    warn!(
                        stream = %scan_stream,
                        event_type = %event.event_type,
                        "Ledger event found in scan stream, skipping"
                    );
                }
                Err(error) => {
                    warn!(
                        stream = %scan_stream,
                        event_type = %event.event_type,
                        error = %error,
                        "Undecodable event in scan stream, skipping"
                    );
                }
            }
        }

        let store_config =
            StoreConfig::default().with_broadcast_capacity(config.broadcast_capacity);
        let ledger = Store::with_config(
            ledger_state,
            ledger_reducer,
            ledger_env,
            store_config.clone(),
        );
        let scan = Store::with_config(scan_state, scan_reducer, scan_env, store_config);

        let (shutdown_tx, _) = broadcast::channel(8);
        let mut workers = Vec::new();

        let registrar = EventConsumer::new(
            "ticket-registrar",
            vec![LEDGER_TOPIC.to_string()],
            Arc::clone(&event_bus),
            Arc::new(TicketRegistrar { scan: scan.clone() }),
            shutdown_tx.subscribe(),
        );
        workers.push(registrar.spawn());

        let projector = EventConsumer::new(
            "settlement-projector",
            vec![LEDGER_TOPIC.to_string()],
            Arc::clone(&event_bus),
            Arc::new(SettlementProjector {
                projection: Arc::clone(&settlement),
            }),
            shutdown_tx.subscribe(),
        );
        workers.push(projector.spawn());

        let expiry_metrics = EventConsumer::new(
            "expiry-metrics",
            vec![LEDGER_TOPIC.to_string()],
            Arc::clone(&event_bus),
            Arc::new(ExpiryMetrics),
            shutdown_tx.subscribe(),
        );
        workers.push(expiry_metrics.spawn());

        // Periodic expiry sweep; the delay effects scheduled per transfer
        // and hold normally get there first, the sweep catches the rest
        // after a restart.
        let sweeper = {
            let store = ledger.clone();
            let mut shutdown = shutdown_tx.subscribe();
            let interval = config.sweep_interval();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        _ = shutdown.recv() => break,
                        _ = ticker.tick() => {
                            if let Err(error) = store.send(LedgerAction::SweepExpired).await {
                                warn!(error = %error, "Expiry sweep dispatch failed");
                            }
                        }
                    }
                }
                info!("Expiry sweeper stopped");
            })
        };
        workers.push(sweeper);

        // The in-memory bus only delivers to subscribers attached at publish
        // time; give the consumers a beat to finish subscribing before the
        // first command publishes.
        tokio::time::sleep(Duration::from_millis(20)).await;

        info!(
            event_id = %event_id,
            ledger_events = ledger_replayed,
            scan_events = scan_replayed,
            "Ledger service started"
        );

        Ok(Self {
            event_id,
            ledger,
            scan,
            settlement,
            config,
            shutdown_tx,
            workers,
        })
    }

    /// The event this service manages
    #[must_use]
    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    /// The service configuration
    #[must_use]
    pub const fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Direct access to the ledger store, for observers and tests
    #[must_use]
    pub const fn ledger_store(&self) -> &LedgerStore {
        &self.ledger
    }

    /// Direct access to the scan store, for observers and tests
    #[must_use]
    pub const fn scan_store(&self) -> &ScanStore {
        &self.scan
    }

    /// Dispatch a ledger command and surface its recorded rejection, if any
    async fn dispatch(&self, request: RequestId, action: LedgerAction) -> Result<(), ServiceError> {
        self.ledger.send(action).await?;
        let rejection = self
            .ledger
            .state(move |state| state.rejection_for(&request).cloned())
            .await;
        match rejection {
            Some(error) => {
                metrics::record_rejection(error.category());
                Err(ServiceError::Ledger(error))
            }
            None => Ok(()),
        }
    }

    /// Dispatch a scan command and surface its recorded rejection, if any
    async fn dispatch_scan(
        &self,
        request: RequestId,
        action: ScanAction,
    ) -> Result<(), ServiceError> {
        self.scan.send(action).await?;
        let rejection = self
            .scan
            .state(move |state| state.rejection_for(&request).cloned())
            .await;
        match rejection {
            Some(error) => {
                metrics::record_rejection(error.category());
                Err(ServiceError::Ledger(error))
            }
            None => Ok(()),
        }
    }

    // ------------------------------------------------------------------
    // Setup
    // ------------------------------------------------------------------

    /// Register a ticket tier with its printed quantity.
    ///
    /// # Errors
    ///
    /// Rejected with `InvalidQuantity` when nothing was printed.
    pub async fn register_tier(
        &self,
        name: &str,
        price: Money,
        printed_quantity: u32,
    ) -> Result<TierId, ServiceError> {
        let request = RequestId::new();
        let tier_id = TierId::new();
        self.dispatch(
            request,
            LedgerAction::RegisterTier {
                request,
                tier_id,
                name: name.to_string(),
                price,
                printed_quantity,
            },
        )
        .await?;
        Ok(tier_id)
    }

    /// Add a staff member to the sales team.
    ///
    /// # Errors
    ///
    /// Rejected when the commission rate exceeds 100%, an associate has no
    /// parent, or the parent is not an active team member.
    pub async fn add_staff(
        &self,
        name: &str,
        role: Role,
        parent: Option<StaffId>,
        commission: CommissionPlan,
    ) -> Result<StaffId, ServiceError> {
        let request = RequestId::new();
        let staff_id = StaffId::new();
        self.dispatch(
            request,
            LedgerAction::AddStaff {
                request,
                staff_id,
                name: name.to_string(),
                role,
                parent,
                commission,
            },
        )
        .await?;
        Ok(staff_id)
    }

    /// Deactivate a staff member who holds no tickets.
    ///
    /// # Errors
    ///
    /// Rejected with `BalancesOutstanding` while any tier balance is
    /// nonzero.
    pub async fn deactivate_staff(&self, staff_id: StaffId) -> Result<(), ServiceError> {
        let request = RequestId::new();
        self.dispatch(request, LedgerAction::DeactivateStaff { request, staff_id })
            .await
    }

    /// Define a multi-tier bundle sold as one unit.
    ///
    /// # Errors
    ///
    /// Rejected when the bundle requires no tiers or names an unknown one.
    pub async fn define_bundle(
        &self,
        name: &str,
        price: Money,
        required: Vec<BundleRequirement>,
        total_quantity: u32,
    ) -> Result<BundleId, ServiceError> {
        let request = RequestId::new();
        let bundle_id = BundleId::new();
        self.dispatch(
            request,
            LedgerAction::DefineBundle {
                request,
                bundle_id,
                name: name.to_string(),
                price,
                required,
                total_quantity,
            },
        )
        .await?;
        Ok(bundle_id)
    }

    // ------------------------------------------------------------------
    // Inventory
    // ------------------------------------------------------------------

    /// Hand tickets from the printed stock to a staff member.
    ///
    /// Returns the member's new balance in the tier.
    ///
    /// # Errors
    ///
    /// Rejected with `TierCapacityExceeded` when the claim would push total
    /// claims past the printed quantity.
    pub async fn allocate(
        &self,
        staff_id: StaffId,
        tier_id: TierId,
        quantity: u32,
    ) -> Result<u32, ServiceError> {
        let request = RequestId::new();
        self.dispatch(
            request,
            LedgerAction::AllocateTickets {
                request,
                staff_id,
                tier_id,
                quantity,
            },
        )
        .await?;
        metrics::record_allocation(quantity);
        Ok(self
            .ledger
            .state(move |state| state.balance(&staff_id, &tier_id))
            .await)
    }

    /// Tickets a staff member currently holds in a tier
    pub async fn balance(&self, staff_id: StaffId, tier_id: TierId) -> u32 {
        self.ledger
            .state(move |state| state.balance(&staff_id, &tier_id))
            .await
    }

    /// Printed tickets still unclaimed in a tier, or `None` for an unknown
    /// tier
    pub async fn tier_availability(&self, tier_id: TierId) -> Option<u32> {
        self.ledger
            .state(move |state| state.tier_availability(&tier_id))
            .await
    }

    /// A tier by id
    pub async fn tier(&self, tier_id: TierId) -> Option<Tier> {
        self.ledger
            .state(move |state| state.tier(&tier_id).cloned())
            .await
    }

    // ------------------------------------------------------------------
    // Transfers
    // ------------------------------------------------------------------

    /// Offer tickets to a peer. Debits the source immediately; the tickets
    /// come back only if the transfer is rejected or expires.
    ///
    /// # Errors
    ///
    /// Rejected with `InsufficientBalance` when the source holds fewer
    /// tickets than offered, or `SelfTransfer` for a transfer to oneself.
    pub async fn request_transfer(
        &self,
        from: StaffId,
        to: StaffId,
        tier_id: TierId,
        quantity: u32,
        note: Option<String>,
    ) -> Result<TransferId, ServiceError> {
        let request = RequestId::new();
        let transfer_id = TransferId::new();
        self.dispatch(
            request,
            LedgerAction::RequestTransfer {
                request,
                transfer_id,
                from,
                to,
                tier_id,
                quantity,
                note,
            },
        )
        .await?;
        metrics::record_transfer_requested();
        Ok(transfer_id)
    }

    /// Accept a pending transfer. Only the destination or an organizer may.
    ///
    /// # Errors
    ///
    /// Rejected with `NotAuthorized` for anyone else, `TransferNotPending`
    /// when it was already resolved, or `TransferExpired` past the deadline.
    pub async fn accept_transfer(
        &self,
        transfer_id: TransferId,
        acting_staff: StaffId,
    ) -> Result<(), ServiceError> {
        let request = RequestId::new();
        self.dispatch(
            request,
            LedgerAction::AcceptTransfer {
                request,
                transfer_id,
                acting_staff,
            },
        )
        .await?;
        metrics::record_transfer_accepted();
        Ok(())
    }

    /// Decline a pending transfer, refunding the source.
    ///
    /// # Errors
    ///
    /// Same authorization and lifecycle rules as [`Self::accept_transfer`].
    pub async fn reject_transfer(
        &self,
        transfer_id: TransferId,
        acting_staff: StaffId,
    ) -> Result<(), ServiceError> {
        let request = RequestId::new();
        self.dispatch(
            request,
            LedgerAction::RejectTransfer {
                request,
                transfer_id,
                acting_staff,
            },
        )
        .await?;
        metrics::record_transfer_rejected();
        Ok(())
    }

    /// A transfer request by id
    pub async fn transfer(&self, transfer_id: TransferId) -> Option<TransferRequest> {
        self.ledger
            .state(move |state| state.transfer(&transfer_id).cloned())
            .await
    }

    // ------------------------------------------------------------------
    // Sales
    // ------------------------------------------------------------------

    /// Record a sale of loose tickets from one tier.
    ///
    /// Commission and cash-collected are frozen into the returned record.
    ///
    /// # Errors
    ///
    /// Rejected with `InsufficientBalance` when the seller holds fewer
    /// tickets than the sale needs.
    pub async fn record_sale(
        &self,
        staff_id: StaffId,
        tier_id: TierId,
        quantity: u32,
        payment: PaymentMethod,
        buyer: BuyerInfo,
    ) -> Result<SaleRecord, ServiceError> {
        let request = RequestId::new();
        let sale_id = SaleId::new();
        self.dispatch(
            request,
            LedgerAction::RecordSale {
                request,
                sale_id,
                staff_id,
                tier_id,
                quantity,
                buyer,
                payment,
            },
        )
        .await?;
        let record = self
            .ledger
            .state(move |state| state.sale(&sale_id).cloned())
            .await
            .ok_or_else(|| {
                ServiceError::Internal(format!("sale {sale_id} missing after dispatch"))
            })?;
        metrics::record_sale(
            record.payment,
            record.total_price().map_or(0, |price| price.cents()),
            record.commission.cents(),
            quantity,
        );
        Ok(record)
    }

    /// Whether a staff member can sell a bundle right now.
    ///
    /// A positive answer can still lose to a concurrent sale; the sell
    /// re-checks atomically.
    ///
    /// # Errors
    ///
    /// `BundleSoldOut` when stock ran out, or `BundleIneligible` naming the
    /// first required tier the member holds too few tickets of.
    pub async fn can_sell_bundle(
        &self,
        staff_id: StaffId,
        bundle_id: BundleId,
    ) -> Result<(), ServiceError> {
        self.ledger
            .state(move |state| state.bundle_eligibility(&staff_id, &bundle_id))
            .await
            .map_err(ServiceError::Ledger)
    }

    /// Sell one bundle, debiting every required tier atomically.
    ///
    /// Produces one sale record with commission computed once on the bundle
    /// price.
    ///
    /// # Errors
    ///
    /// Same as [`Self::can_sell_bundle`], re-checked under the state lock.
    pub async fn sell_bundle(
        &self,
        staff_id: StaffId,
        bundle_id: BundleId,
        payment: PaymentMethod,
        buyer: BuyerInfo,
    ) -> Result<SaleRecord, ServiceError> {
        let request = RequestId::new();
        let sale_id = SaleId::new();
        self.dispatch(
            request,
            LedgerAction::SellBundle {
                request,
                sale_id,
                staff_id,
                bundle_id,
                buyer,
                payment,
            },
        )
        .await?;
        let record = self
            .ledger
            .state(move |state| state.sale(&sale_id).cloned())
            .await
            .ok_or_else(|| {
                ServiceError::Internal(format!("sale {sale_id} missing after dispatch"))
            })?;
        metrics::record_sale(
            record.payment,
            record.total_price().map_or(0, |price| price.cents()),
            record.commission.cents(),
            u32::try_from(record.tickets.len()).unwrap_or(u32::MAX),
        );
        Ok(record)
    }

    /// A sale record by id
    pub async fn sale(&self, sale_id: SaleId) -> Option<SaleRecord> {
        self.ledger
            .state(move |state| state.sale(&sale_id).cloned())
            .await
    }

    // ------------------------------------------------------------------
    // Cash-order holds
    // ------------------------------------------------------------------

    /// Reserve general-pool capacity for a buyer who will pay cash later.
    ///
    /// `hold_minutes` falls back to the configured default when `None`.
    ///
    /// # Errors
    ///
    /// Rejected with `TierCapacityExceeded` when the pool cannot cover the
    /// reservation.
    pub async fn create_hold(
        &self,
        buyer: BuyerInfo,
        items: Vec<HoldItem>,
        hold_minutes: Option<u32>,
    ) -> Result<HoldId, ServiceError> {
        let request = RequestId::new();
        let hold_id = HoldId::new();
        self.dispatch(
            request,
            LedgerAction::CreateHold {
                request,
                hold_id,
                buyer,
                items,
                hold_minutes: hold_minutes.unwrap_or(self.config.default_hold_minutes),
            },
        )
        .await?;
        metrics::record_hold_created();
        Ok(hold_id)
    }

    /// Confirm payment arrived and issue the held tickets.
    ///
    /// # Errors
    ///
    /// Rejected with `HoldExpired` when the deadline passed first; the
    /// reserved capacity goes back to the pool.
    pub async fn approve_hold(
        &self,
        hold_id: HoldId,
        staff_id: StaffId,
    ) -> Result<CashOrderHold, ServiceError> {
        let request = RequestId::new();
        self.dispatch(
            request,
            LedgerAction::ApproveHold {
                request,
                hold_id,
                staff_id,
            },
        )
        .await?;
        let hold = self.hold_or_internal(hold_id).await?;
        metrics::record_hold_approved(u32::try_from(hold.tickets.len()).unwrap_or(u32::MAX));
        Ok(hold)
    }

    /// Generate a short-lived numeric code the buyer can activate with.
    ///
    /// # Errors
    ///
    /// Rejected when the hold is no longer active.
    pub async fn generate_activation_code(
        &self,
        hold_id: HoldId,
        staff_id: StaffId,
    ) -> Result<ActivationCode, ServiceError> {
        let request = RequestId::new();
        self.dispatch(
            request,
            LedgerAction::GenerateActivationCode {
                request,
                hold_id,
                staff_id,
            },
        )
        .await?;
        self.ledger
            .state(move |state| state.hold(&hold_id).and_then(|h| h.activation_code.clone()))
            .await
            .ok_or_else(|| {
                ServiceError::Internal(format!("activation code for {hold_id} missing"))
            })
    }

    /// Approve a hold by presenting its activation code.
    ///
    /// # Errors
    ///
    /// Rejected with `CodeInvalid` on a mismatch, `CodeExpired` past the
    /// code's own deadline.
    pub async fn activate_by_code(
        &self,
        hold_id: HoldId,
        code: ActivationCode,
    ) -> Result<CashOrderHold, ServiceError> {
        let request = RequestId::new();
        self.dispatch(
            request,
            LedgerAction::ActivateByCode {
                request,
                hold_id,
                code,
            },
        )
        .await?;
        let hold = self.hold_or_internal(hold_id).await?;
        metrics::record_hold_approved(u32::try_from(hold.tickets.len()).unwrap_or(u32::MAX));
        Ok(hold)
    }

    /// Withdraw an active hold and release its capacity.
    ///
    /// # Errors
    ///
    /// Rejected with `HoldNotActive` when it was already resolved.
    pub async fn cancel_hold(&self, hold_id: HoldId) -> Result<(), ServiceError> {
        let request = RequestId::new();
        self.dispatch(request, LedgerAction::CancelHold { request, hold_id })
            .await?;
        metrics::record_hold_cancelled();
        Ok(())
    }

    /// A cash-order hold by id
    pub async fn hold(&self, hold_id: HoldId) -> Option<CashOrderHold> {
        self.ledger
            .state(move |state| state.hold(&hold_id).cloned())
            .await
    }

    async fn hold_or_internal(&self, hold_id: HoldId) -> Result<CashOrderHold, ServiceError> {
        self.hold(hold_id).await.ok_or_else(|| {
            ServiceError::Internal(format!("hold {hold_id} missing after dispatch"))
        })
    }

    // ------------------------------------------------------------------
    // Settlement
    // ------------------------------------------------------------------

    /// One staff member's settlement, recomputed from their sale records.
    ///
    /// # Errors
    ///
    /// `UnknownStaff` when no such member exists.
    pub async fn settlement_report(
        &self,
        staff_id: StaffId,
    ) -> Result<SettlementReport, ServiceError> {
        self.ledger
            .state(move |state| settlement::report_for(state, &staff_id))
            .await
            .ok_or(ServiceError::Ledger(LedgerError::UnknownStaff { staff_id }))
    }

    /// Settlement reports for the whole team, sorted by name
    pub async fn settlement_reports(&self) -> Vec<SettlementReport> {
        self.ledger.state(settlement::report_all).await
    }

    /// One staff member's view in the incremental settlement projection.
    ///
    /// Eventually consistent: trails the write side by consumer delivery.
    #[must_use]
    pub fn settlement_view(&self, staff_id: &StaffId) -> Option<StaffSettlementView> {
        match self.settlement.read() {
            Ok(projection) => projection.view(staff_id).cloned(),
            Err(_) => {
                warn!("Settlement projection lock poisoned");
                None
            }
        }
    }

    /// Flag a staff member's settlement as paid out.
    ///
    /// Marking an already-paid settlement changes nothing.
    ///
    /// # Errors
    ///
    /// Rejected with `UnknownStaff` for a member that does not exist.
    pub async fn mark_settlement_paid(&self, staff_id: StaffId) -> Result<(), ServiceError> {
        let request = RequestId::new();
        self.dispatch(
            request,
            LedgerAction::MarkSettlementPaid { request, staff_id },
        )
        .await
    }

    /// Reopen a staff member's settlement after further sales.
    ///
    /// # Errors
    ///
    /// Rejected with `UnknownStaff` for a member that does not exist.
    pub async fn mark_settlement_pending(&self, staff_id: StaffId) -> Result<(), ServiceError> {
        let request = RequestId::new();
        self.dispatch(
            request,
            LedgerAction::MarkSettlementPending { request, staff_id },
        )
        .await
    }

    // ------------------------------------------------------------------
    // Door scans
    // ------------------------------------------------------------------

    /// Admit a ticket at the door. First scan wins; any later scan reports
    /// when the first one happened.
    ///
    /// # Errors
    ///
    /// `TicketNotFound` for unknown codes, `AlreadyScanned` with the
    /// original scan time, `TicketVoided` for pulled tickets.
    pub async fn scan_ticket(&self, code: TicketCode) -> Result<Ticket, ServiceError> {
        let request = RequestId::new();
        let lookup = code.clone();
        let outcome = self
            .dispatch_scan(request, ScanAction::ScanTicket { request, code })
            .await;
        if let Err(error) = outcome {
            match error.as_ledger() {
                Some(LedgerError::AlreadyScanned { .. }) => metrics::record_scan("duplicate"),
                Some(LedgerError::TicketVoided { .. }) => metrics::record_scan("voided"),
                Some(LedgerError::TicketNotFound { .. }) => metrics::record_scan("unknown"),
                _ => {}
            }
            return Err(error);
        }
        metrics::record_scan("admitted");
        self.scan
            .state(move |state| state.ticket(&lookup).cloned())
            .await
            .ok_or_else(|| ServiceError::Internal("ticket missing after scan".to_string()))
    }

    /// Pull a ticket out of circulation before it is used.
    ///
    /// # Errors
    ///
    /// Rejected with `AlreadyScanned` once the holder was admitted.
    pub async fn void_ticket(&self, code: TicketCode) -> Result<(), ServiceError> {
        let request = RequestId::new();
        self.dispatch_scan(request, ScanAction::VoidTicket { request, code })
            .await
    }

    /// A ticket as the door sees it
    pub async fn ticket(&self, code: TicketCode) -> Option<Ticket> {
        self.scan
            .state(move |state| state.ticket(&code).cloned())
            .await
    }

    // ------------------------------------------------------------------
    // Maintenance
    // ------------------------------------------------------------------

    /// Run an expiry sweep immediately instead of waiting for the interval.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Store`] when the store refuses the dispatch.
    pub async fn sweep_now(&self) -> Result<(), ServiceError> {
        self.ledger.send(LedgerAction::SweepExpired).await?;
        Ok(())
    }

    /// Stop the service: signal the workers, join them with a timeout, and
    /// drain both stores.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Store`] when a store cannot drain its
    /// in-flight effects in time.
    pub async fn shutdown(self) -> Result<(), ServiceError> {
        info!(event_id = %self.event_id, "Shutting down ledger service");
        let _ = self.shutdown_tx.send(());

        let timeout = Duration::from_secs(10);
        for (idx, handle) in self.workers.into_iter().enumerate() {
            match tokio::time::timeout(timeout, handle).await {
                Ok(Ok(())) => info!(worker = idx, "Worker stopped gracefully"),
                Ok(Err(error)) => warn!(worker = idx, error = %error, "Worker task failed"),
                Err(_) => warn!(worker = idx, "Worker shutdown timed out"),
            }
        }

        // Drain both stores before reporting, so a slow ledger store does
        // not leave the scan store undrained. Scheduled expiry timers are
        // cancelled by the stores; the sweep picks those up after restart.
        let ledger_drained = self.ledger.shutdown().await;
        let scan_drained = self.scan.shutdown().await;
        ledger_drained?;
        scan_drained?;
        info!(event_id = %self.event_id, "Ledger service stopped");
        Ok(())
    }
}
