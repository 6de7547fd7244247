//! Ledger aggregate: the single writer for one event's ticket inventory.
//!
//! Every ticket movement flows through this reducer inside one state lock:
//! allocations against printed capacity, debit-on-request transfers, sales
//! with commission frozen at sale time, bundle sales that debit several tiers
//! atomically, general-pool cash-order holds, and settlement flags. A command
//! either applies completely or records a rejection and changes nothing else,
//! so concurrent sellers race on full rows, never on partial ones.
//!
//! **Expiry strategy**: transfers and holds carry absolute deadlines. A delay
//! effect schedules the expiry command when the entity is created, any touch
//! of an expired entity applies the expiry on the spot, and a periodic sweep
//! catches whatever neither path has reached yet. All three funnel into the
//! same expiry events, which are idempotent.

use crate::config::LedgerConfig;
use crate::error::LedgerError;
use crate::projections::StagepassEvent;
use crate::types::{
    ActivationCode, ApprovedBy, Bundle, BundleId, BundleRequirement, BuyerInfo, CashOrderHold,
    CommissionPlan, ExpiresAt, HoldId, HoldItem, HoldStatus, IssuedTicket, LedgerState, Money,
    PaymentMethod, RequestId, Role, SaleId, SaleItem, SaleRecord, SettlementStatus, StaffId,
    StaffMember, TicketCode, Tier, TierAllocation, TierId, TransferId, TransferRequest,
    TransferStatus,
};
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use stagepass_core::{
    SmallVec, append_events, delay, effect::Effect, environment::Clock, event_bus::EventBus,
    event_store::EventStore, publish_event, reducer::Reducer, smallvec, stream::StreamId,
};
use stagepass_macros::Action;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::LEDGER_TOPIC;

/// Characters used in generated ticket codes
const TICKET_CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

// ============================================================================
// Actions
// ============================================================================

/// Commands and events for the ledger aggregate
#[derive(Action, Clone, Debug, Serialize, Deserialize)]
pub enum LedgerAction {
    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------
    /// Register a ticket tier with its printed quantity
    #[command]
    RegisterTier {
        /// Correlation id for this dispatch
        request: RequestId,
        /// Tier to create
        tier_id: TierId,
        /// Display name
        name: String,
        /// Face price per ticket
        price: Money,
        /// Physical tickets printed
        printed_quantity: u32,
    },

    /// Add a staff member to the sales team
    #[command]
    AddStaff {
        /// Correlation id for this dispatch
        request: RequestId,
        /// Member to create
        staff_id: StaffId,
        /// Display name
        name: String,
        /// Role within the team
        role: Role,
        /// Team member an associate sells under
        parent: Option<StaffId>,
        /// Commission plan for this member's sales
        commission: CommissionPlan,
    },

    /// Deactivate a staff member who holds no tickets
    #[command]
    DeactivateStaff {
        /// Correlation id for this dispatch
        request: RequestId,
        /// Member to deactivate
        staff_id: StaffId,
    },

    /// Define a multi-tier bundle sold as one unit
    #[command]
    DefineBundle {
        /// Correlation id for this dispatch
        request: RequestId,
        /// Bundle to create
        bundle_id: BundleId,
        /// Display name
        name: String,
        /// Price of the whole bundle
        price: Money,
        /// Tiers and quantities one bundle is made of
        required: Vec<BundleRequirement>,
        /// Bundles available in total
        total_quantity: u32,
    },

    /// Hand tickets from the printed stock to a staff member
    #[command]
    AllocateTickets {
        /// Correlation id for this dispatch
        request: RequestId,
        /// Member receiving the tickets
        staff_id: StaffId,
        /// Tier being allocated
        tier_id: TierId,
        /// Tickets to allocate
        quantity: u32,
    },

    /// Offer tickets to a peer; debits the source immediately
    #[command]
    RequestTransfer {
        /// Correlation id for this dispatch
        request: RequestId,
        /// Transfer to create
        transfer_id: TransferId,
        /// Member giving tickets up
        from: StaffId,
        /// Member meant to receive them
        to: StaffId,
        /// Tier being transferred
        tier_id: TierId,
        /// Tickets in the transfer
        quantity: u32,
        /// Optional note to the recipient
        note: Option<String>,
    },

    /// Accept a pending transfer (destination or organizer only)
    #[command]
    AcceptTransfer {
        /// Correlation id for this dispatch
        request: RequestId,
        /// Transfer to accept
        transfer_id: TransferId,
        /// Member performing the acceptance
        acting_staff: StaffId,
    },

    /// Decline a pending transfer (destination or organizer only)
    #[command]
    RejectTransfer {
        /// Correlation id for this dispatch
        request: RequestId,
        /// Transfer to decline
        transfer_id: TransferId,
        /// Member performing the rejection
        acting_staff: StaffId,
    },

    /// Expire a transfer whose response deadline has passed.
    ///
    /// Scheduled by a delay effect at request time and sent by the sweep;
    /// ignored if the transfer has already been resolved.
    #[command]
    ExpireTransfer {
        /// Transfer to expire
        transfer_id: TransferId,
    },

    /// Record a sale of loose tickets from one tier
    #[command]
    RecordSale {
        /// Correlation id for this dispatch
        request: RequestId,
        /// Sale to create
        sale_id: SaleId,
        /// Selling staff member
        staff_id: StaffId,
        /// Tier sold from
        tier_id: TierId,
        /// Tickets sold
        quantity: u32,
        /// Buyer details
        buyer: BuyerInfo,
        /// How the buyer paid
        payment: PaymentMethod,
    },

    /// Sell one bundle, debiting every required tier atomically
    #[command]
    SellBundle {
        /// Correlation id for this dispatch
        request: RequestId,
        /// Sale to create
        sale_id: SaleId,
        /// Selling staff member
        staff_id: StaffId,
        /// Bundle being sold
        bundle_id: BundleId,
        /// Buyer details
        buyer: BuyerInfo,
        /// How the buyer paid
        payment: PaymentMethod,
    },

    /// Reserve general-pool capacity for a buyer who will pay cash later
    #[command]
    CreateHold {
        /// Correlation id for this dispatch
        request: RequestId,
        /// Hold to create
        hold_id: HoldId,
        /// Buyer the hold is for
        buyer: BuyerInfo,
        /// Tiers and quantities to reserve
        items: Vec<HoldItem>,
        /// Minutes until the hold expires
        hold_minutes: u32,
    },

    /// Confirm payment arrived and issue the held tickets
    #[command]
    ApproveHold {
        /// Correlation id for this dispatch
        request: RequestId,
        /// Hold to approve
        hold_id: HoldId,
        /// Member confirming the payment
        staff_id: StaffId,
    },

    /// Generate a short-lived numeric code the buyer can activate with
    #[command]
    GenerateActivationCode {
        /// Correlation id for this dispatch
        request: RequestId,
        /// Hold the code is for
        hold_id: HoldId,
        /// Member generating the code
        staff_id: StaffId,
    },

    /// Approve a hold by presenting its activation code
    #[command]
    ActivateByCode {
        /// Correlation id for this dispatch
        request: RequestId,
        /// Hold being activated
        hold_id: HoldId,
        /// Code the buyer presented
        code: ActivationCode,
    },

    /// Withdraw an active hold and release its capacity
    #[command]
    CancelHold {
        /// Correlation id for this dispatch
        request: RequestId,
        /// Hold to cancel
        hold_id: HoldId,
    },

    /// Expire a hold whose payment deadline has passed.
    ///
    /// Scheduled by a delay effect at creation time and sent by the sweep;
    /// ignored if the hold has already been resolved.
    #[command]
    ExpireHold {
        /// Hold to expire
        hold_id: HoldId,
    },

    /// Flag a staff member's settlement as paid out
    #[command]
    MarkSettlementPaid {
        /// Correlation id for this dispatch
        request: RequestId,
        /// Member whose settlement was paid
        staff_id: StaffId,
    },

    /// Reopen a staff member's settlement
    #[command]
    MarkSettlementPending {
        /// Correlation id for this dispatch
        request: RequestId,
        /// Member whose settlement is pending again
        staff_id: StaffId,
    },

    /// Expire every transfer and hold whose deadline has passed
    #[command]
    SweepExpired,

    // ------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------
    /// A tier was registered
    #[event]
    TierRegistered {
        /// Tier created
        tier_id: TierId,
        /// Display name
        name: String,
        /// Face price per ticket
        price: Money,
        /// Physical tickets printed
        printed_quantity: u32,
        /// When the tier was registered
        registered_at: DateTime<Utc>,
    },

    /// A staff member joined the team
    #[event]
    StaffAdded {
        /// Member created
        staff_id: StaffId,
        /// Display name
        name: String,
        /// Role within the team
        role: Role,
        /// Team member an associate sells under
        parent: Option<StaffId>,
        /// Commission plan for this member's sales
        commission: CommissionPlan,
        /// When the member was added
        added_at: DateTime<Utc>,
    },

    /// A staff member was deactivated
    #[event]
    StaffDeactivated {
        /// Member deactivated
        staff_id: StaffId,
        /// When they were deactivated
        deactivated_at: DateTime<Utc>,
    },

    /// A bundle was defined
    #[event]
    BundleDefined {
        /// Bundle created
        bundle_id: BundleId,
        /// Display name
        name: String,
        /// Price of the whole bundle
        price: Money,
        /// Tiers and quantities one bundle is made of
        required: Vec<BundleRequirement>,
        /// Bundles available in total
        total_quantity: u32,
        /// When the bundle was defined
        defined_at: DateTime<Utc>,
    },

    /// Tickets moved from printed stock into a staff member's hands
    #[event]
    TicketsAllocated {
        /// Member who received the tickets
        staff_id: StaffId,
        /// Tier allocated
        tier_id: TierId,
        /// Tickets allocated
        quantity: u32,
        /// When the allocation happened
        allocated_at: DateTime<Utc>,
    },

    /// A transfer was requested and the source debited
    #[event]
    TransferRequested {
        /// Transfer created
        transfer_id: TransferId,
        /// Member giving tickets up
        from: StaffId,
        /// Member meant to receive them
        to: StaffId,
        /// Tier being transferred
        tier_id: TierId,
        /// Tickets in the transfer
        quantity: u32,
        /// Optional note to the recipient
        note: Option<String>,
        /// When the transfer was requested
        requested_at: DateTime<Utc>,
        /// Deadline for the destination to respond
        expires_at: ExpiresAt,
    },

    /// A pending transfer was accepted and the destination credited
    #[event]
    TransferAccepted {
        /// Transfer accepted
        transfer_id: TransferId,
        /// When it was accepted
        accepted_at: DateTime<Utc>,
    },

    /// A pending transfer was declined and the source refunded
    #[event]
    TransferRejected {
        /// Transfer declined
        transfer_id: TransferId,
        /// When it was declined
        rejected_at: DateTime<Utc>,
    },

    /// A pending transfer ran out of time and the source was refunded
    #[event]
    TransferExpired {
        /// Transfer expired
        transfer_id: TransferId,
        /// When the expiry took effect
        expired_at: DateTime<Utc>,
    },

    /// A sale of loose tickets was recorded
    #[event]
    SaleRecorded {
        /// Sale created
        sale_id: SaleId,
        /// Selling staff member
        staff_id: StaffId,
        /// Tier sold from
        tier_id: TierId,
        /// Tickets sold
        quantity: u32,
        /// Price per ticket at sale time
        unit_price: Money,
        /// How the buyer paid
        payment: PaymentMethod,
        /// Buyer details
        buyer: BuyerInfo,
        /// Commission earned, frozen at sale time
        commission: Money,
        /// Cash the seller physically took in
        cash_collected: Money,
        /// Tickets materialized by this sale
        tickets: Vec<IssuedTicket>,
        /// When the sale was recorded
        sold_at: DateTime<Utc>,
    },

    /// A bundle was sold as one unit
    #[event]
    BundleSold {
        /// Sale created
        sale_id: SaleId,
        /// Selling staff member
        staff_id: StaffId,
        /// Bundle sold
        bundle_id: BundleId,
        /// Bundle price at sale time
        price: Money,
        /// How the buyer paid
        payment: PaymentMethod,
        /// Buyer details
        buyer: BuyerInfo,
        /// Commission earned once on the bundle price
        commission: Money,
        /// Cash the seller physically took in
        cash_collected: Money,
        /// Tickets materialized across all required tiers
        tickets: Vec<IssuedTicket>,
        /// When the sale was recorded
        sold_at: DateTime<Utc>,
    },

    /// A cash-order hold reserved general-pool capacity
    #[event]
    HoldCreated {
        /// Hold created
        hold_id: HoldId,
        /// Buyer the hold is for
        buyer: BuyerInfo,
        /// Tiers and quantities reserved
        items: Vec<HoldItem>,
        /// When the hold was placed
        created_at: DateTime<Utc>,
        /// Deadline for the buyer to pay
        expires_at: ExpiresAt,
    },

    /// A hold was approved and its tickets issued from the pool
    #[event]
    HoldApproved {
        /// Hold approved
        hold_id: HoldId,
        /// Who approved it
        approved_by: ApprovedBy,
        /// Tickets issued from the reserved capacity
        tickets: Vec<IssuedTicket>,
        /// When the hold was approved
        approved_at: DateTime<Utc>,
    },

    /// An activation code was attached to a hold
    #[event]
    ActivationCodeGenerated {
        /// Hold the code belongs to
        hold_id: HoldId,
        /// The generated code
        code: ActivationCode,
        /// The code's own deadline, capped by the hold deadline
        code_expires_at: ExpiresAt,
        /// When the code was generated
        generated_at: DateTime<Utc>,
    },

    /// A hold was withdrawn and its capacity released
    #[event]
    HoldCancelled {
        /// Hold cancelled
        hold_id: HoldId,
        /// When it was cancelled
        cancelled_at: DateTime<Utc>,
    },

    /// A hold ran out of time and its capacity was released
    #[event]
    HoldExpired {
        /// Hold expired
        hold_id: HoldId,
        /// When the expiry took effect
        expired_at: DateTime<Utc>,
    },

    /// A staff member's settlement was flagged as paid
    #[event]
    SettlementMarkedPaid {
        /// Member whose settlement was paid
        staff_id: StaffId,
        /// When it was marked paid
        paid_at: DateTime<Utc>,
    },

    /// A staff member's settlement was reopened
    #[event]
    SettlementMarkedPending {
        /// Member whose settlement is pending again
        staff_id: StaffId,
    },

    /// A command failed validation.
    ///
    /// Transient: recorded in state for the dispatching caller to read back,
    /// never persisted to the stream and never published.
    #[event]
    CommandRejected {
        /// Correlation id of the rejected command
        request: RequestId,
        /// Why it was rejected
        error: LedgerError,
    },

    /// An append or publish effect failed after retries.
    ///
    /// Fed back by the effect callbacks so the failure is visible in state.
    StorageFailed {
        /// Which operation failed ("append" or "publish")
        operation: String,
        /// The underlying error message
        reason: String,
    },
}

// ============================================================================
// Environment
// ============================================================================

/// Dependencies injected into the ledger reducer
#[derive(Clone)]
pub struct LedgerEnvironment {
    /// Clock for timestamps and deadline checks
    pub clock: Arc<dyn Clock>,
    /// Event store for persisting events
    pub event_store: Arc<dyn EventStore>,
    /// Event bus for publishing events
    pub event_bus: Arc<dyn EventBus>,
    /// Stream this aggregate appends to (`ledger-{event_id}`)
    pub stream_id: StreamId,
    /// Timing and code-generation settings
    pub config: LedgerConfig,
}

impl LedgerEnvironment {
    /// Creates a new ledger environment
    #[must_use]
    pub fn new(
        clock: Arc<dyn Clock>,
        event_store: Arc<dyn EventStore>,
        event_bus: Arc<dyn EventBus>,
        stream_id: StreamId,
        config: LedgerConfig,
    ) -> Self {
        Self {
            clock,
            event_store,
            event_bus,
            stream_id,
            config,
        }
    }
}

// ============================================================================
// Reducer
// ============================================================================

/// Reducer for the ledger aggregate
#[derive(Clone, Debug, Default)]
pub struct LedgerReducer;

impl LedgerReducer {
    /// Creates a new ledger reducer
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Records a rejection under the command's correlation id.
    ///
    /// Rejections are transient state, not events: nothing is persisted or
    /// published for a command that failed validation.
    fn reject(
        state: &mut LedgerState,
        request: RequestId,
        error: LedgerError,
    ) -> SmallVec<[Effect<LedgerAction>; 4]> {
        tracing::warn!(
            request = %request,
            category = ?error.category(),
            error = %error,
            "Ledger command rejected"
        );
        Self::apply_event(state, &LedgerAction::CommandRejected { request, error });
        SmallVec::new()
    }

    /// Builds the append + publish effects for one event
    fn create_effects(
        event: LedgerAction,
        env: &LedgerEnvironment,
    ) -> SmallVec<[Effect<LedgerAction>; 4]> {
        let ledger_event = StagepassEvent::Ledger(event);
        let Ok(serialized) = ledger_event.serialize() else {
            return SmallVec::new();
        };

        smallvec![
            append_events! {
                store: env.event_store,
                stream: env.stream_id.as_str(),
                expected_version: None,
                events: vec![serialized.clone()],
                on_success: |_version| None,
                on_error: |error| Some(LedgerAction::StorageFailed {
                    operation: "append".to_string(),
                    reason: error.to_string(),
                })
            },
            publish_event! {
                bus: env.event_bus,
                topic: LEDGER_TOPIC,
                event: serialized,
                on_success: || None,
                on_error: |error| Some(LedgerAction::StorageFailed {
                    operation: "publish".to_string(),
                    reason: error.to_string(),
                })
            }
        ]
    }

    /// Builds one append covering a batch of events plus one publish each.
    ///
    /// Used by the sweep so all expiries land in the stream atomically.
    fn create_batch_effects(
        events: Vec<LedgerAction>,
        env: &LedgerEnvironment,
    ) -> SmallVec<[Effect<LedgerAction>; 4]> {
        let mut serialized = Vec::with_capacity(events.len());
        for event in events {
            match StagepassEvent::Ledger(event).serialize() {
                Ok(s) => serialized.push(s),
                Err(error) => {
                    tracing::error!(error = %error, "Failed to serialize ledger event");
                    return SmallVec::new();
                }
            }
        }

        let mut effects: SmallVec<[Effect<LedgerAction>; 4]> = smallvec![append_events! {
            store: env.event_store,
            stream: env.stream_id.as_str(),
            expected_version: None,
            events: serialized.clone(),
            on_success: |_version| None,
            on_error: |error| Some(LedgerAction::StorageFailed {
                operation: "append".to_string(),
                reason: error.to_string(),
            })
        }];
        for serialized_event in serialized {
            effects.push(publish_event! {
                bus: env.event_bus,
                topic: LEDGER_TOPIC,
                event: serialized_event,
                on_success: || None,
                on_error: |error| Some(LedgerAction::StorageFailed {
                    operation: "publish".to_string(),
                    reason: error.to_string(),
                })
            });
        }
        effects
    }

    /// Expires an overdue pending transfer on the spot and rejects the
    /// command that touched it
    fn expire_transfer_lazily(
        state: &mut LedgerState,
        env: &LedgerEnvironment,
        request: RequestId,
        transfer_id: TransferId,
        now: DateTime<Utc>,
    ) -> SmallVec<[Effect<LedgerAction>; 4]> {
        let expired = LedgerAction::TransferExpired {
            transfer_id,
            expired_at: now,
        };
        Self::apply_event(state, &expired);
        let effects = Self::create_effects(expired, env);
        Self::reject(state, request, LedgerError::TransferExpired { transfer_id });
        effects
    }

    /// Expires an overdue active hold on the spot and rejects the command
    /// that touched it
    fn expire_hold_lazily(
        state: &mut LedgerState,
        env: &LedgerEnvironment,
        request: RequestId,
        hold_id: HoldId,
        now: DateTime<Utc>,
    ) -> SmallVec<[Effect<LedgerAction>; 4]> {
        let expired = LedgerAction::HoldExpired {
            hold_id,
            expired_at: now,
        };
        Self::apply_event(state, &expired);
        let effects = Self::create_effects(expired, env);
        Self::reject(state, request, LedgerError::HoldExpired { hold_id });
        effects
    }

    /// Draws a fresh ticket code that collides with nothing issued so far
    fn next_ticket_code(
        issued: &std::collections::HashSet<TicketCode>,
        batch: &[IssuedTicket],
        length: usize,
    ) -> TicketCode {
        let mut rng = rand::thread_rng();
        loop {
            let code: String = (0..length)
                .map(|_| {
                    let index = rng.gen_range(0..TICKET_CODE_ALPHABET.len());
                    TICKET_CODE_ALPHABET[index] as char
                })
                .collect();
            let code = TicketCode::new(code);
            if !issued.contains(&code) && !batch.iter().any(|t| t.code == code) {
                return code;
            }
        }
    }

    /// Issues `quantity` tickets of one tier into `batch`
    fn issue_tickets(
        state: &LedgerState,
        batch: &mut Vec<IssuedTicket>,
        tier: &Tier,
        quantity: u32,
        attendee: &str,
        code_length: usize,
    ) {
        for _ in 0..quantity {
            let code = Self::next_ticket_code(&state.issued_codes, batch, code_length);
            batch.push(IssuedTicket {
                code,
                tier_id: tier.tier_id,
                tier_name: tier.name.clone(),
                attendee: attendee.to_string(),
            });
        }
    }

    /// Draws a random 4-digit activation code
    fn next_activation_code() -> ActivationCode {
        let mut rng = rand::thread_rng();
        let digits: u16 = rng.gen_range(0..10_000);
        ActivationCode::new(format!("{digits:04}"))
    }

    // ------------------------------------------------------------------
    // Validators
    // ------------------------------------------------------------------

    fn validate_register_tier(
        state: &LedgerState,
        tier_id: &TierId,
        printed_quantity: u32,
    ) -> Result<(), LedgerError> {
        if state.tier(tier_id).is_some() {
            return Err(LedgerError::TierExists { tier_id: *tier_id });
        }
        if printed_quantity == 0 {
            return Err(LedgerError::InvalidQuantity {
                requested: printed_quantity,
            });
        }
        Ok(())
    }

    fn validate_add_staff(
        state: &LedgerState,
        staff_id: &StaffId,
        role: Role,
        parent: Option<&StaffId>,
        commission: &CommissionPlan,
    ) -> Result<(), LedgerError> {
        if state.staff_member(staff_id).is_some() {
            return Err(LedgerError::StaffExists { staff_id: *staff_id });
        }
        if let CommissionPlan::Percentage { basis_points } = commission {
            if *basis_points > 10_000 {
                return Err(LedgerError::InvalidCommission {
                    basis_points: *basis_points,
                });
            }
        }
        if role == Role::Associate {
            let Some(parent_id) = parent else {
                return Err(LedgerError::ParentRequired { staff_id: *staff_id });
            };
            let Some(parent_member) = state.staff_member(parent_id) else {
                return Err(LedgerError::UnknownStaff {
                    staff_id: *parent_id,
                });
            };
            if parent_member.role != Role::TeamMember || !parent_member.active {
                return Err(LedgerError::InvalidParent {
                    staff_id: *staff_id,
                    parent: *parent_id,
                });
            }
        }
        Ok(())
    }

    fn validate_deactivate_staff(
        state: &LedgerState,
        staff_id: &StaffId,
    ) -> Result<(), LedgerError> {
        let member = state
            .staff_member(staff_id)
            .ok_or(LedgerError::UnknownStaff { staff_id: *staff_id })?;
        if !member.active {
            return Err(LedgerError::StaffInactive { staff_id: *staff_id });
        }
        let mut outstanding: Vec<&TierAllocation> = state
            .allocations
            .values()
            .filter(|row| row.staff_id == *staff_id && row.held > 0)
            .collect();
        outstanding.sort_by_key(|row| row.tier_id);
        if let Some(row) = outstanding.first() {
            return Err(LedgerError::BalancesOutstanding {
                staff_id: *staff_id,
                tier_id: row.tier_id,
                held: row.held,
            });
        }
        Ok(())
    }

    fn validate_define_bundle(
        state: &LedgerState,
        bundle_id: &BundleId,
        required: &[BundleRequirement],
        total_quantity: u32,
    ) -> Result<(), LedgerError> {
        if state.bundle(bundle_id).is_some() {
            return Err(LedgerError::BundleExists {
                bundle_id: *bundle_id,
            });
        }
        if required.is_empty() {
            return Err(LedgerError::EmptyBundle {
                bundle_id: *bundle_id,
            });
        }
        if total_quantity == 0 {
            return Err(LedgerError::InvalidQuantity {
                requested: total_quantity,
            });
        }
        for requirement in required {
            if requirement.quantity == 0 {
                return Err(LedgerError::InvalidQuantity {
                    requested: requirement.quantity,
                });
            }
            if state.tier(&requirement.tier_id).is_none() {
                return Err(LedgerError::UnknownTier {
                    tier_id: requirement.tier_id,
                });
            }
        }
        Ok(())
    }

    fn validate_allocate(
        state: &LedgerState,
        staff_id: &StaffId,
        tier_id: &TierId,
        quantity: u32,
    ) -> Result<(), LedgerError> {
        if quantity == 0 {
            return Err(LedgerError::InvalidQuantity {
                requested: quantity,
            });
        }
        let member = state
            .staff_member(staff_id)
            .ok_or(LedgerError::UnknownStaff { staff_id: *staff_id })?;
        if !member.active {
            return Err(LedgerError::StaffInactive { staff_id: *staff_id });
        }
        let tier = state
            .tier(tier_id)
            .ok_or(LedgerError::UnknownTier { tier_id: *tier_id })?;
        let available = tier.available();
        if quantity > available {
            return Err(LedgerError::TierCapacityExceeded {
                tier_id: *tier_id,
                requested: quantity,
                available,
            });
        }
        Ok(())
    }

    fn validate_request_transfer(
        state: &LedgerState,
        transfer_id: &TransferId,
        from: &StaffId,
        to: &StaffId,
        tier_id: &TierId,
        quantity: u32,
    ) -> Result<(), LedgerError> {
        if state.transfer(transfer_id).is_some() {
            return Err(LedgerError::TransferExists {
                transfer_id: *transfer_id,
            });
        }
        if quantity == 0 {
            return Err(LedgerError::InvalidQuantity {
                requested: quantity,
            });
        }
        if from == to {
            return Err(LedgerError::SelfTransfer { staff_id: *from });
        }
        for staff_id in [from, to] {
            let member = state
                .staff_member(staff_id)
                .ok_or(LedgerError::UnknownStaff { staff_id: *staff_id })?;
            if !member.active {
                return Err(LedgerError::StaffInactive { staff_id: *staff_id });
            }
        }
        if state.tier(tier_id).is_none() {
            return Err(LedgerError::UnknownTier { tier_id: *tier_id });
        }
        let available = state.balance(from, tier_id);
        if quantity > available {
            return Err(LedgerError::InsufficientBalance {
                staff_id: *from,
                tier_id: *tier_id,
                requested: quantity,
                available,
            });
        }
        Ok(())
    }

    fn validate_record_sale(
        state: &LedgerState,
        sale_id: &SaleId,
        staff_id: &StaffId,
        tier_id: &TierId,
        quantity: u32,
    ) -> Result<(), LedgerError> {
        if state.sale(sale_id).is_some() {
            return Err(LedgerError::SaleExists { sale_id: *sale_id });
        }
        if quantity == 0 {
            return Err(LedgerError::InvalidQuantity {
                requested: quantity,
            });
        }
        let member = state
            .staff_member(staff_id)
            .ok_or(LedgerError::UnknownStaff { staff_id: *staff_id })?;
        if !member.active {
            return Err(LedgerError::StaffInactive { staff_id: *staff_id });
        }
        if state.tier(tier_id).is_none() {
            return Err(LedgerError::UnknownTier { tier_id: *tier_id });
        }
        let available = state.balance(staff_id, tier_id);
        if quantity > available {
            return Err(LedgerError::InsufficientBalance {
                staff_id: *staff_id,
                tier_id: *tier_id,
                requested: quantity,
                available,
            });
        }
        Ok(())
    }

    fn validate_create_hold(
        state: &LedgerState,
        hold_id: &HoldId,
        items: &[HoldItem],
        hold_minutes: u32,
    ) -> Result<(), LedgerError> {
        if state.hold(hold_id).is_some() {
            return Err(LedgerError::HoldExists { hold_id: *hold_id });
        }
        if items.is_empty() {
            return Err(LedgerError::EmptyHold { hold_id: *hold_id });
        }
        if hold_minutes == 0 {
            return Err(LedgerError::InvalidQuantity { requested: 0 });
        }
        // Sum per tier first so two lines against the same tier cannot
        // slip past the capacity check separately.
        let mut requested_by_tier: HashMap<TierId, u32> = HashMap::new();
        for item in items {
            if item.quantity == 0 {
                return Err(LedgerError::InvalidQuantity {
                    requested: item.quantity,
                });
            }
            *requested_by_tier.entry(item.tier_id).or_insert(0) += item.quantity;
        }
        let mut tiers: Vec<(&TierId, &u32)> = requested_by_tier.iter().collect();
        tiers.sort_by_key(|(tier_id, _)| **tier_id);
        for (tier_id, requested) in tiers {
            let tier = state
                .tier(tier_id)
                .ok_or(LedgerError::UnknownTier { tier_id: *tier_id })?;
            let available = tier.available();
            if *requested > available {
                return Err(LedgerError::TierCapacityExceeded {
                    tier_id: *tier_id,
                    requested: *requested,
                    available,
                });
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Event application
    // ------------------------------------------------------------------

    /// Applies an event to state. Pure state transition; shared by live
    /// commands and stream replay.
    #[allow(clippy::too_many_lines)]
    fn apply_event(state: &mut LedgerState, action: &LedgerAction) {
        match action {
            LedgerAction::TierRegistered {
                tier_id,
                name,
                price,
                printed_quantity,
                ..
            } => {
                state.tiers.insert(
                    *tier_id,
                    Tier::new(*tier_id, name.clone(), *price, *printed_quantity),
                );
            }
            LedgerAction::StaffAdded {
                staff_id,
                name,
                role,
                parent,
                commission,
                ..
            } => {
                state.staff.insert(
                    *staff_id,
                    StaffMember {
                        staff_id: *staff_id,
                        name: name.clone(),
                        role: *role,
                        parent: *parent,
                        commission: *commission,
                        active: true,
                        settlement: SettlementStatus::Pending,
                    },
                );
            }
            LedgerAction::StaffDeactivated { staff_id, .. } => {
                if let Some(member) = state.staff.get_mut(staff_id) {
                    member.active = false;
                }
            }
            LedgerAction::BundleDefined {
                bundle_id,
                name,
                price,
                required,
                total_quantity,
                ..
            } => {
                state.bundles.insert(
                    *bundle_id,
                    Bundle {
                        bundle_id: *bundle_id,
                        name: name.clone(),
                        price: *price,
                        required: required.clone(),
                        total_quantity: *total_quantity,
                        sold: 0,
                    },
                );
            }
            LedgerAction::TicketsAllocated {
                staff_id,
                tier_id,
                quantity,
                ..
            } => {
                let row = state
                    .allocations
                    .entry((*staff_id, *tier_id))
                    .or_insert_with(|| TierAllocation::new(*staff_id, *tier_id));
                row.held += *quantity;
                row.allocated_total += *quantity;
                if let Some(tier) = state.tiers.get_mut(tier_id) {
                    tier.allocated_total += *quantity;
                }
            }
            LedgerAction::TransferRequested {
                transfer_id,
                from,
                to,
                tier_id,
                quantity,
                note,
                requested_at,
                expires_at,
            } => {
                state.transfers.insert(
                    *transfer_id,
                    TransferRequest {
                        transfer_id: *transfer_id,
                        from: *from,
                        to: *to,
                        tier_id: *tier_id,
                        quantity: *quantity,
                        note: note.clone(),
                        status: TransferStatus::Pending,
                        requested_at: *requested_at,
                        expires_at: *expires_at,
                        resolved_at: None,
                    },
                );
                if let Some(row) = state.allocations.get_mut(&(*from, *tier_id)) {
                    row.held = row.held.saturating_sub(*quantity);
                    row.transferred_out += *quantity;
                }
            }
            LedgerAction::TransferAccepted {
                transfer_id,
                accepted_at,
            } => {
                if let Some(transfer) = state.transfers.get_mut(transfer_id) {
                    transfer.status = TransferStatus::Accepted;
                    transfer.resolved_at = Some(*accepted_at);
                    let row = state
                        .allocations
                        .entry((transfer.to, transfer.tier_id))
                        .or_insert_with(|| TierAllocation::new(transfer.to, transfer.tier_id));
                    row.held += transfer.quantity;
                    row.transferred_in += transfer.quantity;
                }
            }
            LedgerAction::TransferRejected {
                transfer_id,
                rejected_at,
            } => {
                if let Some(transfer) = state.transfers.get_mut(transfer_id) {
                    transfer.status = TransferStatus::Rejected;
                    transfer.resolved_at = Some(*rejected_at);
                    if let Some(row) = state
                        .allocations
                        .get_mut(&(transfer.from, transfer.tier_id))
                    {
                        row.held += transfer.quantity;
                        row.transferred_out =
                            row.transferred_out.saturating_sub(transfer.quantity);
                    }
                }
            }
            LedgerAction::TransferExpired {
                transfer_id,
                expired_at,
            } => {
                if let Some(transfer) = state.transfers.get_mut(transfer_id) {
                    transfer.status = TransferStatus::Expired;
                    transfer.resolved_at = Some(*expired_at);
                    if let Some(row) = state
                        .allocations
                        .get_mut(&(transfer.from, transfer.tier_id))
                    {
                        row.held += transfer.quantity;
                        row.transferred_out =
                            row.transferred_out.saturating_sub(transfer.quantity);
                    }
                }
            }
            LedgerAction::SaleRecorded {
                sale_id,
                staff_id,
                tier_id,
                quantity,
                unit_price,
                payment,
                buyer,
                commission,
                cash_collected,
                tickets,
                sold_at,
            } => {
                if let Some(row) = state.allocations.get_mut(&(*staff_id, *tier_id)) {
                    row.held = row.held.saturating_sub(*quantity);
                    row.sold += *quantity;
                }
                for ticket in tickets {
                    state.issued_codes.insert(ticket.code.clone());
                }
                state.sales.push(SaleRecord {
                    sale_id: *sale_id,
                    staff_id: *staff_id,
                    item: SaleItem::Tier {
                        tier_id: *tier_id,
                        unit_price: *unit_price,
                    },
                    quantity: *quantity,
                    payment: *payment,
                    buyer: buyer.clone(),
                    commission: *commission,
                    cash_collected: *cash_collected,
                    tickets: tickets.clone(),
                    sold_at: *sold_at,
                });
            }
            LedgerAction::BundleSold {
                sale_id,
                staff_id,
                bundle_id,
                price,
                payment,
                buyer,
                commission,
                cash_collected,
                tickets,
                sold_at,
            } => {
                let requirements = state
                    .bundles
                    .get(bundle_id)
                    .map(|bundle| bundle.required.clone())
                    .unwrap_or_default();
                for requirement in &requirements {
                    if let Some(row) = state
                        .allocations
                        .get_mut(&(*staff_id, requirement.tier_id))
                    {
                        row.held = row.held.saturating_sub(requirement.quantity);
                        row.sold += requirement.quantity;
                    }
                }
                if let Some(bundle) = state.bundles.get_mut(bundle_id) {
                    bundle.sold += 1;
                }
                for ticket in tickets {
                    state.issued_codes.insert(ticket.code.clone());
                }
                state.sales.push(SaleRecord {
                    sale_id: *sale_id,
                    staff_id: *staff_id,
                    item: SaleItem::Bundle {
                        bundle_id: *bundle_id,
                        price: *price,
                    },
                    quantity: 1,
                    payment: *payment,
                    buyer: buyer.clone(),
                    commission: *commission,
                    cash_collected: *cash_collected,
                    tickets: tickets.clone(),
                    sold_at: *sold_at,
                });
            }
            LedgerAction::HoldCreated {
                hold_id,
                buyer,
                items,
                created_at,
                expires_at,
            } => {
                state.holds.insert(
                    *hold_id,
                    CashOrderHold {
                        hold_id: *hold_id,
                        buyer: buyer.clone(),
                        items: items.clone(),
                        status: HoldStatus::Hold,
                        created_at: *created_at,
                        expires_at: *expires_at,
                        activation_code: None,
                        code_expires_at: None,
                        approved_by: None,
                        tickets: Vec::new(),
                        resolved_at: None,
                    },
                );
                for item in items {
                    if let Some(tier) = state.tiers.get_mut(&item.tier_id) {
                        tier.hold_reserved += item.quantity;
                    }
                }
            }
            LedgerAction::HoldApproved {
                hold_id,
                approved_by,
                tickets,
                approved_at,
            } => {
                if let Some(hold) = state.holds.get_mut(hold_id) {
                    hold.status = HoldStatus::Approved;
                    hold.approved_by = Some(*approved_by);
                    hold.tickets = tickets.clone();
                    hold.resolved_at = Some(*approved_at);
                    for item in &hold.items {
                        if let Some(tier) = state.tiers.get_mut(&item.tier_id) {
                            tier.hold_reserved = tier.hold_reserved.saturating_sub(item.quantity);
                            tier.pool_sold += item.quantity;
                        }
                    }
                }
                for ticket in tickets {
                    state.issued_codes.insert(ticket.code.clone());
                }
            }
            LedgerAction::ActivationCodeGenerated {
                hold_id,
                code,
                code_expires_at,
                ..
            } => {
                if let Some(hold) = state.holds.get_mut(hold_id) {
                    hold.activation_code = Some(code.clone());
                    hold.code_expires_at = Some(*code_expires_at);
                }
            }
            LedgerAction::HoldCancelled {
                hold_id,
                cancelled_at,
            } => {
                if let Some(hold) = state.holds.get_mut(hold_id) {
                    hold.status = HoldStatus::Cancelled;
                    hold.resolved_at = Some(*cancelled_at);
                    for item in &hold.items {
                        if let Some(tier) = state.tiers.get_mut(&item.tier_id) {
                            tier.hold_reserved = tier.hold_reserved.saturating_sub(item.quantity);
                        }
                    }
                }
            }
            LedgerAction::HoldExpired {
                hold_id,
                expired_at,
            } => {
                if let Some(hold) = state.holds.get_mut(hold_id) {
                    hold.status = HoldStatus::Expired;
                    hold.resolved_at = Some(*expired_at);
                    for item in &hold.items {
                        if let Some(tier) = state.tiers.get_mut(&item.tier_id) {
                            tier.hold_reserved = tier.hold_reserved.saturating_sub(item.quantity);
                        }
                    }
                }
            }
            LedgerAction::SettlementMarkedPaid { staff_id, paid_at } => {
                if let Some(member) = state.staff.get_mut(staff_id) {
                    member.settlement = SettlementStatus::Paid { paid_at: *paid_at };
                }
            }
            LedgerAction::SettlementMarkedPending { staff_id } => {
                if let Some(member) = state.staff.get_mut(staff_id) {
                    member.settlement = SettlementStatus::Pending;
                }
            }
            LedgerAction::CommandRejected { request, error } => {
                state.rejections.insert(*request, error.clone());
            }
            // Commands carry no state transition of their own.
            _ => {}
        }
    }
}

impl Reducer for LedgerReducer {
    type State = LedgerState;
    type Action = LedgerAction;
    type Environment = LedgerEnvironment;

    #[allow(clippy::too_many_lines)]
    fn reduce(
        &self,
        state: &mut LedgerState,
        action: LedgerAction,
        env: &LedgerEnvironment,
    ) -> SmallVec<[Effect<LedgerAction>; 4]> {
        match action {
            LedgerAction::RegisterTier {
                request,
                tier_id,
                name,
                price,
                printed_quantity,
            } => {
                if let Err(error) =
                    Self::validate_register_tier(state, &tier_id, printed_quantity)
                {
                    return Self::reject(state, request, error);
                }
                let event = LedgerAction::TierRegistered {
                    tier_id,
                    name,
                    price,
                    printed_quantity,
                    registered_at: env.clock.now(),
                };
                Self::apply_event(state, &event);
                Self::create_effects(event, env)
            }

            LedgerAction::AddStaff {
                request,
                staff_id,
                name,
                role,
                parent,
                commission,
            } => {
                if let Err(error) =
                    Self::validate_add_staff(state, &staff_id, role, parent.as_ref(), &commission)
                {
                    return Self::reject(state, request, error);
                }
                let event = LedgerAction::StaffAdded {
                    staff_id,
                    name,
                    role,
                    parent,
                    commission,
                    added_at: env.clock.now(),
                };
                Self::apply_event(state, &event);
                Self::create_effects(event, env)
            }

            LedgerAction::DeactivateStaff { request, staff_id } => {
                if let Err(error) = Self::validate_deactivate_staff(state, &staff_id) {
                    return Self::reject(state, request, error);
                }
                let event = LedgerAction::StaffDeactivated {
                    staff_id,
                    deactivated_at: env.clock.now(),
                };
                Self::apply_event(state, &event);
                Self::create_effects(event, env)
            }

            LedgerAction::DefineBundle {
                request,
                bundle_id,
                name,
                price,
                required,
                total_quantity,
            } => {
                if let Err(error) =
                    Self::validate_define_bundle(state, &bundle_id, &required, total_quantity)
                {
                    return Self::reject(state, request, error);
                }
                let event = LedgerAction::BundleDefined {
                    bundle_id,
                    name,
                    price,
                    required,
                    total_quantity,
                    defined_at: env.clock.now(),
                };
                Self::apply_event(state, &event);
                Self::create_effects(event, env)
            }

            LedgerAction::AllocateTickets {
                request,
                staff_id,
                tier_id,
                quantity,
            } => {
                if let Err(error) = Self::validate_allocate(state, &staff_id, &tier_id, quantity)
                {
                    return Self::reject(state, request, error);
                }
                let event = LedgerAction::TicketsAllocated {
                    staff_id,
                    tier_id,
                    quantity,
                    allocated_at: env.clock.now(),
                };
                Self::apply_event(state, &event);
                Self::create_effects(event, env)
            }

            LedgerAction::RequestTransfer {
                request,
                transfer_id,
                from,
                to,
                tier_id,
                quantity,
                note,
            } => {
                if let Err(error) = Self::validate_request_transfer(
                    state,
                    &transfer_id,
                    &from,
                    &to,
                    &tier_id,
                    quantity,
                ) {
                    return Self::reject(state, request, error);
                }
                let now = env.clock.now();
                let deadline = now
                    .checked_add_signed(env.config.transfer_expiry())
                    .unwrap_or(DateTime::<Utc>::MAX_UTC);
                let event = LedgerAction::TransferRequested {
                    transfer_id,
                    from,
                    to,
                    tier_id,
                    quantity,
                    note,
                    requested_at: now,
                    expires_at: ExpiresAt::at(deadline),
                };
                Self::apply_event(state, &event);
                let mut effects = Self::create_effects(event, env);
                effects.push(delay! {
                    duration: env.config.transfer_expiry_delay(),
                    action: LedgerAction::ExpireTransfer { transfer_id }
                });
                effects
            }

            LedgerAction::AcceptTransfer {
                request,
                transfer_id,
                acting_staff,
            } => {
                let now = env.clock.now();
                let (actor_active, actor_is_organizer) =
                    match state.staff_member(&acting_staff) {
                        Some(actor) => (actor.active, actor.is_organizer()),
                        None => {
                            return Self::reject(
                                state,
                                request,
                                LedgerError::UnknownStaff {
                                    staff_id: acting_staff,
                                },
                            );
                        }
                    };
                if !actor_active {
                    return Self::reject(
                        state,
                        request,
                        LedgerError::StaffInactive {
                            staff_id: acting_staff,
                        },
                    );
                }
                let (status, destination, overdue) = match state.transfer(&transfer_id) {
                    Some(transfer) => (
                        transfer.status,
                        transfer.to,
                        transfer.expires_at.is_expired(now),
                    ),
                    None => {
                        return Self::reject(
                            state,
                            request,
                            LedgerError::UnknownTransfer { transfer_id },
                        );
                    }
                };
                if status != TransferStatus::Pending {
                    return Self::reject(
                        state,
                        request,
                        LedgerError::TransferNotPending {
                            transfer_id,
                            status,
                        },
                    );
                }
                if overdue {
                    return Self::expire_transfer_lazily(state, env, request, transfer_id, now);
                }
                if acting_staff != destination && !actor_is_organizer {
                    return Self::reject(
                        state,
                        request,
                        LedgerError::NotAuthorized {
                            staff_id: acting_staff,
                            operation: "accept transfer".to_string(),
                        },
                    );
                }
                let destination_active = state
                    .staff_member(&destination)
                    .is_some_and(|member| member.active);
                if !destination_active {
                    return Self::reject(
                        state,
                        request,
                        LedgerError::StaffInactive {
                            staff_id: destination,
                        },
                    );
                }
                let event = LedgerAction::TransferAccepted {
                    transfer_id,
                    accepted_at: now,
                };
                Self::apply_event(state, &event);
                Self::create_effects(event, env)
            }

            LedgerAction::RejectTransfer {
                request,
                transfer_id,
                acting_staff,
            } => {
                let now = env.clock.now();
                let (actor_active, actor_is_organizer) =
                    match state.staff_member(&acting_staff) {
                        Some(actor) => (actor.active, actor.is_organizer()),
                        None => {
                            return Self::reject(
                                state,
                                request,
                                LedgerError::UnknownStaff {
                                    staff_id: acting_staff,
                                },
                            );
                        }
                    };
                if !actor_active {
                    return Self::reject(
                        state,
                        request,
                        LedgerError::StaffInactive {
                            staff_id: acting_staff,
                        },
                    );
                }
                let (status, destination, overdue) = match state.transfer(&transfer_id) {
                    Some(transfer) => (
                        transfer.status,
                        transfer.to,
                        transfer.expires_at.is_expired(now),
                    ),
                    None => {
                        return Self::reject(
                            state,
                            request,
                            LedgerError::UnknownTransfer { transfer_id },
                        );
                    }
                };
                if status != TransferStatus::Pending {
                    return Self::reject(
                        state,
                        request,
                        LedgerError::TransferNotPending {
                            transfer_id,
                            status,
                        },
                    );
                }
                if overdue {
                    return Self::expire_transfer_lazily(state, env, request, transfer_id, now);
                }
                if acting_staff != destination && !actor_is_organizer {
                    return Self::reject(
                        state,
                        request,
                        LedgerError::NotAuthorized {
                            staff_id: acting_staff,
                            operation: "reject transfer".to_string(),
                        },
                    );
                }
                let event = LedgerAction::TransferRejected {
                    transfer_id,
                    rejected_at: now,
                };
                Self::apply_event(state, &event);
                Self::create_effects(event, env)
            }

            LedgerAction::ExpireTransfer { transfer_id } => {
                // The delay fires exactly at the deadline; by then the
                // transfer may have been resolved or swept already.
                let still_pending = state
                    .transfer(&transfer_id)
                    .is_some_and(TransferRequest::is_pending);
                if !still_pending {
                    return SmallVec::new();
                }
                let event = LedgerAction::TransferExpired {
                    transfer_id,
                    expired_at: env.clock.now(),
                };
                Self::apply_event(state, &event);
                Self::create_effects(event, env)
            }

            LedgerAction::RecordSale {
                request,
                sale_id,
                staff_id,
                tier_id,
                quantity,
                buyer,
                payment,
            } => {
                if let Err(error) =
                    Self::validate_record_sale(state, &sale_id, &staff_id, &tier_id, quantity)
                {
                    return Self::reject(state, request, error);
                }
                let plan = match state.staff_member(&staff_id) {
                    Some(member) => member.commission,
                    None => return SmallVec::new(),
                };
                let tier = match state.tier(&tier_id) {
                    Some(tier) => tier.clone(),
                    None => return SmallVec::new(),
                };
                let unit_price = tier.price;
                let Some(commission) = plan.commission_for(quantity, unit_price) else {
                    return Self::reject(state, request, LedgerError::AmountOverflow);
                };
                let Some(total) = unit_price.checked_multiply(quantity) else {
                    return Self::reject(state, request, LedgerError::AmountOverflow);
                };
                let cash_collected = if payment.is_cash_like() {
                    total
                } else {
                    Money::ZERO
                };
                let mut tickets = Vec::new();
                Self::issue_tickets(
                    state,
                    &mut tickets,
                    &tier,
                    quantity,
                    &buyer.name,
                    env.config.ticket_code_length,
                );
                let event = LedgerAction::SaleRecorded {
                    sale_id,
                    staff_id,
                    tier_id,
                    quantity,
                    unit_price,
                    payment,
                    buyer,
                    commission,
                    cash_collected,
                    tickets,
                    sold_at: env.clock.now(),
                };
                Self::apply_event(state, &event);
                Self::create_effects(event, env)
            }

            LedgerAction::SellBundle {
                request,
                sale_id,
                staff_id,
                bundle_id,
                buyer,
                payment,
            } => {
                if state.sale(&sale_id).is_some() {
                    return Self::reject(state, request, LedgerError::SaleExists { sale_id });
                }
                // Same eligibility check the read path uses; this run is the
                // authoritative one because it happens under the state lock.
                if let Err(error) = state.bundle_eligibility(&staff_id, &bundle_id) {
                    return Self::reject(state, request, error);
                }
                let plan = match state.staff_member(&staff_id) {
                    Some(member) => member.commission,
                    None => return SmallVec::new(),
                };
                let bundle = match state.bundle(&bundle_id) {
                    Some(bundle) => bundle.clone(),
                    None => return SmallVec::new(),
                };
                let Some(commission) = plan.commission_for(1, bundle.price) else {
                    return Self::reject(state, request, LedgerError::AmountOverflow);
                };
                let cash_collected = if payment.is_cash_like() {
                    bundle.price
                } else {
                    Money::ZERO
                };
                let mut tickets = Vec::new();
                for requirement in &bundle.required {
                    let tier = match state.tier(&requirement.tier_id) {
                        Some(tier) => tier.clone(),
                        None => return SmallVec::new(),
                    };
                    Self::issue_tickets(
                        state,
                        &mut tickets,
                        &tier,
                        requirement.quantity,
                        &buyer.name,
                        env.config.ticket_code_length,
                    );
                }
                let event = LedgerAction::BundleSold {
                    sale_id,
                    staff_id,
                    bundle_id,
                    price: bundle.price,
                    payment,
                    buyer,
                    commission,
                    cash_collected,
                    tickets,
                    sold_at: env.clock.now(),
                };
                Self::apply_event(state, &event);
                Self::create_effects(event, env)
            }

            LedgerAction::CreateHold {
                request,
                hold_id,
                buyer,
                items,
                hold_minutes,
            } => {
                if let Err(error) =
                    Self::validate_create_hold(state, &hold_id, &items, hold_minutes)
                {
                    return Self::reject(state, request, error);
                }
                let now = env.clock.now();
                let deadline = now
                    .checked_add_signed(chrono::Duration::minutes(i64::from(hold_minutes)))
                    .unwrap_or(DateTime::<Utc>::MAX_UTC);
                let event = LedgerAction::HoldCreated {
                    hold_id,
                    buyer,
                    items,
                    created_at: now,
                    expires_at: ExpiresAt::at(deadline),
                };
                Self::apply_event(state, &event);
                let mut effects = Self::create_effects(event, env);
                effects.push(delay! {
                    duration: Duration::from_secs(u64::from(hold_minutes) * 60),
                    action: LedgerAction::ExpireHold { hold_id }
                });
                effects
            }

            LedgerAction::ApproveHold {
                request,
                hold_id,
                staff_id,
            } => {
                let now = env.clock.now();
                let approver_active = state
                    .staff_member(&staff_id)
                    .map(|member| member.active);
                match approver_active {
                    None => {
                        return Self::reject(
                            state,
                            request,
                            LedgerError::UnknownStaff { staff_id },
                        );
                    }
                    Some(false) => {
                        return Self::reject(
                            state,
                            request,
                            LedgerError::StaffInactive { staff_id },
                        );
                    }
                    Some(true) => {}
                }
                let (status, overdue, items, attendee) = match state.hold(&hold_id) {
                    Some(hold) => (
                        hold.status,
                        hold.expires_at.is_expired(now),
                        hold.items.clone(),
                        hold.buyer.name.clone(),
                    ),
                    None => {
                        return Self::reject(
                            state,
                            request,
                            LedgerError::UnknownHold { hold_id },
                        );
                    }
                };
                if status != HoldStatus::Hold {
                    return Self::reject(
                        state,
                        request,
                        LedgerError::HoldNotActive { hold_id, status },
                    );
                }
                if overdue {
                    return Self::expire_hold_lazily(state, env, request, hold_id, now);
                }
                let mut tickets = Vec::new();
                for item in &items {
                    let tier = match state.tier(&item.tier_id) {
                        Some(tier) => tier.clone(),
                        None => return SmallVec::new(),
                    };
                    Self::issue_tickets(
                        state,
                        &mut tickets,
                        &tier,
                        item.quantity,
                        &attendee,
                        env.config.ticket_code_length,
                    );
                }
                let event = LedgerAction::HoldApproved {
                    hold_id,
                    approved_by: ApprovedBy::Staff(staff_id),
                    tickets,
                    approved_at: now,
                };
                Self::apply_event(state, &event);
                Self::create_effects(event, env)
            }

            LedgerAction::GenerateActivationCode {
                request,
                hold_id,
                staff_id,
            } => {
                let now = env.clock.now();
                let staff_active = state
                    .staff_member(&staff_id)
                    .map(|member| member.active);
                match staff_active {
                    None => {
                        return Self::reject(
                            state,
                            request,
                            LedgerError::UnknownStaff { staff_id },
                        );
                    }
                    Some(false) => {
                        return Self::reject(
                            state,
                            request,
                            LedgerError::StaffInactive { staff_id },
                        );
                    }
                    Some(true) => {}
                }
                let (status, overdue, hold_deadline) = match state.hold(&hold_id) {
                    Some(hold) => (
                        hold.status,
                        hold.expires_at.is_expired(now),
                        hold.expires_at.value(),
                    ),
                    None => {
                        return Self::reject(
                            state,
                            request,
                            LedgerError::UnknownHold { hold_id },
                        );
                    }
                };
                if status != HoldStatus::Hold {
                    return Self::reject(
                        state,
                        request,
                        LedgerError::HoldNotActive { hold_id, status },
                    );
                }
                if overdue {
                    return Self::expire_hold_lazily(state, env, request, hold_id, now);
                }
                let code_deadline = now
                    .checked_add_signed(env.config.activation_code_ttl())
                    .unwrap_or(DateTime::<Utc>::MAX_UTC)
                    .min(hold_deadline);
                let event = LedgerAction::ActivationCodeGenerated {
                    hold_id,
                    code: Self::next_activation_code(),
                    code_expires_at: ExpiresAt::at(code_deadline),
                    generated_at: now,
                };
                Self::apply_event(state, &event);
                Self::create_effects(event, env)
            }

            LedgerAction::ActivateByCode {
                request,
                hold_id,
                code,
            } => {
                let now = env.clock.now();
                let (status, overdue, expected, code_deadline, items, attendee) =
                    match state.hold(&hold_id) {
                        Some(hold) => (
                            hold.status,
                            hold.expires_at.is_expired(now),
                            hold.activation_code.clone(),
                            hold.code_expires_at,
                            hold.items.clone(),
                            hold.buyer.name.clone(),
                        ),
                        None => {
                            return Self::reject(
                                state,
                                request,
                                LedgerError::UnknownHold { hold_id },
                            );
                        }
                    };
                if status != HoldStatus::Hold {
                    return Self::reject(
                        state,
                        request,
                        LedgerError::HoldNotActive { hold_id, status },
                    );
                }
                if overdue {
                    return Self::expire_hold_lazily(state, env, request, hold_id, now);
                }
                match expected {
                    None => {
                        return Self::reject(
                            state,
                            request,
                            LedgerError::CodeInvalid { hold_id },
                        );
                    }
                    Some(expected) if expected != code => {
                        return Self::reject(
                            state,
                            request,
                            LedgerError::CodeInvalid { hold_id },
                        );
                    }
                    Some(_) => {}
                }
                if code_deadline.is_some_and(|deadline| deadline.is_expired(now)) {
                    return Self::reject(state, request, LedgerError::CodeExpired { hold_id });
                }
                let mut tickets = Vec::new();
                for item in &items {
                    let tier = match state.tier(&item.tier_id) {
                        Some(tier) => tier.clone(),
                        None => return SmallVec::new(),
                    };
                    Self::issue_tickets(
                        state,
                        &mut tickets,
                        &tier,
                        item.quantity,
                        &attendee,
                        env.config.ticket_code_length,
                    );
                }
                let event = LedgerAction::HoldApproved {
                    hold_id,
                    approved_by: ApprovedBy::ActivationCode,
                    tickets,
                    approved_at: now,
                };
                Self::apply_event(state, &event);
                Self::create_effects(event, env)
            }

            LedgerAction::CancelHold { request, hold_id } => {
                let now = env.clock.now();
                let (status, overdue) = match state.hold(&hold_id) {
                    Some(hold) => (hold.status, hold.expires_at.is_expired(now)),
                    None => {
                        return Self::reject(
                            state,
                            request,
                            LedgerError::UnknownHold { hold_id },
                        );
                    }
                };
                if status != HoldStatus::Hold {
                    return Self::reject(
                        state,
                        request,
                        LedgerError::HoldNotActive { hold_id, status },
                    );
                }
                if overdue {
                    return Self::expire_hold_lazily(state, env, request, hold_id, now);
                }
                let event = LedgerAction::HoldCancelled {
                    hold_id,
                    cancelled_at: now,
                };
                Self::apply_event(state, &event);
                Self::create_effects(event, env)
            }

            LedgerAction::ExpireHold { hold_id } => {
                let still_active = state.hold(&hold_id).is_some_and(CashOrderHold::is_active);
                if !still_active {
                    return SmallVec::new();
                }
                let event = LedgerAction::HoldExpired {
                    hold_id,
                    expired_at: env.clock.now(),
                };
                Self::apply_event(state, &event);
                Self::create_effects(event, env)
            }

            LedgerAction::MarkSettlementPaid { request, staff_id } => {
                let already_paid = match state.staff_member(&staff_id) {
                    Some(member) => member.settlement.is_paid(),
                    None => {
                        return Self::reject(
                            state,
                            request,
                            LedgerError::UnknownStaff { staff_id },
                        );
                    }
                };
                if already_paid {
                    return SmallVec::new();
                }
                let event = LedgerAction::SettlementMarkedPaid {
                    staff_id,
                    paid_at: env.clock.now(),
                };
                Self::apply_event(state, &event);
                Self::create_effects(event, env)
            }

            LedgerAction::MarkSettlementPending { request, staff_id } => {
                let currently_paid = match state.staff_member(&staff_id) {
                    Some(member) => member.settlement.is_paid(),
                    None => {
                        return Self::reject(
                            state,
                            request,
                            LedgerError::UnknownStaff { staff_id },
                        );
                    }
                };
                if !currently_paid {
                    return SmallVec::new();
                }
                let event = LedgerAction::SettlementMarkedPending { staff_id };
                Self::apply_event(state, &event);
                Self::create_effects(event, env)
            }

            LedgerAction::SweepExpired => {
                let now = env.clock.now();
                let mut expired_transfers: Vec<TransferId> = state
                    .transfers
                    .values()
                    .filter(|transfer| {
                        transfer.is_pending() && transfer.expires_at.is_expired(now)
                    })
                    .map(|transfer| transfer.transfer_id)
                    .collect();
                expired_transfers.sort_unstable();
                let mut expired_holds: Vec<HoldId> = state
                    .holds
                    .values()
                    .filter(|hold| hold.is_active() && hold.expires_at.is_expired(now))
                    .map(|hold| hold.hold_id)
                    .collect();
                expired_holds.sort_unstable();

                if expired_transfers.is_empty() && expired_holds.is_empty() {
                    return SmallVec::new();
                }
                tracing::info!(
                    transfers = expired_transfers.len(),
                    holds = expired_holds.len(),
                    "Expiry sweep found overdue entries"
                );

                let mut events =
                    Vec::with_capacity(expired_transfers.len() + expired_holds.len());
                for transfer_id in expired_transfers {
                    events.push(LedgerAction::TransferExpired {
                        transfer_id,
                        expired_at: now,
                    });
                }
                for hold_id in expired_holds {
                    events.push(LedgerAction::HoldExpired {
                        hold_id,
                        expired_at: now,
                    });
                }
                for event in &events {
                    Self::apply_event(state, event);
                }
                Self::create_batch_effects(events, env)
            }

            LedgerAction::StorageFailed { operation, reason } => {
                tracing::error!(
                    operation = %operation,
                    reason = %reason,
                    "Ledger storage effect failed"
                );
                state.last_storage_error = Some(format!("{operation}: {reason}"));
                SmallVec::new()
            }

            // Replayed events: apply the state transition, emit nothing.
            event => {
                Self::apply_event(state, &event);
                SmallVec::new()
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::types::SaleItem;
    use stagepass_testing::{
        InMemoryEventBus, InMemoryEventStore, ReducerTest, SteppingClock, assertions, test_clock,
    };

    fn test_env() -> LedgerEnvironment {
        LedgerEnvironment::new(
            Arc::new(test_clock()),
            Arc::new(InMemoryEventStore::new()),
            Arc::new(InMemoryEventBus::new()),
            StreamId::new("ledger-test-event"),
            LedgerConfig::default(),
        )
    }

    fn env_with_clock(clock: Arc<SteppingClock>) -> LedgerEnvironment {
        LedgerEnvironment::new(
            clock,
            Arc::new(InMemoryEventStore::new()),
            Arc::new(InMemoryEventBus::new()),
            StreamId::new("ledger-test-event"),
            LedgerConfig::default(),
        )
    }

    fn dispatch(state: &mut LedgerState, env: &LedgerEnvironment, action: LedgerAction) {
        let _ = LedgerReducer::new().reduce(state, action, env);
    }

    struct Team {
        state: LedgerState,
        organizer: StaffId,
        seller: StaffId,
        runner: StaffId,
        friday: TierId,
        saturday: TierId,
    }

    /// Two tiers, an organizer, a 10% seller, and a $5-per-ticket runner.
    fn team() -> Team {
        let env = test_env();
        let mut state = LedgerState::new();
        let organizer = StaffId::new();
        let seller = StaffId::new();
        let runner = StaffId::new();
        let friday = TierId::new();
        let saturday = TierId::new();
        dispatch(
            &mut state,
            &env,
            LedgerAction::RegisterTier {
                request: RequestId::new(),
                tier_id: friday,
                name: "Friday GA".to_string(),
                price: Money::from_dollars(40),
                printed_quantity: 100,
            },
        );
        dispatch(
            &mut state,
            &env,
            LedgerAction::RegisterTier {
                request: RequestId::new(),
                tier_id: saturday,
                name: "Saturday GA".to_string(),
                price: Money::from_dollars(50),
                printed_quantity: 80,
            },
        );
        dispatch(
            &mut state,
            &env,
            LedgerAction::AddStaff {
                request: RequestId::new(),
                staff_id: organizer,
                name: "Dana".to_string(),
                role: Role::Organizer,
                parent: None,
                commission: CommissionPlan::Percentage { basis_points: 0 },
            },
        );
        dispatch(
            &mut state,
            &env,
            LedgerAction::AddStaff {
                request: RequestId::new(),
                staff_id: seller,
                name: "Mara".to_string(),
                role: Role::TeamMember,
                parent: None,
                commission: CommissionPlan::Percentage { basis_points: 1000 },
            },
        );
        dispatch(
            &mut state,
            &env,
            LedgerAction::AddStaff {
                request: RequestId::new(),
                staff_id: runner,
                name: "Jonah".to_string(),
                role: Role::TeamMember,
                parent: None,
                commission: CommissionPlan::Fixed {
                    per_ticket: Money::from_dollars(5),
                },
            },
        );
        Team {
            state,
            organizer,
            seller,
            runner,
            friday,
            saturday,
        }
    }

    fn allocate(team: &mut Team, staff_id: StaffId, tier_id: TierId, quantity: u32) {
        let env = test_env();
        dispatch(
            &mut team.state,
            &env,
            LedgerAction::AllocateTickets {
                request: RequestId::new(),
                staff_id,
                tier_id,
                quantity,
            },
        );
    }

    #[test]
    fn register_tier_rejects_duplicate() {
        let fixture = team();
        let friday = fixture.friday;
        let request = RequestId::new();
        ReducerTest::new(LedgerReducer::new())
            .with_env(test_env())
            .given_state(fixture.state)
            .when_action(LedgerAction::RegisterTier {
                request,
                tier_id: friday,
                name: "Friday again".to_string(),
                price: Money::from_dollars(10),
                printed_quantity: 5,
            })
            .then_state(move |state| {
                assert_eq!(
                    state.rejection_for(&request),
                    Some(&LedgerError::TierExists { tier_id: friday })
                );
                assert_eq!(state.tier(&friday).unwrap().name, "Friday GA");
            })
            .then_effects(assertions::assert_no_effects)
            .run();
    }

    #[test]
    fn associate_requires_active_team_member_parent() {
        let fixture = team();
        let request = RequestId::new();
        let staff_id = StaffId::new();
        ReducerTest::new(LedgerReducer::new())
            .with_env(test_env())
            .given_state(fixture.state)
            .when_action(LedgerAction::AddStaff {
                request,
                staff_id,
                name: "Iris".to_string(),
                role: Role::Associate,
                parent: None,
                commission: CommissionPlan::Percentage { basis_points: 500 },
            })
            .then_state(move |state| {
                assert_eq!(
                    state.rejection_for(&request),
                    Some(&LedgerError::ParentRequired { staff_id })
                );
                assert!(state.staff_member(&staff_id).is_none());
            })
            .then_effects(assertions::assert_no_effects)
            .run();
    }

    #[test]
    fn allocate_credits_staff_and_tier() {
        let fixture = team();
        let seller = fixture.seller;
        let friday = fixture.friday;
        let request = RequestId::new();
        ReducerTest::new(LedgerReducer::new())
            .with_env(test_env())
            .given_state(fixture.state)
            .when_action(LedgerAction::AllocateTickets {
                request,
                staff_id: seller,
                tier_id: friday,
                quantity: 40,
            })
            .then_state(move |state| {
                assert!(state.rejection_for(&request).is_none());
                assert_eq!(state.balance(&seller, &friday), 40);
                let row = state.allocation(&seller, &friday).unwrap();
                assert_eq!(row.allocated_total, 40);
                assert!(row.is_balanced());
                assert_eq!(state.tier(&friday).unwrap().allocated_total, 40);
                assert_eq!(state.tier_availability(&friday), Some(60));
            })
            .then_effects(|effects| {
                assertions::assert_effects_count(effects, 2);
                assertions::assert_has_event_store_effect(effects);
                assertions::assert_has_publish_event_effect(effects);
            })
            .run();
    }

    #[test]
    fn allocate_rejects_zero_quantity() {
        let fixture = team();
        let seller = fixture.seller;
        let friday = fixture.friday;
        let request = RequestId::new();
        ReducerTest::new(LedgerReducer::new())
            .with_env(test_env())
            .given_state(fixture.state)
            .when_action(LedgerAction::AllocateTickets {
                request,
                staff_id: seller,
                tier_id: friday,
                quantity: 0,
            })
            .then_state(move |state| {
                let error = state.rejection_for(&request).unwrap();
                assert_eq!(error, &LedgerError::InvalidQuantity { requested: 0 });
                assert!(error.is_validation());
                assert_eq!(state.balance(&seller, &friday), 0);
            })
            .then_effects(assertions::assert_no_effects)
            .run();
    }

    #[test]
    fn allocate_rejects_beyond_printed_quantity() {
        let fixture = team();
        let seller = fixture.seller;
        let friday = fixture.friday;
        let request = RequestId::new();
        ReducerTest::new(LedgerReducer::new())
            .with_env(test_env())
            .given_state(fixture.state)
            .when_action(LedgerAction::AllocateTickets {
                request,
                staff_id: seller,
                tier_id: friday,
                quantity: 101,
            })
            .then_state(move |state| {
                let error = state.rejection_for(&request).unwrap();
                assert_eq!(
                    error,
                    &LedgerError::TierCapacityExceeded {
                        tier_id: friday,
                        requested: 101,
                        available: 100,
                    }
                );
                assert!(error.is_capacity());
            })
            .then_effects(assertions::assert_no_effects)
            .run();
    }

    #[test]
    fn allocate_accounts_for_other_claims() {
        let mut fixture = team();
        let seller = fixture.seller;
        let runner = fixture.runner;
        let friday = fixture.friday;
        allocate(&mut fixture, seller, friday, 70);
        let request = RequestId::new();
        ReducerTest::new(LedgerReducer::new())
            .with_env(test_env())
            .given_state(fixture.state)
            .when_action(LedgerAction::AllocateTickets {
                request,
                staff_id: runner,
                tier_id: friday,
                quantity: 40,
            })
            .then_state(move |state| {
                assert_eq!(
                    state.rejection_for(&request),
                    Some(&LedgerError::TierCapacityExceeded {
                        tier_id: friday,
                        requested: 40,
                        available: 30,
                    })
                );
                assert_eq!(state.balance(&runner, &friday), 0);
            })
            .then_effects(assertions::assert_no_effects)
            .run();
    }

    #[test]
    fn transfer_request_debits_source_and_schedules_expiry() {
        let mut fixture = team();
        let seller = fixture.seller;
        let runner = fixture.runner;
        let friday = fixture.friday;
        allocate(&mut fixture, seller, friday, 10);
        let transfer_id = TransferId::new();
        ReducerTest::new(LedgerReducer::new())
            .with_env(test_env())
            .given_state(fixture.state)
            .when_action(LedgerAction::RequestTransfer {
                request: RequestId::new(),
                transfer_id,
                from: seller,
                to: runner,
                tier_id: friday,
                quantity: 4,
                note: Some("for the door shift".to_string()),
            })
            .then_state(move |state| {
                assert_eq!(state.balance(&seller, &friday), 6);
                assert_eq!(state.balance(&runner, &friday), 0);
                let row = state.allocation(&seller, &friday).unwrap();
                assert_eq!(row.transferred_out, 4);
                assert!(row.is_balanced());
                let transfer = state.transfer(&transfer_id).unwrap();
                assert_eq!(transfer.status, TransferStatus::Pending);
                assert_eq!(
                    transfer.expires_at.value(),
                    transfer.requested_at + chrono::Duration::hours(48)
                );
            })
            .then_effects(|effects| {
                assertions::assert_effects_count(effects, 3);
                assertions::assert_has_event_store_effect(effects);
                assertions::assert_has_publish_event_effect(effects);
                assertions::assert_has_delay_effect(effects);
            })
            .run();
    }

    #[test]
    fn transfer_request_rejects_insufficient_balance() {
        let mut fixture = team();
        let seller = fixture.seller;
        let runner = fixture.runner;
        let friday = fixture.friday;
        allocate(&mut fixture, seller, friday, 3);
        let transfer_id = TransferId::new();
        let request = RequestId::new();
        ReducerTest::new(LedgerReducer::new())
            .with_env(test_env())
            .given_state(fixture.state)
            .when_action(LedgerAction::RequestTransfer {
                request,
                transfer_id,
                from: seller,
                to: runner,
                tier_id: friday,
                quantity: 5,
                note: None,
            })
            .then_state(move |state| {
                assert_eq!(
                    state.rejection_for(&request),
                    Some(&LedgerError::InsufficientBalance {
                        staff_id: seller,
                        tier_id: friday,
                        requested: 5,
                        available: 3,
                    })
                );
                assert!(state.transfer(&transfer_id).is_none());
                assert_eq!(state.balance(&seller, &friday), 3);
            })
            .then_effects(assertions::assert_no_effects)
            .run();
    }

    #[test]
    fn transfer_to_self_is_rejected() {
        let mut fixture = team();
        let seller = fixture.seller;
        let friday = fixture.friday;
        allocate(&mut fixture, seller, friday, 5);
        let request = RequestId::new();
        ReducerTest::new(LedgerReducer::new())
            .with_env(test_env())
            .given_state(fixture.state)
            .when_action(LedgerAction::RequestTransfer {
                request,
                transfer_id: TransferId::new(),
                from: seller,
                to: seller,
                tier_id: friday,
                quantity: 1,
                note: None,
            })
            .then_state(move |state| {
                assert_eq!(
                    state.rejection_for(&request),
                    Some(&LedgerError::SelfTransfer { staff_id: seller })
                );
            })
            .then_effects(assertions::assert_no_effects)
            .run();
    }

    #[test]
    fn pending_transfer_tickets_cannot_be_sold() {
        let mut fixture = team();
        let seller = fixture.seller;
        let runner = fixture.runner;
        let friday = fixture.friday;
        allocate(&mut fixture, seller, friday, 5);
        let env = test_env();
        dispatch(
            &mut fixture.state,
            &env,
            LedgerAction::RequestTransfer {
                request: RequestId::new(),
                transfer_id: TransferId::new(),
                from: seller,
                to: runner,
                tier_id: friday,
                quantity: 5,
                note: None,
            },
        );
        let request = RequestId::new();
        ReducerTest::new(LedgerReducer::new())
            .with_env(test_env())
            .given_state(fixture.state)
            .when_action(LedgerAction::RecordSale {
                request,
                sale_id: SaleId::new(),
                staff_id: seller,
                tier_id: friday,
                quantity: 1,
                buyer: BuyerInfo::named("Walk-up"),
                payment: PaymentMethod::Cash,
            })
            .then_state(move |state| {
                assert_eq!(
                    state.rejection_for(&request),
                    Some(&LedgerError::InsufficientBalance {
                        staff_id: seller,
                        tier_id: friday,
                        requested: 1,
                        available: 0,
                    })
                );
                assert!(state.sales.is_empty());
            })
            .then_effects(assertions::assert_no_effects)
            .run();
    }

    #[test]
    fn accept_transfer_credits_destination() {
        let mut fixture = team();
        let seller = fixture.seller;
        let runner = fixture.runner;
        let friday = fixture.friday;
        allocate(&mut fixture, seller, friday, 10);
        let env = test_env();
        let transfer_id = TransferId::new();
        dispatch(
            &mut fixture.state,
            &env,
            LedgerAction::RequestTransfer {
                request: RequestId::new(),
                transfer_id,
                from: seller,
                to: runner,
                tier_id: friday,
                quantity: 4,
                note: None,
            },
        );
        ReducerTest::new(LedgerReducer::new())
            .with_env(test_env())
            .given_state(fixture.state)
            .when_action(LedgerAction::AcceptTransfer {
                request: RequestId::new(),
                transfer_id,
                acting_staff: runner,
            })
            .then_state(move |state| {
                let transfer = state.transfer(&transfer_id).unwrap();
                assert_eq!(transfer.status, TransferStatus::Accepted);
                assert!(transfer.resolved_at.is_some());
                assert_eq!(state.balance(&seller, &friday), 6);
                assert_eq!(state.balance(&runner, &friday), 4);
                let source = state.allocation(&seller, &friday).unwrap();
                let destination = state.allocation(&runner, &friday).unwrap();
                assert_eq!(destination.transferred_in, 4);
                assert!(source.is_balanced());
                assert!(destination.is_balanced());
            })
            .then_effects(|effects| {
                assertions::assert_effects_count(effects, 2);
            })
            .run();
    }

    #[test]
    fn organizer_can_resolve_for_destination() {
        let mut fixture = team();
        let seller = fixture.seller;
        let runner = fixture.runner;
        let organizer = fixture.organizer;
        let friday = fixture.friday;
        allocate(&mut fixture, seller, friday, 10);
        let env = test_env();
        let transfer_id = TransferId::new();
        dispatch(
            &mut fixture.state,
            &env,
            LedgerAction::RequestTransfer {
                request: RequestId::new(),
                transfer_id,
                from: seller,
                to: runner,
                tier_id: friday,
                quantity: 2,
                note: None,
            },
        );
        ReducerTest::new(LedgerReducer::new())
            .with_env(test_env())
            .given_state(fixture.state)
            .when_action(LedgerAction::AcceptTransfer {
                request: RequestId::new(),
                transfer_id,
                acting_staff: organizer,
            })
            .then_state(move |state| {
                assert_eq!(
                    state.transfer(&transfer_id).unwrap().status,
                    TransferStatus::Accepted
                );
                assert_eq!(state.balance(&runner, &friday), 2);
            })
            .then_effects(|effects| {
                assertions::assert_effects_count(effects, 2);
            })
            .run();
    }

    #[test]
    fn bystander_cannot_accept_transfer() {
        let mut fixture = team();
        let seller = fixture.seller;
        let runner = fixture.runner;
        let friday = fixture.friday;
        allocate(&mut fixture, seller, friday, 10);
        let env = test_env();
        let transfer_id = TransferId::new();
        dispatch(
            &mut fixture.state,
            &env,
            LedgerAction::RequestTransfer {
                request: RequestId::new(),
                transfer_id,
                from: seller,
                to: runner,
                tier_id: friday,
                quantity: 4,
                note: None,
            },
        );
        let request = RequestId::new();
        ReducerTest::new(LedgerReducer::new())
            .with_env(test_env())
            .given_state(fixture.state)
            .when_action(LedgerAction::AcceptTransfer {
                request,
                transfer_id,
                // The source is neither the destination nor an organizer.
                acting_staff: seller,
            })
            .then_state(move |state| {
                let error = state.rejection_for(&request).unwrap();
                assert!(error.is_authorization());
                assert_eq!(
                    state.transfer(&transfer_id).unwrap().status,
                    TransferStatus::Pending
                );
                assert_eq!(state.balance(&runner, &friday), 0);
            })
            .then_effects(assertions::assert_no_effects)
            .run();
    }

    #[test]
    fn reject_transfer_refunds_source() {
        let mut fixture = team();
        let seller = fixture.seller;
        let runner = fixture.runner;
        let friday = fixture.friday;
        allocate(&mut fixture, seller, friday, 10);
        let env = test_env();
        let transfer_id = TransferId::new();
        dispatch(
            &mut fixture.state,
            &env,
            LedgerAction::RequestTransfer {
                request: RequestId::new(),
                transfer_id,
                from: seller,
                to: runner,
                tier_id: friday,
                quantity: 4,
                note: None,
            },
        );
        ReducerTest::new(LedgerReducer::new())
            .with_env(test_env())
            .given_state(fixture.state)
            .when_action(LedgerAction::RejectTransfer {
                request: RequestId::new(),
                transfer_id,
                acting_staff: runner,
            })
            .then_state(move |state| {
                assert_eq!(
                    state.transfer(&transfer_id).unwrap().status,
                    TransferStatus::Rejected
                );
                assert_eq!(state.balance(&seller, &friday), 10);
                assert_eq!(state.balance(&runner, &friday), 0);
                let source = state.allocation(&seller, &friday).unwrap();
                assert_eq!(source.transferred_out, 0);
                assert!(source.is_balanced());
            })
            .then_effects(|effects| {
                assertions::assert_effects_count(effects, 2);
            })
            .run();
    }

    #[test]
    fn resolved_transfer_reports_race_to_late_caller() {
        let mut fixture = team();
        let seller = fixture.seller;
        let runner = fixture.runner;
        let organizer = fixture.organizer;
        let friday = fixture.friday;
        allocate(&mut fixture, seller, friday, 10);
        let env = test_env();
        let transfer_id = TransferId::new();
        dispatch(
            &mut fixture.state,
            &env,
            LedgerAction::RequestTransfer {
                request: RequestId::new(),
                transfer_id,
                from: seller,
                to: runner,
                tier_id: friday,
                quantity: 4,
                note: None,
            },
        );
        dispatch(
            &mut fixture.state,
            &env,
            LedgerAction::RejectTransfer {
                request: RequestId::new(),
                transfer_id,
                acting_staff: runner,
            },
        );
        let request = RequestId::new();
        ReducerTest::new(LedgerReducer::new())
            .with_env(test_env())
            .given_state(fixture.state)
            .when_action(LedgerAction::AcceptTransfer {
                request,
                transfer_id,
                acting_staff: organizer,
            })
            .then_state(move |state| {
                let error = state.rejection_for(&request).unwrap();
                assert_eq!(
                    error,
                    &LedgerError::TransferNotPending {
                        transfer_id,
                        status: TransferStatus::Rejected,
                    }
                );
                assert!(error.is_race_lost());
                assert_eq!(state.balance(&seller, &friday), 10);
            })
            .then_effects(assertions::assert_no_effects)
            .run();
    }

    #[test]
    fn accept_past_deadline_expires_instead() {
        let mut fixture = team();
        let seller = fixture.seller;
        let runner = fixture.runner;
        let friday = fixture.friday;
        let clock = Arc::new(SteppingClock::starting_at(test_clock().now()));
        let env = env_with_clock(Arc::clone(&clock));
        dispatch(
            &mut fixture.state,
            &env,
            LedgerAction::AllocateTickets {
                request: RequestId::new(),
                staff_id: seller,
                tier_id: friday,
                quantity: 10,
            },
        );
        let transfer_id = TransferId::new();
        dispatch(
            &mut fixture.state,
            &env,
            LedgerAction::RequestTransfer {
                request: RequestId::new(),
                transfer_id,
                from: seller,
                to: runner,
                tier_id: friday,
                quantity: 4,
                note: None,
            },
        );
        clock.advance(chrono::Duration::hours(49));
        let request = RequestId::new();
        ReducerTest::new(LedgerReducer::new())
            .with_env(env)
            .given_state(fixture.state)
            .when_action(LedgerAction::AcceptTransfer {
                request,
                transfer_id,
                acting_staff: runner,
            })
            .then_state(move |state| {
                assert_eq!(
                    state.rejection_for(&request),
                    Some(&LedgerError::TransferExpired { transfer_id })
                );
                assert_eq!(
                    state.transfer(&transfer_id).unwrap().status,
                    TransferStatus::Expired
                );
                assert_eq!(state.balance(&seller, &friday), 10);
                assert_eq!(state.balance(&runner, &friday), 0);
            })
            .then_effects(|effects| {
                // The expiry itself is persisted and published.
                assertions::assert_effects_count(effects, 2);
                assertions::assert_has_event_store_effect(effects);
            })
            .run();
    }

    #[test]
    fn expire_transfer_skips_resolved_transfers() {
        let mut fixture = team();
        let seller = fixture.seller;
        let runner = fixture.runner;
        let friday = fixture.friday;
        allocate(&mut fixture, seller, friday, 10);
        let env = test_env();
        let transfer_id = TransferId::new();
        dispatch(
            &mut fixture.state,
            &env,
            LedgerAction::RequestTransfer {
                request: RequestId::new(),
                transfer_id,
                from: seller,
                to: runner,
                tier_id: friday,
                quantity: 4,
                note: None,
            },
        );
        dispatch(
            &mut fixture.state,
            &env,
            LedgerAction::AcceptTransfer {
                request: RequestId::new(),
                transfer_id,
                acting_staff: runner,
            },
        );
        let effects = LedgerReducer::new().reduce(
            &mut fixture.state,
            LedgerAction::ExpireTransfer { transfer_id },
            &env,
        );
        assert!(effects.is_empty());
        assert_eq!(
            fixture.state.transfer(&transfer_id).unwrap().status,
            TransferStatus::Accepted
        );
        assert_eq!(fixture.state.balance(&runner, &friday), 4);
    }

    #[test]
    fn sale_freezes_percentage_commission_and_cash() {
        let mut fixture = team();
        let seller = fixture.seller;
        let friday = fixture.friday;
        allocate(&mut fixture, seller, friday, 10);
        let sale_id = SaleId::new();
        ReducerTest::new(LedgerReducer::new())
            .with_env(test_env())
            .given_state(fixture.state)
            .when_action(LedgerAction::RecordSale {
                request: RequestId::new(),
                sale_id,
                staff_id: seller,
                tier_id: friday,
                quantity: 2,
                buyer: BuyerInfo::named("Ana Flores"),
                payment: PaymentMethod::Cash,
            })
            .then_state(move |state| {
                let sale = state.sale(&sale_id).unwrap();
                assert_eq!(sale.quantity, 2);
                assert_eq!(sale.commission, Money::from_dollars(8));
                assert_eq!(sale.cash_collected, Money::from_dollars(80));
                assert_eq!(
                    sale.item,
                    SaleItem::Tier {
                        tier_id: friday,
                        unit_price: Money::from_dollars(40),
                    }
                );
                assert_eq!(sale.tickets.len(), 2);
                assert_ne!(sale.tickets[0].code, sale.tickets[1].code);
                for ticket in &sale.tickets {
                    assert_eq!(ticket.code.as_str().len(), 8);
                    assert_eq!(ticket.tier_name, "Friday GA");
                    assert_eq!(ticket.attendee, "Ana Flores");
                }
                assert_eq!(state.balance(&seller, &friday), 8);
                let row = state.allocation(&seller, &friday).unwrap();
                assert_eq!(row.sold, 2);
                assert!(row.is_balanced());
                assert_eq!(state.issued_codes.len(), 2);
            })
            .then_effects(|effects| {
                assertions::assert_effects_count(effects, 2);
            })
            .run();
    }

    #[test]
    fn fixed_commission_counts_tickets_not_price() {
        let mut fixture = team();
        let runner = fixture.runner;
        let friday = fixture.friday;
        allocate(&mut fixture, runner, friday, 5);
        let sale_id = SaleId::new();
        ReducerTest::new(LedgerReducer::new())
            .with_env(test_env())
            .given_state(fixture.state)
            .when_action(LedgerAction::RecordSale {
                request: RequestId::new(),
                sale_id,
                staff_id: runner,
                tier_id: friday,
                quantity: 3,
                buyer: BuyerInfo::named("Omar"),
                payment: PaymentMethod::CashApp,
            })
            .then_state(move |state| {
                let sale = state.sale(&sale_id).unwrap();
                assert_eq!(sale.commission, Money::from_dollars(15));
                // Cash App counts as physically collected.
                assert_eq!(sale.cash_collected, Money::from_dollars(120));
            })
            .then_effects(|effects| {
                assertions::assert_effects_count(effects, 2);
            })
            .run();
    }

    #[test]
    fn credit_sale_collects_no_cash() {
        let mut fixture = team();
        let seller = fixture.seller;
        let friday = fixture.friday;
        allocate(&mut fixture, seller, friday, 10);
        let sale_id = SaleId::new();
        ReducerTest::new(LedgerReducer::new())
            .with_env(test_env())
            .given_state(fixture.state)
            .when_action(LedgerAction::RecordSale {
                request: RequestId::new(),
                sale_id,
                staff_id: seller,
                tier_id: friday,
                quantity: 2,
                buyer: BuyerInfo::named("Priya"),
                payment: PaymentMethod::Credit,
            })
            .then_state(move |state| {
                let sale = state.sale(&sale_id).unwrap();
                assert_eq!(sale.cash_collected, Money::ZERO);
                assert_eq!(sale.commission, Money::from_dollars(8));
            })
            .then_effects(|effects| {
                assertions::assert_effects_count(effects, 2);
            })
            .run();
    }

    #[test]
    fn oversell_rejected_once_balance_spent() {
        let mut fixture = team();
        let seller = fixture.seller;
        let friday = fixture.friday;
        allocate(&mut fixture, seller, friday, 10);
        let env = test_env();
        dispatch(
            &mut fixture.state,
            &env,
            LedgerAction::RecordSale {
                request: RequestId::new(),
                sale_id: SaleId::new(),
                staff_id: seller,
                tier_id: friday,
                quantity: 6,
                buyer: BuyerInfo::named("First buyer"),
                payment: PaymentMethod::Cash,
            },
        );
        let request = RequestId::new();
        ReducerTest::new(LedgerReducer::new())
            .with_env(test_env())
            .given_state(fixture.state)
            .when_action(LedgerAction::RecordSale {
                request,
                sale_id: SaleId::new(),
                staff_id: seller,
                tier_id: friday,
                quantity: 5,
                buyer: BuyerInfo::named("Second buyer"),
                payment: PaymentMethod::Cash,
            })
            .then_state(move |state| {
                assert_eq!(
                    state.rejection_for(&request),
                    Some(&LedgerError::InsufficientBalance {
                        staff_id: seller,
                        tier_id: friday,
                        requested: 5,
                        available: 4,
                    })
                );
                assert_eq!(state.sales.len(), 1);
                assert_eq!(state.balance(&seller, &friday), 4);
            })
            .then_effects(assertions::assert_no_effects)
            .run();
    }

    #[test]
    fn bundle_eligibility_reports_first_missing_tier() {
        let mut fixture = team();
        let seller = fixture.seller;
        let friday = fixture.friday;
        let saturday = fixture.saturday;
        let env = test_env();
        let sunday = TierId::new();
        dispatch(
            &mut fixture.state,
            &env,
            LedgerAction::RegisterTier {
                request: RequestId::new(),
                tier_id: sunday,
                name: "Sunday GA".to_string(),
                price: Money::from_dollars(45),
                printed_quantity: 60,
            },
        );
        let bundle_id = BundleId::new();
        dispatch(
            &mut fixture.state,
            &env,
            LedgerAction::DefineBundle {
                request: RequestId::new(),
                bundle_id,
                name: "Weekend Pass".to_string(),
                price: Money::from_dollars(100),
                required: vec![
                    BundleRequirement {
                        tier_id: friday,
                        quantity: 1,
                    },
                    BundleRequirement {
                        tier_id: saturday,
                        quantity: 1,
                    },
                    BundleRequirement {
                        tier_id: sunday,
                        quantity: 1,
                    },
                ],
                total_quantity: 10,
            },
        );
        allocate(&mut fixture, seller, friday, 2);
        allocate(&mut fixture, seller, sunday, 2);

        // Saturday is the first requirement the seller cannot cover.
        assert_eq!(
            fixture.state.bundle_eligibility(&seller, &bundle_id),
            Err(LedgerError::BundleIneligible {
                bundle_id,
                tier_id: saturday,
                required: 1,
                held: 0,
            })
        );

        let request = RequestId::new();
        ReducerTest::new(LedgerReducer::new())
            .with_env(test_env())
            .given_state(fixture.state)
            .when_action(LedgerAction::SellBundle {
                request,
                sale_id: SaleId::new(),
                staff_id: seller,
                bundle_id,
                buyer: BuyerInfo::named("Weekend buyer"),
                payment: PaymentMethod::Cash,
            })
            .then_state(move |state| {
                let error = state.rejection_for(&request).unwrap();
                assert_eq!(
                    error,
                    &LedgerError::BundleIneligible {
                        bundle_id,
                        tier_id: saturday,
                        required: 1,
                        held: 0,
                    }
                );
                assert!(error.is_capacity());
                assert!(state.sales.is_empty());
                assert_eq!(state.balance(&seller, &friday), 2);
                assert_eq!(state.balance(&seller, &sunday), 2);
            })
            .then_effects(assertions::assert_no_effects)
            .run();
    }

    #[test]
    fn bundle_sale_debits_every_tier_once() {
        let mut fixture = team();
        let seller = fixture.seller;
        let friday = fixture.friday;
        let saturday = fixture.saturday;
        let env = test_env();
        let bundle_id = BundleId::new();
        dispatch(
            &mut fixture.state,
            &env,
            LedgerAction::DefineBundle {
                request: RequestId::new(),
                bundle_id,
                name: "Two-Day Pass".to_string(),
                price: Money::from_dollars(100),
                required: vec![
                    BundleRequirement {
                        tier_id: friday,
                        quantity: 1,
                    },
                    BundleRequirement {
                        tier_id: saturday,
                        quantity: 1,
                    },
                ],
                total_quantity: 10,
            },
        );
        allocate(&mut fixture, seller, friday, 2);
        allocate(&mut fixture, seller, saturday, 1);
        let sale_id = SaleId::new();
        ReducerTest::new(LedgerReducer::new())
            .with_env(test_env())
            .given_state(fixture.state)
            .when_action(LedgerAction::SellBundle {
                request: RequestId::new(),
                sale_id,
                staff_id: seller,
                bundle_id,
                buyer: BuyerInfo::named("Weekend buyer"),
                payment: PaymentMethod::Cash,
            })
            .then_state(move |state| {
                assert_eq!(state.sales.len(), 1);
                let sale = state.sale(&sale_id).unwrap();
                assert_eq!(sale.quantity, 1);
                assert_eq!(
                    sale.item,
                    SaleItem::Bundle {
                        bundle_id,
                        price: Money::from_dollars(100),
                    }
                );
                // Commission applies once, to the bundle price.
                assert_eq!(sale.commission, Money::from_dollars(10));
                assert_eq!(sale.cash_collected, Money::from_dollars(100));
                assert_eq!(sale.tickets.len(), 2);
                assert_eq!(state.balance(&seller, &friday), 1);
                assert_eq!(state.balance(&seller, &saturday), 0);
                assert_eq!(state.allocation(&seller, &friday).unwrap().sold, 1);
                assert_eq!(state.allocation(&seller, &saturday).unwrap().sold, 1);
                assert_eq!(state.bundle(&bundle_id).unwrap().sold, 1);
            })
            .then_effects(|effects| {
                assertions::assert_effects_count(effects, 2);
            })
            .run();
    }

    #[test]
    fn bundle_sale_rejected_when_sold_out() {
        let mut fixture = team();
        let seller = fixture.seller;
        let friday = fixture.friday;
        let env = test_env();
        let bundle_id = BundleId::new();
        dispatch(
            &mut fixture.state,
            &env,
            LedgerAction::DefineBundle {
                request: RequestId::new(),
                bundle_id,
                name: "Last One".to_string(),
                price: Money::from_dollars(60),
                required: vec![BundleRequirement {
                    tier_id: friday,
                    quantity: 1,
                }],
                total_quantity: 1,
            },
        );
        allocate(&mut fixture, seller, friday, 5);
        dispatch(
            &mut fixture.state,
            &env,
            LedgerAction::SellBundle {
                request: RequestId::new(),
                sale_id: SaleId::new(),
                staff_id: seller,
                bundle_id,
                buyer: BuyerInfo::named("First"),
                payment: PaymentMethod::Cash,
            },
        );
        let request = RequestId::new();
        ReducerTest::new(LedgerReducer::new())
            .with_env(test_env())
            .given_state(fixture.state)
            .when_action(LedgerAction::SellBundle {
                request,
                sale_id: SaleId::new(),
                staff_id: seller,
                bundle_id,
                buyer: BuyerInfo::named("Second"),
                payment: PaymentMethod::Cash,
            })
            .then_state(move |state| {
                let error = state.rejection_for(&request).unwrap();
                assert_eq!(error, &LedgerError::BundleSoldOut { bundle_id });
                assert!(error.is_capacity());
                assert_eq!(state.sales.len(), 1);
            })
            .then_effects(assertions::assert_no_effects)
            .run();
    }

    #[test]
    fn hold_reserves_general_pool() {
        let fixture = team();
        let friday = fixture.friday;
        let hold_id = HoldId::new();
        ReducerTest::new(LedgerReducer::new())
            .with_env(test_env())
            .given_state(fixture.state)
            .when_action(LedgerAction::CreateHold {
                request: RequestId::new(),
                hold_id,
                buyer: BuyerInfo {
                    name: "Lena Park".to_string(),
                    contact: Some("555-0142".to_string()),
                },
                items: vec![HoldItem {
                    tier_id: friday,
                    quantity: 3,
                }],
                hold_minutes: 30,
            })
            .then_state(move |state| {
                assert_eq!(state.tier_availability(&friday), Some(97));
                let hold = state.hold(&hold_id).unwrap();
                assert_eq!(hold.status, HoldStatus::Hold);
                assert_eq!(
                    hold.expires_at.value(),
                    hold.created_at + chrono::Duration::minutes(30)
                );
                assert!(hold.activation_code.is_none());
            })
            .then_effects(|effects| {
                assertions::assert_effects_count(effects, 3);
                assertions::assert_has_delay_effect(effects);
            })
            .run();
    }

    #[test]
    fn hold_rejected_beyond_pool_capacity() {
        let mut fixture = team();
        let seller = fixture.seller;
        let friday = fixture.friday;
        allocate(&mut fixture, seller, friday, 70);
        let env = test_env();
        dispatch(
            &mut fixture.state,
            &env,
            LedgerAction::CreateHold {
                request: RequestId::new(),
                hold_id: HoldId::new(),
                buyer: BuyerInfo::named("Earlier hold"),
                items: vec![HoldItem {
                    tier_id: friday,
                    quantity: 25,
                }],
                hold_minutes: 30,
            },
        );
        let request = RequestId::new();
        ReducerTest::new(LedgerReducer::new())
            .with_env(test_env())
            .given_state(fixture.state)
            .when_action(LedgerAction::CreateHold {
                request,
                hold_id: HoldId::new(),
                buyer: BuyerInfo::named("Too late"),
                items: vec![HoldItem {
                    tier_id: friday,
                    quantity: 6,
                }],
                hold_minutes: 30,
            })
            .then_state(move |state| {
                assert_eq!(
                    state.rejection_for(&request),
                    Some(&LedgerError::TierCapacityExceeded {
                        tier_id: friday,
                        requested: 6,
                        available: 5,
                    })
                );
            })
            .then_effects(assertions::assert_no_effects)
            .run();
    }

    #[test]
    fn hold_sums_duplicate_tier_lines() {
        let mut fixture = team();
        let seller = fixture.seller;
        let friday = fixture.friday;
        allocate(&mut fixture, seller, friday, 95);
        let request = RequestId::new();
        ReducerTest::new(LedgerReducer::new())
            .with_env(test_env())
            .given_state(fixture.state)
            .when_action(LedgerAction::CreateHold {
                request,
                hold_id: HoldId::new(),
                buyer: BuyerInfo::named("Split lines"),
                items: vec![
                    HoldItem {
                        tier_id: friday,
                        quantity: 3,
                    },
                    HoldItem {
                        tier_id: friday,
                        quantity: 3,
                    },
                ],
                hold_minutes: 30,
            })
            .then_state(move |state| {
                assert_eq!(
                    state.rejection_for(&request),
                    Some(&LedgerError::TierCapacityExceeded {
                        tier_id: friday,
                        requested: 6,
                        available: 5,
                    })
                );
            })
            .then_effects(assertions::assert_no_effects)
            .run();
    }

    #[test]
    fn approve_hold_issues_tickets_from_pool() {
        let mut fixture = team();
        let seller = fixture.seller;
        let friday = fixture.friday;
        let env = test_env();
        let hold_id = HoldId::new();
        dispatch(
            &mut fixture.state,
            &env,
            LedgerAction::CreateHold {
                request: RequestId::new(),
                hold_id,
                buyer: BuyerInfo::named("Lena Park"),
                items: vec![HoldItem {
                    tier_id: friday,
                    quantity: 2,
                }],
                hold_minutes: 30,
            },
        );
        ReducerTest::new(LedgerReducer::new())
            .with_env(test_env())
            .given_state(fixture.state)
            .when_action(LedgerAction::ApproveHold {
                request: RequestId::new(),
                hold_id,
                staff_id: seller,
            })
            .then_state(move |state| {
                let hold = state.hold(&hold_id).unwrap();
                assert_eq!(hold.status, HoldStatus::Approved);
                assert_eq!(hold.approved_by, Some(ApprovedBy::Staff(seller)));
                assert_eq!(hold.tickets.len(), 2);
                let tier = state.tier(&friday).unwrap();
                assert_eq!(tier.hold_reserved, 0);
                assert_eq!(tier.pool_sold, 2);
                assert_eq!(state.tier_availability(&friday), Some(98));
                // Pool sales settle outside the staff ledger.
                assert!(state.sales.is_empty());
                assert_eq!(state.issued_codes.len(), 2);
            })
            .then_effects(|effects| {
                assertions::assert_effects_count(effects, 2);
            })
            .run();
    }

    #[test]
    fn approve_after_deadline_expires_hold() {
        let mut fixture = team();
        let seller = fixture.seller;
        let friday = fixture.friday;
        let clock = Arc::new(SteppingClock::starting_at(test_clock().now()));
        let env = env_with_clock(Arc::clone(&clock));
        let hold_id = HoldId::new();
        dispatch(
            &mut fixture.state,
            &env,
            LedgerAction::CreateHold {
                request: RequestId::new(),
                hold_id,
                buyer: BuyerInfo::named("Lena Park"),
                items: vec![HoldItem {
                    tier_id: friday,
                    quantity: 3,
                }],
                hold_minutes: 30,
            },
        );
        assert_eq!(fixture.state.tier_availability(&friday), Some(97));
        clock.advance(chrono::Duration::minutes(31));
        let request = RequestId::new();
        ReducerTest::new(LedgerReducer::new())
            .with_env(env)
            .given_state(fixture.state)
            .when_action(LedgerAction::ApproveHold {
                request,
                hold_id,
                staff_id: seller,
            })
            .then_state(move |state| {
                assert_eq!(
                    state.rejection_for(&request),
                    Some(&LedgerError::HoldExpired { hold_id })
                );
                assert_eq!(state.hold(&hold_id).unwrap().status, HoldStatus::Expired);
                assert_eq!(state.tier_availability(&friday), Some(100));
            })
            .then_effects(|effects| {
                assertions::assert_effects_count(effects, 2);
                assertions::assert_has_event_store_effect(effects);
            })
            .run();
    }

    #[test]
    fn activation_code_approves_hold() {
        let mut fixture = team();
        let seller = fixture.seller;
        let friday = fixture.friday;
        let env = test_env();
        let hold_id = HoldId::new();
        dispatch(
            &mut fixture.state,
            &env,
            LedgerAction::CreateHold {
                request: RequestId::new(),
                hold_id,
                buyer: BuyerInfo::named("Lena Park"),
                items: vec![HoldItem {
                    tier_id: friday,
                    quantity: 1,
                }],
                hold_minutes: 30,
            },
        );
        dispatch(
            &mut fixture.state,
            &env,
            LedgerAction::GenerateActivationCode {
                request: RequestId::new(),
                hold_id,
                staff_id: seller,
            },
        );
        let code = fixture
            .state
            .hold(&hold_id)
            .unwrap()
            .activation_code
            .clone()
            .unwrap();
        assert_eq!(code.as_str().len(), 4);
        assert!(code.as_str().chars().all(|c| c.is_ascii_digit()));

        let bad_request = RequestId::new();
        dispatch(
            &mut fixture.state,
            &env,
            LedgerAction::ActivateByCode {
                request: bad_request,
                hold_id,
                code: ActivationCode::new("no such code"),
            },
        );
        assert_eq!(
            fixture.state.rejection_for(&bad_request),
            Some(&LedgerError::CodeInvalid { hold_id })
        );
        assert_eq!(
            fixture.state.hold(&hold_id).unwrap().status,
            HoldStatus::Hold
        );

        let good_request = RequestId::new();
        dispatch(
            &mut fixture.state,
            &env,
            LedgerAction::ActivateByCode {
                request: good_request,
                hold_id,
                code,
            },
        );
        assert!(fixture.state.rejection_for(&good_request).is_none());
        let hold = fixture.state.hold(&hold_id).unwrap();
        assert_eq!(hold.status, HoldStatus::Approved);
        assert_eq!(hold.approved_by, Some(ApprovedBy::ActivationCode));
        assert_eq!(hold.tickets.len(), 1);
    }

    #[test]
    fn stale_code_rejected_as_expired() {
        let mut fixture = team();
        let seller = fixture.seller;
        let friday = fixture.friday;
        let clock = Arc::new(SteppingClock::starting_at(test_clock().now()));
        let env = env_with_clock(Arc::clone(&clock));
        let hold_id = HoldId::new();
        dispatch(
            &mut fixture.state,
            &env,
            LedgerAction::CreateHold {
                request: RequestId::new(),
                hold_id,
                buyer: BuyerInfo::named("Lena Park"),
                items: vec![HoldItem {
                    tier_id: friday,
                    quantity: 1,
                }],
                hold_minutes: 30,
            },
        );
        dispatch(
            &mut fixture.state,
            &env,
            LedgerAction::GenerateActivationCode {
                request: RequestId::new(),
                hold_id,
                staff_id: seller,
            },
        );
        let code = fixture
            .state
            .hold(&hold_id)
            .unwrap()
            .activation_code
            .clone()
            .unwrap();

        // Code TTL is 15 minutes; the hold itself lives 30.
        clock.advance(chrono::Duration::minutes(16));

        // A wrong code still reads as invalid, not expired.
        let bad_request = RequestId::new();
        dispatch(
            &mut fixture.state,
            &env,
            LedgerAction::ActivateByCode {
                request: bad_request,
                hold_id,
                code: ActivationCode::new("0000 but wrong"),
            },
        );
        assert_eq!(
            fixture.state.rejection_for(&bad_request),
            Some(&LedgerError::CodeInvalid { hold_id })
        );

        let request = RequestId::new();
        dispatch(
            &mut fixture.state,
            &env,
            LedgerAction::ActivateByCode {
                request,
                hold_id,
                code,
            },
        );
        assert_eq!(
            fixture.state.rejection_for(&request),
            Some(&LedgerError::CodeExpired { hold_id })
        );
        assert_eq!(
            fixture.state.hold(&hold_id).unwrap().status,
            HoldStatus::Hold
        );
    }

    #[test]
    fn cancel_hold_releases_capacity() {
        let mut fixture = team();
        let friday = fixture.friday;
        let env = test_env();
        let hold_id = HoldId::new();
        dispatch(
            &mut fixture.state,
            &env,
            LedgerAction::CreateHold {
                request: RequestId::new(),
                hold_id,
                buyer: BuyerInfo::named("Changed mind"),
                items: vec![HoldItem {
                    tier_id: friday,
                    quantity: 4,
                }],
                hold_minutes: 30,
            },
        );
        dispatch(
            &mut fixture.state,
            &env,
            LedgerAction::CancelHold {
                request: RequestId::new(),
                hold_id,
            },
        );
        assert_eq!(
            fixture.state.hold(&hold_id).unwrap().status,
            HoldStatus::Cancelled
        );
        assert_eq!(fixture.state.tier_availability(&friday), Some(100));

        // A second cancel races against the first resolution.
        let request = RequestId::new();
        dispatch(
            &mut fixture.state,
            &env,
            LedgerAction::CancelHold { request, hold_id },
        );
        let error = fixture.state.rejection_for(&request).unwrap();
        assert_eq!(
            error,
            &LedgerError::HoldNotActive {
                hold_id,
                status: HoldStatus::Cancelled,
            }
        );
        assert!(error.is_race_lost());
    }

    #[test]
    fn settlement_flags_toggle_idempotently() {
        let mut fixture = team();
        let seller = fixture.seller;
        let env = test_env();
        let reducer = LedgerReducer::new();

        let effects = reducer.reduce(
            &mut fixture.state,
            LedgerAction::MarkSettlementPaid {
                request: RequestId::new(),
                staff_id: seller,
            },
            &env,
        );
        assert_eq!(effects.len(), 2);
        assert!(fixture.state.staff_member(&seller).unwrap().settlement.is_paid());

        // Marking paid twice emits nothing the second time.
        let effects = reducer.reduce(
            &mut fixture.state,
            LedgerAction::MarkSettlementPaid {
                request: RequestId::new(),
                staff_id: seller,
            },
            &env,
        );
        assert!(effects.is_empty());

        let effects = reducer.reduce(
            &mut fixture.state,
            LedgerAction::MarkSettlementPending {
                request: RequestId::new(),
                staff_id: seller,
            },
            &env,
        );
        assert_eq!(effects.len(), 2);
        assert_eq!(
            fixture.state.staff_member(&seller).unwrap().settlement,
            SettlementStatus::Pending
        );

        let effects = reducer.reduce(
            &mut fixture.state,
            LedgerAction::MarkSettlementPending {
                request: RequestId::new(),
                staff_id: seller,
            },
            &env,
        );
        assert!(effects.is_empty());
    }

    #[test]
    fn deactivate_requires_zero_balances() {
        let mut fixture = team();
        let seller = fixture.seller;
        let friday = fixture.friday;
        allocate(&mut fixture, seller, friday, 5);
        let env = test_env();

        let request = RequestId::new();
        dispatch(
            &mut fixture.state,
            &env,
            LedgerAction::DeactivateStaff {
                request,
                staff_id: seller,
            },
        );
        assert_eq!(
            fixture.state.rejection_for(&request),
            Some(&LedgerError::BalancesOutstanding {
                staff_id: seller,
                tier_id: friday,
                held: 5,
            })
        );
        assert!(fixture.state.staff_member(&seller).unwrap().active);

        dispatch(
            &mut fixture.state,
            &env,
            LedgerAction::RecordSale {
                request: RequestId::new(),
                sale_id: SaleId::new(),
                staff_id: seller,
                tier_id: friday,
                quantity: 5,
                buyer: BuyerInfo::named("Bulk buyer"),
                payment: PaymentMethod::Cash,
            },
        );
        dispatch(
            &mut fixture.state,
            &env,
            LedgerAction::DeactivateStaff {
                request: RequestId::new(),
                staff_id: seller,
            },
        );
        assert!(!fixture.state.staff_member(&seller).unwrap().active);

        // An inactive member can no longer receive stock.
        let request = RequestId::new();
        dispatch(
            &mut fixture.state,
            &env,
            LedgerAction::AllocateTickets {
                request,
                staff_id: seller,
                tier_id: friday,
                quantity: 1,
            },
        );
        assert_eq!(
            fixture.state.rejection_for(&request),
            Some(&LedgerError::StaffInactive { staff_id: seller })
        );
    }

    #[test]
    fn sweep_expires_all_overdue_entries() {
        let mut fixture = team();
        let seller = fixture.seller;
        let runner = fixture.runner;
        let friday = fixture.friday;
        let saturday = fixture.saturday;
        let clock = Arc::new(SteppingClock::starting_at(test_clock().now()));
        let env = env_with_clock(Arc::clone(&clock));
        dispatch(
            &mut fixture.state,
            &env,
            LedgerAction::AllocateTickets {
                request: RequestId::new(),
                staff_id: seller,
                tier_id: friday,
                quantity: 10,
            },
        );
        let transfer_id = TransferId::new();
        dispatch(
            &mut fixture.state,
            &env,
            LedgerAction::RequestTransfer {
                request: RequestId::new(),
                transfer_id,
                from: seller,
                to: runner,
                tier_id: friday,
                quantity: 4,
                note: None,
            },
        );
        let hold_id = HoldId::new();
        dispatch(
            &mut fixture.state,
            &env,
            LedgerAction::CreateHold {
                request: RequestId::new(),
                hold_id,
                buyer: BuyerInfo::named("No-show"),
                items: vec![HoldItem {
                    tier_id: saturday,
                    quantity: 2,
                }],
                hold_minutes: 30,
            },
        );
        clock.advance(chrono::Duration::hours(49));

        let effects =
            LedgerReducer::new().reduce(&mut fixture.state, LedgerAction::SweepExpired, &env);
        // One batched append plus one publish per expiry.
        assert_eq!(effects.len(), 3);
        assertions::assert_has_event_store_effect(&effects);
        assert_eq!(
            fixture.state.transfer(&transfer_id).unwrap().status,
            TransferStatus::Expired
        );
        assert_eq!(
            fixture.state.hold(&hold_id).unwrap().status,
            HoldStatus::Expired
        );
        assert_eq!(fixture.state.balance(&seller, &friday), 10);
        assert_eq!(fixture.state.tier_availability(&saturday), Some(80));
    }

    #[test]
    fn sweep_with_nothing_due_is_silent() {
        let mut fixture = team();
        let env = test_env();
        let effects =
            LedgerReducer::new().reduce(&mut fixture.state, LedgerAction::SweepExpired, &env);
        assert!(effects.is_empty());
    }

    #[test]
    fn rejections_are_keyed_by_request() {
        let mut fixture = team();
        let seller = fixture.seller;
        let friday = fixture.friday;
        let env = test_env();
        let good = RequestId::new();
        let bad = RequestId::new();
        dispatch(
            &mut fixture.state,
            &env,
            LedgerAction::AllocateTickets {
                request: good,
                staff_id: seller,
                tier_id: friday,
                quantity: 10,
            },
        );
        dispatch(
            &mut fixture.state,
            &env,
            LedgerAction::AllocateTickets {
                request: bad,
                staff_id: seller,
                tier_id: friday,
                quantity: 0,
            },
        );
        assert!(fixture.state.rejection_for(&good).is_none());
        assert!(fixture.state.rejection_for(&bad).is_some());
    }
}
