//! Domain types for the staff ticket-inventory ledger.
//!
//! This module contains all value objects, entities, and state types for the
//! ledger: printed tier capacity, per-staff allocations, peer transfers, sale
//! records with commission, cash-order holds, and door-scan tickets.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use uuid::Uuid;

use crate::error::LedgerError;

// ============================================================================
// Identifiers
// ============================================================================

/// Unique identifier for an event (show night)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(Uuid);

impl EventId {
    /// Creates a new random `EventId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create an `EventId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a staff member
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StaffId(Uuid);

impl StaffId {
    /// Creates a new random `StaffId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a `StaffId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for StaffId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for StaffId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a ticket tier
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TierId(Uuid);

impl TierId {
    /// Creates a new random `TierId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a `TierId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TierId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TierId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a transfer request
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TransferId(Uuid);

impl TransferId {
    /// Creates a new random `TransferId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a `TransferId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for TransferId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a sale record
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SaleId(Uuid);

impl SaleId {
    /// Creates a new random `SaleId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SaleId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SaleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a ticket bundle
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BundleId(Uuid);

impl BundleId {
    /// Creates a new random `BundleId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for BundleId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BundleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a cash-order hold
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct HoldId(Uuid);

impl HoldId {
    /// Creates a new random `HoldId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a `HoldId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for HoldId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for HoldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Correlation identifier for a single command dispatch.
///
/// Every caller-facing command carries one. When validation rejects the
/// command the reducer records the error under this id, so the caller that
/// issued the command can read back its own outcome without racing other
/// concurrent callers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Creates a new random `RequestId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Ticket and Activation Codes
// ============================================================================

/// Human-readable code printed on an issued ticket and checked at the door
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TicketCode(String);

impl TicketCode {
    /// Creates a `TicketCode` from a string
    #[must_use]
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    /// The code as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TicketCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Short numeric code a buyer speaks at the box office to claim a held order
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActivationCode(String);

impl ActivationCode {
    /// Creates an `ActivationCode` from a string
    #[must_use]
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    /// The code as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActivationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Money Value Object (cents-based to avoid floating point errors)
// ============================================================================

/// Represents money in cents to avoid floating-point arithmetic errors
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Money(u64);

impl Money {
    /// Zero dollars
    pub const ZERO: Self = Self(0);

    /// Creates a `Money` value from cents
    #[must_use]
    pub const fn from_cents(cents: u64) -> Self {
        Self(cents)
    }

    /// Creates a `Money` value from dollars
    ///
    /// # Panics
    ///
    /// Panics if the conversion would overflow (dollars * 100 > `u64::MAX`).
    /// Use `checked_from_dollars` for non-panicking conversion.
    #[must_use]
    #[allow(clippy::panic)]
    pub const fn from_dollars(dollars: u64) -> Self {
        match dollars.checked_mul(100) {
            Some(cents) => Self(cents),
            None => panic!("Money::from_dollars overflow"),
        }
    }

    /// Creates a `Money` value from dollars with overflow checking
    #[must_use]
    pub const fn checked_from_dollars(dollars: u64) -> Option<Self> {
        match dollars.checked_mul(100) {
            Some(cents) => Some(Self(cents)),
            None => None,
        }
    }

    /// Returns the amount in cents
    #[must_use]
    pub const fn cents(&self) -> u64 {
        self.0
    }

    /// Returns the amount in dollars (rounded down)
    #[must_use]
    pub const fn dollars(&self) -> u64 {
        self.0 / 100
    }

    /// Checks if the amount is zero
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Adds two money amounts with overflow checking
    #[must_use]
    pub const fn checked_add(self, other: Self) -> Option<Self> {
        match self.0.checked_add(other.0) {
            Some(result) => Some(Self(result)),
            None => None,
        }
    }

    /// Adds two money amounts, clamping at `u64::MAX` cents
    #[must_use]
    pub const fn saturating_add(self, other: Self) -> Self {
        Self(self.0.saturating_add(other.0))
    }

    /// Subtracts two money amounts (returns `None` if the result would be negative)
    #[must_use]
    pub const fn checked_sub(self, other: Self) -> Option<Self> {
        match self.0.checked_sub(other.0) {
            Some(result) => Some(Self(result)),
            None => None,
        }
    }

    /// Multiplies the amount by a quantity with overflow checking
    #[must_use]
    pub const fn checked_multiply(self, quantity: u32) -> Option<Self> {
        match self.0.checked_mul(quantity as u64) {
            Some(result) => Some(Self(result)),
            None => None,
        }
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${}.{:02}", self.dollars(), self.0 % 100)
    }
}

// ============================================================================
// Expiry Deadline
// ============================================================================

/// A point in time after which a pending transfer, hold, or activation code
/// is no longer actionable.
///
/// Expiry is evaluated lazily wherever the entity is touched, so a deadline
/// that has passed takes effect even if no background task has run yet.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExpiresAt(DateTime<Utc>);

impl ExpiresAt {
    /// Wraps an absolute deadline
    #[must_use]
    pub const fn at(deadline: DateTime<Utc>) -> Self {
        Self(deadline)
    }

    /// The absolute deadline
    #[must_use]
    pub const fn value(&self) -> DateTime<Utc> {
        self.0
    }

    /// True once `now` has reached the deadline
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.0
    }
}

impl fmt::Display for ExpiresAt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Roles, Commission, and Payment
// ============================================================================

/// Role of a staff member within an event's sales team
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    /// Runs the event; may act on any transfer and manage settlement
    Organizer,
    /// Sells under their own allocation
    TeamMember,
    /// Sells under a team member's wing
    Associate,
}

/// How a staff member's commission is computed at sale time
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommissionPlan {
    /// A fraction of the sale price, in basis points (250 = 2.5%)
    Percentage {
        /// Commission rate in basis points; at most 10 000
        basis_points: u32,
    },
    /// A flat amount per ticket regardless of price
    Fixed {
        /// Amount earned per ticket sold
        per_ticket: Money,
    },
}

impl CommissionPlan {
    /// Commission earned for selling `quantity` tickets at `unit_price` each.
    ///
    /// Percentage plans floor to whole cents. Returns `None` if the sale
    /// total overflows, which no realistic price reaches.
    #[must_use]
    pub fn commission_for(&self, quantity: u32, unit_price: Money) -> Option<Money> {
        match self {
            Self::Percentage { basis_points } => {
                let total = unit_price.checked_multiply(quantity)?;
                let cents =
                    u128::from(total.cents()) * u128::from(*basis_points) / 10_000;
                u64::try_from(cents).ok().map(Money::from_cents)
            }
            Self::Fixed { per_ticket } => per_ticket.checked_multiply(quantity),
        }
    }
}

/// How a buyer paid for a sale
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentMethod {
    /// Physical cash handed to the seller
    Cash,
    /// Peer-to-peer cash transfer received by the seller
    CashApp,
    /// Card payment that never touches the seller's hands
    Credit,
    /// Online checkout that never touches the seller's hands
    Online,
}

impl PaymentMethod {
    /// True when the seller physically holds the proceeds and owes them back
    #[must_use]
    pub const fn is_cash_like(&self) -> bool {
        matches!(self, Self::Cash | Self::CashApp)
    }
}

/// Whether a staff member's settlement has been marked as paid out
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SettlementStatus {
    /// Not yet settled
    Pending,
    /// Settled at the recorded time
    Paid {
        /// When the settlement was marked paid
        paid_at: DateTime<Utc>,
    },
}

impl SettlementStatus {
    /// True once the settlement has been marked paid
    #[must_use]
    pub const fn is_paid(&self) -> bool {
        matches!(self, Self::Paid { .. })
    }
}

// ============================================================================
// Lifecycle Statuses
// ============================================================================

/// Lifecycle of a peer-to-peer ticket transfer
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferStatus {
    /// Requested, tickets debited from the source, awaiting a response
    Pending,
    /// Accepted by the destination (or the organizer); tickets credited
    Accepted,
    /// Declined; tickets returned to the source
    Rejected,
    /// Deadline passed with no response; tickets returned to the source
    Expired,
}

/// Lifecycle of a cash-order hold against the general pool
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum HoldStatus {
    /// Capacity reserved, awaiting payment at the box office
    Hold,
    /// Paid; tickets issued from the general pool
    Approved,
    /// Deadline passed; reserved capacity released
    Expired,
    /// Withdrawn before approval; reserved capacity released
    Cancelled,
}

/// Lifecycle of an issued ticket at the door
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TicketStatus {
    /// Issued and not yet presented
    Valid,
    /// Admitted; scanning again is rejected
    Scanned,
    /// Invalidated by an organizer before use
    Void,
}

/// Who approved a cash-order hold
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApprovedBy {
    /// A staff member confirmed payment directly
    Staff(StaffId),
    /// The buyer presented a valid activation code
    ActivationCode,
}

// ============================================================================
// Value Objects
// ============================================================================

/// Contact details captured at the point of sale
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuyerInfo {
    /// Buyer's name as given to the seller
    pub name: String,
    /// Optional phone number or handle for follow-up
    pub contact: Option<String>,
}

impl BuyerInfo {
    /// Creates buyer info with just a name
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            contact: None,
        }
    }
}

/// A single ticket materialized by a sale or approved hold.
///
/// Carries everything the door needs, so the scan side never has to look the
/// tier or buyer back up in the ledger.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuedTicket {
    /// Unique code printed on the ticket
    pub code: TicketCode,
    /// Tier the ticket admits to
    pub tier_id: TierId,
    /// Tier name at the time of issue
    pub tier_name: String,
    /// Name of the person expected at the door
    pub attendee: String,
}

/// One tier's contribution to a bundle
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleRequirement {
    /// Tier the bundle draws from
    pub tier_id: TierId,
    /// Tickets of that tier included in one bundle
    pub quantity: u32,
}

/// One tier's line in a cash-order hold
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoldItem {
    /// Tier being reserved
    pub tier_id: TierId,
    /// Tickets reserved from the general pool
    pub quantity: u32,
}

/// What a sale record covers: loose tickets from one tier, or one bundle
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SaleItem {
    /// Individual tickets from a single tier
    Tier {
        /// Tier sold from
        tier_id: TierId,
        /// Price per ticket at the time of sale
        unit_price: Money,
    },
    /// A bundle sold as one unit
    Bundle {
        /// Bundle sold
        bundle_id: BundleId,
        /// Bundle price at the time of sale
        price: Money,
    },
}

impl SaleItem {
    /// Total price of the sale for `quantity` units
    #[must_use]
    pub fn total_price(&self, quantity: u32) -> Option<Money> {
        match self {
            Self::Tier { unit_price, .. } => unit_price.checked_multiply(quantity),
            Self::Bundle { price, .. } => price.checked_multiply(quantity),
        }
    }
}

// ============================================================================
// Entities
// ============================================================================

/// A printed ticket tier and the running claims against its capacity.
///
/// `printed_quantity` is the hard ceiling: staff allocations, general-pool
/// hold reservations, and general-pool sales can never claim more than was
/// printed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tier {
    /// Tier identifier
    pub tier_id: TierId,
    /// Display name ("Friday GA", "VIP")
    pub name: String,
    /// Face price per ticket
    pub price: Money,
    /// Physical tickets printed for this tier
    pub printed_quantity: u32,
    /// Tickets handed to staff across all allocations
    pub allocated_total: u32,
    /// General-pool tickets reserved by active cash-order holds
    pub hold_reserved: u32,
    /// General-pool tickets sold through approved holds
    pub pool_sold: u32,
}

impl Tier {
    /// Creates a freshly registered tier with no claims against it
    #[must_use]
    pub fn new(
        tier_id: TierId,
        name: impl Into<String>,
        price: Money,
        printed_quantity: u32,
    ) -> Self {
        Self {
            tier_id,
            name: name.into(),
            price,
            printed_quantity,
            allocated_total: 0,
            hold_reserved: 0,
            pool_sold: 0,
        }
    }

    /// Printed tickets not yet claimed by allocations, holds, or pool sales
    #[must_use]
    pub const fn available(&self) -> u32 {
        self.printed_quantity
            .saturating_sub(self.allocated_total)
            .saturating_sub(self.hold_reserved)
            .saturating_sub(self.pool_sold)
    }
}

/// A member of the event's sales team
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaffMember {
    /// Staff identifier
    pub staff_id: StaffId,
    /// Display name
    pub name: String,
    /// Role within the team
    pub role: Role,
    /// Team member this associate sells under, if any
    pub parent: Option<StaffId>,
    /// Commission plan applied to this member's sales
    pub commission: CommissionPlan,
    /// False once deactivated; inactive staff cannot sell or transfer
    pub active: bool,
    /// Whether this member's settlement has been paid out
    pub settlement: SettlementStatus,
}

impl StaffMember {
    /// True for the event organizer
    #[must_use]
    pub const fn is_organizer(&self) -> bool {
        matches!(self.role, Role::Organizer)
    }
}

/// Running balance of one staff member's tickets in one tier.
///
/// The row satisfies `held = allocated_total + transferred_in -
/// transferred_out - sold` after every mutation. `transferred_out` counts
/// in-flight transfers too; a rejected or expired transfer rolls it back.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierAllocation {
    /// Staff member holding the tickets
    pub staff_id: StaffId,
    /// Tier the tickets belong to
    pub tier_id: TierId,
    /// Tickets currently in hand and sellable
    pub held: u32,
    /// Lifetime tickets allocated by the organizer
    pub allocated_total: u32,
    /// Lifetime tickets sold from this row
    pub sold: u32,
    /// Lifetime tickets received via accepted transfers
    pub transferred_in: u32,
    /// Tickets sent away via transfers that were not refunded
    pub transferred_out: u32,
}

impl TierAllocation {
    /// Creates an empty allocation row
    #[must_use]
    pub const fn new(staff_id: StaffId, tier_id: TierId) -> Self {
        Self {
            staff_id,
            tier_id,
            held: 0,
            allocated_total: 0,
            sold: 0,
            transferred_in: 0,
            transferred_out: 0,
        }
    }

    /// Checks the conservation equation for this row
    #[must_use]
    pub fn is_balanced(&self) -> bool {
        let expected = i64::from(self.allocated_total) + i64::from(self.transferred_in)
            - i64::from(self.transferred_out)
            - i64::from(self.sold);
        i64::from(self.held) == expected
    }
}

/// A pending or resolved peer-to-peer ticket transfer
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    /// Transfer identifier
    pub transfer_id: TransferId,
    /// Staff member giving tickets up
    pub from: StaffId,
    /// Staff member meant to receive them
    pub to: StaffId,
    /// Tier being transferred
    pub tier_id: TierId,
    /// Tickets in the transfer
    pub quantity: u32,
    /// Optional note from the sender
    pub note: Option<String>,
    /// Current lifecycle status
    pub status: TransferStatus,
    /// When the transfer was requested
    pub requested_at: DateTime<Utc>,
    /// Deadline for the destination to respond
    pub expires_at: ExpiresAt,
    /// When the transfer left the pending state, if it has
    pub resolved_at: Option<DateTime<Utc>>,
}

impl TransferRequest {
    /// True while the transfer still awaits a response
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        matches!(self.status, TransferStatus::Pending)
    }
}

/// Immutable record of a completed sale.
///
/// Commission and cash-collected are computed once, when the sale is
/// recorded; later changes to a staff member's plan never touch past records.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleRecord {
    /// Sale identifier
    pub sale_id: SaleId,
    /// Staff member who made the sale
    pub staff_id: StaffId,
    /// What was sold
    pub item: SaleItem,
    /// Units sold (tickets for a tier sale, always 1 for a bundle)
    pub quantity: u32,
    /// How the buyer paid
    pub payment: PaymentMethod,
    /// Buyer details captured at the point of sale
    pub buyer: BuyerInfo,
    /// Commission earned on this sale, frozen at sale time
    pub commission: Money,
    /// Cash the seller physically took in on this sale
    pub cash_collected: Money,
    /// Tickets materialized by this sale
    pub tickets: Vec<IssuedTicket>,
    /// When the sale was recorded
    pub sold_at: DateTime<Utc>,
}

impl SaleRecord {
    /// Codes of the tickets this sale issued
    #[must_use]
    pub fn ticket_codes(&self) -> Vec<TicketCode> {
        self.tickets.iter().map(|t| t.code.clone()).collect()
    }

    /// Total price of the sale
    #[must_use]
    pub fn total_price(&self) -> Option<Money> {
        self.item.total_price(self.quantity)
    }
}

/// A multi-tier package sold as one unit at one price
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bundle {
    /// Bundle identifier
    pub bundle_id: BundleId,
    /// Display name ("Full Weekend Pass")
    pub name: String,
    /// Price of the whole bundle
    pub price: Money,
    /// Tiers and quantities one bundle is made of, in definition order
    pub required: Vec<BundleRequirement>,
    /// How many bundles may be sold in total
    pub total_quantity: u32,
    /// How many bundles have been sold
    pub sold: u32,
}

impl Bundle {
    /// True once every bundle has been sold
    #[must_use]
    pub const fn sold_out(&self) -> bool {
        self.sold >= self.total_quantity
    }

    /// Bundles still available for sale
    #[must_use]
    pub const fn remaining(&self) -> u32 {
        self.total_quantity.saturating_sub(self.sold)
    }
}

/// A buyer's promise to pay cash at the box office, holding general-pool
/// capacity until they do or the hold expires
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CashOrderHold {
    /// Hold identifier
    pub hold_id: HoldId,
    /// Buyer the hold is for
    pub buyer: BuyerInfo,
    /// Tiers and quantities reserved
    pub items: Vec<HoldItem>,
    /// Current lifecycle status
    pub status: HoldStatus,
    /// When the hold was placed
    pub created_at: DateTime<Utc>,
    /// Deadline for the buyer to pay
    pub expires_at: ExpiresAt,
    /// Activation code handed to the buyer, if one was generated
    pub activation_code: Option<ActivationCode>,
    /// The activation code's own, shorter deadline
    pub code_expires_at: Option<ExpiresAt>,
    /// Who approved the hold, once approved
    pub approved_by: Option<ApprovedBy>,
    /// Tickets issued when the hold was approved
    pub tickets: Vec<IssuedTicket>,
    /// When the hold left the active state, if it has
    pub resolved_at: Option<DateTime<Utc>>,
}

impl CashOrderHold {
    /// True while the hold still reserves capacity
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self.status, HoldStatus::Hold)
    }

    /// Total tickets reserved across all items
    #[must_use]
    pub fn total_quantity(&self) -> u32 {
        self.items.iter().map(|item| item.quantity).sum()
    }
}

/// An issued ticket as the door sees it
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    /// Unique code printed on the ticket
    pub code: TicketCode,
    /// Tier the ticket admits to
    pub tier_id: TierId,
    /// Tier name at the time of issue
    pub tier_name: String,
    /// Name of the person expected at the door
    pub attendee: String,
    /// Current lifecycle status
    pub status: TicketStatus,
    /// When the ticket was scanned, if it has been
    pub scanned_at: Option<DateTime<Utc>>,
}

impl From<IssuedTicket> for Ticket {
    fn from(issued: IssuedTicket) -> Self {
        Self {
            code: issued.code,
            tier_id: issued.tier_id,
            tier_name: issued.tier_name,
            attendee: issued.attendee,
            status: TicketStatus::Valid,
            scanned_at: None,
        }
    }
}

// ============================================================================
// Aggregate States
// ============================================================================

/// State for the ledger aggregate: tiers, staff, allocations, transfers,
/// sales, bundles, and cash-order holds for one event.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LedgerState {
    /// All tiers indexed by id
    pub tiers: HashMap<TierId, Tier>,
    /// All staff members indexed by id
    pub staff: HashMap<StaffId, StaffMember>,
    /// Allocation rows indexed by (staff, tier)
    pub allocations: HashMap<(StaffId, TierId), TierAllocation>,
    /// All transfer requests indexed by id
    pub transfers: HashMap<TransferId, TransferRequest>,
    /// Sale records in the order they were recorded
    pub sales: Vec<SaleRecord>,
    /// All bundles indexed by id
    pub bundles: HashMap<BundleId, Bundle>,
    /// All cash-order holds indexed by id
    pub holds: HashMap<HoldId, CashOrderHold>,
    /// Every ticket code ever issued, for collision checks
    pub issued_codes: HashSet<TicketCode>,
    /// Rejected commands keyed by request correlation id
    pub rejections: HashMap<RequestId, LedgerError>,
    /// Last event-store or event-bus failure reported back to the reducer
    pub last_storage_error: Option<String>,
}

impl LedgerState {
    /// Creates a new empty `LedgerState`
    #[must_use]
    pub fn new() -> Self {
        Self {
            tiers: HashMap::new(),
            staff: HashMap::new(),
            allocations: HashMap::new(),
            transfers: HashMap::new(),
            sales: Vec::new(),
            bundles: HashMap::new(),
            holds: HashMap::new(),
            issued_codes: HashSet::new(),
            rejections: HashMap::new(),
            last_storage_error: None,
        }
    }

    /// Gets a tier by id
    #[must_use]
    pub fn tier(&self, tier_id: &TierId) -> Option<&Tier> {
        self.tiers.get(tier_id)
    }

    /// Gets a staff member by id
    #[must_use]
    pub fn staff_member(&self, staff_id: &StaffId) -> Option<&StaffMember> {
        self.staff.get(staff_id)
    }

    /// Gets the allocation row for one staff member in one tier
    #[must_use]
    pub fn allocation(&self, staff_id: &StaffId, tier_id: &TierId) -> Option<&TierAllocation> {
        self.allocations.get(&(*staff_id, *tier_id))
    }

    /// Tickets the staff member currently holds in the tier (0 if no row)
    #[must_use]
    pub fn balance(&self, staff_id: &StaffId, tier_id: &TierId) -> u32 {
        self.allocation(staff_id, tier_id).map_or(0, |row| row.held)
    }

    /// Printed tickets still unclaimed in the tier, or `None` for an unknown tier
    #[must_use]
    pub fn tier_availability(&self, tier_id: &TierId) -> Option<u32> {
        self.tiers.get(tier_id).map(Tier::available)
    }

    /// Gets a transfer request by id
    #[must_use]
    pub fn transfer(&self, transfer_id: &TransferId) -> Option<&TransferRequest> {
        self.transfers.get(transfer_id)
    }

    /// Gets a bundle by id
    #[must_use]
    pub fn bundle(&self, bundle_id: &BundleId) -> Option<&Bundle> {
        self.bundles.get(bundle_id)
    }

    /// Gets a cash-order hold by id
    #[must_use]
    pub fn hold(&self, hold_id: &HoldId) -> Option<&CashOrderHold> {
        self.holds.get(hold_id)
    }

    /// Gets a sale record by id
    #[must_use]
    pub fn sale(&self, sale_id: &SaleId) -> Option<&SaleRecord> {
        self.sales.iter().find(|record| record.sale_id == *sale_id)
    }

    /// Sale records for one staff member, oldest first
    pub fn sales_for<'a>(
        &'a self,
        staff_id: &'a StaffId,
    ) -> impl Iterator<Item = &'a SaleRecord> {
        self.sales
            .iter()
            .filter(move |record| record.staff_id == *staff_id)
    }

    /// Whether the staff member can sell the bundle right now.
    ///
    /// Checks remaining bundle stock first, then walks the required tiers in
    /// definition order and reports the first one the member holds too few
    /// tickets of. Selling re-runs this same check inside the reducer, so a
    /// positive answer here can still lose to a concurrent sale.
    ///
    /// # Errors
    ///
    /// - `UnknownStaff` / `StaffInactive` when the seller cannot act
    /// - `UnknownBundle` when the bundle does not exist
    /// - `BundleSoldOut` when all bundles have been sold
    /// - `BundleIneligible` naming the first tier with a shortfall
    pub fn bundle_eligibility(
        &self,
        staff_id: &StaffId,
        bundle_id: &BundleId,
    ) -> Result<(), LedgerError> {
        let member = self
            .staff
            .get(staff_id)
            .ok_or(LedgerError::UnknownStaff { staff_id: *staff_id })?;
        if !member.active {
            return Err(LedgerError::StaffInactive { staff_id: *staff_id });
        }
        let bundle = self
            .bundles
            .get(bundle_id)
            .ok_or(LedgerError::UnknownBundle { bundle_id: *bundle_id })?;
        if bundle.sold_out() {
            return Err(LedgerError::BundleSoldOut { bundle_id: *bundle_id });
        }
        for requirement in &bundle.required {
            let held = self.balance(staff_id, &requirement.tier_id);
            if held < requirement.quantity {
                return Err(LedgerError::BundleIneligible {
                    bundle_id: *bundle_id,
                    tier_id: requirement.tier_id,
                    required: requirement.quantity,
                    held,
                });
            }
        }
        Ok(())
    }

    /// The recorded outcome of a rejected command, if it was rejected
    #[must_use]
    pub fn rejection_for(&self, request: &RequestId) -> Option<&LedgerError> {
        self.rejections.get(request)
    }

    /// Transfers still awaiting a response
    #[must_use]
    pub fn pending_transfer_count(&self) -> usize {
        self.transfers.values().filter(|t| t.is_pending()).count()
    }

    /// Holds still reserving capacity
    #[must_use]
    pub fn active_hold_count(&self) -> usize {
        self.holds.values().filter(|h| h.is_active()).count()
    }

    /// Returns the number of sale records
    #[must_use]
    pub fn count_sales(&self) -> usize {
        self.sales.len()
    }
}

impl Default for LedgerState {
    fn default() -> Self {
        Self::new()
    }
}

/// State for the scan aggregate: every issued ticket for one event, keyed by
/// code, with its door status.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScanState {
    /// All issued tickets indexed by code
    pub tickets: HashMap<TicketCode, Ticket>,
    /// Rejected commands keyed by request correlation id
    pub rejections: HashMap<RequestId, LedgerError>,
    /// Last event-store or event-bus failure reported back to the reducer
    pub last_storage_error: Option<String>,
}

impl ScanState {
    /// Creates a new empty `ScanState`
    #[must_use]
    pub fn new() -> Self {
        Self {
            tickets: HashMap::new(),
            rejections: HashMap::new(),
            last_storage_error: None,
        }
    }

    /// Gets a ticket by code
    #[must_use]
    pub fn ticket(&self, code: &TicketCode) -> Option<&Ticket> {
        self.tickets.get(code)
    }

    /// The recorded outcome of a rejected command, if it was rejected
    #[must_use]
    pub fn rejection_for(&self, request: &RequestId) -> Option<&LedgerError> {
        self.rejections.get(request)
    }

    /// Returns the number of registered tickets
    #[must_use]
    pub fn count(&self) -> usize {
        self.tickets.len()
    }

    /// Tickets already admitted through the door
    #[must_use]
    pub fn scanned_count(&self) -> usize {
        self.tickets
            .values()
            .filter(|t| matches!(t.status, TicketStatus::Scanned))
            .count()
    }
}

impl Default for ScanState {
    fn default() -> Self {
        Self::new()
    }
}
