//! Error taxonomy for ledger operations.
//!
//! Every rejected command maps to one [`LedgerError`] variant, and every
//! variant belongs to exactly one [`ErrorCategory`]. Callers branch on the
//! category: capacity and race-lost failures are expected outcomes under
//! contention, authorization failures are audited, validation failures are
//! caller bugs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{
    BundleId, HoldId, HoldStatus, SaleId, StaffId, TicketCode, TierId, TransferId,
    TransferStatus,
};

/// Coarse classification of a [`LedgerError`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCategory {
    /// The request itself was malformed or referenced missing entities
    Validation,
    /// A quantity limit would have been breached
    Capacity,
    /// A concurrent actor or a deadline got there first
    RaceLost,
    /// The acting staff member may not perform this operation
    Authorization,
}

/// Why a ledger or scan command was rejected
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum LedgerError {
    // ------------------------------------------------------------------
    // Validation
    // ------------------------------------------------------------------
    /// Quantity must be greater than zero
    #[error("quantity must be greater than zero, got {requested}")]
    InvalidQuantity {
        /// The quantity that was requested
        requested: u32,
    },

    /// A price or commission computation overflowed
    #[error("amount computation overflowed")]
    AmountOverflow,

    /// No staff member with this id
    #[error("unknown staff member {staff_id}")]
    UnknownStaff {
        /// The id that was not found
        staff_id: StaffId,
    },

    /// The staff member has been deactivated
    #[error("staff member {staff_id} is deactivated")]
    StaffInactive {
        /// The deactivated member
        staff_id: StaffId,
    },

    /// No tier with this id
    #[error("unknown tier {tier_id}")]
    UnknownTier {
        /// The id that was not found
        tier_id: TierId,
    },

    /// No transfer with this id
    #[error("unknown transfer {transfer_id}")]
    UnknownTransfer {
        /// The id that was not found
        transfer_id: TransferId,
    },

    /// No bundle with this id
    #[error("unknown bundle {bundle_id}")]
    UnknownBundle {
        /// The id that was not found
        bundle_id: BundleId,
    },

    /// No cash-order hold with this id
    #[error("unknown hold {hold_id}")]
    UnknownHold {
        /// The id that was not found
        hold_id: HoldId,
    },

    /// A tier with this id is already registered
    #[error("tier {tier_id} is already registered")]
    TierExists {
        /// The duplicate id
        tier_id: TierId,
    },

    /// A staff member with this id already exists
    #[error("staff member {staff_id} already exists")]
    StaffExists {
        /// The duplicate id
        staff_id: StaffId,
    },

    /// A transfer with this id already exists
    #[error("transfer {transfer_id} already exists")]
    TransferExists {
        /// The duplicate id
        transfer_id: TransferId,
    },

    /// A sale with this id was already recorded
    #[error("sale {sale_id} was already recorded")]
    SaleExists {
        /// The duplicate id
        sale_id: SaleId,
    },

    /// A bundle with this id is already defined
    #[error("bundle {bundle_id} is already defined")]
    BundleExists {
        /// The duplicate id
        bundle_id: BundleId,
    },

    /// A hold with this id already exists
    #[error("hold {hold_id} already exists")]
    HoldExists {
        /// The duplicate id
        hold_id: HoldId,
    },

    /// Tickets cannot be transferred to their current holder
    #[error("staff member {staff_id} cannot transfer tickets to themselves")]
    SelfTransfer {
        /// The member on both ends of the transfer
        staff_id: StaffId,
    },

    /// Associates must be created under a team member
    #[error("associate {staff_id} requires a parent team member")]
    ParentRequired {
        /// The associate missing a parent
        staff_id: StaffId,
    },

    /// The named parent cannot take associates
    #[error("staff member {parent} cannot be a parent for associate {staff_id}")]
    InvalidParent {
        /// The associate being added
        staff_id: StaffId,
        /// The unsuitable parent
        parent: StaffId,
    },

    /// Percentage commission above 100%
    #[error("commission of {basis_points} basis points exceeds 10000 (100%)")]
    InvalidCommission {
        /// The out-of-range rate
        basis_points: u32,
    },

    /// A bundle must require at least one tier
    #[error("bundle {bundle_id} requires no tiers")]
    EmptyBundle {
        /// The empty bundle
        bundle_id: BundleId,
    },

    /// A hold must reserve at least one ticket
    #[error("hold {hold_id} reserves no tickets")]
    EmptyHold {
        /// The empty hold
        hold_id: HoldId,
    },

    /// Staff with tickets in hand cannot be deactivated
    #[error(
        "staff member {staff_id} still holds {held} tickets in tier {tier_id}; \
         transfer them back before deactivating"
    )]
    BalancesOutstanding {
        /// The member being deactivated
        staff_id: StaffId,
        /// A tier with a nonzero balance
        tier_id: TierId,
        /// Tickets still held in that tier
        held: u32,
    },

    /// The presented activation code does not match
    #[error("activation code does not match hold {hold_id}")]
    CodeInvalid {
        /// The hold the code was presented for
        hold_id: HoldId,
    },

    /// No ticket with this code was ever issued
    #[error("no ticket with code {code}")]
    TicketNotFound {
        /// The unrecognized code
        code: TicketCode,
    },

    // ------------------------------------------------------------------
    // Capacity
    // ------------------------------------------------------------------
    /// The tier's printed quantity would be exceeded
    #[error(
        "tier {tier_id} has {available} unclaimed tickets, cannot claim {requested}"
    )]
    TierCapacityExceeded {
        /// The tier at capacity
        tier_id: TierId,
        /// Tickets the command asked for
        requested: u32,
        /// Tickets actually unclaimed
        available: u32,
    },

    /// The staff member holds fewer tickets than the command needs
    #[error(
        "staff member {staff_id} holds {available} tickets in tier {tier_id}, \
         cannot spend {requested}"
    )]
    InsufficientBalance {
        /// The member short on tickets
        staff_id: StaffId,
        /// The tier in question
        tier_id: TierId,
        /// Tickets the command asked for
        requested: u32,
        /// Tickets actually held
        available: u32,
    },

    /// Every bundle has been sold
    #[error("bundle {bundle_id} is sold out")]
    BundleSoldOut {
        /// The exhausted bundle
        bundle_id: BundleId,
    },

    /// The seller holds too few tickets of a required tier
    #[error(
        "bundle {bundle_id} needs {required} tickets of tier {tier_id}, \
         seller holds {held}"
    )]
    BundleIneligible {
        /// The bundle that cannot be sold
        bundle_id: BundleId,
        /// First required tier with a shortfall, in definition order
        tier_id: TierId,
        /// Tickets of that tier one bundle needs
        required: u32,
        /// Tickets of that tier the seller holds
        held: u32,
    },

    // ------------------------------------------------------------------
    // Race lost
    // ------------------------------------------------------------------
    /// The transfer was already resolved
    #[error("transfer {transfer_id} is no longer pending ({status:?})")]
    TransferNotPending {
        /// The resolved transfer
        transfer_id: TransferId,
        /// The status it resolved to
        status: TransferStatus,
    },

    /// The transfer's response deadline has passed
    #[error("transfer {transfer_id} expired before it was resolved")]
    TransferExpired {
        /// The expired transfer
        transfer_id: TransferId,
    },

    /// The hold was already resolved
    #[error("hold {hold_id} is no longer active ({status:?})")]
    HoldNotActive {
        /// The resolved hold
        hold_id: HoldId,
        /// The status it resolved to
        status: HoldStatus,
    },

    /// The hold's payment deadline has passed
    #[error("hold {hold_id} expired before payment arrived")]
    HoldExpired {
        /// The expired hold
        hold_id: HoldId,
    },

    /// The activation code's own deadline has passed
    #[error("activation code for hold {hold_id} has expired")]
    CodeExpired {
        /// The hold whose code expired
        hold_id: HoldId,
    },

    /// The ticket was already admitted through the door
    #[error("ticket {code} was already scanned at {scanned_at}")]
    AlreadyScanned {
        /// The ticket presented twice
        code: TicketCode,
        /// When it was first admitted
        scanned_at: DateTime<Utc>,
    },

    /// The ticket was voided before use
    #[error("ticket {code} has been voided")]
    TicketVoided {
        /// The voided ticket
        code: TicketCode,
    },

    // ------------------------------------------------------------------
    // Authorization
    // ------------------------------------------------------------------
    /// The acting staff member may not perform this operation
    #[error("staff member {staff_id} is not authorized to {operation}")]
    NotAuthorized {
        /// Who tried
        staff_id: StaffId,
        /// What they tried to do
        operation: String,
    },
}

impl LedgerError {
    /// The category this error belongs to
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidQuantity { .. }
            | Self::AmountOverflow
            | Self::UnknownStaff { .. }
            | Self::StaffInactive { .. }
            | Self::UnknownTier { .. }
            | Self::UnknownTransfer { .. }
            | Self::UnknownBundle { .. }
            | Self::UnknownHold { .. }
            | Self::TierExists { .. }
            | Self::StaffExists { .. }
            | Self::TransferExists { .. }
            | Self::SaleExists { .. }
            | Self::BundleExists { .. }
            | Self::HoldExists { .. }
            | Self::SelfTransfer { .. }
            | Self::ParentRequired { .. }
            | Self::InvalidParent { .. }
            | Self::InvalidCommission { .. }
            | Self::EmptyBundle { .. }
            | Self::EmptyHold { .. }
            | Self::BalancesOutstanding { .. }
            | Self::CodeInvalid { .. }
            | Self::TicketNotFound { .. } => ErrorCategory::Validation,

            Self::TierCapacityExceeded { .. }
            | Self::InsufficientBalance { .. }
            | Self::BundleSoldOut { .. }
            | Self::BundleIneligible { .. } => ErrorCategory::Capacity,

            Self::TransferNotPending { .. }
            | Self::TransferExpired { .. }
            | Self::HoldNotActive { .. }
            | Self::HoldExpired { .. }
            | Self::CodeExpired { .. }
            | Self::AlreadyScanned { .. }
            | Self::TicketVoided { .. } => ErrorCategory::RaceLost,

            Self::NotAuthorized { .. } => ErrorCategory::Authorization,
        }
    }

    /// True for capacity failures (printed quantity, balance, bundle stock)
    #[must_use]
    pub const fn is_capacity(&self) -> bool {
        matches!(self.category(), ErrorCategory::Capacity)
    }

    /// True when a concurrent actor or a deadline got there first
    #[must_use]
    pub const fn is_race_lost(&self) -> bool {
        matches!(self.category(), ErrorCategory::RaceLost)
    }

    /// True for authorization failures
    #[must_use]
    pub const fn is_authorization(&self) -> bool {
        matches!(self.category(), ErrorCategory::Authorization)
    }

    /// True for malformed requests and unknown entity ids
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self.category(), ErrorCategory::Validation)
    }
}
