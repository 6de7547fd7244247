//! Settlement arithmetic.
//!
//! Settlement is derived, never stored. Commission earned and cash collected
//! are summed from immutable sale records every time a report is requested,
//! so the figures cannot drift from the ledger: replaying the same records
//! always yields the same report. The [`SettlementProjection`] maintains the
//! same figures incrementally and is held to agreement with these functions.
//!
//! [`SettlementProjection`]: crate::projections::SettlementProjection

use serde::{Deserialize, Serialize};

use crate::types::{LedgerState, Money, SaleRecord, SettlementStatus, StaffId, StaffMember};

/// One staff member's money position with the organizer
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementReport {
    /// The staff member settled
    pub staff_id: StaffId,
    /// Their display name, for dashboards
    pub staff_name: String,
    /// Commission earned across all their sales
    pub commission_earned: Money,
    /// Cash they physically collected and owe back
    pub cash_collected: Money,
    /// Commission minus cash, in cents. Positive means the organizer owes
    /// the staff member; negative means the staff member owes the organizer.
    pub net_cents: i64,
    /// Whether this settlement has been marked paid
    pub status: SettlementStatus,
}

impl SettlementReport {
    /// True when the organizer must pay the staff member
    #[must_use]
    pub const fn organizer_owes_staff(&self) -> bool {
        self.net_cents > 0
    }

    /// True when the staff member must hand cash over
    #[must_use]
    pub const fn staff_owes_organizer(&self) -> bool {
        self.net_cents < 0
    }
}

/// Signed settlement difference in cents.
///
/// Positive means the organizer owes the staff member.
#[must_use]
pub fn net_cents(commission_earned: Money, cash_collected: Money) -> i64 {
    if commission_earned >= cash_collected {
        i64::try_from(commission_earned.cents() - cash_collected.cents()).unwrap_or(i64::MAX)
    } else {
        -i64::try_from(cash_collected.cents() - commission_earned.cents()).unwrap_or(i64::MAX)
    }
}

/// Computes one member's settlement from their sale records
#[must_use]
pub fn settle<'a>(
    member: &StaffMember,
    sales: impl Iterator<Item = &'a SaleRecord>,
) -> SettlementReport {
    let mut commission_earned = Money::ZERO;
    let mut cash_collected = Money::ZERO;
    for record in sales {
        commission_earned = commission_earned.saturating_add(record.commission);
        cash_collected = cash_collected.saturating_add(record.cash_collected);
    }

    SettlementReport {
        staff_id: member.staff_id,
        staff_name: member.name.clone(),
        commission_earned,
        cash_collected,
        net_cents: net_cents(commission_earned, cash_collected),
        status: member.settlement,
    }
}

/// Settlement report for one staff member, recomputed from ledger state
#[must_use]
pub fn report_for(state: &LedgerState, staff_id: &StaffId) -> Option<SettlementReport> {
    let member = state.staff_member(staff_id)?;
    Some(settle(member, state.sales_for(staff_id)))
}

/// Settlement reports for every staff member, sorted by name
#[must_use]
pub fn report_all(state: &LedgerState) -> Vec<SettlementReport> {
    let mut reports: Vec<SettlementReport> = state
        .staff
        .values()
        .map(|member| settle(member, state.sales_for(&member.staff_id)))
        .collect();
    reports.sort_by(|a, b| a.staff_name.cmp(&b.staff_name));
    reports
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::{
        BuyerInfo, CommissionPlan, IssuedTicket, PaymentMethod, Role, SaleId, SaleItem,
        TicketCode, TierId,
    };
    use chrono::Utc;

    fn member(name: &str) -> StaffMember {
        StaffMember {
            staff_id: StaffId::new(),
            name: name.to_string(),
            role: Role::TeamMember,
            parent: None,
            commission: CommissionPlan::Percentage { basis_points: 1000 },
            active: true,
            settlement: SettlementStatus::Pending,
        }
    }

    fn sale(
        staff_id: StaffId,
        commission: Money,
        cash_collected: Money,
        payment: PaymentMethod,
    ) -> SaleRecord {
        SaleRecord {
            sale_id: SaleId::new(),
            staff_id,
            item: SaleItem::Tier {
                tier_id: TierId::new(),
                unit_price: Money::from_dollars(50),
            },
            quantity: 2,
            payment,
            buyer: BuyerInfo::named("Buyer"),
            commission,
            cash_collected,
            tickets: vec![IssuedTicket {
                code: TicketCode::new("AAAA0001"),
                tier_id: TierId::new(),
                tier_name: "GA".to_string(),
                attendee: "Buyer".to_string(),
            }],
            sold_at: Utc::now(),
        }
    }

    #[test]
    fn empty_sales_settle_to_zero() {
        let member = member("Dana");
        let report = settle(&member, std::iter::empty());
        assert_eq!(report.commission_earned, Money::ZERO);
        assert_eq!(report.cash_collected, Money::ZERO);
        assert_eq!(report.net_cents, 0);
        assert!(!report.organizer_owes_staff());
        assert!(!report.staff_owes_organizer());
    }

    #[test]
    fn cash_sales_leave_staff_owing_the_organizer() {
        let member = member("Dana");
        // Collected $100 in cash, earned $10 commission on it.
        let sales = vec![sale(
            member.staff_id,
            Money::from_dollars(10),
            Money::from_dollars(100),
            PaymentMethod::Cash,
        )];
        let report = settle(&member, sales.iter());
        assert_eq!(report.net_cents, -9_000);
        assert!(report.staff_owes_organizer());
    }

    #[test]
    fn online_sales_leave_the_organizer_owing_staff() {
        let member = member("Dana");
        // No cash touched the seller, commission is still earned.
        let sales = vec![sale(
            member.staff_id,
            Money::from_dollars(10),
            Money::ZERO,
            PaymentMethod::Online,
        )];
        let report = settle(&member, sales.iter());
        assert_eq!(report.net_cents, 1_000);
        assert!(report.organizer_owes_staff());
    }

    #[test]
    fn mixed_sales_net_out() {
        let member = member("Dana");
        let sales = vec![
            sale(
                member.staff_id,
                Money::from_dollars(10),
                Money::from_dollars(100),
                PaymentMethod::Cash,
            ),
            sale(
                member.staff_id,
                Money::from_dollars(25),
                Money::ZERO,
                PaymentMethod::Online,
            ),
        ];
        let report = settle(&member, sales.iter());
        assert_eq!(report.commission_earned, Money::from_dollars(35));
        assert_eq!(report.cash_collected, Money::from_dollars(100));
        assert_eq!(report.net_cents, -6_500);
    }

    #[test]
    fn net_cents_is_symmetric() {
        assert_eq!(net_cents(Money::from_cents(500), Money::from_cents(200)), 300);
        assert_eq!(net_cents(Money::from_cents(200), Money::from_cents(500)), -300);
        assert_eq!(net_cents(Money::ZERO, Money::ZERO), 0);
    }

    #[test]
    fn report_all_sorts_by_name() {
        let mut state = LedgerState::new();
        for name in ["Zoe", "Ari", "Mia"] {
            let m = member(name);
            state.staff.insert(m.staff_id, m);
        }
        let reports = report_all(&state);
        let names: Vec<&str> = reports.iter().map(|r| r.staff_name.as_str()).collect();
        assert_eq!(names, vec!["Ari", "Mia", "Zoe"]);
    }
}
