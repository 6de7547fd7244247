//! Settlement projection: per-staff money positions built off the event bus.
//!
//! Holds the same numbers `settlement::report_for` recomputes from live
//! state, but maintained incrementally as sale and settlement events arrive,
//! so dashboards can poll it without touching the write path. Rebuildable
//! from scratch by replaying the ledger stream through `handle_event`.

use super::{Projection, StagepassEvent};
use crate::aggregates::LedgerAction;
use crate::settlement::net_cents;
use crate::types::{Money, SettlementStatus, StaffId};
use std::collections::HashMap;

/// One staff member's running settlement position
#[derive(Clone, Debug)]
pub struct StaffSettlementView {
    /// Staff member this view belongs to
    pub staff_id: StaffId,
    /// Display name, filled in when the member is added
    pub staff_name: String,
    /// Commission accumulated across all their sales
    pub commission_earned: Money,
    /// Cash physically collected across all their sales
    pub cash_collected: Money,
    /// Number of sale records counted in
    pub sales_count: u32,
    /// Paid/pending flag from settlement mark events
    pub status: SettlementStatus,
}

impl StaffSettlementView {
    fn new(staff_id: StaffId) -> Self {
        Self {
            staff_id,
            staff_name: String::new(),
            commission_earned: Money::ZERO,
            cash_collected: Money::ZERO,
            sales_count: 0,
            status: SettlementStatus::Pending,
        }
    }

    /// Net position in cents. Positive means the organizer owes the member.
    #[must_use]
    pub fn net_cents(&self) -> i64 {
        net_cents(self.commission_earned, self.cash_collected)
    }

    /// True when the organizer must pay the staff member
    #[must_use]
    pub fn organizer_owes_staff(&self) -> bool {
        self.net_cents() > 0
    }

    fn record_sale(&mut self, commission: Money, cash_collected: Money) {
        self.commission_earned = self.commission_earned.saturating_add(commission);
        self.cash_collected = self.cash_collected.saturating_add(cash_collected);
        self.sales_count += 1;
    }
}

/// Projection tracking every staff member's settlement position.
///
/// # Query Examples
///
/// ```rust,ignore
/// let view = projection.view(&staff_id);
/// println!("net: {} cents", view.map_or(0, StaffSettlementView::net_cents));
/// ```
#[derive(Default)]
pub struct SettlementProjection {
    /// Views indexed by staff member
    views: HashMap<StaffId, StaffSettlementView>,
}

impl SettlementProjection {
    /// Creates an empty settlement projection
    #[must_use]
    pub fn new() -> Self {
        Self {
            views: HashMap::new(),
        }
    }

    /// The view for one staff member, if any event mentioned them yet
    #[must_use]
    pub fn view(&self, staff_id: &StaffId) -> Option<&StaffSettlementView> {
        self.views.get(staff_id)
    }

    /// All views sorted by staff name
    #[must_use]
    pub fn views(&self) -> Vec<&StaffSettlementView> {
        let mut views: Vec<&StaffSettlementView> = self.views.values().collect();
        views.sort_by(|a, b| a.staff_name.cmp(&b.staff_name));
        views
    }

    /// Commission owed across the whole team
    #[must_use]
    pub fn total_commission(&self) -> Money {
        self.views
            .values()
            .fold(Money::ZERO, |total, view| {
                total.saturating_add(view.commission_earned)
            })
    }

    /// Cash held by staff across the whole team
    #[must_use]
    pub fn total_cash_collected(&self) -> Money {
        self.views
            .values()
            .fold(Money::ZERO, |total, view| {
                total.saturating_add(view.cash_collected)
            })
    }

    fn view_mut(&mut self, staff_id: StaffId) -> &mut StaffSettlementView {
        self.views
            .entry(staff_id)
            .or_insert_with(|| StaffSettlementView::new(staff_id))
    }
}

impl Projection for SettlementProjection {
    fn handle_event(&mut self, event: &StagepassEvent) -> Result<(), String> {
        match event {
            StagepassEvent::Ledger(LedgerAction::StaffAdded { staff_id, name, .. }) => {
                let view = self.view_mut(*staff_id);
                view.staff_name.clone_from(name);
                Ok(())
            }

            StagepassEvent::Ledger(LedgerAction::SaleRecorded {
                staff_id,
                commission,
                cash_collected,
                ..
            }) => {
                self.view_mut(*staff_id)
                    .record_sale(*commission, *cash_collected);
                Ok(())
            }

            StagepassEvent::Ledger(LedgerAction::BundleSold {
                staff_id,
                commission,
                cash_collected,
                ..
            }) => {
                self.view_mut(*staff_id)
                    .record_sale(*commission, *cash_collected);
                Ok(())
            }

            StagepassEvent::Ledger(LedgerAction::SettlementMarkedPaid {
                staff_id,
                paid_at,
            }) => {
                self.view_mut(*staff_id).status =
                    SettlementStatus::Paid { paid_at: *paid_at };
                Ok(())
            }

            StagepassEvent::Ledger(LedgerAction::SettlementMarkedPending { staff_id }) => {
                self.view_mut(*staff_id).status = SettlementStatus::Pending;
                Ok(())
            }

            // Other events carry no settlement information.
            _ => Ok(()),
        }
    }

    fn name(&self) -> &'static str {
        "SettlementProjection"
    }

    fn reset(&mut self) {
        self.views.clear();
    }
}
