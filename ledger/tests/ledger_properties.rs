//! Conservation properties of the ledger reducer.
//!
//! Drives the reducer directly with randomized operation sequences, mixing
//! valid commands with ones that must be rejected, and checks the accounting
//! identities after every step: each allocation row balances, tier claims
//! never exceed the printed quantity, pending transfers account for every
//! debited ticket, and rejected commands (other than lazy expiry) leave the
//! books untouched.
//!
//! Run with: `cargo test --test ledger_properties`

#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::panic)]

use proptest::prelude::*;
use stagepass_core::environment::Clock;
use stagepass_core::reducer::Reducer;
use stagepass_core::stream::StreamId;
use stagepass_ledger::{
    BundleId, BundleRequirement, BuyerInfo, CommissionPlan, HoldId, HoldItem, LedgerAction,
    LedgerConfig, LedgerEnvironment, LedgerError, LedgerReducer, LedgerState, Money,
    PaymentMethod, RequestId, Role, SaleId, SaleItem, StaffId, TierId, TransferId,
};
use stagepass_testing::mocks::{InMemoryEventBus, InMemoryEventStore, SteppingClock, test_clock};
use std::sync::Arc;

const STAFF: usize = 3;
const TIERS: usize = 2;
const PRINTED: u32 = 12;

/// One randomized step against the ledger.
///
/// Indices select from the fixture's fixed staff and tier universe; open
/// transfers and holds are tracked by the fixture so resolution ops can
/// target something real. Quantities start at zero so validation rejections
/// stay in the mix.
#[derive(Debug, Clone)]
enum Op {
    Allocate { staff: usize, tier: usize, quantity: u32 },
    RequestTransfer { from: usize, to: usize, tier: usize, quantity: u32 },
    ResolveTransfer { actor: usize, accept: bool },
    RecordSale { staff: usize, tier: usize, quantity: u32, cash: bool },
    SellBundle { staff: usize },
    CreateHold { tier: usize, quantity: u32 },
    ApproveHold { staff: usize },
    CancelHold,
    Deactivate { staff: usize },
    Advance { minutes: i64 },
    Sweep,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0..STAFF, 0..TIERS, 0u32..6)
            .prop_map(|(staff, tier, quantity)| Op::Allocate { staff, tier, quantity }),
        2 => (0..STAFF, 0..STAFF, 0..TIERS, 0u32..6)
            .prop_map(|(from, to, tier, quantity)| Op::RequestTransfer { from, to, tier, quantity }),
        2 => (0..STAFF, any::<bool>())
            .prop_map(|(actor, accept)| Op::ResolveTransfer { actor, accept }),
        3 => (0..STAFF, 0..TIERS, 0u32..6, any::<bool>())
            .prop_map(|(staff, tier, quantity, cash)| Op::RecordSale { staff, tier, quantity, cash }),
        1 => (0..STAFF).prop_map(|staff| Op::SellBundle { staff }),
        2 => (0..TIERS, 0u32..4)
            .prop_map(|(tier, quantity)| Op::CreateHold { tier, quantity }),
        1 => (0..STAFF).prop_map(|staff| Op::ApproveHold { staff }),
        1 => Just(Op::CancelHold),
        1 => (0..STAFF).prop_map(|staff| Op::Deactivate { staff }),
        2 => (5i64..3000).prop_map(|minutes| Op::Advance { minutes }),
        2 => Just(Op::Sweep),
    ]
}

struct Fixture {
    reducer: LedgerReducer,
    env: LedgerEnvironment,
    clock: Arc<SteppingClock>,
    state: LedgerState,
    staff: Vec<StaffId>,
    tiers: Vec<TierId>,
    bundle: BundleId,
    open_transfers: Vec<TransferId>,
    open_holds: Vec<HoldId>,
}

/// Two 12-ticket tiers, an organizer, a 10% seller, a flat-rate associate,
/// and a two-tier bundle.
fn setup() -> Fixture {
    let clock = Arc::new(SteppingClock::starting_at(test_clock().now()));
    let env = LedgerEnvironment::new(
        clock.clone(),
        Arc::new(InMemoryEventStore::new()),
        Arc::new(InMemoryEventBus::new()),
        StreamId::new("ledger-prop-event"),
        LedgerConfig::default(),
    );
    let mut fixture = Fixture {
        reducer: LedgerReducer::new(),
        env,
        clock,
        state: LedgerState::new(),
        staff: vec![StaffId::new(), StaffId::new(), StaffId::new()],
        tiers: vec![TierId::new(), TierId::new()],
        bundle: BundleId::new(),
        open_transfers: Vec::new(),
        open_holds: Vec::new(),
    };

    for (index, (name, price)) in [("Friday GA", 40), ("Saturday GA", 45)].iter().enumerate() {
        fixture.dispatch(LedgerAction::RegisterTier {
            request: RequestId::new(),
            tier_id: fixture.tiers[index],
            name: (*name).to_string(),
            price: Money::from_dollars(*price),
            printed_quantity: PRINTED,
        });
    }
    fixture.dispatch(LedgerAction::AddStaff {
        request: RequestId::new(),
        staff_id: fixture.staff[0],
        name: "Dana".to_string(),
        role: Role::Organizer,
        parent: None,
        commission: CommissionPlan::Percentage { basis_points: 0 },
    });
    fixture.dispatch(LedgerAction::AddStaff {
        request: RequestId::new(),
        staff_id: fixture.staff[1],
        name: "Mara".to_string(),
        role: Role::TeamMember,
        parent: None,
        commission: CommissionPlan::Percentage { basis_points: 1000 },
    });
    fixture.dispatch(LedgerAction::AddStaff {
        request: RequestId::new(),
        staff_id: fixture.staff[2],
        name: "Iris".to_string(),
        role: Role::Associate,
        parent: Some(fixture.staff[1]),
        commission: CommissionPlan::Fixed {
            per_ticket: Money::from_dollars(5),
        },
    });
    fixture.dispatch(LedgerAction::DefineBundle {
        request: RequestId::new(),
        bundle_id: fixture.bundle,
        name: "Weekend Pass".to_string(),
        price: Money::from_dollars(75),
        required: vec![
            BundleRequirement {
                tier_id: fixture.tiers[0],
                quantity: 1,
            },
            BundleRequirement {
                tier_id: fixture.tiers[1],
                quantity: 1,
            },
        ],
        total_quantity: 4,
    });

    assert_eq!(fixture.state.tiers.len(), TIERS, "setup tiers failed");
    assert_eq!(fixture.state.staff.len(), STAFF, "setup staff failed");
    assert_eq!(fixture.state.bundles.len(), 1, "setup bundle failed");
    fixture
}

impl Fixture {
    fn dispatch(&mut self, action: LedgerAction) {
        let _ = self.reducer.reduce(&mut self.state, action, &self.env);
    }

    /// Applies one op. Returns the request id for command ops, so the caller
    /// can look up whether the command was rejected.
    fn apply(&mut self, op: &Op) -> Option<RequestId> {
        let request = RequestId::new();
        match *op {
            Op::Allocate {
                staff,
                tier,
                quantity,
            } => {
                self.dispatch(LedgerAction::AllocateTickets {
                    request,
                    staff_id: self.staff[staff],
                    tier_id: self.tiers[tier],
                    quantity,
                });
            }
            Op::RequestTransfer {
                from,
                to,
                tier,
                quantity,
            } => {
                let transfer_id = TransferId::new();
                self.dispatch(LedgerAction::RequestTransfer {
                    request,
                    transfer_id,
                    from: self.staff[from],
                    to: self.staff[to],
                    tier_id: self.tiers[tier],
                    quantity,
                    note: None,
                });
                if self.state.transfer(&transfer_id).is_some() {
                    self.open_transfers.push(transfer_id);
                }
            }
            Op::ResolveTransfer { actor, accept } => {
                if self.open_transfers.is_empty() {
                    return None;
                }
                let transfer_id = self
                    .open_transfers
                    .remove(actor % self.open_transfers.len());
                let acting_staff = self.staff[actor];
                if accept {
                    self.dispatch(LedgerAction::AcceptTransfer {
                        request,
                        transfer_id,
                        acting_staff,
                    });
                } else {
                    self.dispatch(LedgerAction::RejectTransfer {
                        request,
                        transfer_id,
                        acting_staff,
                    });
                }
            }
            Op::RecordSale {
                staff,
                tier,
                quantity,
                cash,
            } => {
                self.dispatch(LedgerAction::RecordSale {
                    request,
                    sale_id: SaleId::new(),
                    staff_id: self.staff[staff],
                    tier_id: self.tiers[tier],
                    quantity,
                    buyer: BuyerInfo::named("Walk-up"),
                    payment: if cash {
                        PaymentMethod::Cash
                    } else {
                        PaymentMethod::Credit
                    },
                });
            }
            Op::SellBundle { staff } => {
                self.dispatch(LedgerAction::SellBundle {
                    request,
                    sale_id: SaleId::new(),
                    staff_id: self.staff[staff],
                    bundle_id: self.bundle,
                    buyer: BuyerInfo::named("Weekend buyer"),
                    payment: PaymentMethod::Cash,
                });
            }
            Op::CreateHold { tier, quantity } => {
                let hold_id = HoldId::new();
                self.dispatch(LedgerAction::CreateHold {
                    request,
                    hold_id,
                    buyer: BuyerInfo::named("Walk-up"),
                    items: vec![HoldItem {
                        tier_id: self.tiers[tier],
                        quantity,
                    }],
                    hold_minutes: 30,
                });
                if self.state.hold(&hold_id).is_some() {
                    self.open_holds.push(hold_id);
                }
            }
            Op::ApproveHold { staff } => {
                if self.open_holds.is_empty() {
                    return None;
                }
                let hold_id = self.open_holds.remove(0);
                self.dispatch(LedgerAction::ApproveHold {
                    request,
                    hold_id,
                    staff_id: self.staff[staff],
                });
            }
            Op::CancelHold => {
                if self.open_holds.is_empty() {
                    return None;
                }
                let hold_id = self.open_holds.remove(0);
                self.dispatch(LedgerAction::CancelHold { request, hold_id });
            }
            Op::Deactivate { staff } => {
                self.dispatch(LedgerAction::DeactivateStaff {
                    request,
                    staff_id: self.staff[staff],
                });
            }
            Op::Advance { minutes } => {
                self.clock.advance(chrono::Duration::minutes(minutes));
                return None;
            }
            Op::Sweep => {
                self.dispatch(LedgerAction::SweepExpired);
                return None;
            }
        }
        Some(request)
    }
}

/// The accounting identities that must hold after every single op.
fn check_conservation(state: &LedgerState) -> Result<(), TestCaseError> {
    for row in state.allocations.values() {
        prop_assert!(row.is_balanced(), "allocation row out of balance: {:?}", row);
    }

    for (tier_id, tier) in &state.tiers {
        let claimed: u32 = state
            .allocations
            .values()
            .filter(|row| row.tier_id == *tier_id)
            .map(|row| row.allocated_total)
            .sum();
        prop_assert_eq!(claimed, tier.allocated_total, "tier allocation total drifted");
        prop_assert!(
            tier.allocated_total + tier.hold_reserved + tier.pool_sold <= tier.printed_quantity,
            "tier {} claims exceed the printed quantity: {:?}",
            &tier.name,
            tier
        );

        // Every ticket debited by a pending transfer is still accounted for.
        let in_flight: u32 = state
            .transfers
            .values()
            .filter(|transfer| transfer.tier_id == *tier_id && transfer.is_pending())
            .map(|transfer| transfer.quantity)
            .sum();
        let held_and_sold: u32 = state
            .allocations
            .values()
            .filter(|row| row.tier_id == *tier_id)
            .map(|row| row.held + row.sold)
            .sum();
        prop_assert_eq!(
            held_and_sold + in_flight,
            tier.allocated_total,
            "tickets leaked between allocations and transfers"
        );

        let reserved: u32 = state
            .holds
            .values()
            .filter(|hold| hold.is_active())
            .flat_map(|hold| hold.items.iter())
            .filter(|item| item.tier_id == *tier_id)
            .map(|item| item.quantity)
            .sum();
        prop_assert_eq!(reserved, tier.hold_reserved, "hold reservation drifted");
    }

    for (bundle_id, bundle) in &state.bundles {
        let sold = state
            .sales
            .iter()
            .filter(|sale| {
                matches!(&sale.item, SaleItem::Bundle { bundle_id: b, .. } if b == bundle_id)
            })
            .count();
        prop_assert_eq!(u32::try_from(sold).unwrap(), bundle.sold, "bundle sold count drifted");
        prop_assert!(bundle.sold <= bundle.total_quantity, "bundle oversold");
    }

    let issued: usize = state
        .sales
        .iter()
        .map(|sale| sale.tickets.len())
        .sum::<usize>()
        + state
            .holds
            .values()
            .map(|hold| hold.tickets.len())
            .sum::<usize>();
    prop_assert_eq!(issued, state.issued_codes.len(), "ticket codes leaked or collided");

    Ok(())
}

proptest! {
    /// The books balance after every op in any interleaving of valid and
    /// invalid commands, clock jumps, and sweeps.
    #[test]
    fn random_interleavings_preserve_ticket_conservation(
        ops in proptest::collection::vec(op_strategy(), 1..60),
    ) {
        let mut fixture = setup();

        for op in &ops {
            let before = fixture.state.clone();
            let request = fixture.apply(op);
            check_conservation(&fixture.state)?;

            // A rejected command must not move money. Lazy expiry is the one
            // exception: touching an overdue transfer or hold resolves it and
            // then rejects the touching command.
            if let Some(request) = request {
                if let Some(error) = fixture.state.rejection_for(&request) {
                    let lazy_expiry = matches!(
                        error,
                        LedgerError::TransferExpired { .. } | LedgerError::HoldExpired { .. }
                    );
                    if !lazy_expiry {
                        prop_assert_eq!(&fixture.state.tiers, &before.tiers);
                        prop_assert_eq!(&fixture.state.allocations, &before.allocations);
                        prop_assert_eq!(&fixture.state.transfers, &before.transfers);
                        prop_assert_eq!(&fixture.state.holds, &before.holds);
                        prop_assert_eq!(&fixture.state.sales, &before.sales);
                        prop_assert_eq!(&fixture.state.bundles, &before.bundles);
                        prop_assert_eq!(&fixture.state.staff, &before.staff);
                        prop_assert_eq!(&fixture.state.issued_codes, &before.issued_codes);
                    }
                }
            }
        }
    }

    /// Once a sweep has run, running it again with the clock unchanged finds
    /// nothing to expire.
    #[test]
    fn a_second_sweep_is_a_no_op(
        ops in proptest::collection::vec(op_strategy(), 1..40),
        minutes in 1i64..4000,
    ) {
        let mut fixture = setup();
        for op in &ops {
            fixture.apply(op);
        }
        fixture.clock.advance(chrono::Duration::minutes(minutes));

        fixture.apply(&Op::Sweep);
        let settled = fixture.state.clone();
        fixture.apply(&Op::Sweep);

        prop_assert_eq!(&fixture.state.tiers, &settled.tiers);
        prop_assert_eq!(&fixture.state.allocations, &settled.allocations);
        prop_assert_eq!(&fixture.state.transfers, &settled.transfers);
        prop_assert_eq!(&fixture.state.holds, &settled.holds);
    }

    /// A percentage commission can never exceed what the buyer paid.
    #[test]
    fn percentage_commission_never_exceeds_the_sale_total(
        basis_points in 0u32..=10_000,
        quantity in 1u32..50,
        price_cents in 1u64..100_000,
    ) {
        let unit_price = Money::from_cents(price_cents);
        let plan = CommissionPlan::Percentage { basis_points };
        let commission = plan.commission_for(quantity, unit_price).unwrap();
        let total = unit_price.checked_multiply(quantity).unwrap();
        prop_assert!(commission <= total);
        if basis_points == 10_000 {
            prop_assert_eq!(commission, total);
        }
    }
}
