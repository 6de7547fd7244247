//! # Stagepass Testing
//!
//! Testing utilities for Stagepass aggregates and read models.
//!
//! This crate provides:
//! - In-memory implementations of the event store and event bus
//! - Deterministic clocks for expiry and deadline tests
//! - A fluent Given-When-Then harness for reducer tests
//! - Effect assertion helpers
//!
//! ## Example
//!
//! ```ignore
//! use stagepass_testing::{ReducerTest, assertions};
//!
//! ReducerTest::new(LedgerReducer)
//!     .with_env(test_environment())
//!     .given_state(ledger_with_allocation(40))
//!     .when_action(LedgerAction::RecordSale {
//!         sale_id,
//!         staff_id,
//!         tier_id,
//!         quantity: 2,
//!         payment_method: PaymentMethod::Cash,
//!     })
//!     .then_state(|state| {
//!         assert_eq!(state.balance(&staff_id, &tier_id).sold, 2);
//!     })
//!     .then_effects(|effects| {
//!         assertions::assert_has_event_store_effect(effects);
//!         assertions::assert_has_publish_event_effect(effects);
//!     })
//!     .run();
//! ```

pub mod mocks;

// Re-export commonly used items
pub use mocks::{FixedClock, InMemoryEventBus, InMemoryEventStore, SteppingClock, test_clock};
pub use reducer_test::{ReducerTest, assertions};

/// Initialize tracing for tests.
///
/// Installs a subscriber that writes to the test framework's captured
/// output and respects `RUST_LOG`. Safe to call from every test; only the
/// first call installs.
pub fn init_test_tracing() {
    use tracing_subscriber::EnvFilter;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
