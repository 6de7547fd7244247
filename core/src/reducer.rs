//! The [`Reducer`] trait, the single home for aggregate business logic.
//!
//! A reducer is a pure function over `(State, Action, Environment)`. It
//! validates commands against current state, applies events, and returns
//! effect descriptions for the runtime to execute. All invariant
//! enforcement (no oversell, no negative balance, no double-scan) lives in
//! `reduce`; nothing outside a reducer mutates aggregate state.

use crate::effect::Effect;
use smallvec::SmallVec;

/// Core abstraction for aggregate business logic.
///
/// # Type Parameters
///
/// - `State`: the domain state this reducer owns
/// - `Action`: the command/event enum this reducer processes
/// - `Environment`: injected dependencies (clock, event store, event bus)
///
/// # Contract
///
/// Replaying a stream of events must rebuild identical state, so event
/// arms take everything they apply from the event payload itself. Command
/// arms read time from the environment's clock and may draw randomness,
/// but whatever they produce is captured in the emitted events. Commands
/// may mutate state *and* emit effects; events only mutate state.
///
/// # Example
///
/// ```ignore
/// impl Reducer for LedgerReducer {
///     type State = LedgerState;
///     type Action = LedgerAction;
///     type Environment = LedgerEnvironment;
///
///     fn reduce(
///         &self,
///         state: &mut LedgerState,
///         action: LedgerAction,
///         env: &LedgerEnvironment,
///     ) -> SmallVec<[Effect<LedgerAction>; 4]> {
///         match action {
///             LedgerAction::AllocateTickets { staff_id, tier_id, quantity } => {
///                 // validate, apply, return append/publish effects
///                 smallvec![Effect::None]
///             }
///             _ => SmallVec::new(),
///         }
///     }
/// }
/// ```
pub trait Reducer {
    /// The state type this reducer operates on
    type State;

    /// The action type this reducer processes
    type Action;

    /// The environment type with injected dependencies
    type Environment;

    /// Process one action: validate, update state in place, describe effects.
    ///
    /// The returned effects are descriptions only; the `Store` runtime
    /// executes them after the state lock is released. An inline capacity of
    /// four covers the common append + publish + delay case without heap
    /// allocation.
    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> SmallVec<[Effect<Self::Action>; 4]>;
}
