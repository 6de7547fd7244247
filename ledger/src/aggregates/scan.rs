//! Scan aggregate: door-side validation of issued tickets.
//!
//! Tickets enter this aggregate through `RegisterTickets`, fed by the event
//! consumer that watches the ledger stream for sales and approved holds. At
//! the door a code is scanned exactly once: the first scan flips the ticket
//! to scanned atomically under the state lock, every later attempt loses the
//! race and reports when the code was first used. Voiding pulls a ticket out
//! of circulation before anyone reaches the gate with it.

use crate::error::LedgerError;
use crate::projections::StagepassEvent;
use crate::types::{IssuedTicket, RequestId, ScanState, Ticket, TicketCode, TicketStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stagepass_core::{
    SmallVec, append_events, effect::Effect, environment::Clock, event_bus::EventBus,
    event_store::EventStore, publish_event, reducer::Reducer, smallvec, stream::StreamId,
};
use stagepass_macros::Action;
use std::sync::Arc;

use super::SCAN_TOPIC;

/// Commands and events for the scan aggregate
#[derive(Action, Clone, Debug, Serialize, Deserialize)]
pub enum ScanAction {
    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------
    /// Make a batch of issued tickets scannable.
    ///
    /// Sent internally when sales and approved holds come off the ledger
    /// stream. Codes already registered are skipped, so redelivery of the
    /// same batch is harmless.
    #[command]
    RegisterTickets {
        /// Tickets to register
        tickets: Vec<IssuedTicket>,
    },

    /// Admit the holder of a ticket code at the door
    #[command]
    ScanTicket {
        /// Correlation id for this dispatch
        request: RequestId,
        /// Code being presented
        code: TicketCode,
    },

    /// Pull a valid ticket out of circulation
    #[command]
    VoidTicket {
        /// Correlation id for this dispatch
        request: RequestId,
        /// Code to void
        code: TicketCode,
    },

    // ------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------
    /// New ticket codes became scannable
    #[event]
    TicketsRegistered {
        /// Tickets registered, already filtered to unseen codes
        tickets: Vec<IssuedTicket>,
        /// When they were registered
        registered_at: DateTime<Utc>,
    },

    /// A ticket was scanned for entry
    #[event]
    TicketScanned {
        /// Code that was scanned
        code: TicketCode,
        /// When it was scanned
        scanned_at: DateTime<Utc>,
    },

    /// A ticket was voided before use
    #[event]
    TicketVoided {
        /// Code that was voided
        code: TicketCode,
        /// When it was voided
        voided_at: DateTime<Utc>,
    },

    /// A command failed validation.
    ///
    /// Transient: recorded in state for the dispatching caller, never
    /// persisted and never published.
    #[event]
    CommandRejected {
        /// Correlation id of the rejected command
        request: RequestId,
        /// Why it was rejected
        error: LedgerError,
    },

    /// An append or publish effect failed after retries
    StorageFailed {
        /// Which operation failed ("append" or "publish")
        operation: String,
        /// The underlying error message
        reason: String,
    },
}

/// Dependencies injected into the scan reducer
#[derive(Clone)]
pub struct ScanEnvironment {
    /// Clock for scan timestamps
    pub clock: Arc<dyn Clock>,
    /// Event store for persisting events
    pub event_store: Arc<dyn EventStore>,
    /// Event bus for publishing events
    pub event_bus: Arc<dyn EventBus>,
    /// Stream this aggregate appends to (`scan-{event_id}`)
    pub stream_id: StreamId,
}

impl ScanEnvironment {
    /// Creates a new scan environment
    #[must_use]
    pub fn new(
        clock: Arc<dyn Clock>,
        event_store: Arc<dyn EventStore>,
        event_bus: Arc<dyn EventBus>,
        stream_id: StreamId,
    ) -> Self {
        Self {
            clock,
            event_store,
            event_bus,
            stream_id,
        }
    }
}

/// Reducer for the scan aggregate
#[derive(Clone, Debug, Default)]
pub struct ScanReducer;

impl ScanReducer {
    /// Creates a new scan reducer
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Records a rejection under the command's correlation id
    fn reject(
        state: &mut ScanState,
        request: RequestId,
        error: LedgerError,
    ) -> SmallVec<[Effect<ScanAction>; 4]> {
        tracing::warn!(
            request = %request,
            category = ?error.category(),
            error = %error,
            "Scan command rejected"
        );
        Self::apply_event(state, &ScanAction::CommandRejected { request, error });
        SmallVec::new()
    }

    /// Builds the append + publish effects for one event
    fn create_effects(
        event: ScanAction,
        env: &ScanEnvironment,
    ) -> SmallVec<[Effect<ScanAction>; 4]> {
        let scan_event = StagepassEvent::Scan(event);
        let Ok(serialized) = scan_event.serialize() else {
            return SmallVec::new();
        };

        smallvec![
            append_events! {
                store: env.event_store,
                stream: env.stream_id.as_str(),
                expected_version: None,
                events: vec![serialized.clone()],
                on_success: |_version| None,
                on_error: |error| Some(ScanAction::StorageFailed {
                    operation: "append".to_string(),
                    reason: error.to_string(),
                })
            },
            publish_event! {
                bus: env.event_bus,
                topic: SCAN_TOPIC,
                event: serialized,
                on_success: || None,
                on_error: |error| Some(ScanAction::StorageFailed {
                    operation: "publish".to_string(),
                    reason: error.to_string(),
                })
            }
        ]
    }

    /// Applies an event to state. Shared by live commands and replay.
    fn apply_event(state: &mut ScanState, action: &ScanAction) {
        match action {
            ScanAction::TicketsRegistered { tickets, .. } => {
                for ticket in tickets {
                    state
                        .tickets
                        .entry(ticket.code.clone())
                        .or_insert_with(|| Ticket::from(ticket.clone()));
                }
            }
            ScanAction::TicketScanned { code, scanned_at } => {
                if let Some(ticket) = state.tickets.get_mut(code) {
                    ticket.status = TicketStatus::Scanned;
                    ticket.scanned_at = Some(*scanned_at);
                }
            }
            ScanAction::TicketVoided { code, .. } => {
                if let Some(ticket) = state.tickets.get_mut(code) {
                    ticket.status = TicketStatus::Void;
                }
            }
            ScanAction::CommandRejected { request, error } => {
                state.rejections.insert(*request, error.clone());
            }
            // Commands carry no state transition of their own.
            _ => {}
        }
    }
}

impl Reducer for ScanReducer {
    type State = ScanState;
    type Action = ScanAction;
    type Environment = ScanEnvironment;

    fn reduce(
        &self,
        state: &mut ScanState,
        action: ScanAction,
        env: &ScanEnvironment,
    ) -> SmallVec<[Effect<ScanAction>; 4]> {
        match action {
            ScanAction::RegisterTickets { tickets } => {
                let unseen: Vec<IssuedTicket> = tickets
                    .into_iter()
                    .filter(|ticket| state.ticket(&ticket.code).is_none())
                    .collect();
                if unseen.is_empty() {
                    return SmallVec::new();
                }
                let event = ScanAction::TicketsRegistered {
                    tickets: unseen,
                    registered_at: env.clock.now(),
                };
                Self::apply_event(state, &event);
                Self::create_effects(event, env)
            }

            ScanAction::ScanTicket { request, code } => {
                let (status, first_scanned_at) = match state.ticket(&code) {
                    Some(ticket) => (ticket.status, ticket.scanned_at),
                    None => {
                        return Self::reject(state, request, LedgerError::TicketNotFound { code });
                    }
                };
                match status {
                    TicketStatus::Void => {
                        return Self::reject(state, request, LedgerError::TicketVoided { code });
                    }
                    TicketStatus::Scanned => {
                        let scanned_at =
                            first_scanned_at.unwrap_or_else(|| env.clock.now());
                        return Self::reject(
                            state,
                            request,
                            LedgerError::AlreadyScanned { code, scanned_at },
                        );
                    }
                    TicketStatus::Valid => {}
                }
                let event = ScanAction::TicketScanned {
                    code,
                    scanned_at: env.clock.now(),
                };
                Self::apply_event(state, &event);
                Self::create_effects(event, env)
            }

            ScanAction::VoidTicket { request, code } => {
                let (status, first_scanned_at) = match state.ticket(&code) {
                    Some(ticket) => (ticket.status, ticket.scanned_at),
                    None => {
                        return Self::reject(state, request, LedgerError::TicketNotFound { code });
                    }
                };
                match status {
                    // Voiding twice lands in the same place; not an error.
                    TicketStatus::Void => return SmallVec::new(),
                    TicketStatus::Scanned => {
                        let scanned_at =
                            first_scanned_at.unwrap_or_else(|| env.clock.now());
                        return Self::reject(
                            state,
                            request,
                            LedgerError::AlreadyScanned { code, scanned_at },
                        );
                    }
                    TicketStatus::Valid => {}
                }
                let event = ScanAction::TicketVoided {
                    code,
                    voided_at: env.clock.now(),
                };
                Self::apply_event(state, &event);
                Self::create_effects(event, env)
            }

            ScanAction::StorageFailed { operation, reason } => {
                tracing::error!(
                    operation = %operation,
                    reason = %reason,
                    "Scan storage effect failed"
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
