//! Event trait and wire types for event sourcing.
//!
//! Events are immutable facts: an allocation was granted, a transfer was
//! accepted, a ticket was scanned. Aggregates append them to streams and
//! rebuild state by replaying them.
//!
//! # Serialization
//!
//! Event payloads are `bincode` on the wire: compact and fast, at the cost
//! of not being human-readable in storage. Envelope metadata (correlation
//! ids, acting user) rides alongside as JSON so operational tooling can
//! still filter streams without decoding payloads.
//!
//! # Example
//!
//! ```
//! use stagepass_core::event::Event;
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Clone, Debug, Serialize, Deserialize)]
//! enum AllocationEvent {
//!     TicketsAllocated { staff_id: String, quantity: u32 },
//! }
//!
//! impl Event for AllocationEvent {
//!     fn event_type(&self) -> &'static str {
//!         match self {
//!             AllocationEvent::TicketsAllocated { .. } => "TicketsAllocated.v1",
//!         }
//!     }
//! }
//! ```

use serde::{Serialize, de::DeserializeOwned};
use std::fmt;
use thiserror::Error;

/// Errors raised while encoding or decoding events.
#[derive(Error, Debug)]
pub enum EventError {
    /// The event payload could not be serialized.
    #[error("Failed to serialize event: {0}")]
    SerializationError(String),

    /// The stored bytes could not be deserialized.
    #[error("Failed to deserialize event: {0}")]
    DeserializationError(String),

    /// A stored event carries a type name no deserializer claims.
    #[error("Unknown event type: {0}")]
    UnknownEventType(String),
}

/// An event that can be stored in an event store and replayed to
/// reconstruct state.
///
/// # Event Naming Convention
///
/// `event_type()` returns a stable identifier with a version suffix so
/// schemas can evolve: `"TicketsAllocated.v1"`, `"TicketScanned.v1"`,
/// `"TransferAccepted.v2"` after a schema change. The `#[derive(Action)]`
/// macro generates these names for `#[event]` variants.
///
/// # Thread Safety
///
/// Events must be `Send + Sync + 'static` to cross task boundaries in the
/// runtime and live in the event store.
pub trait Event: Send + Sync + 'static {
    /// Returns the stable, versioned event type identifier.
    fn event_type(&self) -> &'static str;

    /// Serialize this event to bincode bytes.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::SerializationError`] if the payload cannot be
    /// serialized; rare with bincode but possible with unsupported types.
    fn to_bytes(&self) -> Result<Vec<u8>, EventError>
    where
        Self: Serialize,
    {
        bincode::serialize(self).map_err(|e| EventError::SerializationError(e.to_string()))
    }

    /// Deserialize an event from bincode bytes.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::DeserializationError`] if the bytes are
    /// corrupted, belong to a different event type, or the schema changed
    /// incompatibly.
    fn from_bytes(bytes: &[u8]) -> Result<Self, EventError>
    where
        Self: DeserializeOwned + Sized,
    {
        bincode::deserialize(bytes).map_err(|e| EventError::DeserializationError(e.to_string()))
    }
}

/// A serialized event ready for storage or publication.
///
/// The wire format between aggregates, the event store, and the event bus:
/// versioned type name, bincode payload, optional JSON metadata.
#[derive(Clone, Debug)]
pub struct SerializedEvent {
    /// The event type identifier (e.g., `"TicketsAllocated.v1"`).
    pub event_type: String,

    /// The bincode payload.
    pub data: Vec<u8>,

    /// Optional metadata.
    ///
    /// Common fields: `correlation_id` (links a command to its outcome
    /// events), `acting_staff_id` (who triggered the mutation, kept for
    /// authorization audit), `timestamp`.
    pub metadata: Option<serde_json::Value>,
}

impl SerializedEvent {
    /// Create a new serialized event.
    #[must_use]
    pub const fn new(
        event_type: String,
        data: Vec<u8>,
        metadata: Option<serde_json::Value>,
    ) -> Self {
        Self {
            event_type,
            data,
            metadata,
        }
    }

    /// Create a serialized event from an [`Event`] value.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::SerializationError`] if the event cannot be
    /// serialized.
    ///
    /// # Examples
    ///
    /// ```
    /// use stagepass_core::event::{Event, SerializedEvent};
    /// # use serde::{Serialize, Deserialize};
    /// # #[derive(Clone, Debug, Serialize, Deserialize)]
    /// # enum ScanEvent {
    /// #     TicketScanned { code: String },
    /// # }
    /// # impl Event for ScanEvent {
    /// #     fn event_type(&self) -> &'static str { "TicketScanned.v1" }
    /// # }
    ///
    /// let event = ScanEvent::TicketScanned {
    ///     code: "FRI-7K2M9Q".to_string(),
    /// };
    ///
    /// let serialized = SerializedEvent::from_event(&event, None).unwrap();
    /// assert_eq!(serialized.event_type, "TicketScanned.v1");
    /// ```
    pub fn from_event<E: Event + Serialize>(
        event: &E,
        metadata: Option<serde_json::Value>,
    ) -> Result<Self, EventError> {
        Ok(Self {
            event_type: event.event_type().to_string(),
            data: event.to_bytes()?,
            metadata,
        })
    }
}

impl fmt::Display for SerializedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SerializedEvent {{ type: {}, size: {} bytes }}",
            self.event_type,
            self.data.len()
        )
    }
}
