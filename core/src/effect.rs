//! Effect descriptions returned by reducers.
//!
//! Effects are values, not executions: a reducer describes what should
//! happen (append these events, publish to this topic, dispatch this action
//! in thirty minutes) and the `Store` runtime performs the work on its own
//! tasks after the state lock is released. This keeps reducers pure and
//! makes every side effect assertable in tests.
//!
//! The event-store and event-bus variants carry completion callbacks that
//! translate infrastructure outcomes back into domain actions, closing the
//! feedback loop without the reducer ever touching I/O.

use crate::event::SerializedEvent;
use crate::event_bus::{EventBus, EventBusError};
use crate::event_store::{EventStore, EventStoreError};
use crate::stream::{StreamId, Version};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

/// Callback invoked with the outcome of an infrastructure operation.
///
/// Returning `Some(action)` feeds that action back into the reducer;
/// `None` ends the chain.
pub type OperationCallback<In, Action> = Box<dyn FnOnce(In) -> Option<Action> + Send>;

/// A description of a side effect to be executed by the runtime.
///
/// Effects are NOT executed when constructed. Reducers return them and the
/// `Store` runtime interprets them, feeding any produced actions back
/// through `reduce`.
pub enum Effect<Action> {
    /// No-op effect
    None,

    /// Run the contained effects concurrently
    Parallel(Vec<Effect<Action>>),

    /// Run the contained effects one after another, each waiting for the
    /// previous to complete
    Sequential(Vec<Effect<Action>>),

    /// Dispatch an action after a delay (timeouts, hold/transfer expiry)
    Delay {
        /// How long to wait
        duration: Duration,
        /// Action to dispatch after the delay
        action: Box<Action>,
    },

    /// Arbitrary async computation
    ///
    /// Returns `Option<Action>`; if `Some`, the action is fed back into
    /// the reducer.
    Future(Pin<Box<dyn Future<Output = Option<Action>> + Send>>),

    /// An event-store operation (append, load, snapshot) with completion
    /// callbacks. Usually constructed via the [`append_events!`] and
    /// [`load_events!`] macros.
    ///
    /// [`append_events!`]: crate::append_events
    /// [`load_events!`]: crate::load_events
    EventStore(EventStoreOperation<Action>),

    /// An event-bus publication with completion callbacks. Usually
    /// constructed via the [`publish_event!`] macro.
    ///
    /// [`publish_event!`]: crate::publish_event
    PublishEvent(EventBusOperation<Action>),
}

/// Event-store operations an effect can describe.
///
/// Each operation captures the store handle it runs against plus
/// `on_success`/`on_error` callbacks producing follow-up actions. The
/// runtime applies its retry policy to these operations before invoking
/// the callbacks.
pub enum EventStoreOperation<Action> {
    /// Append events to a stream with optimistic concurrency control.
    AppendEvents {
        /// Store to append to
        event_store: Arc<dyn EventStore>,
        /// Target stream
        stream_id: StreamId,
        /// Expected current version (`None` skips the check)
        expected_version: Option<Version>,
        /// Events to persist
        events: Vec<SerializedEvent>,
        /// Called with the new stream version on success
        on_success: OperationCallback<Version, Action>,
        /// Called with the store error on failure
        on_error: OperationCallback<EventStoreError, Action>,
    },

    /// Load events from a stream.
    LoadEvents {
        /// Store to read from
        event_store: Arc<dyn EventStore>,
        /// Source stream
        stream_id: StreamId,
        /// Starting version (`None` loads from the beginning)
        from_version: Option<Version>,
        /// Called with the loaded events on success
        on_success: OperationCallback<Vec<SerializedEvent>, Action>,
        /// Called with the store error on failure
        on_error: OperationCallback<EventStoreError, Action>,
    },

    /// Save a state snapshot for a stream.
    SaveSnapshot {
        /// Store to write to
        event_store: Arc<dyn EventStore>,
        /// Stream the snapshot belongs to
        stream_id: StreamId,
        /// Stream version captured by the snapshot
        version: Version,
        /// Serialized aggregate state
        state: Vec<u8>,
        /// Called on success
        on_success: OperationCallback<(), Action>,
        /// Called with the store error on failure
        on_error: OperationCallback<EventStoreError, Action>,
    },

    /// Load the latest snapshot for a stream.
    LoadSnapshot {
        /// Store to read from
        event_store: Arc<dyn EventStore>,
        /// Stream to load the snapshot for
        stream_id: StreamId,
        /// Called with `Some((version, state))` or `None` on success
        on_success: OperationCallback<Option<(Version, Vec<u8>)>, Action>,
        /// Called with the store error on failure
        on_error: OperationCallback<EventStoreError, Action>,
    },
}

/// Event-bus operations an effect can describe.
pub enum EventBusOperation<Action> {
    /// Publish one serialized event to a topic.
    Publish {
        /// Bus to publish on
        event_bus: Arc<dyn EventBus>,
        /// Destination topic
        topic: String,
        /// Event to publish
        event: SerializedEvent,
        /// Called on successful publication
        on_success: OperationCallback<(), Action>,
        /// Called with the bus error on failure
        on_error: OperationCallback<EventBusError, Action>,
    },
}

// Manual Debug implementations: futures and callbacks are opaque.

impl<Action> std::fmt::Debug for Effect<Action>
where
    Action: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Effect::None => write!(f, "Effect::None"),
            Effect::Parallel(effects) => f.debug_tuple("Effect::Parallel").field(effects).finish(),
            Effect::Sequential(effects) => {
                f.debug_tuple("Effect::Sequential").field(effects).finish()
            },
            Effect::Delay { duration, action } => f
                .debug_struct("Effect::Delay")
                .field("duration", duration)
                .field("action", action)
                .finish(),
            Effect::Future(_) => write!(f, "Effect::Future(<future>)"),
            Effect::EventStore(op) => f.debug_tuple("Effect::EventStore").field(op).finish(),
            Effect::PublishEvent(op) => f.debug_tuple("Effect::PublishEvent").field(op).finish(),
        }
    }
}

impl<Action> std::fmt::Debug for EventStoreOperation<Action> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventStoreOperation::AppendEvents {
                stream_id,
                expected_version,
                events,
                ..
            } => f
                .debug_struct("AppendEvents")
                .field("stream_id", stream_id)
                .field("expected_version", expected_version)
                .field("event_count", &events.len())
                .finish_non_exhaustive(),
            EventStoreOperation::LoadEvents {
                stream_id,
                from_version,
                ..
            } => f
                .debug_struct("LoadEvents")
                .field("stream_id", stream_id)
                .field("from_version", from_version)
                .finish_non_exhaustive(),
            EventStoreOperation::SaveSnapshot {
                stream_id, version, ..
            } => f
                .debug_struct("SaveSnapshot")
                .field("stream_id", stream_id)
                .field("version", version)
                .finish_non_exhaustive(),
            EventStoreOperation::LoadSnapshot { stream_id, .. } => f
                .debug_struct("LoadSnapshot")
                .field("stream_id", stream_id)
                .finish_non_exhaustive(),
        }
    }
}

impl<Action> std::fmt::Debug for EventBusOperation<Action> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventBusOperation::Publish { topic, event, .. } => f
                .debug_struct("Publish")
                .field("topic", topic)
                .field("event_type", &event.event_type)
                .finish_non_exhaustive(),
        }
    }
}

impl<Action> Effect<Action> {
    /// Combine effects to run in parallel
    #[must_use]
    pub const fn merge(effects: Vec<Effect<Action>>) -> Effect<Action> {
        Effect::Parallel(effects)
    }

    /// Chain effects to run sequentially
    #[must_use]
    pub const fn chain(effects: Vec<Effect<Action>>) -> Effect<Action> {
        Effect::Sequential(effects)
    }
}
