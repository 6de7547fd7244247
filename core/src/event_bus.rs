//! Event bus abstraction for cross-aggregate communication.
//!
//! Events flow from the event store (source of truth) through the bus to
//! everything that reacts to them: the scan register learns about tickets
//! the ledger materialized, and the settlement read model tallies sale
//! records as they happen.
//!
//! ```text
//! ┌─────────────┐
//! │   Command   │
//! └──────┬──────┘
//!        │
//!        ▼
//! ┌─────────────────┐
//! │    Reducer      │
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │  1. Append to   │
//! │   event store   │◄─── Source of truth
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ 2. Publish to   │
//! │    event bus    │◄─── At-least-once delivery
//! └────────┬────────┘
//!          │
//!     ┌────┴─────┐
//!     ▼          ▼
//! ┌────────┐ ┌────────────┐
//! │  Scan  │ │ Settlement │
//! │ register│ │ projection │
//! └────────┘ └────────────┘
//! ```
//!
//! # Key Principles
//!
//! - **Store first**: events are persisted before they are published
//! - **At-least-once**: subscribers may see duplicates and must be
//!   idempotent (registering the same ticket twice is a no-op)
//! - **Ordered within a stream**: events from one aggregate keep their
//!   order
//!
//! # Topic Naming Convention
//!
//! Topics follow `{aggregate-type}-events`: `ledger-events`,
//! `scan-events`.

use crate::event::SerializedEvent;
use futures::Stream;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur during event bus operations.
#[derive(Error, Debug, Clone)]
pub enum EventBusError {
    /// Failed to connect to the event bus
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to publish an event to a topic
    #[error("Publish failed for topic '{topic}': {reason}")]
    PublishFailed {
        /// The topic that failed
        topic: String,
        /// The reason for failure
        reason: String,
    },

    /// Failed to subscribe to topics
    #[error("Subscription failed for topics {topics:?}: {reason}")]
    SubscriptionFailed {
        /// The topics that failed to subscribe
        topics: Vec<String>,
        /// The reason for failure
        reason: String,
    },

    /// Failed to deserialize an event
    #[error("Deserialization failed: {0}")]
    DeserializationFailed(String),

    /// Topic not found or invalid
    #[error("Invalid topic: {0}")]
    InvalidTopic(String),

    /// Network or transport error
    #[error("Transport error: {0}")]
    TransportError(String),

    /// Generic error for other failures
    #[error("Event bus error: {0}")]
    Other(String),
}

/// Stream of events from subscriptions.
///
/// An asynchronous stream of [`SerializedEvent`] values; each item is a
/// `Result` so transport errors surface in-band without tearing down the
/// subscription.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<SerializedEvent, EventBusError>> + Send>>;

/// Publish/subscribe transport between aggregates and read models.
///
/// # Design Principles
///
/// - Async-first, non-blocking I/O
/// - At-least-once delivery; subscribers handle duplicates
/// - Ordered delivery within one aggregate's events
///
/// # Dyn Compatibility
///
/// Methods return explicit `Pin<Box<dyn Future>>` rather than `async fn`
/// so the trait stays object-safe: effects capture `Arc<dyn EventBus>` and
/// the runtime drives the operation without knowing the concrete bus.
///
/// # Example
///
/// ```rust,ignore
/// use futures::StreamExt;
///
/// // Publish after the store append succeeded
/// event_bus.publish("ledger-events", &serialized).await?;
///
/// // A consumer feeding the scan register
/// let mut stream = event_bus.subscribe(&["ledger-events"]).await?;
/// while let Some(result) = stream.next().await {
///     match result {
///         Ok(event) => register_materialized_tickets(&event)?,
///         Err(e) => tracing::error!(error = %e, "event stream error"),
///     }
/// }
/// ```
pub trait EventBus: Send + Sync {
    /// Publish an event to a topic.
    ///
    /// At-least-once semantics: the event may reach subscribers more than
    /// once.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::PublishFailed`] if the publish operation
    /// fails.
    fn publish(
        &self,
        topic: &str,
        event: &SerializedEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>>;

    /// Subscribe to one or more topics and receive a stream of events.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::SubscriptionFailed`] if subscription fails.
    fn subscribe(
        &self,
        topics: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<EventStream, EventBusError>> + Send + '_>>;
}
