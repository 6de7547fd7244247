//! Persistence trait for append-only event streams.
//!
//! Aggregates keep their history as events: the ledger stream for an event
//! carries allocations, transfers, sales, and holds; the scan stream carries
//! ticket registrations and scans. The store is the single source of truth,
//! so balances and settlement figures are always derivable by replay.
//!
//! [`EventStore`] covers exactly three concerns: appending with optimistic
//! concurrency, loading for replay, and snapshots so long streams do not
//! have to be replayed from the start.
//!
//! # Example
//!
//! ```no_run
//! use stagepass_core::event_store::{EventStore, EventStoreError};
//! use stagepass_core::stream::{StreamId, Version};
//!
//! async fn example<E: EventStore>(store: &E) -> Result<(), EventStoreError> {
//!     let stream_id = StreamId::new("ledger-evt-7f3a");
//!
//!     let new_version = store
//!         .append_events(stream_id.clone(), Some(Version::INITIAL), vec![])
//!         .await?;
//!
//!     // Replay the whole stream to rebuild state.
//!     for event in store.load_events(stream_id, None).await? {
//!         let _ = event;
//!     }
//!
//!     Ok(())
//! }
//! ```

use crate::event::SerializedEvent;
use crate::stream::{StreamId, Version};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Type alias for snapshot data: `(Version, Vec<u8>)`
type SnapshotData = (Version, Vec<u8>);

/// Errors that can occur during event store operations.
#[derive(Error, Debug)]
pub enum EventStoreError {
    /// An append stated an expected version that no longer matches the stream.
    ///
    /// Two commands raced on the same event's inventory and this one lost;
    /// the caller reloads and retries, or reports a race-lost outcome.
    #[error("Concurrency conflict: expected version {expected}, found {actual}")]
    ConcurrencyConflict {
        /// The stream ID where the conflict occurred.
        stream_id: StreamId,
        /// The version the append expected the stream to be at.
        expected: Version,
        /// The version the stream is actually at.
        actual: Version,
    },

    /// Stream not found in the event store.
    #[error("Stream not found: {0}")]
    StreamNotFound(StreamId),

    /// Database connection error.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// General I/O error.
    #[error("I/O error: {0}")]
    IoError(String),
}

/// Append-only storage for serialized event streams.
///
/// Implementations must be `Send + Sync`; the runtime shares one store across
/// every consumer and effect. The methods return explicit
/// `Pin<Box<dyn Future>>` rather than `async fn` so the trait stays dyn
/// compatible: reducers capture an `Arc<dyn EventStore>` inside effects.
///
/// Read models and subscriptions live elsewhere (projections and the event
/// bus); the store only persists and replays.
pub trait EventStore: Send + Sync {
    /// Append events to a stream with optimistic concurrency control.
    ///
    /// `expected_version` of `Some(v)` asserts the stream is currently at
    /// `v`; `None` appends unconditionally. Capacity races between two
    /// sellers resolve here: only one append wins the version.
    ///
    /// Returns the stream's version after the append (version 5 plus three
    /// events yields version 8).
    ///
    /// # Errors
    ///
    /// - `ConcurrencyConflict`: the expected version lost a race
    /// - `DatabaseError`: the backend rejected the write
    /// - `SerializationError`: events could not be serialized
    fn append_events(
        &self,
        stream_id: StreamId,
        expected_version: Option<Version>,
        events: Vec<SerializedEvent>,
    ) -> Pin<Box<dyn Future<Output = Result<Version, EventStoreError>> + Send + '_>>;

    /// Load events from a stream, oldest first.
    ///
    /// `from_version` of `Some(v)` starts at `v` inclusive; `None` loads the
    /// whole stream. A stream that does not exist yet is an empty vector,
    /// not an error.
    ///
    /// # Errors
    ///
    /// - `DatabaseError`: the backend rejected the read
    /// - `SerializationError`: stored events could not be deserialized
    fn load_events(
        &self,
        stream_id: StreamId,
        from_version: Option<Version>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<SerializedEvent>, EventStoreError>> + Send + '_>>;

    /// Save a snapshot of aggregate state at `version`.
    ///
    /// A busy event's ledger stream can run to thousands of entries over a
    /// sales window; a periodic snapshot keeps recovery time flat. Loading
    /// then becomes: latest snapshot plus the events appended since it.
    /// Snapshots are an optimization only, replay from the start always
    /// works.
    ///
    /// # Errors
    ///
    /// - `DatabaseError`: the backend rejected the write
    fn save_snapshot(
        &self,
        stream_id: StreamId,
        version: Version,
        state: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventStoreError>> + Send + '_>>;

    /// Load the latest snapshot for a stream, if one exists.
    ///
    /// The returned version says which events the snapshot already covers;
    /// replay continues from there.
    ///
    /// # Errors
    ///
    /// - `DatabaseError`: the backend rejected the read
    /// - `SerializationError`: the snapshot could not be deserialized
    fn load_snapshot(
        &self,
        stream_id: StreamId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<SnapshotData>, EventStoreError>> + Send + '_>>;
}
