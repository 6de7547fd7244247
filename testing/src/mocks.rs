//! In-memory implementations of the environment traits.
//!
//! Everything an aggregate environment needs, backed by process memory:
//! a deterministic clock, an event store with optimistic concurrency, and
//! a topic-based event bus. Tests get the same observable behavior as the
//! production implementations without touching a database or broker.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Lock poisoning is the only panic source

use chrono::{DateTime, Utc};
use stagepass_core::environment::Clock;
use stagepass_core::event::SerializedEvent;
use stagepass_core::event_bus::{EventBus, EventBusError, EventStream};
use stagepass_core::event_store::{EventStore, EventStoreError};
use stagepass_core::stream::{StreamId, Version};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::RwLock;
use tokio::sync::broadcast;

/// Fixed clock for deterministic tests
///
/// Always returns the same time, making tests reproducible.
///
/// # Example
///
/// ```
/// use stagepass_testing::mocks::FixedClock;
/// use stagepass_core::environment::Clock;
/// use chrono::Utc;
///
/// let clock = FixedClock::new(Utc::now());
/// let time1 = clock.now();
/// let time2 = clock.now();
/// assert_eq!(time1, time2); // Always the same!
/// ```
#[derive(Debug, Clone)]
pub struct FixedClock {
    time: DateTime<Utc>,
}

impl FixedClock {
    /// Create a new fixed clock with the given time
    #[must_use]
    pub const fn new(time: DateTime<Utc>) -> Self {
        Self { time }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.time
    }
}

/// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
///
/// # Panics
///
/// This function will panic if the hardcoded timestamp fails to parse,
/// which should never happen in practice.
#[must_use]
#[allow(clippy::expect_used)]
pub fn test_clock() -> FixedClock {
    FixedClock::new(
        DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
            .expect("hardcoded timestamp should always parse")
            .with_timezone(&Utc),
    )
}

/// Clock that tests advance explicitly.
///
/// Starts at a chosen instant and only moves when told to. Deadline
/// scenarios need this: schedule a hold with a 30-minute window, advance
/// the clock past the deadline, then deliver the expiry action and assert
/// the reducer treats it as overdue.
///
/// # Example
///
/// ```
/// use stagepass_testing::mocks::{SteppingClock, test_clock};
/// use stagepass_core::environment::Clock;
///
/// let clock = SteppingClock::starting_at(test_clock().now());
/// let before = clock.now();
/// clock.advance(chrono::Duration::minutes(31));
/// assert_eq!(clock.now() - before, chrono::Duration::minutes(31));
/// ```
#[derive(Debug)]
pub struct SteppingClock {
    time: RwLock<DateTime<Utc>>,
}

impl SteppingClock {
    /// Create a stepping clock pinned to the given instant
    #[must_use]
    pub fn starting_at(time: DateTime<Utc>) -> Self {
        Self {
            time: RwLock::new(time),
        }
    }

    /// Move the clock forward by the given duration
    pub fn advance(&self, duration: chrono::Duration) {
        let mut time = self.time.write().unwrap();
        *time += duration;
    }

    /// Pin the clock to an exact instant
    pub fn set(&self, to: DateTime<Utc>) {
        *self.time.write().unwrap() = to;
    }
}

impl Clock for SteppingClock {
    fn now(&self) -> DateTime<Utc> {
        *self.time.read().unwrap()
    }
}

/// In-memory event store with optimistic concurrency.
///
/// Behaves like the production store for everything reducers can observe:
/// appends check the expected version, streams keep insertion order, and
/// snapshots overwrite per stream. State lives in process memory and is
/// gone when the store drops.
///
/// # Example
///
/// ```
/// use stagepass_testing::mocks::InMemoryEventStore;
/// use stagepass_core::event_store::EventStore;
/// use stagepass_core::stream::StreamId;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = InMemoryEventStore::new();
/// let events = store.load_events(StreamId::new("ledger-evt-7f3a"), None).await?;
/// assert!(events.is_empty()); // New streams start empty
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    streams: RwLock<HashMap<StreamId, Vec<SerializedEvent>>>,
    snapshots: RwLock<HashMap<StreamId, (Version, Vec<u8>)>>,
}

impl InMemoryEventStore {
    /// Create a new empty in-memory event store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current version of a stream (0 if the stream does not exist)
    ///
    /// Useful for assertions without loading the events.
    #[must_use]
    pub fn stream_version(&self, stream_id: &StreamId) -> Version {
        let streams = self.streams.read().unwrap();
        let count = streams.get(stream_id).map_or(0, Vec::len);
        Version::new(count as u64)
    }

    /// Remove all streams and snapshots (for test isolation)
    pub fn clear(&self) {
        self.streams.write().unwrap().clear();
        self.snapshots.write().unwrap().clear();
    }
}

impl EventStore for InMemoryEventStore {
    fn append_events(
        &self,
        stream_id: StreamId,
        expected_version: Option<Version>,
        events: Vec<SerializedEvent>,
    ) -> Pin<Box<dyn Future<Output = Result<Version, EventStoreError>> + Send + '_>> {
        Box::pin(async move {
            let mut streams = self.streams.write().unwrap();
            let stream = streams.entry(stream_id.clone()).or_default();
            let actual = Version::new(stream.len() as u64);

            if let Some(expected) = expected_version {
                if expected != actual {
                    return Err(EventStoreError::ConcurrencyConflict {
                        stream_id,
                        expected,
                        actual,
                    });
                }
            }

            stream.extend(events);
            Ok(Version::new(stream.len() as u64))
        })
    }

    fn load_events(
        &self,
        stream_id: StreamId,
        from_version: Option<Version>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<SerializedEvent>, EventStoreError>> + Send + '_>>
    {
        Box::pin(async move {
            let streams = self.streams.read().unwrap();
            let Some(stream) = streams.get(&stream_id) else {
                return Ok(Vec::new());
            };

            // Event N has version N; `from_version` is inclusive
            let skip = from_version.map_or(0, |from| {
                usize::try_from(from.value().saturating_sub(1)).unwrap_or(usize::MAX)
            });

            Ok(stream.iter().skip(skip).cloned().collect())
        })
    }

    fn save_snapshot(
        &self,
        stream_id: StreamId,
        version: Version,
        state: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventStoreError>> + Send + '_>> {
        Box::pin(async move {
            self.snapshots
                .write()
                .unwrap()
                .insert(stream_id, (version, state));
            Ok(())
        })
    }

    fn load_snapshot(
        &self,
        stream_id: StreamId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<(Version, Vec<u8>)>, EventStoreError>> + Send + '_>>
    {
        Box::pin(async move { Ok(self.snapshots.read().unwrap().get(&stream_id).cloned()) })
    }
}

/// Broadcast capacity per bus; large enough that tests never lag.
const BUS_CAPACITY: usize = 256;

/// In-memory event bus with topic filtering.
///
/// Publications fan out to every live subscriber whose topic list matches,
/// and are also recorded in a log the test can inspect afterwards.
/// Subscribers only see events published after they subscribed, the same
/// as a real broker consumer joining at the tail.
///
/// # Example
///
/// ```
/// use stagepass_testing::mocks::InMemoryEventBus;
///
/// let bus = InMemoryEventBus::new();
/// assert_eq!(bus.publish_count(), 0);
/// ```
#[derive(Debug)]
pub struct InMemoryEventBus {
    sender: broadcast::Sender<(String, SerializedEvent)>,
    published: RwLock<Vec<(String, SerializedEvent)>>,
}

impl InMemoryEventBus {
    /// Create a new in-memory event bus
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BUS_CAPACITY);
        Self {
            sender,
            published: RwLock::new(Vec::new()),
        }
    }

    /// All events published so far, with their topics, in publish order
    #[must_use]
    pub fn published(&self) -> Vec<(String, SerializedEvent)> {
        self.published.read().unwrap().clone()
    }

    /// Events published to one topic, in publish order
    #[must_use]
    pub fn events_for_topic(&self, topic: &str) -> Vec<SerializedEvent> {
        self.published
            .read()
            .unwrap()
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, event)| event.clone())
            .collect()
    }

    /// Total number of publications across all topics
    #[must_use]
    pub fn publish_count(&self) -> usize {
        self.published.read().unwrap().len()
    }

    /// Forget the publication log (for test isolation)
    pub fn clear(&self) {
        self.published.write().unwrap().clear();
    }
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus for InMemoryEventBus {
    fn publish(
        &self,
        topic: &str,
        event: &SerializedEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>> {
        let topic = topic.to_string();
        let event = event.clone();
        Box::pin(async move {
            self.published
                .write()
                .unwrap()
                .push((topic.clone(), event.clone()));

            // Err means no live subscribers, which is fine for a publish
            let _ = self.sender.send((topic, event));
            Ok(())
        })
    }

    fn subscribe(
        &self,
        topics: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<EventStream, EventBusError>> + Send + '_>> {
        let topics: Vec<String> = topics.iter().map(ToString::to_string).collect();
        let mut rx = self.sender.subscribe();

        Box::pin(async move {
            let stream = async_stream::stream! {
                loop {
                    match rx.recv().await {
                        Ok((topic, event)) => {
                            if topics.iter().any(|t| *t == topic) {
                                yield Ok(event);
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(_)) => {
                            // Skip ahead; at-least-once consumers tolerate gaps
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            };

            Ok(Box::pin(stream) as EventStream)
        })
    }
}
