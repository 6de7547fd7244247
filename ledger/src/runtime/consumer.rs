//! Generic event bus consumer with automatic reconnection.
//!
//! `EventConsumer` owns the subscribe-process-reconnect loop so handlers
//! only implement event processing:
//!
//! ```text
//! loop {
//!     subscribe to topics
//!     for each event: handler.handle(bytes)   // errors logged, loop continues
//!     on stream end or subscribe failure: wait retry_delay, reconnect
//!     on shutdown signal: exit
//! }
//! ```
//!
//! Handler errors never tear the consumer down; the event is logged and the
//! stream moves on. Delivery is at-least-once end to end, so handlers are
//! written idempotent.

use super::EventHandler;
use futures::StreamExt;
use stagepass_core::{event::SerializedEvent, event_bus::EventBus};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// Event bus consumer driving one handler.
///
/// Spawned as a background task via [`EventConsumer::spawn`]; runs until the
/// shutdown signal fires.
pub struct EventConsumer {
    /// Consumer name, used in logs
    name: String,

    /// Topics to subscribe to
    topics: Vec<String>,

    /// Event bus to consume from
    event_bus: Arc<dyn EventBus>,

    /// Handler invoked once per event
    handler: Arc<dyn EventHandler>,

    /// Shutdown signal receiver
    shutdown: broadcast::Receiver<()>,

    /// Wait between reconnection attempts
    retry_delay: Duration,
}

impl EventConsumer {
    /// Creates a consumer with the default 5 second retry delay
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        topics: Vec<String>,
        event_bus: Arc<dyn EventBus>,
        handler: Arc<dyn EventHandler>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            name: name.into(),
            topics,
            event_bus,
            handler,
            shutdown,
            retry_delay: Duration::from_secs(5),
        }
    }

    /// Sets a custom reconnection delay
    #[must_use]
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Spawns the consumer loop as a background task.
    ///
    /// The returned handle resolves when the consumer has observed the
    /// shutdown signal and drained its current event.
    #[must_use]
    pub fn spawn(mut self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(&mut self) {
        info!(consumer = %self.name, "Event consumer started");

        loop {
            let topics: Vec<&str> = self.topics.iter().map(String::as_str).collect();

            tokio::select! {
                _ = self.shutdown.recv() => {
                    info!(consumer = %self.name, "Event consumer received shutdown signal");
                    break;
                }
                subscribe_result = self.event_bus.subscribe(&topics) => {
                    match subscribe_result {
                        Ok(mut stream) => {
                            info!(consumer = %self.name, topics = ?self.topics, "Subscribed to event bus");

                            match self.process_stream(&mut stream).await {
                                // Shutdown observed mid-stream.
                                Ok(true) => break,
                                Ok(false) => {
                                    warn!(
                                        consumer = %self.name,
                                        "Event stream ended, reconnecting in {:?}",
                                        self.retry_delay
                                    );
                                    tokio::time::sleep(self.retry_delay).await;
                                }
                                Err(e) => {
                                    error!(consumer = %self.name, error = %e, "Error processing stream");
                                    tokio::time::sleep(self.retry_delay).await;
                                }
                            }
                        }
                        Err(e) => {
                            error!(
                                consumer = %self.name,
                                error = %e,
                                "Failed to subscribe to event bus, retrying in {:?}",
                                self.retry_delay
                            );
                            tokio::time::sleep(self.retry_delay).await;
                        }
                    }
                }
            }
        }

        info!(consumer = %self.name, "Event consumer stopped");
    }

    /// Processes events until the stream ends or shutdown is signalled.
    ///
    /// Returns `Ok(true)` when shutdown ended processing, `Ok(false)` when
    /// the stream ran dry. Handler failures are logged and skipped; only
    /// transport-level breakage returns an error.
    async fn process_stream<S, E>(
        &mut self,
        stream: &mut S,
    ) -> Result<bool, Box<dyn std::error::Error + Send + Sync>>
    where
        S: futures::Stream<Item = Result<SerializedEvent, E>> + Unpin + Send,
        E: std::error::Error + 'static,
    {
        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    info!(consumer = %self.name, "Event consumer received shutdown signal during processing");
                    return Ok(true);
                }
                event_result = stream.next() => {
                    match event_result {
                        Some(Ok(serialized_event)) => {
                            if let Err(e) = self.handler.handle(&serialized_event.data).await {
                                error!(
                                    consumer = %self.name,
                                    event_type = %serialized_event.event_type,
                                    error = %e,
                                    "Failed to handle event"
                                );
                            }
                        }
                        Some(Err(e)) => {
                            error!(
                                consumer = %self.name,
                                error = %e,
                                "Error receiving event from stream"
                            );
                        }
                        None => {
                            warn!(consumer = %self.name, "Event stream ended");
                            return Ok(false);
                        }
                    }
                }
            }
        }
    }
}
