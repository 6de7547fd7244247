//! # Stagepass Runtime
//!
//! The Store runtime that drives Stagepass aggregates.
//!
//! A [`Store`] owns one aggregate's state (the inventory ledger for an
//! event, the door-scan register), runs its reducer under a write lock, and
//! executes the effects the reducer returns: event-store appends, event-bus
//! publications, delayed actions for hold and transfer expiry. Actions
//! produced by effects feed back into the reducer, closing the loop.
//!
//! ## Core Components
//!
//! - **[`Store`]**: state + reducer + environment, with the effect feedback loop
//! - **[`RetryPolicy`]**: exponential backoff with jitter for event-store and
//!   event-bus operations
//! - **[`EffectHandle`]**: await completion of the effects one action spawned
//! - **[`StoreConfig`]**: retry, broadcast, and shutdown tuning
//!
//! ## Example
//!
//! ```ignore
//! use stagepass_runtime::Store;
//!
//! let store = Store::new(LedgerState::new(event_id), LedgerReducer::new(), env);
//!
//! // Commands mutate state synchronously; effects run afterwards.
//! store.send(LedgerAction::AllocateTickets {
//!     staff_id,
//!     tier_id,
//!     quantity: 40,
//! }).await?;
//!
//! let held = store.state(|s| s.balance(&staff_id, &tier_id).held).await;
//! ```

use stagepass_core::{effect::Effect, reducer::Reducer};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{RwLock, watch};

/// Store runtime errors
pub mod error {
    use thiserror::Error;

    /// Errors a [`super::Store`] can return
    #[derive(Error, Debug)]
    pub enum StoreError {
        /// `send()` was called after shutdown began; the action was rejected
        #[error("Store is shutting down")]
        ShutdownInProgress,

        /// Shutdown gave up waiting; the count says how many effects were
        /// still in flight
        #[error("Shutdown timed out with {0} effects still running")]
        ShutdownTimeout(usize),

        /// `send_and_wait_for` ran out of time before any action matched
        /// its predicate
        #[error("Timeout waiting for action")]
        Timeout,

        /// The action broadcast closed under a waiter, which happens when
        /// the store is torn down
        #[error("Action broadcast channel closed")]
        ChannelClosed,
    }
}

pub use error::StoreError;

/// Backoff schedule for transient infrastructure failures
///
/// Event-store appends and event-bus publications are retried with
/// exponential backoff and jitter, so a brief storage hiccup does not lose
/// a sale or an allocation.
///
/// # Example
///
/// ```ignore
/// use stagepass_runtime::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::new()
///     .with_max_attempts(10)
///     .with_initial_delay(Duration::from_millis(500));
/// ```
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts allowed, counting the first try
    max_attempts: u32,

    /// Delay before the first retry
    initial_delay: Duration,

    /// Cap on the backoff curve
    max_delay: Duration,

    /// Growth factor per attempt (2.0 doubles the delay each time)
    backoff_multiplier: f64,
}

impl RetryPolicy {
    /// Default policy: 5 attempts, 1s initial delay doubling up to a 32s cap
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(32),
            backoff_multiplier: 2.0,
        }
    }

    /// Override the attempt limit
    #[must_use]
    pub const fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Override the delay before the first retry
    #[must_use]
    pub const fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Override the backoff cap
    #[must_use]
    pub const fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Override the backoff growth factor
    #[must_use]
    pub const fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Delay for the given attempt number (0-indexed):
    /// `min(initial_delay * multiplier^attempt, max_delay) * random(0.5..=1.0)`
    ///
    /// Jitter spreads out retries so concurrent failures do not hammer the
    /// event store in lockstep.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        use rand::Rng;

        // Note: Cast is safe since max_attempts defaults to 5 (well within i32 range)
        #[allow(clippy::cast_possible_wrap)]
        let base_delay_secs =
            self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);

        let capped_secs = base_delay_secs.min(self.max_delay.as_secs_f64());

        let jitter = rand::thread_rng().gen_range(0.5..=1.0);
        let final_secs = capped_secs * jitter;

        Duration::from_secs_f64(final_secs)
    }

    /// The attempt limit
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Whether another attempt is allowed
    #[must_use]
    pub const fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new()
    }
}

/// Tuning knobs for a [`store::Store`]
///
/// # Example
///
/// ```ignore
/// let config = StoreConfig::default()
///     .with_broadcast_capacity(256)
///     .with_shutdown_timeout(Duration::from_secs(60));
///
/// let store = Store::with_config(state, reducer, env, config);
/// ```
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Retry policy for event-store and event-bus operations
    pub retry_policy: RetryPolicy,
    /// Action broadcast channel capacity (number of actions buffered per
    /// observer before lagging)
    pub broadcast_capacity: usize,
    /// How long `shutdown()` waits for in-flight effects
    pub shutdown_timeout: Duration,
}

impl StoreConfig {
    /// Build a configuration from explicit values
    #[must_use]
    pub const fn new(
        retry_policy: RetryPolicy,
        broadcast_capacity: usize,
        shutdown_timeout: Duration,
    ) -> Self {
        Self {
            retry_policy,
            broadcast_capacity,
            shutdown_timeout,
        }
    }

    /// Override the retry policy
    #[must_use]
    pub const fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Override the action broadcast capacity
    ///
    /// Default is 16. Increase for stores with many slow observers.
    #[must_use]
    pub const fn with_broadcast_capacity(mut self, capacity: usize) -> Self {
        self.broadcast_capacity = capacity;
        self
    }

    /// Override how long `shutdown()` waits for in-flight effects
    #[must_use]
    pub const fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            retry_policy: RetryPolicy::default(),
            broadcast_capacity: 16,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// Completion handle for the effects one action spawned
///
/// Returned by [`Store::send()`]. The reducer itself runs synchronously
/// inside `send`; the handle covers only the asynchronous tail (appends,
/// publications, delayed actions).
///
/// # Example
///
/// ```ignore
/// let mut handle = store.send(LedgerAction::RecordSale { .. }).await?;
/// handle.wait_with_timeout(Duration::from_secs(5)).await?;
/// // The sale's append and publish effects are now complete.
/// ```
#[derive(Clone)]
pub struct EffectHandle {
    effects: Arc<AtomicUsize>,
    completion: watch::Receiver<()>,
}

impl EffectHandle {
    /// Create a new effect handle plus the tracking half used internally
    /// during effect execution.
    fn new() -> (Self, EffectTracking) {
        let counter = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = watch::channel(());

        let handle = Self {
            effects: Arc::clone(&counter),
            completion: rx,
        };

        let tracking = EffectTracking {
            counter,
            notifier: tx,
        };

        (handle, tracking)
    }

    /// A handle with nothing left to wait on
    ///
    /// Seeds `last_handle` in replay loops so the final `wait` is
    /// unconditional:
    ///
    /// ```ignore
    /// let mut last_handle = EffectHandle::completed();
    /// for action in replayed_events {
    ///     last_handle = store.send(action).await?;
    /// }
    /// last_handle.wait().await;
    /// ```
    #[must_use]
    pub fn completed() -> Self {
        let (tx, rx) = watch::channel(());
        let _ = tx.send(());

        Self {
            effects: Arc::new(AtomicUsize::new(0)),
            completion: rx,
        }
    }

    /// Block until every tracked effect has finished
    pub async fn wait(&mut self) {
        while self.effects.load(Ordering::SeqCst) > 0 {
            let _ = self.completion.changed().await;
        }
    }

    /// [`wait`](Self::wait) with an upper bound
    ///
    /// # Errors
    ///
    /// Returns `Err(())` if effects are still running when the timeout
    /// expires.
    pub async fn wait_with_timeout(&mut self, timeout: Duration) -> Result<(), ()> {
        tokio::time::timeout(timeout, self.wait())
            .await
            .map_err(|_| ())
    }
}

impl std::fmt::Debug for EffectHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EffectHandle")
            .field("pending_effects", &self.effects.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

/// Internal: effect tracking context passed through effect execution.
///
/// Carries the per-action counter and the watch channel that wakes waiters
/// when the counter reaches zero.
#[derive(Clone)]
struct EffectTracking {
    counter: Arc<AtomicUsize>,
    notifier: watch::Sender<()>,
}

impl EffectTracking {
    /// One more effect in flight
    fn increment(&self) {
        self.counter.fetch_add(1, Ordering::SeqCst);
    }

    /// One effect finished; the last one out wakes the waiters
    fn decrement(&self) {
        if self.counter.fetch_sub(1, Ordering::SeqCst) == 1 {
            let _ = self.notifier.send(());
        }
    }
}

/// Internal: RAII guard that decrements the effect counter on drop.
///
/// Ensures the counter is always decremented, even if the effect panics.
struct DecrementGuard(EffectTracking);

impl Drop for DecrementGuard {
    fn drop(&mut self) {
        self.0.decrement();
    }
}

/// Drops the store-wide pending count by one, panic or not
struct AtomicCounterGuard(Arc<AtomicUsize>);

impl Drop for AtomicCounterGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// The [`Store`](store::Store) itself and its effect executor.
pub mod store {
    use super::{
        Arc, AtomicBool, AtomicCounterGuard, AtomicUsize, DecrementGuard, Duration, Effect,
        EffectHandle, EffectTracking, Ordering, Reducer, RetryPolicy, RwLock, StoreConfig,
        StoreError, watch,
    };
    use tokio::sync::broadcast;

    /// Runtime host for one aggregate: state `S` behind an `RwLock`, a
    /// reducer `R` that mutates it, an environment `E` of injected
    /// dependencies, and the executor for the effects each reduction
    /// returns. Actions those effects produce are sent back in, closing
    /// the loop.
    ///
    /// # Concurrency
    ///
    /// Commands serialize at the write lock: when two sellers race for the
    /// last tickets in a tier, one reducer call sees the debit the other
    /// just applied and rejects. Capacity checks therefore never need
    /// external coordination.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let store = Store::new(
    ///     ScanState::new(event_id),
    ///     ScanReducer::new(),
    ///     scan_environment(),
    /// );
    ///
    /// store.send(ScanAction::ScanTicket {
    ///     ticket_code: code,
    ///     scanned_by: staff_id,
    /// }).await?;
    /// ```
    pub struct Store<S, A, E, R>
    where
        R: Reducer<State = S, Action = A, Environment = E>,
    {
        state: Arc<RwLock<S>>,
        reducer: R,
        environment: E,
        retry_policy: RetryPolicy,
        shutdown: Arc<AtomicBool>,
        /// Wakes sleeping `Effect::Delay` tasks when shutdown begins.
        shutdown_signal: watch::Sender<bool>,
        shutdown_timeout: Duration,
        pending_effects: Arc<AtomicUsize>,
        /// Actions produced by `Effect::Future` and `Effect::Delay` are
        /// broadcast here. This is what lets a caller await a transfer
        /// expiry or a saga's terminal action via
        /// [`Store::send_and_wait_for`].
        action_broadcast: broadcast::Sender<A>,
    }

    impl<S, A, E, R> Store<S, A, E, R>
    where
        R: Reducer<State = S, Action = A, Environment = E> + Send + Sync + 'static,
        A: Send + Clone + 'static,
        S: Send + Sync + 'static,
        E: Send + Sync + 'static,
    {
        /// Build a store with [`StoreConfig::default()`]:
        /// exponential-backoff retries, broadcast capacity 16, 30-second
        /// shutdown timeout
        #[must_use]
        pub fn new(initial_state: S, reducer: R, environment: E) -> Self {
            Self::with_config(initial_state, reducer, environment, StoreConfig::default())
        }

        /// Build a store with a custom retry policy and defaults elsewhere
        #[must_use]
        pub fn with_retry_policy(
            initial_state: S,
            reducer: R,
            environment: E,
            retry_policy: RetryPolicy,
        ) -> Self {
            Self::with_config(
                initial_state,
                reducer,
                environment,
                StoreConfig::default().with_retry_policy(retry_policy),
            )
        }

        /// Build a store with explicit configuration
        ///
        /// # Example
        ///
        /// ```ignore
        /// let config = StoreConfig::default()
        ///     .with_broadcast_capacity(256)
        ///     .with_shutdown_timeout(Duration::from_secs(60));
        ///
        /// let store = Store::with_config(
        ///     LedgerState::new(event_id),
        ///     LedgerReducer::new(),
        ///     ledger_environment,
        ///     config,
        /// );
        /// ```
        #[must_use]
        pub fn with_config(initial_state: S, reducer: R, environment: E, config: StoreConfig) -> Self {
            let (action_broadcast, _) = broadcast::channel(config.broadcast_capacity);
            let (shutdown_signal, _) = watch::channel(false);

            Self {
                state: Arc::new(RwLock::new(initial_state)),
                reducer,
                environment,
                retry_policy: config.retry_policy,
                shutdown: Arc::new(AtomicBool::new(false)),
                shutdown_signal,
                shutdown_timeout: config.shutdown_timeout,
                pending_effects: Arc::new(AtomicUsize::new(0)),
                action_broadcast,
            }
        }

        /// Drain the store for shutdown
        ///
        /// New actions are rejected from this point on, sleeping
        /// [`Effect::Delay`] timers are cancelled (the actions they would
        /// have produced are dropped), and in-flight appends and
        /// publications get up to the configured timeout to finish.
        ///
        /// # Errors
        ///
        /// Returns [`StoreError::ShutdownTimeout`] if effects are still
        /// running when the timeout expires.
        ///
        /// # Example
        ///
        /// ```ignore
        /// // Flush in-flight appends and publications, then stop.
        /// store.shutdown().await?;
        /// ```
        pub async fn shutdown(&self) -> Result<(), StoreError> {
            tracing::info!("Initiating graceful shutdown");
            metrics::counter!("store.shutdown.initiated").increment(1);

            self.shutdown.store(true, Ordering::Release);

            // Wake sleeping delay timers so they cancel instead of riding
            // out their full duration. Their actions would be rejected by
            // send() anyway once the flag is set.
            let _ = self.shutdown_signal.send(true);

            let start = std::time::Instant::now();
            let poll_interval = Duration::from_millis(100);

            loop {
                let pending = self.pending_effects.load(Ordering::Acquire);

                if pending == 0 {
                    tracing::info!("All effects completed, shutdown successful");
                    metrics::counter!("store.shutdown.completed").increment(1);
                    return Ok(());
                }

                if start.elapsed() >= self.shutdown_timeout {
                    tracing::error!(
                        pending_effects = pending,
                        "Shutdown timeout: {} effects still running",
                        pending
                    );
                    metrics::counter!("store.shutdown.timeout").increment(1);
                    return Err(StoreError::ShutdownTimeout(pending));
                }

                tracing::debug!(
                    pending_effects = pending,
                    elapsed_ms = start.elapsed().as_millis(),
                    "Waiting for effects to complete"
                );

                tokio::time::sleep(poll_interval).await;
            }
        }

        /// Run one action through the reducer and start its effects
        ///
        /// The reducer runs synchronously under the state write lock, so
        /// whatever it applied is visible to `state()` the moment `send()`
        /// returns. The effects it emitted run in spawned tasks after the
        /// lock is released; the returned [`EffectHandle`] is how a caller
        /// waits for that asynchronous tail. Actions those effects produce
        /// come back through `send` again. Concurrent `send` calls
        /// serialize at the lock.
        ///
        /// # Errors
        ///
        /// Returns [`StoreError::ShutdownInProgress`] if the store is
        /// shutting down.
        ///
        /// # Panics
        ///
        /// A panicking reducer propagates and halts the store. Reducers are
        /// expected to reject, not panic.
        ///
        /// # Example
        ///
        /// ```ignore
        /// let handle = store.send(LedgerAction::AllocateTickets { .. }).await?;
        /// handle.wait().await;
        /// ```
        #[tracing::instrument(skip(self, action), name = "store_send")]
        pub async fn send(&self, action: A) -> Result<EffectHandle, StoreError>
        where
            R: Clone,
            E: Clone,
        {
            if self.shutdown.load(Ordering::Acquire) {
                tracing::warn!("Rejected action: store is shutting down");
                metrics::counter!("store.shutdown.rejected_actions").increment(1);
                return Err(StoreError::ShutdownInProgress);
            }

            tracing::debug!("Processing action");
            metrics::counter!("store.commands.total").increment(1);

            let (handle, tracking) = EffectHandle::new();

            let effects = {
                let mut state = self.state.write().await;
                tracing::trace!("Acquired write lock on state");

                let span = tracing::debug_span!("reducer_execution");
                let _enter = span.enter();

                let start = std::time::Instant::now();
                let effects = self.reducer.reduce(&mut state, action, &self.environment);
                let duration = start.elapsed();
                metrics::histogram!("store.reducer.duration_seconds").record(duration.as_secs_f64());

                tracing::trace!("Reducer completed, returned {} effects", effects.len());

                // Note: Precision loss acceptable for metrics (effect counts < 2^52)
                #[allow(clippy::cast_precision_loss)]
                metrics::histogram!("store.effects.count").record(effects.len() as f64);

                effects
            };

            tracing::trace!("Executing {} effects", effects.len());
            for effect in effects {
                self.execute_effect_internal(effect, tracking.clone());
            }
            tracing::debug!("Action processing completed, returning handle");

            Ok(handle)
        }

        /// Send an action, then block until an effect-produced action
        /// satisfies `predicate`
        ///
        /// For request-response flows that complete through asynchronous
        /// effects: transfer-expiry confirmation, saga chains, anything
        /// that resolves via `Effect::Future` or `Effect::Delay`. The
        /// broadcast subscription is taken before the send so the matching
        /// action cannot slip past between the two.
        ///
        /// # Errors
        ///
        /// - [`StoreError::Timeout`]: timeout expired before matching action
        /// - [`StoreError::ChannelClosed`]: broadcast channel closed
        /// - [`StoreError::ShutdownInProgress`]: store is shutting down
        ///
        /// # Example
        ///
        /// ```ignore
        /// let outcome = store.send_and_wait_for(
        ///     LedgerAction::RequestTransfer { transfer_id, .. },
        ///     |a| matches!(a,
        ///         LedgerAction::TransferAccepted { transfer_id: id, .. } |
        ///         LedgerAction::TransferExpired { transfer_id: id, .. }
        ///         if *id == transfer_id
        ///     ),
        ///     Duration::from_secs(10),
        /// ).await?;
        /// ```
        ///
        /// # Notes
        ///
        /// - Only actions produced by effects are broadcast (not the initial
        ///   action, and not events applied synchronously during `reduce`)
        /// - If the channel lags and drops actions, waiting continues and
        ///   the timeout catches it
        /// - Use correlation ids (transfer ids, hold ids) to distinguish
        ///   concurrent requests
        pub async fn send_and_wait_for<F>(
            &self,
            action: A,
            predicate: F,
            timeout: Duration,
        ) -> Result<A, StoreError>
        where
            R: Clone,
            E: Clone,
            F: Fn(&A) -> bool,
        {
            // Subscription must exist before the send, or a fast effect's
            // action races past the waiter.
            let mut rx = self.action_broadcast.subscribe();

            self.send(action).await?;

            tokio::time::timeout(timeout, async {
                loop {
                    match rx.recv().await {
                        Ok(action) if predicate(&action) => return Ok(action),
                        Ok(_) => {} // Not the action we want, keep waiting
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            // Slow consumer, some actions were dropped.
                            // Keep waiting; the timeout catches a dropped
                            // terminal action.
                            tracing::warn!(skipped, "Action observer lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            return Err(StoreError::ChannelClosed);
                        }
                    }
                }
            })
            .await
            .map_err(|_| StoreError::Timeout)?
        }

        /// Subscribe to all actions produced by this store's effects
        ///
        /// Returns a receiver that gets a clone of every action produced by
        /// `Effect::Future` and `Effect::Delay`. Useful for dashboards and
        /// tests that observe expiry actions as they fire.
        ///
        /// # Notes
        ///
        /// - Initial actions sent via `send` are not broadcast
        /// - If the receiver lags it skips old actions and sees
        ///   `RecvError::Lagged`
        #[must_use]
        pub fn subscribe_actions(&self) -> broadcast::Receiver<A> {
            self.action_broadcast.subscribe()
        }

        /// Read the current state under the read lock
        ///
        /// The closure shape keeps the lock scoped to the read itself:
        ///
        /// ```ignore
        /// let outstanding = store.state(|s| s.pending_transfers.len()).await;
        /// ```
        pub async fn state<F, T>(&self, f: F) -> T
        where
            F: FnOnce(&S) -> T,
        {
            let state = self.state.read().await;
            f(&state)
        }

        /// Run an event-store or event-bus call under the retry policy
        ///
        /// Backs off exponentially between attempts and hands back the last
        /// error once attempts are exhausted; the caller's `on_error`
        /// callback turns that into a domain action.
        async fn retry_operation<F, Fut, T, Err>(
            &self,
            operation_name: &str,
            mut f: F,
        ) -> Result<T, Err>
        where
            F: FnMut() -> Fut,
            Fut: std::future::Future<Output = Result<T, Err>>,
            Err: std::fmt::Display,
        {
            let mut attempt = 0;

            loop {
                match f().await {
                    Ok(result) => {
                        if attempt > 0 {
                            metrics::counter!(
                                "store.retry.success",
                                "operation" => operation_name.to_string(),
                                "attempts" => attempt.to_string()
                            )
                            .increment(1);
                            tracing::info!(
                                operation = operation_name,
                                attempt = attempt,
                                "Operation succeeded after retry"
                            );
                        }
                        return Ok(result);
                    }
                    Err(error) => {
                        if !self.retry_policy.should_retry(attempt + 1) {
                            metrics::counter!(
                                "store.retry.exhausted",
                                "operation" => operation_name.to_string(),
                                "attempts" => attempt.to_string()
                            )
                            .increment(1);
                            tracing::error!(
                                operation = operation_name,
                                attempt = attempt,
                                error = %error,
                                "Operation failed after exhausting retries"
                            );
                            return Err(error);
                        }

                        let delay = self.retry_policy.delay_for_attempt(attempt);
                        metrics::counter!(
                            "store.retry.attempt",
                            "operation" => operation_name.to_string(),
                            "attempt" => attempt.to_string()
                        )
                        .increment(1);
                        tracing::warn!(
                            operation = operation_name,
                            attempt = attempt,
                            delay_ms = delay.as_millis(),
                            error = %error,
                            "Operation failed, retrying after delay"
                        );

                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                }
            }
        }

        /// Dispatch one effect, wiring completion into `tracking`
        ///
        /// Every spawned task holds a [`DecrementGuard`], so the counter
        /// comes back down even when the effect panics. Infrastructure
        /// failures never bubble out of here; they surface as domain
        /// actions via the operation's `on_error` callback, so aggregates
        /// decide how a failed append affects them.
        #[allow(clippy::needless_pass_by_value)] // tracking is cloned, so pass by value is intentional
        #[allow(clippy::too_many_lines)] // One arm per effect variant
        fn execute_effect_internal(&self, effect: Effect<A>, tracking: EffectTracking)
        where
            R: Clone,
            E: Clone,
        {
            match effect {
                Effect::None => {
                    tracing::trace!("Executing Effect::None (no-op)");
                    metrics::counter!("store.effects.executed", "type" => "none").increment(1);
                }
                Effect::Future(fut) => {
                    tracing::trace!("Executing Effect::Future");
                    metrics::counter!("store.effects.executed", "type" => "future").increment(1);
                    tracking.increment();

                    // Counted store-wide so shutdown knows what is in flight
                    self.pending_effects.fetch_add(1, Ordering::SeqCst);
                    let pending_guard = AtomicCounterGuard(Arc::clone(&self.pending_effects));

                    let tracking_clone = tracking.clone();
                    let store = self.clone();

                    tokio::spawn(async move {
                        let _guard = DecrementGuard(tracking_clone.clone());
                        let _pending_guard = pending_guard; // Drop decrements

                        if let Some(action) = fut.await {
                            tracing::trace!("Effect::Future produced an action, sending to store");

                            // Broadcast to observers before feeding back
                            let _ = store.action_broadcast.send(action.clone());

                            let _ = store.send(action).await;
                        } else {
                            tracing::trace!("Effect::Future completed with no action");
                        }
                    });
                }
                Effect::Delay { duration, action } => {
                    tracing::trace!("Executing Effect::Delay (duration: {:?})", duration);
                    metrics::counter!("store.effects.executed", "type" => "delay").increment(1);
                    tracking.increment();

                    // Counted store-wide so shutdown knows what is in flight
                    self.pending_effects.fetch_add(1, Ordering::SeqCst);
                    let pending_guard = AtomicCounterGuard(Arc::clone(&self.pending_effects));

                    let tracking_clone = tracking.clone();
                    let store = self.clone();
                    let mut shutdown_rx = self.shutdown_signal.subscribe();

                    tokio::spawn(async move {
                        let _guard = DecrementGuard(tracking_clone.clone());
                        let _pending_guard = pending_guard; // Drop decrements

                        tokio::select! {
                            () = tokio::time::sleep(duration) => {
                                tracing::trace!("Effect::Delay completed, sending action");

                                // Broadcast to observers before feeding back
                                let _ = store.action_broadcast.send((*action).clone());

                                let _ = store.send(*action).await;
                            }
                            // The async block drops the non-Send watch::Ref
                            // before the select! handler runs, keeping the
                            // spawned future Send.
                            () = async { let _ = shutdown_rx.wait_for(|stopped| *stopped).await; } => {
                                tracing::trace!("Effect::Delay cancelled by shutdown");
                            }
                        }
                    });
                }
                Effect::Parallel(effects) => {
                    let effect_count = effects.len();
                    tracing::trace!("Executing Effect::Parallel with {} effects", effect_count);
                    metrics::counter!("store.effects.executed", "type" => "parallel").increment(1);

                    // Every child shares the parent's tracking and runs
                    // concurrently
                    for effect in effects {
                        self.execute_effect_internal(effect, tracking.clone());
                    }
                }
                Effect::Sequential(effects) => {
                    let effect_count = effects.len();
                    tracing::trace!("Executing Effect::Sequential with {} effects", effect_count);
                    metrics::counter!("store.effects.executed", "type" => "sequential").increment(1);

                    tracking.increment();

                    // Counted store-wide so shutdown knows what is in flight
                    self.pending_effects.fetch_add(1, Ordering::SeqCst);
                    let pending_guard = AtomicCounterGuard(Arc::clone(&self.pending_effects));

                    let tracking_clone = tracking.clone();
                    let store = self.clone();

                    tokio::spawn(async move {
                        let _guard = DecrementGuard(tracking_clone);
                        let _pending_guard = pending_guard; // Drop decrements

                        // Each child gets its own tracking; the next one
                        // starts only after it drains
                        for (idx, effect) in effects.into_iter().enumerate() {
                            tracing::trace!(
                                "Executing sequential effect {} of {}",
                                idx + 1,
                                effect_count
                            );

                            let (sub_tx, mut sub_rx) = watch::channel(());
                            let sub_tracking = EffectTracking {
                                counter: Arc::new(AtomicUsize::new(0)),
                                notifier: sub_tx,
                            };

                            store.execute_effect_internal(effect, sub_tracking.clone());

                            if sub_tracking.counter.load(Ordering::SeqCst) > 0 {
                                let _ = sub_rx.changed().await;
                            }
                        }
                        tracing::trace!("Effect::Sequential completed");
                    });
                }
                Effect::EventStore(op) => {
                    use stagepass_core::effect::EventStoreOperation;

                    tracing::trace!("Executing Effect::EventStore");
                    metrics::counter!("store.effects.executed", "type" => "event_store")
                        .increment(1);
                    tracking.increment();

                    // Counted store-wide so shutdown knows what is in flight
                    self.pending_effects.fetch_add(1, Ordering::SeqCst);
                    let pending_guard = AtomicCounterGuard(Arc::clone(&self.pending_effects));

                    let tracking_clone = tracking.clone();
                    let store = self.clone();

                    tokio::spawn(async move {
                        let _guard = DecrementGuard(tracking_clone);
                        let _pending_guard = pending_guard; // Drop decrements

                        let action = match op {
                            EventStoreOperation::AppendEvents {
                                event_store,
                                stream_id,
                                expected_version,
                                events,
                                on_success,
                                on_error,
                            } => {
                                tracing::debug!(
                                    stream_id = %stream_id,
                                    expected_version = ?expected_version,
                                    event_count = events.len(),
                                    "Executing append_events"
                                );

                                let stream_id_clone = stream_id.clone();
                                let result = store
                                    .retry_operation("append_events", || {
                                        let event_store_clone = event_store.clone();
                                        let stream_id_clone = stream_id_clone.clone();
                                        let events_clone = events.clone();
                                        async move {
                                            event_store_clone
                                                .append_events(
                                                    stream_id_clone,
                                                    expected_version,
                                                    events_clone,
                                                )
                                                .await
                                        }
                                    })
                                    .await;

                                match result {
                                    Ok(version) => {
                                        tracing::debug!(
                                            new_version = ?version,
                                            "append_events succeeded"
                                        );
                                        on_success(version)
                                    }
                                    Err(error) => {
                                        tracing::warn!(error = %error, "append_events failed");
                                        on_error(error)
                                    }
                                }
                            }
                            EventStoreOperation::LoadEvents {
                                event_store,
                                stream_id,
                                from_version,
                                on_success,
                                on_error,
                            } => {
                                tracing::debug!(
                                    stream_id = %stream_id,
                                    from_version = ?from_version,
                                    "Executing load_events"
                                );

                                let stream_id_clone = stream_id.clone();
                                let result = store
                                    .retry_operation("load_events", || {
                                        let event_store_clone = event_store.clone();
                                        let stream_id_clone = stream_id_clone.clone();
                                        async move {
                                            event_store_clone
                                                .load_events(stream_id_clone, from_version)
                                                .await
                                        }
                                    })
                                    .await;

                                match result {
                                    Ok(events) => {
                                        tracing::debug!(
                                            event_count = events.len(),
                                            "load_events succeeded"
                                        );
                                        on_success(events)
                                    }
                                    Err(error) => {
                                        tracing::warn!(error = %error, "load_events failed");
                                        on_error(error)
                                    }
                                }
                            }
                            EventStoreOperation::SaveSnapshot {
                                event_store,
                                stream_id,
                                version,
                                state,
                                on_success,
                                on_error,
                            } => {
                                tracing::debug!(
                                    stream_id = %stream_id,
                                    version = ?version,
                                    state_size = state.len(),
                                    "Executing save_snapshot"
                                );

                                let stream_id_clone = stream_id.clone();
                                let state_clone = state.clone();
                                let result = store
                                    .retry_operation("save_snapshot", || {
                                        let event_store_clone = event_store.clone();
                                        let stream_id_clone = stream_id_clone.clone();
                                        let state_clone = state_clone.clone();
                                        async move {
                                            event_store_clone
                                                .save_snapshot(stream_id_clone, version, state_clone)
                                                .await
                                        }
                                    })
                                    .await;

                                match result {
                                    Ok(()) => {
                                        tracing::debug!("save_snapshot succeeded");
                                        on_success(())
                                    }
                                    Err(error) => {
                                        tracing::warn!(error = %error, "save_snapshot failed");
                                        on_error(error)
                                    }
                                }
                            }
                            EventStoreOperation::LoadSnapshot {
                                event_store,
                                stream_id,
                                on_success,
                                on_error,
                            } => {
                                tracing::debug!(stream_id = %stream_id, "Executing load_snapshot");

                                let stream_id_clone = stream_id.clone();
                                let result = store
                                    .retry_operation("load_snapshot", || {
                                        let event_store_clone = event_store.clone();
                                        let stream_id_clone = stream_id_clone.clone();
                                        async move {
                                            event_store_clone.load_snapshot(stream_id_clone).await
                                        }
                                    })
                                    .await;

                                match result {
                                    Ok(snapshot) => {
                                        tracing::debug!(
                                            has_snapshot = snapshot.is_some(),
                                            "load_snapshot succeeded"
                                        );
                                        on_success(snapshot)
                                    }
                                    Err(error) => {
                                        tracing::warn!(error = %error, "load_snapshot failed");
                                        on_error(error)
                                    }
                                }
                            }
                        };

                        // The callback's action re-enters the loop
                        if let Some(action) = action {
                            tracing::trace!("EventStore operation produced an action");
                            let _ = store.send(action).await;
                        } else {
                            tracing::trace!("EventStore operation completed with no action");
                        }
                    });
                }
                Effect::PublishEvent(op) => {
                    use stagepass_core::effect::EventBusOperation;

                    tracing::trace!("Executing Effect::PublishEvent");
                    metrics::counter!("store.effects.executed", "type" => "publish_event")
                        .increment(1);
                    tracking.increment();

                    // Counted store-wide so shutdown knows what is in flight
                    self.pending_effects.fetch_add(1, Ordering::SeqCst);
                    let pending_guard = AtomicCounterGuard(Arc::clone(&self.pending_effects));

                    let tracking_clone = tracking.clone();
                    let store = self.clone();

                    tokio::spawn(async move {
                        let _guard = DecrementGuard(tracking_clone);
                        let _pending_guard = pending_guard; // Drop decrements

                        let action = match op {
                            EventBusOperation::Publish {
                                event_bus,
                                topic,
                                event,
                                on_success,
                                on_error,
                            } => {
                                tracing::debug!(
                                    topic = %topic,
                                    event_type = %event.event_type,
                                    "Executing publish"
                                );

                                let topic_clone = topic.clone();
                                let event_clone = event.clone();
                                let result = store
                                    .retry_operation("publish", || {
                                        let event_bus_clone = event_bus.clone();
                                        let topic_clone = topic_clone.clone();
                                        let event_clone = event_clone.clone();
                                        async move {
                                            event_bus_clone.publish(&topic_clone, &event_clone).await
                                        }
                                    })
                                    .await;

                                match result {
                                    Ok(()) => {
                                        tracing::debug!(topic = %topic, "publish succeeded");
                                        on_success(())
                                    }
                                    Err(error) => {
                                        tracing::warn!(
                                            topic = %topic,
                                            error = %error,
                                            "publish failed"
                                        );
                                        on_error(error)
                                    }
                                }
                            }
                        };

                        // The callback's action re-enters the loop
                        if let Some(action) = action {
                            tracing::trace!("PublishEvent operation produced an action");
                            let _ = store.send(action).await;
                        } else {
                            tracing::trace!("PublishEvent operation completed with no action");
                        }
                    });
                }
            }
        }
    }

    impl<S, A, E, R> Clone for Store<S, A, E, R>
    where
        R: Reducer<State = S, Action = A, Environment = E> + Clone,
        E: Clone,
    {
        fn clone(&self) -> Self {
            Self {
                state: Arc::clone(&self.state),
                reducer: self.reducer.clone(),
                environment: self.environment.clone(),
                retry_policy: self.retry_policy.clone(),
                shutdown: Arc::clone(&self.shutdown),
                shutdown_signal: self.shutdown_signal.clone(),
                shutdown_timeout: self.shutdown_timeout,
                pending_effects: Arc::clone(&self.pending_effects),
                action_broadcast: self.action_broadcast.clone(),
            }
        }
    }
}

pub use store::Store;





#[cfg(test)]
mod config_tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let config = StoreConfig::default();

        assert_eq!(config.broadcast_capacity, 16);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(30));
        assert_eq!(config.retry_policy.max_attempts(), 5);
    }

    #[test]
    fn builders_override_defaults() {
        let config = StoreConfig::default()
            .with_broadcast_capacity(256)
            .with_shutdown_timeout(Duration::from_secs(60))
            .with_retry_policy(RetryPolicy::new().with_max_attempts(2));

        assert_eq!(config.broadcast_capacity, 256);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(60));
        assert_eq!(config.retry_policy.max_attempts(), 2);
    }
}
