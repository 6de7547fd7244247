//! Dependency injection traits shared by aggregate environments.
//!
//! Every external dependency a reducer needs, most importantly time,
//! enters through its Environment struct behind a trait. Expiry logic
//! (transfer windows, hold deadlines, activation codes) never calls
//! `Utc::now()` directly; it asks the injected clock, which keeps reducers
//! deterministic and lets tests pin time to a fixed instant.

use chrono::{DateTime, Utc};

/// Abstracts time for testability.
///
/// Production environments inject [`SystemClock`]; tests inject the fixed
/// or stepping clocks from `stagepass-testing`, advancing time explicitly
/// when a scenario needs a hold or transfer to expire.
pub trait Clock: Send + Sync {
    /// Get the current time
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
