//! Stream identity and versioning for the event store.
//!
//! Every aggregate instance writes to exactly one stream. The ledger for
//! event `7f3a` lives at `ledger-7f3a` and its door-scan register at
//! `scan-7f3a`; [`StreamId`] names the stream and [`Version`] orders the
//! events inside it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error type for `StreamId` parsing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid stream ID: {0}")]
pub struct ParseStreamIdError(String);

/// Name of a single event stream.
///
/// Wraps a `String` so a stream name cannot be confused with any other string
/// in a signature. Construction comes in two flavors: `new()` and the `From`
/// impls trust their input, while `FromStr` rejects the empty string and is
/// the entry point for anything user-supplied.
///
/// # Examples
///
/// ```
/// use stagepass_core::stream::StreamId;
///
/// let ledger = StreamId::new("ledger-evt-7f3a");
/// assert_eq!(ledger.as_str(), "ledger-evt-7f3a");
///
/// let scan: StreamId = "scan-evt-7f3a".parse().unwrap();
/// assert_eq!(scan, StreamId::new("scan-evt-7f3a"));
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamId(String);

impl StreamId {
    /// Create a stream ID from trusted input, without validation.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the stream ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Unwrap into the inner `String`.
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for StreamId {
    type Err = ParseStreamIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ParseStreamIdError("Stream ID cannot be empty".to_string()));
        }
        Ok(Self(s.to_string()))
    }
}

impl From<String> for StreamId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for StreamId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for StreamId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Position of an event within its stream, used for optimistic concurrency.
///
/// A new stream starts at [`Version::INITIAL`]; each appended event advances
/// the version by one. Appends state the version they expect, and a mismatch
/// fails the write. Two sellers racing for the last tickets of a tier read
/// the same version, and only one append can win it.
///
/// # Examples
///
/// ```
/// use stagepass_core::stream::Version;
///
/// let head = Version::INITIAL.next();
/// assert_eq!(head.value(), 1);
/// assert!(!head.is_initial());
/// ```
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Version(u64);

impl Version {
    /// The version of a stream with no events yet.
    pub const INITIAL: Self = Self(0);

    /// Create a `Version` with the given value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// The version number.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// The version after this one.
    ///
    /// Plain `+ 1`: no stream accumulates anywhere near `u64::MAX` events,
    /// so overflow is not handled.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Whether this is the initial version (0).
    #[must_use]
    pub const fn is_initial(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Version {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<Version> for u64 {
    fn from(version: Version) -> Self {
        version.0
    }
}

/// Offsets a version forward. Overflow is not handled, as with [`Version::next`].
impl std::ops::Add<u64> for Version {
    type Output = Self;

    fn add(self, rhs: u64) -> Self::Output {
        Self(self.0 + rhs)
    }
}

/// Offsets a version backward. The caller keeps the result at or above zero.
impl std::ops::Sub<u64> for Version {
    type Output = Self;

    fn sub(self, rhs: u64) -> Self::Output {
        Self(self.0 - rhs)
    }
}
