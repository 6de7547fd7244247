//! Runtime configuration for the ledger service.
//!
//! Every knob reads from a `STAGEPASS_*` environment variable and falls back
//! to a default that works for a small event out of the box. The demo binary
//! loads a `.env` file first, so local overrides need no shell exports.

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Timing and code-generation settings for one ledger service
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Seconds a transfer stays pending before it expires (default 48 hours)
    pub transfer_expiry_secs: u64,
    /// Minutes a cash-order hold reserves capacity when the caller does not
    /// pick a deadline (default 30)
    pub default_hold_minutes: u32,
    /// Seconds an activation code stays valid (default 15 minutes); the
    /// hold's own deadline still caps it
    pub activation_code_ttl_secs: u64,
    /// Seconds between background expiry sweeps (default 60)
    pub sweep_interval_secs: u64,
    /// Characters in a generated ticket code (default 8)
    pub ticket_code_length: usize,
    /// Action broadcast capacity for each store (default 64)
    pub broadcast_capacity: usize,
}

impl LedgerConfig {
    /// Loads configuration from environment variables, falling back to
    /// defaults for anything unset or unparseable
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            transfer_expiry_secs: env::var("STAGEPASS_TRANSFER_EXPIRY_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(172_800),
            default_hold_minutes: env::var("STAGEPASS_DEFAULT_HOLD_MINUTES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(30),
            activation_code_ttl_secs: env::var("STAGEPASS_ACTIVATION_CODE_TTL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(900),
            sweep_interval_secs: env::var("STAGEPASS_SWEEP_INTERVAL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(60),
            ticket_code_length: env::var("STAGEPASS_TICKET_CODE_LENGTH")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(8),
            broadcast_capacity: env::var("STAGEPASS_BROADCAST_CAPACITY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(64),
        }
    }

    /// How long a transfer stays pending
    #[must_use]
    pub fn transfer_expiry(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.transfer_expiry_secs).unwrap_or(i64::MAX))
    }

    /// The same transfer deadline as a runtime duration, for the delayed
    /// expiry command scheduled when the transfer is requested
    #[must_use]
    pub const fn transfer_expiry_delay(&self) -> Duration {
        Duration::from_secs(self.transfer_expiry_secs)
    }

    /// Activation code lifetime
    #[must_use]
    pub fn activation_code_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(
            i64::try_from(self.activation_code_ttl_secs).unwrap_or(i64::MAX),
        )
    }

    /// Interval between background expiry sweeps
    #[must_use]
    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            transfer_expiry_secs: 172_800,
            default_hold_minutes: 30,
            activation_code_ttl_secs: 900,
            sweep_interval_secs: 60,
            ticket_code_length: 8,
            broadcast_capacity: 64,
        }
    }
}
