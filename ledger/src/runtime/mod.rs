//! Background runtime: event consumption off the bus.
//!
//! - **`consumer`**: generic subscribe-process-reconnect loop over the
//!   event bus
//! - **`handlers`**: the handlers wired into consumers, bridging ledger
//!   events to the scan register and the settlement read model

pub mod consumer;
pub mod handlers;

pub use consumer::EventConsumer;
pub use handlers::{EventHandler, ExpiryMetrics, SettlementProjector, TicketRegistrar};
