//! # Stagepass Core
//!
//! Core traits and types for the Stagepass ledger architecture.
//!
//! Stagepass models every consistency boundary (the per-event inventory
//! ledger, the door-scan register) as an event-sourced aggregate driven by a
//! reducer. This crate provides the vocabulary those aggregates are written
//! in; the `stagepass-runtime` crate executes them.
//!
//! ## Core Concepts
//!
//! - **State**: owned domain state for one aggregate
//! - **Action**: all inputs to a reducer, both commands (requests to change
//!   state) and events (facts about what happened)
//! - **Reducer**: pure function `(State, Action, Environment) → Effects`,
//!   mutating state in place and returning effect descriptions
//! - **Effect**: a description of a side effect (event-store append, event
//!   publication, delayed action), never the execution itself
//! - **Environment**: injected dependencies behind traits ([`Clock`],
//!   [`EventStore`], [`EventBus`])
//!
//! ```text
//!  command ──▶ Store ──▶ Reducer.reduce(&mut state, action, env)
//!                │                 │
//!                │                 └──▶ SmallVec<[Effect; 4]>
//!                │                          │
//!                ▼                          ▼
//!         action broadcast        append_events! / publish_event! / delay!
//!                                           │
//!                                           └──▶ feedback actions
//! ```
//!
//! ## Architecture Principles
//!
//! - Functional core, imperative shell
//! - Unidirectional data flow with explicit feedback
//! - No hidden I/O: every side effect is a returned [`Effect`]
//! - Dependency injection via the Environment parameter
//!
//! [`Clock`]: environment::Clock
//! [`EventStore`]: event_store::EventStore
//! [`EventBus`]: event_bus::EventBus
//! [`Effect`]: effect::Effect

// Re-export commonly used types so aggregates need a single import line.
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};
pub use smallvec::{SmallVec, smallvec};

pub mod effect;
pub mod effect_macros;
pub mod environment;
pub mod event;
pub mod event_bus;
pub mod event_store;
pub mod reducer;
pub mod stream;
