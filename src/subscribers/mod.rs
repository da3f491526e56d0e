//! # Event subscribers.
//!
//! This module provides the [`Subscribe`] trait and the [`SubscriberSet`] fan-out
//! used by the pool to deliver [`Event`](crate::Event)s from the
//! [`Bus`](crate::Bus) to user code.
//!
//! ## Architecture
//! ```text
//! Event flow:
//!   Supervisor/Pool ── publish(Event) ──► Bus ──► pool listener ──► SubscriberSet::emit
//!                                                                    │
//!                                                        ┌───────────┼───────────┐
//!                                                        ▼           ▼           ▼
//!                                                    LogWriter    Metrics     Custom
//! ```
//!
//! ## Implementing custom subscribers
//! ```no_run
//! use slotvisor::{Event, EventKind, Subscribe};
//! use async_trait::async_trait;
//!
//! struct FailureCounter;
//!
//! #[async_trait]
//! impl Subscribe for FailureCounter {
//!     async fn on_event(&self, event: &Event) {
//!         if matches!(event.kind, EventKind::ScriptFailed) {
//!             // increment failure counter
//!         }
//!     }
//!
//!     fn name(&self) -> &'static str { "failures" }
//! }
//! ```

#[cfg(feature = "logging")]
mod log;
mod set;
mod subscriber;

#[cfg(feature = "logging")]
pub use log::LogWriter;
pub use set::SubscriberSet;
pub use subscriber::Subscribe;
