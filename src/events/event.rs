//! # Runtime events emitted by supervisors and the pool.
//!
//! The [`EventKind`] enum classifies event types across three categories:
//! - **Supervisor events**: state changes, helper script failures, kill requests
//! - **Pool events**: slot bookkeeping and refill scheduling
//! - **Shutdown events**: pool shutdown progress
//!
//! The [`Event`] struct carries additional metadata such as timestamps, slot,
//! state, reasons, and delays.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases monotonically.
//! Use `seq` to restore the exact order when events are delivered out of order.
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use slotvisor::{Event, EventKind, SupervisorState};
//!
//! let ev = Event::new(EventKind::StateChanged)
//!     .with_slot(2)
//!     .with_state(SupervisorState::Running);
//!
//! assert_eq!(ev.kind, EventKind::StateChanged);
//! assert_eq!(ev.slot, Some(2));
//! assert_eq!(ev.state, Some(SupervisorState::Running));
//! ```

use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use crate::core::SupervisorState;

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Supervisor events ===
    /// A supervisor entered a new state.
    ///
    /// Sets:
    /// - `slot`: supervisor slot
    /// - `state`: the new state
    StateChanged,

    /// A helper script failed or timed out.
    ///
    /// Sets:
    /// - `slot`: supervisor slot
    /// - `reason`: error message
    /// - `timeout_ms`: script timeout (only on timeout)
    ScriptFailed,

    /// The running worker is going to be killed.
    ///
    /// Sets:
    /// - `slot`: supervisor slot
    /// - `reason`: kill reason (`timeout`, `too_much_output`, `destroy_requested`)
    KillRequested,

    // === Pool events ===
    /// A slot was given to a new supervisor.
    ///
    /// Sets:
    /// - `slot`: acquired slot
    SlotAcquired,

    /// A finished supervisor was removed and its slot freed.
    ///
    /// Sets:
    /// - `slot`: freed slot
    /// - `reason`: failure message (only when the supervisor failed)
    SlotReleased,

    /// A failed slot is held for the cooldown before it is reused.
    ///
    /// Sets:
    /// - `slot`: held slot
    /// - `delay_ms`: cooldown
    /// - `reason`: failure message
    RefillDelayed,

    // === Shutdown events ===
    /// Pool shutdown started.
    ShutdownRequested,

    /// All supervisors settled within the shutdown grace period.
    AllStoppedWithin,

    /// Shutdown grace period exceeded; some supervisors did not settle in time.
    ///
    /// Sets:
    /// - `reason`: list of stuck slots
    GraceExceeded,
}

/// Runtime event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - other optional fields are set depending on the [`EventKind`]
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,

    /// Slot of the supervisor involved, if applicable.
    pub slot: Option<u32>,
    /// Supervisor state, for state changes.
    pub state: Option<SupervisorState>,
    /// Human-readable reason (errors, kill reasons, etc.).
    pub reason: Option<Arc<str>>,
    /// Timeout in milliseconds (compact).
    pub timeout_ms: Option<u32>,
    /// Delay in milliseconds (compact).
    pub delay_ms: Option<u32>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            slot: None,
            state: None,
            reason: None,
            timeout_ms: None,
            delay_ms: None,
        }
    }

    /// Attaches a slot number.
    #[inline]
    pub fn with_slot(mut self, slot: u32) -> Self {
        self.slot = Some(slot);
        self
    }

    /// Attaches a supervisor state.
    #[inline]
    pub fn with_state(mut self, state: SupervisorState) -> Self {
        self.state = Some(state);
        self
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Attaches a timeout duration (stored as milliseconds).
    #[inline]
    pub fn with_timeout(mut self, d: Duration) -> Self {
        self.timeout_ms = Some(compact_ms(d));
        self
    }

    /// Attaches a delay (stored as milliseconds).
    #[inline]
    pub fn with_delay(mut self, d: Duration) -> Self {
        self.delay_ms = Some(compact_ms(d));
        self
    }

    /// State-change event for `slot`.
    #[inline]
    pub fn state_changed(slot: u32, state: SupervisorState) -> Self {
        Event::new(EventKind::StateChanged)
            .with_slot(slot)
            .with_state(state)
    }

    /// True for `StateChanged` events carrying a terminal state.
    #[inline]
    pub fn is_terminal_state(&self) -> bool {
        matches!(self.kind, EventKind::StateChanged)
            && self.state.is_some_and(SupervisorState::is_terminal)
    }
}

fn compact_ms(d: Duration) -> u32 {
    d.as_millis().min(u128::from(u32::MAX)) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_is_monotonic() {
        let a = Event::new(EventKind::SlotAcquired);
        let b = Event::new(EventKind::SlotReleased);
        assert!(b.seq > a.seq);
    }

    #[test]
    fn test_durations_are_compacted() {
        let ev = Event::new(EventKind::RefillDelayed)
            .with_delay(Duration::from_secs(3))
            .with_timeout(Duration::from_secs(u64::MAX));
        assert_eq!(ev.delay_ms, Some(3000));
        assert_eq!(ev.timeout_ms, Some(u32::MAX));
    }

    #[test]
    fn test_terminal_state_detection() {
        assert!(Event::state_changed(1, SupervisorState::Failed).is_terminal_state());
        assert!(Event::state_changed(1, SupervisorState::Done).is_terminal_state());
        assert!(!Event::state_changed(1, SupervisorState::Ready).is_terminal_state());
        assert!(!Event::new(EventKind::SlotReleased).is_terminal_state());
    }
}
