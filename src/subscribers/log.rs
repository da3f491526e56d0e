//! # LogWriter: simple event printer
//!
//! A minimal subscriber that writes incoming [`Event`]s through `tracing` (info level).
//! Use it for test or demo.
//!
//! ## Example output
//! ```text
//! [slot-acquired] slot=1
//! [state] slot=1 state=prepare
//! [script-failed] slot=1 err="script prepareCommand failed with signal 0, code 1"
//! [refill-delayed] slot=1 delay_ms=3000 err="..."
//! [kill-requested] slot=2 reason=timeout
//! [slot-released] slot=2
//! [shutdown-requested]
//! [all-stopped-within-grace]
//! ```

use async_trait::async_trait;

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Event writer subscriber.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    /// Construct a new [`LogWriter`].
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let slot = e.slot.unwrap_or(0);
        match e.kind {
            EventKind::StateChanged => {
                let state = e.state.map(|s| s.as_str()).unwrap_or("unknown");
                tracing::info!("[state] slot={slot} state={state}");
            }
            EventKind::ScriptFailed => {
                tracing::info!(
                    "[script-failed] slot={slot} err={:?} timeout_ms={:?}",
                    e.reason, e.timeout_ms
                );
            }
            EventKind::KillRequested => {
                tracing::info!(
                    "[kill-requested] slot={slot} reason={}",
                    e.reason.as_deref().unwrap_or("unknown")
                );
            }
            EventKind::SlotAcquired => {
                tracing::info!("[slot-acquired] slot={slot}");
            }
            EventKind::SlotReleased => {
                tracing::info!("[slot-released] slot={slot}");
            }
            EventKind::RefillDelayed => {
                tracing::info!(
                    "[refill-delayed] slot={slot} delay_ms={:?} err={:?}",
                    e.delay_ms, e.reason
                );
            }
            EventKind::ShutdownRequested => {
                tracing::info!("[shutdown-requested]");
            }
            EventKind::AllStoppedWithin => {
                tracing::info!("[all-stopped-within-grace]");
            }
            EventKind::GraceExceeded => {
                tracing::info!("[grace-exceeded] stuck={:?}", e.reason);
            }
        }
    }

    fn name(&self) -> &'static str {
        "log-writer"
    }
}
