//! # Subscriber fan-out for pool events.
//!
//! The pool forwards every bus [`Event`] (slot acquired/released, supervisor
//! state changes, script failures, kill requests, shutdown progress) to a
//! [`SubscriberSet`]. Each subscriber gets its own bounded lane and its own
//! tokio task, so a slow or panicking subscriber never stalls the supervisors
//! or the other subscribers.
//!
//! ```text
//! pool listener ── emit(&Event) ──┬─► lane "log-writer" ─► task ─► on_event()
//!                                 └─► lane "metrics"    ─► task ─► on_event()
//! ```
//!
//! ## Rules
//! - `emit` never awaits; a full lane drops the event for that subscriber only.
//! - Events of one subscriber arrive in bus order.
//! - A panic in `on_event` is logged with the event kind and slot; the lane keeps running.

use std::any::Any;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;

use crate::events::Event;

use super::Subscribe;

struct Lane {
    subscriber: &'static str,
    tx: mpsc::Sender<Arc<Event>>,
    task: JoinHandle<()>,
}

/// Fans pool events out to subscribers.
pub struct SubscriberSet {
    lanes: Vec<Lane>,
}

impl SubscriberSet {
    /// Spawns one delivery task per subscriber. Must be called inside a tokio runtime.
    #[must_use]
    pub fn new(subs: Vec<Arc<dyn Subscribe>>) -> Self {
        Self {
            lanes: subs.into_iter().map(spawn_lane).collect(),
        }
    }

    /// Queues `event` for every subscriber without waiting.
    pub fn emit(&self, event: &Event) {
        if self.lanes.is_empty() {
            return;
        }
        let event = Arc::new(event.clone());
        for lane in &self.lanes {
            let why = match lane.tx.try_send(Arc::clone(&event)) {
                Ok(()) => continue,
                Err(TrySendError::Full(_)) => "queue full",
                Err(TrySendError::Closed(_)) => "lane closed",
            };
            tracing::warn!(
                subscriber = lane.subscriber,
                kind = ?event.kind,
                slot = ?event.slot,
                "event dropped: {why}"
            );
        }
    }

    /// Closes every lane and waits until queued events are delivered.
    pub async fn shutdown(self) {
        let tasks: Vec<_> = self
            .lanes
            .into_iter()
            .map(|Lane { task, .. }| task)
            .collect();
        for task in tasks {
            let _ = task.await;
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lanes.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lanes.len()
    }
}

fn spawn_lane(sub: Arc<dyn Subscribe>) -> Lane {
    let subscriber = sub.name();
    let (tx, mut rx) = mpsc::channel::<Arc<Event>>(sub.queue_capacity().max(1));
    let task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let delivery = std::panic::AssertUnwindSafe(sub.on_event(&event)).catch_unwind();
            if let Err(payload) = delivery.await {
                tracing::error!(
                    subscriber,
                    kind = ?event.kind,
                    slot = ?event.slot,
                    panic = %panic_message(payload.as_ref()),
                    "subscriber panicked"
                );
            }
        }
    });
    Lane {
        subscriber,
        tx,
        task,
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&'static str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<u64>>,
    }

    #[async_trait]
    impl Subscribe for Recorder {
        async fn on_event(&self, event: &Event) {
            self.seen.lock().push(event.seq);
        }

        fn name(&self) -> &'static str {
            "recorder"
        }
    }

    struct Panicker;

    #[async_trait]
    impl Subscribe for Panicker {
        async fn on_event(&self, _event: &Event) {
            panic!("boom");
        }
    }

    /// Holds its lane until released.
    struct Stalled {
        release: tokio_util::sync::CancellationToken,
        seen: Mutex<usize>,
    }

    #[async_trait]
    impl Subscribe for Stalled {
        async fn on_event(&self, _event: &Event) {
            self.release.cancelled().await;
            *self.seen.lock() += 1;
        }

        fn queue_capacity(&self) -> usize {
            1
        }
    }

    #[tokio::test]
    async fn test_fifo_delivery_and_panic_isolation() {
        let rec = Arc::new(Recorder::default());
        let set = SubscriberSet::new(vec![rec.clone(), Arc::new(Panicker)]);
        assert_eq!(set.len(), 2);

        let events: Vec<Event> = (1..=5)
            .map(|slot| Event::new(EventKind::SlotAcquired).with_slot(slot))
            .collect();
        for ev in &events {
            set.emit(ev);
        }
        set.shutdown().await;

        let expected: Vec<u64> = events.iter().map(|e| e.seq).collect();
        assert_eq!(*rec.seen.lock(), expected);
    }

    #[tokio::test]
    async fn test_full_lane_drops_only_for_that_subscriber() {
        let rec = Arc::new(Recorder::default());
        let stalled = Arc::new(Stalled {
            release: tokio_util::sync::CancellationToken::new(),
            seen: Mutex::new(0),
        });
        let set = SubscriberSet::new(vec![rec.clone(), stalled.clone()]);

        for slot in 1..=4 {
            set.emit(&Event::new(EventKind::SlotReleased).with_slot(slot));
            tokio::task::yield_now().await;
        }
        stalled.release.cancel();
        set.shutdown().await;

        assert_eq!(rec.seen.lock().len(), 4);
        assert!(*stalled.seen.lock() < 4);
    }
}
