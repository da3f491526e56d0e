//! # WorkerSupervisorPool: keeps every slot staffed.
//!
//! The pool owns up to `max_workers` [`Supervisor`]s, one per slot, and
//! replaces each of them once it finishes.
//!
//! ## Architecture
//! ```text
//! start() ──► fill(): for every free slot (smallest first)
//!               ├─ Supervisor::new_with(slot) ──► slots[slot]
//!               ├─ publish SlotAcquired
//!               ├─ spawn watch_slot(completion)
//!               └─ supervisor.start()
//!
//! watch_slot:
//!   completion Ok  ──► release slot ──► yield ──► fill()
//!   completion Err ──► RefillDelayed ──► sleep(pause_on_failure) ──► release slot ──► fill()
//!
//! shutdown():
//!   stop refilling ──► destroy all ──► wait up to shutdown_grace
//!     ├─ all settled ──► AllStoppedWithin
//!     └─ timeout     ──► GraceExceeded ──► PoolError::GraceExceeded { stuck }
//! ```
//!
//! ## Rules
//! - A slot is occupied while a supervisor owns it; at most one supervisor per slot.
//! - A failed slot stays occupied for `pause_on_failure` before its replacement starts.
//! - Slot bookkeeping events are published under the slot lock, so
//!   `SlotAcquired` and `SlotReleased` alternate per slot.
//!
//! ## Example
//! ```no_run
//! use std::sync::Arc;
//! use slotvisor::{PoolConfig, WorkerConfig, WorkerSupervisorPool, WorkerTask};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let worker = WorkerConfig::new("/srv/sandbox")
//!         .with_run_worker(["python3", "{programPath}"])?;
//!     let pool = WorkerSupervisorPool::new(PoolConfig::default(), Arc::new(worker));
//!     pool.start();
//!
//!     let result = pool.run_task(WorkerTask::new(1, "print('hi')"))?.wait().await?;
//!     println!("exit code: {:?}", result.exit_code());
//!
//!     pool.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::Level;

use crate::config::{PoolConfig, WorkerConfig};
use crate::error::{PoolError, WorkerError};
use crate::events::{Bus, Event, EventKind};
use crate::log::LogSink;
use crate::result::WorkerTaskResult;
use crate::subscribers::SubscriberSet;
use crate::task::WorkerTask;

use super::builder::PoolBuilder;
use super::outcome::Outcome;
use super::supervisor::Supervisor;

/// Fixed-size set of sandbox slots, each driven by a [`Supervisor`].
///
/// Cloning is cheap; all clones control the same pool.
#[derive(Clone)]
pub struct WorkerSupervisorPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    cfg: PoolConfig,
    worker_config: Arc<WorkerConfig>,
    bus: Bus,
    subs: Arc<SubscriberSet>,
    log: Arc<dyn LogSink>,
    stopping: CancellationToken,
    listening: AtomicBool,
    slots: Mutex<BTreeMap<u32, Supervisor>>,
}

impl WorkerSupervisorPool {
    /// Creates a pool without subscribers that logs nowhere.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(cfg: PoolConfig, worker_config: Arc<WorkerConfig>) -> Self {
        PoolBuilder::new(cfg, worker_config).build()
    }

    /// Returns a builder for a pool with subscribers and a logger.
    pub fn builder(cfg: PoolConfig, worker_config: Arc<WorkerConfig>) -> PoolBuilder {
        PoolBuilder::new(cfg, worker_config)
    }

    pub(crate) fn new_internal(
        cfg: PoolConfig,
        worker_config: Arc<WorkerConfig>,
        bus: Bus,
        subs: Arc<SubscriberSet>,
        log: Arc<dyn LogSink>,
    ) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                cfg,
                worker_config,
                bus,
                subs,
                log,
                stopping: CancellationToken::new(),
                listening: AtomicBool::new(false),
                slots: Mutex::new(BTreeMap::new()),
            }),
        }
    }

    /// Fills every free slot with a started supervisor.
    ///
    /// Calling it again is harmless. Does nothing after [`shutdown`](Self::shutdown).
    pub fn start(&self) {
        if !self.inner.listening.swap(true, Ordering::AcqRel) {
            self.inner.subscriber_listener();
        }
        self.inner.fill();
    }

    /// First supervisor, by slot, that is ready and has no task yet.
    pub fn find_ready_worker(&self) -> Option<Supervisor> {
        self.inner
            .slots
            .lock()
            .values()
            .find(|s| s.is_ready())
            .cloned()
    }

    /// Assigns `task` to a ready supervisor.
    ///
    /// # Errors
    /// [`WorkerError::NoReadyWorker`] if no supervisor is ready.
    pub fn run_task(&self, task: WorkerTask) -> Result<Outcome<WorkerTaskResult>, WorkerError> {
        let ready: Vec<Supervisor> = self
            .inner
            .slots
            .lock()
            .values()
            .filter(|s| s.is_ready())
            .cloned()
            .collect();

        for sup in ready {
            match sup.run_task(task.clone()) {
                Ok(result) => return Ok(result),
                // Claimed by a concurrent caller; try the next one.
                Err(WorkerError::NotReady { .. }) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(WorkerError::NoReadyWorker)
    }

    /// Stops refilling, destroys every supervisor and waits for them to settle.
    ///
    /// # Errors
    /// [`PoolError::GraceExceeded`] with the slots that did not settle within
    /// `shutdown_grace`.
    pub async fn shutdown(&self) -> Result<(), PoolError> {
        let inner = &self.inner;
        inner.stopping.cancel();
        inner.bus.publish(Event::new(EventKind::ShutdownRequested));

        let live: Vec<Supervisor> = inner.slots.lock().values().cloned().collect();
        for sup in &live {
            sup.destroy();
        }

        let grace = inner.cfg.shutdown_grace;
        let done = futures::future::join_all(live.iter().map(|s| {
            let completion = s.completion();
            async move {
                let _ = completion.wait().await;
            }
        }));

        match tokio::time::timeout(grace, done).await {
            Ok(_) => {
                inner.bus.publish(Event::new(EventKind::AllStoppedWithin));
                Ok(())
            }
            Err(_) => {
                let stuck: Vec<u32> = live
                    .iter()
                    .filter(|s| !s.completion().is_settled())
                    .map(Supervisor::slot)
                    .collect();
                inner.bus.publish(
                    Event::new(EventKind::GraceExceeded).with_reason(format!("{stuck:?}")),
                );
                inner.log.log(
                    Level::ERROR,
                    &format!("pool shutdown grace {grace:?} exceeded, stuck slots {stuck:?}"),
                );
                Err(PoolError::GraceExceeded { grace, stuck })
            }
        }
    }

    /// Occupied slots, ascending.
    pub fn occupied_slots(&self) -> Vec<u32> {
        self.inner.slots.lock().keys().copied().collect()
    }

    /// Supervisors currently holding a slot, by slot.
    pub fn workers(&self) -> Vec<Supervisor> {
        self.inner.slots.lock().values().cloned().collect()
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.inner.slots.lock().len()
    }

    /// True if no slot is occupied.
    pub fn is_empty(&self) -> bool {
        self.inner.slots.lock().is_empty()
    }

    /// Event bus shared by the pool and its supervisors.
    pub fn bus(&self) -> &Bus {
        &self.inner.bus
    }

    /// Pool configuration.
    pub fn config(&self) -> &PoolConfig {
        &self.inner.cfg
    }
}

impl PoolInner {
    /// Subscribes to the bus and forwards events to the subscriber set (fire-and-forget).
    fn subscriber_listener(&self) {
        if self.subs.is_empty() {
            return;
        }
        let mut rx = self.bus.subscribe();
        let set = Arc::clone(&self.subs);
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(ev) => set.emit(&ev),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "subscriber listener lagged");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
                }
            }
        });
    }

    /// Starts a supervisor in every free slot, smallest slot first.
    fn fill(self: &Arc<Self>) {
        let max = u32::try_from(self.cfg.max_workers_clamped()).unwrap_or(u32::MAX);
        loop {
            if self.stopping.is_cancelled() {
                return;
            }
            let sup = {
                let mut slots = self.slots.lock();
                let Some(slot) = (1..=max).find(|s| !slots.contains_key(s)) else {
                    return;
                };
                let sup = Supervisor::new_with(
                    Arc::clone(&self.worker_config),
                    slot,
                    Arc::clone(&self.log),
                    Some(self.bus.clone()),
                );
                slots.insert(slot, sup.clone());
                self.bus
                    .publish(Event::new(EventKind::SlotAcquired).with_slot(slot));
                sup
            };

            let completion = sup.completion();
            tokio::spawn(watch_slot(Arc::clone(self), sup.slot(), completion));
            if let Err(e) = sup.start(false) {
                self.log.log(
                    Level::ERROR,
                    &format!("{}: failed to start: {e}", sup.name()),
                );
            }
        }
    }

    /// Frees `slot`.
    fn release(&self, slot: u32, err: Option<&WorkerError>) {
        let mut slots = self.slots.lock();
        if slots.remove(&slot).is_none() {
            return;
        }
        let mut ev = Event::new(EventKind::SlotReleased).with_slot(slot);
        if let Some(err) = err {
            ev = ev.with_reason(err.to_string());
        }
        self.bus.publish(ev);
    }
}

/// Waits for the supervisor of `slot` to finish, then frees and refills the slot.
async fn watch_slot(pool: Arc<PoolInner>, slot: u32, completion: Outcome<()>) {
    match completion.wait().await {
        Ok(()) => {
            pool.release(slot, None);
            tokio::task::yield_now().await;
        }
        Err(err) => {
            let pause = pool.worker_config.pause_on_failure;
            pool.log.log(
                Level::WARN,
                &format!("worker/{slot} failed, slot paused for {pause:?}: {err}"),
            );
            pool.bus.publish(
                Event::new(EventKind::RefillDelayed)
                    .with_slot(slot)
                    .with_delay(pause)
                    .with_reason(err.to_string()),
            );
            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                _ = pool.stopping.cancelled() => {}
            }
            pool.release(slot, Some(&err));
        }
    }
    pool.fill();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::SupervisorState;
    use std::time::Duration;

    fn pool(max_workers: usize, worker: WorkerConfig) -> WorkerSupervisorPool {
        let cfg = PoolConfig {
            max_workers,
            shutdown_grace: Duration::from_secs(5),
            ..PoolConfig::default()
        };
        WorkerSupervisorPool::new(cfg, Arc::new(worker))
    }

    async fn wait_until(mut f: impl FnMut() -> bool) {
        for _ in 0..500 {
            if f() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_fills_slots_smallest_first() {
        let dir = tempfile::tempdir().unwrap();
        let pool = pool(3, WorkerConfig::new(dir.path()));
        assert!(pool.is_empty());
        assert!(pool.find_ready_worker().is_none());

        pool.start();
        pool.start();
        assert_eq!(pool.occupied_slots(), vec![1, 2, 3]);
        assert_eq!(pool.len(), 3);

        wait_until(|| pool.workers().iter().all(Supervisor::is_ready)).await;
        assert_eq!(pool.find_ready_worker().map(|s| s.slot()), Some(1));

        pool.shutdown().await.unwrap();
        assert!(pool
            .workers()
            .iter()
            .all(|s| s.state() == SupervisorState::Failed));
    }

    #[tokio::test]
    async fn test_run_task_without_ready_worker() {
        let dir = tempfile::tempdir().unwrap();
        let pool = pool(1, WorkerConfig::new(dir.path()));
        assert_eq!(
            pool.run_task(WorkerTask::new(1, "")).err(),
            Some(WorkerError::NoReadyWorker)
        );
    }

    #[tokio::test]
    async fn test_no_refill_after_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let pool = pool(2, WorkerConfig::new(dir.path()).with_pause_on_failure(Duration::ZERO));
        pool.start();
        pool.shutdown().await.unwrap();

        wait_until(|| pool.is_empty()).await;
        pool.start();
        assert!(pool.is_empty());
    }
}
