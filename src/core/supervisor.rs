//! # Supervisor: one sandbox slot, one task.
//!
//! A [`Supervisor`] prepares the sandbox of its slot, runs exactly one
//! [`WorkerTask`] in it and cleans up afterwards. It is one-shot: once it
//! reaches [`SupervisorState::Done`] or [`SupervisorState::Failed`] it is
//! discarded and a new one is created for the slot.
//!
//! ## Architecture
//! ```text
//! start() ──► tokio::spawn(drive)            handle (Clone)
//!               │                              ├─ state() / watch_states()
//!               ├─ cleanup script              ├─ run_task() ──► oneshot ──┐
//!               ├─ prepare script              ├─ destroy()  ──► CancellationToken
//!               ├─ READY ──► readiness         └─ completion()
//!               ├─ wait for task ◄─────────────────────────────────────────┘
//!               ├─ save code, spawn worker
//!               ├─ race: exit | max_execution_time | too much output | destroy
//!               │            └─► task result
//!               ├─ [kill ─► wait for termination]
//!               ├─ cleanup script
//!               └─ DONE / FAILED ──► completion
//! ```
//!
//! ## Rules
//! - The lifecycle runs in a single driver task, so transitions are strictly ordered.
//! - Readiness, task result and completion settle exactly once and never hang.
//! - The task result settles as soon as the worker exits or a kill reason is
//!   assigned; completion settles only after the post-task cleanup.
//! - Natural exit wins a tie against timeout, kill request and destroy. An
//!   output overflow seen while draining the pipes still counts as a kill.
//! - `destroy()` before the worker runs ends in `Failed` with
//!   [`WorkerError::Destroyed`]; while the worker runs it becomes a kill with
//!   [`KillReason::DestroyRequested`].
//! - At most one helper script and one worker process are alive at any time.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;
use tokio::process::Child;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::Level;

use crate::config::WorkerConfig;
use crate::error::WorkerError;
use crate::events::{Bus, Event, EventKind};
use crate::log::{LogSink, NoopLog};
use crate::result::{KillReason, WorkerTaskResult};
use crate::task::WorkerTask;

use super::outcome::{outcome, Outcome, Settler};
use super::process::{self, BusyGuard};
use super::script::ScriptContext;
use super::state::SupervisorState;

/// Time given to worker output pumps after the worker exited.
const OUTPUT_DRAIN: Duration = Duration::from_secs(1);

type TaskHandoff = (Arc<WorkerTask>, Settler<WorkerTaskResult>);

/// Handle to a per-slot sandbox state machine.
///
/// Cloning is cheap; all clones control the same supervisor.
#[derive(Clone)]
pub struct Supervisor {
    shared: Arc<Shared>,
}

struct Shared {
    slot: u32,
    name: String,
    config: Arc<WorkerConfig>,
    log: Arc<dyn LogSink>,
    bus: Option<Bus>,
    cancel: CancellationToken,
    helper_busy: AtomicBool,
    worker_busy: AtomicBool,
    completion: Outcome<()>,
    completion_observed: AtomicBool,
    inner: Mutex<Inner>,
}

struct Inner {
    state: SupervisorState,
    task_tx: Option<oneshot::Sender<TaskHandoff>>,
    launch: Option<Launch>,
    watchers: Vec<mpsc::UnboundedSender<SupervisorState>>,
}

/// Driver-side ends, taken by `start()`.
struct Launch {
    task_rx: oneshot::Receiver<TaskHandoff>,
    completion: Settler<()>,
}

/// Settlers the driver still owes an answer to.
#[derive(Default)]
struct Pending {
    readiness: Option<Settler<()>>,
    result: Option<Settler<WorkerTaskResult>>,
}

/// How the RUNNING race ended.
enum RunEnd {
    Exited(std::io::Result<std::process::ExitStatus>),
    Kill(KillReason),
}

/// A spawned worker and its output pumps.
struct Worker<'a> {
    child: Child,
    pumps: Vec<JoinHandle<()>>,
    kill_rx: mpsc::Receiver<KillReason>,
    _busy: BusyGuard<'a>,
}

impl Supervisor {
    /// Creates a supervisor for `slot` that logs nowhere and publishes no events.
    pub fn new(config: Arc<WorkerConfig>, slot: u32) -> Self {
        Self::new_with(config, slot, Arc::new(NoopLog), None)
    }

    /// Creates a supervisor for `slot` with an injected logger and an optional event bus.
    pub fn new_with(
        config: Arc<WorkerConfig>,
        slot: u32,
        log: Arc<dyn LogSink>,
        bus: Option<Bus>,
    ) -> Self {
        let (task_tx, task_rx) = oneshot::channel();
        let (completion_tx, completion_rx) = outcome("completion");
        Self {
            shared: Arc::new(Shared {
                slot,
                name: format!("worker/{slot}"),
                config,
                log,
                bus,
                cancel: CancellationToken::new(),
                helper_busy: AtomicBool::new(false),
                worker_busy: AtomicBool::new(false),
                completion: completion_rx,
                completion_observed: AtomicBool::new(false),
                inner: Mutex::new(Inner {
                    state: SupervisorState::Created,
                    task_tx: Some(task_tx),
                    launch: Some(Launch {
                        task_rx,
                        completion: completion_tx,
                    }),
                    watchers: Vec::new(),
                }),
            }),
        }
    }

    /// Starts the lifecycle: cleanup (unless `skip_cleanup`), then prepare.
    ///
    /// Returns the readiness result, settled with `Ok(())` on entering
    /// [`SupervisorState::Ready`] or with the error that failed the sandbox.
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    /// [`WorkerError::AlreadyStarted`] if called more than once.
    pub fn start(&self, skip_cleanup: bool) -> Result<Outcome<()>, WorkerError> {
        let launch = {
            let mut inner = self.shared.inner.lock();
            if inner.state != SupervisorState::Created {
                return Err(WorkerError::AlreadyStarted);
            }
            inner.launch.take().ok_or(WorkerError::AlreadyStarted)?
        };

        let (ready_tx, ready_rx) = outcome("readiness");
        let shared = Arc::clone(&self.shared);
        tokio::spawn(drive(shared, skip_cleanup, ready_tx, launch));
        Ok(ready_rx)
    }

    /// Hands `task` to a ready supervisor.
    ///
    /// Returns the task result, settled when the worker exits or is killed.
    ///
    /// # Errors
    /// [`WorkerError::NotReady`] outside of [`SupervisorState::Ready`] or when a
    /// task was already assigned.
    pub fn run_task(&self, task: WorkerTask) -> Result<Outcome<WorkerTaskResult>, WorkerError> {
        let tx = {
            let mut inner = self.shared.inner.lock();
            let state = inner.state;
            if state != SupervisorState::Ready {
                return Err(WorkerError::NotReady { state });
            }
            inner.task_tx.take().ok_or(WorkerError::NotReady { state })?
        };

        let (result_tx, result_rx) = outcome("task result");
        // A closed channel drops the settler, which cancels the result.
        let _ = tx.send((Arc::new(task), result_tx));
        Ok(result_rx)
    }

    /// Completion result: `Ok(())` once the supervisor is `Done`, the failure
    /// otherwise. This is the only signal about the health of the slot.
    pub fn completion(&self) -> Outcome<()> {
        self.shared.completion_observed.store(true, Ordering::Release);
        self.shared.completion.clone()
    }

    /// Requests termination.
    ///
    /// Idempotent and a no-op once terminal. When signalling is allowed any live
    /// helper or worker process is killed. Completion still settles through the
    /// normal path.
    pub fn destroy(&self) {
        let state = self.state();
        if state.is_terminal() || self.shared.cancel.is_cancelled() {
            return;
        }
        self.shared
            .log
            .log(Level::INFO, &format!("{} destroy requested in state={state}", self.shared.name));
        self.shared.cancel.cancel();
    }

    /// Subscribes to state transitions made after this call.
    ///
    /// Every transition is delivered, in order; the stream ends after the
    /// terminal state.
    pub fn watch_states(&self) -> mpsc::UnboundedReceiver<SupervisorState> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.shared.inner.lock();
        if !inner.state.is_terminal() {
            inner.watchers.push(tx);
        }
        rx
    }

    /// Current state.
    pub fn state(&self) -> SupervisorState {
        self.shared.inner.lock().state
    }

    /// True in [`SupervisorState::Ready`] with no task assigned yet.
    pub fn is_ready(&self) -> bool {
        let inner = self.shared.inner.lock();
        inner.state == SupervisorState::Ready && inner.task_tx.is_some()
    }

    /// True in a terminal state.
    pub fn is_finished(&self) -> bool {
        self.state().is_terminal()
    }

    /// Slot number.
    pub fn slot(&self) -> u32 {
        self.shared.slot
    }

    /// Log name, `worker/<slot>`.
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Configuration shared with the pool.
    pub fn config(&self) -> &Arc<WorkerConfig> {
        &self.shared.config
    }
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("slot", &self.shared.slot)
            .field("state", &self.state())
            .finish()
    }
}

/// Runs the whole lifecycle and settles every outstanding result.
async fn drive(shared: Arc<Shared>, skip_cleanup: bool, ready: Settler<()>, launch: Launch) {
    let Launch {
        task_rx,
        completion,
    } = launch;
    let mut pending = Pending {
        readiness: Some(ready),
        result: None,
    };

    match shared.lifecycle(skip_cleanup, &mut pending, task_rx).await {
        Ok(()) => {
            shared.transition(SupervisorState::Done);
            completion.settle(Ok(()));
        }
        Err(err) => {
            if let Some(r) = pending.readiness.take() {
                r.settle(Err(err.clone()));
            }
            if let Some(r) = pending.result.take() {
                r.settle(Err(err.clone()));
            }
            shared.log(Level::ERROR, format_args!("{} failed: {err}", shared.name));
            shared.transition(SupervisorState::Failed);
            if !shared.completion_observed.load(Ordering::Acquire) {
                tracing::error!(slot = shared.slot, error = %err, "supervisor failed unobserved");
            }
            completion.settle(Err(err));
        }
    }
}

impl Shared {
    fn log(&self, level: Level, args: std::fmt::Arguments<'_>) {
        self.log.log(level, &args.to_string());
    }

    fn state(&self) -> SupervisorState {
        self.inner.lock().state
    }

    /// Moves to `next`, notifying watchers, the logger and the bus.
    ///
    /// Terminal states are never left.
    fn transition(&self, next: SupervisorState) {
        {
            let mut inner = self.inner.lock();
            if inner.state.is_terminal() {
                return;
            }
            inner.state = next;
            inner.watchers.retain(|w| w.send(next).is_ok());
            if next.is_terminal() {
                inner.watchers.clear();
            }
        }
        self.log(Level::INFO, format_args!("{} state={next}", self.name));
        if let Some(bus) = &self.bus {
            bus.publish(Event::state_changed(self.slot, next));
        }
    }

    /// Fails with [`WorkerError::Destroyed`] once `destroy()` was called.
    fn ensure_alive(&self) -> Result<(), WorkerError> {
        if self.cancel.is_cancelled() {
            return Err(WorkerError::Destroyed {
                state: self.state(),
            });
        }
        Ok(())
    }

    /// Helper script context; a live script is killed by `destroy()` when signalling is allowed.
    fn scripts(&self) -> ScriptContext<'_> {
        ScriptContext {
            name: &self.name,
            slot: self.slot,
            config: &self.config,
            log: &self.log,
            bus: self.bus.as_ref(),
            cancel: &self.cancel,
            busy: &self.helper_busy,
        }
    }

    async fn lifecycle(
        &self,
        skip_cleanup: bool,
        pending: &mut Pending,
        task_rx: oneshot::Receiver<TaskHandoff>,
    ) -> Result<(), WorkerError> {
        let cfg = &self.config;

        self.ensure_alive()?;
        if !skip_cleanup {
            self.transition(SupervisorState::Cleanup);
            self.scripts().run("cleanupCommand", &cfg.cleanup_command).await?;
            self.ensure_alive()?;
        }
        self.transition(SupervisorState::Prepare);
        self.scripts().run("prepareCommand", &cfg.prepare_command).await?;
        self.ensure_alive()?;

        self.transition(SupervisorState::Ready);
        if let Some(r) = pending.readiness.take() {
            r.settle(Ok(()));
        }

        let (task, result) = tokio::select! {
            biased;
            handoff = task_rx => handoff.map_err(|_| WorkerError::Cancelled { what: "task" })?,
            _ = self.cancel.cancelled() => return Err(WorkerError::Destroyed {
                state: SupervisorState::Ready,
            }),
        };
        pending.result = Some(result);

        self.transition(SupervisorState::SavingCode);
        self.save_code(&task).await?;
        self.ensure_alive()?;

        self.transition(SupervisorState::StartingWorker);
        let mut worker = self.spawn_worker(&task)?;
        self.transition(SupervisorState::Running);
        let started = Instant::now();

        let end = tokio::select! {
            biased;
            status = worker.child.wait() => RunEnd::Exited(status),
            _ = time::sleep(cfg.max_execution_time) => RunEnd::Kill(KillReason::Timeout),
            Some(reason) = worker.kill_rx.recv() => RunEnd::Kill(reason),
            _ = self.cancel.cancelled() => RunEnd::Kill(KillReason::DestroyRequested),
        };

        match end {
            RunEnd::Exited(status) => {
                let elapsed = started.elapsed();
                let status = status.map_err(|e| WorkerError::SpawnFailed {
                    what: "worker",
                    error: e.to_string(),
                })?;
                drain(&mut worker.pumps).await;
                let (code, signal) = process::decode_exit(status);
                self.log(
                    Level::DEBUG,
                    format_args!(
                        "{} worker exited in {}ms, code={code:?} signal={signal}",
                        self.name,
                        elapsed.as_millis()
                    ),
                );
                // The sink may overflow right before the exit is observed.
                let result = match worker.kill_rx.try_recv() {
                    Ok(KillReason::TooMuchOutput) => {
                        WorkerTaskResult::killed(task, KillReason::TooMuchOutput, elapsed)
                    }
                    _ => WorkerTaskResult::exited(task, code, signal, elapsed),
                };
                if let Some(r) = pending.result.take() {
                    r.settle(Ok(result));
                }
            }
            RunEnd::Kill(reason) => {
                let elapsed = started.elapsed();
                if let Some(r) = pending.result.take() {
                    r.settle(Ok(WorkerTaskResult::killed(task, reason, elapsed)));
                }
                self.kill(worker, reason).await?;
            }
        }

        self.transition(SupervisorState::Cleanup);
        self.scripts().run("cleanupCommand", &cfg.cleanup_command).await?;
        Ok(())
    }

    /// Writes the program into the slot.
    ///
    /// The file handle lives inside the timeout, so a timed-out save stops
    /// after the chunk in flight instead of writing the whole program.
    async fn save_code(&self, task: &WorkerTask) -> Result<(), WorkerError> {
        let path = self.config.program_path(self.slot);
        let timeout = self.config.script_execute_timeout;
        let write = async {
            let mut file = tokio::fs::File::create(&path).await?;
            file.write_all(task.program()).await?;
            file.flush().await
        };
        match time::timeout(timeout, write).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(WorkerError::SaveFailed {
                path: path.display().to_string(),
                error: e.to_string(),
            }),
            Err(_) => Err(WorkerError::SaveTimeout {
                path: path.display().to_string(),
                timeout,
            }),
        }
    }

    fn spawn_worker(&self, task: &WorkerTask) -> Result<Worker<'_>, WorkerError> {
        let line = self
            .config
            .run_worker_command
            .render(&self.config.substitutions(self.slot));
        let busy = BusyGuard::acquire(&self.worker_busy, "worker")?;
        self.ensure_alive()?;

        let piped = |on: bool| {
            if on {
                std::process::Stdio::piped()
            } else {
                std::process::Stdio::null()
            }
        };
        let mut child = process::shell(&line)
            .stdin(piped(task.stdin().is_some()))
            .stdout(piped(task.stdout().is_some()))
            .stderr(piped(task.stderr().is_some()))
            .kill_on_drop(self.config.can_signal)
            .spawn()
            .map_err(|e| WorkerError::SpawnFailed {
                what: "worker",
                error: e.to_string(),
            })?;
        self.log(Level::DEBUG, format_args!("{} worker started: {line}", self.name));

        if let (Some(mut stdin), Some(bytes)) = (child.stdin.take(), task.stdin()) {
            let bytes = bytes.to_vec();
            let log = Arc::clone(&self.log);
            let name = self.name.clone();
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(&bytes).await {
                    log.log(Level::DEBUG, &format!("{name}: stdin write failed: {e}"));
                }
            });
        }

        let (kill_tx, kill_rx) = mpsc::channel(2);
        let mut pumps = Vec::with_capacity(2);
        if let (Some(pipe), Some(sink)) = (child.stdout.take(), task.stdout()) {
            pumps.push(tokio::spawn(process::pump(
                pipe,
                sink.clone(),
                kill_tx.clone(),
                format!("{}/stdout", self.name),
                Arc::clone(&self.log),
            )));
        }
        if let (Some(pipe), Some(sink)) = (child.stderr.take(), task.stderr()) {
            pumps.push(tokio::spawn(process::pump(
                pipe,
                sink.clone(),
                kill_tx,
                format!("{}/stderr", self.name),
                Arc::clone(&self.log),
            )));
        }

        Ok(Worker {
            child,
            pumps,
            kill_rx,
            _busy: busy,
        })
    }

    /// KILLING then WAIT_FOR_TERMINATION.
    async fn kill(&self, mut worker: Worker<'_>, reason: KillReason) -> Result<(), WorkerError> {
        self.log(
            Level::INFO,
            format_args!("{} killing worker, reason={reason}", self.name),
        );
        if let Some(bus) = &self.bus {
            bus.publish(
                Event::new(EventKind::KillRequested)
                    .with_slot(self.slot)
                    .with_reason(reason.as_str()),
            );
        }

        self.transition(SupervisorState::Killing);
        if self.config.can_signal {
            let _ = worker.child.start_kill();
        } else if let Err(e) = self
            .scripts()
            .run("killWorkerCommand", &self.config.kill_worker_command)
            .await
        {
            self.log(
                Level::WARN,
                format_args!("{} kill script failed: {e}", self.name),
            );
        }

        self.transition(SupervisorState::WaitForTermination);
        let timeout = self.config.wait_for_termination_timeout;
        if time::timeout(timeout, worker.child.wait()).await.is_err() {
            for p in &worker.pumps {
                p.abort();
            }
            let Worker { child, .. } = worker;
            if self.config.can_signal {
                drop(child);
            } else {
                process::reap(child, format!("{}/worker", self.name), Arc::clone(&self.log));
            }
            return Err(WorkerError::TerminationTimeout { timeout });
        }
        drain(&mut worker.pumps).await;
        Ok(())
    }
}

/// Lets pumps finish reading, then stops the ones still blocked.
async fn drain(pumps: &mut [JoinHandle<()>]) {
    let _ = time::timeout(OUTPUT_DRAIN, futures::future::join_all(pumps.iter_mut())).await;
    for p in pumps.iter() {
        p.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(root: &std::path::Path) -> Arc<WorkerConfig> {
        Arc::new(WorkerConfig::new(root))
    }

    #[tokio::test]
    async fn test_start_twice_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let sup = Supervisor::new(config(dir.path()), 1);
        let ready = sup.start(true).unwrap();
        assert_eq!(sup.start(true).err(), Some(WorkerError::AlreadyStarted));
        assert_eq!(ready.wait().await, Ok(()));
        assert_eq!(sup.start(false).err(), Some(WorkerError::AlreadyStarted));
        sup.destroy();
    }

    #[tokio::test]
    async fn test_run_task_before_ready() {
        let dir = tempfile::tempdir().unwrap();
        let sup = Supervisor::new(config(dir.path()), 1);
        assert_eq!(
            sup.run_task(WorkerTask::new(1, "x")).err(),
            Some(WorkerError::NotReady {
                state: SupervisorState::Created
            })
        );
        assert!(!sup.is_ready());
    }

    #[tokio::test]
    async fn test_destroy_in_ready_fails_with_destroyed() {
        let dir = tempfile::tempdir().unwrap();
        let sup = Supervisor::new(config(dir.path()), 3);
        assert_eq!(sup.name(), "worker/3");

        sup.start(true).unwrap().wait().await.unwrap();
        assert!(sup.is_ready());
        let completion = sup.completion();
        sup.destroy();
        sup.destroy();

        assert_eq!(
            completion.wait().await,
            Err(WorkerError::Destroyed {
                state: SupervisorState::Ready
            })
        );
        assert_eq!(sup.state(), SupervisorState::Failed);
        assert!(sup.is_finished());
    }

    #[tokio::test]
    async fn test_watchers_see_every_transition() {
        let dir = tempfile::tempdir().unwrap();
        let sup = Supervisor::new(config(dir.path()), 1);
        let mut states = sup.watch_states();
        sup.start(false).unwrap().wait().await.unwrap();
        sup.destroy();
        sup.completion().wait().await.unwrap_err();

        let mut seen = Vec::new();
        while let Some(s) = states.recv().await {
            seen.push(s);
        }
        assert_eq!(
            seen,
            vec![
                SupervisorState::Cleanup,
                SupervisorState::Prepare,
                SupervisorState::Ready,
                SupervisorState::Failed,
            ]
        );
    }
}
