//! # slotvisor
//!
//! **Slotvisor** runs untrusted programs in a fixed set of sandbox slots.
//!
//! Every slot is driven by a one-shot [`Supervisor`] that prepares the sandbox
//! with helper scripts, runs exactly one [`WorkerTask`], enforces time and
//! output limits, and cleans up. A [`WorkerSupervisorPool`] keeps every slot
//! staffed and replaces finished supervisors, pausing after failures.
//!
//! ## Architecture
//! ### Overview
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  WorkerSupervisorPool                                             │
//! │  - slots: 1..=max_workers (smallest free slot first)              │
//! │  - Bus (broadcast events)                                         │
//! │  - SubscriberSet (fans out to user subscribers)                   │
//! └──────┬──────────────────┬──────────────────┬───────────────┬──────┘
//!        ▼                  ▼                  ▼               │
//!     ┌──────────────┐   ┌──────────────┐   ┌──────────────┐   │
//!     │ Supervisor 1 │   │ Supervisor 2 │   │ Supervisor N │   │
//!     │ (vm-1)       │   │ (vm-2)       │   │ (vm-N)       │   │
//!     └┬─────────────┘   └┬─────────────┘   └┬─────────────┘   │
//!      │ /bin/sh -c       │                  │                 │
//!      │ cleanup/prepare  │ Publishes        │ Publishes       │
//!      │ worker/kill      │ - StateChanged   │ - KillRequested │
//!      │                  │ - ScriptFailed   │ - ...           │
//!      ▼                  ▼                  ▼                 ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                        Bus (broadcast channel)                    │
//! │                 (capacity: PoolConfig::bus_capacity)              │
//! └─────────────────────────────────┬─────────────────────────────────┘
//!                                   ▼
//!                       ┌────────────────────────┐
//!                       │  subscriber_listener   │
//!                       │       (in pool)        │
//!                       └───────────┬────────────┘
//!                                   ▼
//!                             SubscriberSet
//!                          ┌─────────┼─────────┐
//!                          ▼         ▼         ▼
//!                       sub1.on   sub2.on   subN.on
//!                       _event()  _event()  _event()
//! ```
//!
//! ### Lifecycle
//! ```text
//! CREATED ─► CLEANUP ─► PREPARE ─► READY ─► SAVING_CODE ─► STARTING_WORKER ─► RUNNING
//!    ─► [KILLING ─► WAIT_FOR_TERMINATION] ─► CLEANUP ─► DONE
//!
//! any non-terminal state ─► FAILED (slot paused for pause_on_failure)
//! ```
//!
//! ## Example
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use slotvisor::{BoundedSink, Supervisor, WorkerConfig, WorkerTask};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let cfg = WorkerConfig::new("/srv/sandbox")
//!         .with_prepare(["mkdir", "-p", "/srv/sandbox/vm-1"])?
//!         .with_run_worker(["sh", "{programPath}"])?
//!         .with_can_signal(true)
//!         .with_max_execution_time(Duration::from_secs(2));
//!
//!     let sup = Supervisor::new(Arc::new(cfg), 1);
//!     sup.start(false)?.wait().await?;
//!
//!     let out = BoundedSink::new(64 * 1024);
//!     let task = WorkerTask::new(1, "echo hello").with_stdout(out.clone());
//!     let result = sup.run_task(task)?.wait().await?;
//!     assert!(result.has_exited());
//!
//!     sup.completion().wait().await?;
//!     println!("{}", out.contents_lossy());
//!     Ok(())
//! }
//! ```

mod config;
mod core;
mod error;
mod events;
mod log;
mod result;
mod sink;
mod subscribers;
mod task;
mod template;

// ---- Public re-exports ----

pub use config::{PoolConfig, WorkerConfig};
pub use crate::core::{Outcome, PoolBuilder, Supervisor, SupervisorState, WorkerSupervisorPool};
pub use error::{PoolError, SinkError, TemplateError, WorkerError};
pub use events::{Bus, Event, EventKind};
pub use log::{LineAnnotator, LogSink, NoopLog, TracingLog};
pub use result::{KillReason, WorkerTaskResult};
pub use sink::BoundedSink;
pub use subscribers::{Subscribe, SubscriberSet};
pub use task::WorkerTask;
pub use template::{
    build_command_line, quote_shell_arg, shell_command, CommandTemplate, Placeholder,
    Substitutions,
};

// Optional: expose a simple built-in logger subscriber.
// Enable with: `--features logging`.
#[cfg(feature = "logging")]
pub use subscribers::LogWriter;
