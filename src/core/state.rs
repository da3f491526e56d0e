//! Supervisor lifecycle states.
//!
//! ```text
//! CREATED ─► CLEANUP ─► PREPARE ─► READY ─► SAVING_CODE ─► STARTING_WORKER ─► RUNNING
//!                                                                               │
//!                              ┌──────────── exited ◄───────────────────────────┤
//!                              │                                                ▼ kill reason
//!                              │                                            KILLING
//!                              │                                                ▼
//!                              │                                       WAIT_FOR_TERMINATION
//!                              ▼                                                │
//!                           CLEANUP ◄───────────────────────────────────────────┘
//!                              ▼
//!                            DONE
//!
//! any non-terminal state ──► FAILED
//! ```

use std::fmt;

/// Position of a [`Supervisor`](crate::Supervisor) in its lifecycle.
///
/// `Done` and `Failed` are terminal: once entered, the state never changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SupervisorState {
    /// Constructed, `start()` not called yet.
    Created,
    /// Running the cleanup script (initial or post-task).
    Cleanup,
    /// Running the prepare script.
    Prepare,
    /// Waiting for a task.
    Ready,
    /// Writing the program into the sandbox.
    SavingCode,
    /// Spawning the worker process.
    StartingWorker,
    /// Worker process is alive.
    Running,
    /// Stopping the worker.
    Killing,
    /// Waiting for the killed worker to exit.
    WaitForTermination,
    /// Finished, sandbox clean.
    Done,
    /// Finished, sandbox unusable.
    Failed,
}

impl SupervisorState {
    /// Stable snake_case name.
    pub fn as_str(self) -> &'static str {
        match self {
            SupervisorState::Created => "created",
            SupervisorState::Cleanup => "cleanup",
            SupervisorState::Prepare => "prepare",
            SupervisorState::Ready => "ready",
            SupervisorState::SavingCode => "saving_code",
            SupervisorState::StartingWorker => "starting_worker",
            SupervisorState::Running => "running",
            SupervisorState::Killing => "killing",
            SupervisorState::WaitForTermination => "wait_for_termination",
            SupervisorState::Done => "done",
            SupervisorState::Failed => "failed",
        }
    }

    /// `Done` or `Failed`.
    #[inline]
    pub fn is_terminal(self) -> bool {
        matches!(self, SupervisorState::Done | SupervisorState::Failed)
    }
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
