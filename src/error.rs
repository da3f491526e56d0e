//! Error types used by supervisors, the pool and their building blocks.
//!
//! This module defines the main error enums:
//!
//! - [`WorkerError`]: failures of one supervisor's lifecycle (helper scripts,
//!   code saving, worker termination) and misuse of its API.
//! - [`PoolError`]: errors raised by the pool itself.
//! - [`TemplateError`]: invalid command templates, rejected at construction.
//! - [`SinkError`]: write refusals from a [`BoundedSink`](crate::BoundedSink).
//!
//! [`WorkerError`] is `Clone`: one failure settles several result channels
//! (readiness, task result, completion) with the same value.

use std::time::Duration;

use thiserror::Error;

use crate::core::SupervisorState;

/// # Errors produced by a supervisor.
///
/// Every variant except the API-misuse ones (`AlreadyStarted`, `NotReady`,
/// `ProcessBusy`, `NoReadyWorker`) moves the supervisor into
/// [`SupervisorState::Failed`] and marks the sandbox as unusable.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkerError {
    /// Helper script exited with a nonzero code or was killed by a signal.
    #[error("script {script} failed with signal {signal}, code {code}")]
    ScriptFailed {
        /// Name of the helper script (e.g. `cleanupCommand`).
        script: &'static str,
        /// Exit code (`-1` if the process had no code).
        code: i32,
        /// Terminating signal, `0` if none.
        signal: i32,
    },

    /// Helper script did not finish within the script timeout.
    #[error("script {script} timed out after {timeout:?}")]
    ScriptTimeout {
        /// Name of the helper script.
        script: &'static str,
        /// The configured script timeout.
        timeout: Duration,
    },

    /// Program code could not be written into the sandbox.
    #[error("failed to save program to {path}: {error}")]
    SaveFailed {
        /// Destination path.
        path: String,
        /// Underlying I/O error message.
        error: String,
    },

    /// Writing program code did not finish in time.
    #[error("saving program to {path} timed out after {timeout:?}")]
    SaveTimeout {
        /// Destination path.
        path: String,
        /// The configured script timeout.
        timeout: Duration,
    },

    /// A helper or worker process could not be spawned.
    #[error("failed to spawn {what}: {error}")]
    SpawnFailed {
        /// What was being spawned.
        what: &'static str,
        /// Underlying I/O error message.
        error: String,
    },

    /// Worker did not exit after being killed.
    #[error("worker did not terminate within {timeout:?} after kill")]
    TerminationTimeout {
        /// The configured wait-for-termination timeout.
        timeout: Duration,
    },

    /// `destroy()` was called before the worker process started.
    #[error("supervisor destroyed in state {state}")]
    Destroyed {
        /// State in which the destroy request was observed.
        state: SupervisorState,
    },

    /// A pending result was abandoned by its producer.
    #[error("{what} was cancelled")]
    Cancelled {
        /// Which result was abandoned.
        what: &'static str,
    },

    /// `start()` was called more than once.
    #[error("cannot call start() twice")]
    AlreadyStarted,

    /// `run_task()` was called outside of the ready state, or twice.
    #[error("worker is not ready (state {state})")]
    NotReady {
        /// Current state of the supervisor.
        state: SupervisorState,
    },

    /// A second helper or worker process was started while one is alive.
    #[error("cannot start {what} while another one is running")]
    ProcessBusy {
        /// Which kind of process was requested.
        what: &'static str,
    },

    /// The pool has no supervisor in the ready state.
    #[error("no ready worker available")]
    NoReadyWorker,

    /// A command template was invalid.
    #[error(transparent)]
    Template(#[from] TemplateError),
}

impl WorkerError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use slotvisor::WorkerError;
    /// use std::time::Duration;
    ///
    /// let err = WorkerError::TerminationTimeout { timeout: Duration::from_secs(15) };
    /// assert_eq!(err.as_label(), "worker_termination_timeout");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            WorkerError::ScriptFailed { .. } => "worker_script_failed",
            WorkerError::ScriptTimeout { .. } => "worker_script_timeout",
            WorkerError::SaveFailed { .. } => "worker_save_failed",
            WorkerError::SaveTimeout { .. } => "worker_save_timeout",
            WorkerError::SpawnFailed { .. } => "worker_spawn_failed",
            WorkerError::TerminationTimeout { .. } => "worker_termination_timeout",
            WorkerError::Destroyed { .. } => "worker_destroyed",
            WorkerError::Cancelled { .. } => "worker_cancelled",
            WorkerError::AlreadyStarted => "worker_already_started",
            WorkerError::NotReady { .. } => "worker_not_ready",
            WorkerError::ProcessBusy { .. } => "worker_process_busy",
            WorkerError::NoReadyWorker => "worker_none_ready",
            WorkerError::Template(_) => "worker_bad_template",
        }
    }

    /// Indicates whether this error means the caller used the API incorrectly,
    /// as opposed to the sandbox failing.
    ///
    /// ```
    /// use slotvisor::WorkerError;
    ///
    /// assert!(WorkerError::AlreadyStarted.is_misuse());
    /// assert!(!WorkerError::Cancelled { what: "readiness" }.is_misuse());
    /// ```
    pub fn is_misuse(&self) -> bool {
        matches!(
            self,
            WorkerError::AlreadyStarted
                | WorkerError::NotReady { .. }
                | WorkerError::ProcessBusy { .. }
                | WorkerError::NoReadyWorker
        )
    }
}

/// # Errors produced by the supervisor pool.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum PoolError {
    /// Shutdown grace period was exceeded; some slots never settled.
    #[error("shutdown timeout {grace:?} exceeded; stuck slots: {stuck:?}")]
    GraceExceeded {
        /// The configured grace duration.
        grace: Duration,
        /// Slots whose supervisors did not finish in time.
        stuck: Vec<u32>,
    },
}

impl PoolError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            PoolError::GraceExceeded { .. } => "pool_grace_exceeded",
        }
    }
}

/// # Errors produced while building a command template.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    /// A `{name}` placeholder that is not one of the known placeholders.
    #[error("there is no value for placeholder '{name}'")]
    UnknownPlaceholder {
        /// Name between the braces.
        name: String,
    },

    /// A command template without any argument.
    #[error("command template is empty")]
    Empty,
}

/// # Write refusals from a bounded sink.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkError {
    /// This write exceeded the capacity; reported exactly once, then the sink closes.
    #[error("buffer is full, limit is {limit}, accepted {accepted} of {offered} bytes, closing buffer")]
    Overflow {
        /// Capacity in bytes.
        limit: usize,
        /// Bytes of this write that were still stored.
        accepted: usize,
        /// Size of the refused write.
        offered: usize,
    },

    /// The sink was already closed.
    #[error("trying to write into a closed buffer")]
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels_are_stable() {
        let err = WorkerError::ScriptFailed {
            script: "prepareCommand",
            code: 1,
            signal: 0,
        };
        assert_eq!(err.as_label(), "worker_script_failed");
        assert_eq!(
            err.to_string(),
            "script prepareCommand failed with signal 0, code 1"
        );

        let err = PoolError::GraceExceeded {
            grace: Duration::from_secs(1),
            stuck: vec![2],
        };
        assert_eq!(err.as_label(), "pool_grace_exceeded");
    }

    #[test]
    fn test_template_error_converts() {
        let err: WorkerError = TemplateError::UnknownPlaceholder { name: "pid".into() }.into();
        assert_eq!(err.as_label(), "worker_bad_template");
        assert_eq!(err.to_string(), "there is no value for placeholder 'pid'");
    }
}
