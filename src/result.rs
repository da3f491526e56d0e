//! # WorkerTaskResult: what happened to a task.
//!
//! A result is built exactly once by the supervisor, either when the worker
//! exits on its own or when a kill reason is assigned, and is immutable after.
//!
//! ```text
//! exited on its own:  kill_reason = None, exit_code = Some(c), exit_signal = s
//! killed:             kill_reason = Some(r), exit_code = None, exit_signal = 0
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::task::WorkerTask;

/// Why the supervisor stopped a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KillReason {
    /// Worker exceeded `max_execution_time`.
    Timeout,
    /// Worker wrote more than its output sink holds.
    TooMuchOutput,
    /// [`Supervisor::destroy`](crate::Supervisor::destroy) was called.
    DestroyRequested,
}

impl KillReason {
    /// Stable snake_case name.
    pub fn as_str(self) -> &'static str {
        match self {
            KillReason::Timeout => "timeout",
            KillReason::TooMuchOutput => "too_much_output",
            KillReason::DestroyRequested => "destroy_requested",
        }
    }
}

impl fmt::Display for KillReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of running one [`WorkerTask`].
#[derive(Debug, Clone)]
pub struct WorkerTaskResult {
    task: Arc<WorkerTask>,
    exit_code: Option<i32>,
    exit_signal: i32,
    kill_reason: Option<KillReason>,
    execution_time: Duration,
    memory_usage: Option<u64>,
}

impl WorkerTaskResult {
    /// Result for a worker that exited on its own.
    pub fn exited(
        task: Arc<WorkerTask>,
        exit_code: Option<i32>,
        exit_signal: i32,
        execution_time: Duration,
    ) -> Self {
        Self {
            task,
            exit_code,
            exit_signal,
            kill_reason: None,
            execution_time,
            memory_usage: None,
        }
    }

    /// Result for a worker the supervisor decided to kill.
    pub fn killed(task: Arc<WorkerTask>, reason: KillReason, execution_time: Duration) -> Self {
        Self {
            task,
            exit_code: None,
            exit_signal: 0,
            kill_reason: Some(reason),
            execution_time,
            memory_usage: None,
        }
    }

    /// Attaches a measured memory usage in bytes.
    pub fn with_memory_usage(mut self, bytes: u64) -> Self {
        self.memory_usage = Some(bytes);
        self
    }

    /// The task this result belongs to.
    pub fn task(&self) -> &Arc<WorkerTask> {
        &self.task
    }

    /// Exit code, `None` if the worker was killed or ended by a signal.
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    /// Terminating signal, `0` if none.
    pub fn exit_signal(&self) -> i32 {
        self.exit_signal
    }

    /// Kill reason assigned by the supervisor.
    pub fn kill_reason(&self) -> Option<KillReason> {
        self.kill_reason
    }

    /// Wall time from worker start to exit or kill decision.
    pub fn execution_time(&self) -> Duration {
        self.execution_time
    }

    /// Memory usage in bytes, if measured.
    pub fn memory_usage(&self) -> Option<u64> {
        self.memory_usage
    }

    /// Exited on its own, without a signal.
    pub fn has_exited(&self) -> bool {
        self.kill_reason.is_none() && !self.was_killed_by_signal()
    }

    /// Ended by a signal.
    pub fn was_killed_by_signal(&self) -> bool {
        self.exit_signal != 0
    }

    /// Killed because it ran too long.
    pub fn was_killed_on_timeout(&self) -> bool {
        self.kill_reason == Some(KillReason::Timeout)
    }

    /// Killed because it wrote too much.
    pub fn was_killed_on_too_much_output(&self) -> bool {
        self.kill_reason == Some(KillReason::TooMuchOutput)
    }

    /// Killed because the supervisor was destroyed.
    pub fn was_killed_on_destroy(&self) -> bool {
        self.kill_reason == Some(KillReason::DestroyRequested)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task() -> Arc<WorkerTask> {
        Arc::new(WorkerTask::new(1, "x"))
    }

    #[test]
    fn test_exited_with_code() {
        let r = WorkerTaskResult::exited(task(), Some(5), 0, Duration::from_millis(10));
        assert!(r.has_exited());
        assert!(!r.was_killed_by_signal());
        assert_eq!(r.exit_code(), Some(5));
        assert_eq!(r.kill_reason(), None);
    }

    #[test]
    fn test_exited_by_signal() {
        let r = WorkerTaskResult::exited(task(), None, 15, Duration::ZERO);
        assert!(!r.has_exited());
        assert!(r.was_killed_by_signal());
        assert_eq!(r.exit_signal(), 15);
    }

    #[test]
    fn test_killed_predicates() {
        let r = WorkerTaskResult::killed(task(), KillReason::Timeout, Duration::from_secs(2));
        assert!(r.was_killed_on_timeout());
        assert!(!r.has_exited());
        assert!(!r.was_killed_by_signal());

        let r = WorkerTaskResult::killed(task(), KillReason::TooMuchOutput, Duration::ZERO);
        assert!(r.was_killed_on_too_much_output());

        let r = WorkerTaskResult::killed(task(), KillReason::DestroyRequested, Duration::ZERO);
        assert!(r.was_killed_on_destroy());
        assert_eq!(r.kill_reason().map(KillReason::as_str), Some("destroy_requested"));
    }

    #[test]
    fn test_memory_usage_is_optional() {
        let r = WorkerTaskResult::exited(task(), Some(0), 0, Duration::ZERO);
        assert_eq!(r.memory_usage(), None);
        assert_eq!(r.with_memory_usage(1024).memory_usage(), Some(1024));
    }
}
