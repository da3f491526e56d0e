//! # Worker and pool configuration.
//!
//! Provides [`WorkerConfig`] (sandbox scripts, limits, per-slot paths) and
//! [`PoolConfig`] (slot count, event bus, shutdown grace).
//!
//! ## Per-slot paths
//! ```text
//! worker_sandbox_root = /srv/sandbox, inner_program_path = /program
//!
//! slot 1 ──► vm_base_directory: /srv/sandbox/vm-1
//!            program_path:      /srv/sandbox/vm-1/program
//! ```
//!
//! ## Sentinel values
//! - `max_output_bytes = None` → output is not capped
//! - `max_workers = 0` → clamped to 1 by [`PoolConfig::max_workers_clamped`]

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::TemplateError;
use crate::template::{CommandTemplate, Substitutions};

/// Static configuration shared by all supervisors of a pool.
///
/// ## Field semantics
/// - `cleanup_command`: wipes the sandbox; runs before prepare and after every task
/// - `prepare_command`: makes the sandbox ready for a new program
/// - `run_worker_command`: runs the untrusted program
/// - `kill_worker_command`: stops the worker when `can_signal` is false
/// - `can_signal`: whether this process may send signals to its children
///   (false when the scripts switch to another user, e.g. through `sudo`)
/// - `max_execution_time`: wall time the worker may run before it is killed
/// - `wait_for_termination_timeout`: how long to wait for the worker to exit after a kill
/// - `script_execute_timeout`: limit for every helper script and for saving the code
/// - `pause_on_failure`: cooldown before a failed slot is reused
/// - `max_output_bytes`: default cap for the output sinks created by [`WorkerConfig::output_sink`]
#[derive(Clone, Debug)]
pub struct WorkerConfig {
    /// Sandbox cleanup script.
    pub cleanup_command: CommandTemplate,
    /// Sandbox prepare script.
    pub prepare_command: CommandTemplate,
    /// Starts the worker process that executes the program.
    pub run_worker_command: CommandTemplate,
    /// Stops the worker if it did not finish in time.
    pub kill_worker_command: CommandTemplate,
    /// Whether child processes can be signalled directly.
    pub can_signal: bool,
    /// Program path inside the sandbox (a file or named pipe).
    pub inner_program_path: String,
    /// Directory holding one `vm-<slot>` directory per slot.
    pub worker_sandbox_root: PathBuf,
    /// Pause before a failed slot gets a new supervisor.
    pub pause_on_failure: Duration,
    /// Wall-clock limit for the worker process.
    pub max_execution_time: Duration,
    /// Wait for worker exit after the kill step.
    pub wait_for_termination_timeout: Duration,
    /// Limit for every helper script.
    pub script_execute_timeout: Duration,
    /// Output cap in bytes, `None` = unlimited.
    pub max_output_bytes: Option<usize>,
}

impl WorkerConfig {
    /// Creates a configuration rooted at `worker_sandbox_root` with no-op scripts
    /// and default limits.
    pub fn new(worker_sandbox_root: impl Into<PathBuf>) -> Self {
        Self {
            cleanup_command: CommandTemplate::noop(),
            prepare_command: CommandTemplate::noop(),
            run_worker_command: CommandTemplate::noop(),
            kill_worker_command: CommandTemplate::noop(),
            can_signal: false,
            inner_program_path: "/program".to_string(),
            worker_sandbox_root: worker_sandbox_root.into(),
            pause_on_failure: Duration::from_secs(3),
            max_execution_time: Duration::from_secs(4),
            wait_for_termination_timeout: Duration::from_secs(15),
            script_execute_timeout: Duration::from_secs(15),
            max_output_bytes: None,
        }
    }

    /// Sets the cleanup script.
    pub fn with_cleanup<I, S>(mut self, args: I) -> Result<Self, TemplateError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.cleanup_command = CommandTemplate::parse(args)?;
        Ok(self)
    }

    /// Sets the prepare script.
    pub fn with_prepare<I, S>(mut self, args: I) -> Result<Self, TemplateError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.prepare_command = CommandTemplate::parse(args)?;
        Ok(self)
    }

    /// Sets the worker command.
    pub fn with_run_worker<I, S>(mut self, args: I) -> Result<Self, TemplateError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.run_worker_command = CommandTemplate::parse(args)?;
        Ok(self)
    }

    /// Sets the kill script.
    pub fn with_kill_worker<I, S>(mut self, args: I) -> Result<Self, TemplateError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.kill_worker_command = CommandTemplate::parse(args)?;
        Ok(self)
    }

    /// Enables or disables direct signalling of child processes.
    pub fn with_can_signal(mut self, can_signal: bool) -> Self {
        self.can_signal = can_signal;
        self
    }

    /// Sets the worker wall-clock limit.
    pub fn with_max_execution_time(mut self, d: Duration) -> Self {
        self.max_execution_time = d;
        self
    }

    /// Sets the wait for worker exit after a kill.
    pub fn with_wait_for_termination_timeout(mut self, d: Duration) -> Self {
        self.wait_for_termination_timeout = d;
        self
    }

    /// Sets the helper script limit.
    pub fn with_script_execute_timeout(mut self, d: Duration) -> Self {
        self.script_execute_timeout = d;
        self
    }

    /// Sets the cooldown after a failed supervisor.
    pub fn with_pause_on_failure(mut self, d: Duration) -> Self {
        self.pause_on_failure = d;
        self
    }

    /// Sets the output cap.
    pub fn with_max_output_bytes(mut self, limit: Option<usize>) -> Self {
        self.max_output_bytes = limit;
        self
    }

    /// Sandbox directory of a slot: `<root>/vm-<slot>`.
    pub fn vm_base_directory(sandbox_root: &Path, slot: u32) -> PathBuf {
        sandbox_root.join(format!("vm-{slot}"))
    }

    /// Host path of the slot's program file.
    pub fn program_path(&self, slot: u32) -> PathBuf {
        Self::vm_base_directory(&self.worker_sandbox_root, slot)
            .join(self.inner_program_path.trim_start_matches('/'))
    }

    /// Placeholder values for templates rendered on behalf of `slot`.
    pub fn substitutions(&self, slot: u32) -> Substitutions {
        Substitutions::new(
            self.program_path(slot).to_string_lossy(),
            self.inner_program_path.clone(),
        )
    }

    /// Creates an output sink capped at `max_output_bytes`.
    pub fn output_sink(&self) -> crate::BoundedSink {
        match self.max_output_bytes {
            Some(limit) => crate::BoundedSink::new(limit),
            None => crate::BoundedSink::unbounded(),
        }
    }
}

impl Default for WorkerConfig {
    /// Rooted at `<tmp>/slotvisor`, no-op scripts, default limits.
    fn default() -> Self {
        Self::new(std::env::temp_dir().join("slotvisor"))
    }
}

/// Configuration of a [`WorkerSupervisorPool`](crate::WorkerSupervisorPool).
#[derive(Clone, Debug)]
pub struct PoolConfig {
    /// Number of slots, numbered `1..=max_workers`.
    pub max_workers: usize,

    /// Capacity of the event bus broadcast channel ring buffer.
    ///
    /// Minimum value is 1 (enforced by Bus).
    pub bus_capacity: usize,

    /// Maximum time [`shutdown`](crate::WorkerSupervisorPool::shutdown) waits
    /// for destroyed supervisors to settle.
    pub shutdown_grace: Duration,
}

impl PoolConfig {
    /// Returns the slot count clamped to a minimum of 1.
    #[inline]
    pub fn max_workers_clamped(&self) -> usize {
        self.max_workers.max(1)
    }

    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }
}

impl Default for PoolConfig {
    /// Default configuration:
    ///
    /// - `max_workers = 5`
    /// - `bus_capacity = 1024`
    /// - `shutdown_grace = 30s`
    fn default() -> Self {
        Self {
            max_workers: 5,
            bus_capacity: 1024,
            shutdown_grace: Duration::from_secs(30),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_are_derived_from_slot() {
        let cfg = WorkerConfig::new("/srv/sandbox");
        assert_eq!(
            WorkerConfig::vm_base_directory(Path::new("/srv/sandbox"), 2),
            PathBuf::from("/srv/sandbox/vm-2")
        );
        assert_eq!(cfg.program_path(2), PathBuf::from("/srv/sandbox/vm-2/program"));
        assert_eq!(cfg.program_path(7), PathBuf::from("/srv/sandbox/vm-7/program"));
    }

    #[test]
    fn test_defaults() {
        let cfg = WorkerConfig::new("/x");
        assert!(!cfg.can_signal);
        assert_eq!(cfg.inner_program_path, "/program");
        assert_eq!(cfg.pause_on_failure, Duration::from_secs(3));
        assert_eq!(cfg.max_execution_time, Duration::from_secs(4));
        assert_eq!(cfg.wait_for_termination_timeout, Duration::from_secs(15));
        assert_eq!(cfg.script_execute_timeout, Duration::from_secs(15));
        assert_eq!(cfg.max_output_bytes, None);

        let pool = PoolConfig::default();
        assert_eq!(pool.max_workers, 5);
    }

    #[test]
    fn test_substitutions_use_slot_paths() {
        let cfg = WorkerConfig::new("/srv")
            .with_run_worker(["cat", "{programPath}", "{innerProgramPath}"])
            .unwrap();
        let line = cfg.run_worker_command.render(&cfg.substitutions(4));
        assert_eq!(line, "cat /srv/vm-4/program /program");
    }

    #[test]
    fn test_bad_template_rejected_by_builder() {
        assert!(WorkerConfig::new("/srv").with_kill_worker(["kill", "{pid}"]).is_err());
    }

    #[test]
    fn test_output_sink_uses_limit() {
        let cfg = WorkerConfig::new("/srv").with_max_output_bytes(Some(16));
        assert_eq!(cfg.output_sink().limit(), Some(16));
        assert_eq!(WorkerConfig::new("/srv").output_sink().limit(), None);
    }

    #[test]
    fn test_clamping() {
        let cfg = PoolConfig {
            max_workers: 0,
            bus_capacity: 0,
            ..PoolConfig::default()
        };
        assert_eq!(cfg.max_workers_clamped(), 1);
        assert_eq!(cfg.bus_capacity_clamped(), 1);
    }
}
