//! # WorkerTask: a program to run in a sandbox.
//!
//! A task bundles the program code, optional stdin and optional output sinks.
//! Once handed to [`Supervisor::run_task`](crate::Supervisor::run_task) it is
//! shared as `Arc<WorkerTask>` and never mutated.
//!
//! ## Example
//! ```rust
//! use slotvisor::{BoundedSink, WorkerTask};
//!
//! let out = BoundedSink::new(10_000);
//! let task = WorkerTask::new(42, "print('hi')")
//!     .with_stdin("input")
//!     .with_stdout(out.clone());
//! assert_eq!(task.id(), 42);
//! assert!(task.stderr().is_none());
//! ```

use std::fmt;

use crate::sink::BoundedSink;

/// A program run request.
#[derive(Clone)]
pub struct WorkerTask {
    id: u64,
    program: Vec<u8>,
    stdin: Option<Vec<u8>>,
    stdout: Option<BoundedSink>,
    stderr: Option<BoundedSink>,
}

impl WorkerTask {
    /// Creates a task with the given id and program bytes.
    ///
    /// Without sinks, worker output is discarded; without stdin, the worker's
    /// stdin is closed immediately.
    pub fn new(id: u64, program: impl Into<Vec<u8>>) -> Self {
        Self {
            id,
            program: program.into(),
            stdin: None,
            stdout: None,
            stderr: None,
        }
    }

    /// Sets bytes written to the worker's stdin (then closed).
    pub fn with_stdin(mut self, stdin: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(stdin.into());
        self
    }

    /// Collects the worker's stdout into `sink`.
    pub fn with_stdout(mut self, sink: BoundedSink) -> Self {
        self.stdout = Some(sink);
        self
    }

    /// Collects the worker's stderr into `sink`.
    pub fn with_stderr(mut self, sink: BoundedSink) -> Self {
        self.stderr = Some(sink);
        self
    }

    /// Unique id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Program source.
    pub fn program(&self) -> &[u8] {
        &self.program
    }

    /// Stdin bytes, if any.
    pub fn stdin(&self) -> Option<&[u8]> {
        self.stdin.as_deref()
    }

    /// Stdout sink, if any.
    pub fn stdout(&self) -> Option<&BoundedSink> {
        self.stdout.as_ref()
    }

    /// Stderr sink, if any.
    pub fn stderr(&self) -> Option<&BoundedSink> {
        self.stderr.as_ref()
    }
}

impl fmt::Debug for WorkerTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerTask")
            .field("id", &self.id)
            .field("program_len", &self.program.len())
            .field("stdin_len", &self.stdin.as_ref().map(Vec::len))
            .field("stdout", &self.stdout.is_some())
            .field("stderr", &self.stderr.is_some())
            .finish()
    }
}
