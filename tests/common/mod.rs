#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use slotvisor::{LogSink, Supervisor, SupervisorState, WorkerConfig};
use tempfile::TempDir;
use tracing::Level;

/// Sandbox root with `vm-1..=vm-<slots>` directories.
pub fn sandbox(slots: u32) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    for slot in 1..=slots {
        std::fs::create_dir(WorkerConfig::vm_base_directory(dir.path(), slot)).unwrap();
    }
    dir
}

/// Config with short limits for tests.
pub fn config(root: &Path) -> WorkerConfig {
    WorkerConfig::new(root)
        .with_max_execution_time(Duration::from_secs(4))
        .with_script_execute_timeout(Duration::from_secs(5))
        .with_wait_for_termination_timeout(Duration::from_secs(5))
        .with_pause_on_failure(Duration::from_millis(100))
}

/// Logger that keeps every message.
#[derive(Default)]
pub struct CaptureLog {
    lines: Mutex<Vec<(Level, String)>>,
}

impl CaptureLog {
    pub fn lines(&self) -> Vec<(Level, String)> {
        self.lines.lock().clone()
    }

    pub fn contains(&self, level: Level, text: &str) -> bool {
        self.lines
            .lock()
            .iter()
            .any(|(l, m)| *l == level && m.contains(text))
    }
}

impl LogSink for CaptureLog {
    fn log(&self, level: Level, message: &str) {
        self.lines.lock().push((level, message.to_string()));
    }
}

/// Collects state transitions until the terminal state.
pub async fn collect_states(
    mut rx: tokio::sync::mpsc::UnboundedReceiver<SupervisorState>,
) -> Vec<SupervisorState> {
    let mut seen = Vec::new();
    while let Some(s) = rx.recv().await {
        seen.push(s);
    }
    seen
}

/// Waits until `sup` reaches `state`.
pub async fn wait_for_state(sup: &Supervisor, state: SupervisorState) {
    for _ in 0..500 {
        if sup.state() == state {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("state {state} not reached, now {}", sup.state());
}

pub fn supervisor(cfg: WorkerConfig) -> Supervisor {
    Supervisor::new(Arc::new(cfg), 1)
}
