mod common;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use slotvisor::{
    shell_command, Event, EventKind, PoolConfig, PoolError, Subscribe, SupervisorState,
    WorkerSupervisorPool, WorkerTask,
};

use common::{config, sandbox};

fn pool_config(max_workers: usize) -> PoolConfig {
    PoolConfig {
        max_workers,
        shutdown_grace: Duration::from_secs(5),
        ..PoolConfig::default()
    }
}

async fn wait_until(mut f: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if f() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<Event>>,
}

#[async_trait]
impl Subscribe for Recorder {
    async fn on_event(&self, event: &Event) {
        self.events.lock().push(event.clone());
    }

    fn name(&self) -> &'static str {
        "recorder"
    }
}

#[tokio::test]
async fn test_tasks_run_and_slots_refill() {
    let dir = sandbox(2);
    let cfg = config(dir.path())
        .with_run_worker(["cat", "{programPath}"])
        .unwrap();
    let recorder = Arc::new(Recorder::default());
    let pool = WorkerSupervisorPool::builder(pool_config(2), Arc::new(cfg))
        .with_subscribers(vec![recorder.clone() as Arc<dyn Subscribe>])
        .build();
    pool.start();

    for id in 0..6 {
        wait_until(|| pool.find_ready_worker().is_some()).await;
        let out = slotvisor::BoundedSink::new(64);
        let task = WorkerTask::new(id, format!("task {id}")).with_stdout(out.clone());
        let result = pool.run_task(task).unwrap().wait().await.unwrap();
        assert!(result.has_exited());
        assert_eq!(out.contents_lossy(), format!("task {id}"));
    }

    wait_until(|| pool.occupied_slots() == vec![1, 2]).await;
    pool.shutdown().await.unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    let events = recorder.events.lock();
    assert!(events.iter().any(|e| e.kind == EventKind::SlotReleased));
    assert!(events.iter().any(|e| e.kind == EventKind::ShutdownRequested));
    assert!(events.iter().any(|e| e.kind == EventKind::AllStoppedWithin));
}

#[tokio::test]
async fn test_slot_has_single_owner_under_random_load() {
    let dir = sandbox(3);
    // Programs that touch `<program>.fail` break the post-task cleanup.
    let cfg = config(dir.path())
        .with_pause_on_failure(Duration::from_millis(50))
        .with_cleanup(shell_command(
            "test ! -e {programPath}.fail; s=$?; rm -f {programPath}.fail; exit $s",
        ))
        .unwrap()
        .with_run_worker(["sh", "{programPath}"])
        .unwrap();
    let pool = WorkerSupervisorPool::new(pool_config(3), Arc::new(cfg));
    let mut rx = pool.bus().subscribe();
    pool.start();

    let mut pending = Vec::new();
    for id in 0..30 {
        wait_until(|| pool.find_ready_worker().is_some()).await;
        let program = if rand::thread_rng().gen_bool(0.3) {
            "touch \"$0.fail\""
        } else {
            "sleep 0.01"
        };
        if let Ok(result) = pool.run_task(WorkerTask::new(id, program)) {
            pending.push(result);
        }
        assert!(pool.len() <= 3);
        if rand::thread_rng().gen_bool(0.5) {
            tokio::time::sleep(Duration::from_millis(rand::thread_rng().gen_range(0..20))).await;
        }
    }
    for result in pending {
        let _ = result.wait().await;
    }
    pool.shutdown().await.unwrap();
    wait_until(|| pool.is_empty()).await;

    let mut owned: HashMap<u32, bool> = HashMap::new();
    while let Ok(ev) = rx.try_recv() {
        let Some(slot) = ev.slot else { continue };
        match ev.kind {
            EventKind::SlotAcquired => {
                assert!(!owned.get(&slot).copied().unwrap_or(false), "slot {slot} acquired twice");
                owned.insert(slot, true);
            }
            EventKind::SlotReleased => {
                assert!(owned.get(&slot).copied().unwrap_or(false), "slot {slot} released while free");
                owned.insert(slot, false);
            }
            _ => {}
        }
    }
    assert!(owned.values().all(|held| !held));
}

#[tokio::test]
async fn test_failed_slot_pauses_before_refill() {
    let dir = sandbox(1);
    let pause = Duration::from_millis(500);
    let cfg = config(dir.path())
        .with_pause_on_failure(pause)
        .with_run_worker(["true"])
        .unwrap()
        .with_cleanup(shell_command("test ! -e {programPath}"))
        .unwrap();
    let pool = WorkerSupervisorPool::new(pool_config(1), Arc::new(cfg));
    let mut rx = pool.bus().subscribe();
    pool.start();

    wait_until(|| pool.find_ready_worker().is_some()).await;
    // The saved program makes the post-task cleanup fail.
    let result = pool.run_task(WorkerTask::new(1, "x")).unwrap();
    assert!(result.wait().await.unwrap().has_exited());

    let failed_at = loop {
        let ev = rx.recv().await.unwrap();
        if ev.kind == EventKind::StateChanged && ev.state == Some(SupervisorState::Failed) {
            break ev.at;
        }
    };
    std::fs::remove_file(dir.path().join("vm-1/program")).unwrap();
    assert_eq!(pool.occupied_slots(), vec![1]);

    let reacquired_at = loop {
        let ev = rx.recv().await.unwrap();
        if ev.kind == EventKind::SlotAcquired {
            break ev.at;
        }
    };
    assert!(reacquired_at.duration_since(failed_at).unwrap() >= pause);

    wait_until(|| pool.find_ready_worker().is_some()).await;
    pool.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_reports_stuck_slots() {
    let dir = sandbox(1);
    // Without signalling, a destroyed helper runs to its end.
    let cfg = config(dir.path())
        .with_can_signal(false)
        .with_cleanup(shell_command("sleep 2"))
        .unwrap();
    let pool = WorkerSupervisorPool::new(
        PoolConfig {
            max_workers: 1,
            shutdown_grace: Duration::from_millis(200),
            ..PoolConfig::default()
        },
        Arc::new(cfg),
    );
    pool.start();
    wait_until(|| {
        pool.workers()
            .first()
            .is_some_and(|s| s.state() == SupervisorState::Cleanup)
    })
    .await;

    match pool.shutdown().await {
        Err(PoolError::GraceExceeded { grace, stuck }) => {
            assert_eq!(grace, Duration::from_millis(200));
            assert_eq!(stuck, vec![1]);
        }
        other => panic!("unexpected shutdown result: {other:?}"),
    }
}
