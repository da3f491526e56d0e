//! Process plumbing shared by helper scripts and the worker.
//!
//! - [`shell`] builds `/bin/sh -c <command line>`.
//! - [`decode_exit`] splits an exit status into `(code, signal)`.
//! - [`BusyGuard`] enforces one helper and one worker per supervisor.
//! - [`reap`] waits for an abandoned child in the background.
//! - [`pump`] copies a worker pipe into a bounded sink.

use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::Level;

use crate::error::{SinkError, WorkerError};
use crate::log::LogSink;
use crate::result::KillReason;
use crate::sink::BoundedSink;

const SHELL: &str = "/bin/sh";
const READ_CHUNK: usize = 8 * 1024;

/// Command running `line` through the shell, all stdio discarded.
pub(crate) fn shell(line: &str) -> Command {
    let mut cmd = Command::new(SHELL);
    cmd.arg("-c")
        .arg(line)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    cmd
}

/// Returns `(exit code, terminating signal)`; the signal is `0` for a normal exit.
pub(crate) fn decode_exit(status: ExitStatus) -> (Option<i32>, i32) {
    (status.code(), status.signal().unwrap_or(0))
}

/// Marks a process kind as alive for as long as the guard lives.
pub(crate) struct BusyGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> BusyGuard<'a> {
    /// Fails with [`WorkerError::ProcessBusy`] if the flag is already set.
    pub(crate) fn acquire(flag: &'a AtomicBool, what: &'static str) -> Result<Self, WorkerError> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| WorkerError::ProcessBusy { what })?;
        Ok(Self { flag })
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Hands a child that could not be stopped to a background task that awaits its exit.
pub(crate) fn reap(mut child: Child, name: String, log: Arc<dyn LogSink>) {
    tokio::spawn(async move {
        match child.wait().await {
            Ok(status) => {
                let (code, signal) = decode_exit(status);
                log.log(
                    Level::WARN,
                    &format!("{name}: abandoned process exited, code={code:?} signal={signal}"),
                );
            }
            Err(e) => {
                log.log(Level::ERROR, &format!("{name}: failed to reap process: {e}"));
            }
        }
    });
}

/// Copies `pipe` into `sink` until end of stream.
///
/// On the first overflow a [`KillReason::TooMuchOutput`] is requested and the
/// rest of the stream is read and dropped, so the writer stays alive until the
/// supervisor stops it.
pub(crate) async fn pump<R>(
    mut pipe: R,
    sink: BoundedSink,
    kill: mpsc::Sender<KillReason>,
    tag: String,
    log: Arc<dyn LogSink>,
) where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_CHUNK];
    let mut discarding = false;
    loop {
        let n = match pipe.read(&mut buf).await {
            Ok(0) => return,
            Ok(n) => n,
            Err(e) => {
                log.log(Level::ERROR, &format!("{tag}: read failed: {e}"));
                return;
            }
        };
        if discarding {
            continue;
        }
        match sink.write(&buf[..n]) {
            Ok(_) => {}
            Err(SinkError::Overflow { limit, .. }) => {
                log.log(
                    Level::DEBUG,
                    &format!("{tag}: output limit of {limit} bytes reached"),
                );
                let _ = kill.try_send(KillReason::TooMuchOutput);
                discarding = true;
            }
            Err(SinkError::Closed) => discarding = true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::NoopLog;

    #[tokio::test]
    async fn test_decode_exit_code_and_signal() {
        let status = shell("exit 3").status().await.unwrap();
        assert_eq!(decode_exit(status), (Some(3), 0));

        let status = shell("kill -9 $$").status().await.unwrap();
        assert_eq!(decode_exit(status), (None, 9));
    }

    #[test]
    fn test_busy_guard_is_exclusive() {
        let flag = AtomicBool::new(false);
        let guard = BusyGuard::acquire(&flag, "worker").unwrap();
        assert_eq!(
            BusyGuard::acquire(&flag, "worker").err(),
            Some(WorkerError::ProcessBusy { what: "worker" })
        );
        drop(guard);
        assert!(BusyGuard::acquire(&flag, "worker").is_ok());
    }

    #[tokio::test]
    async fn test_pump_requests_kill_once_on_overflow() {
        let sink = BoundedSink::new(4);
        let (tx, mut rx) = mpsc::channel(2);
        let data: &[u8] = b"0123456789";
        pump(data, sink.clone(), tx, "t".into(), Arc::new(NoopLog)).await;

        assert_eq!(sink.contents(), b"0123");
        assert_eq!(rx.recv().await, Some(KillReason::TooMuchOutput));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_pump_copies_everything_within_limit() {
        let sink = BoundedSink::new(64);
        let (tx, mut rx) = mpsc::channel(2);
        let data: &[u8] = &[0, 1, 0xff, b'\n'];
        pump(data, sink.clone(), tx, "t".into(), Arc::new(NoopLog)).await;

        assert_eq!(sink.contents(), vec![0, 1, 0xff, b'\n']);
        assert_eq!(rx.recv().await, None);
    }
}
