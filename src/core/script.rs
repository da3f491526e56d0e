//! # Helper script runner.
//!
//! Runs one cleanup/prepare/kill script for a supervisor:
//!
//! ```text
//! render template ─► /bin/sh -c <line> ─► race exit vs script_execute_timeout
//!                          │
//!                          ├─ stdout ─► LineAnnotator ─► log (debug) "worker/<slot>/stdout: ..."
//!                          └─ stderr ─► LineAnnotator ─► log (debug) "worker/<slot>/stderr: ..."
//! ```
//!
//! ## Rules
//! - Exit code 0 without a signal is success; anything else is [`WorkerError::ScriptFailed`].
//! - On timeout the script is killed if signalling is allowed, otherwise it is
//!   handed to a background reaper; either way [`WorkerError::ScriptTimeout`] is returned.
//! - When signalling is allowed, cancelling the supervisor kills the script
//!   that is live at that moment. A script started after the cancellation runs
//!   to its end.
//! - Failures are published as [`EventKind::ScriptFailed`].

use std::process::Stdio;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::Level;

use crate::config::WorkerConfig;
use crate::error::WorkerError;
use crate::events::{Bus, Event, EventKind};
use crate::log::{LineAnnotator, LogSink};
use crate::template::CommandTemplate;

use super::process::{self, BusyGuard};

/// Time given to output readers after the script exited.
const OUTPUT_DRAIN: Duration = Duration::from_secs(1);

/// Everything a helper script needs from its supervisor.
pub(crate) struct ScriptContext<'a> {
    pub(crate) name: &'a str,
    pub(crate) slot: u32,
    pub(crate) config: &'a WorkerConfig,
    pub(crate) log: &'a Arc<dyn LogSink>,
    pub(crate) bus: Option<&'a Bus>,
    pub(crate) cancel: &'a CancellationToken,
    pub(crate) busy: &'a AtomicBool,
}

impl ScriptContext<'_> {
    /// Runs `template` as the helper script called `script`.
    pub(crate) async fn run(
        &self,
        script: &'static str,
        template: &CommandTemplate,
    ) -> Result<(), WorkerError> {
        let res = self.run_inner(script, template).await;
        if let Err(err) = &res {
            self.publish_failure(err);
        }
        res
    }

    async fn run_inner(
        &self,
        script: &'static str,
        template: &CommandTemplate,
    ) -> Result<(), WorkerError> {
        let line = template.render(&self.config.substitutions(self.slot));
        let _busy = BusyGuard::acquire(self.busy, "helper script")?;

        self.log
            .log(Level::DEBUG, &format!("{}: {script}: {line}", self.name));

        let mut child = process::shell(&line)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(self.config.can_signal)
            .spawn()
            .map_err(|e| WorkerError::SpawnFailed {
                what: script,
                error: e.to_string(),
            })?;

        let mut readers = Vec::with_capacity(2);
        if let Some(out) = child.stdout.take() {
            readers.push(tokio::spawn(log_output(
                out,
                format!("{}/stdout: ", self.name),
                Arc::clone(self.log),
            )));
        }
        if let Some(err) = child.stderr.take() {
            readers.push(tokio::spawn(log_output(
                err,
                format!("{}/stderr: ", self.name),
                Arc::clone(self.log),
            )));
        }

        let started = Instant::now();
        let timeout = self.config.script_execute_timeout;
        let deadline = time::sleep(timeout);
        tokio::pin!(deadline);
        // Only a destroy that arrives while this script runs interrupts it.
        let cancel = (self.config.can_signal && !self.cancel.is_cancelled())
            .then_some(self.cancel);
        let mut kill_sent = false;

        let status = loop {
            tokio::select! {
                biased;
                status = child.wait() => break Some(status),
                _ = &mut deadline => break None,
                _ = cancelled(cancel), if !kill_sent => {
                    kill_sent = true;
                    let _ = child.start_kill();
                }
            }
        };

        let Some(status) = status else {
            if self.config.can_signal {
                let _ = child.start_kill();
                let _ = child.wait().await;
            } else {
                process::reap(child, format!("{}/{script}", self.name), Arc::clone(self.log));
            }
            for r in &readers {
                r.abort();
            }
            self.log.log(
                Level::DEBUG,
                &format!("{}: {script} timed out after {timeout:?}", self.name),
            );
            return Err(WorkerError::ScriptTimeout { script, timeout });
        };

        let status = status.map_err(|e| WorkerError::SpawnFailed {
            what: script,
            error: e.to_string(),
        })?;
        let _ = time::timeout(
            OUTPUT_DRAIN,
            futures::future::join_all(readers.iter_mut()),
        )
        .await;
        for r in &readers {
            r.abort();
        }

        let (code, signal) = process::decode_exit(status);
        self.log.log(
            Level::DEBUG,
            &format!(
                "{}: {script} finished in {}ms, code={code:?} signal={signal}",
                self.name,
                started.elapsed().as_millis()
            ),
        );

        if code == Some(0) && signal == 0 {
            Ok(())
        } else {
            Err(WorkerError::ScriptFailed {
                script,
                code: code.unwrap_or(-1),
                signal,
            })
        }
    }

    fn publish_failure(&self, err: &WorkerError) {
        let Some(bus) = self.bus else { return };
        let mut ev = Event::new(EventKind::ScriptFailed)
            .with_slot(self.slot)
            .with_reason(err.to_string());
        if let WorkerError::ScriptTimeout { timeout, .. } = err {
            ev = ev.with_timeout(*timeout);
        }
        bus.publish(ev);
    }
}

/// Resolves when `token` is cancelled; never without a token.
async fn cancelled(token: Option<&CancellationToken>) {
    match token {
        Some(token) => token.cancelled().await,
        None => std::future::pending().await,
    }
}

/// Logs a helper output stream line by line at debug level.
async fn log_output<R>(mut pipe: R, tag: String, log: Arc<dyn LogSink>)
where
    R: AsyncRead + Unpin,
{
    let mut annotator = LineAnnotator::new(tag.clone());
    let mut buf = vec![0u8; 4096];
    loop {
        match pipe.read(&mut buf).await {
            Ok(0) => {
                for line in annotator.finish() {
                    log.log(Level::DEBUG, &line);
                }
                return;
            }
            Ok(n) => {
                for line in annotator.annotate(&buf[..n]) {
                    log.log(Level::DEBUG, &line);
                }
            }
            Err(e) => {
                log.log(Level::ERROR, &format!("{tag}read failed: {e}"));
                return;
            }
        }
    }
}
