//! # Injected logging for supervisors and the pool.
//!
//! Every [`Supervisor`](crate::Supervisor) and
//! [`WorkerSupervisorPool`](crate::WorkerSupervisorPool) writes its messages to an
//! explicit [`LogSink`] handed in at construction. Nothing is process-global:
//! without a sink, an owned [`NoopLog`] is used.
//!
//! - [`NoopLog`] drops every message.
//! - [`TracingLog`] forwards to the `tracing` macros (target `slotvisor`).
//!
//! [`LineAnnotator`] turns raw helper-script output chunks into log lines,
//! marking lines that were split across chunks with `...`.

use tracing::Level;

/// Destination for leveled log messages.
pub trait LogSink: Send + Sync + 'static {
    /// Records one already formatted message.
    fn log(&self, level: Level, message: &str);
}

/// Discards all messages.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopLog;

impl LogSink for NoopLog {
    fn log(&self, _level: Level, _message: &str) {}
}

/// Forwards messages to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLog;

impl LogSink for TracingLog {
    fn log(&self, level: Level, message: &str) {
        match level {
            Level::ERROR => tracing::error!(target: "slotvisor", "{message}"),
            Level::WARN => tracing::warn!(target: "slotvisor", "{message}"),
            Level::INFO => tracing::info!(target: "slotvisor", "{message}"),
            Level::DEBUG => tracing::debug!(target: "slotvisor", "{message}"),
            _ => tracing::trace!(target: "slotvisor", "{message}"),
        }
    }
}

/// Splits output chunks into tagged lines.
///
/// ## Rules
/// - Each line is prefixed with the tag.
/// - A trailing newline ends the chunk cleanly; otherwise the last line gets `...`.
/// - If the previous chunk did not end with a newline, the first line gets a
///   leading `...`.
/// - An incomplete UTF-8 sequence at the end of a chunk is held back until the
///   next chunk (or [`LineAnnotator::finish`]).
///
/// ```text
/// tag="w/stdout: "
/// "ab\ncd"  ──► ["w/stdout: ab", "w/stdout: cd..."]
/// "ef\n"    ──► ["w/stdout: ...ef"]
/// ```
#[derive(Debug)]
pub struct LineAnnotator {
    tag: String,
    ended_with_newline: bool,
    partial: Vec<u8>,
}

impl LineAnnotator {
    /// Creates an annotator for one stream.
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            ended_with_newline: true,
            partial: Vec::new(),
        }
    }

    /// Annotates one chunk; an empty chunk yields nothing.
    pub fn annotate(&mut self, chunk: &[u8]) -> Vec<String> {
        if chunk.is_empty() {
            return Vec::new();
        }

        let mut bytes = std::mem::take(&mut self.partial);
        bytes.extend_from_slice(chunk);
        let keep = incomplete_utf8_suffix(&bytes);
        self.partial = bytes.split_off(bytes.len() - keep);
        if bytes.is_empty() {
            return Vec::new();
        }
        self.lines(&String::from_utf8_lossy(&bytes))
    }

    /// Flushes bytes held back at end of stream.
    pub fn finish(&mut self) -> Vec<String> {
        let bytes = std::mem::take(&mut self.partial);
        if bytes.is_empty() {
            return Vec::new();
        }
        self.lines(&String::from_utf8_lossy(&bytes))
    }

    fn lines(&mut self, text: &str) -> Vec<String> {
        let ends_with_newline = text.ends_with('\n');
        let body = if ends_with_newline {
            &text[..text.len() - 1]
        } else {
            text
        };

        let mut lines: Vec<String> = body.split('\n').map(str::to_string).collect();
        if !self.ended_with_newline {
            if let Some(first) = lines.first_mut() {
                first.insert_str(0, "...");
            }
        }
        if !ends_with_newline {
            if let Some(last) = lines.last_mut() {
                last.push_str("...");
            }
        }
        self.ended_with_newline = ends_with_newline;

        lines
            .into_iter()
            .map(|line| format!("{}{}", self.tag, line))
            .collect()
    }
}

/// Length of a truncated multi-byte sequence at the end of `bytes`.
fn incomplete_utf8_suffix(bytes: &[u8]) -> usize {
    let mut rest = bytes;
    loop {
        match std::str::from_utf8(rest) {
            Ok(_) => return 0,
            Err(e) => match e.error_len() {
                None => return rest.len() - e.valid_up_to(),
                Some(bad) => rest = &rest[e.valid_up_to() + bad..],
            },
        }
    }
}
