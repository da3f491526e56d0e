//! # BoundedSink: capped in-memory output buffer.
//!
//! Collects bytes written by a worker process up to a fixed capacity.
//!
//! ## Rules
//! - Writes that fit are stored whole.
//! - The first write that does not fit stores the bytes that still fit,
//!   returns [`SinkError::Overflow`] **exactly once**, and closes the sink.
//! - Every write after that returns [`SinkError::Closed`].
//! - Stored bytes never exceed the capacity.
//!
//! The sink is a cheap `Clone` handle: the caller keeps one copy to read the
//! result, the supervisor writes through another.
//!
//! ## Example
//! ```rust
//! use slotvisor::{BoundedSink, SinkError};
//!
//! let sink = BoundedSink::new(4);
//! assert!(sink.write(b"ab").is_ok());
//! assert!(matches!(sink.write(b"cdef"), Err(SinkError::Overflow { .. })));
//! assert_eq!(sink.contents(), b"abcd");
//! assert_eq!(sink.write(b"x"), Err(SinkError::Closed));
//! ```

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::SinkError;

#[derive(Debug, Default)]
struct SinkState {
    buffer: Vec<u8>,
    closed: bool,
}

/// Shared byte buffer with a hard capacity.
#[derive(Clone, Debug)]
pub struct BoundedSink {
    limit: Option<usize>,
    state: Arc<Mutex<SinkState>>,
}

impl BoundedSink {
    /// Creates a sink that holds at most `limit` bytes.
    pub fn new(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            state: Arc::new(Mutex::new(SinkState::default())),
        }
    }

    /// Creates a sink without a capacity.
    pub fn unbounded() -> Self {
        Self {
            limit: None,
            state: Arc::new(Mutex::new(SinkState::default())),
        }
    }

    /// Capacity in bytes, `None` if unbounded.
    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    /// Appends `data`.
    ///
    /// Returns the number of bytes stored. See the module docs for overflow rules.
    pub fn write(&self, data: &[u8]) -> Result<usize, SinkError> {
        let mut st = self.state.lock();
        if st.closed {
            return Err(SinkError::Closed);
        }

        let Some(limit) = self.limit else {
            st.buffer.extend_from_slice(data);
            return Ok(data.len());
        };

        let left = limit.saturating_sub(st.buffer.len());
        if data.len() <= left {
            st.buffer.extend_from_slice(data);
            return Ok(data.len());
        }

        st.buffer.extend_from_slice(&data[..left]);
        st.closed = true;
        Err(SinkError::Overflow {
            limit,
            accepted: left,
            offered: data.len(),
        })
    }

    /// Closes the sink; later writes return [`SinkError::Closed`].
    pub fn close(&self) {
        self.state.lock().closed = true;
    }

    /// Whether the sink refuses writes.
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Whether the stored bytes reached the capacity.
    pub fn is_full(&self) -> bool {
        match self.limit {
            Some(limit) => self.state.lock().buffer.len() >= limit,
            None => false,
        }
    }

    /// Number of stored bytes.
    pub fn len(&self) -> usize {
        self.state.lock().buffer.len()
    }

    /// True if nothing was stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the stored bytes.
    pub fn contents(&self) -> Vec<u8> {
        self.state.lock().buffer.clone()
    }

    /// Stored bytes as text, replacing invalid UTF-8.
    pub fn contents_lossy(&self) -> String {
        String::from_utf8_lossy(&self.state.lock().buffer).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_writes_within_limit_are_stored() {
        let sink = BoundedSink::new(10);
        assert_eq!(sink.write(b"hello"), Ok(5));
        assert_eq!(sink.write(b"world"), Ok(5));
        assert!(sink.is_full());
        assert!(!sink.is_closed());
        assert_eq!(sink.contents(), b"helloworld");
    }

    #[test]
    fn test_overflow_reported_once_then_closed() {
        let sink = BoundedSink::new(3);
        assert_eq!(
            sink.write(b"abcde"),
            Err(SinkError::Overflow {
                limit: 3,
                accepted: 3,
                offered: 5
            })
        );
        assert!(sink.is_closed());
        assert_eq!(sink.write(b"f"), Err(SinkError::Closed));
        assert_eq!(sink.write(b""), Err(SinkError::Closed));
        assert_eq!(sink.len(), 3);
    }

    #[test]
    fn test_full_sink_overflows_on_next_byte() {
        let sink = BoundedSink::new(2);
        assert_eq!(sink.write(b"ab"), Ok(2));
        assert!(matches!(
            sink.write(b"c"),
            Err(SinkError::Overflow { accepted: 0, .. })
        ));
        assert_eq!(sink.contents(), b"ab");
    }

    #[test]
    fn test_zero_capacity() {
        let sink = BoundedSink::new(0);
        assert_eq!(sink.write(b""), Ok(0));
        assert!(sink.write(b"a").is_err());
        assert!(sink.is_empty());
    }

    #[test]
    fn test_unbounded_accepts_everything() {
        let sink = BoundedSink::unbounded();
        let chunk = vec![0u8; 64 * 1024];
        for _ in 0..16 {
            sink.write(&chunk).unwrap();
        }
        assert_eq!(sink.len(), 16 * 64 * 1024);
        assert!(!sink.is_full());
    }

    #[test]
    fn test_clones_share_the_buffer() {
        let sink = BoundedSink::new(8);
        let writer = sink.clone();
        writer.write(&[0, 0xff, b'\n']).unwrap();
        assert_eq!(sink.contents(), vec![0, 0xff, b'\n']);
        writer.close();
        assert!(sink.is_closed());
    }
}
