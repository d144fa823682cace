//! Streaming cursors carrying query results from producers to consumers.
//!
//! Cursors have two faces. The *internal* face ([`InternalCursor`]) is
//! driven by search code: it delivers results with `put`, signals
//! end-of-stream with `complete`, and reports failure with `set_error`.
//! The *external* face ([`ExternalCursor`]) is driven by the caller: it
//! pulls batches with `read`, inspects terminal state, and cancels with
//! `close`.
//!
//! [`CursorHandle::spawn`] bridges the two: the producer closure runs as
//! its own task connected to the consumer by a bounded channel. `put`
//! blocks while the consumer's buffer is full and returns `false` once the
//! consumer has closed the stream, which is the producer's signal to
//! unwind. Results reach the consumer in exact `put` order. `close` is the
//! sole cancellation primitive; there is no timeout at this layer.

mod fanin;

pub use fanin::FanInCursor;

use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;

use crate::error::StatusCode;
use crate::types::{EntryOffset, ParamId, Timestamp};

/// Depth of the buffer between a producer task and its consumer. A full
/// buffer suspends the producer inside `put`.
pub const CURSOR_QUEUE_DEPTH: usize = 1024;

/// One query result: where the record lives, plus the keys needed to
/// order it against results from other pages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CursorResult {
    pub offset: EntryOffset,
    pub param_id: ParamId,
    pub timestamp: Timestamp,
}

/// Producer side of a cursor.
pub trait InternalCursor {
    /// Delivers one result. Returns `false` if the consumer has closed the
    /// stream; the producer must then stop without calling `complete`.
    fn put(&mut self, result: CursorResult) -> bool;

    /// Signals end-of-stream. No further calls are permitted.
    fn complete(&mut self);

    /// Signals failure. Implies completion.
    fn set_error(&mut self, code: StatusCode);
}

/// Consumer side of a cursor.
pub trait ExternalCursor {
    /// Copies up to `buf.len()` already-produced results into `buf`,
    /// blocking until at least one result is available or the stream has
    /// terminated. Returns 0 only at end-of-stream or error.
    fn read(&mut self, buf: &mut [CursorResult]) -> usize;

    fn is_done(&self) -> bool;

    fn is_error(&self) -> Option<StatusCode>;

    /// Releases the stream; any subsequent producer `put` returns `false`.
    fn close(&mut self);
}

#[derive(Default)]
struct CursorShared {
    error: Mutex<Option<StatusCode>>,
}

/// Internal cursor handed to a producer task by [`CursorHandle::spawn`].
pub struct CursorSink {
    tx: Option<Sender<CursorResult>>,
    shared: Arc<CursorShared>,
}

impl InternalCursor for CursorSink {
    fn put(&mut self, result: CursorResult) -> bool {
        match &self.tx {
            Some(tx) => tx.send(result).is_ok(),
            None => false,
        }
    }

    fn complete(&mut self) {
        self.tx = None;
    }

    fn set_error(&mut self, code: StatusCode) {
        *self.shared.error.lock() = Some(code);
        self.tx = None;
    }
}

/// External cursor over a spawned producer task.
pub struct CursorHandle {
    rx: Option<Receiver<CursorResult>>,
    shared: Arc<CursorShared>,
    done: bool,
    producer: Option<JoinHandle<()>>,
}

impl CursorHandle {
    /// Runs `producer` as a task feeding this cursor. The producer receives
    /// the internal face and is expected to end with `complete` or
    /// `set_error`; merely returning also terminates the stream.
    pub fn spawn<F>(producer: F) -> CursorHandle
    where
        F: FnOnce(&mut CursorSink) + Send + 'static,
    {
        let (tx, rx) = bounded(CURSOR_QUEUE_DEPTH);
        let shared = Arc::new(CursorShared::default());
        let mut sink = CursorSink {
            tx: Some(tx),
            shared: Arc::clone(&shared),
        };

        let handle = std::thread::spawn(move || producer(&mut sink));

        CursorHandle {
            rx: Some(rx),
            shared,
            done: false,
            producer: Some(handle),
        }
    }
}

impl ExternalCursor for CursorHandle {
    fn read(&mut self, buf: &mut [CursorResult]) -> usize {
        if self.done || buf.is_empty() {
            return 0;
        }
        let Some(rx) = &self.rx else { return 0 };

        match rx.recv() {
            Ok(first) => {
                buf[0] = first;
                let mut filled = 1;
                while filled < buf.len() {
                    match rx.try_recv() {
                        Ok(result) => {
                            buf[filled] = result;
                            filled += 1;
                        }
                        Err(_) => break,
                    }
                }
                filled
            }
            Err(_) => {
                self.done = true;
                0
            }
        }
    }

    fn is_done(&self) -> bool {
        self.done
    }

    fn is_error(&self) -> Option<StatusCode> {
        *self.shared.error.lock()
    }

    fn close(&mut self) {
        self.rx = None;
    }
}

impl Drop for CursorHandle {
    fn drop(&mut self) {
        self.rx = None;
        if let Some(handle) = self.producer.take() {
            let _ = handle.join();
        }
    }
}

/// Internal cursor that records everything into a `Vec`. Used by
/// single-page callers and tests that want the whole result set at once.
#[derive(Debug, Default)]
pub struct RecordingCursor {
    pub results: Vec<CursorResult>,
    pub completed: bool,
    pub error: Option<StatusCode>,
}

impl RecordingCursor {
    pub fn new() -> Self {
        Self::default()
    }
}

impl InternalCursor for RecordingCursor {
    fn put(&mut self, result: CursorResult) -> bool {
        self.results.push(result);
        true
    }

    fn complete(&mut self) {
        self.completed = true;
    }

    fn set_error(&mut self, code: StatusCode) {
        self.error = Some(code);
        self.completed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result_at(timestamp: i64) -> CursorResult {
        CursorResult {
            offset: timestamp as u32,
            param_id: 1,
            timestamp: Timestamp(timestamp),
        }
    }

    #[test]
    fn results_arrive_in_put_order() {
        let mut cursor = CursorHandle::spawn(|sink| {
            for ts in 0..100 {
                assert!(sink.put(result_at(ts)));
            }
            sink.complete();
        });

        let mut buf = [CursorResult::default(); 16];
        let mut seen = Vec::new();
        loop {
            let n = cursor.read(&mut buf);
            if n == 0 {
                break;
            }
            seen.extend_from_slice(&buf[..n]);
        }

        assert!(cursor.is_done());
        assert!(cursor.is_error().is_none());
        let expected: Vec<i64> = (0..100).collect();
        let got: Vec<i64> = seen.iter().map(|r| r.timestamp.value()).collect();
        assert_eq!(got, expected);
    }

    #[test]
    fn read_blocks_until_a_result_is_available() {
        let mut cursor = CursorHandle::spawn(|sink| {
            std::thread::sleep(std::time::Duration::from_millis(20));
            sink.put(result_at(7));
            sink.complete();
        });

        let mut buf = [CursorResult::default(); 4];
        let n = cursor.read(&mut buf);
        assert_eq!(n, 1);
        assert_eq!(buf[0].timestamp, Timestamp(7));
    }

    #[test]
    fn close_makes_put_return_false() {
        let (probe_tx, probe_rx) = crossbeam_channel::bounded(1);

        let mut cursor = CursorHandle::spawn(move |sink| {
            let mut rejected = false;
            for ts in 0..100_000 {
                if !sink.put(result_at(ts)) {
                    rejected = true;
                    break;
                }
            }
            probe_tx.send(rejected).unwrap();
        });

        let mut buf = [CursorResult::default(); 8];
        assert!(cursor.read(&mut buf) > 0);
        cursor.close();

        assert!(probe_rx.recv().unwrap(), "producer never observed the close");
    }

    #[test]
    fn error_is_visible_after_drain() {
        let mut cursor = CursorHandle::spawn(|sink| {
            sink.put(result_at(1));
            sink.set_error(StatusCode::BadArg);
        });

        let mut buf = [CursorResult::default(); 4];
        assert_eq!(cursor.read(&mut buf), 1);
        assert_eq!(cursor.read(&mut buf), 0);
        assert_eq!(cursor.is_error(), Some(StatusCode::BadArg));
        assert!(cursor.is_done());
    }

    #[test]
    fn empty_stream_completes_with_zero_results() {
        let mut cursor = CursorHandle::spawn(|sink| sink.complete());

        let mut buf = [CursorResult::default(); 4];
        assert_eq!(cursor.read(&mut buf), 0);
        assert!(cursor.is_done());
        assert!(cursor.is_error().is_none());
    }

    #[test]
    fn recording_cursor_captures_everything() {
        let mut cursor = RecordingCursor::new();
        assert!(cursor.put(result_at(1)));
        assert!(cursor.put(result_at(2)));
        cursor.complete();

        assert_eq!(cursor.results.len(), 2);
        assert!(cursor.completed);
        assert!(cursor.error.is_none());
    }
}
