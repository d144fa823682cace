//! K-way ordered merge of external cursors.
//!
//! Takes N cursors whose results are already ordered in a known direction
//! and emits the globally ordered merge: least `(timestamp, param_id)`
//! first for forward scans, greatest first for backward scans, ties broken
//! by source order. The merge runs inside its own cursor bridge, so a
//! `FanInCursor` is itself an external cursor and composes further.

use std::cmp::Ordering;
use std::collections::VecDeque;

use crate::cursor::{CursorHandle, CursorResult, CursorSink, ExternalCursor, InternalCursor};
use crate::error::StatusCode;
use crate::query::Direction;

/// How many results are pulled from a source per refill.
const MERGE_BATCH: usize = 128;

struct MergeSource {
    cursor: CursorHandle,
    pending: VecDeque<CursorResult>,
    exhausted: bool,
}

impl MergeSource {
    fn refill(&mut self) -> Result<(), StatusCode> {
        if self.exhausted || !self.pending.is_empty() {
            return Ok(());
        }

        let mut batch = [CursorResult::default(); MERGE_BATCH];
        let n = self.cursor.read(&mut batch);
        if n == 0 {
            self.exhausted = true;
            if let Some(code) = self.cursor.is_error() {
                return Err(code);
            }
        } else {
            self.pending.extend(batch[..n].iter().copied());
        }
        Ok(())
    }
}

fn compare(a: &CursorResult, b: &CursorResult, direction: Direction) -> Ordering {
    let key_a = (a.timestamp, a.param_id);
    let key_b = (b.timestamp, b.param_id);
    match direction {
        Direction::Forward => key_a.cmp(&key_b),
        Direction::Backward => key_b.cmp(&key_a),
    }
}

fn merge(sources: Vec<CursorHandle>, direction: Direction, sink: &mut CursorSink) {
    let mut sources: Vec<MergeSource> = sources
        .into_iter()
        .map(|cursor| MergeSource {
            cursor,
            pending: VecDeque::new(),
            exhausted: false,
        })
        .collect();

    for source in sources.iter_mut() {
        if let Err(code) = source.refill() {
            sink.set_error(code);
            return;
        }
    }

    loop {
        // Least head wins; ties go to the earliest source, which keeps the
        // merge stable across equal keys.
        let mut best: Option<(usize, CursorResult)> = None;
        for (idx, source) in sources.iter().enumerate() {
            if let Some(&head) = source.pending.front() {
                let better = match &best {
                    None => true,
                    Some((_, current)) => compare(&head, current, direction) == Ordering::Less,
                };
                if better {
                    best = Some((idx, head));
                }
            }
        }

        let Some((winner, result)) = best else {
            sink.complete();
            return;
        };

        sources[winner].pending.pop_front();
        if !sink.put(result) {
            return;
        }

        if let Err(code) = sources[winner].refill() {
            sink.set_error(code);
            return;
        }
    }
}

/// Ordered fan-in over N per-page cursors.
pub struct FanInCursor {
    inner: CursorHandle,
}

impl FanInCursor {
    pub fn new(sources: Vec<CursorHandle>, direction: Direction) -> FanInCursor {
        let inner = CursorHandle::spawn(move |sink| merge(sources, direction, sink));
        FanInCursor { inner }
    }
}

impl ExternalCursor for FanInCursor {
    fn read(&mut self, buf: &mut [CursorResult]) -> usize {
        self.inner.read(buf)
    }

    fn is_done(&self) -> bool {
        self.inner.is_done()
    }

    fn is_error(&self) -> Option<StatusCode> {
        self.inner.is_error()
    }

    fn close(&mut self) {
        self.inner.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Timestamp;

    fn emit(timestamps: Vec<i64>, param_id: u32) -> CursorHandle {
        CursorHandle::spawn(move |sink| {
            for ts in timestamps {
                if !sink.put(CursorResult {
                    offset: ts as u32,
                    param_id,
                    timestamp: Timestamp(ts),
                }) {
                    return;
                }
            }
            sink.complete();
        })
    }

    fn drain(cursor: &mut FanInCursor) -> Vec<i64> {
        let mut buf = [CursorResult::default(); 8];
        let mut out = Vec::new();
        loop {
            let n = cursor.read(&mut buf);
            if n == 0 {
                break;
            }
            out.extend(buf[..n].iter().map(|r| r.timestamp.value()));
        }
        out
    }

    #[test]
    fn merges_three_sources_in_forward_order() {
        let sources = vec![
            emit(vec![1, 3, 5], 1),
            emit(vec![2, 4, 6], 1),
            emit(vec![7, 8, 9], 1),
        ];
        let mut merged = FanInCursor::new(sources, Direction::Forward);

        assert_eq!(drain(&mut merged), vec![1, 2, 3, 4, 5, 6, 7, 8, 9]);
        assert!(merged.is_done());
        assert!(merged.is_error().is_none());
    }

    #[test]
    fn merges_backward_order() {
        let sources = vec![emit(vec![5, 3, 1], 1), emit(vec![6, 4, 2], 1)];
        let mut merged = FanInCursor::new(sources, Direction::Backward);

        assert_eq!(drain(&mut merged), vec![6, 5, 4, 3, 2, 1]);
    }

    #[test]
    fn equal_keys_keep_source_order() {
        let sources = vec![emit(vec![1, 2], 10), emit(vec![1, 2], 10)];
        let mut merged = FanInCursor::new(sources, Direction::Forward);

        let mut buf = [CursorResult::default(); 8];
        let mut out = Vec::new();
        loop {
            let n = merged.read(&mut buf);
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }

        let offsets: Vec<u32> = out.iter().map(|r| r.offset).collect();
        assert_eq!(out.len(), 4);
        // both ts=1 results precede both ts=2 results, first source first
        assert_eq!(offsets, vec![1, 1, 2, 2]);
    }

    #[test]
    fn empty_sources_complete_immediately() {
        let sources = vec![emit(vec![], 1), emit(vec![], 1)];
        let mut merged = FanInCursor::new(sources, Direction::Forward);

        assert_eq!(drain(&mut merged), Vec::<i64>::new());
        assert!(merged.is_done());
    }

    #[test]
    fn first_source_error_wins() {
        let failing = CursorHandle::spawn(|sink| {
            sink.put(CursorResult {
                offset: 0,
                param_id: 1,
                timestamp: Timestamp(1),
            });
            sink.set_error(StatusCode::BadArg);
        });
        let sources = vec![failing, emit(vec![2, 3], 1)];
        let mut merged = FanInCursor::new(sources, Direction::Forward);

        drain(&mut merged);
        assert_eq!(merged.is_error(), Some(StatusCode::BadArg));
    }

    #[test]
    fn close_stops_the_merge_and_its_sources() {
        let sources = vec![emit((0..10_000).collect(), 1), emit((0..10_000).collect(), 2)];
        let mut merged = FanInCursor::new(sources, Direction::Forward);

        let mut buf = [CursorResult::default(); 4];
        assert!(merged.read(&mut buf) > 0);
        merged.close();
        // dropping after close must not hang: every producer observes a
        // closed channel on its next put
    }
}
