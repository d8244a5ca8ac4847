//! Consumer-side event buffer shared between a stream handle and its driver

use futures::task::AtomicWaker;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::task::{Context, Poll};
use tokio::sync::Notify;

use crate::error::StreamError;

/// Event delivered to the consumer of a cursor stream
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent<R> {
    /// One row produced by the cursor
    Data(R),
    /// A fetch or close failure, or the reason passed to `destroy`
    Error(StreamError),
    /// The cursor is exhausted or the stream was destroyed; no data follows
    End,
    /// Final lifecycle event, emitted exactly once
    Close,
}

/// Where a stream is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Constructed, nothing requested yet
    Idle,
    /// Timer armed, fetches occurring
    Polling,
    /// Timer cancelled until the consumer asks for more
    Paused,
    /// A fetch or close failed; no further polls until the stream is destroyed
    Halted,
    /// Close call outstanding
    Destroying,
    /// Terminal
    Closed,
}

/// Progress counters for a single stream
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamStats {
    /// Fetch calls issued against the cursor
    pub fetches: u64,
    /// Rows pushed into the consumer buffer
    pub rows_pushed: u64,
    /// Times polling paused for backpressure
    pub pauses: u64,
}

struct Inner<R> {
    events: VecDeque<StreamEvent<R>>,
    rows: usize,
    finished: bool,
    lifecycle: Lifecycle,
    stats: StreamStats,
}

pub(crate) struct EventBuffer<R> {
    inner: Mutex<Inner<R>>,
    capacity: usize,
    reader: AtomicWaker,
    demand: Notify,
}

impl<R> EventBuffer<R> {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                events: VecDeque::new(),
                rows: 0,
                finished: false,
                lifecycle: Lifecycle::Idle,
                stats: StreamStats::default(),
            }),
            capacity,
            reader: AtomicWaker::new(),
            demand: Notify::new(),
        }
    }

    fn has_room(&self, rows: usize) -> bool {
        rows == 0 || rows < self.capacity
    }

    /// Whether the consumer buffer is below its high-water mark.
    pub(crate) fn wants_more(&self) -> bool {
        let inner = self.inner.lock();
        !inner.finished && self.has_room(inner.rows)
    }

    /// Push one row. Returns `false` once the buffer is at or above capacity.
    pub(crate) fn push_row(&self, row: R) -> bool {
        let room = {
            let mut inner = self.inner.lock();
            inner.events.push_back(StreamEvent::Data(row));
            inner.rows += 1;
            inner.stats.rows_pushed += 1;
            inner.rows < self.capacity
        };
        self.reader.wake();
        room
    }

    pub(crate) fn push_error(&self, err: StreamError) {
        self.inner.lock().events.push_back(StreamEvent::Error(err));
        self.reader.wake();
    }

    pub(crate) fn push_end(&self) {
        self.inner.lock().events.push_back(StreamEvent::End);
        self.reader.wake();
    }

    pub(crate) fn push_close(&self) {
        self.inner.lock().events.push_back(StreamEvent::Close);
        self.reader.wake();
    }

    /// Mark that no further events will be pushed.
    pub(crate) fn finish(&self) {
        self.inner.lock().finished = true;
        self.reader.wake();
    }

    pub(crate) fn set_lifecycle(&self, lifecycle: Lifecycle) {
        self.inner.lock().lifecycle = lifecycle;
    }

    pub(crate) fn lifecycle(&self) -> Lifecycle {
        self.inner.lock().lifecycle
    }

    pub(crate) fn record_fetch(&self) {
        self.inner.lock().stats.fetches += 1;
    }

    pub(crate) fn record_pause(&self) {
        self.inner.lock().stats.pauses += 1;
    }

    pub(crate) fn stats(&self) -> StreamStats {
        self.inner.lock().stats.clone()
    }

    /// Resolves once the consumer has asked for more rows.
    pub(crate) async fn demanded(&self) {
        self.demand.notified().await
    }

    /// Pop the next event, signalling demand while the buffer has room.
    pub(crate) fn poll_pop(&self, cx: &mut Context<'_>) -> Poll<Option<StreamEvent<R>>> {
        let mut inner = self.inner.lock();

        if let Some(event) = inner.events.pop_front() {
            if matches!(event, StreamEvent::Data(_)) {
                inner.rows -= 1;
            }
            if !inner.finished && self.has_room(inner.rows) {
                self.demand.notify_one();
            }
            return Poll::Ready(Some(event));
        }

        if inner.finished {
            return Poll::Ready(None);
        }

        self.demand.notify_one();
        // Registered under the lock so a concurrent push cannot slip between
        // the emptiness check and the registration.
        self.reader.register(cx.waker());
        Poll::Pending
    }
}
