//! Polling cursor stream
//!
//! A [`PollingCursorStream`] turns a paginated [`Cursor`] into a pull-based
//! sequence of rows. Each stream spawns one driver task which is the only
//! place its polling state is mutated. The handle and the driver share just
//! the consumer buffer and the `destroyed` flag.
//!
//! Polls are issued lazily: nothing is fetched until the consumer asks for a
//! row. From then on the driver fetches `nrows` rows immediately and again on
//! every `interval` tick, until the consumer buffer fills up (polling pauses
//! until the consumer drains it), the cursor returns an empty batch (the
//! stream ends), a fetch fails (polling halts), or the stream is destroyed.

use futures::future::{BoxFuture, poll_fn};
use futures::stream::Stream;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, debug_span, info, warn, Instrument, Span};

use crate::buffer::{EventBuffer, Lifecycle, StreamEvent, StreamStats};
use crate::config::{StreamConfig, StreamOptions};
use crate::error::{Result, StreamError};
use crate::traits::{Cursor, CursorProvider};

struct Shared<R> {
    buffer: EventBuffer<R>,
    destroyed: AtomicBool,
}

enum Control {
    Destroy(Option<StreamError>),
    /// The handle was dropped; nobody is left to retry a failed close.
    Detach,
}

/// Builder for a [`PollingCursorStream`]
pub struct StreamBuilder<C: Cursor> {
    cursor: Arc<C>,
    config: StreamConfig,
    span: Option<Span>,
}

impl<C: Cursor> StreamBuilder<C> {
    /// Run the stream's driver inside `span` instead of a fresh `cursor_stream` span.
    pub fn span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    /// Spawn the driver on the current tokio runtime and return the handle.
    pub fn build(self) -> Result<PollingCursorStream<C>> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| StreamError::Other(format!("cursor streams need a tokio runtime: {}", e)))?;

        let config = self.config;
        let span = self.span.unwrap_or_else(|| {
            debug_span!("cursor_stream", query = %config.query(), nrows = config.nrows())
        });

        span.in_scope(|| {
            debug!(
                nrows = config.nrows(),
                interval_ms = config.interval().as_millis() as u64,
                buffer_capacity = config.buffer_capacity(),
                "Creating a cursor stream"
            );
        });

        let shared = Arc::new(Shared {
            buffer: EventBuffer::new(config.buffer_capacity()),
            destroyed: AtomicBool::new(false),
        });
        let (control_tx, control_rx) = mpsc::unbounded_channel();

        let driver = Driver {
            cursor: self.cursor,
            config: config.clone(),
            shared: Arc::clone(&shared),
            control: control_rx,
            handle_attached: true,
            read_state: ReadState::Idle,
            timer: None,
            fetching: None,
            closing: None,
            pending_error: None,
        };
        runtime.spawn(driver.run().instrument(span));

        Ok(PollingCursorStream {
            shared,
            control: control_tx,
            config,
            closed: false,
        })
    }
}

/// Pull-based, backpressure-aware stream over a paginated cursor.
///
/// Read it with [`next_event`](Self::next_event) to observe every lifecycle
/// event, or as a `futures::Stream` of `Result<Row>`. Dropping the handle
/// destroys the stream and closes the cursor.
pub struct PollingCursorStream<C: Cursor> {
    shared: Arc<Shared<C::Row>>,
    control: mpsc::UnboundedSender<Control>,
    config: StreamConfig,
    closed: bool,
}

impl<C: Cursor> PollingCursorStream<C> {
    /// Start a stream over `cursor` with an already validated config.
    pub fn new(cursor: Arc<C>, config: StreamConfig) -> Result<Self> {
        Self::builder(cursor, config).build()
    }

    /// Like [`new`](Self::new), but lets the caller inject a tracing span first.
    pub fn builder(cursor: Arc<C>, config: StreamConfig) -> StreamBuilder<C> {
        StreamBuilder {
            cursor,
            config,
            span: None,
        }
    }

    /// Validate `options`, open a cursor for the query and start a stream over it.
    pub fn open<P>(provider: &P, options: &StreamOptions) -> Result<Self>
    where
        P: CursorProvider<Cursor = C> + ?Sized,
    {
        let config = options.validate()?;
        let cursor = provider.open(config.query(), config.values())?;
        Self::new(Arc::new(cursor), config)
    }

    /// The validated configuration this stream runs with.
    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Whether a destroy is in progress or finished.
    pub fn is_destroyed(&self) -> bool {
        self.shared.destroyed.load(Ordering::SeqCst)
    }

    /// Current lifecycle state as last recorded by the driver.
    pub fn lifecycle(&self) -> Lifecycle {
        self.shared.buffer.lifecycle()
    }

    /// Snapshot of fetch, row and pause counters.
    pub fn stats(&self) -> StreamStats {
        self.shared.buffer.stats()
    }

    /// Shut the stream down, closing the cursor.
    ///
    /// Only the first call has an effect. Once the cursor is closed the
    /// consumer sees `error` (when given), then `End`, then `Close`. If the
    /// close fails an `Error` event is emitted instead and the stream may be
    /// destroyed again.
    pub fn destroy(&self, error: Option<StreamError>) {
        if self.shared.destroyed.swap(true, Ordering::SeqCst) {
            debug!("Attempted to destroy an already destroyed stream");
            return;
        }
        if self.control.send(Control::Destroy(error)).is_err() {
            debug!("Stream driver already finished");
        }
    }

    /// Poll for the next event, registering `cx` to be woken when one arrives.
    pub fn poll_event(&mut self, cx: &mut Context<'_>) -> Poll<Option<StreamEvent<C::Row>>> {
        if self.closed {
            return Poll::Ready(None);
        }
        let event = std::task::ready!(self.shared.buffer.poll_pop(cx));
        if matches!(event, None | Some(StreamEvent::Close)) {
            self.closed = true;
        }
        Poll::Ready(event)
    }

    /// Wait for the next event. Returns `None` after `Close`.
    pub async fn next_event(&mut self) -> Option<StreamEvent<C::Row>> {
        poll_fn(|cx| self.poll_event(cx)).await
    }
}

impl<C: Cursor> Stream for PollingCursorStream<C> {
    type Item = Result<C::Row>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            match std::task::ready!(this.poll_event(cx)) {
                Some(StreamEvent::Data(row)) => return Poll::Ready(Some(Ok(row))),
                Some(StreamEvent::Error(err)) => return Poll::Ready(Some(Err(err))),
                Some(StreamEvent::End) => continue,
                Some(StreamEvent::Close) | None => return Poll::Ready(None),
            }
        }
    }
}

impl<C: Cursor> Drop for PollingCursorStream<C> {
    fn drop(&mut self) {
        self.destroy(None);
        let _ = self.control.send(Control::Detach);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadState {
    Idle,
    InFlight,
    /// A fetch failed; polling stays off until the stream is destroyed.
    Halted,
    /// Closing the cursor failed; only another destroy moves on from here.
    CloseFailed,
}

type Outstanding<T> = Option<BoxFuture<'static, anyhow::Result<T>>>;

struct Driver<C: Cursor> {
    cursor: Arc<C>,
    config: StreamConfig,
    shared: Arc<Shared<C::Row>>,
    control: mpsc::UnboundedReceiver<Control>,
    handle_attached: bool,
    read_state: ReadState,
    timer: Option<Interval>,
    fetching: Outstanding<Vec<C::Row>>,
    closing: Outstanding<()>,
    pending_error: Option<StreamError>,
}

async fn resolve<T>(pending: &mut Outstanding<T>) -> anyhow::Result<T> {
    match pending {
        Some(fut) => fut.await,
        None => std::future::pending().await,
    }
}

async fn tick(timer: &mut Option<Interval>) {
    match timer {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

impl<C: Cursor> Driver<C> {
    async fn run(mut self) {
        loop {
            tokio::select! {
                biased;

                msg = self.control.recv(), if self.handle_attached => match msg {
                    Some(Control::Destroy(error)) => self.begin_destroy(error),
                    Some(Control::Detach) | None => {
                        self.handle_attached = false;
                        if !self.shared.destroyed.swap(true, Ordering::SeqCst) {
                            self.begin_destroy(None);
                        }
                    }
                },
                result = resolve(&mut self.closing) => {
                    self.closing = None;
                    if self.on_closed(result).await {
                        break;
                    }
                }
                result = resolve(&mut self.fetching) => {
                    self.fetching = None;
                    self.on_fetched(result);
                }
                _ = tick(&mut self.timer) => self.poll(),
                _ = self.shared.buffer.demanded() => self.request_more(),
            }
        }
    }

    fn is_destroyed(&self) -> bool {
        self.shared.destroyed.load(Ordering::SeqCst)
    }

    fn set_lifecycle(&self, lifecycle: Lifecycle) {
        self.shared.buffer.set_lifecycle(lifecycle);
    }

    fn request_more(&mut self) {
        if self.read_state != ReadState::Idle || self.is_destroyed() || self.timer.is_some() {
            return;
        }
        // Demand signalled before a pause can arrive after it.
        if !self.shared.buffer.wants_more() {
            return;
        }

        debug!("Polling the cursor...");
        self.poll();

        let period = self.config.interval();
        let mut timer = tokio::time::interval_at(Instant::now() + period, period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.timer = Some(timer);
        self.set_lifecycle(Lifecycle::Polling);
    }

    fn poll(&mut self) {
        if self.fetching.is_some() {
            debug!("Previous fetch still outstanding, skipping poll");
            return;
        }
        if self.is_destroyed() {
            return;
        }

        debug!("Attempting to read from the cursor...");
        let cursor = Arc::clone(&self.cursor);
        let nrows = self.config.nrows();
        self.read_state = ReadState::InFlight;
        self.shared.buffer.record_fetch();
        self.fetching = Some(Box::pin(async move { cursor.fetch(nrows).await }));
    }

    fn cancel_timer(&mut self) {
        if self.timer.take().is_some() {
            debug!("Stopping polling...");
        }
    }

    fn on_fetched(&mut self, result: anyhow::Result<Vec<C::Row>>) {
        if self.read_state == ReadState::InFlight {
            self.read_state = ReadState::Idle;
        }
        if self.is_destroyed() || self.read_state == ReadState::CloseFailed {
            debug!("Discarding fetch result for a destroyed stream");
            return;
        }

        let rows = match result {
            Ok(rows) => rows,
            Err(e) => {
                warn!("Encountered an error while reading from the cursor: {:#}", e);
                self.cancel_timer();
                self.read_state = ReadState::Halted;
                self.set_lifecycle(Lifecycle::Halted);
                self.shared.buffer.push_error(StreamError::fetch(e));
                return;
            }
        };

        if rows.is_empty() {
            debug!("Finished reading from the cursor, no more rows are available");
            self.cancel_timer();
            if !self.shared.destroyed.swap(true, Ordering::SeqCst) {
                self.begin_destroy(None);
            }
            return;
        }

        let len = rows.len();
        debug!("Streaming {} rows...", len);
        let mut full = false;
        for row in rows {
            if !self.shared.buffer.push_row(row) {
                full = true;
            }
        }

        if full {
            debug!("Stopping polling until the consumer is ready for more data...");
            self.cancel_timer();
            self.shared.buffer.record_pause();
            self.set_lifecycle(Lifecycle::Paused);
        }
    }

    fn begin_destroy(&mut self, error: Option<StreamError>) {
        if self.closing.is_some() {
            return;
        }
        self.cancel_timer();
        self.pending_error = error;
        self.set_lifecycle(Lifecycle::Destroying);

        debug!("Closing the cursor...");
        let cursor = Arc::clone(&self.cursor);
        self.closing = Some(Box::pin(async move { cursor.close().await }));
    }

    /// Returns `true` once the stream has reached its terminal state.
    async fn on_closed(&mut self, result: anyhow::Result<()>) -> bool {
        if let Err(e) = result {
            warn!("Encountered an error while closing the cursor, unable to destroy stream: {:#}", e);
            self.pending_error = None;
            self.shared.destroyed.store(false, Ordering::SeqCst);
            self.shared.buffer.push_error(StreamError::close(e));

            if !self.handle_attached {
                warn!("Stream handle dropped, giving up on the cursor");
                return true;
            }
            self.read_state = ReadState::CloseFailed;
            self.set_lifecycle(Lifecycle::Halted);
            return false;
        }

        info!("Closed the cursor");
        // Let synchronous consumer code observe the close before the final events.
        tokio::task::yield_now().await;

        if let Some(error) = self.pending_error.take() {
            debug!("Stream was destroyed due to an error: {}", error);
            self.shared.buffer.push_error(error);
        }
        self.shared.buffer.push_end();
        self.shared.buffer.push_close();
        self.set_lifecycle(Lifecycle::Closed);
        true
    }
}

impl<C: Cursor> Drop for Driver<C> {
    fn drop(&mut self) {
        self.shared.buffer.finish();
    }
}
