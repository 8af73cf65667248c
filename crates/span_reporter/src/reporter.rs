//! Async span reporter.
//!
//! [`AsyncReporter`] is the producer-facing handle. `report` encodes a span
//! and offers it to the bounded queue without ever waiting on I/O; a
//! background [flusher](crate::flusher) turns the queue into size-bounded
//! messages and hands them to the sender.
//!
//! # Example
//!
//! ```rust,ignore
//! use span_reporter::{AsyncReporter, InMemorySender, Span};
//! use std::sync::Arc;
//!
//! let sender = Arc::new(InMemorySender::default());
//! let reporter = AsyncReporter::builder(sender.clone())
//!     .message_max_bytes(64 * 1024)
//!     .start()
//!     .await?;
//!
//! reporter.report(&Span::new(trace_id, span_id, "get /users"))?;
//! reporter.close().await?;
//! ```

use crate::batch::BatchAssembler;
use crate::config::ReporterConfig;
use crate::encoding::{Encode, Encoder, Encoding, JsonEncoder};
use crate::error::{ConfigError, ReportError, ReporterError};
use crate::flusher::{FlushReply, FlushSummary, Flusher};
use crate::metrics::{NoopMetrics, ReporterMetrics};
use crate::queue::{BoundedQueue, Occupancy};
use crate::record::Record;
use crate::sender::{SendError, SenderBoxed};
use crate::state::{FlusherState, StateCell};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Outstanding `flush()` calls buffered ahead of the flusher.
const FLUSH_REQUEST_CAPACITY: usize = 16;

struct Running {
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<Result<(), SendError>>,
}

/// Configures and starts an [`AsyncReporter`].
pub struct AsyncReporterBuilder {
    sender: Arc<dyn SenderBoxed>,
    config: ReporterConfig,
    metrics: Arc<dyn ReporterMetrics>,
}

impl AsyncReporterBuilder {
    fn new(sender: Arc<dyn SenderBoxed>) -> Self {
        Self {
            sender,
            config: ReporterConfig::default(),
            metrics: Arc::new(NoopMetrics),
        }
    }

    /// Replaces the whole configuration.
    pub fn config(mut self, config: ReporterConfig) -> Self {
        self.config = config;
        self
    }

    pub fn metrics(mut self, metrics: Arc<dyn ReporterMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn message_max_bytes(mut self, bytes: usize) -> Self {
        self.config = self.config.with_message_max_bytes(bytes);
        self
    }

    pub fn message_max_count(mut self, count: usize) -> Self {
        self.config = self.config.with_message_max_count(count);
        self
    }

    pub fn queued_max_count(mut self, count: usize) -> Self {
        self.config = self.config.with_queued_max_count(count);
        self
    }

    pub fn queued_max_bytes(mut self, bytes: usize) -> Self {
        self.config = self.config.with_queued_max_bytes(bytes);
        self
    }

    /// `Duration::ZERO` disables the timer.
    pub fn message_timeout(mut self, timeout: Duration) -> Self {
        self.config = self.config.with_message_timeout(timeout);
        self
    }

    pub fn close_timeout(mut self, timeout: Duration) -> Self {
        self.config = self.config.with_close_timeout(timeout);
        self
    }

    pub fn flush_threshold_bytes(mut self, bytes: usize) -> Self {
        self.config = self.config.with_flush_threshold_bytes(bytes);
        self
    }

    pub fn verify_on_start(mut self, verify: bool) -> Self {
        self.config = self.config.with_verify_on_start(verify);
        self
    }

    /// Starts a reporter that encodes spans as JSON.
    pub async fn start(self) -> Result<AsyncReporter<JsonEncoder>, ReporterError> {
        self.start_with(JsonEncoder).await
    }

    /// Validates the configuration, optionally checks the sender, and
    /// spawns the flusher on the current tokio runtime.
    pub async fn start_with<E: Encoder>(
        self,
        encoder: E,
    ) -> Result<AsyncReporter<E>, ReporterError> {
        let encoding = self.sender.encoding();
        if encoder.encoding() != encoding {
            return Err(ConfigError::EncodingMismatch {
                encoder: encoder.encoding(),
                sender: encoding,
            }
            .into());
        }

        let resolved = self
            .config
            .resolve(encoding, self.sender.message_max_bytes())?;
        let assembler = BatchAssembler::new(encoding, resolved.limits)?;

        if self.config.verify_on_start {
            self.sender
                .check_boxed()
                .await
                .map_err(ReporterError::Check)?;
        }

        let queue = Arc::new(BoundedQueue::new(
            resolved.queued_max_count,
            resolved.queued_max_bytes,
        ));
        let state = Arc::new(StateCell::new());
        let wake = Arc::new(Notify::new());
        let (shutdown, shutdown_rx) = oneshot::channel();
        let (requests, requests_rx) = mpsc::channel(FLUSH_REQUEST_CAPACITY);
        let max_record_bytes = assembler.max_record_bytes();

        let handle = Flusher {
            queue: Arc::clone(&queue),
            assembler,
            sender: Arc::clone(&self.sender),
            metrics: Arc::clone(&self.metrics),
            state: Arc::clone(&state),
            wake: Arc::clone(&wake),
            message_timeout: resolved.message_timeout,
        }
        .spawn(shutdown_rx, requests_rx);

        info!(
            sender = self.sender.name(),
            ?encoding,
            message_max_bytes = resolved.limits.message_max_bytes,
            queued_max_count = resolved.queued_max_count,
            queued_max_bytes = resolved.queued_max_bytes,
            message_timeout = ?resolved.message_timeout,
            "span reporter started"
        );

        Ok(AsyncReporter {
            queue,
            encoder,
            encoding,
            sender: self.sender,
            metrics: self.metrics,
            state,
            wake,
            requests,
            running: Mutex::new(Some(Running { shutdown, handle })),
            max_record_bytes,
            flush_threshold_bytes: resolved.flush_threshold_bytes,
            flush_threshold_count: resolved.flush_threshold_count,
            close_timeout: resolved.close_timeout,
            closed: AtomicBool::new(false),
        })
    }
}

/// Buffers encoded spans and delivers them in batches from a background task.
///
/// `report` is safe to call from any number of tasks or threads through a
/// shared reference (`Arc<AsyncReporter>`). Spans from one caller are sent
/// in the order that caller reported them.
pub struct AsyncReporter<E = JsonEncoder> {
    queue: Arc<BoundedQueue>,
    encoder: E,
    encoding: Encoding,
    sender: Arc<dyn SenderBoxed>,
    metrics: Arc<dyn ReporterMetrics>,
    state: Arc<StateCell>,
    wake: Arc<Notify>,
    requests: mpsc::Sender<FlushReply>,
    running: Mutex<Option<Running>>,
    max_record_bytes: usize,
    flush_threshold_bytes: usize,
    flush_threshold_count: usize,
    close_timeout: Duration,
    closed: AtomicBool,
}

impl AsyncReporter<JsonEncoder> {
    pub fn builder(sender: Arc<dyn SenderBoxed>) -> AsyncReporterBuilder {
        AsyncReporterBuilder::new(sender)
    }
}

impl<E> AsyncReporter<E> {
    /// Encodes `span` and queues it for delivery.
    ///
    /// Never blocks. A rejected span has already been counted as dropped.
    pub fn report<S: ?Sized>(&self, span: &S) -> Result<(), ReportError>
    where
        E: Encode<S>,
    {
        let record = self.encoder.encode(span).map_err(|e| {
            self.metrics.increment_records_dropped(1);
            ReportError::from(e)
        })?;
        self.report_record(record)
    }

    /// Queues an already-encoded span.
    pub fn report_record(&self, record: Record) -> Result<(), ReportError> {
        if self.closed.load(Ordering::Acquire) {
            self.metrics.increment_records_dropped(1);
            return Err(ReportError::Closed);
        }

        let size = record.len();
        if size > self.max_record_bytes {
            self.metrics.increment_records_dropped(1);
            debug!(size, max = self.max_record_bytes, "dropping oversized span");
            return Err(ReportError::OversizedRecord {
                size,
                max: self.max_record_bytes,
            });
        }

        match self.queue.offer(record) {
            Ok(occupancy) => {
                self.metrics.increment_records_queued(1);
                self.metrics.increment_record_bytes(size as u64);
                self.update_gauges(occupancy);
                if occupancy.bytes >= self.flush_threshold_bytes
                    || occupancy.records >= self.flush_threshold_count
                {
                    self.wake.notify_one();
                }
                Ok(())
            }
            Err(_rejected) => {
                self.metrics.increment_records_dropped(1);
                if self.queue.is_closed() {
                    Err(ReportError::Closed)
                } else {
                    // Full queue: make sure a drain is on its way
                    self.wake.notify_one();
                    Err(ReportError::CapacityExceeded)
                }
            }
        }
    }

    /// Sends everything queued so far and waits for the outcome.
    pub async fn flush(&self) -> Result<FlushSummary, ReporterError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ReporterError::Closed);
        }
        let (reply, summary) = oneshot::channel();
        self.requests
            .send(reply)
            .await
            .map_err(|_| self.flusher_unavailable())?;
        summary.await.map_err(|_| self.flusher_unavailable())
    }

    fn flusher_unavailable(&self) -> ReporterError {
        if self.state.load().is_closing() {
            ReporterError::Closed
        } else {
            ReporterError::FlusherGone
        }
    }

    /// Runs the sender's health check.
    pub async fn check(&self) -> Result<(), ReporterError> {
        self.sender
            .check_boxed()
            .await
            .map_err(ReporterError::Check)
    }

    /// Stops accepting spans, sends what is queued, and releases the sender.
    ///
    /// Waits at most `close_timeout`. Only the first call does any work;
    /// later calls return `Ok(())`.
    pub async fn close(&self) -> Result<(), ReporterError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.queue.close();
        self.state.request_close();

        let running = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(Running {
            shutdown,
            mut handle,
        }) = running
        else {
            return Ok(());
        };
        let _ = shutdown.send(());

        match timeout(self.close_timeout, &mut handle).await {
            Ok(Ok(Ok(()))) => {
                info!(sender = self.sender.name(), "span reporter closed");
                Ok(())
            }
            Ok(Ok(Err(e))) => Err(ReporterError::Close(e)),
            Ok(Err(join_error)) => {
                warn!(error = %join_error, "flusher task failed");
                self.discard_queued();
                if let Err(e) = self.release_sender().await {
                    warn!(sender = self.sender.name(), error = %e, "sender close failed");
                }
                self.state.mark_closed();
                Err(ReporterError::FlusherGone)
            }
            Err(_elapsed) => {
                handle.abort();
                // The message stuck in the sender is abandoned with the queue
                let in_flight = self.state.take_in_flight();
                self.metrics.increment_records_dropped(in_flight as u64);
                let dropped = self.discard_queued() + in_flight;
                warn!(
                    dropped,
                    timeout = ?self.close_timeout,
                    "timed out waiting for final flush"
                );
                let released = self.release_sender().await;
                self.state.mark_closed();
                match released {
                    Ok(()) => Err(ReporterError::CloseTimedOut { dropped }),
                    Err(e) => Err(ReporterError::Close(e)),
                }
            }
        }
    }

    /// Closes the sender unless the flusher got that far before it stopped.
    ///
    /// Bounded by `close_timeout`; a sender that never returns is left as is.
    async fn release_sender(&self) -> Result<(), SendError> {
        if !self.state.claim_release() {
            return Ok(());
        }
        match timeout(self.close_timeout, self.sender.close_boxed()).await {
            Ok(result) => result,
            Err(_elapsed) => {
                warn!(sender = self.sender.name(), "timed out closing sender");
                Ok(())
            }
        }
    }

    fn discard_queued(&self) -> usize {
        let dropped = self.queue.clear();
        self.metrics.increment_records_dropped(dropped as u64);
        self.update_gauges(Occupancy::default());
        dropped
    }

    fn update_gauges(&self, occupancy: Occupancy) {
        self.metrics.update_queued_records(occupancy.records as u64);
        self.metrics.update_queued_bytes(occupancy.bytes as u64);
    }

    pub fn flusher_state(&self) -> FlusherState {
        self.state.load()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Spans currently waiting in the queue.
    pub fn queued_records(&self) -> usize {
        self.queue.len()
    }

    /// Encoded bytes currently waiting in the queue.
    pub fn queued_bytes(&self) -> usize {
        self.queue.byte_size()
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// Largest encoded span `report` accepts.
    pub fn max_record_bytes(&self) -> usize {
        self.max_record_bytes
    }

    pub fn metrics(&self) -> &Arc<dyn ReporterMetrics> {
        &self.metrics
    }
}

impl<E> Drop for AsyncReporter<E> {
    fn drop(&mut self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        // Best effort: the flusher sends what it can and releases the sender
        // in the background.
        self.queue.close();
        let running = self
            .running
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(running) = running {
            let _ = running.shutdown.send(());
        }
    }
}
