//! Background flusher task.
//!
//! The flusher is the only caller of [`Sender::send`](crate::Sender::send).
//! It sleeps until one of four things happens:
//!
//! 1. the reporter signals shutdown (or is dropped),
//! 2. an explicit `flush()` request arrives,
//! 3. a producer crosses the flush threshold and wakes it,
//! 4. the `message_timeout` interval ticks.
//!
//! Cases 2-4 run a drain cycle: assemble a batch from the head of the queue,
//! send it, account the outcome, and repeat while data remains. Case 1 runs
//! the final pass and releases the sender.

use crate::batch::{Batch, BatchAssembler};
use crate::metrics::ReporterMetrics;
use crate::queue::{BoundedQueue, Occupancy};
use crate::sender::{SendError, SenderBoxed};
use crate::state::{FlusherState, StateCell};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, warn};

/// Ack channel for one explicit flush request.
pub(crate) type FlushReply = oneshot::Sender<FlushSummary>;

/// What one flush cycle delivered and dropped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushSummary {
    /// Messages the sender accepted.
    pub messages_sent: u64,
    /// Messages that failed to send and were discarded.
    pub messages_dropped: u64,
    /// Spans inside accepted messages.
    pub records_sent: u64,
    /// Spans inside failed messages, plus oversized and leftover spans.
    pub records_dropped: u64,
}

impl FlushSummary {
    /// `true` if nothing was sent or dropped.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Everything the flusher task owns or shares with the reporter.
pub(crate) struct Flusher {
    pub(crate) queue: Arc<BoundedQueue>,
    pub(crate) assembler: BatchAssembler,
    pub(crate) sender: Arc<dyn SenderBoxed>,
    pub(crate) metrics: Arc<dyn ReporterMetrics>,
    pub(crate) state: Arc<StateCell>,
    pub(crate) wake: Arc<Notify>,
    pub(crate) message_timeout: Duration,
}

impl Flusher {
    /// Spawns the flusher on the current tokio runtime.
    ///
    /// The task resolves to the sender's close result.
    pub(crate) fn spawn(
        self,
        shutdown: oneshot::Receiver<()>,
        requests: mpsc::Receiver<FlushReply>,
    ) -> JoinHandle<Result<(), SendError>> {
        tokio::spawn(self.run(shutdown, requests))
    }

    async fn run(
        self,
        mut shutdown: oneshot::Receiver<()>,
        mut requests: mpsc::Receiver<FlushReply>,
    ) -> Result<(), SendError> {
        let mut ticker = self.ticker();

        loop {
            tokio::select! {
                biased;

                // Err means the reporter was dropped without close()
                _ = &mut shutdown => break,

                Some(reply) = requests.recv() => {
                    let summary = self.drain_cycle().await;
                    let _ = reply.send(summary);
                }

                () = self.wake.notified() => {
                    self.drain_cycle().await;
                }

                () = tick(&mut ticker) => {
                    self.drain_cycle().await;
                }
            }
        }

        self.finish(requests).await
    }

    fn ticker(&self) -> Option<Interval> {
        if self.message_timeout.is_zero() {
            return None;
        }
        let mut ticker = interval_at(
            Instant::now() + self.message_timeout,
            self.message_timeout,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Some(ticker)
    }

    /// Sends batches until the queue is empty or close is requested.
    async fn drain_cycle(&self) -> FlushSummary {
        let mut summary = FlushSummary::default();
        if !self.state.begin_drain() {
            return summary;
        }

        loop {
            let assembled = self.assembler.next_batch(&self.queue);
            self.drop_oversized(assembled.oversized, &mut summary);
            self.update_gauges(assembled.remaining);

            let Some(batch) = assembled.batch else {
                break;
            };
            self.send(batch, &mut summary).await;

            if assembled.remaining.records == 0 || self.state.load().is_closing() {
                break;
            }
        }

        self.state.end_drain();
        if !summary.is_empty() {
            debug!(
                messages_sent = summary.messages_sent,
                messages_dropped = summary.messages_dropped,
                records_sent = summary.records_sent,
                "flush cycle complete"
            );
        }
        summary
    }

    /// The single final pass, then sender release.
    async fn finish(&self, mut requests: mpsc::Receiver<FlushReply>) -> Result<(), SendError> {
        if self.state.request_close() < FlusherState::Closing {
            debug!("reporter dropped without close, flushing");
        }

        let mut summary = FlushSummary::default();
        loop {
            let assembled = self.assembler.next_batch(&self.queue);
            self.drop_oversized(assembled.oversized, &mut summary);
            let Some(batch) = assembled.batch else {
                break;
            };
            if !self.send(batch, &mut summary).await {
                break;
            }
        }

        let leftover = self.queue.clear();
        if leftover > 0 {
            warn!(records = leftover, "discarding records left after final flush");
            self.metrics.increment_records_dropped(leftover as u64);
            summary.records_dropped += leftover as u64;
        }
        self.update_gauges(Occupancy::default());

        // Anyone still waiting on flush() sees the final pass
        requests.close();
        while let Ok(reply) = requests.try_recv() {
            let _ = reply.send(summary);
        }

        let result = if self.state.claim_release() {
            self.sender.close_boxed().await
        } else {
            Ok(())
        };
        self.state.mark_closed();
        match &result {
            Ok(()) => debug!(
                sender = self.sender.name(),
                messages_sent = summary.messages_sent,
                records_dropped = summary.records_dropped,
                "flusher closed"
            ),
            Err(e) => warn!(sender = self.sender.name(), error = %e, "sender close failed"),
        }
        result
    }

    /// Returns `true` if the sender accepted the batch.
    async fn send(&self, batch: Batch, summary: &mut FlushSummary) -> bool {
        let records = batch.record_count() as u64;
        let bytes = batch.byte_size() as u64;

        self.state.set_in_flight(batch.record_count());
        let result = self.sender.send_boxed(batch).await;
        self.state.set_in_flight(0);

        match result {
            Ok(()) => {
                self.metrics.increment_messages_sent(1);
                self.metrics.increment_message_bytes(bytes);
                summary.messages_sent += 1;
                summary.records_sent += records;
                true
            }
            Err(e) => {
                warn!(
                    sender = self.sender.name(),
                    records,
                    bytes,
                    error = %e,
                    "dropping message after send failure"
                );
                self.metrics.increment_messages_dropped(&e);
                self.metrics.increment_records_dropped(records);
                summary.messages_dropped += 1;
                summary.records_dropped += records;
                false
            }
        }
    }

    fn drop_oversized(&self, oversized: usize, summary: &mut FlushSummary) {
        if oversized == 0 {
            return;
        }
        warn!(
            records = oversized,
            max_bytes = self.assembler.max_record_bytes(),
            "discarding records too large for any message"
        );
        self.metrics.increment_records_dropped(oversized as u64);
        summary.records_dropped += oversized as u64;
    }

    fn update_gauges(&self, occupancy: Occupancy) {
        self.metrics.update_queued_records(occupancy.records as u64);
        self.metrics.update_queued_bytes(occupancy.bytes as u64);
    }
}

/// Waits for the next tick, or forever when the timer is disabled.
async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}
