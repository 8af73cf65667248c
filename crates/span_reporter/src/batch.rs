//! Batch Assembler - Size-Bounded Message Building
//!
//! Turns a prefix of the [`BoundedQueue`] into one framed message. This is
//! pure batching logic with no concurrency of its own: no `Arc`, no atomics,
//! no sender. The flusher owns the assembler and decides when to call it.
//!
//! # Budget
//!
//! A message may not exceed `message_max_bytes` once framed with the
//! sender's [`Encoding`], nor hold more than `message_max_count` records.
//! The framing overhead is charged up front; each record then costs its own
//! length plus any list separator.
//!
//! A record that could never fit, even alone, is discarded at the head of the
//! queue instead of blocking it forever. Callers count these as dropped.

#[cfg(debug_assertions)]
use crate::invariants::debug_assert_batch_within_limits;
use crate::encoding::Encoding;
use crate::error::ConfigError;
use crate::queue::{Admit, BoundedQueue, Occupancy};
use crate::record::Record;
use bytes::Bytes;

/// Upper bounds for a single outbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchLimits {
    /// Maximum framed size of one message in bytes.
    pub message_max_bytes: usize,
    /// Maximum number of records in one message.
    pub message_max_count: usize,
}

impl BatchLimits {
    pub fn new(message_max_bytes: usize, message_max_count: usize) -> Self {
        Self {
            message_max_bytes,
            message_max_count,
        }
    }
}

/// One framed message, ready for [`Sender::send`](crate::Sender::send).
#[derive(Debug, Clone)]
pub struct Batch {
    payload: Bytes,
    record_count: usize,
}

impl Batch {
    /// Frames `records` with `encoding`.
    pub fn encode(encoding: Encoding, records: &[Record]) -> Self {
        Self {
            payload: encoding.encode_list(records),
            record_count: records.len(),
        }
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    pub fn record_count(&self) -> usize {
        self.record_count
    }

    /// Framed size in bytes.
    pub fn byte_size(&self) -> usize {
        self.payload.len()
    }
}

/// Outcome of one [`BatchAssembler::next_batch`] call.
#[derive(Debug, Default)]
pub struct Assembled {
    /// `None` when nothing batchable was queued.
    pub batch: Option<Batch>,
    /// Records removed because they can never fit in a message.
    pub oversized: usize,
    /// Queue occupancy after the drain.
    pub remaining: Occupancy,
}

/// Builds size-bounded messages from the head of a queue.
#[derive(Debug, Clone)]
pub struct BatchAssembler {
    encoding: Encoding,
    limits: BatchLimits,
}

impl BatchAssembler {
    /// Fails if a message could not hold even an empty list.
    pub fn new(encoding: Encoding, limits: BatchLimits) -> Result<Self, ConfigError> {
        if limits.message_max_count == 0 {
            return Err(ConfigError::Zero("message_max_count"));
        }
        if limits.message_max_bytes <= encoding.framing_overhead() {
            return Err(ConfigError::MessageTooSmall {
                message_max_bytes: limits.message_max_bytes,
                overhead: encoding.framing_overhead(),
            });
        }
        Ok(Self { encoding, limits })
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    pub fn limits(&self) -> BatchLimits {
        self.limits
    }

    /// Largest single record that fits in a message.
    #[inline]
    pub fn max_record_bytes(&self) -> usize {
        self.limits.message_max_bytes - self.encoding.framing_overhead()
    }

    /// Removes as many head records as fit in one message and frames them.
    ///
    /// Runs as a single drain under the queue lock, so concurrent producers
    /// only see the queue before or after the whole prefix is taken.
    pub fn next_batch(&self, queue: &BoundedQueue) -> Assembled {
        let max_record = self.max_record_bytes();
        let mut size = self.encoding.framing_overhead();
        let mut count = 0usize;

        let drained = queue.drain_with(|record| {
            if count == self.limits.message_max_count {
                return Admit::Stop;
            }
            // Only reachable by records offered straight to the queue;
            // the reporter rejects these before they are queued.
            if record.len() > max_record {
                return Admit::Discard;
            }
            let cost = self.encoding.append_cost(count, record.len());
            if size + cost > self.limits.message_max_bytes {
                return Admit::Stop;
            }
            size += cost;
            count += 1;
            Admit::Take
        });

        let batch = (!drained.records.is_empty()).then(|| {
            let batch = Batch::encode(self.encoding, &drained.records);
            #[cfg(debug_assertions)]
            debug_assert_batch_within_limits!(batch, self.limits);
            debug_assert_eq!(batch.byte_size(), size);
            batch
        });

        Assembled {
            batch,
            oversized: drained.discarded,
            remaining: drained.remaining,
        }
    }
}
