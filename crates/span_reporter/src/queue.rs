//! Bounded, byte-accounted FIFO of encoded spans.
//!
//! Producers call [`BoundedQueue::offer`] from any thread; the flusher
//! removes contiguous prefixes with [`BoundedQueue::drain_with`]. The item
//! buffer, the record count and the byte total live behind one mutex, so
//! the accept test and its effect are a single critical section and no
//! caller can observe a state that violates the bounds.
//!
//! Producers never wait for space: a full queue rejects the record
//! immediately and hands it back. A closed queue rejects every offer, which
//! lets shutdown drain a set of records that can no longer grow.

#[cfg(debug_assertions)]
use crate::invariants::{debug_assert_bytes_accounted, debug_assert_queue_bounded};
use crate::record::Record;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Queue occupancy at a point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Occupancy {
    pub records: usize,
    pub bytes: usize,
}

/// Decision made for the record at the head of the queue while draining.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admit {
    /// Remove the record and hand it to the caller.
    Take,
    /// Remove the record and throw it away.
    Discard,
    /// Leave this record and everything behind it in place.
    Stop,
}

/// Result of one [`BoundedQueue::drain_with`] call.
#[derive(Debug, Default)]
pub struct Drained {
    /// Removed records, in queue order.
    pub records: Vec<Record>,
    /// Records removed with [`Admit::Discard`].
    pub discarded: usize,
    /// What is left after the drain.
    pub remaining: Occupancy,
}

#[derive(Debug, Default)]
struct QueueState {
    items: VecDeque<Record>,
    total_bytes: usize,
    closed: bool,
}

impl QueueState {
    fn occupancy(&self) -> Occupancy {
        Occupancy {
            records: self.items.len(),
            bytes: self.total_bytes,
        }
    }
}

/// FIFO buffer bounded by both record count and total encoded bytes.
#[derive(Debug)]
pub struct BoundedQueue {
    state: Mutex<QueueState>,
    max_count: usize,
    max_bytes: usize,
}

impl BoundedQueue {
    /// Creates an empty queue. Both limits are inclusive.
    pub fn new(max_count: usize, max_bytes: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::with_capacity(max_count.min(1024)),
                total_bytes: 0,
                closed: false,
            }),
            max_count,
            max_bytes,
        }
    }

    // A panic while holding the lock cannot leave the state half-updated:
    // every mutation below completes before anything that can panic.
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends `record` if both limits still hold afterwards.
    ///
    /// Returns the occupancy after the append, or gives the record back
    /// untouched when the queue is full or closed.
    pub fn offer(&self, record: Record) -> Result<Occupancy, Record> {
        let len = record.len();
        let mut state = self.lock();

        if state.closed
            || state.items.len() >= self.max_count
            || state.total_bytes + len > self.max_bytes
        {
            return Err(record);
        }

        state.items.push_back(record);
        state.total_bytes += len;

        #[cfg(debug_assertions)]
        debug_assert_queue_bounded!(
            state.items.len(),
            self.max_count,
            state.total_bytes,
            self.max_bytes
        );

        Ok(state.occupancy())
    }

    /// Removes a prefix, asking `admit` about each head record in turn.
    ///
    /// Returns as soon as `admit` says [`Admit::Stop`] or the queue runs
    /// empty. Never waits for records to arrive.
    pub fn drain_with<F>(&self, mut admit: F) -> Drained
    where
        F: FnMut(&Record) -> Admit,
    {
        let mut drained = Drained::default();
        let mut state = self.lock();

        while let Some(head) = state.items.front() {
            match admit(head) {
                Admit::Stop => break,
                decision => {
                    let Some(record) = state.items.pop_front() else {
                        break;
                    };
                    state.total_bytes -= record.len();
                    if decision == Admit::Take {
                        drained.records.push(record);
                    } else {
                        drained.discarded += 1;
                    }
                }
            }
        }

        #[cfg(debug_assertions)]
        debug_assert_queue_bounded!(
            state.items.len(),
            self.max_count,
            state.total_bytes,
            self.max_bytes
        );

        drained.remaining = state.occupancy();
        drained
    }

    /// Removes a prefix of at most `max_count` records whose raw lengths sum
    /// to at most `max_bytes`.
    pub fn drain(&self, max_bytes: usize, max_count: usize) -> Vec<Record> {
        let mut bytes = 0usize;
        let mut count = 0usize;
        self.drain_with(|record| {
            if count == max_count || bytes + record.len() > max_bytes {
                return Admit::Stop;
            }
            bytes += record.len();
            count += 1;
            Admit::Take
        })
        .records
    }

    /// Removes everything, returning how many records were thrown away.
    pub fn clear(&self) -> usize {
        let mut state = self.lock();
        let count = state.items.len();
        state.items.clear();
        state.total_bytes = 0;
        count
    }

    /// Rejects all further offers. Queued records stay until drained.
    pub fn close(&self) {
        self.lock().closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Number of queued records.
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    /// Sum of the encoded sizes of queued records.
    pub fn byte_size(&self) -> usize {
        self.lock().total_bytes
    }

    /// Count and bytes read under one lock acquisition.
    pub fn occupancy(&self) -> Occupancy {
        let state = self.lock();
        #[cfg(debug_assertions)]
        debug_assert_bytes_accounted!(state.items, state.total_bytes);
        state.occupancy()
    }

    pub fn max_count(&self) -> usize {
        self.max_count
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn record(len: usize) -> Record {
        Record::from(vec![b'x'; len])
    }

    #[test]
    fn test_offer_respects_count_limit() {
        let queue = BoundedQueue::new(10, 1_000_000);
        let accepted = (0..15).filter(|_| queue.offer(record(20)).is_ok()).count();

        assert_eq!(accepted, 10);
        assert_eq!(queue.len(), 10);
        assert_eq!(queue.byte_size(), 200);
    }

    #[test]
    fn test_offer_respects_byte_limit() {
        let queue = BoundedQueue::new(100, 50);
        assert!(queue.offer(record(30)).is_ok());
        assert!(queue.offer(record(20)).is_ok());

        // Exactly at the limit; one more byte must be rejected
        let rejected = queue.offer(record(1)).unwrap_err();
        assert_eq!(rejected.len(), 1);
        assert_eq!(queue.occupancy(), Occupancy { records: 2, bytes: 50 });
    }

    #[test]
    fn test_rejected_offer_leaves_queue_unchanged() {
        let queue = BoundedQueue::new(2, 100);
        queue.offer(record(10)).unwrap();
        let before = queue.occupancy();

        assert!(queue.offer(record(200)).is_err());
        assert_eq!(queue.occupancy(), before);
    }

    #[test]
    fn test_offer_reports_occupancy() {
        let queue = BoundedQueue::new(10, 1000);
        let occupancy = queue.offer(record(7)).unwrap();
        assert_eq!(occupancy, Occupancy { records: 1, bytes: 7 });
        let occupancy = queue.offer(record(3)).unwrap();
        assert_eq!(occupancy, Occupancy { records: 2, bytes: 10 });
    }

    #[test]
    fn test_drain_preserves_fifo_order() {
        let queue = BoundedQueue::new(10, 1000);
        for i in 0..5u8 {
            queue.offer(Record::from(vec![i])).unwrap();
        }

        let first = queue.drain(1000, 3);
        assert_eq!(
            first.iter().map(|r| r.as_bytes()[0]).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );

        let rest = queue.drain(1000, 10);
        assert_eq!(
            rest.iter().map(|r| r.as_bytes()[0]).collect::<Vec<_>>(),
            vec![3, 4]
        );
        assert!(queue.is_empty());
    }

    #[test]
    fn test_drain_respects_byte_budget() {
        let queue = BoundedQueue::new(10, 10_000);
        for _ in 0..10 {
            queue.offer(record(300)).unwrap();
        }

        let drained = queue.drain(1000, usize::MAX);
        assert_eq!(drained.len(), 3);
        assert_eq!(queue.len(), 7);
        assert_eq!(queue.byte_size(), 2100);
    }

    #[test]
    fn test_drain_empty_queue_returns_immediately() {
        let queue = BoundedQueue::new(10, 100);
        assert!(queue.drain(100, 10).is_empty());
    }

    #[test]
    fn test_drain_with_discard() {
        let queue = BoundedQueue::new(10, 10_000);
        queue.offer(record(500)).unwrap();
        queue.offer(record(10)).unwrap();

        let drained = queue.drain_with(|r| {
            if r.len() > 100 {
                Admit::Discard
            } else {
                Admit::Take
            }
        });
        assert_eq!(drained.discarded, 1);
        assert_eq!(drained.records.len(), 1);
        assert_eq!(drained.remaining, Occupancy::default());
    }

    #[test]
    fn test_clear() {
        let queue = BoundedQueue::new(10, 1000);
        for _ in 0..4 {
            queue.offer(record(10)).unwrap();
        }
        assert_eq!(queue.clear(), 4);
        assert_eq!(queue.occupancy(), Occupancy::default());
        assert_eq!(queue.clear(), 0);
    }

    #[test]
    fn test_closed_queue_rejects_offers_but_drains() {
        let queue = BoundedQueue::new(10, 1000);
        queue.offer(record(10)).unwrap();
        queue.close();

        assert!(queue.is_closed());
        assert!(queue.offer(record(10)).is_err());
        assert_eq!(queue.drain(1000, 10).len(), 1);
    }

    #[test]
    fn test_concurrent_offers_never_exceed_bounds() {
        let queue = Arc::new(BoundedQueue::new(1000, 20_000));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    (0..500)
                        .filter(|i| queue.offer(record(10 + i % 40)).is_ok())
                        .count()
                })
            })
            .collect();

        let accepted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        let occupancy = queue.occupancy();

        assert_eq!(occupancy.records, accepted);
        assert!(occupancy.records <= 1000);
        assert!(occupancy.bytes <= 20_000);
    }
}
