//! Property-based tests for the queue bounds and batch size limits.
//!
//! Each test drives the real types with random operation sequences and
//! checks them against a trivial model.

use proptest::prelude::*;
use span_reporter::{BatchAssembler, BatchLimits, BoundedQueue, Encoding, Record};
use std::collections::VecDeque;

#[derive(Debug, Clone)]
enum Op {
    Offer(usize),
    Drain { max_bytes: usize, max_count: usize },
    Clear,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        6 => (0usize..200).prop_map(Op::Offer),
        3 => (0usize..600, 0usize..8).prop_map(|(max_bytes, max_count)| Op::Drain { max_bytes, max_count }),
        1 => Just(Op::Clear),
    ]
}

fn encoding() -> impl Strategy<Value = Encoding> {
    prop_oneof![
        Just(Encoding::Json),
        Just(Encoding::Proto3),
        Just(Encoding::Thrift),
    ]
}

/// Records tagged with their position so order can be checked after framing.
fn tagged(index: usize, len: usize) -> Record {
    let mut bytes = vec![b'.'; len.max(4)];
    bytes[..4].copy_from_slice(&(index as u32).to_be_bytes());
    Record::from(bytes)
}

fn tag_of(record: &[u8]) -> u32 {
    u32::from_be_bytes([record[0], record[1], record[2], record[3]])
}

// =============================================================================
// Queue bounds and byte accounting
// =============================================================================

proptest! {
    /// Count and bytes never exceed their limits, and every decision matches
    /// a model that just sums lengths.
    #[test]
    fn prop_queue_matches_model(
        max_count in 1usize..20,
        max_bytes in 1usize..1_000,
        ops in prop::collection::vec(op(), 1..200),
    ) {
        let queue = BoundedQueue::new(max_count, max_bytes);
        let mut model: VecDeque<usize> = VecDeque::new();

        for op in ops {
            match op {
                Op::Offer(len) => {
                    let fits = model.len() < max_count
                        && model.iter().sum::<usize>() + len <= max_bytes;
                    let accepted = queue.offer(Record::from(vec![0u8; len])).is_ok();
                    prop_assert_eq!(accepted, fits);
                    if fits {
                        model.push_back(len);
                    }
                }
                Op::Drain { max_bytes: budget, max_count: limit } => {
                    let drained = queue.drain(budget, limit);
                    let mut bytes = 0;
                    for record in &drained {
                        prop_assert_eq!(Some(record.len()), model.pop_front());
                        bytes += record.len();
                    }
                    prop_assert!(drained.len() <= limit);
                    prop_assert!(bytes <= budget);
                }
                Op::Clear => {
                    prop_assert_eq!(queue.clear(), model.len());
                    model.clear();
                }
            }

            let occupancy = queue.occupancy();
            prop_assert!(occupancy.records <= max_count);
            prop_assert!(occupancy.bytes <= max_bytes);
            prop_assert_eq!(occupancy.records, model.len());
            prop_assert_eq!(occupancy.bytes, model.iter().sum::<usize>());
        }
    }
}

// =============================================================================
// Batch limits and order
// =============================================================================

proptest! {
    /// Every assembled message fits its limits, its payload length is the
    /// framed size, and records come out in queue order with only oversized
    /// ones missing.
    #[test]
    fn prop_batches_respect_limits(
        encoding in encoding(),
        message_max_bytes in 16usize..1_500,
        message_max_count in 1usize..12,
        lengths in prop::collection::vec(4usize..800, 0..60),
    ) {
        let limits = BatchLimits::new(message_max_bytes, message_max_count);
        let assembler = BatchAssembler::new(encoding, limits).unwrap();
        let queue = BoundedQueue::new(lengths.len().max(1), usize::MAX);
        for (i, len) in lengths.iter().enumerate() {
            queue.offer(tagged(i, *len)).unwrap();
        }

        let mut delivered = Vec::new();
        let mut oversized = 0;
        loop {
            let assembled = assembler.next_batch(&queue);
            oversized += assembled.oversized;
            let Some(batch) = assembled.batch else { break };

            prop_assert!(batch.record_count() >= 1);
            prop_assert!(batch.record_count() <= message_max_count);
            prop_assert!(batch.byte_size() <= message_max_bytes);

            // Walk the framing to recover the tags in order
            let payload = batch.payload();
            let mut offset = match encoding {
                Encoding::Json => 1,
                Encoding::Proto3 => 0,
                Encoding::Thrift => 5,
            };
            let members: Vec<usize> = lengths
                .iter()
                .enumerate()
                .filter(|(i, _)| !delivered.contains(i))
                .filter(|(_, len)| **len <= assembler.max_record_bytes())
                .map(|(i, _)| i)
                .take(batch.record_count())
                .collect();
            let framed: Vec<usize> = members.iter().map(|i| lengths[*i]).collect();
            prop_assert_eq!(batch.byte_size(), encoding.list_size_in_bytes(framed.iter().copied()));
            for i in members {
                prop_assert_eq!(tag_of(&payload[offset..]) as usize, i);
                offset += lengths[i] + encoding.separator_bytes();
                delivered.push(i);
            }
        }

        let expected_oversized = lengths
            .iter()
            .filter(|len| **len > assembler.max_record_bytes())
            .count();
        prop_assert_eq!(oversized, expected_oversized);
        prop_assert_eq!(delivered.len() + oversized, lengths.len());
        prop_assert!(queue.is_empty());
    }
}
