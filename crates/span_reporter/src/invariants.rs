//! Debug assertion macros for queue and batch invariants.
//!
//! Only active in debug builds (`#[cfg(debug_assertions)]`), so there is
//! zero overhead in release builds.

// =============================================================================
// Queue bounds
// =============================================================================

/// Assert that the queue holds no more than its configured limits.
///
/// **Invariant**: `count ≤ max_count ∧ total_bytes ≤ max_bytes`
///
/// Used in: `BoundedQueue::offer()` and every drain path
macro_rules! debug_assert_queue_bounded {
    ($count:expr, $max_count:expr, $bytes:expr, $max_bytes:expr) => {
        debug_assert!(
            $count <= $max_count && $bytes <= $max_bytes,
            "queue bound violated: {} records / {} bytes exceeds {} / {}",
            $count,
            $bytes,
            $max_count,
            $max_bytes
        )
    };
}

// =============================================================================
// Byte accounting
// =============================================================================

/// Assert that the tracked byte total equals the sum of queued record lengths.
///
/// **Invariant**: `total_bytes = Σ record.len()`
///
/// O(n), so callers only use it in tests and after bulk removals.
macro_rules! debug_assert_bytes_accounted {
    ($items:expr, $total:expr) => {
        debug_assert_eq!(
            $items.iter().map(|r: &$crate::Record| r.len()).sum::<usize>(),
            $total,
            "byte accounting drifted from queued records"
        )
    };
}

// =============================================================================
// Batch size
// =============================================================================

/// Assert that an assembled message respects the size and count budget.
///
/// **Invariant**: `0 < batch.record_count ≤ max_count ∧ batch.byte_size ≤ max_bytes`
///
/// Used in: `BatchAssembler::next_batch()`
macro_rules! debug_assert_batch_within_limits {
    ($batch:expr, $limits:expr) => {
        debug_assert!(
            $batch.record_count() > 0
                && $batch.record_count() <= $limits.message_max_count
                && $batch.byte_size() <= $limits.message_max_bytes,
            "batch of {} records / {} bytes exceeds {} / {}",
            $batch.record_count(),
            $batch.byte_size(),
            $limits.message_max_count,
            $limits.message_max_bytes
        )
    };
}

// =============================================================================
// Flusher lifecycle
// =============================================================================

/// Assert that a flusher state change moves forward or returns to idle.
///
/// **Invariant**: `Closed` is terminal; `Closing` only advances to `Closed`
///
/// Used in: `StateCell::transition()` and `StateCell::mark_closed()`
macro_rules! debug_assert_state_transition {
    ($from:expr, $to:expr) => {
        debug_assert!(
            matches!(
                ($from, $to),
                (FlusherState::Idle, FlusherState::Draining)
                    | (FlusherState::Draining, FlusherState::Idle)
                    | (FlusherState::Idle | FlusherState::Draining, FlusherState::Closing)
                    | (FlusherState::Closing | FlusherState::Closed, FlusherState::Closed)
            ),
            "invalid flusher transition: {:?} -> {:?}",
            $from,
            $to
        )
    };
}

// =============================================================================
// Re-exports for crate-internal use
// =============================================================================

pub(crate) use debug_assert_batch_within_limits;
pub(crate) use debug_assert_bytes_accounted;
pub(crate) use debug_assert_queue_bounded;
pub(crate) use debug_assert_state_transition;
