//! Flusher lifecycle state.
//!
//! ```text
//!   Idle ──wake/tick/flush──▶ Draining ──queue empty──▶ Idle
//!    │                           │
//!    └────────close()────────────┴──▶ Closing ──final pass──▶ Closed
//! ```
//!
//! The state lives in an `AtomicU8` so producers and `flusher_state()`
//! callers can read it without touching the flusher. Only the flusher moves
//! between `Idle` and `Draining`; `close()` may raise it to `Closing` at any
//! time, and a `Draining -> Idle` step never overwrites that.

#[cfg(debug_assertions)]
use crate::invariants::debug_assert_state_transition;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};

/// Observable phase of the background flusher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum FlusherState {
    /// Waiting for a timer tick, pressure wake or flush request.
    Idle = 0,
    /// Assembling and sending batches.
    Draining = 1,
    /// Close requested; the final pass is running or about to.
    Closing = 2,
    /// Terminal. The sender has been released.
    Closed = 3,
}

impl FlusherState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::Draining,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }

    /// `true` once close has been requested.
    #[inline]
    pub fn is_closing(self) -> bool {
        self >= Self::Closing
    }
}

#[derive(Debug)]
pub(crate) struct StateCell {
    state: AtomicU8,
    /// Records inside the message currently being sent.
    in_flight: AtomicUsize,
    /// Set by whoever calls `Sender::close`, so it runs at most once.
    released: AtomicBool,
}

impl StateCell {
    pub(crate) fn new() -> Self {
        Self {
            state: AtomicU8::new(FlusherState::Idle as u8),
            in_flight: AtomicUsize::new(0),
            released: AtomicBool::new(false),
        }
    }

    pub(crate) fn set_in_flight(&self, records: usize) {
        self.in_flight.store(records, Ordering::Release);
    }

    /// Claims the in-flight count, e.g. when an abandoned send is aborted.
    pub(crate) fn take_in_flight(&self) -> usize {
        self.in_flight.swap(0, Ordering::AcqRel)
    }

    /// `true` for the first caller only; that caller must close the sender.
    pub(crate) fn claim_release(&self) -> bool {
        !self.released.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn load(&self) -> FlusherState {
        FlusherState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn transition(&self, from: FlusherState, to: FlusherState) -> bool {
        #[cfg(debug_assertions)]
        debug_assert_state_transition!(from, to);
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Idle -> Draining. Fails if a close was requested.
    pub(crate) fn begin_drain(&self) -> bool {
        self.transition(FlusherState::Idle, FlusherState::Draining)
    }

    /// Draining -> Idle. Leaves `Closing` in place if close raced the cycle.
    pub(crate) fn end_drain(&self) {
        self.transition(FlusherState::Draining, FlusherState::Idle);
    }

    /// Raises the state to at least `Closing` and returns the previous one.
    pub(crate) fn request_close(&self) -> FlusherState {
        FlusherState::from_u8(
            self.state
                .fetch_max(FlusherState::Closing as u8, Ordering::AcqRel),
        )
    }

    pub(crate) fn mark_closed(&self) {
        let previous = self
            .state
            .swap(FlusherState::Closed as u8, Ordering::AcqRel);
        #[cfg(debug_assertions)]
        debug_assert_state_transition!(FlusherState::from_u8(previous), FlusherState::Closed);
        #[cfg(not(debug_assertions))]
        let _ = previous;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_cycle() {
        let cell = StateCell::new();
        assert_eq!(cell.load(), FlusherState::Idle);
        assert!(cell.begin_drain());
        assert_eq!(cell.load(), FlusherState::Draining);
        cell.end_drain();
        assert_eq!(cell.load(), FlusherState::Idle);
    }

    #[test]
    fn test_close_during_drain_is_not_overwritten() {
        let cell = StateCell::new();
        assert!(cell.begin_drain());
        assert_eq!(cell.request_close(), FlusherState::Draining);

        cell.end_drain();
        assert_eq!(cell.load(), FlusherState::Closing);
        assert!(!cell.begin_drain());
    }

    #[test]
    fn test_in_flight_is_taken_once() {
        let cell = StateCell::new();
        cell.set_in_flight(3);
        assert_eq!(cell.take_in_flight(), 3);
        assert_eq!(cell.take_in_flight(), 0);
    }

    #[test]
    fn test_release_claimed_once() {
        let cell = StateCell::new();
        assert!(cell.claim_release());
        assert!(!cell.claim_release());
    }

    #[test]
    fn test_request_close_is_monotonic() {
        let cell = StateCell::new();
        cell.request_close();
        cell.mark_closed();
        cell.mark_closed();
        assert_eq!(cell.request_close(), FlusherState::Closed);
        assert_eq!(cell.load(), FlusherState::Closed);
        assert!(cell.load().is_closing());
    }
}
