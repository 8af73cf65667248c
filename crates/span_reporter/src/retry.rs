//! Retrying Sender Wrapper
//!
//! The reporter never retries a failed message itself: a failed send is
//! counted and the message is discarded. Deployments that want redelivery
//! wrap their transport in [`RetryingSender`], which keeps the retry policy
//! configurable and out of the flush loop.
//!
//! Retries happen inside one `send` call, so the flusher still sees exactly
//! one outcome per message and metrics never double count.

use crate::batch::Batch;
use crate::encoding::Encoding;
use crate::sender::{SendError, Sender};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::sleep;

// =============================================================================
// REDELIVERY POLICY
// =============================================================================

/// How often, and how patiently, one message is redelivered.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Redeliveries after the first failed send. Zero sends each message once.
    pub max_retries: u32,
    /// Pause before the first redelivery.
    pub initial_delay: Duration,
    /// Ceiling on the pause between redeliveries.
    pub max_delay: Duration,
    /// Growth of the pause from one redelivery to the next.
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// No retries at all; the wrapped sender behaves as if unwrapped.
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Pause before redelivery `retry`, counting from 1.
    fn backoff(&self, retry: u32) -> Duration {
        let growth = self
            .backoff_multiplier
            .powi(retry.saturating_sub(1) as i32);
        let nanos = self.initial_delay.as_nanos() as f64 * growth;
        if !nanos.is_finite() || nanos >= self.max_delay.as_nanos() as f64 {
            return self.max_delay;
        }
        Duration::from_nanos(nanos.max(0.0) as u64)
    }
}

/// Only transient failures are worth another attempt.
fn is_retryable(err: &SendError) -> bool {
    matches!(err, SendError::Transport(_) | SendError::Timeout)
}

// =============================================================================
// RETRYING SENDER
// =============================================================================

/// Redelivers a message whose send failed transiently, pausing longer
/// after each attempt.
///
/// # Example
///
/// ```ignore
/// let sender = RetryingSender::new(HttpSender::new(url), RetryConfig::default());
/// let reporter = AsyncReporter::builder(sender).start().await?;
/// ```
pub struct RetryingSender<S: Sender> {
    inner: S,
    config: RetryConfig,
    /// Redeliveries attempted
    total_retries: AtomicU64,
    /// Messages delivered by a redelivery
    recovered_sends: AtomicU64,
}

impl<S: Sender> RetryingSender<S> {
    pub fn new(inner: S, config: RetryConfig) -> Self {
        Self {
            inner,
            config,
            total_retries: AtomicU64::new(0),
            recovered_sends: AtomicU64::new(0),
        }
    }

    pub fn with_defaults(inner: S) -> Self {
        Self::new(inner, RetryConfig::default())
    }

    /// Redeliveries attempted so far, successful or not.
    pub fn total_retries(&self) -> u64 {
        self.total_retries.load(Ordering::Relaxed)
    }

    /// Messages that needed at least one redelivery to get through.
    pub fn recovered_sends(&self) -> u64 {
        self.recovered_sends.load(Ordering::Relaxed)
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

impl<S: Sender> Sender for RetryingSender<S> {
    fn encoding(&self) -> Encoding {
        self.inner.encoding()
    }

    fn message_max_bytes(&self) -> usize {
        self.inner.message_max_bytes()
    }

    async fn check(&self) -> Result<(), SendError> {
        self.inner.check().await
    }

    async fn send(&self, batch: Batch) -> Result<(), SendError> {
        let max_attempts = self.config.max_retries + 1; // +1 for initial attempt
        let mut last = SendError::Closed;

        for attempt in 0..max_attempts {
            if attempt > 0 {
                self.total_retries.fetch_add(1, Ordering::Relaxed);
                let pause = self.config.backoff(attempt);
                debug_assert!(
                    pause <= self.config.max_delay,
                    "backoff {:?} exceeds max_delay {:?}",
                    pause,
                    self.config.max_delay
                );
                if !pause.is_zero() {
                    sleep(pause).await;
                }
            }

            // Payload is reference counted, so the clone is cheap
            match self.inner.send(batch.clone()).await {
                Ok(()) => {
                    if attempt > 0 {
                        self.recovered_sends.fetch_add(1, Ordering::Relaxed);
                    }
                    return Ok(());
                }
                Err(e) if !is_retryable(&e) => return Err(e),
                Err(e) => {
                    tracing::debug!(
                        sender = self.inner.name(),
                        attempt,
                        error = %e,
                        "send failed, will retry"
                    );
                    last = e;
                }
            }
        }

        if max_attempts == 1 {
            return Err(last);
        }
        Err(SendError::RetriesExhausted {
            attempts: max_attempts,
            last: Box::new(last),
        })
    }

    async fn close(&self) -> Result<(), SendError> {
        self.inner.close().await
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Record;
    use std::sync::atomic::AtomicU32;

    /// Fails the first `failures` sends with a transport error.
    struct FlakySender {
        failures: u32,
        calls: AtomicU32,
        error: SendError,
    }

    impl FlakySender {
        fn new(failures: u32) -> Self {
            Self {
                failures,
                calls: AtomicU32::new(0),
                error: SendError::Transport("connection reset".into()),
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::Relaxed)
        }
    }

    impl Sender for FlakySender {
        fn encoding(&self) -> Encoding {
            Encoding::Json
        }

        fn message_max_bytes(&self) -> usize {
            1024
        }

        async fn check(&self) -> Result<(), SendError> {
            Ok(())
        }

        async fn send(&self, _batch: Batch) -> Result<(), SendError> {
            let call = self.calls.fetch_add(1, Ordering::Relaxed);
            if call < self.failures {
                Err(self.error.clone())
            } else {
                Ok(())
            }
        }

        async fn close(&self) -> Result<(), SendError> {
            Ok(())
        }

        fn name(&self) -> &str {
            "flaky"
        }
    }

    fn batch() -> Batch {
        Batch::encode(Encoding::Json, &[Record::from(b"{}".as_slice())])
    }

    fn fast_config(max_retries: u32) -> RetryConfig {
        RetryConfig::default()
            .with_max_retries(max_retries)
            .with_initial_delay(Duration::from_millis(1))
    }

    #[test]
    fn test_backoff_grows_until_capped() {
        let config = RetryConfig {
            max_retries: 5,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
        };

        let pauses: Vec<_> = (1..=5).map(|retry| config.backoff(retry)).collect();
        assert_eq!(
            pauses,
            [100, 200, 400, 800, 1000].map(Duration::from_millis).to_vec()
        );
        assert_eq!(config.backoff(200), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_counts_retries_without_delay() {
        let config = fast_config(3).with_initial_delay(Duration::ZERO);
        let sender = RetryingSender::new(FlakySender::new(2), config);

        assert!(sender.send(batch()).await.is_ok());
        assert_eq!(sender.inner().calls(), 3);
        assert_eq!(sender.total_retries(), 2);
        assert_eq!(sender.recovered_sends(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient_failures() {
        let sender = RetryingSender::new(FlakySender::new(2), fast_config(3));

        assert!(sender.send(batch()).await.is_ok());
        assert_eq!(sender.inner().calls(), 3);
        assert_eq!(sender.total_retries(), 2);
        assert_eq!(sender.recovered_sends(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausts_retries() {
        let sender = RetryingSender::new(FlakySender::new(10), fast_config(2));

        let err = sender.send(batch()).await.unwrap_err();
        assert!(matches!(err, SendError::RetriesExhausted { attempts: 3, .. }));
        assert_eq!(sender.inner().calls(), 3);
    }

    #[tokio::test]
    async fn test_rejection_is_not_retried() {
        let mut flaky = FlakySender::new(10);
        flaky.error = SendError::Rejected("payload too large".into());
        let sender = RetryingSender::new(flaky, fast_config(5));

        let err = sender.send(batch()).await.unwrap_err();
        assert!(matches!(err, SendError::Rejected(_)));
        assert_eq!(sender.inner().calls(), 1);
    }

    #[tokio::test]
    async fn test_disabled_passes_error_through() {
        let sender = RetryingSender::new(FlakySender::new(1), RetryConfig::disabled());
        let err = sender.send(batch()).await.unwrap_err();
        assert!(matches!(err, SendError::Transport(_)));
    }
}
