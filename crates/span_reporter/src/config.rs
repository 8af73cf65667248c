//! Configuration for reporter behavior.

use crate::batch::BatchLimits;
use crate::encoding::Encoding;
use crate::error::ConfigError;
use std::time::Duration;

/// Upper bound applied to `message_max_bytes` when it is left unset (500 KiB).
pub const DEFAULT_MESSAGE_MAX_BYTES: usize = 500 * 1024;

/// Default queue capacity in records.
pub const DEFAULT_QUEUED_MAX_COUNT: usize = 10_000;

/// Assumed average encoded span size used to derive `queued_max_bytes`.
pub const DEFAULT_AVERAGE_RECORD_BYTES: usize = 1024;

/// Configuration for an [`AsyncReporter`](crate::AsyncReporter).
///
/// `None` fields are resolved against the sender at start-up, see
/// [`ReporterConfig::resolve`].
#[derive(Debug, Clone)]
pub struct ReporterConfig {
    /// Maximum framed size of one message.
    ///
    /// Default: the sender's limit, capped at 500 KiB
    pub message_max_bytes: Option<usize>,

    /// Maximum spans per message.
    ///
    /// Default: unlimited
    pub message_max_count: usize,

    /// Maximum spans held in the queue.
    ///
    /// Default: 10 000
    pub queued_max_count: usize,

    /// Maximum encoded bytes held in the queue.
    ///
    /// Default: `queued_max_count` x 1 KiB
    pub queued_max_bytes: Option<usize>,

    /// Longest time a queued span waits before a flush cycle runs.
    /// `Duration::ZERO` disables the timer.
    ///
    /// Default: 1s
    pub message_timeout: Duration,

    /// How long `close()` waits for the final drain and sender release.
    ///
    /// Default: 1s
    pub close_timeout: Duration,

    /// Queued bytes that wake the flusher before the timer fires.
    /// Capped at `queued_max_bytes`.
    ///
    /// Default: one full message (`message_max_bytes`)
    pub flush_threshold_bytes: Option<usize>,

    /// Run `Sender::check()` during start-up and fail if it does.
    ///
    /// Default: true
    pub verify_on_start: bool,
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self {
            message_max_bytes: None,
            message_max_count: usize::MAX,
            queued_max_count: DEFAULT_QUEUED_MAX_COUNT,
            queued_max_bytes: None,
            message_timeout: Duration::from_secs(1),
            close_timeout: Duration::from_secs(1),
            flush_threshold_bytes: None,
            verify_on_start: true,
        }
    }
}

impl ReporterConfig {
    pub fn with_message_max_bytes(mut self, bytes: usize) -> Self {
        self.message_max_bytes = Some(bytes);
        self
    }

    pub fn with_message_max_count(mut self, count: usize) -> Self {
        self.message_max_count = count;
        self
    }

    pub fn with_queued_max_count(mut self, count: usize) -> Self {
        self.queued_max_count = count;
        self
    }

    pub fn with_queued_max_bytes(mut self, bytes: usize) -> Self {
        self.queued_max_bytes = Some(bytes);
        self
    }

    pub fn with_message_timeout(mut self, timeout: Duration) -> Self {
        self.message_timeout = timeout;
        self
    }

    pub fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    pub fn with_flush_threshold_bytes(mut self, bytes: usize) -> Self {
        self.flush_threshold_bytes = Some(bytes);
        self
    }

    pub fn with_verify_on_start(mut self, verify: bool) -> Self {
        self.verify_on_start = verify;
        self
    }

    /// Fills in defaults and validates against the sender's framing and limit.
    pub fn resolve(
        &self,
        encoding: Encoding,
        sender_max_bytes: usize,
    ) -> Result<ResolvedConfig, ConfigError> {
        let message_max_bytes = match self.message_max_bytes {
            Some(requested) if requested > sender_max_bytes => {
                return Err(ConfigError::MessageTooLarge {
                    requested,
                    sender_max: sender_max_bytes,
                });
            }
            Some(requested) => requested,
            None => sender_max_bytes.min(DEFAULT_MESSAGE_MAX_BYTES),
        };
        if message_max_bytes <= encoding.framing_overhead() {
            return Err(ConfigError::MessageTooSmall {
                message_max_bytes,
                overhead: encoding.framing_overhead(),
            });
        }
        if self.message_max_count == 0 {
            return Err(ConfigError::Zero("message_max_count"));
        }
        if self.queued_max_count == 0 {
            return Err(ConfigError::Zero("queued_max_count"));
        }

        let queued_max_bytes = self.queued_max_bytes.unwrap_or_else(|| {
            self.queued_max_count
                .saturating_mul(DEFAULT_AVERAGE_RECORD_BYTES)
        });
        if queued_max_bytes == 0 {
            return Err(ConfigError::Zero("queued_max_bytes"));
        }

        // A queue smaller than one message must still wake the flusher before it fills
        let flush_threshold_bytes = self
            .flush_threshold_bytes
            .unwrap_or(message_max_bytes)
            .min(queued_max_bytes);
        if flush_threshold_bytes == 0 {
            return Err(ConfigError::Zero("flush_threshold_bytes"));
        }
        let flush_threshold_count = self.message_max_count.min(self.queued_max_count);

        Ok(ResolvedConfig {
            limits: BatchLimits::new(message_max_bytes, self.message_max_count),
            queued_max_count: self.queued_max_count,
            queued_max_bytes,
            message_timeout: self.message_timeout,
            close_timeout: self.close_timeout,
            flush_threshold_bytes,
            flush_threshold_count,
        })
    }
}

/// Validated configuration with every default filled in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConfig {
    pub limits: BatchLimits,
    pub queued_max_count: usize,
    pub queued_max_bytes: usize,
    pub message_timeout: Duration,
    pub close_timeout: Duration,
    /// Never above `queued_max_bytes`.
    pub flush_threshold_bytes: usize,
    /// A full message worth of spans, or a full queue, also wakes the flusher.
    pub flush_threshold_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_follow_sender_limit() {
        let resolved = ReporterConfig::default()
            .resolve(Encoding::Json, 64 * 1024)
            .unwrap();
        assert_eq!(resolved.limits.message_max_bytes, 64 * 1024);
        assert_eq!(resolved.queued_max_count, 10_000);
        assert_eq!(resolved.queued_max_bytes, 10_000 * 1024);
        assert_eq!(resolved.flush_threshold_bytes, 64 * 1024);
        assert_eq!(resolved.message_timeout, Duration::from_secs(1));
    }

    #[test]
    fn test_thresholds_capped_by_small_queue() {
        let resolved = ReporterConfig::default()
            .with_queued_max_count(10)
            .resolve(Encoding::Json, 64 * 1024)
            .unwrap();
        assert_eq!(resolved.flush_threshold_count, 10);
        assert_eq!(resolved.queued_max_bytes, 10 * 1024);
        assert_eq!(resolved.flush_threshold_bytes, 10 * 1024);

        let resolved = ReporterConfig::default()
            .with_queued_max_bytes(300)
            .with_flush_threshold_bytes(4096)
            .resolve(Encoding::Json, 64 * 1024)
            .unwrap();
        assert_eq!(resolved.flush_threshold_bytes, 300);
    }

    #[test]
    fn test_default_message_size_is_capped() {
        let resolved = ReporterConfig::default()
            .resolve(Encoding::Proto3, 16 * 1024 * 1024)
            .unwrap();
        assert_eq!(resolved.limits.message_max_bytes, DEFAULT_MESSAGE_MAX_BYTES);
    }

    #[test]
    fn test_builder_setters() {
        let config = ReporterConfig::default()
            .with_message_max_bytes(1000)
            .with_message_max_count(50)
            .with_queued_max_count(10)
            .with_queued_max_bytes(4096)
            .with_message_timeout(Duration::ZERO)
            .with_close_timeout(Duration::from_millis(250))
            .with_flush_threshold_bytes(512)
            .with_verify_on_start(false);

        assert!(!config.verify_on_start);
        let resolved = config.resolve(Encoding::Json, 1_000_000).unwrap();
        assert_eq!(resolved.limits, BatchLimits::new(1000, 50));
        assert_eq!(resolved.queued_max_bytes, 4096);
        assert_eq!(resolved.flush_threshold_bytes, 512);
        assert_eq!(resolved.flush_threshold_count, 10);
        assert_eq!(resolved.close_timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_rejects_message_larger_than_sender() {
        let err = ReporterConfig::default()
            .with_message_max_bytes(2048)
            .resolve(Encoding::Json, 1024)
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::MessageTooLarge {
                requested: 2048,
                sender_max: 1024
            }
        );
    }

    #[test]
    fn test_rejects_message_within_framing() {
        let err = ReporterConfig::default()
            .with_message_max_bytes(5)
            .resolve(Encoding::Thrift, 1024)
            .unwrap_err();
        assert!(matches!(err, ConfigError::MessageTooSmall { overhead: 5, .. }));
    }

    #[test]
    fn test_rejects_zero_limits() {
        let err = ReporterConfig::default()
            .with_queued_max_count(0)
            .resolve(Encoding::Json, 1024)
            .unwrap_err();
        assert_eq!(err, ConfigError::Zero("queued_max_count"));

        let err = ReporterConfig::default()
            .with_queued_max_bytes(0)
            .resolve(Encoding::Json, 1024)
            .unwrap_err();
        assert_eq!(err, ConfigError::Zero("queued_max_bytes"));
    }
}
