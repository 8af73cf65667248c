use crate::batch::Batch;
use crate::encoding::Encoding;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use thiserror::Error;

/// Error types for message delivery
#[derive(Debug, Error, Clone)]
pub enum SendError {
    /// Transport-layer error (network, HTTP, broker)
    #[error("transport error: {0}")]
    Transport(String),
    /// The backend refused the message
    #[error("message rejected: {0}")]
    Rejected(String),
    /// Send operation timed out
    #[error("send operation timed out")]
    Timeout,
    /// The sender has been closed
    #[error("sender is closed")]
    Closed,
    /// All retry attempts exhausted
    #[error("all retry attempts exhausted after {attempts} tries: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<SendError>,
    },
}

/// Coarse classification of a [`SendError`], used to bucket dropped messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SendErrorKind {
    Transport,
    Rejected,
    Timeout,
    Closed,
    RetriesExhausted,
}

impl SendErrorKind {
    /// Number of distinct kinds.
    pub const COUNT: usize = 5;

    pub const ALL: [SendErrorKind; Self::COUNT] = [
        Self::Transport,
        Self::Rejected,
        Self::Timeout,
        Self::Closed,
        Self::RetriesExhausted,
    ];

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

impl SendError {
    pub fn kind(&self) -> SendErrorKind {
        match self {
            Self::Transport(_) => SendErrorKind::Transport,
            Self::Rejected(_) => SendErrorKind::Rejected,
            Self::Timeout => SendErrorKind::Timeout,
            Self::Closed => SendErrorKind::Closed,
            Self::RetriesExhausted { .. } => SendErrorKind::RetriesExhausted,
        }
    }
}

/// Transport that delivers framed messages to a tracing backend.
///
/// Uses native async fn in traits instead of `#[async_trait]`.
///
/// # Note on Object Safety
///
/// This trait uses `impl Future` return types which are not object-safe.
/// The reporter stores senders as `Arc<dyn SenderBoxed>`; every `Sender`
/// gets that impl for free.
pub trait Sender: Send + Sync {
    /// Framing the backend expects.
    fn encoding(&self) -> Encoding;

    /// Largest message the transport accepts.
    fn message_max_bytes(&self) -> usize;

    /// Verifies the backend is reachable.
    fn check(&self) -> impl Future<Output = Result<(), SendError>> + Send;

    /// Delivers one message.
    fn send(&self, batch: Batch) -> impl Future<Output = Result<(), SendError>> + Send;

    /// Releases connections and other resources.
    fn close(&self) -> impl Future<Output = Result<(), SendError>> + Send;

    /// Returns the sender name for debugging.
    fn name(&self) -> &str;
}

type BoxFuture<'a> = Pin<Box<dyn Future<Output = Result<(), SendError>> + Send + 'a>>;

/// Object-safe version of `Sender` for dynamic dispatch.
pub trait SenderBoxed: Send + Sync {
    fn encoding(&self) -> Encoding;

    fn message_max_bytes(&self) -> usize;

    fn check_boxed(&self) -> BoxFuture<'_>;

    fn send_boxed(&self, batch: Batch) -> BoxFuture<'_>;

    fn close_boxed(&self) -> BoxFuture<'_>;

    fn name(&self) -> &str;
}

/// Blanket implementation: any Sender can be used as SenderBoxed
impl<T: Sender> SenderBoxed for T {
    fn encoding(&self) -> Encoding {
        Sender::encoding(self)
    }

    fn message_max_bytes(&self) -> usize {
        Sender::message_max_bytes(self)
    }

    fn check_boxed(&self) -> BoxFuture<'_> {
        Box::pin(self.check())
    }

    fn send_boxed(&self, batch: Batch) -> BoxFuture<'_> {
        Box::pin(self.send(batch))
    }

    fn close_boxed(&self) -> BoxFuture<'_> {
        Box::pin(self.close())
    }

    fn name(&self) -> &str {
        Sender::name(self)
    }
}

/// Default transport limit for the in-process senders (5 MiB).
pub const DEFAULT_SENDER_MAX_BYTES: usize = 5 * 1024 * 1024;

/// Null sender that discards all messages (for benchmarking)
#[derive(Debug)]
pub struct NullSender {
    encoding: Encoding,
    message_max_bytes: usize,
}

impl NullSender {
    pub fn new(encoding: Encoding, message_max_bytes: usize) -> Self {
        Self {
            encoding,
            message_max_bytes,
        }
    }
}

impl Default for NullSender {
    fn default() -> Self {
        Self::new(Encoding::Json, DEFAULT_SENDER_MAX_BYTES)
    }
}

impl Sender for NullSender {
    fn encoding(&self) -> Encoding {
        self.encoding
    }

    fn message_max_bytes(&self) -> usize {
        self.message_max_bytes
    }

    async fn check(&self) -> Result<(), SendError> {
        Ok(())
    }

    async fn send(&self, _batch: Batch) -> Result<(), SendError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), SendError> {
        Ok(())
    }

    fn name(&self) -> &str {
        "null"
    }
}

/// Stdout sender for debugging; prints each JSON message on its own line.
#[derive(Debug)]
pub struct StdoutSender {
    verbose: bool,
}

impl StdoutSender {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl Sender for StdoutSender {
    fn encoding(&self) -> Encoding {
        Encoding::Json
    }

    fn message_max_bytes(&self) -> usize {
        DEFAULT_SENDER_MAX_BYTES
    }

    async fn check(&self) -> Result<(), SendError> {
        Ok(())
    }

    async fn send(&self, batch: Batch) -> Result<(), SendError> {
        if self.verbose {
            println!(
                "=== message: {} spans, {} bytes ===",
                batch.record_count(),
                batch.byte_size()
            );
            println!("{}", String::from_utf8_lossy(batch.payload()));
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), SendError> {
        Ok(())
    }

    fn name(&self) -> &str {
        "stdout"
    }
}

/// Captures delivered messages in memory.
///
/// Failure switches let tests and demos exercise the reporter's error
/// accounting without a real backend.
#[derive(Debug)]
pub struct InMemorySender {
    encoding: Encoding,
    message_max_bytes: usize,
    messages: Mutex<Vec<Batch>>,
    fail_sends: AtomicBool,
    fail_check: AtomicBool,
    fail_close: AtomicBool,
    close_calls: AtomicU64,
}

impl InMemorySender {
    pub fn new(encoding: Encoding, message_max_bytes: usize) -> Self {
        Self {
            encoding,
            message_max_bytes,
            messages: Mutex::new(Vec::new()),
            fail_sends: AtomicBool::new(false),
            fail_check: AtomicBool::new(false),
            fail_close: AtomicBool::new(false),
            close_calls: AtomicU64::new(0),
        }
    }

    /// Makes every subsequent `send` fail with a transport error.
    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::Relaxed);
    }

    pub fn fail_check(&self, fail: bool) {
        self.fail_check.store(fail, Ordering::Relaxed);
    }

    pub fn fail_close(&self, fail: bool) {
        self.fail_close.store(fail, Ordering::Relaxed);
    }

    /// Messages delivered so far.
    pub fn messages(&self) -> Vec<Batch> {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn message_count(&self) -> usize {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Total spans across all delivered messages.
    pub fn record_count(&self) -> usize {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(Batch::record_count)
            .sum()
    }

    pub fn close_calls(&self) -> u64 {
        self.close_calls.load(Ordering::Relaxed)
    }
}

impl Default for InMemorySender {
    fn default() -> Self {
        Self::new(Encoding::Json, DEFAULT_SENDER_MAX_BYTES)
    }
}

impl Sender for InMemorySender {
    fn encoding(&self) -> Encoding {
        self.encoding
    }

    fn message_max_bytes(&self) -> usize {
        self.message_max_bytes
    }

    async fn check(&self) -> Result<(), SendError> {
        if self.fail_check.load(Ordering::Relaxed) {
            return Err(SendError::Transport("backend unreachable".into()));
        }
        Ok(())
    }

    async fn send(&self, batch: Batch) -> Result<(), SendError> {
        if self.fail_sends.load(Ordering::Relaxed) {
            return Err(SendError::Transport(format!(
                "simulated failure ({} spans)",
                batch.record_count()
            )));
        }
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(batch);
        Ok(())
    }

    async fn close(&self) -> Result<(), SendError> {
        self.close_calls.fetch_add(1, Ordering::Relaxed);
        if self.fail_close.load(Ordering::Relaxed) {
            return Err(SendError::Transport("failed to release connection".into()));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "in_memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Record;

    fn batch(n: usize) -> Batch {
        let records: Vec<Record> = (0..n).map(|i| Record::from(format!("{{\"i\":{i}}}"))).collect();
        Batch::encode(Encoding::Json, &records)
    }

    #[tokio::test]
    async fn test_null_sender() {
        let sender = NullSender::default();
        assert!(sender.check().await.is_ok());
        assert!(sender.send(batch(1000)).await.is_ok());
        assert!(sender.close().await.is_ok());
    }

    #[tokio::test]
    async fn test_stdout_sender() {
        let sender = StdoutSender::new(false);
        assert!(sender.send(batch(3)).await.is_ok());
    }

    #[tokio::test]
    async fn test_in_memory_sender_captures() {
        let sender = InMemorySender::default();
        sender.send(batch(10)).await.unwrap();
        sender.send(batch(2)).await.unwrap();

        assert_eq!(sender.message_count(), 2);
        assert_eq!(sender.record_count(), 12);
    }

    #[tokio::test]
    async fn test_in_memory_sender_failure_switches() {
        let sender = InMemorySender::default();
        sender.fail_sends(true);
        sender.fail_close(true);
        sender.fail_check(true);

        assert!(matches!(sender.send(batch(1)).await, Err(SendError::Transport(_))));
        assert!(sender.check().await.is_err());
        assert!(sender.close().await.is_err());
        assert_eq!(sender.message_count(), 0);
        assert_eq!(sender.close_calls(), 1);
    }

    #[tokio::test]
    async fn test_boxed_dispatch() {
        let sender: std::sync::Arc<dyn SenderBoxed> = std::sync::Arc::new(InMemorySender::default());
        sender.send_boxed(batch(4)).await.unwrap();
        assert_eq!(sender.name(), "in_memory");
        assert_eq!(SenderBoxed::encoding(sender.as_ref()), Encoding::Json);
    }

    #[test]
    fn test_error_kind_index_is_dense() {
        for (i, kind) in SendErrorKind::ALL.iter().enumerate() {
            assert_eq!(kind.index(), i);
        }
        let nested = SendError::RetriesExhausted {
            attempts: 3,
            last: Box::new(SendError::Timeout),
        };
        assert_eq!(nested.kind(), SendErrorKind::RetriesExhausted);
    }
}
