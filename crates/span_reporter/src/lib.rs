//! Asynchronous Span Reporter
//!
//! Buffers encoded tracing spans in a bounded, byte-accounted queue and
//! delivers them to a tracing backend in size-bounded messages from a
//! background task. Producers never block on I/O: when the queue is full the
//! span is dropped and counted.
//!
//! # Architecture
//!
//! ```text
//!  report(&span) ──encode──▶ BoundedQueue ──drain──▶ BatchAssembler ──▶ Sender
//!        │                        ▲                        │
//!        └── ReporterMetrics      └──── Flusher task ──────┘
//!                                  (timer / pressure / flush() / close())
//! ```
//!
//! Senders use native async fn in traits (no `#[async_trait]` macro); the
//! reporter stores them as `Arc<dyn SenderBoxed>`.

pub mod batch;
pub mod config;
pub mod encoding;
pub mod error;
pub mod flusher;
mod invariants;
pub mod metrics;
pub mod queue;
pub mod record;
pub mod reporter;
pub mod retry;
pub mod sender;
pub mod span;
pub mod state;

// Re-export main types
pub use batch::{Assembled, Batch, BatchAssembler, BatchLimits};
pub use config::{ReporterConfig, ResolvedConfig};
pub use encoding::{Encode, Encoder, Encoding, JsonEncoder};
pub use error::{ConfigError, EncodeError, ReportError, ReporterError};
pub use flusher::FlushSummary;
pub use metrics::{InMemoryReporterMetrics, MetricsSnapshot, NoopMetrics, ReporterMetrics};
pub use queue::{Admit, BoundedQueue, Drained, Occupancy};
pub use record::Record;
pub use reporter::{AsyncReporter, AsyncReporterBuilder};
pub use retry::{RetryConfig, RetryingSender};
pub use sender::{
    InMemorySender, NullSender, SendError, SendErrorKind, Sender, SenderBoxed, StdoutSender,
};
pub use span::{Annotation, Endpoint, ParseIdError, Span, SpanId, SpanKind, TraceId};
pub use state::FlusherState;
