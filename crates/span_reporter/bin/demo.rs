//! # Async Span Reporter Demo
//!
//! End-to-end run of the reporter against a simulated tracing backend.
//!
//! ## What it shows
//!
//! - A custom [`Sender`] written with native async fn in traits, wrapped in
//!   a [`RetryingSender`] with exponential backoff.
//! - Several producer tasks reporting Zipkin spans concurrently through one
//!   shared `Arc<AsyncReporter>`.
//! - Backpressure: a small queue drops spans instead of blocking producers.
//! - Size-bounded messages, flush on timer and on pressure.
//! - Graceful close with the final drain, and the reporter metrics.
//!
//! ## Running
//!
//! ```bash
//! cargo run -p span_reporter --features demo --bin demo --release
//!
//! # Small queue and tiny messages to watch drops and splitting
//! cargo run -p span_reporter --features demo --bin demo -- \
//!     --queued-max-count 200 --message-max-bytes 4096
//!
//! # Debug logs from the flusher
//! RUST_LOG=span_reporter=debug cargo run -p span_reporter --features demo --bin demo
//! ```

use anyhow::Context;
use clap::Parser;
use rand::Rng;
use span_reporter::{
    AsyncReporter, Batch, Encoding, Endpoint, InMemoryReporterMetrics, RetryConfig,
    RetryingSender, SendError, Sender, Span, SpanKind,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "demo", about = "Async span reporter demo")]
struct Args {
    /// Concurrent producer tasks
    #[arg(long, default_value_t = 8)]
    producers: usize,

    /// Spans reported by each producer
    #[arg(long, default_value_t = 2_000)]
    spans_per_producer: usize,

    /// Maximum framed size of one message
    #[arg(long, env = "REPORTER_MESSAGE_MAX_BYTES", default_value_t = 64 * 1024)]
    message_max_bytes: usize,

    /// Queue capacity in spans
    #[arg(long, env = "REPORTER_QUEUED_MAX_COUNT", default_value_t = 10_000)]
    queued_max_count: usize,

    /// Flush timer in milliseconds (0 disables)
    #[arg(long, default_value_t = 200)]
    message_timeout_ms: u64,

    /// Probability that the backend rejects a message attempt
    #[arg(long, default_value_t = 0.1)]
    failure_rate: f64,

    /// Simulated backend latency in milliseconds
    #[arg(long, default_value_t = 2)]
    latency_ms: u64,

    /// Retries per message before it is dropped
    #[arg(long, default_value_t = 2)]
    max_retries: u32,
}

// =============================================================================
// SIMULATED BACKEND
// =============================================================================

/// Sender that sleeps to simulate the network and fails some attempts.
struct SimulatedBackend {
    failure_rate: f64,
    latency: Duration,
    message_max_bytes: usize,
    attempts: AtomicU64,
    delivered_messages: AtomicU64,
    delivered_spans: AtomicU64,
    delivered_bytes: AtomicU64,
}

impl SimulatedBackend {
    fn new(failure_rate: f64, latency: Duration, message_max_bytes: usize) -> Self {
        Self {
            failure_rate,
            latency,
            message_max_bytes,
            attempts: AtomicU64::new(0),
            delivered_messages: AtomicU64::new(0),
            delivered_spans: AtomicU64::new(0),
            delivered_bytes: AtomicU64::new(0),
        }
    }
}

impl Sender for SimulatedBackend {
    fn encoding(&self) -> Encoding {
        Encoding::Json
    }

    fn message_max_bytes(&self) -> usize {
        self.message_max_bytes
    }

    async fn check(&self) -> Result<(), SendError> {
        Ok(())
    }

    async fn send(&self, batch: Batch) -> Result<(), SendError> {
        self.attempts.fetch_add(1, Ordering::Relaxed);
        tokio::time::sleep(self.latency).await;

        if rand::thread_rng().gen_bool(self.failure_rate) {
            return Err(SendError::Transport(format!(
                "simulated 503 for {} spans",
                batch.record_count()
            )));
        }
        self.delivered_messages.fetch_add(1, Ordering::Relaxed);
        self.delivered_spans
            .fetch_add(batch.record_count() as u64, Ordering::Relaxed);
        self.delivered_bytes
            .fetch_add(batch.byte_size() as u64, Ordering::Relaxed);
        Ok(())
    }

    async fn close(&self) -> Result<(), SendError> {
        Ok(())
    }

    fn name(&self) -> &str {
        "simulated-zipkin"
    }
}

// =============================================================================
// MAIN APPLICATION
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    anyhow::ensure!(
        (0.0..=1.0).contains(&args.failure_rate),
        "--failure-rate must be within 0.0..=1.0"
    );

    // Phase 1: sender pipeline
    let backend = SimulatedBackend::new(
        args.failure_rate,
        Duration::from_millis(args.latency_ms),
        args.message_max_bytes,
    );
    let retry = RetryConfig::default()
        .with_max_retries(args.max_retries)
        .with_initial_delay(Duration::from_millis(5))
        .with_max_delay(Duration::from_millis(50));
    let sender = Arc::new(RetryingSender::new(backend, retry));

    // Phase 2: reporter
    let metrics = Arc::new(InMemoryReporterMetrics::new());
    let reporter = AsyncReporter::builder(sender.clone())
        .metrics(metrics.clone())
        .message_max_bytes(args.message_max_bytes)
        .queued_max_count(args.queued_max_count)
        .message_timeout(Duration::from_millis(args.message_timeout_ms))
        .close_timeout(Duration::from_secs(5))
        .start()
        .await
        .context("failed to start reporter")?;
    let reporter = Arc::new(reporter);

    println!(
        "reporting {} spans from {} producers (message_max_bytes={}, queued_max_count={})",
        args.producers * args.spans_per_producer,
        args.producers,
        args.message_max_bytes,
        args.queued_max_count
    );

    // Phase 3: producers
    let start = Instant::now();
    let handles: Vec<_> = (0..args.producers)
        .map(|producer| {
            let reporter = Arc::clone(&reporter);
            let count = args.spans_per_producer;
            tokio::spawn(async move { run_producer(producer, count, &reporter).await })
        })
        .collect();

    let mut accepted = 0u64;
    let mut rejected = 0u64;
    for handle in handles {
        let (ok, dropped) = handle.await.context("producer task panicked")?;
        accepted += ok;
        rejected += dropped;
    }
    let generation_time = start.elapsed();

    // Phase 4: close
    reporter.close().await.context("failed to close reporter")?;
    let total_time = start.elapsed();

    // Phase 5: statistics
    let snapshot = metrics.snapshot();
    let backend = sender.inner();
    println!();
    println!("+-----------------------------------------------+");
    println!("|           SPAN REPORTER DEMO RESULTS          |");
    println!("+-----------------------------------------------+");
    println!("| Generation time:        {:>18.2?}   |", generation_time);
    println!("| Total time:             {:>18.2?}   |", total_time);
    println!("+-----------------------------------------------+");
    println!("| PRODUCERS                                     |");
    println!("|   Accepted:             {:>18}   |", accepted);
    println!("|   Rejected:             {:>18}   |", rejected);
    println!("+-----------------------------------------------+");
    println!("| REPORTER METRICS                              |");
    println!("|   Spans queued:         {:>18}   |", snapshot.records_queued);
    println!("|   Span bytes:           {:>18}   |", snapshot.record_bytes);
    println!("|   Spans dropped:        {:>18}   |", snapshot.records_dropped);
    println!("|   Messages sent:        {:>18}   |", snapshot.messages_sent);
    println!("|   Message bytes:        {:>18}   |", snapshot.message_bytes);
    println!("|   Messages dropped:     {:>18}   |", snapshot.messages_dropped);
    println!("+-----------------------------------------------+");
    println!("| BACKEND                                       |");
    println!(
        "|   Attempts:             {:>18}   |",
        backend.attempts.load(Ordering::Relaxed)
    );
    println!("|   Retries:              {:>18}   |", sender.total_retries());
    println!(
        "|   Delivered spans:      {:>18}   |",
        backend.delivered_spans.load(Ordering::Relaxed)
    );
    println!(
        "|   Delivered messages:   {:>18}   |",
        backend.delivered_messages.load(Ordering::Relaxed)
    );
    println!(
        "|   Delivered bytes:      {:>18}   |",
        backend.delivered_bytes.load(Ordering::Relaxed)
    );
    let throughput = accepted as f64 / generation_time.as_secs_f64().max(f64::EPSILON);
    println!("|   Spans/second:         {:>18.0}   |", throughput);
    println!("+-----------------------------------------------+");

    Ok(())
}

// =============================================================================
// PRODUCER
// =============================================================================

const OPERATIONS: [(&str, SpanKind); 5] = [
    ("get /api/users", SpanKind::Server),
    ("select users", SpanKind::Client),
    ("cache get", SpanKind::Client),
    ("publish user-events", SpanKind::Producer),
    ("consume user-events", SpanKind::Consumer),
];

/// Reports `count` spans; returns (accepted, rejected).
async fn run_producer(producer: usize, count: usize, reporter: &AsyncReporter) -> (u64, u64) {
    let service = format!("service-{}", producer % 4);
    let mut accepted = 0;
    let mut rejected = 0;

    for i in 0..count {
        let (name, kind) = OPERATIONS[i % OPERATIONS.len()];
        let trace_id = ((producer as u128) << 64) | (i / 5) as u128;
        let span_id = ((producer as u64) << 48) | i as u64;

        let mut span = Span::new(trace_id, span_id, name)
            .with_kind(kind)
            .with_local_endpoint(Endpoint::service(service.clone()))
            .with_tag("producer", producer.to_string());
        if i % 5 != 0 {
            span = span.with_parent(span_id - 1);
        }
        if i % 10 == 9 {
            span = span.with_tag("error", "simulated failure");
        }
        span.finish();

        match reporter.report(&span) {
            Ok(()) => accepted += 1,
            Err(e) => {
                rejected += 1;
                tracing::trace!(producer, error = %e, "span rejected");
            }
        }

        if i % 100 == 99 {
            tokio::task::yield_now().await;
        }
    }

    (accepted, rejected)
}
