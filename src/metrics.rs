//! Metrics collection and export module

use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use std::time::Instant;

/// Global metrics registry
pub struct Metrics {
    registry: Registry,

    // Counters
    pub cli_invocations: IntCounterVec,
    pub cli_failures: IntCounterVec,
    pub tx_built: IntCounter,
    pub tx_submitted: IntCounter,
    pub funding_retries: IntCounter,
    pub wallets_created: IntCounter,

    // Histograms
    pub cli_latency: Histogram,
    pub lifecycle_latency: Histogram,
}

impl Metrics {
    /// Create new metrics instance
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let cli_invocations = IntCounterVec::new(
            Opts::new("cli_invocations_total", "External CLI invocations by subcommand"),
            &["command"],
        )?;

        let cli_failures = IntCounterVec::new(
            Opts::new("cli_failures_total", "Failed CLI invocations by error category"),
            &["category"],
        )?;

        let tx_built =
            IntCounter::with_opts(Opts::new("tx_built_total", "Transaction bodies built"))?;

        let tx_submitted = IntCounter::with_opts(Opts::new(
            "tx_submitted_total",
            "Transactions accepted by the node",
        ))?;

        let funding_retries = IntCounter::with_opts(Opts::new(
            "funding_retries_total",
            "Funding attempts retried after a transient ledger rejection",
        ))?;

        let wallets_created =
            IntCounter::with_opts(Opts::new("wallets_created_total", "Wallets created"))?;

        let cli_latency = Histogram::with_opts(
            HistogramOpts::new("cli_latency_seconds", "External CLI call latency")
                .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
        )?;

        let lifecycle_latency = Histogram::with_opts(
            HistogramOpts::new(
                "tx_lifecycle_latency_seconds",
                "Build, fee, sign and submit latency",
            )
            .buckets(vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        )?;

        // Register all metrics
        registry.register(Box::new(cli_invocations.clone()))?;
        registry.register(Box::new(cli_failures.clone()))?;
        registry.register(Box::new(tx_built.clone()))?;
        registry.register(Box::new(tx_submitted.clone()))?;
        registry.register(Box::new(funding_retries.clone()))?;
        registry.register(Box::new(wallets_created.clone()))?;
        registry.register(Box::new(cli_latency.clone()))?;
        registry.register(Box::new(lifecycle_latency.clone()))?;

        Ok(Self {
            registry,
            cli_invocations,
            cli_failures,
            tx_built,
            tx_submitted,
            funding_retries,
            wallets_created,
            cli_latency,
            lifecycle_latency,
        })
    }

    /// Get the registry for exporting
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render every registered metric in the Prometheus text format
    pub fn render(&self) -> String {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buf) {
            tracing::warn!(error = %e, "failed to encode metrics");
        }
        String::from_utf8_lossy(&buf).into_owned()
    }
}

/// Global metrics instance
pub fn metrics() -> &'static Metrics {
    static METRICS: once_cell::sync::Lazy<Metrics> =
        once_cell::sync::Lazy::new(|| Metrics::new().expect("Failed to initialize metrics"));
    &METRICS
}

/// Timer helper for measuring operation duration
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn observe_duration(&self, histogram: &Histogram) {
        histogram.observe(self.start.elapsed().as_secs_f64());
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}
