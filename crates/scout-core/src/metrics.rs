//! Prometheus metrics and the scrape endpoint.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{extract::State, http::StatusCode, routing::get, Router};
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts,
    Registry, TextEncoder,
};
use tracing::info;

/// Counters and gauges emitted by the pipeline. Each instance owns its own
/// registry so independent components (and tests) never collide.
pub struct PipelineMetrics {
    registry: Registry,

    pub queue_length: IntGauge,
    pub transactions_ingested: IntCounterVec,
    pub transactions_dropped: IntCounterVec,
    pub source_health: IntGaugeVec,

    pub opportunities_found: IntCounterVec,
    pub decision_latency: Histogram,

    pub simulations_total: IntCounterVec,
    pub simulation_latency: Histogram,

    pub submissions_total: IntCounterVec,
    pub realized_profit_lamports: IntCounter,
}

impl PipelineMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let queue_length = IntGauge::with_opts(Opts::new(
            "scout_queue_length",
            "Current number of queued pending transactions",
        ))?;
        let transactions_ingested = IntCounterVec::new(
            Opts::new(
                "scout_transactions_ingested_total",
                "Pending transactions accepted from data sources",
            ),
            &["source"],
        )?;
        let transactions_dropped = IntCounterVec::new(
            Opts::new(
                "scout_transactions_dropped_total",
                "Pending transactions dropped before processing",
            ),
            &["reason"],
        )?;
        let source_health = IntGaugeVec::new(
            Opts::new("scout_source_healthy", "Per-source health flag (1 = healthy)"),
            &["source"],
        )?;
        let opportunities_found = IntCounterVec::new(
            Opts::new(
                "scout_opportunities_total",
                "Opportunities claimed by strategies",
            ),
            &["strategy"],
        )?;
        let decision_latency = Histogram::with_opts(
            HistogramOpts::new(
                "scout_decision_latency_seconds",
                "Time from dequeue to strategy decision",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]),
        )?;
        let simulations_total = IntCounterVec::new(
            Opts::new("scout_simulations_total", "Bundle simulations by outcome"),
            &["outcome"],
        )?;
        let simulation_latency = Histogram::with_opts(
            HistogramOpts::new(
                "scout_simulation_latency_seconds",
                "Wall time of a single bundle simulation",
            )
            .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.0]),
        )?;
        let submissions_total = IntCounterVec::new(
            Opts::new(
                "scout_submissions_total",
                "Relay submission attempts by endpoint and outcome",
            ),
            &["endpoint", "outcome"],
        )?;
        let realized_profit_lamports = IntCounter::with_opts(Opts::new(
            "scout_realized_profit_lamports_total",
            "Cumulative realized profit in lamports",
        ))?;

        registry.register(Box::new(queue_length.clone()))?;
        registry.register(Box::new(transactions_ingested.clone()))?;
        registry.register(Box::new(transactions_dropped.clone()))?;
        registry.register(Box::new(source_health.clone()))?;
        registry.register(Box::new(opportunities_found.clone()))?;
        registry.register(Box::new(decision_latency.clone()))?;
        registry.register(Box::new(simulations_total.clone()))?;
        registry.register(Box::new(simulation_latency.clone()))?;
        registry.register(Box::new(submissions_total.clone()))?;
        registry.register(Box::new(realized_profit_lamports.clone()))?;

        Ok(Self {
            registry,
            queue_length,
            transactions_ingested,
            transactions_dropped,
            source_health,
            opportunities_found,
            decision_latency,
            simulations_total,
            simulation_latency,
            submissions_total,
            realized_profit_lamports,
        })
    }

    pub fn set_queue_length(&self, len: usize) {
        self.queue_length.set(len as i64);
    }

    pub fn inc_ingested(&self, source: &str) {
        self.transactions_ingested.with_label_values(&[source]).inc();
    }

    pub fn inc_dropped(&self, reason: &str) {
        self.transactions_dropped.with_label_values(&[reason]).inc();
    }

    pub fn set_source_health(&self, source: &str, healthy: bool) {
        self.source_health
            .with_label_values(&[source])
            .set(if healthy { 1 } else { 0 });
    }

    pub fn inc_opportunities(&self, strategy: &str) {
        self.opportunities_found
            .with_label_values(&[strategy])
            .inc();
    }

    pub fn observe_decision_latency(&self, elapsed: Duration) {
        self.decision_latency.observe(elapsed.as_secs_f64());
    }

    pub fn inc_simulations(&self, outcome: &str) {
        self.simulations_total.with_label_values(&[outcome]).inc();
    }

    pub fn observe_simulation_latency(&self, elapsed: Duration) {
        self.simulation_latency.observe(elapsed.as_secs_f64());
    }

    pub fn inc_submissions(&self, endpoint: &str, outcome: &str) {
        self.submissions_total
            .with_label_values(&[endpoint, outcome])
            .inc();
    }

    pub fn add_realized_profit(&self, lamports: u64) {
        self.realized_profit_lamports.inc_by(lamports);
    }

    /// Render the registry in Prometheus text exposition format.
    pub fn encode(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .context("failed to encode metrics")?;
        String::from_utf8(buffer).context("metrics buffer is not valid UTF-8")
    }
}

/// Minimal scrape server: `/metrics` and `/health`.
pub struct MetricsServer {
    metrics: Arc<PipelineMetrics>,
    port: u16,
}

impl MetricsServer {
    pub fn new(metrics: Arc<PipelineMetrics>, port: u16) -> Self {
        Self { metrics, port }
    }

    pub async fn start(&self) -> Result<()> {
        let app = Router::new()
            .route("/metrics", get(metrics_handler))
            .route("/health", get(health_handler))
            .with_state(self.metrics.clone());

        let addr = format!("0.0.0.0:{}", self.port);
        info!(addr = %addr, "starting metrics server");

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .context("failed to bind metrics listener")?;
        axum::serve(listener, app)
            .await
            .context("metrics server stopped")?;
        Ok(())
    }
}

async fn metrics_handler(
    State(metrics): State<Arc<PipelineMetrics>>,
) -> Result<String, StatusCode> {
    metrics
        .encode()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

async fn health_handler() -> &'static str {
    "ok"
}
