//! Multi-source ingestion service.
//!
//! Owns the connections to every configured data source, normalizes their
//! notifications into pending transactions, applies the admission filter
//! and feeds the bounded priority queue. Each source runs its own driver
//! task: connection failures re-enter a fixed-interval retry loop, and the
//! retry stops by itself once a connection sticks. One source failing
//! never affects the others.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use scout_core::{PendingTransaction, PipelineMetrics};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::queue::TransactionQueue;
use crate::source::{DataSource, NotificationParser, RawNotification};

/// Per-source connectivity state. Written only by the owning driver task;
/// other components only ever see copies.
#[derive(Debug, Clone)]
pub struct HealthStatus {
    pub healthy: bool,
    pub last_checked: DateTime<Utc>,
    pub consecutive_errors: u32,
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self {
            healthy: true,
            last_checked: Utc::now(),
            consecutive_errors: 0,
        }
    }
}

/// Cheap pre-queue admission check: a transaction is admitted when it
/// clears the fee-rate floor or the compute floor.
#[derive(Debug, Clone, Copy)]
pub struct AdmissionFilter {
    pub min_fee_rate: u64,
    pub min_compute_limit: u64,
}

impl AdmissionFilter {
    pub fn admits(&self, tx: &PendingTransaction) -> bool {
        tx.fee_rate >= self.min_fee_rate || tx.compute_limit >= self.min_compute_limit
    }
}

#[derive(Debug, Clone)]
pub struct IngestionConfig {
    pub reconnect_interval_ms: u64,
    /// Consecutive failures before a source is flagged unhealthy. The
    /// flag is observability only; retrying continues.
    pub unhealthy_after: u32,
    pub min_fee_rate: u64,
    pub min_compute_limit: u64,
    /// Bound on the duplicate-suppression set.
    pub seen_capacity: usize,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            reconnect_interval_ms: 5_000,
            unhealthy_after: 3,
            min_fee_rate: 1_000,
            min_compute_limit: 100_000,
            seen_capacity: 10_000,
        }
    }
}

#[derive(Clone)]
pub struct IngestionService {
    sources: Vec<Arc<dyn DataSource>>,
    queue: Arc<TransactionQueue>,
    parser: NotificationParser,
    filter: AdmissionFilter,
    health: Arc<RwLock<HashMap<String, HealthStatus>>>,
    seen: Arc<Mutex<HashSet<String>>>,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
    shutdown: Arc<AtomicBool>,
    metrics: Arc<PipelineMetrics>,
    config: IngestionConfig,
}

impl IngestionService {
    pub fn new(
        sources: Vec<Arc<dyn DataSource>>,
        queue: Arc<TransactionQueue>,
        metrics: Arc<PipelineMetrics>,
        config: IngestionConfig,
    ) -> Self {
        let filter = AdmissionFilter {
            min_fee_rate: config.min_fee_rate,
            min_compute_limit: config.min_compute_limit,
        };
        Self {
            sources,
            queue,
            parser: NotificationParser::new(),
            filter,
            health: Arc::new(RwLock::new(HashMap::new())),
            seen: Arc::new(Mutex::new(HashSet::new())),
            tasks: Arc::new(Mutex::new(Vec::new())),
            shutdown: Arc::new(AtomicBool::new(false)),
            metrics,
            config,
        }
    }

    /// Start one driver task per source. All sources are attempted
    /// concurrently and independently; calling this while already running
    /// is a no-op.
    pub async fn start(&self) {
        let mut tasks = self.tasks.lock().await;
        if !tasks.is_empty() {
            debug!("ingestion service already running");
            return;
        }
        self.shutdown.store(false, Ordering::Relaxed);

        info!(source_count = self.sources.len(), "starting ingestion service");
        for source in &self.sources {
            let service = self.clone();
            let source = source.clone();
            tasks.push(tokio::spawn(async move {
                service.drive_source(source).await;
            }));
        }
    }

    /// Point-in-time copy of the per-source health map.
    pub async fn health_snapshot(&self) -> HashMap<String, HealthStatus> {
        self.health.read().await.clone()
    }

    pub fn queue(&self) -> Arc<TransactionQueue> {
        self.queue.clone()
    }

    /// Unsubscribe everything, stop all drivers and retry timers, clear
    /// internal state. Safe to call more than once.
    pub async fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);

        let mut tasks = self.tasks.lock().await;
        for task in tasks.drain(..) {
            task.abort();
        }
        drop(tasks);

        for source in &self.sources {
            if let Err(e) = source.unsubscribe().await {
                warn!(source = source.name(), error = %format!("{e:#}"), "unsubscribe failed");
            }
        }

        self.health.write().await.clear();
        self.seen.lock().await.clear();
        self.queue.clear();
        info!("ingestion service stopped");
    }

    /// Connection driver for one source: connect, subscribe, pump the
    /// notification stream; on any failure wait the fixed reconnect
    /// interval and try again until shutdown.
    async fn drive_source(&self, source: Arc<dyn DataSource>) {
        let name = source.name().to_string();
        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                break;
            }

            match self.stream_source(&source).await {
                Ok(()) => {
                    if self.shutdown.load(Ordering::Relaxed) {
                        break;
                    }
                    self.record_failure(&name, "notification stream ended").await;
                }
                Err(e) => {
                    self.record_failure(&name, &format!("{e:#}")).await;
                }
            }

            if self.shutdown.load(Ordering::Relaxed) {
                break;
            }
            sleep(Duration::from_millis(self.config.reconnect_interval_ms)).await;
        }
    }

    async fn stream_source(&self, source: &Arc<dyn DataSource>) -> anyhow::Result<()> {
        source.connect().await?;
        let mut notifications = source.subscribe().await?;
        self.record_success(source.name()).await;

        while let Some(raw) = notifications.recv().await {
            if self.shutdown.load(Ordering::Relaxed) {
                return Ok(());
            }
            self.process_notification(source.name(), raw).await;
        }
        Ok(())
    }

    async fn process_notification(&self, source: &str, raw: RawNotification) {
        let tx = match self.parser.parse(&raw) {
            Ok(tx) => tx,
            Err(e) => {
                debug!(source, error = %format!("{e:#}"), "dropping unparseable notification");
                self.metrics.inc_dropped("unparseable");
                return;
            }
        };

        {
            let mut seen = self.seen.lock().await;
            if !seen.insert(tx.signature.clone()) {
                self.metrics.inc_dropped("duplicate");
                return;
            }
            if seen.len() > self.config.seen_capacity {
                let excess = seen.len() - self.config.seen_capacity;
                let stale: Vec<String> = seen.iter().take(excess).cloned().collect();
                for signature in stale {
                    seen.remove(&signature);
                }
            }
        }

        if !self.filter.admits(&tx) {
            self.metrics.inc_dropped("below_admission_floor");
            return;
        }

        if self.queue.push(tx) {
            self.metrics.inc_ingested(source);
        } else {
            self.metrics.inc_dropped("queue_full");
        }
        self.metrics.set_queue_length(self.queue.len());
    }

    async fn record_success(&self, source: &str) {
        let mut health = self.health.write().await;
        let entry = health.entry(source.to_string()).or_default();
        if entry.consecutive_errors > 0 {
            info!(source, "source connection restored");
        }
        entry.healthy = true;
        entry.consecutive_errors = 0;
        entry.last_checked = Utc::now();
        self.metrics.set_source_health(source, true);
    }

    async fn record_failure(&self, source: &str, reason: &str) {
        let mut health = self.health.write().await;
        let entry = health.entry(source.to_string()).or_default();
        entry.consecutive_errors += 1;
        entry.last_checked = Utc::now();
        if entry.consecutive_errors >= self.config.unhealthy_after {
            if entry.healthy {
                warn!(
                    source,
                    consecutive_errors = entry.consecutive_errors,
                    reason,
                    "source flagged unhealthy, retrying on fixed interval"
                );
            }
            entry.healthy = false;
            self.metrics.set_source_health(source, false);
        } else {
            debug!(source, consecutive_errors = entry.consecutive_errors, reason, "source failure");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::AtomicU32;
    use tokio::sync::mpsc;

    struct MockSource {
        name: String,
        failing_connects: AtomicU32,
        notifications: Vec<RawNotification>,
        // Held open so the stream does not end after the burst.
        sender_slot: Mutex<Option<mpsc::UnboundedSender<RawNotification>>>,
    }

    impl MockSource {
        fn new(name: &str, failing_connects: u32, notifications: Vec<RawNotification>) -> Self {
            Self {
                name: name.to_string(),
                failing_connects: AtomicU32::new(failing_connects),
                notifications,
                sender_slot: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl DataSource for MockSource {
        fn name(&self) -> &str {
            &self.name
        }

        async fn connect(&self) -> anyhow::Result<()> {
            let remaining = self.failing_connects.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failing_connects.fetch_sub(1, Ordering::SeqCst);
                bail!("connection refused");
            }
            Ok(())
        }

        async fn subscribe(&self) -> anyhow::Result<mpsc::UnboundedReceiver<RawNotification>> {
            let (tx, rx) = mpsc::unbounded_channel();
            for notification in &self.notifications {
                let _ = tx.send(notification.clone());
            }
            *self.sender_slot.lock().await = Some(tx);
            Ok(rx)
        }

        async fn unsubscribe(&self) -> anyhow::Result<()> {
            *self.sender_slot.lock().await = None;
            Ok(())
        }
    }

    fn notification(signature: &str, fee_rate: u64) -> RawNotification {
        json!({
            "signature": signature,
            "sender": "alice",
            "recipient": "program",
            "lamports": 1_000_000u64,
            "feeRate": fee_rate,
            "computeLimit": 0u64,
            "slot": 7u64,
        })
    }

    fn test_config() -> IngestionConfig {
        IngestionConfig {
            reconnect_interval_ms: 5,
            unhealthy_after: 3,
            min_fee_rate: 10,
            min_compute_limit: 1_000_000,
            seen_capacity: 100,
        }
    }

    fn create_service(sources: Vec<Arc<dyn DataSource>>, capacity: usize) -> IngestionService {
        IngestionService::new(
            sources,
            Arc::new(TransactionQueue::new(capacity)),
            Arc::new(PipelineMetrics::new().unwrap()),
            test_config(),
        )
    }

    #[tokio::test]
    async fn test_notifications_flow_into_queue_in_priority_order() {
        let source: Arc<dyn DataSource> = Arc::new(MockSource::new(
            "mock",
            0,
            vec![
                notification("low", 20),
                notification("dust", 1), // below the admission floor
                notification("high", 900),
            ],
        ));
        let service = create_service(vec![source], 10);
        service.start().await;
        sleep(Duration::from_millis(100)).await;

        let queue = service.queue();
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop().unwrap().signature, "high");
        assert_eq!(queue.pop().unwrap().signature, "low");
        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_duplicate_notifications_are_suppressed() {
        let source: Arc<dyn DataSource> = Arc::new(MockSource::new(
            "mock",
            0,
            vec![notification("same", 100), notification("same", 100)],
        ));
        let service = create_service(vec![source], 10);
        service.start().await;
        sleep(Duration::from_millis(100)).await;

        assert_eq!(service.queue().len(), 1);
        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_failing_source_is_flagged_unhealthy_but_keeps_retrying() {
        let source: Arc<dyn DataSource> = Arc::new(MockSource::new("flaky", u32::MAX, vec![]));
        let service = create_service(vec![source], 10);
        service.start().await;
        sleep(Duration::from_millis(150)).await;

        let health = service.health_snapshot().await;
        let status = health.get("flaky").expect("health entry for flaky source");
        assert!(!status.healthy);
        assert!(status.consecutive_errors >= 3);
        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_source_recovers_after_transient_failures() {
        let source: Arc<dyn DataSource> = Arc::new(MockSource::new(
            "recovering",
            2,
            vec![notification("tx", 100)],
        ));
        let service = create_service(vec![source], 10);
        service.start().await;
        sleep(Duration::from_millis(200)).await;

        let health = service.health_snapshot().await;
        let status = health.get("recovering").unwrap();
        assert!(status.healthy);
        assert_eq!(status.consecutive_errors, 0);
        assert_eq!(service.queue().len(), 1);
        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_one_failing_source_never_stops_the_others() {
        let broken: Arc<dyn DataSource> = Arc::new(MockSource::new("broken", u32::MAX, vec![]));
        let working: Arc<dyn DataSource> =
            Arc::new(MockSource::new("working", 0, vec![notification("tx", 100)]));
        let service = create_service(vec![broken, working], 10);
        service.start().await;
        sleep(Duration::from_millis(100)).await;

        assert_eq!(service.queue().len(), 1);
        let health = service.health_snapshot().await;
        assert!(health.get("working").unwrap().healthy);
        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_clears_state_and_is_idempotent() {
        let source: Arc<dyn DataSource> = Arc::new(MockSource::new("mock", 0, vec![notification("tx", 100)]));
        let service = create_service(vec![source], 10);
        service.start().await;
        sleep(Duration::from_millis(100)).await;

        service.shutdown().await;
        assert!(service.queue().is_empty());
        assert!(service.health_snapshot().await.is_empty());

        // Second shutdown must be a no-op.
        service.shutdown().await;
    }
}
