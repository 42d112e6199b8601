//! The processing loop: pop one transaction, classify, run the cleared
//! strategies, take any claimed opportunity through validation, simulation
//! and submission, then repeat. Glue only; every hard decision lives in
//! the components it wires together.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use scout_core::{
    usd_micros_display, validate_bundle, BundleSimulator, Classifier, MultiRelaySubmitter,
    Opportunity, PipelineMetrics, SubmissionOutcome,
};
use scout_ingest::TransactionQueue;
use scout_strategies::StrategyRegistry;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Pause when the queue is empty.
    pub idle_wait_ms: u64,
    /// Longer pause after a cycle-level error, bounding error
    /// amplification.
    pub error_backoff_ms: u64,
    /// Global fiat floor a simulated bundle must clear before submission.
    pub min_net_profit_usd_micros: u128,
}

pub struct Pipeline {
    queue: Arc<TransactionQueue>,
    classifier: Classifier,
    registry: Arc<StrategyRegistry>,
    simulator: Arc<BundleSimulator>,
    submitter: Arc<MultiRelaySubmitter>,
    metrics: Arc<PipelineMetrics>,
    config: PipelineConfig,
    shutdown: Arc<AtomicBool>,
}

impl Pipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        queue: Arc<TransactionQueue>,
        classifier: Classifier,
        registry: Arc<StrategyRegistry>,
        simulator: Arc<BundleSimulator>,
        submitter: Arc<MultiRelaySubmitter>,
        metrics: Arc<PipelineMetrics>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            queue,
            classifier,
            registry,
            simulator,
            submitter,
            metrics,
            config,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    /// Main loop. Never crashes on a bad transaction, bundle or endpoint:
    /// an empty queue idles briefly, a cycle error backs off longer and
    /// the loop resumes.
    pub async fn run(&self) {
        info!("pipeline started");
        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                break;
            }
            match self.cycle().await {
                Ok(true) => {}
                Ok(false) => sleep(Duration::from_millis(self.config.idle_wait_ms)).await,
                Err(e) => {
                    error!(error = %format!("{e:#}"), "pipeline cycle failed, backing off");
                    sleep(Duration::from_millis(self.config.error_backoff_ms)).await;
                }
            }
        }
        info!("pipeline stopped");
    }

    /// One strict cycle over at most one queued transaction. Returns
    /// Ok(false) when the queue was empty.
    pub async fn cycle(&self) -> Result<bool> {
        let Some(tx) = self.queue.pop() else {
            return Ok(false);
        };
        self.metrics.set_queue_length(self.queue.len());

        let started = Instant::now();
        let actionable = self.classifier.filter_actionable(std::slice::from_ref(&tx));
        if actionable.is_empty() {
            debug!(signature = %tx.signature, "transaction not actionable");
            return Ok(true);
        }

        let opportunities = self.registry.evaluate(&actionable).await;
        self.metrics.observe_decision_latency(started.elapsed());

        for opportunity in &opportunities {
            if let Err(e) = self.process_opportunity(opportunity).await {
                warn!(
                    opportunity_id = %opportunity.id,
                    strategy = %opportunity.strategy,
                    error = %format!("{e:#}"),
                    "opportunity processing failed, advancing"
                );
            }
        }
        Ok(true)
    }

    /// Take one opportunity to completion: build, validate, pre-filter,
    /// simulate, submit.
    async fn process_opportunity(&self, opportunity: &Opportunity) -> Result<()> {
        let strategy = self
            .registry
            .get(&opportunity.strategy)
            .ok_or_else(|| anyhow!("strategy '{}' not registered", opportunity.strategy))?;

        let bundle = strategy.build_bundle(opportunity)?;
        let validation = validate_bundle(&bundle);
        if !validation.valid {
            warn!(
                bundle_id = %bundle.id,
                errors = ?validation.errors,
                "bundle failed validation, skipping simulation"
            );
            return Ok(());
        }

        // Cheap pre-filter only; the simulation below is the viability
        // decision.
        let fast = self.simulator.estimate_profit_fast(&bundle);
        if fast.net_profit_lamports <= 0 {
            debug!(bundle_id = %bundle.id, "fast estimate negative, skipping simulation");
            return Ok(());
        }

        let result = self.simulator.simulate(&bundle, None).await;
        if !result.success {
            debug!(
                bundle_id = %bundle.id,
                revert_reason = ?result.revert_reason,
                error = ?result.error,
                "bundle simulation failed, discarding opportunity"
            );
            return Ok(());
        }
        if result.profit.net_profit_usd_micros
            < self.config.min_net_profit_usd_micros as i128
        {
            debug!(
                bundle_id = %bundle.id,
                net_profit_usd = usd_micros_display(result.profit.net_profit_usd_micros),
                "simulated profit below floor, discarding opportunity"
            );
            return Ok(());
        }

        match self
            .submitter
            .submit_with_fallback(&bundle, bundle.target_slot)
            .await
        {
            SubmissionOutcome::Submitted {
                endpoint,
                bundle_id,
                attempts,
            } => {
                let realized = result.profit.net_profit_lamports.max(0) as u64;
                self.metrics.add_realized_profit(realized);
                info!(
                    endpoint = %endpoint,
                    bundle_id = %bundle_id,
                    attempts,
                    net_profit_lamports = realized,
                    net_profit_usd = usd_micros_display(result.profit.net_profit_usd_micros),
                    "bundle submitted"
                );
            }
            SubmissionOutcome::AllFailed { attempts } => {
                warn!(
                    bundle_id = %bundle.id,
                    endpoint_count = attempts.len(),
                    "all relay endpoints failed, discarding opportunity"
                );
            }
        }
        Ok(())
    }
}
