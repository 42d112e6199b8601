//! Bundle simulation engine.
//!
//! Every simulation runs against an isolated fork. Forks created here are
//! released exactly once on every exit path, including when the caller's
//! deadline fires first: the replay runs in its own task, so a timed-out
//! simulation keeps executing in the background and still releases its fork
//! on eventual completion. Caller-supplied forks are never released.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::fork::{ForkProvider, StateFork};
use crate::metrics::PipelineMetrics;
use crate::types::{
    lamports_to_usd_micros_signed, Bundle, ProfitEstimate, SimulationResult, MAX_BUNDLE_TRANSACTIONS,
    MICRO_LAMPORTS,
};

/// Simulation engine configuration.
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    /// Deadline for a single simulation; exceeding it degrades to a
    /// structured failure result.
    pub timeout_ms: u64,
    /// Upper bound on simulations holding live forks at once.
    pub max_concurrent_simulations: usize,
    /// Priority fee rate used for fee estimates, micro-lamports per
    /// compute unit.
    pub fee_per_compute_unit: u64,
    /// Native token price in micro-USD, for the fiat mirror of profits.
    pub sol_price_usd_micros: u64,
    /// Flat per-transaction compute figure for the fast pre-filter.
    pub fast_compute_per_tx: u64,
    /// Flat expected gross profit for the fast pre-filter, lamports.
    pub fast_gross_profit_lamports: u128,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 250,
            max_concurrent_simulations: 8,
            fee_per_compute_unit: 5_000,
            sol_price_usd_micros: 150_000_000,
            fast_compute_per_tx: 200_000,
            fast_gross_profit_lamports: 1_000_000,
        }
    }
}

/// Explicit validity result; validation never errors.
#[derive(Debug, Clone)]
pub struct BundleValidation {
    pub valid: bool,
    pub errors: Vec<String>,
}

/// Validate a bundle before simulation is attempted.
pub fn validate_bundle(bundle: &Bundle) -> BundleValidation {
    let mut errors = Vec::new();

    if bundle.transactions.is_empty() {
        errors.push("bundle contains no transactions".to_string());
    }
    if bundle.transactions.len() > MAX_BUNDLE_TRANSACTIONS {
        errors.push(format!(
            "bundle exceeds {} transactions ({})",
            MAX_BUNDLE_TRANSACTIONS,
            bundle.transactions.len()
        ));
    }
    for (index, tx) in bundle.transactions.iter().enumerate() {
        if tx.id.is_empty() || tx.sender.is_empty() {
            errors.push(format!("transaction {index} is malformed"));
        }
    }
    if bundle.target_slot == 0 {
        errors.push("target slot must be positive".to_string());
    }

    BundleValidation {
        valid: errors.is_empty(),
        errors,
    }
}

/// Aggregate outcome of a batch simulation.
#[derive(Debug, Clone, Default)]
pub struct BatchSimulationSummary {
    pub results: Vec<SimulationResult>,
    pub success_count: usize,
    pub total_net_profit_lamports: i128,
}

pub struct BundleSimulator {
    config: SimulationConfig,
    provider: Arc<dyn ForkProvider>,
    metrics: Arc<PipelineMetrics>,
    active_simulations: Arc<Semaphore>,
}

impl BundleSimulator {
    pub fn new(
        config: SimulationConfig,
        provider: Arc<dyn ForkProvider>,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        let permits = config.max_concurrent_simulations.max(1);
        Self {
            config,
            provider,
            metrics,
            active_simulations: Arc::new(Semaphore::new(permits)),
        }
    }

    /// Simulate one bundle. When `fork` is `None`, a fresh fork scoped to
    /// the bundle's target slot is created and released here; a supplied
    /// fork stays owned by the caller.
    ///
    /// This call never returns an error: deadline overruns and internal
    /// failures degrade to a failed [`SimulationResult`] carrying the
    /// error text.
    pub async fn simulate(
        &self,
        bundle: &Bundle,
        fork: Option<Arc<dyn StateFork>>,
    ) -> SimulationResult {
        let start = Instant::now();
        self.metrics.inc_simulations("attempted");

        let permit = match self.active_simulations.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                self.metrics.inc_simulations("error");
                return SimulationResult::failed(&bundle.id, "simulation engine is shut down");
            }
        };

        let (fork, owns_fork) = match fork {
            Some(fork) => (fork, false),
            None => match self.provider.create_fresh_fork(bundle.target_slot).await {
                Ok(fork) => (fork, true),
                Err(e) => {
                    self.metrics.inc_simulations("error");
                    return SimulationResult::failed(
                        &bundle.id,
                        format!("fork creation failed: {e:#}"),
                    );
                }
            },
        };

        let task_bundle = bundle.clone();
        let task_config = self.config.clone();
        let replay = tokio::spawn(async move {
            // The permit rides with the replay: a fork abandoned by a
            // timed-out caller still counts against the concurrency bound
            // until it is released below.
            let _permit = permit;
            let result = execute_bundle(fork.as_ref(), &task_bundle, &task_config).await;
            if owns_fork {
                if let Err(e) = fork.cleanup().await {
                    warn!(fork_id = %fork.id(), error = %e, "fork cleanup failed");
                }
            }
            result
        });

        let mut result = match timeout(Duration::from_millis(self.config.timeout_ms), replay).await
        {
            Ok(Ok(result)) => {
                self.metrics
                    .inc_simulations(if result.success { "success" } else { "failed" });
                result
            }
            Ok(Err(join_error)) => {
                self.metrics.inc_simulations("error");
                SimulationResult::failed(
                    &bundle.id,
                    format!("simulation task failed: {join_error}"),
                )
            }
            Err(_) => {
                self.metrics.inc_simulations("timeout");
                SimulationResult::failed(&bundle.id, "simulation deadline exceeded")
            }
        };

        result.simulation_time_ms = start.elapsed().as_secs_f64() * 1000.0;
        self.metrics.observe_simulation_latency(start.elapsed());

        debug!(
            bundle_id = %result.bundle_id,
            success = result.success,
            simulation_time_ms = format!("{:.2}", result.simulation_time_ms),
            net_profit_lamports = result.profit.net_profit_lamports,
            "bundle simulation completed"
        );

        result
    }

    /// Simulate many bundles in fixed-size groups of at most
    /// `max_concurrency`. Groups run strictly one after another: every
    /// in-flight simulation owns a fork, so the bound caps live snapshots,
    /// not just CPU.
    pub async fn simulate_parallel(
        &self,
        bundles: &[Bundle],
        max_concurrency: usize,
    ) -> BatchSimulationSummary {
        let mut results = Vec::with_capacity(bundles.len());

        for group in bundles.chunks(max_concurrency.max(1)) {
            let futures: Vec<_> = group.iter().map(|b| self.simulate(b, None)).collect();
            results.extend(futures::future::join_all(futures).await);
        }

        let success_count = results.iter().filter(|r| r.success).count();
        let total_net_profit_lamports = results
            .iter()
            .filter(|r| r.success)
            .map(|r| r.profit.net_profit_lamports)
            .sum();

        BatchSimulationSummary {
            results,
            success_count,
            total_net_profit_lamports,
        }
    }

    /// Cheap heuristic estimate used only to pre-filter before the
    /// expensive simulation. Deliberately inaccurate; never the final
    /// viability decision.
    pub fn estimate_profit_fast(&self, bundle: &Bundle) -> ProfitEstimate {
        let compute = self.config.fast_compute_per_tx * bundle.transactions.len() as u64;
        let fee_cost = fee_lamports(compute, self.config.fee_per_compute_unit);
        let gross = self.config.fast_gross_profit_lamports as i128;
        let net = gross - fee_cost as i128;
        ProfitEstimate {
            gross_profit_lamports: gross,
            fee_cost_lamports: fee_cost,
            net_profit_lamports: net,
            net_profit_usd_micros: lamports_to_usd_micros_signed(
                net,
                self.config.sol_price_usd_micros,
            ),
            fee_rate_used: self.config.fee_per_compute_unit,
        }
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }
}

/// Priority fee in lamports for the given compute budget and rate.
pub fn fee_lamports(compute_units: u64, fee_per_compute_unit: u64) -> u128 {
    compute_units as u128 * fee_per_compute_unit as u128 / MICRO_LAMPORTS
}

/// Replay the bundle transactions in order against the fork. The first
/// failing transaction short-circuits the whole bundle; later entries are
/// never executed.
async fn execute_bundle(
    fork: &dyn StateFork,
    bundle: &Bundle,
    config: &SimulationConfig,
) -> SimulationResult {
    let payer = match bundle.payer() {
        Some(payer) => payer.to_string(),
        None => {
            let reason = if bundle.transactions.is_empty() {
                "bundle contains no transactions"
            } else {
                "unable to determine fee payer for bundle"
            };
            return SimulationResult::failed(&bundle.id, reason);
        }
    };

    let balance_before = match fork.balance_of(&payer).await {
        Ok(balance) => balance,
        Err(e) => {
            return SimulationResult::failed(&bundle.id, format!("payer balance query failed: {e:#}"))
        }
    };

    let mut total_compute = 0u64;
    let mut logs = Vec::new();

    for (index, tx) in bundle.transactions.iter().enumerate() {
        let execution = match fork.execute(tx).await {
            Ok(execution) => execution,
            Err(e) => {
                return SimulationResult::failed(
                    &bundle.id,
                    format!("transaction {index} execution error: {e:#}"),
                )
            }
        };

        if !execution.success {
            let revert_reason = decode_revert_reason(execution.error.as_deref());
            debug!(
                bundle_id = %bundle.id,
                tx_index = index,
                revert_reason = %revert_reason,
                "bundle transaction reverted"
            );
            return SimulationResult {
                bundle_id: bundle.id.clone(),
                success: false,
                profit: ProfitEstimate::default(),
                compute_units: total_compute + execution.compute_units,
                revert_reason: Some(revert_reason),
                logs: execution.logs,
                simulation_time_ms: 0.0,
                error: None,
            };
        }

        total_compute += execution.compute_units;
        logs.extend(execution.logs);
    }

    let balance_after = match fork.balance_of(&payer).await {
        Ok(balance) => balance,
        Err(e) => {
            return SimulationResult::failed(&bundle.id, format!("payer balance query failed: {e:#}"))
        }
    };

    let gross = balance_after as i128 - balance_before as i128;
    let fee_cost = fee_lamports(total_compute, config.fee_per_compute_unit);
    let net = gross - fee_cost as i128;

    SimulationResult {
        bundle_id: bundle.id.clone(),
        success: true,
        profit: ProfitEstimate {
            gross_profit_lamports: gross,
            fee_cost_lamports: fee_cost,
            net_profit_lamports: net,
            net_profit_usd_micros: lamports_to_usd_micros_signed(net, config.sol_price_usd_micros),
            fee_rate_used: config.fee_per_compute_unit,
        },
        compute_units: total_compute,
        revert_reason: None,
        logs,
        simulation_time_ms: 0.0,
        error: None,
    }
}

/// Turn a fork error message into a human-readable revert reason. Always
/// non-empty.
fn decode_revert_reason(error: Option<&str>) -> String {
    match error {
        Some(message) if message.contains("custom program error:") => message
            .split("custom program error:")
            .nth(1)
            .map(|suffix| format!("custom program error:{suffix}"))
            .unwrap_or_else(|| message.to_string()),
        Some(message) if !message.trim().is_empty() => message.trim().to_string(),
        _ => "transaction reverted without a reason".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BundleTransaction;

    fn create_test_tx(id: &str, sender: &str) -> BundleTransaction {
        BundleTransaction {
            id: id.to_string(),
            sender: sender.to_string(),
            recipient: "program".to_string(),
            lamports: 0,
            payload: vec![],
            compute_limit: 200_000,
            fee_rate: 5_000,
            label: "leg".to_string(),
        }
    }

    fn create_test_bundle(tx_count: usize, target_slot: u64) -> Bundle {
        Bundle {
            id: "bundle-1".to_string(),
            transactions: (0..tx_count)
                .map(|i| create_test_tx(&format!("tx-{i}"), "payer"))
                .collect(),
            target_slot,
            min_timestamp: 0,
            max_timestamp: 30,
        }
    }

    #[test]
    fn test_validate_rejects_empty_bundle() {
        let validation = validate_bundle(&create_test_bundle(0, 100));
        assert!(!validation.valid);
        assert!(validation.errors[0].contains("no transactions"));
    }

    #[test]
    fn test_validate_rejects_oversized_bundle() {
        let validation = validate_bundle(&create_test_bundle(6, 100));
        assert!(!validation.valid);
        assert!(validation.errors.iter().any(|e| e.contains("exceeds")));
    }

    #[test]
    fn test_validate_rejects_malformed_entry() {
        let mut bundle = create_test_bundle(2, 100);
        bundle.transactions[1].sender.clear();
        let validation = validate_bundle(&bundle);
        assert!(!validation.valid);
        assert!(validation.errors.iter().any(|e| e.contains("transaction 1")));
    }

    #[test]
    fn test_validate_rejects_zero_slot() {
        let validation = validate_bundle(&create_test_bundle(1, 0));
        assert!(!validation.valid);
        assert!(validation.errors.iter().any(|e| e.contains("target slot")));
    }

    #[test]
    fn test_validate_accepts_one_through_five() {
        for count in 1..=5 {
            let validation = validate_bundle(&create_test_bundle(count, 100));
            assert!(validation.valid, "bundle with {count} transactions rejected");
        }
    }

    #[test]
    fn test_fee_lamports() {
        // 400k CU at 5_000 micro-lamports/CU = 2_000 lamports
        assert_eq!(fee_lamports(400_000, 5_000), 2_000);
        assert_eq!(fee_lamports(0, 5_000), 0);
    }

    #[test]
    fn test_decode_revert_reason_always_non_empty() {
        assert_eq!(
            decode_revert_reason(Some("instruction failed: custom program error: 0x1771")),
            "custom program error: 0x1771"
        );
        assert_eq!(
            decode_revert_reason(Some("insufficient funds")),
            "insufficient funds"
        );
        assert_eq!(
            decode_revert_reason(None),
            "transaction reverted without a reason"
        );
        assert_eq!(
            decode_revert_reason(Some("   ")),
            "transaction reverted without a reason"
        );
    }
}
