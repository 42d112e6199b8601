//! Fork lifecycle and replay-order tests for the bundle simulation engine.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use scout_core::fork::{ForkProvider, StateFork, TxExecution};
use scout_core::{
    Bundle, BundleSimulator, BundleTransaction, PipelineMetrics, SimulationConfig,
};

#[derive(Default)]
struct MockForkState {
    cleanup_calls: AtomicUsize,
    execute_calls: AtomicUsize,
    concurrent_now: AtomicUsize,
    concurrent_peak: AtomicUsize,
}

struct MockFork {
    state: Arc<MockForkState>,
    balance_queries: AtomicUsize,
    balance_before: u128,
    balance_after: u128,
    compute_per_tx: u64,
    fail_at: Option<usize>,
    execute_delay: Option<Duration>,
}

impl MockFork {
    fn new(state: Arc<MockForkState>) -> Self {
        Self {
            state,
            balance_queries: AtomicUsize::new(0),
            balance_before: 1_000_000,
            balance_after: 1_500_000,
            compute_per_tx: 200_000,
            fail_at: None,
            execute_delay: None,
        }
    }
}

#[async_trait]
impl StateFork for MockFork {
    fn id(&self) -> &str {
        "mock-fork"
    }

    async fn balance_of(&self, _account: &str) -> Result<u128> {
        let queries = self.balance_queries.fetch_add(1, Ordering::SeqCst);
        Ok(if queries == 0 {
            self.balance_before
        } else {
            self.balance_after
        })
    }

    async fn execute(&self, tx: &BundleTransaction) -> Result<TxExecution> {
        let index = self.state.execute_calls.fetch_add(1, Ordering::SeqCst);
        let now = self.state.concurrent_now.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.concurrent_peak.fetch_max(now, Ordering::SeqCst);

        if let Some(delay) = self.execute_delay {
            tokio::time::sleep(delay).await;
        }
        self.state.concurrent_now.fetch_sub(1, Ordering::SeqCst);

        if self.fail_at == Some(index) {
            return Ok(TxExecution {
                success: false,
                compute_units: 0,
                logs: vec![format!("log: {} aborted", tx.id)],
                error: Some("instruction failed: custom program error: 0x1771".to_string()),
            });
        }
        Ok(TxExecution {
            success: true,
            compute_units: self.compute_per_tx,
            logs: vec![format!("log: {} ok", tx.id)],
            error: None,
        })
    }

    async fn cleanup(&self) -> Result<()> {
        self.state.cleanup_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct MockForkProvider {
    state: Arc<MockForkState>,
    fail_at: Option<usize>,
    execute_delay: Option<Duration>,
}

impl MockForkProvider {
    fn new(state: Arc<MockForkState>) -> Self {
        Self {
            state,
            fail_at: None,
            execute_delay: None,
        }
    }
}

#[async_trait]
impl ForkProvider for MockForkProvider {
    async fn create_fresh_fork(&self, _slot: u64) -> Result<Arc<dyn StateFork>> {
        let mut fork = MockFork::new(self.state.clone());
        fork.fail_at = self.fail_at;
        fork.execute_delay = self.execute_delay;
        Ok(Arc::new(fork))
    }
}

fn create_test_bundle(tx_count: usize) -> Bundle {
    Bundle {
        id: "bundle-1".to_string(),
        transactions: (0..tx_count)
            .map(|i| BundleTransaction {
                id: format!("tx-{i}"),
                sender: "payer".to_string(),
                recipient: "program".to_string(),
                lamports: 0,
                payload: vec![],
                compute_limit: 200_000,
                fee_rate: 5_000,
                label: "leg".to_string(),
            })
            .collect(),
        target_slot: 100,
        min_timestamp: 0,
        max_timestamp: 30,
    }
}

fn create_simulator(provider: MockForkProvider, timeout_ms: u64) -> BundleSimulator {
    let config = SimulationConfig {
        timeout_ms,
        max_concurrent_simulations: 8,
        fee_per_compute_unit: 5_000,
        sol_price_usd_micros: 150_000_000,
        ..Default::default()
    };
    BundleSimulator::new(
        config,
        Arc::new(provider),
        Arc::new(PipelineMetrics::new().unwrap()),
    )
}

#[tokio::test]
async fn test_success_path_releases_fork_once_and_reports_profit() {
    let state = Arc::new(MockForkState::default());
    let simulator = create_simulator(MockForkProvider::new(state.clone()), 1_000);

    let result = simulator.simulate(&create_test_bundle(2), None).await;

    assert!(result.success, "error: {:?}", result.error);
    assert_eq!(state.cleanup_calls.load(Ordering::SeqCst), 1);
    assert_eq!(state.execute_calls.load(Ordering::SeqCst), 2);
    assert_eq!(result.compute_units, 400_000);
    // Balance delta 500_000 minus 400k CU at 5_000 micro-lamports/CU.
    assert_eq!(result.profit.gross_profit_lamports, 500_000);
    assert_eq!(result.profit.fee_cost_lamports, 2_000);
    assert_eq!(result.profit.net_profit_lamports, 498_000);
    assert_eq!(result.profit.net_profit_usd_micros, 74_700);
    assert_eq!(result.logs.len(), 2);
}

#[tokio::test]
async fn test_failing_transaction_short_circuits_the_bundle() {
    let state = Arc::new(MockForkState::default());
    let mut provider = MockForkProvider::new(state.clone());
    provider.fail_at = Some(1);
    let simulator = create_simulator(provider, 1_000);

    let result = simulator.simulate(&create_test_bundle(4), None).await;

    assert!(!result.success);
    let reason = result.revert_reason.expect("revert reason must be set");
    assert!(!reason.is_empty());
    assert!(reason.contains("custom program error: 0x1771"));
    // No profit on failure.
    assert_eq!(result.profit.net_profit_lamports, 0);
    assert_eq!(result.profit.gross_profit_lamports, 0);
    // Transactions after the failing one are never attempted.
    assert_eq!(state.execute_calls.load(Ordering::SeqCst), 2);
    // The failing transaction's logs are surfaced.
    assert_eq!(result.logs, vec!["log: tx-1 aborted".to_string()]);
    // The self-created fork is still released exactly once.
    assert_eq!(state.cleanup_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_timeout_degrades_and_fork_is_released_on_eventual_completion() {
    let state = Arc::new(MockForkState::default());
    let mut provider = MockForkProvider::new(state.clone());
    provider.execute_delay = Some(Duration::from_millis(60));
    let simulator = create_simulator(provider, 20);

    let result = simulator.simulate(&create_test_bundle(1), None).await;

    assert!(!result.success);
    assert!(result
        .error
        .as_deref()
        .unwrap_or_default()
        .contains("deadline"));
    // The replay is still running; its fork is not released yet.
    assert_eq!(state.cleanup_calls.load(Ordering::SeqCst), 0);

    // Once the abandoned replay completes it must release the fork.
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(state.cleanup_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_caller_supplied_fork_is_never_released() {
    let state = Arc::new(MockForkState::default());
    let simulator = create_simulator(MockForkProvider::new(state.clone()), 1_000);
    let fork: Arc<dyn StateFork> = Arc::new(MockFork::new(state.clone()));

    let result = simulator.simulate(&create_test_bundle(1), Some(fork)).await;

    assert!(result.success);
    assert_eq!(state.cleanup_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_empty_bundle_fails_fast_with_descriptive_error() {
    let state = Arc::new(MockForkState::default());
    let simulator = create_simulator(MockForkProvider::new(state.clone()), 1_000);

    let result = simulator.simulate(&create_test_bundle(0), None).await;

    assert!(!result.success);
    assert!(result
        .error
        .as_deref()
        .unwrap_or_default()
        .contains("no transactions"));
    // Fork was created for the attempt and must still be released.
    assert_eq!(state.cleanup_calls.load(Ordering::SeqCst), 1);
    assert_eq!(state.execute_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_parallel_groups_bound_concurrent_forks() {
    let state = Arc::new(MockForkState::default());
    let mut provider = MockForkProvider::new(state.clone());
    provider.execute_delay = Some(Duration::from_millis(20));
    let simulator = create_simulator(provider, 5_000);

    let bundles: Vec<Bundle> = (0..6).map(|_| create_test_bundle(1)).collect();
    let summary = simulator.simulate_parallel(&bundles, 2).await;

    assert_eq!(summary.results.len(), 6);
    assert_eq!(summary.success_count, 6);
    assert_eq!(summary.total_net_profit_lamports, 6 * 499_000);
    assert!(
        state.concurrent_peak.load(Ordering::SeqCst) <= 2,
        "group size must cap concurrent simulations, peak was {}",
        state.concurrent_peak.load(Ordering::SeqCst)
    );
    // One fork per bundle, each released exactly once.
    assert_eq!(state.cleanup_calls.load(Ordering::SeqCst), 6);
}
