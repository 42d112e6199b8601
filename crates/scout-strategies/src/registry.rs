//! Strategy registry and the production gate.
//!
//! Registration is static: the table is built once at startup. In
//! production mode the registry refuses a strategy that is not cleared for
//! production, and the same gate runs again before every detection
//! dispatch so an uncleared strategy can never execute outside simulation.

use std::sync::Arc;

use anyhow::{bail, Result};
use futures::future::join_all;
use scout_core::{ClassifiedTransaction, Opportunity, PipelineMetrics, Strategy};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Production,
    Simulation,
}

pub struct StrategyRegistry {
    mode: Mode,
    strategies: Vec<Arc<dyn Strategy>>,
    metrics: Arc<PipelineMetrics>,
}

impl StrategyRegistry {
    pub fn new(mode: Mode, metrics: Arc<PipelineMetrics>) -> Self {
        Self {
            mode,
            strategies: Vec::new(),
            metrics,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Register a strategy. In production mode an uncleared strategy is
    /// rejected with an error, never silently ignored.
    pub fn register(&mut self, strategy: Arc<dyn Strategy>) -> Result<()> {
        if self.mode == Mode::Production && !strategy.allowed_in_production() {
            bail!(
                "strategy '{}' is not cleared for production and cannot be registered",
                strategy.name()
            );
        }
        info!(
            strategy = strategy.name(),
            cleared = strategy.allowed_in_production(),
            "strategy registered"
        );
        self.strategies.push(strategy);
        Ok(())
    }

    /// Strategies cleared for production, in registration order.
    pub fn cleared_strategies(&self) -> Vec<Arc<dyn Strategy>> {
        self.strategies
            .iter()
            .filter(|s| s.allowed_in_production())
            .cloned()
            .collect()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Strategy>> {
        self.strategies.iter().find(|s| s.name() == name).cloned()
    }

    /// Hard safety gate: errors before any detection logic can run for a
    /// strategy that is blocked in the current mode.
    pub fn guard(&self, strategy: &dyn Strategy) -> Result<()> {
        if self.mode == Mode::Production && !strategy.allowed_in_production() {
            bail!(
                "strategy '{}' is blocked in production mode",
                strategy.name()
            );
        }
        Ok(())
    }

    /// Dispatch `detect` through the gate.
    pub async fn detect_with(
        &self,
        strategy: &dyn Strategy,
        txs: &[ClassifiedTransaction],
    ) -> Result<Option<Opportunity>> {
        self.guard(strategy)?;
        strategy.detect(txs).await
    }

    /// Run detection across all cleared strategies. Detection runs
    /// concurrently but results are collected in registration order, so
    /// the output is deterministic for a given input.
    pub async fn evaluate(&self, txs: &[ClassifiedTransaction]) -> Vec<Opportunity> {
        let cleared = self.cleared_strategies();
        if cleared.is_empty() {
            debug!("no cleared strategies to evaluate");
            return Vec::new();
        }

        let detections = cleared
            .iter()
            .map(|strategy| self.detect_with(strategy.as_ref(), txs));
        let results = join_all(detections).await;

        let mut opportunities = Vec::new();
        for (strategy, result) in cleared.iter().zip(results) {
            match result {
                Ok(Some(opportunity)) => {
                    self.metrics.inc_opportunities(strategy.name());
                    info!(
                        strategy = strategy.name(),
                        opportunity_id = %opportunity.id,
                        expected_net_profit_lamports = opportunity.expected_net_profit_lamports,
                        "strategy claimed opportunity"
                    );
                    opportunities.push(opportunity);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(
                        strategy = strategy.name(),
                        error = %format!("{e:#}"),
                        "strategy detection failed"
                    );
                }
            }
        }
        opportunities
    }
}
