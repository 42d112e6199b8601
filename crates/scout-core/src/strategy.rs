//! Strategy contract and opportunity types.
//!
//! Kept in the core crate so the strategy implementations and the pipeline
//! glue can share them without a circular dependency.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::fork::StateFork;
use crate::types::{Bundle, ClassifiedTransaction, PendingTransaction, ProfitEstimate};

/// A strategy's claim that a profitable bundle exists. Produced by
/// [`Strategy::detect`], consumed within one processing cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Opportunity {
    pub id: String,
    pub strategy: String,
    pub kind: OpportunityKind,
    pub expected_net_profit_lamports: u128,
    pub expected_net_profit_usd_micros: u128,
    pub fee_cost_lamports: u128,
    pub compute_estimate: u64,
    pub target_slot: u64,
    /// Confidence in [0, 1].
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OpportunityKind {
    /// The same pair trades at different prices on two venues.
    CrossVenue {
        buy_venue: String,
        sell_venue: String,
        token_in: String,
        token_out: String,
        amount_lamports: u128,
        delta_bps: u64,
    },
    /// A large observed swap whose price impact can be captured by
    /// inserting transactions around it.
    Sandwich {
        target: PendingTransaction,
        insertion_lamports: u128,
        impact_bps: u64,
    },
}

/// Polymorphic opportunity source.
///
/// The production clearance flag is set at construction and never changes;
/// the registry enforces it before any detection logic runs.
#[async_trait]
pub trait Strategy: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn allowed_in_production(&self) -> bool;

    /// Inspect a batch of classified transactions and claim at most one
    /// opportunity.
    async fn detect(&self, txs: &[ClassifiedTransaction]) -> Result<Option<Opportunity>>;

    /// Materialize the opportunity into an ordered bundle. Transaction
    /// order is part of the strategy's semantics and must be preserved by
    /// every downstream consumer.
    fn build_bundle(&self, opportunity: &Opportunity) -> Result<Bundle>;

    /// Profit estimate for a bundle against the given fork. Must agree
    /// with the simulation engine's figure for the same bundle up to the
    /// fee-estimation tolerance.
    async fn estimate_profit(
        &self,
        bundle: &Bundle,
        fork: &dyn StateFork,
    ) -> Result<ProfitEstimate>;
}
