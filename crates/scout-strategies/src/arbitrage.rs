//! Cross-venue arbitrage strategy.
//!
//! Watches observed DEX swaps, compares the traded token's price across
//! two venues and claims an opportunity when the gap clears the basis-point
//! threshold and the net profit clears the fiat floor. The resulting
//! bundle is always two transactions: acquire on the cheap venue, dispose
//! on the expensive one.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use scout_core::fork::StateFork;
use scout_core::{
    encode_swap_payload, fee_lamports, lamports_to_usd_micros, Bundle, BundleTransaction,
    ClassifiedTransaction, Opportunity, OpportunityKind, PricingOracle, ProfitEstimate, Strategy,
    TxKind,
};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct ArbitrageConfig {
    pub venue_a: String,
    pub venue_b: String,
    /// Venue name -> router program the bundle legs are sent to.
    pub routers: HashMap<String, String>,
    /// Minimum cross-venue gap worth acting on, basis points.
    pub min_delta_bps: u64,
    /// Fiat floor on expected net profit, micro-USD.
    pub min_net_profit_usd_micros: u128,
    pub max_trade_lamports: u128,
    pub protocol_tip_lamports: u128,
    pub fee_per_compute_unit: u64,
    pub compute_per_leg: u64,
    /// Account funding the bundle legs.
    pub payer: String,
    pub sol_price_usd_micros: u64,
}

impl Default for ArbitrageConfig {
    fn default() -> Self {
        let mut routers = HashMap::new();
        routers.insert(
            "raydium".to_string(),
            "675kPX9MHTjS2zt1qfr1NYHuzeLXfQM9H24wFSUt1Mp8".to_string(),
        );
        routers.insert(
            "orca".to_string(),
            "whirLbMiicVdio4qvUfM5KAg6Ct8VwpYzGff3uctyCc".to_string(),
        );
        Self {
            venue_a: "raydium".to_string(),
            venue_b: "orca".to_string(),
            routers,
            min_delta_bps: 25,
            min_net_profit_usd_micros: 1_000_000, // $1
            max_trade_lamports: 50 * scout_core::LAMPORTS_PER_SOL,
            protocol_tip_lamports: 10_000,
            fee_per_compute_unit: 5_000,
            compute_per_leg: 200_000,
            payer: String::new(),
            sol_price_usd_micros: 150_000_000,
        }
    }
}

pub struct CrossVenueArbitrage {
    config: ArbitrageConfig,
    oracle: Arc<dyn PricingOracle>,
}

impl CrossVenueArbitrage {
    pub fn new(config: ArbitrageConfig, oracle: Arc<dyn PricingOracle>) -> Self {
        Self { config, oracle }
    }

    fn router(&self, venue: &str) -> Result<String> {
        self.config
            .routers
            .get(venue)
            .cloned()
            .ok_or_else(|| anyhow!("no router configured for venue '{venue}'"))
    }

    async fn evaluate_swap(&self, tx: &ClassifiedTransaction) -> Result<Option<Opportunity>> {
        let Some(token_out) = tx.swap.token_out.clone() else {
            return Ok(None);
        };
        let token_in = tx.swap.token_in.clone().unwrap_or_default();
        let Some(observed_amount) = tx.swap.amount_in else {
            return Ok(None);
        };
        let amount = observed_amount.min(self.config.max_trade_lamports);
        if amount == 0 {
            return Ok(None);
        }

        let price_a = self
            .oracle
            .get_price(&self.config.venue_a, &token_out)
            .await?;
        let price_b = self
            .oracle
            .get_price(&self.config.venue_b, &token_out)
            .await?;
        let low = price_a.min(price_b);
        let high = price_a.max(price_b);
        if low == 0 {
            return Ok(None);
        }

        let delta_bps = ((high - low) as u128 * 10_000 / low as u128) as u64;
        if delta_bps < self.config.min_delta_bps {
            return Ok(None);
        }

        // Gross: tradable amount times the relative price gap.
        let gross_lamports = amount * delta_bps as u128 / 10_000;
        let compute_estimate = self.config.compute_per_leg * 2;
        let fee_cost = fee_lamports(compute_estimate, self.config.fee_per_compute_unit)
            + self.config.protocol_tip_lamports;
        if gross_lamports <= fee_cost {
            return Ok(None);
        }
        let net_lamports = gross_lamports - fee_cost;
        let net_usd_micros =
            lamports_to_usd_micros(net_lamports, self.config.sol_price_usd_micros);
        if net_usd_micros <= self.config.min_net_profit_usd_micros {
            debug!(
                tx_signature = %tx.transaction.signature,
                net_usd_micros,
                floor = self.config.min_net_profit_usd_micros,
                "cross-venue gap below profit floor"
            );
            return Ok(None);
        }

        let (buy_venue, sell_venue) = if price_a <= price_b {
            (self.config.venue_a.clone(), self.config.venue_b.clone())
        } else {
            (self.config.venue_b.clone(), self.config.venue_a.clone())
        };

        let confidence = if delta_bps >= self.config.min_delta_bps * 2 {
            0.9
        } else {
            0.75
        };

        Ok(Some(Opportunity {
            id: format!("arb_{}", Uuid::new_v4()),
            strategy: self.name().to_string(),
            kind: OpportunityKind::CrossVenue {
                buy_venue,
                sell_venue,
                token_in,
                token_out,
                amount_lamports: amount,
                delta_bps,
            },
            expected_net_profit_lamports: net_lamports,
            expected_net_profit_usd_micros: net_usd_micros,
            fee_cost_lamports: fee_cost,
            compute_estimate,
            target_slot: tx.transaction.slot + 1,
            confidence,
        }))
    }
}

#[async_trait]
impl Strategy for CrossVenueArbitrage {
    fn name(&self) -> &str {
        "cross-venue-arbitrage"
    }

    fn description(&self) -> &str {
        "captures price gaps for the same pair across two venues"
    }

    fn allowed_in_production(&self) -> bool {
        true
    }

    async fn detect(&self, txs: &[ClassifiedTransaction]) -> Result<Option<Opportunity>> {
        for tx in txs.iter().filter(|t| t.kind == TxKind::DexSwap) {
            match self.evaluate_swap(tx).await {
                Ok(Some(opportunity)) => return Ok(Some(opportunity)),
                Ok(None) => {}
                Err(e) => {
                    debug!(
                        tx_signature = %tx.transaction.signature,
                        error = %format!("{e:#}"),
                        "price lookup failed, skipping swap"
                    );
                }
            }
        }
        Ok(None)
    }

    fn build_bundle(&self, opportunity: &Opportunity) -> Result<Bundle> {
        let OpportunityKind::CrossVenue {
            buy_venue,
            sell_venue,
            token_in,
            token_out,
            amount_lamports,
            ..
        } = &opportunity.kind
        else {
            bail!("invalid opportunity kind for cross-venue arbitrage");
        };

        let amount = (*amount_lamports).min(u64::MAX as u128) as u64;
        let acquire = BundleTransaction {
            id: format!("acq_{}", Uuid::new_v4()),
            sender: self.config.payer.clone(),
            recipient: self.router(buy_venue)?,
            lamports: *amount_lamports,
            payload: encode_swap_payload(amount, token_in, token_out),
            compute_limit: self.config.compute_per_leg,
            fee_rate: self.config.fee_per_compute_unit,
            label: "acquire".to_string(),
        };
        let dispose = BundleTransaction {
            id: format!("dsp_{}", Uuid::new_v4()),
            sender: self.config.payer.clone(),
            recipient: self.router(sell_venue)?,
            lamports: 0,
            payload: encode_swap_payload(amount, token_out, token_in),
            compute_limit: self.config.compute_per_leg,
            fee_rate: self.config.fee_per_compute_unit,
            label: "dispose".to_string(),
        };

        let now = Utc::now().timestamp().max(0) as u64;
        Ok(Bundle {
            id: format!("bundle_{}", Uuid::new_v4()),
            transactions: vec![acquire, dispose],
            target_slot: opportunity.target_slot,
            min_timestamp: now,
            max_timestamp: now + 30,
        })
    }

    async fn estimate_profit(
        &self,
        bundle: &Bundle,
        fork: &dyn StateFork,
    ) -> Result<ProfitEstimate> {
        crate::estimate::replay_estimate(
            fork,
            bundle,
            self.config.compute_per_leg * bundle.transactions.len() as u64,
            self.config.fee_per_compute_unit,
            self.config.sol_price_usd_micros,
        )
        .await
    }
}
