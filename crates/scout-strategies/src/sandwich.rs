//! Sandwich strategy.
//!
//! Ordering-dependent: a large observed swap becomes the target, and the
//! bundle wraps it with a lead and a trail transaction in that fixed
//! order. Blocked in production unless explicitly enabled at
//! construction; that switch is a standalone safety decision, not a
//! tuning knob.

use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use scout_core::fork::StateFork;
use scout_core::{
    encode_swap_payload, fee_lamports, lamports_to_usd_micros, Bundle, BundleTransaction,
    ClassifiedTransaction, Opportunity, OpportunityKind, PendingTransaction, ProfitEstimate,
    Strategy, TxKind,
};
use tracing::debug;
use uuid::Uuid;

use crate::pricing::PriceImpactModel;

#[derive(Debug, Clone)]
pub struct SandwichConfig {
    /// Explicit production enablement; defaults to off.
    pub enabled_for_production: bool,
    /// Floor on the target swap's notional, micro-USD.
    pub min_target_usd_micros: u128,
    /// Fiat floor on expected net profit, micro-USD.
    pub min_net_profit_usd_micros: u128,
    /// Insertion size as a fraction of the target, basis points.
    pub insertion_fraction_bps: u64,
    /// Share of the price impact the insertion actually captures,
    /// basis points.
    pub efficiency_bps: u64,
    pub protocol_tip_lamports: u128,
    pub fee_per_compute_unit: u64,
    pub compute_per_tx: u64,
    pub payer: String,
    pub sol_price_usd_micros: u64,
}

impl Default for SandwichConfig {
    fn default() -> Self {
        Self {
            enabled_for_production: false,
            min_target_usd_micros: 1_000_000_000, // $1000 target floor
            min_net_profit_usd_micros: 10_000_000, // $10 profit floor
            insertion_fraction_bps: 2_500,
            efficiency_bps: 4_000,
            protocol_tip_lamports: 10_000,
            fee_per_compute_unit: 5_000,
            compute_per_tx: 200_000,
            payer: String::new(),
            sol_price_usd_micros: 150_000_000,
        }
    }
}

pub struct SandwichStrategy {
    config: SandwichConfig,
    impact: Arc<dyn PriceImpactModel>,
}

impl SandwichStrategy {
    pub fn new(config: SandwichConfig, impact: Arc<dyn PriceImpactModel>) -> Self {
        Self { config, impact }
    }

    fn evaluate_target(&self, tx: &ClassifiedTransaction) -> Option<Opportunity> {
        let amount = tx.swap.amount_in?;
        let notional_usd =
            lamports_to_usd_micros(amount, self.config.sol_price_usd_micros);
        if notional_usd < self.config.min_target_usd_micros {
            return None;
        }

        let insertion = amount * self.config.insertion_fraction_bps as u128 / 10_000;
        if insertion == 0 {
            return None;
        }
        // Impact of the combined flow hitting the pool ahead of the trail.
        let impact_bps = self.impact.impact_bps(amount + insertion);

        let gross_lamports = insertion * impact_bps as u128 * self.config.efficiency_bps as u128
            / 100_000_000;
        let compute_estimate = self.config.compute_per_tx * 3;
        let fee_cost = fee_lamports(compute_estimate, self.config.fee_per_compute_unit)
            + self.config.protocol_tip_lamports;
        if gross_lamports <= fee_cost {
            return None;
        }
        let net_lamports = gross_lamports - fee_cost;
        let net_usd_micros =
            lamports_to_usd_micros(net_lamports, self.config.sol_price_usd_micros);
        if net_usd_micros <= self.config.min_net_profit_usd_micros {
            debug!(
                tx_signature = %tx.transaction.signature,
                net_usd_micros,
                floor = self.config.min_net_profit_usd_micros,
                "sandwich candidate below profit floor"
            );
            return None;
        }

        let confidence = if net_usd_micros >= self.config.min_net_profit_usd_micros * 2 {
            0.9
        } else {
            0.75
        };

        Some(Opportunity {
            id: format!("sandwich_{}", Uuid::new_v4()),
            strategy: self.name().to_string(),
            kind: OpportunityKind::Sandwich {
                target: tx.transaction.clone(),
                insertion_lamports: insertion,
                impact_bps,
            },
            expected_net_profit_lamports: net_lamports,
            expected_net_profit_usd_micros: net_usd_micros,
            fee_cost_lamports: fee_cost,
            compute_estimate,
            target_slot: tx.transaction.slot + 1,
            confidence,
        })
    }

    fn insertion_leg(
        &self,
        target: &PendingTransaction,
        insertion: u128,
        label: &str,
        lamports: u128,
    ) -> BundleTransaction {
        let amount = insertion.min(u64::MAX as u128) as u64;
        BundleTransaction {
            id: format!("{label}_{}", Uuid::new_v4()),
            sender: self.config.payer.clone(),
            recipient: target.recipient.clone(),
            lamports,
            payload: encode_swap_payload(amount, "", ""),
            compute_limit: self.config.compute_per_tx,
            fee_rate: self.config.fee_per_compute_unit,
            label: label.to_string(),
        }
    }
}

#[async_trait]
impl Strategy for SandwichStrategy {
    fn name(&self) -> &str {
        "sandwich"
    }

    fn description(&self) -> &str {
        "wraps a large observed swap with a lead and a trail transaction"
    }

    fn allowed_in_production(&self) -> bool {
        self.config.enabled_for_production
    }

    async fn detect(&self, txs: &[ClassifiedTransaction]) -> Result<Option<Opportunity>> {
        for tx in txs.iter().filter(|t| t.kind == TxKind::DexSwap) {
            if let Some(opportunity) = self.evaluate_target(tx) {
                return Ok(Some(opportunity));
            }
        }
        Ok(None)
    }

    /// Always three transactions, in fixed order: lead, target, trail.
    /// The middle entry is the observed target transaction unchanged.
    fn build_bundle(&self, opportunity: &Opportunity) -> Result<Bundle> {
        let OpportunityKind::Sandwich {
            target,
            insertion_lamports,
            ..
        } = &opportunity.kind
        else {
            bail!("invalid opportunity kind for sandwich strategy");
        };

        let lead = self.insertion_leg(target, *insertion_lamports, "lead", *insertion_lamports);
        let target_tx = BundleTransaction {
            id: target.signature.clone(),
            sender: target.sender.clone(),
            recipient: target.recipient.clone(),
            lamports: target.lamports,
            payload: target.payload.clone(),
            compute_limit: target.compute_limit,
            fee_rate: target.fee_rate,
            label: "target".to_string(),
        };
        let trail = self.insertion_leg(target, *insertion_lamports, "trail", 0);

        let now = Utc::now().timestamp().max(0) as u64;
        Ok(Bundle {
            id: format!("bundle_{}", Uuid::new_v4()),
            transactions: vec![lead, target_tx, trail],
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
            self.config.compute_per_tx * bundle.transactions.len() as u64,
            self.config.fee_per_compute_unit,
            self.config.sol_price_usd_micros,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pricing::ConstantProductImpact;
    use scout_core::SwapDetails;

    fn create_swap(amount_lamports: u128) -> ClassifiedTransaction {
        ClassifiedTransaction {
            transaction: PendingTransaction {
                signature: "victim-sig".to_string(),
                sender: "trader".to_string(),
                recipient: "675kPX9MHTjS2zt1qfr1NYHuzeLXfQM9H24wFSUt1Mp8".to_string(),
                payload: vec![9, 1, 2, 3],
                lamports: 0,
                fee_rate: 7_000,
                compute_limit: 250_000,
                slot: 500,
                timestamp: Utc::now(),
            },
            kind: TxKind::DexSwap,
            swap: SwapDetails {
                protocol: Some("raydium".to_string()),
                token_in: Some("so1".to_string()),
                token_out: Some("usdc".to_string()),
                amount_in: Some(amount_lamports),
            },
        }
    }

    fn create_strategy(enabled_for_production: bool) -> SandwichStrategy {
        let config = SandwichConfig {
            enabled_for_production,
            payer: "scout-payer".to_string(),
            ..Default::default()
        };
        SandwichStrategy::new(config, Arc::new(ConstantProductImpact::default()))
    }

    #[test]
    fn test_production_clearance_follows_construction_flag() {
        assert!(!create_strategy(false).allowed_in_production());
        assert!(create_strategy(true).allowed_in_production());
    }

    #[tokio::test]
    async fn test_detect_claims_large_swap() {
        let strategy = create_strategy(false);
        // 100 SOL target ($15k notional, above the $1000 floor).
        let swap = create_swap(100 * scout_core::LAMPORTS_PER_SOL);
        let opportunity = strategy
            .detect(&[swap])
            .await
            .unwrap()
            .expect("large swap must be claimed");

        let OpportunityKind::Sandwich {
            target,
            insertion_lamports,
            impact_bps,
        } = &opportunity.kind
        else {
            panic!("wrong opportunity kind");
        };
        assert_eq!(target.signature, "victim-sig");
        // 25% of a 100 SOL target.
        assert_eq!(*insertion_lamports, 25 * scout_core::LAMPORTS_PER_SOL);
        // 125 SOL over 10k SOL depth = 125 bps of impact.
        assert_eq!(*impact_bps, 125);
        assert!(opportunity.expected_net_profit_usd_micros > 10_000_000);
    }

    #[tokio::test]
    async fn test_detect_ignores_small_targets() {
        let strategy = create_strategy(false);
        // 1 SOL notional is far below the target floor.
        let swap = create_swap(scout_core::LAMPORTS_PER_SOL);
        assert!(strategy.detect(&[swap]).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_bundle_is_lead_target_trail_with_verbatim_target() {
        let strategy = create_strategy(false);
        let swap = create_swap(100 * scout_core::LAMPORTS_PER_SOL);
        let opportunity = strategy.detect(&[swap.clone()]).await.unwrap().unwrap();

        let bundle = strategy.build_bundle(&opportunity).unwrap();
        assert_eq!(bundle.transactions.len(), 3);
        let labels: Vec<&str> = bundle
            .transactions
            .iter()
            .map(|tx| tx.label.as_str())
            .collect();
        assert_eq!(labels, vec!["lead", "target", "trail"]);

        // The middle entry is the observed transaction, untouched.
        let middle = &bundle.transactions[1];
        assert_eq!(middle.id, swap.transaction.signature);
        assert_eq!(middle.sender, swap.transaction.sender);
        assert_eq!(middle.payload, swap.transaction.payload);
        assert_eq!(middle.lamports, swap.transaction.lamports);
        assert_eq!(middle.fee_rate, swap.transaction.fee_rate);

        // Lead and trail are funded by the strategy payer.
        assert_eq!(bundle.transactions[0].sender, "scout-payer");
        assert_eq!(bundle.transactions[2].sender, "scout-payer");
    }
}
