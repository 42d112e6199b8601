//! Shared profit estimation by replay.
//!
//! Strategies estimate bundle profit the same way the simulation engine
//! measures it, as the payer's balance delta across an in-order replay.
//! The only divergence from the engine is the fee term: the estimate uses
//! the strategy's configured compute figure where the engine uses measured
//! compute units. That difference is the documented tolerance between the
//! two.

use anyhow::{anyhow, bail, Result};
use scout_core::fork::StateFork;
use scout_core::{fee_lamports, lamports_to_usd_micros_signed, Bundle, ProfitEstimate};

pub(crate) async fn replay_estimate(
    fork: &dyn StateFork,
    bundle: &Bundle,
    compute_estimate: u64,
    fee_per_compute_unit: u64,
    sol_price_usd_micros: u64,
) -> Result<ProfitEstimate> {
    let payer = bundle
        .payer()
        .ok_or_else(|| anyhow!("bundle has no fee payer"))?
        .to_string();

    let balance_before = fork.balance_of(&payer).await?;
    for (index, tx) in bundle.transactions.iter().enumerate() {
        let execution = fork.execute(tx).await?;
        if !execution.success {
            bail!(
                "bundle leg {index} failed during profit estimate: {}",
                execution.error.unwrap_or_else(|| "no reason".to_string())
            );
        }
    }
    let balance_after = fork.balance_of(&payer).await?;

    let gross = balance_after as i128 - balance_before as i128;
    let fee_cost = fee_lamports(compute_estimate, fee_per_compute_unit);
    let net = gross - fee_cost as i128;

    Ok(ProfitEstimate {
        gross_profit_lamports: gross,
        fee_cost_lamports: fee_cost,
        net_profit_lamports: net,
        net_profit_usd_micros: lamports_to_usd_micros_signed(net, sol_price_usd_micros),
        fee_rate_used: fee_per_compute_unit,
    })
}
