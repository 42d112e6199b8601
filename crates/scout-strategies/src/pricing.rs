//! Price impact model and the HTTP pricing oracle client.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use scout_core::PricingOracle;
use serde_json::Value;

/// Pluggable price-impact estimate.
///
/// The only contract is monotonicity: a larger trade never yields a
/// smaller impact. The formula itself is an implementation choice.
pub trait PriceImpactModel: Send + Sync {
    /// Estimated price impact of a trade, in basis points.
    fn impact_bps(&self, trade_lamports: u128) -> u64;
}

/// Constant-product style impact: linear in trade size relative to pool
/// depth, capped.
#[derive(Debug, Clone)]
pub struct ConstantProductImpact {
    pub pool_depth_lamports: u128,
    pub max_impact_bps: u64,
}

impl Default for ConstantProductImpact {
    fn default() -> Self {
        Self {
            // 10k SOL of depth, impact capped at 15%.
            pool_depth_lamports: 10_000 * scout_core::LAMPORTS_PER_SOL,
            max_impact_bps: 1_500,
        }
    }
}

impl PriceImpactModel for ConstantProductImpact {
    fn impact_bps(&self, trade_lamports: u128) -> u64 {
        if self.pool_depth_lamports == 0 {
            return self.max_impact_bps;
        }
        let bps = trade_lamports.saturating_mul(10_000) / self.pool_depth_lamports;
        (bps.min(self.max_impact_bps as u128)) as u64
    }
}

/// Thin client for an external price feed:
/// `GET {base}/price?venue=..&token=..` -> `{"priceUsdMicros": n}`.
pub struct HttpPriceOracle {
    base_url: String,
    client: reqwest::Client,
}

impl HttpPriceOracle {
    pub fn new(base_url: String, request_timeout_ms: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(request_timeout_ms))
            .build()
            .context("failed to build price oracle HTTP client")?;
        Ok(Self { base_url, client })
    }
}

#[async_trait]
impl PricingOracle for HttpPriceOracle {
    async fn get_price(&self, venue: &str, token: &str) -> Result<u64> {
        let response: Value = self
            .client
            .get(format!("{}/price", self.base_url))
            .query(&[("venue", venue), ("token", token)])
            .send()
            .await
            .context("price feed unreachable")?
            .json()
            .await
            .context("invalid price feed response")?;

        response["priceUsdMicros"]
            .as_u64()
            .ok_or_else(|| anyhow!("price feed response missing priceUsdMicros"))
    }
}
