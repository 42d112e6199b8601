//! Pricing oracle contract.

use anyhow::Result;
use async_trait::async_trait;

/// Venue-scoped price source.
///
/// Prices are integer micro-USD per whole token. Implementations are
/// pluggable; the only contract on any model layered on top of these
/// prices is monotonicity: a larger trade never produces a smaller
/// estimated price impact.
#[async_trait]
pub trait PricingOracle: Send + Sync {
    async fn get_price(&self, venue: &str, token: &str) -> Result<u64>;
}
