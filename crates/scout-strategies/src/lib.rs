//! Scout strategies - opportunity detection and the production-gated
//! strategy registry.

pub mod arbitrage;
mod estimate;
pub mod pricing;
pub mod registry;
pub mod sandwich;

pub use arbitrage::{ArbitrageConfig, CrossVenueArbitrage};
pub use pricing::{ConstantProductImpact, HttpPriceOracle, PriceImpactModel};
pub use registry::{Mode, StrategyRegistry};
pub use sandwich::{SandwichConfig, SandwichStrategy};
