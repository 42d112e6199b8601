//! Shared data model for the detect -> simulate -> submit pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Base units per whole native token.
pub const LAMPORTS_PER_SOL: u128 = 1_000_000_000;

/// Relay bundles are capped at five transactions.
pub const MAX_BUNDLE_TRANSACTIONS: usize = 5;

/// Micro-lamports per lamport, the denominator of priority fee rates.
pub const MICRO_LAMPORTS: u128 = 1_000_000;

/// A raw candidate transaction observed on one of the data sources.
///
/// Created once by the ingestion layer and never mutated afterwards; the
/// classifier consumes it exactly once per processing cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingTransaction {
    pub signature: String,
    pub sender: String,
    /// Target program; empty for deployments.
    pub recipient: String,
    #[serde(with = "hex_bytes")]
    pub payload: Vec<u8>,
    pub lamports: u128,
    /// Priority fee rate in micro-lamports per compute unit.
    pub fee_rate: u64,
    pub compute_limit: u64,
    pub slot: u64,
    pub timestamp: DateTime<Utc>,
}

/// Semantic transaction category assigned by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxKind {
    Transfer,
    DexSwap,
    ContractDeployment,
    Unknown,
}

/// Best-effort decoded swap fields. Decoding failures leave fields unset,
/// they never fail classification.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SwapDetails {
    pub protocol: Option<String>,
    pub token_in: Option<String>,
    pub token_out: Option<String>,
    pub amount_in: Option<u128>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifiedTransaction {
    pub transaction: PendingTransaction,
    pub kind: TxKind,
    pub swap: SwapDetails,
}

/// One entry of a bundle: an unsigned transaction template. Signing and
/// byte-level encoding live behind the relay codec.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleTransaction {
    pub id: String,
    pub sender: String,
    pub recipient: String,
    pub lamports: u128,
    #[serde(with = "hex_bytes")]
    pub payload: Vec<u8>,
    pub compute_limit: u64,
    pub fee_rate: u64,
    /// Role of this entry inside the bundle, e.g. "acquire" or "lead".
    pub label: String,
}

/// Ordered transaction sequence intended for atomic inclusion in a single
/// slot. The order is semantically load-bearing: nothing downstream may
/// reorder `transactions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bundle {
    pub id: String,
    pub transactions: Vec<BundleTransaction>,
    pub target_slot: u64,
    pub min_timestamp: u64,
    pub max_timestamp: u64,
}

impl Bundle {
    /// Fee payer of the bundle: the sender of the first transaction.
    pub fn payer(&self) -> Option<&str> {
        self.transactions
            .first()
            .map(|tx| tx.sender.as_str())
            .filter(|s| !s.is_empty())
    }
}

/// Money accounting for one bundle, in native units plus a fiat mirror.
/// All comparisons happen on the integer fields; the fiat mirror is integer
/// micro-USD so no float ever enters a threshold check.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfitEstimate {
    pub gross_profit_lamports: i128,
    pub fee_cost_lamports: u128,
    pub net_profit_lamports: i128,
    pub net_profit_usd_micros: i128,
    /// Fee rate the estimate was computed with, micro-lamports per compute unit.
    pub fee_rate_used: u64,
}

/// Outcome of simulating one bundle against an isolated fork.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationResult {
    pub bundle_id: String,
    pub success: bool,
    pub profit: ProfitEstimate,
    pub compute_units: u64,
    pub revert_reason: Option<String>,
    pub logs: Vec<String>,
    pub simulation_time_ms: f64,
    pub error: Option<String>,
}

impl SimulationResult {
    /// Structured failure carrying the error text; no profit is reported.
    pub fn failed(bundle_id: &str, error: impl Into<String>) -> Self {
        Self {
            bundle_id: bundle_id.to_string(),
            success: false,
            profit: ProfitEstimate::default(),
            compute_units: 0,
            revert_reason: None,
            logs: Vec::new(),
            simulation_time_ms: 0.0,
            error: Some(error.into()),
        }
    }
}

/// Convert a lamport amount into integer micro-USD using the configured
/// native token price.
pub fn lamports_to_usd_micros(lamports: u128, sol_price_usd_micros: u64) -> u128 {
    lamports.saturating_mul(sol_price_usd_micros as u128) / LAMPORTS_PER_SOL
}

/// Signed variant for profit deltas.
pub fn lamports_to_usd_micros_signed(lamports: i128, sol_price_usd_micros: u64) -> i128 {
    let magnitude = lamports_to_usd_micros(lamports.unsigned_abs(), sol_price_usd_micros) as i128;
    if lamports < 0 {
        -magnitude
    } else {
        magnitude
    }
}

/// Display-only conversion; the pipeline never compares on this value.
pub fn usd_micros_display(usd_micros: i128) -> f64 {
    usd_micros as f64 / 1e6
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        hex::decode(raw.trim_start_matches("0x")).map_err(serde::de::Error::custom)
    }
}
