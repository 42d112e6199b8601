//! Data source contract and notification parsing.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scout_core::PendingTransaction;
use serde_json::Value;
use tokio::sync::mpsc;

/// Opaque notification payload as delivered by a source.
pub type RawNotification = Value;

/// A live feed of pending-transaction notifications.
///
/// Transport mechanics live inside the adapter; the ingestion service only
/// sees connect/subscribe/unsubscribe plus an opaque notification stream.
#[async_trait]
pub trait DataSource: Send + Sync {
    fn name(&self) -> &str;

    async fn connect(&self) -> Result<()>;

    /// Establish the event subscription and return the notification
    /// stream. The stream ending is treated as a disconnect by the caller.
    async fn subscribe(&self) -> Result<mpsc::UnboundedReceiver<RawNotification>>;

    async fn unsubscribe(&self) -> Result<()>;
}

/// Converts raw notifications into [`PendingTransaction`] records.
#[derive(Debug, Default, Clone)]
pub struct NotificationParser;

impl NotificationParser {
    pub fn new() -> Self {
        Self
    }

    pub fn parse(&self, raw: &RawNotification) -> Result<PendingTransaction> {
        let signature = required_str(raw, "signature")?;
        let sender = required_str(raw, "sender")?;
        let recipient = raw["recipient"].as_str().unwrap_or_default().to_string();

        let payload = match raw["payload"].as_str() {
            Some(encoded) => hex::decode(encoded.trim_start_matches("0x"))
                .context("payload is not valid hex")?,
            None => Vec::new(),
        };

        let timestamp = raw["timestamp"]
            .as_i64()
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
            .unwrap_or_else(Utc::now);

        Ok(PendingTransaction {
            signature,
            sender,
            recipient,
            payload,
            lamports: number_u128(raw, "lamports"),
            fee_rate: number_u128(raw, "feeRate") as u64,
            compute_limit: number_u128(raw, "computeLimit") as u64,
            slot: number_u128(raw, "slot") as u64,
            timestamp,
        })
    }
}

fn required_str(raw: &Value, field: &str) -> Result<String> {
    raw[field]
        .as_str()
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| anyhow!("notification missing field '{field}'"))
}

/// Numeric fields arrive either as JSON numbers or decimal strings.
fn number_u128(raw: &Value, field: &str) -> u128 {
    match &raw[field] {
        Value::Number(n) => n.as_u64().map(u128::from).unwrap_or(0),
        Value::String(s) => s.parse().unwrap_or(0),
        _ => 0,
    }
}
