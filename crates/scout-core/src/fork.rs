//! Fork provider contract and the HTTP binding used in production.
//!
//! A fork is an isolated point-in-time snapshot of chain state. The
//! simulation engine only ever talks to these traits; the snapshot
//! implementation itself lives behind a service boundary.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::types::BundleTransaction;

/// Outcome of replaying a single transaction against a fork.
#[derive(Debug, Clone, Default)]
pub struct TxExecution {
    pub success: bool,
    pub compute_units: u64,
    pub logs: Vec<String>,
    pub error: Option<String>,
}

/// An ephemeral chain-state snapshot.
///
/// Ownership rule: whoever created the fork releases it. The simulation
/// engine calls `cleanup` exactly once on forks it created itself and never
/// on forks handed to it.
#[async_trait]
pub trait StateFork: Send + Sync {
    fn id(&self) -> &str;

    async fn balance_of(&self, account: &str) -> Result<u128>;

    /// Replay one transaction against the fork state.
    async fn execute(&self, tx: &BundleTransaction) -> Result<TxExecution>;

    /// Release the snapshot. Must be safe to call exactly once.
    async fn cleanup(&self) -> Result<()>;
}

#[async_trait]
pub trait ForkProvider: Send + Sync {
    /// Create a fresh fork scoped to the given slot.
    async fn create_fresh_fork(&self, slot: u64) -> Result<Arc<dyn StateFork>>;
}

/// REST client for an external fork service.
pub struct HttpForkProvider {
    base_url: String,
    client: reqwest::Client,
}

impl HttpForkProvider {
    pub fn new(base_url: String, request_timeout_ms: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(request_timeout_ms))
            .build()
            .context("failed to build fork service HTTP client")?;
        Ok(Self { base_url, client })
    }
}

#[async_trait]
impl ForkProvider for HttpForkProvider {
    async fn create_fresh_fork(&self, slot: u64) -> Result<Arc<dyn StateFork>> {
        let response: Value = self
            .client
            .post(format!("{}/forks", self.base_url))
            .json(&json!({ "slot": slot }))
            .send()
            .await
            .context("fork service unreachable")?
            .json()
            .await
            .context("invalid fork service response")?;

        let fork_id = response["forkId"]
            .as_str()
            .ok_or_else(|| anyhow!("fork service response missing forkId"))?
            .to_string();

        Ok(Arc::new(HttpStateFork {
            fork_id,
            base_url: self.base_url.clone(),
            client: self.client.clone(),
        }))
    }
}

struct HttpStateFork {
    fork_id: String,
    base_url: String,
    client: reqwest::Client,
}

impl HttpStateFork {
    fn fork_url(&self, suffix: &str) -> String {
        format!("{}/forks/{}{}", self.base_url, self.fork_id, suffix)
    }
}

#[async_trait]
impl StateFork for HttpStateFork {
    fn id(&self) -> &str {
        &self.fork_id
    }

    async fn balance_of(&self, account: &str) -> Result<u128> {
        let response: Value = self
            .client
            .get(self.fork_url(&format!("/balance/{account}")))
            .send()
            .await
            .context("balance query failed")?
            .json()
            .await
            .context("invalid balance response")?;

        response["lamports"]
            .as_str()
            .and_then(|s| s.parse::<u128>().ok())
            .or_else(|| response["lamports"].as_u64().map(u128::from))
            .ok_or_else(|| anyhow!("balance response missing lamports"))
    }

    async fn execute(&self, tx: &BundleTransaction) -> Result<TxExecution> {
        let response: Value = self
            .client
            .post(self.fork_url("/execute"))
            .json(tx)
            .send()
            .await
            .context("transaction execution request failed")?
            .json()
            .await
            .context("invalid execution response")?;

        let logs = response["logs"]
            .as_array()
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();

        Ok(TxExecution {
            success: response["success"].as_bool().unwrap_or(false),
            compute_units: response["computeUnits"].as_u64().unwrap_or(0),
            logs,
            error: response["error"].as_str().map(str::to_string),
        })
    }

    async fn cleanup(&self) -> Result<()> {
        self.client
            .delete(self.fork_url(""))
            .send()
            .await
            .context("fork release request failed")?;
        Ok(())
    }
}
