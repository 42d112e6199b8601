//! Multi-endpoint bundle submission with fallback.
//!
//! Endpoints are tried in priority order, each exactly once per call. A
//! failed or timed-out attempt falls through to the next endpoint; only
//! after every endpoint has been tried does the call report an aggregate
//! failure. Retrying with a refreshed bundle is the caller's decision,
//! blind per-endpoint resubmission of a stale bundle risks duplicate,
//! inconsistent inclusion.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tokio::time::timeout;
use tracing::{info, warn};

use crate::metrics::PipelineMetrics;
use crate::types::Bundle;

/// A relay/builder submission target.
#[async_trait]
pub trait RelayClient: Send + Sync {
    fn name(&self) -> &str;

    /// Rank among registered endpoints; lower is tried first.
    fn priority(&self) -> u8;

    /// Submit the bundle for the given slot. Returns the relay-assigned
    /// bundle id on acceptance.
    async fn submit(&self, bundle: &Bundle, target_slot: u64, tip_account: &str)
        -> Result<String>;
}

/// Per-endpoint connectivity state, mutated only by the submitter.
#[derive(Debug, Clone)]
pub struct RelayHealth {
    pub healthy: bool,
    pub consecutive_failures: u32,
    pub last_attempt: Option<DateTime<Utc>>,
}

impl Default for RelayHealth {
    fn default() -> Self {
        Self {
            healthy: true,
            consecutive_failures: 0,
            last_attempt: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SubmissionAttempt {
    pub endpoint: String,
    pub error: String,
}

/// Result of one fallback run over all endpoints.
#[derive(Debug, Clone)]
pub enum SubmissionOutcome {
    Submitted {
        endpoint: String,
        bundle_id: String,
        attempts: usize,
    },
    AllFailed {
        attempts: Vec<SubmissionAttempt>,
    },
}

#[derive(Debug, Clone)]
pub struct SubmitterConfig {
    pub request_timeout_ms: u64,
    /// Endpoints with this many consecutive failures are flagged
    /// unhealthy; they keep being tried.
    pub unhealthy_after: u32,
    pub tip_accounts: Vec<String>,
}

impl Default for SubmitterConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 500,
            unhealthy_after: 3,
            tip_accounts: vec![
                "96gYZGLnJYVFmbjzopPSU6QiEV5fGqZNyN9nmNhvrZU5".to_string(),
                "HFqU5x63VTqvQss8hp11i4wVV8bD44PvwucfZ2bU7gRe".to_string(),
                "Cw8CFyM9FkoMi7K7Crf6HNQqf4uEMzpKw6QNghXLvLkY".to_string(),
                "ADaUMid9yfUytqMBgopwjb2DTLSokTSzL1zt6iGPaS49".to_string(),
            ],
        }
    }
}

pub struct MultiRelaySubmitter {
    relays: Vec<Box<dyn RelayClient>>,
    health: Mutex<HashMap<String, RelayHealth>>,
    tip_cursor: AtomicUsize,
    config: SubmitterConfig,
    metrics: Arc<PipelineMetrics>,
}

impl MultiRelaySubmitter {
    pub fn new(config: SubmitterConfig, metrics: Arc<PipelineMetrics>) -> Self {
        Self {
            relays: Vec::new(),
            health: Mutex::new(HashMap::new()),
            tip_cursor: AtomicUsize::new(0),
            config,
            metrics,
        }
    }

    /// Register a submission target. Endpoints are kept sorted by rank.
    pub fn add_relay(&mut self, relay: Box<dyn RelayClient>) {
        info!(endpoint = relay.name(), priority = relay.priority(), "relay endpoint registered");
        if let Ok(mut health) = self.health.lock() {
            health.insert(relay.name().to_string(), RelayHealth::default());
        }
        self.relays.push(relay);
        self.relays.sort_by_key(|r| r.priority());
    }

    pub fn relay_count(&self) -> usize {
        self.relays.len()
    }

    /// Tip account for the next bundle: round-robin over the configured
    /// list, so repeated calls stay balanced while every answer is a valid
    /// member.
    pub fn select_tip_account(&self) -> Option<&str> {
        if self.config.tip_accounts.is_empty() {
            return None;
        }
        let index = self.tip_cursor.fetch_add(1, Ordering::Relaxed) % self.config.tip_accounts.len();
        Some(self.config.tip_accounts[index].as_str())
    }

    /// Try every endpoint at most once, in priority order, until one
    /// accepts the bundle.
    pub async fn submit_with_fallback(
        &self,
        bundle: &Bundle,
        target_slot: u64,
    ) -> SubmissionOutcome {
        let tip_account = self.select_tip_account().unwrap_or_default().to_string();
        let mut attempts = Vec::new();

        for relay in &self.relays {
            let attempt = timeout(
                Duration::from_millis(self.config.request_timeout_ms),
                relay.submit(bundle, target_slot, &tip_account),
            )
            .await;

            match attempt {
                Ok(Ok(bundle_id)) => {
                    self.record_attempt(relay.name(), true);
                    self.metrics.inc_submissions(relay.name(), "accepted");
                    info!(
                        endpoint = relay.name(),
                        bundle_id = %bundle_id,
                        target_slot,
                        "bundle accepted by relay"
                    );
                    return SubmissionOutcome::Submitted {
                        endpoint: relay.name().to_string(),
                        bundle_id,
                        attempts: attempts.len() + 1,
                    };
                }
                Ok(Err(e)) => {
                    self.record_attempt(relay.name(), false);
                    self.metrics.inc_submissions(relay.name(), "rejected");
                    warn!(endpoint = relay.name(), error = %format!("{e:#}"), "relay rejected bundle");
                    attempts.push(SubmissionAttempt {
                        endpoint: relay.name().to_string(),
                        error: format!("{e:#}"),
                    });
                }
                Err(_) => {
                    self.record_attempt(relay.name(), false);
                    self.metrics.inc_submissions(relay.name(), "timeout");
                    warn!(
                        endpoint = relay.name(),
                        timeout_ms = self.config.request_timeout_ms,
                        "relay submission timed out"
                    );
                    attempts.push(SubmissionAttempt {
                        endpoint: relay.name().to_string(),
                        error: "submission timed out".to_string(),
                    });
                }
            }
        }

        SubmissionOutcome::AllFailed { attempts }
    }

    /// Point-in-time copy of per-endpoint health.
    pub fn health_snapshot(&self) -> HashMap<String, RelayHealth> {
        self.health.lock().map(|h| h.clone()).unwrap_or_default()
    }

    fn record_attempt(&self, endpoint: &str, success: bool) {
        let Ok(mut health) = self.health.lock() else {
            return;
        };
        let entry = health.entry(endpoint.to_string()).or_default();
        entry.last_attempt = Some(Utc::now());
        if success {
            entry.consecutive_failures = 0;
            entry.healthy = true;
        } else {
            entry.consecutive_failures += 1;
            if entry.consecutive_failures >= self.config.unhealthy_after && entry.healthy {
                entry.healthy = false;
                warn!(
                    endpoint,
                    consecutive_failures = entry.consecutive_failures,
                    "relay endpoint flagged unhealthy"
                );
            }
        }
    }
}

/// JSON-RPC relay client speaking the block-engine `sendBundle` shape.
pub struct HttpRelayClient {
    name: String,
    url: String,
    priority: u8,
    client: reqwest::Client,
}

impl HttpRelayClient {
    pub fn new(name: String, url: String, priority: u8, request_timeout_ms: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(request_timeout_ms))
            .build()
            .context("failed to build relay HTTP client")?;
        Ok(Self {
            name,
            url,
            priority,
            client,
        })
    }

    fn encode_transactions(bundle: &Bundle) -> Result<Vec<String>> {
        bundle
            .transactions
            .iter()
            .map(|tx| {
                serde_json::to_vec(tx)
                    .map(hex::encode)
                    .context("failed to encode bundle transaction")
            })
            .collect()
    }
}

#[async_trait]
impl RelayClient for HttpRelayClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> u8 {
        self.priority
    }

    async fn submit(
        &self,
        bundle: &Bundle,
        target_slot: u64,
        tip_account: &str,
    ) -> Result<String> {
        let payload = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "sendBundle",
            "params": [{
                "transactions": Self::encode_transactions(bundle)?,
                "slot": target_slot,
                "minTimestamp": bundle.min_timestamp,
                "maxTimestamp": bundle.max_timestamp,
                "tipAccount": tip_account,
            }],
        });

        let response: Value = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .context("relay request failed")?
            .json()
            .await
            .context("invalid relay response")?;

        if let Some(error) = response.get("error") {
            bail!("relay error: {error}");
        }

        response["result"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("relay response missing result"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    struct ScriptedRelay {
        name: String,
        priority: u8,
        succeed: bool,
        hang: bool,
        calls: Arc<AtomicU32>,
    }

    impl ScriptedRelay {
        fn new(name: &str, priority: u8, succeed: bool) -> (Box<dyn RelayClient>, Arc<AtomicU32>) {
            let calls = Arc::new(AtomicU32::new(0));
            (
                Box::new(Self {
                    name: name.to_string(),
                    priority,
                    succeed,
                    hang: false,
                    calls: calls.clone(),
                }),
                calls,
            )
        }

        fn hanging(name: &str, priority: u8) -> (Box<dyn RelayClient>, Arc<AtomicU32>) {
            let calls = Arc::new(AtomicU32::new(0));
            (
                Box::new(Self {
                    name: name.to_string(),
                    priority,
                    succeed: true,
                    hang: true,
                    calls: calls.clone(),
                }),
                calls,
            )
        }
    }

    #[async_trait]
    impl RelayClient for ScriptedRelay {
        fn name(&self) -> &str {
            &self.name
        }

        fn priority(&self) -> u8 {
            self.priority
        }

        async fn submit(&self, bundle: &Bundle, _slot: u64, _tip: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.hang {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            if self.succeed {
                Ok(format!("accepted-{}", bundle.id))
            } else {
                bail!("bundle rejected")
            }
        }
    }

    fn create_test_bundle() -> Bundle {
        Bundle {
            id: "bundle-1".to_string(),
            transactions: vec![crate::types::BundleTransaction {
                id: "tx-1".to_string(),
                sender: "payer".to_string(),
                recipient: "program".to_string(),
                lamports: 0,
                payload: vec![1],
                compute_limit: 200_000,
                fee_rate: 5_000,
                label: "leg".to_string(),
            }],
            target_slot: 100,
            min_timestamp: 0,
            max_timestamp: 30,
        }
    }

    fn create_test_submitter() -> MultiRelaySubmitter {
        let metrics = Arc::new(PipelineMetrics::new().unwrap());
        MultiRelaySubmitter::new(
            SubmitterConfig {
                request_timeout_ms: 50,
                ..Default::default()
            },
            metrics,
        )
    }

    #[tokio::test]
    async fn test_fallback_attributes_first_success_and_stops() {
        let mut submitter = create_test_submitter();
        let (a, a_calls) = ScriptedRelay::new("relay-a", 0, false);
        let (b, b_calls) = ScriptedRelay::new("relay-b", 1, true);
        let (c, c_calls) = ScriptedRelay::new("relay-c", 2, true);
        submitter.add_relay(a);
        submitter.add_relay(b);
        submitter.add_relay(c);

        let outcome = submitter.submit_with_fallback(&create_test_bundle(), 100).await;
        match outcome {
            SubmissionOutcome::Submitted {
                endpoint, attempts, ..
            } => {
                assert_eq!(endpoint, "relay-b");
                assert_eq!(attempts, 2);
            }
            SubmissionOutcome::AllFailed { .. } => panic!("expected success via relay-b"),
        }
        assert_eq!(a_calls.load(Ordering::SeqCst), 1);
        assert_eq!(b_calls.load(Ordering::SeqCst), 1);
        assert_eq!(c_calls.load(Ordering::SeqCst), 0, "relay-c must never be attempted");
    }

    #[tokio::test]
    async fn test_all_endpoints_tried_exactly_once_on_total_failure() {
        let mut submitter = create_test_submitter();
        let (a, a_calls) = ScriptedRelay::new("relay-a", 0, false);
        let (b, b_calls) = ScriptedRelay::new("relay-b", 1, false);
        submitter.add_relay(a);
        submitter.add_relay(b);

        let outcome = submitter.submit_with_fallback(&create_test_bundle(), 100).await;
        match outcome {
            SubmissionOutcome::AllFailed { attempts } => {
                assert_eq!(attempts.len(), 2);
                assert_eq!(attempts[0].endpoint, "relay-a");
                assert_eq!(attempts[1].endpoint, "relay-b");
            }
            SubmissionOutcome::Submitted { .. } => panic!("expected aggregate failure"),
        }
        assert_eq!(a_calls.load(Ordering::SeqCst), 1);
        assert_eq!(b_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timeout_advances_to_next_endpoint() {
        let mut submitter = create_test_submitter();
        let (slow, slow_calls) = ScriptedRelay::hanging("relay-slow", 0);
        let (fast, _) = ScriptedRelay::new("relay-fast", 1, true);
        submitter.add_relay(slow);
        submitter.add_relay(fast);

        let outcome = submitter.submit_with_fallback(&create_test_bundle(), 100).await;
        match outcome {
            SubmissionOutcome::Submitted { endpoint, .. } => assert_eq!(endpoint, "relay-fast"),
            SubmissionOutcome::AllFailed { .. } => panic!("expected fallback past the slow relay"),
        }
        assert_eq!(slow_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_priority_order_overrides_registration_order() {
        let mut submitter = create_test_submitter();
        let (low, low_calls) = ScriptedRelay::new("relay-low", 5, true);
        let (high, _) = ScriptedRelay::new("relay-high", 0, true);
        submitter.add_relay(low);
        submitter.add_relay(high);

        let outcome = submitter.submit_with_fallback(&create_test_bundle(), 100).await;
        match outcome {
            SubmissionOutcome::Submitted { endpoint, .. } => assert_eq!(endpoint, "relay-high"),
            SubmissionOutcome::AllFailed { .. } => panic!("expected success"),
        }
        assert_eq!(low_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unhealthy_flag_after_consecutive_failures() {
        let mut submitter = create_test_submitter();
        let (a, _) = ScriptedRelay::new("relay-a", 0, false);
        submitter.add_relay(a);

        for _ in 0..3 {
            let _ = submitter.submit_with_fallback(&create_test_bundle(), 100).await;
        }
        let health = submitter.health_snapshot();
        let relay_a = health.get("relay-a").unwrap();
        assert!(!relay_a.healthy);
        assert_eq!(relay_a.consecutive_failures, 3);
    }

    #[test]
    fn test_tip_account_round_robin() {
        let submitter = create_test_submitter();
        let accounts = submitter.config.tip_accounts.clone();
        let mut seen = Vec::new();
        for _ in 0..accounts.len() * 2 {
            seen.push(submitter.select_tip_account().unwrap().to_string());
        }
        // Every configured account is used, in a repeating cycle.
        for (i, account) in seen.iter().enumerate() {
            assert_eq!(account, &accounts[i % accounts.len()]);
        }
    }
}
