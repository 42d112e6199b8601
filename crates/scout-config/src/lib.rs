//! Typed configuration for the scout pipeline.
//!
//! One `Config` value is built at startup, validated once, and handed into
//! component constructors as plain values. Components never read the
//! environment themselves. Validation failures are process-fatal by
//! design: a bot with missing credentials or no relays must not start.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub sources: Vec<SourceConfig>,
    pub ingestion: IngestionSettings,
    pub classifier: ClassifierSettings,
    pub strategies: StrategiesSettings,
    pub simulation: SimulationSettings,
    pub fork_service: ServiceEndpoint,
    pub price_feed: ServiceEndpoint,
    pub relays: Vec<RelayConfig>,
    pub submission: SubmissionSettings,
    pub pipeline: PipelineSettings,
    pub monitoring: MonitoringConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    pub url: String,
    pub topic: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionSettings {
    pub queue_capacity: usize,
    pub min_fee_rate: u64,
    pub min_compute_limit: u64,
    pub reconnect_interval_ms: u64,
    pub unhealthy_after: u32,
    pub seen_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierSettings {
    pub high_value_floor_usd_micros: u64,
    /// DEX router/program registry: program id -> protocol name.
    pub dex_programs: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategiesSettings {
    /// "production" or "simulation".
    pub mode: String,
    pub payer_account: String,
    pub protocol_tip_lamports: u64,
    pub arbitrage: ArbitrageSettings,
    pub sandwich: SandwichSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArbitrageSettings {
    pub venue_a: String,
    pub venue_b: String,
    pub min_delta_bps: u64,
    pub min_net_profit_usd_micros: u64,
    pub max_trade_sol: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandwichSettings {
    /// Separate, explicit production switch for the ordering-dependent
    /// strategy. Off by default.
    pub enabled_for_production: bool,
    pub min_target_usd_micros: u64,
    pub min_net_profit_usd_micros: u64,
    pub insertion_fraction_bps: u64,
    pub pool_depth_sol: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationSettings {
    pub timeout_ms: u64,
    pub max_concurrent_simulations: usize,
    pub fee_per_compute_unit: u64,
    pub sol_price_usd_micros: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceEndpoint {
    pub url: String,
    pub request_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    pub name: String,
    pub url: String,
    pub priority: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionSettings {
    pub request_timeout_ms: u64,
    pub tip_accounts: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSettings {
    pub idle_wait_ms: u64,
    pub error_backoff_ms: u64,
    pub min_net_profit_usd_micros: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    pub metrics_port: u16,
    pub log_level: String,
}

impl Config {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read config file {}", path.as_ref().display()))?;
        let config: Config = serde_yaml::from_str(&content).context("invalid config file")?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let mut dex_programs = HashMap::new();
        dex_programs.insert(
            env_or("RAYDIUM_PROGRAM", "675kPX9MHTjS2zt1qfr1NYHuzeLXfQM9H24wFSUt1Mp8"),
            "raydium".to_string(),
        );
        dex_programs.insert(
            env_or("ORCA_PROGRAM", "whirLbMiicVdio4qvUfM5KAg6Ct8VwpYzGff3uctyCc"),
            "orca".to_string(),
        );

        let mut relays = vec![RelayConfig {
            name: "primary".to_string(),
            url: env_or("RELAY_URL", "http://localhost:9100"),
            priority: 0,
        }];
        if let Ok(fallback) = std::env::var("RELAY_URL_FALLBACK") {
            relays.push(RelayConfig {
                name: "fallback".to_string(),
                url: fallback,
                priority: 1,
            });
        }

        let config = Config {
            sources: vec![SourceConfig {
                name: env_or("SOURCE_NAME", "mempool"),
                url: env_or("WS_URL", "ws://localhost:8900"),
                topic: env_or("SOURCE_TOPIC", "pendingTransactions"),
            }],
            ingestion: IngestionSettings {
                queue_capacity: env_parse("QUEUE_CAPACITY", 10_000),
                min_fee_rate: env_parse("MIN_FEE_RATE", 1_000),
                min_compute_limit: env_parse("MIN_COMPUTE_LIMIT", 100_000),
                reconnect_interval_ms: env_parse("RECONNECT_INTERVAL_MS", 5_000),
                unhealthy_after: env_parse("UNHEALTHY_AFTER", 3),
                seen_capacity: env_parse("SEEN_CAPACITY", 10_000),
            },
            classifier: ClassifierSettings {
                high_value_floor_usd_micros: env_parse("HIGH_VALUE_FLOOR_USD_MICROS", 10_000_000),
                dex_programs,
            },
            strategies: StrategiesSettings {
                mode: env_or("MODE", "simulation"),
                payer_account: env_or("PAYER_ACCOUNT", ""),
                protocol_tip_lamports: env_parse("PROTOCOL_TIP_LAMPORTS", 10_000),
                arbitrage: ArbitrageSettings {
                    venue_a: env_or("ARB_VENUE_A", "raydium"),
                    venue_b: env_or("ARB_VENUE_B", "orca"),
                    min_delta_bps: env_parse("ARB_MIN_DELTA_BPS", 25),
                    min_net_profit_usd_micros: env_parse("ARB_MIN_NET_PROFIT_USD_MICROS", 1_000_000),
                    max_trade_sol: env_parse("ARB_MAX_TRADE_SOL", 50),
                },
                sandwich: SandwichSettings {
                    enabled_for_production: env_parse("SANDWICH_ENABLED_FOR_PRODUCTION", false),
                    min_target_usd_micros: env_parse("SANDWICH_MIN_TARGET_USD_MICROS", 1_000_000_000),
                    min_net_profit_usd_micros: env_parse(
                        "SANDWICH_MIN_NET_PROFIT_USD_MICROS",
                        10_000_000,
                    ),
                    insertion_fraction_bps: env_parse("SANDWICH_INSERTION_FRACTION_BPS", 2_500),
                    pool_depth_sol: env_parse("SANDWICH_POOL_DEPTH_SOL", 10_000),
                },
            },
            simulation: SimulationSettings {
                timeout_ms: env_parse("SIMULATION_TIMEOUT_MS", 250),
                max_concurrent_simulations: env_parse("MAX_CONCURRENT_SIMULATIONS", 8),
                fee_per_compute_unit: env_parse("FEE_PER_COMPUTE_UNIT", 5_000),
                sol_price_usd_micros: env_parse("SOL_PRICE_USD_MICROS", 150_000_000),
            },
            fork_service: ServiceEndpoint {
                url: env_or("FORK_SERVICE_URL", "http://localhost:9200"),
                request_timeout_ms: env_parse("FORK_SERVICE_TIMEOUT_MS", 200),
            },
            price_feed: ServiceEndpoint {
                url: env_or("PRICE_FEED_URL", "http://localhost:9300"),
                request_timeout_ms: env_parse("PRICE_FEED_TIMEOUT_MS", 100),
            },
            relays,
            submission: SubmissionSettings {
                request_timeout_ms: env_parse("SUBMISSION_TIMEOUT_MS", 500),
                tip_accounts: env_list(
                    "TIP_ACCOUNTS",
                    &[
                        "96gYZGLnJYVFmbjzopPSU6QiEV5fGqZNyN9nmNhvrZU5",
                        "HFqU5x63VTqvQss8hp11i4wVV8bD44PvwucfZ2bU7gRe",
                        "Cw8CFyM9FkoMi7K7Crf6HNQqf4uEMzpKw6QNghXLvLkY",
                        "ADaUMid9yfUytqMBgopwjb2DTLSokTSzL1zt6iGPaS49",
                    ],
                ),
            },
            pipeline: PipelineSettings {
                idle_wait_ms: env_parse("IDLE_WAIT_MS", 10),
                error_backoff_ms: env_parse("ERROR_BACKOFF_MS", 1_000),
                min_net_profit_usd_micros: env_parse("MIN_NET_PROFIT_USD_MICROS", 1_000_000),
            },
            monitoring: MonitoringConfig {
                metrics_port: env_parse("METRICS_PORT", 9090),
                log_level: env_or("LOG_LEVEL", "info"),
            },
        };

        Ok(config)
    }

    pub fn is_production(&self) -> bool {
        self.strategies.mode == "production"
    }

    /// Startup validation. Errors here are process-fatal.
    pub fn validate(&self) -> Result<()> {
        if self.sources.is_empty() {
            bail!("at least one data source must be configured");
        }
        for source in &self.sources {
            if source.url.is_empty() {
                bail!("data source '{}' has an empty url", source.name);
            }
        }
        if self.ingestion.queue_capacity == 0 {
            bail!("queue capacity must be positive");
        }
        match self.strategies.mode.as_str() {
            "production" | "simulation" => {}
            other => bail!("mode must be 'production' or 'simulation', got '{other}'"),
        }
        if self.strategies.payer_account.is_empty() {
            bail!("payer account is not configured");
        }
        if self.strategies.sandwich.insertion_fraction_bps > 10_000 {
            bail!("sandwich insertion fraction cannot exceed 10000 bps");
        }
        if self.simulation.timeout_ms == 0 {
            bail!("simulation timeout must be positive");
        }
        if self.simulation.max_concurrent_simulations == 0 {
            bail!("simulation concurrency must be positive");
        }
        if self.relays.is_empty() {
            bail!("at least one relay endpoint must be configured");
        }
        for relay in &self.relays {
            if relay.url.is_empty() {
                bail!("relay '{}' has an empty url", relay.name);
            }
        }
        if self.submission.tip_accounts.is_empty() {
            bail!("at least one tip account must be configured");
        }
        Ok(())
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

fn env_list(key: &str, defaults: &[&str]) -> Vec<String> {
    match std::env::var(key) {
        Ok(value) => value
            .split(',')
            .map(|entry| entry.trim().to_string())
            .filter(|entry| !entry.is_empty())
            .collect(),
        Err(_) => defaults.iter().map(|s| s.to_string()).collect(),
    }
}
