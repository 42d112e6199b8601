mod pipeline;

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Arg, Command};
use scout_config::Config;
use scout_core::{
    BundleSimulator, Classifier, HttpForkProvider, HttpRelayClient, MetricsServer,
    MultiRelaySubmitter, PipelineMetrics, SimulationConfig, SubmitterConfig, LAMPORTS_PER_SOL,
};
use scout_ingest::{DataSource, IngestionConfig, IngestionService, TransactionQueue, WebSocketSource};
use scout_strategies::{
    ArbitrageConfig, ConstantProductImpact, CrossVenueArbitrage, HttpPriceOracle, Mode,
    SandwichConfig, SandwichStrategy, StrategyRegistry,
};
use tracing::{error, info};

use crate::pipeline::{Pipeline, PipelineConfig};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(true)
        .json()
        .init();

    let matches = Command::new("scout-bot")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Detect, simulate and submit block-construction bundles")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Path to a YAML config file; falls back to environment variables"),
        )
        .get_matches();

    // Startup configuration errors abort the process.
    let config = match matches.get_one::<String>("config") {
        Some(path) => Config::load_from_file(path)?,
        None => {
            let config = Config::load_from_env()?;
            config.validate()?;
            config
        }
    };

    info!(
        mode = %config.strategies.mode,
        sources = config.sources.len(),
        relays = config.relays.len(),
        "scout-bot starting"
    );

    let metrics = Arc::new(PipelineMetrics::new()?);
    let metrics_server = MetricsServer::new(metrics.clone(), config.monitoring.metrics_port);
    tokio::spawn(async move {
        if let Err(e) = metrics_server.start().await {
            error!(error = %format!("{e:#}"), "metrics server stopped");
        }
    });

    // Ingestion: one driver per configured source feeding the shared queue.
    let queue = Arc::new(TransactionQueue::new(config.ingestion.queue_capacity));
    let sources: Vec<Arc<dyn DataSource>> = config
        .sources
        .iter()
        .map(|s| {
            Arc::new(WebSocketSource::new(
                s.name.clone(),
                s.url.clone(),
                s.topic.clone(),
            )) as Arc<dyn DataSource>
        })
        .collect();
    let ingestion = IngestionService::new(
        sources,
        queue.clone(),
        metrics.clone(),
        IngestionConfig {
            reconnect_interval_ms: config.ingestion.reconnect_interval_ms,
            unhealthy_after: config.ingestion.unhealthy_after,
            min_fee_rate: config.ingestion.min_fee_rate,
            min_compute_limit: config.ingestion.min_compute_limit,
            seen_capacity: config.ingestion.seen_capacity,
        },
    );
    ingestion.start().await;

    let classifier = Classifier::new(
        config.classifier.dex_programs.clone(),
        config.classifier.high_value_floor_usd_micros as u128,
        config.simulation.sol_price_usd_micros,
    );

    let registry = build_registry(&config, metrics.clone())?;

    let fork_provider = Arc::new(HttpForkProvider::new(
        config.fork_service.url.clone(),
        config.fork_service.request_timeout_ms,
    )?);
    let simulator = Arc::new(BundleSimulator::new(
        SimulationConfig {
            timeout_ms: config.simulation.timeout_ms,
            max_concurrent_simulations: config.simulation.max_concurrent_simulations,
            fee_per_compute_unit: config.simulation.fee_per_compute_unit,
            sol_price_usd_micros: config.simulation.sol_price_usd_micros,
            ..Default::default()
        },
        fork_provider,
        metrics.clone(),
    ));

    let mut submitter = MultiRelaySubmitter::new(
        SubmitterConfig {
            request_timeout_ms: config.submission.request_timeout_ms,
            unhealthy_after: 3,
            tip_accounts: config.submission.tip_accounts.clone(),
        },
        metrics.clone(),
    );
    for relay in &config.relays {
        submitter.add_relay(Box::new(
            HttpRelayClient::new(
                relay.name.clone(),
                relay.url.clone(),
                relay.priority,
                config.submission.request_timeout_ms,
            )
            .with_context(|| format!("failed to build relay client '{}'", relay.name))?,
        ));
    }

    let pipeline = Pipeline::new(
        queue,
        classifier,
        Arc::new(registry),
        simulator,
        Arc::new(submitter),
        metrics,
        PipelineConfig {
            idle_wait_ms: config.pipeline.idle_wait_ms,
            error_backoff_ms: config.pipeline.error_backoff_ms,
            min_net_profit_usd_micros: config.pipeline.min_net_profit_usd_micros as u128,
        },
    );
    let shutdown = pipeline.shutdown_handle();

    tokio::select! {
        _ = pipeline.run() => {}
        _ = tokio::signal::ctrl_c() => {
            info!("received shutdown signal");
        }
    }

    shutdown.store(true, Ordering::Relaxed);
    ingestion.shutdown().await;
    info!("scout-bot stopped");
    Ok(())
}

/// Static strategy table, assembled once at startup.
fn build_registry(config: &Config, metrics: Arc<PipelineMetrics>) -> Result<StrategyRegistry> {
    let mode = if config.is_production() {
        Mode::Production
    } else {
        Mode::Simulation
    };
    let mut registry = StrategyRegistry::new(mode, metrics);

    let oracle = Arc::new(HttpPriceOracle::new(
        config.price_feed.url.clone(),
        config.price_feed.request_timeout_ms,
    )?);
    let mut routers = HashMap::new();
    for (program, protocol) in &config.classifier.dex_programs {
        routers.insert(protocol.clone(), program.clone());
    }
    registry.register(Arc::new(CrossVenueArbitrage::new(
        ArbitrageConfig {
            venue_a: config.strategies.arbitrage.venue_a.clone(),
            venue_b: config.strategies.arbitrage.venue_b.clone(),
            routers,
            min_delta_bps: config.strategies.arbitrage.min_delta_bps,
            min_net_profit_usd_micros: config.strategies.arbitrage.min_net_profit_usd_micros
                as u128,
            max_trade_lamports: config.strategies.arbitrage.max_trade_sol as u128
                * LAMPORTS_PER_SOL,
            protocol_tip_lamports: config.strategies.protocol_tip_lamports as u128,
            fee_per_compute_unit: config.simulation.fee_per_compute_unit,
            compute_per_leg: 200_000,
            payer: config.strategies.payer_account.clone(),
            sol_price_usd_micros: config.simulation.sol_price_usd_micros,
        },
        oracle,
    )))?;

    let sandwich_enabled = config.strategies.sandwich.enabled_for_production;
    if config.is_production() && !sandwich_enabled {
        info!("sandwich strategy disabled in production, not registering");
    } else {
        registry.register(Arc::new(SandwichStrategy::new(
            SandwichConfig {
                enabled_for_production: sandwich_enabled,
                min_target_usd_micros: config.strategies.sandwich.min_target_usd_micros as u128,
                min_net_profit_usd_micros: config.strategies.sandwich.min_net_profit_usd_micros
                    as u128,
                insertion_fraction_bps: config.strategies.sandwich.insertion_fraction_bps,
                efficiency_bps: 4_000,
                protocol_tip_lamports: config.strategies.protocol_tip_lamports as u128,
                fee_per_compute_unit: config.simulation.fee_per_compute_unit,
                compute_per_tx: 200_000,
                payer: config.strategies.payer_account.clone(),
                sol_price_usd_micros: config.simulation.sol_price_usd_micros,
            },
            Arc::new(ConstantProductImpact {
                pool_depth_lamports: config.strategies.sandwich.pool_depth_sol as u128
                    * LAMPORTS_PER_SOL,
                max_impact_bps: 1_500,
            }),
        )))?;
    }

    Ok(registry)
}
