mod analysis;
mod collection;
mod config;
mod data;
mod error;
mod monitoring;
mod report;
mod sampling;
mod storage;

use anyhow::{Context, Result};
use chrono::Utc;
use std::path::Path;
use std::sync::Arc;

use analysis::CorrelationAnalyzer;
use collection::position_fetcher::PositionFetcher;
use collection::price_oracle::PriceOracle;
use collection::retry::RetryPolicy;
use collection::roster::RosterManager;
use config::{Config, EnvConfig};
use data::exchange::HyperliquidClient;
use data::leaderboard::LeaderboardClient;
use monitoring::logger::CsvLogger;
use monitoring::metrics::Metrics;
use sampling::scheduler::{SamplingScheduler, SchedulerSettings};
use storage::index::CheckpointIndex;
use storage::series_store::FileSeriesStore;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let args: Vec<String> = std::env::args().skip(1).collect();

    let mut config = Config::load("config.toml")?;
    let env_config = EnvConfig::load()?;

    match args.first().map(String::as_str) {
        Some("report") => {
            let hours = match args.get(1) {
                Some(raw) => raw.parse().with_context(|| format!("invalid hours: {}", raw))?,
                None => config.sampling.duration_hours as i64,
            };
            return show_report(&config, hours);
        }
        Some(raw) => {
            config.sampling.duration_hours = raw
                .parse()
                .with_context(|| format!("usage: hl-positioning [hours] | report [hours] (got {:?})", raw))?;
        }
        None => {}
    }

    run(config, env_config).await
}

async fn run(config: Config, env_config: EnvConfig) -> Result<()> {
    let run_id = config.resolve_run_id(&env_config);

    tracing::info!("🚀 Hyperliquid positioning collector starting...");
    tracing::info!("Run: {}", run_id);
    tracing::info!(
        "Duration: {}h, interval: {}s ({} ticks)",
        config.sampling.duration_hours,
        config.sampling.interval_secs,
        config.sampling.total_ticks()
    );
    tracing::info!("Tracked assets: {:?}", config.assets.tracked);
    tracing::info!("Target roster size: {}", config.roster.target_count);

    let http = HyperliquidClient::build_http_client(std::time::Duration::from_secs(
        config.infrastructure.request_timeout_secs,
    ))?;
    let leaderboard = Arc::new(LeaderboardClient::new(http.clone(), env_config.leaderboard_url.clone()));
    let exchange = Arc::new(HyperliquidClient::new(http, env_config.info_url.clone()));
    let retry = RetryPolicy::from_config(&config.infrastructure);

    tracing::info!("Initializing checkpoint index: {}", config.system.index_path);
    let index = CheckpointIndex::open(&config.system.index_path)?;
    let store = FileSeriesStore::open(Path::new(&config.system.data_dir), &run_id, &config.assets.tracked, index)?;
    let metrics_path = store.run_dir().join("metrics.prom");

    let mut scheduler = SamplingScheduler::new(
        SchedulerSettings::from_config(&config),
        RosterManager::new(leaderboard, exchange.clone(), config.roster.clone()),
        PositionFetcher::new(exchange.clone(), retry),
        PriceOracle::new(exchange, retry),
        store,
        CorrelationAnalyzer::new(config.assets.tracked.clone()),
    );

    if config.monitoring.csv_logging {
        scheduler = scheduler.with_csv_logger(CsvLogger::new(config.monitoring.csv_log_path.clone())?);
    }
    if config.monitoring.prometheus_enabled {
        scheduler = scheduler.with_metrics(Metrics::new()?, Some(metrics_path));
    }

    let summary = scheduler.run().await?;
    tracing::info!(
        "✅ Done: {} data points, {} checkpoints, {} failed ticks",
        summary.points,
        summary.checkpoints,
        summary.failed()
    );

    Ok(())
}

fn show_report(config: &Config, hours: i64) -> Result<()> {
    let index = CheckpointIndex::open(&config.system.index_path)?;
    let Some(latest) = index.latest_run()? else {
        tracing::warn!("No runs recorded in {}", config.system.index_path);
        return Ok(());
    };

    let records = report::load_records(Path::new(&latest.canonical_path))?;
    let window = report::time_series(&records, hours, Utc::now());
    tracing::info!(
        "Run {} (started {}): {} records, {} in the last {}h",
        latest.run_id,
        latest.started_at,
        records.len(),
        window.len(),
        hours
    );
    for cp in index.checkpoints(&latest.run_id)? {
        tracing::info!(
            "  checkpoint #{} of {} at {}: {} points -> {}",
            cp.id,
            cp.run_id,
            cp.written_at,
            cp.point_count,
            cp.snapshot_path
        );
    }

    let Some(last) = window.last() else {
        return Ok(());
    };
    for row in report::net_positions(last, &config.assets.tracked) {
        tracing::info!(
            "{:<5} ${:>12.2} | long {:>14.2} USD ({:.4}) | short {:>14.2} USD ({:.4}) | net {:>+14.2} USD ({:+.4}) | {} traders",
            row.asset,
            row.price,
            row.long_usd,
            row.long_tokens,
            row.short_usd,
            row.short_tokens,
            row.net_usd,
            row.net_tokens,
            row.traders
        );
    }
    for trader in report::trader_positions(last, &config.assets.tracked) {
        let holdings: Vec<String> = trader
            .positions
            .iter()
            .map(|(asset, exposure)| format!("{} {:+.4} (${:.2})", asset, exposure.szi, exposure.position_value_usd))
            .collect();
        tracing::debug!("{} | {}", trader.address, holdings.join(", "));
    }

    Ok(())
}
