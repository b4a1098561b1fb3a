use chrono::Utc;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::analysis::SeriesAnalyzer;
use crate::collection::aggregator::aggregate;
use crate::collection::position_fetcher::{FetchBatch, PositionFetcher};
use crate::collection::price_oracle::PriceOracle;
use crate::collection::roster::{Refresh, RosterManager};
use crate::config::Config;
use crate::data::exchange::ExchangeInfo;
use crate::data::leaderboard::LeaderboardSource;
use crate::data::types::{DataPoint, TimeSeries};
use crate::error::CollectorError;
use crate::monitoring::logger::CsvLogger;
use crate::monitoring::metrics::Metrics;
use crate::sampling::types::{RefreshOutcome, RunSummary, SchedulerState, TickOutcome, TickReport};
use crate::storage::series_store::SeriesStore;

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub ticks: usize,
    pub interval: Duration,
    pub checkpoint_every: usize,
    pub refresh_every: usize,
    pub tracked_assets: Vec<String>,
}

impl SchedulerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            ticks: config.sampling.total_ticks(),
            interval: config.sampling.interval(),
            checkpoint_every: config.sampling.checkpoint_every.max(1),
            refresh_every: config.sampling.refresh_every.max(1),
            tracked_assets: config.assets.tracked.clone(),
        }
    }
}

/// Drives the fixed-interval sampling loop for one run.
///
/// Ticks run strictly one after another. Each tick may refresh the roster,
/// then fans out one position request per roster member alongside a single
/// price request, aggregates, and appends one data point. A failing tick is
/// logged and skipped; the run always reaches its final checkpoint.
pub struct SamplingScheduler<L, E, S, A> {
    settings: SchedulerSettings,
    roster: RosterManager<L, E>,
    fetcher: PositionFetcher<E>,
    oracle: PriceOracle<E>,
    store: S,
    analyzer: A,
    series: TimeSeries,
    state: SchedulerState,
    summary: RunSummary,
    csv: Option<CsvLogger>,
    metrics: Option<(Metrics, Option<PathBuf>)>,
}

impl<L, E, S, A> SamplingScheduler<L, E, S, A>
where
    L: LeaderboardSource,
    E: ExchangeInfo,
    S: SeriesStore,
    A: SeriesAnalyzer,
{
    pub fn new(
        settings: SchedulerSettings,
        roster: RosterManager<L, E>,
        fetcher: PositionFetcher<E>,
        oracle: PriceOracle<E>,
        store: S,
        analyzer: A,
    ) -> Self {
        Self {
            settings,
            roster,
            fetcher,
            oracle,
            store,
            analyzer,
            series: TimeSeries::new(),
            state: SchedulerState::Idle,
            summary: RunSummary::default(),
            csv: None,
            metrics: None,
        }
    }

    pub fn with_csv_logger(mut self, csv: CsvLogger) -> Self {
        self.csv = Some(csv);
        self
    }

    /// Exposition text is written to `export` (if any) on every checkpoint.
    pub fn with_metrics(mut self, metrics: Metrics, export: Option<PathBuf>) -> Self {
        self.metrics = Some((metrics, export));
        self
    }

    #[cfg(test)]
    pub fn state(&self) -> SchedulerState {
        self.state
    }

    #[cfg(test)]
    pub fn series(&self) -> &TimeSeries {
        &self.series
    }

    pub async fn run(&mut self) -> Result<RunSummary, CollectorError> {
        self.start().await?;

        let total = self.settings.ticks;
        for index in 0..total {
            self.tick(index).await;
            if index + 1 < total {
                tokio::time::sleep(self.settings.interval).await;
            }
        }

        Ok(self.finish())
    }

    /// IDLE → RUNNING: pick the first roster and resume any saved series.
    async fn start(&mut self) -> Result<(), CollectorError> {
        info!(
            "Starting sampling: {} ticks every {:?}, tracking {:?}",
            self.settings.ticks, self.settings.interval, self.settings.tracked_assets
        );

        let selection = self.roster.initialize(&self.settings.tracked_assets).await?;
        info!(
            "Initial roster: {} traders ({} of {} candidates checked)",
            selection.roster.len(),
            selection.checked,
            selection.candidates
        );
        if let Some(issue) = &selection.shortfall {
            warn!("Starting with a short roster: {}", issue);
        }
        self.set_roster_gauge();

        self.series = self.store.load_latest()?;
        if !self.series.is_empty() {
            info!("Resuming with {} saved data points", self.series.len());
        }
        self.summary = RunSummary::default();
        self.transition(SchedulerState::Running);
        Ok(())
    }

    async fn tick(&mut self, index: usize) -> TickOutcome {
        info!("Collecting data point {}/{}", index + 1, self.settings.ticks);
        let mut report = TickReport::new(index);

        if index > 0 && index % self.settings.refresh_every == 0 {
            report.refresh = Some(self.refresh_roster(&mut report).await);
        }

        report.roster_version = self.roster.current().version();
        report.roster_size = self.roster.current().len();

        match self.collect(&mut report).await {
            Ok(point) => {
                info!("Timestamp: {}", point.timestamp);
                for asset in &self.settings.tracked_assets {
                    if let Some(agg) = point.per_asset.get(asset) {
                        info!(
                            "{} Price: ${:.2} | Net: {:.4} ({:+.2} USD) | traders: {}",
                            asset,
                            point.prices.get(asset).unwrap_or(0.0),
                            agg.net_tokens,
                            agg.net_usd,
                            agg.participant_count
                        );
                    }
                }
                if let Some(csv) = &self.csv {
                    if let Err(e) = csv.log_point(&point, report.roster_size, report.failed_addresses) {
                        warn!("CSV log failed: {}", e);
                    }
                }
                report.outcome = TickOutcome::Sampled;
            }
            Err(e) => {
                error!("Error collecting data point {}: {}", index + 1, e);
                report.error = Some(e.to_string());
            }
        }

        if report.outcome == TickOutcome::Sampled && (index + 1) % self.settings.checkpoint_every == 0 {
            match self.checkpoint() {
                Ok(()) => {
                    report.outcome = TickOutcome::Checkpointed;
                    info!("✓ Data checkpoint saved");
                }
                Err(e) => report.persistence_error = Some(e.to_string()),
            }
        }

        info!(
            "Tick {}/{} {}: {} of {} addresses failed, {} data quality issues",
            index + 1,
            self.settings.ticks,
            report.outcome.as_str(),
            report.failed_addresses,
            report.roster_size,
            report.issues.len()
        );
        for issue in &report.issues {
            warn!("  {}", issue);
        }

        if let Some((metrics, _)) = &self.metrics {
            metrics.record_tick(report.outcome.as_str());
            metrics.record_address_failures(report.failed_addresses);
        }

        let outcome = report.outcome;
        self.summary.ticks.push(report);
        outcome
    }

    async fn refresh_roster(&mut self, report: &mut TickReport) -> RefreshOutcome {
        match self.roster.refresh(&self.settings.tracked_assets).await {
            Refresh::Replaced { diff, shortfall } => {
                if let Some(issue) = shortfall {
                    report.issues.push(issue);
                }
                self.fetcher.forget_departed(self.roster.current());
                self.set_roster_gauge();
                RefreshOutcome::Replaced {
                    added: diff.added.len(),
                    removed: diff.removed.len(),
                }
            }
            Refresh::Retained(e) => RefreshOutcome::Retained { reason: e.to_string() },
        }
    }

    /// One fetch + aggregate cycle against the current roster.
    async fn collect(&mut self, report: &mut TickReport) -> Result<DataPoint, CollectorError> {
        let roster = self.roster.current();
        let (batch, prices) = tokio::join!(
            self.fetcher.fetch_all(roster),
            self.oracle.fetch(&self.settings.tracked_assets)
        );
        let FetchBatch { positions, failed, queried } = batch;
        report.failed_addresses = failed.len();

        if queried > 0 && failed.len() == queried {
            return Err(CollectorError::CollaboratorUnreachable(
                "exchange",
                format!("all {} position requests failed", queried),
            ));
        }
        let prices = prices?;

        let aggregation = aggregate(&positions, &prices, &self.settings.tracked_assets);
        report.issues.extend(aggregation.issues);

        let point = DataPoint {
            timestamp: Utc::now(),
            prices,
            per_asset: aggregation.per_asset,
            trader_positions: aggregation.trader_positions,
            roster_version: roster.version(),
        };
        self.series.append(point.clone())?;

        for (address, streak) in self.fetcher.persistent_failures() {
            warn!("{} failing for {} consecutive ticks", address.short(), streak);
        }
        Ok(point)
    }

    fn checkpoint(&mut self) -> Result<(), CollectorError> {
        match self.store.checkpoint(&self.series) {
            Ok(receipt) => {
                self.summary.checkpoints += 1;
                info!("Checkpoint {}: {} points", self.summary.checkpoints, receipt.points);
                self.export_metrics();
                Ok(())
            }
            Err(e) => {
                self.summary.persistence_failures += 1;
                error!("Checkpoint failed, series kept in memory: {}", e);
                Err(e)
            }
        }
    }

    /// RUNNING → STOPPED: final unconditional checkpoint, then analysis.
    fn finish(&mut self) -> RunSummary {
        let _ = self.checkpoint();
        self.analyzer.analyze(&self.series);
        self.transition(SchedulerState::Stopped);

        self.summary.points = self.series.len();
        info!(
            "Run complete: {} ticks, {} sampled, {} failed, {} points, {} checkpoints ({} failed)",
            self.summary.ticks.len(),
            self.summary.sampled(),
            self.summary.failed(),
            self.summary.points,
            self.summary.checkpoints,
            self.summary.persistence_failures
        );
        self.summary.clone()
    }

    fn transition(&mut self, next: SchedulerState) {
        info!("Scheduler {:?} → {:?}", self.state, next);
        self.state = next;
    }

    fn set_roster_gauge(&self) {
        if let Some((metrics, _)) = &self.metrics {
            metrics.set_roster_size(self.roster.current().len());
        }
    }

    fn export_metrics(&self) {
        let Some((metrics, Some(path))) = &self.metrics else {
            return;
        };
        if let Some(text) = metrics.render() {
            if let Err(e) = std::fs::write(path, text) {
                warn!("Failed to write metrics to {}: {}", path.display(), e);
            }
        }
    }
}
