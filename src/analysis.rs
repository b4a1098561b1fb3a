use chrono::Duration;
use tracing::info;

use crate::data::types::TimeSeries;

/// Consumer invoked once on the finished series.
pub trait SeriesAnalyzer {
    fn analyze(&self, series: &TimeSeries);
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssetSummary {
    pub asset: String,
    /// Last price over first price, in percent.
    pub price_change_pct: Option<f64>,
    pub average_net_position: f64,
    /// Pearson correlation of net-token change vs price % change, tick over tick.
    pub correlation: Option<f64>,
    pub paired_samples: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisReport {
    pub points: usize,
    pub duration: Duration,
    pub assets: Vec<AssetSummary>,
}

/// Summaries per asset; `None` when fewer than two points exist.
pub fn summarize(series: &TimeSeries, assets: &[String]) -> Option<AnalysisReport> {
    let points = series.points();
    if points.len() < 2 {
        return None;
    }
    let duration = points[points.len() - 1].timestamp - points[0].timestamp;

    let assets = assets
        .iter()
        .map(|asset| {
            let prices: Vec<f64> = points.iter().map(|p| p.prices.get(asset).unwrap_or(0.0)).collect();
            let nets: Vec<f64> = points.iter()
                .map(|p| p.per_asset.get(asset).map(|a| a.net_tokens).unwrap_or(0.0))
                .collect();

            let (position_changes, price_changes): (Vec<f64>, Vec<f64>) = (1..points.len())
                .filter(|&i| prices[i - 1] > 0.0)
                .map(|i| (nets[i] - nets[i - 1], prices[i] / prices[i - 1] - 1.0))
                .unzip();

            let correlation = if position_changes.len() > 2 {
                pearson(&position_changes, &price_changes)
            } else {
                None
            };

            let first = prices[0];
            let last = prices[prices.len() - 1];

            AssetSummary {
                asset: asset.clone(),
                price_change_pct: (first > 0.0).then(|| (last / first - 1.0) * 100.0),
                average_net_position: nets.iter().sum::<f64>() / nets.len() as f64,
                correlation,
                paired_samples: position_changes.len(),
            }
        })
        .collect();

    Some(AnalysisReport {
        points: points.len(),
        duration,
        assets,
    })
}

/// Sample Pearson correlation; `None` if either side has no variance.
pub fn pearson(xs: &[f64], ys: &[f64]) -> Option<f64> {
    if xs.len() != ys.len() || xs.len() < 2 {
        return None;
    }
    let n = xs.len() as f64;
    let mean_x = xs.iter().sum::<f64>() / n;
    let mean_y = ys.iter().sum::<f64>() / n;

    let (mut cov, mut var_x, mut var_y) = (0.0, 0.0, 0.0);
    for (x, y) in xs.iter().zip(ys) {
        let dx = x - mean_x;
        let dy = y - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }

    if var_x == 0.0 || var_y == 0.0 {
        return None;
    }
    Some(cov / (var_x.sqrt() * var_y.sqrt()))
}

/// Logs the end-of-run correlation summary.
pub struct CorrelationAnalyzer {
    assets: Vec<String>,
}

impl CorrelationAnalyzer {
    pub fn new(assets: Vec<String>) -> Self {
        Self { assets }
    }
}

impl SeriesAnalyzer for CorrelationAnalyzer {
    fn analyze(&self, series: &TimeSeries) {
        let Some(report) = summarize(series, &self.assets) else {
            info!("Not enough data points for analysis ({})", series.len());
            return;
        };

        info!("=== RUN RESULTS ===");
        info!("Data points collected: {}", report.points);
        info!("Duration: {}h {}m", report.duration.num_hours(), report.duration.num_minutes() % 60);

        for summary in &report.assets {
            info!("{} Analysis:", summary.asset);
            match summary.price_change_pct {
                Some(pct) => info!("  Price change: {:.2}%", pct),
                None => info!("  Price change: n/a"),
            }
            match summary.correlation {
                Some(r) => info!("  Position correlation with price change: {:.3}", r),
                None => info!("  Position correlation with price change: n/a ({} samples)", summary.paired_samples),
            }
            info!("  Average net position: {:.4}", summary.average_net_position);
        }
    }
}
