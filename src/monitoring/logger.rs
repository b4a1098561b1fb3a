use anyhow::Result;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use crate::data::types::DataPoint;
use crate::storage::record::format_timestamp;

const HEADER: &str = "timestamp,roster_version,roster_size,failed_addresses,asset,price,long_tokens,short_tokens,net_tokens,long_usd,short_usd,net_usd,count";

/// Flat per-tick, per-asset CSV for spreadsheet analysis.
pub struct CsvLogger {
    log_path: String,
}

impl CsvLogger {
    pub fn new(log_path: String) -> Result<Self> {
        // Create CSV file with headers if it doesn't exist
        if !Path::new(&log_path).exists() {
            if let Some(parent) = Path::new(&log_path).parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            let mut file = OpenOptions::new()
                .create(true)
                .write(true)
                .open(&log_path)?;

            writeln!(file, "{}", HEADER)?;
        }

        Ok(Self { log_path })
    }

    /// One row per tracked asset in the data point
    pub fn log_point(&self, point: &DataPoint, roster_size: usize, failed: usize) -> Result<()> {
        let mut file = OpenOptions::new()
            .append(true)
            .open(&self.log_path)?;

        let timestamp = format_timestamp(&point.timestamp);
        for (asset, agg) in &point.per_asset {
            writeln!(
                file,
                "{},{},{},{},{},{:.2},{:.6},{:.6},{:.6},{:.2},{:.2},{:.2},{}",
                timestamp,
                point.roster_version,
                roster_size,
                failed,
                asset,
                point.prices.get(asset).unwrap_or(0.0),
                agg.long_tokens,
                agg.short_tokens,
                agg.net_tokens,
                agg.long_usd,
                agg.short_usd,
                agg.net_usd,
                agg.participant_count
            )?;
        }

        Ok(())
    }
}
