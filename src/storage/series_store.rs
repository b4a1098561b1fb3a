use anyhow::Context;
use chrono::Utc;
use serde_json::Value;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::data::types::TimeSeries;
use crate::error::CollectorError;
use crate::storage::index::CheckpointIndex;
use crate::storage::record::{decode_series, encode_series};

pub const CANONICAL_FILE: &str = "series.json";

/// Durable home of one run's time series.
pub trait SeriesStore {
    /// Previously persisted series for this run, or an empty one.
    fn load_latest(&mut self) -> Result<TimeSeries, CollectorError>;

    /// Overwrite the canonical output with `series` and add one snapshot.
    fn checkpoint(&mut self, series: &TimeSeries) -> Result<CheckpointReceipt, CollectorError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct CheckpointReceipt {
    pub canonical: PathBuf,
    pub snapshot: PathBuf,
    pub points: usize,
}

/// `<data_dir>/<run_id>/series.json` plus `series_<stamp>.json` snapshots,
/// each checkpoint logged in the index.
pub struct FileSeriesStore {
    run_id: String,
    run_dir: PathBuf,
    tracked_assets: Vec<String>,
    index: CheckpointIndex,
    /// Records from the loaded file that could not be decoded. Written back
    /// unchanged on every checkpoint.
    carried: Vec<Value>,
}

impl FileSeriesStore {
    pub fn open(
        data_dir: &Path,
        run_id: &str,
        tracked_assets: &[String],
        index: CheckpointIndex,
    ) -> anyhow::Result<Self> {
        let run_dir = data_dir.join(run_id);
        fs::create_dir_all(&run_dir)
            .with_context(|| format!("Failed to create run directory {}", run_dir.display()))?;

        match index.run(run_id)? {
            Some(existing) => info!(
                "Resuming run {} (started {}, {} checkpoints so far)",
                existing.run_id,
                existing.started_at,
                index.count_checkpoints(run_id)?
            ),
            None => info!("New run {}", run_id),
        }

        let store = Self {
            run_id: run_id.to_string(),
            run_dir,
            tracked_assets: tracked_assets.to_vec(),
            index,
            carried: Vec::new(),
        };
        store.index.register_run(run_id, &store.canonical_path().to_string_lossy())?;
        Ok(store)
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    pub fn canonical_path(&self) -> PathBuf {
        self.run_dir.join(CANONICAL_FILE)
    }

    fn write_canonical(&self, bytes: &[u8]) -> anyhow::Result<PathBuf> {
        let canonical = self.canonical_path();
        let staging = self.run_dir.join(format!("{}.tmp", CANONICAL_FILE));
        fs::write(&staging, bytes)
            .with_context(|| format!("Failed to write {}", staging.display()))?;
        fs::rename(&staging, &canonical)
            .with_context(|| format!("Failed to replace {}", canonical.display()))?;
        Ok(canonical)
    }

    /// Snapshots are created, never overwritten.
    fn write_snapshot(&self, bytes: &[u8]) -> anyhow::Result<PathBuf> {
        let stamp = Utc::now().format("%Y%m%d_%H%M%S").to_string();
        for attempt in 0u32.. {
            let name = match attempt {
                0 => format!("series_{}.json", stamp),
                n => format!("series_{}_{}.json", stamp, n),
            };
            let path = self.run_dir.join(name);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    file.write_all(bytes)
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    return Ok(path);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => {
                    return Err(e).with_context(|| format!("Failed to create {}", path.display()));
                }
            }
        }
        anyhow::bail!("no free snapshot name for {}", stamp)
    }
}

impl SeriesStore for FileSeriesStore {
    fn load_latest(&mut self) -> Result<TimeSeries, CollectorError> {
        let canonical = self.canonical_path();
        let bytes = match fs::read(&canonical) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(TimeSeries::new()),
            Err(e) => {
                return Err(anyhow::Error::from(e)
                    .context(format!("Failed to read {}", canonical.display()))
                    .into())
            }
        };

        let decoded = decode_series(&bytes, &self.tracked_assets)
            .with_context(|| format!("Failed to decode {}", canonical.display()))?;
        if !decoded.unreadable.is_empty() {
            warn!(
                "{} unreadable records in {}; keeping them as-is in future checkpoints",
                decoded.unreadable.len(),
                canonical.display()
            );
        }
        self.carried = decoded.unreadable;

        let series = decoded.series;
        match series.last() {
            Some(last) => info!(
                "Loaded {} existing data points from {} (last at {})",
                series.len(),
                canonical.display(),
                last.timestamp
            ),
            None => info!("No readable data points in {}", canonical.display()),
        }
        Ok(series)
    }

    fn checkpoint(&mut self, series: &TimeSeries) -> Result<CheckpointReceipt, CollectorError> {
        let bytes = encode_series(series, &self.carried)?;
        let canonical = self.write_canonical(&bytes)?;
        let snapshot = self.write_snapshot(&bytes)?;
        self.index.record_checkpoint(&self.run_id, &snapshot.to_string_lossy(), series.len())?;

        info!("Data saved to {} and {}", canonical.display(), snapshot.display());
        Ok(CheckpointReceipt {
            canonical,
            snapshot,
            points: series.len(),
        })
    }
}


#[cfg(test)]
pub(crate) fn scratch_dir(label: &str) -> PathBuf {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let dir = std::env::temp_dir().join(format!("hl-positioning-{}-{}-{}", label, std::process::id(), nanos));
    fs::create_dir_all(&dir).unwrap();
    dir
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::types::fixtures::point_at;
    use chrono::Duration;

    fn store(dir: &Path, run_id: &str) -> FileSeriesStore {
        let assets = vec!["BTC".to_string(), "ETH".to_string()];
        FileSeriesStore::open(dir, run_id, &assets, CheckpointIndex::open(":memory:").unwrap()).unwrap()
    }

    fn series_of(n: i64) -> TimeSeries {
        let start = Utc::now() - Duration::minutes(60);
        TimeSeries::from_points((0..n).map(|i| point_at(start + Duration::minutes(5 * i))).collect()).unwrap()
    }

    #[test]
    fn test_missing_file_loads_empty() {
        let dir = scratch_dir("empty");
        assert!(store(&dir, "run_a").load_latest().unwrap().is_empty());
    }

    #[test]
    fn test_checkpoint_is_idempotent() {
        let dir = scratch_dir("idem");
        let mut store = store(&dir, "run_a");
        let series = series_of(3);

        let first = store.checkpoint(&series).unwrap();
        let first_bytes = fs::read(&first.canonical).unwrap();
        let second = store.checkpoint(&series).unwrap();
        let second_bytes = fs::read(&second.canonical).unwrap();

        assert_eq!(first_bytes, second_bytes);
        assert_ne!(first.snapshot, second.snapshot);
        assert_eq!(fs::read(&first.snapshot).unwrap(), first_bytes);
        assert_eq!(store.index.count_checkpoints("run_a").unwrap(), 2);
        let logged = store.index.checkpoints("run_a").unwrap();
        assert_eq!(logged[1].snapshot_path, second.snapshot.to_string_lossy());
        assert_eq!(logged[1].point_count, 3);
    }

    #[test]
    fn test_checkpoint_overwrites_and_reloads() {
        let dir = scratch_dir("reload");
        let mut store = store(&dir, "run_a");

        store.checkpoint(&series_of(5)).unwrap();
        let latest = series_of(2);
        store.checkpoint(&latest).unwrap();

        let loaded = store.load_latest().unwrap();
        assert_eq!(loaded, latest);
    }

    #[test]
    fn test_runs_are_isolated() {
        let dir = scratch_dir("isolated");
        let mut a = store(&dir, "run_a");
        a.checkpoint(&series_of(4)).unwrap();

        let mut b = store(&dir, "run_b");
        assert!(b.load_latest().unwrap().is_empty());
    }

    #[test]
    fn test_unreadable_records_survive_resume() {
        let dir = scratch_dir("carry");
        fs::create_dir_all(dir.join("run_a")).unwrap();
        fs::write(
            dir.join("run_a").join(CANONICAL_FILE),
            r#"[{"btc_price": 1.0}, {"timestamp": "2026-01-01T00:00:00Z", "btc_price": 2.0}]"#,
        )
        .unwrap();

        let mut store = store(&dir, "run_a");
        let mut series = store.load_latest().unwrap();
        assert_eq!(series.len(), 1);
        series.append(point_at(Utc::now())).unwrap();
        let receipt = store.checkpoint(&series).unwrap();

        let written: Vec<Value> = serde_json::from_slice(&fs::read(&receipt.canonical).unwrap()).unwrap();
        assert_eq!(written.len(), 3);
        assert_eq!(written[0], serde_json::json!({ "btc_price": 1.0 }));
        assert_eq!(store.load_latest().unwrap().len(), 2);
    }
}
