//! Read side for dashboards and ad-hoc inspection of a persisted series.
//!
//! Works on loosely-typed records so partially written or older files still
//! render: unknown fields are ignored and missing ones read as zero.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::Value;
use std::path::Path;

use crate::data::types::TraderExposure;
use crate::storage::record::{parse_timestamp, positions_field, price_field};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NetPosition {
    pub asset: String,
    pub price: f64,
    pub long_usd: f64,
    pub short_usd: f64,
    pub net_usd: f64,
    pub long_tokens: f64,
    pub short_tokens: f64,
    pub net_tokens: f64,
    pub traders: usize,
}

/// One roster member's holdings in the tracked assets.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraderRow {
    pub address: String,
    pub positions: Vec<(String, TraderExposure)>,
}

/// Raw records of a canonical series file. A missing or blank file is an
/// empty series.
pub fn load_records(path: &Path) -> Result<Vec<Value>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }
    serde_json::from_slice(&bytes).with_context(|| format!("{} is not a JSON array", path.display()))
}

/// Records stamped within the last `hours` before `now`, oldest first.
/// Records without a readable timestamp are skipped.
pub fn time_series<'a>(records: &'a [Value], hours: i64, now: DateTime<Utc>) -> Vec<&'a Value> {
    let cutoff = now - Duration::hours(hours);
    let mut window: Vec<(DateTime<Utc>, &Value)> = records
        .iter()
        .filter_map(|record| {
            let ts = record.get("timestamp").and_then(Value::as_str).and_then(parse_timestamp)?;
            (ts >= cutoff && ts <= now).then_some((ts, record))
        })
        .collect();
    window.sort_by_key(|(ts, _)| *ts);
    window.into_iter().map(|(_, record)| record).collect()
}

/// Per-asset exposure from one record.
pub fn net_positions(latest: &Value, assets: &[String]) -> Vec<NetPosition> {
    assets
        .iter()
        .map(|asset| {
            let agg = positions_field(latest, asset);
            NetPosition {
                asset: asset.clone(),
                price: price_field(latest, asset),
                long_usd: agg.long_usd,
                short_usd: agg.short_usd,
                net_usd: agg.net_usd,
                long_tokens: agg.long_tokens,
                short_tokens: agg.short_tokens,
                net_tokens: agg.net_tokens,
                traders: agg.participant_count,
            }
        })
        .collect()
}

/// Per-address holdings from one record, limited to `assets`. Addresses
/// holding none of them are left out; missing fields read as 0.
pub fn trader_positions(latest: &Value, assets: &[String]) -> Vec<TraderRow> {
    let Some(traders) = latest.get("trader_positions").and_then(Value::as_object) else {
        return Vec::new();
    };
    traders
        .iter()
        .filter_map(|(address, holdings)| {
            let positions: Vec<(String, TraderExposure)> = assets
                .iter()
                .filter_map(|asset| {
                    let exposure = holdings.get(asset)?;
                    let exposure = serde_json::from_value(exposure.clone()).unwrap_or_default();
                    Some((asset.clone(), exposure))
                })
                .collect();
            (!positions.is_empty()).then(|| TraderRow { address: address.clone(), positions })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::series_store::scratch_dir;
    use chrono::TimeZone;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 18, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_missing_and_blank_files_are_empty() {
        let dir = scratch_dir("report");
        assert!(load_records(&dir.join("absent.json")).unwrap().is_empty());

        let blank = dir.join("blank.json");
        std::fs::write(&blank, "\n").unwrap();
        assert!(load_records(&blank).unwrap().is_empty());

        let empty = dir.join("empty.json");
        std::fs::write(&empty, "[]").unwrap();
        assert!(load_records(&empty).unwrap().is_empty());
    }

    #[test]
    fn test_time_window_skips_bad_timestamps() {
        let records = vec![
            json!({ "timestamp": "2026-10-18T11:30:00Z", "btc_price": 2.0 }),
            json!({ "timestamp": "2026-10-17T12:00:00Z", "btc_price": 0.5 }),
            json!({ "timestamp": "not a time" }),
            json!({ "btc_price": 9.0 }),
            json!({ "timestamp": "2026-10-18T10:15:00", "btc_price": 1.0 }),
        ];

        let window = time_series(&records, 6, now());
        let prices: Vec<f64> = window.iter().map(|r| price_field(r, "BTC")).collect();
        assert_eq!(prices, vec![1.0, 2.0]);

        assert_eq!(time_series(&records, 48, now()).len(), 3);
    }

    #[test]
    fn test_net_positions_default_missing_fields() {
        let latest = json!({
            "timestamp": "2026-10-18T11:55:00Z",
            "btc_price": 50000.0,
            "btc_positions": {
                "long_tokens": 1.5, "short_tokens": 0.5, "net_tokens": 1.0,
                "long_usd": 75000.0, "short_usd": 25000.0, "net_usd": 50000.0, "count": 2
            },
            "eth_positions": { "net": -2.0 }
        });

        let rows = net_positions(&latest, &["BTC".into(), "ETH".into(), "SOL".into()]);

        assert_eq!(rows[0].net_usd, 50000.0);
        assert_eq!(rows[0].long_tokens, 1.5);
        assert_eq!(rows[0].traders, 2);
        assert_eq!(rows[1].net_tokens, -2.0);
        assert_eq!(rows[1].net_usd, 0.0);
        assert_eq!(rows[1].price, 0.0);
        assert_eq!(rows[2].asset, "SOL");
        assert_eq!(rows[2].long_usd, 0.0);
    }

    #[test]
    fn test_trader_positions_filtered_to_assets() {
        let latest = json!({
            "timestamp": "2026-10-18T11:55:00Z",
            "trader_positions": {
                "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa": {
                    "BTC": { "szi": 1.5, "position_value_usd": 75000.0 },
                    "kPEPE": { "szi": -1000.0 }
                },
                "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb": { "SOL": { "szi": 3.0 } }
            }
        });

        let rows = trader_positions(&latest, &["BTC".into(), "kPEPE".into()]);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].address, "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa");
        assert_eq!(rows[0].positions[0], ("BTC".to_string(), TraderExposure { szi: 1.5, position_value_usd: 75000.0 }));
        assert_eq!(rows[0].positions[1], ("kPEPE".to_string(), TraderExposure { szi: -1000.0, position_value_usd: 0.0 }));

        assert!(trader_positions(&json!({ "timestamp": "2026-10-18T11:55:00Z" }), &["BTC".into()]).is_empty());
    }
}
