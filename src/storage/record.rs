//! Persisted record layout for data points.
//!
//! ```text
//! {
//!   "btc_positions": { "long_tokens", "short_tokens", "net_tokens",
//!                      "long_usd", "short_usd", "net_usd", "count" },
//!   "btc_price": 50000.0,
//!   "eth_positions": { ... },
//!   "eth_price": 3000.0,
//!   "roster_version": 0,
//!   "timestamp": "2026-10-18T12:00:00.123456Z"
//! }
//! ```
//!
//! Keys come out sorted, so equal series always encode to equal bytes.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::data::types::{Address, AssetAggregate, DataPoint, PriceSnapshot, TimeSeries, TraderExposure};

const POSITIONS_SUFFIX: &str = "_positions";
const PRICE_SUFFIX: &str = "_price";

/// Older files used `long`/`short`/`net` and may omit fields entirely.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct StoredAggregate {
    #[serde(alias = "long")]
    long_tokens: f64,
    #[serde(alias = "short")]
    short_tokens: f64,
    #[serde(alias = "net")]
    net_tokens: f64,
    long_usd: f64,
    short_usd: f64,
    net_usd: f64,
    count: usize,
}

impl From<StoredAggregate> for AssetAggregate {
    fn from(s: StoredAggregate) -> Self {
        AssetAggregate {
            long_tokens: s.long_tokens,
            short_tokens: s.short_tokens,
            net_tokens: s.net_tokens,
            long_usd: s.long_usd,
            short_usd: s.short_usd,
            net_usd: s.net_usd,
            participant_count: s.count,
        }
    }
}

pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// RFC 3339, or a naive ISO-8601 datetime taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// `<asset>_positions` block of a raw record; absent or malformed reads as zeros.
pub fn positions_field(record: &Value, asset: &str) -> AssetAggregate {
    record
        .get(format!("{}{}", asset.to_lowercase(), POSITIONS_SUFFIX))
        .and_then(|field| serde_json::from_value::<StoredAggregate>(field.clone()).ok())
        .unwrap_or_default()
        .into()
}

pub fn price_field(record: &Value, asset: &str) -> f64 {
    record
        .get(format!("{}{}", asset.to_lowercase(), PRICE_SUFFIX))
        .and_then(Value::as_f64)
        .unwrap_or(0.0)
}

const TRADER_POSITIONS: &str = "trader_positions";

pub fn to_record(point: &DataPoint) -> Result<Value> {
    let mut record = Map::new();
    record.insert("timestamp".into(), Value::String(format_timestamp(&point.timestamp)));
    record.insert("roster_version".into(), Value::from(point.roster_version));

    for (asset, price) in point.prices.iter() {
        record.insert(format!("{}{}", asset.to_lowercase(), PRICE_SUFFIX), Value::from(*price));
    }
    for (asset, aggregate) in &point.per_asset {
        record.insert(
            format!("{}{}", asset.to_lowercase(), POSITIONS_SUFFIX),
            serde_json::to_value(aggregate)?,
        );
    }
    record.insert(TRADER_POSITIONS.into(), serde_json::to_value(&point.trader_positions)?);
    Ok(Value::Object(record))
}

/// Maps a lower-cased key prefix back to the configured symbol. Symbols
/// outside `tracked_assets` come back upper-cased.
fn symbol_for(key_asset: &str, tracked_assets: &[String]) -> String {
    tracked_assets
        .iter()
        .find(|asset| asset.to_lowercase() == key_asset)
        .cloned()
        .unwrap_or_else(|| key_asset.to_uppercase())
}

/// Per-address holdings; unreadable addresses or entries are dropped.
fn trader_positions_of(field: Option<&Value>) -> BTreeMap<Address, BTreeMap<String, TraderExposure>> {
    let Some(traders) = field.and_then(Value::as_object) else {
        return BTreeMap::new();
    };
    traders
        .iter()
        .filter_map(|(raw, holdings)| {
            let address = Address::parse(raw).ok()?;
            let holdings = holdings
                .as_object()?
                .iter()
                .filter_map(|(asset, exposure)| {
                    let exposure = serde_json::from_value(exposure.clone()).ok()?;
                    Some((asset.clone(), exposure))
                })
                .collect();
            Some((address, holdings))
        })
        .collect()
}

pub fn from_record(value: &Value, tracked_assets: &[String]) -> Result<DataPoint> {
    let record = value.as_object().context("record is not an object")?;

    let raw_ts = record
        .get("timestamp")
        .and_then(Value::as_str)
        .context("record has no timestamp")?;
    let timestamp = parse_timestamp(raw_ts)
        .with_context(|| format!("unparsable timestamp {:?}", raw_ts))?;

    let mut prices = PriceSnapshot::new();
    let mut per_asset = BTreeMap::new();
    for (key, field) in record {
        if let Some(asset) = key.strip_suffix(PRICE_SUFFIX) {
            if let Some(price) = field.as_f64() {
                prices.insert(symbol_for(asset, tracked_assets), price);
            }
        } else if let Some(asset) = key.strip_suffix(POSITIONS_SUFFIX) {
            if key == TRADER_POSITIONS {
                continue;
            }
            let stored: StoredAggregate = serde_json::from_value(field.clone())
                .with_context(|| format!("bad {} block", key))?;
            per_asset.insert(symbol_for(asset, tracked_assets), stored.into());
        }
    }

    Ok(DataPoint {
        timestamp,
        prices,
        per_asset,
        trader_positions: trader_positions_of(record.get(TRADER_POSITIONS)),
        roster_version: record.get("roster_version").and_then(Value::as_u64).unwrap_or(0),
    })
}

/// A persisted series split into readable points and the raw records that
/// could not be decoded.
#[derive(Debug, Clone, Default)]
pub struct DecodedSeries {
    pub series: TimeSeries,
    pub unreadable: Vec<Value>,
}

/// Pretty-printed JSON array, one record per point. `carried` records are
/// written verbatim ahead of the points so a rewrite never loses them.
pub fn encode_series(series: &TimeSeries, carried: &[Value]) -> Result<Vec<u8>> {
    let mut records = carried.to_vec();
    for point in series.points() {
        records.push(to_record(point)?);
    }
    Ok(serde_json::to_vec_pretty(&records)?)
}

/// Decodes a persisted array, ordered by timestamp. Records that cannot be
/// read are returned untouched in `unreadable`.
pub fn decode_series(bytes: &[u8], tracked_assets: &[String]) -> Result<DecodedSeries> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(DecodedSeries::default());
    }
    let records: Vec<Value> = serde_json::from_slice(bytes).context("series file is not a JSON array")?;

    let mut unreadable = Vec::new();
    let mut points = Vec::with_capacity(records.len());
    for record in records {
        match from_record(&record, tracked_assets) {
            Ok(point) => points.push(point),
            Err(_) => unreadable.push(record),
        }
    }
    points.sort_by_key(|p| p.timestamp);

    Ok(DecodedSeries {
        series: TimeSeries::from_points(points)?,
        unreadable,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::types::fixtures::addr;
    use chrono::TimeZone;
    use serde_json::json;

    fn sample_point() -> DataPoint {
        let mut prices = PriceSnapshot::new();
        prices.insert("BTC", 50000.0);
        prices.insert("ETH", 3000.0);
        let mut per_asset = BTreeMap::new();
        per_asset.insert(
            "BTC".to_string(),
            AssetAggregate {
                long_tokens: 1.5,
                short_tokens: 0.5,
                net_tokens: 1.0,
                long_usd: 75000.0,
                short_usd: 25000.0,
                net_usd: 50000.0,
                participant_count: 2,
            },
        );
        per_asset.insert("ETH".to_string(), AssetAggregate::default());
        let mut trader_positions = BTreeMap::new();
        trader_positions.insert(
            addr(1),
            BTreeMap::from([("BTC".to_string(), TraderExposure { szi: 1.5, position_value_usd: 75000.0 })]),
        );
        DataPoint {
            timestamp: Utc.with_ymd_and_hms(2026, 10, 18, 12, 0, 0).unwrap(),
            prices,
            per_asset,
            trader_positions,
            roster_version: 3,
        }
    }

    fn tracked() -> Vec<String> {
        vec!["BTC".to_string(), "ETH".to_string()]
    }

    #[test]
    fn test_record_field_names() {
        let record = to_record(&sample_point()).unwrap();
        assert_eq!(record["timestamp"], "2026-10-18T12:00:00Z");
        assert_eq!(record["btc_price"], 50000.0);
        assert_eq!(record["roster_version"], 3);
        assert_eq!(record["btc_positions"]["net_usd"], 50000.0);
        assert_eq!(record["btc_positions"]["count"], 2);
        assert_eq!(record["eth_positions"]["long_tokens"], 0.0);
        assert_eq!(record["trader_positions"][addr(1).as_str()]["BTC"]["szi"], 1.5);
        assert_eq!(record["trader_positions"][addr(1).as_str()]["BTC"]["position_value_usd"], 75000.0);
    }

    #[test]
    fn test_mixed_case_symbols_survive_round_trip() {
        let mut point = sample_point();
        point.prices.insert("kPEPE", 0.0123);
        point.per_asset.insert(
            "kPEPE".to_string(),
            AssetAggregate { long_tokens: 1000.0, long_usd: 12.3, net_tokens: 1000.0, net_usd: 12.3, participant_count: 1, ..AssetAggregate::default() },
        );
        let series = TimeSeries::from_points(vec![point]).unwrap();
        let assets = vec!["BTC".to_string(), "ETH".to_string(), "kPEPE".to_string()];

        let decoded = decode_series(&encode_series(&series, &[]).unwrap(), &assets).unwrap();
        assert_eq!(decoded.series, series);
        assert_eq!(decoded.series.points()[0].prices.get("kPEPE"), Some(0.0123));
    }

    #[test]
    fn test_reads_legacy_records() {
        let legacy = json!({
            "timestamp": "2025-07-01 09:30:00.250000",
            "btc_price": 107000.5,
            "eth_price": 2450.0,
            "btc_positions": { "long": 12.0, "short": 4.5, "net": 7.5, "count": 9 },
            "eth_positions": { "long": 0, "short": 0, "net": 0, "count": 0 }
        });

        let point = from_record(&legacy, &tracked()).unwrap();
        assert_eq!(point.timestamp.to_rfc3339(), "2025-07-01T09:30:00.250+00:00");
        assert_eq!(point.prices.get("BTC"), Some(107000.5));
        assert_eq!(point.per_asset["BTC"].net_tokens, 7.5);
        assert_eq!(point.per_asset["BTC"].long_usd, 0.0);
        assert_eq!(point.per_asset["BTC"].participant_count, 9);
        assert_eq!(point.roster_version, 0);
        assert!(point.trader_positions.is_empty());
    }

    #[test]
    fn test_bad_trader_entries_are_dropped() {
        let record = json!({
            "timestamp": "2026-10-18T12:00:00Z",
            "trader_positions": {
                "0xnope": { "BTC": { "szi": 1.0 } },
                format!("0x{:040x}", 2): { "ETH": { "szi": -2.0 }, "BTC": "garbage" }
            }
        });

        let point = from_record(&record, &tracked()).unwrap();
        assert_eq!(point.trader_positions.len(), 1);
        let holdings = &point.trader_positions[&addr(2)];
        assert_eq!(holdings.len(), 1);
        assert_eq!(holdings["ETH"], TraderExposure { szi: -2.0, position_value_usd: 0.0 });
    }

    #[test]
    fn test_decode_skips_bad_records_and_sorts() {
        let bytes = serde_json::to_vec(&json!([
            { "timestamp": "2026-01-01T00:10:00Z", "btc_price": 2.0 },
            { "btc_price": 1.0 },
            { "timestamp": "2026-01-01T00:05:00Z", "btc_price": 1.0 }
        ]))
        .unwrap();

        let decoded = decode_series(&bytes, &tracked()).unwrap();
        assert_eq!(decoded.unreadable, vec![json!({ "btc_price": 1.0 })]);
        assert_eq!(decoded.series.len(), 2);
        assert_eq!(decoded.series.points()[0].prices.get("BTC"), Some(1.0));

        // Unreadable records are written back ahead of the points
        let rewritten: Vec<Value> =
            serde_json::from_slice(&encode_series(&decoded.series, &decoded.unreadable).unwrap()).unwrap();
        assert_eq!(rewritten.len(), 3);
        assert_eq!(rewritten[0], json!({ "btc_price": 1.0 }));
    }

    #[test]
    fn test_blank_file_is_empty_series() {
        let decoded = decode_series(b"  \n", &tracked()).unwrap();
        assert!(decoded.series.is_empty());
        assert!(decoded.unreadable.is_empty());
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let mut series = TimeSeries::new();
        series.append(sample_point()).unwrap();
        assert_eq!(encode_series(&series, &[]).unwrap(), encode_series(&series.clone(), &[]).unwrap());

        let decoded = decode_series(&encode_series(&series, &[]).unwrap(), &tracked()).unwrap();
        assert_eq!(decoded.series, series);
    }
}
