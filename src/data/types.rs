use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::OnceLock;

use crate::error::CollectorError;

const ADDRESS_PATTERN: &str = r"^0x[0-9a-fA-F]{40}$";

static ADDRESS_RE: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();

/// Exchange account key, normalised to lower case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(String);

impl Address {
    pub fn parse(raw: &str) -> Result<Self, CollectorError> {
        let re = ADDRESS_RE
            .get_or_init(|| Regex::new(ADDRESS_PATTERN))
            .as_ref()
            .map_err(|e| CollectorError::DataQuality(e.to_string()))?;
        let trimmed = raw.trim();
        if !re.is_match(trimmed) {
            return Err(CollectorError::DataQuality(format!("invalid address: {:?}", raw)));
        }
        Ok(Self(trimmed.to_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 10 characters, for log lines.
    pub fn short(&self) -> &str {
        &self.0[..10]
    }
}

impl TryFrom<String> for Address {
    type Error = CollectorError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        Address::parse(&raw)
    }
}

impl From<Address> for String {
    fn from(address: Address) -> Self {
        address.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One open position on one asset. Positive size is long, negative is short.
#[derive(Debug, Clone, PartialEq)]
pub struct RawPosition {
    pub address: Address,
    pub asset: String,
    pub signed_size: f64,
}

impl RawPosition {
    pub fn is_active(&self) -> bool {
        self.signed_size != 0.0
    }
}

/// Mark prices captured once per tick, keyed by asset symbol.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PriceSnapshot(BTreeMap<String, f64>);

impl PriceSnapshot {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn insert(&mut self, asset: impl Into<String>, price: f64) {
        self.0.insert(asset.into(), price);
    }

    pub fn get(&self, asset: &str) -> Option<f64> {
        self.0.get(asset).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &f64)> {
        self.0.iter()
    }
}

impl FromIterator<(String, f64)> for PriceSnapshot {
    fn from_iter<I: IntoIterator<Item = (String, f64)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Per-asset long/short/net exposure for one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AssetAggregate {
    pub long_tokens: f64,
    pub short_tokens: f64,
    pub net_tokens: f64,
    pub long_usd: f64,
    pub short_usd: f64,
    pub net_usd: f64,
    #[serde(rename = "count")]
    pub participant_count: usize,
}

/// One address's holding in one tracked asset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraderExposure {
    pub szi: f64,
    pub position_value_usd: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DataPoint {
    pub timestamp: DateTime<Utc>,
    pub prices: PriceSnapshot,
    pub per_asset: BTreeMap<String, AssetAggregate>,
    /// Per-address holdings behind `per_asset`, tracked assets only.
    pub trader_positions: BTreeMap<Address, BTreeMap<String, TraderExposure>>,
    pub roster_version: u64,
}

/// Tracked addresses between refreshes. Replaced wholesale, never patched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Roster {
    addresses: Vec<Address>,
    version: u64,
}

impl Roster {
    /// Builds a roster keeping first occurrences only.
    pub fn new(addresses: Vec<Address>, version: u64) -> Self {
        let mut seen = BTreeSet::new();
        let addresses = addresses
            .into_iter()
            .filter(|a| seen.insert(a.clone()))
            .collect();
        Self { addresses, version }
    }

    pub fn addresses(&self) -> &[Address] {
        &self.addresses
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.addresses.contains(address)
    }

    /// Symmetric difference against the previous roster.
    pub fn diff(&self, previous: &Roster) -> RosterDiff {
        let added = self.addresses.iter()
            .filter(|a| !previous.contains(a))
            .cloned()
            .collect();
        let removed = previous.addresses.iter()
            .filter(|a| !self.contains(a))
            .cloned()
            .collect();
        RosterDiff { added, removed }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RosterDiff {
    pub added: Vec<Address>,
    pub removed: Vec<Address>,
}

impl RosterDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Append-only series ordered by timestamp.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimeSeries {
    points: Vec<DataPoint>,
}

impl TimeSeries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_points(points: Vec<DataPoint>) -> Result<Self, CollectorError> {
        let mut series = Self::new();
        for point in points {
            series.append(point)?;
        }
        Ok(series)
    }

    pub fn append(&mut self, point: DataPoint) -> Result<(), CollectorError> {
        if let Some(last) = self.points.last() {
            if point.timestamp < last.timestamp {
                return Err(CollectorError::DataQuality(format!(
                    "data point at {} precedes last point at {}",
                    point.timestamp, last.timestamp
                )));
            }
        }
        self.points.push(point);
        Ok(())
    }

    pub fn points(&self) -> &[DataPoint] {
        &self.points
    }

    pub fn last(&self) -> Option<&DataPoint> {
        self.points.last()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_address_normalised_and_validated() {
        let a = Address::parse("0xABCDEF0123456789abcdef0123456789ABCDEF01").unwrap();
        assert_eq!(a.as_str(), "0xabcdef0123456789abcdef0123456789abcdef01");
        assert_eq!(a.short(), "0xabcdef01");

        assert!(Address::parse("0x1234").is_err());
        assert!(Address::parse("not-an-address").is_err());
    }

    #[test]
    fn test_address_deserialize_goes_through_parse() {
        let a: Address = serde_json::from_value(serde_json::json!("0xABCDEF0123456789abcdef0123456789ABCDEF01")).unwrap();
        assert_eq!(a.short(), "0xabcdef01");
        assert_eq!(serde_json::to_value(&a).unwrap(), serde_json::json!(a.as_str()));

        assert!(serde_json::from_value::<Address>(serde_json::json!("0x12")).is_err());
        assert!(serde_json::from_value::<Address>(serde_json::json!("")).is_err());
    }

    #[test]
    fn test_roster_drops_duplicates_and_diffs() {
        let old = Roster::new(vec![addr(1), addr(2), addr(1)], 0);
        assert_eq!(old.len(), 2);

        let new = Roster::new(vec![addr(2), addr(3)], 1);
        let diff = new.diff(&old);
        assert_eq!(diff.added, vec![addr(3)]);
        assert_eq!(diff.removed, vec![addr(1)]);

        assert!(new.diff(&new).is_empty());
    }

    #[test]
    fn test_series_rejects_out_of_order_points() {
        let now = Utc::now();
        let mut series = TimeSeries::new();
        series.append(point_at(now)).unwrap();
        series.append(point_at(now)).unwrap();
        assert!(series.append(point_at(now - Duration::seconds(1))).is_err());
        assert_eq!(series.len(), 2);
    }
}
