use std::collections::BTreeMap;

use crate::data::types::{Address, AssetAggregate, PriceSnapshot, RawPosition, TraderExposure};
use crate::error::DataQualityIssue;

/// Per-asset aggregates for one tick plus any pricing gaps found on the way.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Aggregation {
    pub per_asset: BTreeMap<String, AssetAggregate>,
    pub trader_positions: BTreeMap<Address, BTreeMap<String, TraderExposure>>,
    pub issues: Vec<DataQualityIssue>,
}

/// Folds raw positions into long/short/net totals for every tracked asset.
///
/// Untracked assets and zero-size positions are ignored. Every tracked
/// asset gets an entry, zeroed if nothing contributed. USD figures are the
/// token totals times the snapshot price, so `net = long - short` holds
/// exactly in both units.
pub fn aggregate(
    positions: &[RawPosition],
    prices: &PriceSnapshot,
    tracked_assets: &[String],
) -> Aggregation {
    let mut per_asset: BTreeMap<String, AssetAggregate> = tracked_assets
        .iter()
        .map(|asset| (asset.clone(), AssetAggregate::default()))
        .collect();
    let mut trader_positions: BTreeMap<Address, BTreeMap<String, TraderExposure>> = BTreeMap::new();
    let mut unpriced: BTreeMap<&str, usize> = BTreeMap::new();

    for position in positions.iter().filter(|p| p.is_active()) {
        let Some(agg) = per_asset.get_mut(&position.asset) else {
            continue;
        };
        let Some(price) = prices.get(&position.asset) else {
            *unpriced.entry(position.asset.as_str()).or_default() += 1;
            continue;
        };
        trader_positions
            .entry(position.address.clone())
            .or_default()
            .insert(
                position.asset.clone(),
                TraderExposure {
                    szi: position.signed_size,
                    position_value_usd: position.signed_size.abs() * price,
                },
            );

        if position.signed_size > 0.0 {
            agg.long_tokens += position.signed_size;
        } else {
            agg.short_tokens += position.signed_size.abs();
        }
        agg.participant_count += 1;
    }

    let mut issues = Vec::new();
    for (asset, agg) in per_asset.iter_mut() {
        let price = prices.get(asset).unwrap_or(0.0);
        agg.net_tokens = agg.long_tokens - agg.short_tokens;
        agg.long_usd = agg.long_tokens * price;
        agg.short_usd = agg.short_tokens * price;
        agg.net_usd = agg.long_usd - agg.short_usd;

        if price == 0.0 && agg.participant_count > 0 && prices.get(asset).is_some() {
            issues.push(DataQualityIssue::ZeroPrice {
                asset: asset.clone(),
                positions: agg.participant_count,
            });
        }
    }
    for (asset, count) in unpriced {
        issues.push(DataQualityIssue::MissingPrice {
            asset: asset.to_string(),
            positions: count,
        });
    }

    Aggregation { per_asset, trader_positions, issues }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::types::fixtures::{addr, pos};

    fn tracked() -> Vec<String> {
        vec!["BTC".to_string(), "ETH".to_string()]
    }

    fn prices(entries: &[(&str, f64)]) -> PriceSnapshot {
        entries.iter().map(|(a, p)| (a.to_string(), *p)).collect()
    }

    #[test]
    fn test_two_trader_btc_scenario() {
        let positions = vec![pos(1, "BTC", 1.5), pos(2, "BTC", -0.5)];
        let result = aggregate(&positions, &prices(&[("BTC", 50000.0), ("ETH", 3000.0)]), &tracked());

        let btc = result.per_asset["BTC"];
        assert_eq!(btc.long_tokens, 1.5);
        assert_eq!(btc.short_tokens, 0.5);
        assert_eq!(btc.net_tokens, 1.0);
        assert_eq!(btc.long_usd, 75000.0);
        assert_eq!(btc.short_usd, 25000.0);
        assert_eq!(btc.net_usd, 50000.0);
        assert_eq!(btc.participant_count, 2);
        assert!(result.issues.is_empty());
    }

    #[test]
    fn test_trader_positions_follow_included_positions() {
        let positions = vec![
            pos(1, "BTC", 1.5),
            pos(1, "ETH", -2.0),
            pos(1, "SOL", 10.0),
            pos(2, "BTC", 0.0),
            pos(3, "ETH", 1.0),
        ];
        let result = aggregate(&positions, &prices(&[("BTC", 50000.0)]), &tracked());

        assert_eq!(result.trader_positions.len(), 1);
        let first = &result.trader_positions[&addr(1)];
        assert_eq!(first.len(), 1);
        assert_eq!(first["BTC"], TraderExposure { szi: 1.5, position_value_usd: 75000.0 });
    }

    #[test]
    fn test_quiet_asset_still_has_zeroed_entry() {
        let result = aggregate(&[pos(1, "BTC", 2.0)], &prices(&[("BTC", 1.0), ("ETH", 1.0)]), &tracked());
        assert_eq!(result.per_asset["ETH"], AssetAggregate::default());
        assert_eq!(result.per_asset.len(), 2);
    }

    #[test]
    fn test_untracked_and_flat_positions_excluded() {
        let positions = vec![
            pos(1, "SOL", 100.0),
            pos(2, "BTC", 0.0),
            pos(3, "BTC", -0.25),
        ];
        let result = aggregate(&positions, &prices(&[("BTC", 40000.0), ("SOL", 150.0)]), &tracked());

        assert!(!result.per_asset.contains_key("SOL"));
        let btc = result.per_asset["BTC"];
        assert_eq!(btc.participant_count, 1);
        assert_eq!(btc.net_tokens, -0.25);
        assert_eq!(btc.net_usd, -10000.0);
    }

    #[test]
    fn test_zero_price_keeps_tokens_and_reports() {
        let positions = vec![pos(1, "ETH", 3.0), pos(2, "ETH", -1.0)];
        let result = aggregate(&positions, &prices(&[("BTC", 50000.0), ("ETH", 0.0)]), &tracked());

        let eth = result.per_asset["ETH"];
        assert_eq!(eth.net_tokens, 2.0);
        assert_eq!(eth.net_usd, 0.0);
        assert_eq!(
            result.issues,
            vec![DataQualityIssue::ZeroPrice { asset: "ETH".into(), positions: 2 }]
        );
    }

    #[test]
    fn test_missing_price_excludes_and_reports() {
        let result = aggregate(&[pos(1, "ETH", 3.0)], &prices(&[("BTC", 50000.0)]), &tracked());

        assert_eq!(result.per_asset["ETH"], AssetAggregate::default());
        assert_eq!(
            result.issues,
            vec![DataQualityIssue::MissingPrice { asset: "ETH".into(), positions: 1 }]
        );
    }

    #[test]
    fn test_invariants_hold_over_mixed_book() {
        let sizes = [0.5, -1.25, 2.0, -0.75, 3.5, -0.125, 0.0, 1.0];
        let positions: Vec<_> = sizes
            .iter()
            .enumerate()
            .map(|(i, s)| pos(i as u64 + 1, if i % 2 == 0 { "BTC" } else { "ETH" }, *s))
            .collect();
        let result = aggregate(&positions, &prices(&[("BTC", 61234.5), ("ETH", 3210.75)]), &tracked());

        for asset in tracked() {
            let agg = result.per_asset[&asset];
            let signed_sum: f64 = positions.iter()
                .filter(|p| p.asset == asset)
                .map(|p| p.signed_size)
                .sum();
            assert_eq!(agg.net_tokens, agg.long_tokens - agg.short_tokens);
            assert_eq!(agg.net_usd, agg.long_usd - agg.short_usd);
            assert_eq!(agg.net_tokens, signed_sum);
            assert!(agg.long_tokens >= 0.0 && agg.short_tokens >= 0.0);
        }
        assert_eq!(result.per_asset["BTC"].participant_count, 3);
        assert_eq!(result.per_asset["ETH"].participant_count, 4);
    }
}
