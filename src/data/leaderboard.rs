use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::data::exchange::{post_json, Decimal};
use crate::data::types::Address;
use crate::error::CollectorError;

const LEADERBOARD: &str = "leaderboard";

/// Rows per leaderboard request.
pub const PAGE_SIZE: usize = 100;

/// Ranked candidate source ordered by all-time PnL, best first.
#[allow(async_fn_in_trait)]
pub trait LeaderboardSource {
    async fn fetch_page(&self, limit: usize, offset: usize) -> Result<Vec<LeaderboardEntry>, CollectorError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct LeaderboardEntry {
    pub address: Address,
    pub display_name: Option<String>,
    pub account_value: Option<f64>,
    pub all_time_pnl: Option<f64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LeaderboardRequest {
    limit: usize,
    offset: usize,
    sort: SortSpec,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SortSpec {
    time_period: &'static str,
    #[serde(rename = "type")]
    kind: &'static str,
    direction: &'static str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LeaderboardResponse {
    #[serde(default)]
    leaderboard_rows: Vec<LeaderboardRow>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LeaderboardRow {
    eth_address: String,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    account_value: Option<Decimal>,
    #[serde(default)]
    window_performances: Vec<(String, WindowPerformance)>,
}

#[derive(Debug, Deserialize)]
struct WindowPerformance {
    #[serde(default)]
    pnl: Option<Decimal>,
    #[allow(dead_code)]
    #[serde(default)]
    roi: Option<Decimal>,
}

pub struct LeaderboardClient {
    client: Client,
    url: String,
}

impl LeaderboardClient {
    pub fn new(client: Client, url: String) -> Self {
        Self { client, url }
    }
}

impl LeaderboardSource for LeaderboardClient {
    async fn fetch_page(&self, limit: usize, offset: usize) -> Result<Vec<LeaderboardEntry>, CollectorError> {
        let request = LeaderboardRequest {
            limit,
            offset,
            sort: SortSpec { time_period: "allTime", kind: "pnl", direction: "desc" },
        };
        let body = serde_json::to_value(&request)
            .map_err(|e| CollectorError::MalformedResponse(LEADERBOARD, e.to_string()))?;

        let value: serde_json::Value = post_json(&self.client, &self.url, LEADERBOARD, &body).await?;
        parse_leaderboard(value)
    }
}

/// Decodes a leaderboard reply. An `error` field fails the whole call;
/// rows with invalid addresses are dropped.
pub fn parse_leaderboard(value: serde_json::Value) -> Result<Vec<LeaderboardEntry>, CollectorError> {
    let response: LeaderboardResponse = serde_json::from_value(value)
        .map_err(|e| CollectorError::MalformedResponse(LEADERBOARD, e.to_string()))?;

    if let Some(error) = response.error {
        let message = match error {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        };
        return Err(CollectorError::CollaboratorError(LEADERBOARD, message));
    }

    let entries = response.leaderboard_rows
        .into_iter()
        .filter_map(|row| match Address::parse(&row.eth_address) {
            Ok(address) => Some(LeaderboardEntry {
                address,
                display_name: row.display_name,
                account_value: row.account_value.as_ref().and_then(Decimal::to_f64),
                all_time_pnl: row.window_performances
                    .iter()
                    .find(|(period, _)| period == "allTime")
                    .and_then(|(_, perf)| perf.pnl.as_ref())
                    .and_then(Decimal::to_f64),
            }),
            Err(e) => {
                warn!("Skipping leaderboard row: {}", e);
                None
            }
        })
        .collect();

    Ok(entries)
}

/// Fetches up to `limit` ranked candidates, paging by `PAGE_SIZE`.
pub async fn fetch_ranked<L: LeaderboardSource>(
    source: &L,
    limit: usize,
) -> Result<Vec<LeaderboardEntry>, CollectorError> {
    let mut entries = Vec::with_capacity(limit);

    while entries.len() < limit {
        let want = (limit - entries.len()).min(PAGE_SIZE);
        let page = source.fetch_page(want, entries.len()).await?;
        let exhausted = page.len() < want;
        entries.extend(page.into_iter().take(want));
        if exhausted {
            break;
        }
    }

    info!("Fetched {} ranked candidates (requested {})", entries.len(), limit);
    Ok(entries)
}
