use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use crate::data::types::{Address, RawPosition};
use crate::error::CollectorError;

const EXCHANGE: &str = "exchange";

/// Read-only exchange endpoints the collector depends on.
#[allow(async_fn_in_trait)]
pub trait ExchangeInfo {
    /// Open positions for one account (`clearinghouseState`).
    async fn clearinghouse_state(&self, address: &Address) -> Result<Vec<RawPosition>, CollectorError>;

    /// Asset universe plus its positionally-matched contexts (`metaAndAssetCtxs`).
    async fn meta_and_asset_ctxs(&self) -> Result<MetaAndAssetCtxs, CollectorError>;
}

/// Numeric fields arrive as decimal strings, occasionally as numbers.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Decimal {
    Text(String),
    Number(f64),
}

impl Decimal {
    pub fn to_f64(&self) -> Option<f64> {
        match self {
            Decimal::Text(s) => s.trim().parse::<f64>().ok(),
            Decimal::Number(n) => Some(*n),
        }
        .filter(|v| v.is_finite())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClearinghouseState {
    #[serde(default)]
    asset_positions: Vec<AssetPositionEntry>,
}

#[derive(Debug, Deserialize)]
struct AssetPositionEntry {
    position: PositionBody,
}

#[derive(Debug, Deserialize)]
struct PositionBody {
    coin: String,
    szi: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssetMeta {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssetCtx {
    #[serde(rename = "markPx", default)]
    pub mark_px: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
struct Universe {
    universe: Vec<AssetMeta>,
}

/// The two parallel lists of a `metaAndAssetCtxs` response. Entry `i` of
/// `contexts` belongs to entry `i` of `universe`; nothing else links them.
#[derive(Debug, Clone, Default)]
pub struct MetaAndAssetCtxs {
    pub universe: Vec<AssetMeta>,
    pub contexts: Vec<AssetCtx>,
}

impl MetaAndAssetCtxs {
    pub fn from_json(value: serde_json::Value) -> Result<Self, CollectorError> {
        let (meta, contexts): (Universe, Vec<AssetCtx>) = serde_json::from_value(value)
            .map_err(|e| CollectorError::MalformedResponse(EXCHANGE, e.to_string()))?;
        Ok(Self { universe: meta.universe, contexts })
    }
}

/// Converts a `clearinghouseState` body into positions for `address`.
pub fn positions_from_state(
    address: &Address,
    value: serde_json::Value,
) -> Result<Vec<RawPosition>, CollectorError> {
    let state: ClearinghouseState = serde_json::from_value(value)
        .map_err(|e| CollectorError::MalformedResponse(EXCHANGE, e.to_string()))?;

    state.asset_positions
        .into_iter()
        .map(|entry| {
            let signed_size = entry.position.szi.to_f64().ok_or_else(|| {
                CollectorError::MalformedResponse(
                    EXCHANGE,
                    format!("unparsable szi for {} on {}", entry.position.coin, address.short()),
                )
            })?;
            Ok(RawPosition {
                address: address.clone(),
                asset: entry.position.coin,
                signed_size,
            })
        })
        .collect()
}

pub struct HyperliquidClient {
    client: Client,
    info_url: String,
}

impl HyperliquidClient {
    pub fn new(client: Client, info_url: String) -> Self {
        Self { client, info_url }
    }

    /// Shared connection pool with a per-request deadline.
    pub fn build_http_client(timeout: Duration) -> anyhow::Result<Client> {
        Ok(Client::builder().timeout(timeout).build()?)
    }

    async fn post_info<T: DeserializeOwned>(&self, body: serde_json::Value) -> Result<T, CollectorError> {
        post_json(&self.client, &self.info_url, EXCHANGE, &body).await
    }
}

impl ExchangeInfo for HyperliquidClient {
    async fn clearinghouse_state(&self, address: &Address) -> Result<Vec<RawPosition>, CollectorError> {
        let value: serde_json::Value = self
            .post_info(json!({ "type": "clearinghouseState", "user": address.as_str() }))
            .await?;
        positions_from_state(address, value)
    }

    async fn meta_and_asset_ctxs(&self) -> Result<MetaAndAssetCtxs, CollectorError> {
        let value: serde_json::Value = self.post_info(json!({ "type": "metaAndAssetCtxs" })).await?;
        MetaAndAssetCtxs::from_json(value)
    }
}

/// POSTs a JSON body and decodes the reply, mapping failures onto the
/// collaborator error taxonomy.
pub(crate) async fn post_json<T: DeserializeOwned>(
    client: &Client,
    url: &str,
    collaborator: &'static str,
    body: &serde_json::Value,
) -> Result<T, CollectorError> {
    let response = client
        .post(url)
        .json(body)
        .send()
        .await
        .map_err(|e| CollectorError::from_transport(collaborator, e))?;

    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        let message = format!("HTTP {}: {}", status, text.chars().take(200).collect::<String>());
        return Err(if status.is_server_error() || status.as_u16() == 429 {
            CollectorError::CollaboratorUnreachable(collaborator, message)
        } else {
            CollectorError::CollaboratorError(collaborator, message)
        });
    }

    response
        .json::<T>()
        .await
        .map_err(|e| CollectorError::from_transport(collaborator, e))
}
