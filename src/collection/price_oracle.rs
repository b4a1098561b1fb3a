use std::sync::Arc;
use tracing::warn;

use crate::collection::retry::RetryPolicy;
use crate::data::exchange::{Decimal, ExchangeInfo, MetaAndAssetCtxs};
use crate::data::types::PriceSnapshot;
use crate::error::CollectorError;

pub struct PriceOracle<E> {
    exchange: Arc<E>,
    retry: RetryPolicy,
}

impl<E: ExchangeInfo> PriceOracle<E> {
    pub fn new(exchange: Arc<E>, retry: RetryPolicy) -> Self {
        Self { exchange, retry }
    }

    /// Mark prices for every tracked asset. An asset the exchange cannot
    /// price resolves to 0; a failed request is an error for the tick.
    pub async fn fetch(&self, tracked_assets: &[String]) -> Result<PriceSnapshot, CollectorError> {
        let exchange = &self.exchange;
        let ctxs = self.retry
            .run("metaAndAssetCtxs", move || exchange.meta_and_asset_ctxs())
            .await?;
        Ok(resolve_mark_prices(&ctxs, tracked_assets))
    }
}

/// Joins asset metadata to its context strictly by list position.
///
/// `universe[i]` describes the asset whose price lives in `contexts[i]`.
/// No other field (e.g. `szDecimals`) may be used as the index.
pub fn resolve_mark_prices(ctxs: &MetaAndAssetCtxs, tracked_assets: &[String]) -> PriceSnapshot {
    tracked_assets
        .iter()
        .map(|asset| {
            let price = ctxs.universe
                .iter()
                .position(|meta| meta.name == *asset)
                .and_then(|index| ctxs.contexts.get(index))
                .and_then(|ctx| ctx.mark_px.as_ref())
                .and_then(Decimal::to_f64)
                .filter(|px| *px > 0.0);

            match price {
                Some(px) => (asset.clone(), px),
                None => {
                    warn!("No mark price for {}, recording 0", asset);
                    (asset.clone(), 0.0)
                }
            }
        })
        .collect()
}
