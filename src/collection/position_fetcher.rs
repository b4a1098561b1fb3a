use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::collection::retry::RetryPolicy;
use crate::data::exchange::ExchangeInfo;
use crate::data::failures::FailureLedger;
use crate::data::types::{Address, RawPosition, Roster};
use crate::error::CollectorError;

/// Streak length at which an address is called out in the tick log.
pub const PERSISTENT_FAILURE_STREAK: u32 = 3;

/// Result of one full-roster fan-out.
#[derive(Debug, Clone, Default)]
pub struct FetchBatch {
    pub positions: Vec<RawPosition>,
    pub failed: Vec<Address>,
    pub queried: usize,
}

pub struct PositionFetcher<E> {
    exchange: Arc<E>,
    retry: RetryPolicy,
    failures: FailureLedger,
}

impl<E: ExchangeInfo> PositionFetcher<E> {
    pub fn new(exchange: Arc<E>, retry: RetryPolicy) -> Self {
        Self {
            exchange,
            retry,
            failures: FailureLedger::new(),
        }
    }

    /// Queries every roster member concurrently and waits for all of them.
    /// A failing address contributes no positions and does not affect the rest.
    pub async fn fetch_all(&self, roster: &Roster) -> FetchBatch {
        let requests = roster.addresses().iter().map(|address| async move {
            (address, self.fetch_one(address).await)
        });
        let results = join_all(requests).await;

        let mut batch = FetchBatch {
            queried: results.len(),
            ..FetchBatch::default()
        };

        for (address, result) in results {
            match result {
                Ok(positions) => {
                    self.failures.record_success(address);
                    batch.positions.extend(positions);
                }
                Err(e) => {
                    let streak = self.failures.record_failure(address);
                    warn!("Error fetching positions for {}: {}", address.short(), e);
                    if streak == PERSISTENT_FAILURE_STREAK {
                        warn!("{} has failed {} ticks in a row", address, streak);
                    }
                    batch.failed.push(address.clone());
                }
            }
        }
        if !self.failures.is_empty() {
            debug!("{} addresses with an open failure streak", self.failures.len());
        }

        batch
    }

    async fn fetch_one(&self, address: &Address) -> Result<Vec<RawPosition>, CollectorError> {
        let exchange = &self.exchange;
        self.retry
            .run("clearinghouseState", move || exchange.clearinghouse_state(address))
            .await
    }

    /// Drop failure history for addresses no longer tracked.
    pub fn forget_departed(&self, roster: &Roster) {
        self.failures.retain(|address| roster.contains(address));
    }

    pub fn persistent_failures(&self) -> Vec<(Address, u32)> {
        self.failures.persistent(PERSISTENT_FAILURE_STREAK)
    }
}
