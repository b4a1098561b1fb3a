use std::sync::Arc;
use tracing::{info, warn};

use crate::config::{ActivityFilter, RosterConfig};
use crate::data::exchange::ExchangeInfo;
use crate::data::leaderboard::{fetch_ranked, LeaderboardSource};
use crate::data::types::{Address, RawPosition, Roster, RosterDiff};
use crate::error::{CollectorError, DataQualityIssue};

/// Outcome of one selection pass.
#[derive(Debug, Clone)]
pub struct Selection {
    pub roster: Roster,
    pub candidates: usize,
    pub checked: usize,
    pub shortfall: Option<DataQualityIssue>,
}

/// Outcome of a refresh boundary.
#[derive(Debug)]
pub enum Refresh {
    Replaced { diff: RosterDiff, shortfall: Option<DataQualityIssue> },
    Retained(CollectorError),
}

/// Picks the addresses to track: walk the PnL leaderboard in rank order,
/// keep candidates that currently hold positions, stop at quota.
pub struct RosterManager<L, E> {
    leaderboard: Arc<L>,
    exchange: Arc<E>,
    config: RosterConfig,
    current: Roster,
}

impl<L: LeaderboardSource, E: ExchangeInfo> RosterManager<L, E> {
    pub fn new(leaderboard: Arc<L>, exchange: Arc<E>, config: RosterConfig) -> Self {
        Self {
            leaderboard,
            exchange,
            config,
            current: Roster::default(),
        }
    }

    pub fn current(&self) -> &Roster {
        &self.current
    }

    /// Runs a selection pass without touching the current roster.
    ///
    /// Probing is sequential on purpose: it ends as soon as `target_count`
    /// active candidates are accepted, so lower-ranked candidates are never
    /// queried.
    pub async fn select(
        &self,
        target_count: usize,
        tracked_assets: &[String],
    ) -> Result<Selection, CollectorError> {
        let candidates = fetch_ranked(self.leaderboard.as_ref(), self.config.candidate_limit()).await?;

        let mut accepted: Vec<Address> = Vec::with_capacity(target_count);
        let mut checked = 0;

        for candidate in &candidates {
            if accepted.len() >= target_count {
                break;
            }
            if accepted.contains(&candidate.address) {
                continue;
            }

            checked += 1;
            match self.exchange.clearinghouse_state(&candidate.address).await {
                Ok(positions) if self.is_active(&positions, tracked_assets) => {
                    accepted.push(candidate.address.clone());
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("Activity check failed for {}, treating as inactive: {}", candidate.address.short(), e);
                }
            }
        }

        let shortfall = (accepted.len() < target_count).then(|| DataQualityIssue::ShortRoster {
            accepted: accepted.len(),
            target: target_count,
        });
        if let Some(issue) = &shortfall {
            warn!(
                "⚠️  {} after probing {} of {} candidates",
                issue, checked, candidates.len()
            );
        }

        info!(
            "Selected {} active traders from {} candidates ({} checked)",
            accepted.len(),
            candidates.len(),
            checked
        );

        Ok(Selection {
            roster: Roster::new(accepted, self.current.version() + 1),
            candidates: candidates.len(),
            checked,
            shortfall,
        })
    }

    /// Selects the first roster of a run. Failing or finding nobody is fatal.
    pub async fn initialize(&mut self, tracked_assets: &[String]) -> Result<Selection, CollectorError> {
        let mut selection = self.select(self.config.target_count, tracked_assets).await?;
        if selection.roster.is_empty() {
            return Err(CollectorError::EmptyRoster);
        }
        selection.roster = Roster::new(selection.roster.addresses().to_vec(), 0);
        self.current = selection.roster.clone();
        Ok(selection)
    }

    /// Re-runs selection and swaps the roster wholesale. On failure the
    /// previous roster stays in place.
    pub async fn refresh(&mut self, tracked_assets: &[String]) -> Refresh {
        match self.select(self.config.target_count, tracked_assets).await {
            Ok(selection) if selection.roster.is_empty() => {
                Refresh::Retained(CollectorError::EmptyRoster)
            }
            Ok(selection) => {
                let diff = selection.roster.diff(&self.current);
                if diff.is_empty() {
                    info!("Roster v{} → v{}: membership unchanged", self.current.version(), selection.roster.version());
                } else {
                    info!(
                        "Roster v{} → v{}: +{} / -{}",
                        self.current.version(),
                        selection.roster.version(),
                        diff.added.len(),
                        diff.removed.len()
                    );
                }
                self.current = selection.roster;
                Refresh::Replaced { diff, shortfall: selection.shortfall }
            }
            Err(e) => {
                warn!("Roster refresh failed, keeping v{}: {}", self.current.version(), e);
                Refresh::Retained(e)
            }
        }
    }

    fn is_active(&self, positions: &[RawPosition], tracked_assets: &[String]) -> bool {
        positions.iter().any(|p| {
            p.is_active()
                && match self.config.activity_filter {
                    ActivityFilter::AnyAsset => true,
                    ActivityFilter::TrackedAssets => tracked_assets.contains(&p.asset),
                }
        })
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use crate::data::leaderboard::LeaderboardEntry;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    /// Leaderboard serving a fixed ranking, optionally unreachable.
    #[derive(Default)]
    pub struct FakeLeaderboard {
        pub ranking: Mutex<Vec<Address>>,
        pub down: AtomicBool,
    }

    impl FakeLeaderboard {
        pub fn ranked(addresses: Vec<Address>) -> Self {
            Self { ranking: Mutex::new(addresses), down: AtomicBool::new(false) }
        }
    }

    impl LeaderboardSource for FakeLeaderboard {
        async fn fetch_page(&self, limit: usize, offset: usize) -> Result<Vec<LeaderboardEntry>, CollectorError> {
            if self.down.load(Ordering::SeqCst) {
                return Err(CollectorError::CollaboratorUnreachable("leaderboard", "connection refused".into()));
            }
            Ok(self.ranking
                .lock()
                .unwrap()
                .iter()
                .skip(offset)
                .take(limit)
                .map(|address| LeaderboardEntry {
                    address: address.clone(),
                    display_name: None,
                    account_value: None,
                    all_time_pnl: None,
                })
                .collect())
        }
    }
}
