use dashmap::DashMap;
use chrono::{DateTime, Utc};

use crate::data::types::Address;

/// Consecutive fetch failures per address, shared by concurrent fetch tasks.
pub struct FailureLedger {
    entries: DashMap<Address, FailureEntry>,
}

#[derive(Debug, Clone, Copy)]
struct FailureEntry {
    consecutive: u32,
    last_failure: DateTime<Utc>,
}

impl FailureLedger {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Record a failure and return the new streak length
    pub fn record_failure(&self, address: &Address) -> u32 {
        let mut entry = self.entries.entry(address.clone()).or_insert(FailureEntry {
            consecutive: 0,
            last_failure: Utc::now(),
        });
        entry.consecutive += 1;
        entry.last_failure = Utc::now();
        entry.consecutive
    }

    /// A success clears the streak
    pub fn record_success(&self, address: &Address) {
        self.entries.remove(address);
    }

    #[cfg(test)]
    pub fn streak(&self, address: &Address) -> u32 {
        self.entries.get(address).map(|e| e.consecutive).unwrap_or(0)
    }

    /// Addresses whose streak has reached `threshold`, most recent failure first
    pub fn persistent(&self, threshold: u32) -> Vec<(Address, u32)> {
        let mut hits: Vec<(Address, u32, DateTime<Utc>)> = self.entries
            .iter()
            .filter(|e| e.consecutive >= threshold)
            .map(|e| (e.key().clone(), e.consecutive, e.last_failure))
            .collect();
        hits.sort_by(|a, b| b.2.cmp(&a.2).then_with(|| a.0.cmp(&b.0)));
        hits.into_iter().map(|(a, n, _)| (a, n)).collect()
    }

    /// Forget addresses that left the roster
    pub fn retain(&self, keep: impl Fn(&Address) -> bool) {
        self.entries.retain(|address, _| keep(address));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for FailureLedger {
    fn default() -> Self {
        Self::new()
    }
}
