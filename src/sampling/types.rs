use crate::error::DataQualityIssue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Data point appended.
    Sampled,
    /// Data point appended and the series persisted.
    Checkpointed,
    /// No data point this tick.
    Failed,
}

impl TickOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            TickOutcome::Sampled => "sampled",
            TickOutcome::Checkpointed => "checkpointed",
            TickOutcome::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    Replaced { added: usize, removed: usize },
    Retained { reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    pub index: usize,
    pub outcome: TickOutcome,
    pub roster_version: u64,
    pub roster_size: usize,
    pub failed_addresses: usize,
    pub issues: Vec<DataQualityIssue>,
    pub refresh: Option<RefreshOutcome>,
    pub error: Option<String>,
    pub persistence_error: Option<String>,
}

impl TickReport {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            outcome: TickOutcome::Failed,
            roster_version: 0,
            roster_size: 0,
            failed_addresses: 0,
            issues: Vec::new(),
            refresh: None,
            error: None,
            persistence_error: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub ticks: Vec<TickReport>,
    pub points: usize,
    pub checkpoints: usize,
    pub persistence_failures: usize,
}

impl RunSummary {
    pub fn sampled(&self) -> usize {
        self.ticks.iter().filter(|t| t.outcome != TickOutcome::Failed).count()
    }

    pub fn failed(&self) -> usize {
        self.ticks.iter().filter(|t| t.outcome == TickOutcome::Failed).count()
    }
}
