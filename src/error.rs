use std::fmt;

/// Failures raised at collaborator and persistence seams.
#[derive(Debug, thiserror::Error)]
pub enum CollectorError {
    #[error("{0} unreachable: {1}")]
    CollaboratorUnreachable(&'static str, String),

    #[error("{0} returned error: {1}")]
    CollaboratorError(&'static str, String),

    #[error("{0} returned malformed response: {1}")]
    MalformedResponse(&'static str, String),

    #[error("Data quality: {0}")]
    DataQuality(String),

    #[error("Persistence failure: {0}")]
    PersistenceFailure(#[from] anyhow::Error),

    #[error("No active addresses found; cannot start sampling")]
    EmptyRoster,
}

impl CollectorError {
    /// Only transport failures are worth retrying; error payloads are final.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CollectorError::CollaboratorUnreachable(..))
    }

    pub fn from_transport(collaborator: &'static str, err: reqwest::Error) -> Self {
        if err.is_decode() {
            CollectorError::MalformedResponse(collaborator, err.to_string())
        } else {
            CollectorError::CollaboratorUnreachable(collaborator, err.to_string())
        }
    }
}

/// Non-fatal conditions reported alongside a tick or a roster selection.
#[derive(Debug, Clone, PartialEq)]
pub enum DataQualityIssue {
    /// Oracle resolved a price of 0 while positions were held.
    ZeroPrice { asset: String, positions: usize },
    /// Asset had positions but no entry in the price snapshot.
    MissingPrice { asset: String, positions: usize },
    /// Selection exhausted its candidates before filling the roster.
    ShortRoster { accepted: usize, target: usize },
}

impl fmt::Display for DataQualityIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataQualityIssue::ZeroPrice { asset, positions } => {
                write!(f, "ZeroPrice({}: {} positions valued at $0)", asset, positions)
            }
            DataQualityIssue::MissingPrice { asset, positions } => {
                write!(f, "MissingPrice({}: {} positions excluded)", asset, positions)
            }
            DataQualityIssue::ShortRoster { accepted, target } => {
                write!(f, "ShortRoster({}/{})", accepted, target)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_unreachable_is_retryable() {
        assert!(CollectorError::CollaboratorUnreachable("exchange", "timeout".into()).is_retryable());
        assert!(!CollectorError::CollaboratorError("leaderboard", "bad sort".into()).is_retryable());
        assert!(!CollectorError::MalformedResponse("exchange", "szi".into()).is_retryable());
    }

    #[test]
    fn test_issue_display() {
        let issue = DataQualityIssue::ShortRoster { accepted: 40, target: 100 };
        assert_eq!(issue.to_string(), "ShortRoster(40/100)");
    }
}
