//! Error taxonomy used as control flow between handlers and the outer
//! exception-translation stage.

use crate::result::BrokenRule;

/// Errors raised by handlers, collaborators, and inner pipeline stages.
///
/// Only the outermost stage converts these into an
/// [`ExecutionResult`](crate::ExecutionResult); every stage in between sees
/// them as plain `Err` values.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("validation failed with {} broken rule(s)", .0.len())]
    BrokenRules(Vec<BrokenRule>),
    #[error("{0}")]
    UserFriendly(String),
    #[error("data not found")]
    DataNotFound,
    #[error("concurrency conflict")]
    Concurrency,
    #[error("no permission")]
    NoPermission,
    #[error("request was cancelled")]
    Cancelled,
    #[error(transparent)]
    Unknown(#[from] anyhow::Error),
}

impl PipelineError {
    /// Shorthand for a single broken rule.
    #[must_use]
    pub fn broken_rule(rule: BrokenRule) -> Self {
        Self::BrokenRules(vec![rule])
    }

    /// Business errors are expected outcomes and are never retried.
    #[must_use]
    pub fn is_business(&self) -> bool {
        matches!(
            self,
            Self::BrokenRules(_)
                | Self::UserFriendly(_)
                | Self::DataNotFound
                | Self::Concurrency
                | Self::NoPermission
        )
    }

    /// Short label for structured logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::BrokenRules(_) => "broken_rules",
            Self::UserFriendly(_) => "user_friendly",
            Self::DataNotFound => "data_not_found",
            Self::Concurrency => "concurrency",
            Self::NoPermission => "no_permission",
            Self::Cancelled => "cancelled",
            Self::Unknown(_) => "unknown",
        }
    }
}
