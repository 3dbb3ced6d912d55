//! Execution outcome returned by every request dispatched through the pipeline.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// A single validation failure.
///
/// Two broken rules are equal when both `message` and `relation` match, so
/// duplicates collapse when merged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BrokenRule {
    /// Human-readable description of the failure.
    pub message: String,
    /// Field or entity the failure refers to, if any.
    pub relation: Option<String>,
}

impl BrokenRule {
    /// Creates a broken rule that is not tied to a specific field.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            relation: None,
        }
    }

    /// Creates a broken rule attached to the given field or relation.
    #[must_use]
    pub fn with_relation(message: impl Into<String>, relation: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            relation: Some(relation.into()),
        }
    }
}

/// Removes duplicate broken rules while keeping first-seen order.
#[must_use]
pub fn distinct_rules(rules: impl IntoIterator<Item = BrokenRule>) -> Vec<BrokenRule> {
    let mut seen = HashSet::new();
    rules
        .into_iter()
        .filter(|rule| seen.insert(rule.clone()))
        .collect()
}

/// Non-validation failure carried by a result. At most one is ever set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum ResultError {
    /// The caller is not allowed to execute the request.
    NoPermission,
    /// The data the request targets does not exist.
    DataNotFound,
    /// The request was based on stale data.
    Concurrency,
    /// User-facing or generic error message.
    Message(String),
}

/// Discriminated outcome of a request execution.
///
/// A result is successful exactly when it carries neither broken rules nor a
/// [`ResultError`]. Commands use `ExecutionResult<()>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult<T = ()> {
    data: Option<T>,
    broken_rules: Vec<BrokenRule>,
    error: Option<ResultError>,
}

impl<T> ExecutionResult<T> {
    /// Successful result carrying `data`.
    #[must_use]
    pub fn ok(data: T) -> Self {
        Self {
            data: Some(data),
            broken_rules: Vec::new(),
            error: None,
        }
    }

    /// Failed result listing the broken rules. Duplicates are removed.
    ///
    /// An empty list still produces a failed result with a generic message,
    /// so a validation failure can never read as success.
    #[must_use]
    pub fn validation_failed(rules: impl IntoIterator<Item = BrokenRule>) -> Self {
        let broken_rules = distinct_rules(rules);
        let error = if broken_rules.is_empty() {
            Some(ResultError::Message("validation failed".to_string()))
        } else {
            None
        };
        Self {
            data: None,
            broken_rules,
            error,
        }
    }

    /// Failed result: the caller may not run this request.
    #[must_use]
    pub fn no_permission() -> Self {
        Self::failed(ResultError::NoPermission)
    }

    /// Failed result: the data the request targets does not exist.
    #[must_use]
    pub fn data_not_found() -> Self {
        Self::failed(ResultError::DataNotFound)
    }

    /// Failed result: the request was based on stale data.
    #[must_use]
    pub fn concurrency() -> Self {
        Self::failed(ResultError::Concurrency)
    }

    /// Failed result with a user-facing or generic error message.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::failed(ResultError::Message(message.into()))
    }

    fn failed(error: ResultError) -> Self {
        Self {
            data: None,
            broken_rules: Vec::new(),
            error: Some(error),
        }
    }

    /// True when there are no broken rules and no error.
    #[must_use]
    pub fn is_successful(&self) -> bool {
        self.error.is_none() && self.broken_rules.is_empty()
    }

    /// True when at least one rule was broken.
    #[must_use]
    pub fn has_validation_error(&self) -> bool {
        !self.broken_rules.is_empty()
    }

    /// True for a result built by [`ExecutionResult::no_permission`].
    #[must_use]
    pub fn has_no_permission_error(&self) -> bool {
        matches!(self.error, Some(ResultError::NoPermission))
    }

    /// True for a result built by [`ExecutionResult::data_not_found`].
    #[must_use]
    pub fn has_data_not_found_error(&self) -> bool {
        matches!(self.error, Some(ResultError::DataNotFound))
    }

    /// True for a result built by [`ExecutionResult::concurrency`].
    #[must_use]
    pub fn has_concurrency_error(&self) -> bool {
        matches!(self.error, Some(ResultError::Concurrency))
    }

    /// The error message, when the result failed with one.
    #[must_use]
    pub fn error_message(&self) -> Option<&str> {
        match &self.error {
            Some(ResultError::Message(message)) => Some(message),
            _ => None,
        }
    }

    /// The error, if the result failed with one.
    #[must_use]
    pub fn error_kind(&self) -> Option<&ResultError> {
        self.error.as_ref()
    }

    /// Broken rules, empty unless validation failed.
    #[must_use]
    pub fn broken_rules(&self) -> &[BrokenRule] {
        &self.broken_rules
    }

    /// Borrow the data, present only on success.
    #[must_use]
    pub fn data(&self) -> Option<&T> {
        self.data.as_ref()
    }

    /// Consumes the result, returning its data if any.
    #[must_use]
    pub fn into_data(self) -> Option<T> {
        self.data
    }

    /// Transforms the data, keeping broken rules and error as they are.
    #[must_use]
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ExecutionResult<U> {
        ExecutionResult {
            data: self.data.map(f),
            broken_rules: self.broken_rules,
            error: self.error,
        }
    }
}

impl ExecutionResult<()> {
    /// Successful result for a command.
    #[must_use]
    pub fn success() -> Self {
        Self::ok(())
    }
}
