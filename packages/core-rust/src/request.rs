//! Request model: the `Request` trait, its command/query tags, and the
//! optional capabilities a request can declare.

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use serde::de::DeserializeOwned;
use serde::Serialize;

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// An immutable value routed to exactly one handler by its concrete type.
///
/// Capabilities are opt-in: each accessor returns `None` unless the request
/// overrides it. The pipeline checks presence, never the type.
pub trait Request: Serialize + Send + Sync + 'static {
    /// Data produced on success. Commands use `()`.
    type Output: Serialize + DeserializeOwned + Send + Sync + 'static;

    /// Opt into retries of transient failures.
    fn retry_policy(&self) -> Option<RetryPolicy> {
        None
    }

    /// Elapsed time at or above which a timing warning is emitted.
    fn timing_warning(&self) -> Option<Duration> {
        None
    }

    /// Opt into read-through caching. Only honoured for queries.
    fn cache_policy(&self) -> Option<CachePolicy> {
        None
    }
}

/// A request that mutates state and returns no data.
pub trait Command: Request<Output = ()> {}

/// A request that reads state and returns typed data.
pub trait Query: Request {}

/// A request that mutates state and returns typed data.
pub trait CommandQuery: Request {}

/// Tag recorded by the pipeline for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Command,
    Query,
    CommandQuery,
}

impl RequestKind {
    /// Lower-case name used in logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Command => "command",
            Self::Query => "query",
            Self::CommandQuery => "command_query",
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Retry capability
// ---------------------------------------------------------------------------

/// Bounded retry with a constant delay between attempts.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Additional attempts after the first one.
    pub max_retries: u32,
    /// Wait between consecutive attempts.
    pub delay: Duration,
    /// When set, only errors accepted by the filter are retried.
    pub filter: Option<RetryFilter>,
}

impl RetryPolicy {
    /// Retries any unknown error up to `max_retries` extra times, `delay` apart.
    #[must_use]
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self {
            max_retries,
            delay,
            filter: None,
        }
    }

    /// Restricts retries to errors accepted by `filter`.
    #[must_use]
    pub fn only_on(mut self, filter: RetryFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Whether an unknown error may be retried under this policy.
    #[must_use]
    pub fn allows(&self, error: &anyhow::Error) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter.matches(error))
    }
}

type MatchFn = dyn Fn(&(dyn StdError + 'static)) -> bool + Send + Sync;

/// Predicate over a single error in a cause chain.
#[derive(Clone)]
pub struct ErrorMatcher {
    name: &'static str,
    predicate: Arc<MatchFn>,
}

impl ErrorMatcher {
    /// Matches errors whose concrete type is exactly `E`.
    #[must_use]
    pub fn of<E: StdError + 'static>() -> Self {
        Self {
            name: std::any::type_name::<E>(),
            predicate: Arc::new(|err| err.is::<E>()),
        }
    }

    /// Matches errors accepted by `predicate`. Use this to match a family of
    /// types, e.g. every error exposing some marker through `source()`.
    pub fn when<F>(name: &'static str, predicate: F) -> Self
    where
        F: Fn(&(dyn StdError + 'static)) -> bool + Send + Sync + 'static,
    {
        Self {
            name,
            predicate: Arc::new(predicate),
        }
    }

    /// Name shown in logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    fn matches(&self, err: &(dyn StdError + 'static)) -> bool {
        (self.predicate)(err)
    }
}

impl fmt::Debug for ErrorMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ErrorMatcher").field(&self.name).finish()
    }
}

/// Allow-list of error kinds eligible for retry.
#[derive(Debug, Clone, Default)]
pub struct RetryFilter {
    matchers: Vec<ErrorMatcher>,
    include_causes: bool,
}

impl RetryFilter {
    /// An empty filter; add matchers with [`RetryFilter::on`] or [`RetryFilter::matching`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allows errors of concrete type `E`.
    #[must_use]
    pub fn on<E: StdError + 'static>(mut self) -> Self {
        self.matchers.push(ErrorMatcher::of::<E>());
        self
    }

    /// Adds a custom matcher.
    #[must_use]
    pub fn matching(mut self, matcher: ErrorMatcher) -> Self {
        self.matchers.push(matcher);
        self
    }

    /// Also inspect every `source()` in the cause chain, not only the
    /// outermost error.
    #[must_use]
    pub fn include_causes(mut self) -> Self {
        self.include_causes = true;
        self
    }

    /// Whether `error` (or, with `include_causes`, any of its causes) matches.
    #[must_use]
    pub fn matches(&self, error: &anyhow::Error) -> bool {
        let hit = |err: &(dyn StdError + 'static)| self.matchers.iter().any(|m| m.matches(err));
        if self.include_causes {
            error.chain().any(hit)
        } else {
            error.chain().next().is_some_and(hit)
        }
    }
}

// ---------------------------------------------------------------------------
// Cache capability
// ---------------------------------------------------------------------------

/// Expiration applied to a cached entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiration {
    /// Entry expires a fixed time after it is stored.
    Absolute(Duration),
    /// Entry expires after this long without being read.
    Sliding(Duration),
    /// Entry expires at a wall-clock instant.
    At(SystemTime),
}

/// Read-through caching declared by a query.
///
/// More than one expiration may be set; [`CachePolicy::expiration`] picks
/// absolute, then sliding, then the fixed instant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CachePolicy {
    pub absolute: Option<Duration>,
    pub sliding: Option<Duration>,
    pub until: Option<SystemTime>,
    /// Partition cached entries by the calling user.
    pub per_user: bool,
    /// Partition cached entries by the caller's language.
    pub per_language: bool,
}

impl CachePolicy {
    /// Cache for `duration` after storing.
    #[must_use]
    pub fn absolute(duration: Duration) -> Self {
        Self::default().with_absolute(duration)
    }

    /// Cache until unread for `duration`.
    #[must_use]
    pub fn sliding(duration: Duration) -> Self {
        Self::default().with_sliding(duration)
    }

    /// Cache until the wall-clock `instant`.
    #[must_use]
    pub fn until(instant: SystemTime) -> Self {
        Self::default().with_until(instant)
    }

    /// Sets the absolute lifetime.
    #[must_use]
    pub fn with_absolute(mut self, duration: Duration) -> Self {
        self.absolute = Some(duration);
        self
    }

    /// Sets the sliding window.
    #[must_use]
    pub fn with_sliding(mut self, duration: Duration) -> Self {
        self.sliding = Some(duration);
        self
    }

    /// Sets the fixed expiry instant.
    #[must_use]
    pub fn with_until(mut self, instant: SystemTime) -> Self {
        self.until = Some(instant);
        self
    }

    /// Partitions entries by user.
    #[must_use]
    pub fn per_user(mut self) -> Self {
        self.per_user = true;
        self
    }

    /// Partitions entries by language.
    #[must_use]
    pub fn per_language(mut self) -> Self {
        self.per_language = true;
        self
    }

    /// The single expiration to apply, by priority.
    #[must_use]
    pub fn expiration(&self) -> Option<Expiration> {
        self.absolute
            .map(Expiration::Absolute)
            .or(self.sliding.map(Expiration::Sliding))
            .or(self.until.map(Expiration::At))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("socket reset")]
    struct Transient;

    #[derive(Debug, thiserror::Error)]
    #[error("bad input")]
    struct Permanent;

    #[derive(Debug, thiserror::Error)]
    #[error("wrapped")]
    struct Wrapper(#[source] Transient);

    #[test]
    fn expiration_priority_is_absolute_then_sliding_then_until() {
        let at = SystemTime::UNIX_EPOCH + Duration::from_secs(10);
        let all = CachePolicy::until(at)
            .with_sliding(Duration::from_secs(2))
            .with_absolute(Duration::from_secs(1));
        assert_eq!(all.expiration(), Some(Expiration::Absolute(Duration::from_secs(1))));

        let sliding_and_until = CachePolicy::until(at).with_sliding(Duration::from_secs(2));
        assert_eq!(
            sliding_and_until.expiration(),
            Some(Expiration::Sliding(Duration::from_secs(2)))
        );

        assert_eq!(CachePolicy::until(at).expiration(), Some(Expiration::At(at)));
        assert_eq!(CachePolicy::default().per_user().expiration(), None);
    }

    #[test]
    fn policy_without_filter_allows_everything() {
        let policy = RetryPolicy::new(3, Duration::from_millis(5));
        assert!(policy.allows(&anyhow::anyhow!("anything")));
    }

    #[test]
    fn filter_matches_exact_type_only_at_head() {
        let filter = RetryFilter::new().on::<Transient>();
        assert!(filter.matches(&anyhow::Error::new(Transient)));
        assert!(!filter.matches(&anyhow::Error::new(Permanent)));
        assert!(!filter.matches(&anyhow::Error::new(Wrapper(Transient))));
    }

    #[test]
    fn filter_walks_causes_when_asked() {
        let filter = RetryFilter::new().on::<Transient>().include_causes();
        assert!(filter.matches(&anyhow::Error::new(Wrapper(Transient))));
        assert!(!filter.matches(&anyhow::Error::new(Permanent)));
    }

    #[test]
    fn predicate_matcher_accepts_families() {
        let filter = RetryFilter::new().matching(ErrorMatcher::when("has-source", |err| {
            err.source().is_some()
        }));
        assert!(filter.matches(&anyhow::Error::new(Wrapper(Transient))));
        assert!(!filter.matches(&anyhow::Error::new(Transient)));
    }
}
