//! Grouped, concurrent rule validation.
//!
//! Rules are asynchronous closures yielding zero or more [`BrokenRule`]s. At
//! registration time each rule is placed into a *group*:
//!
//! - [`RulePolicy::Shared`]: appended to group 0, which always exists
//! - [`RulePolicy::Single`]: the rules of one call form a new group
//! - [`RulePolicy::Multiple`]: every rule becomes its own group
//!
//! All groups run concurrently. Inside a group, rules run strictly in the order
//! they were added, each awaited before the next starts, so a later rule may
//! rely on a side effect of an earlier one in the same group. Rules in
//! different groups must not depend on each other.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use keel_core::{distinct_rules, BrokenRule, PipelineError, Request, RequestContext};

use crate::fanout::join_all_or_cancel;

type RuleFuture = Pin<Box<dyn Future<Output = anyhow::Result<Vec<BrokenRule>>> + Send>>;

/// A single deferred validation rule.
pub struct Rule(Box<dyn FnOnce() -> RuleFuture + Send>);

impl Rule {
    async fn evaluate(self) -> anyhow::Result<Vec<BrokenRule>> {
        (self.0)().await
    }
}

impl std::fmt::Debug for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Rule")
    }
}

/// Wraps an async closure as a [`Rule`].
///
/// The closure may yield anything iterable over broken rules: a `Vec`, an
/// `Option<BrokenRule>`, or an empty iterator when the rule holds.
pub fn rule<F, Fut, I>(f: F) -> Rule
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<I>> + Send + 'static,
    I: IntoIterator<Item = BrokenRule>,
{
    Rule(Box::new(move || -> RuleFuture {
        Box::pin(async move { f().await.map(|yielded| yielded.into_iter().collect()) })
    }))
}

/// Execution lane a rule is assigned to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RulePolicy {
    Shared,
    Single,
    Multiple,
}

/// The rules collected for one validation run. Built fresh per request.
#[derive(Debug)]
pub struct RuleSet {
    groups: Vec<Vec<Rule>>,
}

impl RuleSet {
    /// Creates a rule set holding only the empty shared group.
    #[must_use]
    pub fn new() -> Self {
        Self {
            groups: vec![Vec::new()],
        }
    }

    /// Adds rules under the given policy.
    pub fn add(&mut self, policy: RulePolicy, rules: impl IntoIterator<Item = Rule>) -> &mut Self {
        match policy {
            RulePolicy::Shared => self.groups[0].extend(rules),
            RulePolicy::Single => {
                let group: Vec<Rule> = rules.into_iter().collect();
                if !group.is_empty() {
                    self.groups.push(group);
                }
            }
            RulePolicy::Multiple => self.groups.extend(rules.into_iter().map(|r| vec![r])),
        }
        self
    }

    /// Appends `rules` to the shared group 0.
    pub fn shared(&mut self, rules: impl IntoIterator<Item = Rule>) -> &mut Self {
        self.add(RulePolicy::Shared, rules)
    }

    /// Adds `rules` as one new group, run in order.
    pub fn single(&mut self, rules: impl IntoIterator<Item = Rule>) -> &mut Self {
        self.add(RulePolicy::Single, rules)
    }

    /// Adds each of `rules` as its own group.
    pub fn multiple(&mut self, rules: impl IntoIterator<Item = Rule>) -> &mut Self {
        self.add(RulePolicy::Multiple, rules)
    }

    /// Number of groups, including the shared group.
    #[must_use]
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Total rules across all groups.
    #[must_use]
    pub fn rule_count(&self) -> usize {
        self.groups.iter().map(Vec::len).sum()
    }

    /// True when no rule has been added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rule_count() == 0
    }

    /// Runs every group concurrently and returns the distinct union of the
    /// broken rules they yield.
    ///
    /// # Errors
    ///
    /// If any rule fails, the whole run fails with that error and no broken
    /// rules are reported. Returns `PipelineError::Cancelled` when the
    /// context is cancelled first.
    pub async fn run(self, ctx: &RequestContext) -> Result<Vec<BrokenRule>, PipelineError> {
        let lanes = self.groups.into_iter().map(run_group);
        let yielded = join_all_or_cancel(ctx, lanes).await?;
        Ok(distinct_rules(yielded.into_iter().flatten()))
    }
}

impl Default for RuleSet {
    fn default() -> Self {
        Self::new()
    }
}

async fn run_group(rules: Vec<Rule>) -> anyhow::Result<Vec<BrokenRule>> {
    let mut broken = Vec::new();
    for rule in rules {
        broken.extend(rule.evaluate().await?);
    }
    Ok(broken)
}

// ---------------------------------------------------------------------------
// Validator
// ---------------------------------------------------------------------------

/// Contributes rules for one request type.
///
/// The validation stage asks every validator registered for the request to
/// populate a single [`RuleSet`], then runs it once. Rules are `'static`, so
/// they capture a clone of the `Arc` rather than borrowing the request.
pub trait Validator<R: Request>: Send + Sync {
    fn register(&self, request: &Arc<R>, ctx: &RequestContext, rules: &mut RuleSet);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::time::Duration;

    use tokio::time::Instant;

    use super::*;

    fn broken(message: &'static str) -> Rule {
        rule(move || async move { Ok(Some(BrokenRule::new(message))) })
    }

    fn passing() -> Rule {
        rule(|| async { Ok(Vec::<BrokenRule>::new()) })
    }

    fn sleeping(ms: u64) -> Rule {
        rule(move || async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok(None::<BrokenRule>)
        })
    }

    #[test]
    fn shared_group_always_present() {
        let rules = RuleSet::new();
        assert_eq!(rules.group_count(), 1);
        assert!(rules.is_empty());
    }

    #[test]
    fn policies_shape_groups() {
        let mut rules = RuleSet::new();
        rules.shared([passing(), passing()]);
        rules.single([passing(), passing(), passing()]);
        rules.multiple([passing(), passing()]);
        rules.shared([passing()]);
        // shared + one single group + two singleton groups
        assert_eq!(rules.group_count(), 4);
        assert_eq!(rules.rule_count(), 8);
    }

    #[tokio::test]
    async fn empty_set_yields_nothing() {
        let out = RuleSet::new().run(&RequestContext::new()).await.unwrap();
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn duplicates_across_groups_collapse() {
        let mut rules = RuleSet::new();
        rules.shared([broken("a"), broken("a")]);
        rules.single([broken("a"), broken("b")]);
        rules.multiple([broken("b"), passing()]);

        let out = rules.run(&RequestContext::new()).await.unwrap();
        assert_eq!(out.len(), 2);
        assert!(out.contains(&BrokenRule::new("a")));
        assert!(out.contains(&BrokenRule::new("b")));
    }

    #[tokio::test]
    async fn shared_rules_see_earlier_side_effects() {
        let flag = Arc::new(AtomicBool::new(false));
        let mut rules = RuleSet::new();

        let writer = Arc::clone(&flag);
        rules.shared([rule(move || async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            writer.store(true, Ordering::SeqCst);
            Ok(None::<BrokenRule>)
        })]);

        let reader = Arc::clone(&flag);
        rules.shared([rule(move || async move {
            if reader.load(Ordering::SeqCst) {
                Ok(None::<BrokenRule>)
            } else {
                Ok(Some(BrokenRule::new("ran out of order")))
            }
        })]);

        let out = rules.run(&RequestContext::new()).await.unwrap();
        assert!(out.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn multiple_rules_run_concurrently() {
        let mut rules = RuleSet::new();
        rules.multiple([sleeping(100), sleeping(100), sleeping(100)]);

        let start = Instant::now();
        rules.run(&RequestContext::new()).await.unwrap();
        assert!(start.elapsed() < Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn single_group_runs_sequentially() {
        let mut rules = RuleSet::new();
        rules.single([sleeping(100), sleeping(100)]);
        rules.single([sleeping(100)]);

        let start = Instant::now();
        rules.run(&RequestContext::new()).await.unwrap();
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(200));
        assert!(elapsed < Duration::from_millis(300));
    }

    #[tokio::test]
    async fn failing_rule_fails_the_whole_run() {
        let mut rules = RuleSet::new();
        rules.shared([broken("a")]);
        rules.single([rule(|| async {
            Err::<Vec<BrokenRule>, _>(anyhow::anyhow!("lookup failed"))
        })]);

        let err = rules.run(&RequestContext::new()).await.unwrap_err();
        assert!(matches!(err, PipelineError::Unknown(_)));
    }

    #[tokio::test]
    async fn failing_rule_stops_its_own_group() {
        let later = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&later);
        let mut rules = RuleSet::new();
        rules.shared([
            rule(|| async { Err::<Vec<BrokenRule>, _>(anyhow::anyhow!("boom")) }),
            rule(move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(None::<BrokenRule>)
            }),
        ]);

        assert!(rules.run(&RequestContext::new()).await.is_err());
        assert_eq!(later.load(Ordering::SeqCst), 0);
    }
}
