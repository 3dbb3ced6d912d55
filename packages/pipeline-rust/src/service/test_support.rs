//! Shared fixtures for stage tests: sample requests and a scripted inner service.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use keel_core::{
    CachePolicy, Command, ExecutionResult, PipelineError, Query, Request, RetryFilter, RetryPolicy,
};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;
use tower::Service;

use super::operation::{Envelope, StageFuture};

#[derive(Debug, thiserror::Error)]
#[error("transient failure")]
pub struct Transient;

#[derive(Debug, thiserror::Error)]
#[error("permanent failure")]
pub struct Permanent;

/// Command with optional retry and timing capabilities.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Ping {
    pub max_retries: Option<u32>,
    pub delay_ms: u64,
    pub only_transient: bool,
    pub warn_ms: Option<u64>,
}

impl Ping {
    pub fn retrying(max_retries: u32, delay_ms: u64) -> Self {
        Self {
            max_retries: Some(max_retries),
            delay_ms,
            ..Self::default()
        }
    }
}

impl Request for Ping {
    type Output = ();

    fn retry_policy(&self) -> Option<RetryPolicy> {
        let policy = RetryPolicy::new(self.max_retries?, Duration::from_millis(self.delay_ms));
        if self.only_transient {
            Some(policy.only_on(RetryFilter::new().on::<Transient>()))
        } else {
            Some(policy)
        }
    }

    fn timing_warning(&self) -> Option<Duration> {
        self.warn_ms.map(Duration::from_millis)
    }
}

impl Command for Ping {}

/// Query with an optional absolute cache lifetime.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Lookup {
    pub id: u32,
    pub cache_secs: Option<u64>,
    pub per_user: bool,
}

impl Request for Lookup {
    type Output = String;

    fn cache_policy(&self) -> Option<CachePolicy> {
        let policy = CachePolicy::absolute(Duration::from_secs(self.cache_secs?));
        Some(if self.per_user { policy.per_user() } else { policy })
    }
}

impl Query for Lookup {}

pub type Outcome<T> = Result<ExecutionResult<T>, PipelineError>;

/// Inner service that replays queued outcomes, then a fallback, counting calls.
pub struct Scripted<T> {
    calls: Arc<AtomicU32>,
    call_times: Arc<Mutex<Vec<Instant>>>,
    queue: Arc<Mutex<VecDeque<Outcome<T>>>>,
    fallback: Arc<dyn Fn() -> Outcome<T> + Send + Sync>,
}

impl<T> Clone for Scripted<T> {
    fn clone(&self) -> Self {
        Self {
            calls: Arc::clone(&self.calls),
            call_times: Arc::clone(&self.call_times),
            queue: Arc::clone(&self.queue),
            fallback: Arc::clone(&self.fallback),
        }
    }
}

impl<T: Send + 'static> Scripted<T> {
    pub fn always(fallback: impl Fn() -> Outcome<T> + Send + Sync + 'static) -> Self {
        Self::sequence(Vec::new(), fallback)
    }

    pub fn sequence(
        outcomes: Vec<Outcome<T>>,
        fallback: impl Fn() -> Outcome<T> + Send + Sync + 'static,
    ) -> Self {
        Self {
            calls: Arc::new(AtomicU32::new(0)),
            call_times: Arc::new(Mutex::new(Vec::new())),
            queue: Arc::new(Mutex::new(outcomes.into())),
            fallback: Arc::new(fallback),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn call_times(&self) -> Vec<Instant> {
        self.call_times.lock().clone()
    }
}

impl<R: Request> Service<Envelope<R>> for Scripted<R::Output> {
    type Response = ExecutionResult<R::Output>;
    type Error = PipelineError;
    type Future = StageFuture<R::Output>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _env: Envelope<R>) -> Self::Future {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.call_times.lock().push(Instant::now());
        let outcome = self.queue.lock().pop_front().unwrap_or_else(|| (self.fallback)());
        Box::pin(async move { outcome })
    }
}

pub fn unknown<T>(error: impl std::error::Error + Send + Sync + 'static) -> Outcome<T> {
    Err(PipelineError::Unknown(anyhow::Error::new(error)))
}
