//! Timing middleware.
//!
//! Measures wall-clock time around the inner call, whether it succeeds or
//! fails, and reports it to a [`TimingObserver`]. Requests declaring a warning
//! threshold (or inheriting the configured default) also trigger a warning
//! hook once elapsed time meets the threshold.

use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use keel_core::{ExecutionResult, PipelineError, Request, RequestContext};
use tokio::time::Instant;
use tower::{Layer, Service, ServiceExt};
use tracing::{debug, warn};

use crate::service::operation::{request_name, Envelope, StageFuture};

// ---------------------------------------------------------------------------
// TimingObserver
// ---------------------------------------------------------------------------

pub trait TimingObserver: Send + Sync {
    fn on_end(&self, request: &'static str, ctx: &RequestContext, elapsed: Duration);

    fn on_warning(
        &self,
        request: &'static str,
        ctx: &RequestContext,
        elapsed: Duration,
        threshold: Duration,
    );
}

/// Stock observer: `tracing` events plus a duration histogram and a slow
/// request counter via the `metrics` facade.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingTimingObserver;

impl TimingObserver for TracingTimingObserver {
    fn on_end(&self, request: &'static str, ctx: &RequestContext, elapsed: Duration) {
        metrics::histogram!("keel_request_duration_seconds", "request" => request)
            .record(elapsed.as_secs_f64());

        #[allow(clippy::cast_possible_truncation)]
        let elapsed_ms = elapsed.as_millis() as u64;
        debug!(request, call_id = %ctx.call_id, elapsed_ms, "request timed");
    }

    fn on_warning(
        &self,
        request: &'static str,
        ctx: &RequestContext,
        elapsed: Duration,
        threshold: Duration,
    ) {
        metrics::counter!("keel_request_slow_total", "request" => request).increment(1);

        #[allow(clippy::cast_possible_truncation)]
        let (elapsed_ms, threshold_ms) = (elapsed.as_millis() as u64, threshold.as_millis() as u64);
        warn!(request, call_id = %ctx.call_id, elapsed_ms, threshold_ms, "slow request");
    }
}

// ---------------------------------------------------------------------------
// TimingLayer
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct TimingLayer {
    observer: Arc<dyn TimingObserver>,
    default_warning: Option<Duration>,
}

impl TimingLayer {
    /// `default_warning` applies to requests that declare no threshold.
    #[must_use]
    pub fn new(observer: Arc<dyn TimingObserver>, default_warning: Option<Duration>) -> Self {
        Self {
            observer,
            default_warning,
        }
    }
}

impl<S> Layer<S> for TimingLayer {
    type Service = TimingService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TimingService {
            inner,
            observer: Arc::clone(&self.observer),
            default_warning: self.default_warning,
        }
    }
}

// ---------------------------------------------------------------------------
// TimingService
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct TimingService<S> {
    inner: S,
    observer: Arc<dyn TimingObserver>,
    default_warning: Option<Duration>,
}

impl<R, S> Service<Envelope<R>> for TimingService<S>
where
    R: Request,
    S: Service<Envelope<R>, Response = ExecutionResult<R::Output>, Error = PipelineError>
        + Clone
        + Send
        + 'static,
    S::Future: Send + 'static,
{
    type Response = ExecutionResult<R::Output>;
    type Error = PipelineError;
    type Future = StageFuture<R::Output>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, env: Envelope<R>) -> Self::Future {
        let inner = self.inner.clone();
        let observer = Arc::clone(&self.observer);
        let threshold = env.request.timing_warning().or(self.default_warning);
        let ctx = env.ctx.clone();
        Box::pin(async move {
            let start = Instant::now();
            let outcome = inner.oneshot(env).await;
            let elapsed = start.elapsed();

            let request = request_name::<R>();
            observer.on_end(request, &ctx, elapsed);
            if let Some(threshold) = threshold.filter(|t| elapsed >= *t) {
                observer.on_warning(request, &ctx, elapsed, threshold);
            }
            outcome
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
