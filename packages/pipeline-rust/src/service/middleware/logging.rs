//! Logging middleware.
//!
//! Fans out `on_start` to every registered logger before calling inward, then
//! `on_end` with the result, or `on_error` when an inner stage fails. A failing
//! `on_start` or `on_end` hook fails the request and is reported through
//! `on_error` like any inner error, even if the handler already ran. Errors
//! are always re-raised unchanged; translation belongs to the outer stage.

use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures_util::future::join_all;
use keel_core::{ExecutionResult, PipelineError, Request, RequestContext, RequestLogger};
use tower::{Layer, Service, ServiceExt};
use tracing::{debug, warn};

use crate::fanout::join_all_or_cancel;
use crate::service::operation::{request_name, Envelope, StageFuture};

type Loggers<R> = Arc<[Arc<dyn RequestLogger<R>>]>;

// ---------------------------------------------------------------------------
// TracingRequestLogger
// ---------------------------------------------------------------------------

/// Stock logger emitting `tracing` events for every hook.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingRequestLogger;

#[async_trait]
impl<R: Request> RequestLogger<R> for TracingRequestLogger {
    async fn on_start(&self, _request: &R, ctx: &RequestContext) -> anyhow::Result<()> {
        debug!(request = request_name::<R>(), call_id = %ctx.call_id, "request started");
        Ok(())
    }

    async fn on_end(
        &self,
        _request: &R,
        ctx: &RequestContext,
        result: &ExecutionResult<R::Output>,
    ) -> anyhow::Result<()> {
        debug!(
            request = request_name::<R>(),
            call_id = %ctx.call_id,
            successful = result.is_successful(),
            "request finished"
        );
        Ok(())
    }

    async fn on_error(
        &self,
        _request: &R,
        ctx: &RequestContext,
        error: &PipelineError,
    ) -> anyhow::Result<()> {
        debug!(
            request = request_name::<R>(),
            call_id = %ctx.call_id,
            kind = error.kind(),
            "request raised"
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// LoggingLayer
// ---------------------------------------------------------------------------

pub struct LoggingLayer<R: Request> {
    loggers: Loggers<R>,
}

impl<R: Request> LoggingLayer<R> {
    /// Create a new logging layer over `loggers`.
    #[must_use]
    pub fn new(loggers: Vec<Arc<dyn RequestLogger<R>>>) -> Self {
        Self {
            loggers: loggers.into(),
        }
    }
}

impl<R: Request> Clone for LoggingLayer<R> {
    fn clone(&self) -> Self {
        Self {
            loggers: Arc::clone(&self.loggers),
        }
    }
}

impl<R: Request, S> Layer<S> for LoggingLayer<R> {
    type Service = LoggingService<R, S>;

    fn layer(&self, inner: S) -> Self::Service {
        LoggingService {
            inner,
            loggers: Arc::clone(&self.loggers),
        }
    }
}

// ---------------------------------------------------------------------------
// LoggingService
// ---------------------------------------------------------------------------

pub struct LoggingService<R: Request, S> {
    inner: S,
    loggers: Loggers<R>,
}

impl<R: Request, S: Clone> Clone for LoggingService<R, S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            loggers: Arc::clone(&self.loggers),
        }
    }
}

impl<R, S> Service<Envelope<R>> for LoggingService<R, S>
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
        let loggers = Arc::clone(&self.loggers);
        Box::pin(async move {
            let request = Arc::clone(&env.request);
            let ctx = env.ctx.clone();

            let outcome = async {
                join_all_or_cancel(&ctx, loggers.iter().map(|l| l.on_start(&request, &ctx)))
                    .await?;
                let result = inner.oneshot(env).await?;
                join_all_or_cancel(&ctx, loggers.iter().map(|l| l.on_end(&request, &ctx, &result)))
                    .await?;
                Ok::<_, PipelineError>(result)
            }
            .await;

            if let Err(error) = &outcome {
                let outcomes =
                    join_all(loggers.iter().map(|l| l.on_error(&request, &ctx, error))).await;
                for failure in outcomes.into_iter().filter_map(Result::err) {
                    warn!(
                        request = request_name::<R>(),
                        call_id = %ctx.call_id,
                        error = %failure,
                        "error logger failed"
                    );
                }
            }
            outcome
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
