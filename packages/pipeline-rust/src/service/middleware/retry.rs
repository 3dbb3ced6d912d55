//! Retry middleware: the innermost command stage, directly around the handler.
//!
//! Requests without a [`RetryPolicy`](keel_core::RetryPolicy) are called
//! exactly once. Otherwise only [`PipelineError::Unknown`] errors accepted by
//! the policy's filter are retried, up to `max_retries` extra attempts with a
//! constant delay. Business errors and cancellation propagate on first sight.
//! When the budget runs out the last error is re-raised.

use std::task::{Context, Poll};

use keel_core::{ExecutionResult, PipelineError, Request};
use tower::{Layer, Service, ServiceExt};
use tracing::{debug, warn};

use crate::service::operation::{request_name, Envelope, StageFuture};

#[derive(Debug, Clone, Copy, Default)]
pub struct RetryLayer;

impl RetryLayer {
    /// Create a new retry layer.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for RetryLayer {
    type Service = RetryService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RetryService { inner }
    }
}

#[derive(Debug, Clone)]
pub struct RetryService<S> {
    inner: S,
}

impl<R, S> Service<Envelope<R>> for RetryService<S>
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
        Box::pin(async move {
            let Some(policy) = env.request.retry_policy() else {
                return inner.oneshot(env).await;
            };

            let mut retries = 0;
            loop {
                let error = match inner.clone().oneshot(env.clone()).await {
                    Err(PipelineError::Unknown(error)) => error,
                    other => return other,
                };
                if !policy.allows(&error) {
                    debug!(request = request_name::<R>(), error = %error, "error not retryable");
                    return Err(PipelineError::Unknown(error));
                }
                if retries == policy.max_retries {
                    warn!(
                        request = request_name::<R>(),
                        call_id = %env.ctx.call_id,
                        attempts = retries + 1,
                        error = %error,
                        "retries exhausted"
                    );
                    return Err(PipelineError::Unknown(error));
                }
                retries += 1;
                debug!(
                    request = request_name::<R>(),
                    call_id = %env.ctx.call_id,
                    retry = retries,
                    error = %error,
                    "retrying after failure"
                );

                tokio::select! {
                    biased;
                    () = env.ctx.cancellation.cancelled() => return Err(PipelineError::Cancelled),
                    () = tokio::time::sleep(policy.delay) => {}
                }
            }
        })
    }
}
