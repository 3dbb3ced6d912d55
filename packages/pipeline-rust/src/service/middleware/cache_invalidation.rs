//! Cache invalidation for commands and command-queries.
//!
//! Calls inward first. Only a successful result triggers the registered
//! invalidators, all concurrently. The stage sits outside retry, so a command
//! that succeeds after several attempts still invalidates exactly once.

use std::sync::Arc;
use std::task::{Context, Poll};

use keel_core::{CacheInvalidator, ExecutionResult, PipelineError, Request};
use tower::{Layer, Service, ServiceExt};

use crate::fanout::join_all_or_cancel;
use crate::service::operation::{Envelope, StageFuture};

type Invalidators<R> = Arc<[Arc<dyn CacheInvalidator<R>>]>;

pub struct CacheInvalidationLayer<R: Request> {
    invalidators: Invalidators<R>,
}

impl<R: Request> CacheInvalidationLayer<R> {
    /// Create a new invalidation layer over `invalidators`.
    #[must_use]
    pub fn new(invalidators: Vec<Arc<dyn CacheInvalidator<R>>>) -> Self {
        Self {
            invalidators: invalidators.into(),
        }
    }
}

impl<R: Request> Clone for CacheInvalidationLayer<R> {
    fn clone(&self) -> Self {
        Self {
            invalidators: Arc::clone(&self.invalidators),
        }
    }
}

impl<R: Request, S> Layer<S> for CacheInvalidationLayer<R> {
    type Service = CacheInvalidationService<R, S>;

    fn layer(&self, inner: S) -> Self::Service {
        CacheInvalidationService {
            inner,
            invalidators: Arc::clone(&self.invalidators),
        }
    }
}

pub struct CacheInvalidationService<R: Request, S> {
    inner: S,
    invalidators: Invalidators<R>,
}

impl<R: Request, S: Clone> Clone for CacheInvalidationService<R, S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            invalidators: Arc::clone(&self.invalidators),
        }
    }
}

impl<R, S> Service<Envelope<R>> for CacheInvalidationService<R, S>
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
        let invalidators = Arc::clone(&self.invalidators);
        Box::pin(async move {
            let request = Arc::clone(&env.request);
            let ctx = env.ctx.clone();
            let result = inner.oneshot(env).await?;
            if result.is_successful() && !invalidators.is_empty() {
                join_all_or_cancel(
                    &ctx,
                    invalidators.iter().map(|i| i.invalidate(&request, &ctx)),
                )
                .await?;
            }
            Ok(result)
        })
    }
}
