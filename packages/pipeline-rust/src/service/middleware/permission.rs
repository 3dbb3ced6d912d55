//! Permission middleware.
//!
//! Runs every registered permission check concurrently. A single denial
//! short-circuits with a no-permission result and nothing further in is
//! invoked.

use std::sync::Arc;
use std::task::{Context, Poll};

use keel_core::{ExecutionResult, PermissionCheck, PipelineError, Request};
use tower::{Layer, Service, ServiceExt};
use tracing::debug;

use crate::fanout::join_all_or_cancel;
use crate::service::operation::{request_name, Envelope, StageFuture};

type Checks<R> = Arc<[Arc<dyn PermissionCheck<R>>]>;

// ---------------------------------------------------------------------------
// PermissionLayer
// ---------------------------------------------------------------------------

pub struct PermissionLayer<R: Request> {
    checks: Checks<R>,
}

impl<R: Request> PermissionLayer<R> {
    /// Create a new permission layer over `checks`.
    #[must_use]
    pub fn new(checks: Vec<Arc<dyn PermissionCheck<R>>>) -> Self {
        Self {
            checks: checks.into(),
        }
    }
}

impl<R: Request> Clone for PermissionLayer<R> {
    fn clone(&self) -> Self {
        Self {
            checks: Arc::clone(&self.checks),
        }
    }
}

impl<R: Request, S> Layer<S> for PermissionLayer<R> {
    type Service = PermissionService<R, S>;

    fn layer(&self, inner: S) -> Self::Service {
        PermissionService {
            inner,
            checks: Arc::clone(&self.checks),
        }
    }
}

// ---------------------------------------------------------------------------
// PermissionService
// ---------------------------------------------------------------------------

pub struct PermissionService<R: Request, S> {
    inner: S,
    checks: Checks<R>,
}

impl<R: Request, S: Clone> Clone for PermissionService<R, S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            checks: Arc::clone(&self.checks),
        }
    }
}

impl<R, S> Service<Envelope<R>> for PermissionService<R, S>
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
        let checks = Arc::clone(&self.checks);
        Box::pin(async move {
            let verdicts = join_all_or_cancel(
                &env.ctx,
                checks.iter().map(|c| c.has_permission(&env.request, &env.ctx)),
            )
            .await?;

            if verdicts.contains(&false) {
                debug!(request = request_name::<R>(), call_id = %env.ctx.call_id, "permission check denied");
                return Ok(ExecutionResult::no_permission());
            }
            inner.oneshot(env).await
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
