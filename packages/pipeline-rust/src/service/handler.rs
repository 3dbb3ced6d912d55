//! Business handlers and their adapter into the innermost pipeline service.

use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use keel_core::{ExecutionResult, PipelineError, Request, RequestContext};
use tower::Service;

use super::operation::{Envelope, StageFuture};

// ---------------------------------------------------------------------------
// Handler trait
// ---------------------------------------------------------------------------

/// The single business handler for request type `R`.
///
/// Handlers are stateless across calls except through collaborators they
/// hold. Business outcomes other than success are reported by returning the
/// matching [`PipelineError`] variant; the outer stages translate it.
#[async_trait]
pub trait Handler<R: Request>: Send + Sync + 'static {
    async fn handle(&self, request: &R, ctx: &RequestContext) -> Result<R::Output, PipelineError>;
}

// ---------------------------------------------------------------------------
// HandlerService
// ---------------------------------------------------------------------------

/// Innermost service: invokes the handler and wraps its output as a
/// successful [`ExecutionResult`].
pub struct HandlerService<R: Request> {
    handler: Arc<dyn Handler<R>>,
}

impl<R: Request> HandlerService<R> {
    /// Create a new service calling `handler`.
    #[must_use]
    pub fn new(handler: Arc<dyn Handler<R>>) -> Self {
        Self { handler }
    }
}

impl<R: Request> Clone for HandlerService<R> {
    fn clone(&self) -> Self {
        Self {
            handler: Arc::clone(&self.handler),
        }
    }
}

impl<R: Request> Service<Envelope<R>> for HandlerService<R> {
    type Response = ExecutionResult<R::Output>;
    type Error = PipelineError;
    type Future = StageFuture<R::Output>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, env: Envelope<R>) -> Self::Future {
        let handler = Arc::clone(&self.handler);
        Box::pin(async move {
            handler
                .handle(&env.request, &env.ctx)
                .await
                .map(ExecutionResult::ok)
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
