//! Types flowing through every pipeline stage.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use keel_core::{ExecutionResult, PipelineError, Request, RequestContext};

/// A request together with its per-call context.
///
/// Cloning is cheap: the request sits behind an `Arc`, so the retry stage can
/// replay the same envelope without requiring `R: Clone`.
#[derive(Debug)]
pub struct Envelope<R> {
    pub request: Arc<R>,
    pub ctx: RequestContext,
}

impl<R> Envelope<R> {
    /// Wraps `request` for dispatch under `ctx`.
    #[must_use]
    pub fn new(request: R, ctx: RequestContext) -> Self {
        Self {
            request: Arc::new(request),
            ctx,
        }
    }
}

impl<R> Clone for Envelope<R> {
    fn clone(&self) -> Self {
        Self {
            request: Arc::clone(&self.request),
            ctx: self.ctx.clone(),
        }
    }
}

/// Short, stable name of a request type used in logs and cache regions.
#[must_use]
pub fn request_name<R: Request>() -> &'static str {
    std::any::type_name::<R>()
}

/// Future returned by every inner stage.
pub type StageFuture<T> =
    Pin<Box<dyn Future<Output = Result<ExecutionResult<T>, PipelineError>> + Send>>;

/// Configuration errors surfaced directly by the mediator.
///
/// These indicate a wiring defect, so they are never retried or converted
/// into an [`ExecutionResult`].
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("no handler registered for request type {request_type}")]
    HandlerNotRegistered { request_type: &'static str },
}
