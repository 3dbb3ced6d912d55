//! Exception-translation middleware: the outermost stage.
//!
//! Converts every `PipelineError` raised further in into the matching
//! `ExecutionResult` shape. Its `Error` type is `Infallible`, so nothing
//! escapes to the caller. A panic in an inner stage or the handler is caught
//! and translated as an unknown error.

use std::convert::Infallible;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::FutureExt;
use keel_core::{BrokenRule, ExecutionResult, PipelineError, Request, RequestContext};
use tower::{Layer, Service, ServiceExt};
use tracing::{error, info, warn};

use crate::service::operation::{request_name, Envelope};

// ---------------------------------------------------------------------------
// ExceptionObserver
// ---------------------------------------------------------------------------

/// Side-effect hooks invoked once per translated error, before the result
/// is returned. Every method defaults to a structured `tracing` event.
pub trait ExceptionObserver: Send + Sync {
    fn on_broken_rules(&self, request: &'static str, ctx: &RequestContext, rules: &[BrokenRule]) {
        info!(request, call_id = %ctx.call_id, broken_rules = rules.len(), "validation failed");
    }

    fn on_user_friendly(&self, request: &'static str, ctx: &RequestContext, message: &str) {
        info!(request, call_id = %ctx.call_id, detail = message, "user-facing error");
    }

    fn on_data_not_found(&self, request: &'static str, ctx: &RequestContext) {
        info!(request, call_id = %ctx.call_id, "data not found");
    }

    fn on_concurrency(&self, request: &'static str, ctx: &RequestContext) {
        warn!(request, call_id = %ctx.call_id, "concurrency conflict");
    }

    fn on_no_permission(&self, request: &'static str, ctx: &RequestContext) {
        warn!(request, call_id = %ctx.call_id, user = ?ctx.user_id, "permission denied");
    }

    /// Anything outside the business taxonomy, including cancellation.
    fn on_unknown(&self, request: &'static str, ctx: &RequestContext, error: &PipelineError) {
        error!(request, call_id = %ctx.call_id, kind = error.kind(), error = %error, "unhandled error");
    }
}

/// Stock observer using the default `tracing` hooks.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingExceptionObserver;

impl ExceptionObserver for TracingExceptionObserver {}

/// Maps one error to its result shape, invoking the matching hook.
fn translate<T>(
    error: PipelineError,
    request: &'static str,
    ctx: &RequestContext,
    observer: &dyn ExceptionObserver,
    generic_message: &str,
) -> ExecutionResult<T> {
    match error {
        PipelineError::BrokenRules(rules) => {
            observer.on_broken_rules(request, ctx, &rules);
            ExecutionResult::validation_failed(rules)
        }
        PipelineError::UserFriendly(message) => {
            observer.on_user_friendly(request, ctx, &message);
            ExecutionResult::error(message)
        }
        PipelineError::DataNotFound => {
            observer.on_data_not_found(request, ctx);
            ExecutionResult::data_not_found()
        }
        PipelineError::Concurrency => {
            observer.on_concurrency(request, ctx);
            ExecutionResult::concurrency()
        }
        PipelineError::NoPermission => {
            observer.on_no_permission(request, ctx);
            ExecutionResult::no_permission()
        }
        PipelineError::Cancelled => {
            observer.on_unknown(request, ctx, &error);
            ExecutionResult::error("request was cancelled")
        }
        PipelineError::Unknown(_) => {
            observer.on_unknown(request, ctx, &error);
            ExecutionResult::error(generic_message)
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

// ---------------------------------------------------------------------------
// ExceptionLayer
// ---------------------------------------------------------------------------

/// Tower layer that translates inner errors into result shapes.
#[derive(Clone)]
pub struct ExceptionLayer {
    observer: Arc<dyn ExceptionObserver>,
    generic_message: Arc<str>,
}

impl ExceptionLayer {
    /// Create a new exception layer. `generic_message` replaces unknown errors.
    #[must_use]
    pub fn new(observer: Arc<dyn ExceptionObserver>, generic_message: &str) -> Self {
        Self {
            observer,
            generic_message: Arc::from(generic_message),
        }
    }
}

impl<S> Layer<S> for ExceptionLayer {
    type Service = ExceptionService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ExceptionService {
            inner,
            observer: Arc::clone(&self.observer),
            generic_message: Arc::clone(&self.generic_message),
        }
    }
}

// ---------------------------------------------------------------------------
// ExceptionService
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct ExceptionService<S> {
    inner: S,
    observer: Arc<dyn ExceptionObserver>,
    generic_message: Arc<str>,
}

impl<R, S> Service<Envelope<R>> for ExceptionService<S>
where
    R: Request,
    S: Service<Envelope<R>, Response = ExecutionResult<R::Output>, Error = PipelineError>
        + Clone
        + Send
        + 'static,
    S::Future: Send + 'static,
{
    type Response = ExecutionResult<R::Output>;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<ExecutionResult<R::Output>, Infallible>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        // Readiness of the inner service is awaited per call by `oneshot`.
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, env: Envelope<R>) -> Self::Future {
        let inner = self.inner.clone();
        let observer = Arc::clone(&self.observer);
        let generic_message = Arc::clone(&self.generic_message);
        let ctx = env.ctx.clone();
        Box::pin(async move {
            let outcome = match AssertUnwindSafe(inner.oneshot(env)).catch_unwind().await {
                Ok(outcome) => outcome,
                Err(payload) => Err(PipelineError::Unknown(anyhow::anyhow!(
                    "handler panicked: {}",
                    panic_message(payload.as_ref())
                ))),
            };
            match outcome {
                Ok(result) => Ok(result),
                Err(error) => Ok(translate(
                    error,
                    request_name::<R>(),
                    &ctx,
                    observer.as_ref(),
                    &generic_message,
                )),
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
