//! Validation gate for commands and command-queries.
//!
//! Collects rules from every registered [`Validator`] into one [`RuleSet`],
//! runs it once, and short-circuits with a validation result when any rule is
//! broken. Sits outside the retry stage, so retries never re-validate.

use std::sync::Arc;
use std::task::{Context, Poll};

use keel_core::{ExecutionResult, PipelineError, Request};
use tower::{Layer, Service, ServiceExt};
use tracing::debug;

use crate::service::operation::{request_name, Envelope, StageFuture};
use crate::validation::{RuleSet, Validator};

type Validators<R> = Arc<[Arc<dyn Validator<R>>]>;

// ---------------------------------------------------------------------------
// ValidationLayer
// ---------------------------------------------------------------------------

pub struct ValidationLayer<R: Request> {
    validators: Validators<R>,
}

impl<R: Request> ValidationLayer<R> {
    /// Create a new validation layer over `validators`.
    #[must_use]
    pub fn new(validators: Vec<Arc<dyn Validator<R>>>) -> Self {
        Self {
            validators: validators.into(),
        }
    }
}

impl<R: Request> Clone for ValidationLayer<R> {
    fn clone(&self) -> Self {
        Self {
            validators: Arc::clone(&self.validators),
        }
    }
}

impl<R: Request, S> Layer<S> for ValidationLayer<R> {
    type Service = ValidationService<R, S>;

    fn layer(&self, inner: S) -> Self::Service {
        ValidationService {
            inner,
            validators: Arc::clone(&self.validators),
        }
    }
}

// ---------------------------------------------------------------------------
// ValidationService
// ---------------------------------------------------------------------------

pub struct ValidationService<R: Request, S> {
    inner: S,
    validators: Validators<R>,
}

impl<R: Request, S: Clone> Clone for ValidationService<R, S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            validators: Arc::clone(&self.validators),
        }
    }
}

impl<R, S> Service<Envelope<R>> for ValidationService<R, S>
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
        let mut rules = RuleSet::new();
        for validator in self.validators.iter() {
            validator.register(&env.request, &env.ctx, &mut rules);
        }
        Box::pin(async move {
            if !rules.is_empty() {
                let broken = rules.run(&env.ctx).await?;
                if !broken.is_empty() {
                    debug!(
                        request = request_name::<R>(),
                        call_id = %env.ctx.call_id,
                        broken_rules = broken.len(),
                        "validation rejected request"
                    );
                    return Ok(ExecutionResult::validation_failed(broken));
                }
            }
            inner.oneshot(env).await
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
