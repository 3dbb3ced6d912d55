//! Read-through cache for queries.
//!
//! Only queries whose [`CachePolicy`](keel_core::CachePolicy) declares an
//! expiration take part. A present, non-null entry is returned without calling
//! inward; a miss calls inward and stores a successful result, applying one
//! expiration. Store failures never fail the query: a read failure counts as a
//! miss and a write failure is logged.

use std::sync::Arc;
use std::task::{Context, Poll};

use keel_core::{CacheStore, ExecutionResult, PipelineError, Request};
use tower::{Layer, Service, ServiceExt};
use tracing::{debug, warn};

use crate::cache::{cache_key, region_for};
use crate::service::operation::{request_name, Envelope, StageFuture};

#[derive(Clone)]
pub struct CacheReadLayer {
    store: Option<Arc<dyn CacheStore>>,
    enabled: bool,
}

impl CacheReadLayer {
    /// With no store, or `enabled == false`, the layer is a pass-through.
    #[must_use]
    pub fn new(store: Option<Arc<dyn CacheStore>>, enabled: bool) -> Self {
        Self { store, enabled }
    }
}

impl<S> Layer<S> for CacheReadLayer {
    type Service = CacheReadService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CacheReadService {
            inner,
            store: self.store.clone().filter(|_| self.enabled),
        }
    }
}

#[derive(Clone)]
pub struct CacheReadService<S> {
    inner: S,
    store: Option<Arc<dyn CacheStore>>,
}

impl<R, S> Service<Envelope<R>> for CacheReadService<S>
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
        let store = self.store.clone();
        Box::pin(async move {
            let Some(store) = store else {
                return inner.oneshot(env).await;
            };
            let Some((policy, expiration)) = env
                .request
                .cache_policy()
                .and_then(|p| p.expiration().map(|e| (p, e)))
            else {
                return inner.oneshot(env).await;
            };

            let request = request_name::<R>();
            let region = region_for::<R>(&policy, &env.ctx);
            let key = match cache_key(env.request.as_ref()) {
                Ok(key) => key,
                Err(e) => {
                    warn!(request, error = %e, "request not serializable, cache bypassed");
                    return inner.oneshot(env).await;
                }
            };

            match store.get(&key, &region).await {
                Ok(Some(value)) if !value.is_null() => {
                    match serde_json::from_value::<R::Output>(value) {
                        Ok(data) => {
                            debug!(request, call_id = %env.ctx.call_id, region, "cache hit");
                            return Ok(ExecutionResult::ok(data));
                        }
                        Err(e) => warn!(request, region, error = %e, "cached value unreadable"),
                    }
                }
                Ok(_) => {}
                Err(e) => warn!(request, region, error = %e, "cache read failed"),
            }

            let result = inner.oneshot(env).await?;
            if let Some(data) = result.data().filter(|_| result.is_successful()) {
                match serde_json::to_value(data) {
                    Ok(value) => {
                        let stored = match store.set(&key, &region, value).await {
                            Ok(()) => store.expire(&key, &region, expiration).await,
                            Err(e) => Err(e),
                        };
                        if let Err(e) = stored {
                            warn!(request, region, error = %e, "cache write failed");
                        }
                    }
                    Err(e) => warn!(request, error = %e, "result not serializable, not cached"),
                }
            }
            Ok(result)
        })
    }
}
