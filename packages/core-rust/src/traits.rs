use async_trait::async_trait;

use crate::context::RequestContext;
use crate::error::PipelineError;
use crate::request::{Expiration, Request};
use crate::result::ExecutionResult;

/// Key/region store backing the query cache.
/// In-process implementation: `keel_pipeline::cache::MemoryCacheStore`.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Fetch an entry. Expired entries read as absent.
    async fn get(&self, key: &str, region: &str) -> anyhow::Result<Option<serde_json::Value>>;

    /// Store an entry without expiration. Overwrites any existing value.
    async fn set(&self, key: &str, region: &str, value: serde_json::Value) -> anyhow::Result<()>;

    /// Attach an expiration to an existing entry.
    async fn expire(&self, key: &str, region: &str, expiration: Expiration) -> anyhow::Result<()>;

    /// Remove every entry in the region.
    async fn clear_region(&self, region: &str) -> anyhow::Result<()>;
}

/// Opaque authorization check for one request type.
#[async_trait]
pub trait PermissionCheck<R: Request>: Send + Sync {
    /// Returns `false` to deny.
    async fn has_permission(&self, request: &R, ctx: &RequestContext) -> anyhow::Result<bool>;
}

/// Lifecycle hooks invoked by the logging stage.
///
/// All loggers for a request run concurrently at each hook.
#[async_trait]
pub trait RequestLogger<R: Request>: Send + Sync {
    async fn on_start(&self, request: &R, ctx: &RequestContext) -> anyhow::Result<()>;

    async fn on_end(
        &self,
        request: &R,
        ctx: &RequestContext,
        result: &ExecutionResult<R::Output>,
    ) -> anyhow::Result<()>;

    /// Called when an inner stage fails. The error is re-raised afterwards
    /// regardless of what this returns.
    async fn on_error(
        &self,
        request: &R,
        ctx: &RequestContext,
        error: &PipelineError,
    ) -> anyhow::Result<()>;
}

/// Clears cached query data after a successful mutation.
#[async_trait]
pub trait CacheInvalidator<R: Request>: Send + Sync {
    async fn invalidate(&self, request: &R, ctx: &RequestContext) -> anyhow::Result<()>;
}

/// Receives events of type `E` from the event publisher.
#[async_trait]
pub trait Subscriber<E: Send + Sync + 'static>: Send + Sync {
    async fn handle(&self, event: &E, ctx: &RequestContext) -> anyhow::Result<()>;
}
