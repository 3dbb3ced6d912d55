//! Cache region and key derivation, plus the stock cache collaborators.
//!
//! A region partitions the store per query type, optionally narrowed to the
//! calling user and/or language. The item key inside a region is the hex
//! SHA-256 digest of the request's JSON form, so requests with identical
//! values share an entry.

pub mod memory;

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::try_join_all;
use keel_core::{CacheInvalidator, CachePolicy, CacheStore, Query, Request, RequestContext};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::service::operation::request_name;

pub use memory::MemoryCacheStore;

/// Builds a region name from a type name and the caller's context.
///
/// The user or language suffix is only added when requested and present.
fn region(type_name: &str, per_user: bool, per_language: bool, ctx: &RequestContext) -> String {
    let mut region = type_name.to_string();
    if per_user {
        if let Some(user) = &ctx.user_id {
            region.push_str("|user:");
            region.push_str(user);
        }
    }
    if per_language {
        if let Some(language) = &ctx.language {
            region.push_str("|lang:");
            region.push_str(language);
        }
    }
    region
}

/// Region a cacheable request is stored under.
#[must_use]
pub fn region_for<R: Request>(policy: &CachePolicy, ctx: &RequestContext) -> String {
    region(request_name::<R>(), policy.per_user, policy.per_language, ctx)
}

/// Item key for a request: hex SHA-256 of its JSON serialization.
///
/// # Errors
///
/// Returns the serializer error when the request cannot be encoded as JSON.
pub fn cache_key<R: Request>(request: &R) -> Result<String, serde_json::Error> {
    let encoded = serde_json::to_vec(request)?;
    Ok(hex::encode(Sha256::digest(&encoded)))
}

// ---------------------------------------------------------------------------
// Invalidation
// ---------------------------------------------------------------------------

/// One query type whose cached region a command clears.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidationTarget {
    type_name: &'static str,
    per_user: bool,
    per_language: bool,
}

impl InvalidationTarget {
    /// Targets the cached results of query type `Q`.
    #[must_use]
    pub fn query<Q: Query>() -> Self {
        Self {
            type_name: request_name::<Q>(),
            per_user: false,
            per_language: false,
        }
    }

    /// Clear only the calling user's partition.
    #[must_use]
    pub fn per_user(mut self) -> Self {
        self.per_user = true;
        self
    }

    /// Clear only the caller's language partition.
    #[must_use]
    pub fn per_language(mut self) -> Self {
        self.per_language = true;
        self
    }

    /// The region this target clears for the given caller.
    #[must_use]
    pub fn region(&self, ctx: &RequestContext) -> String {
        region(self.type_name, self.per_user, self.per_language, ctx)
    }
}

/// Stock invalidator clearing every target region concurrently.
pub struct QueryCacheInvalidator<R> {
    store: Arc<dyn CacheStore>,
    targets: Arc<[InvalidationTarget]>,
    _request: PhantomData<fn(&R)>,
}

impl<R: Request> QueryCacheInvalidator<R> {
    /// Create a new invalidator clearing `targets` in `store`.
    #[must_use]
    pub fn new(store: Arc<dyn CacheStore>, targets: Vec<InvalidationTarget>) -> Self {
        Self {
            store,
            targets: targets.into(),
            _request: PhantomData,
        }
    }
}

#[async_trait]
impl<R: Request> CacheInvalidator<R> for QueryCacheInvalidator<R> {
    async fn invalidate(&self, _request: &R, ctx: &RequestContext) -> anyhow::Result<()> {
        let regions: Vec<String> = self.targets.iter().map(|t| t.region(ctx)).collect();
        try_join_all(regions.iter().map(|r| self.store.clear_region(r))).await?;
        debug!(
            request = request_name::<R>(),
            call_id = %ctx.call_id,
            regions = ?regions,
            "cache regions cleared"
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
