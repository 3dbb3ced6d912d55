//! Concurrent fan-out shared by every stage that runs a collection of
//! collaborators at once.

use std::future::Future;

use futures_util::future::try_join_all;
use keel_core::{PipelineError, RequestContext};

/// Runs all futures concurrently, failing fast on the first error.
///
/// Resolves to `PipelineError::Cancelled` as soon as the context's
/// cancellation token fires; pending members are dropped at that point.
pub(crate) async fn join_all_or_cancel<I, F, T>(
    ctx: &RequestContext,
    futures: I,
) -> Result<Vec<T>, PipelineError>
where
    I: IntoIterator<Item = F>,
    F: Future<Output = anyhow::Result<T>>,
{
    tokio::select! {
        biased;
        () = ctx.cancellation.cancelled() => Err(PipelineError::Cancelled),
        joined = try_join_all(futures) => joined.map_err(PipelineError::from),
    }
}
