//! Tower middleware layers, one per cross-cutting stage.
//!
//! - [`exception`]: error-to-result translation (outermost)
//! - [`logging`]: start/end/error logger fan-out
//! - [`timing`]: elapsed time and slow-request warnings
//! - [`permission`]: concurrent permission checks
//! - [`validation`]: rule-engine gate (commands)
//! - [`cache_invalidation`]: post-success region clearing (commands)
//! - [`retry`]: bounded constant-delay retry (commands, innermost)
//! - [`cache_read`]: read-through cache (queries, innermost)
//! - [`pipeline`]: composes the stages in their fixed order

pub mod cache_invalidation;
pub mod cache_read;
pub mod exception;
pub mod logging;
pub mod permission;
pub mod pipeline;
pub mod retry;
pub mod timing;
pub mod validation;

pub use cache_invalidation::CacheInvalidationLayer;
pub use cache_read::CacheReadLayer;
pub use exception::{ExceptionLayer, ExceptionObserver, TracingExceptionObserver};
pub use logging::{LoggingLayer, TracingRequestLogger};
pub use permission::PermissionLayer;
pub use pipeline::{BoxPipeline, CommandPipeline, IntoPipeline, QueryPipeline};
pub use retry::RetryLayer;
pub use timing::{TimingLayer, TimingObserver, TracingTimingObserver};
pub use validation::ValidationLayer;
