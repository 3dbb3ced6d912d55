//! Keel Core — request model, execution results, error taxonomy, and the
//! collaborator traits consumed by the dispatch pipeline.

pub mod context;
pub mod error;
pub mod request;
pub mod result;
pub mod traits;

pub use context::RequestContext;
pub use error::PipelineError;
pub use request::{
    CachePolicy, Command, CommandQuery, ErrorMatcher, Expiration, Query, Request, RequestKind,
    RetryFilter, RetryPolicy,
};
pub use result::{distinct_rules, BrokenRule, ExecutionResult, ResultError};
pub use traits::{CacheInvalidator, CacheStore, PermissionCheck, RequestLogger, Subscriber};
