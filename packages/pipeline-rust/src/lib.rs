//! Keel Pipeline — mediator, decorator stages, rule validation engine, and
//! event publisher for command/query dispatch.

pub mod cache;
pub mod events;
pub(crate) mod fanout;
pub mod service;
pub mod telemetry;
pub mod validation;

pub use cache::{cache_key, region_for, InvalidationTarget, MemoryCacheStore, QueryCacheInvalidator};
pub use events::{EventPublisher, SubscriberRegistry};
pub use service::{
    CommandPipeline, DispatchError, DispatchHook, Handler, Mediator, PipelineConfig, QueryPipeline,
};
pub use validation::{rule, Rule, RulePolicy, RuleSet, Validator};
