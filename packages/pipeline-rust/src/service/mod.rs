//! Request dispatch framework.
//!
//! 1. **Handlers** (`handler`): one business handler per request type
//! 2. **Middleware** (`middleware`): tower layers for each cross-cutting stage
//! 3. **Registry** (`registry`): composed chains keyed by request type
//! 4. **Mediator** (`mediator`): the dispatch entry point

pub mod config;
pub mod handler;
pub mod mediator;
pub mod middleware;
pub mod operation;
pub mod registry;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export key types for convenient access.
pub use config::PipelineConfig;
pub use handler::{Handler, HandlerService};
pub use mediator::{DispatchHook, Mediator, MediatorBuilder};
pub use middleware::{BoxPipeline, CommandPipeline, IntoPipeline, QueryPipeline};
pub use operation::{request_name, DispatchError, Envelope, StageFuture};
pub use registry::{HandlerRegistry, RegisteredType};
