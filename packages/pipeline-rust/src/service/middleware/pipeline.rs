//! Pipeline composition: wraps a handler in every stage, in fixed order.
//!
//! Command and command-query chains (outermost to innermost):
//! 1. `ExceptionLayer` -- translate errors into results, nothing escapes
//! 2. `LoggingLayer` -- start/end/error hooks
//! 3. `TimingLayer` -- elapsed time and slow-request warnings
//! 4. `PermissionLayer` -- deny before any work is done
//! 5. `ValidationLayer` -- run the rule engine once per outer call
//! 6. `CacheInvalidationLayer` -- clear query regions after final success
//! 7. `RetryLayer` -- replay the handler on retryable failures
//!
//! Query chains replace 5-7 with a single `CacheReadLayer`.
//!
//! Each chain is built once and boxed, so the mediator can store it per
//! request type and clone it cheaply per call.

use std::convert::Infallible;
use std::sync::Arc;

use keel_core::{
    CacheInvalidator, CacheStore, Command, CommandQuery, ExecutionResult, PermissionCheck, Query,
    Request, RequestKind, RequestLogger,
};
use tower::util::BoxCloneSyncService;
use tower::ServiceBuilder;

use super::cache_invalidation::CacheInvalidationLayer;
use super::cache_read::CacheReadLayer;
use super::exception::{ExceptionLayer, ExceptionObserver, TracingExceptionObserver};
use super::logging::LoggingLayer;
use super::permission::PermissionLayer;
use super::retry::RetryLayer;
use super::timing::{TimingLayer, TimingObserver, TracingTimingObserver};
use super::validation::ValidationLayer;
use crate::service::config::PipelineConfig;
use crate::service::handler::{Handler, HandlerService};
use crate::service::operation::Envelope;
use crate::validation::Validator;

/// A fully composed, type-erased chain for request type `R`.
pub type BoxPipeline<R> =
    BoxCloneSyncService<Envelope<R>, ExecutionResult<<R as Request>::Output>, Infallible>;

/// Anything that can be turned into a composed chain for `R`.
pub trait IntoPipeline<R: Request> {
    fn kind(&self) -> RequestKind;

    fn into_pipeline(self, config: &PipelineConfig) -> BoxPipeline<R>;
}

/// Observers shared by both chain shapes.
struct Observers {
    timing: Arc<dyn TimingObserver>,
    exception: Arc<dyn ExceptionObserver>,
}

impl Default for Observers {
    fn default() -> Self {
        Self {
            timing: Arc::new(TracingTimingObserver),
            exception: Arc::new(TracingExceptionObserver),
        }
    }
}

// ---------------------------------------------------------------------------
// CommandPipeline
// ---------------------------------------------------------------------------

/// Builder for command and command-query chains.
pub struct CommandPipeline<R: Request> {
    kind: RequestKind,
    handler: Arc<dyn Handler<R>>,
    loggers: Vec<Arc<dyn RequestLogger<R>>>,
    permissions: Vec<Arc<dyn PermissionCheck<R>>>,
    validators: Vec<Arc<dyn Validator<R>>>,
    invalidators: Vec<Arc<dyn CacheInvalidator<R>>>,
    observers: Observers,
}

impl<R: Command> CommandPipeline<R> {
    /// Starts a command chain around `handler`.
    #[must_use]
    pub fn command(handler: impl Handler<R>) -> Self {
        Self::with_kind(RequestKind::Command, Arc::new(handler))
    }
}

impl<R: CommandQuery> CommandPipeline<R> {
    /// Starts a command-query chain around `handler`.
    #[must_use]
    pub fn command_query(handler: impl Handler<R>) -> Self {
        Self::with_kind(RequestKind::CommandQuery, Arc::new(handler))
    }
}

impl<R: Request> CommandPipeline<R> {
    fn with_kind(kind: RequestKind, handler: Arc<dyn Handler<R>>) -> Self {
        Self {
            kind,
            handler,
            loggers: Vec::new(),
            permissions: Vec::new(),
            validators: Vec::new(),
            invalidators: Vec::new(),
            observers: Observers::default(),
        }
    }

    /// Adds a logger to the logging stage.
    #[must_use]
    pub fn logger(mut self, logger: Arc<dyn RequestLogger<R>>) -> Self {
        self.loggers.push(logger);
        self
    }

    /// Adds a permission check.
    #[must_use]
    pub fn permission(mut self, check: Arc<dyn PermissionCheck<R>>) -> Self {
        self.permissions.push(check);
        self
    }

    /// Adds a validator to the validation stage.
    #[must_use]
    pub fn validator(mut self, validator: Arc<dyn Validator<R>>) -> Self {
        self.validators.push(validator);
        self
    }

    /// Adds a cache invalidator, run after a successful result.
    #[must_use]
    pub fn invalidator(mut self, invalidator: Arc<dyn CacheInvalidator<R>>) -> Self {
        self.invalidators.push(invalidator);
        self
    }

    /// Replaces the stock tracing timing observer.
    #[must_use]
    pub fn timing_observer(mut self, observer: Arc<dyn TimingObserver>) -> Self {
        self.observers.timing = observer;
        self
    }

    /// Replaces the stock tracing exception observer.
    #[must_use]
    pub fn exception_observer(mut self, observer: Arc<dyn ExceptionObserver>) -> Self {
        self.observers.exception = observer;
        self
    }

    /// Composes the chain: exception, logging, timing, permission, validation,
    /// cache invalidation, retry, handler.
    #[must_use]
    pub fn build(self, config: &PipelineConfig) -> BoxPipeline<R> {
        let svc = ServiceBuilder::new()
            .layer(ExceptionLayer::new(
                self.observers.exception,
                &config.generic_error_message,
            ))
            .layer(LoggingLayer::new(self.loggers))
            .layer(TimingLayer::new(
                self.observers.timing,
                config.default_timing_warning,
            ))
            .layer(PermissionLayer::new(self.permissions))
            .layer(ValidationLayer::new(self.validators))
            .layer(CacheInvalidationLayer::new(self.invalidators))
            .layer(RetryLayer::new())
            .service(HandlerService::new(self.handler));
        BoxCloneSyncService::new(svc)
    }
}

impl<R: Request> IntoPipeline<R> for CommandPipeline<R> {
    fn kind(&self) -> RequestKind {
        self.kind
    }

    fn into_pipeline(self, config: &PipelineConfig) -> BoxPipeline<R> {
        self.build(config)
    }
}

// ---------------------------------------------------------------------------
// QueryPipeline
// ---------------------------------------------------------------------------

/// Builder for query chains.
pub struct QueryPipeline<R: Request> {
    handler: Arc<dyn Handler<R>>,
    loggers: Vec<Arc<dyn RequestLogger<R>>>,
    permissions: Vec<Arc<dyn PermissionCheck<R>>>,
    cache_store: Option<Arc<dyn CacheStore>>,
    observers: Observers,
}

impl<R: Query> QueryPipeline<R> {
    /// Starts a query chain around `handler`.
    #[must_use]
    pub fn new(handler: impl Handler<R>) -> Self {
        Self {
            handler: Arc::new(handler),
            loggers: Vec::new(),
            permissions: Vec::new(),
            cache_store: None,
            observers: Observers::default(),
        }
    }

    /// Adds a logger to the logging stage.
    #[must_use]
    pub fn logger(mut self, logger: Arc<dyn RequestLogger<R>>) -> Self {
        self.loggers.push(logger);
        self
    }

    /// Adds a permission check.
    #[must_use]
    pub fn permission(mut self, check: Arc<dyn PermissionCheck<R>>) -> Self {
        self.permissions.push(check);
        self
    }

    /// Store used by the cache-read stage. Without one, queries are never
    /// cached.
    #[must_use]
    pub fn cache_store(mut self, store: Arc<dyn CacheStore>) -> Self {
        self.cache_store = Some(store);
        self
    }

    /// Replaces the stock tracing timing observer.
    #[must_use]
    pub fn timing_observer(mut self, observer: Arc<dyn TimingObserver>) -> Self {
        self.observers.timing = observer;
        self
    }

    /// Replaces the stock tracing exception observer.
    #[must_use]
    pub fn exception_observer(mut self, observer: Arc<dyn ExceptionObserver>) -> Self {
        self.observers.exception = observer;
        self
    }

    /// Composes the chain: exception, logging, timing, permission, cache read,
    /// handler.
    #[must_use]
    pub fn build(self, config: &PipelineConfig) -> BoxPipeline<R> {
        let svc = ServiceBuilder::new()
            .layer(ExceptionLayer::new(
                self.observers.exception,
                &config.generic_error_message,
            ))
            .layer(LoggingLayer::new(self.loggers))
            .layer(TimingLayer::new(
                self.observers.timing,
                config.default_timing_warning,
            ))
            .layer(PermissionLayer::new(self.permissions))
            .layer(CacheReadLayer::new(self.cache_store, config.cache_read_enabled))
            .service(HandlerService::new(self.handler));
        BoxCloneSyncService::new(svc)
    }
}

impl<R: Query> IntoPipeline<R> for QueryPipeline<R> {
    fn kind(&self) -> RequestKind {
        RequestKind::Query
    }

    fn into_pipeline(self, config: &PipelineConfig) -> BoxPipeline<R> {
        self.build(config)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
