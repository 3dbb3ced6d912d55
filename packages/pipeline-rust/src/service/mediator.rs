//! The dispatch entry point: routes each request to the one chain registered
//! for its concrete type.

use std::sync::Arc;

use keel_core::{
    Command, CommandQuery, ExecutionResult, PipelineError, Query, Request, RequestContext,
    Subscriber,
};
use tower::ServiceExt;
use tracing::{debug, error, warn};

use super::config::PipelineConfig;
use super::middleware::pipeline::{CommandPipeline, IntoPipeline, QueryPipeline};
use super::operation::{request_name, DispatchError, Envelope};
use super::registry::HandlerRegistry;
use crate::events::{EventPublisher, SubscriberRegistry};

// ---------------------------------------------------------------------------
// DispatchHook
// ---------------------------------------------------------------------------

/// Observes every dispatch, outside all pipeline stages.
pub trait DispatchHook: Send + Sync {
    fn before_dispatch(&self, _request: &'static str, _ctx: &RequestContext) {}

    fn after_dispatch(&self, _request: &'static str, _ctx: &RequestContext, _succeeded: bool) {}
}

// ---------------------------------------------------------------------------
// Mediator
// ---------------------------------------------------------------------------

/// Routes requests to their pre-composed chains.
///
/// Cloning is cheap; clones share the registry, hooks, and subscribers.
#[derive(Clone)]
pub struct Mediator {
    registry: Arc<HandlerRegistry>,
    hooks: Arc<[Arc<dyn DispatchHook>]>,
    events: EventPublisher,
}

impl Mediator {
    /// Starts an empty [`MediatorBuilder`].
    #[must_use]
    pub fn builder() -> MediatorBuilder {
        MediatorBuilder::default()
    }

    /// Dispatches with an anonymous context.
    ///
    /// # Errors
    ///
    /// [`DispatchError::HandlerNotRegistered`] when no chain exists for `R`.
    pub async fn dispatch<R: Request>(
        &self,
        request: R,
    ) -> Result<ExecutionResult<R::Output>, DispatchError> {
        self.dispatch_with(request, RequestContext::new()).await
    }

    /// Dispatches under the caller's context.
    ///
    /// Every business outcome, including unexpected failures, comes back as
    /// an [`ExecutionResult`]; only a missing registration is an `Err`.
    ///
    /// # Errors
    ///
    /// [`DispatchError::HandlerNotRegistered`] when no chain exists for `R`.
    pub async fn dispatch_with<R: Request>(
        &self,
        request: R,
        ctx: RequestContext,
    ) -> Result<ExecutionResult<R::Output>, DispatchError> {
        let name = request_name::<R>();
        let Some(pipeline) = self.registry.resolve::<R>() else {
            error!(request = name, call_id = %ctx.call_id, "no handler registered");
            return Err(DispatchError::HandlerNotRegistered { request_type: name });
        };

        for hook in self.hooks.iter() {
            hook.before_dispatch(name, &ctx);
        }
        let result = pipeline
            .oneshot(Envelope::new(request, ctx.clone()))
            .await
            .unwrap_or_else(|never| match never {});
        for hook in self.hooks.iter() {
            hook.after_dispatch(name, &ctx, result.is_successful());
        }
        Ok(result)
    }

    /// Publishes to every subscriber of `E` and waits for all of them.
    ///
    /// # Errors
    ///
    /// The first subscriber failure, or cancellation of `ctx`.
    pub async fn publish<E: Send + Sync + 'static>(
        &self,
        event: &E,
        ctx: &RequestContext,
    ) -> Result<(), PipelineError> {
        self.events.publish(event, ctx).await
    }

    /// Starts every subscriber of `E` in the background and returns at once.
    pub fn publish_and_forget<E: Send + Sync + 'static>(&self, event: E, ctx: &RequestContext) -> usize {
        self.events.publish_and_forget(event, ctx)
    }

    /// The event publisher shared by this mediator.
    #[must_use]
    pub fn events(&self) -> &EventPublisher {
        &self.events
    }

    /// The registered chains.
    #[must_use]
    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }
}

// ---------------------------------------------------------------------------
// MediatorBuilder
// ---------------------------------------------------------------------------

type Registration = Box<dyn FnOnce(&PipelineConfig, &HandlerRegistry) + Send>;

/// Collects chains, hooks and subscribers. Chains are composed in
/// [`MediatorBuilder::build`], after the configuration is final.
#[derive(Default)]
pub struct MediatorBuilder {
    config: PipelineConfig,
    registrations: Vec<Registration>,
    hooks: Vec<Arc<dyn DispatchHook>>,
    subscribers: SubscriberRegistry,
}

impl MediatorBuilder {
    /// Replaces the configuration used to compose every chain.
    #[must_use]
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Registers the chain for `R`. A later registration for the same type
    /// replaces this one.
    #[must_use]
    pub fn register<R, P>(mut self, pipeline: P) -> Self
    where
        R: Request,
        P: IntoPipeline<R> + Send + 'static,
    {
        let registration = move |config: &PipelineConfig, registry: &HandlerRegistry| {
            let kind = pipeline.kind();
            if registry.register(kind, pipeline.into_pipeline(config)) {
                warn!(request = request_name::<R>(), %kind, "duplicate registration replaced");
            } else {
                debug!(request = request_name::<R>(), %kind, "handler registered");
            }
        };
        self.registrations.push(Box::new(registration));
        self
    }

    /// Registers a command chain.
    #[must_use]
    pub fn command<R: Command>(self, pipeline: CommandPipeline<R>) -> Self {
        self.register(pipeline)
    }

    /// Registers a command-query chain.
    #[must_use]
    pub fn command_query<R: CommandQuery>(self, pipeline: CommandPipeline<R>) -> Self {
        self.register(pipeline)
    }

    /// Registers a query chain.
    #[must_use]
    pub fn query<R: Query>(self, pipeline: QueryPipeline<R>) -> Self {
        self.register(pipeline)
    }

    /// Adds a hook run around every dispatch.
    #[must_use]
    pub fn hook(mut self, hook: Arc<dyn DispatchHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    /// Adds a subscriber for events of type `E`.
    #[must_use]
    pub fn subscribe<E: Send + Sync + 'static>(self, subscriber: Arc<dyn Subscriber<E>>) -> Self {
        self.subscribers.subscribe(subscriber);
        self
    }

    /// Composes every registered chain and returns the mediator.
    #[must_use]
    pub fn build(self) -> Mediator {
        let registry = HandlerRegistry::new();
        for registration in self.registrations {
            registration(&self.config, &registry);
        }
        Mediator {
            registry: Arc::new(registry),
            hooks: self.hooks.into(),
            events: EventPublisher::new(
                Arc::new(self.subscribers),
                self.config.forget_subscriber_timeout,
            ),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use keel_core::{PermissionCheck, RequestKind};
    use parking_lot::Mutex;
    use serde::Serialize;

    use super::*;
    use crate::service::handler::Handler;
    use crate::service::test_support::{Lookup, Ping};

    struct Answer(&'static str);

    #[async_trait]
    impl Handler<Lookup> for Answer {
        async fn handle(&self, _: &Lookup, _: &RequestContext) -> Result<String, PipelineError> {
            Ok(self.0.to_string())
        }
    }

    #[derive(Default)]
    struct Pong(AtomicU32);

    #[async_trait]
    impl Handler<Ping> for Arc<Pong> {
        async fn handle(&self, _: &Ping, _: &RequestContext) -> Result<(), PipelineError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Err(PipelineError::Concurrency)
        }
    }

    #[derive(Serialize)]
    struct Reserve(u32);

    impl Request for Reserve {
        type Output = u32;
    }

    impl CommandQuery for Reserve {}

    struct Reserver;

    #[async_trait]
    impl Handler<Reserve> for Reserver {
        async fn handle(&self, request: &Reserve, _: &RequestContext) -> Result<u32, PipelineError> {
            Ok(request.0 + 1000)
        }
    }

    struct Admins;

    #[async_trait]
    impl PermissionCheck<Lookup> for Admins {
        async fn has_permission(&self, _: &Lookup, ctx: &RequestContext) -> anyhow::Result<bool> {
            Ok(ctx.user_id.as_deref() == Some("admin"))
        }
    }

    #[derive(Default)]
    struct Recording(Mutex<Vec<String>>);

    impl DispatchHook for Recording {
        fn before_dispatch(&self, request: &'static str, _: &RequestContext) {
            self.0.lock().push(format!("before:{request}"));
        }

        fn after_dispatch(&self, request: &'static str, _: &RequestContext, succeeded: bool) {
            self.0.lock().push(format!("after:{request}:{succeeded}"));
        }
    }

    #[tokio::test]
    async fn dispatch_routes_by_concrete_type() {
        let mediator = Mediator::builder()
            .query(QueryPipeline::new(Answer("42")))
            .command_query(CommandPipeline::command_query(Reserver))
            .build();

        let answer = mediator.dispatch(Lookup::default()).await.unwrap();
        assert_eq!(answer.into_data().as_deref(), Some("42"));

        let reserved = mediator.dispatch(Reserve(7)).await.unwrap();
        assert_eq!(reserved.into_data(), Some(1007));
        assert_eq!(mediator.registry().kind_of::<Reserve>(), Some(RequestKind::CommandQuery));
    }

    #[tokio::test]
    async fn missing_registration_is_a_dispatch_error() {
        let mediator = Mediator::builder().build();
        let err = mediator.dispatch(Ping::default()).await.unwrap_err();
        let DispatchError::HandlerNotRegistered { request_type } = err;
        assert_eq!(request_type, request_name::<Ping>());
    }

    #[tokio::test]
    async fn business_failures_come_back_as_results() {
        let pong = Arc::new(Pong::default());
        let mediator = Mediator::builder()
            .command(CommandPipeline::command(Arc::clone(&pong)))
            .build();

        let result = mediator.dispatch(Ping::retrying(3, 0)).await.unwrap();
        assert!(result.has_concurrency_error());
        assert_eq!(pong.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn hooks_wrap_every_dispatch() {
        let hook = Arc::new(Recording::default());
        let mediator = Mediator::builder()
            .query(QueryPipeline::new(Answer("x")))
            .hook(hook.clone())
            .build();

        mediator.dispatch(Lookup::default()).await.unwrap();
        let name = request_name::<Lookup>();
        assert_eq!(
            hook.0.lock().clone(),
            vec![format!("before:{name}"), format!("after:{name}:true")]
        );
    }

    #[tokio::test]
    async fn caller_context_reaches_permission_checks() {
        let mediator = Mediator::builder()
            .query(QueryPipeline::new(Answer("secret")).permission(Arc::new(Admins)))
            .build();

        let denied = mediator
            .dispatch_with(Lookup::default(), RequestContext::new().with_user("guest"))
            .await
            .unwrap();
        assert!(denied.has_no_permission_error());

        let allowed = mediator
            .dispatch_with(Lookup::default(), RequestContext::new().with_user("admin"))
            .await
            .unwrap();
        assert!(allowed.is_successful());
    }

    #[tokio::test]
    async fn later_registration_wins() {
        let mediator = Mediator::builder()
            .query(QueryPipeline::new(Answer("first")))
            .query(QueryPipeline::new(Answer("second")))
            .build();

        assert_eq!(mediator.registry().len(), 1);
        let result = mediator.dispatch(Lookup::default()).await.unwrap();
        assert_eq!(result.into_data().as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn builder_subscribers_receive_published_events() {
        struct Seen(AtomicU32);

        #[async_trait]
        impl Subscriber<u32> for Seen {
            async fn handle(&self, event: &u32, _: &RequestContext) -> anyhow::Result<()> {
                self.0.fetch_add(*event, Ordering::SeqCst);
                Ok(())
            }
        }

        let seen = Arc::new(Seen(AtomicU32::new(0)));
        let mediator = Mediator::builder().subscribe::<u32>(seen.clone()).build();
        mediator.publish(&3_u32, &RequestContext::new()).await.unwrap();
        assert_eq!(seen.0.load(Ordering::SeqCst), 3);
    }
}
