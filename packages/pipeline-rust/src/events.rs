//! Event publishing to zero or more subscribers per event type.
//!
//! Subscribers are looked up on every publish, so subscriptions added after
//! construction are seen by the next event. [`EventPublisher::publish`] awaits
//! every subscriber and fails on the first error;
//! [`EventPublisher::publish_and_forget`] spawns each subscriber as its own task
//! and only logs what happens to it.

use std::any::{Any, TypeId};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use keel_core::{PipelineError, RequestContext, Subscriber};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::fanout::join_all_or_cancel;

// ---------------------------------------------------------------------------
// SubscriberRegistry
// ---------------------------------------------------------------------------

/// Subscribers keyed by event `TypeId`.
///
/// Each stored item is an `Arc<dyn Subscriber<E>>` boxed as `Any`, downcast
/// back when an `E` is published.
#[derive(Default)]
pub struct SubscriberRegistry {
    by_event: DashMap<TypeId, Vec<Box<dyn Any + Send + Sync>>>,
}

impl SubscriberRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a subscriber for events of type `E`.
    pub fn subscribe<E: Send + Sync + 'static>(&self, subscriber: Arc<dyn Subscriber<E>>) {
        self.by_event
            .entry(TypeId::of::<E>())
            .or_default()
            .push(Box::new(subscriber));
    }

    /// Snapshot of the subscribers currently registered for `E`.
    #[must_use]
    pub fn subscribers<E: Send + Sync + 'static>(&self) -> Vec<Arc<dyn Subscriber<E>>> {
        self.by_event
            .get(&TypeId::of::<E>())
            .map(|entry| {
                entry
                    .iter()
                    .filter_map(|s| s.downcast_ref::<Arc<dyn Subscriber<E>>>())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of subscribers for `E`.
    #[must_use]
    pub fn count<E: Send + Sync + 'static>(&self) -> usize {
        self.by_event.get(&TypeId::of::<E>()).map_or(0, |e| e.len())
    }
}

// ---------------------------------------------------------------------------
// EventPublisher
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct EventPublisher {
    registry: Arc<SubscriberRegistry>,
    forget_timeout: Option<Duration>,
}

impl EventPublisher {
    /// `forget_timeout` bounds each fire-and-forget subscriber task.
    #[must_use]
    pub fn new(registry: Arc<SubscriberRegistry>, forget_timeout: Option<Duration>) -> Self {
        Self {
            registry,
            forget_timeout,
        }
    }

    /// The subscribers this publisher resolves from.
    #[must_use]
    pub fn registry(&self) -> &SubscriberRegistry {
        &self.registry
    }

    /// Runs every subscriber for `E` concurrently and waits for all of them.
    ///
    /// # Errors
    ///
    /// The first subscriber failure as [`PipelineError::Unknown`], or
    /// [`PipelineError::Cancelled`] if the context is cancelled first.
    pub async fn publish<E: Send + Sync + 'static>(
        &self,
        event: &E,
        ctx: &RequestContext,
    ) -> Result<(), PipelineError> {
        let subscribers = self.registry.subscribers::<E>();
        if subscribers.is_empty() {
            return Ok(());
        }
        join_all_or_cancel(ctx, subscribers.iter().map(|s| s.handle(event, ctx))).await?;
        debug!(
            event = std::any::type_name::<E>(),
            call_id = %ctx.call_id,
            subscribers = subscribers.len(),
            "event published"
        );
        Ok(())
    }

    /// Spawns one detached task per subscriber and returns immediately with
    /// the number of tasks started.
    ///
    /// The tasks run under a fresh cancellation token, so cancelling the
    /// caller does not stop them. Must be called within a Tokio runtime.
    pub fn publish_and_forget<E: Send + Sync + 'static>(&self, event: E, ctx: &RequestContext) -> usize {
        let subscribers = self.registry.subscribers::<E>();
        if subscribers.is_empty() {
            return 0;
        }
        let event = Arc::new(event);
        let detached = ctx.clone().with_cancellation(CancellationToken::new());
        let count = subscribers.len();

        for subscriber in subscribers {
            let event = Arc::clone(&event);
            let ctx = detached.clone();
            let timeout = self.forget_timeout;
            tokio::spawn(async move {
                let name = std::any::type_name::<E>();
                let work = subscriber.handle(&event, &ctx);
                let outcome = match timeout {
                    Some(limit) => match tokio::time::timeout(limit, work).await {
                        Ok(outcome) => outcome,
                        Err(_) => {
                            warn!(event = name, call_id = %ctx.call_id, "subscriber timed out");
                            return;
                        }
                    },
                    None => work.await,
                };
                if let Err(e) = outcome {
                    warn!(event = name, call_id = %ctx.call_id, error = %e, "subscriber failed");
                }
            });
        }
        count
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use tokio::sync::mpsc;

    use super::*;

    #[derive(Debug)]
    struct OrderPlaced(u32);

    #[derive(Debug)]
    struct Unrelated;

    #[derive(Default)]
    struct Counter(AtomicU32);

    #[async_trait]
    impl Subscriber<OrderPlaced> for Counter {
        async fn handle(&self, event: &OrderPlaced, _: &RequestContext) -> anyhow::Result<()> {
            self.0.fetch_add(event.0, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl Subscriber<OrderPlaced> for Failing {
        async fn handle(&self, _: &OrderPlaced, _: &RequestContext) -> anyhow::Result<()> {
            anyhow::bail!("mail server down")
        }
    }

    /// Reports each handled event on a channel.
    struct Notify(mpsc::UnboundedSender<u32>);

    #[async_trait]
    impl Subscriber<OrderPlaced> for Notify {
        async fn handle(&self, event: &OrderPlaced, _: &RequestContext) -> anyhow::Result<()> {
            let _ = self.0.send(event.0);
            Ok(())
        }
    }

    fn publisher() -> EventPublisher {
        EventPublisher::new(Arc::new(SubscriberRegistry::new()), None)
    }

    #[tokio::test]
    async fn publish_without_subscribers_completes() {
        let publisher = publisher();
        publisher
            .publish(&OrderPlaced(1), &RequestContext::new())
            .await
            .unwrap();
        assert_eq!(publisher.publish_and_forget(OrderPlaced(1), &RequestContext::new()), 0);
    }

    #[tokio::test]
    async fn publish_reaches_every_subscriber_of_the_type() {
        let publisher = publisher();
        let (a, b) = (Arc::new(Counter::default()), Arc::new(Counter::default()));
        publisher.registry().subscribe::<OrderPlaced>(a.clone());
        publisher.registry().subscribe::<OrderPlaced>(b.clone());

        publisher
            .publish(&OrderPlaced(5), &RequestContext::new())
            .await
            .unwrap();
        publisher.publish(&Unrelated, &RequestContext::new()).await.unwrap();

        assert_eq!(a.0.load(Ordering::SeqCst), 5);
        assert_eq!(b.0.load(Ordering::SeqCst), 5);
        assert_eq!(publisher.registry().count::<OrderPlaced>(), 2);
        assert_eq!(publisher.registry().count::<Unrelated>(), 0);
    }

    #[tokio::test]
    async fn publish_propagates_subscriber_failure() {
        let publisher = publisher();
        publisher.registry().subscribe::<OrderPlaced>(Arc::new(Counter::default()));
        publisher.registry().subscribe::<OrderPlaced>(Arc::new(Failing));

        let err = publisher
            .publish(&OrderPlaced(1), &RequestContext::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Unknown(_)));
    }

    #[tokio::test]
    async fn subscriptions_are_resolved_per_publish() {
        let publisher = publisher();
        let counter = Arc::new(Counter::default());
        publisher
            .publish(&OrderPlaced(1), &RequestContext::new())
            .await
            .unwrap();
        publisher.registry().subscribe::<OrderPlaced>(counter.clone());
        publisher
            .publish(&OrderPlaced(1), &RequestContext::new())
            .await
            .unwrap();
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn forget_runs_subscribers_and_swallows_failures() {
        let publisher = publisher();
        let (tx, mut rx) = mpsc::unbounded_channel();
        publisher.registry().subscribe::<OrderPlaced>(Arc::new(Failing));
        publisher.registry().subscribe::<OrderPlaced>(Arc::new(Notify(tx)));

        let ctx = RequestContext::new();
        let started = publisher.publish_and_forget(OrderPlaced(7), &ctx);
        ctx.cancellation.cancel();

        assert_eq!(started, 2);
        assert_eq!(rx.recv().await, Some(7));
    }
}
