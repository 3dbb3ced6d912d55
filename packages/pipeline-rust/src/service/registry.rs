use std::any::{Any, TypeId};
use std::sync::Arc;

use dashmap::DashMap;
use keel_core::{Request, RequestKind};

use super::middleware::pipeline::BoxPipeline;
use super::operation::request_name;

/// One registered chain, cloned out for each dispatch.
struct Registration<R: Request> {
    pipeline: BoxPipeline<R>,
}

/// Name and kind of a registered request type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisteredType {
    pub name: &'static str,
    pub kind: RequestKind,
}

/// Pre-composed chains keyed by the concrete request type.
///
/// Each request type maps to exactly one chain. Lookups are by `TypeId` and
/// downcast back to the typed chain, so dispatch needs no string matching.
#[derive(Default)]
pub struct HandlerRegistry {
    by_type: DashMap<TypeId, Arc<dyn Any + Send + Sync>>,
    described: DashMap<TypeId, RegisteredType>,
}

impl HandlerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the chain for `R`, returning `true` when it replaced an
    /// existing registration.
    pub fn register<R: Request>(&self, kind: RequestKind, pipeline: BoxPipeline<R>) -> bool {
        let id = TypeId::of::<R>();
        self.described.insert(
            id,
            RegisteredType {
                name: request_name::<R>(),
                kind,
            },
        );
        let registration: Arc<dyn Any + Send + Sync> = Arc::new(Registration {
            pipeline,
        });
        self.by_type.insert(id, registration).is_some()
    }

    /// A fresh handle on the chain for `R`.
    #[must_use]
    pub fn resolve<R: Request>(&self) -> Option<BoxPipeline<R>> {
        let entry = self.by_type.get(&TypeId::of::<R>())?;
        let registration = entry.value().downcast_ref::<Registration<R>>()?;
        Some(registration.pipeline.clone())
    }

    /// Whether a chain is registered for `R`.
    #[must_use]
    pub fn contains<R: Request>(&self) -> bool {
        self.by_type.contains_key(&TypeId::of::<R>())
    }

    /// Kind the chain for `R` was registered as.
    #[must_use]
    pub fn kind_of<R: Request>(&self) -> Option<RequestKind> {
        self.described.get(&TypeId::of::<R>()).map(|d| d.kind)
    }

    /// Every registered type, sorted by name.
    #[must_use]
    pub fn registered(&self) -> Vec<RegisteredType> {
        let mut all: Vec<RegisteredType> = self.described.iter().map(|d| *d.value()).collect();
        all.sort_by_key(|d| d.name);
        all
    }

    /// Number of registered request types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_type.len()
    }

    /// True when nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_type.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
