//! In-memory [`CacheStore`] backed by [`DashMap`].
//!
//! Entries are grouped per region so clearing a region drops a single map.
//! Expiry is checked lazily on read against `tokio::time::Instant`.

use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use dashmap::DashMap;
use keel_core::{CacheStore, Expiration};
use serde_json::Value;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
enum Deadline {
    Never,
    Fixed(Instant),
    Sliding { window: Duration, until: Instant },
}

impl Deadline {
    fn from_expiration(expiration: Expiration, now: Instant) -> Self {
        match expiration {
            Expiration::Absolute(ttl) => Self::fixed(now, ttl),
            Expiration::Sliding(window) => match now.checked_add(window) {
                Some(until) => Self::Sliding { window, until },
                None => Self::Never,
            },
            Expiration::At(at) => {
                let remaining = at
                    .duration_since(SystemTime::now())
                    .unwrap_or(Duration::ZERO);
                Self::fixed(now, remaining)
            }
        }
    }

    /// A lifetime too long to represent as an `Instant` never expires.
    fn fixed(now: Instant, ttl: Duration) -> Self {
        now.checked_add(ttl).map_or(Self::Never, Self::Fixed)
    }

    fn is_past(&self, now: Instant) -> bool {
        match self {
            Self::Never => false,
            Self::Fixed(until) | Self::Sliding { until, .. } => now >= *until,
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    deadline: Deadline,
}

/// Concurrent in-process cache store.
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    regions: DashMap<String, DashMap<String, Entry>>,
}

impl MemoryCacheStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live and not-yet-swept entries across all regions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.regions.iter().map(|r| r.len()).sum()
    }

    /// True when no entries are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &str, region: &str) -> anyhow::Result<Option<Value>> {
        let Some(entries) = self.regions.get(region) else {
            return Ok(None);
        };
        let now = Instant::now();
        if let Some(mut entry) = entries.get_mut(key) {
            if !entry.deadline.is_past(now) {
                if let Deadline::Sliding { window, .. } = entry.deadline {
                    entry.deadline = Deadline::from_expiration(Expiration::Sliding(window), now);
                }
                return Ok(Some(entry.value.clone()));
            }
        } else {
            return Ok(None);
        }
        // Expired: sweep it, unless a fresh value was set meanwhile.
        entries.remove_if(key, |_, entry| entry.deadline.is_past(now));
        Ok(None)
    }

    async fn set(&self, key: &str, region: &str, value: Value) -> anyhow::Result<()> {
        self.regions.entry(region.to_string()).or_default().insert(
            key.to_string(),
            Entry {
                value,
                deadline: Deadline::Never,
            },
        );
        Ok(())
    }

    async fn expire(&self, key: &str, region: &str, expiration: Expiration) -> anyhow::Result<()> {
        if let Some(entries) = self.regions.get(region) {
            if let Some(mut entry) = entries.get_mut(key) {
                entry.deadline = Deadline::from_expiration(expiration, Instant::now());
            }
        }
        Ok(())
    }

    async fn clear_region(&self, region: &str) -> anyhow::Result<()> {
        self.regions.remove(region);
        Ok(())
    }
}
