//! Concurrent key → bucket store.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::time::Instant;

use crate::bucket::ClientBucket;
use crate::config::RegistryConfig;

/// Process-wide store of per-client token buckets.
///
/// Buckets are created lazily on first access and removed only by
/// [`sweep`](BucketRegistry::sweep). Map locks are held just long enough to
/// look up or insert an entry and to refresh its last-seen time; the allow
/// decision runs on the returned handle, outside any map lock.
#[derive(Debug)]
pub struct BucketRegistry {
    config: RegistryConfig,
    buckets: DashMap<String, Arc<ClientBucket>>,
}

impl BucketRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            config,
            buckets: DashMap::new(),
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Returns the bucket for `key`, creating it on first use, and marks it as seen.
    ///
    /// Concurrent first-time callers for the same key all receive the same bucket:
    /// creation goes through the map entry, which is check-then-insert under the
    /// shard's write lock.
    pub fn acquire(&self, key: &str) -> Arc<ClientBucket> {
        let now = Instant::now();

        if let Some(existing) = self.buckets.get(key) {
            existing.touch(now);
            return Arc::clone(existing.value());
        }

        let entry = self.buckets.entry(key.to_string()).or_insert_with(|| {
            tracing::debug!(key, "creating rate limit bucket");
            Arc::new(ClientBucket::new(
                key.to_string(),
                self.config.requests_per_second,
                self.config.burst,
                now,
            ))
        });
        entry.touch(now);
        Arc::clone(entry.value())
    }

    /// Looks up a bucket without refreshing its last-seen time.
    pub fn get(&self, key: &str) -> Option<Arc<ClientBucket>> {
        self.buckets.get(key).map(|b| Arc::clone(b.value()))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.buckets.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Removes every bucket idle for longer than the configured ttl.
    ///
    /// Returns the number of buckets removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let ttl = self.config.ttl;
        let mut removed = 0;
        self.buckets.retain(|_, bucket| {
            let keep = bucket.idle_for(now) <= ttl;
            if !keep {
                removed += 1;
            }
            keep
        });
        removed
    }
}
