//! Hostname resolution cache.
//!
//! Holds the addresses learned through DNS-over-HTTPS for the lifetime of the
//! process. Entries are never expired, evicted or overwritten, and failed
//! lookups are not cached.

use moka::future::Cache;
use std::net::IpAddr;
use tracing::{debug, instrument};

/// Concurrency-safe hostname → IP address map.
///
/// Cloning is cheap and clones share the same storage, so one instance can be
/// handed to every transport that should see the same resolutions.
#[derive(Clone)]
pub struct ResolutionCache {
    entries: Cache<String, IpAddr>,
}

impl ResolutionCache {
    /// Create an empty cache
    pub fn new() -> Self {
        // No max_capacity and no time_to_live: moka never evicts.
        Self {
            entries: Cache::builder().build(),
        }
    }

    /// Look up a cached address
    pub async fn get(&self, host: &str) -> Option<IpAddr> {
        self.entries.get(host).await
    }

    /// Record an address for `host` unless one is already cached.
    ///
    /// Returns `true` when the entry was inserted and `false` when an existing
    /// entry was kept.
    #[instrument(skip(self))]
    pub async fn set(&self, host: &str, ip: IpAddr) -> bool {
        let entry = self.entries.entry(host.to_string()).or_insert(ip).await;

        if entry.is_fresh() {
            debug!(host = %host, ip = %ip, "Cached resolution");
        } else {
            debug!(host = %host, kept = %entry.value(), "Resolution already cached");
        }

        entry.is_fresh()
    }

    /// Number of cached hostnames
    pub async fn len(&self) -> u64 {
        self.entries.run_pending_tasks().await;
        self.entries.entry_count()
    }

    /// Whether nothing has been cached yet
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for ResolutionCache {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ResolutionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolutionCache")
            .field("entries", &self.entries.entry_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, last))
    }

    #[tokio::test]
    async fn test_get_and_set() {
        let cache = ResolutionCache::new();

        assert!(cache.get("html.duckduckgo.com").await.is_none());
        assert!(cache.set("html.duckduckgo.com", ip(1)).await);
        assert_eq!(cache.get("html.duckduckgo.com").await, Some(ip(1)));
    }

    #[tokio::test]
    async fn test_set_never_overwrites() {
        let cache = ResolutionCache::new();

        assert!(cache.set("duckduckgo.com", ip(1)).await);
        assert!(!cache.set("duckduckgo.com", ip(2)).await);
        assert_eq!(cache.get("duckduckgo.com").await, Some(ip(1)));
    }

    #[tokio::test]
    async fn test_clones_share_entries() {
        let cache = ResolutionCache::new();
        let other = cache.clone();

        cache.set("duckduckgo.com", ip(7)).await;
        assert_eq!(other.get("duckduckgo.com").await, Some(ip(7)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_sets_keep_every_entry() {
        let cache = ResolutionCache::new();

        let tasks: Vec<_> = (0..64u8)
            .map(|i| {
                let cache = cache.clone();
                tokio::spawn(async move {
                    cache.set(&format!("host{}.duckduckgo.com", i), ip(i)).await
                })
            })
            .collect();

        for task in tasks {
            assert!(task.await.unwrap());
        }

        for i in 0..64u8 {
            assert_eq!(
                cache.get(&format!("host{}.duckduckgo.com", i)).await,
                Some(ip(i))
            );
        }
        assert_eq!(cache.len().await, 64);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_sets_same_host_single_winner() {
        let cache = ResolutionCache::new();

        let tasks: Vec<_> = (1..=16u8)
            .map(|i| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.set("duckduckgo.com", ip(i)).await })
            })
            .collect();

        let mut inserted = 0;
        for task in tasks {
            if task.await.unwrap() {
                inserted += 1;
            }
        }

        assert_eq!(inserted, 1);
        assert!(cache.get("duckduckgo.com").await.is_some());
    }
}
