//! Age and size bounded pruning for the snapshot caches.

use std::hash::Hash;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

pub trait CacheEntry {
    fn fetched_at(&self) -> Instant;
}

/// Drop entries older than `max_age`, then the oldest ones until at most
/// `max_entries` remain. Returns how many entries were removed.
pub fn prune_cache<K, V>(cache: &DashMap<K, V>, max_entries: usize, max_age: Duration) -> usize
where
    K: Clone + Eq + Hash,
    V: CacheEntry,
{
    let before = cache.len();
    let now = Instant::now();
    cache.retain(|_, entry| now.duration_since(entry.fetched_at()) <= max_age);

    let excess = cache.len().saturating_sub(max_entries);
    if excess > 0 {
        let mut by_age: Vec<(Instant, K)> = cache
            .iter()
            .map(|entry| (entry.value().fetched_at(), entry.key().clone()))
            .collect();
        by_age.sort_by_key(|(fetched_at, _)| *fetched_at);
        for (_, key) in by_age.into_iter().take(excess) {
            cache.remove(&key);
        }
    }

    before.saturating_sub(cache.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Stamp(Instant);

    impl CacheEntry for Stamp {
        fn fetched_at(&self) -> Instant {
            self.0
        }
    }

    #[tokio::test(start_paused = true)]
    async fn prunes_by_age_then_size() {
        let cache: DashMap<u32, Stamp> = DashMap::new();
        cache.insert(1, Stamp(Instant::now()));
        tokio::time::advance(Duration::from_secs(60)).await;
        cache.insert(2, Stamp(Instant::now()));
        tokio::time::advance(Duration::from_secs(1)).await;
        cache.insert(3, Stamp(Instant::now()));
        cache.insert(4, Stamp(Instant::now()));

        let removed = prune_cache(&cache, 2, Duration::from_secs(30));
        assert_eq!(removed, 2);
        assert!(!cache.contains_key(&1));
        assert!(!cache.contains_key(&2));
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn fresh_cache_within_limits_is_untouched() {
        let cache: DashMap<u32, Stamp> = DashMap::new();
        cache.insert(1, Stamp(Instant::now()));
        assert_eq!(prune_cache(&cache, 4, Duration::from_secs(30)), 0);
        assert_eq!(cache.len(), 1);
    }
}
