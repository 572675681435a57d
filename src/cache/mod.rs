//! Short-TTL read-through caching for follower state under fan-out load.
//!
//! The generic [`TtlCache`] stores string-keyed values with per-entry
//! expiry; [`FollowerStateCache`] wraps the two hot keys (active follower
//! list per strategy, follower equity) with the TTLs the orchestrator
//! needs. Callers invalidate explicitly on known mutations.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rust_decimal::Decimal;
use tokio::sync::RwLock;
use tracing::debug;

use crate::models::FollowerSubscription;

pub const DEFAULT_TTL: Duration = Duration::from_secs(300);
pub const FOLLOWER_LIST_TTL: Duration = Duration::from_secs(120);
pub const EQUITY_TTL: Duration = Duration::from_secs(60);

struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

/// A string-keyed cache with per-entry TTL.
pub struct TtlCache<V: Clone> {
    entries: Arc<RwLock<HashMap<String, CacheEntry<V>>>>,
    default_ttl: Duration,
}

impl<V: Clone> Clone for TtlCache<V> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
            default_ttl: self.default_ttl,
        }
    }
}

impl<V: Clone> TtlCache<V> {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            default_ttl,
        }
    }

    /// Fetch a live value; expired entries are dropped on access.
    pub async fn get(&self, key: &str) -> Option<V> {
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(entry) if entry.expires_at > Instant::now() => {
                    return Some(entry.value.clone());
                }
                Some(_) => {}
                None => return None,
            }
        }

        // Entry exists but has expired; evict it.
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get(key) {
            if entry.expires_at <= Instant::now() {
                entries.remove(key);
            } else {
                return Some(entry.value.clone());
            }
        }
        None
    }

    pub async fn insert(&self, key: impl Into<String>, value: V) {
        self.insert_with_ttl(key, value, self.default_ttl).await;
    }

    pub async fn insert_with_ttl(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let mut entries = self.entries.write().await;
        entries.insert(
            key.into(),
            CacheEntry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    pub async fn remove(&self, key: &str) {
        self.entries.write().await.remove(key);
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    /// Drop every expired entry; returns how many were removed.
    pub async fn clear_expired(&self) -> usize {
        let mut entries = self.entries.write().await;
        let now = Instant::now();
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        before - entries.len()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

fn follower_list_key(strategy_id: &str) -> String {
    format!("strategy:followers:{strategy_id}")
}

fn equity_key(follower_id: &str) -> String {
    format!("follower:equity:{follower_id}")
}

/// Typed cache over the values the orchestrator reads on every fan-out.
#[derive(Clone)]
pub struct FollowerStateCache {
    followers: TtlCache<Vec<FollowerSubscription>>,
    equity: TtlCache<Decimal>,
}

impl FollowerStateCache {
    pub fn new() -> Self {
        Self {
            followers: TtlCache::new(FOLLOWER_LIST_TTL),
            equity: TtlCache::new(EQUITY_TTL),
        }
    }

    pub async fn followers_for(&self, strategy_id: &str) -> Option<Vec<FollowerSubscription>> {
        self.followers.get(&follower_list_key(strategy_id)).await
    }

    pub async fn store_followers(&self, strategy_id: &str, followers: Vec<FollowerSubscription>) {
        self.followers
            .insert(follower_list_key(strategy_id), followers)
            .await;
    }

    /// Must be called when a follower subscribes, unsubscribes, or is paused.
    pub async fn invalidate_followers(&self, strategy_id: &str) {
        self.followers.remove(&follower_list_key(strategy_id)).await;
    }

    pub async fn equity_of(&self, follower_id: &str) -> Option<Decimal> {
        self.equity.get(&equity_key(follower_id)).await
    }

    pub async fn store_equity(&self, follower_id: &str, equity: Decimal) {
        self.equity.insert(equity_key(follower_id), equity).await;
    }

    pub async fn invalidate_equity(&self, follower_id: &str) {
        self.equity.remove(&equity_key(follower_id)).await;
    }

    pub async fn clear(&self) {
        self.followers.clear().await;
        self.equity.clear().await;
    }

    pub async fn clear_expired(&self) -> usize {
        self.followers.clear_expired().await + self.equity.clear_expired().await
    }

    /// Spawn a background sweep that drops expired entries every `period`.
    pub fn spawn_sweeper(&self, period: Duration) -> tokio::task::JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let removed = cache.clear_expired().await;
                if removed > 0 {
                    debug!(removed, "Swept expired cache entries");
                }
            }
        })
    }
}

impl Default for FollowerStateCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn value_retrievable_before_ttl_and_gone_after() {
        let cache: TtlCache<u32> = TtlCache::new(Duration::from_millis(100));
        cache.insert("k", 7).await;
        assert_eq!(cache.get("k").await, Some(7));

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(cache.get("k").await, None);
    }

    #[tokio::test]
    async fn clear_expired_removes_only_dead_entries() {
        let cache: TtlCache<u32> = TtlCache::new(Duration::from_millis(50));
        cache.insert("dead", 1).await;
        cache.insert_with_ttl("alive", 2, Duration::from_secs(60)).await;

        tokio::time::sleep(Duration::from_millis(80)).await;
        let removed = cache.clear_expired().await;
        assert_eq!(removed, 1);
        assert_eq!(cache.len().await, 1);
        assert_eq!(cache.get("alive").await, Some(2));
    }

    #[tokio::test]
    async fn sweeper_evicts_expired_entries_in_background() {
        let cache = FollowerStateCache::new();
        cache
            .equity
            .insert_with_ttl("follower:equity:f1", dec!(100), Duration::from_millis(30))
            .await;

        let handle = cache.spawn_sweeper(Duration::from_millis(25));
        tokio::time::sleep(Duration::from_millis(120)).await;
        handle.abort();

        assert_eq!(cache.equity.len().await, 0);
    }

    #[test]
    fn follower_state_cache_invalidation() {
        tokio_test::block_on(async {
            let cache = FollowerStateCache::new();
            let subs = vec![FollowerSubscription::new("follower-1", "strat-1")];

            cache.store_followers("strat-1", subs.clone()).await;
            assert_eq!(cache.followers_for("strat-1").await.unwrap().len(), 1);

            cache.invalidate_followers("strat-1").await;
            assert!(cache.followers_for("strat-1").await.is_none());

            cache.store_equity("follower-1", dec!(1000)).await;
            assert_eq!(cache.equity_of("follower-1").await, Some(dec!(1000)));
            cache.invalidate_equity("follower-1").await;
            assert!(cache.equity_of("follower-1").await.is_none());
        });
    }
}
