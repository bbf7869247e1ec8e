//! Read-through cache of what each holder currently has.
//!
//! Owned by the presentation side: the ledger never reads it. Entries expire
//! after a fixed TTL and are dropped early whenever a command changes the
//! holder's custody. Each holder carries a generation that every
//! invalidation bumps; a load that began under an older generation is handed
//! back to its caller but never stored.

use dashmap::DashMap;
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::collaborators::HolderId;
use crate::errors::ServiceError;
use crate::queries::Holding;

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Vec<Holding>,
    expires_at: Instant,
}

impl CacheEntry {
    fn new(value: Vec<Holding>, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

#[derive(Debug)]
pub struct HolderHoldingsCache {
    entries: DashMap<HolderId, CacheEntry>,
    generations: DashMap<HolderId, u64>,
    ttl: Duration,
}

impl HolderHoldingsCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            generations: DashMap::new(),
            ttl,
        }
    }

    fn generation(&self, holder_id: HolderId) -> u64 {
        self.generations.get(&holder_id).map_or(0, |g| *g)
    }

    /// Fresh entry for the holder, if any
    pub fn get(&self, holder_id: HolderId) -> Option<Vec<Holding>> {
        let entry = self.entries.get(&holder_id)?;
        if entry.is_expired() {
            drop(entry);
            self.entries.remove(&holder_id);
            return None;
        }
        Some(entry.value.clone())
    }

    pub fn insert(&self, holder_id: HolderId, value: Vec<Holding>) {
        self.entries
            .insert(holder_id, CacheEntry::new(value, self.ttl));
    }

    /// Cached value, or `load()` stored and returned on a miss
    pub async fn get_or_load<F, Fut>(
        &self,
        holder_id: HolderId,
        load: F,
    ) -> Result<Vec<Holding>, ServiceError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<Holding>, ServiceError>>,
    {
        if let Some(hit) = self.get(holder_id) {
            debug!(holder_id, "Holdings cache hit");
            return Ok(hit);
        }
        debug!(holder_id, "Holdings cache miss");
        let generation = self.generation(holder_id);
        let value = load().await?;
        self.insert_if_current(holder_id, generation, value.clone());
        Ok(value)
    }

    /// Stores `value` unless the holder was invalidated after `generation`
    /// was read. Returns whether it was stored.
    pub fn insert_if_current(
        &self,
        holder_id: HolderId,
        generation: u64,
        value: Vec<Holding>,
    ) -> bool {
        // the generation entry stays locked until the insert lands
        let current = self.generations.entry(holder_id).or_insert(0);
        if *current != generation {
            debug!(holder_id, generation, current = *current, "Discarded stale holdings load");
            return false;
        }
        self.entries
            .insert(holder_id, CacheEntry::new(value, self.ttl));
        true
    }

    pub fn invalidate(&self, holder_id: HolderId) {
        let mut generation = self.generations.entry(holder_id).or_insert(0);
        *generation += 1;
        self.entries.remove(&holder_id);
    }

    pub fn invalidate_many(&self, holders: &[HolderId]) {
        for holder_id in holders {
            self.invalidate(*holder_id);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::AssetType;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn holding(quantity: i32) -> Holding {
        Holding {
            pool_id: 1,
            code: "VEST".to_string(),
            name: "Vest".to_string(),
            asset_type: AssetType::Apparel,
            quantity,
            first_issued_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn loads_once_until_invalidated() {
        let cache = HolderHoldingsCache::new(Duration::from_secs(60));
        let loads = AtomicUsize::new(0);

        for _ in 0..3 {
            let value = cache
                .get_or_load(5, || async {
                    loads.fetch_add(1, Ordering::SeqCst);
                    Ok(vec![holding(2)])
                })
                .await
                .unwrap();
            assert_eq!(value[0].quantity, 2);
        }
        assert_eq!(loads.load(Ordering::SeqCst), 1);

        cache.invalidate(5);
        cache
            .get_or_load(5, || async {
                loads.fetch_add(1, Ordering::SeqCst);
                Ok(vec![holding(3)])
            })
            .await
            .unwrap();
        assert_eq!(loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn load_racing_an_invalidation_is_not_stored() {
        let cache = HolderHoldingsCache::new(Duration::from_secs(60));

        // a command commits and invalidates while the load is in flight
        let value = cache
            .get_or_load(7, || async {
                cache.invalidate(7);
                Ok(vec![holding(4)])
            })
            .await
            .unwrap();
        assert_eq!(value[0].quantity, 4);
        assert!(cache.get(7).is_none());

        let fresh = cache
            .get_or_load(7, || async { Ok(vec![holding(1)]) })
            .await
            .unwrap();
        assert_eq!(fresh[0].quantity, 1);
        assert_eq!(cache.get(7).unwrap()[0].quantity, 1);
    }

    #[test]
    fn insert_under_an_old_generation_is_refused() {
        let cache = HolderHoldingsCache::new(Duration::from_secs(60));
        assert!(cache.insert_if_current(3, 0, vec![holding(2)]));
        cache.invalidate(3);
        assert!(!cache.insert_if_current(3, 0, vec![holding(2)]));
        assert!(cache.is_empty());
        assert!(cache.insert_if_current(3, 1, vec![holding(1)]));
    }

    #[test]
    fn zero_ttl_never_hits() {
        let cache = HolderHoldingsCache::new(Duration::ZERO);
        cache.insert(1, vec![holding(1)]);
        assert!(cache.get(1).is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn failed_load_is_not_cached() {
        let cache = HolderHoldingsCache::new(Duration::from_secs(60));
        let result = cache
            .get_or_load(9, || async {
                Err(ServiceError::InternalError("directory down".to_string()))
            })
            .await;
        assert!(result.is_err());
        assert!(cache.get(9).is_none());
    }
}
