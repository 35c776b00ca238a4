//! In-memory query cache.
//!
//! Each key owns one slot holding the last fetch result plus two flags:
//! whether a fetch is in flight and whether the host asked for the value to
//! be refreshed. Slots are published through a `tokio::sync::watch` channel,
//! so any number of readers can observe a slot while exactly one fetcher
//! writes to it.
//!
//! Every invalidation bumps the slot's generation. A fetch remembers the
//! generation it was claimed at, so a result that was already in flight when
//! the slot got invalidated leaves the slot stale instead of passing for
//! fresh data.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::watch;
use tracing::debug;

#[derive(Clone, Debug, PartialEq)]
pub enum FetchState<T> {
    /// Nothing received yet.
    Pending,
    Ready(T),
    /// The last fetch failed; holds the rendered error.
    Failed(String),
}

impl<T> FetchState<T> {
    pub fn is_pending(&self) -> bool {
        matches!(self, FetchState::Pending)
    }

    pub fn ready(&self) -> Option<&T> {
        match self {
            FetchState::Ready(value) => Some(value),
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Slot<T> {
    pub state: FetchState<T>,
    pub is_fetching: bool,
    pub is_stale: bool,
    /// Number of invalidations so far.
    pub generation: u64,
    /// Generation the current `state` was fetched at.
    pub settled_generation: u64,
}

pub struct CacheEntry<T> {
    slot: watch::Sender<Slot<T>>,
}

impl<T> CacheEntry<T> {
    fn new() -> CacheEntry<T> {
        let (slot, _) = watch::channel(Slot {
            state: FetchState::Pending,
            is_fetching: false,
            is_stale: false,
            generation: 0,
            settled_generation: 0,
        });
        CacheEntry { slot }
    }

    /// Claims the right to fetch this slot. At most one claim is outstanding
    /// at a time, and only a pending or stale slot can be claimed.
    pub fn try_claim(self: &Arc<Self>) -> Option<Claim<T>> {
        let mut generation = 0;
        let claimed = self.slot.send_if_modified(|slot| {
            let needs_fetch = slot.state.is_pending() || slot.is_stale;
            if slot.is_fetching || !needs_fetch {
                return false;
            }
            slot.is_fetching = true;
            generation = slot.generation;
            true
        });

        if !claimed {
            return None;
        }
        Some(Claim {
            entry: self.clone(),
            generation,
            settled: false,
        })
    }

    /// Marks the slot stale and returns the new generation. A fetch that
    /// settles afterwards only clears the flag if it was claimed at or after
    /// that generation.
    pub fn mark_stale(&self) -> u64 {
        let mut generation = 0;
        self.slot.send_modify(|slot| {
            slot.generation += 1;
            slot.is_stale = true;
            generation = slot.generation;
        });
        generation
    }

    pub fn subscribe(&self) -> watch::Receiver<Slot<T>> {
        self.slot.subscribe()
    }

    fn release(&self) {
        self.slot.send_modify(|slot| {
            slot.is_fetching = false;
            slot.is_stale = true;
        });
    }
}

impl<T: Clone> CacheEntry<T> {
    pub fn snapshot(&self) -> Slot<T> {
        self.slot.borrow().clone()
    }

    pub fn state(&self) -> FetchState<T> {
        self.slot.borrow().state.clone()
    }

    /// Waits until no fetch is in flight and returns the slot.
    pub async fn wait_settled(&self) -> Slot<T> {
        let mut rx = self.slot.subscribe();
        // The sender is owned by self, so the channel stays open while we wait
        let slot = match rx.wait_for(|slot| !slot.is_fetching).await {
            Ok(slot) => slot.clone(),
            Err(_) => self.snapshot(),
        };
        slot
    }
}

/// Exclusive right to fill a slot, handed out by `CacheEntry::try_claim`.
/// Dropping it without settling releases the slot and leaves it stale, so
/// the next access fetches again.
pub struct Claim<T> {
    entry: Arc<CacheEntry<T>>,
    generation: u64,
    settled: bool,
}

impl<T> Claim<T> {
    pub fn settle(mut self, state: FetchState<T>) {
        let generation = self.generation;
        self.entry.slot.send_modify(|slot| {
            slot.state = state;
            slot.is_fetching = false;
            slot.is_stale = slot.generation != generation;
            slot.settled_generation = generation;
        });
        self.settled = true;
    }
}

impl<T> Drop for Claim<T> {
    fn drop(&mut self) {
        if !self.settled {
            debug!("Fetch dropped before it settled, releasing the slot");
            self.entry.release();
        }
    }
}

pub struct QueryCache<T> {
    entries: RwLock<HashMap<String, Arc<CacheEntry<T>>>>,
}

impl<T> QueryCache<T> {
    pub fn new() -> QueryCache<T> {
        QueryCache {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the slot for `key`, creating a pending one on first use.
    pub fn entry(&self, key: &str) -> Arc<CacheEntry<T>> {
        if let Some(entry) = self.get(key) {
            return entry;
        }
        let mut entries_guard = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries_guard
            .entry(key.to_owned())
            .or_insert_with(|| Arc::new(CacheEntry::new()))
            .clone()
    }

    pub fn get(&self, key: &str) -> Option<Arc<CacheEntry<T>>> {
        let entries_guard = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries_guard.get(key).cloned()
    }

    /// Marks the slot stale so the next access refetches. Returns whether a
    /// slot existed for `key`.
    pub fn invalidate(&self, key: &str) -> bool {
        match self.get(key) {
            Some(entry) => {
                entry.mark_stale();
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, key: &str) -> bool {
        let mut entries_guard = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries_guard.remove(key).is_some()
    }

    pub fn clear(&self) {
        let mut entries_guard = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries_guard.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for QueryCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn entry_is_shared_per_key() {
        let cache = QueryCache::<u32>::new();
        let a = cache.entry("channels");
        let b = cache.entry("channels");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 1);
        assert!(a.state().is_pending());
    }

    #[test]
    fn only_one_claim_until_settled() {
        let cache = QueryCache::<u32>::new();
        let entry = cache.entry("channels");
        let claim = entry.try_claim().unwrap();
        assert!(entry.try_claim().is_none());

        claim.settle(FetchState::Ready(7));
        assert_eq!(entry.state(), FetchState::Ready(7));
        // fresh data doesn't need another fetch
        assert!(entry.try_claim().is_none());
    }

    #[test]
    fn invalidate_allows_one_refetch_and_keeps_data() {
        let cache = QueryCache::<u32>::new();
        assert!(!cache.invalidate("channels"));

        let entry = cache.entry("channels");
        entry.try_claim().unwrap().settle(FetchState::Ready(1));
        assert!(cache.invalidate("channels"));
        assert!(entry.snapshot().is_stale);
        assert_eq!(entry.state(), FetchState::Ready(1));

        let claim = entry.try_claim().unwrap();
        assert!(entry.try_claim().is_none());
        claim.settle(FetchState::Ready(2));
        assert!(!entry.snapshot().is_stale);
    }

    #[test]
    fn invalidation_during_fetch_keeps_slot_stale() {
        let cache = QueryCache::<u32>::new();
        let entry = cache.entry("channels");
        let claim = entry.try_claim().unwrap();

        let generation = entry.mark_stale();
        claim.settle(FetchState::Ready(1));

        let slot = entry.snapshot();
        assert!(slot.is_stale);
        assert!(slot.settled_generation < generation);

        entry.try_claim().unwrap().settle(FetchState::Ready(2));
        let slot = entry.snapshot();
        assert!(!slot.is_stale);
        assert_eq!(slot.settled_generation, generation);
    }

    #[test]
    fn dropped_claim_releases_the_slot() {
        let cache = QueryCache::<u32>::new();
        let entry = cache.entry("channels");
        entry.try_claim().unwrap().settle(FetchState::Ready(1));
        entry.mark_stale();

        drop(entry.try_claim().unwrap());
        let slot = entry.snapshot();
        assert!(!slot.is_fetching);
        assert!(slot.is_stale);
        assert_eq!(slot.state, FetchState::Ready(1));
        assert!(entry.try_claim().is_some());
    }

    #[test]
    fn remove_and_clear() {
        let cache = QueryCache::<u32>::new();
        cache.entry("a");
        cache.entry("b");
        assert!(cache.remove("a"));
        assert!(!cache.remove("a"));
        cache.clear();
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn wait_settled_sees_result_from_other_task() {
        let cache = QueryCache::<&'static str>::new();
        let entry = cache.entry("channels");
        let claim = entry.try_claim().unwrap();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            claim.settle(FetchState::Failed("boom".to_owned()));
        });

        assert_eq!(entry.wait_settled().await.state, FetchState::Failed("boom".to_owned()));
    }
}
