//! Tagged read-through cache used by `CardService`.
//!
//! Every entry carries the board, stage and card ids its value was built
//! from. A mutation evicts all entries sharing a tag with it. Loads run
//! without the lock held; a load that overlapped an invalidation is
//! returned to its caller but not stored.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use tracing::{debug, warn};

use super::models::{BoardView, Card};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Tag {
    Board(String),
    Stage(String),
    Card(String),
}

/// Identifies a cached read by operation and argument.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    CardsByStage(String),
    Card(String),
    CardsByParent(String),
    ArchivedOrDone(String),
    BoardView(String),
}

#[derive(Debug, Clone)]
pub enum Cached {
    Cards(Vec<Card>),
    Card(Option<Card>),
    Flag(bool),
    Board(Box<BoardView>),
}

/// Conversion between a read's result type and its stored form.
pub trait CacheValue: Clone + Sized {
    fn into_cached(self) -> Cached;
    fn from_cached(cached: Cached) -> Option<Self>;
}

impl CacheValue for Vec<Card> {
    fn into_cached(self) -> Cached {
        Cached::Cards(self)
    }

    fn from_cached(cached: Cached) -> Option<Self> {
        match cached {
            Cached::Cards(cards) => Some(cards),
            _ => None,
        }
    }
}

impl CacheValue for Option<Card> {
    fn into_cached(self) -> Cached {
        Cached::Card(self)
    }

    fn from_cached(cached: Cached) -> Option<Self> {
        match cached {
            Cached::Card(card) => Some(card),
            _ => None,
        }
    }
}

impl CacheValue for bool {
    fn into_cached(self) -> Cached {
        Cached::Flag(self)
    }

    fn from_cached(cached: Cached) -> Option<Self> {
        match cached {
            Cached::Flag(flag) => Some(flag),
            _ => None,
        }
    }
}

impl CacheValue for BoardView {
    fn into_cached(self) -> Cached {
        Cached::Board(Box::new(self))
    }

    fn from_cached(cached: Cached) -> Option<Self> {
        match cached {
            Cached::Board(view) => Some(*view),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

struct Entry {
    value: Cached,
    tags: HashSet<Tag>,
}

#[derive(Default)]
struct State {
    entries: HashMap<CacheKey, Entry>,
    index: HashMap<Tag, HashSet<CacheKey>>,
    /// Bumped by every invalidation and flush.
    generation: u64,
}

impl State {
    fn remove(&mut self, key: &CacheKey) {
        if let Some(entry) = self.entries.remove(key) {
            for tag in entry.tags {
                if let Some(keys) = self.index.get_mut(&tag) {
                    keys.remove(key);
                    if keys.is_empty() {
                        self.index.remove(&tag);
                    }
                }
            }
        }
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.index.clear();
        self.generation += 1;
    }
}

pub struct TaggedCache {
    state: Mutex<State>,
    enabled: bool,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl TaggedCache {
    pub fn new(enabled: bool) -> Self {
        Self {
            state: Mutex::new(State::default()),
            enabled,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Returns the cached value for `key`, or runs `load` and stores its
    /// value under the tags it reports.
    pub async fn get_or_load<T, E, F, Fut>(&self, key: CacheKey, load: F) -> Result<T, E>
    where
        T: CacheValue,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(T, HashSet<Tag>), E>>,
    {
        if !self.enabled {
            return load().await.map(|(value, _)| value);
        }

        let generation = {
            let mut state = self.lock();
            let cached = state.entries.get(&key).map(|e| e.value.clone());
            match cached.map(T::from_cached) {
                Some(Some(value)) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    debug!(?key, "cache hit");
                    return Ok(value);
                }
                Some(None) => {
                    warn!(?key, "cache entry has the wrong shape; evicting");
                    state.remove(&key);
                }
                None => {}
            }
            state.generation
        };
        self.misses.fetch_add(1, Ordering::Relaxed);
        debug!(?key, "cache miss");

        let (value, tags) = load().await?;
        self.store(key, value.clone().into_cached(), tags, generation);
        Ok(value)
    }

    fn store(&self, key: CacheKey, value: Cached, tags: HashSet<Tag>, seen: u64) {
        let mut state = self.lock();
        if state.generation != seen {
            debug!(?key, "skipping store of a load that raced an invalidation");
            return;
        }
        state.remove(&key);
        for tag in &tags {
            state
                .index
                .entry(tag.clone())
                .or_default()
                .insert(key.clone());
        }
        state.entries.insert(key, Entry { value, tags });
    }

    /// Evicts every entry tagged with any of `tags`.
    pub fn invalidate<I>(&self, tags: I)
    where
        I: IntoIterator<Item = Tag>,
    {
        if !self.enabled {
            return;
        }
        let mut state = self.lock();
        state.generation += 1;
        let mut evicted = 0usize;
        for tag in tags {
            let Some(keys) = state.index.remove(&tag) else {
                continue;
            };
            for key in keys {
                if state.entries.contains_key(&key) {
                    state.remove(&key);
                    evicted += 1;
                }
            }
        }
        debug!(evicted, "invalidated cache entries");
    }

    pub fn flush(&self) {
        self.lock().clear();
        debug!("flushed cache");
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.lock().entries.len(),
        }
    }

    /// A panic while the lock was held may have left the index half
    /// updated, so a poisoned cache starts over empty.
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| {
            warn!("cache lock poisoned; flushing");
            let mut state = poisoned.into_inner();
            state.clear();
            self.state.clear_poison();
            state
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;

    fn tags(list: &[Tag]) -> HashSet<Tag> {
        list.iter().cloned().collect()
    }

    async fn load_flag(
        cache: &TaggedCache,
        key: CacheKey,
        value: bool,
        tag_list: &[Tag],
    ) -> bool {
        let tag_set = tags(tag_list);
        cache
            .get_or_load(key, || async move { Ok::<_, Infallible>((value, tag_set)) })
            .await
            .unwrap()
    }

    fn stage(id: &str) -> Tag {
        Tag::Stage(id.to_string())
    }

    fn flag_key(id: &str) -> CacheKey {
        CacheKey::ArchivedOrDone(id.to_string())
    }

    #[tokio::test]
    async fn test_second_read_is_a_hit() {
        let cache = TaggedCache::new(true);
        assert!(load_flag(&cache, flag_key("c1"), true, &[stage("s1")]).await);
        // The loader's value is ignored on a hit.
        assert!(load_flag(&cache, flag_key("c1"), false, &[stage("s1")]).await);
        assert_eq!(
            cache.stats(),
            CacheStats {
                hits: 1,
                misses: 1,
                entries: 1
            }
        );
    }

    #[tokio::test]
    async fn test_invalidate_only_evicts_intersecting_tags() {
        let cache = TaggedCache::new(true);
        load_flag(&cache, flag_key("c1"), true, &[stage("s1")]).await;
        load_flag(&cache, flag_key("c2"), true, &[stage("s2")]).await;

        cache.invalidate([stage("s1")]);

        assert!(!load_flag(&cache, flag_key("c1"), false, &[stage("s1")]).await);
        assert!(load_flag(&cache, flag_key("c2"), false, &[stage("s2")]).await);
    }

    #[tokio::test]
    async fn test_entry_with_several_tags_is_evicted_by_any() {
        let cache = TaggedCache::new(true);
        let card = Tag::Card("c1".into());
        load_flag(&cache, flag_key("c1"), true, &[stage("s1"), card.clone()]).await;
        cache.invalidate([card]);
        assert_eq!(cache.stats().entries, 0);
    }

    #[tokio::test]
    async fn test_load_racing_an_invalidation_is_not_stored() {
        let cache = TaggedCache::new(true);
        let value = cache
            .get_or_load(flag_key("c1"), || async {
                cache.invalidate([stage("unrelated")]);
                Ok::<_, Infallible>((true, tags(&[stage("s1")])))
            })
            .await
            .unwrap();
        assert!(value);
        assert_eq!(cache.stats().entries, 0);
    }

    #[tokio::test]
    async fn test_errors_are_not_cached() {
        let cache = TaggedCache::new(true);
        let result: Result<bool, &str> = cache
            .get_or_load(flag_key("c1"), || async { Err("storage down") })
            .await;
        assert!(result.is_err());
        assert_eq!(cache.stats().entries, 0);
    }

    #[tokio::test]
    async fn test_disabled_cache_always_loads() {
        let cache = TaggedCache::new(false);
        assert!(load_flag(&cache, flag_key("c1"), true, &[]).await);
        assert!(!load_flag(&cache, flag_key("c1"), false, &[]).await);
        assert_eq!(cache.stats(), CacheStats::default());
    }

    #[tokio::test]
    async fn test_poisoned_lock_flushes() {
        let cache = TaggedCache::new(true);
        load_flag(&cache, flag_key("c1"), true, &[stage("s1")]).await;

        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = cache.state.lock().unwrap();
            panic!("poison the cache lock");
        }));
        assert!(cache.state.is_poisoned());

        assert_eq!(cache.stats().entries, 0);
        assert!(!cache.state.is_poisoned());
        assert!(!load_flag(&cache, flag_key("c1"), false, &[stage("s1")]).await);
    }

    #[tokio::test]
    async fn test_flush_drops_everything() {
        let cache = TaggedCache::new(true);
        load_flag(&cache, flag_key("c1"), true, &[stage("s1")]).await;
        load_flag(&cache, flag_key("c2"), true, &[stage("s2")]).await;
        cache.flush();
        assert_eq!(cache.stats().entries, 0);
    }
}
