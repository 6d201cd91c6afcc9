//! Query cache storage.
//!
//! Maps canonical query descriptors to cache entries, de-duplicates concurrent
//! fetches and serves stale data while revalidating in the background.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use lru::LruCache;
use metrics::{counter, histogram};
use serde::Serialize;
use time::OffsetDateTime;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use crate::application::feed::{FeedError, FeedPage, PostList};
use crate::domain::entities::{EnrichedPost, SavedRef};

use super::config::CacheConfig;
use super::keys::QueryDescriptor;
use super::lock::mutex_lock;

const SOURCE: &str = "cache::store";

const METRIC_HIT: &str = "feedline_cache_hit_total";
const METRIC_MISS: &str = "feedline_cache_miss_total";
const METRIC_DEDUP: &str = "feedline_cache_dedup_total";
const METRIC_DISCARD: &str = "feedline_cache_discard_total";
const METRIC_EVICT: &str = "feedline_cache_evict_total";
const METRIC_FETCH_MS: &str = "feedline_cache_fetch_ms";

/// Performs the underlying read for a descriptor.
#[async_trait]
pub trait QueryFetcher: Send + Sync {
    async fn fetch(&self, descriptor: &QueryDescriptor) -> Result<QueryData, FeedError>;
}

/// Cached payload of a query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum QueryData {
    Feed(FeedPage),
    Posts(PostList),
    Saved(Vec<SavedRef>),
    Post(EnrichedPost),
}

impl QueryData {
    /// Posts carried by this payload, in cached order.
    pub fn posts(&self) -> &[EnrichedPost] {
        match self {
            QueryData::Feed(page) => &page.posts,
            QueryData::Posts(list) => &list.posts,
            QueryData::Post(post) => std::slice::from_ref(post),
            QueryData::Saved(_) => &[],
        }
    }

    fn posts_mut(&mut self) -> &mut [EnrichedPost] {
        match self {
            QueryData::Feed(page) => &mut page.posts,
            QueryData::Posts(list) => &mut list.posts,
            QueryData::Post(post) => std::slice::from_mut(post),
            QueryData::Saved(_) => &mut [],
        }
    }

    pub fn saved(&self) -> Option<&[SavedRef]> {
        match self {
            QueryData::Saved(refs) => Some(refs),
            _ => None,
        }
    }

    pub fn references_post(&self, post_id: &str) -> bool {
        match self {
            QueryData::Saved(refs) => refs.iter().any(|saved| saved.post_id == post_id),
            _ => self.posts().iter().any(|post| post.id() == post_id),
        }
    }

    /// Drop `post_id` from list payloads. Single-post payloads are untouched.
    fn remove_post(&mut self, post_id: &str) -> bool {
        match self {
            QueryData::Feed(page) => {
                let before = page.posts.len();
                page.posts.retain(|post| post.id() != post_id);
                page.warnings.retain(|warning| warning.post_id != post_id);
                let removed = before - page.posts.len();
                page.total = page.total.saturating_sub(removed as u64);
                removed > 0
            }
            QueryData::Posts(list) => list.remove(post_id),
            QueryData::Post(_) | QueryData::Saved(_) => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EntryStatus {
    Fresh,
    Stale,
    Pending,
    Error,
}

/// Externally visible state of one cached query.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub descriptor: QueryDescriptor,
    pub data: Option<QueryData>,
    pub status: EntryStatus,
    pub pending_request_id: Option<u64>,
    pub last_updated: Option<OffsetDateTime>,
    pub error: Option<String>,
}

impl CacheEntry {
    fn empty(descriptor: QueryDescriptor) -> Self {
        Self {
            descriptor,
            data: None,
            status: EntryStatus::Stale,
            pending_request_id: None,
            last_updated: None,
            error: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending_request_id.is_some()
    }
}

type SharedFetch = Shared<BoxFuture<'static, Result<QueryData, FeedError>>>;

struct InFlight {
    request_id: u64,
    future: SharedFetch,
}

struct Slot {
    entry: CacheEntry,
    /// Bumped by every local write; a fetch started under an older
    /// generation is not allowed to overwrite the entry.
    generation: u64,
    fetched_at: Option<Instant>,
    inflight: Option<InFlight>,
}

impl Slot {
    fn new(descriptor: QueryDescriptor) -> Self {
        Self {
            entry: CacheEntry::empty(descriptor),
            generation: 0,
            fetched_at: None,
            inflight: None,
        }
    }

    fn is_fresh(&self, config: &CacheConfig) -> bool {
        self.entry.status == EntryStatus::Fresh
            && self
                .fetched_at
                .is_some_and(|at| at.elapsed() < config.fresh_for())
    }

    fn mark_written(&mut self) {
        self.generation += 1;
        self.entry.last_updated = Some(OffsetDateTime::now_utc());
    }

    fn mark_stale(&mut self) {
        self.generation += 1;
        self.inflight = None;
        self.fetched_at = None;
        self.entry.pending_request_id = None;
        self.entry.status = EntryStatus::Stale;
    }
}

/// Data captured by [`QueryCache::snapshot_where`] for rollback.
#[derive(Debug, Clone, Default)]
pub struct CacheSnapshot {
    entries: Vec<(QueryDescriptor, Option<QueryData>)>,
}

impl CacheSnapshot {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

struct Inner {
    entries: Mutex<LruCache<QueryDescriptor, Slot>>,
    fetcher: Arc<dyn QueryFetcher>,
    config: CacheConfig,
    next_request_id: AtomicU64,
}

/// Client-side query cache.
///
/// Cloning yields another handle to the same cache. The entry map is guarded by
/// a synchronous mutex that is never held across an await point; fetches run in
/// spawned tasks whose results are shared by every attached caller.
#[derive(Clone)]
pub struct QueryCache {
    inner: Arc<Inner>,
}

impl QueryCache {
    pub fn new(config: CacheConfig, fetcher: Arc<dyn QueryFetcher>) -> Self {
        Self {
            inner: Arc::new(Inner {
                entries: Mutex::new(LruCache::new(config.max_entries_non_zero())),
                fetcher,
                config,
                next_request_id: AtomicU64::new(0),
            }),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    fn lock(&self, op: &'static str) -> MutexGuard<'_, LruCache<QueryDescriptor, Slot>> {
        mutex_lock(&self.inner.entries, SOURCE, op)
    }

    /// Read a query through the cache.
    ///
    /// Fresh entries are returned as-is. Entries holding data that is no longer
    /// fresh are returned immediately while a background refresh runs. Entries
    /// without data wait for the (shared) fetch.
    #[instrument(skip(self), fields(descriptor = %descriptor))]
    pub async fn get(&self, descriptor: &QueryDescriptor) -> Result<CacheEntry, FeedError> {
        let kind = descriptor.kind().as_str();
        let pending = {
            let mut entries = self.lock("get");
            if let Some(slot) = entries.get_mut(descriptor)
                && slot.entry.data.is_some()
            {
                if slot.is_fresh(&self.inner.config) {
                    counter!(METRIC_HIT, "kind" => kind, "state" => "fresh").increment(1);
                    return Ok(slot.entry.clone());
                }
                if slot.inflight.is_none() {
                    let _ = self.start_fetch(descriptor, slot);
                }
                counter!(METRIC_HIT, "kind" => kind, "state" => "stale").increment(1);
                debug!(status = ?slot.entry.status, "Serving cached data while revalidating");
                return Ok(slot.entry.clone());
            }

            let slot = slot_mut(&mut entries, descriptor);
            match &slot.inflight {
                Some(inflight) => {
                    counter!(METRIC_DEDUP, "kind" => kind).increment(1);
                    debug!(
                        request_id = inflight.request_id,
                        "Attached to in-flight fetch"
                    );
                    inflight.future.clone()
                }
                None => {
                    counter!(METRIC_MISS, "kind" => kind).increment(1);
                    self.start_fetch(descriptor, slot)
                }
            }
        };

        let result = pending.await;
        self.settled(descriptor, result)
    }

    /// Wait for a new value, attaching to a fetch that is already running.
    #[instrument(skip(self), fields(descriptor = %descriptor))]
    pub async fn refresh(&self, descriptor: &QueryDescriptor) -> Result<CacheEntry, FeedError> {
        let pending = {
            let mut entries = self.lock("refresh");
            let slot = slot_mut(&mut entries, descriptor);
            match &slot.inflight {
                Some(inflight) => inflight.future.clone(),
                None => self.start_fetch(descriptor, slot),
            }
        };

        let result = pending.await;
        self.settled(descriptor, result)
    }

    /// Current entry without promoting it or triggering a fetch.
    pub fn peek(&self, descriptor: &QueryDescriptor) -> Option<CacheEntry> {
        self.lock("peek")
            .peek(descriptor)
            .map(|slot| slot.entry.clone())
    }

    /// Mark an entry stale. A fetch already running for it is detached and its
    /// result discarded.
    pub fn invalidate(&self, descriptor: &QueryDescriptor) -> bool {
        match self.lock("invalidate").peek_mut(descriptor) {
            Some(slot) => {
                slot.mark_stale();
                debug!(descriptor = %descriptor, "Invalidated query");
                true
            }
            None => false,
        }
    }

    /// Mark stale every entry for which `predicate` holds. Returns the count.
    pub fn invalidate_where<F>(&self, predicate: F) -> usize
    where
        F: Fn(&QueryDescriptor, Option<&QueryData>) -> bool,
    {
        let mut entries = self.lock("invalidate_where");
        let mut invalidated = 0;
        for (descriptor, slot) in entries.iter_mut() {
            if predicate(descriptor, slot.entry.data.as_ref()) {
                slot.mark_stale();
                invalidated += 1;
            }
        }
        debug!(invalidated, "Invalidated matching queries");
        invalidated
    }

    /// Store `data` directly, as if it had just been fetched.
    pub fn set(&self, descriptor: &QueryDescriptor, data: QueryData) {
        let mut entries = self.lock("set");
        let slot = slot_mut(&mut entries, descriptor);
        slot.mark_written();
        slot.fetched_at = Some(Instant::now());
        slot.entry.data = Some(data);
        slot.entry.error = None;
        slot.entry.status = if slot.inflight.is_some() {
            EntryStatus::Pending
        } else {
            EntryStatus::Fresh
        };
    }

    pub fn evict(&self, descriptor: &QueryDescriptor) -> bool {
        self.lock("evict").pop(descriptor).is_some()
    }

    pub fn clear(&self) {
        self.lock("clear").clear();
    }

    pub fn len(&self) -> usize {
        self.lock("len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Apply `edit` to every cached copy of `post_id`. Returns the number of
    /// entries touched.
    pub fn patch_posts<F>(&self, post_id: &str, mut edit: F) -> usize
    where
        F: FnMut(&mut EnrichedPost),
    {
        let mut entries = self.lock("patch_posts");
        let mut patched = 0;
        for (_, slot) in entries.iter_mut() {
            let Some(data) = slot.entry.data.as_mut() else {
                continue;
            };
            let mut touched = false;
            for post in data.posts_mut() {
                if post.id() == post_id {
                    edit(post);
                    touched = true;
                }
            }
            if touched {
                slot.mark_written();
                patched += 1;
            }
        }
        patched
    }

    /// First cached copy of `post_id`, if any.
    pub fn find_post(&self, post_id: &str) -> Option<EnrichedPost> {
        self.lock("find_post").iter().find_map(|(_, slot)| {
            slot.entry
                .data
                .as_ref()?
                .posts()
                .iter()
                .find(|post| post.id() == post_id)
                .cloned()
        })
    }

    /// Remove `post_id` from cached lists and clear its detail entry.
    ///
    /// The detail entry stays in place without data, so a snapshot taken
    /// beforehand can still restore it.
    pub fn remove_post(&self, post_id: &str) -> usize {
        let mut entries = self.lock("remove_post");
        let mut removed = 0;
        for (_, slot) in entries.iter_mut() {
            if let Some(data) = slot.entry.data.as_mut()
                && data.remove_post(post_id)
            {
                slot.mark_written();
                removed += 1;
            }
        }
        if let Some(slot) = entries.peek_mut(&QueryDescriptor::post(post_id))
            && slot.entry.data.take().is_some()
        {
            slot.mark_stale();
            removed += 1;
        }
        removed
    }

    /// Edit the cached saved index of `user_id`, if one is loaded.
    pub fn patch_saved<F>(&self, user_id: &str, edit: F) -> bool
    where
        F: FnOnce(&mut Vec<SavedRef>),
    {
        let mut entries = self.lock("patch_saved");
        match entries.peek_mut(&QueryDescriptor::saved(user_id)) {
            Some(slot) => match slot.entry.data.as_mut() {
                Some(QueryData::Saved(refs)) => {
                    edit(refs);
                    slot.mark_written();
                    true
                }
                _ => false,
            },
            None => false,
        }
    }

    pub fn snapshot_where<F>(&self, predicate: F) -> CacheSnapshot
    where
        F: Fn(&QueryDescriptor, Option<&QueryData>) -> bool,
    {
        let entries = self.lock("snapshot_where");
        CacheSnapshot {
            entries: entries
                .iter()
                .filter(|(descriptor, slot)| predicate(descriptor, slot.entry.data.as_ref()))
                .map(|(descriptor, slot)| (descriptor.clone(), slot.entry.data.clone()))
                .collect(),
        }
    }

    /// Put snapshotted data back. Entries evicted since the snapshot stay gone.
    pub fn restore(&self, snapshot: CacheSnapshot) -> usize {
        let mut entries = self.lock("restore");
        let mut restored = 0;
        for (descriptor, data) in snapshot.entries {
            if let Some(slot) = entries.peek_mut(&descriptor) {
                slot.entry.data = data;
                slot.mark_written();
                restored += 1;
            } else {
                debug!(descriptor = %descriptor, "Snapshot entry evicted before restore");
            }
        }
        restored
    }

    fn start_fetch(&self, descriptor: &QueryDescriptor, slot: &mut Slot) -> SharedFetch {
        let request_id = self.inner.next_request_id.fetch_add(1, Ordering::Relaxed) + 1;
        let generation = slot.generation;
        let weak = Arc::downgrade(&self.inner);
        let fetcher = Arc::clone(&self.inner.fetcher);
        let target = descriptor.clone();

        let handle = tokio::spawn(async move {
            let started = Instant::now();
            let result = match AssertUnwindSafe(fetcher.fetch(&target))
                .catch_unwind()
                .await
            {
                Ok(result) => result,
                Err(_) => Err(FeedError::Interrupted("query fetch panicked".to_string())),
            };
            histogram!(METRIC_FETCH_MS, "kind" => target.kind().as_str())
                .record(started.elapsed().as_secs_f64() * 1000.0);
            if let Some(inner) = weak.upgrade() {
                QueryCache { inner }.complete(&target, request_id, generation, &result);
            }
            result
        });

        let future = async move {
            handle
                .await
                .unwrap_or_else(|err| Err(FeedError::Interrupted(err.to_string())))
        }
        .boxed()
        .shared();

        slot.inflight = Some(InFlight {
            request_id,
            future: future.clone(),
        });
        slot.entry.status = EntryStatus::Pending;
        slot.entry.pending_request_id = Some(request_id);
        debug!(descriptor = %descriptor, request_id, "Started query fetch");
        future
    }

    fn complete(
        &self,
        descriptor: &QueryDescriptor,
        request_id: u64,
        generation: u64,
        result: &Result<QueryData, FeedError>,
    ) {
        let kind = descriptor.kind().as_str();
        let mut entries = self.lock("complete");
        let Some(slot) = entries.peek_mut(descriptor) else {
            counter!(METRIC_DISCARD, "kind" => kind, "reason" => "evicted").increment(1);
            debug!(descriptor = %descriptor, request_id, "Discarded result for evicted entry");
            return;
        };
        if slot.inflight.as_ref().map(|inflight| inflight.request_id) != Some(request_id) {
            counter!(METRIC_DISCARD, "kind" => kind, "reason" => "detached").increment(1);
            debug!(descriptor = %descriptor, request_id, "Discarded result of detached fetch");
            return;
        }

        slot.inflight = None;
        slot.entry.pending_request_id = None;
        match result {
            Ok(data) if slot.generation == generation => {
                slot.entry.data = Some(data.clone());
                slot.entry.status = EntryStatus::Fresh;
                slot.entry.error = None;
                slot.entry.last_updated = Some(OffsetDateTime::now_utc());
                slot.fetched_at = Some(Instant::now());
            }
            Ok(_) => {
                counter!(METRIC_DISCARD, "kind" => kind, "reason" => "overwritten").increment(1);
                debug!(
                    descriptor = %descriptor,
                    request_id,
                    "Discarded result older than a local write"
                );
                slot.entry.status = EntryStatus::Stale;
            }
            Err(err) => {
                warn!(descriptor = %descriptor, request_id, error = %err, "Query fetch failed");
                slot.entry.status = EntryStatus::Error;
                slot.entry.error = Some(err.to_string());
            }
        }
    }

    fn settled(
        &self,
        descriptor: &QueryDescriptor,
        result: Result<QueryData, FeedError>,
    ) -> Result<CacheEntry, FeedError> {
        let data = result?;
        let mut entry = self
            .peek(descriptor)
            .unwrap_or_else(|| CacheEntry::empty(descriptor.clone()));
        if entry.data.is_none() {
            entry.data = Some(data);
        }
        Ok(entry)
    }
}

fn slot_mut<'a>(
    entries: &'a mut LruCache<QueryDescriptor, Slot>,
    descriptor: &QueryDescriptor,
) -> &'a mut Slot {
    if !entries.contains(descriptor)
        && entries.len() == entries.cap().get()
        && let Some((evicted, _)) = entries.pop_lru()
    {
        counter!(METRIC_EVICT, "kind" => evicted.kind().as_str()).increment(1);
        debug!(evicted = %evicted, "Evicted least recently used query");
    }
    entries.get_or_insert_mut(descriptor.clone(), || Slot::new(descriptor.clone()))
}
