use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use metrics::counter;
use tokio::sync::OwnedMutexGuard;
use tracing::debug;

use crate::application::repos::{CurrentUser, DocumentStore, MediaStorage};
use crate::application::saved::SavedIndex;
use crate::cache::{QueryCache, QueryDescriptor};
use crate::domain::entities::{SessionUser, UserSummary};

use super::state::{MutationKind, MutationTracker};
use super::types::MutationError;

const METRIC_ROLLBACK: &str = "feedline_mutation_rollback_total";

/// Async locks keyed by string, created on first use.
#[derive(Default)]
pub(crate) struct KeyedLocks {
    locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
}

impl KeyedLocks {
    pub(crate) async fn acquire(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = self.locks.entry(key.to_string()).or_default().clone();
        lock.lock_owned().await
    }

    /// Drop locks nobody holds or waits for.
    pub(crate) fn prune(&self) {
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
    }
}

/// Per-post bookkeeping of like mutations.
#[derive(Debug)]
pub(crate) struct LikeLedger {
    /// Last like set acknowledged by the store, when known.
    pub(crate) confirmed: Option<BTreeSet<String>>,
    /// Most recent locally requested like set.
    pub(crate) latest: BTreeSet<String>,
    /// Sequence number of the mutation that produced `latest`.
    pub(crate) seq: u64,
    pub(crate) pending: usize,
    /// Liked-user summaries seen in cached copies while mutations were open.
    pub(crate) known_users: BTreeMap<String, UserSummary>,
}

/// Applies optimistic writes to the query cache and commits them to the store.
pub struct MutationCoordinator {
    pub(crate) store: Arc<dyn DocumentStore>,
    pub(crate) media: Arc<dyn MediaStorage>,
    pub(crate) session: Arc<dyn CurrentUser>,
    pub(crate) cache: QueryCache,
    pub(crate) saved: SavedIndex,
    pub(crate) like_locks: KeyedLocks,
    pub(crate) save_locks: KeyedLocks,
    pub(crate) likes: Mutex<HashMap<String, LikeLedger>>,
    next_id: AtomicU64,
}

impl MutationCoordinator {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        media: Arc<dyn MediaStorage>,
        session: Arc<dyn CurrentUser>,
        cache: QueryCache,
    ) -> Self {
        Self {
            store,
            media,
            session,
            saved: SavedIndex::new(cache.clone()),
            cache,
            like_locks: KeyedLocks::default(),
            save_locks: KeyedLocks::default(),
            likes: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    pub(crate) fn begin(&self, kind: MutationKind, target: &str) -> MutationTracker {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        MutationTracker::new(id, kind, target)
    }

    pub(crate) fn acting_user(&self) -> Result<SessionUser, MutationError> {
        self.session
            .current_user()
            .ok_or(MutationError::Unauthenticated)
    }

    pub(crate) fn record_rollback(&self, tracker: &MutationTracker) {
        counter!(METRIC_ROLLBACK, "kind" => tracker.kind().as_str()).increment(1);
    }

    /// Mark stale every cached query whose result may change with `post_id`.
    pub(crate) fn invalidate_post_queries(&self, post_id: &str, creator_id: Option<&str>) {
        let invalidated = self.cache.invalidate_where(|descriptor, data| match descriptor {
            QueryDescriptor::Feed { .. } | QueryDescriptor::Search { .. } => true,
            QueryDescriptor::UserPosts { user_id } => {
                creator_id.is_none_or(|creator| creator == user_id)
            }
            QueryDescriptor::Post { post_id: id } => id == post_id,
            QueryDescriptor::Saved { .. } => data.is_some_and(|data| data.references_post(post_id)),
        });
        debug!(post_id, invalidated, "Invalidated queries after post change");
    }
}
