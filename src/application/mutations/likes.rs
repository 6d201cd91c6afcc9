use std::collections::{BTreeMap, BTreeSet};

use tracing::{instrument, warn};

use crate::application::records::{decode_post, likes_fields};
use crate::application::repos::{Collection, StoreError};
use crate::cache::mutex_lock;
use crate::domain::entities::toggle_member;
use crate::domain::posts::ensure_id;

use super::service::{LikeLedger, MutationCoordinator};
use super::state::{MutationKind, MutationPhase};
use super::types::{MutationError, RolledBackChange};

const SOURCE: &str = "application::mutations::likes";

impl MutationCoordinator {
    /// Replace the like set of `post_id` with `liked_user_ids`.
    ///
    /// Cached copies change immediately. Writes for the same post are
    /// serialized and each sends the newest locally requested set. On failure
    /// the cache returns to the last set the store confirmed, unless a newer
    /// like mutation has been requested since.
    #[instrument(skip(self, liked_user_ids), fields(likes = liked_user_ids.len()))]
    pub async fn like_post(
        &self,
        post_id: &str,
        liked_user_ids: BTreeSet<String>,
    ) -> Result<BTreeSet<String>, MutationError> {
        ensure_id(post_id, "post_id")?;
        let mut tracker = self.begin(MutationKind::Like, post_id);

        let seq = self.apply_optimistic_likes(post_id, &liked_user_ids);
        tracker.advance(MutationPhase::Optimistic)?;

        let guard = self.like_locks.acquire(post_id).await;
        let dispatched = self.latest_likes(post_id).unwrap_or(liked_user_ids);
        tracker.advance(MutationPhase::Committing)?;
        let result = self
            .store
            .update_document(Collection::Posts, post_id, likes_fields(&dispatched))
            .await;
        drop(guard);
        self.like_locks.prune();

        match result {
            Ok(document) => {
                let confirmed = decode_post(&document)
                    .map(|post| post.liked_user_ids)
                    .unwrap_or(dispatched);
                self.confirm_likes(post_id, seq, &confirmed);
                tracker.advance(MutationPhase::Committed)?;
                Ok(confirmed)
            }
            Err(err) => {
                let reverted = self.revert_likes(post_id, seq);
                tracker.advance(MutationPhase::RolledBack)?;
                self.record_rollback(&tracker);
                warn!(post_id, reverted, error = %err, "Like update failed");
                Err(MutationError::rolled_back(
                    RolledBackChange::Likes {
                        post_id: post_id.to_string(),
                    },
                    err,
                ))
            }
        }
    }

    /// Toggle the current user's like on `post_id`, starting from the newest
    /// locally known like set.
    pub async fn toggle_like(&self, post_id: &str) -> Result<BTreeSet<String>, MutationError> {
        ensure_id(post_id, "post_id")?;
        let user = self.acting_user()?;
        let base = match self.latest_likes(post_id) {
            Some(likes) => likes,
            None => match self.cache.find_post(post_id) {
                Some(post) => post.post.liked_user_ids,
                None => self.stored_likes(post_id).await?,
            },
        };
        self.like_post(post_id, toggle_member(&base, &user.id)).await
    }

    fn apply_optimistic_likes(&self, post_id: &str, liked_user_ids: &BTreeSet<String>) -> u64 {
        let cached = self.cache.find_post(post_id);
        let mut ledgers = mutex_lock(&self.likes, SOURCE, "apply_optimistic_likes");
        let ledger = ledgers
            .entry(post_id.to_string())
            .or_insert_with(|| LikeLedger {
                confirmed: cached.as_ref().map(|post| post.post.liked_user_ids.clone()),
                latest: BTreeSet::new(),
                seq: 0,
                pending: 0,
                known_users: BTreeMap::new(),
            });
        for user in cached.iter().flat_map(|post| &post.liked_users) {
            ledger
                .known_users
                .entry(user.id.clone())
                .or_insert_with(|| user.clone());
        }
        ledger.seq += 1;
        ledger.pending += 1;
        ledger.latest = liked_user_ids.clone();
        self.cache
            .patch_posts(post_id, |post| post.set_liked_user_ids(liked_user_ids.clone()));
        ledger.seq
    }

    fn latest_likes(&self, post_id: &str) -> Option<BTreeSet<String>> {
        mutex_lock(&self.likes, SOURCE, "latest_likes")
            .get(post_id)
            .map(|ledger| ledger.latest.clone())
    }

    fn confirm_likes(&self, post_id: &str, seq: u64, confirmed: &BTreeSet<String>) {
        let mut ledgers = mutex_lock(&self.likes, SOURCE, "confirm_likes");
        let Some(ledger) = ledgers.get_mut(post_id) else {
            return;
        };
        ledger.confirmed = Some(confirmed.clone());
        ledger.pending = ledger.pending.saturating_sub(1);
        if ledger.seq == seq {
            ledger.latest = confirmed.clone();
            let known = &ledger.known_users;
            self.cache.patch_posts(post_id, |post| {
                post.resolve_liked_user_ids(confirmed.clone(), known)
            });
        }
        if ledger.pending == 0 {
            ledgers.remove(post_id);
        }
    }

    /// Undo the optimistic like set of mutation `seq` if it is still the
    /// newest one. Returns whether cached copies were reverted.
    fn revert_likes(&self, post_id: &str, seq: u64) -> bool {
        let mut ledgers = mutex_lock(&self.likes, SOURCE, "revert_likes");
        let Some(ledger) = ledgers.get_mut(post_id) else {
            return false;
        };
        ledger.pending = ledger.pending.saturating_sub(1);
        let mut reverted = false;
        if ledger.seq == seq {
            match ledger.confirmed.clone() {
                Some(confirmed) => {
                    let known = &ledger.known_users;
                    self.cache.patch_posts(post_id, |post| {
                        post.resolve_liked_user_ids(confirmed.clone(), known)
                    });
                    ledger.latest = confirmed;
                    reverted = true;
                }
                None => {
                    self.cache.invalidate_where(|_, data| {
                        data.is_some_and(|data| data.references_post(post_id))
                    });
                }
            }
        }
        if ledger.pending == 0 {
            ledgers.remove(post_id);
        }
        reverted
    }

    async fn stored_likes(&self, post_id: &str) -> Result<BTreeSet<String>, MutationError> {
        let document = self
            .store
            .get_document(Collection::Posts, post_id)
            .await
            .map_err(|err| match err {
                StoreError::NotFound { collection, id } => {
                    MutationError::NotFound { collection, id }
                }
                err => MutationError::Store(err),
            })?;
        Ok(decode_post(&document)?.liked_user_ids)
    }
}
