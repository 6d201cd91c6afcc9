use tracing::{info, instrument, warn};

use crate::application::records::saved_fields;
use crate::application::repos::{Collection, DocumentId};
use crate::cache::QueryDescriptor;
use crate::domain::entities::SavedRef;
use crate::domain::posts::ensure_id;

use super::service::MutationCoordinator;
use super::state::{MutationKind, MutationPhase};
use super::types::{MutationError, RolledBackChange, SaveOutcome};

impl MutationCoordinator {
    /// Save `post_id` for `user_id` if it is not saved yet, otherwise unsave it.
    ///
    /// Toggles for the same pair run one after another, so the store never
    /// holds more than one save record per pair.
    #[instrument(skip(self))]
    pub async fn toggle_save(
        &self,
        post_id: &str,
        user_id: &str,
    ) -> Result<SaveOutcome, MutationError> {
        ensure_id(post_id, "post_id")?;
        ensure_id(user_id, "user_id")?;

        let key = format!("{user_id}:{post_id}");
        let guard = self.save_locks.acquire(&key).await;
        let outcome = self.toggle_save_locked(post_id, user_id).await;
        drop(guard);
        self.save_locks.prune();
        outcome
    }

    /// [`toggle_save`](Self::toggle_save) for the current user.
    pub async fn toggle_save_current(&self, post_id: &str) -> Result<SaveOutcome, MutationError> {
        let user = self.acting_user()?;
        self.toggle_save(post_id, &user.id).await
    }

    async fn toggle_save_locked(
        &self,
        post_id: &str,
        user_id: &str,
    ) -> Result<SaveOutcome, MutationError> {
        let existing = match self.saved.find(user_id, post_id).await? {
            Some(SavedRef {
                record_id: None, ..
            }) => self
                .saved
                .reload(user_id)
                .await?
                .into_iter()
                .find(|saved| saved.post_id == post_id),
            other => other,
        };

        match existing.and_then(|saved| saved.record_id) {
            Some(record_id) => self.unsave(post_id, user_id, &record_id).await,
            None => self.save(post_id, user_id).await,
        }
    }

    async fn save(&self, post_id: &str, user_id: &str) -> Result<SaveOutcome, MutationError> {
        let mut tracker = self.begin(MutationKind::Save, post_id);
        self.cache.patch_saved(user_id, |refs| {
            refs.push(SavedRef {
                record_id: None,
                post_id: post_id.to_string(),
            })
        });
        tracker.advance(MutationPhase::Optimistic)?;

        tracker.advance(MutationPhase::Committing)?;
        let result = self
            .store
            .create_document(
                Collection::Saves,
                DocumentId::Generate,
                saved_fields(user_id, post_id),
            )
            .await;

        match result {
            Ok(document) => {
                let record_id = document.id;
                self.cache.patch_saved(user_id, |refs| {
                    for saved in refs.iter_mut() {
                        if saved.post_id == post_id && saved.record_id.is_none() {
                            saved.record_id = Some(record_id.clone());
                        }
                    }
                });
                tracker.advance(MutationPhase::Committed)?;
                info!(post_id, user_id, record_id = %record_id, "Saved post");
                Ok(SaveOutcome::Saved {
                    record_id: Some(record_id),
                })
            }
            Err(err) if err.is_conflict() => {
                self.cache.invalidate(&QueryDescriptor::saved(user_id));
                tracker.advance(MutationPhase::Committed)?;
                info!(post_id, user_id, "Post was already saved");
                Ok(SaveOutcome::Saved { record_id: None })
            }
            Err(err) => {
                self.cache.patch_saved(user_id, |refs| {
                    refs.retain(|saved| !(saved.post_id == post_id && saved.record_id.is_none()))
                });
                tracker.advance(MutationPhase::RolledBack)?;
                self.record_rollback(&tracker);
                warn!(post_id, user_id, error = %err, "Save failed");
                Err(MutationError::rolled_back(
                    RolledBackChange::Save {
                        post_id: post_id.to_string(),
                    },
                    err,
                ))
            }
        }
    }

    async fn unsave(
        &self,
        post_id: &str,
        user_id: &str,
        record_id: &str,
    ) -> Result<SaveOutcome, MutationError> {
        let mut tracker = self.begin(MutationKind::Unsave, post_id);
        let mut removed: Option<(usize, SavedRef)> = None;
        self.cache.patch_saved(user_id, |refs| {
            if let Some(index) = refs.iter().position(|saved| saved.post_id == post_id) {
                removed = Some((index, refs.remove(index)));
            }
        });
        tracker.advance(MutationPhase::Optimistic)?;

        tracker.advance(MutationPhase::Committing)?;
        let result = self.store.delete_document(Collection::Saves, record_id).await;

        match result {
            Ok(()) => {
                tracker.advance(MutationPhase::Committed)?;
                info!(post_id, user_id, record_id, "Unsaved post");
                Ok(SaveOutcome::Unsaved)
            }
            Err(err) if err.is_not_found() => {
                tracker.advance(MutationPhase::Committed)?;
                info!(post_id, user_id, record_id, "Save record was already gone");
                Ok(SaveOutcome::Unsaved)
            }
            Err(err) => {
                if let Some((index, saved)) = removed {
                    self.cache.patch_saved(user_id, |refs| {
                        let index = index.min(refs.len());
                        refs.insert(index, saved);
                    });
                }
                tracker.advance(MutationPhase::RolledBack)?;
                self.record_rollback(&tracker);
                warn!(post_id, user_id, error = %err, "Unsave failed");
                Err(MutationError::rolled_back(
                    RolledBackChange::Unsave {
                        post_id: post_id.to_string(),
                    },
                    err,
                ))
            }
        }
    }
}
