use tracing::{info, instrument, warn};

use crate::application::records::{
    PostContent, PostDraft, content_fields, decode_post, post_fields,
};
use crate::application::repos::{Collection, DocumentId, StoreError};
use crate::domain::entities::PostRecord;
use crate::domain::posts::ensure_id;
use crate::domain::uploads::UploadedMedia;

use super::service::MutationCoordinator;
use super::state::{MutationKind, MutationPhase};
use super::types::{MutationError, NewPost, PostUpdate, RolledBackChange};

impl MutationCoordinator {
    /// Upload the media of `new_post`, then write the post record.
    ///
    /// A failed record write removes the upload again so no orphaned file is
    /// left behind.
    #[instrument(skip(self, new_post), fields(creator_id = %new_post.creator_id))]
    pub async fn create_post(&self, new_post: NewPost) -> Result<PostRecord, MutationError> {
        new_post.validate()?;
        let mut tracker = self.begin(MutationKind::CreatePost, &new_post.creator_id);
        tracker.advance(MutationPhase::Committing)?;

        let draft_tags = new_post.parsed_tags();
        let location = new_post.location();
        let uploaded = match self.media.upload(new_post.file).await {
            Ok(uploaded) => uploaded,
            Err(err) => {
                tracker.advance(MutationPhase::RolledBack)?;
                warn!(error = %err, "Media upload failed");
                return Err(MutationError::Store(err));
            }
        };

        let draft = PostDraft {
            creator_id: new_post.creator_id.clone(),
            caption: new_post.caption.trim().to_string(),
            location,
            image_id: uploaded.id.clone(),
            image_url: uploaded.url.clone(),
            tags: draft_tags,
        };
        let result = self
            .store
            .create_document(Collection::Posts, DocumentId::Generate, post_fields(&draft))
            .await;

        match result {
            Ok(document) => {
                let post = decode_post(&document)?;
                self.invalidate_post_queries(&post.id, Some(&post.creator_id));
                tracker.advance(MutationPhase::Committed)?;
                info!(post_id = %post.id, image_id = %uploaded.id, "Created post");
                Ok(post)
            }
            Err(err) => {
                let cleanup = self.remove_media(&uploaded, "create_post").await;
                tracker.advance(MutationPhase::RolledBack)?;
                self.record_rollback(&tracker);
                warn!(
                    error = %err,
                    cleaned_up = cleanup.is_none(),
                    "Post record write failed"
                );
                Err(MutationError::Compensated {
                    source: err,
                    cleanup,
                })
            }
        }
    }

    /// Edit caption, location and tags, optionally replacing the image.
    ///
    /// Text fields change in the cache immediately. A replacement image is
    /// uploaded first; the previous image is deleted only after the record
    /// write succeeds, and the replacement is deleted if it fails.
    #[instrument(skip(self, update), fields(post_id = %update.post_id))]
    pub async fn update_post(&self, update: PostUpdate) -> Result<PostRecord, MutationError> {
        update.validate()?;
        let post_id = update.post_id.clone();
        let mut tracker = self.begin(MutationKind::UpdatePost, &post_id);

        let tags = update.parsed_tags();
        let location = update.location();
        let caption = update.caption.trim().to_string();
        let snapshot = self.cache.snapshot_where(|_, data| {
            data.is_some_and(|data| data.references_post(&post_id))
        });
        self.cache.patch_posts(&post_id, |post| {
            post.post.caption = caption.clone();
            post.post.location = location.clone();
            post.post.tags = tags.clone();
        });
        tracker.advance(MutationPhase::Optimistic)?;

        tracker.advance(MutationPhase::Committing)?;
        let replacement = match update.file {
            Some(file) => match self.media.upload(file).await {
                Ok(uploaded) => Some(uploaded),
                Err(err) => {
                    self.cache.restore(snapshot);
                    tracker.advance(MutationPhase::RolledBack)?;
                    self.record_rollback(&tracker);
                    warn!(post_id = %post_id, error = %err, "Replacement upload failed");
                    return Err(MutationError::rolled_back(
                        RolledBackChange::UpdatePost { post_id },
                        err,
                    ));
                }
            },
            None => None,
        };

        let content = PostContent {
            caption,
            location,
            image_id: replacement
                .as_ref()
                .map_or_else(|| update.image_id.clone(), |media| media.id.clone()),
            image_url: replacement
                .as_ref()
                .map_or_else(|| update.image_url.clone(), |media| media.url.clone()),
            tags,
        };
        let result = self
            .store
            .update_document(Collection::Posts, &post_id, content_fields(&content))
            .await;

        match result {
            Ok(document) => {
                if replacement.is_some() {
                    let previous = UploadedMedia {
                        id: update.image_id.clone(),
                        url: update.image_url.clone(),
                    };
                    if let Some(err) = self.remove_media(&previous, "update_post").await {
                        warn!(post_id = %post_id, error = %err, "Previous image left behind");
                    }
                }
                let post = decode_post(&document)?;
                self.invalidate_post_queries(&post.id, Some(&post.creator_id));
                tracker.advance(MutationPhase::Committed)?;
                info!(post_id = %post.id, replaced_image = replacement.is_some(), "Updated post");
                Ok(post)
            }
            Err(err) => {
                self.cache.restore(snapshot);
                if let Some(uploaded) = &replacement
                    && let Some(cleanup) = self.remove_media(uploaded, "update_post").await
                {
                    warn!(post_id = %post_id, error = %cleanup, "Replacement image left behind");
                }
                tracker.advance(MutationPhase::RolledBack)?;
                self.record_rollback(&tracker);
                warn!(post_id = %post_id, error = %err, "Post update failed");
                Err(MutationError::rolled_back(
                    RolledBackChange::UpdatePost { post_id },
                    err,
                ))
            }
        }
    }

    /// Delete the post record, then its image.
    ///
    /// The post disappears from cached lists immediately and comes back if
    /// the record delete fails.
    #[instrument(skip(self))]
    pub async fn delete_post(&self, post_id: &str, image_id: &str) -> Result<(), MutationError> {
        ensure_id(post_id, "post_id")?;
        ensure_id(image_id, "image_id")?;
        let mut tracker = self.begin(MutationKind::DeletePost, post_id);

        let creator_id = self
            .cache
            .find_post(post_id)
            .map(|post| post.post.creator_id);
        let snapshot = self.cache.snapshot_where(|_, data| {
            data.is_some_and(|data| data.references_post(post_id))
        });
        self.cache.remove_post(post_id);
        tracker.advance(MutationPhase::Optimistic)?;

        tracker.advance(MutationPhase::Committing)?;
        if let Err(err) = self.store.delete_document(Collection::Posts, post_id).await {
            self.cache.restore(snapshot);
            tracker.advance(MutationPhase::RolledBack)?;
            self.record_rollback(&tracker);
            warn!(post_id, error = %err, "Post delete failed");
            return Err(MutationError::rolled_back(
                RolledBackChange::DeletePost {
                    post_id: post_id.to_string(),
                },
                err,
            ));
        }

        let image = UploadedMedia {
            id: image_id.to_string(),
            url: String::new(),
        };
        if let Some(err) = self.remove_media(&image, "delete_post").await {
            warn!(post_id, image_id, error = %err, "Image of deleted post left behind");
        }
        self.invalidate_post_queries(post_id, creator_id.as_deref());
        tracker.advance(MutationPhase::Committed)?;
        info!(post_id, "Deleted post");
        Ok(())
    }

    /// Remove an uploaded file, returning the error if removal failed.
    async fn remove_media(&self, media: &UploadedMedia, op: &'static str) -> Option<StoreError> {
        match self.media.remove(&media.id).await {
            Ok(()) => None,
            Err(err) => {
                warn!(op, media_id = %media.id, error = %err, "Media removal failed");
                Some(err)
            }
        }
    }
}
