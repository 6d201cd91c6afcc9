use std::fmt;

use thiserror::Error;

use crate::application::feed::FeedError;
use crate::application::repos::StoreError;
use crate::domain::error::DomainError;
use crate::domain::posts::{
    ensure_id, normalize_location, parse_tags, validate_caption, validate_location,
};
use crate::domain::uploads::MediaFile;

use super::state::TransitionError;

/// Optimistic change that was undone after a failed write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RolledBackChange {
    Likes { post_id: String },
    Save { post_id: String },
    Unsave { post_id: String },
    UpdatePost { post_id: String },
    DeletePost { post_id: String },
}

impl fmt::Display for RolledBackChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RolledBackChange::Likes { post_id } => write!(f, "like update of post `{post_id}`"),
            RolledBackChange::Save { post_id } => write!(f, "save of post `{post_id}`"),
            RolledBackChange::Unsave { post_id } => write!(f, "unsave of post `{post_id}`"),
            RolledBackChange::UpdatePost { post_id } => write!(f, "update of post `{post_id}`"),
            RolledBackChange::DeletePost { post_id } => write!(f, "deletion of post `{post_id}`"),
        }
    }
}

#[derive(Debug, Error)]
pub enum MutationError {
    #[error(transparent)]
    Validation(#[from] DomainError),
    #[error("`{collection}` document `{id}` not found")]
    NotFound { collection: String, id: String },
    #[error("{change} was rolled back: {source}")]
    RolledBack {
        change: RolledBackChange,
        #[source]
        source: StoreError,
    },
    #[error("post record write failed and its upload was cleaned up: {source}")]
    Compensated {
        #[source]
        source: StoreError,
        /// Set when removing the orphaned upload failed as well.
        cleanup: Option<StoreError>,
    },
    #[error("no authenticated user")]
    Unauthenticated,
    #[error("write failed: {0}")]
    Store(StoreError),
    #[error("lookup failed: {0}")]
    Lookup(#[from] FeedError),
    #[error(transparent)]
    Transition(#[from] TransitionError),
}

impl MutationError {
    /// Error for a write whose optimistic change has already been undone.
    pub(crate) fn rolled_back(change: RolledBackChange, source: StoreError) -> Self {
        match source {
            StoreError::NotFound { collection, id } => Self::NotFound { collection, id },
            source => Self::RolledBack { change, source },
        }
    }

    pub fn is_rolled_back(&self) -> bool {
        matches!(self, Self::RolledBack { .. } | Self::NotFound { .. })
    }
}

/// Outcome of a save toggle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    /// The post is saved. `record_id` is `None` when the store reported an
    /// existing record instead of creating one.
    Saved { record_id: Option<String> },
    Unsaved,
}

#[derive(Debug, Clone)]
pub struct NewPost {
    pub creator_id: String,
    pub caption: String,
    pub location: Option<String>,
    /// Comma-separated tag input.
    pub tags: String,
    pub file: MediaFile,
}

impl NewPost {
    pub(crate) fn validate(&self) -> Result<(), DomainError> {
        ensure_id(&self.creator_id, "creator_id")?;
        validate_caption(&self.caption)?;
        validate_location(self.location.as_deref())?;
        self.file.validate()
    }

    pub(crate) fn parsed_tags(&self) -> Vec<String> {
        parse_tags(&self.tags)
    }

    pub(crate) fn location(&self) -> Option<String> {
        normalize_location(self.location.clone())
    }
}

#[derive(Debug, Clone)]
pub struct PostUpdate {
    pub post_id: String,
    pub caption: String,
    pub location: Option<String>,
    /// Comma-separated tag input.
    pub tags: String,
    /// Media currently attached to the post.
    pub image_id: String,
    pub image_url: String,
    /// Replacement media, if the image changes.
    pub file: Option<MediaFile>,
}

impl PostUpdate {
    pub(crate) fn validate(&self) -> Result<(), DomainError> {
        ensure_id(&self.post_id, "post_id")?;
        ensure_id(&self.image_id, "image_id")?;
        validate_caption(&self.caption)?;
        validate_location(self.location.as_deref())?;
        match &self.file {
            Some(file) => file.validate(),
            None => Ok(()),
        }
    }

    pub(crate) fn parsed_tags(&self) -> Vec<String> {
        parse_tags(&self.tags)
    }

    pub(crate) fn location(&self) -> Option<String> {
        normalize_location(self.location.clone())
    }
}
