//! Domain entities mirrored from the document store.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use time::OffsetDateTime;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PostRecord {
    pub id: String,
    pub creator_id: String,
    pub caption: String,
    pub location: Option<String>,
    pub image_id: String,
    pub image_url: String,
    pub tags: Vec<String>,
    pub liked_user_ids: BTreeSet<String>,
    pub created_at: OffsetDateTime,
}

impl PostRecord {
    pub fn is_liked_by(&self, user_id: &str) -> bool {
        self.liked_user_ids.contains(user_id)
    }

    /// Desired like set after toggling membership of `user_id`.
    pub fn toggled_likes(&self, user_id: &str) -> BTreeSet<String> {
        toggle_member(&self.liked_user_ids, user_id)
    }
}

/// Read-only projection of a user document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserSummary {
    pub id: String,
    pub name: String,
    pub username: String,
    pub image_url: String,
}

/// A post with its creator and liked users resolved.
///
/// `liked_users` follows the iteration order of `post.liked_user_ids`; ids that
/// could not be resolved are absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnrichedPost {
    pub post: PostRecord,
    pub creator: Option<UserSummary>,
    pub liked_users: Vec<UserSummary>,
}

impl EnrichedPost {
    pub fn id(&self) -> &str {
        &self.post.id
    }

    pub fn unresolved_likes(&self) -> usize {
        self.post
            .liked_user_ids
            .len()
            .saturating_sub(self.liked_users.len())
    }

    /// Replace the like set, dropping resolved summaries no longer in it.
    pub fn set_liked_user_ids(&mut self, liked: BTreeSet<String>) {
        self.liked_users.retain(|user| liked.contains(&user.id));
        self.post.liked_user_ids = liked;
    }

    /// Replace the like set, resolving summaries from the current ones first
    /// and from `known` after that.
    pub fn resolve_liked_user_ids(
        &mut self,
        liked: BTreeSet<String>,
        known: &BTreeMap<String, UserSummary>,
    ) {
        let current = std::mem::take(&mut self.liked_users);
        self.liked_users = liked
            .iter()
            .filter_map(|id| {
                current
                    .iter()
                    .find(|user| &user.id == id)
                    .or_else(|| known.get(id))
                    .cloned()
            })
            .collect();
        self.post.liked_user_ids = liked;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SavedRecord {
    pub id: String,
    pub user_id: String,
    pub post_id: String,
}

/// Entry of a user's saved index.
///
/// `record_id` is `None` only while an optimistic save is being committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SavedRef {
    pub record_id: Option<String>,
    pub post_id: String,
}

impl From<SavedRecord> for SavedRef {
    fn from(record: SavedRecord) -> Self {
        Self {
            record_id: Some(record.id),
            post_id: record.post_id,
        }
    }
}

/// Authenticated user as exposed by the session collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionUser {
    pub id: String,
    pub name: String,
    pub username: String,
}

pub fn toggle_member(set: &BTreeSet<String>, member: &str) -> BTreeSet<String> {
    let mut next = set.clone();
    if !next.remove(member) {
        next.insert(member.to_string());
    }
    next
}
