//! Saved-index: the per-user set of saved posts, read through the cache.

use std::collections::HashSet;

use crate::application::feed::FeedError;
use crate::cache::{QueryCache, QueryData, QueryDescriptor};
use crate::domain::entities::{EnrichedPost, SavedRef};

#[derive(Clone)]
pub struct SavedIndex {
    cache: QueryCache,
}

impl SavedIndex {
    pub fn new(cache: QueryCache) -> Self {
        Self { cache }
    }

    /// Saved references of `user_id`, served from the cache when present.
    pub async fn list_saved(&self, user_id: &str) -> Result<Vec<SavedRef>, FeedError> {
        let entry = self.cache.get(&QueryDescriptor::saved(user_id)).await?;
        Ok(saved_refs(entry.data))
    }

    /// Re-read the saved index from the store.
    pub async fn reload(&self, user_id: &str) -> Result<Vec<SavedRef>, FeedError> {
        let entry = self.cache.refresh(&QueryDescriptor::saved(user_id)).await?;
        Ok(saved_refs(entry.data))
    }

    pub async fn find(&self, user_id: &str, post_id: &str) -> Result<Option<SavedRef>, FeedError> {
        Ok(self
            .list_saved(user_id)
            .await?
            .into_iter()
            .find(|saved| saved.post_id == post_id))
    }

    pub async fn is_saved(&self, user_id: &str, post_id: &str) -> Result<bool, FeedError> {
        Ok(self.find(user_id, post_id).await?.is_some())
    }
}

fn saved_refs(data: Option<QueryData>) -> Vec<SavedRef> {
    match data {
        Some(QueryData::Saved(refs)) => refs,
        _ => Vec::new(),
    }
}

/// Posts from `posts` that are in `saved`, in the order of `posts`.
pub fn saved_view(posts: &[EnrichedPost], saved: &[SavedRef]) -> Vec<EnrichedPost> {
    let saved_ids: HashSet<&str> = saved.iter().map(|entry| entry.post_id.as_str()).collect();
    posts
        .iter()
        .filter(|post| saved_ids.contains(post.id()))
        .cloned()
        .collect()
}
