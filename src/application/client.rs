//! Wiring of the feed service, query cache, saved index and mutation
//! coordinator over one set of collaborators.

use std::num::NonZeroUsize;
use std::sync::Arc;

use tracing::info;

use crate::application::enrich::DEFAULT_ENRICHMENT_CONCURRENCY;
use crate::application::feed::{DEFAULT_PAGE_SIZE, FeedError, FeedPage, FeedService, PostList};
use crate::application::mutations::MutationCoordinator;
use crate::application::repos::{CurrentUser, DocumentStore, MediaStorage};
use crate::application::saved::{SavedIndex, saved_view};
use crate::cache::{CacheConfig, QueryCache, QueryData, QueryDescriptor};
use crate::config::{FeedSettings, Settings};
use crate::domain::entities::EnrichedPost;
use crate::domain::error::DomainError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedOptions {
    pub page_size: u32,
    pub enrichment_concurrency: NonZeroUsize,
}

impl Default for FeedOptions {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            enrichment_concurrency: NonZeroUsize::new(DEFAULT_ENRICHMENT_CONCURRENCY)
                .unwrap_or(NonZeroUsize::MIN),
        }
    }
}

impl From<&FeedSettings> for FeedOptions {
    fn from(settings: &FeedSettings) -> Self {
        Self {
            page_size: settings.page_size,
            enrichment_concurrency: settings.enrichment_concurrency,
        }
    }
}

/// Collaborators the client reads from and writes to.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn DocumentStore>,
    pub media: Arc<dyn MediaStorage>,
    pub session: Arc<dyn CurrentUser>,
}

/// Cached read surface plus the mutation coordinator.
pub struct FeedClient {
    cache: QueryCache,
    saved: SavedIndex,
    mutations: MutationCoordinator,
    options: FeedOptions,
}

impl FeedClient {
    pub fn new(collaborators: Collaborators, cache: CacheConfig, options: FeedOptions) -> Self {
        let Collaborators {
            store,
            media,
            session,
        } = collaborators;
        let feed = Arc::new(FeedService::new(
            Arc::clone(&store),
            options.enrichment_concurrency.get(),
        ));
        let cache = QueryCache::new(cache, feed);
        info!(
            page_size = options.page_size,
            enrichment_concurrency = options.enrichment_concurrency.get(),
            max_entries = cache.config().max_entries,
            fresh_for_ms = cache.config().fresh_for_ms,
            "Feed client ready"
        );
        Self {
            saved: SavedIndex::new(cache.clone()),
            mutations: MutationCoordinator::new(store, media, session, cache.clone()),
            cache,
            options,
        }
    }

    pub fn from_settings(collaborators: Collaborators, settings: &Settings) -> Self {
        Self::new(
            collaborators,
            CacheConfig::from(&settings.cache),
            FeedOptions::from(&settings.feed),
        )
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    pub fn saved(&self) -> &SavedIndex {
        &self.saved
    }

    pub fn mutations(&self) -> &MutationCoordinator {
        &self.mutations
    }

    pub fn options(&self) -> FeedOptions {
        self.options
    }

    /// The feed page following `cursor`, served through the cache.
    pub async fn feed_page(&self, cursor: Option<&str>) -> Result<FeedPage, FeedError> {
        let descriptor = QueryDescriptor::feed(cursor.map(str::to_string), self.options.page_size);
        let entry = self.cache.get(&descriptor).await?;
        Ok(match entry.data {
            Some(QueryData::Feed(page)) => page,
            _ => FeedPage::empty(),
        })
    }

    pub async fn user_posts(&self, user_id: &str) -> Result<PostList, FeedError> {
        self.post_list(&QueryDescriptor::user_posts(user_id)).await
    }

    /// Posts whose caption matches `term`. A blank term matches nothing and
    /// is not cached.
    pub async fn search(&self, term: &str) -> Result<PostList, FeedError> {
        if term.trim().is_empty() {
            return Ok(PostList::default());
        }
        self.post_list(&QueryDescriptor::search(term)).await
    }

    pub async fn post(&self, post_id: &str) -> Result<EnrichedPost, FeedError> {
        let entry = self.cache.get(&QueryDescriptor::post(post_id)).await?;
        match entry.data {
            Some(QueryData::Post(post)) => Ok(post),
            _ => Err(FeedError::Decode(DomainError::not_found("post"))),
        }
    }

    /// The subset of `posts` saved by `user_id`, in the order of `posts`.
    pub async fn saved_posts(
        &self,
        user_id: &str,
        posts: &[EnrichedPost],
    ) -> Result<Vec<EnrichedPost>, FeedError> {
        let saved = self.saved.list_saved(user_id).await?;
        Ok(saved_view(posts, &saved))
    }

    async fn post_list(&self, descriptor: &QueryDescriptor) -> Result<PostList, FeedError> {
        let entry = self.cache.get(descriptor).await?;
        Ok(match entry.data {
            Some(QueryData::Posts(list)) => list,
            Some(data) => data.posts().to_vec().into(),
            None => PostList::default(),
        })
    }
}
