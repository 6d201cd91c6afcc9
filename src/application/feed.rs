use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::application::enrich::{Enricher, EnrichmentWarning};
use crate::application::records::{
    POST_CAPTION, POST_CREATOR, SAVE_USER, decode_post, decode_saved,
};
use crate::application::repos::{Collection, Document, DocumentStore, ListQuery, StoreError};
use crate::cache::{QueryData, QueryDescriptor, QueryFetcher};
use crate::domain::entities::{EnrichedPost, PostRecord, SavedRecord};
use crate::domain::error::DomainError;

pub const DEFAULT_PAGE_SIZE: u32 = 10;

#[derive(Debug, Clone, Error)]
pub enum FeedError {
    #[error("cursor `{cursor}` does not name an existing post")]
    InvalidCursor { cursor: String },
    #[error(transparent)]
    Decode(#[from] DomainError),
    #[error("store request failed: {0}")]
    Store(#[from] StoreError),
    #[error("fetch interrupted: {0}")]
    Interrupted(String),
}

/// One page of the cursor-paged feed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedPage {
    pub posts: Vec<EnrichedPost>,
    /// Id of the last post of this page, `None` once the feed is exhausted.
    pub cursor: Option<String>,
    pub total: u64,
    pub warnings: Vec<EnrichmentWarning>,
}

impl FeedPage {
    pub fn empty() -> Self {
        Self {
            posts: Vec::new(),
            cursor: None,
            total: 0,
            warnings: Vec::new(),
        }
    }

    pub fn post_ids(&self) -> Vec<&str> {
        self.posts.iter().map(EnrichedPost::id).collect()
    }
}

/// Flat, newest-first list of posts, such as creator or search results.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PostList {
    pub posts: Vec<EnrichedPost>,
    pub warnings: Vec<EnrichmentWarning>,
}

impl PostList {
    pub fn len(&self) -> usize {
        self.posts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.posts.is_empty()
    }

    pub fn post_ids(&self) -> Vec<&str> {
        self.posts.iter().map(EnrichedPost::id).collect()
    }

    /// Drop `post_id` along with the warnings attributed to it.
    pub(crate) fn remove(&mut self, post_id: &str) -> bool {
        let before = self.posts.len();
        self.posts.retain(|post| post.id() != post_id);
        self.warnings.retain(|warning| warning.post_id != post_id);
        before != self.posts.len()
    }
}

impl From<Vec<EnrichedPost>> for PostList {
    fn from(posts: Vec<EnrichedPost>) -> Self {
        Self {
            posts,
            warnings: Vec::new(),
        }
    }
}

pub struct FeedService {
    store: Arc<dyn DocumentStore>,
    enricher: Enricher,
}

impl FeedService {
    pub fn new(store: Arc<dyn DocumentStore>, enrichment_concurrency: usize) -> Self {
        Self {
            enricher: Enricher::new(Arc::clone(&store), enrichment_concurrency),
            store,
        }
    }

    /// Fetch the page that follows `cursor`, newest first.
    ///
    /// One extra post is requested as look-ahead: the returned cursor is only
    /// set when at least one post exists beyond this page. A `page_size` of
    /// zero is treated as one.
    #[instrument(skip(self))]
    pub async fn fetch_page(
        &self,
        cursor: Option<&str>,
        page_size: u32,
    ) -> Result<FeedPage, FeedError> {
        let page_size = page_size.max(1);
        let query = ListQuery::newest_first()
            .limit(page_size.saturating_add(1))
            .after(cursor.map(str::to_string));
        let list = self
            .store
            .list_documents(Collection::Posts, &query)
            .await
            .map_err(|err| cursor_error(cursor, err))?;

        let mut documents = list.documents;
        let has_more = documents.len() > page_size as usize;
        documents.truncate(page_size as usize);
        let next_cursor = if has_more {
            documents.last().map(|document| document.id.clone())
        } else {
            None
        };

        let records = decode_posts(&documents);
        let (posts, warnings) = self.enricher.enrich_page(&records).await;
        debug!(
            posts = posts.len(),
            total = list.total,
            has_more,
            "Fetched feed page"
        );
        Ok(FeedPage {
            posts,
            cursor: next_cursor,
            total: list.total,
            warnings,
        })
    }

    /// Every post authored by `user_id`, newest first.
    #[instrument(skip(self))]
    pub async fn fetch_by_creator(&self, user_id: &str) -> Result<PostList, FeedError> {
        let query = ListQuery::newest_first().equal(POST_CREATOR, user_id);
        self.list_enriched(&query).await
    }

    /// Caption search, newest first. Blank terms match nothing.
    #[instrument(skip(self))]
    pub async fn search(&self, term: &str) -> Result<PostList, FeedError> {
        let term = term.trim();
        if term.is_empty() {
            return Ok(PostList::default());
        }
        let query = ListQuery::newest_first().search(POST_CAPTION, term);
        self.list_enriched(&query).await
    }

    #[instrument(skip(self))]
    pub async fn get_post(&self, post_id: &str) -> Result<EnrichedPost, FeedError> {
        let document = self.store.get_document(Collection::Posts, post_id).await?;
        let record = decode_post(&document)?;
        Ok(self.enricher.enrich(&record).await.post)
    }

    /// Raw save records of `user_id`.
    #[instrument(skip(self))]
    pub async fn list_saved_records(&self, user_id: &str) -> Result<Vec<SavedRecord>, FeedError> {
        let query = ListQuery::newest_first().equal(SAVE_USER, user_id);
        let list = self.store.list_documents(Collection::Saves, &query).await?;
        Ok(list
            .documents
            .iter()
            .filter_map(|document| match decode_saved(document) {
                Ok(record) => Some(record),
                Err(err) => {
                    warn!(
                        saved_id = %document.id,
                        error = %err,
                        "Skipping malformed save record"
                    );
                    None
                }
            })
            .collect())
    }

    async fn list_enriched(&self, query: &ListQuery) -> Result<PostList, FeedError> {
        let list = self.store.list_documents(Collection::Posts, query).await?;
        let records = decode_posts(&list.documents);
        let (posts, warnings) = self.enricher.enrich_page(&records).await;
        Ok(PostList { posts, warnings })
    }
}

#[async_trait]
impl QueryFetcher for FeedService {
    async fn fetch(&self, descriptor: &QueryDescriptor) -> Result<QueryData, FeedError> {
        match descriptor {
            QueryDescriptor::Feed { cursor, page_size } => self
                .fetch_page(cursor.as_deref(), *page_size)
                .await
                .map(QueryData::Feed),
            QueryDescriptor::Saved { user_id } => {
                let records = self.list_saved_records(user_id).await?;
                Ok(QueryData::Saved(records.into_iter().map(Into::into).collect()))
            }
            QueryDescriptor::Search { term } => self.search(term).await.map(QueryData::Posts),
            QueryDescriptor::UserPosts { user_id } => {
                self.fetch_by_creator(user_id).await.map(QueryData::Posts)
            }
            QueryDescriptor::Post { post_id } => self.get_post(post_id).await.map(QueryData::Post),
        }
    }
}

fn cursor_error(cursor: Option<&str>, err: StoreError) -> FeedError {
    match (cursor, &err) {
        (Some(cursor), StoreError::NotFound { .. } | StoreError::InvalidInput { .. }) => {
            FeedError::InvalidCursor {
                cursor: cursor.to_string(),
            }
        }
        _ => FeedError::Store(err),
    }
}

fn decode_posts(documents: &[Document]) -> Vec<PostRecord> {
    documents
        .iter()
        .filter_map(|document| match decode_post(document) {
            Ok(record) => Some(record),
            Err(err) => {
                warn!(post_id = %document.id, error = %err, "Skipping malformed post");
                None
            }
        })
        .collect()
}
