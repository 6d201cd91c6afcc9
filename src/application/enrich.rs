//! Enrichment fan-out: resolve creator and liked users for raw posts.

use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;

use futures::{StreamExt, stream};
use metrics::counter;
use serde::Serialize;
use tracing::{debug, warn};

use crate::application::records::decode_user;
use crate::application::repos::{Collection, DocumentStore, ListQuery};
use crate::domain::entities::{EnrichedPost, PostRecord, UserSummary};

const METRIC_WARNING: &str = "feedline_enrichment_warning_total";

pub const DEFAULT_ENRICHMENT_CONCURRENCY: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EnrichmentField {
    Creator,
    LikedUsers,
}

impl fmt::Display for EnrichmentField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnrichmentField::Creator => f.write_str("creator"),
            EnrichmentField::LikedUsers => f.write_str("liked_users"),
        }
    }
}

/// A non-fatal lookup failure attributed to one post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnrichmentWarning {
    pub post_id: String,
    pub field: EnrichmentField,
    pub reason: String,
}

impl EnrichmentWarning {
    fn new(post_id: &str, field: EnrichmentField, reason: impl Into<String>) -> Self {
        let warning = Self {
            post_id: post_id.to_string(),
            field,
            reason: reason.into(),
        };
        warn!(
            post_id = %warning.post_id,
            field = %warning.field,
            reason = %warning.reason,
            "Post enrichment degraded"
        );
        counter!(METRIC_WARNING, "field" => field.to_string()).increment(1);
        warning
    }
}

/// One enriched post together with the failures met while enriching it.
#[derive(Debug, Clone)]
pub struct Enriched {
    pub post: EnrichedPost,
    pub warnings: Vec<EnrichmentWarning>,
}

pub struct Enricher {
    store: Arc<dyn DocumentStore>,
    concurrency: NonZeroUsize,
}

impl Enricher {
    pub fn new(store: Arc<dyn DocumentStore>, concurrency: usize) -> Self {
        Self {
            store,
            concurrency: NonZeroUsize::new(concurrency).unwrap_or(NonZeroUsize::MIN),
        }
    }

    /// Resolve creator and liked users of a single post.
    ///
    /// Both lookups run concurrently. A failed lookup leaves the field empty and
    /// yields a warning instead of an error.
    pub async fn enrich(&self, post: &PostRecord) -> Enriched {
        let (creator, liked) = tokio::join!(
            self.lookup_creator(post),
            self.lookup_liked_users(post)
        );

        let mut warnings = Vec::new();
        let creator = creator.unwrap_or_else(|warning| {
            warnings.push(warning);
            None
        });
        let liked_users = match liked {
            Ok((users, missing)) => {
                if missing > 0 {
                    warnings.push(EnrichmentWarning::new(
                        &post.id,
                        EnrichmentField::LikedUsers,
                        format!("{missing} liked user(s) could not be resolved"),
                    ));
                }
                users
            }
            Err(warning) => {
                warnings.push(warning);
                Vec::new()
            }
        };

        Enriched {
            post: EnrichedPost {
                post: post.clone(),
                creator,
                liked_users,
            },
            warnings,
        }
    }

    /// Enrich a page of posts with bounded concurrency.
    ///
    /// Results land in index-addressed slots, so the output order matches the
    /// input order whatever order the lookups finish in.
    pub async fn enrich_page(
        &self,
        posts: &[PostRecord],
    ) -> (Vec<EnrichedPost>, Vec<EnrichmentWarning>) {
        let mut slots: Vec<Option<Enriched>> = (0..posts.len()).map(|_| None).collect();

        let mut results = stream::iter(posts.iter().cloned().enumerate())
            .map(|(index, post)| async move { (index, self.enrich(&post).await) })
            .buffer_unordered(self.concurrency.get());
        while let Some((index, enriched)) = results.next().await {
            slots[index] = Some(enriched);
        }

        let mut enriched_posts = Vec::with_capacity(posts.len());
        let mut warnings = Vec::new();
        for enriched in slots.into_iter().flatten() {
            enriched_posts.push(enriched.post);
            warnings.extend(enriched.warnings);
        }
        debug!(
            posts = enriched_posts.len(),
            warnings = warnings.len(),
            concurrency = self.concurrency.get(),
            "Enriched page"
        );
        (enriched_posts, warnings)
    }

    async fn lookup_creator(
        &self,
        post: &PostRecord,
    ) -> Result<Option<UserSummary>, EnrichmentWarning> {
        let document = self
            .store
            .get_document(Collection::Users, &post.creator_id)
            .await
            .map_err(|err| {
                EnrichmentWarning::new(&post.id, EnrichmentField::Creator, err.to_string())
            })?;
        decode_user(&document).map(Some).map_err(|err| {
            EnrichmentWarning::new(&post.id, EnrichmentField::Creator, err.to_string())
        })
    }

    /// Batch lookup of liked users, returned in like-set order along with the
    /// number of ids that did not resolve.
    async fn lookup_liked_users(
        &self,
        post: &PostRecord,
    ) -> Result<(Vec<UserSummary>, usize), EnrichmentWarning> {
        if post.liked_user_ids.is_empty() {
            return Ok((Vec::new(), 0));
        }

        let query = ListQuery::newest_first()
            .ids(post.liked_user_ids.iter().cloned())
            .limit(u32::try_from(post.liked_user_ids.len()).unwrap_or(u32::MAX));
        let list = self
            .store
            .list_documents(Collection::Users, &query)
            .await
            .map_err(|err| {
                EnrichmentWarning::new(&post.id, EnrichmentField::LikedUsers, err.to_string())
            })?;

        let mut by_id: HashMap<String, UserSummary> = HashMap::new();
        for document in &list.documents {
            match decode_user(document) {
                Ok(user) => {
                    by_id.insert(user.id.clone(), user);
                }
                Err(err) => debug!(user_id = %document.id, error = %err, "Skipping malformed user"),
            }
        }

        let users: Vec<UserSummary> = post
            .liked_user_ids
            .iter()
            .filter_map(|id| by_id.remove(id))
            .collect();
        let missing = post.liked_user_ids.len() - users.len();
        Ok((users, missing))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::{Map, Value};
    use time::OffsetDateTime;

    use super::*;
    use crate::application::repos::{Document, DocumentId, DocumentList, StoreError};
    use crate::infra::memory::{MemoryDocumentStore, StoreOp};

    /// Store that records the highest number of concurrent `get_document` calls.
    struct PeakStore {
        inner: Arc<MemoryDocumentStore>,
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    impl PeakStore {
        fn new(inner: Arc<MemoryDocumentStore>) -> Self {
            Self {
                inner,
                active: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl DocumentStore for PeakStore {
        async fn list_documents(
            &self,
            collection: Collection,
            query: &ListQuery,
        ) -> Result<DocumentList, StoreError> {
            self.inner.list_documents(collection, query).await
        }

        async fn get_document(
            &self,
            collection: Collection,
            id: &str,
        ) -> Result<Document, StoreError> {
            let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(active, Ordering::SeqCst);
            let result = self.inner.get_document(collection, id).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            result
        }

        async fn create_document(
            &self,
            collection: Collection,
            id: DocumentId,
            fields: Map<String, Value>,
        ) -> Result<Document, StoreError> {
            self.inner.create_document(collection, id, fields).await
        }

        async fn update_document(
            &self,
            collection: Collection,
            id: &str,
            fields: Map<String, Value>,
        ) -> Result<Document, StoreError> {
            self.inner.update_document(collection, id, fields).await
        }

        async fn delete_document(
            &self,
            collection: Collection,
            id: &str,
        ) -> Result<(), StoreError> {
            self.inner.delete_document(collection, id).await
        }
    }

    fn user(id: &str) -> UserSummary {
        UserSummary {
            id: id.to_string(),
            name: format!("User {id}"),
            username: id.to_string(),
            image_url: format!("https://cdn/avatars/{id}"),
        }
    }

    fn post(id: &str, creator: &str, likes: &[&str]) -> PostRecord {
        PostRecord {
            id: id.to_string(),
            creator_id: creator.to_string(),
            caption: format!("caption {id}"),
            location: None,
            image_id: format!("img-{id}"),
            image_url: format!("https://cdn/{id}"),
            tags: Vec::new(),
            liked_user_ids: likes.iter().map(|like| like.to_string()).collect(),
            created_at: OffsetDateTime::UNIX_EPOCH,
        }
    }

    fn store_with_users(ids: &[&str]) -> Arc<MemoryDocumentStore> {
        let store = Arc::new(MemoryDocumentStore::new());
        for id in ids {
            store.insert_user(&user(id));
        }
        store
    }

    #[tokio::test]
    async fn resolves_creator_and_likes_in_set_order() {
        let store = store_with_users(&["u1", "u2", "u3"]);
        let enricher = Enricher::new(store, 4);

        let enriched = enricher.enrich(&post("p1", "u1", &["u3", "u2"])).await;

        assert!(enriched.warnings.is_empty());
        assert_eq!(enriched.post.creator, Some(user("u1")));
        let liked: Vec<_> = enriched.post.liked_users.iter().map(|u| u.id.as_str()).collect();
        assert_eq!(liked, vec!["u2", "u3"]);
    }

    #[tokio::test]
    async fn empty_like_set_skips_batch_lookup() {
        let store = store_with_users(&["u1"]);
        let enricher = Enricher::new(Arc::clone(&store) as Arc<dyn DocumentStore>, 4);

        enricher.enrich(&post("p1", "u1", &[])).await;

        assert_eq!(store.calls(StoreOp::List), 0);
        assert_eq!(store.calls(StoreOp::Get), 1);
    }

    #[tokio::test]
    async fn missing_creator_becomes_warning() {
        let store = store_with_users(&["u2"]);
        let enricher = Enricher::new(store, 4);

        let enriched = enricher.enrich(&post("p1", "ghost", &["u2"])).await;

        assert_eq!(enriched.post.creator, None);
        assert_eq!(enriched.post.liked_users, vec![user("u2")]);
        assert_eq!(enriched.warnings.len(), 1);
        assert_eq!(enriched.warnings[0].post_id, "p1");
        assert_eq!(enriched.warnings[0].field, EnrichmentField::Creator);
    }

    #[tokio::test]
    async fn failed_batch_lookup_keeps_creator() {
        let store = store_with_users(&["u1", "u2"]);
        store.fail_next(
            StoreOp::List,
            Collection::Users,
            StoreError::transient("users index offline"),
        );
        let enricher = Enricher::new(store, 4);

        let enriched = enricher.enrich(&post("p1", "u1", &["u2"])).await;

        assert_eq!(enriched.post.creator, Some(user("u1")));
        assert!(enriched.post.liked_users.is_empty());
        assert_eq!(enriched.warnings[0].field, EnrichmentField::LikedUsers);
        assert!(enriched.warnings[0].reason.contains("users index offline"));
    }

    #[tokio::test]
    async fn partially_resolved_likes_are_reported() {
        let store = store_with_users(&["u1", "u2"]);
        let enricher = Enricher::new(store, 4);

        let enriched = enricher.enrich(&post("p1", "u1", &["u2", "u9"])).await;

        assert_eq!(enriched.post.liked_users, vec![user("u2")]);
        assert_eq!(enriched.post.unresolved_likes(), 1);
        assert_eq!(enriched.warnings.len(), 1);
        assert!(enriched.warnings[0].reason.starts_with("1 liked user"));
    }

    #[tokio::test(start_paused = true)]
    async fn page_order_survives_uneven_latency() {
        let store = store_with_users(&["slow", "fast", "mid"]);
        store.set_latency(Collection::Users, Some("slow"), Duration::from_millis(90));
        store.set_latency(Collection::Users, Some("mid"), Duration::from_millis(40));
        let enricher = Enricher::new(store, 2);
        let posts = vec![
            post("a", "slow", &[]),
            post("b", "fast", &[]),
            post("c", "mid", &[]),
            post("d", "fast", &[]),
        ];

        let (enriched, warnings) = enricher.enrich_page(&posts).await;

        assert!(warnings.is_empty());
        let ids: Vec<_> = enriched.iter().map(EnrichedPost::id).collect();
        assert_eq!(ids, vec!["a", "b", "c", "d"]);
        assert_eq!(posts[0].liked_user_ids.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn page_lookups_stay_within_the_concurrency_limit() {
        let inner = store_with_users(&["u1", "u2"]);
        inner.set_latency(Collection::Users, None, Duration::from_millis(10));
        let store = Arc::new(PeakStore::new(inner));
        let enricher = Enricher::new(Arc::clone(&store) as Arc<dyn DocumentStore>, 3);
        let posts: Vec<_> = (0..30)
            .map(|index| {
                let creator = if index % 2 == 0 { "u1" } else { "u2" };
                post(&format!("p{index}"), creator, &[])
            })
            .collect();

        let (enriched, warnings) = enricher.enrich_page(&posts).await;

        assert!(warnings.is_empty());
        assert_eq!(enriched.len(), 30);
        assert_eq!(store.peak.load(Ordering::SeqCst), 3);
        assert_eq!(store.active.load(Ordering::SeqCst), 0);
    }
}
