#![allow(dead_code)]

use std::collections::BTreeSet;
use std::sync::Arc;

use feedline::application::client::{Collaborators, FeedClient, FeedOptions};
use feedline::application::records::{SAVE_POST, SAVE_USER};
use feedline::application::repos::Collection;
use feedline::cache::CacheConfig;
use feedline::domain::entities::{PostRecord, SessionUser, UserSummary};
use feedline::infra::memory::{MemoryDocumentStore, MemoryMediaStorage, StaticSession};
use time::{Duration, OffsetDateTime};

pub const VIEWER: &str = "u1";
pub const USERS: [&str; 3] = ["u1", "u2", "u3"];

pub struct Harness {
    pub store: Arc<MemoryDocumentStore>,
    pub media: Arc<MemoryMediaStorage>,
    pub session: Arc<StaticSession>,
    pub client: FeedClient,
}

impl Harness {
    /// Store seeded with [`USERS`] and `posts` posts `p01..`, where `p01` is
    /// the oldest. Entries stay fresh for a minute so reads do not trigger
    /// background refreshes.
    pub fn seeded(posts: usize) -> Self {
        Self::with_config(
            posts,
            CacheConfig {
                fresh_for_ms: 60_000,
                ..CacheConfig::default()
            },
        )
    }

    pub fn with_config(posts: usize, cache: CacheConfig) -> Self {
        let store = Arc::new(
            MemoryDocumentStore::new().with_unique(Collection::Saves, &[SAVE_USER, SAVE_POST]),
        );
        for id in USERS {
            store.insert_user(&user(id));
        }
        for index in 1..=posts {
            store.insert_post(&post(&post_id(index), USERS[index % USERS.len()], index, &[]));
        }

        let media = Arc::new(MemoryMediaStorage::new("https://cdn.test"));
        let session = Arc::new(StaticSession::signed_in(SessionUser {
            id: VIEWER.to_string(),
            name: "Viewer".to_string(),
            username: "viewer".to_string(),
        }));
        let client = FeedClient::new(
            Collaborators {
                store: store.clone(),
                media: media.clone(),
                session: session.clone(),
            },
            cache,
            FeedOptions::default(),
        );

        Self {
            store,
            media,
            session,
            client,
        }
    }
}

pub fn post_id(index: usize) -> String {
    format!("p{index:02}")
}

/// Ids `p{from}` down to `p{to}`, newest first.
pub fn ids_desc(from: usize, to: usize) -> Vec<String> {
    (to..=from).rev().map(post_id).collect()
}

pub fn user(id: &str) -> UserSummary {
    UserSummary {
        id: id.to_string(),
        name: format!("User {id}"),
        username: id.to_string(),
        image_url: format!("https://cdn.test/avatars/{id}"),
    }
}

pub fn post(id: &str, creator: &str, minute: usize, likes: &[&str]) -> PostRecord {
    PostRecord {
        id: id.to_string(),
        creator_id: creator.to_string(),
        caption: format!("caption of {id}"),
        location: None,
        image_id: format!("img-{id}"),
        image_url: format!("https://cdn.test/img-{id}"),
        tags: vec!["seed".to_string()],
        liked_user_ids: likes.iter().map(|like| like.to_string()).collect(),
        created_at: OffsetDateTime::UNIX_EPOCH + Duration::minutes(minute as i64),
    }
}

pub fn set(ids: &[&str]) -> BTreeSet<String> {
    ids.iter().map(|id| id.to_string()).collect()
}
