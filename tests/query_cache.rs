mod support;

use std::time::Duration;

use feedline::application::feed::FeedError;
use feedline::application::repos::{Collection, StoreError};
use feedline::cache::{CacheConfig, EntryStatus, QueryData, QueryDescriptor};
use feedline::infra::memory::StoreOp;

use support::{Harness, post};

fn feed_descriptor() -> QueryDescriptor {
    QueryDescriptor::feed(None, 10)
}

fn cached_ids(data: Option<&QueryData>) -> Vec<String> {
    data.map(|data| data.posts().iter().map(|p| p.id().to_string()).collect())
        .unwrap_or_default()
}

#[tokio::test(start_paused = true)]
async fn concurrent_cold_reads_share_one_fetch() {
    let harness = Harness::seeded(5);
    harness
        .store
        .set_latency(Collection::Posts, None, Duration::from_millis(50));
    let cache = harness.client.cache();
    let descriptor = feed_descriptor();

    let (first, second) = tokio::join!(cache.get(&descriptor), cache.get(&descriptor));

    assert_eq!(harness.store.calls(StoreOp::List), 1);
    let first = first.expect("first read");
    let second = second.expect("second read");
    assert_eq!(
        cached_ids(first.data.as_ref()),
        cached_ids(second.data.as_ref())
    );
    assert_eq!(cached_ids(first.data.as_ref()).len(), 5);
}

#[tokio::test]
async fn stale_entries_are_served_while_revalidating() {
    let harness = Harness::with_config(
        3,
        CacheConfig {
            fresh_for_ms: 0,
            ..CacheConfig::default()
        },
    );
    let cache = harness.client.cache();
    let descriptor = feed_descriptor();

    cache.get(&descriptor).await.expect("initial read");
    harness.store.insert_post(&post("p99", "u2", 99, &[]));

    let served = cache.get(&descriptor).await.expect("stale read");
    assert_eq!(cached_ids(served.data.as_ref()).len(), 3);

    let refreshed = cache.refresh(&descriptor).await.expect("revalidated");
    let ids = cached_ids(refreshed.data.as_ref());
    assert_eq!(ids.len(), 4);
    assert_eq!(ids[0], "p99");
    assert_eq!(refreshed.status, EntryStatus::Fresh);
}

#[tokio::test(start_paused = true)]
async fn invalidation_during_fetch_discards_its_result() {
    let harness = Harness::seeded(3);
    harness
        .store
        .set_latency(Collection::Posts, None, Duration::from_millis(50));
    let cache = harness.client.cache();
    let descriptor = feed_descriptor();

    let (read, invalidated) = tokio::join!(cache.get(&descriptor), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        cache.invalidate(&descriptor)
    });

    assert!(invalidated);
    assert_eq!(cached_ids(read.expect("caller still gets data").data.as_ref()).len(), 3);
    let entry = cache.peek(&descriptor).expect("entry kept");
    assert_eq!(entry.status, EntryStatus::Stale);
    assert!(entry.data.is_none());
    assert!(!entry.is_pending());

    cache.get(&descriptor).await.expect("refetch");
    assert_eq!(harness.store.calls(StoreOp::List), 2);
}

#[tokio::test(start_paused = true)]
async fn eviction_during_fetch_leaves_no_entry_behind() {
    let harness = Harness::seeded(3);
    harness
        .store
        .set_latency(Collection::Posts, None, Duration::from_millis(50));
    let cache = harness.client.cache();
    let descriptor = feed_descriptor();

    let (read, evicted) = tokio::join!(cache.get(&descriptor), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        cache.evict(&descriptor)
    });

    assert!(evicted);
    assert!(read.is_ok());
    assert!(cache.peek(&descriptor).is_none());
    assert!(cache.is_empty());
}

#[tokio::test]
async fn least_recently_used_query_is_evicted() {
    let harness = Harness::with_config(
        6,
        CacheConfig {
            fresh_for_ms: 60_000,
            max_entries: 2,
        },
    );
    let client = &harness.client;

    client.feed_page(None).await.expect("feed");
    client.user_posts("u1").await.expect("u1 posts");
    client.feed_page(None).await.expect("feed again");
    client.user_posts("u2").await.expect("u2 posts");

    let cache = client.cache();
    assert_eq!(cache.len(), 2);
    assert!(cache.peek(&feed_descriptor()).is_some());
    assert!(cache.peek(&QueryDescriptor::user_posts("u1")).is_none());
    assert!(cache.peek(&QueryDescriptor::user_posts("u2")).is_some());
}

#[tokio::test]
async fn failed_refresh_keeps_previous_data() {
    let harness = Harness::seeded(3);
    let cache = harness.client.cache();
    let descriptor = feed_descriptor();

    cache.get(&descriptor).await.expect("initial read");
    harness.store.fail_next(
        StoreOp::List,
        Collection::Posts,
        StoreError::transient("posts index offline"),
    );

    let err = cache.refresh(&descriptor).await.expect_err("refresh fails");
    assert!(matches!(err, FeedError::Store(_)));

    let entry = cache.peek(&descriptor).expect("entry kept");
    assert_eq!(entry.status, EntryStatus::Error);
    assert_eq!(cached_ids(entry.data.as_ref()).len(), 3);
    assert!(
        entry
            .error
            .as_deref()
            .is_some_and(|message| message.contains("posts index offline"))
    );
}

#[tokio::test]
async fn unrelated_queries_survive_post_invalidation() {
    let harness = Harness::seeded(4);
    let client = &harness.client;

    client.feed_page(None).await.expect("feed");
    client.saved().list_saved("u1").await.expect("saved index");

    let invalidated = client.cache().invalidate_where(|descriptor, _| {
        matches!(descriptor, QueryDescriptor::Feed { .. })
    });

    assert_eq!(invalidated, 1);
    let saved = client
        .cache()
        .peek(&QueryDescriptor::saved("u1"))
        .expect("saved entry");
    assert_eq!(saved.status, EntryStatus::Fresh);
}
