use std::{process, sync::Arc, time::Duration};

use feedline::{
    application::{
        client::{Collaborators, FeedClient},
        error::AppError,
        mutations::{NewPost, PostUpdate, SaveOutcome},
        records::{SAVE_POST, SAVE_USER},
        repos::Collection,
    },
    config,
    domain::{
        entities::{PostRecord, SessionUser, UserSummary},
        uploads::MediaFile,
    },
    infra::{
        memory::{MemoryDocumentStore, MemoryMediaStorage, StaticSession},
        telemetry,
    },
};
use time::OffsetDateTime;
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

const DEMO_USERS: [(&str, &str); 3] = [("u1", "Ada"), ("u2", "Grace"), ("u3", "Linus")];
const DEMO_CAPTIONS: [&str; 4] = [
    "Sunset over the pier",
    "Morning run by the river",
    "Street food crawl",
    "Sunset from the ridge",
];

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    let chain = error.chain().join(": caused by: ");
    if dispatcher::has_been_set() {
        error!(error = %chain, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %chain, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;
    let command = cli_args.command.unwrap_or_default();

    telemetry::init(&settings.logging)?;

    match command {
        config::Command::Demo(args) => run_demo(settings, args).await,
        config::Command::Config(_) => {
            println!("{settings:#?}");
            Ok(())
        }
    }
}

async fn run_demo(settings: config::Settings, args: config::DemoArgs) -> Result<(), AppError> {
    let store = Arc::new(
        MemoryDocumentStore::new().with_unique(Collection::Saves, &[SAVE_USER, SAVE_POST]),
    );
    if args.store_latency_ms > 0 {
        let latency = Duration::from_millis(args.store_latency_ms);
        store.set_latency(Collection::Posts, None, latency);
        store.set_latency(Collection::Users, None, latency);
    }
    seed(&store, args.posts);

    let media = Arc::new(MemoryMediaStorage::default());
    let (user_id, name) = DEMO_USERS[0];
    let session = Arc::new(StaticSession::signed_in(SessionUser {
        id: user_id.to_string(),
        name: name.to_string(),
        username: name.to_lowercase(),
    }));
    let client = FeedClient::from_settings(
        Collaborators {
            store: store.clone(),
            media: media.clone(),
            session,
        },
        &settings,
    );

    let first_post = walk_feed(&client).await?;
    let Some(post_id) = first_post else {
        info!("Feed is empty, nothing to mutate");
        return Ok(());
    };

    let liked = client.mutations().toggle_like(&post_id).await?;
    info!(post_id = %post_id, likes = liked.len(), "Toggled like");

    match client.mutations().toggle_save_current(&post_id).await? {
        SaveOutcome::Saved { record_id } => info!(post_id = %post_id, ?record_id, "Saved"),
        SaveOutcome::Unsaved => info!(post_id = %post_id, "Unsaved"),
    }
    let page = client.feed_page(None).await?;
    let saved = client.saved_posts(user_id, &page.posts).await?;
    let liked_by_me = page
        .posts
        .iter()
        .filter(|post| post.post.is_liked_by(user_id))
        .count();
    info!(saved = saved.len(), liked = liked_by_me, "First page for the demo user");

    let created = client
        .mutations()
        .create_post(NewPost {
            creator_id: user_id.to_string(),
            caption: "Fresh from the demo".to_string(),
            location: Some("Lisbon".to_string()),
            tags: "demo, feedline".to_string(),
            file: MediaFile::new("demo.jpg", vec![0xFF, 0xD8, 0xFF, 0xE0]),
        })
        .await?;
    let updated = client
        .mutations()
        .update_post(PostUpdate {
            post_id: created.id.clone(),
            caption: "Edited in the demo".to_string(),
            location: None,
            tags: "demo".to_string(),
            image_id: created.image_id.clone(),
            image_url: created.image_url.clone(),
            file: Some(MediaFile::new("demo-2.png", vec![0x89, 0x50, 0x4E, 0x47])),
        })
        .await?;
    info!(post_id = %updated.id, caption = %updated.caption, "Updated post");
    client
        .mutations()
        .delete_post(&updated.id, &updated.image_id)
        .await?;

    let matches = client.search("sunset").await?;
    info!(
        results = matches.len(),
        degraded = matches.warnings.len(),
        cached_queries = client.cache().len(),
        posts = store.count(Collection::Posts),
        saves = store.count(Collection::Saves),
        media_files = media.file_count(),
        "Demo finished"
    );
    client.cache().clear();
    Ok(())
}

/// Page through the whole feed and return the id of the newest post.
async fn walk_feed(client: &FeedClient) -> Result<Option<String>, AppError> {
    let mut cursor: Option<String> = None;
    let mut first = None;
    let mut pages = 0usize;
    loop {
        let page = client.feed_page(cursor.as_deref()).await?;
        pages += 1;
        for warning in &page.warnings {
            warn!(post_id = %warning.post_id, field = %warning.field, "Incomplete post");
        }
        info!(
            page = pages,
            posts = ?page.post_ids(),
            total = page.total,
            cursor = ?page.cursor,
            "Fetched feed page"
        );
        if first.is_none() {
            first = page.posts.first().map(|post| post.id().to_string());
        }
        match page.cursor {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }
    Ok(first)
}

fn seed(store: &MemoryDocumentStore, posts: usize) {
    for (id, name) in DEMO_USERS {
        store.insert_user(&UserSummary {
            id: id.to_string(),
            name: name.to_string(),
            username: name.to_lowercase(),
            image_url: format!("memory://avatars/{id}"),
        });
    }

    let start = OffsetDateTime::now_utc() - time::Duration::hours(posts as i64);
    for index in 0..posts {
        let (creator, _) = DEMO_USERS[index % DEMO_USERS.len()];
        let liked_user_ids = DEMO_USERS
            .iter()
            .take(index % (DEMO_USERS.len() + 1))
            .map(|(id, _)| id.to_string())
            .collect();
        store.insert_post(&PostRecord {
            id: format!("post-{:03}", index + 1),
            creator_id: creator.to_string(),
            caption: DEMO_CAPTIONS[index % DEMO_CAPTIONS.len()].to_string(),
            location: None,
            image_id: format!("seed-{}", index + 1),
            image_url: format!("memory://media/seed-{}", index + 1),
            tags: vec!["seed".to_string()],
            liked_user_ids,
            created_at: start + time::Duration::hours(index as i64),
        });
    }
    info!(posts, users = DEMO_USERS.len(), "Seeded store");
}
