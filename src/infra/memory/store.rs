use std::cmp::Ordering as CmpOrdering;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use time::OffsetDateTime;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::application::records::saved_fields;
use crate::application::repos::{
    Collection, Document, DocumentId, DocumentList, DocumentStore, Filter, ListQuery, Ordering,
    StoreError,
};
use crate::cache::mutex_lock;
use crate::domain::entities::{PostRecord, UserSummary};

const SOURCE: &str = "infra::memory::store";

/// Document store operation, used to count calls and inject faults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    List,
    Get,
    Create,
    Update,
    Delete,
}

#[derive(Debug, Clone)]
struct StoredDocument {
    seq: u64,
    document: Document,
}

impl StoredDocument {
    fn cmp_created(&self, other: &Self) -> CmpOrdering {
        self.document
            .created_at
            .cmp(&other.document.created_at)
            .then(self.seq.cmp(&other.seq))
    }
}

#[derive(Debug, Clone)]
struct Fault {
    op: StoreOp,
    collection: Collection,
    error: StoreError,
    persistent: bool,
}

#[derive(Debug, Default)]
struct State {
    collections: HashMap<Collection, Vec<StoredDocument>>,
    next_seq: u64,
    faults: Vec<Fault>,
    latency: HashMap<(Collection, Option<String>), Duration>,
    calls: HashMap<StoreOp, usize>,
    unique: HashMap<Collection, Vec<String>>,
}

impl State {
    fn documents(&self, collection: Collection) -> &[StoredDocument] {
        self.collections
            .get(&collection)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    fn push(&mut self, collection: Collection, document: Document) {
        self.next_seq += 1;
        let seq = self.next_seq;
        self.collections
            .entry(collection)
            .or_default()
            .push(StoredDocument { seq, document });
    }

    fn take_fault(&mut self, op: StoreOp, collection: Collection) -> Option<StoreError> {
        let index = self
            .faults
            .iter()
            .position(|fault| fault.op == op && fault.collection == collection)?;
        if self.faults[index].persistent {
            Some(self.faults[index].error.clone())
        } else {
            Some(self.faults.remove(index).error)
        }
    }

    fn violates_unique(&self, collection: Collection, fields: &Map<String, Value>) -> bool {
        let Some(keys) = self.unique.get(&collection) else {
            return false;
        };
        self.documents(collection).iter().any(|stored| {
            keys.iter()
                .all(|key| stored.document.fields.get(key) == fields.get(key))
        })
    }
}

/// In-process [`DocumentStore`] with fault injection and call accounting.
///
/// Documents list newest first by creation time, ties broken by insertion
/// order. Faults registered with [`fail_next`](Self::fail_next) fire once;
/// [`fail_always`](Self::fail_always) faults stay until cleared.
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    state: Mutex<State>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject creates whose `fields` all equal those of an existing document.
    pub fn with_unique(self, collection: Collection, fields: &[&str]) -> Self {
        mutex_lock(&self.state, SOURCE, "with_unique")
            .unique
            .insert(collection, fields.iter().map(|f| f.to_string()).collect());
        self
    }

    pub fn insert(
        &self,
        collection: Collection,
        id: impl Into<String>,
        created_at: OffsetDateTime,
        fields: Map<String, Value>,
    ) -> Document {
        let document = Document {
            id: id.into(),
            created_at,
            fields,
        };
        mutex_lock(&self.state, SOURCE, "insert").push(collection, document.clone());
        document
    }

    pub fn insert_user(&self, user: &UserSummary) -> Document {
        let fields = object(json!({
            "name": user.name,
            "username": user.username,
            "imageUrl": user.image_url,
        }));
        self.insert(Collection::Users, &user.id, OffsetDateTime::now_utc(), fields)
    }

    pub fn insert_post(&self, post: &PostRecord) -> Document {
        let fields = object(json!({
            "creator": post.creator_id,
            "caption": post.caption,
            "location": post.location,
            "imageId": post.image_id,
            "imageUrl": post.image_url,
            "tags": post.tags,
            "likes": post.liked_user_ids.iter().collect::<Vec<_>>(),
        }));
        self.insert(Collection::Posts, &post.id, post.created_at, fields)
    }

    pub fn insert_saved(&self, id: &str, user_id: &str, post_id: &str) -> Document {
        self.insert(
            Collection::Saves,
            id,
            OffsetDateTime::now_utc(),
            saved_fields(user_id, post_id),
        )
    }

    pub fn document(&self, collection: Collection, id: &str) -> Option<Document> {
        let state = mutex_lock(&self.state, SOURCE, "document");
        state
            .documents(collection)
            .iter()
            .find(|stored| stored.document.id == id)
            .map(|stored| stored.document.clone())
    }

    /// All documents of `collection`, newest first.
    pub fn documents(&self, collection: Collection) -> Vec<Document> {
        let state = mutex_lock(&self.state, SOURCE, "documents");
        let mut stored = state.documents(collection).to_vec();
        stored.sort_by(|a, b| b.cmp_created(a));
        stored.into_iter().map(|stored| stored.document).collect()
    }

    pub fn count(&self, collection: Collection) -> usize {
        mutex_lock(&self.state, SOURCE, "count")
            .documents(collection)
            .len()
    }

    pub fn fail_next(&self, op: StoreOp, collection: Collection, error: StoreError) {
        self.add_fault(op, collection, error, false);
    }

    pub fn fail_always(&self, op: StoreOp, collection: Collection, error: StoreError) {
        self.add_fault(op, collection, error, true);
    }

    pub fn clear_faults(&self) {
        mutex_lock(&self.state, SOURCE, "clear_faults").faults.clear();
    }

    /// Delay calls touching `collection`. With an `id`, only reads of that
    /// document are delayed.
    pub fn set_latency(&self, collection: Collection, id: Option<&str>, latency: Duration) {
        mutex_lock(&self.state, SOURCE, "set_latency")
            .latency
            .insert((collection, id.map(str::to_string)), latency);
    }

    pub fn calls(&self, op: StoreOp) -> usize {
        mutex_lock(&self.state, SOURCE, "calls")
            .calls
            .get(&op)
            .copied()
            .unwrap_or(0)
    }

    fn add_fault(&self, op: StoreOp, collection: Collection, error: StoreError, persistent: bool) {
        mutex_lock(&self.state, SOURCE, "add_fault").faults.push(Fault {
            op,
            collection,
            error,
            persistent,
        });
    }

    /// Count the call, wait out any configured latency, then fire a fault if
    /// one is registered for this operation.
    async fn enter(
        &self,
        op: StoreOp,
        collection: Collection,
        id: Option<&str>,
    ) -> Result<(), StoreError> {
        let delay = {
            let mut state = mutex_lock(&self.state, SOURCE, "enter");
            *state.calls.entry(op).or_default() += 1;
            id.and_then(|id| state.latency.get(&(collection, Some(id.to_string()))))
                .or_else(|| state.latency.get(&(collection, None)))
                .copied()
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let fault = mutex_lock(&self.state, SOURCE, "enter").take_fault(op, collection);
        match fault {
            Some(error) => {
                debug!(?op, collection = collection.as_str(), error = %error, "Injected fault");
                Err(error)
            }
            None => Ok(()),
        }
    }
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn filter_matches(document: &Document, filter: &Filter) -> bool {
    match filter {
        Filter::Equal { field, value } => document.fields.get(field) == Some(value),
        Filter::IdIn(ids) => ids.iter().any(|id| id == &document.id),
        Filter::Search { field, term } => {
            let term = term.to_lowercase();
            document
                .fields
                .get(field)
                .and_then(Value::as_str)
                .is_some_and(|text| text.to_lowercase().contains(&term))
        }
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn list_documents(
        &self,
        collection: Collection,
        query: &ListQuery,
    ) -> Result<DocumentList, StoreError> {
        self.enter(StoreOp::List, collection, None).await?;

        let state = mutex_lock(&self.state, SOURCE, "list_documents");
        let all = state.documents(collection);
        let anchor = match &query.cursor_after {
            Some(cursor) => Some(
                all.iter()
                    .find(|stored| &stored.document.id == cursor)
                    .cloned()
                    .ok_or_else(|| {
                        StoreError::invalid_input(format!("cursor document `{cursor}` not found"))
                    })?,
            ),
            None => None,
        };

        let mut selected: Vec<&StoredDocument> = all
            .iter()
            .filter(|stored| {
                query
                    .filters
                    .iter()
                    .all(|filter| filter_matches(&stored.document, filter))
            })
            .collect();
        match query.ordering {
            Ordering::CreatedDesc => selected.sort_by(|a, b| b.cmp_created(a)),
            Ordering::CreatedAsc => selected.sort_by(|a, b| a.cmp_created(b)),
        }
        let total = selected.len() as u64;

        let documents: Vec<Document> = selected
            .into_iter()
            .filter(|stored| match &anchor {
                Some(anchor) => match query.ordering {
                    Ordering::CreatedDesc => stored.cmp_created(anchor) == CmpOrdering::Less,
                    Ordering::CreatedAsc => stored.cmp_created(anchor) == CmpOrdering::Greater,
                },
                None => true,
            })
            .take(query.limit.map_or(usize::MAX, |limit| limit as usize))
            .map(|stored| stored.document.clone())
            .collect();

        trace!(
            collection = collection.as_str(),
            returned = documents.len(),
            total,
            "Listed documents"
        );
        Ok(DocumentList { documents, total })
    }

    async fn get_document(
        &self,
        collection: Collection,
        id: &str,
    ) -> Result<Document, StoreError> {
        self.enter(StoreOp::Get, collection, Some(id)).await?;
        self.document(collection, id)
            .ok_or_else(|| StoreError::not_found(collection, id))
    }

    async fn create_document(
        &self,
        collection: Collection,
        id: DocumentId,
        fields: Map<String, Value>,
    ) -> Result<Document, StoreError> {
        self.enter(StoreOp::Create, collection, None).await?;

        let mut state = mutex_lock(&self.state, SOURCE, "create_document");
        let id = match id {
            DocumentId::Given(id) => id,
            DocumentId::Generate => Uuid::new_v4().simple().to_string(),
        };
        if state
            .documents(collection)
            .iter()
            .any(|stored| stored.document.id == id)
        {
            return Err(StoreError::conflict(format!(
                "`{}` document `{id}` already exists",
                collection.as_str()
            )));
        }
        if state.violates_unique(collection, &fields) {
            return Err(StoreError::conflict(format!(
                "`{}` document with the same unique fields already exists",
                collection.as_str()
            )));
        }

        let document = Document {
            id,
            created_at: OffsetDateTime::now_utc(),
            fields,
        };
        state.push(collection, document.clone());
        Ok(document)
    }

    async fn update_document(
        &self,
        collection: Collection,
        id: &str,
        fields: Map<String, Value>,
    ) -> Result<Document, StoreError> {
        self.enter(StoreOp::Update, collection, Some(id)).await?;

        let mut state = mutex_lock(&self.state, SOURCE, "update_document");
        let stored = state
            .collections
            .get_mut(&collection)
            .and_then(|documents| documents.iter_mut().find(|stored| stored.document.id == id))
            .ok_or_else(|| StoreError::not_found(collection, id))?;
        stored.document.fields.extend(fields);
        Ok(stored.document.clone())
    }

    async fn delete_document(&self, collection: Collection, id: &str) -> Result<(), StoreError> {
        self.enter(StoreOp::Delete, collection, Some(id)).await?;

        let mut state = mutex_lock(&self.state, SOURCE, "delete_document");
        let documents = state.collections.entry(collection).or_default();
        let before = documents.len();
        documents.retain(|stored| stored.document.id != id);
        if documents.len() == before {
            return Err(StoreError::not_found(collection, id));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use time::Duration as TimeDuration;

    use super::*;

    fn at(minutes: i64) -> OffsetDateTime {
        OffsetDateTime::UNIX_EPOCH + TimeDuration::minutes(minutes)
    }

    fn seeded() -> MemoryDocumentStore {
        let store = MemoryDocumentStore::new();
        for (index, caption) in ["Sunset pier", "Morning run", "sunset again"].iter().enumerate() {
            store.insert(
                Collection::Posts,
                format!("p{}", index + 1),
                at(index as i64),
                object(json!({ "caption": caption, "creator": "u1" })),
            );
        }
        store
    }

    fn ids(list: &DocumentList) -> Vec<&str> {
        list.documents.iter().map(|doc| doc.id.as_str()).collect()
    }

    #[tokio::test]
    async fn lists_newest_first_with_cursor_and_total() {
        let store = seeded();

        let first = store
            .list_documents(Collection::Posts, &ListQuery::newest_first().limit(2))
            .await
            .unwrap();
        assert_eq!(ids(&first), vec!["p3", "p2"]);
        assert_eq!(first.total, 3);

        let query = ListQuery::newest_first()
            .limit(2)
            .after(Some("p2".to_string()));
        let second = store.list_documents(Collection::Posts, &query).await.unwrap();
        assert_eq!(ids(&second), vec!["p1"]);
        assert_eq!(second.total, 3);
    }

    #[tokio::test]
    async fn unknown_cursor_is_invalid_input() {
        let store = seeded();
        let query = ListQuery::newest_first().after(Some("gone".to_string()));

        let err = store
            .list_documents(Collection::Posts, &query)
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::InvalidInput { .. }));
    }

    #[tokio::test]
    async fn search_is_case_insensitive() {
        let store = seeded();
        let query = ListQuery::newest_first().search("caption", "SUNSET");

        let found = store.list_documents(Collection::Posts, &query).await.unwrap();

        assert_eq!(ids(&found), vec!["p3", "p1"]);
    }

    #[tokio::test]
    async fn one_shot_fault_fires_once() {
        let store = seeded();
        store.fail_next(StoreOp::Get, Collection::Posts, StoreError::transient("down"));

        assert!(store.get_document(Collection::Posts, "p1").await.is_err());
        assert!(store.get_document(Collection::Posts, "p1").await.is_ok());
        assert_eq!(store.calls(StoreOp::Get), 2);
    }

    #[tokio::test]
    async fn unique_fields_reject_duplicates() {
        let store =
            MemoryDocumentStore::new().with_unique(Collection::Saves, &["userId", "postId"]);
        store
            .create_document(Collection::Saves, DocumentId::Generate, saved_fields("u1", "p1"))
            .await
            .unwrap();

        let err = store
            .create_document(Collection::Saves, DocumentId::Generate, saved_fields("u1", "p1"))
            .await
            .unwrap_err();

        assert!(err.is_conflict());
        assert_eq!(store.count(Collection::Saves), 1);
    }

    #[tokio::test]
    async fn update_merges_and_delete_reports_missing() {
        let store = seeded();

        let updated = store
            .update_document(Collection::Posts, "p1", object(json!({ "caption": "edited" })))
            .await
            .unwrap();
        assert_eq!(updated.field("caption"), Some(&json!("edited")));
        assert_eq!(updated.field("creator"), Some(&json!("u1")));

        store.delete_document(Collection::Posts, "p1").await.unwrap();
        let err = store
            .delete_document(Collection::Posts, "p1")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
