//! Collaborator traits describing the document store, media storage and session.

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;
use time::OffsetDateTime;

use crate::domain::entities::SessionUser;
use crate::domain::uploads::{MediaFile, UploadedMedia};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("`{collection}` document `{id}` not found")]
    NotFound { collection: String, id: String },
    #[error("transient store failure: {0}")]
    Transient(String),
    #[error("document conflicts with an existing record: {message}")]
    Conflict { message: String },
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
}

impl StoreError {
    pub fn not_found(collection: Collection, id: impl Into<String>) -> Self {
        Self::NotFound {
            collection: collection.as_str().to_string(),
            id: id.into(),
        }
    }

    pub fn transient(err: impl std::fmt::Display) -> Self {
        Self::Transient(err.to_string())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Users,
    Posts,
    Saves,
}

impl Collection {
    pub fn as_str(self) -> &'static str {
        match self {
            Collection::Users => "users",
            Collection::Posts => "posts",
            Collection::Saves => "saves",
        }
    }
}

/// A stored document: server-assigned id and creation time plus its fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub created_at: OffsetDateTime,
    pub fields: Map<String, Value>,
}

impl Document {
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Field equals the given value.
    Equal { field: String, value: Value },
    /// Document id is one of the given ids.
    IdIn(Vec<String>),
    /// Full-text match on a string field.
    Search { field: String, term: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Ordering {
    #[default]
    CreatedDesc,
    CreatedAsc,
}

/// Parameters of a `list_documents` call.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ListQuery {
    pub filters: Vec<Filter>,
    pub ordering: Ordering,
    pub limit: Option<u32>,
    /// Continue strictly after the document with this id.
    pub cursor_after: Option<String>,
}

impl ListQuery {
    pub fn newest_first() -> Self {
        Self::default()
    }

    pub fn equal(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Equal {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    pub fn ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.filters
            .push(Filter::IdIn(ids.into_iter().map(Into::into).collect()));
        self
    }

    pub fn search(mut self, field: impl Into<String>, term: impl Into<String>) -> Self {
        self.filters.push(Filter::Search {
            field: field.into(),
            term: term.into(),
        });
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn after(mut self, cursor: Option<String>) -> Self {
        self.cursor_after = cursor;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct DocumentList {
    pub documents: Vec<Document>,
    /// Number of documents matching the filters, ignoring cursor and limit.
    pub total: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentId {
    Generate,
    Given(String),
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn list_documents(
        &self,
        collection: Collection,
        query: &ListQuery,
    ) -> Result<DocumentList, StoreError>;

    async fn get_document(&self, collection: Collection, id: &str)
    -> Result<Document, StoreError>;

    async fn create_document(
        &self,
        collection: Collection,
        id: DocumentId,
        fields: Map<String, Value>,
    ) -> Result<Document, StoreError>;

    /// Merge `fields` into an existing document.
    async fn update_document(
        &self,
        collection: Collection,
        id: &str,
        fields: Map<String, Value>,
    ) -> Result<Document, StoreError>;

    async fn delete_document(&self, collection: Collection, id: &str) -> Result<(), StoreError>;
}

#[async_trait]
pub trait MediaStorage: Send + Sync {
    async fn upload(&self, file: MediaFile) -> Result<UploadedMedia, StoreError>;

    async fn remove(&self, id: &str) -> Result<(), StoreError>;
}

pub trait CurrentUser: Send + Sync {
    fn current_user(&self) -> Option<SessionUser>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_query_builder_accumulates_filters() {
        let query = ListQuery::newest_first()
            .equal("creator", "u1")
            .search("caption", "sea")
            .limit(11)
            .after(Some("p9".to_string()));

        assert_eq!(query.filters.len(), 2);
        assert_eq!(query.ordering, Ordering::CreatedDesc);
        assert_eq!(query.limit, Some(11));
        assert_eq!(query.cursor_after.as_deref(), Some("p9"));
    }

    #[test]
    fn store_error_helpers() {
        let err = StoreError::not_found(Collection::Posts, "p1");
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "`posts` document `p1` not found");
        assert!(StoreError::conflict("dup").is_conflict());
    }
}
