//! Mapping between store documents and domain entities.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};

use crate::application::repos::Document;
use crate::domain::entities::{PostRecord, SavedRecord, UserSummary};
use crate::domain::error::DomainError;
use crate::domain::posts::normalize_tags;

pub const POST_CREATOR: &str = "creator";
pub const POST_CAPTION: &str = "caption";
pub const POST_LIKES: &str = "likes";
pub const SAVE_USER: &str = "userId";
pub const SAVE_POST: &str = "postId";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PostFields {
    creator: String,
    caption: String,
    #[serde(default)]
    location: Option<String>,
    image_id: String,
    image_url: String,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    likes: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserFields {
    name: String,
    username: String,
    #[serde(default)]
    image_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SavedFields {
    user_id: String,
    post_id: String,
}

/// Field values written when a post is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostDraft {
    pub creator_id: String,
    pub caption: String,
    pub location: Option<String>,
    pub image_id: String,
    pub image_url: String,
    pub tags: Vec<String>,
}

/// Field values written when a post's content is edited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostContent {
    pub caption: String,
    pub location: Option<String>,
    pub image_id: String,
    pub image_url: String,
    pub tags: Vec<String>,
}

fn decode_fields<T: DeserializeOwned>(
    document: &Document,
    entity: &'static str,
) -> Result<T, DomainError> {
    serde_json::from_value(Value::Object(document.fields.clone()))
        .map_err(|err| DomainError::malformed(entity, document.id.clone(), err.to_string()))
}

fn into_map<T: Serialize>(value: &T) -> Map<String, Value> {
    match serde_json::to_value(value) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    }
}

pub fn decode_post(document: &Document) -> Result<PostRecord, DomainError> {
    let fields: PostFields = decode_fields(document, "post")?;
    Ok(PostRecord {
        id: document.id.clone(),
        creator_id: fields.creator,
        caption: fields.caption,
        location: fields.location,
        image_id: fields.image_id,
        image_url: fields.image_url,
        tags: normalize_tags(fields.tags),
        liked_user_ids: fields.likes.into_iter().collect(),
        created_at: document.created_at,
    })
}

pub fn decode_user(document: &Document) -> Result<UserSummary, DomainError> {
    let fields: UserFields = decode_fields(document, "user")?;
    Ok(UserSummary {
        id: document.id.clone(),
        name: fields.name,
        username: fields.username,
        image_url: fields.image_url,
    })
}

pub fn decode_saved(document: &Document) -> Result<SavedRecord, DomainError> {
    let fields: SavedFields = decode_fields(document, "saved")?;
    Ok(SavedRecord {
        id: document.id.clone(),
        user_id: fields.user_id,
        post_id: fields.post_id,
    })
}

pub fn post_fields(draft: &PostDraft) -> Map<String, Value> {
    into_map(&PostFields {
        creator: draft.creator_id.clone(),
        caption: draft.caption.clone(),
        location: draft.location.clone(),
        image_id: draft.image_id.clone(),
        image_url: draft.image_url.clone(),
        tags: draft.tags.clone(),
        likes: Vec::new(),
    })
}

pub fn content_fields(content: &PostContent) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert(POST_CAPTION.to_string(), Value::from(content.caption.clone()));
    map.insert(
        "location".to_string(),
        content
            .location
            .clone()
            .map(Value::from)
            .unwrap_or(Value::Null),
    );
    map.insert("imageId".to_string(), Value::from(content.image_id.clone()));
    map.insert("imageUrl".to_string(), Value::from(content.image_url.clone()));
    map.insert("tags".to_string(), Value::from(content.tags.clone()));
    map
}

pub fn likes_fields(liked_user_ids: &BTreeSet<String>) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert(
        POST_LIKES.to_string(),
        Value::from(liked_user_ids.iter().cloned().collect::<Vec<_>>()),
    );
    map
}

pub fn saved_fields(user_id: &str, post_id: &str) -> Map<String, Value> {
    into_map(&SavedFields {
        user_id: user_id.to_string(),
        post_id: post_id.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use time::OffsetDateTime;

    use super::*;

    fn document(id: &str, fields: Value) -> Document {
        let Value::Object(fields) = fields else {
            panic!("fields must be an object");
        };
        Document {
            id: id.to_string(),
            created_at: OffsetDateTime::UNIX_EPOCH,
            fields,
        }
    }

    #[test]
    fn decodes_post_with_optional_fields_missing() {
        let doc = document(
            "p1",
            json!({
                "creator": "u1",
                "caption": "sunset",
                "imageId": "f1",
                "imageUrl": "https://cdn/f1",
                "tags": ["sea", "sea", "sky"],
                "likes": ["u3", "u2"],
            }),
        );

        let post = decode_post(&doc).expect("post decodes");
        assert_eq!(post.id, "p1");
        assert_eq!(post.location, None);
        assert_eq!(post.tags, vec!["sea", "sky"]);
        assert_eq!(
            post.liked_user_ids.iter().collect::<Vec<_>>(),
            vec!["u2", "u3"]
        );
    }

    #[test]
    fn malformed_post_reports_document_id() {
        let doc = document("p2", json!({ "caption": 3 }));
        let err = decode_post(&doc).expect_err("missing fields rejected");
        assert!(matches!(err, DomainError::Malformed { ref id, .. } if id == "p2"));
    }

    #[test]
    fn post_fields_round_trip_through_decode() {
        let draft = PostDraft {
            creator_id: "u1".to_string(),
            caption: "hello".to_string(),
            location: Some("Alexandria".to_string()),
            image_id: "f9".to_string(),
            image_url: "https://cdn/f9".to_string(),
            tags: vec!["a".to_string()],
        };
        let doc = Document {
            id: "p3".to_string(),
            created_at: OffsetDateTime::UNIX_EPOCH,
            fields: post_fields(&draft),
        };

        let post = decode_post(&doc).expect("post decodes");
        assert_eq!(post.creator_id, "u1");
        assert_eq!(post.location.as_deref(), Some("Alexandria"));
        assert!(post.liked_user_ids.is_empty());
    }

    #[test]
    fn saved_fields_use_store_names() {
        let map = saved_fields("u1", "p1");
        assert_eq!(map.get(SAVE_USER), Some(&json!("u1")));
        assert_eq!(map.get(SAVE_POST), Some(&json!("p1")));
    }

    #[test]
    fn likes_fields_are_sorted() {
        let liked: BTreeSet<String> = ["b".to_string(), "a".to_string()].into_iter().collect();
        assert_eq!(likes_fields(&liked).get(POST_LIKES), Some(&json!(["a", "b"])));
    }
}
