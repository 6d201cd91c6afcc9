//! Cache key definitions.
//!
//! Defines `QueryDescriptor`, the canonical identity of a cached query, and
//! `QueryKind` for family-wide invalidation.

use std::fmt;

/// Family a descriptor belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryKind {
    /// Cursor-paged home feed
    Feed,
    /// A user's saved index
    Saved,
    /// Caption search results
    Search,
    /// Posts authored by one user
    UserPosts,
    /// Single post detail
    Post,
}

impl QueryKind {
    pub fn as_str(self) -> &'static str {
        match self {
            QueryKind::Feed => "feed",
            QueryKind::Saved => "saved",
            QueryKind::Search => "search",
            QueryKind::UserPosts => "user_posts",
            QueryKind::Post => "post",
        }
    }
}

/// Structural identity of a cached query.
///
/// Two descriptors with equal fields address the same entry. Use the
/// constructors to get canonical values (trimmed search terms).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum QueryDescriptor {
    Feed {
        cursor: Option<String>,
        page_size: u32,
    },
    Saved {
        user_id: String,
    },
    Search {
        term: String,
    },
    UserPosts {
        user_id: String,
    },
    Post {
        post_id: String,
    },
}

impl QueryDescriptor {
    pub fn feed(cursor: Option<String>, page_size: u32) -> Self {
        Self::Feed { cursor, page_size }
    }

    pub fn saved(user_id: impl Into<String>) -> Self {
        Self::Saved {
            user_id: user_id.into(),
        }
    }

    pub fn search(term: &str) -> Self {
        Self::Search {
            term: term.trim().to_string(),
        }
    }

    pub fn user_posts(user_id: impl Into<String>) -> Self {
        Self::UserPosts {
            user_id: user_id.into(),
        }
    }

    pub fn post(post_id: impl Into<String>) -> Self {
        Self::Post {
            post_id: post_id.into(),
        }
    }

    pub fn kind(&self) -> QueryKind {
        match self {
            QueryDescriptor::Feed { .. } => QueryKind::Feed,
            QueryDescriptor::Saved { .. } => QueryKind::Saved,
            QueryDescriptor::Search { .. } => QueryKind::Search,
            QueryDescriptor::UserPosts { .. } => QueryKind::UserPosts,
            QueryDescriptor::Post { .. } => QueryKind::Post,
        }
    }
}

impl fmt::Display for QueryDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryDescriptor::Feed { cursor, page_size } => write!(
                f,
                "feed[{}; {page_size}]",
                cursor.as_deref().unwrap_or("start")
            ),
            QueryDescriptor::Saved { user_id } => write!(f, "saved[{user_id}]"),
            QueryDescriptor::Search { term } => write!(f, "search[{term}]"),
            QueryDescriptor::UserPosts { user_id } => write!(f, "user_posts[{user_id}]"),
            QueryDescriptor::Post { post_id } => write!(f, "post[{post_id}]"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn descriptor_equality_is_structural() {
        let a = QueryDescriptor::feed(Some("p9".to_string()), 10);
        let b = QueryDescriptor::feed(Some("p9".to_string()), 10);
        assert_eq!(a, b);
        assert_eq!(HashSet::from([a.clone(), b.clone()]).len(), 1);

        assert_ne!(a, QueryDescriptor::feed(Some("p9".to_string()), 20));
        assert_ne!(a, QueryDescriptor::feed(None, 10));
    }

    #[test]
    fn search_terms_are_trimmed() {
        assert_eq!(
            QueryDescriptor::search("  sunset "),
            QueryDescriptor::search("sunset")
        );
    }

    #[test]
    fn kind_groups_descriptors() {
        assert_eq!(QueryDescriptor::feed(None, 10).kind(), QueryKind::Feed);
        assert_eq!(QueryDescriptor::saved("u1").kind(), QueryKind::Saved);
        assert_eq!(QueryDescriptor::post("p1").kind(), QueryKind::Post);
        assert_ne!(
            QueryDescriptor::saved("u1").kind(),
            QueryDescriptor::user_posts("u1").kind()
        );
    }

    #[test]
    fn display_names_the_family() {
        assert_eq!(QueryDescriptor::feed(None, 10).to_string(), "feed[start; 10]");
        assert_eq!(QueryDescriptor::user_posts("u2").to_string(), "user_posts[u2]");
    }
}
