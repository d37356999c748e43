//! Content entity records consumed by the purge object resolver.
//!
//! These mirror the host site's content model closely enough to expand an
//! entity into the URLs that represent it. Scopa does not own the content
//! schema; the records are read through [`crate::application::repos::ContentRepo`].

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::error::DomainError;

/// Publication status of a content entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentStatus {
    Draft,
    Published,
    Archived,
}

impl ContentStatus {
    pub fn is_public(self) -> bool {
        matches!(self, ContentStatus::Published)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ContentStatus::Draft => "draft",
            ContentStatus::Published => "published",
            ContentStatus::Archived => "archived",
        }
    }
}

impl TryFrom<&str> for ContentStatus {
    type Error = DomainError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "draft" => Ok(ContentStatus::Draft),
            "published" => Ok(ContentStatus::Published),
            "archived" => Ok(ContentStatus::Archived),
            _ => Err(DomainError::validation(format!(
                "unknown content status `{value}`"
            ))),
        }
    }
}

/// A post as the resolver sees it.
#[derive(Debug, Clone)]
pub struct PostContent {
    pub id: Uuid,
    pub slug: String,
    pub status: ContentStatus,
    /// Slug of the author archive this post appears under.
    pub author_slug: Option<String>,
    pub published_at: Option<OffsetDateTime>,
    /// Slugs of taxonomy terms attached to the post, `taxonomy` paired.
    pub terms: Vec<TermRef>,
    /// Whether the post is the configured home page.
    pub is_front_page: bool,
}

/// Lightweight reference to a term a post is filed under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TermRef {
    pub taxonomy: String,
    pub slug: String,
}

/// A taxonomy term as the resolver sees it.
#[derive(Debug, Clone)]
pub struct TermContent {
    pub id: Uuid,
    pub slug: String,
    pub taxonomy: String,
    /// Non-public taxonomies have no archive URLs to purge.
    pub public: bool,
}
