//! Postgres read access to the host site's content tables.

use async_trait::async_trait;
use sqlx::query_as;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::application::repos::{ContentRepo, RepoError};
use crate::domain::content::{ContentStatus, PostContent, TermContent, TermRef};

use super::{PostgresRepositories, map_sqlx_error};

#[derive(sqlx::FromRow)]
struct PostRow {
    id: Uuid,
    slug: String,
    status: String,
    author_slug: Option<String>,
    published_at: Option<OffsetDateTime>,
    is_front_page: bool,
    term_taxonomies: Vec<String>,
    term_slugs: Vec<String>,
}

#[derive(sqlx::FromRow)]
struct TermRow {
    id: Uuid,
    slug: String,
    taxonomy: String,
    public: bool,
}

fn parse_status(raw: &str) -> Result<ContentStatus, RepoError> {
    ContentStatus::try_from(raw).map_err(|err| RepoError::Integrity {
        message: err.to_string(),
    })
}

impl TryFrom<PostRow> for PostContent {
    type Error = RepoError;

    fn try_from(row: PostRow) -> Result<Self, Self::Error> {
        let status = parse_status(&row.status)?;
        let terms = row
            .term_taxonomies
            .into_iter()
            .zip(row.term_slugs)
            .map(|(taxonomy, slug)| TermRef { taxonomy, slug })
            .collect();
        Ok(PostContent {
            id: row.id,
            slug: row.slug,
            status,
            author_slug: row.author_slug,
            published_at: row.published_at,
            terms,
            is_front_page: row.is_front_page,
        })
    }
}

#[async_trait]
impl ContentRepo for PostgresRepositories {
    async fn find_post(&self, id: Uuid) -> Result<Option<PostContent>, RepoError> {
        let row: Option<PostRow> = query_as(
            "SELECT p.id, p.slug, p.status, p.author_slug, p.published_at, p.is_front_page, \
                 COALESCE(array_agg(t.taxonomy) FILTER (WHERE t.id IS NOT NULL), '{}') \
                     AS term_taxonomies, \
                 COALESCE(array_agg(t.slug) FILTER (WHERE t.id IS NOT NULL), '{}') \
                     AS term_slugs \
             FROM posts p \
             LEFT JOIN post_terms pt ON pt.post_id = p.id \
             LEFT JOIN terms t ON t.id = pt.term_id \
             WHERE p.id = $1 \
             GROUP BY p.id",
        )
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        row.map(PostContent::try_from).transpose()
    }

    async fn find_term(&self, id: Uuid) -> Result<Option<TermContent>, RepoError> {
        let row: Option<TermRow> = query_as(
            "SELECT id, slug, taxonomy, public FROM terms WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.map(|row| TermContent {
            id: row.id,
            slug: row.slug,
            taxonomy: row.taxonomy,
            public: row.public,
        }))
    }
}
