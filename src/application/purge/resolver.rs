//! Purge object resolution.
//!
//! Expands a content entity into the ordered, deduplicated URL set that must
//! be invalidated when the entity changes: the canonical permalink plus the
//! index, archive, and feed pages that list it.

use std::collections::HashSet;
use std::sync::Arc;

use time::OffsetDateTime;
use tracing::warn;
use url::Url;
use uuid::Uuid;

use crate::application::repos::{ContentRepo, RepoError};
use crate::domain::content::{PostContent, TermContent};

/// A content entity to expand, dispatched by a closed variant set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurgeTarget {
    Post(Uuid),
    Term(Uuid),
}

/// Knobs controlling which derived URLs are included.
#[derive(Debug, Clone, Copy)]
pub struct ResolveOptions {
    pub include_archives: bool,
    pub include_feeds: bool,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            include_archives: true,
            include_feeds: true,
        }
    }
}

/// Why a target produced no URLs. Never escalated to an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NotFound,
    NotPublic,
}

/// Outcome of resolving one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Urls(Vec<String>),
    Skipped(SkipReason),
}

impl Resolution {
    pub fn urls(&self) -> &[String] {
        match self {
            Resolution::Urls(urls) => urls,
            Resolution::Skipped(_) => &[],
        }
    }
}

/// URL construction for the configured site.
#[derive(Debug, Clone)]
pub struct SiteUrls {
    base: Url,
    /// How many paginated index pages beyond the first to purge.
    archive_depth: u32,
}

impl SiteUrls {
    pub fn new(mut base: Url, archive_depth: u32) -> Self {
        // Url::join treats a path without a trailing slash as a file.
        if !base.path().ends_with('/') {
            base.set_path(&format!("{}/", base.path()));
        }
        Self {
            base,
            archive_depth,
        }
    }

    pub fn front_page(&self) -> String {
        self.base.to_string()
    }

    /// A path that does not resolve against the base yields no URL at all;
    /// it must never widen the purge to the front page.
    fn at(&self, path: &str) -> Option<String> {
        match self.base.join(path) {
            Ok(url) => Some(url.to_string()),
            Err(error) => {
                warn!(path, %error, "Dropping purge path that does not resolve");
                None
            }
        }
    }

    pub fn permalink(&self, slug: &str) -> Option<String> {
        self.at(&format!("{slug}/"))
    }

    pub fn index_page(&self, page: u32) -> Option<String> {
        self.at(&format!("page/{page}/"))
    }

    pub fn author_archive(&self, author_slug: &str) -> Option<String> {
        self.at(&format!("author/{author_slug}/"))
    }

    pub fn date_archive(&self, published_at: OffsetDateTime) -> Option<String> {
        self.at(&format!(
            "{:04}/{:02}/",
            published_at.year(),
            u8::from(published_at.month())
        ))
    }

    pub fn term_archive(&self, taxonomy: &str, slug: &str) -> Option<String> {
        self.at(&format!("{taxonomy}/{slug}/"))
    }

    pub fn term_archive_page(&self, taxonomy: &str, slug: &str, page: u32) -> Option<String> {
        self.at(&format!("{taxonomy}/{slug}/page/{page}/"))
    }

    pub fn feed(&self) -> Option<String> {
        self.at("feed/")
    }

    pub fn term_feed(&self, taxonomy: &str, slug: &str) -> Option<String> {
        self.at(&format!("{taxonomy}/{slug}/feed/"))
    }

    pub fn archive_depth(&self) -> u32 {
        self.archive_depth
    }
}

/// Resolves purge targets into URL sets through the host content repository.
pub struct PurgeObjectResolver {
    content: Arc<dyn ContentRepo>,
    site: SiteUrls,
}

impl PurgeObjectResolver {
    pub fn new(content: Arc<dyn ContentRepo>, site: SiteUrls) -> Self {
        Self { content, site }
    }

    /// Expand a target into its URL set.
    ///
    /// Deterministic for unchanged content. A deleted or non-public entity
    /// resolves to [`Resolution::Skipped`]; only repository failures error.
    pub async fn resolve(
        &self,
        target: PurgeTarget,
        options: ResolveOptions,
    ) -> Result<Resolution, RepoError> {
        match target {
            PurgeTarget::Post(id) => {
                let Some(post) = self.content.find_post(id).await? else {
                    return Ok(Resolution::Skipped(SkipReason::NotFound));
                };
                Ok(self.expand_post(&post, options))
            }
            PurgeTarget::Term(id) => {
                let Some(term) = self.content.find_term(id).await? else {
                    return Ok(Resolution::Skipped(SkipReason::NotFound));
                };
                Ok(self.expand_term(&term, options))
            }
        }
    }

    fn expand_post(&self, post: &PostContent, options: ResolveOptions) -> Resolution {
        if !post.status.is_public() {
            return Resolution::Skipped(SkipReason::NotPublic);
        }

        let mut urls = UrlSet::default();
        urls.push_opt(self.site.permalink(&post.slug));

        if post.is_front_page {
            urls.push(self.site.front_page());
        }

        if options.include_archives {
            // The front page doubles as the first index page.
            urls.push(self.site.front_page());
            for page in 2..=self.site.archive_depth() {
                urls.push_opt(self.site.index_page(page));
            }
            if let Some(author) = post.author_slug.as_deref() {
                urls.push_opt(self.site.author_archive(author));
            }
            if let Some(published_at) = post.published_at {
                urls.push_opt(self.site.date_archive(published_at));
            }
            for term in &post.terms {
                urls.push_opt(self.site.term_archive(&term.taxonomy, &term.slug));
            }
        }

        if options.include_feeds {
            urls.push_opt(self.site.feed());
            if options.include_archives {
                for term in &post.terms {
                    urls.push_opt(self.site.term_feed(&term.taxonomy, &term.slug));
                }
            }
        }

        Resolution::Urls(urls.into_vec())
    }

    fn expand_term(&self, term: &TermContent, options: ResolveOptions) -> Resolution {
        if !term.public {
            return Resolution::Skipped(SkipReason::NotPublic);
        }

        let mut urls = UrlSet::default();
        urls.push_opt(self.site.term_archive(&term.taxonomy, &term.slug));

        if options.include_archives {
            for page in 2..=self.site.archive_depth() {
                urls.push_opt(self.site.term_archive_page(&term.taxonomy, &term.slug, page));
            }
        }

        if options.include_feeds {
            urls.push_opt(self.site.term_feed(&term.taxonomy, &term.slug));
        }

        Resolution::Urls(urls.into_vec())
    }
}

/// Ordered set: first-seen order, no duplicates.
#[derive(Default)]
struct UrlSet {
    seen: HashSet<String>,
    ordered: Vec<String>,
}

impl UrlSet {
    fn push(&mut self, url: String) {
        if self.seen.insert(url.clone()) {
            self.ordered.push(url);
        }
    }

    fn push_opt(&mut self, url: Option<String>) {
        if let Some(url) = url {
            self.push(url);
        }
    }

    fn into_vec(self) -> Vec<String> {
        self.ordered
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use time::macros::datetime;

    use super::*;
    use crate::domain::content::{ContentStatus, TermRef};

    struct FixedContent {
        post: Option<PostContent>,
        term: Option<TermContent>,
    }

    #[async_trait]
    impl ContentRepo for FixedContent {
        async fn find_post(&self, id: Uuid) -> Result<Option<PostContent>, RepoError> {
            Ok(self.post.clone().filter(|p| p.id == id))
        }

        async fn find_term(&self, id: Uuid) -> Result<Option<TermContent>, RepoError> {
            Ok(self.term.clone().filter(|t| t.id == id))
        }
    }

    fn site() -> SiteUrls {
        SiteUrls::new(Url::parse("https://example.com").expect("base url"), 3)
    }

    fn published_post(id: Uuid) -> PostContent {
        PostContent {
            id,
            slug: "hello-world".to_string(),
            status: ContentStatus::Published,
            author_slug: Some("ada".to_string()),
            published_at: Some(datetime!(2026-03-09 12:00 UTC)),
            terms: vec![TermRef {
                taxonomy: "tag".to_string(),
                slug: "rust".to_string(),
            }],
            is_front_page: false,
        }
    }

    fn resolver(post: Option<PostContent>, term: Option<TermContent>) -> PurgeObjectResolver {
        PurgeObjectResolver::new(Arc::new(FixedContent { post, term }), site())
    }

    #[tokio::test]
    async fn published_post_includes_permalink_and_author_archive() {
        let id = Uuid::new_v4();
        let resolver = resolver(Some(published_post(id)), None);

        let resolution = resolver
            .resolve(PurgeTarget::Post(id), ResolveOptions::default())
            .await
            .expect("resolve");

        let urls = resolution.urls();
        assert_eq!(urls[0], "https://example.com/hello-world/");
        assert!(urls.contains(&"https://example.com/author/ada/".to_string()));
        assert!(urls.contains(&"https://example.com/2026/03/".to_string()));
        assert!(urls.contains(&"https://example.com/tag/rust/".to_string()));
        assert!(urls.contains(&"https://example.com/page/2/".to_string()));
        assert!(urls.contains(&"https://example.com/feed/".to_string()));
    }

    #[tokio::test]
    async fn resolution_is_deterministic_and_deduplicated() {
        let id = Uuid::new_v4();
        let mut post = published_post(id);
        post.is_front_page = true;
        let resolver = resolver(Some(post), None);

        let first = resolver
            .resolve(PurgeTarget::Post(id), ResolveOptions::default())
            .await
            .expect("resolve");
        let second = resolver
            .resolve(PurgeTarget::Post(id), ResolveOptions::default())
            .await
            .expect("resolve");

        assert_eq!(first, second);
        let urls = first.urls();
        let front_count = urls
            .iter()
            .filter(|u| *u == "https://example.com/")
            .count();
        assert_eq!(front_count, 1, "front page listed once despite two sources");
    }

    #[tokio::test]
    async fn missing_post_is_skipped_not_error() {
        let resolver = resolver(None, None);
        let resolution = resolver
            .resolve(PurgeTarget::Post(Uuid::new_v4()), ResolveOptions::default())
            .await
            .expect("resolve");
        assert_eq!(resolution, Resolution::Skipped(SkipReason::NotFound));
    }

    #[tokio::test]
    async fn draft_post_is_skipped() {
        let id = Uuid::new_v4();
        let mut post = published_post(id);
        post.status = ContentStatus::Draft;
        let resolver = resolver(Some(post), None);

        let resolution = resolver
            .resolve(PurgeTarget::Post(id), ResolveOptions::default())
            .await
            .expect("resolve");
        assert_eq!(resolution, Resolution::Skipped(SkipReason::NotPublic));
    }

    #[tokio::test]
    async fn feeds_and_archives_can_be_excluded() {
        let id = Uuid::new_v4();
        let resolver = resolver(Some(published_post(id)), None);

        let resolution = resolver
            .resolve(
                PurgeTarget::Post(id),
                ResolveOptions {
                    include_archives: false,
                    include_feeds: false,
                },
            )
            .await
            .expect("resolve");

        assert_eq!(
            resolution.urls(),
            ["https://example.com/hello-world/".to_string()]
        );
    }

    #[tokio::test]
    async fn term_expands_archive_pages_and_feed() {
        let id = Uuid::new_v4();
        let term = TermContent {
            id,
            slug: "rust".to_string(),
            taxonomy: "tag".to_string(),
            public: true,
        };
        let resolver = resolver(None, Some(term));

        let resolution = resolver
            .resolve(PurgeTarget::Term(id), ResolveOptions::default())
            .await
            .expect("resolve");

        assert_eq!(
            resolution.urls(),
            [
                "https://example.com/tag/rust/".to_string(),
                "https://example.com/tag/rust/page/2/".to_string(),
                "https://example.com/tag/rust/page/3/".to_string(),
                "https://example.com/tag/rust/feed/".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn private_term_is_skipped() {
        let id = Uuid::new_v4();
        let term = TermContent {
            id,
            slug: "internal".to_string(),
            taxonomy: "audience".to_string(),
            public: false,
        };
        let resolver = resolver(None, Some(term));

        let resolution = resolver
            .resolve(PurgeTarget::Term(id), ResolveOptions::default())
            .await
            .expect("resolve");
        assert_eq!(resolution, Resolution::Skipped(SkipReason::NotPublic));
    }

    #[test]
    fn site_urls_tolerate_base_without_trailing_slash() {
        let site = SiteUrls::new(Url::parse("https://example.com/blog").expect("url"), 2);
        assert_eq!(
            site.permalink("post").as_deref(),
            Some("https://example.com/blog/post/")
        );
        assert_eq!(site.front_page(), "https://example.com/blog/");
    }

    #[test]
    fn unjoinable_slug_yields_no_url() {
        // "http://" parses as an absolute reference with an empty host.
        assert_eq!(site().permalink("http://"), None);
    }

    #[tokio::test]
    async fn unjoinable_slug_never_purges_the_front_page() {
        let id = Uuid::new_v4();
        let mut post = published_post(id);
        post.slug = "http://".to_string();
        let resolver = resolver(Some(post), None);

        let resolution = resolver
            .resolve(
                PurgeTarget::Post(id),
                ResolveOptions {
                    include_archives: false,
                    include_feeds: false,
                },
            )
            .await
            .expect("resolve");
        assert_eq!(resolution, Resolution::Urls(Vec::new()));
    }
}
