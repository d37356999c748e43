//! Purge request value types.
//!
//! A [`PurgeRequest`] is the unit of work the dispatcher understands: one
//! URL, a set of URLs, or everything under the configured zone/environment.
//! Requests are serialized as queue payloads, so the wire shape is stable.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::domain::error::DomainError;

/// Identity of a purge backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverKind {
    Cloudflare,
    EdgeCdn,
}

impl DriverKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DriverKind::Cloudflare => "cloudflare",
            DriverKind::EdgeCdn => "edge_cdn",
        }
    }
}

impl TryFrom<&str> for DriverKind {
    type Error = DomainError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "cloudflare" => Ok(DriverKind::Cloudflare),
            "edge_cdn" | "edge" => Ok(DriverKind::EdgeCdn),
            _ => Err(DomainError::validation(format!(
                "unknown purge driver `{value}`"
            ))),
        }
    }
}

/// A single purge operation awaiting dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PurgeRequest {
    /// Purge one URL.
    Url { url: String },
    /// Purge a batch of URLs.
    Urls { urls: Vec<String> },
    /// Purge everything under the configured zone/environment.
    All,
}

impl PurgeRequest {
    /// Build a batched request from an iterator of raw URLs.
    ///
    /// URLs are normalized and deduplicated while preserving first-seen
    /// order; invalid URLs are dropped. A single survivor collapses to
    /// [`PurgeRequest::Url`].
    pub fn from_urls<I, S>(urls: I) -> Option<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut deduped = Vec::new();
        for raw in urls {
            if let Some(url) = normalize_url(raw.as_ref())
                && !deduped.contains(&url)
            {
                deduped.push(url);
            }
        }

        match deduped.len() {
            0 => None,
            1 => Some(PurgeRequest::Url {
                url: deduped.remove(0),
            }),
            _ => Some(PurgeRequest::Urls { urls: deduped }),
        }
    }

    pub fn is_all(&self) -> bool {
        matches!(self, PurgeRequest::All)
    }

    /// Number of URLs carried by the request (`All` carries none).
    pub fn url_count(&self) -> usize {
        match self {
            PurgeRequest::Url { .. } => 1,
            PurgeRequest::Urls { urls } => urls.len(),
            PurgeRequest::All => 0,
        }
    }
}

/// Normalize a raw URL for purging.
///
/// Accepts only absolute http(s) URLs; strips fragments, which caches never
/// key on. Returns the canonical serialized form.
pub fn normalize_url(raw: &str) -> Option<String> {
    let mut url = Url::parse(raw.trim()).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    url.set_fragment(None);
    Some(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_rejects_non_http_schemes() {
        assert!(normalize_url("ftp://example.com/a").is_none());
        assert!(normalize_url("not a url").is_none());
        assert!(normalize_url("/relative/path").is_none());
    }

    #[test]
    fn normalize_strips_fragments() {
        assert_eq!(
            normalize_url("https://example.com/post/#section").as_deref(),
            Some("https://example.com/post/")
        );
    }

    #[test]
    fn from_urls_dedupes_preserving_order() {
        let request = PurgeRequest::from_urls([
            "https://example.com/a/",
            "https://example.com/b/",
            "https://example.com/a/",
        ])
        .expect("two valid urls");

        assert_eq!(
            request,
            PurgeRequest::Urls {
                urls: vec![
                    "https://example.com/a/".to_string(),
                    "https://example.com/b/".to_string(),
                ]
            }
        );
    }

    #[test]
    fn from_urls_collapses_single_survivor() {
        let request =
            PurgeRequest::from_urls(["https://example.com/a/", "bogus"]).expect("one valid url");
        assert_eq!(
            request,
            PurgeRequest::Url {
                url: "https://example.com/a/".to_string()
            }
        );
        assert!(PurgeRequest::from_urls(["bogus"]).is_none());
    }

    #[test]
    fn queue_payload_shape_is_stable() {
        let all = serde_json::to_value(PurgeRequest::All).expect("serialize");
        assert_eq!(all, serde_json::json!({ "kind": "all" }));

        let single = serde_json::to_value(PurgeRequest::Url {
            url: "https://example.com/".to_string(),
        })
        .expect("serialize");
        assert_eq!(
            single,
            serde_json::json!({ "kind": "url", "url": "https://example.com/" })
        );

        let parsed: PurgeRequest =
            serde_json::from_value(serde_json::json!({ "kind": "all" })).expect("deserialize");
        assert!(parsed.is_all());
    }

    #[test]
    fn driver_kind_round_trip() {
        assert!(matches!(
            DriverKind::try_from("cloudflare"),
            Ok(DriverKind::Cloudflare)
        ));
        assert!(matches!(
            DriverKind::try_from("edge"),
            Ok(DriverKind::EdgeCdn)
        ));
        assert!(matches!(
            DriverKind::try_from("edge_cdn"),
            Ok(DriverKind::EdgeCdn)
        ));
        assert!(DriverKind::try_from("varnish").is_err());
    }
}
