//! Cloudflare purge driver.
//!
//! Talks to the zone purge endpoint of the Cloudflare v4 API. Batches larger
//! than the API's per-call file limit are split into sequential calls.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::application::purge::{ApiError, ProviderError, PurgeDriver};
use crate::domain::purge::DriverKind;
use crate::infra::error::InfraError;

use super::{map_request_error, provider_rejection};

const DEFAULT_API_BASE: &str = "https://api.cloudflare.com/client/v4/";

/// Cloudflare caps purge-by-URL calls at 30 files each.
const MAX_FILES_PER_CALL: usize = 30;

pub struct CloudflareDriver {
    client: reqwest::Client,
    api_base: Url,
    zone_id: String,
    timeout: Duration,
}

#[derive(Debug, Serialize)]
struct PurgeBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    files: Option<&'a [String]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    purge_everything: Option<bool>,
}

impl<'a> PurgeBody<'a> {
    fn files(files: &'a [String]) -> Self {
        Self {
            files: Some(files),
            purge_everything: None,
        }
    }

    fn everything() -> Self {
        Self {
            files: None,
            purge_everything: Some(true),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    success: bool,
    #[serde(default)]
    errors: Vec<ProviderError>,
}

impl CloudflareDriver {
    pub fn new(api_token: &str, zone_id: &str, timeout: Duration) -> Result<Self, InfraError> {
        Self::with_api_base(api_token, zone_id, timeout, DEFAULT_API_BASE)
    }

    pub fn with_api_base(
        api_token: &str,
        zone_id: &str,
        timeout: Duration,
        api_base: &str,
    ) -> Result<Self, InfraError> {
        let api_base = Url::parse(api_base)
            .map_err(|err| InfraError::configuration(format!("invalid api base url: {err}")))?;

        let mut bearer = HeaderValue::from_str(&format!("Bearer {api_token}"))
            .map_err(|_| InfraError::configuration("api token contains invalid characters"))?;
        bearer.set_sensitive(true);
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, bearer);

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|err| {
                InfraError::configuration(format!("failed to build http client: {err}"))
            })?;

        Ok(Self {
            client,
            api_base,
            zone_id: zone_id.to_string(),
            timeout,
        })
    }

    fn purge_endpoint(&self) -> Result<Url, ApiError> {
        self.api_base
            .join(&format!("zones/{}/purge_cache", self.zone_id))
            .map_err(|err| ApiError::Transport(format!("invalid purge endpoint: {err}")))
    }

    async fn call(&self, body: &PurgeBody<'_>) -> Result<(), ApiError> {
        let endpoint = self.purge_endpoint()?;
        let response = self
            .client
            .post(endpoint)
            .json(body)
            .send()
            .await
            .map_err(|err| map_request_error(err, self.timeout))?;

        let status = response.status().as_u16();
        let envelope: Envelope = response
            .json()
            .await
            .map_err(|err| map_request_error(err, self.timeout))?;

        if !(200..300).contains(&status) || !envelope.success {
            return Err(provider_rejection(status, envelope.errors));
        }
        Ok(())
    }
}

#[async_trait]
impl PurgeDriver for CloudflareDriver {
    fn kind(&self) -> DriverKind {
        DriverKind::Cloudflare
    }

    async fn purge_url(&self, url: &str) -> Result<(), ApiError> {
        let files = [url.to_string()];
        self.call(&PurgeBody::files(&files)).await
    }

    async fn purge_urls(&self, urls: &[String]) -> Result<(), ApiError> {
        for chunk in urls.chunks(MAX_FILES_PER_CALL) {
            self.call(&PurgeBody::files(chunk)).await?;
        }
        Ok(())
    }

    async fn purge_all(&self) -> Result<(), ApiError> {
        self.call(&PurgeBody::everything()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn files_body_omits_purge_everything() {
        let files = vec!["https://example.com/a/".to_string()];
        let body = serde_json::to_value(PurgeBody::files(&files)).expect("serialize");
        assert_eq!(
            body,
            serde_json::json!({"files": ["https://example.com/a/"]})
        );
    }

    #[test]
    fn everything_body_omits_files() {
        let body = serde_json::to_value(PurgeBody::everything()).expect("serialize");
        assert_eq!(body, serde_json::json!({"purge_everything": true}));
    }

    #[test]
    fn envelope_tolerates_missing_errors() {
        let envelope: Envelope = serde_json::from_str(r#"{"success": true}"#).expect("parse");
        assert!(envelope.success);
        assert!(envelope.errors.is_empty());

        let envelope: Envelope = serde_json::from_str(
            r#"{"success": false, "errors": [{"code": 1012, "message": "invalid url"}]}"#,
        )
        .expect("parse");
        assert!(!envelope.success);
        assert_eq!(envelope.errors[0].code, Some(1012));
    }

    #[test]
    fn batches_split_at_the_file_limit() {
        let urls: Vec<String> = (0..61).map(|i| format!("https://example.com/p{i}/")).collect();
        let chunks: Vec<_> = urls.chunks(MAX_FILES_PER_CALL).collect();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 30);
        assert_eq!(chunks[2].len(), 1);
    }

    #[test]
    fn endpoint_embeds_the_zone() {
        let driver = CloudflareDriver::new("token", "abc123", Duration::from_secs(30))
            .expect("driver");
        let endpoint = driver.purge_endpoint().expect("endpoint");
        assert_eq!(
            endpoint.as_str(),
            "https://api.cloudflare.com/client/v4/zones/abc123/purge_cache"
        );
    }
}
