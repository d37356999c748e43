//! Edge CDN purge driver.
//!
//! Talks to the hosting platform's environment-scoped purge endpoint. Unlike
//! Cloudflare there is no per-call file limit documented, so batches go out
//! in a single call.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::application::purge::{ApiError, ProviderError, PurgeDriver};
use crate::domain::purge::DriverKind;
use crate::infra::error::InfraError;

use super::{map_request_error, provider_rejection};

pub struct EdgeCdnDriver {
    client: reqwest::Client,
    base_url: Url,
    environment_id: String,
    timeout: Duration,
}

#[derive(Debug, Serialize)]
struct PurgeBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    files: Option<&'a [String]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    purge_all: Option<bool>,
}

impl<'a> PurgeBody<'a> {
    fn files(files: &'a [String]) -> Self {
        Self {
            files: Some(files),
            purge_all: None,
        }
    }

    fn everything() -> Self {
        Self {
            files: None,
            purge_all: Some(true),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    errors: Vec<ProviderError>,
}

impl EdgeCdnDriver {
    pub fn new(
        base_url: Url,
        api_key: &str,
        environment_id: &str,
        timeout: Duration,
    ) -> Result<Self, InfraError> {
        let mut bearer = HeaderValue::from_str(&format!("Bearer {api_key}"))
            .map_err(|_| InfraError::configuration("api key contains invalid characters"))?;
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
            base_url,
            environment_id: environment_id.to_string(),
            timeout,
        })
    }

    fn purge_endpoint(&self) -> Result<Url, ApiError> {
        self.base_url
            .join(&format!(
                "environments/{}/purge_cache",
                self.environment_id
            ))
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
        if (200..300).contains(&status) {
            return Ok(());
        }

        // Error bodies are best effort; an unparseable one still reports the
        // http status.
        let errors = response
            .json::<Envelope>()
            .await
            .map(|envelope| envelope.errors)
            .unwrap_or_default();
        Err(provider_rejection(status, errors))
    }
}

#[async_trait]
impl PurgeDriver for EdgeCdnDriver {
    fn kind(&self) -> DriverKind {
        DriverKind::EdgeCdn
    }

    async fn purge_url(&self, url: &str) -> Result<(), ApiError> {
        let files = [url.to_string()];
        self.call(&PurgeBody::files(&files)).await
    }

    async fn purge_urls(&self, urls: &[String]) -> Result<(), ApiError> {
        self.call(&PurgeBody::files(urls)).await
    }

    async fn purge_all(&self) -> Result<(), ApiError> {
        self.call(&PurgeBody::everything()).await
    }
}
