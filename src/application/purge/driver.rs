//! Cache purge driver capability.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::purge::DriverKind;

/// One provider-level error as returned by a purge API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderError {
    #[serde(default)]
    pub code: Option<i64>,
    pub message: String,
}

/// Failure of a single remote purge call.
///
/// Transport failures and timeouts are transient: the queue path retries
/// them. Provider rejections are retried only when the provider itself was
/// at fault (5xx).
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("provider rejected purge (http {status}, {n} error(s))", n = .errors.len())]
    Provider {
        status: u16,
        errors: Vec<ProviderError>,
    },
}

impl ApiError {
    pub fn is_transient(&self) -> bool {
        match self {
            ApiError::Transport(_) | ApiError::Timeout(_) => true,
            ApiError::Provider { status, .. } => *status >= 500,
        }
    }

    /// Provider error messages, empty for transport failures.
    pub fn provider_messages(&self) -> Vec<String> {
        match self {
            ApiError::Provider { errors, .. } => {
                errors.iter().map(|e| e.message.clone()).collect()
            }
            _ => Vec::new(),
        }
    }
}

/// Contract every purge backend satisfies.
///
/// Drivers translate purge requests into provider-specific HTTP calls and
/// nothing else: no retries (retry policy lives in the queue drainer), no
/// state beyond the outbound call. Purging is idempotent on the provider
/// side; purging an already-purged URL succeeds.
#[async_trait]
pub trait PurgeDriver: Send + Sync {
    fn kind(&self) -> DriverKind;

    /// Purge a single URL.
    async fn purge_url(&self, url: &str) -> Result<(), ApiError>;

    /// Purge a batch of URLs. Drivers may split large batches into multiple
    /// remote calls transparently.
    async fn purge_urls(&self, urls: &[String]) -> Result<(), ApiError>;

    /// Invalidate everything under the configured zone/environment.
    async fn purge_all(&self) -> Result<(), ApiError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transience_classification() {
        assert!(ApiError::Transport("connection refused".into()).is_transient());
        assert!(ApiError::Timeout(Duration::from_secs(30)).is_transient());
        assert!(
            ApiError::Provider {
                status: 503,
                errors: vec![],
            }
            .is_transient()
        );
        assert!(
            !ApiError::Provider {
                status: 403,
                errors: vec![ProviderError {
                    code: Some(10000),
                    message: "authentication error".into(),
                }],
            }
            .is_transient()
        );
    }

    #[test]
    fn provider_error_display_includes_status_and_count() {
        let err = ApiError::Provider {
            status: 400,
            errors: vec![
                ProviderError {
                    code: Some(1012),
                    message: "invalid url".into(),
                },
                ProviderError {
                    code: None,
                    message: "zone mismatch".into(),
                },
            ],
        };
        let text = err.to_string();
        assert!(text.contains("400"));
        assert!(text.contains("2 error(s)"));
        assert_eq!(err.provider_messages(), vec!["invalid url", "zone mismatch"]);
    }
}
