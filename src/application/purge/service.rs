//! Purge facade.
//!
//! Single entry point for every purge in the system: CLI actions, resolver
//! output, and the queue drainer all dispatch through [`PurgeService`].

use std::sync::{Arc, RwLock};

use metrics::counter;
use thiserror::Error;
use tracing::{debug, warn};

use crate::application::purge::driver::{ApiError, PurgeDriver};
use crate::application::purge::lock::{read_state, write_state};
use crate::application::repos::{NewQueueItem, PurgeQueueRepo, RepoError};
use crate::domain::purge::{DriverKind, PurgeRequest, normalize_url};

const METRIC_DISPATCH_TOTAL: &str = "scopa_purge_dispatch_total";
const METRIC_FAILURE_TOTAL: &str = "scopa_purge_failure_total";
const METRIC_ENQUEUED_TOTAL: &str = "scopa_purge_enqueued_total";

/// Whether dispatch calls the driver or defers through the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurgeMode {
    Immediate,
    Queued,
}

/// What a dispatch call actually did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurgeOutcome {
    /// The driver was called and the purge succeeded.
    Purged,
    /// Queue items were written for later draining.
    Enqueued { items: usize },
    /// Nothing survived URL normalization.
    NothingToDo,
}

#[derive(Debug, Error)]
pub enum PurgeError {
    #[error("cache purge feature is not configured")]
    NotConfigured,
    #[error("invalid purge url `{0}`")]
    InvalidUrl(String),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Repo(#[from] RepoError),
}

/// Facade over the active purge driver and the purge queue.
///
/// Exactly one driver can be active; which one is resolved from
/// configuration at construction. A selected driver with incomplete
/// credentials leaves the feature available but unconfigured, and every
/// dispatch then returns [`PurgeError::NotConfigured`] without touching the
/// network.
pub struct PurgeService {
    selected: Option<DriverKind>,
    driver: Option<Arc<dyn PurgeDriver>>,
    queue: Arc<dyn PurgeQueueRepo>,
    queue_name: String,
    mode: PurgeMode,
    /// Last connection failure, readable by operators; cleared on success.
    last_error: RwLock<Option<String>>,
}

impl PurgeService {
    pub fn new(
        selected: Option<DriverKind>,
        driver: Option<Arc<dyn PurgeDriver>>,
        queue: Arc<dyn PurgeQueueRepo>,
        queue_name: impl Into<String>,
        mode: PurgeMode,
    ) -> Self {
        Self {
            selected,
            driver,
            queue,
            queue_name: queue_name.into(),
            mode,
            last_error: RwLock::new(None),
        }
    }

    /// A driver is selected in configuration.
    pub fn is_active(&self) -> bool {
        self.selected.is_some()
    }

    /// Alias for [`Self::is_active`], matching the operator-facing wording.
    pub fn feature_is_available(&self) -> bool {
        self.is_active()
    }

    /// The selected driver has complete credentials and can be called.
    pub fn feature_is_configured(&self) -> bool {
        self.driver.is_some()
    }

    pub fn active_driver(&self) -> Option<DriverKind> {
        self.selected
    }

    pub fn mode(&self) -> PurgeMode {
        self.mode
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    /// Last recorded connection error, if the most recent driver call failed.
    pub fn last_error(&self) -> Option<String> {
        read_state(&self.last_error, "last_error").clone()
    }

    /// Purge a single URL, honoring the configured mode.
    pub async fn purge_by_url(&self, raw: &str) -> Result<PurgeOutcome, PurgeError> {
        let url = normalize_url(raw).ok_or_else(|| PurgeError::InvalidUrl(raw.to_string()))?;
        self.dispatch(vec![url]).await
    }

    /// Purge a batch of URLs, honoring the configured mode.
    ///
    /// URLs are normalized and deduplicated; invalid entries are dropped
    /// rather than failing the batch.
    pub async fn purge_by_urls(&self, raw: &[String]) -> Result<PurgeOutcome, PurgeError> {
        let mut urls = Vec::new();
        for candidate in raw {
            if let Some(url) = normalize_url(candidate)
                && !urls.contains(&url)
            {
                urls.push(url);
            }
        }
        if urls.is_empty() {
            return Ok(PurgeOutcome::NothingToDo);
        }
        self.dispatch(urls).await
    }

    /// Invalidate everything under the configured zone/environment.
    pub async fn purge_all(&self) -> Result<PurgeOutcome, PurgeError> {
        if !self.feature_is_configured() {
            return Err(PurgeError::NotConfigured);
        }

        match self.mode {
            PurgeMode::Queued => {
                // A purge-everything subsumes every pending URL item.
                let collapsed = self.queue.collapse_to_all(&self.queue_name).await?;
                if collapsed > 0 {
                    debug!(collapsed, "Collapsed pending purge items into purge-all");
                }
                self.enqueue(PurgeRequest::All).await?;
                Ok(PurgeOutcome::Enqueued { items: 1 })
            }
            PurgeMode::Immediate => {
                self.purge_now(&PurgeRequest::All).await?;
                Ok(PurgeOutcome::Purged)
            }
        }
    }

    /// Dispatch a request directly to the driver, bypassing queue mode.
    ///
    /// This is the path the queue drainer takes; it must never re-enqueue.
    pub async fn purge_now(&self, request: &PurgeRequest) -> Result<(), PurgeError> {
        let driver = self.driver.as_ref().ok_or(PurgeError::NotConfigured)?;

        let result = match request {
            PurgeRequest::Url { url } => driver.purge_url(url).await,
            PurgeRequest::Urls { urls } => driver.purge_urls(urls).await,
            PurgeRequest::All => driver.purge_all().await,
        };

        match result {
            Ok(()) => {
                counter!(METRIC_DISPATCH_TOTAL).increment(1);
                *write_state(&self.last_error, "last_error") = None;
                debug!(
                    driver = driver.kind().as_str(),
                    urls = request.url_count(),
                    all = request.is_all(),
                    "Purge dispatched"
                );
                Ok(())
            }
            Err(err) => {
                counter!(METRIC_FAILURE_TOTAL).increment(1);
                *write_state(&self.last_error, "last_error") = Some(err.to_string());
                warn!(
                    driver = driver.kind().as_str(),
                    error = %err,
                    transient = err.is_transient(),
                    "Purge dispatch failed"
                );
                Err(err.into())
            }
        }
    }

    async fn dispatch(&self, mut urls: Vec<String>) -> Result<PurgeOutcome, PurgeError> {
        if !self.feature_is_configured() {
            return Err(PurgeError::NotConfigured);
        }

        match self.mode {
            PurgeMode::Queued => {
                let items = urls.len();
                for url in urls {
                    self.enqueue(PurgeRequest::Url { url }).await?;
                }
                Ok(PurgeOutcome::Enqueued { items })
            }
            PurgeMode::Immediate => {
                let request = if urls.len() == 1 {
                    PurgeRequest::Url {
                        url: urls.remove(0),
                    }
                } else {
                    PurgeRequest::Urls { urls }
                };
                self.purge_now(&request).await?;
                Ok(PurgeOutcome::Purged)
            }
        }
    }

    async fn enqueue(&self, payload: PurgeRequest) -> Result<(), PurgeError> {
        self.queue
            .enqueue(NewQueueItem {
                queue: self.queue_name.clone(),
                payload,
            })
            .await?;
        counter!(METRIC_ENQUEUED_TOTAL).increment(1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::purge::testing::{FakeDriver, InMemoryQueueRepo};

    fn service(
        selected: Option<DriverKind>,
        driver: Option<Arc<FakeDriver>>,
        mode: PurgeMode,
    ) -> (PurgeService, Arc<InMemoryQueueRepo>) {
        let queue = Arc::new(InMemoryQueueRepo::new());
        let service = PurgeService::new(
            selected,
            driver.map(|d| d as Arc<dyn PurgeDriver>),
            queue.clone(),
            "purge",
            mode,
        );
        (service, queue)
    }

    #[tokio::test]
    async fn unconfigured_driver_yields_config_error_and_no_calls() {
        let driver = Arc::new(FakeDriver::new());
        let (service, queue) = service(Some(DriverKind::Cloudflare), None, PurgeMode::Immediate);

        assert!(service.feature_is_available());
        assert!(!service.feature_is_configured());

        let err = service.purge_all().await.expect_err("must fail");
        assert!(matches!(err, PurgeError::NotConfigured));
        assert_eq!(driver.call_count(), 0);
        assert_eq!(queue.len(), 0);
    }

    #[tokio::test]
    async fn no_selected_driver_means_unavailable() {
        let (service, _) = service(None, None, PurgeMode::Immediate);
        assert!(!service.feature_is_available());
        assert!(!service.is_active());
    }

    #[tokio::test]
    async fn immediate_mode_calls_driver() {
        let driver = Arc::new(FakeDriver::new());
        let (service, queue) = service(
            Some(DriverKind::Cloudflare),
            Some(driver.clone()),
            PurgeMode::Immediate,
        );

        let outcome = service
            .purge_by_url("https://example.com/a/")
            .await
            .expect("purge");
        assert_eq!(outcome, PurgeOutcome::Purged);
        assert_eq!(driver.call_count(), 1);
        assert_eq!(queue.len(), 0);
    }

    #[tokio::test]
    async fn purging_the_same_url_twice_succeeds_twice() {
        let driver = Arc::new(FakeDriver::new());
        let (service, _) = service(
            Some(DriverKind::Cloudflare),
            Some(driver.clone()),
            PurgeMode::Immediate,
        );

        for _ in 0..2 {
            let outcome = service
                .purge_by_url("https://example.com/a/")
                .await
                .expect("purge is idempotent");
            assert_eq!(outcome, PurgeOutcome::Purged);
        }
        assert_eq!(driver.call_count(), 2);
    }

    #[tokio::test]
    async fn queued_mode_enqueues_instead_of_calling() {
        let driver = Arc::new(FakeDriver::new());
        let (service, queue) = service(
            Some(DriverKind::Cloudflare),
            Some(driver.clone()),
            PurgeMode::Queued,
        );

        let outcome = service
            .purge_by_urls(&[
                "https://example.com/a/".to_string(),
                "https://example.com/b/".to_string(),
                "https://example.com/a/".to_string(),
                "not-a-url".to_string(),
            ])
            .await
            .expect("enqueue");

        assert_eq!(outcome, PurgeOutcome::Enqueued { items: 2 });
        assert_eq!(driver.call_count(), 0);
        assert_eq!(queue.len(), 2);
    }

    #[tokio::test]
    async fn purge_all_collapses_pending_url_items() {
        let driver = Arc::new(FakeDriver::new());
        let (service, queue) = service(
            Some(DriverKind::Cloudflare),
            Some(driver.clone()),
            PurgeMode::Queued,
        );

        service
            .purge_by_url("https://example.com/a/")
            .await
            .expect("enqueue");
        service.purge_all().await.expect("enqueue all");

        let items = queue.snapshot();
        assert_eq!(items.len(), 1);
        assert_eq!(
            items[0].payload.get("kind").and_then(|k| k.as_str()),
            Some("all")
        );
    }

    #[tokio::test]
    async fn failure_records_last_error_and_success_clears_it() {
        let driver = Arc::new(FakeDriver::new());
        let (service, _) = service(
            Some(DriverKind::Cloudflare),
            Some(driver.clone()),
            PurgeMode::Immediate,
        );

        driver.fail_next(1);
        let err = service
            .purge_by_url("https://example.com/a/")
            .await
            .expect_err("injected failure");
        assert!(matches!(err, PurgeError::Api(_)));
        assert!(service.last_error().is_some());

        service
            .purge_by_url("https://example.com/a/")
            .await
            .expect("second attempt succeeds");
        assert!(service.last_error().is_none());
    }

    #[tokio::test]
    async fn invalid_url_is_rejected_without_dispatch() {
        let driver = Arc::new(FakeDriver::new());
        let (service, _) = service(
            Some(DriverKind::Cloudflare),
            Some(driver.clone()),
            PurgeMode::Immediate,
        );

        let err = service.purge_by_url("::nope::").await.expect_err("invalid");
        assert!(matches!(err, PurgeError::InvalidUrl(_)));
        assert_eq!(driver.call_count(), 0);
    }

    #[tokio::test]
    async fn empty_batch_is_a_noop() {
        let driver = Arc::new(FakeDriver::new());
        let (service, queue) = service(
            Some(DriverKind::Cloudflare),
            Some(driver.clone()),
            PurgeMode::Queued,
        );

        let outcome = service
            .purge_by_urls(&["bogus".to_string()])
            .await
            .expect("noop");
        assert_eq!(outcome, PurgeOutcome::NothingToDo);
        assert_eq!(queue.len(), 0);
    }
}
