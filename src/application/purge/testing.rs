//! In-memory test doubles shared by the purge unit tests.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::application::purge::driver::{ApiError, PurgeDriver};
use crate::application::repos::{
    NewQueueItem, PurgeQueueRepo, QueueCounts, QueueItemRecord, RepoError,
};
use crate::domain::purge::{DriverKind, PurgeRequest};

/// Driver that records every call and can be told to fail the next N calls.
pub(crate) struct FakeDriver {
    pub calls: Mutex<Vec<PurgeRequest>>,
    fail_next: AtomicUsize,
}

impl FakeDriver {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            fail_next: AtomicUsize::new(0),
        }
    }

    pub fn fail_next(&self, count: usize) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().expect("calls lock").len()
    }

    fn record(&self, request: PurgeRequest) -> Result<(), ApiError> {
        self.calls.lock().expect("calls lock").push(request);
        let remaining = self.fail_next.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_next.store(remaining - 1, Ordering::SeqCst);
            return Err(ApiError::Transport("injected failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl PurgeDriver for FakeDriver {
    fn kind(&self) -> DriverKind {
        DriverKind::Cloudflare
    }

    async fn purge_url(&self, url: &str) -> Result<(), ApiError> {
        self.record(PurgeRequest::Url {
            url: url.to_string(),
        })
    }

    async fn purge_urls(&self, urls: &[String]) -> Result<(), ApiError> {
        self.record(PurgeRequest::Urls {
            urls: urls.to_vec(),
        })
    }

    async fn purge_all(&self) -> Result<(), ApiError> {
        self.record(PurgeRequest::All)
    }
}

/// Mutex-backed queue repository mirroring the Postgres claim semantics.
pub(crate) struct InMemoryQueueRepo {
    items: Mutex<Vec<QueueItemRecord>>,
}

impl InMemoryQueueRepo {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.items.lock().expect("items lock").len()
    }

    pub fn snapshot(&self) -> Vec<QueueItemRecord> {
        self.items.lock().expect("items lock").clone()
    }

    /// Insert an item with an arbitrary payload, bypassing serialization.
    pub fn push_raw(&self, queue: &str, payload: serde_json::Value) {
        self.items.lock().expect("items lock").push(QueueItemRecord {
            id: Uuid::new_v4(),
            queue: queue.to_string(),
            payload,
            attempts: 0,
            reserved_at: None,
            completed_at: None,
            created_at: OffsetDateTime::now_utc(),
        });
    }
}

fn payload_is_all(payload: &serde_json::Value) -> bool {
    payload.get("kind").and_then(|k| k.as_str()) == Some("all")
}

#[async_trait]
impl PurgeQueueRepo for InMemoryQueueRepo {
    async fn enqueue(&self, item: NewQueueItem) -> Result<Uuid, RepoError> {
        let id = Uuid::new_v4();
        let payload = serde_json::to_value(&item.payload).map_err(RepoError::from_persistence)?;
        self.items.lock().expect("items lock").push(QueueItemRecord {
            id,
            queue: item.queue,
            payload,
            attempts: 0,
            reserved_at: None,
            completed_at: None,
            created_at: OffsetDateTime::now_utc(),
        });
        Ok(id)
    }

    async fn collapse_to_all(&self, queue: &str) -> Result<u64, RepoError> {
        let mut items = self.items.lock().expect("items lock");
        let before = items.len();
        items.retain(|item| {
            !(item.queue == queue
                && item.completed_at.is_none()
                && item.reserved_at.is_none()
                && !payload_is_all(&item.payload))
        });
        Ok((before - items.len()) as u64)
    }

    async fn claim_batch(
        &self,
        queue: &str,
        limit: u32,
        lease: Duration,
        max_attempts: i32,
    ) -> Result<Vec<QueueItemRecord>, RepoError> {
        let now = OffsetDateTime::now_utc();
        let mut items = self.items.lock().expect("items lock");
        let mut claimed = Vec::new();
        for item in items.iter_mut() {
            if claimed.len() as u32 >= limit {
                break;
            }
            let lease_lapsed = match item.reserved_at {
                None => true,
                Some(reserved_at) => reserved_at + lease < now,
            };
            if item.queue == queue
                && item.completed_at.is_none()
                && item.attempts < max_attempts
                && lease_lapsed
            {
                item.reserved_at = Some(now);
                claimed.push(item.clone());
            }
        }
        Ok(claimed)
    }

    async fn mark_completed(&self, id: Uuid) -> Result<(), RepoError> {
        let mut items = self.items.lock().expect("items lock");
        let item = items
            .iter_mut()
            .find(|item| item.id == id)
            .ok_or(RepoError::NotFound)?;
        item.completed_at = Some(OffsetDateTime::now_utc());
        item.reserved_at = None;
        Ok(())
    }

    async fn record_failure(&self, id: Uuid) -> Result<i32, RepoError> {
        let mut items = self.items.lock().expect("items lock");
        let item = items
            .iter_mut()
            .find(|item| item.id == id)
            .ok_or(RepoError::NotFound)?;
        item.attempts += 1;
        item.reserved_at = None;
        Ok(item.attempts)
    }

    async fn counts(&self, queue: &str, max_attempts: i32) -> Result<QueueCounts, RepoError> {
        let items = self.items.lock().expect("items lock");
        let mut counts = QueueCounts::default();
        for item in items.iter().filter(|item| item.queue == queue) {
            if item.completed_at.is_some() {
                counts.completed += 1;
            } else if item.attempts >= max_attempts {
                counts.dead += 1;
            } else if item.reserved_at.is_some() {
                counts.reserved += 1;
            } else {
                counts.pending += 1;
            }
        }
        Ok(counts)
    }

    async fn list_dead(
        &self,
        queue: &str,
        max_attempts: i32,
        limit: u32,
    ) -> Result<Vec<QueueItemRecord>, RepoError> {
        let items = self.items.lock().expect("items lock");
        Ok(items
            .iter()
            .filter(|item| {
                item.queue == queue
                    && item.completed_at.is_none()
                    && item.attempts >= max_attempts
            })
            .take(limit as usize)
            .cloned()
            .collect())
    }
}
