//! Repository traits describing persistence adapters.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::{
    content::{PostContent, TermContent},
    purge::PurgeRequest,
};

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("resource not found")]
    NotFound,
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("integrity error: {message}")]
    Integrity { message: String },
    #[error("database timeout")]
    Timeout,
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }
}

/// Read access to the host site's content, used by the purge object resolver.
#[async_trait]
pub trait ContentRepo: Send + Sync {
    async fn find_post(&self, id: Uuid) -> Result<Option<PostContent>, RepoError>;

    async fn find_term(&self, id: Uuid) -> Result<Option<TermContent>, RepoError>;
}

/// Parameters for enqueueing one purge operation.
#[derive(Debug, Clone)]
pub struct NewQueueItem {
    pub queue: String,
    pub payload: PurgeRequest,
}

/// One persisted purge operation.
///
/// An item with no `completed_at` whose attempts have reached the configured
/// maximum is dead: excluded from claiming, visible only through inspection.
#[derive(Debug, Clone)]
pub struct QueueItemRecord {
    pub id: Uuid,
    pub queue: String,
    pub payload: serde_json::Value,
    pub attempts: i32,
    pub reserved_at: Option<OffsetDateTime>,
    pub completed_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
}

/// Aggregate queue counters for the inspection surface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueCounts {
    pub pending: u64,
    pub reserved: u64,
    pub completed: u64,
    pub dead: u64,
}

/// Persistence adapter for the purge queue.
///
/// Claiming is at-least-once: a claim places a lease on `reserved_at`, and
/// items whose lease has lapsed become claimable again. Overlapping drain
/// ticks are expected; purge operations are idempotent so double delivery is
/// harmless.
#[async_trait]
pub trait PurgeQueueRepo: Send + Sync {
    async fn enqueue(&self, item: NewQueueItem) -> Result<Uuid, RepoError>;

    /// Remove pending URL items that a pending purge-everything subsumes.
    /// Returns the number of items removed.
    async fn collapse_to_all(&self, queue: &str) -> Result<u64, RepoError>;

    /// Claim up to `limit` items: pending, under the attempt ceiling, and
    /// either unreserved or holding a lapsed lease.
    async fn claim_batch(
        &self,
        queue: &str,
        limit: u32,
        lease: Duration,
        max_attempts: i32,
    ) -> Result<Vec<QueueItemRecord>, RepoError>;

    async fn mark_completed(&self, id: Uuid) -> Result<(), RepoError>;

    /// Record a failed delivery: bump the attempt counter and release the
    /// reservation. Returns the new attempt count.
    async fn record_failure(&self, id: Uuid) -> Result<i32, RepoError>;

    async fn counts(&self, queue: &str, max_attempts: i32) -> Result<QueueCounts, RepoError>;

    async fn list_dead(
        &self,
        queue: &str,
        max_attempts: i32,
        limit: u32,
    ) -> Result<Vec<QueueItemRecord>, RepoError>;
}
