//! Purge queue drainer.
//!
//! Claims pending items in bounded batches, dispatches each one through the
//! facade, and records the result. Items are claimed with a lease so a
//! crashed drain run releases its batch back to the pool; an item that
//! exhausts its attempts is left in place as dead for operator inspection.

use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{counter, gauge, histogram};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::application::purge::lock::{read_state, write_state};
use crate::application::purge::service::{PurgeError, PurgeService};
use crate::application::repos::{PurgeQueueRepo, QueueItemRecord, RepoError};
use crate::domain::purge::PurgeRequest;

const METRIC_QUEUE_DEPTH: &str = "scopa_queue_depth";
const METRIC_QUEUE_DEAD_TOTAL: &str = "scopa_queue_dead_total";
const METRIC_QUEUE_DRAIN_MS: &str = "scopa_queue_drain_ms";

#[derive(Debug, Clone)]
pub struct QueueDrainConfig {
    pub queue_name: String,
    /// Maximum items dispatched per tick.
    pub batch_limit: u32,
    /// Attempts before an item is considered dead.
    pub max_attempts: i32,
    /// How long a claim holds before another drain run may take the item.
    pub lease: Duration,
}

impl Default for QueueDrainConfig {
    fn default() -> Self {
        Self {
            queue_name: "purge".to_string(),
            batch_limit: 100,
            max_attempts: 5,
            lease: Duration::from_secs(120),
        }
    }
}

/// Lifecycle of the drainer between ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainState {
    /// Queued purging is off; ticks are no-ops.
    Disabled,
    /// Waiting for the next cron tick.
    Scheduled,
    /// A tick is in flight.
    Running,
}

/// What a single tick accomplished.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainSummary {
    pub claimed: usize,
    pub completed: usize,
    pub failed: usize,
    /// Items that crossed the attempt limit during this tick.
    pub dead: usize,
}

#[derive(Debug, Error)]
pub enum DrainError {
    #[error(transparent)]
    Repo(#[from] RepoError),
}

pub struct QueueDrainer {
    service: Arc<PurgeService>,
    queue: Arc<dyn PurgeQueueRepo>,
    config: QueueDrainConfig,
    state: std::sync::RwLock<DrainState>,
}

impl QueueDrainer {
    pub fn new(
        service: Arc<PurgeService>,
        queue: Arc<dyn PurgeQueueRepo>,
        config: QueueDrainConfig,
        enabled: bool,
    ) -> Self {
        let state = if enabled {
            DrainState::Scheduled
        } else {
            DrainState::Disabled
        };
        Self {
            service,
            queue,
            config,
            state: std::sync::RwLock::new(state),
        }
    }

    pub fn state(&self) -> DrainState {
        *read_state(&self.state, "drain_state")
    }

    pub fn config(&self) -> &QueueDrainConfig {
        &self.config
    }

    /// Run one drain pass.
    ///
    /// Claims at most `batch_limit` items, dispatches each, and releases the
    /// claim on failure so a later tick can retry. Returns without touching
    /// the queue when the drainer is disabled or a pass is already running.
    pub async fn drain_tick(&self) -> Result<DrainSummary, DrainError> {
        {
            let mut state = write_state(&self.state, "drain_state");
            match *state {
                DrainState::Disabled => {
                    debug!("Queued purging disabled, skipping drain tick");
                    return Ok(DrainSummary::default());
                }
                DrainState::Running => {
                    debug!("Previous drain still running, skipping tick");
                    return Ok(DrainSummary::default());
                }
                DrainState::Scheduled => *state = DrainState::Running,
            }
        }

        let started = Instant::now();
        let result = self.drain_batch().await;
        *write_state(&self.state, "drain_state") = DrainState::Scheduled;

        let summary = result?;
        histogram!(METRIC_QUEUE_DRAIN_MS).record(started.elapsed().as_millis() as f64);

        if summary.claimed > 0 {
            info!(
                claimed = summary.claimed,
                completed = summary.completed,
                failed = summary.failed,
                dead = summary.dead,
                "Drained purge queue batch"
            );
        }
        Ok(summary)
    }

    async fn drain_batch(&self) -> Result<DrainSummary, DrainError> {
        // Incomplete driver credentials are an operator problem, not an item
        // failure: leave the queue untouched until configuration is fixed.
        if !self.service.feature_is_configured() {
            debug!("Purge driver not configured, leaving queued items in place");
            return Ok(DrainSummary::default());
        }

        let batch = self
            .queue
            .claim_batch(
                &self.config.queue_name,
                self.config.batch_limit,
                self.config.lease,
                self.config.max_attempts,
            )
            .await?;

        let mut summary = DrainSummary {
            claimed: batch.len(),
            ..DrainSummary::default()
        };

        for item in batch {
            match self.dispatch_item(&item).await? {
                ItemResult::Completed => summary.completed += 1,
                ItemResult::Failed => summary.failed += 1,
                ItemResult::Dead => {
                    summary.failed += 1;
                    summary.dead += 1;
                }
                ItemResult::Released => {}
            }
        }

        let counts = self
            .queue
            .counts(&self.config.queue_name, self.config.max_attempts)
            .await?;
        gauge!(METRIC_QUEUE_DEPTH).set((counts.pending + counts.reserved) as f64);

        Ok(summary)
    }

    async fn dispatch_item(&self, item: &QueueItemRecord) -> Result<ItemResult, DrainError> {
        let request = match parse_payload(&item.payload) {
            Ok(request) => request,
            Err(err) => {
                warn!(
                    item_id = %item.id,
                    error = %err,
                    "Discarding purge item with malformed payload"
                );
                return self.fail_item(item.id, item.attempts).await;
            }
        };

        match self.service.purge_now(&request).await {
            Ok(()) => {
                self.queue.mark_completed(item.id).await?;
                Ok(ItemResult::Completed)
            }
            Err(PurgeError::Repo(err)) => Err(err.into()),
            Err(PurgeError::NotConfigured) => {
                // Never burns an attempt; the reservation lapses with the
                // lease and the item is picked up again later.
                debug!(item_id = %item.id, "Purge driver not configured, item left reserved");
                Ok(ItemResult::Released)
            }
            Err(err) => {
                debug!(item_id = %item.id, error = %err, "Purge item failed, will retry");
                self.fail_item(item.id, item.attempts).await
            }
        }
    }

    async fn fail_item(&self, id: Uuid, prior_attempts: i32) -> Result<ItemResult, DrainError> {
        let attempts = self.queue.record_failure(id).await?;
        if attempts >= self.config.max_attempts {
            counter!(METRIC_QUEUE_DEAD_TOTAL).increment(1);
            warn!(
                item_id = %id,
                attempts,
                max_attempts = self.config.max_attempts,
                "Purge item exhausted its attempts"
            );
            Ok(ItemResult::Dead)
        } else {
            debug!(item_id = %id, prior_attempts, attempts, "Purge item attempt recorded");
            Ok(ItemResult::Failed)
        }
    }
}

enum ItemResult {
    Completed,
    Failed,
    Dead,
    /// Not dispatched and not failed; retried once its lease lapses.
    Released,
}

fn parse_payload(payload: &Value) -> Result<PurgeRequest, serde_json::Error> {
    serde_json::from_value(payload.clone())
}
