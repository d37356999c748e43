//! Cron job draining the persisted purge queue.

use std::str::FromStr;
use std::sync::Arc;

use apalis::prelude::*;
use apalis_cron::Schedule;

use crate::application::purge::QueueDrainer;

/// Marker struct for the cron-triggered drain job.
/// Must implement `From<chrono::DateTime<chrono::Utc>>` for apalis-cron compatibility.
#[derive(Default, Debug, Clone)]
pub struct DrainPurgeQueueJob;

impl From<chrono::DateTime<chrono::Utc>> for DrainPurgeQueueJob {
    fn from(_: chrono::DateTime<chrono::Utc>) -> Self {
        Self
    }
}

/// Context for the drain job worker.
#[derive(Clone)]
pub struct DrainWorkerContext {
    pub drainer: Arc<QueueDrainer>,
}

/// Process one drain tick: claim a bounded batch and dispatch it.
pub async fn process_drain_purge_queue_job(
    _job: DrainPurgeQueueJob,
    ctx: Data<DrainWorkerContext>,
) -> Result<(), apalis::prelude::Error> {
    match ctx.drainer.drain_tick().await {
        Ok(summary) if summary.claimed > 0 => {
            tracing::info!(
                claimed = summary.claimed,
                completed = summary.completed,
                failed = summary.failed,
                dead = summary.dead,
                "Purge queue drain tick finished"
            );
        }
        Err(err) => {
            tracing::warn!(error = %err, "Purge queue drain tick failed");
        }
        _ => {}
    }
    Ok(())
}

/// Create the cron schedule for queue draining.
/// Runs once a minute at second 0: "0 * * * * *"
pub fn drain_purge_queue_schedule() -> Schedule {
    Schedule::from_str("0 * * * * *").expect("Invalid cron expression for drain_purge_queue")
}
