mod drain;

pub use drain::{
    DrainPurgeQueueJob, DrainWorkerContext, drain_purge_queue_schedule,
    process_drain_purge_queue_job,
};
