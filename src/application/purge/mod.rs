//! Purge dispatch pipeline.
//!
//! The pieces, leaves first:
//!
//! - [`PurgeDriver`]: the capability every CDN backend implements.
//! - [`PurgeObjectResolver`]: expands a content entity into the URL set
//!   that must be invalidated when it changes.
//! - [`PurgeService`]: the facade everything else calls; resolves the
//!   active driver, dispatches or enqueues, records the last connection
//!   error for operators.
//! - [`QueueDrainer`]: drains the persisted queue in bounded batches on a
//!   cron tick when queued purging is enabled.

mod driver;
mod lock;
mod queue;
mod resolver;
mod service;

#[cfg(test)]
pub(crate) mod testing;

pub use driver::{ApiError, ProviderError, PurgeDriver};
pub use queue::{DrainError, DrainState, DrainSummary, QueueDrainConfig, QueueDrainer};
pub use resolver::{PurgeObjectResolver, PurgeTarget, ResolveOptions, Resolution, SiteUrls, SkipReason};
pub use service::{PurgeError, PurgeMode, PurgeOutcome, PurgeService};
