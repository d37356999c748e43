//! Scopa, an edge-cache purge dispatcher.
//!
//! Purge requests are dispatched through pluggable CDN drivers, either
//! inline or deferred through a retry-aware Postgres queue drained by a
//! cron worker. A resolver expands content entities into the URL sets that
//! must be invalidated when they change.

pub mod application;
pub mod config;
pub mod domain;
pub mod infra;
