//! Application services layer.

pub mod error;
pub mod jobs;
pub mod purge;
pub mod repos;
