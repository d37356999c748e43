pub mod cdn;
pub mod db;
pub mod error;
pub mod telemetry;
