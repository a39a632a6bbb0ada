pub mod catalog;
pub mod center;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod geo;
pub mod ingest;
pub mod scheduler;
pub mod shutdown;
pub mod telemetry;
pub mod worker;
