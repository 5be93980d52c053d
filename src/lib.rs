pub mod config;
pub mod db;
pub mod error;
pub mod export;
pub mod lifecycle;
pub mod models;
pub mod report;
pub mod stats;
pub mod store;
pub mod telemetry;
