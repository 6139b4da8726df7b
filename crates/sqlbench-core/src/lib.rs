pub mod cache;
pub mod config;
pub mod dataset;
pub mod db;
pub mod engine;
pub mod errors;
pub mod generators;
pub mod metrics_api;
pub mod model;
pub mod progress;
pub mod rate_limit;
pub mod report;
pub mod sanitize;
