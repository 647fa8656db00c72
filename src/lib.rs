//! # hamustro
//!
//! Event-ingestion gateway. Signed batches of analytics events come in over
//! HTTP and become actions on a bounded job queue. A pool of workers
//! batches them into a storage dialect (filesystem or S3) with bounded
//! retries.

pub mod action;
pub mod config;
pub mod context;
pub mod dialects;
pub mod engine;
pub mod error;
pub mod event;
pub mod queue;
pub mod server;
pub mod telemetry;
