//! Worker pool runtime: workers buffering and saving events, and the
//! dispatcher routing actions to them.

pub mod dispatcher;
pub mod worker;

pub use dispatcher::{Dispatcher, DispatcherConfig, FlushOptions};
pub use worker::{Worker, WorkerHandle, WorkerOptions, WorkerStatus};
