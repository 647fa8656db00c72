//! Application context: everything the gateway shares, built once at startup.

use crate::config::Config;
use crate::dialects::{self, StorageClient};
use crate::engine::Dispatcher;
use crate::error::Result;
use crate::queue::{JobQueue, job_queue};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

pub struct AppContext {
    pub config: Config,
    pub storage: Arc<dyn StorageClient>,
    pub queue: JobQueue,
    pub dispatcher: Dispatcher,
    /// Include error messages in HTTP responses.
    pub verbose: bool,
    terminating: AtomicBool,
}

impl AppContext {
    /// Connect the configured storage and start the worker pool.
    pub async fn start(config: Config, verbose: bool) -> Result<Arc<Self>> {
        config.validate()?;
        let storage = dialects::connect(&config).await?;
        Self::with_storage(config, storage, verbose).await
    }

    /// Start the worker pool against an already built storage client.
    pub async fn with_storage(
        config: Config,
        storage: Arc<dyn StorageClient>,
        verbose: bool,
    ) -> Result<Arc<Self>> {
        let (queue, jobs) = job_queue(config.max_queue_size());
        let dispatcher =
            Dispatcher::start(config.dispatcher_config(), Arc::clone(&storage), queue.clone(), jobs)?;
        dispatcher.start_automatic_flush().await;

        info!(
            queue_size = queue.capacity(),
            storage = storage.name(),
            "gateway context ready"
        );
        Ok(Arc::new(Self {
            config,
            storage,
            queue,
            dispatcher,
            verbose,
            terminating: AtomicBool::new(false),
        }))
    }

    /// Whether shutdown has begun. New work is refused from then on.
    pub fn is_terminating(&self) -> bool {
        self.terminating.load(Ordering::Acquire)
    }

    /// Start refusing new work. The worker pool keeps running.
    pub fn begin_shutdown(&self) {
        if !self.terminating.swap(true, Ordering::AcqRel) {
            info!("shutting down, refusing new work");
        }
    }

    /// Refuse new work and stop the worker pool.
    pub async fn shutdown(&self) {
        self.begin_shutdown();
        self.dispatcher.stop().await;
    }
}
