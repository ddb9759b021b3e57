//! The per-plugin task executor: a tokio runtime with at least two workers
//! so a blocking main loop can never starve asynchronous broker callbacks.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tmx_value::{TmxError, TmxResult};
use tokio::runtime::{Builder, Handle, Runtime};

pub struct TmxExecutor {
    runtime: Runtime,
}

impl TmxExecutor {
    pub fn new(name: &str) -> TmxResult<Self> {
        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(2)
            .max(2);
        let runtime = Builder::new_multi_thread()
            .worker_threads(workers)
            .thread_name(format!("{}-exec", name))
            .enable_all()
            .build()
            .map_err(|e| TmxError::new(tmx_value::codes::EIO, e.to_string()))?;
        Ok(Self { runtime })
    }

    pub fn shared(name: &str) -> TmxResult<Arc<Self>> {
        Ok(Arc::new(Self::new(name)?))
    }

    pub fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.runtime.spawn(future);
    }

    pub fn handle(&self) -> Handle {
        self.runtime.handle().clone()
    }

    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }

    /// Tear the runtime down, waiting up to the given bound for running
    /// tasks to observe cancellation.
    pub fn shutdown(self, timeout: Duration) {
        self.runtime.shutdown_timeout(timeout);
    }
}

impl std::fmt::Debug for TmxExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TmxExecutor").finish()
    }
}
