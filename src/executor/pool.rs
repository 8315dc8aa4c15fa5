use std::time::Duration;

use chanrt_error::ModuleError;
use parking_lot::Mutex;
use tokio::runtime::{Builder, Handle, Runtime};

use super::{Executor, Task};

/// Блокирующий пул собственного многопоточного рантайма tokio.
///
/// Циклы модулей синхронные, поэтому задачи уходят в `spawn_blocking`.
/// Поддерживает таймеры.
#[derive(Debug)]
pub struct TokioExecutor {
    name: String,
    handle: Handle,
    runtime: Mutex<Option<Runtime>>,
}

impl TokioExecutor {
    pub fn new(
        name: &str,
        threads: usize,
    ) -> Result<Self, ModuleError> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(threads.max(1))
            .thread_name(format!("{name}-worker"))
            .enable_all()
            .build()
            .map_err(|e| ModuleError::Config {
                reason: format!("cannot build executor '{name}': {e}"),
            })?;
        Ok(Self {
            name: name.to_string(),
            handle: runtime.handle().clone(),
            runtime: Mutex::new(Some(runtime)),
        })
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }
}

impl Executor for TokioExecutor {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(
        &self,
        task: Task,
    ) {
        drop(self.handle.spawn_blocking(task));
    }

    fn supports_timer_schedule(&self) -> bool {
        true
    }

    fn shutdown(
        &self,
        timeout: Duration,
    ) {
        if let Some(runtime) = self.runtime.lock().take() {
            // Внутри чужого рантайма ждать нельзя: tokio паникует.
            if Handle::try_current().is_ok() {
                runtime.shutdown_background();
            } else {
                runtime.shutdown_timeout(timeout);
            }
            tracing::debug!(executor = %self.name, "executor stopped");
        }
    }
}
