//! Исполнители задач, на которых модули запускают свои циклы.
//!
//! Канальный слой сам потоков не создаёт: публикация и доставка выполняются
//! на потоке вызывающего, то есть на потоке исполнителя.

mod pool;
mod thread;

use std::{collections::HashMap, fmt, sync::Arc, time::Duration};

use chanrt_error::ModuleError;

pub use self::pool::TokioExecutor;
pub use self::thread::ThreadExecutor;
use crate::config::{ExecutorKind, ExecutorSettings};

/// Задача исполнителя.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Исполнитель задач.
pub trait Executor: Send + Sync {
    fn name(&self) -> &str;

    fn execute(
        &self,
        task: Task,
    );

    /// Подходит ли исполнитель для периодических циклов с таймером.
    fn supports_timer_schedule(&self) -> bool;

    /// Останавливает исполнитель, дожидаясь задач не дольше `timeout`.
    fn shutdown(
        &self,
        _timeout: Duration,
    ) {
    }
}

/// Реестр исполнителей по имени.
#[derive(Default)]
pub struct ExecutorManager {
    executors: HashMap<String, Arc<dyn Executor>>,
}

impl ExecutorManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Создаёт исполнители из конфигурации.
    pub fn from_settings(settings: &[ExecutorSettings]) -> Result<Self, ModuleError> {
        let mut manager = Self::new();
        for cfg in settings {
            let executor: Arc<dyn Executor> = match cfg.kind {
                ExecutorKind::Tokio => Arc::new(TokioExecutor::new(&cfg.name, cfg.threads)?),
                ExecutorKind::Thread => Arc::new(ThreadExecutor::new(&cfg.name)),
            };
            if !manager.register(executor) {
                return Err(ModuleError::Config {
                    reason: format!("duplicate executor name '{}'", cfg.name),
                });
            }
        }
        Ok(manager)
    }

    /// Добавляет исполнитель; `false`, если имя уже занято.
    pub fn register(
        &mut self,
        executor: Arc<dyn Executor>,
    ) -> bool {
        let name = executor.name().to_string();
        if self.executors.contains_key(&name) {
            return false;
        }
        tracing::debug!(
            executor = %name,
            timers = executor.supports_timer_schedule(),
            "executor registered"
        );
        self.executors.insert(name, executor);
        true
    }

    pub fn get(
        &self,
        name: &str,
    ) -> Option<Arc<dyn Executor>> {
        self.executors.get(name).cloned()
    }

    /// Исполнитель, пригодный для циклов с таймером.
    pub fn timer_executor(
        &self,
        name: &str,
    ) -> Result<Arc<dyn Executor>, ModuleError> {
        let executor = self.get(name).ok_or_else(|| ModuleError::ExecutorNotFound {
            name: name.to_string(),
        })?;
        if !executor.supports_timer_schedule() {
            return Err(ModuleError::TimerUnsupported {
                executor: name.to_string(),
            });
        }
        Ok(executor)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.executors.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn shutdown(
        &self,
        timeout: Duration,
    ) {
        for executor in self.executors.values() {
            executor.shutdown(timeout);
        }
    }
}

impl fmt::Debug for ExecutorManager {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("ExecutorManager")
            .field("executors", &self.names())
            .finish()
    }
}
