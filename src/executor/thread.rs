use std::thread;

use super::{Executor, Task};

/// Отдельный поток ОС на каждую задачу. Таймеры не поддерживает.
#[derive(Debug)]
pub struct ThreadExecutor {
    name: String,
}

impl ThreadExecutor {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

impl Executor for ThreadExecutor {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(
        &self,
        task: Task,
    ) {
        let spawned = thread::Builder::new()
            .name(format!("{}-task", self.name))
            .spawn(task);
        if let Err(err) = spawned {
            tracing::error!(executor = %self.name, "failed to spawn task thread: {err}");
        }
    }

    fn supports_timer_schedule(&self) -> bool {
        false
    }
}
