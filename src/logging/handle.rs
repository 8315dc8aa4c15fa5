use std::time::{Duration, Instant};

use tracing_appender::non_blocking::WorkerGuard;

/// Handle жизненного цикла логирования. Держит guard файлового writer'а.
pub struct LoggingHandle {
    file_guard: Option<WorkerGuard>,
    /// Предупреждение, если сброс буфера занял дольше.
    flush_timeout: Duration,
    shut_down: bool,
}

impl LoggingHandle {
    pub fn new(file_guard: Option<WorkerGuard>) -> Self {
        Self {
            file_guard,
            flush_timeout: Duration::from_secs(5),
            shut_down: false,
        }
    }

    pub fn with_flush_timeout(
        mut self,
        timeout: Duration,
    ) -> Self {
        self.flush_timeout = timeout;
        self
    }

    pub fn has_file_sink(&self) -> bool {
        self.file_guard.is_some()
    }

    /// Сбрасывает файловый буфер и завершает логирование.
    pub fn shutdown(mut self) {
        self.shut_down = true;
        tracing::info!(
            timeout_ms = self.flush_timeout.as_millis() as u64,
            "logging shutdown initiated"
        );

        let start = Instant::now();
        drop(self.file_guard.take());
        let elapsed = start.elapsed();

        if elapsed > self.flush_timeout {
            eprintln!(
                "WARNING: logging shutdown took {}ms (timeout: {}ms)",
                elapsed.as_millis(),
                self.flush_timeout.as_millis()
            );
        }
    }
}

impl Drop for LoggingHandle {
    fn drop(&mut self) {
        if !self.shut_down && self.file_guard.is_some() {
            eprintln!("WARNING: LoggingHandle dropped without shutdown(); some logs may be lost");
        }
    }
}
