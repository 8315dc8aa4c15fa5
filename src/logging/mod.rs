//! Логирование на `tracing`: фильтр, консольный и файловый sink'и.

pub mod config;
mod filters;
pub mod formats;
pub mod handle;
pub mod sinks;

pub use self::config::{LogFormat, LoggingConfig};
pub use handle::LoggingHandle;
use chanrt_error::ModuleError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Инициализирует глобальный subscriber по конфигурации.
///
/// Повторная инициализация в одном процессе возвращает ошибку.
pub fn init_logging(config: &LoggingConfig) -> Result<LoggingHandle, ModuleError> {
    config.validate()?;
    config.ensure_log_dir()?;

    let env_filter = filters::build_filter_from_config(config);
    let mut layers = Vec::new();

    if config.console {
        layers.push(sinks::console::layer_with_config(config));
    }

    let file_guard = if config.file_enabled {
        let (file_layer, guard) = sinks::file::layer_with_config(config);
        layers.push(file_layer);
        Some(guard)
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(layers)
        .try_init()
        .map_err(|err| ModuleError::Config {
            reason: format!("logging already initialized: {err}"),
        })?;

    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        host = %host,
        log_level = %config.level,
        format = %config.format,
        console = config.console,
        file = config.file_enabled,
        log_dir = %config.log_dir.display(),
        "logging initialized"
    );

    Ok(LoggingHandle::new(file_guard))
}
